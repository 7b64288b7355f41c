//! Configuração do livecap carregada a partir de `livecap.toml`.
//!
//! A struct [`LivecapConfig`] agrupa as quatro seções do arquivo
//! (`[monitor]`, `[status]`, `[capture]`, `[telegram]`). Valores ausentes
//! usam defaults sensíveis. As variáveis de ambiente `TELEGRAM_BOT_TOKEN` e
//! `TELEGRAM_CHAT_ID` têm precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use crate::error::LivecapError;

/// Caminho padrão do arquivo de configuração.
pub const DEFAULT_CONFIG_PATH: &str = "livecap.toml";

/// Configuração de nível superior carregada de `livecap.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LivecapConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub status: StatusConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// Cadência do laço de monitoramento e persistência da lista.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Intervalo entre passadas completas pela lista, em segundos.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Pausa entre consultas de usuários dentro de uma passada, em milissegundos.
    #[serde(default = "default_probe_delay_ms")]
    pub probe_delay_ms: u64,

    /// Espera após um erro no laço antes da próxima passada, em segundos.
    #[serde(default = "default_error_cooldown_secs")]
    pub error_cooldown_secs: u64,

    /// Intervalo de verificação enquanto o monitoramento está pausado.
    #[serde(default = "default_paused_recheck_secs")]
    pub paused_recheck_secs: u64,

    /// Arquivo JSON com a lista persistida de usuários monitorados.
    #[serde(default = "default_watch_list_path")]
    pub watch_list_path: PathBuf,

    /// Usuários iniciais, usados apenas quando a lista persistida não existe.
    #[serde(default)]
    pub users: Vec<String>,
}

/// Endpoints da fonte de status (consulta assinada em três etapas).
#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    /// Template com `{user}`; responde JSON com `signed_path`.
    #[serde(default = "default_sign_url")]
    pub sign_url: String,

    /// Template com `{signed_path}`; responde JSON com `data.user.roomId`.
    #[serde(default = "default_room_url")]
    pub room_url: String,

    /// Template com `{room_id}`; responde JSON com `data[0].alive`.
    #[serde(default = "default_alive_url")]
    pub alive_url: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timeout de cada requisição, em segundos.
    #[serde(default = "default_status_timeout_secs")]
    pub timeout_secs: u64,
}

/// Comando externo de captura e diretório de saída.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Programa executado para cada captura.
    #[serde(default = "default_capture_program")]
    pub program: String,

    /// Argumentos com placeholders `{user}`, `{output}`, `{interval}` e `{duration}`.
    #[serde(default = "default_capture_args")]
    pub args: Vec<String>,

    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,

    /// Intervalo de verificação repassado ao gravador, em minutos.
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    /// Duração máxima da gravação em segundos; `None` grava até o fim da live.
    #[serde(default)]
    pub duration_secs: Option<u64>,

    /// Tempo dado ao gravador para finalizar após SIGTERM antes do kill.
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,

    /// Espera antes de procurar o arquivo gravado, para o gravador fechá-lo.
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: u64,

    /// Extensões reconhecidas como artefatos de gravação.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

/// Credenciais e timeouts do destino de entrega (API de bot do Telegram).
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default)]
    pub bot_token: String,

    #[serde(default)]
    pub chat_id: String,

    #[serde(default = "default_text_timeout_secs")]
    pub text_timeout_secs: u64,

    /// Uploads podem ser grandes: o orçamento é de minutos.
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
}

fn default_check_interval_secs() -> u64 {
    30
}

fn default_probe_delay_ms() -> u64 {
    2000
}

fn default_error_cooldown_secs() -> u64 {
    30
}

fn default_paused_recheck_secs() -> u64 {
    10
}

fn default_watch_list_path() -> PathBuf {
    PathBuf::from("monitoring_list.json")
}

fn default_sign_url() -> String {
    "https://tikrec.com/tiktok/room/api/sign?unique_id={user}".to_string()
}

fn default_room_url() -> String {
    "https://www.tiktok.com{signed_path}".to_string()
}

fn default_alive_url() -> String {
    "https://webcast.tiktok.com/webcast/room/check_alive/?aid=1988&region=CH&room_ids={room_id}&user_is_login=true"
        .to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

fn default_status_timeout_secs() -> u64 {
    10
}

fn default_capture_program() -> String {
    "python3".to_string()
}

fn default_capture_args() -> Vec<String> {
    ["./record_wrapper.py", "{user}", "{output}", "{interval}"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("./recordings")
}

fn default_interval_minutes() -> u64 {
    10
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_settle_delay_secs() -> u64 {
    2
}

fn default_extensions() -> Vec<String> {
    ["mp4", "mkv", "flv", "ts"].into_iter().map(String::from).collect()
}

fn default_true() -> bool {
    true
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_text_timeout_secs() -> u64 {
    10
}

fn default_upload_timeout_secs() -> u64 {
    300
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            probe_delay_ms: default_probe_delay_ms(),
            error_cooldown_secs: default_error_cooldown_secs(),
            paused_recheck_secs: default_paused_recheck_secs(),
            watch_list_path: default_watch_list_path(),
            users: Vec::new(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            sign_url: default_sign_url(),
            room_url: default_room_url(),
            alive_url: default_alive_url(),
            user_agent: default_user_agent(),
            timeout_secs: default_status_timeout_secs(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: default_capture_program(),
            args: default_capture_args(),
            output_directory: default_output_directory(),
            interval_minutes: default_interval_minutes(),
            duration_secs: None,
            stop_grace_secs: default_stop_grace_secs(),
            settle_delay_secs: default_settle_delay_secs(),
            extensions: default_extensions(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            api_base: default_api_base(),
            bot_token: String::new(),
            chat_id: String::new(),
            text_timeout_secs: default_text_timeout_secs(),
            upload_timeout_secs: default_upload_timeout_secs(),
        }
    }
}

impl MonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn probe_delay(&self) -> Duration {
        Duration::from_millis(self.probe_delay_ms)
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_secs(self.error_cooldown_secs)
    }

    pub fn paused_recheck(&self) -> Duration {
        Duration::from_secs(self.paused_recheck_secs)
    }
}

impl CaptureConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

impl TelegramConfig {
    /// Indica se há credenciais suficientes para enviar algo.
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }
}

impl LivecapConfig {
    /// Carrega a configuração do caminho fornecido.
    ///
    /// Arquivo ausente usa os valores padrão (com aviso ao operador); arquivo
    /// corrompido é erro fatal de inicialização.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            Self::parse(&contents)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            warn!(
                path = %path.display(),
                "config file not found, running with built-in defaults"
            );
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;

        if config.telegram.enabled && !config.telegram.is_usable() {
            warn!("telegram delivery enabled but bot_token or chat_id is missing; notifications are disabled");
        }

        Ok(config)
    }

    pub fn parse(contents: &str) -> std::result::Result<Self, LivecapError> {
        Ok(toml::from_str::<LivecapConfig>(contents)?)
    }

    // Variáveis de ambiente têm precedência sobre o arquivo para as credenciais.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN")
            && !token.is_empty()
        {
            self.telegram.bot_token = token;
        }
        if let Some(chat) = lookup("TELEGRAM_CHAT_ID")
            && !chat.is_empty()
        {
            self.telegram.chat_id = chat;
        }
    }

    /// Rejeita valores que tornariam o laço de monitoramento inoperante.
    pub fn validate(&self) -> std::result::Result<(), LivecapError> {
        if self.monitor.check_interval_secs == 0 {
            return Err(LivecapError::Config(
                "monitor.check_interval_secs must be greater than zero".into(),
            ));
        }
        if self.capture.program.trim().is_empty() {
            return Err(LivecapError::Config("capture.program must not be empty".into()));
        }
        if self.capture.extensions.is_empty() {
            return Err(LivecapError::Config(
                "capture.extensions must list at least one extension".into(),
            ));
        }
        if !self.status.sign_url.contains("{user}") {
            return Err(LivecapError::Config(
                "status.sign_url must contain the {user} placeholder".into(),
            ));
        }
        Ok(())
    }
}
