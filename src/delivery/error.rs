//! Tipos de erro para o destino de entrega.
//!
//! Define [`SinkError`] com variantes para destino desativado, erros da API,
//! erros de rede e de leitura do arquivo. Usa `thiserror` para derivar
//! `Display` e `Error` a partir dos atributos `#[error(...)]`.

use thiserror::Error;

/// Erros que podem ocorrer ao enviar mensagens ou arquivos ao destino.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Entrega desativada na configuração ou sem credenciais.
    #[error("delivery sink is disabled")]
    Disabled,

    /// Erro retornado pela API (ex.: 400 chat inexistente, 413 arquivo grande demais).
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Falha ao abrir ou ler o arquivo a enviar.
    #[error("file error: {0}")]
    Io(#[from] std::io::Error),
}
