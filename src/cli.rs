//! Interface de linha de comando do livecap baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, add, remove,
//! list, check, test-sink) e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use livecap::config::DEFAULT_CONFIG_PATH;

/// livecap: monitora usuários, grava transmissões ao vivo e entrega as gravações.
#[derive(Debug, Parser)]
#[command(name = "livecap", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração TOML.
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Habilita logs detalhados (debug) do livecap.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inicia o monitoramento contínuo; comandos de operador são lidos do stdin.
    Run {
        /// Executa uma única passada, espera as gravações iniciadas e sai.
        #[arg(long, default_value_t = false)]
        once: bool,
    },

    /// Adiciona um usuário à lista monitorada.
    Add {
        user: String,
    },

    /// Remove um usuário da lista monitorada.
    Remove {
        user: String,
    },

    /// Lista os usuários monitorados.
    List,

    /// Consulta uma vez se o usuário está ao vivo.
    Check {
        user: String,
    },

    /// Valida o token do bot e envia uma mensagem de teste.
    TestSink,
}
