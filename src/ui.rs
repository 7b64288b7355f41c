//! Interface de terminal do livecap: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`Progress`] acompanha visualmente uma operação
//! de rede curta (consulta de status, teste do bot).

use chrono::{DateTime, Local, Utc};
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use livecap::probe::ActiveStatus;
use livecap::supervisor::{FinalizeReport, JobOutcome};

/// Spinner com mensagens finais coloridas: verde para sucesso, vermelho
/// para falha e amarelo para resultado indeterminado.
pub struct Progress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl Progress {
    /// Inicia o spinner com a mensagem fornecida.
    pub fn start(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a mensagem do spinner.
    pub fn step(&self, message: &str) {
        self.pb.set_message(message.to_string());
    }

    /// Finaliza o spinner com o veredito da consulta de status.
    pub fn status(&self, user: &str, status: ActiveStatus) {
        self.pb.finish_and_clear();
        match status {
            ActiveStatus::Active => {
                println!("  {} @{user} is live", self.green.apply_to("●"));
            }
            ActiveStatus::Inactive => {
                println!("  {} @{user} is offline", self.red.apply_to("○"));
            }
            ActiveStatus::Unknown => {
                println!(
                    "  {} @{user}: status source did not answer",
                    self.yellow.apply_to("?")
                );
            }
        }
    }

    pub fn success(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", self.green.apply_to("✓"));
    }

    pub fn failure(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", self.red.apply_to("✗"));
    }
}

/// Imprime a lista monitorada, em ordem, com a data da última alteração.
pub fn print_watch_list(users: &[String], last_updated: Option<DateTime<Utc>>) {
    let dim = Style::new().dim();
    if users.is_empty() {
        println!("No users are being monitored.");
    } else {
        println!("{}", Style::new().bold().apply_to(format!("Monitored users ({}):", users.len())));
        for user in users {
            println!("  • @{user}");
        }
    }
    if let Some(at) = last_updated {
        println!(
            "{}",
            dim.apply_to(format!(
                "last updated {}",
                at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
            ))
        );
    }
}

/// Imprime o relatório de finalização de uma gravação em JSON colorido.
pub fn print_report(report: &FinalizeReport) {
    let style = match (&report.outcome, report.delivered) {
        (JobOutcome::Clean | JobOutcome::Terminated, true) => Style::new().green(),
        (JobOutcome::Clean | JobOutcome::Terminated, false) => Style::new().yellow(),
        _ => Style::new().red(),
    };
    println!();
    println!(
        "{}",
        style.apply_to(format!("─── Recording @{} ({}) ───", report.entity, report.outcome))
    );
    println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
}
