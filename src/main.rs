mod cli;
mod ui;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use cli::{Cli, Command};
use livecap::commands::Controller;
use livecap::config::LivecapConfig;
use livecap::delivery::{DeliveryPipeline, DeliverySink, TelegramSink};
use livecap::logging::init_logging;
use livecap::probe::{HttpStatusProbe, StatusProbe};
use livecap::scheduler::{MonitorSwitch, Scheduler, SchedulerTiming};
use livecap::supervisor::{FinalizeReport, JobSupervisor, check_program};
use livecap::watchlist::{WatchList, normalize_entity};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config = LivecapConfig::load(&cli.config)?;

    match cli.command {
        Command::Run { once } => run(config, once).await,
        Command::Add { user } => {
            let list = open_watch_list(&config);
            if list.add(&user)? {
                println!("Added @{} ({} monitored)", bare(&user), list.len());
            } else {
                println!("Already monitoring @{}", bare(&user));
            }
            Ok(())
        }
        Command::Remove { user } => {
            let list = open_watch_list(&config);
            if list.remove(&user)? {
                println!("Removed @{} ({} monitored)", bare(&user), list.len());
            } else {
                println!("Not monitoring @{}", bare(&user));
            }
            Ok(())
        }
        Command::List => {
            let list = open_watch_list(&config);
            ui::print_watch_list(&list.snapshot(), list.last_updated());
            Ok(())
        }
        Command::Check { user } => check(&config, &user).await,
        Command::TestSink => test_sink(&config).await,
    }
}

fn open_watch_list(config: &LivecapConfig) -> WatchList {
    WatchList::load(&config.monitor.watch_list_path, &config.monitor.users)
}

fn bare(user: &str) -> &str {
    let user = user.trim();
    user.strip_prefix('@').unwrap_or(user)
}

async fn check(config: &LivecapConfig, user: &str) -> Result<()> {
    let Some(entity) = normalize_entity(user) else {
        bail!("invalid user name: {user:?}");
    };
    let probe = HttpStatusProbe::new(&config.status);
    let progress = ui::Progress::start(&format!("Checking @{entity}..."));
    let status = probe.probe(&entity).await;
    progress.status(&entity, status);
    Ok(())
}

async fn test_sink(config: &LivecapConfig) -> Result<()> {
    let sink = TelegramSink::new(&config.telegram);
    let progress = ui::Progress::start("Validating bot token...");
    if !sink.is_enabled() {
        progress.failure("Telegram delivery is disabled or bot_token/chat_id are missing");
        bail!("telegram sink is not configured");
    }

    let bot = match sink.get_me().await {
        Ok(bot) => bot,
        Err(e) => {
            progress.failure(&format!("Bot token rejected: {e}"));
            return Err(e).context("validating bot token");
        }
    };
    let name = bot.username.unwrap_or(bot.first_name);

    progress.step(&format!("Sending test message as @{name}..."));
    if let Err(e) = sink
        .send_text("✅ <b>livecap</b> test message: notifications are working")
        .await
    {
        progress.failure(&format!("Test message failed: {e}"));
        return Err(e).context("sending test message");
    }
    progress.success(&format!("Bot @{name} can post to chat {}", config.telegram.chat_id));
    Ok(())
}

async fn run(config: LivecapConfig, once: bool) -> Result<()> {
    let program = check_program(&config.capture.program).context("checking capture program")?;
    info!(program = %program.display(), "capture program found");

    let watch_list = Arc::new(open_watch_list(&config));
    let delivery = Arc::new(DeliveryPipeline::new(TelegramSink::new(&config.telegram)));
    let supervisor = Arc::new(JobSupervisor::from_config(&config.capture, delivery));
    let switch = MonitorSwitch::new();
    let mut scheduler = Scheduler::new(
        Arc::clone(&watch_list),
        HttpStatusProbe::new(&config.status),
        Arc::clone(&supervisor),
        SchedulerTiming::from_config(&config.monitor),
    )
    .with_switch(switch.clone());

    let reports = tokio::spawn(print_reports(supervisor.subscribe()));

    info!(
        users = watch_list.len(),
        output = %supervisor.output_dir().display(),
        "livecap started"
    );

    if once {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let interrupt = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupted, stopping recordings");
                    if stop_tx.send(true).is_err() {
                        debug!("single pass already finished");
                    }
                    supervisor.stop_all();
                }
            }
        });

        tokio::select! {
            result = scheduler.tick() => match result {
                Ok(report) => info!(
                    probed = report.probed,
                    started = report.started.len(),
                    "single pass complete, waiting for recordings"
                ),
                Err(e) => error!(error = %e, "monitoring pass failed"),
            },
            _ = stop_rx.changed() => {}
        }
        drop(scheduler);
        // A job may have started while the interrupted pass was unwinding.
        if *stop_rx.borrow() {
            supervisor.stop_all();
        }
        supervisor.join_all().await;
        interrupt.abort();
        reap(interrupt, "interrupt").await;
    } else {
        supervisor
            .delivery()
            .notify(&format!(
                "🤖 <b>Monitor started</b>\nMonitoring {} users",
                watch_list.len()
            ))
            .await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let monitor = tokio::spawn(scheduler.run(shutdown_rx));
        let console = spawn_console(Controller::new(
            Arc::clone(&watch_list),
            Arc::clone(&supervisor),
            switch,
        ));

        tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl-C")?;
        info!("shutdown requested");

        if shutdown_tx.send(true).is_err() {
            debug!("monitoring loop already stopped");
        }
        if let Err(e) = monitor.await {
            error!(error = %e, "monitoring task failed");
        }
        console.abort();
        reap(console, "console").await;
        supervisor.shutdown().await;
    }

    // Last reference to the supervisor: closing it ends the report stream.
    drop(supervisor);
    reap(reports, "report printer").await;
    info!("livecap stopped");
    Ok(())
}

/// Awaits a helper task; `false` when it panicked. Cancellation after
/// `abort` counts as a normal end.
async fn reap(task: JoinHandle<()>, name: &str) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) if e.is_cancelled() => true,
        Err(e) => {
            debug!(task = name, error = %e, "helper task failed");
            false
        }
    }
}

async fn print_reports(mut reports: broadcast::Receiver<FinalizeReport>) {
    loop {
        match reports.recv().await {
            Ok(report) => ui::print_report(&report),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "report printer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Feeds operator commands from stdin to the controller and prints replies.
///
/// Stdin is read on a plain thread: a blocking read cannot be cancelled and
/// must not hold up runtime shutdown.
fn spawn_console<S: DeliverySink + 'static>(controller: Controller<S>) -> JoinHandle<()> {
    let (tx, mut rx) = mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if let Some(reply) = controller.handle_line(&line) {
                println!("{reply}");
            }
        }
    })
}
