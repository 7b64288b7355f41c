//! Operator commands (`/add alice`, `/stop bob`, ...) and their replies.
//!
//! Replies use Telegram HTML so a chat front end can forward them as-is.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::delivery::DeliverySink;
use crate::delivery::messages::escape_html;
use crate::error::LivecapError;
use crate::scheduler::MonitorSwitch;
use crate::supervisor::JobSupervisor;
use crate::watchlist::WatchList;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add(String),
    Remove(String),
    List,
    Status,
    Stop(String),
    Pause,
    Resume,
    Help,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty command")]
    Empty,
    #[error("Unknown command: {0}. Send /help for the list")]
    Unknown(String),
    #[error("Usage: /{0} username")]
    Usage(&'static str),
}

impl Command {
    /// Parses one line. The leading `/` is optional and the verb is
    /// case-insensitive; extra arguments after the user name are ignored.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or(ParseError::Empty)?;
        let verb = verb.strip_prefix('/').unwrap_or(verb).to_lowercase();
        let arg = words.next().map(str::to_string);

        let needs_user = |name: &'static str| arg.clone().ok_or(ParseError::Usage(name));

        Ok(match verb.as_str() {
            "add" => Command::Add(needs_user("add")?),
            "remove" | "rm" => Command::Remove(needs_user("remove")?),
            "stop" => Command::Stop(needs_user("stop")?),
            "list" => Command::List,
            "status" => Command::Status,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "help" | "start" => Command::Help,
            _ => return Err(ParseError::Unknown(escape_html(&verb))),
        })
    }
}

pub const HELP: &str = "🎬 <b>Live Monitor &amp; Recorder</b>\n\n\
Commands:\n\
/add username - Start monitoring a user\n\
/remove username - Stop monitoring a user\n\
/list - Show monitored users\n\
/status - Show monitoring status\n\
/stop username - Stop a recording and send the video\n\
/pause - Pause monitoring\n\
/resume - Resume monitoring\n\
/help - Show this message";

/// Runs operator commands against the shared watch list, supervisor and
/// monitor switch.
pub struct Controller<S> {
    watch_list: Arc<WatchList>,
    supervisor: Arc<JobSupervisor<S>>,
    switch: MonitorSwitch,
}

impl<S: DeliverySink + 'static> Controller<S> {
    pub fn new(
        watch_list: Arc<WatchList>,
        supervisor: Arc<JobSupervisor<S>>,
        switch: MonitorSwitch,
    ) -> Self {
        Self {
            watch_list,
            supervisor,
            switch,
        }
    }

    /// Parses and executes a line; `None` for a blank line.
    pub fn handle_line(&self, line: &str) -> Option<String> {
        match Command::parse(line) {
            Ok(command) => Some(self.execute(&command)),
            Err(ParseError::Empty) => None,
            Err(e) => Some(format!("❌ {e}")),
        }
    }

    pub fn execute(&self, command: &Command) -> String {
        match command {
            Command::Add(user) => self.add(user),
            Command::Remove(user) => self.remove(user),
            Command::List => self.list(),
            Command::Status => self.status(),
            Command::Stop(user) => self.stop(user),
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::Help => self.help(),
        }
    }

    pub fn add(&self, user: &str) -> String {
        match self.watch_list.add(user) {
            Ok(true) => format!("✅ Added {} to monitoring", handle(user)),
            Ok(false) => format!("ℹ️ Already monitoring {}", handle(user)),
            Err(e) => format!("❌ {}", escape_html(&e.to_string())),
        }
    }

    pub fn remove(&self, user: &str) -> String {
        match self.watch_list.remove(user) {
            Ok(true) => format!("✅ Removed {} from monitoring", handle(user)),
            Ok(false) => format!("ℹ️ Not monitoring {}", handle(user)),
            Err(e) => format!("❌ {}", escape_html(&e.to_string())),
        }
    }

    pub fn list(&self) -> String {
        let users = self.watch_list.snapshot();
        if users.is_empty() {
            return "📋 No users are currently being monitored".to_string();
        }
        let lines: Vec<String> = users.iter().map(|u| format!("• {}", handle(u))).collect();
        format!(
            "📋 <b>Monitored users ({}):</b>\n\n{}",
            users.len(),
            lines.join("\n")
        )
    }

    pub fn status(&self) -> String {
        let state = if self.switch.is_paused() {
            "⏸ Paused"
        } else {
            "▶️ Running"
        };
        let active = self.supervisor.active();
        let mut message = format!(
            "📊 <b>Monitoring Status</b>\n\nStatus: {state}\nTotal users: {}\nActive recordings: {}",
            self.watch_list.len(),
            active.len()
        );
        if !active.is_empty() {
            message.push_str("\n\n<b>Currently recording:</b>");
            for job in &active {
                message.push_str(&format!(
                    "\n🔴 {} since {}{}",
                    handle(&job.entity),
                    job.started_at.with_timezone(&chrono::Local).format("%H:%M:%S"),
                    if job.stopping { " (stopping)" } else { "" }
                ));
            }
        }
        message
    }

    /// Requests the stop and replies right away; the recording itself is
    /// delivered by the job's finalization.
    pub fn stop(&self, user: &str) -> String {
        match self.supervisor.stop(user) {
            Ok(()) => format!(
                "⏹️ Stopping recording for {}...\n📤 The video will be sent when it is saved",
                handle(user)
            ),
            Err(LivecapError::NotFound(_)) => {
                format!("ℹ️ No active recording for {}", handle(user))
            }
            Err(e) => format!("❌ {}", escape_html(&e.to_string())),
        }
    }

    pub fn pause(&self) -> String {
        if self.switch.pause() {
            info!("monitoring paused");
            "⏸ Monitoring paused".to_string()
        } else {
            "ℹ️ Monitoring is already paused".to_string()
        }
    }

    pub fn resume(&self) -> String {
        if self.switch.resume() {
            info!("monitoring resumed");
            "▶️ Monitoring resumed".to_string()
        } else {
            "ℹ️ Monitoring is already running".to_string()
        }
    }

    pub fn help(&self) -> String {
        HELP.to_string()
    }
}

fn handle(user: &str) -> String {
    let user = user.trim();
    format!("@{}", escape_html(user.strip_prefix('@').unwrap_or(user)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_optional_slash_and_any_case() {
        assert_eq!(Command::parse("/add @alice"), Ok(Command::Add("@alice".into())));
        assert_eq!(Command::parse("ADD bob"), Ok(Command::Add("bob".into())));
        assert_eq!(Command::parse("  /Status  "), Ok(Command::Status));
        assert_eq!(Command::parse("/start"), Ok(Command::Help));
    }

    #[test]
    fn parse_reports_usage_and_unknown_verbs() {
        assert_eq!(Command::parse("/stop"), Err(ParseError::Usage("stop")));
        assert_eq!(Command::parse(""), Err(ParseError::Empty));
        assert_eq!(
            Command::parse("/record x"),
            Err(ParseError::Unknown("record".into()))
        );
        assert_eq!(
            ParseError::Usage("add").to_string(),
            "Usage: /add username"
        );
    }

    #[test]
    fn handle_formats_entity() {
        assert_eq!(handle("@alice"), "@alice");
        assert_eq!(handle("a<b"), "@a&lt;b");
    }

    #[cfg(unix)]
    mod controller {
        use super::super::*;
        use crate::delivery::{DeliveryPipeline, SinkError};
        use crate::supervisor::CaptureCommand;
        use std::path::Path;
        use tempfile::TempDir;

        struct NullSink;

        impl DeliverySink for NullSink {
            async fn send_text(&self, _text: &str) -> Result<(), SinkError> {
                Ok(())
            }

            async fn send_file(&self, _path: &Path, _caption: &str) -> Result<(), SinkError> {
                Ok(())
            }
        }

        fn controller(dir: &TempDir) -> Controller<NullSink> {
            let watch_list = Arc::new(WatchList::load(dir.path().join("list.json"), &[]));
            let command = CaptureCommand {
                program: "sh".into(),
                args: vec!["-c".into(), "sleep 5".into()],
                output_dir: dir.path().join("out"),
                interval_minutes: 1,
                duration_secs: None,
            };
            let supervisor = Arc::new(JobSupervisor::new(
                command,
                Arc::new(DeliveryPipeline::new(NullSink)),
            ));
            Controller::new(watch_list, supervisor, MonitorSwitch::new())
        }

        #[test]
        fn add_remove_and_list() {
            let dir = TempDir::new().unwrap();
            let c = controller(&dir);

            assert_eq!(c.list(), "📋 No users are currently being monitored");
            assert!(c.add("@alice").starts_with("✅ Added @alice"));
            assert!(c.add("alice").starts_with("ℹ️ Already monitoring @alice"));
            assert!(c.add("bob").starts_with("✅"));
            assert!(c.add("two words").starts_with("❌"));

            let list = c.list();
            assert!(list.contains("Monitored users (2)"));
            assert!(list.find("@alice").unwrap() < list.find("@bob").unwrap());

            assert!(c.remove("alice").starts_with("✅ Removed @alice"));
            assert!(c.remove("alice").starts_with("ℹ️ Not monitoring"));
        }

        #[test]
        fn pause_resume_toggle_status() {
            let dir = TempDir::new().unwrap();
            let c = controller(&dir);

            assert!(c.status().contains("Status: ▶️ Running"));
            assert_eq!(c.pause(), "⏸ Monitoring paused");
            assert_eq!(c.pause(), "ℹ️ Monitoring is already paused");
            assert!(c.status().contains("Status: ⏸ Paused"));
            assert_eq!(c.resume(), "▶️ Monitoring resumed");
        }

        #[tokio::test]
        async fn stop_reports_running_and_missing_jobs() {
            let dir = TempDir::new().unwrap();
            let c = controller(&dir);

            assert_eq!(c.stop("carol"), "ℹ️ No active recording for @carol");

            c.supervisor.start("carol").unwrap();
            assert!(c.status().contains("Active recordings: 1"));
            assert!(c.handle_line("/stop @carol").unwrap().starts_with("⏹️ Stopping"));

            c.supervisor.join_all().await;
            assert!(c.status().contains("Active recordings: 0"));
        }

        #[test]
        fn handle_line_replies_to_errors() {
            let dir = TempDir::new().unwrap();
            let c = controller(&dir);

            assert_eq!(c.handle_line("   "), None);
            assert_eq!(c.handle_line("/add").unwrap(), "❌ Usage: /add username");
            assert!(c.handle_line("/help").unwrap().contains("/resume"));
        }
    }
}
