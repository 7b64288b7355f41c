//! Operator-facing notification texts (Telegram HTML parse mode).

use std::path::Path;

use chrono::{DateTime, Local};

/// Escapes the three characters Telegram's HTML mode treats specially.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn went_live(entity: &str, at: DateTime<Local>) -> String {
    let entity = escape_html(entity);
    format!(
        "🔴 <b>{entity}</b> is LIVE!\n📹 Recording started\nTime: {}\nLink: https://www.tiktok.com/@{entity}/live",
        at.format("%H:%M:%S")
    )
}

/// Caption attached to a delivered recording.
pub fn recording_caption(entity: &str, ended_at: DateTime<Local>, stopped_manually: bool) -> String {
    let (title, verb) = if stopped_manually {
        ("Manual Stop", "Stopped")
    } else {
        ("Live Recording", "Ended")
    };
    format!(
        "📹 <b>{}</b> - {title}\n{verb}: {}",
        escape_html(entity),
        ended_at.format("%Y-%m-%d %H:%M:%S")
    )
}

pub fn recording_failed(entity: &str, detail: &str) -> String {
    format!(
        "❌ Recording failed for <b>{}</b>\n{}",
        escape_html(entity),
        escape_html(detail)
    )
}

pub fn no_artifact(entity: &str) -> String {
    format!("⚠️ No recording found for <b>{}</b>", escape_html(entity))
}

pub fn upload_failed(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    format!(
        "⚠️ Recording saved but upload failed: {}",
        escape_html(&name)
    )
}
