use std::time::Duration;

use reqwest::Client;
use reqwest::header::USER_AGENT;
use serde_json::Value;
use tracing::debug;

use super::{ActiveStatus, StatusProbe};
use crate::config::StatusConfig;

/// Three-step signed lookup against the live-room API:
/// sign the user's room request, resolve the room id, ask whether the room
/// is alive.
pub struct HttpStatusProbe {
    client: Client,
    sign_url: String,
    room_url: String,
    alive_url: String,
    user_agent: String,
}

/// Why a lookup stopped before reaching an answer.
enum Miss {
    /// Transport error, non-2xx or undecodable body.
    Transport(reqwest::Error),
    /// Well-formed answer without the expected field.
    Missing(&'static str),
}

impl From<reqwest::Error> for Miss {
    fn from(e: reqwest::Error) -> Self {
        Miss::Transport(e)
    }
}

impl HttpStatusProbe {
    pub fn new(config: &StatusConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            sign_url: config.sign_url.clone(),
            room_url: config.room_url.clone(),
            alive_url: config.alive_url.clone(),
            user_agent: config.user_agent.clone(),
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value, reqwest::Error> {
        self.client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await
    }

    async fn lookup(&self, entity: &str) -> Result<bool, Miss> {
        let signed = self
            .get_json(&self.sign_url.replace("{user}", &urlencoding::encode(entity)))
            .await?;
        let signed_path = signed
            .get("signed_path")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .ok_or(Miss::Missing("signed_path"))?;

        let room = self
            .get_json(&self.room_url.replace("{signed_path}", signed_path))
            .await?;
        let room_id = room
            .pointer("/data/user/roomId")
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|id| !id.is_empty() && id != "0")
            .ok_or(Miss::Missing("data.user.roomId"))?;

        let alive = self
            .get_json(&self.alive_url.replace("{room_id}", &urlencoding::encode(&room_id)))
            .await?;
        Ok(alive
            .pointer("/data/0/alive")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }
}

impl StatusProbe for HttpStatusProbe {
    async fn probe(&self, entity: &str) -> ActiveStatus {
        match self.lookup(entity).await {
            Ok(true) => ActiveStatus::Active,
            Ok(false) => ActiveStatus::Inactive,
            Err(Miss::Missing(field)) => {
                debug!(entity = %entity, field, "status source returned no live room");
                ActiveStatus::Inactive
            }
            Err(Miss::Transport(e)) => {
                debug!(entity = %entity, error = %e, "status probe failed");
                ActiveStatus::Unknown
            }
        }
    }
}
