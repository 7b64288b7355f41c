use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use super::DeliverySink;
use super::error::SinkError;
use crate::config::TelegramConfig;

/// Bot API envelope: `{"ok": bool, "result": ..., "description": ...}`.
#[derive(Debug, Deserialize)]
struct ApiReply<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

/// Subset of the `getMe` result used by the sink self-test.
#[derive(Debug, Clone, Deserialize)]
pub struct BotIdentity {
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// Telegram Bot API sink: text via `sendMessage`, recordings via `sendVideo`.
pub struct TelegramSink {
    client: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
    usable: bool,
    text_timeout: Duration,
    upload_timeout: Duration,
}

impl TelegramSink {
    pub fn new(config: &TelegramConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            usable: config.is_usable(),
            text_timeout: Duration::from_secs(config.text_timeout_secs),
            upload_timeout: Duration::from_secs(config.upload_timeout_secs),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.usable
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    /// Validates the bot token (`getMe`).
    pub async fn get_me(&self) -> Result<BotIdentity, SinkError> {
        if self.bot_token.is_empty() {
            return Err(SinkError::Disabled);
        }
        let response = self
            .client
            .get(self.method_url("getMe"))
            .timeout(self.text_timeout)
            .send()
            .await?;
        let reply: ApiReply<BotIdentity> = read_reply(response).await?;
        reply.result.ok_or_else(|| SinkError::Api {
            status: 200,
            message: "getMe returned no result".into(),
        })
    }
}

async fn read_reply<T: for<'de> Deserialize<'de>>(
    response: Response,
) -> Result<ApiReply<T>, SinkError> {
    let status = response.status();
    if !status.is_success() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        return Err(SinkError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let reply = response.json::<ApiReply<T>>().await?;
    if !reply.ok {
        return Err(SinkError::Api {
            status: status.as_u16(),
            message: reply
                .description
                .clone()
                .unwrap_or_else(|| "request rejected".to_string()),
        });
    }
    Ok(reply)
}

impl DeliverySink for TelegramSink {
    async fn send_text(&self, text: &str) -> Result<(), SinkError> {
        if !self.usable {
            return Err(SinkError::Disabled);
        }
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .timeout(self.text_timeout)
            .form(&[
                ("chat_id", self.chat_id.as_str()),
                ("text", text),
                ("parse_mode", "HTML"),
            ])
            .send()
            .await?;
        read_reply::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn send_file(&self, path: &Path, caption: &str) -> Result<(), SinkError> {
        if !self.usable {
            return Err(SinkError::Disabled);
        }
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "recording.mp4".to_string());

        let video = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), length)
            .file_name(file_name);
        let form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", caption.to_string())
            .text("parse_mode", "HTML")
            .part("video", video);

        let response = self
            .client
            .post(self.method_url("sendVideo"))
            .timeout(self.upload_timeout)
            .multipart(form)
            .send()
            .await?;
        read_reply::<serde_json::Value>(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sink_for(server: &MockServer) -> TelegramSink {
        TelegramSink::new(&TelegramConfig {
            api_base: server.uri(),
            bot_token: "123:abc".into(),
            chat_id: "@recordings".into(),
            ..TelegramConfig::default()
        })
    }

    #[tokio::test]
    async fn send_text_posts_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_string_contains("chat_id=%40recordings"))
            .and(body_string_contains("parse_mode=HTML"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "result": {} })))
            .expect(1)
            .mount(&server)
            .await;

        sink_for(&server).send_text("hello").await.unwrap();
    }

    #[tokio::test]
    async fn rejected_reply_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .respond_with(ResponseTemplate::new(400).set_body_string("chat not found"))
            .mount(&server)
            .await;

        let err = sink_for(&server).send_text("hello").await.unwrap_err();
        assert!(matches!(err, SinkError::Api { status: 400, .. }));
    }

    #[tokio::test]
    async fn ok_false_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({ "ok": false, "description": "Forbidden: bot was blocked" }),
            ))
            .mount(&server)
            .await;

        let err = sink_for(&server).send_text("hello").await.unwrap_err();
        match err {
            SinkError::Api { message, .. } => assert!(message.contains("blocked")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_file_uploads_multipart_video() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendVideo"))
            .and(body_string_contains("name=\"video\"; filename=\"alice_001.mp4\""))
            .and(body_string_contains("fake video bytes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "result": {} })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("alice_001.mp4");
        std::fs::write(&file, "fake video bytes").unwrap();

        sink_for(&server).send_file(&file, "caption").await.unwrap();
    }

    #[tokio::test]
    async fn send_file_missing_path_is_io_error() {
        let server = MockServer::start().await;
        let err = sink_for(&server)
            .send_file(Path::new("/definitely/not/here.mp4"), "caption")
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Io(_)));
    }

    #[tokio::test]
    async fn disabled_sink_never_calls_out() {
        let sink = TelegramSink::new(&TelegramConfig::default());
        assert!(!sink.is_enabled());
        assert!(matches!(sink.send_text("x").await, Err(SinkError::Disabled)));
    }

    #[tokio::test]
    async fn get_me_returns_identity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bot123:abc/getMe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": { "id": 1, "first_name": "Recorder", "username": "rec_bot" }
            })))
            .mount(&server)
            .await;

        let me = sink_for(&server).get_me().await.unwrap();
        assert_eq!(me.first_name, "Recorder");
        assert_eq!(me.username.as_deref(), Some("rec_bot"));
    }
}
