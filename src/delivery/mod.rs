//! Notifications and recording delivery.
//!
//! [`DeliveryPipeline`] wraps a [`DeliverySink`] with the delivery policy:
//! notifications are best-effort, uploads fall back to a human-visible notice
//! and are never retried automatically.

pub mod error;
pub mod messages;
mod telegram;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

pub use error::SinkError;
pub use telegram::{BotIdentity, TelegramSink};

/// External message/file endpoint.
pub trait DeliverySink: Send + Sync {
    fn send_text(&self, text: &str) -> impl Future<Output = Result<(), SinkError>> + Send;

    fn send_file(
        &self,
        path: &Path,
        caption: &str,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;
}

impl<S: DeliverySink> DeliverySink for Arc<S> {
    fn send_text(&self, text: &str) -> impl Future<Output = Result<(), SinkError>> + Send {
        (**self).send_text(text)
    }

    fn send_file(
        &self,
        path: &Path,
        caption: &str,
    ) -> impl Future<Output = Result<(), SinkError>> + Send {
        (**self).send_file(path, caption)
    }
}

pub struct DeliveryPipeline<S> {
    sink: S,
}

impl<S: DeliverySink> DeliveryPipeline<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Sends a text notification. Failures are logged and reported as
    /// `false`, never propagated.
    pub async fn notify(&self, text: &str) -> bool {
        match self.sink.send_text(text).await {
            Ok(()) => {
                debug!("notification sent");
                true
            }
            Err(SinkError::Disabled) => {
                debug!("notification skipped, sink disabled");
                false
            }
            Err(e) => {
                error!(error = %e, "failed to send notification");
                false
            }
        }
    }

    /// Uploads a recording. On failure the operator gets a single
    /// "saved but not delivered" notice instead.
    pub async fn deliver(&self, path: &Path, caption: &str) -> bool {
        info!(path = %path.display(), "uploading recording");
        match self.sink.send_file(path, caption).await {
            Ok(()) => {
                info!(path = %path.display(), "recording delivered");
                true
            }
            Err(SinkError::Disabled) => {
                warn!(path = %path.display(), "recording kept locally, sink disabled");
                false
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "recording upload failed");
                self.notify(&messages::upload_failed(path)).await;
                false
            }
        }
    }
}
