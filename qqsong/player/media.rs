use crate::error::PlayError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Monotonic id of one playback attempt. Larger means newer.
pub type SessionToken = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    Ended,
    Failed(String),
}

/// Where a media object reports lifecycle events. Every event is stamped
/// with the session that created the media, so the controller can drop
/// events from superseded sessions.
#[derive(Clone, Debug)]
pub struct EventSink {
    token: SessionToken,
    tx: mpsc::UnboundedSender<(SessionToken, MediaEvent)>,
}

impl EventSink {
    pub fn new(token: SessionToken, tx: mpsc::UnboundedSender<(SessionToken, MediaEvent)>) -> Self {
        Self { token, tx }
    }

    pub fn token(&self) -> SessionToken {
        self.token
    }

    pub fn send(&self, event: MediaEvent) {
        if self.tx.send((self.token, event)).is_err() {
            log::debug!("Controller gone, dropping media event for session {}", self.token);
        }
    }
}

/// One playable stream.
///
/// `load` and `play` are the two suspension points a session waits on.
/// `release` must be idempotent and must guarantee no further events are
/// sent and no further audio is produced.
#[async_trait]
pub trait Media: Send + Sync {
    /// Resolves once the stream is ready to start; yields its length when
    /// the backend knows it.
    async fn load(&self) -> Result<Option<Duration>, PlayError>;

    async fn play(&self) -> Result<(), PlayError>;

    fn pause(&self) -> Result<(), PlayError>;

    fn resume(&self) -> Result<(), PlayError>;

    fn position(&self) -> Option<Duration>;

    /// Output level from 0.0 (mute) to 1.0. May be called at any point
    /// after creation, including before `load`.
    fn set_volume(&self, volume: f64) -> Result<(), PlayError>;

    fn release(&self);
}

pub trait MediaFactory: Send + Sync {
    fn create(&self, url: &str, events: EventSink) -> Result<Arc<dyn Media>, PlayError>;
}
