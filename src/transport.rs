//! Contracts with the voice transport: the audio sink that plays committed
//! streams and the voice channel the bot sits in.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, UserId};
use tokio::sync::mpsc;

use crate::catalog::StreamHandle;
use crate::error::Result;

/// Status reported by the sink for the stream it is playing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkStatus {
    Idle,
    Playing,
    Paused,
    Buffering,
    AutoPaused,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkEventKind {
    Status(SinkStatus),
    Error(String),
    /// The voice connection is gone for good.
    Disconnected,
}

/// A sink event, tagged with the epoch of the commit it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkEvent {
    pub epoch: u64,
    pub kind: SinkEventKind,
}

impl SinkEvent {
    pub fn status(epoch: u64, status: SinkStatus) -> Self {
        Self {
            epoch,
            kind: SinkEventKind::Status(status),
        }
    }

    pub fn error(epoch: u64, cause: impl Into<String>) -> Self {
        Self {
            epoch,
            kind: SinkEventKind::Error(cause.into()),
        }
    }
}

pub type SinkEvents = mpsc::UnboundedReceiver<SinkEvent>;

#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Replaces whatever is playing with `stream`. Events caused by this
    /// stream must carry `epoch`.
    async fn commit(&self, stream: StreamHandle, epoch: u64) -> Result<()>;

    fn pause(&self) -> Result<()>;

    fn resume(&self) -> Result<()>;

    fn stop(&self);

    /// Leaves the voice channel.
    async fn disconnect(&self);
}

pub trait VoiceChannel: Send + Sync {
    fn id(&self) -> ChannelId;

    /// Members in the channel, bots excluded.
    fn occupant_count(&self) -> usize;

    fn permissions_granted(&self, self_id: UserId) -> bool;
}

/// A joined voice channel handed to the registry when a session is created.
pub struct Transport {
    pub sink: Box<dyn AudioSink>,
    pub channel: Box<dyn VoiceChannel>,
    pub events: SinkEvents,
}
