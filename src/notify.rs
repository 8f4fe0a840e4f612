use async_trait::async_trait;
use serenity::model::id::GuildId;

use crate::track::TrackInfo;

/// What the front-end should show for a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayState {
    Loading,
    Playing,
    Paused,
    /// A short interruption is being retried.
    Recovering,
    /// The sink reported an error; recovery is scheduled.
    Problem,
    /// The station ran dry; the session idles until stopped or reaped.
    PlaybackEnded,
    Stopped,
    Disconnected,
}

impl DisplayState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DisplayState::Stopped | DisplayState::Disconnected)
    }
}

#[derive(Clone, Debug)]
pub struct SessionUpdate {
    pub server_id: GuildId,
    pub track: Option<TrackInfo>,
    pub display: DisplayState,
    pub reason: Option<String>,
}

/// Fire and forget. Implementations log their own failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn on_session_update(&self, update: SessionUpdate);
}
