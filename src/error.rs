use thiserror::Error;

use crate::access::Denial;
use crate::catalog::CatalogError;

pub type Result<T> = std::result::Result<T, PlayerError>;

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("the station returned no tracks")]
    NoTracksAvailable,

    #[error("no playable stream for track {track_id}")]
    StreamUnavailable { track_id: String },

    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(#[from] CatalogError),

    #[error("voice transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("{0}")]
    Unauthorized(Denial),

    #[error("there are no previous tracks")]
    NoHistory,

    #[error("a player is already running on this server")]
    AlreadyActive,

    #[error("no player is running on this server")]
    NoSession,

    #[error("nothing is playing right now")]
    NothingPlaying,

    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },

    #[error("log in with your catalog account first")]
    NotLoggedIn,

    #[error("the player session has closed")]
    SessionClosed,
}
