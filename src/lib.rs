pub mod access;
pub mod catalog;
pub mod config;
pub mod credentials;
pub mod discord;
pub mod error;
pub mod logging;
pub mod notify;
pub mod policy;
pub mod queue;
pub mod registry;
pub mod session;
pub mod track;
pub mod transport;

pub use error::{PlayerError, Result};
pub use registry::{ActiveStatus, Requester, SessionRegistry};
pub use session::{ControlReply, PlaybackState, SessionHandle, SessionParams, SessionSnapshot};
