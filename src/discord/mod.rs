//! Discord front-end: prefix commands, the button panel and the Songbird
//! voice transport.

mod handler;
mod panel;
mod voice;

pub use handler::{describe_reply, AppState, AppStateKey, Handler, PREFIX};
pub use panel::{button_id, panel_embed, parse_button_id, PanelNotifier, EMBED_COLOR};
pub use voice::{connect, voice_channel_for_user_id, DisconnectWatch, SerenityChannel, SongbirdSink};
