use dashmap::DashMap;
use serenity::all::ButtonStyle;
use serenity::async_trait;
use serenity::builder::{CreateActionRow, CreateButton, CreateEmbed, CreateMessage, EditMessage};
use serenity::http::Http;
use serenity::model::id::{ChannelId, GuildId, MessageId};
use std::sync::Arc;
use tracing::warn;

use crate::access::Action;
use crate::notify::{DisplayState, Notifier, SessionUpdate};

pub const EMBED_COLOR: u32 = 0x5865F2;
const COLOR_PLAYING: u32 = 0x57F287;
const COLOR_PAUSED: u32 = 0xFEE75C;
const COLOR_PROBLEM: u32 = 0xED4245;
const COLOR_ENDED: u32 = 0x99AAB5;

const BUTTON_PREFIX: &str = "wave";

#[derive(Clone, Copy)]
struct Panel {
    channel: ChannelId,
    message: Option<MessageId>,
}

/// Keeps one live control panel message per server in sync with its session.
pub struct PanelNotifier {
    http: Arc<Http>,
    panels: DashMap<GuildId, Panel>,
}

impl PanelNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self {
            http,
            panels: DashMap::new(),
        }
    }

    /// Panel messages for `guild` go to `channel` from now on.
    pub fn bind(&self, guild: GuildId, channel: ChannelId) {
        self.panels.insert(
            guild,
            Panel {
                channel,
                message: None,
            },
        );
    }
}

/// Custom id for a panel button: `wave:<action>:<guild>`.
pub fn button_id(action: Action, guild: GuildId) -> String {
    format!("{}:{}:{}", BUTTON_PREFIX, action.as_str(), guild.get())
}

pub fn parse_button_id(custom_id: &str) -> Option<(Action, GuildId)> {
    let mut parts = custom_id.split(':');
    if parts.next()? != BUTTON_PREFIX {
        return None;
    }
    let action = Action::parse(parts.next()?)?;
    let guild = parts.next()?.parse::<u64>().ok().filter(|g| *g != 0)?;
    if parts.next().is_some() {
        return None;
    }
    Some((action, GuildId::new(guild)))
}

fn control_rows(guild: GuildId, paused: bool) -> Vec<CreateActionRow> {
    let toggle = if paused {
        CreateButton::new(button_id(Action::Resume, guild))
            .style(ButtonStyle::Success)
            .label("Resume")
    } else {
        CreateButton::new(button_id(Action::Pause, guild))
            .style(ButtonStyle::Primary)
            .label("Pause")
    };

    vec![CreateActionRow::Buttons(vec![
        CreateButton::new(button_id(Action::Previous, guild))
            .style(ButtonStyle::Secondary)
            .label("Prev"),
        toggle,
        CreateButton::new(button_id(Action::Skip, guild))
            .style(ButtonStyle::Secondary)
            .label("Skip"),
        CreateButton::new(button_id(Action::Like, guild))
            .style(ButtonStyle::Success)
            .label("Like"),
        CreateButton::new(button_id(Action::Stop, guild))
            .style(ButtonStyle::Danger)
            .label("Stop"),
    ])]
}

fn status_line(update: &SessionUpdate) -> String {
    let reason = update.reason.as_deref().unwrap_or("unknown reason");
    match update.display {
        DisplayState::Loading => "Loading track...".to_string(),
        DisplayState::Playing => "Now playing".to_string(),
        DisplayState::Paused => "Paused".to_string(),
        DisplayState::Recovering => "Connection interrupted, retrying...".to_string(),
        DisplayState::Problem => format!("Playback problem: {reason}"),
        DisplayState::PlaybackEnded => format!("Playback ended: {reason}"),
        DisplayState::Stopped => format!("Stopped: {reason}"),
        DisplayState::Disconnected => format!("Disconnected: {reason}"),
    }
}

fn color_for(display: DisplayState) -> u32 {
    match display {
        DisplayState::Playing => COLOR_PLAYING,
        DisplayState::Paused => COLOR_PAUSED,
        DisplayState::Problem => COLOR_PROBLEM,
        DisplayState::PlaybackEnded | DisplayState::Stopped | DisplayState::Disconnected => {
            COLOR_ENDED
        }
        DisplayState::Loading | DisplayState::Recovering => EMBED_COLOR,
    }
}

pub fn panel_embed(update: &SessionUpdate) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title("My Wave")
        .description(status_line(update))
        .color(color_for(update.display));

    if let Some(track) = &update.track {
        embed = embed
            .title(track.title.clone())
            .field("Artist", track.artist.clone(), true)
            .field("Album", track.album.clone(), true);
        if let Some(cover) = &track.cover_url {
            embed = embed.thumbnail(cover.clone());
        }
    }
    embed
}

#[async_trait]
impl Notifier for PanelNotifier {
    async fn on_session_update(&self, update: SessionUpdate) {
        let guild = update.server_id;
        let Some(panel) = self.panels.get(&guild).map(|p| *p) else {
            return;
        };

        let embed = panel_embed(&update);
        let components = if update.display.is_terminal() {
            Vec::new()
        } else {
            control_rows(guild, update.display == DisplayState::Paused)
        };

        match panel.message {
            Some(message) => {
                let edit = EditMessage::new().embed(embed).components(components);
                if let Err(e) = panel.channel.edit_message(&self.http, message, edit).await {
                    warn!(%guild, "failed to update panel: {e:?}");
                }
            }
            None => {
                let message = CreateMessage::new().embed(embed).components(components);
                match panel.channel.send_message(&self.http, message).await {
                    Ok(sent) => {
                        if let Some(mut p) = self.panels.get_mut(&guild) {
                            p.message = Some(sent.id);
                        }
                    }
                    Err(e) => warn!(%guild, "failed to send panel: {e:?}"),
                }
            }
        }

        if update.display.is_terminal() {
            self.panels.remove(&guild);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_ids_parse_back() {
        let guild = GuildId::new(42);
        for action in [Action::Pause, Action::Resume, Action::Skip, Action::Previous, Action::Stop, Action::Like] {
            assert_eq!(parse_button_id(&button_id(action, guild)), Some((action, guild)));
        }
    }

    #[test]
    fn foreign_or_malformed_ids_are_ignored() {
        assert_eq!(parse_button_id("music:pause:1:2"), None);
        assert_eq!(parse_button_id("wave:dance:42"), None);
        assert_eq!(parse_button_id("wave:pause:abc"), None);
        assert_eq!(parse_button_id("wave:pause:0"), None);
        assert_eq!(parse_button_id("wave:pause:42:extra"), None);
    }

    #[test]
    fn status_line_includes_reason() {
        let update = SessionUpdate {
            server_id: GuildId::new(1),
            track: None,
            display: DisplayState::Disconnected,
            reason: Some("channel empty".into()),
        };
        assert_eq!(status_line(&update), "Disconnected: channel empty");
    }
}
