//! Songbird-backed audio sink and cache-backed voice channel.

use serenity::async_trait;
use serenity::cache::Cache;
use serenity::model::id::{ChannelId, GuildId, UserId};
use songbird::events::{CoreEvent, Event, EventContext, EventHandler, TrackEvent};
use songbird::input::HttpRequest;
use songbird::tracks::{PlayMode, TrackHandle};
use songbird::{Call, Songbird};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::catalog::StreamHandle;
use crate::error::{PlayerError, Result};
use crate::transport::{AudioSink, SinkEvent, SinkEventKind, SinkStatus, Transport, VoiceChannel};

pub struct SongbirdSink {
    manager: Arc<Songbird>,
    call: Arc<Mutex<Call>>,
    guild_id: GuildId,
    http: reqwest::Client,
    events: mpsc::UnboundedSender<SinkEvent>,
    current: StdMutex<Option<TrackHandle>>,
    volume: f32,
}

/// Forwards track events of one commit, tagged with its epoch.
struct TrackForwarder {
    epoch: u64,
    preparing: bool,
    events: mpsc::UnboundedSender<SinkEvent>,
}

#[async_trait]
impl EventHandler for TrackForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let EventContext::Track(tracks) = ctx else {
            return None;
        };
        for (state, _) in tracks.iter() {
            let kind = if self.preparing {
                SinkEventKind::Status(SinkStatus::Buffering)
            } else {
                match &state.playing {
                    PlayMode::Play => SinkEventKind::Status(SinkStatus::Playing),
                    PlayMode::Pause => SinkEventKind::Status(SinkStatus::Paused),
                    PlayMode::Stop | PlayMode::End => SinkEventKind::Status(SinkStatus::Idle),
                    PlayMode::Errored(e) => SinkEventKind::Error(format!("{e:?}")),
                    _ => continue,
                }
            };
            if self.events.send(SinkEvent { epoch: self.epoch, kind }).is_err() {
                // Session is gone; stop listening.
                return Some(Event::Cancel);
            }
        }
        None
    }
}

struct DisconnectForwarder {
    events: mpsc::UnboundedSender<SinkEvent>,
}

#[async_trait]
impl EventHandler for DisconnectForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::DriverDisconnect(data) = ctx {
            // No reason means we asked to leave.
            if let Some(reason) = &data.reason {
                debug!(guild = ?data.guild_id, ?reason, "voice driver disconnected");
                let event = SinkEvent {
                    epoch: 0,
                    kind: SinkEventKind::Disconnected,
                };
                if self.events.send(event).is_err() {
                    return Some(Event::Cancel);
                }
            }
        }
        None
    }
}

#[async_trait]
impl AudioSink for SongbirdSink {
    async fn commit(&self, stream: StreamHandle, epoch: u64) -> Result<()> {
        let input = HttpRequest::new(self.http.clone(), stream.url);
        let handle = {
            let mut call = self.call.lock().await;
            call.play_only_input(input.into())
        };
        let _ = handle.set_volume(self.volume);

        for (event, preparing) in [
            (TrackEvent::Preparing, true),
            (TrackEvent::Play, false),
            (TrackEvent::Pause, false),
            (TrackEvent::End, false),
            (TrackEvent::Error, false),
        ] {
            let forwarder = TrackForwarder {
                epoch,
                preparing,
                events: self.events.clone(),
            };
            handle
                .add_event(Event::Track(event), forwarder)
                .map_err(|e| PlayerError::TransportUnavailable(format!("{e:?}")))?;
        }

        if let Ok(mut current) = self.current.lock() {
            *current = Some(handle);
        }
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.with_current(|h| h.pause())
    }

    fn resume(&self) -> Result<()> {
        self.with_current(|h| h.play())
    }

    fn stop(&self) {
        let handle = self.current.lock().ok().and_then(|mut c| c.take());
        if let Some(handle) = handle {
            let _ = handle.stop();
        }
    }

    async fn disconnect(&self) {
        if let Err(e) = self.manager.remove(self.guild_id).await {
            warn!(guild = %self.guild_id, "failed to leave voice: {e:?}");
        }
    }
}

impl SongbirdSink {
    fn with_current(
        &self,
        f: impl FnOnce(&TrackHandle) -> songbird::tracks::TrackResult<()>,
    ) -> Result<()> {
        let current = self
            .current
            .lock()
            .map_err(|_| PlayerError::TransportUnavailable("sink state poisoned".into()))?;
        let handle = current.as_ref().ok_or(PlayerError::NothingPlaying)?;
        f(handle).map_err(|e| PlayerError::TransportUnavailable(format!("{e:?}")))
    }
}

/// The voice channel as seen through the serenity cache.
pub struct SerenityChannel {
    cache: Arc<Cache>,
    guild_id: GuildId,
    channel_id: ChannelId,
}

impl SerenityChannel {
    pub fn new(cache: Arc<Cache>, guild_id: GuildId, channel_id: ChannelId) -> Self {
        Self {
            cache,
            guild_id,
            channel_id,
        }
    }
}

impl VoiceChannel for SerenityChannel {
    fn id(&self) -> ChannelId {
        self.channel_id
    }

    fn occupant_count(&self) -> usize {
        let Some(guild) = self.cache.guild(self.guild_id) else {
            return 0;
        };
        guild
            .voice_states
            .values()
            .filter(|vs| vs.channel_id == Some(self.channel_id))
            .filter(|vs| {
                let is_bot = guild
                    .members
                    .get(&vs.user_id)
                    .map(|m| m.user.bot)
                    .or_else(|| vs.member.as_ref().map(|m| m.user.bot))
                    .unwrap_or(false);
                !is_bot
            })
            .count()
    }

    fn permissions_granted(&self, self_id: UserId) -> bool {
        let Some(guild) = self.cache.guild(self.guild_id) else {
            return false;
        };
        let (Some(channel), Some(member)) = (
            guild.channels.get(&self.channel_id),
            guild.members.get(&self_id),
        ) else {
            return false;
        };
        let perms = guild.user_permissions_in(channel, member);
        perms.connect() && perms.speak()
    }
}

pub fn voice_channel_for_user_id(
    cache: &Cache,
    guild_id: GuildId,
    user_id: UserId,
) -> Option<ChannelId> {
    cache
        .guild(guild_id)
        .and_then(|guild| guild.voice_states.get(&user_id).and_then(|vs| vs.channel_id))
}

/// Reports driver disconnects for a call to the session that owns it.
///
/// Kept apart from [`connect`] because songbird hands every join on a
/// server the same `Call`; installing it replaces whatever the call carried
/// before, which must only happen once the new session is registered.
pub struct DisconnectWatch {
    call: Arc<Mutex<Call>>,
    events: mpsc::UnboundedSender<SinkEvent>,
}

impl DisconnectWatch {
    pub async fn install(self) {
        let mut handler = self.call.lock().await;
        // A reused call may still carry handlers from an earlier session.
        handler.remove_all_global_events();
        handler.add_global_event(
            Event::Core(CoreEvent::DriverDisconnect),
            DisconnectForwarder {
                events: self.events,
            },
        );
    }
}

/// Joins `channel` and wraps the call as a [`Transport`].
pub async fn connect(
    manager: Arc<Songbird>,
    channel: SerenityChannel,
    http: reqwest::Client,
    volume: f32,
) -> Result<(Transport, DisconnectWatch)> {
    let guild_id = channel.guild_id;
    let call = manager
        .join(guild_id, channel.channel_id)
        .await
        .map_err(|e| PlayerError::TransportUnavailable(format!("{e:?}")))?;

    let (events_tx, events) = mpsc::unbounded_channel();
    let watch = DisconnectWatch {
        call: call.clone(),
        events: events_tx.clone(),
    };

    let sink = SongbirdSink {
        manager,
        call,
        guild_id,
        http,
        events: events_tx,
        current: StdMutex::new(None),
        volume,
    };

    let transport = Transport {
        sink: Box::new(sink),
        channel: Box::new(channel),
        events,
    };
    Ok((transport, watch))
}
