//! One live player per server.
//!
//! Each session is an actor task that owns all of its state: the queue,
//! the current track, retry bookkeeping, the activity timers and the
//! delayed recovery step. Commands, sink events, the activity tick and
//! every timer are multiplexed through a single `select!` loop, so state
//! changes for one server are strictly serialized and nothing outlives the
//! loop once the session tears down.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId, UserId};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::access::Action;
use crate::catalog::{Catalog, Credential};
use crate::config::PlayerSettings;
use crate::error::{PlayerError, Result};
use crate::notify::{DisplayState, Notifier, SessionUpdate};
use crate::queue::PlaybackQueue;
use crate::track::{Track, TrackInfo};
use crate::transport::{AudioSink, SinkEvent, SinkEventKind, SinkEvents, SinkStatus, Transport, VoiceChannel};

pub(crate) type SessionMap = DashMap<GuildId, SessionHandle>;

#[derive(Clone, Debug)]
pub struct SessionParams {
    pub server_id: GuildId,
    pub owner: UserId,
    pub credential: Credential,
    pub station_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
    Buffering,
    Stopped,
}

impl PlaybackState {
    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loading => "loading",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Buffering => "buffering",
            PlaybackState::Stopped => "stopped",
        }
    }
}

/// Point-in-time copy of a session, published after every step.
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub server_id: GuildId,
    pub owner: UserId,
    pub station_id: String,
    pub state: PlaybackState,
    pub display: DisplayState,
    pub current: Option<TrackInfo>,
    pub pending: Vec<Track>,
    pub history: Vec<Track>,
    pub retry_count: u32,
    pub skip_requested: bool,
    pub public_control: bool,
    pub sink_status: SinkStatus,
    pub epoch: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlReply {
    Paused,
    Resumed,
    Skipped,
    Previous(TrackInfo),
    Stopped,
    Liked(TrackInfo),
    LikeRejected(TrackInfo),
}

pub(crate) enum Command {
    Start {
        reply: oneshot::Sender<Result<()>>,
    },
    Control {
        action: Action,
        reply: oneshot::Sender<Result<ControlReply>>,
    },
    SetPublicControl(bool),
    Shutdown {
        reason: String,
    },
}

/// Cheap, cloneable access to a running session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    id: u64,
    server_id: GuildId,
    owner: UserId,
    channel_id: ChannelId,
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub fn server_id(&self) -> GuildId {
        self.server_id
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Waits until a published snapshot satisfies `pred`. `None` once the
    /// session has ended without ever satisfying it.
    pub async fn wait_for(
        &self,
        pred: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Option<SessionSnapshot> {
        let mut rx = self.snapshot.clone();
        rx.wait_for(pred).await.ok().map(|s| s.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Resolves once the session task has exited.
    pub async fn closed(&self) {
        self.commands.closed().await
    }

    pub async fn control(&self, action: Action) -> Result<ControlReply> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Control { action, reply })?;
        rx.await.map_err(|_| PlayerError::SessionClosed)?
    }

    pub(crate) async fn start(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { reply })?;
        rx.await.map_err(|_| PlayerError::SessionClosed)?
    }

    pub(crate) fn set_public_control(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetPublicControl(enabled))
    }

    pub(crate) fn shutdown(&self, reason: impl Into<String>) -> Result<()> {
        self.send(Command::Shutdown {
            reason: reason.into(),
        })
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.commands.send(cmd).map_err(|_| PlayerError::SessionClosed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PlayCause {
    /// A new track; the old one moves to history.
    Advance,
    /// Same track again after an interruption.
    Retry,
    /// Back-navigation; the old one returns to the queue instead.
    Previous,
}

#[derive(Clone, Copy, Debug)]
enum Continuation {
    RetryCurrent,
    Advance,
    /// Deferred end of a track that failed after playing for `played`.
    Terminal { played: Option<Duration> },
}

#[derive(Default)]
struct ActivityTimers {
    empty_channel: Option<Instant>,
    no_playback: Option<Instant>,
}

pub(crate) struct Collaborators {
    pub catalog: Arc<dyn Catalog>,
    pub notifier: Arc<dyn Notifier>,
    pub sessions: Arc<SessionMap>,
    pub settings: PlayerSettings,
}

pub(crate) struct SessionActor {
    id: u64,
    params: SessionParams,
    settings: PlayerSettings,
    catalog: Arc<dyn Catalog>,
    sessions: Arc<SessionMap>,
    updates: mpsc::UnboundedSender<SessionUpdate>,
    notifier: Arc<dyn Notifier>,

    sink: Box<dyn AudioSink>,
    channel: Box<dyn VoiceChannel>,
    events: SinkEvents,
    mailbox: mpsc::UnboundedReceiver<Command>,
    snapshot_tx: watch::Sender<SessionSnapshot>,

    queue: PlaybackQueue,
    current: Option<Track>,
    state: PlaybackState,
    display: DisplayState,
    track_started_at: Option<Instant>,
    retry_count: u32,
    skip_requested: bool,
    public_control: bool,
    sink_status: SinkStatus,
    epoch: u64,
    epoch_consumed: bool,
    advance_failures: u32,
    continuation: Option<(Instant, Continuation)>,
    timers: ActivityTimers,
    stopped: bool,
}

/// Builds the actor and its handle. The caller registers the handle and
/// then spawns [`SessionActor::run`].
pub(crate) fn build(
    id: u64,
    params: SessionParams,
    public_control: bool,
    transport: Transport,
    deps: &Collaborators,
) -> (SessionHandle, SessionActor) {
    let (commands, mailbox) = mpsc::unbounded_channel();
    let (updates, _) = mpsc::unbounded_channel();
    let queue = PlaybackQueue::new(deps.settings.history_limit);

    let mut actor = SessionActor {
        id,
        settings: deps.settings.clone(),
        catalog: deps.catalog.clone(),
        sessions: deps.sessions.clone(),
        updates,
        notifier: deps.notifier.clone(),
        sink: transport.sink,
        channel: transport.channel,
        events: transport.events,
        mailbox,
        snapshot_tx: watch::channel(placeholder_snapshot(&params)).0,
        queue,
        current: None,
        state: PlaybackState::Idle,
        display: DisplayState::Loading,
        track_started_at: None,
        retry_count: 0,
        skip_requested: false,
        public_control,
        sink_status: SinkStatus::Idle,
        epoch: 0,
        epoch_consumed: true,
        advance_failures: 0,
        continuation: None,
        timers: ActivityTimers::default(),
        stopped: false,
        params,
    };
    actor.snapshot_tx.send_replace(actor.snapshot());

    let handle = SessionHandle {
        id,
        server_id: actor.params.server_id,
        owner: actor.params.owner,
        channel_id: actor.channel.id(),
        commands,
        snapshot: actor.snapshot_tx.subscribe(),
    };

    (handle, actor)
}

fn placeholder_snapshot(params: &SessionParams) -> SessionSnapshot {
    SessionSnapshot {
        server_id: params.server_id,
        owner: params.owner,
        station_id: params.station_id.clone(),
        state: PlaybackState::Idle,
        display: DisplayState::Loading,
        current: None,
        pending: Vec::new(),
        history: Vec::new(),
        retry_count: 0,
        skip_requested: false,
        public_control: false,
        sink_status: SinkStatus::Idle,
        epoch: 0,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl SessionActor {
    pub(crate) async fn run(mut self) {
        // Updates go through one forwarding task so they stay ordered
        // without the notifier ever blocking the state machine.
        let (updates, mut rx) = mpsc::unbounded_channel::<SessionUpdate>();
        self.updates = updates;
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                notifier.on_session_update(update).await;
            }
        });

        let tick = self.settings.activity_tick;
        let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(guild = %self.params.server_id, station = %self.params.station_id, "session started");

        while !self.stopped {
            let resume_at = self.continuation.map(|(at, _)| at);
            let empty_at = self.timers.empty_channel;
            let idle_at = self.timers.no_playback;

            tokio::select! {
                cmd = self.mailbox.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => self.teardown(DisplayState::Stopped, "player released").await,
                },
                Some(event) = self.events.recv() => self.on_sink_event(event).await,
                _ = ticker.tick() => self.on_tick(),
                _ = sleep_until_opt(resume_at) => self.on_continuation_due().await,
                _ = sleep_until_opt(empty_at) => self.on_empty_channel_due().await,
                _ = sleep_until_opt(idle_at) => self.on_no_playback_due().await,
            }

            self.publish();
        }

        debug!(guild = %self.params.server_id, "session task finished");
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            server_id: self.params.server_id,
            owner: self.params.owner,
            station_id: self.params.station_id.clone(),
            state: self.state,
            display: self.display,
            current: self.current.as_ref().map(TrackInfo::from),
            pending: self.queue.pending().cloned().collect(),
            history: self.queue.history().cloned().collect(),
            retry_count: self.retry_count,
            skip_requested: self.skip_requested,
            public_control: self.public_control,
            sink_status: self.sink_status,
            epoch: self.epoch,
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn notify(&mut self, display: DisplayState, track: Option<TrackInfo>, reason: Option<String>) {
        self.display = display;
        let update = SessionUpdate {
            server_id: self.params.server_id,
            track,
            display,
            reason,
        };
        if self.updates.send(update).is_err() {
            debug!(guild = %self.params.server_id, "session update dropped");
        }
    }

    fn current_info(&self) -> Option<TrackInfo> {
        self.current.as_ref().map(TrackInfo::from)
    }

    fn played(&self) -> Option<Duration> {
        self.track_started_at.map(|at| at.elapsed())
    }

    /// Playback is audible again, so the idle deadline no longer applies.
    fn mark_playing(&mut self) {
        self.sink_status = SinkStatus::Playing;
        if self.timers.no_playback.take().is_some() {
            debug!(guild = %self.params.server_id, "playback resumed");
        }
    }

    /// Tears the session down if `err` means the voice connection is gone.
    async fn transport_lost(&mut self, err: &PlayerError) -> bool {
        let PlayerError::TransportUnavailable(cause) = err else {
            return false;
        };
        warn!(guild = %self.params.server_id, %cause, "voice transport failed");
        self.teardown(DisplayState::Disconnected, &err.to_string()).await;
        true
    }

    fn schedule(&mut self, delay: Duration, step: Continuation) {
        debug!(guild = %self.params.server_id, ?step, ?delay, "scheduled recovery step");
        self.continuation = Some((Instant::now() + delay, step));
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { reply } => {
                let result = self.start().await;
                if let Err(e) = &result {
                    warn!(guild = %self.params.server_id, "station failed to start: {e}");
                    let display = match e {
                        PlayerError::TransportUnavailable(_) => DisplayState::Disconnected,
                        _ => DisplayState::Stopped,
                    };
                    self.teardown(display, &e.to_string()).await;
                }
                self.publish();
                let _ = reply.send(result);
            }
            Command::Control { action, reply } => {
                let result = self.control(action).await;
                self.publish();
                let _ = reply.send(result);
            }
            Command::SetPublicControl(enabled) => {
                debug!(guild = %self.params.server_id, enabled, "public control changed");
                self.public_control = enabled;
            }
            Command::Shutdown { reason } => {
                self.teardown(DisplayState::Stopped, &reason).await;
            }
        }
    }

    async fn start(&mut self) -> Result<()> {
        self.notify(DisplayState::Loading, None, None);

        if let Err(e) = self
            .catalog
            .notify_station_started(&self.params.credential, &self.params.station_id)
            .await
        {
            warn!(guild = %self.params.server_id, "station feedback failed: {e}");
        }

        let seed = self
            .catalog
            .fetch_station_seed(&self.params.credential, &self.params.station_id)
            .await?;

        self.begin(seed).await
    }

    /// Queues everything after the first track and plays the first one.
    async fn begin(&mut self, tracks: Vec<Track>) -> Result<()> {
        let mut tracks = tracks.into_iter();
        let first = tracks.next().ok_or(PlayerError::NoTracksAvailable)?;
        self.queue.extend(tracks);

        match self.play_track(first, PlayCause::Advance).await {
            Err(e @ PlayerError::TransportUnavailable(_)) => Err(e),
            Err(e) => {
                self.on_advance_failed(e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    async fn play_track(&mut self, track: Track, cause: PlayCause) -> Result<()> {
        let previous_state = self.state;
        self.state = PlaybackState::Loading;
        let info = TrackInfo::from(&track);
        self.notify(DisplayState::Loading, Some(info.clone()), None);

        if let Err(e) = self
            .catalog
            .notify_track_started(&self.params.credential, &self.params.station_id, &track.id)
            .await
        {
            debug!(guild = %self.params.server_id, track = %track.id, "track feedback failed: {e}");
        }

        let stream = match self
            .catalog
            .resolve_stream_handle(&self.params.credential, &track.id)
            .await
        {
            Ok(Some(stream)) => stream,
            Ok(None) => {
                self.state = previous_state;
                return Err(PlayerError::StreamUnavailable { track_id: track.id });
            }
            Err(e) => {
                warn!(guild = %self.params.server_id, track = %track.id, "stream lookup failed: {e}");
                self.state = previous_state;
                return Err(PlayerError::StreamUnavailable { track_id: track.id });
            }
        };

        let epoch = self.epoch + 1;
        if let Err(e) = self.sink.commit(stream, epoch).await {
            self.state = previous_state;
            return Err(e);
        }

        self.epoch = epoch;
        self.epoch_consumed = false;
        if cause == PlayCause::Advance {
            if let Some(superseded) = self.current.take() {
                self.queue.remember(superseded);
            }
        }
        if cause != PlayCause::Retry {
            self.retry_count = 0;
        }
        self.current = Some(track);
        self.state = PlaybackState::Playing;
        self.mark_playing();
        self.track_started_at = Some(Instant::now());
        self.advance_failures = 0;

        info!(guild = %self.params.server_id, track = %info, ?cause, "now playing");
        self.notify(DisplayState::Playing, Some(info), None);
        Ok(())
    }

    async fn control(&mut self, action: Action) -> Result<ControlReply> {
        match action {
            Action::Pause => {
                if !matches!(self.state, PlaybackState::Playing | PlaybackState::Buffering) {
                    return Err(PlayerError::InvalidState {
                        action: "pause",
                        state: self.state.as_str(),
                    });
                }
                self.sink.pause()?;
                self.state = PlaybackState::Paused;
                self.sink_status = SinkStatus::Paused;
                let info = self.current_info();
                self.notify(DisplayState::Paused, info, None);
                Ok(ControlReply::Paused)
            }
            Action::Resume => {
                if self.state != PlaybackState::Paused {
                    return Err(PlayerError::InvalidState {
                        action: "resume",
                        state: self.state.as_str(),
                    });
                }
                self.sink.resume()?;
                self.state = PlaybackState::Playing;
                self.mark_playing();
                let info = self.current_info();
                self.notify(DisplayState::Playing, info, None);
                Ok(ControlReply::Resumed)
            }
            Action::Skip => {
                self.skip_next().await;
                Ok(ControlReply::Skipped)
            }
            Action::Previous => self.go_previous().await,
            Action::Stop => {
                self.teardown(DisplayState::Stopped, "stopped by user").await;
                Ok(ControlReply::Stopped)
            }
            // Likes never reach the actor, they don't touch session state.
            Action::Like => Err(PlayerError::InvalidState {
                action: "like",
                state: self.state.as_str(),
            }),
        }
    }

    async fn skip_next(&mut self) {
        info!(guild = %self.params.server_id, "skip requested");
        self.skip_requested = true;
        // Whatever was scheduled for the old track no longer applies, and the
        // sink's own end event for it must not advance a second time.
        self.continuation = None;
        self.epoch_consumed = true;
        self.sink.stop();
        self.state = PlaybackState::Idle;
        let played = self.played();
        self.on_sink_terminal(played).await;
    }

    async fn go_previous(&mut self) -> Result<ControlReply> {
        let previous = self.queue.pop_previous().ok_or(PlayerError::NoHistory)?;
        let superseded = self.current.clone();
        if let Some(current) = superseded.clone() {
            self.queue.push_front(current);
        }

        match self.play_track(previous.clone(), PlayCause::Previous).await {
            Ok(()) => {
                self.continuation = None;
                self.skip_requested = false;
                Ok(ControlReply::Previous(TrackInfo::from(&previous)))
            }
            Err(e) => {
                if superseded.is_some() {
                    self.queue.pop_next();
                }
                self.queue.remember(previous);
                if self.transport_lost(&e).await {
                    return Err(e);
                }
                let info = self.current_info();
                let display = if self.state == PlaybackState::Paused {
                    DisplayState::Paused
                } else {
                    DisplayState::Playing
                };
                self.notify(display, info, Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn on_sink_event(&mut self, event: SinkEvent) {
        if event.kind == SinkEventKind::Disconnected {
            warn!(guild = %self.params.server_id, "voice transport disconnected");
            self.teardown(DisplayState::Disconnected, "voice connection lost").await;
            return;
        }
        if event.epoch != self.epoch {
            debug!(guild = %self.params.server_id, epoch = event.epoch, current = self.epoch, "ignoring stale sink event");
            return;
        }

        match event.kind {
            SinkEventKind::Status(SinkStatus::Idle) => {
                self.sink_status = SinkStatus::Idle;
                if self.epoch_consumed {
                    return;
                }
                self.epoch_consumed = true;
                self.state = PlaybackState::Idle;
                let played = self.played();
                self.on_sink_terminal(played).await;
            }
            SinkEventKind::Status(SinkStatus::Playing) => {
                self.mark_playing();
                if matches!(self.state, PlaybackState::Buffering | PlaybackState::Loading) {
                    self.state = PlaybackState::Playing;
                }
            }
            SinkEventKind::Status(SinkStatus::Buffering) => {
                self.sink_status = SinkStatus::Buffering;
                if self.state == PlaybackState::Playing {
                    self.state = PlaybackState::Buffering;
                }
            }
            SinkEventKind::Status(status) => {
                self.sink_status = status;
            }
            SinkEventKind::Error(cause) => {
                self.sink_status = SinkStatus::Idle;
                if self.epoch_consumed {
                    return;
                }
                self.epoch_consumed = true;
                self.state = PlaybackState::Idle;
                // Measured now so the recovery delay doesn't count as play time.
                let played = self.played();
                warn!(guild = %self.params.server_id, %cause, "playback error");
                let info = self.current_info();
                self.notify(DisplayState::Problem, info, Some(cause));
                self.schedule(self.settings.error_recovery_delay, Continuation::Terminal { played });
            }
            SinkEventKind::Disconnected => {}
        }
    }

    /// Decides between retrying the current track, advancing, and draining.
    async fn on_sink_terminal(&mut self, played: Option<Duration>) {
        self.continuation = None;

        if self.skip_requested {
            self.skip_requested = false;
            self.advance().await;
            return;
        }

        if let (Some(elapsed), Some(current)) = (played, self.current.as_ref()) {
            if elapsed < self.settings.min_play_time && self.retry_count < self.settings.max_retry {
                self.retry_count += 1;
                if self.retry_count < self.settings.max_retry {
                    info!(
                        guild = %self.params.server_id,
                        track = %current.id,
                        attempt = self.retry_count,
                        max = self.settings.max_retry,
                        "track interrupted after {elapsed:?}, retrying"
                    );
                    let info = TrackInfo::from(current);
                    self.notify(DisplayState::Recovering, Some(info), None);
                    self.schedule(self.settings.retry_backoff, Continuation::RetryCurrent);
                    return;
                }
                warn!(guild = %self.params.server_id, track = %current.id, "retry limit reached, moving on");
            }
        }

        self.advance().await;
    }

    async fn advance(&mut self) {
        let next = match self.queue.pop_next() {
            Some(track) => track,
            None => {
                if let Err(e) = self.refill().await {
                    self.playback_ended(e);
                    return;
                }
                match self.queue.pop_next() {
                    Some(track) => track,
                    None => {
                        self.playback_ended(PlayerError::NoTracksAvailable);
                        return;
                    }
                }
            }
        };

        if let Err(e) = self.play_track(next, PlayCause::Advance).await {
            if !self.transport_lost(&e).await {
                self.on_advance_failed(e);
            }
        }
    }

    async fn refill(&mut self) -> Result<()> {
        info!(guild = %self.params.server_id, "queue drained, fetching more tracks");
        let tracks = self
            .catalog
            .fetch_station_seed(&self.params.credential, &self.params.station_id)
            .await?;
        if tracks.is_empty() {
            return Err(PlayerError::NoTracksAvailable);
        }
        debug!(guild = %self.params.server_id, count = tracks.len(), "queue refilled");
        self.queue.extend(tracks);
        Ok(())
    }

    fn on_advance_failed(&mut self, err: PlayerError) {
        self.advance_failures += 1;
        if self.advance_failures > self.settings.max_advance_failures {
            self.playback_ended(err);
            return;
        }
        warn!(
            guild = %self.params.server_id,
            failures = self.advance_failures,
            "could not start next track: {err}"
        );
        let info = self.current_info();
        self.notify(DisplayState::Problem, info, Some(err.to_string()));
        self.schedule(self.settings.advance_retry_delay, Continuation::Advance);
    }

    fn playback_ended(&mut self, err: PlayerError) {
        warn!(guild = %self.params.server_id, "playback ended: {err}");
        self.continuation = None;
        self.advance_failures = 0;
        self.state = PlaybackState::Idle;
        self.sink_status = SinkStatus::Idle;
        self.notify(
            DisplayState::PlaybackEnded,
            None,
            Some(format!("could not load new tracks: {err}")),
        );
    }

    async fn on_continuation_due(&mut self) {
        let Some((_, step)) = self.continuation.take() else {
            return;
        };

        match step {
            Continuation::RetryCurrent => {
                let Some(track) = self.current.clone() else {
                    self.advance().await;
                    return;
                };
                if let Err(e) = self.play_track(track, PlayCause::Retry).await {
                    if self.transport_lost(&e).await {
                        return;
                    }
                    warn!(guild = %self.params.server_id, "retry failed: {e}");
                    self.advance().await;
                }
            }
            Continuation::Advance => self.advance().await,
            Continuation::Terminal { played } => self.on_sink_terminal(played).await,
        }
    }

    fn on_tick(&mut self) {
        let now = Instant::now();
        let guild = self.params.server_id;

        if self.channel.occupant_count() == 0 {
            if self.timers.empty_channel.is_none() {
                debug!(%guild, timeout = ?self.settings.empty_channel_timeout, "voice channel empty");
                self.timers.empty_channel = Some(now + self.settings.empty_channel_timeout);
            }
        } else if self.timers.empty_channel.take().is_some() {
            debug!(%guild, "listeners are back");
        }

        match self.sink_status {
            SinkStatus::Idle | SinkStatus::Paused => {
                if self.timers.no_playback.is_none() {
                    debug!(%guild, timeout = ?self.settings.no_playback_timeout, "nothing playing");
                    self.timers.no_playback = Some(now + self.settings.no_playback_timeout);
                }
            }
            SinkStatus::Playing => self.mark_playing(),
            SinkStatus::Buffering | SinkStatus::AutoPaused => {}
        }
    }

    // Deadlines can land between ticks, so each one checks its condition
    // again before acting on it.

    async fn on_empty_channel_due(&mut self) {
        if self.channel.occupant_count() > 0 {
            debug!(guild = %self.params.server_id, "listeners are back");
            self.timers.empty_channel = None;
            return;
        }
        self.auto_disconnect("channel empty").await;
    }

    async fn on_no_playback_due(&mut self) {
        if !matches!(self.sink_status, SinkStatus::Idle | SinkStatus::Paused) {
            self.timers.no_playback = None;
            return;
        }
        self.auto_disconnect("no active playback").await;
    }

    async fn auto_disconnect(&mut self, reason: &str) {
        info!(guild = %self.params.server_id, reason, "auto-disconnecting");
        self.teardown(DisplayState::Disconnected, reason).await;
    }

    async fn teardown(&mut self, display: DisplayState, reason: &str) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let info = self.current_info();
        self.notify(display, info, Some(reason.to_string()));

        self.continuation = None;
        self.timers = ActivityTimers::default();
        self.skip_requested = false;
        self.state = PlaybackState::Stopped;
        self.sink_status = SinkStatus::Idle;

        self.sink.stop();
        self.sink.disconnect().await;

        let id = self.id;
        self.sessions
            .remove_if(&self.params.server_id, |_, handle| handle.id() == id);
        // Anything still queued for this session is dropped with the mailbox.
        self.mailbox.close();

        info!(guild = %self.params.server_id, reason, "session closed");
    }
}
