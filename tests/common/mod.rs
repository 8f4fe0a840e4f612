#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, UserId};
use tokio::sync::mpsc;

use wave_radio::catalog::{Account, Catalog, CatalogError, Credential, StreamHandle};
use wave_radio::config::PlayerSettings;
use wave_radio::notify::{DisplayState, Notifier, SessionUpdate};
use wave_radio::policy::PolicyStore;
use wave_radio::track::Track;
use wave_radio::transport::{AudioSink, SinkEvent, SinkEventKind, SinkStatus, Transport, VoiceChannel};
use wave_radio::{PlayerError, SessionHandle, SessionParams, SessionRegistry};

pub const GUILD: GuildId = GuildId::new(100);
pub const VOICE: ChannelId = ChannelId::new(200);
pub const OWNER: UserId = UserId::new(1);

pub fn track(id: &str) -> Track {
    Track {
        id: id.to_string(),
        title: format!("Title {id}"),
        artists: vec![format!("Artist {id}")],
        album_title: None,
        cover_uri: None,
    }
}

pub fn tracks(ids: &[&str]) -> Vec<Track> {
    ids.iter().map(|id| track(id)).collect()
}

pub fn credential(user: &str) -> Credential {
    Credential {
        token: format!("token-{user}"),
        catalog_user_id: user.to_string(),
    }
}

pub fn params() -> SessionParams {
    SessionParams {
        server_id: GUILD,
        owner: OWNER,
        credential: credential("owner"),
        station_id: "user:onyourwave".to_string(),
    }
}

/// Catalog that hands out scripted station batches.
#[derive(Default)]
pub struct FakeCatalog {
    seeds: Mutex<VecDeque<Result<Vec<Track>, &'static str>>>,
    unplayable: Mutex<HashSet<String>>,
    pub seed_calls: AtomicUsize,
    pub station_starts: AtomicUsize,
    pub track_starts: Mutex<Vec<String>>,
    pub likes: Mutex<Vec<(String, String)>>,
    pub reject_likes: AtomicBool,
}

impl FakeCatalog {
    pub fn new(batches: Vec<Vec<Track>>) -> Self {
        let catalog = Self::default();
        for batch in batches {
            catalog.push_seed(batch);
        }
        catalog
    }

    pub fn push_seed(&self, batch: Vec<Track>) {
        self.seeds.lock().unwrap().push_back(Ok(batch));
    }

    pub fn push_failure(&self) {
        self.seeds.lock().unwrap().push_back(Err("station offline"));
    }

    pub fn make_unplayable(&self, id: &str) {
        self.unplayable.lock().unwrap().insert(id.to_string());
    }

    pub fn make_playable(&self, id: &str) {
        self.unplayable.lock().unwrap().remove(id);
    }
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn fetch_station_seed(
        &self,
        _credential: &Credential,
        _station_id: &str,
    ) -> Result<Vec<Track>, CatalogError> {
        self.seed_calls.fetch_add(1, Ordering::SeqCst);
        match self.seeds.lock().unwrap().pop_front() {
            Some(Ok(batch)) => Ok(batch),
            Some(Err(what)) => Err(CatalogError::Malformed(what)),
            None => Ok(Vec::new()),
        }
    }

    async fn notify_station_started(
        &self,
        _credential: &Credential,
        _station_id: &str,
    ) -> Result<(), CatalogError> {
        self.station_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn notify_track_started(
        &self,
        _credential: &Credential,
        _station_id: &str,
        track_id: &str,
    ) -> Result<(), CatalogError> {
        self.track_starts.lock().unwrap().push(track_id.to_string());
        // Telemetry failures must never matter.
        Err(CatalogError::Malformed("feedback"))
    }

    async fn resolve_stream_handle(
        &self,
        _credential: &Credential,
        track_id: &str,
    ) -> Result<Option<StreamHandle>, CatalogError> {
        if self.unplayable.lock().unwrap().contains(track_id) {
            return Ok(None);
        }
        Ok(Some(StreamHandle {
            url: format!("fake://{track_id}"),
        }))
    }

    async fn like(
        &self,
        _credential: &Credential,
        catalog_user_id: &str,
        track_id: &str,
    ) -> Result<bool, CatalogError> {
        self.likes
            .lock()
            .unwrap()
            .push((catalog_user_id.to_string(), track_id.to_string()));
        Ok(!self.reject_likes.load(Ordering::SeqCst))
    }

    async fn fetch_account(&self, _token: &str) -> Result<Account, CatalogError> {
        Ok(Account {
            uid: "uid".into(),
            login: None,
            has_plus: true,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkCall {
    Commit { track_id: String, epoch: u64 },
    Pause,
    Resume,
    Stop,
    Disconnect,
}

struct FakeSink {
    calls: Arc<Mutex<Vec<SinkCall>>>,
    broken: Arc<AtomicBool>,
}

#[async_trait]
impl AudioSink for FakeSink {
    async fn commit(&self, stream: StreamHandle, epoch: u64) -> wave_radio::Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(PlayerError::TransportUnavailable("connection reset".into()));
        }
        let track_id = stream.url.trim_start_matches("fake://").to_string();
        self.calls
            .lock()
            .unwrap()
            .push(SinkCall::Commit { track_id, epoch });
        Ok(())
    }

    fn pause(&self) -> wave_radio::Result<()> {
        self.calls.lock().unwrap().push(SinkCall::Pause);
        Ok(())
    }

    fn resume(&self) -> wave_radio::Result<()> {
        self.calls.lock().unwrap().push(SinkCall::Resume);
        Ok(())
    }

    fn stop(&self) {
        self.calls.lock().unwrap().push(SinkCall::Stop);
    }

    async fn disconnect(&self) {
        self.calls.lock().unwrap().push(SinkCall::Disconnect);
    }
}

struct FakeChannel {
    id: ChannelId,
    occupants: Arc<AtomicUsize>,
}

impl VoiceChannel for FakeChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn occupant_count(&self) -> usize {
        self.occupants.load(Ordering::SeqCst)
    }

    fn permissions_granted(&self, _self_id: UserId) -> bool {
        true
    }
}

/// Test-side view of a fake transport.
#[derive(Clone)]
pub struct SinkProbe {
    calls: Arc<Mutex<Vec<SinkCall>>>,
    broken: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<SinkEvent>,
    occupants: Arc<AtomicUsize>,
}

impl SinkProbe {
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Track ids committed so far, in order.
    pub fn committed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::Commit { track_id, .. } => Some(track_id),
                _ => None,
            })
            .collect()
    }

    pub fn last_epoch(&self) -> u64 {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::Commit { epoch, .. } => Some(epoch),
                _ => None,
            })
            .last()
            .unwrap_or(0)
    }

    pub fn emit(&self, epoch: u64, kind: SinkEventKind) {
        let _ = self.events.send(SinkEvent { epoch, kind });
    }

    /// The current stream ends on its own.
    pub fn finish_current(&self) {
        self.emit(self.last_epoch(), SinkEventKind::Status(SinkStatus::Idle));
    }

    pub fn set_occupants(&self, n: usize) {
        self.occupants.store(n, Ordering::SeqCst);
    }

    /// Every later commit fails as if the voice connection dropped.
    pub fn break_connection(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub fn disconnected(&self) -> bool {
        self.calls().contains(&SinkCall::Disconnect)
    }
}

pub fn transport() -> (Transport, SinkProbe) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let occupants = Arc::new(AtomicUsize::new(1));
    let broken = Arc::new(AtomicBool::new(false));
    let (events_tx, events) = mpsc::unbounded_channel();

    let transport = Transport {
        sink: Box::new(FakeSink {
            calls: calls.clone(),
            broken: broken.clone(),
        }),
        channel: Box::new(FakeChannel {
            id: VOICE,
            occupants: occupants.clone(),
        }),
        events,
    };
    let probe = SinkProbe {
        calls,
        broken,
        events: events_tx,
        occupants,
    };
    (transport, probe)
}

#[derive(Default)]
pub struct RecordingNotifier {
    updates: Mutex<Vec<SessionUpdate>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn on_session_update(&self, update: SessionUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

impl RecordingNotifier {
    pub fn updates(&self) -> Vec<SessionUpdate> {
        self.updates.lock().unwrap().clone()
    }

    pub fn displays(&self) -> Vec<DisplayState> {
        self.updates().into_iter().map(|u| u.display).collect()
    }

    pub fn last(&self) -> Option<SessionUpdate> {
        self.updates().last().cloned()
    }

    /// Polls until an update matching `pred` has been delivered.
    pub async fn wait_for(&self, pred: impl Fn(&SessionUpdate) -> bool) -> SessionUpdate {
        let found = tokio::time::timeout(Duration::from_secs(600), async {
            loop {
                if let Some(u) = self.updates().into_iter().find(|u| pred(u)) {
                    return u;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await;
        found.expect("notifier never saw the expected update")
    }
}

pub struct Harness {
    pub registry: SessionRegistry,
    pub catalog: Arc<FakeCatalog>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new(catalog: FakeCatalog) -> Self {
        Self::with_settings(catalog, PlayerSettings::default())
    }

    pub fn with_settings(catalog: FakeCatalog, settings: PlayerSettings) -> Self {
        let catalog = Arc::new(catalog);
        let notifier = Arc::new(RecordingNotifier::default());
        let registry = SessionRegistry::new(
            catalog.clone(),
            notifier.clone(),
            Arc::new(PolicyStore::in_memory()),
            settings,
        );
        Self {
            registry,
            catalog,
            notifier,
        }
    }

    pub async fn start(&self) -> Result<(SessionHandle, SinkProbe), PlayerError> {
        let (transport, probe) = transport();
        let handle = self.registry.create_session(params(), transport).await?;
        Ok((handle, probe))
    }
}

/// Waits for the session to publish a snapshot for commit `epoch`.
pub async fn wait_for_epoch(handle: &SessionHandle, epoch: u64) {
    handle
        .wait_for(|s| s.epoch >= epoch)
        .await
        .expect("session ended before reaching the epoch");
}

/// Lets already-queued work run without moving the clock far.
pub async fn settle() {
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
