use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::access::{self, AccessRequest, Action};
use crate::catalog::{Catalog, Credential};
use crate::config::PlayerSettings;
use crate::error::{PlayerError, Result};
use crate::notify::Notifier;
use crate::policy::PolicyStore;
use crate::session::{self, Collaborators, ControlReply, SessionHandle, SessionMap, SessionParams};
use crate::transport::Transport;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveStatus {
    pub active: bool,
    pub owner: Option<UserId>,
}

/// Who is asking for a control action, as resolved by the front-end.
#[derive(Clone, Debug)]
pub struct Requester {
    pub user_id: UserId,
    pub server_admin: bool,
    pub global_admin: bool,
    pub voice_channel: Option<ChannelId>,
    pub credential: Option<Credential>,
}

/// At most one session per server.
pub struct SessionRegistry {
    sessions: Arc<SessionMap>,
    catalog: Arc<dyn Catalog>,
    notifier: Arc<dyn Notifier>,
    policies: Arc<PolicyStore>,
    settings: PlayerSettings,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        notifier: Arc<dyn Notifier>,
        policies: Arc<PolicyStore>,
        settings: PlayerSettings,
    ) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            catalog,
            notifier,
            policies,
            settings,
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a session for `params.server_id` and starts the station.
    ///
    /// Fails with `AlreadyActive` if the server already has one; the given
    /// transport is dropped untouched in that case since it may be the very
    /// connection the live session is using.
    pub async fn create_session(
        &self,
        params: SessionParams,
        transport: Transport,
    ) -> Result<SessionHandle> {
        let server_id = params.server_id;
        let public_control = self.policies.public_control(server_id).await;
        let deps = Collaborators {
            catalog: self.catalog.clone(),
            notifier: self.notifier.clone(),
            sessions: self.sessions.clone(),
            settings: self.settings.clone(),
        };

        // The shard lock is held only for the check-and-insert; the actor is
        // spawned after it is released.
        let (handle, actor) = match self.sessions.entry(server_id) {
            Entry::Occupied(_) => {
                debug!(guild = %server_id, "rejected second session");
                return Err(PlayerError::AlreadyActive);
            }
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (handle, actor) = session::build(id, params, public_control, transport, &deps);
                slot.insert(handle.clone());
                (handle, actor)
            }
        };
        tokio::spawn(actor.run());

        handle.start().await?;
        Ok(handle)
    }

    pub fn get(&self, server_id: GuildId) -> Option<SessionHandle> {
        self.sessions.get(&server_id).map(|h| h.clone())
    }

    pub fn is_active(&self, server_id: GuildId) -> ActiveStatus {
        match self.sessions.get(&server_id) {
            Some(handle) => ActiveStatus {
                active: true,
                owner: Some(handle.owner()),
            },
            None => ActiveStatus {
                active: false,
                owner: None,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Authorizes `action` for `requester` and runs it on the server's session.
    pub async fn dispatch(
        &self,
        server_id: GuildId,
        requester: &Requester,
        action: Action,
    ) -> Result<ControlReply> {
        let handle = self.get(server_id).ok_or(PlayerError::NoSession)?;
        let snapshot = handle.snapshot();

        let request = AccessRequest {
            requester: requester.user_id,
            owner: handle.owner(),
            public_control: snapshot.public_control,
            server_admin: requester.server_admin,
            global_admin: requester.global_admin,
            same_channel: requester.voice_channel == Some(handle.channel_id()),
            action,
        };
        access::authorize(&request).map_err(PlayerError::Unauthorized)?;

        debug!(guild = %server_id, user = %requester.user_id, action = action.as_str(), "dispatching");
        match action {
            Action::Like => {
                // The requester's own account is used, never the owner's.
                let credential = requester.credential.as_ref().ok_or(PlayerError::NotLoggedIn)?;
                let track = snapshot.current.ok_or(PlayerError::NothingPlaying)?;
                let liked = self
                    .catalog
                    .like(credential, &credential.catalog_user_id, &track.id)
                    .await?;
                Ok(if liked {
                    ControlReply::Liked(track)
                } else {
                    ControlReply::LikeRejected(track)
                })
            }
            other => handle.control(other).await,
        }
    }

    /// Persists the public-control flag and mirrors it into a running
    /// session. Returns whether the flag reached durable storage.
    pub async fn set_public_control(&self, server_id: GuildId, enabled: bool) -> bool {
        let persisted = self.policies.set_public_control(server_id, enabled).await;
        if let Some(handle) = self.get(server_id) {
            if handle.set_public_control(enabled).is_err() {
                debug!(guild = %server_id, "session closed before policy update");
            }
        }
        persisted
    }

    pub async fn public_control(&self, server_id: GuildId) -> bool {
        self.policies.public_control(server_id).await
    }

    /// Stops the server's session, if any, and waits for it to finish.
    pub async fn stop(&self, server_id: GuildId, reason: &str) -> bool {
        let Some(handle) = self.get(server_id) else {
            return false;
        };
        if handle.shutdown(reason).is_ok() {
            handle.closed().await;
        }
        true
    }

    /// Stops every session. Used on shutdown.
    pub async fn stop_all(&self, reason: &str) {
        let handles: Vec<SessionHandle> = self.sessions.iter().map(|e| e.value().clone()).collect();
        info!(count = handles.len(), "stopping all sessions");
        for handle in &handles {
            let _ = handle.shutdown(reason);
        }
        for handle in handles {
            handle.closed().await;
        }
    }
}
