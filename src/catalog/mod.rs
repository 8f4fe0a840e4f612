//! Contract with the remote catalog/streaming service.

mod yandex;

use async_trait::async_trait;
use thiserror::Error;

use crate::track::Track;

pub use yandex::YandexCatalog;

/// Catalog OAuth token plus the catalog account it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub catalog_user_id: String,
}

/// A resolved, directly playable stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamHandle {
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub uid: String,
    pub login: Option<String>,
    pub has_plus: bool,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed response from {0}")]
    Malformed(&'static str),
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn fetch_station_seed(
        &self,
        credential: &Credential,
        station_id: &str,
    ) -> Result<Vec<Track>, CatalogError>;

    async fn notify_station_started(
        &self,
        credential: &Credential,
        station_id: &str,
    ) -> Result<(), CatalogError>;

    async fn notify_track_started(
        &self,
        credential: &Credential,
        station_id: &str,
        track_id: &str,
    ) -> Result<(), CatalogError>;

    /// `Ok(None)` when the track has no playable stream.
    async fn resolve_stream_handle(
        &self,
        credential: &Credential,
        track_id: &str,
    ) -> Result<Option<StreamHandle>, CatalogError>;

    async fn like(
        &self,
        credential: &Credential,
        catalog_user_id: &str,
        track_id: &str,
    ) -> Result<bool, CatalogError>;

    async fn fetch_account(&self, token: &str) -> Result<Account, CatalogError>;
}
