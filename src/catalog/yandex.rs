use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::{debug, warn};

use super::{Account, Catalog, CatalogError, Credential, StreamHandle};
use crate::config::CatalogConfig;
use crate::track::Track;

/// HTTP client for the Yandex Music rotor (station) API.
pub struct YandexCatalog {
    client: Client,
    base_url: String,
    from: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct StationTracks {
    #[serde(default)]
    sequence: Vec<SequenceItem>,
}

#[derive(Deserialize)]
struct SequenceItem {
    track: TrackDto,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackDto {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    artists: Vec<NameDto>,
    #[serde(default)]
    albums: Vec<AlbumDto>,
    #[serde(default)]
    cover_uri: Option<String>,
}

#[derive(Deserialize)]
struct NameDto {
    name: String,
}

#[derive(Deserialize)]
struct AlbumDto {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadInfo {
    #[serde(default)]
    codec: String,
    #[serde(default)]
    bitrate_in_kbps: u32,
    download_info_url: String,
}

#[derive(Deserialize)]
struct DownloadLocation {
    host: Option<String>,
    path: Option<String>,
    s: Option<String>,
    #[serde(default)]
    ts: String,
}

#[derive(Deserialize)]
struct AccountStatus {
    account: AccountDto,
    #[serde(default)]
    plus: Option<PlusDto>,
}

#[derive(Deserialize)]
struct AccountDto {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    uid: Option<String>,
    #[serde(default)]
    login: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlusDto {
    #[serde(default)]
    has_plus: bool,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("expected string or number")),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s)),
        serde_json::Value::Number(n) => Ok(Some(n.to_string())),
        _ => Err(serde::de::Error::custom("expected string or number")),
    }
}

impl From<TrackDto> for Track {
    fn from(dto: TrackDto) -> Self {
        Track {
            id: dto.id,
            title: dto.title,
            artists: dto.artists.into_iter().map(|a| a.name).collect(),
            album_title: dto.albums.into_iter().next().and_then(|a| a.title),
            cover_uri: dto.cover_uri,
        }
    }
}

impl YandexCatalog {
    pub fn new(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let mut builder = Client::builder();
        if let Some(t) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(t));
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            from: config.from.clone(),
        })
    }

    fn auth(token: &str) -> String {
        format!("OAuth {token}")
    }

    async fn send_feedback(
        &self,
        credential: &Credential,
        station_id: &str,
        payload: serde_json::Value,
    ) -> Result<(), CatalogError> {
        let url = format!("{}/rotor/station/{}/feedback", self.base_url, station_id);
        self.client
            .post(&url)
            .header("Authorization", Self::auth(&credential.token))
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn feedback_payload(&self, kind: &str, track_id: Option<&str>) -> serde_json::Value {
        // ISO timestamp without the trailing zone designator.
        let timestamp = chrono::Utc::now()
            .format("%Y-%m-%dT%H:%M:%S%.3f")
            .to_string();

        let mut body = serde_json::json!({
            "type": kind,
            "timestamp": timestamp,
            "from": self.from,
            "totalPlayedSeconds": 0,
        });
        if let Some(id) = track_id {
            body["trackId"] = serde_json::Value::String(id.to_string());
        }
        body
    }
}

#[async_trait]
impl Catalog for YandexCatalog {
    async fn fetch_station_seed(
        &self,
        credential: &Credential,
        station_id: &str,
    ) -> Result<Vec<Track>, CatalogError> {
        let url = format!("{}/rotor/station/{}/tracks", self.base_url, station_id);
        let res = self
            .client
            .get(&url)
            .query(&[("settings2", "true")])
            .header("Authorization", Self::auth(&credential.token))
            .send()
            .await?
            .error_for_status()?;

        let data: Envelope<StationTracks> = res.json().await?;
        let tracks: Vec<Track> = data
            .result
            .sequence
            .into_iter()
            .map(|item| Track::from(item.track))
            .collect();

        debug!(station = station_id, count = tracks.len(), "fetched station tracks");
        Ok(tracks)
    }

    async fn notify_station_started(
        &self,
        credential: &Credential,
        station_id: &str,
    ) -> Result<(), CatalogError> {
        let payload = self.feedback_payload("radioStarted", None);
        self.send_feedback(credential, station_id, payload).await
    }

    async fn notify_track_started(
        &self,
        credential: &Credential,
        station_id: &str,
        track_id: &str,
    ) -> Result<(), CatalogError> {
        let payload = self.feedback_payload("trackStarted", Some(track_id));
        self.send_feedback(credential, station_id, payload).await
    }

    async fn resolve_stream_handle(
        &self,
        credential: &Credential,
        track_id: &str,
    ) -> Result<Option<StreamHandle>, CatalogError> {
        let url = format!("{}/tracks/{}/download-info", self.base_url, track_id);
        let res = self
            .client
            .get(&url)
            .header("Authorization", Self::auth(&credential.token))
            .send()
            .await?
            .error_for_status()?;

        let infos: Envelope<Vec<DownloadInfo>> = res.json().await?;
        let best = infos
            .result
            .iter()
            .filter(|i| i.codec == "mp3")
            .max_by_key(|i| i.bitrate_in_kbps)
            .or_else(|| infos.result.first());

        let Some(info) = best else {
            warn!(track = track_id, "no download info for track");
            return Ok(None);
        };

        let location_url = format!("{}&format=json", info.download_info_url);
        let res = self
            .client
            .get(&location_url)
            .header("Authorization", Self::auth(&credential.token))
            .send()
            .await?
            .error_for_status()?;

        let location: DownloadLocation = res.json().await?;
        match (location.host, location.path, location.s) {
            (Some(host), Some(path), Some(s)) if !host.is_empty() && !path.is_empty() => {
                Ok(Some(StreamHandle {
                    url: format!("https://{}/get-mp3/{}/{}{}", host, s, location.ts, path),
                }))
            }
            _ => {
                warn!(track = track_id, "incomplete download location");
                Ok(None)
            }
        }
    }

    async fn like(
        &self,
        credential: &Credential,
        catalog_user_id: &str,
        track_id: &str,
    ) -> Result<bool, CatalogError> {
        let url = format!(
            "{}/users/{}/likes/tracks/add-multiple",
            self.base_url, catalog_user_id
        );
        let res = self
            .client
            .post(&url)
            .header("Authorization", Self::auth(&credential.token))
            .form(&[("track-ids", track_id)])
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            warn!(track = track_id, %status, "like rejected");
        }
        Ok(status == reqwest::StatusCode::OK)
    }

    async fn fetch_account(&self, token: &str) -> Result<Account, CatalogError> {
        let url = format!("{}/account/status", self.base_url);
        let res = self
            .client
            .get(&url)
            .header("Authorization", Self::auth(token))
            .send()
            .await?
            .error_for_status()?;

        let data: Envelope<AccountStatus> = res.json().await?;
        let uid = data
            .result
            .account
            .uid
            .ok_or(CatalogError::Malformed("account/status"))?;

        Ok(Account {
            uid,
            login: data.result.account.login,
            has_plus: data.result.plus.map(|p| p.has_plus).unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_station_sequence_with_numeric_ids() {
        let body = r#"{
            "result": {
                "sequence": [
                    {"track": {"id": 101, "title": "One", "artists": [{"name": "A"}, {"name": "B"}],
                               "albums": [{"title": "First"}], "coverUri": "img.example/%%"}},
                    {"track": {"id": "102", "title": "Two"}}
                ]
            }
        }"#;
        let data: Envelope<StationTracks> = serde_json::from_str(body).unwrap();
        let tracks: Vec<Track> = data
            .result
            .sequence
            .into_iter()
            .map(|i| Track::from(i.track))
            .collect();

        assert_eq!(tracks[0].id, "101");
        assert_eq!(tracks[0].artists, ["A", "B"]);
        assert_eq!(tracks[0].album_title.as_deref(), Some("First"));
        assert_eq!(tracks[1].id, "102");
        assert!(tracks[1].artists.is_empty());
        assert!(tracks[1].album_title.is_none());
    }

    #[test]
    fn feedback_payload_carries_track_id() {
        let catalog = YandexCatalog::new(&CatalogConfig::default()).unwrap();
        let body = catalog.feedback_payload("trackStarted", Some("7"));
        assert_eq!(body["type"], "trackStarted");
        assert_eq!(body["trackId"], "7");
        assert_eq!(body["totalPlayedSeconds"], 0);
        assert!(!body["timestamp"].as_str().unwrap().ends_with('Z'));

        let body = catalog.feedback_payload("radioStarted", None);
        assert!(body.get("trackId").is_none());
    }
}
