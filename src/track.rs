use serde::{Deserialize, Serialize};

/// Album title shown when the catalog doesn't report one.
pub const UNKNOWN_ALBUM: &str = "Unknown album";

/// Cover size substituted into the catalog's `%%` placeholder.
const COVER_SIZE: &str = "400x400";

/// A catalog track as handed out by station seeds and refills.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album_title: Option<String>,
    pub cover_uri: Option<String>,
}

/// Display-ready projection of a [`Track`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TrackInfo {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub cover_url: Option<String>,
}

impl From<&Track> for TrackInfo {
    fn from(track: &Track) -> Self {
        let cover_url = track
            .cover_uri
            .as_deref()
            .filter(|uri| !uri.is_empty())
            .map(|uri| format!("https://{}", uri.replace("%%", COVER_SIZE)));

        TrackInfo {
            id: track.id.clone(),
            title: track.title.clone(),
            artist: track.artists.join(", "),
            album: track
                .album_title
                .clone()
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| UNKNOWN_ALBUM.to_string()),
            cover_url,
        }
    }
}

impl std::fmt::Display for TrackInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.artist.is_empty() {
            write!(f, "{}", self.title)
        } else {
            write!(f, "{} — {}", self.title, self.artist)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(cover: Option<&str>, album: Option<&str>) -> Track {
        Track {
            id: "42".into(),
            title: "Song".into(),
            artists: vec!["First".into(), "Second".into()],
            album_title: album.map(str::to_string),
            cover_uri: cover.map(str::to_string),
        }
    }

    #[test]
    fn info_joins_artists_and_resolves_cover() {
        let info = TrackInfo::from(&track(Some("avatars.example.net/get/abc/%%"), Some("Album")));
        assert_eq!(info.artist, "First, Second");
        assert_eq!(info.album, "Album");
        assert_eq!(
            info.cover_url.as_deref(),
            Some("https://avatars.example.net/get/abc/400x400")
        );
    }

    #[test]
    fn info_defaults_missing_album_and_cover() {
        let info = TrackInfo::from(&track(None, None));
        assert_eq!(info.album, UNKNOWN_ALBUM);
        assert!(info.cover_url.is_none());

        let info = TrackInfo::from(&track(Some(""), Some("")));
        assert_eq!(info.album, UNKNOWN_ALBUM);
        assert!(info.cover_url.is_none());
    }
}
