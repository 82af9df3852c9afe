// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Number of hex characters kept from the SHA-256 digest
const ID_HEX_LEN: usize = 32;

fn short_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(ID_HEX_LEN);
    for byte in digest.iter().take(ID_HEX_LEN / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Stable identifier of a podcast, derived from its feed URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PodcastId(String);

impl PodcastId {
    pub fn for_feed(feed_url: &Url) -> Self {
        Self(short_digest(&[feed_url.as_str()]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PodcastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identifier of an episode.
///
/// Derived from the feed URL plus the item's GUID (or enclosure URL when the
/// item has no GUID), so repeated parses of one feed agree on identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeId(String);

impl EpisodeId {
    pub fn derive(feed_url: &Url, guid: Option<&str>, audio_url: &Url) -> Self {
        let key = guid
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .unwrap_or(audio_url.as_str());
        Self(short_digest(&[feed_url.as_str(), key]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EpisodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Represents a parsed podcast feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Podcast {
    pub id: PodcastId,
    pub title: String,
    pub author: String,
    pub description: String,
    pub image_url: Option<Url>,
    pub feed_url: Url,
    pub episodes: Vec<Episode>,
}

impl Podcast {
    pub fn episode(&self, id: &EpisodeId) -> Option<&Episode> {
        self.episodes.iter().find(|e| &e.id == id)
    }

    /// Artwork for an episode: its own image, else the feed image
    pub fn artwork_for<'a>(&'a self, episode: &'a Episode) -> Option<&'a Url> {
        episode.image_url.as_ref().or(self.image_url.as_ref())
    }
}

/// Represents a single podcast episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub title: String,
    pub description: String,
    pub audio_url: Url,
    /// Duration in seconds, 0 when unknown
    pub duration: f64,
    pub publish_date: DateTime<Utc>,
    pub image_url: Option<Url>,
    /// Enclosure MIME type, if the feed declared one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn make_episode(image: Option<&str>) -> Episode {
        Episode {
            id: EpisodeId::from("ep"),
            title: "Episode".to_string(),
            description: String::new(),
            audio_url: url("https://example.com/ep.mp3"),
            duration: 0.0,
            publish_date: Utc::now(),
            image_url: image.map(url),
            mime_type: None,
        }
    }

    #[test]
    fn episode_id_is_stable_for_same_inputs() {
        let feed = url("https://example.com/feed.xml");
        let audio = url("https://example.com/ep1.mp3");

        let a = EpisodeId::derive(&feed, Some("guid-1"), &audio);
        let b = EpisodeId::derive(&feed, Some("guid-1"), &audio);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn episode_id_falls_back_to_audio_url() {
        let feed = url("https://example.com/feed.xml");
        let audio = url("https://example.com/ep1.mp3");

        let blank_guid = EpisodeId::derive(&feed, Some("   "), &audio);
        let no_guid = EpisodeId::derive(&feed, None, &audio);
        assert_eq!(blank_guid, no_guid);
    }

    #[test]
    fn episode_id_is_scoped_by_feed() {
        let audio = url("https://cdn.example.com/shared.mp3");
        let a = EpisodeId::derive(&url("https://a.example.com/feed"), Some("1"), &audio);
        let b = EpisodeId::derive(&url("https://b.example.com/feed"), Some("1"), &audio);
        assert_ne!(a, b);
    }

    #[test]
    fn artwork_prefers_episode_image() {
        let podcast = Podcast {
            id: PodcastId::for_feed(&url("https://example.com/feed.xml")),
            title: "Show".to_string(),
            author: String::new(),
            description: String::new(),
            image_url: Some(url("https://example.com/show.jpg")),
            feed_url: url("https://example.com/feed.xml"),
            episodes: vec![],
        };

        let with_own = make_episode(Some("https://example.com/ep.jpg"));
        let without = make_episode(None);

        assert_eq!(
            podcast.artwork_for(&with_own).map(Url::as_str),
            Some("https://example.com/ep.jpg")
        );
        assert_eq!(
            podcast.artwork_for(&without).map(Url::as_str),
            Some("https://example.com/show.jpg")
        );
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = EpisodeId::from("abc123");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc123\"");
    }
}
