// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use bytes::Bytes;
use tracing::{info, warn};
use url::Url;

use crate::error::FeedError;
use crate::http::HttpClient;

use super::model::Podcast;
use super::parse::parse_feed;

/// Fetches feeds through an injected HTTP client and parses them.
///
/// Each call is independent; concurrent parses share no mutable state.
#[derive(Debug, Clone)]
pub struct FeedIngestor<C> {
    client: C,
}

impl<C: HttpClient> FeedIngestor<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Fetch and parse a podcast feed from a URL
    pub async fn parse(&self, feed_url: &str) -> Result<Podcast, FeedError> {
        let url = parse_feed_url(feed_url)?;
        let bytes = fetch_feed_bytes(&self.client, url.as_str()).await?;
        let podcast = parse_feed(&bytes, url)?;

        info!(
            feed = feed_url,
            title = %podcast.title,
            episodes = podcast.episodes.len(),
            "Ingested feed"
        );
        Ok(podcast)
    }

    /// Parse a podcast feed from a local file
    pub fn parse_file(&self, path: &Path) -> Result<Podcast, FeedError> {
        parse_feed_file(path)
    }
}

/// Validate a feed URL; only http and https are fetchable
pub fn parse_feed_url(feed_url: &str) -> Result<Url, FeedError> {
    let url = Url::parse(feed_url.trim()).map_err(|e| FeedError::InvalidUrl {
        url: feed_url.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(FeedError::InvalidUrl {
            url: feed_url.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

/// Fetch raw feed bytes from a URL (without parsing)
pub async fn fetch_feed_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Bytes, FeedError> {
    client.get_bytes(url).await.map_err(|e| {
        warn!(url, error = %e, "Feed fetch failed");
        FeedError::FetchFailed {
            url: url.to_string(),
            source: e,
        }
    })
}

/// Read raw feed bytes from a local file (without parsing)
pub fn read_feed_file(path: &Path) -> Result<Vec<u8>, FeedError> {
    std::fs::read(path).map_err(|e| FeedError::FileReadFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Construct a file:// URL for a local file path
pub fn file_path_to_url(path: &Path) -> Result<Url, FeedError> {
    let absolute = std::path::absolute(path).map_err(|e| FeedError::FileReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    Url::from_file_path(&absolute).map_err(|()| FeedError::InvalidUrl {
        url: path.display().to_string(),
        reason: "not representable as a file URL".to_string(),
    })
}

/// Parse a podcast feed from a local file
pub fn parse_feed_file(path: &Path) -> Result<Podcast, FeedError> {
    let bytes = read_feed_file(path)?;
    let feed_url = file_path_to_url(path)?;
    parse_feed(&bytes, feed_url)
}

/// Determine if a string is a URL or a file path
pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}
