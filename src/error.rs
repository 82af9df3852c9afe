// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the HTTP collaborator
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP error {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur when fetching or parsing RSS feeds
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Invalid feed URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Failed to fetch feed from {url}: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: HttpError,
    },

    #[error("Failed to read feed file {path}: {source}")]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse RSS feed: {0}")]
    ParseFailed(String),
}

impl From<quick_xml::Error> for FeedError {
    fn from(err: quick_xml::Error) -> Self {
        FeedError::ParseFailed(err.to_string())
    }
}

/// Errors that can occur during episode downloads.
///
/// These never reach the caller of `start`; the coordinator reverts to its
/// pre-download state and reports the failure through the progress reporter.
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Transfer failed for {url}: {source}")]
    TransferFailed {
        url: String,
        #[source]
        source: HttpError,
    },

    #[error("Failed to write temporary file {path}: {source}")]
    StagingFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to finalize download into {path}: {source}")]
    FinalizeFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors surfaced by the playback engine
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Failed to load media {source_url}: {reason}")]
    LoadFailed { source_url: String, reason: String },
}

/// Errors from the durable key-value store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read store entry {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write store entry {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt value for key '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize value: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors from podcast library operations
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("No podcast with id {0}")]
    UnknownPodcast(String),

    #[error("No episode with id {0}")]
    UnknownEpisode(String),

    #[error("'{0}' matches more than one entry")]
    Ambiguous(String),
}
