//! Podcast subscriptions, offline downloads and resumable playback.
//!
//! [`FeedIngestor`] turns RSS feeds into [`Podcast`]s kept in a [`Library`].
//! [`DownloadCoordinator`] stores episode audio for offline use and
//! [`PlaybackEngine`] plays the local file when present, else the remote URL,
//! remembering where each episode was left off.

pub mod download;
pub mod error;
pub mod feed;
pub mod http;
pub mod library;
pub mod playback;
pub mod progress;
pub mod store;

// Re-export main types for convenience
pub use download::{Admission, DownloadCoordinator, DownloadOptions, DownloadSnapshot};
pub use error::{DownloadError, FeedError, HttpError, LibraryError, PlaybackError, StoreError};
pub use feed::{
    Episode, EpisodeId, FeedIngestor, Podcast, PodcastId, is_url, parse_duration, parse_feed,
    parse_feed_file, parse_pub_date,
};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use library::{Library, find_episode};
pub use playback::{
    MediaLocator, MediaSource, MediaTransport, NowPlayingInfo, NowPlayingSurface, PlaybackEngine,
    PlaybackOptions, PlaybackState, PlaybackStatus, PositionStore, RemoteCommand, SessionBus,
    SessionEvent,
};
pub use progress::{NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter};
pub use store::{JsonFileStore, KeyValueStore, KeyValueStoreExt, MemoryStore};
