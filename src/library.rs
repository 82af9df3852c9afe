// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The subscribed podcasts, persisted as one JSON document.

use std::sync::Arc;

use tracing::{info, warn};

use crate::download::DownloadCoordinator;
use crate::error::LibraryError;
use crate::feed::{Episode, EpisodeId, FeedIngestor, Podcast, PodcastId};
use crate::http::HttpClient;
use crate::playback::{PlaybackEngine, PositionStore};
use crate::store::{KeyValueStore, KeyValueStoreExt, LIBRARY_KEY};

/// Subscribed podcasts in subscription order
pub struct Library {
    store: Arc<dyn KeyValueStore>,
    podcasts: Vec<Podcast>,
}

impl Library {
    /// Load the library from the store. A missing library is empty.
    pub fn open(store: Arc<dyn KeyValueStore>) -> Result<Self, LibraryError> {
        let podcasts = store.get_json(LIBRARY_KEY)?.unwrap_or_default();
        Ok(Self { store, podcasts })
    }

    pub fn podcasts(&self) -> &[Podcast] {
        &self.podcasts
    }

    pub fn podcast(&self, id: &PodcastId) -> Option<&Podcast> {
        self.podcasts.iter().find(|p| &p.id == id)
    }

    /// Fetch a feed and add it. Subscribing to a known feed refreshes it in place.
    pub async fn subscribe<C: HttpClient>(
        &mut self,
        ingestor: &FeedIngestor<C>,
        feed_url: &str,
    ) -> Result<&Podcast, LibraryError> {
        let podcast = ingestor.parse(feed_url).await?;
        self.add(podcast)
    }

    /// Add a parsed podcast, replacing an earlier copy of the same feed.
    ///
    /// Episodes that dropped out of the feed keep their downloads and saved
    /// positions. Their ids stay stable, so they reattach if the feed lists
    /// them again.
    pub fn add(&mut self, podcast: Podcast) -> Result<&Podcast, LibraryError> {
        let index = match self.podcasts.iter().position(|p| p.id == podcast.id) {
            Some(index) => {
                info!(podcast = %podcast.id, title = %podcast.title, "Refreshed podcast");
                self.podcasts[index] = podcast;
                index
            }
            None => {
                info!(podcast = %podcast.id, title = %podcast.title, "Subscribed to podcast");
                self.podcasts.push(podcast);
                self.podcasts.len() - 1
            }
        };

        self.save()?;
        Ok(&self.podcasts[index])
    }

    /// Unsubscribe, cancelling and deleting every download of the podcast
    /// and forgetting its playback positions. If `playback` has one of its
    /// episodes loaded it is ejected first so no position is written back.
    pub async fn remove_podcast(
        &mut self,
        id: &PodcastId,
        downloads: &DownloadCoordinator,
        positions: &PositionStore,
        playback: Option<&PlaybackEngine>,
    ) -> Result<Podcast, LibraryError> {
        let index = self
            .podcasts
            .iter()
            .position(|p| &p.id == id)
            .ok_or_else(|| LibraryError::UnknownPodcast(id.to_string()))?;

        let podcast = self.podcasts.remove(index);
        self.save()?;

        let ids: Vec<EpisodeId> = podcast.episodes.iter().map(|e| e.id.clone()).collect();
        if let Some(playback) = playback {
            playback.eject(&ids).await;
        }
        for id in &ids {
            discard_download(downloads, id).await;
        }
        positions.forget(&ids)?;

        info!(podcast = %podcast.id, title = %podcast.title, "Removed podcast");
        Ok(podcast)
    }

    /// Delete an episode's download and playback position. The episode
    /// itself stays listed. A loaded copy in `playback` is ejected first.
    pub async fn delete_episode(
        &self,
        podcast_id: &PodcastId,
        episode_id: &EpisodeId,
        downloads: &DownloadCoordinator,
        positions: &PositionStore,
        playback: Option<&PlaybackEngine>,
    ) -> Result<(), LibraryError> {
        let podcast = self
            .podcast(podcast_id)
            .ok_or_else(|| LibraryError::UnknownPodcast(podcast_id.to_string()))?;
        if podcast.episode(episode_id).is_none() {
            return Err(LibraryError::UnknownEpisode(episode_id.to_string()));
        }

        if let Some(playback) = playback {
            playback.eject(std::slice::from_ref(episode_id)).await;
        }
        discard_download(downloads, episode_id).await;
        positions.clear(episode_id)?;
        Ok(())
    }

    /// Look up a podcast by 1-based position or id prefix
    pub fn find_podcast(&self, query: &str) -> Result<&Podcast, LibraryError> {
        find_by(&self.podcasts, query, |p| p.id.as_str())
            .ok_or_else(|| LibraryError::UnknownPodcast(query.to_string()))?
    }

    fn save(&self) -> Result<(), LibraryError> {
        self.store.put_json(LIBRARY_KEY, &self.podcasts)?;
        Ok(())
    }
}

/// Look up an episode of a podcast by 1-based position or id prefix
pub fn find_episode<'a>(podcast: &'a Podcast, query: &str) -> Result<&'a Episode, LibraryError> {
    find_by(&podcast.episodes, query, |e| e.id.as_str())
        .ok_or_else(|| LibraryError::UnknownEpisode(query.to_string()))?
}

/// Resolve `query` against `items`: `None` when nothing matches
fn find_by<'a, T>(
    items: &'a [T],
    query: &str,
    id: impl Fn(&T) -> &str,
) -> Option<Result<&'a T, LibraryError>> {
    let query = query.trim();
    if let Ok(position) = query.parse::<usize>()
        && (1..=items.len()).contains(&position)
    {
        return Some(Ok(&items[position - 1]));
    }
    if query.is_empty() {
        return None;
    }

    let mut matches = items.iter().filter(|item| id(item).starts_with(query));
    let first = matches.next()?;
    if matches.next().is_some() {
        return Some(Err(LibraryError::Ambiguous(query.to_string())));
    }
    Some(Ok(first))
}

async fn discard_download(downloads: &DownloadCoordinator, id: &EpisodeId) {
    downloads.cancel(id).await;
    downloads.delete(id).await;
    if downloads.is_downloaded(id) {
        warn!(episode = %id, "Download still registered after delete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::DownloadOptions;
    use crate::error::{FeedError, HttpError, PlaybackError};
    use crate::http::{ByteStream, HttpResponse};
    use crate::playback::{
        MediaSource, MediaTransport, NowPlayingInfo, NowPlayingSurface, PlaybackOptions,
        SessionBus, TransportEvents,
    };
    use crate::progress::NoopReporter;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;
    use tempfile::tempdir;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Garden Talk</title>
    <itunes:author>The Gardeners</itunes:author>
    <description>Weekly chats about plants</description>
    <item>
      <title>Tomatoes</title>
      <guid>tomatoes</guid>
      <enclosure url="https://example.com/tomatoes.mp3" type="audio/mpeg"/>
    </item>
    <item>
      <title>Roses</title>
      <guid>roses</guid>
      <enclosure url="https://example.com/roses.mp3" type="audio/mpeg"/>
    </item>
  </channel>
</rss>"#;

    const FEED_URL: &str = "https://example.com/feed.xml";

    #[derive(Clone)]
    struct MockHttpClient {
        feed: String,
    }

    impl MockHttpClient {
        fn new(feed: &str) -> Self {
            Self {
                feed: feed.to_string(),
            }
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn get_bytes(&self, _url: &str) -> Result<Bytes, HttpError> {
            Ok(Bytes::from(self.feed.clone()))
        }

        async fn get_stream(&self, _url: &str) -> Result<HttpResponse, HttpError> {
            let body: ByteStream =
                Box::pin(futures::stream::once(async { Ok(Bytes::from_static(b"audio")) }));
            Ok(HttpResponse {
                status: 200,
                content_length: Some(5),
                body,
            })
        }
    }

    struct SilentTransport;

    #[async_trait]
    impl MediaTransport for SilentTransport {
        async fn load(
            &mut self,
            _source: &MediaSource,
            _events: TransportEvents,
        ) -> Result<(), PlaybackError> {
            Ok(())
        }

        fn play(&mut self) {}
        fn pause(&mut self) {}
        fn seek(&mut self, _time: f64) {}
        fn stop(&mut self) {}
        fn activate_session(&mut self) {}
    }

    struct NoDisplay;

    impl NowPlayingSurface for NoDisplay {
        fn publish(&self, _info: Option<NowPlayingInfo>) {}
    }

    fn memory_store() -> Arc<dyn KeyValueStore> {
        Arc::new(MemoryStore::new())
    }

    async fn subscribed(store: &Arc<dyn KeyValueStore>) -> Library {
        let mut library = Library::open(store.clone()).unwrap();
        let ingestor = FeedIngestor::new(MockHttpClient::new(FEED));
        library.subscribe(&ingestor, FEED_URL).await.unwrap();
        library
    }

    #[tokio::test]
    async fn subscribe_persists_library() {
        let store = memory_store();
        let library = subscribed(&store).await;

        assert_eq!(library.podcasts().len(), 1);
        assert_eq!(library.podcasts()[0].title, "Garden Talk");

        let reopened = Library::open(store).unwrap();
        assert_eq!(reopened.podcasts(), library.podcasts());
    }

    #[tokio::test]
    async fn resubscribing_refreshes_in_place() {
        let store = memory_store();
        let mut library = subscribed(&store).await;
        let original = library.podcasts()[0].clone();

        let renamed = FEED.replace("Garden Talk", "Garden Talk Weekly");
        let ingestor = FeedIngestor::new(MockHttpClient::new(&renamed));
        let refreshed = library.subscribe(&ingestor, FEED_URL).await.unwrap();

        assert_eq!(refreshed.id, original.id);
        assert_eq!(refreshed.title, "Garden Talk Weekly");
        // Episode identities survive the refresh
        assert_eq!(refreshed.episodes[0].id, original.episodes[0].id);
        assert_eq!(library.podcasts().len(), 1);
    }

    #[tokio::test]
    async fn failed_subscribe_leaves_library_unchanged() {
        let store = memory_store();
        let mut library = Library::open(store).unwrap();
        let ingestor = FeedIngestor::new(MockHttpClient::new("<rss><channel>"));

        let result = library.subscribe(&ingestor, FEED_URL).await;
        assert!(matches!(
            result,
            Err(LibraryError::Feed(FeedError::ParseFailed(_)))
        ));

        let result = library.subscribe(&ingestor, "ftp://example.com/feed").await;
        assert!(matches!(
            result,
            Err(LibraryError::Feed(FeedError::InvalidUrl { .. }))
        ));
        assert!(library.podcasts().is_empty());
    }

    #[tokio::test]
    async fn remove_podcast_cascades_to_downloads_and_positions() {
        let dir = tempdir().unwrap();
        let store = memory_store();
        let mut library = subscribed(&store).await;
        let podcast = library.podcasts()[0].clone();
        let episode = &podcast.episodes[0];

        let downloads = DownloadCoordinator::spawn(
            MockHttpClient::new(FEED),
            store.clone(),
            DownloadOptions::new(dir.path().join("Downloads")),
            NoopReporter::shared(),
        )
        .unwrap();
        let positions = PositionStore::load(store.clone());

        downloads.start(episode).await;
        let mut state = downloads.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| s.is_downloaded(&episode.id)),
        )
        .await
        .unwrap()
        .unwrap();
        let path = downloads.local_path(&episode.id).unwrap();
        positions.save(&episode.id, 61.0).unwrap();

        let removed = library
            .remove_podcast(&podcast.id, &downloads, &positions, None)
            .await
            .unwrap();

        assert_eq!(removed.id, podcast.id);
        assert!(library.podcasts().is_empty());
        assert!(Library::open(store).unwrap().podcasts().is_empty());
        assert!(!downloads.is_downloaded(&episode.id));
        assert!(!path.exists());
        assert_eq!(positions.get(&episode.id), None);
    }

    #[tokio::test]
    async fn remove_podcast_ejects_the_playing_episode() {
        let dir = tempdir().unwrap();
        let store = memory_store();
        let mut library = subscribed(&store).await;
        let podcast = library.podcasts()[0].clone();
        let episode = &podcast.episodes[0];

        let downloads = DownloadCoordinator::spawn(
            MockHttpClient::new(FEED),
            store.clone(),
            DownloadOptions::new(dir.path().join("Downloads")),
            NoopReporter::shared(),
        )
        .unwrap();
        let positions = Arc::new(PositionStore::load(store.clone()));
        let bus = SessionBus::new();
        let engine = PlaybackEngine::spawn(
            SilentTransport,
            Arc::new(downloads.clone()),
            positions.clone(),
            Arc::new(NoDisplay),
            &bus,
            PlaybackOptions::default(),
        );
        engine.load_from(&podcast, episode).await;
        assert!(engine.state().is_playing());

        library
            .remove_podcast(&podcast.id, &downloads, &positions, Some(&engine))
            .await
            .unwrap();

        assert!(engine.snapshot().await.episode.is_none());
        engine.pause().await;
        let mut state = engine.subscribe();
        drop(engine);
        while state.changed().await.is_ok() {}

        assert_eq!(positions.get(&episode.id), None);
        assert_eq!(PositionStore::load(store).get(&episode.id), None);
    }

    #[tokio::test]
    async fn delete_episode_keeps_it_listed() {
        let dir = tempdir().unwrap();
        let store = memory_store();
        let library = subscribed(&store).await;
        let podcast = library.podcasts()[0].clone();
        let episode = &podcast.episodes[1];

        let downloads = DownloadCoordinator::spawn(
            MockHttpClient::new(FEED),
            store.clone(),
            DownloadOptions::new(dir.path().join("Downloads")),
            NoopReporter::shared(),
        )
        .unwrap();
        let positions = PositionStore::load(store.clone());
        positions.save(&episode.id, 12.0).unwrap();

        library
            .delete_episode(&podcast.id, &episode.id, &downloads, &positions, None)
            .await
            .unwrap();

        assert_eq!(positions.get(&episode.id), None);
        assert_eq!(library.podcasts()[0].episodes.len(), 2);

        let unknown = library
            .delete_episode(
                &podcast.id,
                &EpisodeId::from("nope"),
                &downloads,
                &positions,
                None,
            )
            .await;
        assert!(matches!(unknown, Err(LibraryError::UnknownEpisode(_))));
    }

    #[tokio::test]
    async fn podcasts_and_episodes_resolve_by_index_or_prefix() {
        let store = memory_store();
        let library = subscribed(&store).await;
        let podcast = &library.podcasts()[0];

        assert_eq!(library.find_podcast("1").unwrap().id, podcast.id);
        assert_eq!(library.find_podcast(&podcast.id.as_str()[..6]).unwrap().id, podcast.id);
        assert!(matches!(
            library.find_podcast("2"),
            Err(LibraryError::UnknownPodcast(_))
        ));

        let second = &podcast.episodes[1];
        assert_eq!(find_episode(podcast, "2").unwrap().id, second.id);
        assert_eq!(find_episode(podcast, second.id.as_str()).unwrap().id, second.id);
        assert!(matches!(
            find_episode(podcast, "zz"),
            Err(LibraryError::UnknownEpisode(_))
        ));
    }

    #[test]
    fn shared_prefix_is_ambiguous() {
        let items = ["abc1", "abc2", "xyz"];
        let found = find_by(&items[..], "abc", |s| *s);
        assert!(matches!(found, Some(Err(LibraryError::Ambiguous(_)))));
        assert!(matches!(find_by(&items[..], "x", |s| *s), Some(Ok(&"xyz"))));
        assert!(find_by(&items[..], "", |s| *s).is_none());
    }

    #[test]
    fn corrupt_library_is_an_error() {
        let store = memory_store();
        store.put(LIBRARY_KEY, "{".to_string()).unwrap();
        assert!(matches!(
            Library::open(store),
            Err(LibraryError::Store(_))
        ));
    }
}
