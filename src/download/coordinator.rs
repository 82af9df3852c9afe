// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DownloadError;
use crate::feed::{Episode, EpisodeId};
use crate::http::HttpClient;
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::store::{DOWNLOADED_KEY, KeyValueStore, KeyValueStoreExt};

use super::filename::{candidate_filenames, canonical_filename, partial_filename};
use super::finalize::{commit, discard, remove_if_exists, stage_copy, sweep_partial_files};
use super::transfer::{TransferProgress, fraction, run_transfer};

/// Options for the download coordinator
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Directory holding finished downloads as `<episodeID>.<ext>`
    pub downloads_dir: PathBuf,
    /// Directory transfers stream into before finalization
    pub staging_dir: PathBuf,
    /// Maximum number of concurrent transfers (None = unbounded)
    pub max_concurrent: Option<usize>,
}

impl DownloadOptions {
    pub fn new(downloads_dir: impl Into<PathBuf>) -> Self {
        let downloads_dir = downloads_dir.into();
        Self {
            staging_dir: downloads_dir.join(".staging"),
            downloads_dir,
            max_concurrent: None,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = Some(max_concurrent.max(1));
        self
    }
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self::new("Downloads")
    }
}

/// Immutable view of the coordinator's bookkeeping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadSnapshot {
    /// Episodes with a transfer in flight, with progress in `[0, 1]`
    pub in_flight: HashMap<EpisodeId, f64>,
    /// Episodes whose download has been finalized
    pub completed: HashSet<EpisodeId>,
}

impl DownloadSnapshot {
    pub fn is_downloaded(&self, id: &EpisodeId) -> bool {
        self.completed.contains(id)
    }

    pub fn progress(&self, id: &EpisodeId) -> Option<f64> {
        self.in_flight.get(id).copied()
    }
}

/// Outcome of a `start` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A new transfer was started (or queued behind the concurrency cap)
    Started,
    AlreadyDownloaded,
    AlreadyInFlight,
    /// The coordinator loop is no longer running
    ShutDown,
}

enum Command {
    Start {
        episode: Episode,
        reply: oneshot::Sender<Admission>,
    },
    Cancel {
        episode_id: EpisodeId,
        reply: oneshot::Sender<bool>,
    },
    Delete {
        episode_id: EpisodeId,
        reply: oneshot::Sender<()>,
    },
}

/// Message from a transfer task back to the coordinator loop
struct TransferMessage {
    episode_id: EpisodeId,
    transfer: u64,
    event: TransferEvent,
}

enum TransferEvent {
    Progress(TransferProgress),
    /// Bytes were copied next to the canonical path and await the rename
    Staged(PathBuf),
    Failed(DownloadError),
}

struct InFlight {
    transfer: u64,
    title: String,
    progress: f64,
    canonical_name: String,
    transfer_path: PathBuf,
    cancel: CancellationToken,
}

/// Handle to the download coordinator.
///
/// All bookkeeping lives in a single background loop; this handle sends it
/// commands and reads published snapshots. Clones share the same loop, which
/// stops (cancelling running transfers) once every handle is dropped.
#[derive(Clone)]
pub struct DownloadCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<DownloadSnapshot>,
    downloads_dir: PathBuf,
}

impl DownloadCoordinator {
    /// Start the coordinator loop.
    ///
    /// Creates the download directories, removes artifacts of interrupted
    /// downloads and reloads the persisted downloaded set. Must be called
    /// from within a tokio runtime.
    pub fn spawn<C>(
        client: C,
        store: Arc<dyn KeyValueStore>,
        options: DownloadOptions,
        reporter: SharedProgressReporter,
    ) -> Result<Self, DownloadError>
    where
        C: HttpClient + Clone + 'static,
    {
        for dir in [&options.downloads_dir, &options.staging_dir] {
            std::fs::create_dir_all(dir).map_err(|e| DownloadError::StagingFailed {
                path: dir.clone(),
                source: e,
            })?;
        }

        let mut cleaned = 0;
        for dir in [&options.downloads_dir, &options.staging_dir] {
            match sweep_partial_files(dir) {
                Ok(count) => cleaned += count,
                Err(e) => warn!(dir = %dir.display(), error = %e, "Could not scan for partial files"),
            }
        }
        if cleaned > 0 {
            info!(count = cleaned, "Removed leftovers of interrupted downloads");
            reporter.report(ProgressEvent::PartialFilesCleanedUp { count: cleaned });
        }

        let completed = load_completed(store.as_ref());
        debug!(count = completed.len(), "Loaded downloaded episodes");

        let (state_tx, state_rx) = watch::channel(DownloadSnapshot {
            in_flight: HashMap::new(),
            completed: completed.clone(),
        });
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            client,
            store,
            reporter,
            limiter: options
                .max_concurrent
                .map(|max| Arc::new(Semaphore::new(max))),
            downloads_dir: options.downloads_dir.clone(),
            staging_dir: options.staging_dir,
            in_flight: HashMap::new(),
            completed,
            next_transfer: 0,
            state: state_tx,
            events: events_tx,
        };
        tokio::spawn(worker.run(commands_rx, events_rx));

        Ok(Self {
            commands: commands_tx,
            state: state_rx,
            downloads_dir: options.downloads_dir,
        })
    }

    /// Begin downloading an episode.
    ///
    /// A no-op if the episode is already downloaded or in flight. Failures
    /// are not returned; the progress entry simply disappears.
    pub async fn start(&self, episode: &Episode) -> Admission {
        let (reply, response) = oneshot::channel();
        let command = Command::Start {
            episode: episode.clone(),
            reply,
        };
        if self.commands.send(command).is_err() {
            return Admission::ShutDown;
        }
        response.await.unwrap_or(Admission::ShutDown)
    }

    /// Cancel an in-flight download. Returns whether anything was cancelled.
    pub async fn cancel(&self, episode_id: &EpisodeId) -> bool {
        let (reply, response) = oneshot::channel();
        let command = Command::Cancel {
            episode_id: episode_id.clone(),
            reply,
        };
        if self.commands.send(command).is_err() {
            return false;
        }
        response.await.unwrap_or(false)
    }

    /// Remove a finished download and its file. Idempotent.
    pub async fn delete(&self, episode_id: &EpisodeId) {
        let (reply, response) = oneshot::channel();
        let command = Command::Delete {
            episode_id: episode_id.clone(),
            reply,
        };
        if self.commands.send(command).is_ok() {
            let _ = response.await;
        }
    }

    pub fn is_downloaded(&self, episode_id: &EpisodeId) -> bool {
        self.state.borrow().is_downloaded(episode_id)
    }

    pub fn progress(&self, episode_id: &EpisodeId) -> Option<f64> {
        self.state.borrow().progress(episode_id)
    }

    /// Path of the downloaded file, if the episode is downloaded and the
    /// file is still present
    pub fn local_path(&self, episode_id: &EpisodeId) -> Option<PathBuf> {
        if !self.is_downloaded(episode_id) {
            return None;
        }
        candidate_filenames(episode_id)
            .map(|name| self.downloads_dir.join(name))
            .find(|path| path.is_file())
    }

    pub fn snapshot(&self) -> DownloadSnapshot {
        self.state.borrow().clone()
    }

    /// Subscribe to snapshot changes
    pub fn subscribe(&self) -> watch::Receiver<DownloadSnapshot> {
        self.state.clone()
    }

    /// Wait until no transfer is in flight
    pub async fn wait_until_idle(&self) {
        let mut state = self.subscribe();
        let _ = state.wait_for(|s| s.in_flight.is_empty()).await;
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }
}

fn load_completed(store: &dyn KeyValueStore) -> HashSet<EpisodeId> {
    match store.get_json::<Vec<EpisodeId>>(DOWNLOADED_KEY) {
        Ok(Some(ids)) => ids.into_iter().collect(),
        Ok(None) => HashSet::new(),
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable downloaded set");
            HashSet::new()
        }
    }
}

/// The coordinator's single owner of mutable download state
struct Worker<C> {
    client: C,
    store: Arc<dyn KeyValueStore>,
    reporter: SharedProgressReporter,
    limiter: Option<Arc<Semaphore>>,
    downloads_dir: PathBuf,
    staging_dir: PathBuf,
    in_flight: HashMap<EpisodeId, InFlight>,
    completed: HashSet<EpisodeId>,
    next_transfer: u64,
    state: watch::Sender<DownloadSnapshot>,
    events: mpsc::UnboundedSender<TransferMessage>,
}

impl<C: HttpClient + Clone + 'static> Worker<C> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<TransferMessage>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(message) = events.recv() => self.handle_transfer(message).await,
            }
        }

        for (_, entry) in self.in_flight.drain() {
            entry.cancel.cancel();
        }
        debug!("Download coordinator stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { episode, reply } => {
                let admission = self.admit(episode);
                let _ = reply.send(admission);
            }
            Command::Cancel { episode_id, reply } => {
                let cancelled = self.cancel(&episode_id).await;
                let _ = reply.send(cancelled);
            }
            Command::Delete { episode_id, reply } => {
                self.delete(&episode_id).await;
                let _ = reply.send(());
            }
        }
    }

    fn admit(&mut self, episode: Episode) -> Admission {
        if self.completed.contains(&episode.id) {
            debug!(episode = %episode.id, "Already downloaded");
            return Admission::AlreadyDownloaded;
        }
        if self.in_flight.contains_key(&episode.id) {
            debug!(episode = %episode.id, "Already in flight");
            return Admission::AlreadyInFlight;
        }

        self.next_transfer += 1;
        let transfer = self.next_transfer;
        let cancel = CancellationToken::new();
        let transfer_path = self
            .staging_dir
            .join(partial_filename(&episode.id, transfer));

        self.in_flight.insert(
            episode.id.clone(),
            InFlight {
                transfer,
                title: episode.title.clone(),
                progress: 0.0,
                canonical_name: canonical_filename(&episode),
                transfer_path: transfer_path.clone(),
                cancel: cancel.clone(),
            },
        );

        info!(episode = %episode.id, title = %episode.title, "Download admitted");
        if self.limiter.is_some() {
            self.reporter.report(ProgressEvent::DownloadQueued {
                episode_id: episode.id.clone(),
                episode_title: episode.title.clone(),
            });
        }
        self.publish();

        let job = TransferJob {
            client: self.client.clone(),
            episode,
            transfer,
            transfer_path,
            downloads_dir: self.downloads_dir.clone(),
            limiter: self.limiter.clone(),
            cancel,
            events: self.events.clone(),
        };
        tokio::spawn(job.run());

        Admission::Started
    }

    async fn cancel(&mut self, episode_id: &EpisodeId) -> bool {
        let Some(entry) = self.in_flight.remove(episode_id) else {
            return false;
        };
        entry.cancel.cancel();

        info!(episode = %episode_id, "Download cancelled");
        self.reporter.report(ProgressEvent::DownloadCancelled {
            episode_id: episode_id.clone(),
        });
        self.publish();

        // The task cleans up too once it notices; bookkeeping does not wait for it.
        discard(&entry.transfer_path).await;
        discard(
            &self
                .downloads_dir
                .join(partial_filename(episode_id, entry.transfer)),
        )
        .await;
        true
    }

    async fn delete(&mut self, episode_id: &EpisodeId) {
        for name in candidate_filenames(episode_id) {
            let path = self.downloads_dir.join(name);
            if let Err(e) = remove_if_exists(&path).await {
                warn!(path = %path.display(), error = %e, "Could not remove download");
            }
        }

        if self.completed.remove(episode_id) {
            info!(episode = %episode_id, "Download deleted");
            self.persist_completed();
            self.publish();
        }
    }

    async fn handle_transfer(&mut self, message: TransferMessage) {
        let TransferMessage {
            episode_id,
            transfer,
            event,
        } = message;

        let is_current = self
            .in_flight
            .get(&episode_id)
            .is_some_and(|entry| entry.transfer == transfer);
        if !is_current {
            // Late news from a cancelled or superseded transfer
            if let TransferEvent::Staged(staged) = event {
                discard(&staged).await;
            }
            return;
        }

        match event {
            TransferEvent::Progress(TransferProgress::Started { content_length }) => {
                let episode_title = self
                    .in_flight
                    .get(&episode_id)
                    .map(|entry| entry.title.clone())
                    .unwrap_or_default();
                debug!(episode = %episode_id, ?content_length, "Transfer started");
                self.reporter.report(ProgressEvent::DownloadStarted {
                    episode_id,
                    episode_title,
                    content_length,
                });
            }
            TransferEvent::Progress(TransferProgress::Written { bytes, total }) => {
                let progress = fraction(bytes, total);
                if let Some(entry) = self.in_flight.get_mut(&episode_id) {
                    entry.progress = progress;
                }
                self.reporter.report(ProgressEvent::DownloadProgress {
                    episode_id,
                    bytes_downloaded: bytes,
                    total_bytes: total,
                    fraction: progress,
                });
                self.publish();
            }
            TransferEvent::Staged(staged) => self.finalize(episode_id, staged).await,
            TransferEvent::Failed(error) => self.fail(episode_id, error),
        }
    }

    async fn finalize(&mut self, episode_id: EpisodeId, staged: PathBuf) {
        let Some(canonical) = self
            .in_flight
            .get(&episode_id)
            .map(|entry| self.downloads_dir.join(&entry.canonical_name))
        else {
            return;
        };

        if let Err(error) = commit(&staged, &canonical).await {
            self.fail(episode_id, error);
            return;
        }

        self.in_flight.remove(&episode_id);
        self.completed.insert(episode_id.clone());
        self.persist_completed();

        info!(episode = %episode_id, path = %canonical.display(), "Download completed");
        self.reporter.report(ProgressEvent::DownloadCompleted {
            episode_id,
            path: canonical,
        });
        self.publish();
    }

    fn fail(&mut self, episode_id: EpisodeId, error: DownloadError) {
        self.in_flight.remove(&episode_id);

        warn!(episode = %episode_id, error = %error, "Download failed");
        self.reporter.report(ProgressEvent::DownloadFailed {
            episode_id,
            error: error.to_string(),
        });
        self.publish();
    }

    fn persist_completed(&self) {
        let mut ids: Vec<&EpisodeId> = self.completed.iter().collect();
        ids.sort();
        if let Err(e) = self.store.put_json(DOWNLOADED_KEY, &ids) {
            warn!(error = %e, "Failed to persist downloaded episodes");
        }
    }

    fn publish(&self) {
        self.state.send_replace(DownloadSnapshot {
            in_flight: self
                .in_flight
                .iter()
                .map(|(id, entry)| (id.clone(), entry.progress))
                .collect(),
            completed: self.completed.clone(),
        });
    }
}

/// One transfer attempt, running off the coordinator loop
struct TransferJob<C> {
    client: C,
    episode: Episode,
    transfer: u64,
    transfer_path: PathBuf,
    downloads_dir: PathBuf,
    limiter: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<TransferMessage>,
}

impl<C: HttpClient> TransferJob<C> {
    async fn run(self) {
        let TransferJob {
            client,
            episode,
            transfer,
            transfer_path,
            downloads_dir,
            limiter,
            cancel,
            events,
        } = self;

        let send = |event: TransferEvent| {
            let _ = events.send(TransferMessage {
                episode_id: episode.id.clone(),
                transfer,
                event,
            });
        };
        let partial_name = partial_filename(&episode.id, transfer);

        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            result = async {
                let _permit = match &limiter {
                    Some(limiter) => limiter.clone().acquire_owned().await.ok(),
                    None => None,
                };
                run_transfer(&client, &episode.audio_url, &transfer_path, |progress| {
                    send(TransferEvent::Progress(progress))
                })
                .await?;
                stage_copy(&transfer_path, &downloads_dir, &partial_name).await
            } => Some(result),
        };

        discard(&transfer_path).await;

        match outcome {
            Some(Ok(staged)) => send(TransferEvent::Staged(staged)),
            Some(Err(error)) => send(TransferEvent::Failed(error)),
            None => {
                discard(&downloads_dir.join(&partial_name)).await;
                debug!(episode = %episode.id, transfer, "Transfer stopped after cancellation");
            }
        }
    }
}
