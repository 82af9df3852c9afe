// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};
use url::Url;

use crate::download::DownloadCoordinator;
use crate::feed::{Episode, EpisodeId, Podcast};

use super::now_playing::{NowPlayingInfo, NowPlayingSurface, RemoteCommand};
use super::positions::PositionStore;
use super::session::{SessionBus, SessionEvent};
use super::transport::{MediaSource, MediaTransport, TransportEvent, TransportEvents};

/// Finds the downloaded file for an episode, if there is one
pub trait MediaLocator: Send + Sync {
    fn local_path(&self, id: &EpisodeId) -> Option<PathBuf>;
}

impl MediaLocator for DownloadCoordinator {
    fn local_path(&self, id: &EpisodeId) -> Option<PathBuf> {
        DownloadCoordinator::local_path(self, id)
    }
}

/// Tunables for the playback engine
#[derive(Debug, Clone)]
pub struct PlaybackOptions {
    /// Default skip distance in seconds
    pub skip_interval: f64,
    /// Quiet period before a debounced seek reaches the transport
    pub seek_debounce: Duration,
    /// Persist the position after this many seconds of played media
    pub save_interval: f64,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            skip_interval: 15.0,
            seek_debounce: Duration::from_millis(500),
            save_interval: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    /// Nothing loaded
    #[default]
    Idle,
    /// Media is being loaded
    Loaded,
    Playing,
    Paused,
    /// Played to the end; the play head is back at 0
    Ended,
}

/// Snapshot of the engine's observable state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackState {
    pub episode: Option<Episode>,
    pub status: PlaybackStatus,
    /// Displayed elapsed time in seconds
    pub current_time: f64,
    /// Seconds, 0 when unknown
    pub duration: f64,
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    pub fn episode_id(&self) -> Option<&EpisodeId> {
        self.episode.as_ref().map(|e| &e.id)
    }
}

enum Command {
    Load {
        episode: Box<Episode>,
        artwork: Option<Url>,
        reply: oneshot::Sender<()>,
    },
    Pause {
        reply: oneshot::Sender<()>,
    },
    Resume {
        reply: oneshot::Sender<()>,
    },
    Seek {
        time: f64,
        debounced: bool,
        reply: oneshot::Sender<()>,
    },
    Skip {
        forward: bool,
        reply: oneshot::Sender<()>,
    },
    Eject {
        episodes: Vec<EpisodeId>,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<PlaybackState>,
    },
}

/// Handle to the playback engine.
///
/// The engine owns the single active playback session on a background loop.
/// Operations are sent to that loop and complete once it has applied them.
/// When the last handle is dropped the loop persists the current position,
/// clears the now-playing display and unsubscribes from session events.
#[derive(Clone)]
pub struct PlaybackEngine {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<PlaybackState>,
}

impl PlaybackEngine {
    /// Start the engine loop. Must be called from within a tokio runtime.
    pub fn spawn<T>(
        transport: T,
        locator: Arc<dyn MediaLocator>,
        positions: Arc<PositionStore>,
        now_playing: Arc<dyn NowPlayingSurface>,
        session: &SessionBus,
        options: PlaybackOptions,
    ) -> Self
    where
        T: MediaTransport + 'static,
    {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(PlaybackState::default());

        let engine = Engine {
            transport,
            locator,
            positions,
            now_playing,
            options,
            loaded: None,
            status: PlaybackStatus::Idle,
            load_generation: 0,
            events: events_tx,
            pending_seek: None,
            resume_after_interruption: false,
            state: state_tx,
        };
        tokio::spawn(engine.run(commands_rx, events_rx, session.subscribe()));

        Self {
            commands: commands_tx,
            state: state_rx,
        }
    }

    /// Load an episode and start playing it from its saved position
    pub async fn load(&self, episode: &Episode) {
        self.load_with_artwork(episode, None).await;
    }

    /// Like [`load`](Self::load), showing the podcast's artwork where the
    /// episode has none of its own
    pub async fn load_from(&self, podcast: &Podcast, episode: &Episode) {
        let artwork = podcast.artwork_for(episode).cloned();
        self.load_with_artwork(episode, artwork).await;
    }

    async fn load_with_artwork(&self, episode: &Episode, artwork: Option<Url>) {
        self.request(|reply| Command::Load {
            episode: Box::new(episode.clone()),
            artwork,
            reply,
        })
        .await;
    }

    pub async fn pause(&self) {
        self.request(|reply| Command::Pause { reply }).await;
    }

    pub async fn resume(&self) {
        self.request(|reply| Command::Resume { reply }).await;
    }

    /// Move the play head now
    pub async fn seek(&self, time: f64) {
        self.request(|reply| Command::Seek {
            time,
            debounced: false,
            reply,
        })
        .await;
    }

    /// Show `time` immediately but only seek once requests stop arriving
    pub async fn debounced_seek(&self, time: f64) {
        self.request(|reply| Command::Seek {
            time,
            debounced: true,
            reply,
        })
        .await;
    }

    pub async fn skip_forward(&self) {
        self.request(|reply| Command::Skip {
            forward: true,
            reply,
        })
        .await;
    }

    pub async fn skip_backward(&self) {
        self.request(|reply| Command::Skip {
            forward: false,
            reply,
        })
        .await;
    }

    /// Unload the current episode without saving its position if it is one
    /// of `episodes`. Returns whether anything was unloaded.
    pub async fn eject(&self, episodes: &[EpisodeId]) -> bool {
        let (reply, response) = oneshot::channel();
        let command = Command::Eject {
            episodes: episodes.to_vec(),
            reply,
        };
        if self.commands.send(command).is_err() {
            return false;
        }
        response.await.unwrap_or(false)
    }

    /// Latest published state
    pub fn state(&self) -> PlaybackState {
        self.state.borrow().clone()
    }

    /// State after every event already delivered to the engine is applied
    pub async fn snapshot(&self) -> PlaybackState {
        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::Snapshot { reply }).is_err() {
            return self.state();
        }
        match response.await {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state.clone()
    }

    async fn request(&self, command: impl FnOnce(oneshot::Sender<()>) -> Command) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(command(reply)).is_ok() {
            let _ = done.await;
        }
    }
}

struct LoadedEpisode {
    episode: Episode,
    artwork: Option<Url>,
    current_time: f64,
    /// Transport-reported duration, else the feed's
    duration: f64,
    /// Position at the last cadence save or seek
    last_saved: f64,
}

struct PendingSeek {
    deadline: Instant,
    time: f64,
}

struct Engine<T> {
    transport: T,
    locator: Arc<dyn MediaLocator>,
    positions: Arc<PositionStore>,
    now_playing: Arc<dyn NowPlayingSurface>,
    options: PlaybackOptions,
    loaded: Option<LoadedEpisode>,
    status: PlaybackStatus,
    load_generation: u64,
    events: mpsc::UnboundedSender<(u64, TransportEvent)>,
    pending_seek: Option<PendingSeek>,
    /// Playback was active when the current interruption began
    resume_after_interruption: bool,
    state: watch::Sender<PlaybackState>,
}

impl<T: MediaTransport> Engine<T> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
        session: broadcast::Receiver<SessionEvent>,
    ) {
        let mut session = Some(session);

        loop {
            let deadline = self.pending_seek.as_ref().map(|p| p.deadline);

            // Events queued before a command are applied before it
            tokio::select! {
                biased;
                Some((load, event)) = events.recv() => self.handle_transport(load, event),
                event = next_session_event(&mut session), if session.is_some() => match event {
                    Some(event) => self.handle_session(event),
                    None => session = None,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.apply_pending_seek()
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
        }

        drop(session);
        self.shutdown();
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Load {
                episode,
                artwork,
                reply,
            } => {
                self.load(*episode, artwork).await;
                let _ = reply.send(());
            }
            Command::Pause { reply } => {
                self.pause();
                let _ = reply.send(());
            }
            Command::Resume { reply } => {
                self.resume();
                let _ = reply.send(());
            }
            Command::Seek {
                time,
                debounced,
                reply,
            } => {
                if debounced {
                    self.debounced_seek(time);
                } else {
                    self.seek(time);
                }
                let _ = reply.send(());
            }
            Command::Skip { forward, reply } => {
                let interval = self.options.skip_interval;
                self.skip(if forward { interval } else { -interval });
                let _ = reply.send(());
            }
            Command::Eject { episodes, reply } => {
                let _ = reply.send(self.eject(&episodes));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.state.borrow().clone());
            }
        }
    }

    fn eject(&mut self, episodes: &[EpisodeId]) -> bool {
        let Some(loaded) = self
            .loaded
            .take_if(|loaded| episodes.contains(&loaded.episode.id))
        else {
            return false;
        };

        self.transport.stop();
        self.load_generation += 1;
        self.pending_seek = None;
        self.resume_after_interruption = false;
        self.status = PlaybackStatus::Idle;
        self.now_playing.publish(None);
        self.publish_state();
        info!(episode = %loaded.episode.id, "Ejected episode");
        true
    }

    async fn load(&mut self, episode: Episode, artwork: Option<Url>) {
        if self
            .loaded
            .as_ref()
            .is_some_and(|loaded| loaded.episode.id == episode.id)
        {
            debug!(episode = %episode.id, "Episode already loaded");
            self.resume();
            return;
        }

        self.persist_position();
        self.pending_seek = None;
        self.resume_after_interruption = false;
        if self.loaded.is_some() {
            self.transport.stop();
        }

        self.load_generation += 1;
        let source = match self.locator.local_path(&episode.id) {
            Some(path) => MediaSource::Local(path),
            None => MediaSource::Remote(episode.audio_url.clone()),
        };
        self.loaded = Some(LoadedEpisode {
            duration: episode.duration,
            episode,
            artwork,
            current_time: 0.0,
            last_saved: 0.0,
        });
        self.status = PlaybackStatus::Loaded;
        self.publish_state();

        let events = TransportEvents::new(self.load_generation, self.events.clone());
        if let Err(e) = self.transport.load(&source, events).await {
            warn!(source = %source, error = %e, "Failed to load media");
            self.loaded = None;
            self.status = PlaybackStatus::Idle;
            self.now_playing.publish(None);
            self.publish_state();
            return;
        }

        let restored = self
            .loaded
            .as_ref()
            .and_then(|loaded| self.positions.get(&loaded.episode.id))
            .filter(|position| *position > 0.0);
        if let Some(position) = restored {
            self.transport.seek(position);
            if let Some(loaded) = self.loaded.as_mut() {
                loaded.current_time = position;
                loaded.last_saved = position;
            }
        }

        info!(source = %source, position = restored.unwrap_or(0.0), "Loaded episode");
        self.start_playing();
    }

    fn start_playing(&mut self) {
        self.transport.activate_session();
        self.transport.play();
        self.status = PlaybackStatus::Playing;
        self.push_now_playing();
        self.publish_state();
    }

    fn pause(&mut self) {
        if self.status != PlaybackStatus::Playing {
            return;
        }
        self.transport.pause();
        self.status = PlaybackStatus::Paused;
        self.persist_position();
        self.push_now_playing();
        self.publish_state();
    }

    fn resume(&mut self) {
        match self.status {
            PlaybackStatus::Paused | PlaybackStatus::Loaded => self.start_playing(),
            PlaybackStatus::Ended => {
                self.transport.seek(0.0);
                if let Some(loaded) = self.loaded.as_mut() {
                    loaded.current_time = 0.0;
                    loaded.last_saved = 0.0;
                }
                self.start_playing();
            }
            PlaybackStatus::Idle | PlaybackStatus::Playing => {}
        }
    }

    fn seek(&mut self, time: f64) {
        self.pending_seek = None;
        let Some(target) = self.show_time(time) else {
            return;
        };
        self.transport.seek(target);
        self.push_now_playing();
    }

    fn debounced_seek(&mut self, time: f64) {
        let Some(target) = self.show_time(time) else {
            return;
        };
        self.pending_seek = Some(PendingSeek {
            deadline: Instant::now() + self.options.seek_debounce,
            time: target,
        });
    }

    fn apply_pending_seek(&mut self) {
        let Some(pending) = self.pending_seek.take() else {
            return;
        };
        if self.loaded.is_none() {
            return;
        }
        debug!(time = pending.time, "Applying debounced seek");
        self.transport.seek(pending.time);
        self.push_now_playing();
    }

    fn skip(&mut self, offset: f64) {
        let Some(current) = self.loaded.as_ref().map(|loaded| loaded.current_time) else {
            return;
        };
        self.seek(current + offset);
    }

    /// Update the displayed time. Returns the clamped target, or `None`
    /// when nothing is loaded.
    fn show_time(&mut self, time: f64) -> Option<f64> {
        let loaded = self.loaded.as_mut()?;
        let target = clamp_time(time, loaded.duration);
        loaded.current_time = target;
        loaded.last_saved = target;
        if self.status == PlaybackStatus::Ended {
            self.status = PlaybackStatus::Paused;
        }
        self.publish_state();
        Some(target)
    }

    fn handle_transport(&mut self, load: u64, event: TransportEvent) {
        if load != self.load_generation {
            debug!(load, ?event, "Dropping event from replaced media");
            return;
        }
        let Some(loaded) = self.loaded.as_mut() else {
            return;
        };

        match event {
            TransportEvent::TimeUpdate(time) => {
                if self.pending_seek.is_some() || self.status == PlaybackStatus::Ended {
                    return;
                }
                loaded.current_time = time.max(0.0);
                let save_due = self.status == PlaybackStatus::Playing
                    && (loaded.current_time - loaded.last_saved).abs() >= self.options.save_interval;
                if save_due {
                    loaded.last_saved = loaded.current_time;
                    self.persist_position();
                }
                self.publish_state();
            }
            TransportEvent::DurationKnown(duration) => {
                if duration.is_finite() && duration > 0.0 {
                    loaded.duration = duration;
                    self.push_now_playing();
                    self.publish_state();
                }
            }
            TransportEvent::Ended => {
                loaded.current_time = 0.0;
                loaded.last_saved = 0.0;
                let id = loaded.episode.id.clone();

                self.pending_seek = None;
                self.status = PlaybackStatus::Ended;
                self.transport.pause();
                self.transport.seek(0.0);
                if let Err(e) = self.positions.clear(&id) {
                    warn!(episode = %id, error = %e, "Failed to clear playback position");
                }

                info!(episode = %id, "Playback finished");
                self.push_now_playing();
                self.publish_state();
            }
        }
    }

    fn handle_session(&mut self, event: SessionEvent) {
        debug!(?event, "Session event");
        match event {
            SessionEvent::InterruptionBegan => {
                self.resume_after_interruption = self.status == PlaybackStatus::Playing;
                self.pause();
            }
            SessionEvent::InterruptionEnded { should_resume } => {
                let resume = should_resume && self.resume_after_interruption;
                self.resume_after_interruption = false;
                if resume {
                    self.resume();
                }
            }
            SessionEvent::RouteUnavailable => {
                self.resume_after_interruption = false;
                self.pause();
            }
            SessionEvent::ResignedActive => self.persist_position(),
            SessionEvent::Remote(command) => match command {
                RemoteCommand::Play => self.resume(),
                RemoteCommand::Pause => self.pause(),
                RemoteCommand::SkipForward(delta) => self.skip(delta.abs()),
                RemoteCommand::SkipBackward(delta) => self.skip(-delta.abs()),
            },
        }
    }

    fn persist_position(&self) {
        if !matches!(
            self.status,
            PlaybackStatus::Playing | PlaybackStatus::Paused
        ) {
            return;
        }
        let Some(loaded) = self.loaded.as_ref() else {
            return;
        };

        match self.positions.save(&loaded.episode.id, loaded.current_time) {
            Ok(()) => debug!(
                episode = %loaded.episode.id,
                position = loaded.current_time,
                "Saved playback position"
            ),
            Err(e) => warn!(episode = %loaded.episode.id, error = %e, "Failed to save playback position"),
        }
    }

    fn push_now_playing(&self) {
        let info = self.loaded.as_ref().map(|loaded| NowPlayingInfo {
            title: loaded.episode.title.clone(),
            duration: loaded.duration,
            elapsed: loaded.current_time,
            rate: if self.status == PlaybackStatus::Playing {
                1.0
            } else {
                0.0
            },
            artwork: loaded.artwork.clone(),
        });
        self.now_playing.publish(info);
    }

    fn publish_state(&self) {
        let state = match self.loaded.as_ref() {
            Some(loaded) => PlaybackState {
                episode: Some(loaded.episode.clone()),
                status: self.status,
                current_time: loaded.current_time,
                duration: loaded.duration,
            },
            None => PlaybackState {
                status: self.status,
                ..PlaybackState::default()
            },
        };
        self.state.send_replace(state);
    }

    fn shutdown(mut self) {
        self.persist_position();
        if self.loaded.is_some() {
            self.transport.stop();
        }
        self.now_playing.publish(None);
        debug!("Playback engine stopped");
    }
}

async fn next_session_event(
    session: &mut Option<broadcast::Receiver<SessionEvent>>,
) -> Option<SessionEvent> {
    let receiver = session.as_mut()?;
    loop {
        match receiver.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // A dropped route change must still pause
                warn!(skipped, "Missed session events, pausing");
                return Some(SessionEvent::RouteUnavailable);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Clamp to `[0, duration]`, or only to 0 when the duration is unknown
fn clamp_time(time: f64, duration: f64) -> f64 {
    let time = if time.is_finite() { time.max(0.0) } else { 0.0 };
    if duration > 0.0 {
        time.min(duration)
    } else {
        time
    }
}
