// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::error::PlaybackError;

/// Where the audio for an episode comes from
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSource {
    /// A finished download on disk
    Local(PathBuf),
    /// The enclosure URL from the feed
    Remote(Url),
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSource::Local(path) => write!(f, "{}", path.display()),
            MediaSource::Remote(url) => write!(f, "{url}"),
        }
    }
}

/// Notifications from the media transport about the loaded media
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportEvent {
    /// Playback reached this position, in seconds
    TimeUpdate(f64),
    /// The media's real duration became known, in seconds
    DurationKnown(f64),
    /// Playback reached the end of the media
    Ended,
}

/// Sender handed to the transport with every load.
///
/// Events are tagged with the load they belong to, so the engine can drop
/// late events from media it already replaced.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    load: u64,
    sender: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl TransportEvents {
    pub(crate) fn new(load: u64, sender: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { load, sender }
    }

    /// Deliver an event. Returns false once the engine has shut down.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.sender.send((self.load, event)).is_ok()
    }
}

/// The platform media player the engine drives.
///
/// Implementations do their decoding off the engine's loop and report back
/// through the [`TransportEvents`] given to [`MediaTransport::load`].
#[async_trait]
pub trait MediaTransport: Send {
    /// Replace the loaded media. Does not start playback.
    async fn load(
        &mut self,
        source: &MediaSource,
        events: TransportEvents,
    ) -> Result<(), PlaybackError>;

    fn play(&mut self);

    fn pause(&mut self);

    /// Move the play head, in seconds
    fn seek(&mut self, time: f64);

    /// Unload the current media
    fn stop(&mut self);

    /// (Re)acquire the platform's audio output session
    fn activate_session(&mut self);
}
