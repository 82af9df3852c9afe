// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use std::sync::Arc;

use crate::feed::EpisodeId;

/// Events emitted by the download coordinator for progress reporting.
///
/// Events are delivered from the coordinator's serialized loop, in the order
/// the bookkeeping changed.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A download was admitted but waits for a free transfer slot
    DownloadQueued {
        episode_id: EpisodeId,
        episode_title: String,
    },

    /// The transfer for a download has started
    DownloadStarted {
        episode_id: EpisodeId,
        episode_title: String,
        /// Expected content length in bytes, if known
        content_length: Option<u64>,
    },

    /// Download progress update
    DownloadProgress {
        episode_id: EpisodeId,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
        /// Fraction in `[0, 1]`, 0 while the total is unknown
        fraction: f64,
    },

    /// The download was finalized at its canonical path
    DownloadCompleted {
        episode_id: EpisodeId,
        path: PathBuf,
    },

    /// The download failed and its bookkeeping was reverted
    DownloadFailed {
        episode_id: EpisodeId,
        error: String,
    },

    /// The download was cancelled by the caller
    DownloadCancelled { episode_id: EpisodeId },

    /// Leftover temporary files were removed at startup
    PartialFilesCleanedUp { count: usize },
}

/// Trait for reporting download progress.
///
/// Implementations can use this to display progress bars, log messages,
/// or collect statistics.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {
        // Intentionally empty
    }
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}

/// Reporter that records every event, for assertions in tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: std::sync::Mutex<Vec<ProgressEvent>>,
}

#[cfg(test)]
impl RecordingReporter {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl ProgressReporter for RecordingReporter {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_reporter_handles_all_events() {
        let reporter = NoopReporter;
        let id = EpisodeId::from("ep1");

        reporter.report(ProgressEvent::DownloadQueued {
            episode_id: id.clone(),
            episode_title: "Episode 1".to_string(),
        });

        reporter.report(ProgressEvent::DownloadStarted {
            episode_id: id.clone(),
            episode_title: "Episode 1".to_string(),
            content_length: Some(1024),
        });

        reporter.report(ProgressEvent::DownloadProgress {
            episode_id: id.clone(),
            bytes_downloaded: 512,
            total_bytes: Some(1024),
            fraction: 0.5,
        });

        reporter.report(ProgressEvent::DownloadCompleted {
            episode_id: id.clone(),
            path: PathBuf::from("/tmp/ep1.mp3"),
        });

        reporter.report(ProgressEvent::DownloadFailed {
            episode_id: id.clone(),
            error: "Connection timeout".to_string(),
        });

        reporter.report(ProgressEvent::DownloadCancelled { episode_id: id });

        reporter.report(ProgressEvent::PartialFilesCleanedUp { count: 2 });
    }

    #[test]
    fn recording_reporter_keeps_order() {
        let reporter = RecordingReporter::default();
        reporter.report(ProgressEvent::PartialFilesCleanedUp { count: 1 });
        reporter.report(ProgressEvent::DownloadCancelled {
            episode_id: EpisodeId::from("ep"),
        });

        let events = reporter.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            ProgressEvent::PartialFilesCleanedUp { count: 1 }
        ));
        assert!(matches!(events[1], ProgressEvent::DownloadCancelled { .. }));
    }
}
