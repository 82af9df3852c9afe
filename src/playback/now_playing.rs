// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use url::Url;

/// Metadata pushed to the platform's now-playing display
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlayingInfo {
    pub title: String,
    /// Seconds, 0 when unknown
    pub duration: f64,
    pub elapsed: f64,
    /// 1.0 while playing, 0.0 otherwise
    pub rate: f64,
    pub artwork: Option<Url>,
}

/// Commands arriving from the platform's remote transport controls
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RemoteCommand {
    Play,
    Pause,
    /// Skip forward by this many seconds
    SkipForward(f64),
    /// Skip backward by this many seconds
    SkipBackward(f64),
}

/// The platform's now-playing surface
pub trait NowPlayingSurface: Send + Sync {
    /// Replace the displayed metadata; `None` clears it
    fn publish(&self, info: Option<NowPlayingInfo>);
}
