// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Single-session audio playback with persisted positions.

mod engine;
mod now_playing;
mod positions;
mod session;
mod transport;

pub use engine::{MediaLocator, PlaybackEngine, PlaybackOptions, PlaybackState, PlaybackStatus};
pub use now_playing::{NowPlayingInfo, NowPlayingSurface, RemoteCommand};
pub use positions::PositionStore;
pub use session::{SessionBus, SessionEvent};
pub use transport::{MediaSource, MediaTransport, TransportEvent, TransportEvents};
