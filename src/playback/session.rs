// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use tokio::sync::broadcast;
use tracing::debug;

use super::now_playing::RemoteCommand;

const SESSION_CAPACITY: usize = 256;

/// System events affecting the audio session
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionEvent {
    /// Another audio source took over the output
    InterruptionBegan,
    /// The interruption is over; `should_resume` is the platform's hint
    InterruptionEnded { should_resume: bool },
    /// The active output route went away, e.g. headphones unplugged
    RouteUnavailable,
    /// The application lost foreground status
    ResignedActive,
    /// A remote transport command
    Remote(RemoteCommand),
}

/// Fan-out of platform session events.
///
/// Platform glue publishes here; a playback engine subscribes when it is
/// spawned and drops its subscription when it stops. A subscriber that falls
/// behind loses the oldest events; the engine then pauses as if the route
/// had gone away.
#[derive(Debug, Clone)]
pub struct SessionBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(SESSION_CAPACITY);
        Self { sender }
    }

    /// Publish an event to every subscriber. Returns the number reached.
    pub fn publish(&self, event: SessionEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!(?event, "No session subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SessionBus {
    fn default() -> Self {
        Self::new()
    }
}
