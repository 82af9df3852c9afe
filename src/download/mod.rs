// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Offline downloads of episode audio.
//!
//! [`DownloadCoordinator`] owns the in-flight and downloaded bookkeeping.
//! Transfers stream into a staging directory, then are finalized next to
//! their canonical `<episodeID>.<ext>` path and renamed into place.

mod coordinator;
mod filename;
mod finalize;
mod transfer;

pub use coordinator::{Admission, DownloadCoordinator, DownloadOptions, DownloadSnapshot};
pub use filename::{audio_extension, canonical_filename};
