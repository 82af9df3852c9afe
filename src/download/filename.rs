// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::feed::{Episode, EpisodeId};

/// Extensions a finished download may carry
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "mp4", "aac", "ogg", "opus", "wav", "flac"];

/// Suffix of every in-progress artifact
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Get the audio file extension from an episode's enclosure
///
/// Attempts to extract from URL path or MIME type, defaults to "mp3"
pub fn audio_extension(episode: &Episode) -> String {
    // Try to get extension from URL path
    if let Some(ext) = episode
        .audio_url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|filename| filename.contains('.'))
        .and_then(|filename| filename.rsplit('.').next())
        .filter(|ext| is_valid_audio_extension(ext))
    {
        return ext.to_lowercase();
    }

    // Try to get extension from MIME type
    if let Some(ref mime) = episode.mime_type
        && let Some(ext) = mime_to_extension(mime)
    {
        return ext.to_string();
    }

    // Default to mp3
    "mp3".to_string()
}

/// Canonical file name of a finished download: `<episodeID>.<ext>`
pub fn canonical_filename(episode: &Episode) -> String {
    format!("{}.{}", episode.id, audio_extension(episode))
}

/// Every canonical name an episode's download could have
pub fn candidate_filenames(id: &EpisodeId) -> impl Iterator<Item = String> + '_ {
    AUDIO_EXTENSIONS.iter().map(move |ext| format!("{id}.{ext}"))
}

/// Name of an in-progress artifact for one transfer attempt
pub fn partial_filename(id: &EpisodeId, transfer: u64) -> String {
    format!("{id}.{transfer}{PARTIAL_SUFFIX}")
}

pub fn is_partial_filename(name: &str) -> bool {
    name.ends_with(PARTIAL_SUFFIX)
}

/// Check if a string is a valid audio file extension
fn is_valid_audio_extension(ext: &str) -> bool {
    AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

/// Map MIME types to file extensions
fn mime_to_extension(mime: &str) -> Option<&'static str> {
    let essence = mime.split(';').next().unwrap_or(mime).trim();
    match essence.to_lowercase().as_str() {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => Some("m4a"),
        "audio/aac" => Some("aac"),
        "audio/ogg" => Some("ogg"),
        "audio/opus" => Some("opus"),
        "audio/wav" | "audio/x-wav" => Some("wav"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use url::Url;

    fn make_episode(url: &str, mime: Option<&str>) -> Episode {
        Episode {
            id: EpisodeId::from("abc"),
            title: "Test".to_string(),
            description: String::new(),
            audio_url: Url::parse(url).unwrap(),
            duration: 0.0,
            publish_date: Utc::now(),
            image_url: None,
            mime_type: mime.map(String::from),
        }
    }

    #[test]
    fn extension_from_url() {
        let ep = make_episode("https://example.com/audio/ep.M4A?token=1", None);
        assert_eq!(audio_extension(&ep), "m4a");
    }

    #[test]
    fn extension_from_mime_when_url_has_none() {
        let ep = make_episode("https://example.com/stream/12345", Some("audio/ogg"));
        assert_eq!(audio_extension(&ep), "ogg");
    }

    #[test]
    fn extension_from_mime_with_parameters() {
        let ep = make_episode("https://example.com/x", Some("audio/x-m4a; charset=binary"));
        assert_eq!(audio_extension(&ep), "m4a");
    }

    #[test]
    fn unknown_extension_and_mime_default_to_mp3() {
        let ep = make_episode("https://example.com/episode.php", Some("text/html"));
        assert_eq!(audio_extension(&ep), "mp3");
    }

    #[test]
    fn canonical_name_uses_episode_id() {
        let ep = make_episode("https://example.com/show/ep.opus", None);
        assert_eq!(canonical_filename(&ep), "abc.opus");
    }

    #[test]
    fn candidates_cover_every_extension() {
        let id = EpisodeId::from("abc");
        let names: Vec<String> = candidate_filenames(&id).collect();
        assert_eq!(names.len(), AUDIO_EXTENSIONS.len());
        assert!(names.contains(&"abc.mp3".to_string()));
        assert!(names.contains(&"abc.flac".to_string()));
    }

    #[test]
    fn partial_names_are_unique_per_transfer() {
        let id = EpisodeId::from("abc");
        let first = partial_filename(&id, 1);
        let second = partial_filename(&id, 2);
        assert_ne!(first, second);
        assert!(is_partial_filename(&first));
        assert!(!is_partial_filename("abc.mp3"));
    }
}
