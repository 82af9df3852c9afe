// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::borrow::Cow;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, BytesText, Event};
use tracing::debug;
use url::Url;

use crate::error::FeedError;

use super::fields::{parse_duration, pub_date_or_now};
use super::model::{Episode, EpisodeId, Podcast, PodcastId};

/// Feed-level values collected from direct children of `<channel>`
#[derive(Debug, Default)]
struct ChannelFields {
    seen: bool,
    title: String,
    author: String,
    description: String,
    summary: String,
    image_url: Option<Url>,
}

/// Values collected while inside a single `<item>`
#[derive(Debug, Default)]
struct ItemFields {
    title: String,
    description: String,
    summary: String,
    guid: String,
    pub_date: String,
    duration: String,
    audio_url: Option<Url>,
    mime_type: Option<String>,
    image_url: Option<Url>,
}

/// Single-pass parser state
struct FeedBuilder {
    feed_url: Url,
    channel: ChannelFields,
    /// `Some` while the parser is inside an `<item>`
    item: Option<ItemFields>,
    /// Names of the currently open elements, outermost first
    open: Vec<String>,
    episodes: Vec<Episode>,
    dropped: usize,
}

/// Parse RSS feed XML bytes into a Podcast struct.
///
/// Malformed XML aborts the whole parse; no partial podcast is returned.
pub fn parse_feed(xml_bytes: &[u8], feed_url: Url) -> Result<Podcast, FeedError> {
    let mut reader = Reader::from_reader(xml_bytes);
    reader.config_mut().trim_text(true);

    let mut builder = FeedBuilder::new(feed_url);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                builder.start_element(&e)?;
                builder.open.push(element_name(&e));
            }
            Event::Empty(e) => {
                let name = element_name(&e);
                builder.start_element(&e)?;
                builder.open.push(name.clone());
                builder.end_element(&name);
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                builder.end_element(&name);
            }
            Event::Text(e) => {
                let text = text_content(&e);
                builder.text(&text);
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(&e).into_owned();
                builder.text(text.trim());
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    builder.finish()
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

/// Unescape element text, decoding HTML entities XML does not define
fn text_content(e: &BytesText<'_>) -> String {
    match e.unescape() {
        Ok(text) => text.into_owned(),
        Err(_) => {
            let raw = String::from_utf8_lossy(e);
            html_escape::decode_html_entities(&raw).into_owned()
        }
    }
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, FeedError> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == key {
            let value: Cow<'_, str> = attr.unescape_value()?;
            return Ok(Some(value.trim().to_string()));
        }
    }
    Ok(None)
}

impl FeedBuilder {
    fn new(feed_url: Url) -> Self {
        Self {
            feed_url,
            channel: ChannelFields::default(),
            item: None,
            open: Vec::new(),
            episodes: Vec::new(),
            dropped: 0,
        }
    }

    fn parent(&self) -> Option<&str> {
        self.open.last().map(String::as_str)
    }

    fn resolve(&self, raw: &str) -> Option<Url> {
        if raw.is_empty() {
            return None;
        }
        self.feed_url.join(raw).ok()
    }

    fn start_element(&mut self, e: &BytesStart<'_>) -> Result<(), FeedError> {
        let name = element_name(e);

        match name.as_str() {
            "channel" => self.channel.seen = true,
            "item" => self.item = Some(ItemFields::default()),
            "enclosure" if self.item.is_some() => {
                let url = attribute(e, b"url")?.and_then(|u| self.resolve(&u));
                let mime_type = attribute(e, b"type")?.filter(|t| !t.is_empty());
                if let (Some(item), Some(url)) = (self.item.as_mut(), url) {
                    let is_image = mime_type
                        .as_deref()
                        .is_some_and(|t| t.to_ascii_lowercase().starts_with("image/"));
                    if is_image {
                        item.image_url.get_or_insert(url);
                    } else {
                        item.audio_url = Some(url);
                        item.mime_type = mime_type;
                    }
                }
            }
            "itunes:image" | "image" => {
                let href = match attribute(e, b"href")? {
                    Some(href) => Some(href),
                    None => attribute(e, b"url")?,
                };
                let url = href.and_then(|h| self.resolve(&h));
                if let Some(url) = url {
                    if let Some(item) = self.item.as_mut() {
                        item.image_url = Some(url);
                    } else if self.parent() == Some("channel") {
                        self.channel.image_url = Some(url);
                    }
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }

        let depth = self.open.len();
        let Some(current) = self.open.last().map(String::as_str) else {
            return;
        };
        let parent = depth
            .checked_sub(2)
            .and_then(|i| self.open.get(i))
            .map(String::as_str);

        if let Some(item) = self.item.as_mut() {
            if parent != Some("item") {
                return;
            }
            let field = match current {
                "title" => &mut item.title,
                "description" => &mut item.description,
                "itunes:summary" | "summary" => &mut item.summary,
                "guid" => &mut item.guid,
                "pubDate" => &mut item.pub_date,
                "itunes:duration" => &mut item.duration,
                _ => return,
            };
            field.push_str(text);
            return;
        }

        match (parent, current) {
            (Some("channel"), "title") => self.channel.title.push_str(text),
            (Some("channel"), "description") => self.channel.description.push_str(text),
            (Some("channel"), "itunes:summary" | "summary") => self.channel.summary.push_str(text),
            (Some("channel"), "itunes:author" | "author") => self.channel.author.push_str(text),
            (Some("image"), "url") if self.channel.image_url.is_none() => {
                let grandparent = depth.checked_sub(3).and_then(|i| self.open.get(i));
                if grandparent.map(String::as_str) == Some("channel") {
                    self.channel.image_url = self.resolve(text);
                }
            }
            _ => {}
        }
    }

    fn end_element(&mut self, name: &str) {
        self.open.pop();

        if name != "item" {
            return;
        }
        let Some(item) = self.item.take() else {
            return;
        };

        match self.build_episode(item) {
            Some(episode) => self.episodes.push(episode),
            None => self.dropped += 1,
        }
    }

    fn build_episode(&self, item: ItemFields) -> Option<Episode> {
        let audio_url = item.audio_url?;

        let guid = Some(item.guid.as_str()).filter(|g| !g.is_empty());
        let id = EpisodeId::derive(&self.feed_url, guid, &audio_url);

        let title = if item.title.is_empty() {
            "Untitled Episode".to_string()
        } else {
            item.title
        };
        let description = if item.description.is_empty() {
            item.summary
        } else {
            item.description
        };
        let pub_date = Some(item.pub_date.as_str()).filter(|d| !d.is_empty());

        Some(Episode {
            id,
            title,
            description,
            audio_url,
            duration: parse_duration(&item.duration),
            publish_date: pub_date_or_now(pub_date),
            image_url: item.image_url,
            mime_type: item.mime_type,
        })
    }

    fn finish(self) -> Result<Podcast, FeedError> {
        if let Some(unclosed) = self.open.last() {
            return Err(FeedError::ParseFailed(format!(
                "document ended inside <{unclosed}>"
            )));
        }
        if !self.channel.seen {
            return Err(FeedError::ParseFailed(
                "document has no <channel> element".to_string(),
            ));
        }

        debug!(
            feed = %self.feed_url,
            episodes = self.episodes.len(),
            dropped = self.dropped,
            "Parsed feed"
        );

        let channel = self.channel;
        let description = if channel.description.is_empty() {
            channel.summary
        } else {
            channel.description
        };

        Ok(Podcast {
            id: PodcastId::for_feed(&self.feed_url),
            title: channel.title,
            author: channel.author,
            description,
            image_url: channel.image_url,
            feed_url: self.feed_url,
            episodes: self.episodes,
        })
    }
}
