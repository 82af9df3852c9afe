mod fetch;
mod fields;
mod model;
mod parse;

pub use fetch::{FeedIngestor, is_url, parse_feed_file, parse_feed_url};
pub use fields::{parse_duration, parse_pub_date};
pub use model::{Episode, EpisodeId, Podcast, PodcastId};
pub use parse::parse_feed;
