// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use podplay::{
    Admission, DownloadCoordinator, DownloadOptions, Episode, EpisodeId, FeedIngestor,
    JsonFileStore, KeyValueStore, Library, NoopReporter, Podcast, PositionStore, ProgressEvent,
    ProgressReporter, ReqwestClient, SharedProgressReporter, find_episode, is_url,
    parse_feed_file,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static BROOM: Emoji<'_, '_> = Emoji("🧹 ", "[-] ");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");

/// Subscribe to podcasts and keep episodes for offline listening
#[derive(Parser, Debug)]
#[command(name = "podplay")]
#[command(about = "Subscribe to podcasts and keep episodes for offline listening")]
#[command(version)]
struct Args {
    /// Directory holding the library and downloaded episodes
    #[arg(long, default_value = ".podplay")]
    data_dir: PathBuf,

    /// Maximum number of concurrent downloads (unbounded if omitted)
    #[arg(short = 'c', long)]
    concurrent: Option<usize>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - suppress progress output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed URL or local feed file, refreshing it if known
    Subscribe { feed: String },

    /// List subscribed podcasts
    List,

    /// List the episodes of a podcast
    Episodes {
        /// Podcast index or id prefix
        podcast: String,
    },

    /// Download episodes of a podcast
    Download {
        /// Podcast index or id prefix
        podcast: String,

        /// Episode indexes or id prefixes
        episodes: Vec<String>,

        /// Download the N most recent episodes
        #[arg(short, long, conflicts_with = "episodes")]
        latest: Option<usize>,
    },

    /// Delete a downloaded episode and its saved position
    DeleteDownload { podcast: String, episode: String },

    /// Unsubscribe from a podcast and delete its downloads
    Remove { podcast: String },
}

/// Progress reporter using indicatif for terminal output
struct IndicatifReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<EpisodeId, ProgressBar>>,
}

impl IndicatifReporter {
    fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn bars(&self) -> std::sync::MutexGuard<'_, HashMap<EpisodeId, ProgressBar>> {
        self.bars.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get_or_create_bar(&self, episode_id: &EpisodeId) -> ProgressBar {
        let mut bars = self.bars();

        if let Some(bar) = bars.get(episode_id) {
            return bar.clone();
        }

        let style = ProgressStyle::with_template(&format!(
            "  {DOWNLOAD}[{{bar:30.cyan/blue}}] {{bytes}}/{{total_bytes}} {{wide_msg}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░");

        let bar = self.multi.add(ProgressBar::new(0));
        bar.set_style(style);
        bars.insert(episode_id.clone(), bar.clone());
        bar
    }

    fn take_bar(&self, episode_id: &EpisodeId) -> ProgressBar {
        let bar = self.get_or_create_bar(episode_id);
        self.bars().remove(episode_id);
        bar
    }
}

impl ProgressReporter for IndicatifReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::DownloadQueued {
                episode_id,
                episode_title,
            } => {
                let bar = self.get_or_create_bar(&episode_id);
                bar.set_message(format!("{} {}", truncate_title(&episode_title, 40), "(queued)".dimmed()));
            }

            ProgressEvent::DownloadStarted {
                episode_id,
                episode_title,
                content_length,
            } => {
                let bar = self.get_or_create_bar(&episode_id);
                bar.set_length(content_length.unwrap_or(0));
                bar.set_position(0);
                bar.set_message(truncate_title(&episode_title, 40));
            }

            ProgressEvent::DownloadProgress {
                episode_id,
                bytes_downloaded,
                total_bytes,
                ..
            } => {
                let bar = self.get_or_create_bar(&episode_id);
                if let Some(total) = total_bytes {
                    bar.set_length(total);
                }
                bar.set_position(bytes_downloaded);
            }

            ProgressEvent::DownloadCompleted { episode_id, path } => {
                let bar = self.take_bar(&episode_id);
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                bar.finish_with_message(format!("{SUCCESS}{}", name.green()));
            }

            ProgressEvent::DownloadFailed { episode_id, error } => {
                let bar = self.take_bar(&episode_id);
                bar.abandon_with_message(format!("{FAILURE}{}", error.red()));
            }

            ProgressEvent::DownloadCancelled { episode_id } => {
                self.take_bar(&episode_id).finish_and_clear();
            }

            ProgressEvent::PartialFilesCleanedUp { count } => {
                let _ = self.multi.println(format!(
                    "{BROOM}Removed {} leftover partial file(s)",
                    count.to_string().yellow()
                ));
            }
        }
    }
}

fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let kept: String = title.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn format_duration(seconds: f64) -> String {
    if seconds <= 0.0 {
        return "--:--".to_string();
    }
    let total = seconds.round() as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},hyper=warn,reqwest=warn")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Everything a command may need, rooted at the data directory
struct App {
    store: Arc<dyn KeyValueStore>,
    library: Library,
    downloads_dir: PathBuf,
    concurrent: Option<usize>,
    quiet: bool,
}

impl App {
    fn open(args: &Args) -> Result<Self> {
        let store_dir = args.data_dir.join("store");
        let store: Arc<dyn KeyValueStore> = Arc::new(
            JsonFileStore::open(&store_dir)
                .with_context(|| format!("Failed to open store at {}", store_dir.display()))?,
        );
        let library = Library::open(store.clone()).context("Failed to load library")?;

        Ok(Self {
            store,
            library,
            downloads_dir: args.data_dir.join("Downloads"),
            concurrent: args.concurrent,
            quiet: args.quiet,
        })
    }

    fn downloads(&self, reporter: SharedProgressReporter) -> Result<DownloadCoordinator> {
        let mut options = DownloadOptions::new(&self.downloads_dir);
        if let Some(max) = self.concurrent {
            options = options.with_max_concurrent(max);
        }
        DownloadCoordinator::spawn(ReqwestClient::new(), self.store.clone(), options, reporter)
            .context("Failed to prepare downloads directory")
    }

    fn reporter(&self) -> SharedProgressReporter {
        if self.quiet {
            NoopReporter::shared()
        } else {
            Arc::new(IndicatifReporter::new())
        }
    }

    fn positions(&self) -> PositionStore {
        PositionStore::load(self.store.clone())
    }

    async fn subscribe(&mut self, feed: &str) -> Result<()> {
        let podcast = if is_url(feed) {
            let ingestor = FeedIngestor::new(ReqwestClient::new());
            self.library
                .subscribe(&ingestor, feed)
                .await
                .with_context(|| format!("Failed to subscribe to {feed}"))?
        } else {
            let podcast = parse_feed_file(Path::new(feed))
                .with_context(|| format!("Failed to read feed file {feed}"))?;
            self.library.add(podcast)?
        };

        if !self.quiet {
            println!(
                "{HEADPHONES}{} • {} episodes",
                podcast.title.bold().green(),
                podcast.episodes.len().to_string().cyan()
            );
        }
        Ok(())
    }

    fn list(&self) {
        if self.library.podcasts().is_empty() {
            println!("{}", "No subscriptions yet".dimmed());
            return;
        }
        for (index, podcast) in self.library.podcasts().iter().enumerate() {
            println!(
                "{:>3}  {}  {}  {}",
                (index + 1).to_string().cyan(),
                podcast.id.as_str()[..8].dimmed(),
                podcast.title.bold(),
                format!("({} episodes)", podcast.episodes.len()).dimmed()
            );
        }
    }

    fn episodes(&self, query: &str) -> Result<()> {
        let podcast = self.library.find_podcast(query)?;
        let downloads = self.downloads(NoopReporter::shared())?;
        let positions = self.positions();

        println!("{HEADPHONES}{}", podcast.title.bold().green());
        for (index, episode) in podcast.episodes.iter().enumerate() {
            let marker = if downloads.is_downloaded(&episode.id) {
                "●".green()
            } else {
                "○".dimmed()
            };
            let resume = positions
                .get(&episode.id)
                .filter(|p| *p > 0.0)
                .map(|p| format!(" [at {}]", format_duration(p)).yellow().to_string())
                .unwrap_or_default();

            println!(
                "{:>4} {} {}  {}  {}{}",
                (index + 1).to_string().cyan(),
                marker,
                episode.publish_date.format("%Y-%m-%d").to_string().dimmed(),
                format_duration(episode.duration),
                episode.title,
                resume
            );
        }
        Ok(())
    }

    async fn download(&self, query: &str, selectors: &[String], latest: Option<usize>) -> Result<()> {
        let podcast = self.library.find_podcast(query)?;
        let episodes = select_episodes(podcast, selectors, latest)?;
        let downloads = self.downloads(self.reporter())?;

        let mut started = 0;
        for episode in &episodes {
            match downloads.start(episode).await {
                Admission::Started => started += 1,
                Admission::AlreadyDownloaded => {
                    if !self.quiet {
                        println!("{SUCCESS}{} {}", episode.title, "(already downloaded)".dimmed());
                    }
                }
                Admission::AlreadyInFlight => {}
                Admission::ShutDown => bail!("Download coordinator stopped unexpectedly"),
            }
        }

        downloads.wait_until_idle().await;

        let missing: Vec<&Episode> = episodes
            .iter()
            .filter(|e| !downloads.is_downloaded(&e.id))
            .collect();

        if !self.quiet {
            println!(
                "\n{} {} started, {} failed",
                "Done:".bold().green(),
                started.to_string().green().bold(),
                if missing.is_empty() {
                    "0".green()
                } else {
                    missing.len().to_string().red().bold()
                }
            );
            println!(
                "{FOLDER}Downloads: {}",
                downloads.downloads_dir().display().to_string().cyan()
            );
        }

        if !missing.is_empty() && missing.len() == episodes.len() {
            bail!("No episode could be downloaded");
        }
        Ok(())
    }

    async fn delete_download(&self, podcast: &str, episode: &str) -> Result<()> {
        let podcast = self.library.find_podcast(podcast)?;
        let episode = find_episode(podcast, episode)?;
        let downloads = self.downloads(NoopReporter::shared())?;

        self.library
            .delete_episode(&podcast.id, &episode.id, &downloads, &self.positions(), None)
            .await?;

        if !self.quiet {
            println!("{SUCCESS}Deleted download of {}", episode.title.bold());
        }
        Ok(())
    }

    async fn remove(&mut self, query: &str) -> Result<()> {
        let id = self.library.find_podcast(query)?.id.clone();
        let downloads = self.downloads(NoopReporter::shared())?;
        let positions = self.positions();

        let podcast = self
            .library
            .remove_podcast(&id, &downloads, &positions, None)
            .await?;

        if !self.quiet {
            println!("{SUCCESS}Unsubscribed from {}", podcast.title.bold());
        }
        Ok(())
    }
}

/// Pick the episodes a download command refers to; defaults to the newest one
fn select_episodes(
    podcast: &Podcast,
    selectors: &[String],
    latest: Option<usize>,
) -> Result<Vec<Episode>> {
    if !selectors.is_empty() {
        return selectors
            .iter()
            .map(|s| find_episode(podcast, s).cloned().map_err(Into::into))
            .collect();
    }

    let mut newest: Vec<&Episode> = podcast.episodes.iter().collect();
    newest.sort_by(|a, b| b.publish_date.cmp(&a.publish_date));
    Ok(newest
        .into_iter()
        .take(latest.unwrap_or(1))
        .cloned()
        .collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose, args.quiet);

    if !args.quiet {
        println!(
            "\n{}{} {}\n",
            MICROPHONE,
            "podplay".bold().magenta(),
            "- Podcast Player".dimmed()
        );
    }

    let mut app = App::open(&args)?;

    match &args.command {
        Command::Subscribe { feed } => app.subscribe(feed).await?,
        Command::List => app.list(),
        Command::Episodes { podcast } => app.episodes(podcast)?,
        Command::Download {
            podcast,
            episodes,
            latest,
        } => app.download(podcast, episodes, *latest).await?,
        Command::DeleteDownload { podcast, episode } => {
            app.delete_download(podcast, episode).await?
        }
        Command::Remove { podcast } => app.remove(podcast).await?,
    }

    Ok(())
}
