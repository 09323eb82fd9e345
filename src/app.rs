use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::unbounded;

use crate::config::Config;
use crate::data::{self, ListingService, RedditListingService};
use crate::error;
use crate::media::{self, DecodedImage, ImageSource};
use crate::reddit::{self, Post};
use crate::storage::{self, Persister};
use crate::ui;

/// One rendered slot of the feed.
#[derive(Debug, Clone)]
pub struct FeedEntry {
    pub post: Post,
    pub image: DecodedImage,
    pub saved_to: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    PostsFetched { subreddit: String, count: usize },
    SkippedNonImage { post: Post },
    SkippedFetch { post: Post, error: String },
    Rendered { post: Post, width: u32, height: u32 },
    Saved { post: Post, path: PathBuf },
    SaveFailed { post: Post, error: String },
}

pub trait FeedObserver {
    fn on_event(&mut self, event: FeedEvent);
}

/// Forwards feed events to the `log` facade.
#[derive(Debug, Default)]
pub struct LogObserver;

impl FeedObserver for LogObserver {
    fn on_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::PostsFetched { subreddit, count } => {
                log::info!("fetched {} posts from r/{}", count, subreddit)
            }
            FeedEvent::SkippedNonImage { post } => {
                log::info!("skipping non-image URL: {}", post.url)
            }
            FeedEvent::SkippedFetch { post, error } => {
                log::warn!("skipping post: {} - {}: {}", post.title, post.url, error)
            }
            FeedEvent::Rendered {
                post,
                width,
                height,
            } => log::debug!("rendered {} ({}x{})", post.title, width, height),
            FeedEvent::Saved { path, .. } => log::info!("saved image: {}", path.display()),
            FeedEvent::SaveFailed { post, error } => {
                log::warn!("failed to save image for {}: {}", post.title, error)
            }
        }
    }
}

pub struct Pipeline {
    listing: Arc<dyn ListingService>,
    images: Arc<dyn ImageSource>,
    persister: Option<Persister>,
    max_width: u32,
    workers: usize,
}

impl Pipeline {
    pub fn new(listing: Arc<dyn ListingService>, images: Arc<dyn ImageSource>) -> Self {
        Self {
            listing,
            images,
            persister: None,
            max_width: media::DEFAULT_MAX_WIDTH,
            workers: 1,
        }
    }

    pub fn with_persister(mut self, persister: Persister) -> Self {
        log::debug!("saving images to {}", persister.dir().display());
        self.persister = Some(persister);
        self
    }

    pub fn with_max_width(mut self, max_width: u32) -> Self {
        self.max_width = max_width;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Fetches the listing and turns every image post into a feed entry.
    ///
    /// Only the listing fetch can fail the run; per-post problems are
    /// reported to `observer` and skipped. Entries keep listing order.
    pub fn run(
        &self,
        subreddit: &str,
        limit: usize,
        observer: &mut dyn FeedObserver,
    ) -> error::Result<Vec<FeedEntry>> {
        let posts = data::fetch_posts(self.listing.as_ref(), subreddit, limit)?;
        observer.on_event(FeedEvent::PostsFetched {
            subreddit: subreddit.to_string(),
            count: posts.len(),
        });

        let jobs: Vec<(usize, String)> = posts
            .iter()
            .enumerate()
            .filter(|(_, post)| media::is_image_url(&post.url))
            .map(|(index, post)| (index, post.url.clone()))
            .collect();
        let mut results = self.fetch_images(jobs, posts.len());

        let mut entries = Vec::new();
        for (index, post) in posts.into_iter().enumerate() {
            let image = match results[index].take() {
                None => {
                    observer.on_event(FeedEvent::SkippedNonImage { post });
                    continue;
                }
                Some(Err(err)) => {
                    observer.on_event(FeedEvent::SkippedFetch {
                        post,
                        error: format!("{:#}", anyhow::Error::new(err)),
                    });
                    continue;
                }
                Some(Ok(image)) => image,
            };

            observer.on_event(FeedEvent::Rendered {
                post: post.clone(),
                width: image.width(),
                height: image.height(),
            });

            let saved_to = self.persist(&post, &image, observer);
            entries.push(FeedEntry {
                post,
                image,
                saved_to,
            });
        }
        Ok(entries)
    }

    fn persist(
        &self,
        post: &Post,
        image: &DecodedImage,
        observer: &mut dyn FeedObserver,
    ) -> Option<PathBuf> {
        let persister = self.persister.as_ref()?;
        let file_name = storage::file_name_for(post);
        match persister.save(&image.image, &file_name) {
            Ok(path) => {
                observer.on_event(FeedEvent::Saved {
                    post: post.clone(),
                    path: path.clone(),
                });
                Some(path)
            }
            Err(err) => {
                observer.on_event(FeedEvent::SaveFailed {
                    post: post.clone(),
                    error: format!("{:#}", anyhow::Error::new(err)),
                });
                None
            }
        }
    }

    /// Downloads and resizes on up to `workers` threads. Slot `i` of the
    /// result holds the outcome for post `i`; non-image posts stay `None`.
    fn fetch_images(
        &self,
        jobs: Vec<(usize, String)>,
        total: usize,
    ) -> Vec<Option<error::Result<DecodedImage>>> {
        let mut results: Vec<Option<error::Result<DecodedImage>>> =
            (0..total).map(|_| None).collect();
        if jobs.is_empty() {
            return results;
        }

        let workers = self.workers.clamp(1, jobs.len());
        let (job_tx, job_rx) = unbounded::<(usize, String)>();
        let (result_tx, result_rx) = unbounded();
        for job in jobs {
            if job_tx.send(job).is_err() {
                break;
            }
        }
        drop(job_tx);

        thread::scope(|scope| {
            for _ in 0..workers {
                let rx_jobs = job_rx.clone();
                let tx_results = result_tx.clone();
                scope.spawn(move || {
                    for (index, url) in rx_jobs.iter() {
                        let result = self
                            .images
                            .fetch(&url)
                            .map(|image| media::resize(image, self.max_width));
                        if tx_results.send((index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);
            for (index, result) in result_rx.iter() {
                results[index] = Some(result);
            }
        });
        results
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub headless: bool,
}

pub fn run(cfg: Config, opts: RunOptions) -> Result<()> {
    let client = reddit::Client::new(reddit::ClientConfig {
        user_agent: cfg.reddit.user_agent.clone(),
        base_url: Some(cfg.reddit.base_url.clone()),
        timeout: Some(cfg.reddit.timeout),
        http_client: None,
    })
    .context("create reddit client")?;
    let listing: Arc<dyn ListingService> = Arc::new(RedditListingService::new(Arc::new(client)));

    let fetcher = media::Fetcher::new(media::Config {
        user_agent: cfg.reddit.user_agent.clone(),
        timeout: Some(cfg.media.timeout),
        http_client: None,
    })
    .context("create image fetcher")?;

    let mut pipeline = Pipeline::new(listing, Arc::new(fetcher))
        .with_max_width(cfg.media.max_width)
        .with_workers(cfg.media.workers);
    if cfg.storage.download {
        pipeline = pipeline.with_persister(Persister::new(storage::Options {
            output_dir: cfg.storage.output_dir.clone(),
        }));
    }

    let subreddit = cfg.reddit.subreddit.clone();
    log::info!("fetching data from subreddit: {}", subreddit);
    let mut observer = LogObserver;
    let entries = pipeline
        .run(&subreddit, cfg.reddit.limit, &mut observer)
        .with_context(|| format!("fetch posts from r/{subreddit}"))?;

    if opts.headless || !io::stdout().is_terminal() {
        let mut stdout = io::stdout().lock();
        print_entries(&mut stdout, &entries).context("write feed")?;
        return Ok(());
    }

    let status_message = if cfg.storage.download {
        format!(
            "{} images, saved to {}. j/k scroll, q quit.",
            entries.len(),
            cfg.storage.output_dir.display()
        )
    } else {
        format!("{} images. j/k scroll, q quit.", entries.len())
    };
    let mut viewer = ui::Viewer::new(ui::Options {
        subreddit,
        entries,
        status_message,
        inline_images: ui::is_kitty_terminal(),
    });
    viewer.run()
}

pub fn print_entries<W: Write>(out: &mut W, entries: &[FeedEntry]) -> io::Result<()> {
    for entry in entries {
        write!(
            out,
            "{} ({}x{}, {})",
            entry.post.title,
            entry.image.width(),
            entry.image.height(),
            entry.image.kind
        )?;
        if let Some(path) = &entry.saved_to {
            write!(out, " -> {}", path.display())?;
        }
        writeln!(out)?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::tests::png_bytes;
    use crate::media::ImageKind;
    use image::{DynamicImage, RgbaImage};
    use mockito::{Matcher, Server};
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingObserver {
        events: Vec<FeedEvent>,
    }

    impl FeedObserver for RecordingObserver {
        fn on_event(&mut self, event: FeedEvent) {
            self.events.push(event);
        }
    }

    impl RecordingObserver {
        fn skipped(&self) -> usize {
            self.events
                .iter()
                .filter(|event| {
                    matches!(
                        event,
                        FeedEvent::SkippedNonImage { .. } | FeedEvent::SkippedFetch { .. }
                    )
                })
                .count()
        }

        fn rendered(&self) -> Vec<String> {
            self.events
                .iter()
                .filter_map(|event| match event {
                    FeedEvent::Rendered { post, .. } => Some(post.title.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    fn listing_body(posts: &[(&str, String)]) -> String {
        let children: Vec<_> = posts
            .iter()
            .map(|(title, url)| json!({"kind": "t3", "data": {"title": title, "url": url}}))
            .collect();
        json!({"kind": "Listing", "data": {"after": "", "children": children}}).to_string()
    }

    fn live_pipeline(server: &Server) -> Pipeline {
        let client = reddit::Client::new(reddit::ClientConfig {
            user_agent: "feed-test/1.0".into(),
            base_url: Some(server.url()),
            ..Default::default()
        })
        .unwrap();
        let listing: Arc<dyn ListingService> =
            Arc::new(RedditListingService::new(Arc::new(client)));
        let fetcher = media::Fetcher::new(media::Config::default()).unwrap();
        Pipeline::new(listing, Arc::new(fetcher))
    }

    #[test]
    fn end_to_end_renders_skips_and_saves() {
        let mut server = Server::new();
        let base = server.url();
        server
            .mock("GET", "/r/wallpapers/.json")
            .match_query(Matcher::Any)
            .with_body(listing_body(&[
                ("post a", format!("{base}/img/a.png")),
                ("post b", format!("{base}/notes/b.txt")),
                ("post c", format!("{base}/img/c.jpg")),
            ]))
            .create();
        server
            .mock("GET", "/img/a.png")
            .with_body(png_bytes(800, 600))
            .create();
        server.mock("GET", "/img/c.jpg").with_status(500).create();
        let text_mock = server.mock("GET", "/notes/b.txt").expect(0).create();

        let dir = tempdir().unwrap();
        let out = dir.path().join("imgDls");
        let pipeline = live_pipeline(&server)
            .with_workers(2)
            .with_persister(Persister::new(storage::Options {
                output_dir: out.clone(),
            }));
        let mut observer = RecordingObserver::default();

        let entries = pipeline.run("wallpapers", 3, &mut observer).unwrap();

        text_mock.assert();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].post.title, "post a");
        assert_eq!((entries[0].image.width(), entries[0].image.height()), (400, 300));
        assert_eq!(observer.rendered(), vec!["post a".to_string()]);
        assert_eq!(observer.skipped(), 2);
        assert!(matches!(&observer.events[2], FeedEvent::Saved { .. }));
        assert!(matches!(
            &observer.events[3],
            FeedEvent::SkippedNonImage { post } if post.title == "post b"
        ));
        assert!(matches!(
            &observer.events[4],
            FeedEvent::SkippedFetch { post, .. } if post.title == "post c"
        ));

        let written: Vec<_> = std::fs::read_dir(&out).unwrap().collect();
        assert_eq!(written.len(), 1);
        assert_eq!(entries[0].saved_to, Some(out.join("post_a.png")));
        assert!(image::open(out.join("post_a.png")).is_ok());
    }

    #[test]
    fn listing_failure_is_returned_not_fatal() {
        let mut server = Server::new();
        server
            .mock("GET", "/r/gone/.json")
            .match_query(Matcher::Any)
            .with_status(404)
            .create();
        let mut observer = RecordingObserver::default();

        let err = live_pipeline(&server)
            .run("gone", 5, &mut observer)
            .unwrap_err();

        assert_eq!(err.kind(), error::ErrorKind::Transport);
        assert!(observer.events.is_empty());
    }

    /// Serves a fixed listing with no further pages.
    struct StaticListing(Vec<Post>);

    impl ListingService for StaticListing {
        fn load_page(
            &self,
            _subreddit: &str,
            _opts: reddit::ListingOptions,
        ) -> error::Result<reddit::Listing<Post>> {
            Ok(reddit::Listing {
                after: None,
                children: self
                    .0
                    .iter()
                    .cloned()
                    .map(|data| reddit::Thing {
                        kind: "t3".into(),
                        data,
                    })
                    .collect(),
            })
        }
    }

    /// Earlier posts take longer, so completion order is reversed.
    struct SlowImages {
        widths: HashMap<String, u32>,
    }

    impl ImageSource for SlowImages {
        fn fetch(&self, url: &str) -> error::Result<DecodedImage> {
            let width = self.widths[url];
            thread::sleep(Duration::from_millis(u64::from(60 - width)));
            Ok(DecodedImage {
                image: DynamicImage::ImageRgba8(RgbaImage::new(width, 1)),
                kind: ImageKind::Gif,
            })
        }
    }

    #[test]
    fn parallel_fetch_keeps_listing_order() {
        let posts: Vec<Post> = (0..6)
            .map(|i| Post {
                title: format!("p{i}"),
                url: format!("https://i.example.com/{i}.gif"),
            })
            .collect();
        let widths = posts
            .iter()
            .enumerate()
            .map(|(i, post)| (post.url.clone(), 10 + i as u32))
            .collect();
        let pipeline = Pipeline::new(
            Arc::new(StaticListing(posts)),
            Arc::new(SlowImages { widths }),
        )
        .with_workers(6);
        let mut observer = RecordingObserver::default();

        let entries = pipeline.run("gifs", 6, &mut observer).unwrap();

        let titles: Vec<_> = entries.iter().map(|e| e.post.title.as_str()).collect();
        assert_eq!(titles, ["p0", "p1", "p2", "p3", "p4", "p5"]);
        assert_eq!(observer.rendered(), ["p0", "p1", "p2", "p3", "p4", "p5"]);
        assert!(entries.iter().all(|entry| entry.saved_to.is_none()));
    }

    #[test]
    fn save_failure_does_not_drop_entry() {
        let posts = vec![Post {
            title: "odd".into(),
            url: "https://i.example.com/odd.gif".into(),
        }];
        let widths = [(posts[0].url.clone(), 20)].into_iter().collect();
        let dir = tempdir().unwrap();
        // a regular file where the output directory should be
        let blocker = dir.path().join("imgDls");
        std::fs::write(&blocker, b"").unwrap();
        let pipeline = Pipeline::new(
            Arc::new(StaticListing(posts)),
            Arc::new(SlowImages { widths }),
        )
        .with_persister(Persister::new(storage::Options {
            output_dir: blocker,
        }));
        let mut observer = RecordingObserver::default();

        let entries = pipeline.run("gifs", 1, &mut observer).unwrap();

        assert_eq!(entries.len(), 1);
        assert!(entries[0].saved_to.is_none());
        assert!(matches!(
            observer.events.last(),
            Some(FeedEvent::SaveFailed { .. })
        ));
    }

    #[test]
    fn headless_output_lists_entries() {
        let entries = vec![FeedEntry {
            post: Post {
                title: "Desk".into(),
                url: "https://i.example.com/desk.png".into(),
            },
            image: DecodedImage {
                image: DynamicImage::ImageRgba8(RgbaImage::new(400, 300)),
                kind: ImageKind::Png,
            },
            saved_to: Some(PathBuf::from("imgDls/Desk.png")),
        }];
        let mut out = Vec::new();
        print_entries(&mut out, &entries).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Desk (400x300, png) -> imgDls/Desk.png\n"
        );
    }
}
