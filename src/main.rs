use std::path::PathBuf;

use clap::{ArgAction, Parser};
use reddit_image_feed::{app, config, error};

#[derive(Parser, Debug)]
#[command(name = "reddit-image-feed", version)]
#[command(about = "Reddit Image Feed - browse the image posts of a subreddit from the terminal.")]
struct Cli {
    /// Name of the subreddit to fetch images from [default: archlinux]
    #[arg(long)]
    subreddit: Option<String>,

    /// Save displayed images to the output directory
    #[arg(long, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    download: Option<bool>,

    /// Number of posts to fetch [default: 25]
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    limit: Option<u32>,

    /// Directory downloaded images are written to [default: imgDls]
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Images wider than this are scaled down [default: 400]
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_width: Option<u32>,

    /// Number of parallel image downloads [default: 4]
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    workers: Option<u32>,

    /// Config file to read instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the feed instead of opening the viewer
    #[arg(long)]
    headless: bool,
}

impl Cli {
    fn apply(&self, cfg: &mut config::Config) {
        if let Some(subreddit) = &self.subreddit {
            cfg.reddit.subreddit = subreddit.clone();
        }
        if let Some(limit) = self.limit {
            cfg.reddit.limit = limit as usize;
        }
        if let Some(download) = self.download {
            cfg.storage.download = download;
        }
        if let Some(dir) = &self.output_dir {
            cfg.storage.output_dir = dir.clone();
        }
        if let Some(max_width) = self.max_width {
            cfg.media.max_width = max_width;
        }
        if let Some(workers) = self.workers {
            cfg.media.workers = workers as usize;
        }
    }
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(exit_code(&err));
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut cfg = config::load(config::LoadOptions {
        config_file: cli.config.clone(),
        env_prefix: None,
    })?;
    cli.apply(&mut cfg);
    anyhow::ensure!(cfg.reddit.limit > 0, "limit must be at least 1");

    app::run(
        cfg,
        app::RunOptions {
            headless: cli.headless,
        },
    )
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<error::Error>())
        .map(|err| err.kind().exit_code())
        .unwrap_or(1)
}
