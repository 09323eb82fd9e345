use std::fmt;
use std::time::Duration;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;

use crate::error::{Error, Result};

pub const DEFAULT_MAX_WIDTH: u32 = 400;

// Anchored at the very end: a trailing query or fragment is a miss.
static IMAGE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(gif|jpeg|jpg|png)$").expect("image url pattern"));

pub fn is_image_url(url: &str) -> bool {
    IMAGE_URL.is_match(url)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
}

impl ImageKind {
    fn from_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(ImageKind::Jpeg),
            ImageFormat::Png => Some(ImageKind::Png),
            ImageFormat::Gif => Some(ImageKind::Gif),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpeg",
            ImageKind::Png => "png",
            ImageKind::Gif => "gif",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub image: DynamicImage,
    pub kind: ImageKind,
}

impl DecodedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Sniffs the format from the bytes themselves, never from the URL.
pub fn decode(bytes: &[u8]) -> Result<DecodedImage> {
    let format = image::guess_format(bytes).map_err(Error::Decode)?;
    let kind = ImageKind::from_format(format)
        .ok_or_else(|| Error::UnsupportedFormat(format!("{format:?}").to_lowercase()))?;
    let image = image::load_from_memory_with_format(bytes, format).map_err(Error::Decode)?;
    Ok(DecodedImage { image, kind })
}

/// Downscales to `max_width` keeping the aspect ratio. Narrower images come
/// back untouched.
pub fn resize(decoded: DecodedImage, max_width: u32) -> DecodedImage {
    let width = decoded.width();
    if width <= max_width {
        return decoded;
    }
    let ratio = f64::from(max_width) / f64::from(width);
    let new_width = ((f64::from(width) * ratio).round() as u32).max(1);
    let new_height = ((f64::from(decoded.height()) * ratio).round() as u32).max(1);
    log::debug!(
        "resizing {}x{} to {}x{}",
        width,
        decoded.height(),
        new_width,
        new_height
    );
    DecodedImage {
        image: decoded
            .image
            .resize_exact(new_width, new_height, FilterType::CatmullRom),
        kind: decoded.kind,
    }
}

pub trait ImageSource: Send + Sync {
    fn fetch(&self, url: &str) -> Result<DecodedImage>;
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<Client>,
}

pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(cfg: Config) -> Result<Self> {
        let client = match cfg.http_client {
            Some(client) => client,
            None => {
                let mut builder =
                    Client::builder().timeout(cfg.timeout.unwrap_or(Duration::from_secs(30)));
                if !cfg.user_agent.trim().is_empty() {
                    builder = builder.user_agent(cfg.user_agent);
                }
                builder
                    .build()
                    .map_err(|err| Error::transport("media client", err))?
            }
        };
        Ok(Self { client })
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| Error::transport(url, err))?;
        if !response.status().is_success() {
            return Err(Error::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        let bytes = response
            .bytes()
            .map_err(|err| Error::transport(url, err))?;
        Ok(bytes.to_vec())
    }
}

impl ImageSource for Fetcher {
    fn fetch(&self, url: &str) -> Result<DecodedImage> {
        let bytes = self.fetch_bytes(url)?;
        let decoded = decode(&bytes)?;
        log::debug!("image format: {} ({})", decoded.kind, url);
        Ok(decoded)
    }
}
