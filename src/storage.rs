use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Frame, ImageFormat};

use crate::error::{Error, Result};
use crate::reddit::Post;

pub const DEFAULT_OUTPUT_DIR: &str = "imgDls";

#[derive(Debug, Clone)]
pub struct Options {
    pub output_dir: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

/// Writes images into a single output directory, one file per call.
pub struct Persister {
    dir: PathBuf,
}

impl Persister {
    pub fn new(opts: Options) -> Self {
        Self {
            dir: opts.output_dir,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Encodes `image` according to the extension of `file_name`. Existing
    /// files with the same name are overwritten.
    pub fn save(&self, image: &DynamicImage, file_name: &str) -> Result<PathBuf> {
        let format = format_for(file_name)?;
        fs::create_dir_all(&self.dir)
            .map_err(|err| Error::io("create directory", &self.dir, err))?;

        let path = self.dir.join(file_name);
        let file = File::create(&path).map_err(|err| Error::io("create file", &path, err))?;
        let mut writer = BufWriter::new(file);
        match format {
            ImageFormat::Jpeg => {
                // JPEG has no alpha channel
                let encoder = JpegEncoder::new(&mut writer);
                DynamicImage::ImageRgb8(image.to_rgb8())
                    .write_with_encoder(encoder)
                    .map_err(Error::Encode)?;
            }
            ImageFormat::Gif => {
                let mut encoder = GifEncoder::new(&mut writer);
                encoder
                    .encode_frame(Frame::new(image.to_rgba8()))
                    .map_err(Error::Encode)?;
            }
            _ => {
                image
                    .write_to(&mut writer, ImageFormat::Png)
                    .map_err(Error::Encode)?;
            }
        }
        writer
            .flush()
            .map_err(|err| Error::io("write file", &path, err))?;
        Ok(path)
    }
}

fn format_for(file_name: &str) -> Result<ImageFormat> {
    // text after the last dot, so a bare ".png" still counts
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
        "png" => Ok(ImageFormat::Png),
        "gif" => Ok(ImageFormat::Gif),
        _ => Err(Error::UnsupportedExtension(ext)),
    }
}

/// `<title with underscores><url extension>`, e.g. `My_desk.png`.
pub fn file_name_for(post: &Post) -> String {
    let stem: String = post
        .title
        .chars()
        .map(|ch| match ch {
            ' ' | '/' | '\\' => '_',
            other => other,
        })
        .collect();
    let ext = post
        .url
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.contains('/'))
        .unwrap_or_default();
    if ext.is_empty() {
        stem
    } else {
        format!("{stem}.{ext}")
    }
}
