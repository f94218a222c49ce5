//! External capabilities: image download, image description, speech synthesis.
//!
//! The request pipeline only sees these traits. Real backends live in
//! [`fetch`] and [`command`]; [`mock`] provides deterministic stand-ins.

pub mod command;
pub mod fetch;
pub mod mock;
pub mod service;

use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

pub use service::Capabilities;

/// Downloads the image behind a URL.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Fetch the raw bytes. Failures are `Download` errors.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// An image buffered in the staging area, ready to describe.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedImage {
    /// Where the image came from.
    pub url: String,
    /// Staged copy on disk.
    pub path: PathBuf,
    pub format: ImageFormat,
}

/// Turns an image into caption text.
#[async_trait]
pub trait ImageDescriber: Send + Sync {
    /// Describe the staged image. Failures are `Decode` or `Inference` errors.
    async fn describe(&self, image: &StagedImage) -> Result<String>;

    /// Human-readable backend name for logs.
    fn name(&self) -> &str;
}

/// Turns text into WAV audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` into a complete WAV file. Failures are `Synthesis` errors.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;

    /// Human-readable backend name for logs.
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: ImageFetcher + ?Sized> ImageFetcher for Arc<T> {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        (**self).fetch(url).await
    }
}

#[async_trait]
impl<T: ImageDescriber + ?Sized> ImageDescriber for Arc<T> {
    async fn describe(&self, image: &StagedImage) -> Result<String> {
        (**self).describe(image).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl<T: SpeechSynthesizer + ?Sized> SpeechSynthesizer for Arc<T> {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        (**self).synthesize(text).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Image container formats recognised by their leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    WebP,
    Bmp,
    Tiff,
}

impl ImageFormat {
    /// Identify the format from a byte prefix.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

        if bytes.starts_with(PNG) {
            Some(ImageFormat::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(ImageFormat::Gif)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(ImageFormat::WebP)
        } else if bytes.starts_with(b"BM") && bytes.len() >= 14 {
            Some(ImageFormat::Bmp)
        } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
            Some(ImageFormat::Tiff)
        } else {
            None
        }
    }
}
