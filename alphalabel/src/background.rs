//! Background removal strategies.
//!
//! Every strategy implements one contract, `bytes -> PNG bytes with alpha`,
//! and never touches its input. `ColorThreshold` is a pure pixel rule;
//! `LearnedMatting` hands the bytes to an external matting service over HTTP
//! with a per-request timeout.

use std::io::Cursor;
use std::time::Duration;

use anyhow::Result;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use log::debug;
use serde::Serialize;

use crate::batch::{DEFAULT_CHEAP_CONCURRENCY, DEFAULT_HEAVY_CONCURRENCY};
use crate::error::{ConfigurationError, ItemError};

/// Channel value above which a pixel counts as near-white background
pub const DEFAULT_WHITE_THRESHOLD: u8 = 240;
pub const DEFAULT_MATTING_TIMEOUT_SECS: u64 = 120;

/// Pluggable background removal capability
pub trait BackgroundRemover: Send + Sync {
    /// Short strategy name for logs and metadata
    fn name(&self) -> &'static str;

    /// Produce a PNG with inferred transparency from encoded image bytes
    fn remove(&self, input: &[u8]) -> Result<Vec<u8>, ItemError>;
}

/// Mark every pixel whose R, G and B all exceed `threshold` as fully transparent.
/// Other pixels keep their original alpha.
pub fn apply_color_threshold(img: &DynamicImage, threshold: u8) -> RgbaImage {
    let mut rgba = img.to_rgba8();
    for pixel in rgba.pixels_mut() {
        let Rgba([r, g, b, a]) = *pixel;
        let background = r > threshold && g > threshold && b > threshold;
        *pixel = Rgba([r, g, b, if background { 0 } else { a }]);
    }
    rgba
}

/// Encode an RGBA image as PNG bytes
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, ItemError> {
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(|e| ItemError::Transform(format!("failed to encode PNG: {e}")))?;
    Ok(buffer)
}

#[derive(Debug, Clone)]
pub struct ColorThresholdRemover {
    pub threshold: u8,
}

impl BackgroundRemover for ColorThresholdRemover {
    fn name(&self) -> &'static str {
        "color-threshold"
    }

    fn remove(&self, input: &[u8]) -> Result<Vec<u8>, ItemError> {
        let img = image::load_from_memory(input)?;
        encode_png(&apply_color_threshold(&img, self.threshold))
    }
}

/// Client for an external matting service: POST raw bytes, receive an image with alpha
pub struct LearnedMattingRemover {
    endpoint: String,
    timeout: Duration,
    client: reqwest::blocking::Client,
}

impl LearnedMattingRemover {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            timeout,
            client,
        })
    }
}

impl BackgroundRemover for LearnedMattingRemover {
    fn name(&self) -> &'static str {
        "learned-matting"
    }

    fn remove(&self, input: &[u8]) -> Result<Vec<u8>, ItemError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(input.to_vec())
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    ItemError::Transform(format!(
                        "matting service timed out after {}s",
                        self.timeout.as_secs()
                    ))
                } else {
                    ItemError::Transform(format!("matting request failed: {e}"))
                }
            })?;

        let status = response.status();
        debug!("📡 Matting response status: {status}");
        if !status.is_success() {
            return Err(ItemError::Transform(format!(
                "matting service returned status {status}"
            )));
        }

        let body = response.bytes().map_err(|e| {
            if e.is_timeout() {
                ItemError::Transform(format!(
                    "matting service timed out after {}s",
                    self.timeout.as_secs()
                ))
            } else {
                ItemError::Transform(format!("failed to read matting response: {e}"))
            }
        })?;

        // Re-encode so every masked image lands on disk as RGBA PNG
        let matted = image::load_from_memory(&body)
            .map_err(|e| ItemError::Transform(format!("corrupt matting output: {e}")))?;
        encode_png(&matted.to_rgba8())
    }
}

/// Strategy selection, as carried in configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RemovalStrategy {
    ColorThreshold { threshold: u8 },
    LearnedMatting { endpoint: String, timeout_secs: u64 },
}

impl RemovalStrategy {
    pub fn build(&self) -> Result<Box<dyn BackgroundRemover>> {
        match self {
            RemovalStrategy::ColorThreshold { threshold } => Ok(Box::new(ColorThresholdRemover {
                threshold: *threshold,
            })),
            RemovalStrategy::LearnedMatting {
                endpoint,
                timeout_secs,
            } => {
                if endpoint.trim().is_empty() {
                    return Err(ConfigurationError::MissingMattingEndpoint.into());
                }
                Ok(Box::new(LearnedMattingRemover::new(
                    endpoint,
                    Duration::from_secs(*timeout_secs),
                )?))
            }
        }
    }

    /// Expensive strategies get a smaller pool and resume from existing outputs
    pub fn is_expensive(&self) -> bool {
        matches!(self, RemovalStrategy::LearnedMatting { .. })
    }

    pub fn default_concurrency(&self) -> usize {
        if self.is_expensive() {
            DEFAULT_HEAVY_CONCURRENCY
        } else {
            DEFAULT_CHEAP_CONCURRENCY
        }
    }

    /// Progress sampling interval, in completed items
    pub fn report_every(&self) -> usize {
        if self.is_expensive() {
            10
        } else {
            100
        }
    }
}
