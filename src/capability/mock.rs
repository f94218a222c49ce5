//! Deterministic capabilities for tests and dry runs.

use crate::audio::wav;
use crate::capability::{ImageDescriber, ImageFetcher, SpeechSynthesizer, StagedImage};
use crate::error::{PicvoiceError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A minimal valid PNG signature plus IHDR tag, enough for format sniffing.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01\x08\x02\0\0\0";

/// Tracks how many calls overlap.
#[derive(Debug, Default)]
struct Concurrency {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl Concurrency {
    fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fetcher serving canned bodies per URL; unknown URLs fail like an unreachable host.
#[derive(Debug, Default)]
pub struct MockFetcher {
    images: Mutex<HashMap<String, Vec<u8>>>,
    delay: Duration,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `bytes` for `url`.
    pub fn with_image(self, url: &str, bytes: &[u8]) -> Self {
        if let Ok(mut images) = self.images.lock() {
            images.insert(url.to_string(), bytes.to_vec());
        }
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl ImageFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let found = self
            .images
            .lock()
            .map_err(|_| PicvoiceError::Other("mock fetcher lock poisoned".to_string()))?
            .get(url)
            .cloned();
        found.ok_or_else(|| PicvoiceError::Download {
            url: url.to_string(),
            message: "connection refused".to_string(),
        })
    }
}

/// Describer answering with a fixed caption.
///
/// Fails with `Decode` if the staged file vanished while it was "looking" at
/// it, which is how tests catch cross-request deletion.
#[derive(Debug)]
pub struct MockDescriber {
    caption: String,
    should_fail: bool,
    delay: Duration,
    concurrency: Concurrency,
}

impl MockDescriber {
    pub fn new() -> Self {
        Self {
            caption: "a photo of a cat".to_string(),
            should_fail: false,
            delay: Duration::ZERO,
            concurrency: Concurrency::default(),
        }
    }

    pub fn with_caption(mut self, caption: &str) -> Self {
        self.caption = caption.to_string();
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.concurrency.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.concurrency.peak.load(Ordering::SeqCst)
    }
}

impl Default for MockDescriber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageDescriber for MockDescriber {
    async fn describe(&self, image: &StagedImage) -> Result<String> {
        self.concurrency.enter();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        // The staged file must still be there for the whole call.
        let readable = tokio::fs::metadata(&image.path).await.is_ok();
        self.concurrency.exit();

        if !readable {
            return Err(PicvoiceError::Decode {
                message: format!("staged image {} disappeared", image.path.display()),
            });
        }
        if self.should_fail {
            return Err(PicvoiceError::Inference {
                message: "mock description failure".to_string(),
            });
        }
        Ok(self.caption.clone())
    }

    fn name(&self) -> &str {
        "mock-describer"
    }
}

/// Synthesizer producing a short WAV whose samples encode the input text.
///
/// Identical text always yields identical bytes, and different text yields
/// different bytes, which makes cross-talk between requests detectable.
#[derive(Debug)]
pub struct MockSynthesizer {
    sample_rate: u32,
    should_fail: bool,
    delay: Duration,
    concurrency: Concurrency,
    spoken: Mutex<Vec<String>>,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self {
            sample_rate: 16000,
            should_fail: false,
            delay: Duration::ZERO,
            concurrency: Concurrency::default(),
            spoken: Mutex::new(Vec::new()),
        }
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Texts synthesized so far, in call order.
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.concurrency.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.concurrency.peak.load(Ordering::SeqCst)
    }

    /// The exact bytes `synthesize(text)` returns on success.
    pub fn render(text: &str, sample_rate: u32) -> Result<Vec<u8>> {
        let mut samples: Vec<i16> = text.bytes().map(|b| i16::from(b) * 64).collect();
        // Pad to at least 10ms so even a single character is audible.
        let min_len = (sample_rate / 100) as usize;
        if samples.len() < min_len {
            samples.resize(min_len, 0);
        }
        wav::encode_pcm16(&samples, sample_rate)
    }
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.concurrency.enter();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.concurrency.exit();

        if let Ok(mut spoken) = self.spoken.lock() {
            spoken.push(text.to_string());
        }

        if self.should_fail {
            return Err(PicvoiceError::Synthesis {
                message: "mock synthesis failure".to_string(),
            });
        }
        Self::render(text, self.sample_rate)
    }

    fn name(&self) -> &str {
        "mock-synthesizer"
    }
}
