//! Process-lifetime capability service.
//!
//! Built once at startup and shared by every request. Each capability sits
//! behind its own semaphore, sized to the compute it owns (one accelerator
//! context means one permit), and every call is bounded by a timeout.

use crate::audio::wav;
use crate::capability::command::{CommandDescriber, CommandSynthesizer, SystemCommandRunner};
use crate::capability::fetch::HttpImageFetcher;
use crate::capability::{ImageDescriber, ImageFetcher, SpeechSynthesizer, StagedImage};
use crate::config::Config;
use crate::error::{PicvoiceError, Result, Stage};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Concurrency limits and deadlines for the capabilities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapabilityLimits {
    pub describe_concurrency: usize,
    pub synthesis_concurrency: usize,
    pub download_timeout: Duration,
    pub describe_timeout: Duration,
    pub synthesis_timeout: Duration,
}

impl CapabilityLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            describe_concurrency: config.caption.max_concurrent,
            synthesis_concurrency: config.synthesis.max_concurrent,
            download_timeout: config.caption.download_timeout(),
            describe_timeout: config.caption.timeout(),
            synthesis_timeout: config.synthesis.timeout(),
        }
    }
}

impl Default for CapabilityLimits {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Shared handle to the fetcher, describer and synthesizer.
#[derive(Clone)]
pub struct Capabilities {
    fetcher: Arc<dyn ImageFetcher>,
    describer: Arc<dyn ImageDescriber>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    describe_permits: Arc<Semaphore>,
    synthesis_permits: Arc<Semaphore>,
    limits: CapabilityLimits,
}

impl Capabilities {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        describer: Arc<dyn ImageDescriber>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        limits: CapabilityLimits,
    ) -> Self {
        Self {
            fetcher,
            describer,
            synthesizer,
            describe_permits: Arc::new(Semaphore::new(limits.describe_concurrency.max(1))),
            synthesis_permits: Arc::new(Semaphore::new(limits.synthesis_concurrency.max(1))),
            limits,
        }
    }

    /// Production wiring: reqwest downloads, external caption and TTS programs.
    pub fn from_config(config: &Config) -> Self {
        let runner = Arc::new(SystemCommandRunner::new());
        Self::new(
            Arc::new(HttpImageFetcher::new(config.caption.max_image_bytes)),
            Arc::new(CommandDescriber::new(runner.clone(), &config.caption)),
            Arc::new(CommandSynthesizer::new(runner, &config.synthesis)),
            CapabilityLimits::from_config(config),
        )
    }

    pub fn limits(&self) -> &CapabilityLimits {
        &self.limits
    }

    pub fn describer_name(&self) -> &str {
        self.describer.name()
    }

    pub fn synthesizer_name(&self) -> &str {
        self.synthesizer.name()
    }

    /// Download an image, bounded by the download timeout.
    pub async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        with_deadline(
            Stage::Download,
            self.limits.download_timeout,
            self.fetcher.fetch(url),
        )
        .await
    }

    /// Describe a staged image. Waiting for a permit counts toward the timeout.
    pub async fn describe(&self, image: &StagedImage) -> Result<String> {
        with_deadline(Stage::Description, self.limits.describe_timeout, async {
            let _permit = acquire(&self.describe_permits).await?;
            let caption = self.describer.describe(image).await?;
            let caption = caption.trim();
            if caption.is_empty() {
                return Err(PicvoiceError::Inference {
                    message: format!("{} returned an empty caption", self.describer.name()),
                });
            }
            Ok(caption.to_string())
        })
        .await
    }

    /// Synthesize `text` and check the result is playable WAV.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        with_deadline(Stage::Synthesis, self.limits.synthesis_timeout, async {
            let _permit = acquire(&self.synthesis_permits).await?;
            let audio = self.synthesizer.synthesize(text).await?;
            let info = wav::inspect(&audio)?;
            tracing::debug!(
                "Synthesized {:.2}s of audio at {} Hz with {}",
                info.duration_secs(),
                info.sample_rate,
                self.synthesizer.name()
            );
            Ok(audio)
        })
        .await
    }
}

async fn acquire(permits: &Semaphore) -> Result<tokio::sync::SemaphorePermit<'_>> {
    permits
        .acquire()
        .await
        .map_err(|_| PicvoiceError::Other("capability permits closed".to_string()))
}

async fn with_deadline<T>(
    stage: Stage,
    after: Duration,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(after, work)
        .await
        .map_err(|_| PicvoiceError::Timeout { stage, after })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ImageFormat;
    use crate::capability::mock::{MockDescriber, MockFetcher, MockSynthesizer};
    use async_trait::async_trait;
    use std::path::PathBuf;

    fn limits() -> CapabilityLimits {
        CapabilityLimits {
            describe_concurrency: 1,
            synthesis_concurrency: 1,
            download_timeout: Duration::from_secs(5),
            describe_timeout: Duration::from_secs(5),
            synthesis_timeout: Duration::from_secs(5),
        }
    }

    fn staged(path: PathBuf) -> StagedImage {
        StagedImage {
            url: "http://img/cat.png".to_string(),
            path,
            format: ImageFormat::Png,
        }
    }

    struct RawSynthesizer(Vec<u8>);

    #[async_trait]
    impl SpeechSynthesizer for RawSynthesizer {
        async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "raw"
        }
    }

    #[tokio::test]
    async fn test_synthesis_calls_are_serialized_by_default() {
        let synthesizer = Arc::new(MockSynthesizer::new().with_delay(Duration::from_millis(20)));
        let caps = Capabilities::new(
            Arc::new(MockFetcher::new()),
            Arc::new(MockDescriber::new()),
            synthesizer.clone(),
            limits(),
        );

        let tasks: Vec<_> = (0..6)
            .map(|i| {
                let caps = caps.clone();
                tokio::spawn(async move { caps.synthesize(&format!("line {i}")).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(synthesizer.calls(), 6);
        assert_eq!(synthesizer.peak_concurrency(), 1);
    }

    #[tokio::test]
    async fn test_synthesis_concurrency_follows_limit() {
        let synthesizer = Arc::new(MockSynthesizer::new().with_delay(Duration::from_millis(50)));
        let caps = Capabilities::new(
            Arc::new(MockFetcher::new()),
            Arc::new(MockDescriber::new()),
            synthesizer.clone(),
            CapabilityLimits {
                synthesis_concurrency: 3,
                ..limits()
            },
        );

        let tasks: Vec<_> = (0..9)
            .map(|i| {
                let caps = caps.clone();
                tokio::spawn(async move { caps.synthesize(&format!("line {i}")).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert!(synthesizer.peak_concurrency() <= 3);
    }

    #[tokio::test]
    async fn test_slow_synthesis_times_out() {
        let caps = Capabilities::new(
            Arc::new(MockFetcher::new()),
            Arc::new(MockDescriber::new()),
            Arc::new(MockSynthesizer::new().with_delay(Duration::from_secs(5))),
            CapabilityLimits {
                synthesis_timeout: Duration::from_millis(50),
                ..limits()
            },
        );

        let err = caps.synthesize("hello").await.unwrap_err();
        assert!(matches!(
            err,
            PicvoiceError::Timeout {
                stage: Stage::Synthesis,
                ..
            }
        ));
        assert!(!err.is_description_failure());
    }

    #[tokio::test]
    async fn test_slow_description_times_out_as_description_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cat.img");
        std::fs::write(&path, b"img").unwrap();

        let caps = Capabilities::new(
            Arc::new(MockFetcher::new()),
            Arc::new(MockDescriber::new().with_delay(Duration::from_secs(5))),
            Arc::new(MockSynthesizer::new()),
            CapabilityLimits {
                describe_timeout: Duration::from_millis(50),
                ..limits()
            },
        );

        let err = caps.describe(&staged(path)).await.unwrap_err();
        assert!(err.is_description_failure());
    }

    #[tokio::test]
    async fn test_slow_download_times_out() {
        let caps = Capabilities::new(
            Arc::new(
                MockFetcher::new()
                    .with_image("http://img/cat.png", b"img")
                    .with_delay(Duration::from_secs(5)),
            ),
            Arc::new(MockDescriber::new()),
            Arc::new(MockSynthesizer::new()),
            CapabilityLimits {
                download_timeout: Duration::from_millis(50),
                ..limits()
            },
        );

        let err = caps.fetch_image("http://img/cat.png").await.unwrap_err();
        assert!(matches!(
            err,
            PicvoiceError::Timeout {
                stage: Stage::Download,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_wav_from_synthesizer_is_rejected() {
        let caps = Capabilities::new(
            Arc::new(MockFetcher::new()),
            Arc::new(MockDescriber::new()),
            Arc::new(RawSynthesizer(b"not a wav file".to_vec())),
            limits(),
        );

        let err = caps.synthesize("hello").await.unwrap_err();
        assert!(matches!(err, PicvoiceError::Synthesis { .. }));
    }

    #[tokio::test]
    async fn test_blank_caption_is_inference_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cat.img");
        std::fs::write(&path, b"img").unwrap();

        let caps = Capabilities::new(
            Arc::new(MockFetcher::new()),
            Arc::new(MockDescriber::new().with_caption("   ")),
            Arc::new(MockSynthesizer::new()),
            limits(),
        );

        let err = caps.describe(&staged(path)).await.unwrap_err();
        assert!(matches!(err, PicvoiceError::Inference { .. }));
    }

    #[test]
    fn test_limits_follow_config() {
        let mut config = Config::default();
        config.synthesis.max_concurrent = 4;
        config.caption.timeout_secs = 7;

        let limits = CapabilityLimits::from_config(&config);
        assert_eq!(limits.synthesis_concurrency, 4);
        assert_eq!(limits.describe_timeout, Duration::from_secs(7));
    }
}
