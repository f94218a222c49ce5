//! Per-request orchestration.
//!
//! A request runs strictly in sequence: (image only) allocate staging, fetch,
//! stage, describe; synthesize; allocate output, write, read back; deliver.
//! Every artifact a request allocates is registered with its
//! [`CleanupGuard`] the moment it is reserved, so no exit path can leak one.

use crate::artifact::{AreaManager, Areas, Artifact, RequestId};
use crate::capability::{Capabilities, ImageFormat, StagedImage};
use crate::cleanup::{CleanupScheduler, CleanupTask};
use crate::error::{PicvoiceError, Result};
use crate::request::TtsRequest;
use std::sync::Arc;
use tracing::Instrument;

/// Cleanup tasks owned by one request, scheduled when the guard drops.
///
/// On success the guard travels inside the HTTP response body, so it drops
/// only after the body has been handed to the connection. On any error it
/// drops as the handler returns.
#[derive(Debug)]
pub struct CleanupGuard {
    scheduler: CleanupScheduler,
    tasks: Vec<CleanupTask>,
}

impl CleanupGuard {
    pub fn new(scheduler: CleanupScheduler) -> Self {
        Self {
            scheduler,
            tasks: Vec::new(),
        }
    }

    pub fn push(&mut self, task: CleanupTask) {
        self.tasks.push(task);
    }

    pub fn tasks(&self) -> &[CleanupTask] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            self.scheduler.schedule(task);
        }
    }
}

/// A completed request: the audio plus the cleanup it still owes.
#[derive(Debug)]
pub struct Delivery {
    pub request_id: RequestId,
    /// Text that was synthesized.
    pub spoken_text: String,
    /// True when the image could not be described.
    pub used_fallback: bool,
    /// The output artifact the audio was read from.
    pub output: Artifact,
    pub audio: Vec<u8>,
    guard: CleanupGuard,
}

impl Delivery {
    pub fn guard(&self) -> &CleanupGuard {
        &self.guard
    }

    /// Split into the response bytes and the guard that must outlive them.
    pub fn into_parts(self) -> (Vec<u8>, CleanupGuard) {
        (self.audio, self.guard)
    }
}

/// Runs `/tts` requests against the shared areas and capabilities.
pub struct RequestHandler {
    areas: Areas,
    capabilities: Capabilities,
    scheduler: CleanupScheduler,
    fallback_text: String,
}

impl RequestHandler {
    pub fn new(
        areas: Areas,
        capabilities: Capabilities,
        scheduler: CleanupScheduler,
        fallback_text: impl Into<String>,
    ) -> Self {
        Self {
            areas,
            capabilities,
            scheduler,
            fallback_text: fallback_text.into(),
        }
    }

    pub fn areas(&self) -> &Areas {
        &self.areas
    }

    pub fn scheduler(&self) -> &CleanupScheduler {
        &self.scheduler
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn fallback_text(&self) -> &str {
        &self.fallback_text
    }

    /// Handle one request end to end.
    pub async fn handle(&self, request: TtsRequest) -> Result<Delivery> {
        let request_id = RequestId::new();
        let span = tracing::info_span!("request", request_id = %request_id, kind = request.kind());
        self.run(request_id, request).instrument(span).await
    }

    async fn run(&self, request_id: RequestId, request: TtsRequest) -> Result<Delivery> {
        let mut guard = CleanupGuard::new(self.scheduler.clone());

        let (spoken_text, used_fallback) = match request {
            TtsRequest::Text { text } => (text, false),
            TtsRequest::Image { image_url } => {
                self.resolve_caption(request_id, &image_url, &mut guard)
                    .await?
            }
        };

        let audio = self.capabilities.synthesize(&spoken_text).await?;

        // Reserve and register in one step; the future may be dropped at any await.
        let output = self.areas.output.allocate(request_id)?;
        guard.push(CleanupTask::delete(output.clone()));

        let audio = blocking({
            let area = self.areas.output.clone();
            let artifact = output.clone();
            move || {
                area.write(&artifact, &audio)?;
                area.read(&artifact)
            }
        })
        .await?;

        tracing::info!(
            "Delivering {} bytes from {}{}",
            audio.len(),
            output,
            if used_fallback { " (fallback caption)" } else { "" }
        );

        Ok(Delivery {
            request_id,
            spoken_text,
            used_fallback,
            output,
            audio,
            guard,
        })
    }

    /// Caption an image, falling back to the configured phrase when the
    /// image cannot be fetched, decoded or described.
    async fn resolve_caption(
        &self,
        request_id: RequestId,
        image_url: &str,
        guard: &mut CleanupGuard,
    ) -> Result<(String, bool)> {
        let staged = self.areas.staging.allocate(request_id)?;
        guard.push(CleanupTask::delete(staged.clone()));

        match self.describe(&self.areas.staging, &staged, image_url).await {
            Ok(caption) => {
                tracing::debug!("Caption: {}", caption);
                Ok((caption, false))
            }
            Err(e) if e.is_description_failure() => {
                tracing::warn!("Could not describe {}: {}", image_url, e);
                Ok((self.fallback_text.clone(), true))
            }
            Err(e) => Err(e),
        }
    }

    async fn describe(
        &self,
        staging_area: &Arc<AreaManager>,
        staged: &Artifact,
        image_url: &str,
    ) -> Result<String> {
        let bytes = self.capabilities.fetch_image(image_url).await?;
        let format = ImageFormat::sniff(&bytes).ok_or_else(|| PicvoiceError::Decode {
            message: format!("unrecognized image format ({} bytes)", bytes.len()),
        })?;

        blocking({
            let area = staging_area.clone();
            let artifact = staged.clone();
            move || area.write(&artifact, &bytes)
        })
        .await?;

        let image = StagedImage {
            url: image_url.to_string(),
            path: staged.path().to_path_buf(),
            format,
        };
        self.capabilities.describe(&image).await
    }
}

/// Run blocking area I/O off the async executor.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PicvoiceError::Other(format!("blocking task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{Area, AreaManager};
    use crate::capability::mock::{MockDescriber, MockFetcher, MockSynthesizer, PNG_BYTES};
    use crate::capability::service::CapabilityLimits;
    use crate::cleanup::{CleanupCoordinator, CleanupWorkers};
    use crate::config::CleanupConfig;
    use crate::defaults;
    use futures_util::FutureExt;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        handler: RequestHandler,
        synthesizer: Arc<MockSynthesizer>,
        workers: CleanupWorkers,
    }

    fn fixture(fetcher: MockFetcher, describer: MockDescriber, synthesizer: MockSynthesizer) -> Fixture {
        fixture_with_limit(fetcher, describer, synthesizer, 64)
    }

    fn fixture_with_limit(
        fetcher: MockFetcher,
        describer: MockDescriber,
        synthesizer: MockSynthesizer,
        max_live: usize,
    ) -> Fixture {
        let dir = TempDir::new().unwrap();
        let areas = Areas {
            staging: Arc::new(
                AreaManager::open(Area::Staging, dir.path().join("temp"), max_live, false).unwrap(),
            ),
            output: Arc::new(
                AreaManager::open(Area::Output, dir.path().join("output"), max_live, false)
                    .unwrap(),
            ),
        };
        let synthesizer = Arc::new(synthesizer);
        let capabilities = Capabilities::new(
            Arc::new(fetcher),
            Arc::new(describer),
            synthesizer.clone(),
            CapabilityLimits {
                describe_concurrency: 1,
                synthesis_concurrency: 1,
                download_timeout: Duration::from_secs(5),
                describe_timeout: Duration::from_secs(5),
                synthesis_timeout: Duration::from_secs(5),
            },
        );
        let (scheduler, workers) = CleanupWorkers::spawn(
            CleanupCoordinator::new(areas.clone()),
            &CleanupConfig::default(),
        )
        .unwrap();
        Fixture {
            _dir: dir,
            handler: RequestHandler::new(areas, capabilities, scheduler, defaults::FALLBACK_CAPTION),
            synthesizer,
            workers,
        }
    }

    #[tokio::test]
    async fn test_text_request_skips_staging() {
        let f = fixture(MockFetcher::new(), MockDescriber::new(), MockSynthesizer::new());

        let delivery = f
            .handler
            .handle(TtsRequest::Text {
                text: "hello world".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(delivery.spoken_text, "hello world");
        assert!(!delivery.used_fallback);
        assert_eq!(delivery.audio, MockSynthesizer::render("hello world", 16000).unwrap());
        assert_eq!(delivery.guard().len(), 1);
        assert_eq!(f.handler.areas().staging.allocated_total(), 0);
        assert!(delivery.output.path().exists());

        drop(delivery);
        f.handler.scheduler().wait_idle().await;
        assert_eq!(f.handler.areas().output.live_count(), 0);
        f.workers.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_image_request_speaks_caption() {
        let f = fixture(
            MockFetcher::new().with_image("http://img/cat.png", PNG_BYTES),
            MockDescriber::new().with_caption("a cat on a sofa"),
            MockSynthesizer::new(),
        );

        let delivery = f
            .handler
            .handle(TtsRequest::Image {
                image_url: "http://img/cat.png".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(delivery.spoken_text, "a cat on a sofa");
        assert!(!delivery.used_fallback);
        assert_eq!(delivery.guard().len(), 2);
        assert_eq!(f.handler.areas().staging.live_count(), 1);

        drop(delivery);
        f.handler.scheduler().wait_idle().await;
        assert_eq!(f.handler.areas().staging.live_count(), 0);
        assert_eq!(f.handler.areas().output.live_count(), 0);
        f.workers.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_image_speaks_fallback() {
        let f = fixture(MockFetcher::new(), MockDescriber::new(), MockSynthesizer::new());

        let delivery = f
            .handler
            .handle(TtsRequest::Image {
                image_url: "http://unreachable.invalid/x.png".to_string(),
            })
            .await
            .unwrap();

        assert!(delivery.used_fallback);
        assert_eq!(delivery.spoken_text, "Error While Reading The Image");
        assert_eq!(f.synthesizer.spoken(), vec!["Error While Reading The Image"]);
        f.workers.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_non_image_bytes_speak_fallback() {
        let f = fixture(
            MockFetcher::new().with_image("http://img/page", b"<html>not an image</html>"),
            MockDescriber::new(),
            MockSynthesizer::new(),
        );

        let delivery = f
            .handler
            .handle(TtsRequest::Image {
                image_url: "http://img/page".to_string(),
            })
            .await
            .unwrap();

        assert!(delivery.used_fallback);
        f.workers.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_describer_failure_speaks_fallback() {
        let f = fixture(
            MockFetcher::new().with_image("http://img/cat.png", PNG_BYTES),
            MockDescriber::new().with_failure(),
            MockSynthesizer::new(),
        );

        let delivery = f
            .handler
            .handle(TtsRequest::Image {
                image_url: "http://img/cat.png".to_string(),
            })
            .await
            .unwrap();

        assert!(delivery.used_fallback);
        assert_eq!(delivery.spoken_text, defaults::FALLBACK_CAPTION);
        f.workers.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_synthesis_failure_is_terminal_and_cleans_up() {
        let f = fixture(
            MockFetcher::new().with_image("http://img/cat.png", PNG_BYTES),
            MockDescriber::new(),
            MockSynthesizer::new().with_failure(),
        );

        let err = f
            .handler
            .handle(TtsRequest::Image {
                image_url: "http://img/cat.png".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PicvoiceError::Synthesis { .. }));
        f.handler.scheduler().wait_idle().await;
        assert_eq!(f.handler.areas().staging.live_count(), 0);
        assert_eq!(f.handler.areas().output.allocated_total(), 0);
        f.workers.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_dropped_request_releases_its_staging_slot() {
        let f = fixture_with_limit(
            MockFetcher::new()
                .with_image("http://img/cat.png", PNG_BYTES)
                .with_delay(Duration::from_millis(200)),
            MockDescriber::new(),
            MockSynthesizer::new(),
            1,
        );
        let request = || TtsRequest::Image {
            image_url: "http://img/cat.png".to_string(),
        };

        // One poll parks the request inside the fetch; dropping it abandons the request.
        assert!(f.handler.handle(request()).now_or_never().is_none());
        f.handler.scheduler().wait_idle().await;

        assert_eq!(f.handler.areas().staging.allocated_total(), 1);
        assert_eq!(f.handler.areas().staging.live_count(), 0);

        let delivery = f.handler.handle(request()).await.unwrap();
        assert!(!delivery.used_fallback);
        drop(delivery);
        f.handler.scheduler().wait_idle().await;
        f.workers.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_dropped_request_leaves_no_output_file() {
        let f = fixture_with_limit(
            MockFetcher::new(),
            MockDescriber::new(),
            MockSynthesizer::new(),
            1,
        );

        for i in 0..20 {
            let request = TtsRequest::Text {
                text: format!("abandoned {i}"),
            };
            drop(f.handler.handle(request).now_or_never());
            f.handler.scheduler().wait_idle().await;
        }
        // Let any in-flight blocking writes finish.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let output = f.handler.areas().output.clone();
        assert_eq!(output.live_count(), 0);
        assert_eq!(std::fs::read_dir(output.root()).unwrap().count(), 0);

        let delivery = f
            .handler
            .handle(TtsRequest::Text {
                text: "kept".to_string(),
            })
            .await
            .unwrap();
        assert!(delivery.output.path().exists());
        drop(delivery);
        f.handler.scheduler().wait_idle().await;
        f.workers.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_guard_schedules_on_drop() {
        let f = fixture(MockFetcher::new(), MockDescriber::new(), MockSynthesizer::new());
        let area = f.handler.areas().output.clone();
        let artifact = area.allocate(RequestId::new()).unwrap();
        area.write(&artifact, b"wav").unwrap();

        {
            let mut guard = CleanupGuard::new(f.handler.scheduler().clone());
            guard.push(CleanupTask::delete(artifact.clone()));
            assert!(!guard.is_empty());
        }

        f.handler.scheduler().wait_idle().await;
        assert!(!artifact.path().exists());
        assert_eq!(f.handler.scheduler().stats().completed, 1);
        f.workers.shutdown().unwrap();
    }
}
