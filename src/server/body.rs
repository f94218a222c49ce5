//! Response body that carries a request's cleanup guard.

use crate::handler::{CleanupGuard, Delivery};
use axum::body::{Body, Bytes};
use futures_util::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Single-chunk body stream holding a [`CleanupGuard`].
///
/// The guard is released once the stream has yielded its chunk and been
/// polled to the end, or when hyper drops the body (client gone). Either way
/// cleanup is scheduled only after the connection no longer needs the bytes.
pub struct GuardedBody {
    chunk: Option<Bytes>,
    guard: Option<CleanupGuard>,
}

impl GuardedBody {
    pub fn new(audio: Vec<u8>, guard: CleanupGuard) -> Self {
        Self {
            chunk: Some(Bytes::from(audio)),
            guard: Some(guard),
        }
    }

    pub fn from_delivery(delivery: Delivery) -> Self {
        let (audio, guard) = delivery.into_parts();
        Self::new(audio, guard)
    }

    pub fn into_body(self) -> Body {
        Body::from_stream(self)
    }
}

impl Stream for GuardedBody {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.chunk.take() {
            Some(chunk) => Poll::Ready(Some(Ok(chunk))),
            None => {
                self.guard.take();
                Poll::Ready(None)
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::from(self.chunk.is_some());
        (n, Some(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{Area, AreaManager, Areas, RequestId};
    use crate::cleanup::{CleanupCoordinator, CleanupTask, CleanupWorkers};
    use crate::config::CleanupConfig;
    use futures_util::StreamExt;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_cleanup_waits_for_body_to_finish() {
        let dir = TempDir::new().unwrap();
        let areas = Areas {
            staging: Arc::new(
                AreaManager::open(Area::Staging, dir.path().join("temp"), 8, false).unwrap(),
            ),
            output: Arc::new(
                AreaManager::open(Area::Output, dir.path().join("output"), 8, false).unwrap(),
            ),
        };
        let (scheduler, workers) = CleanupWorkers::spawn(
            CleanupCoordinator::new(areas.clone()),
            &CleanupConfig::default(),
        )
        .unwrap();

        let artifact = areas.output.allocate(RequestId::new()).unwrap();
        areas.output.write(&artifact, b"RIFF").unwrap();
        let mut guard = CleanupGuard::new(scheduler.clone());
        guard.push(CleanupTask::delete(artifact.clone()));

        let mut body = GuardedBody::new(b"RIFF".to_vec(), guard);

        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"RIFF"));
        assert_eq!(scheduler.stats().scheduled, 0);

        assert!(body.next().await.is_none());
        assert_eq!(scheduler.stats().scheduled, 1);

        scheduler.wait_idle().await;
        assert!(!artifact.path().exists());
        workers.shutdown().unwrap();
    }
}
