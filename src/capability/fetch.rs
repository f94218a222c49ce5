//! HTTP image download.

use crate::capability::ImageFetcher;
use crate::error::{PicvoiceError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;

/// Downloads images with reqwest, capping the body size.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpImageFetcher {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            max_bytes,
        }
    }

    /// Use an existing client (shared connection pool, custom TLS, ...).
    pub fn with_client(client: reqwest::Client, max_bytes: u64) -> Self {
        Self { client, max_bytes }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let download_error = |message: String| PicvoiceError::Download {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| download_error(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(download_error(format!("server answered {}", response.status())));
        }

        if let Some(length) = response.content_length()
            && length > self.max_bytes
        {
            return Err(download_error(format!(
                "image is {length} bytes, limit is {}",
                self.max_bytes
            )));
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| download_error(format!("failed to read body: {e}")))?;
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(download_error(format!(
                    "image exceeds limit of {} bytes",
                    self.max_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }

        if body.is_empty() {
            return Err(download_error("empty response body".to_string()));
        }

        Ok(body)
    }
}
