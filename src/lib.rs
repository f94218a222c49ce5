//! picvoice - speak images and text over HTTP
//!
//! `POST /tts` turns an image URL (captioned first) or plain text into WAV
//! audio. Every file a request creates is an artifact owned by that request
//! and released only by that request's own deferred cleanup.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod artifact;
pub mod audio;
pub mod capability;
pub mod cleanup;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
#[cfg(feature = "cli")]
pub mod diagnostics;
pub mod error;
pub mod handler;
pub mod request;
pub mod server;

// Artifacts and areas
pub use artifact::{Area, AreaManager, Areas, Artifact, ArtifactId, ArtifactNamer, RequestId};

// Capabilities (fetch → describe → synthesize)
pub use capability::{Capabilities, ImageDescriber, ImageFetcher, SpeechSynthesizer, StagedImage};

// Cleanup pipeline
pub use cleanup::{
    CleanupCoordinator, CleanupOutcome, CleanupScheduler, CleanupStats, CleanupTask,
    CleanupWorkers,
};

// Request flow
pub use handler::{CleanupGuard, Delivery, RequestHandler};
pub use request::TtsRequest;

// Error handling
pub use error::{PicvoiceError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_has_short_hash_when_built_in_git() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            let hash_part = ver.split('+').nth(1).unwrap_or("");
            assert_eq!(hash_part.len(), 7, "Git hash should be 7 chars, got: {}", ver);
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
