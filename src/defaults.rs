//! Default configuration constants for picvoice.
//!
//! Shared by the config types and the request pipeline so the values
//! live in one place.

/// Text spoken back to the caller when an image cannot be described.
pub const FALLBACK_CAPTION: &str = "Error While Reading The Image";

/// Default bind address.
pub const HOST: &str = "127.0.0.1";

/// Default HTTP port.
pub const PORT: u16 = 5555;

/// Directory buffering downloaded images before description.
pub const STAGING_DIR: &str = "temp";

/// Directory holding synthesized audio until it has been delivered.
pub const OUTPUT_DIR: &str = "output";

/// Maximum number of live artifacts per area before allocation is refused.
pub const MAX_LIVE_ARTIFACTS: usize = 1024;

/// Image captioning model passed to the caption program.
pub const CAPTION_MODEL: &str = "nlpconnect/vit-gpt2-image-captioning";

/// Speech synthesis checkpoint.
pub const TTS_CHECKPOINT: &str = "model/ttsmodel.pth";

/// Speech synthesis model config.
pub const TTS_CONFIG: &str = "model/config.json";

/// Upper bound for one image description call, in seconds.
pub const CAPTION_TIMEOUT_SECS: u64 = 60;

/// Upper bound for one image download, in seconds.
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Largest image body accepted from a remote URL.
pub const MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

/// Upper bound for one synthesis call, in seconds.
pub const SYNTHESIS_TIMEOUT_SECS: u64 = 120;

/// Concurrent calls allowed into a capability that shares one accelerator context.
pub const CAPABILITY_CONCURRENCY: usize = 1;

/// Number of cleanup worker threads.
pub const CLEANUP_WORKERS: usize = 2;

/// Attempts per cleanup task before it is logged and dropped.
pub const CLEANUP_MAX_ATTEMPTS: u32 = 3;

/// Delay between cleanup attempts in milliseconds.
pub const CLEANUP_RETRY_DELAY_MS: u64 = 200;

/// Device node whose presence selects CUDA when the device is `auto`.
pub const CUDA_DEVICE_NODE: &str = "/dev/nvidiactl";

/// File extension for staged images. The content type is sniffed, never trusted.
pub const STAGING_EXTENSION: &str = "img";

/// File extension for synthesized audio.
pub const OUTPUT_EXTENSION: &str = "wav";

/// Media type of every successful response body.
pub const AUDIO_MEDIA_TYPE: &str = "audio/wav";
