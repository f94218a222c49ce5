use crate::defaults;
use crate::error::{PicvoiceError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub caption: CaptionConfig,
    pub synthesis: SynthesisConfig,
    pub cleanup: CleanupConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Ephemeral artifact directories
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub staging_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Wipe both directories once at process start.
    pub wipe_on_start: bool,
    pub max_live_artifacts: usize,
}

/// Image description capability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptionConfig {
    pub program: String,
    pub args: Vec<String>,
    pub model: String,
    pub device: Device,
    pub timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub max_image_bytes: u64,
    pub max_concurrent: usize,
    pub fallback_text: String,
}

/// Speech synthesis capability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    pub program: String,
    pub args: Vec<String>,
    pub checkpoint: PathBuf,
    pub config: PathBuf,
    pub device: Device,
    pub timeout_secs: u64,
    pub max_concurrent: usize,
}

/// Deferred deletion workers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CleanupConfig {
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

/// Compute device a capability runs on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl Device {
    /// Resolve `Auto` against the host. Called once at startup.
    pub fn resolve(self) -> Device {
        match self {
            Device::Auto => {
                if Path::new(defaults::CUDA_DEVICE_NODE).exists() {
                    Device::Cuda
                } else {
                    Device::Cpu
                }
            }
            other => other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Device::Auto => "auto",
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        }
    }
}

impl std::str::FromStr for Device {
    type Err = PicvoiceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Device::Auto),
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda),
            other => Err(PicvoiceError::ConfigInvalidValue {
                key: "device".to_string(),
                message: format!("unknown device '{other}' (expected auto, cpu or cuda)"),
            }),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: defaults::HOST.to_string(),
            port: defaults::PORT,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from(defaults::STAGING_DIR),
            output_dir: PathBuf::from(defaults::OUTPUT_DIR),
            wipe_on_start: true,
            max_live_artifacts: defaults::MAX_LIVE_ARTIFACTS,
        }
    }
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            program: "image-caption".to_string(),
            args: ["--model", "{model}", "--device", "{device}", "{image}"]
                .into_iter()
                .map(String::from)
                .collect(),
            model: defaults::CAPTION_MODEL.to_string(),
            device: Device::Auto,
            timeout_secs: defaults::CAPTION_TIMEOUT_SECS,
            download_timeout_secs: defaults::DOWNLOAD_TIMEOUT_SECS,
            max_image_bytes: defaults::MAX_IMAGE_BYTES,
            max_concurrent: defaults::CAPABILITY_CONCURRENCY,
            fallback_text: defaults::FALLBACK_CAPTION.to_string(),
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            program: "piper".to_string(),
            args: [
                "--model",
                "{checkpoint}",
                "--config",
                "{config}",
                "--output_file",
                "-",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            checkpoint: PathBuf::from(defaults::TTS_CHECKPOINT),
            config: PathBuf::from(defaults::TTS_CONFIG),
            device: Device::Auto,
            timeout_secs: defaults::SYNTHESIS_TIMEOUT_SECS,
            max_concurrent: defaults::CAPABILITY_CONCURRENCY,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            workers: defaults::CLEANUP_WORKERS,
            max_attempts: defaults::CLEANUP_MAX_ATTEMPTS,
            retry_delay_ms: defaults::CLEANUP_RETRY_DELAY_MS,
        }
    }
}

impl CaptionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

impl SynthesisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl CleanupConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only a missing file falls back to defaults; invalid TOML is an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("caption.max_concurrent", self.caption.max_concurrent),
            ("synthesis.max_concurrent", self.synthesis.max_concurrent),
            ("cleanup.workers", self.cleanup.workers),
            ("storage.max_live_artifacts", self.storage.max_live_artifacts),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(PicvoiceError::ConfigInvalidValue {
                    key: key.to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
        }
        if self.cleanup.max_attempts == 0 {
            return Err(PicvoiceError::ConfigInvalidValue {
                key: "cleanup.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.storage.staging_dir == self.storage.output_dir {
            return Err(PicvoiceError::ConfigInvalidValue {
                key: "storage.output_dir".to_string(),
                message: "must differ from storage.staging_dir".to_string(),
            });
        }
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - PICVOICE_HOST → server.host
    /// - PICVOICE_PORT → server.port
    /// - PICVOICE_DEVICE → caption.device and synthesis.device
    /// - PICVOICE_STAGING_DIR → storage.staging_dir
    /// - PICVOICE_OUTPUT_DIR → storage.output_dir
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(host) = std::env::var("PICVOICE_HOST")
            && !host.is_empty()
        {
            self.server.host = host;
        }

        if let Ok(port) = std::env::var("PICVOICE_PORT")
            && !port.is_empty()
        {
            match port.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(
                    "Invalid PICVOICE_PORT='{}', keeping {}",
                    port,
                    self.server.port
                ),
            }
        }

        if let Ok(device) = std::env::var("PICVOICE_DEVICE")
            && !device.is_empty()
        {
            match device.parse::<Device>() {
                Ok(device) => {
                    self.caption.device = device;
                    self.synthesis.device = device;
                }
                Err(e) => tracing::warn!("Ignoring PICVOICE_DEVICE: {}", e),
            }
        }

        if let Ok(dir) = std::env::var("PICVOICE_STAGING_DIR")
            && !dir.is_empty()
        {
            self.storage.staging_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("PICVOICE_OUTPUT_DIR")
            && !dir.is_empty()
        {
            self.storage.output_dir = PathBuf::from(dir);
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/picvoice/config.toml on Linux, or a relative
    /// `picvoice.toml` when no config directory is known.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("picvoice").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("picvoice.toml"))
    }

    /// Serialize the effective configuration.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
