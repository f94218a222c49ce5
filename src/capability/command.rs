//! Capabilities backed by external programs.
//!
//! The captioning model and the TTS model run out of process. Arguments are
//! templated with placeholders and passed as argv (no shell), so request text
//! never reaches a shell parser.
//!
//! The `CommandRunner` trait keeps the describer and synthesizer testable
//! without the real programs installed.

use crate::capability::{ImageDescriber, SpeechSynthesizer, StagedImage};
use crate::config::{CaptionConfig, Device, SynthesisConfig};
use crate::error::{PicvoiceError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Why an external program did not produce output.
#[derive(Debug, Error)]
pub enum CommandFailure {
    #[error("program not found: {program}")]
    NotFound { program: String },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("failed to run {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs a program and collects its stdout.
///
/// Object-safe, Send + Sync for use in concurrent contexts.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, feeding `stdin` if given.
    ///
    /// Dropping the returned future must stop the child.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<Vec<u8>>,
    ) -> std::result::Result<Vec<u8>, CommandFailure>;
}

/// Production runner using `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<Vec<u8>>,
    ) -> std::result::Result<Vec<u8>, CommandFailure> {
        let io_failure = |source: std::io::Error| CommandFailure::Io {
            program: program.to_string(),
            source,
        };

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CommandFailure::NotFound {
                        program: program.to_string(),
                    }
                } else {
                    io_failure(e)
                }
            })?;

        // Feed stdin concurrently so a child that writes before it finishes
        // reading cannot deadlock on a full pipe.
        let feeder = match (stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => Some(tokio::spawn(async move {
                let written = pipe.write_all(&input).await;
                drop(pipe);
                written
            })),
            _ => None,
        };

        let output = child.wait_with_output().await.map_err(io_failure)?;

        if let Some(feeder) = feeder {
            match feeder.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("{}: stdin closed early: {}", program, e),
                Err(e) => tracing::debug!("{}: stdin writer aborted: {}", program, e),
            }
        }

        if !output.status.success() {
            return Err(CommandFailure::Failed {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

/// Replace every `{name}` placeholder in `args`.
///
/// Values are applied in order, so caller-controlled values go last and are
/// never rescanned for placeholders.
pub fn expand_args(args: &[String], values: &[(&str, &str)]) -> Vec<String> {
    args.iter()
        .map(|arg| {
            values.iter().fold(arg.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{name}}}"), value)
            })
        })
        .collect()
}

/// Image describer running a captioning program on the staged file.
///
/// The caption is the last non-empty line the program prints; earlier lines
/// are treated as progress output.
pub struct CommandDescriber {
    runner: Arc<dyn CommandRunner>,
    program: String,
    args: Vec<String>,
    model: String,
    device: Device,
}

impl CommandDescriber {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &CaptionConfig) -> Self {
        Self {
            runner,
            program: config.program.clone(),
            args: config.args.clone(),
            model: config.model.clone(),
            device: config.device.resolve(),
        }
    }
}

#[async_trait]
impl ImageDescriber for CommandDescriber {
    async fn describe(&self, image: &StagedImage) -> Result<String> {
        let image_path = image.path.to_string_lossy().into_owned();
        let args = expand_args(
            &self.args,
            &[
                ("image", image_path.as_str()),
                ("model", self.model.as_str()),
                ("device", self.device.as_str()),
                ("url", image.url.as_str()),
            ],
        );

        let stdout = self
            .runner
            .run(&self.program, &args, None)
            .await
            .map_err(|e| PicvoiceError::Inference {
                message: e.to_string(),
            })?;

        let text = String::from_utf8_lossy(&stdout);
        let caption = text
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .unwrap_or_default();

        if caption.is_empty() {
            return Err(PicvoiceError::Inference {
                message: format!("{} produced no caption", self.program),
            });
        }

        Ok(caption.to_string())
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Speech synthesizer running a TTS program that writes WAV to stdout.
///
/// Text is passed through `{text}` when the arguments mention it, otherwise
/// on stdin.
pub struct CommandSynthesizer {
    runner: Arc<dyn CommandRunner>,
    program: String,
    args: Vec<String>,
    checkpoint: String,
    config: String,
    device: Device,
}

impl CommandSynthesizer {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &SynthesisConfig) -> Self {
        Self {
            runner,
            program: config.program.clone(),
            args: config.args.clone(),
            checkpoint: config.checkpoint.to_string_lossy().into_owned(),
            config: config.config.to_string_lossy().into_owned(),
            device: config.device.resolve(),
        }
    }

    fn takes_text_argument(&self) -> bool {
        self.args.iter().any(|arg| arg.contains("{text}"))
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let args = expand_args(
            &self.args,
            &[
                ("checkpoint", self.checkpoint.as_str()),
                ("config", self.config.as_str()),
                ("device", self.device.as_str()),
                ("text", text),
            ],
        );
        let stdin = if self.takes_text_argument() {
            None
        } else {
            Some(format!("{text}\n").into_bytes())
        };

        let audio = self
            .runner
            .run(&self.program, &args, stdin)
            .await
            .map_err(|e| PicvoiceError::Synthesis {
                message: e.to_string(),
            })?;

        if audio.is_empty() {
            return Err(PicvoiceError::Synthesis {
                message: format!("{} produced no audio", self.program),
            });
        }

        Ok(audio)
    }

    fn name(&self) -> &str {
        &self.program
    }
}
