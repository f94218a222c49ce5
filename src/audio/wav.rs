//! WAV inspection and encoding.

use crate::error::{PicvoiceError, Result};
use std::io::Cursor;

/// Header facts about a WAV payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Samples per channel.
    pub frames: u32,
}

impl WavInfo {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f32 / self.sample_rate as f32
    }
}

/// Parse a WAV payload and check that it carries audio.
///
/// Synthesizer output goes through here before it is stored, so a
/// truncated or empty result fails the request instead of reaching the caller.
pub fn inspect(bytes: &[u8]) -> Result<WavInfo> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).map_err(|e| PicvoiceError::Synthesis {
        message: format!("Synthesizer returned invalid WAV: {}", e),
    })?;

    let spec = reader.spec();
    let frames = reader.duration();
    if frames == 0 {
        return Err(PicvoiceError::Synthesis {
            message: "Synthesizer returned WAV without samples".to_string(),
        });
    }

    Ok(WavInfo {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
        frames,
    })
}

/// Encode mono 16-bit PCM samples as a WAV file.
pub fn encode_pcm16(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut buffer, spec).map_err(|e| {
            PicvoiceError::Synthesis {
                message: format!("Failed to start WAV encoding: {}", e),
            }
        })?;
        for &sample in samples {
            writer.write_sample(sample).map_err(|e| PicvoiceError::Synthesis {
                message: format!("Failed to write WAV sample: {}", e),
            })?;
        }
        writer.finalize().map_err(|e| PicvoiceError::Synthesis {
            message: format!("Failed to finalize WAV: {}", e),
        })?;
    }

    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_pcm_is_inspectable() {
        let samples: Vec<i16> = (0..1600).map(|i| (i % 100) as i16).collect();
        let bytes = encode_pcm16(&samples, 16000).unwrap();

        let info = inspect(&bytes).unwrap();
        assert_eq!(info.sample_rate, 16000);
        assert_eq!(info.channels, 1);
        assert_eq!(info.bits_per_sample, 16);
        assert_eq!(info.frames, 1600);
        assert!((info.duration_secs() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_inspect_rejects_garbage() {
        let err = inspect(b"definitely not audio").unwrap_err();
        assert!(matches!(err, PicvoiceError::Synthesis { .. }));
    }

    #[test]
    fn test_inspect_rejects_empty_audio() {
        let bytes = encode_pcm16(&[], 22050).unwrap();
        let err = inspect(&bytes).unwrap_err();
        assert!(err.to_string().contains("without samples"));
    }

    #[test]
    fn test_inspect_rejects_truncated_header() {
        let bytes = encode_pcm16(&[1, 2, 3], 16000).unwrap();
        assert!(inspect(&bytes[..20]).is_err());
    }
}
