//! The `/tts` request body.

use crate::error::{PicvoiceError, Result};
use serde::{Deserialize, Serialize};

/// What the caller wants spoken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TtsRequest {
    /// Caption the image behind `image_url`, then speak the caption.
    Image {
        #[serde(rename = "imageUrl")]
        image_url: String,
    },
    /// Speak `text` as is.
    Text { text: String },
}

impl TtsRequest {
    /// Parse and validate a JSON body. Anything malformed is `BadRequest`.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let request: TtsRequest =
            serde_json::from_slice(body).map_err(|e| PicvoiceError::BadRequest {
                message: e.to_string(),
            })?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            TtsRequest::Image { image_url } => {
                let url = reqwest::Url::parse(image_url).map_err(|e| PicvoiceError::BadRequest {
                    message: format!("imageUrl is not a valid URL: {e}"),
                })?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(PicvoiceError::BadRequest {
                        message: format!("imageUrl must use http or https, got '{}'", url.scheme()),
                    });
                }
                Ok(())
            }
            TtsRequest::Text { text } => {
                if text.trim().is_empty() {
                    return Err(PicvoiceError::BadRequest {
                        message: "text must not be empty".to_string(),
                    });
                }
                Ok(())
            }
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TtsRequest::Image { .. } => "image",
            TtsRequest::Text { .. } => "text",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_request() {
        let request = TtsRequest::from_slice(br#"{"type":"text","text":"hello world"}"#).unwrap();
        assert_eq!(
            request,
            TtsRequest::Text {
                text: "hello world".to_string()
            }
        );
        assert_eq!(request.kind(), "text");
    }

    #[test]
    fn test_parse_image_request() {
        let request =
            TtsRequest::from_slice(br#"{"type":"image","imageUrl":"https://example.com/cat.png"}"#)
                .unwrap();
        assert_eq!(
            request,
            TtsRequest::Image {
                image_url: "https://example.com/cat.png".to_string()
            }
        );
    }

    #[test]
    fn test_serializes_with_wire_names() {
        let json = serde_json::to_value(TtsRequest::Image {
            image_url: "http://a/b.png".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["imageUrl"], "http://a/b.png");
    }

    #[test]
    fn test_rejects_malformed_bodies() {
        let cases: &[&[u8]] = &[
            b"",
            b"not json",
            br#"{"text":"no type"}"#,
            br#"{"type":"video","url":"x"}"#,
            br#"{"type":"image"}"#,
            br#"{"type":"image","imageUrl":"not a url"}"#,
            br#"{"type":"image","imageUrl":"file:///etc/passwd"}"#,
            br#"{"type":"text","text":"   "}"#,
            br#"{"type":"text"}"#,
        ];
        for body in cases {
            let err = TtsRequest::from_slice(body).unwrap_err();
            assert!(
                matches!(err, PicvoiceError::BadRequest { .. }),
                "{:?} should be a bad request, got {err}",
                String::from_utf8_lossy(body)
            );
        }
    }
}
