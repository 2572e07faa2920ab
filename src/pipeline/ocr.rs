//! OCR inference: upload one slice, get layout blocks back.
//!
//! The inference server is an opaque HTTP endpoint wrapping a layout-aware
//! vision model. It is slow (tens of seconds per slice) and serves one
//! request at a time, so calls are made strictly one after another with a
//! long fixed timeout and no retry. Any transport failure aborts the run;
//! checkpoints make the next attempt cheap.
//!
//! ## Response shapes
//!
//! Depending on how the server is deployed it answers with
//!
//! 1. a JSON array of blocks,
//! 2. an envelope `{"raw_output": "<JSON text>"}`, or
//! 3. a bare JSON string holding the model's raw text.
//!
//! For 2 and 3 the inner text needs a second parse. Models sometimes wrap it
//! in a ```` ```json ```` fence, which is stripped first. If the inner text
//! still does not parse, the slice degrades to zero blocks with a warning;
//! losing half a page beats losing the run.

use crate::error::{EnvelopeError, EtlError};
use crate::output::{Block, Category};
use crate::pipeline::slice::Side;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// One slice ready for upload.
#[derive(Debug, Clone)]
pub struct SliceRequest {
    /// 1-based page index the slice belongs to.
    pub page: usize,
    pub side: Side,
    pub file_name: String,
    pub png: Vec<u8>,
}

/// An OCR backend.
///
/// Implementations return blocks in the model's emission order. Page tagging
/// and category normalisation are applied afterwards by [`ingest`].
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, request: &SliceRequest) -> Result<Vec<Block>, EtlError>;
}

/// [`OcrEngine`] talking to the inference server over HTTP.
pub struct HttpOcrClient {
    client: reqwest::Client,
    endpoint: String,
    timeout_secs: u64,
    prompt: Option<String>,
}

impl HttpOcrClient {
    pub fn new(
        endpoint: impl Into<String>,
        timeout_secs: u64,
        prompt: Option<String>,
    ) -> Result<Self, EtlError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| EtlError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout_secs,
            prompt,
        })
    }

    fn form(&self, request: &SliceRequest) -> Result<Form, EtlError> {
        let part = Part::bytes(request.png.clone())
            .file_name(request.file_name.clone())
            .mime_str("image/png")
            .map_err(|e| EtlError::Internal(format!("multipart: {e}")))?;
        let mut form = Form::new().part("file", part);
        if let Some(ref prompt) = self.prompt {
            form = form.text("prompt", prompt.clone());
        }
        Ok(form)
    }
}

#[async_trait]
impl OcrEngine for HttpOcrClient {
    async fn recognize(&self, request: &SliceRequest) -> Result<Vec<Block>, EtlError> {
        let page = request.page;
        let response = self
            .client
            .post(&self.endpoint)
            .multipart(self.form(request)?)
            .send()
            .await
            .map_err(|e| self.transport_error(page, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EtlError::OcrStatus {
                page,
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(page, e))?;
        debug!(
            "Page {} {} slice: {} bytes of OCR response",
            page,
            request.side,
            body.len()
        );

        decode_response(&body).map_err(|detail| EtlError::OcrResponse { page, detail })
    }
}

impl HttpOcrClient {
    fn transport_error(&self, page: usize, e: reqwest::Error) -> EtlError {
        if e.is_timeout() {
            EtlError::OcrTimeout {
                page,
                secs: self.timeout_secs,
            }
        } else {
            EtlError::OcrRequest {
                page,
                detail: e.to_string(),
            }
        }
    }
}

/// Decode an OCR response body into blocks.
///
/// Accepted shapes are a block array, an object carrying a `raw_output`
/// string, or a bare string. `Err` only when the body is none of these; a
/// broken inner payload is logged and yields an empty list.
pub fn decode_response(body: &str) -> Result<Vec<Block>, String> {
    let unrecognised = |detail: String| {
        format!(
            "expected a block array or {{\"raw_output\": …}}: {detail} (body starts {:?})",
            truncate(body, 80)
        )
    };
    let value: Value = serde_json::from_str(body).map_err(|e| unrecognised(e.to_string()))?;

    let raw = match value {
        Value::Array(items) => {
            return serde_json::from_value(Value::Array(items))
                .map_err(|e| unrecognised(e.to_string()));
        }
        Value::Object(mut map) => match map.remove("raw_output") {
            Some(Value::String(raw)) => raw,
            Some(other) => {
                return Err(unrecognised(format!(
                    "raw_output is {} instead of a string",
                    json_kind(&other)
                )))
            }
            None => return Err(unrecognised("object without raw_output".into())),
        },
        Value::String(raw) => raw,
        other => return Err(unrecognised(format!("got {}", json_kind(&other)))),
    };

    match parse_raw_output(&raw) {
        Ok(blocks) => Ok(blocks),
        Err(e) => {
            warn!("Discarding slice output: {}", e);
            Ok(Vec::new())
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*\n(.*?)\n?```$").unwrap());

/// Second-stage parse of the model's raw text.
pub fn parse_raw_output(raw: &str) -> Result<Vec<Block>, EnvelopeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvelopeError::Empty);
    }
    let inner = match RE_FENCED.captures(trimmed) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()),
        None => trimmed,
    };
    serde_json::from_str(inner).map_err(|e| EnvelopeError::InvalidPayload {
        detail: e.to_string(),
    })
}

/// Normalise freshly decoded blocks and tag them with their page.
///
/// `List-item` carries running text in these documents and is folded into
/// `Text` here, once, so every later stage sees a single category.
pub fn ingest(blocks: Vec<Block>, page: usize) -> Vec<Block> {
    blocks
        .into_iter()
        .map(|mut b| {
            if b.category == Category::ListItem {
                b.category = Category::Text;
            }
            b.page = page;
            b
        })
        .collect()
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}\u{2026}", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_direct_array() {
        let body = r#"[{"category":"Text","text":"hello","bbox":[0,0,10,10]},{"category":"Picture"}]"#;
        let blocks = decode_response(body).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].text, "hello");
        assert_eq!(blocks[1].category, Category::Picture);
    }

    #[test]
    fn decodes_envelope() {
        let inner = r#"[{"category":"Title","text":"سنة ١٩٤٩"}]"#;
        let body = serde_json::json!({ "raw_output": inner }).to_string();
        let blocks = decode_response(&body).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].category, Category::Title);
        assert_eq!(blocks[0].text, "سنة ١٩٤٩");
    }

    #[test]
    fn decodes_bare_string_and_strips_fences() {
        let inner = "```json\n[{\"category\":\"Text\",\"text\":\"x\"}]\n```";
        let body = serde_json::to_string(inner).unwrap();
        let blocks = decode_response(&body).unwrap();
        assert_eq!(blocks, vec![Block::text("x")]);
    }

    #[test]
    fn broken_envelope_degrades_to_empty() {
        let body = r#"{"raw_output": "[{\"category\": \"Text\", \"text\": \"cut off"}"#;
        assert_eq!(decode_response(body).unwrap(), Vec::<Block>::new());

        let body = r#"{"raw_output": "   "}"#;
        assert!(decode_response(body).unwrap().is_empty());
    }

    #[test]
    fn unknown_shape_is_an_error() {
        let err = decode_response(r#"{"detail": "Not Found"}"#).unwrap_err();
        assert!(err.contains("raw_output"), "got: {err}");
        assert!(decode_response("<html>").is_err());
        assert!(decode_response("42").is_err());
        assert!(decode_response(r#"{"raw_output": 3}"#).is_err());
    }

    #[test]
    fn array_of_strings_is_not_an_envelope() {
        let err = decode_response(r#"["some text"]"#).unwrap_err();
        assert!(err.contains("some text"), "got: {err}");
    }

    #[test]
    fn parse_raw_output_reports_reason() {
        assert!(matches!(parse_raw_output(""), Err(EnvelopeError::Empty)));
        assert!(matches!(
            parse_raw_output("{\"layout\": []}"),
            Err(EnvelopeError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn ingest_normalises_and_tags() {
        let blocks = vec![
            Block::new(Category::ListItem, "- one"),
            Block::new(Category::PageHeader, "header"),
        ];
        let out = ingest(blocks, 7);
        assert_eq!(out[0].category, Category::Text);
        assert_eq!(out[1].category, Category::PageHeader);
        assert!(out.iter().all(|b| b.page == 7));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("١٢٣٤", 2), "١٢\u{2026}");
        assert_eq!(truncate("ab", 5), "ab");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_request_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let client = HttpOcrClient::new("http://127.0.0.1:9/infer", 5, None).unwrap();
        let req = SliceRequest {
            page: 2,
            side: Side::Right,
            file_name: "page2_half1.png".into(),
            png: vec![0x89, b'P', b'N', b'G'],
        };
        let err = client.recognize(&req).await.unwrap_err();
        assert!(
            matches!(err, EtlError::OcrRequest { page: 2, .. } | EtlError::OcrTimeout { page: 2, .. }),
            "got: {err:?}"
        );
    }
}
