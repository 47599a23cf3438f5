//! Wire types and soft-fail service client for the Gemini REST API.

pub mod client;

pub use client::GeminiClient;

use serde::{Deserialize, Serialize};

/// Inline text shown when the chat stream fails mid-flight.
pub const CHAT_APOLOGY: &str =
    "Sorry, something went wrong while contacting the model. Please try again.";
/// Model message text shown when image generation returns nothing.
pub const GENERATION_APOLOGY: &str = "Sorry, I couldn't generate the image. Please try again.";
/// Returned verbatim when image analysis fails.
pub const ANALYSIS_APOLOGY: &str = "Sorry, I couldn't analyze this image.";

/// Content container used in both requests and responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

/// Untagged union of text and inline media parts. Variant order matters
/// for `#[serde(untagged)]` decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

/// Base64 inline payload used for image requests and responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_modalities: Option<Vec<String>>,
}

/// Top-level `generateContent` response envelope, shared by the unary and
/// streaming endpoints (each SSE chunk is one of these).
#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}

#[derive(Debug, Serialize)]
pub struct PredictRequest {
    pub instances: Vec<ImageInstance>,
    pub parameters: ImageParameters,
}

#[derive(Debug, Serialize)]
pub struct ImageInstance {
    pub prompt: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageParameters {
    pub sample_count: u8,
    pub aspect_ratio: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_mime_type: Option<String>,
}

/// `:predict` response envelope for the Imagen models.
#[derive(Debug, Deserialize)]
pub struct PredictResponse {
    #[serde(default)]
    pub predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    #[serde(default)]
    pub bytes_base64_encoded: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum GeminiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Extracts the payload of one `data: ...` server-sent-event line.
pub fn sse_data(line: &str) -> Option<&str> {
    line.trim().strip_prefix("data:").map(str::trim_start)
}

/// Removes and returns the next complete line from a byte buffer.
/// Decoding waits for the newline, so a multi-byte character split
/// across two network chunks stays intact.
pub fn next_line(buffer: &mut Vec<u8>) -> Option<String> {
    let pos = buffer.iter().position(|&b| b == b'\n')?;
    let line: Vec<u8> = buffer.drain(..=pos).collect();
    Some(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned())
}

/// Concatenated text of the first candidate, if any.
pub fn extract_text(response: &GenerateContentResponse) -> Option<String> {
    let content = response.candidates.first()?.content.as_ref()?;
    let text: String = content
        .parts
        .iter()
        .filter_map(|part| match part {
            Part::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Text fragment carried by one streamed SSE chunk.
pub fn stream_fragment(payload: &str) -> Option<String> {
    let response: GenerateContentResponse = serde_json::from_str(payload).ok()?;
    extract_text(&response)
}

/// First inline image payload anywhere in the response.
pub fn first_inline_image(response: &GenerateContentResponse) -> Option<&InlineData> {
    response
        .candidates
        .iter()
        .filter_map(|c| c.content.as_ref())
        .flat_map(|content| content.parts.iter())
        .find_map(|part| match part {
            Part::InlineData { inline_data } => Some(inline_data),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_data_serializes_with_camel_case_wrapper() {
        let part = Part::InlineData {
            inline_data: InlineData {
                mime_type: "image/png".to_string(),
                data: "AAAA".to_string(),
            },
        };
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["inlineData"]["mimeType"], "image/png");
        assert_eq!(json["inlineData"]["data"], "AAAA");
    }

    #[test]
    fn sse_data_strips_prefix_and_padding() {
        assert_eq!(sse_data("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_data("data:[DONE]"), Some("[DONE]"));
        assert_eq!(sse_data(": keep-alive"), None);
        assert_eq!(sse_data(""), None);
    }

    #[test]
    fn next_line_waits_for_complete_multibyte_sequences() {
        let mut buffer: Vec<u8> = Vec::new();
        // "caf" plus the first byte of a two-byte 'é'.
        buffer.extend_from_slice(&[0x63, 0x61, 0x66, 0xC3]);
        assert_eq!(next_line(&mut buffer), None);
        buffer.extend_from_slice(&[0xA9, b'\n', b'x']);
        assert_eq!(next_line(&mut buffer), Some("café".to_string()));
        assert_eq!(buffer, b"x");
        assert_eq!(next_line(&mut buffer), None);
    }

    #[test]
    fn stream_fragment_pulls_candidate_text() {
        let payload = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"}]}}]}"#;
        assert_eq!(stream_fragment(payload), Some("Hel".to_string()));
        assert_eq!(stream_fragment(r#"{"candidates":[]}"#), None);
        assert_eq!(stream_fragment("not json"), None);
    }

    #[test]
    fn first_inline_image_skips_text_parts() {
        let payload = r#"{"candidates":[{"content":{"parts":[
            {"text":"here you go"},
            {"inlineData":{"mimeType":"image/png","data":"QUJD"}}
        ]}}]}"#;
        let response: GenerateContentResponse = serde_json::from_str(payload).unwrap();
        let inline = first_inline_image(&response).unwrap();
        assert_eq!(inline.mime_type, "image/png");
        assert_eq!(inline.data, "QUJD");
    }

    #[test]
    fn predict_response_tolerates_missing_fields() {
        let response: PredictResponse = serde_json::from_str("{}").unwrap();
        assert!(response.predictions.is_empty());
        let response: PredictResponse = serde_json::from_str(
            r#"{"predictions":[{"bytesBase64Encoded":"QUJD","mimeType":"image/png"},{}]}"#,
        )
        .unwrap();
        assert_eq!(response.predictions.len(), 2);
        assert!(response.predictions[1].bytes_base64_encoded.is_none());
    }
}
