use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Time-derived identifier for conversations and messages. The sequence
/// suffix keeps two ids minted in the same millisecond distinct.
pub fn next_id() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}-{}",
        Utc::now().timestamp_millis(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Model,
}

/// One tagged unit of message content. The `type` tag determines which
/// fields are populated; persisted rows written by newer builds may carry
/// tags this build does not know, which decode as `Unknown` holding the
/// raw value so the part survives the next save unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Part {
    #[serde(rename_all = "camelCase")]
    Text { text: String },
    #[serde(rename_all = "camelCase")]
    Image {
        url: String,
        data: String,
        mime_type: String,
    },
    #[serde(rename_all = "camelCase")]
    ImageGenerationResult {
        prompt: String,
        params: GenerationParams,
        images: Vec<String>,
    },
    #[serde(untagged)]
    Unknown(serde_json::Value),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub author: Author,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn new(author: Author, parts: Vec<Part>) -> Self {
        Message {
            id: next_id(),
            author,
            parts,
        }
    }

    pub fn text(author: Author, text: impl Into<String>) -> Self {
        Message::new(author, vec![Part::text(text)])
    }
}

/// Persisted message shape. Rows written before the parts model existed
/// carry a scalar `content` string instead of `parts`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub id: String,
    pub author: Author,
    #[serde(default)]
    pub parts: Option<Vec<Part>>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Canonicalizes a persisted message: legacy `content` becomes a single
/// text part, and a message with neither gets one empty text part, so
/// `parts` is always present after load.
pub fn migrate_message(raw: RawMessage) -> Message {
    let parts = match (raw.parts, raw.content) {
        (Some(parts), _) => parts,
        (None, Some(content)) => vec![Part::text(content)],
        (None, None) => vec![Part::text("")],
    };
    Message {
        id: raw.id,
        author: raw.author,
        parts,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationKind {
    #[serde(rename = "chat")]
    Chat,
}

impl ConversationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationKind::Chat => "chat",
        }
    }

    pub fn from_tag(_tag: &str) -> Self {
        // Only chat conversations exist in this client.
        ConversationKind::Chat
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub model: String,
    pub favorite: bool,
    pub kind: ConversationKind,
}

const TITLE_MAX_CHARS: usize = 40;

/// Derives a conversation title from the first non-empty text part,
/// truncated to 40 characters with a trailing ellipsis when cut.
pub fn title_for(messages: &[Message]) -> String {
    for message in messages {
        for part in &message.parts {
            if let Part::Text { text } = part {
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                let mut title: String = text.chars().take(TITLE_MAX_CHARS).collect();
                if text.chars().count() > TITLE_MAX_CHARS {
                    title.push('…');
                }
                return title;
            }
        }
    }
    "New Chat".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageModel {
    #[serde(rename = "imagen-3.0-generate-002")]
    Imagen3,
    #[serde(rename = "imagen-4.0-generate-001")]
    Imagen4,
}

impl ImageModel {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageModel::Imagen3 => "imagen-3.0-generate-002",
            ImageModel::Imagen4 => "imagen-4.0-generate-001",
        }
    }
}

impl fmt::Display for ImageModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "imagen-3" | "imagen-3.0-generate-002" => Ok(ImageModel::Imagen3),
            "imagen-4" | "imagen-4.0-generate-001" => Ok(ImageModel::Imagen4),
            other => Err(format!("Unknown image model: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Wide,
    #[serde(rename = "9:16")]
    Tall,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "3:4")]
    Portrait,
}

impl AspectRatio {
    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Wide => "16:9",
            AspectRatio::Tall => "9:16",
            AspectRatio::Landscape => "4:3",
            AspectRatio::Portrait => "3:4",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1:1" => Ok(AspectRatio::Square),
            "16:9" => Ok(AspectRatio::Wide),
            "9:16" => Ok(AspectRatio::Tall),
            "4:3" => Ok(AspectRatio::Landscape),
            "3:4" => Ok(AspectRatio::Portrait),
            other => Err(format!("Unknown aspect ratio: {}", other)),
        }
    }
}

pub const MIN_IMAGE_COUNT: u8 = 1;
pub const MAX_IMAGE_COUNT: u8 = 4;

/// Configuration bundle for one image-generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    pub model: ImageModel,
    pub aspect_ratio: AspectRatio,
    pub count: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_mime_type: Option<String>,
}

impl GenerationParams {
    pub fn new(
        model: ImageModel,
        aspect_ratio: AspectRatio,
        count: u8,
        output_mime_type: Option<String>,
    ) -> Self {
        GenerationParams {
            model,
            aspect_ratio,
            count: count.clamp(MIN_IMAGE_COUNT, MAX_IMAGE_COUNT),
            output_mime_type,
        }
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        GenerationParams {
            model: ImageModel::Imagen3,
            aspect_ratio: AspectRatio::Square,
            count: 1,
            output_mime_type: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(parts: Option<Vec<Part>>, content: Option<&str>) -> RawMessage {
        RawMessage {
            id: "1".to_string(),
            author: Author::User,
            parts,
            content: content.map(str::to_string),
        }
    }

    #[test]
    fn migration_keeps_existing_parts() {
        let parts = vec![Part::text("hello")];
        let migrated = migrate_message(raw(Some(parts.clone()), Some("ignored")));
        assert_eq!(migrated.parts, parts);
    }

    #[test]
    fn migration_wraps_legacy_content_in_one_text_part() {
        let migrated = migrate_message(raw(None, Some("legacy body")));
        assert_eq!(migrated.parts, vec![Part::text("legacy body")]);
    }

    #[test]
    fn migration_substitutes_empty_text_part() {
        let migrated = migrate_message(raw(None, None));
        assert_eq!(migrated.parts, vec![Part::text("")]);
    }

    #[test]
    fn title_uses_first_text_part_untruncated_when_short() {
        let messages = vec![Message::text(Author::User, "short prompt")];
        assert_eq!(title_for(&messages), "short prompt");
    }

    #[test]
    fn title_truncates_to_forty_chars_with_ellipsis() {
        let long = "a".repeat(50);
        let messages = vec![Message::text(Author::User, long)];
        let title = title_for(&messages);
        assert_eq!(title.chars().count(), 41);
        assert!(title.ends_with('…'));
    }

    #[test]
    fn title_skips_empty_text_and_falls_back_to_new_chat() {
        let messages = vec![Message::text(Author::Model, "")];
        assert_eq!(title_for(&messages), "New Chat");
        assert_eq!(title_for(&[]), "New Chat");
    }

    #[test]
    fn params_clamp_count_into_bounds() {
        let params = GenerationParams::new(ImageModel::Imagen3, AspectRatio::Wide, 9, None);
        assert_eq!(params.count, 4);
        let params = GenerationParams::new(ImageModel::Imagen3, AspectRatio::Wide, 0, None);
        assert_eq!(params.count, 1);
    }

    #[test]
    fn aspect_ratio_parses_known_values_only() {
        assert_eq!("16:9".parse::<AspectRatio>(), Ok(AspectRatio::Wide));
        assert!("2:1".parse::<AspectRatio>().is_err());
    }

    #[test]
    fn image_model_accepts_short_aliases() {
        assert_eq!("imagen-4".parse::<ImageModel>(), Ok(ImageModel::Imagen4));
        assert_eq!(
            "imagen-3.0-generate-002".parse::<ImageModel>(),
            Ok(ImageModel::Imagen3)
        );
    }

    #[test]
    fn part_serde_round_trips_with_type_tag() {
        let part = Part::Image {
            url: "file:///tmp/cat.png".to_string(),
            data: "aGk=".to_string(),
            mime_type: "image/png".to_string(),
        };
        let json = serde_json::to_string(&part).unwrap();
        assert!(json.contains("\"type\":\"image\""));
        assert!(json.contains("\"mimeType\":\"image/png\""));
        assert_eq!(serde_json::from_str::<Part>(&json).unwrap(), part);
    }

    #[test]
    fn unknown_part_tag_round_trips_losslessly() {
        let part: Part = serde_json::from_str(r#"{"type":"video","url":"x"}"#).unwrap();
        assert!(matches!(part, Part::Unknown(_)));
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json, serde_json::json!({"type": "video", "url": "x"}));
    }
}
