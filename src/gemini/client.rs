use super::{
    extract_text, first_inline_image, next_line, sse_data, stream_fragment, Content, GeminiError,
    GenerateContentRequest, GenerateContentResponse, GenerationConfig, ImageInstance,
    ImageParameters, InlineData, Part, PredictRequest, PredictResponse, ANALYSIS_APOLOGY,
    CHAT_APOLOGY,
};
use crate::conversation::{Author, GenerationParams, Message, Part as ChatPart};
use crate::media;
use futures::StreamExt;
use reqwest::Client;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
/// Image-modality model used for the edit operation.
const EDIT_MODEL: &str = "gemini-2.0-flash-preview-image-generation";
/// Vision-capable model used for image analysis.
const ANALYSIS_MODEL: &str = "gemini-2.5-flash";

/// Stateless client for the four service operations. Every operation
/// converts failure into a soft outcome (apology text or `None`) and logs
/// the underlying error; callers never see an `Err`.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: String,
    base_url: String,
}

/// Maps chat history to the provider's role/part shape. Only text and
/// image parts are replayed; generation results and unknown parts stay
/// local, and messages left with no parts are dropped entirely.
pub fn history_to_contents(history: &[Message]) -> Vec<Content> {
    history
        .iter()
        .filter_map(|message| {
            let role = match message.author {
                Author::User => "user",
                Author::Model => "model",
            };
            let parts: Vec<Part> = message
                .parts
                .iter()
                .filter_map(|part| match part {
                    ChatPart::Text { text } if !text.is_empty() => Some(Part::Text {
                        text: text.clone(),
                    }),
                    ChatPart::Image {
                        data, mime_type, ..
                    } => Some(Part::InlineData {
                        inline_data: InlineData {
                            mime_type: mime_type.clone(),
                            data: data.clone(),
                        },
                    }),
                    _ => None,
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(Content {
                    role: Some(role.to_string()),
                    parts,
                })
            }
        })
        .collect()
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, API_BASE.to_string())
    }

    /// Overrides the default API base URL.
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        GeminiClient {
            http: Client::new(),
            api_key,
            base_url,
        }
    }

    fn endpoint(&self, model: &str, verb: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, verb)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, GeminiError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Err(GeminiError::Api { status, message })
    }

    /// Streams a chat reply, invoking `on_fragment` for each text fragment
    /// as it arrives. On any failure the stream degrades to a single
    /// apology fragment; this operation never reports an error.
    pub async fn stream_chat<F>(&self, history: &[Message], model: &str, mut on_fragment: F)
    where
        F: FnMut(&str),
    {
        if let Err(e) = self.try_stream_chat(history, model, &mut on_fragment).await {
            log::error!("Chat stream failed: {}", e);
            on_fragment(CHAT_APOLOGY);
        }
    }

    async fn try_stream_chat<F>(
        &self,
        history: &[Message],
        model: &str,
        on_fragment: &mut F,
    ) -> Result<(), GeminiError>
    where
        F: FnMut(&str),
    {
        let body = GenerateContentRequest {
            contents: history_to_contents(history),
            generation_config: None,
        };
        let response = self
            .http
            .post(self.endpoint(model, "streamGenerateContent"))
            .query(&[("alt", "sse"), ("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let mut stream = response.bytes_stream();
        // Bytes accumulate and decode per complete line; a multi-byte
        // character split across two chunks must not be decoded early.
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);

            while let Some(line) = next_line(&mut buffer) {
                if let Some(payload) = sse_data(&line) {
                    if payload == "[DONE]" {
                        return Ok(());
                    }
                    match stream_fragment(payload) {
                        Some(fragment) => on_fragment(&fragment),
                        None => log::debug!("Skipping stream payload without text: {}", payload),
                    }
                }
            }
        }
        Ok(())
    }

    /// Generates images from a prompt. Returns data URLs on success, or
    /// `None` on failure or an empty result.
    pub async fn generate_images(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Option<Vec<String>> {
        match self.try_generate_images(prompt, params).await {
            Ok(urls) if !urls.is_empty() => Some(urls),
            Ok(_) => {
                log::warn!("Image generation returned no predictions");
                None
            }
            Err(e) => {
                log::error!("Image generation failed: {}", e);
                None
            }
        }
    }

    async fn try_generate_images(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Vec<String>, GeminiError> {
        let body = PredictRequest {
            instances: vec![ImageInstance {
                prompt: prompt.to_string(),
            }],
            parameters: ImageParameters {
                sample_count: params.count,
                aspect_ratio: params.aspect_ratio.as_str().to_string(),
                output_mime_type: params.output_mime_type.clone(),
            },
        };
        let response = self
            .http
            .post(self.endpoint(params.model.as_str(), "predict"))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;
        let response = Self::check(response).await?;
        let parsed: PredictResponse = response.json().await?;
        Ok(parsed
            .predictions
            .into_iter()
            .filter_map(|p| {
                let data = p.bytes_base64_encoded?;
                Some(media::data_url(
                    p.mime_type.as_deref().unwrap_or("image/png"),
                    &data,
                ))
            })
            .collect())
    }

    /// Describes an image. Failure degrades to a fixed apology string.
    pub async fn analyze_image(&self, data: &str, mime_type: &str, prompt: &str) -> String {
        match self.try_analyze_image(data, mime_type, prompt).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                log::warn!("Image analysis response carried no text");
                ANALYSIS_APOLOGY.to_string()
            }
            Err(e) => {
                log::error!("Image analysis failed: {}", e);
                ANALYSIS_APOLOGY.to_string()
            }
        }
    }

    async fn try_analyze_image(
        &self,
        data: &str,
        mime_type: &str,
        prompt: &str,
    ) -> Result<Option<String>, GeminiError> {
        let body = GenerateContentRequest {
            contents: vec![inline_request(data, mime_type, prompt)],
            generation_config: None,
        };
        let parsed = self.generate_content(ANALYSIS_MODEL, &body).await?;
        Ok(extract_text(&parsed))
    }

    /// Applies an edit instruction to an image, returning the first inline
    /// image of the response as a data URL, or `None` if the response
    /// carried no image or the call failed.
    pub async fn edit_image(
        &self,
        data: &str,
        mime_type: &str,
        instruction: &str,
    ) -> Option<String> {
        match self.try_edit_image(data, mime_type, instruction).await {
            Ok(Some(url)) => Some(url),
            Ok(None) => {
                log::warn!("Image edit response carried no inline image");
                None
            }
            Err(e) => {
                log::error!("Image edit failed: {}", e);
                None
            }
        }
    }

    async fn try_edit_image(
        &self,
        data: &str,
        mime_type: &str,
        instruction: &str,
    ) -> Result<Option<String>, GeminiError> {
        let body = GenerateContentRequest {
            contents: vec![inline_request(data, mime_type, instruction)],
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["TEXT".to_string(), "IMAGE".to_string()]),
            }),
        };
        let parsed = self.generate_content(EDIT_MODEL, &body).await?;
        Ok(first_inline_image(&parsed).map(|inline| media::data_url(&inline.mime_type, &inline.data)))
    }

    async fn generate_content(
        &self,
        model: &str,
        body: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GeminiError> {
        let response = self
            .http
            .post(self.endpoint(model, "generateContent"))
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }
}

/// One user content holding an inline image followed by a text prompt.
fn inline_request(data: &str, mime_type: &str, prompt: &str) -> Content {
    Content {
        role: Some("user".to_string()),
        parts: vec![
            Part::InlineData {
                inline_data: InlineData {
                    mime_type: mime_type.to_string(),
                    data: data.to_string(),
                },
            },
            Part::Text {
                text: prompt.to_string(),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Part as ChatPart;

    #[test]
    fn history_keeps_only_text_and_image_parts() {
        let history = vec![
            Message::new(
                Author::User,
                vec![
                    ChatPart::Image {
                        url: "file:///tmp/a.png".to_string(),
                        data: "QUJD".to_string(),
                        mime_type: "image/png".to_string(),
                    },
                    ChatPart::text("what is this?"),
                ],
            ),
            Message::new(
                Author::Model,
                vec![ChatPart::ImageGenerationResult {
                    prompt: "p".to_string(),
                    params: Default::default(),
                    images: vec!["data:image/png;base64,AA".to_string()],
                }],
            ),
            Message::text(Author::Model, "a cat"),
        ];
        let contents = history_to_contents(&history);
        // The generation-result-only message disappears.
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0].role.as_deref(), Some("user"));
        assert_eq!(contents[0].parts.len(), 2);
        assert!(matches!(contents[0].parts[0], Part::InlineData { .. }));
        assert_eq!(contents[1].role.as_deref(), Some("model"));
    }

    #[test]
    fn history_drops_empty_text_parts() {
        let history = vec![Message::text(Author::Model, "")];
        assert!(history_to_contents(&history).is_empty());
    }

    #[tokio::test]
    async fn stream_failure_degrades_to_a_single_apology_fragment() {
        // Nothing listens on the discard port, so the request fails
        // without touching the network beyond the local connect.
        let client = GeminiClient::with_base_url(
            "test-key".to_string(),
            "http://127.0.0.1:9/v1beta".to_string(),
        );
        let history = vec![Message::text(Author::User, "hi")];
        let mut fragments = Vec::new();
        client
            .stream_chat(&history, "gemini-2.5-flash", |fragment| {
                fragments.push(fragment.to_string())
            })
            .await;
        assert_eq!(fragments, vec![CHAT_APOLOGY.to_string()]);
    }

    #[test]
    fn inline_request_orders_image_before_prompt() {
        let content = inline_request("QUJD", "image/png", "make it blue");
        assert!(matches!(content.parts[0], Part::InlineData { .. }));
        assert!(matches!(content.parts[1], Part::Text { .. }));
    }
}
