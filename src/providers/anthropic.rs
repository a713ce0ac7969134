use crate::http::build_client;
use crate::models::ImagePayload;
use crate::providers::ProviderError;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    http: Client,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            http: build_client(),
            api_key,
            model: std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into()),
        }
    }

    pub async fn analyze(
        &self,
        images: &[ImagePayload],
        instruction: &str,
    ) -> Result<String, ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::auth("ANTHROPIC_API_KEY is not set"));
        }

        // Images first, instruction last: the official vision guidance.
        let mut content: Vec<Value> = images
            .iter()
            .map(|image| {
                json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": image.mime_type,
                        "data": image.data,
                    },
                })
            })
            .collect();
        content.push(json!({ "type": "text", "text": instruction }));

        let body = json!({
            "model": self.model,
            "max_tokens": 1024,
            "messages": [{ "role": "user", "content": content }],
        });

        let response = self
            .http
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderError::network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }

        let payload: MessagesResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::malformed_body(err.to_string()))?;

        payload
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| ProviderError::malformed_body("no text block in response"))
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderErrorKind;

    #[tokio::test]
    async fn blank_key_fails_before_any_network_call() {
        let provider = AnthropicProvider::new("\t".into());
        let err = provider.analyze(&[], "prompt").await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Auth);
    }

    #[test]
    fn first_text_block_is_selected() {
        let payload: MessagesResponse = serde_json::from_str(
            r#"{"content":[{"type":"thinking","text":"hmm"},{"type":"text","text":"{}"}]}"#,
        )
        .unwrap();
        let text = payload
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text);
        assert_eq!(text.as_deref(), Some("{}"));
    }
}
