use crate::http::build_client;
use crate::models::ImagePayload;
use crate::providers::ProviderError;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

const DEFAULT_MODEL: &str = "gpt-4o";

pub struct OpenAiProvider {
    http: Client,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            http: build_client(),
            api_key,
            model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into()),
        }
    }

    pub async fn analyze(
        &self,
        images: &[ImagePayload],
        instruction: &str,
    ) -> Result<String, ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::auth("OPENAI_API_KEY is not set"));
        }

        let mut content: Vec<Value> = vec![json!({ "type": "text", "text": instruction })];
        content.extend(images.iter().map(|image| {
            json!({
                "type": "image_url",
                "image_url": {
                    "url": format!("data:{};base64,{}", image.mime_type, image.data),
                },
            })
        }));

        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": content }],
            "max_tokens": 1024,
        });

        let response = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderError::network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::malformed_body(err.to_string()))?;

        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| ProviderError::malformed_body("no message content in response"))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderErrorKind;

    #[tokio::test]
    async fn blank_key_fails_before_any_network_call() {
        let provider = OpenAiProvider::new(String::new());
        let err = provider.analyze(&[], "prompt").await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Auth);
    }

    #[test]
    fn empty_choice_content_is_malformed_body() {
        let payload: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"  "}}]}"#).unwrap();
        let text = payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty());
        assert!(text.is_none());
    }
}
