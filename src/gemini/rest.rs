//! One-shot `generateContent` client.

use super::{Content, GeminiError, GenerateRequest, GenerateResponse, GenerativeModel, Part, Result};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

pub const REST_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestBody<'a> {
    contents: &'a [Content],
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<&'a super::GenerationConfig>,
}

/// [`GenerativeModel`] backed by the public REST API
#[derive(Debug, Clone)]
pub struct RestModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestModel {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GeminiError::MissingApiKey);
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_api_key(api_key: impl Into<String>) -> Result<Self> {
        Self::new(REST_ENDPOINT, api_key)
    }

    fn url(&self, model: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }
}

/// Pull `error.message` out of an API error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl GenerativeModel for RestModel {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        let body = RequestBody {
            contents: &request.contents,
            system_instruction: request.system_instruction.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part::text(text.clone())],
            }),
            tools: request.tools.as_ref(),
            generation_config: request.generation_config.as_ref(),
        };

        debug!("generateContent on {} ({} turn(s))", request.model, request.contents.len());
        let resp = self
            .client
            .post(self.url(&request.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            let message = error_message(&text);
            warn!("generateContent failed with {}: {}", status.as_u16(), message);
            return Err(GeminiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::is_retryable;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_missing_api_key() {
        assert!(matches!(
            RestModel::from_api_key("  "),
            Err(GeminiError::MissingApiKey)
        ));
    }

    #[tokio::test]
    async fn test_generate_parses_function_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-test:generateContent"))
            .and(header("x-goog-api-key", "secret"))
            .and(body_partial_json(serde_json::json!({
                "contents": [{"role": "user", "parts": [{"text": "open kanban"}]}],
                "systemInstruction": {"parts": [{"text": "be brief"}]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [
                        {"functionCall": {"id": "x", "name": "navigateTo", "args": {"page": "kanban"}}}
                    ]}
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let model = RestModel::new(server.uri(), "secret").unwrap();
        let response = model
            .generate(GenerateRequest {
                model: "models/gemini-test".to_string(),
                contents: vec![Content::user_text("open kanban")],
                system_instruction: Some("be brief".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let content = response.first_content().unwrap();
        let call = content.function_calls().next().unwrap();
        assert_eq!(call.name, "navigateTo");
        assert_eq!(call.args["page"], "kanban");
    }

    #[tokio::test]
    async fn test_overload_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
                "error": {"code": 503, "message": "The model is overloaded.", "status": "UNAVAILABLE"}
            })))
            .mount(&server)
            .await;

        let model = RestModel::new(server.uri(), "secret").unwrap();
        let err = model
            .generate(GenerateRequest {
                model: "gemini-test".to_string(),
                contents: vec![Content::user_text("hi")],
                ..Default::default()
            })
            .await
            .unwrap_err();

        match &err {
            GeminiError::Api { status, message } => {
                assert_eq!(*status, 503);
                assert_eq!(message, "The model is overloaded.");
            }
            other => panic!("Unexpected error: {:?}", other),
        }
        assert!(is_retryable(&err.to_string()));
    }
}
