use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub system_instructions: String,
    pub task_instructions: String,
    /// Serialized JSON the task refers to.
    pub payload: String,
}

impl CompletionRequest {
    pub fn new(system: &str, task: &str, payload: String) -> Self {
        Self {
            system_instructions: system.to_string(),
            task_instructions: task.to_string(),
            payload,
        }
    }

    fn user_prompt(&self) -> String {
        format!("{}\n\nInput:\n{}", self.task_instructions, self.payload)
    }

    fn combined_prompt(&self) -> String {
        format!("{}\n\n{}", self.system_instructions, self.user_prompt())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("completion service not configured: {0}")]
    NotConfigured(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{provider} API request failed ({status}): {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("no response content from {0}")]
    EmptyResponse(&'static str),
    #[error("response did not contain a JSON object")]
    NoJsonObject,
    #[error("response JSON did not match the expected shape: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Best-effort text generation. Any error sends the caller to its
/// deterministic fallback.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}

/// Sends `request` and decodes the first JSON object of the reply into `T`.
pub async fn complete_json<T: DeserializeOwned>(
    service: &dyn CompletionService,
    request: &CompletionRequest,
) -> Result<T, CompletionError> {
    let response = service.complete(request).await?;
    parse_response(&response)
}

pub fn parse_response<T: DeserializeOwned>(response: &str) -> Result<T, CompletionError> {
    let json = extract_json_object(response).ok_or(CompletionError::NoJsonObject)?;
    Ok(serde_json::from_str(json)?)
}

/// Returns the first balanced `{...}` region of `text`. Braces inside JSON
/// strings (including escaped quotes) are not counted.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Clone)]
pub struct LlmClient {
    http_client: Client,
    provider: String,
    api_key: Option<String>,
    model: String,
    base_url: Option<String>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl LlmClient {
    /// Builds a client for the configured provider, or `None` when AI is disabled.
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>, CompletionError> {
        if config.provider == "none" || config.model.is_empty() {
            return Ok(None);
        }
        if config.provider != "ollama" && config.api_key.is_none() {
            return Ok(None);
        }

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;

        Ok(Some(Self {
            http_client,
            provider: config.provider.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }))
    }

    fn api_key(&self) -> Result<&str, CompletionError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| CompletionError::NotConfigured(format!("no API key for {}", self.provider)))
    }

    async fn call_openai_api(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system_instructions.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.user_prompt(),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let url = self
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1/chat/completions");
        let api_key = self.api_key()?;

        let mut builder = self.http_client.post(url).header("Content-Type", "application/json");
        builder = if self.provider == "azure" {
            builder.header("api-key", api_key)
        } else {
            builder.header("Authorization", format!("Bearer {}", api_key))
        };

        let response = builder.json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api { provider: "OpenAI", status: status.as_u16(), body });
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(CompletionError::EmptyResponse("OpenAI"))
    }

    async fn call_gemini_api(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        #[derive(Serialize)]
        struct GeminiRequest {
            contents: Vec<GeminiContent>,
            #[serde(rename = "generationConfig")]
            generation_config: GeminiGenerationConfig,
        }

        #[derive(Serialize)]
        struct GeminiContent {
            parts: Vec<GeminiPart>,
        }

        #[derive(Serialize)]
        struct GeminiPart {
            text: String,
        }

        #[derive(Serialize)]
        struct GeminiGenerationConfig {
            temperature: f32,
            #[serde(rename = "maxOutputTokens")]
            max_output_tokens: u32,
        }

        #[derive(Deserialize)]
        struct GeminiResponse {
            candidates: Vec<GeminiCandidate>,
        }

        #[derive(Deserialize)]
        struct GeminiCandidate {
            content: GeminiResponseContent,
        }

        #[derive(Deserialize)]
        struct GeminiResponseContent {
            parts: Vec<GeminiResponsePart>,
        }

        #[derive(Deserialize)]
        struct GeminiResponsePart {
            text: String,
        }

        let body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: request.combined_prompt() }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
        };

        let base = self
            .base_url
            .as_deref()
            .unwrap_or("https://generativelanguage.googleapis.com/v1beta/models");
        let url = format!("{}/{}:generateContent?key={}", base, self.model, self.api_key()?);

        let response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api { provider: "Gemini", status: status.as_u16(), body });
        }

        let gemini: GeminiResponse = response.json().await?;
        gemini
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text)
            .ok_or(CompletionError::EmptyResponse("Gemini"))
    }

    async fn call_claude_api(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        #[derive(Serialize)]
        struct ClaudeRequest {
            model: String,
            max_tokens: u32,
            system: String,
            messages: Vec<ChatMessage>,
        }

        #[derive(Deserialize)]
        struct ClaudeResponse {
            content: Vec<ClaudeContent>,
        }

        #[derive(Deserialize)]
        struct ClaudeContent {
            text: String,
        }

        let body = ClaudeRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: request.system_instructions.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.user_prompt(),
            }],
        };

        let url = self.base_url.as_deref().unwrap_or("https://api.anthropic.com/v1/messages");

        let response = self
            .http_client
            .post(url)
            .header("x-api-key", self.api_key()?)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api { provider: "Claude", status: status.as_u16(), body });
        }

        let claude: ClaudeResponse = response.json().await?;
        claude
            .content
            .into_iter()
            .next()
            .map(|content| content.text)
            .ok_or(CompletionError::EmptyResponse("Claude"))
    }

    async fn call_ollama_api(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        #[derive(Serialize)]
        struct OllamaRequest {
            model: String,
            prompt: String,
            stream: bool,
        }

        #[derive(Deserialize)]
        struct OllamaResponse {
            response: String,
            done: bool,
        }

        let body = OllamaRequest {
            model: self.model.clone(),
            prompt: request.combined_prompt(),
            stream: false,
        };

        let url = self.base_url.as_deref().unwrap_or("http://localhost:11434/api/generate");

        let response = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api { provider: "Ollama", status: status.as_u16(), body });
        }

        let ollama: OllamaResponse = response.json().await?;
        if !ollama.done {
            return Err(CompletionError::EmptyResponse("Ollama"));
        }
        Ok(ollama.response)
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        tracing::debug!(provider = %self.provider, model = %self.model, "sending completion request");
        match self.provider.as_str() {
            "gemini" => self.call_gemini_api(request).await,
            "claude" => self.call_claude_api(request).await,
            "ollama" => self.call_ollama_api(request).await,
            _ => self.call_openai_api(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_object_from_fenced_reply() {
        let reply = "Sure, here you go:\n```json\n{\"requirements\": []}\n```\nAnything else?";
        assert_eq!(extract_json_object(reply), Some("{\"requirements\": []}"));
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let reply = r#"{"title": "use {curly} and \"quoted }\" text", "n": {"x": 1}} trailing {"#;
        assert_eq!(
            extract_json_object(reply),
            Some(r#"{"title": "use {curly} and \"quoted }\" text", "n": {"x": 1}}"#)
        );
    }

    #[test]
    fn test_unbalanced_object_yields_none() {
        assert_eq!(extract_json_object("{\"open\": [1, 2"), None);
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[test]
    fn test_parse_response_reports_shape_errors() {
        #[derive(Deserialize, Debug)]
        struct Expected {
            #[allow(dead_code)]
            items: Vec<u32>,
        }
        let err = parse_response::<Expected>("{\"other\": true}").unwrap_err();
        assert!(matches!(err, CompletionError::Decode(_)));
        let err = parse_response::<Expected>("nothing").unwrap_err();
        assert!(matches!(err, CompletionError::NoJsonObject));
    }

    #[test]
    fn test_disabled_provider_builds_no_client() {
        let config = LlmConfig::default();
        assert!(LlmClient::from_config(&config).unwrap().is_none());
    }
}
