//! 文本生成服务
//!
//! 回复模块与生成模型之间唯一的约定是：提示词输入，文本输出。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::config::GenerationConfig;
use crate::error::{AppError, Result};

/// 结构化回复
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub content: String,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
}

/// 生成结果
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutput {
    /// 带 content 字段的结构化回复
    Reply(ChatReply),
    /// 无法识别的原始响应
    Raw(Value),
}

impl GenerationOutput {
    /// 结构化回复取 content，其余取字符串形式
    pub fn into_text(self) -> String {
        match self {
            GenerationOutput::Reply(reply) => reply.content,
            GenerationOutput::Raw(Value::String(text)) => text,
            GenerationOutput::Raw(other) => other.to_string(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<GenerationOutput>;
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AppError::Generation(e.to_string()))
}

async fn read_json(response: reqwest::Response, backend: &str) -> Result<Value> {
    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        return Err(AppError::Generation(format!(
            "{} returned {}: {}",
            backend, status, error_text
        )));
    }

    response
        .json()
        .await
        .map_err(|e| AppError::Generation(format!("Invalid {} response: {}", backend, e)))
}

/// Gemini generateContent 客户端
pub struct GeminiGenerator {
    client: reqwest::Client,
    model_name: String,
    base_url: String,
    api_key: String,
    temperature: f32,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model_name: config
                .model_name
                .trim_start_matches("models/")
                .to_string(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
        })
    }

    fn parse(&self, json: Value) -> Result<GenerationOutput> {
        if let Some(reason) = json
            .pointer("/promptFeedback/blockReason")
            .and_then(Value::as_str)
        {
            return Err(AppError::Generation(format!(
                "Gemini blocked the prompt: {}",
                reason
            )));
        }

        let candidate = json.pointer("/candidates/0");
        let text: Option<String> = candidate
            .and_then(|c| c.pointer("/content/parts"))
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect()
            });

        match text {
            Some(content) if !content.is_empty() => Ok(GenerationOutput::Reply(ChatReply {
                content,
                model: json
                    .get("modelVersion")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                finish_reason: candidate
                    .and_then(|c| c.get("finishReason"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })),
            _ => {
                tracing::warn!("Gemini response carried no text parts");
                Ok(GenerationOutput::Raw(json))
            }
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> Result<GenerationOutput> {
        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, self.model_name
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&serde_json::json!({
                "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
                "generationConfig": { "temperature": self.temperature }
            }))
            .send()
            .await
            .map_err(|e| AppError::Generation(format!("Gemini request failed: {}", e)))?;

        let json = read_json(response, "Gemini").await?;
        self.parse(json)
    }
}

/// Ollama /api/generate 客户端
pub struct OllamaGenerator {
    client: reqwest::Client,
    model_name: String,
    base_url: String,
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    model: Option<String>,
    done_reason: Option<String>,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model_name: config.model_name.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<GenerationOutput> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&serde_json::json!({
                "model": self.model_name,
                "prompt": prompt,
                "stream": false,
                "options": { "temperature": self.temperature }
            }))
            .send()
            .await
            .map_err(|e| AppError::Generation(format!("Ollama request failed: {}", e)))?;

        let json = read_json(response, "Ollama").await?;
        match serde_json::from_value::<OllamaGenerateResponse>(json.clone()) {
            Ok(parsed) => Ok(GenerationOutput::Reply(ChatReply {
                content: parsed.response,
                model: parsed.model,
                finish_reason: parsed.done_reason,
            })),
            Err(_) => Ok(GenerationOutput::Raw(json)),
        }
    }
}

pub fn create_text_generator(config: &GenerationConfig) -> Result<Arc<dyn TextGenerator>> {
    match config.backend.as_str() {
        "gemini" => Ok(Arc::new(GeminiGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => Err(AppError::Config(format!(
            "Unknown generation backend: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(backend: &str, base_url: &str) -> GenerationConfig {
        GenerationConfig {
            backend: backend.into(),
            base_url: base_url.into(),
            api_key: "secret".into(),
            model_name: "gemini-2.0-flash".into(),
            ..GenerationConfig::default()
        }
    }

    #[test]
    fn test_into_text() {
        let reply = GenerationOutput::Reply(ChatReply {
            content: "hey!".into(),
            model: None,
            finish_reason: None,
        });
        assert_eq!(reply.into_text(), "hey!");
        assert_eq!(GenerationOutput::Raw(Value::String("plain".into())).into_text(), "plain");
        assert_eq!(
            GenerationOutput::Raw(serde_json::json!({"a": 1})).into_text(),
            r#"{"a":1}"#
        );
    }

    #[tokio::test]
    async fn test_gemini_generate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.0-flash:generateContent"))
            .and(query_param("key", "secret"))
            .and(body_partial_json(serde_json::json!({
                "contents": [{ "parts": [{ "text": "hello prompt" }] }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "lol " }, { "text": "sure" }], "role": "model" },
                    "finishReason": "STOP"
                }],
                "modelVersion": "gemini-2.0-flash"
            })))
            .mount(&server)
            .await;

        let generator = GeminiGenerator::new(&config("gemini", &server.uri())).unwrap();
        let output = generator.generate("hello prompt").await.unwrap();

        match output {
            GenerationOutput::Reply(reply) => {
                assert_eq!(reply.content, "lol sure");
                assert_eq!(reply.finish_reason.as_deref(), Some("STOP"));
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_gemini_blocked_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "promptFeedback": { "blockReason": "SAFETY" }
            })))
            .mount(&server)
            .await;

        let generator = GeminiGenerator::new(&config("gemini", &server.uri())).unwrap();
        let err = generator.generate("x").await.unwrap_err();
        assert!(matches!(err, AppError::Generation(msg) if msg.contains("SAFETY")));
    }

    #[tokio::test]
    async fn test_gemini_http_error_is_generation_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
            .mount(&server)
            .await;

        let generator = GeminiGenerator::new(&config("gemini", &server.uri())).unwrap();
        let err = generator.generate("x").await.unwrap_err();
        assert!(matches!(err, AppError::Generation(msg) if msg.contains("quota exceeded")));
    }

    #[tokio::test]
    async fn test_ollama_generate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({ "stream": false })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama3.2",
                "response": "haha yeah",
                "done": true,
                "done_reason": "stop"
            })))
            .mount(&server)
            .await;

        let generator = OllamaGenerator::new(&config("ollama", &server.uri())).unwrap();
        let text = generator.generate("p").await.unwrap().into_text();
        assert_eq!(text, "haha yeah");
    }

    #[tokio::test]
    async fn test_ollama_unexpected_shape_falls_back_to_raw() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": "odd"
            })))
            .mount(&server)
            .await;

        let generator = OllamaGenerator::new(&config("ollama", &server.uri())).unwrap();
        let output = generator.generate("p").await.unwrap();
        assert!(matches!(output, GenerationOutput::Raw(_)));
        assert_eq!(output.into_text(), r#"{"message":"odd"}"#);
    }

    #[test]
    fn test_unknown_backend() {
        assert!(create_text_generator(&config("claude", "")).is_err());
    }
}
