//! 嵌入模型服务

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::config::EmbeddingConfig;
use crate::error::{AppError, Result};

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn encode(&self, text: &str) -> Result<Vec<f32>>;
    async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
    fn dimension(&self) -> usize;
}

/// 离线嵌入模型：词袋特征哈希
///
/// 结果是确定性的，不依赖任何外部服务，适合测试与本地试用。
pub struct SimpleEmbeddingModel {
    dimension: usize,
}

impl SimpleEmbeddingModel {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    // FNV-1a, stable across builds so persisted vectors stay valid
    fn hash_token(token: &str) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);

        for token in tokens {
            let hash = Self::hash_token(&token);
            let slot = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut vector {
                *val /= norm;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingModel for SimpleEmbeddingModel {
    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_sync(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Ollama Embedding 模型客户端
pub struct OllamaEmbeddingModel {
    client: reqwest::Client,
    model_name: String,
    base_url: String,
    dimension: usize,
    batch_size: usize,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbeddingModel {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Embedding(e.to_string()))?;

        Ok(Self {
            client,
            model_name: config.model_name.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            dimension: config.dimension,
            batch_size: config.batch_size.max(1),
        })
    }

    async fn embed(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&serde_json::json!({
                "model": self.model_name,
                "input": texts,
                "truncate": true
            }))
            .send()
            .await
            .map_err(|e| AppError::Embedding(format!("Ollama request failed: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Embedding(format!(
                "Ollama embedding failed: {}",
                error_text
            )));
        }

        let embed_response: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| AppError::Embedding(format!("Invalid Ollama response: {}", e)))?;
        Ok(embed_response.embeddings)
    }
}

#[async_trait]
impl EmbeddingModel for OllamaEmbeddingModel {
    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(vec![text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Embedding("Ollama returned no embedding".into()))
    }

    async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.batch_size) {
            let embeddings = self.embed(chunk.to_vec()).await?;
            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Gemini Embedding 模型客户端
pub struct GeminiEmbeddingModel {
    client: reqwest::Client,
    model_name: String,
    base_url: String,
    api_key: String,
    dimension: usize,
    batch_size: usize,
}

#[derive(Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct GeminiEmbedResponse {
    embedding: GeminiEmbedding,
}

#[derive(Deserialize)]
struct GeminiBatchEmbedResponse {
    embeddings: Vec<GeminiEmbedding>,
}

impl GeminiEmbeddingModel {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Embedding(e.to_string()))?;

        let model_name = if config.model_name.starts_with("models/") {
            config.model_name.clone()
        } else {
            format!("models/{}", config.model_name)
        };

        Ok(Self {
            client,
            model_name,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            dimension: config.dimension,
            // batchEmbedContents accepts at most 100 requests
            batch_size: config.batch_size.clamp(1, 100),
        })
    }

    fn content(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model_name,
            "content": { "parts": [{ "text": text }] }
        })
    }

    async fn post<T: serde::de::DeserializeOwned + Send>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let response = self
            .client
            .post(format!("{}/{}:{}", self.base_url, self.model_name, method))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Embedding(format!("Gemini request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Embedding(format!(
                "Gemini embedding failed ({}): {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Embedding(format!("Invalid Gemini response: {}", e)))
    }
}

#[async_trait]
impl EmbeddingModel for GeminiEmbeddingModel {
    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let response: GeminiEmbedResponse = self.post("embedContent", self.content(text)).await?;
        Ok(response.embedding.values)
    }

    async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.batch_size) {
            let requests: Vec<_> = chunk.iter().map(|text| self.content(text)).collect();
            let response: GeminiBatchEmbedResponse = self
                .post(
                    "batchEmbedContents",
                    serde_json::json!({ "requests": requests }),
                )
                .await?;

            if response.embeddings.len() != chunk.len() {
                return Err(AppError::Embedding(format!(
                    "Gemini returned {} embeddings for {} inputs",
                    response.embeddings.len(),
                    chunk.len()
                )));
            }
            all_embeddings.extend(response.embeddings.into_iter().map(|e| e.values));
        }

        Ok(all_embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

pub fn create_embedding_model(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingModel>> {
    match config.backend.as_str() {
        "gemini" => Ok(Arc::new(GeminiEmbeddingModel::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbeddingModel::new(config)?)),
        "simple" => Ok(Arc::new(SimpleEmbeddingModel::new(config.dimension))),
        other => Err(AppError::Config(format!(
            "Unknown embedding backend: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(backend: &str, base_url: &str, dimension: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            backend: backend.into(),
            base_url: base_url.into(),
            dimension,
            api_key: "test-key".into(),
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_simple_embedding_model() {
        let model: Box<dyn EmbeddingModel> = Box::new(SimpleEmbeddingModel::new(384));

        let result = model.encode("hello world").await.unwrap();
        assert_eq!(result.len(), 384);
        assert_eq!(model.dimension(), 384);

        let norm: f32 = result.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_simple_embedding_is_deterministic_and_case_insensitive() {
        let model = SimpleEmbeddingModel::new(128);
        let a = model.encode("Pizza tonight?").await.unwrap();
        let b = model.encode("pizza TONIGHT").await.unwrap();
        assert_eq!(a, b);

        let empty = model.encode("   ").await.unwrap();
        assert!(empty.iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn test_batch_encoding() {
        let model: Box<dyn EmbeddingModel> = Box::new(SimpleEmbeddingModel::new(384));

        let texts = vec!["hello", "world", "test"];
        let results = model.encode_batch(&texts).await.unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.len() == 384));
    }

    #[tokio::test]
    async fn test_ollama_batches_requests() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1, 0.2], [0.3, 0.4]]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let mut cfg = config("ollama", &server.uri(), 2);
        cfg.batch_size = 2;
        let model = OllamaEmbeddingModel::new(&cfg).unwrap();

        let results = model.encode_batch(&["a", "b", "c", "d"]).await.unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(results[2], vec![0.1f32, 0.2]);
    }

    #[tokio::test]
    async fn test_ollama_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not found"))
            .mount(&server)
            .await;

        let model = OllamaEmbeddingModel::new(&config("ollama", &server.uri(), 2)).unwrap();
        let err = model.encode("hi").await.unwrap_err();
        assert!(matches!(err, AppError::Embedding(msg) if msg.contains("model not found")));
    }

    #[tokio::test]
    async fn test_gemini_embed_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/embedding-001:embedContent"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embedding": { "values": [0.5, 0.25, 0.0] }
            })))
            .mount(&server)
            .await;

        let mut cfg = config("gemini", &server.uri(), 3);
        cfg.model_name = "embedding-001".into();
        let model = GeminiEmbeddingModel::new(&cfg).unwrap();

        assert_eq!(model.encode("hello").await.unwrap(), vec![0.5f32, 0.25, 0.0]);
    }

    #[tokio::test]
    async fn test_gemini_batch_length_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/embedding-001:batchEmbedContents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [{ "values": [1.0] }]
            })))
            .mount(&server)
            .await;

        let model = GeminiEmbeddingModel::new(&config("gemini", &server.uri(), 1)).unwrap();
        let err = model.encode_batch(&["a", "b"]).await.unwrap_err();
        assert!(matches!(err, AppError::Embedding(_)));
    }

    #[test]
    fn test_unknown_backend() {
        let err = create_embedding_model(&config("faiss", "", 8)).err().unwrap();
        assert!(matches!(err, AppError::Config(_)));
    }
}
