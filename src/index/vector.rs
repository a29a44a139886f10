//! 向量索引服务
//!
//! 内存向量索引，支持相似度检索与 MMR（最大边际相关性）检索，
//! 并以 JSON 文件形式持久化到人格目录中。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::index::embedding::EmbeddingModel;
use crate::models::document::{DocumentMetadata, PersonaDocument};

/// 持久化文件名
pub const INDEX_FILE: &str = "index.json";
const FORMAT_VERSION: u32 = 1;

/// 检索模式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchMode {
    /// 纯相似度排序
    Similarity,
    /// 最大边际相关性：先取 `fetch_k` 个候选，再按 `lambda` 平衡相关性与多样性
    Mmr { fetch_k: usize, lambda: f32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSearchResult {
    pub id: String,
    /// 与查询的余弦相似度
    pub score: f32,
    pub document: PersonaDocument,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        mode: SearchMode,
    ) -> Result<Vec<VectorSearchResult>>;
    async fn persist(&self, dir: &Path) -> Result<()>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 向量索引的构建与加载
#[async_trait]
pub trait VectorIndexProvider: Send + Sync {
    async fn build(&self, documents: &[PersonaDocument]) -> Result<Arc<dyn VectorIndex>>;
    async fn load(&self, dir: &Path) -> Result<Arc<dyn VectorIndex>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    id: String,
    content: String,
    metadata: DocumentMetadata,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    format_version: u32,
    build_id: Uuid,
    created_at: DateTime<Utc>,
    dimension: usize,
    entries: Vec<IndexEntry>,
}

pub struct MemoryVectorIndex {
    entries: Vec<IndexEntry>,
    dimension: usize,
    build_id: Uuid,
    created_at: DateTime<Utc>,
    embedding_model: Arc<dyn EmbeddingModel>,
}

impl MemoryVectorIndex {
    /// 为文档逐批计算向量并建立索引
    pub async fn from_documents(
        documents: &[PersonaDocument],
        embedding_model: Arc<dyn EmbeddingModel>,
    ) -> Result<Self> {
        let dimension = embedding_model.dimension();
        let texts: Vec<&str> = documents.iter().map(|d| d.content.as_str()).collect();
        let embeddings = embedding_model.encode_batch(&texts).await?;

        if embeddings.len() != documents.len() {
            return Err(AppError::VectorIndex(format!(
                "Expected {} embeddings, got {}",
                documents.len(),
                embeddings.len()
            )));
        }

        let mut entries = Vec::with_capacity(documents.len());
        for (i, (document, embedding)) in documents.iter().zip(embeddings).enumerate() {
            if embedding.len() != dimension {
                return Err(AppError::VectorIndex(format!(
                    "Embedding dimension {} does not match configured dimension {}",
                    embedding.len(),
                    dimension
                )));
            }
            entries.push(IndexEntry {
                id: format!("doc_{}", i),
                content: document.content.clone(),
                metadata: document.metadata.clone(),
                embedding,
            });
        }

        Ok(Self {
            entries,
            dimension,
            build_id: Uuid::new_v4(),
            created_at: Utc::now(),
            embedding_model,
        })
    }

    /// 从目录加载；文件缺失、无法解析或维度不一致都视为存储损坏
    pub async fn load_local(dir: &Path, embedding_model: Arc<dyn EmbeddingModel>) -> Result<Self> {
        let path = dir.join(INDEX_FILE);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            AppError::StoreCorruption(format!("Cannot read {}: {}", path.display(), e))
        })?;

        let file: IndexFile = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::StoreCorruption(format!("Cannot decode {}: {}", path.display(), e))
        })?;

        if file.format_version != FORMAT_VERSION {
            return Err(AppError::StoreCorruption(format!(
                "Unsupported index format version {}",
                file.format_version
            )));
        }

        if file.dimension != embedding_model.dimension() {
            return Err(AppError::StoreCorruption(format!(
                "Index dimension {} does not match embedding model dimension {}",
                file.dimension,
                embedding_model.dimension()
            )));
        }

        if let Some(bad) = file.entries.iter().find(|e| e.embedding.len() != file.dimension) {
            return Err(AppError::StoreCorruption(format!(
                "Entry {} has {} dimensions, expected {}",
                bad.id,
                bad.embedding.len(),
                file.dimension
            )));
        }

        Ok(Self {
            entries: file.entries,
            dimension: file.dimension,
            build_id: file.build_id,
            created_at: file.created_at,
            embedding_model,
        })
    }

    pub fn build_id(&self) -> Uuid {
        self.build_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }

        let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        dot_product / (norm_a * norm_b)
    }

    /// 按相似度降序返回 (条目下标, 分数)
    fn ranked(&self, query: &[f32], limit: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, Self::cosine_similarity(query, &entry.embedding)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(limit);
        scored
    }

    fn result(&self, index: usize, score: f32) -> VectorSearchResult {
        let entry = &self.entries[index];
        VectorSearchResult {
            id: entry.id.clone(),
            score,
            document: PersonaDocument {
                content: entry.content.clone(),
                metadata: entry.metadata.clone(),
            },
        }
    }
}

/// 最大边际相关性选择
///
/// `query_scores[i]` 是候选 i 与查询的相似度；返回被选中候选的下标，按选择顺序。
pub fn mmr_select(
    query_scores: &[f32],
    candidates: &[&[f32]],
    k: usize,
    lambda: f32,
) -> Vec<usize> {
    let k = k.min(candidates.len());
    let mut selected: Vec<usize> = Vec::with_capacity(k);
    // max similarity of each candidate to anything already selected
    let mut redundancy = vec![f32::NEG_INFINITY; candidates.len()];

    while selected.len() < k {
        let mut best: Option<(usize, f32)> = None;

        for (i, query_score) in query_scores.iter().enumerate() {
            if selected.contains(&i) {
                continue;
            }
            let penalty = if selected.is_empty() { 0.0 } else { redundancy[i] };
            let score = lambda * query_score - (1.0 - lambda) * penalty;
            if best.is_none_or(|(_, b)| score > b) {
                best = Some((i, score));
            }
        }

        let Some((chosen, _)) = best else { break };
        selected.push(chosen);

        for (i, candidate) in candidates.iter().enumerate() {
            let sim = MemoryVectorIndex::cosine_similarity(candidates[chosen], candidate);
            if sim > redundancy[i] {
                redundancy[i] = sim;
            }
        }
    }

    selected
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        mode: SearchMode,
    ) -> Result<Vec<VectorSearchResult>> {
        if limit == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedding_model.encode(query).await?;
        if query_embedding.len() != self.dimension {
            return Err(AppError::VectorIndex(format!(
                "Query embedding has {} dimensions, index has {}",
                query_embedding.len(),
                self.dimension
            )));
        }

        match mode {
            SearchMode::Similarity => Ok(self
                .ranked(&query_embedding, limit)
                .into_iter()
                .map(|(i, score)| self.result(i, score))
                .collect()),
            SearchMode::Mmr { fetch_k, lambda } => {
                let candidates = self.ranked(&query_embedding, fetch_k.max(limit));
                let scores: Vec<f32> = candidates.iter().map(|(_, s)| *s).collect();
                let vectors: Vec<&[f32]> = candidates
                    .iter()
                    .map(|(i, _)| self.entries[*i].embedding.as_slice())
                    .collect();

                Ok(mmr_select(&scores, &vectors, limit, lambda)
                    .into_iter()
                    .map(|c| self.result(candidates[c].0, candidates[c].1))
                    .collect())
            }
        }
    }

    async fn persist(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;

        let file = IndexFile {
            format_version: FORMAT_VERSION,
            build_id: self.build_id,
            created_at: self.created_at,
            dimension: self.dimension,
            entries: self.entries.clone(),
        };
        let bytes = serde_json::to_vec(&file)?;

        // write-then-rename: index.json is either absent or complete
        let tmp = dir.join(format!("{}.tmp", INDEX_FILE));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, dir.join(INDEX_FILE)).await?;

        tracing::debug!(
            path = %dir.display(),
            entries = self.entries.len(),
            "Vector index persisted"
        );
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// 基于 [`MemoryVectorIndex`] 的提供者
pub struct MemoryVectorIndexProvider {
    embedding_model: Arc<dyn EmbeddingModel>,
}

impl MemoryVectorIndexProvider {
    pub fn new(embedding_model: Arc<dyn EmbeddingModel>) -> Self {
        Self { embedding_model }
    }
}

#[async_trait]
impl VectorIndexProvider for MemoryVectorIndexProvider {
    async fn build(&self, documents: &[PersonaDocument]) -> Result<Arc<dyn VectorIndex>> {
        let index = MemoryVectorIndex::from_documents(documents, self.embedding_model.clone()).await?;
        Ok(Arc::new(index))
    }

    async fn load(&self, dir: &Path) -> Result<Arc<dyn VectorIndex>> {
        let index = MemoryVectorIndex::load_local(dir, self.embedding_model.clone()).await?;
        tracing::info!(
            build_id = %index.build_id(),
            created_at = %index.created_at(),
            entries = index.len(),
            "Vector index loaded"
        );
        Ok(Arc::new(index))
    }
}

pub fn create_vector_index_provider(
    embedding_model: Arc<dyn EmbeddingModel>,
) -> Arc<dyn VectorIndexProvider> {
    Arc::new(MemoryVectorIndexProvider::new(embedding_model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::embedding::SimpleEmbeddingModel;

    fn document(content: &str) -> PersonaDocument {
        PersonaDocument {
            content: content.to_string(),
            metadata: DocumentMetadata {
                sender: "Alice".to_string(),
                datetime: "1/1/2023, 1:00 PM".to_string(),
            },
        }
    }

    fn model() -> Arc<dyn EmbeddingModel> {
        Arc::new(SimpleEmbeddingModel::new(64))
    }

    #[tokio::test]
    async fn test_memory_vector_index_build_and_search() {
        let docs = vec![
            document("pizza tonight at the usual place"),
            document("my cat knocked over the plant again"),
            document("exam tomorrow, wish me luck"),
        ];
        let index = MemoryVectorIndex::from_documents(&docs, model()).await.unwrap();
        assert_eq!(index.len(), 3);

        let results = index
            .search("is the cat ok", 1, SearchMode::Similarity)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.content, "my cat knocked over the plant again");
        assert_eq!(results[0].document.metadata.sender, "Alice");
    }

    #[tokio::test]
    async fn test_mmr_skips_near_duplicates() {
        let docs = vec![
            document("pizza pizza pizza"),
            document("pizza pizza pizza"),
            document("pizza and a movie"),
            document("unrelated gardening chat"),
        ];
        let index = MemoryVectorIndex::from_documents(&docs, model()).await.unwrap();

        let similar = index
            .search("pizza", 2, SearchMode::Similarity)
            .await
            .unwrap();
        assert_eq!(similar[0].document.content, similar[1].document.content);

        let diverse = index
            .search("pizza", 2, SearchMode::Mmr { fetch_k: 4, lambda: 0.25 })
            .await
            .unwrap();
        assert_eq!(diverse.len(), 2);
        assert_ne!(diverse[0].document.content, diverse[1].document.content);
    }

    #[test]
    fn test_mmr_select_lambda_one_is_plain_ranking() {
        let a = [1.0f32, 0.0];
        let b = [1.0f32, 0.0];
        let c = [0.0f32, 1.0];
        let candidates: Vec<&[f32]> = vec![&a[..], &b[..], &c[..]];

        assert_eq!(mmr_select(&[0.9, 0.8, 0.1], &candidates, 2, 1.0), vec![0, 1]);
        assert_eq!(mmr_select(&[0.9, 0.8, 0.1], &candidates, 2, 0.5), vec![0, 2]);
        assert_eq!(mmr_select(&[0.9, 0.8, 0.1], &candidates, 10, 0.5).len(), 3);
        assert!(mmr_select(&[], &[], 5, 0.5).is_empty());
    }

    #[tokio::test]
    async fn test_persist_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let docs = vec![document("first"), document("second")];
        let index = MemoryVectorIndex::from_documents(&docs, model()).await.unwrap();
        index.persist(dir.path()).await.unwrap();

        let loaded = MemoryVectorIndex::load_local(dir.path(), model()).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.build_id(), index.build_id());
        assert!(!dir.path().join("index.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_rejects_garbage_and_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INDEX_FILE), b"not json").unwrap();
        let err = MemoryVectorIndex::load_local(dir.path(), model()).await.err().unwrap();
        assert!(matches!(err, AppError::StoreCorruption(_)));

        let index = MemoryVectorIndex::from_documents(&[document("x")], model()).await.unwrap();
        index.persist(dir.path()).await.unwrap();
        let other: Arc<dyn EmbeddingModel> = Arc::new(SimpleEmbeddingModel::new(32));
        let err = MemoryVectorIndex::load_local(dir.path(), other).await.err().unwrap();
        assert!(matches!(err, AppError::StoreCorruption(_)));
    }

    #[tokio::test]
    async fn test_empty_index_search() {
        let index = MemoryVectorIndex::from_documents(&[], model()).await.unwrap();
        assert!(index.is_empty());
        let results = index.search("anything", 5, SearchMode::Similarity).await.unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];

        assert_eq!(MemoryVectorIndex::cosine_similarity(&a, &b), 1.0);
        assert_eq!(MemoryVectorIndex::cosine_similarity(&a, &c), 0.0);
        assert_eq!(MemoryVectorIndex::cosine_similarity(&a, &[1.0]), 0.0);
    }
}
