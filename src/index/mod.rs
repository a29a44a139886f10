//! 索引模块

pub mod embedding;
pub mod vector;

pub use embedding::{EmbeddingModel, create_embedding_model};
pub use vector::{
    MemoryVectorIndex, MemoryVectorIndexProvider, SearchMode, VectorIndex, VectorIndexProvider,
    VectorSearchResult, create_vector_index_provider,
};
