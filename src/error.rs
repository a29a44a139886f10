//! 错误处理模块
//!
//! 定义应用程序的错误类型。解析阶段从不返回错误，
//! 存储与生成阶段的错误统一通过 `AppError` 向调用方传播。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 应用程序错误类型
#[derive(Error, Debug)]
pub enum AppError {
    /// 构建人格知识库时没有可用消息
    #[error("没有可用于构建人格 '{0}' 的消息")]
    EmptyCorpus(String),

    /// 已持久化的索引存在但无法加载
    #[error("人格存储已损坏: {0}")]
    StoreCorruption(String),

    /// 文本生成失败
    #[error("文本生成失败: {0}")]
    Generation(String),

    /// 人格名称不合法
    #[error("人格名称无效: {0}")]
    InvalidPersona(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(String),

    /// 向量索引错误
    #[error("向量索引错误: {0}")]
    VectorIndex(String),

    /// 嵌入模型错误
    #[error("嵌入模型错误: {0}")]
    Embedding(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(String),
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

impl From<figment::Error> for AppError {
    fn from(e: figment::Error) -> Self {
        AppError::Config(e.to_string())
    }
}

/// 错误报告，宿主据此向用户展示错误并决定是否提示重试
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorReport {
    /// 错误代码
    pub code: String,
    /// 错误消息
    pub message: String,
    /// 调用方是否可以重试
    pub retryable: bool,
}

impl From<&AppError> for ErrorReport {
    fn from(err: &AppError) -> Self {
        let (code, retryable) = match err {
            AppError::EmptyCorpus(_) => ("EMPTY_CORPUS", false),
            AppError::StoreCorruption(_) => ("STORE_CORRUPTION", false),
            AppError::Generation(_) => ("GENERATION_FAILURE", true),
            AppError::InvalidPersona(_) => ("INVALID_PERSONA", false),
            AppError::Config(_) => ("CONFIG_ERROR", false),
            AppError::VectorIndex(_) => ("INDEX_ERROR", false),
            AppError::Embedding(_) => ("EMBEDDING_ERROR", true),
            AppError::Serialization(_) => ("SERIALIZATION_ERROR", false),
            AppError::Io(_) => ("IO_ERROR", true),
        };
        Self {
            code: code.to_string(),
            message: err.to_string(),
            retryable,
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;
