use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 人格存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// 向量索引根目录（每个人格一个子目录）
    pub vectorstore_dir: PathBuf,
    /// 原始消息文本备份目录（每个人格一个 .txt 文件）
    pub chats_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            vectorstore_dir: PathBuf::from("vectorstores"),
            chats_dir: PathBuf::from("chats"),
        }
    }
}

/// 嵌入模型配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding 后端类型: "gemini"、"ollama" 或 "simple"
    pub backend: String,
    /// 模型名称
    pub model_name: String,
    /// 向量维度
    pub dimension: usize,
    /// API 密钥（gemini 后端使用）
    pub api_key: String,
    /// 服务地址
    pub base_url: String,
    /// 请求超时（秒）
    pub timeout_secs: u64,
    /// 批处理大小
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "simple".into(),
            model_name: "models/embedding-001".into(),
            dimension: 768,
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            timeout_secs: 60,
            batch_size: 32,
        }
    }
}

/// 文本生成配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// 生成后端类型: "gemini" 或 "ollama"
    pub backend: String,
    /// 模型名称
    pub model_name: String,
    /// 采样温度
    pub temperature: f32,
    /// API 密钥（gemini 后端使用）
    pub api_key: String,
    /// 服务地址
    pub base_url: String,
    /// 请求超时（秒）
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend: "gemini".into(),
            model_name: "gemini-2.0-flash".into(),
            temperature: 0.7,
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            timeout_secs: 120,
        }
    }
}

/// 检索配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// 返回的片段数量
    pub k: usize,
    /// MMR 候选集大小
    pub fetch_k: usize,
    /// MMR 相关性权重（1.0 = 只看相关性，0.0 = 只看多样性）
    pub lambda: f32,
    /// 提示词中保留的最近对话轮数
    pub history_turns: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 20,
            fetch_k: 50,
            lambda: 0.5,
            history_turns: 6,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: String,
    /// 结构化日志格式
    pub structured: bool,
    /// 日志文件目录
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            structured: false,
            log_dir: None,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// 人格存储配置
    pub store: StoreConfig,
    /// 嵌入模型配置
    pub embedding: EmbeddingConfig,
    /// 文本生成配置
    pub generation: GenerationConfig,
    /// 检索配置
    pub retrieval: RetrievalConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 内置默认值的预设
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    /// 离线：simple 嵌入 + 本地 Ollama 生成
    #[default]
    Development,
    /// Gemini 嵌入与生成，JSON 日志
    Production,
}

impl std::str::FromStr for Profile {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown profile: {}", other)),
        }
    }
}

impl AppConfig {
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Development => Self::development(),
            Profile::Production => Self::production(),
        }
    }

    /// 创建离线开发配置：本地 Ollama 生成 + simple 嵌入
    pub fn development() -> Self {
        let mut config = Self::default();
        config.logging.level = "debug".into();
        config.embedding.backend = "simple".into();
        config.embedding.dimension = 384;
        config.generation.backend = "ollama".into();
        config.generation.model_name = "llama3.2".into();
        config.generation.base_url = "http://localhost:11434".into();
        config
    }

    /// 创建生产配置：Gemini 嵌入与生成
    pub fn production() -> Self {
        let mut config = Self::default();
        config.embedding.backend = "gemini".into();
        config.generation.backend = "gemini".into();
        config.logging.structured = true;
        config
    }
}
