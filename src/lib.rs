//! ChatTwin - 聊天记录人格模拟
//!
//! 解析聊天导出文本，统计发送者，为选定的发送者构建可持久化的向量知识库，
//! 并基于检索到的过往消息以其口吻生成回复。

pub mod app;
pub mod config;
pub mod error;
pub mod index;
pub mod models;
pub mod observability;
pub mod services;
pub mod transcript;

pub use app::{ChatTwin, TranscriptAnalysis};
pub use error::{AppError, Result};
