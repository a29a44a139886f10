//! 核心数据模型模块
//!
//! 定义 ChatTwin 的核心数据结构：MessageRecord、PersonaCorpus、ChatStats 等。

pub mod document;
pub mod history;
pub mod message;
pub mod stats;

pub use document::*;
pub use history::*;
pub use message::*;
pub use stats::*;
