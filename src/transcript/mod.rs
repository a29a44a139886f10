//! 聊天记录解析模块
//!
//! 只支持 "date, time - sender: message" 这一种逐行导出格式。

pub mod classifier;
pub mod segmenter;

pub use classifier::{LineKind, classify, classify_line, normalize_line};
pub use segmenter::{SegmentReport, Segmenter, parse_transcript, segment, segment_reader};
