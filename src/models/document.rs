use serde::{Deserialize, Serialize};

use crate::models::message::MessageRecord;

/// 文档元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DocumentMetadata {
    pub sender: String,
    pub datetime: String,
}

/// 人格语料中的单条文档
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaDocument {
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// 某一发送者的全部消息，按原始顺序排列
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonaCorpus {
    documents: Vec<PersonaDocument>,
}

impl PersonaCorpus {
    pub fn new(documents: Vec<PersonaDocument>) -> Self {
        Self { documents }
    }

    /// 空语料，用于强制从磁盘加载
    pub fn empty() -> Self {
        Self::default()
    }

    /// 从消息流中筛选出指定发送者的消息
    ///
    /// 没有发送者的记录（系统通知）永远不会进入语料。
    pub fn from_records(records: &[MessageRecord], sender: &str) -> Self {
        let documents = records
            .iter()
            .filter(|record| record.is_from(sender))
            .map(|record| PersonaDocument {
                content: record.text.clone(),
                metadata: DocumentMetadata {
                    sender: sender.to_string(),
                    datetime: record.datetime.clone(),
                },
            })
            .collect();
        Self { documents }
    }

    pub fn documents(&self) -> &[PersonaDocument] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
