use serde::{Deserialize, Serialize};

/// 单个发送者的消息数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderCount {
    pub sender: String,
    pub count: usize,
}

/// 聊天记录统计摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChatStats {
    /// 消息总数（包含系统通知）
    pub total_messages: usize,
    /// 不同发送者数量
    pub distinct_senders: usize,
    /// 消息最多的发送者，按数量降序
    pub top_senders: Vec<SenderCount>,
}
