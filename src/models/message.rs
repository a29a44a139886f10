use serde::{Deserialize, Serialize};

/// 消息头（仅在行匹配时间戳格式时产生）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeader {
    /// 日期，年份已补全为四位
    pub date: String,
    /// 时间（H:MM 或 HH:MM）
    pub time: String,
    /// 上午/下午标记
    pub meridiem: Option<String>,
    /// 分隔符之后的剩余内容
    pub body: String,
}

impl ParsedHeader {
    /// 规范化的时间戳字符串 "date, time meridiem"
    pub fn datetime(&self) -> String {
        format!(
            "{}, {} {}",
            self.date,
            self.time,
            self.meridiem.as_deref().unwrap_or("")
        )
        .trim()
        .to_string()
    }

    /// 按第一个 ": " 拆分出发送者和正文
    ///
    /// 没有分隔符的系统通知返回 `(None, body)`。
    pub fn split_sender(&self) -> (Option<String>, String) {
        match self.body.split_once(": ") {
            Some((sender, text)) => (Some(sender.trim().to_string()), text.trim().to_string()),
            None => (None, self.body.trim().to_string()),
        }
    }
}

/// 一条完整的聊天消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// 规范化时间戳 "date, time meridiem"
    pub datetime: String,
    /// 发送者；系统通知、媒体占位等为 None
    pub sender: Option<String>,
    /// 消息正文，多行消息以 '\n' 连接
    pub text: String,
}

impl MessageRecord {
    pub fn from_header(header: &ParsedHeader) -> Self {
        let (sender, text) = header.split_sender();
        Self {
            datetime: header.datetime(),
            sender,
            text,
        }
    }

    /// 追加续行
    pub fn append_line(&mut self, line: &str) {
        self.text.push('\n');
        self.text.push_str(line);
    }

    pub fn is_from(&self, sender: &str) -> bool {
        self.sender.as_deref() == Some(sender)
    }
}
