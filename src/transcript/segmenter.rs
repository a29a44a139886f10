//! 消息分段器
//!
//! 把逐行分类的结果折叠成完整的消息记录。分段过程是一个显式的双状态机：
//!
//! - `AwaitingHeader`：尚未遇到任何消息头，续行被丢弃
//! - `Accumulating`：正在累积一条消息，续行追加到正文
//!
//! 状态转换由纯函数 [`transition`] 完成，分段永远不会失败。

use std::io::BufRead;

use crate::models::message::MessageRecord;
use crate::transcript::classifier::{LineKind, classify_line};

/// 分段状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmenterState {
    AwaitingHeader,
    Accumulating(MessageRecord),
}

/// 一次状态转换的副作用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    None,
    /// 上一条消息已完成
    Finalized(MessageRecord),
    /// 第一个消息头之前的续行被丢弃
    Dropped,
}

/// 状态转换函数
pub fn transition(state: SegmenterState, line: LineKind) -> (SegmenterState, Emission) {
    match (state, line) {
        (SegmenterState::AwaitingHeader, LineKind::Header(header)) => (
            SegmenterState::Accumulating(MessageRecord::from_header(&header)),
            Emission::None,
        ),
        (SegmenterState::Accumulating(current), LineKind::Header(header)) => (
            SegmenterState::Accumulating(MessageRecord::from_header(&header)),
            Emission::Finalized(finalize(current)),
        ),
        (SegmenterState::Accumulating(mut current), LineKind::Continuation(line)) => {
            current.append_line(&line);
            (SegmenterState::Accumulating(current), Emission::None)
        }
        (SegmenterState::AwaitingHeader, LineKind::Continuation(_)) => {
            (SegmenterState::AwaitingHeader, Emission::Dropped)
        }
    }
}

fn finalize(mut record: MessageRecord) -> MessageRecord {
    let trimmed = record.text.trim();
    if trimmed.len() != record.text.len() {
        record.text = trimmed.to_string();
    }
    record
}

/// 分段结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentReport {
    pub records: Vec<MessageRecord>,
    /// 第一个消息头之前被丢弃的行数
    pub dropped_leading_lines: usize,
}

/// 增量分段器
#[derive(Debug)]
pub struct Segmenter {
    state: SegmenterState,
    records: Vec<MessageRecord>,
    dropped_leading_lines: usize,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl Segmenter {
    pub fn new() -> Self {
        Self {
            state: SegmenterState::AwaitingHeader,
            records: Vec::new(),
            dropped_leading_lines: 0,
        }
    }

    pub fn feed(&mut self, line: &str) {
        let state = std::mem::replace(&mut self.state, SegmenterState::AwaitingHeader);
        let (next, emission) = transition(state, classify_line(line));
        self.state = next;

        match emission {
            Emission::Finalized(record) => self.records.push(record),
            Emission::Dropped => self.dropped_leading_lines += 1,
            Emission::None => {}
        }
    }

    /// 结束输入，刷新最后一条消息
    pub fn finish(mut self) -> SegmentReport {
        if let SegmenterState::Accumulating(current) = self.state {
            self.records.push(finalize(current));
        }

        if self.dropped_leading_lines > 0 {
            tracing::debug!(
                dropped = self.dropped_leading_lines,
                "Dropped continuation lines before the first message header"
            );
        }

        SegmentReport {
            records: self.records,
            dropped_leading_lines: self.dropped_leading_lines,
        }
    }
}

/// 把行序列分段为消息记录
pub fn segment<I, S>(lines: I) -> Vec<MessageRecord>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut segmenter = Segmenter::new();
    for line in lines {
        segmenter.feed(line.as_ref());
    }
    segmenter.finish().records
}

/// 解析完整的导出文本
pub fn parse_transcript(text: &str) -> SegmentReport {
    let mut segmenter = Segmenter::new();
    for line in text.split('\n') {
        segmenter.feed(line);
    }
    segmenter.finish()
}

/// 从读取器流式解析，适用于大文件
pub fn segment_reader<R: BufRead>(reader: R) -> std::io::Result<SegmentReport> {
    let mut segmenter = Segmenter::new();
    for line in reader.lines() {
        segmenter.feed(&line?);
    }
    Ok(segmenter.finish())
}
