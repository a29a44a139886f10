//! 行分类器
//!
//! 判断一行文本是新消息的消息头还是上一条消息的续行。

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

use crate::models::message::ParsedHeader;

/// 导出文件中常见的不可见字符：被替换为普通空格的
const SPACE_LIKE: [char; 2] = ['\u{00A0}', '\u{202F}'];
/// 被直接删除的方向标记与 BOM
const INVISIBLE: [char; 3] = ['\u{200E}', '\u{200F}', '\u{FEFF}'];

// [date, time meridiem] - body
static HEADER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\[?(?P<dm>\d{1,2}[/-]\d{1,2}[/-])(?P<year>\d{4}|\d{2}),\s*(?P<time>\d{1,2}:\d{2})\s*(?P<meridiem>(?i:am|pm))?\]?\s*[-–]\s*(?P<body>.*)$",
    )
    .expect("header pattern is valid")
});

/// 行类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// 新消息的开始
    Header(ParsedHeader),
    /// 上一条消息的续行
    Continuation(String),
}

/// 替换不换行空格并删除方向标记
pub fn normalize_line(line: &str) -> Cow<'_, str> {
    if !line
        .chars()
        .any(|c| SPACE_LIKE.contains(&c) || INVISIBLE.contains(&c))
    {
        return Cow::Borrowed(line);
    }

    Cow::Owned(
        line.chars()
            .filter(|c| !INVISIBLE.contains(c))
            .map(|c| if SPACE_LIKE.contains(&c) { ' ' } else { c })
            .collect(),
    )
}

/// 两位年份补全为四位
fn expand_year(year: &str) -> Cow<'_, str> {
    if year.len() == 2 {
        Cow::Owned(format!("20{}", year))
    } else {
        Cow::Borrowed(year)
    }
}

/// 解析消息头；不匹配时返回 None（即续行）
pub fn classify(line: &str) -> Option<ParsedHeader> {
    let normalized = normalize_line(line);
    let caps = HEADER_PATTERN.captures(normalized.trim_start().trim_end_matches(['\r', '\n']))?;

    let date = format!("{}{}", &caps["dm"], expand_year(&caps["year"]));
    let meridiem = caps.name("meridiem").map(|m| m.as_str().to_string());

    Some(ParsedHeader {
        date,
        time: caps["time"].to_string(),
        meridiem,
        // 保留行尾空白："Alice: " 仍需按 ": " 拆出发送者
        body: caps["body"].to_string(),
    })
}

/// 分类一行，续行内容已规范化并去除首尾空白
pub fn classify_line(line: &str) -> LineKind {
    match classify(line) {
        Some(header) => LineKind::Header(header),
        None => LineKind::Continuation(normalize_line(line).trim().to_string()),
    }
}
