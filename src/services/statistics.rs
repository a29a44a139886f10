//! 统计服务

use std::collections::HashMap;

use crate::models::message::MessageRecord;
use crate::models::stats::{ChatStats, SenderCount};

/// 统计中保留的发送者数量
pub const TOP_SENDERS: usize = 3;

/// 单次遍历计算统计摘要
///
/// 排名按消息数降序，数量相同时按首次出现顺序。
pub fn aggregate(records: &[MessageRecord]) -> ChatStats {
    // sender -> (count, first appearance)
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();

    for record in records {
        if let Some(sender) = record.sender.as_deref() {
            let next_rank = counts.len();
            counts.entry(sender).or_insert((0, next_rank)).0 += 1;
        }
    }

    let distinct_senders = counts.len();
    let mut ranked: Vec<_> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.0.cmp(&a.1.0).then(a.1.1.cmp(&b.1.1)));

    ChatStats {
        total_messages: records.len(),
        distinct_senders,
        top_senders: ranked
            .into_iter()
            .take(TOP_SENDERS)
            .map(|(sender, (count, _))| SenderCount {
                sender: sender.to_string(),
                count,
            })
            .collect(),
    }
}

/// 按首次出现顺序列出所有发送者
pub fn sender_names(records: &[MessageRecord]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    records
        .iter()
        .filter_map(|record| record.sender.as_deref())
        .filter(|sender| seen.insert(*sender))
        .map(str::to_string)
        .collect()
}
