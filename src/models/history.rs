use serde::{Deserialize, Serialize};

/// 对话角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// 提问的用户
    User,
    /// 被模仿的人格
    Persona,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

/// 对话历史
///
/// 由调用方持有，每次生成回复时显式传入；回复模块本身不保存跨调用状态。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(ConversationTurn {
            role: Role::User,
            content: content.into(),
        });
    }

    pub fn push_persona(&mut self, content: impl Into<String>) {
        self.turns.push(ConversationTurn {
            role: Role::Persona,
            content: content.into(),
        });
    }

    /// 最近的 `n` 轮，按时间顺序
    pub fn recent(&self, n: usize) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_keeps_order() {
        let mut history = ConversationHistory::new();
        history.push_user("one");
        history.push_persona("two");
        history.push_user("three");

        let recent = history.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "two");
        assert_eq!(recent[0].role, Role::Persona);
        assert_eq!(recent[1].content, "three");

        assert_eq!(history.recent(10).len(), 3);
        assert!(history.recent(0).is_empty());
    }

    #[test]
    fn test_clear() {
        let mut history = ConversationHistory::new();
        history.push_user("hi");
        history.clear();
        assert!(history.is_empty());
        assert!(history.recent(6).is_empty());
    }
}
