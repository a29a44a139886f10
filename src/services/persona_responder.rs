//! 人格回复服务
//!
//! 每次调用都重新检索并生成：MMR 检索过往消息 → 组装角色提示词 → 调用生成模型。
//! 对话历史由调用方传入，本服务不保存任何跨调用状态。

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::config::RetrievalConfig;
use crate::error::{AppError, Result};
use crate::index::vector::{SearchMode, VectorSearchResult};
use crate::models::history::{ConversationHistory, Role};
use crate::services::generation::TextGenerator;
use crate::services::persona_store::StoreHandle;

/// 调试日志中提示词预览的最大字符数
const PROMPT_PREVIEW_CHARS: usize = 700;

pub struct PersonaResponder {
    generator: Arc<dyn TextGenerator>,
    config: RetrievalConfig,
}

impl PersonaResponder {
    pub fn new(generator: Arc<dyn TextGenerator>, config: RetrievalConfig) -> Self {
        Self { generator, config }
    }

    pub fn search_mode(&self) -> SearchMode {
        SearchMode::Mmr {
            fetch_k: self.config.fetch_k.max(self.config.k),
            lambda: self.config.lambda,
        }
    }

    /// 检索与查询相关且彼此不重复的过往消息
    pub async fn retrieve(&self, query: &str, store: &StoreHandle) -> Result<Vec<VectorSearchResult>> {
        store
            .index()
            .search(query, self.config.k, self.search_mode())
            .await
    }

    /// 组装提示词
    pub fn build_prompt(
        &self,
        persona_name: &str,
        query: &str,
        passages: &[String],
        history: &ConversationHistory,
    ) -> String {
        let context = passages.join("\n\n");

        let mut prompt = format!(
            r#"
You are simulating a person named **'{persona}'**, based on their chat messages.

Your job is to **respond like them**, not just copy-paste old messages. You must:
- Speak in their usual tone, mood, slang, or expressions.
- Reference events, jokes, or incidents from their past messages when relevant.
- Maintain consistency in personality (e.g., sarcastic, kind, dry, emotional, etc.).
- Recall things they used to care about, complain about, or mention frequently.
- You are them, because you have their chat history as context.

--- PAST CHAT CONTEXT ---
{context}
--------------------------
"#,
            persona = persona_name,
            context = context,
        );

        let recent = history.recent(self.config.history_turns);
        if !recent.is_empty() {
            prompt.push_str("\n--- CURRENT CONVERSATION ---\n");
            for turn in recent {
                let speaker = match turn.role {
                    Role::User => "User",
                    Role::Persona => persona_name,
                };
                prompt.push_str(&format!("{}: {}\n", speaker, turn.content));
            }
            prompt.push_str("----------------------------\n");
        }

        prompt.push_str(&format!(
            "\nNow, given this situation or question:\n{query}\n\nRespond just like *{persona}* would:\n",
            query = query,
            persona = persona_name,
        ));
        prompt
    }

    /// 生成人格回复
    pub async fn respond(
        &self,
        query: &str,
        store: &StoreHandle,
        persona_name: &str,
        history: &ConversationHistory,
    ) -> Result<String> {
        if store.persona() != persona_name {
            warn!(
                store = store.persona(),
                persona = persona_name,
                "Responding with a store built for a different persona"
            );
        }

        let passages: Vec<String> = self
            .retrieve(query, store)
            .await?
            .into_iter()
            .map(|result| result.document.content)
            .collect();
        info!(persona = persona_name, passages = passages.len(), "Retrieved context");

        let prompt = self.build_prompt(persona_name, query, &passages, history);
        debug!(
            preview = %prompt.chars().take(PROMPT_PREVIEW_CHARS).collect::<String>(),
            "Prompt preview"
        );

        let reply = self.generator.generate(&prompt).await?.into_text();
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(AppError::Generation("model returned an empty reply".into()));
        }
        Ok(reply.to_string())
    }
}
