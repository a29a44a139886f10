//! 应用装配
//!
//! 把解析、统计、知识库构建与回复服务按配置组装在一起，供宿主调用。
//! 嵌入与生成客户端在首次使用时才创建，只读写本地文件的操作不依赖它们。

use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::config::config::AppConfig;
use crate::error::Result;
use crate::index::embedding::{EmbeddingModel, create_embedding_model};
use crate::index::vector::create_vector_index_provider;
use crate::models::document::PersonaCorpus;
use crate::models::history::ConversationHistory;
use crate::models::message::MessageRecord;
use crate::models::stats::ChatStats;
use crate::observability::PipelineMetrics;
use crate::services::generation::{TextGenerator, create_text_generator};
use crate::services::persona_responder::PersonaResponder;
use crate::services::persona_store::{
    FsPersonaStore, PersonaLocks, PersonaStore, PersonaStoreBuilder, StoreHandle, StoreOrigin,
    validate_persona_name,
};
use crate::services::statistics::{aggregate, sender_names};
use crate::transcript::segmenter::parse_transcript;

/// 一次导入的解析结果
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptAnalysis {
    pub stats: ChatStats,
    /// 可供模仿的发送者，按首次出现顺序
    pub senders: Vec<String>,
    pub dropped_leading_lines: usize,
    #[serde(skip)]
    pub records: Vec<MessageRecord>,
}

pub struct ChatTwin {
    config: AppConfig,
    store: Arc<dyn PersonaStore>,
    builder: OnceCell<PersonaStoreBuilder>,
    responder: OnceCell<PersonaResponder>,
    locks: PersonaLocks,
    metrics: PipelineMetrics,
}

impl ChatTwin {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            config: config.clone(),
            store: Arc::new(FsPersonaStore::new(config.store.clone())),
            builder: OnceCell::new(),
            responder: OnceCell::new(),
            locks: PersonaLocks::new(),
            metrics: PipelineMetrics::default(),
        }
    }

    /// 使用给定的嵌入与生成后端
    pub fn new(
        config: &AppConfig,
        embedding_model: Arc<dyn EmbeddingModel>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        let app = Self::from_config(config);
        let builder = PersonaStoreBuilder::new(
            app.store.clone(),
            create_vector_index_provider(embedding_model),
        );
        let responder = PersonaResponder::new(generator, config.retrieval.clone());
        Self {
            builder: OnceCell::with_value(builder),
            responder: OnceCell::with_value(responder),
            ..app
        }
    }

    fn builder(&self) -> Result<&PersonaStoreBuilder> {
        self.builder.get_or_try_init(|| {
            let embedding_model = create_embedding_model(&self.config.embedding)?;
            info!(
                backend = %self.config.embedding.backend,
                model = %self.config.embedding.model_name,
                "Embedding model initialized"
            );
            Ok(PersonaStoreBuilder::new(
                self.store.clone(),
                create_vector_index_provider(embedding_model),
            ))
        })
    }

    fn responder(&self) -> Result<&PersonaResponder> {
        self.responder.get_or_try_init(|| {
            let generator = create_text_generator(&self.config.generation)?;
            info!(
                backend = %self.config.generation.backend,
                model = %self.config.generation.model_name,
                "Text generator initialized"
            );
            Ok(PersonaResponder::new(generator, self.config.retrieval.clone()))
        })
    }

    /// 解析导出文本并计算统计
    pub fn analyze(&self, text: &str) -> TranscriptAnalysis {
        let report = parse_transcript(text);
        self.metrics
            .record_parse(report.records.len(), report.dropped_leading_lines);

        TranscriptAnalysis {
            stats: aggregate(&report.records),
            senders: sender_names(&report.records),
            dropped_leading_lines: report.dropped_leading_lines,
            records: report.records,
        }
    }

    /// 为发送者构建或加载知识库；同名人格的调用被串行化
    pub async fn open_persona(
        &self,
        records: &[MessageRecord],
        persona: &str,
    ) -> Result<StoreHandle> {
        let corpus = PersonaCorpus::from_records(records, persona);
        self.open(&corpus, persona).await
    }

    /// 加载已保存的人格
    pub async fn load_persona(&self, persona: &str) -> Result<StoreHandle> {
        self.open(&PersonaCorpus::empty(), persona).await
    }

    /// 丢弃已有产物并按当前记录重建
    pub async fn rebuild_persona(
        &self,
        records: &[MessageRecord],
        persona: &str,
    ) -> Result<StoreHandle> {
        let corpus = PersonaCorpus::from_records(records, persona);
        let _guard = self.locks.lock(persona).await;
        let handle = async { self.builder()?.rebuild(&corpus, persona).await }
            .await
            .inspect_err(|_| self.metrics.record_error())?;
        self.metrics.record_store(true);
        Ok(handle)
    }

    /// 删除人格的索引与文本备份
    pub async fn forget_persona(&self, persona: &str) -> Result<()> {
        validate_persona_name(persona)?;
        let _guard = self.locks.lock(persona).await;
        self.store.clear(persona).await?;
        info!(persona, "Persona store removed");
        Ok(())
    }

    async fn open(&self, corpus: &PersonaCorpus, persona: &str) -> Result<StoreHandle> {
        let _guard = self.locks.lock(persona).await;
        let handle = async { self.builder()?.build_or_load(corpus, persona).await }
            .await
            .inspect_err(|_| self.metrics.record_error())?;
        self.metrics
            .record_store(handle.origin() == StoreOrigin::Built);
        Ok(handle)
    }

    pub async fn saved_personas(&self) -> Result<Vec<String>> {
        self.store.list_personas().await
    }

    /// 生成回复；成功后把本轮问答追加到调用方的历史中
    pub async fn ask(
        &self,
        query: &str,
        store: &StoreHandle,
        history: &mut ConversationHistory,
    ) -> Result<String> {
        let start = Instant::now();
        let reply = async {
            self.responder()?
                .respond(query, store, store.persona(), history)
                .await
        }
        .await
        .inspect_err(|_| self.metrics.record_error())?;
        self.metrics
            .record_response(start.elapsed().as_millis() as u64);

        history.push_user(query);
        history.push_persona(reply.clone());
        Ok(reply)
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::index::embedding::SimpleEmbeddingModel;
    use crate::services::generation::{GenerationOutput, MockTextGenerator};
    use std::sync::atomic::Ordering;

    const TRANSCRIPT: &str = "\
12/1/2023, 9:00 PM - Messages and calls are end-to-end encrypted.
12/1/2023, 9:05 PM - Alice: hello there
how are you
12/1/2023, 9:06 PM - Bob: good thanks
12/1/2023, 9:07 PM - Alice: pizza later?";

    fn app(root: &std::path::Path, generator: MockTextGenerator) -> ChatTwin {
        let mut config = AppConfig::development();
        config.store.vectorstore_dir = root.join("vectorstores");
        config.store.chats_dir = root.join("chats");
        ChatTwin::new(
            &config,
            Arc::new(SimpleEmbeddingModel::new(config.embedding.dimension)),
            Arc::new(generator),
        )
    }

    #[test]
    fn test_analyze() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), MockTextGenerator::new());

        let analysis = app.analyze(TRANSCRIPT);
        assert_eq!(analysis.stats.total_messages, 4);
        assert_eq!(analysis.stats.distinct_senders, 2);
        assert_eq!(analysis.senders, vec!["Alice", "Bob"]);
        assert_eq!(app.metrics().messages_parsed.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_open_ask_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut generator = MockTextGenerator::new();
        generator
            .expect_generate()
            .times(2)
            .returning(|_| Ok(GenerationOutput::Raw(serde_json::json!("sure thing"))));
        let app = app(dir.path(), generator);

        let analysis = app.analyze(TRANSCRIPT);
        let store = app.open_persona(&analysis.records, "Alice").await.unwrap();
        assert_eq!(store.origin(), StoreOrigin::Built);
        assert_eq!(store.document_count(), 2);

        let mut history = ConversationHistory::new();
        let reply = app.ask("dinner?", &store, &mut history).await.unwrap();
        assert_eq!(reply, "sure thing");
        assert_eq!(history.len(), 2);

        let reloaded = app.load_persona("Alice").await.unwrap();
        assert_eq!(reloaded.origin(), StoreOrigin::Loaded);
        app.ask("again?", &reloaded, &mut history).await.unwrap();
        assert_eq!(history.len(), 4);

        assert_eq!(app.saved_personas().await.unwrap(), vec!["Alice"]);
        assert_eq!(app.metrics().stores_built.load(Ordering::SeqCst), 1);
        assert_eq!(app.metrics().stores_loaded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_ask_leaves_history_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut generator = MockTextGenerator::new();
        generator
            .expect_generate()
            .returning(|_| Err(AppError::Generation("offline".into())));
        let app = app(dir.path(), generator);

        let analysis = app.analyze(TRANSCRIPT);
        let store = app.open_persona(&analysis.records, "Bob").await.unwrap();

        let mut history = ConversationHistory::new();
        assert!(app.ask("hi", &store, &mut history).await.is_err());
        assert!(history.is_empty());
        assert_eq!(app.metrics().errors_total.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rebuild_and_forget() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), MockTextGenerator::new());

        let analysis = app.analyze(TRANSCRIPT);
        app.open_persona(&analysis.records, "Alice").await.unwrap();

        let rebuilt = app.rebuild_persona(&analysis.records, "Alice").await.unwrap();
        assert_eq!(rebuilt.origin(), StoreOrigin::Built);
        assert_eq!(app.metrics().stores_built.load(Ordering::SeqCst), 2);

        app.forget_persona("Alice").await.unwrap();
        assert!(app.saved_personas().await.unwrap().is_empty());
        assert!(matches!(
            app.load_persona("Alice").await.unwrap_err(),
            AppError::EmptyCorpus(_)
        ));
    }

    #[tokio::test]
    async fn test_local_operations_do_not_touch_backends() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::production();
        config.store.vectorstore_dir = dir.path().join("vectorstores");
        config.store.chats_dir = dir.path().join("chats");
        config.embedding.backend = "nonexistent".into();
        config.generation.backend = "nonexistent".into();
        let app = ChatTwin::from_config(&config);

        assert_eq!(app.analyze(TRANSCRIPT).stats.total_messages, 4);
        assert!(app.saved_personas().await.unwrap().is_empty());
        app.forget_persona("Alice").await.unwrap();

        let err = app.load_persona("Alice").await.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[tokio::test]
    async fn test_generator_is_created_on_first_ask() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::development();
        config.store.vectorstore_dir = dir.path().join("vectorstores");
        config.store.chats_dir = dir.path().join("chats");
        config.generation.backend = "nonexistent".into();
        let app = ChatTwin::from_config(&config);

        let analysis = app.analyze(TRANSCRIPT);
        let store = app.open_persona(&analysis.records, "Alice").await.unwrap();

        let mut history = ConversationHistory::new();
        let err = app.ask("hi", &store, &mut history).await.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_sender_has_empty_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), MockTextGenerator::new());

        let analysis = app.analyze(TRANSCRIPT);
        let err = app.open_persona(&analysis.records, "Zed").await.unwrap_err();
        assert!(matches!(err, AppError::EmptyCorpus(_)));
    }
}
