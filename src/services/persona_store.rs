//! 人格知识库构建服务
//!
//! 每个人格在磁盘上对应两个产物：
//! - `<vectorstore_dir>/<persona>/`：向量索引目录
//! - `<chats_dir>/<persona>.txt`：原始消息备份，每行一条
//!
//! 两者同时存在即视为已构建，直接加载；否则删除残留产物后整体重建。
//! 同一人格的并发构建由调用方负责串行化（见 [`PersonaLocks`]）。

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::config::config::StoreConfig;
use crate::error::{AppError, Result};
use crate::index::vector::{VectorIndex, VectorIndexProvider};
use crate::models::document::PersonaCorpus;

/// 人格存储的磁盘布局
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersonaStore: Send + Sync {
    /// 文本备份与索引目录是否都存在
    fn exists(&self, persona: &str) -> bool;
    fn index_dir(&self, persona: &str) -> PathBuf;
    fn dump_path(&self, persona: &str) -> PathBuf;
    /// 删除该人格的所有产物（不存在时忽略）
    async fn clear(&self, persona: &str) -> Result<()>;
    async fn write_dump(&self, persona: &str, corpus: &PersonaCorpus) -> Result<()>;
    /// 已保存的人格名称，按字母排序
    async fn list_personas(&self) -> Result<Vec<String>>;
}

/// 基于文件系统的人格存储
pub struct FsPersonaStore {
    config: StoreConfig,
}

impl FsPersonaStore {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PersonaStore for FsPersonaStore {
    fn exists(&self, persona: &str) -> bool {
        self.index_dir(persona).is_dir() && self.dump_path(persona).is_file()
    }

    fn index_dir(&self, persona: &str) -> PathBuf {
        self.config.vectorstore_dir.join(persona)
    }

    fn dump_path(&self, persona: &str) -> PathBuf {
        self.config.chats_dir.join(format!("{}.txt", persona))
    }

    async fn clear(&self, persona: &str) -> Result<()> {
        let index_dir = self.index_dir(persona);
        if tokio::fs::try_exists(&index_dir).await? {
            tokio::fs::remove_dir_all(&index_dir).await?;
        }

        let dump_path = self.dump_path(persona);
        if tokio::fs::try_exists(&dump_path).await? {
            tokio::fs::remove_file(&dump_path).await?;
        }
        Ok(())
    }

    async fn write_dump(&self, persona: &str, corpus: &PersonaCorpus) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.chats_dir).await?;

        let mut dump = String::new();
        for document in corpus.documents() {
            dump.push_str(&escape_dump_line(&document.content));
            dump.push('\n');
        }
        tokio::fs::write(self.dump_path(persona), dump).await?;
        Ok(())
    }

    async fn list_personas(&self) -> Result<Vec<String>> {
        let mut personas = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.config.vectorstore_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(personas),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    personas.push(name.to_string());
                }
            }
        }
        personas.sort();
        Ok(personas)
    }
}

/// 备份文件每行一条消息：先转义 `\`，再把换行写成 `\n`，可无歧义还原
fn escape_dump_line(content: &str) -> String {
    content.replace('\\', "\\\\").replace('\n', "\\n")
}

/// 知识库来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOrigin {
    Built,
    Loaded,
}

/// 已构建或已加载的人格知识库
#[derive(Clone)]
pub struct StoreHandle {
    persona: String,
    index: Arc<dyn VectorIndex>,
    origin: StoreOrigin,
}

impl StoreHandle {
    pub fn new(persona: impl Into<String>, index: Arc<dyn VectorIndex>, origin: StoreOrigin) -> Self {
        Self {
            persona: persona.into(),
            index,
            origin,
        }
    }

    pub fn persona(&self) -> &str {
        &self.persona
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn origin(&self) -> StoreOrigin {
        self.origin
    }

    pub fn document_count(&self) -> usize {
        self.index.len()
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("persona", &self.persona)
            .field("documents", &self.index.len())
            .field("origin", &self.origin)
            .finish()
    }
}

/// 人格名称会成为路径的一部分，必须是单个安全的路径组件
pub fn validate_persona_name(persona: &str) -> Result<()> {
    let trimmed = persona.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidPersona("name is empty".into()));
    }
    if trimmed != persona {
        return Err(AppError::InvalidPersona(format!(
            "'{}' has leading or trailing whitespace",
            persona
        )));
    }
    if persona == "." || persona == ".." {
        return Err(AppError::InvalidPersona(format!("'{}' is reserved", persona)));
    }
    if persona.contains(['/', '\\', '\0']) {
        return Err(AppError::InvalidPersona(format!(
            "'{}' contains a path separator",
            persona
        )));
    }
    Ok(())
}

/// 人格知识库构建器
pub struct PersonaStoreBuilder {
    store: Arc<dyn PersonaStore>,
    provider: Arc<dyn VectorIndexProvider>,
}

impl PersonaStoreBuilder {
    pub fn new(store: Arc<dyn PersonaStore>, provider: Arc<dyn VectorIndexProvider>) -> Self {
        Self { store, provider }
    }

    pub fn store(&self) -> &Arc<dyn PersonaStore> {
        &self.store
    }

    /// 已存在则加载（忽略 corpus），否则用 corpus 整体重建
    pub async fn build_or_load(&self, corpus: &PersonaCorpus, persona: &str) -> Result<StoreHandle> {
        validate_persona_name(persona)?;

        if self.store.exists(persona) {
            info!(persona, "Loading existing persona store");
            let index = self.provider.load(&self.store.index_dir(persona)).await?;
            return Ok(StoreHandle::new(persona, index, StoreOrigin::Loaded));
        }

        self.build(corpus, persona).await
    }

    /// 删除已有产物后重建；用于运维人员显式修复损坏的存储
    pub async fn rebuild(&self, corpus: &PersonaCorpus, persona: &str) -> Result<StoreHandle> {
        validate_persona_name(persona)?;
        self.build(corpus, persona).await
    }

    async fn build(&self, corpus: &PersonaCorpus, persona: &str) -> Result<StoreHandle> {
        if corpus.is_empty() {
            return Err(AppError::EmptyCorpus(persona.to_string()));
        }

        info!(persona, documents = corpus.len(), "Rebuilding persona store");
        self.store.clear(persona).await?;

        let index = self.provider.build(corpus.documents()).await?;

        // the index directory is written last: its presence marks a complete store
        let written = async {
            self.store.write_dump(persona, corpus).await?;
            index.persist(&self.store.index_dir(persona)).await
        }
        .await;

        if let Err(e) = written {
            warn!(persona, error = %e, "Persona store build failed, removing partial artifacts");
            if let Err(cleanup) = self.store.clear(persona).await {
                warn!(persona, error = %cleanup, "Failed to remove partial artifacts");
            }
            return Err(e);
        }

        info!(persona, documents = index.len(), "Persona store built");
        Ok(StoreHandle::new(persona, index, StoreOrigin::Built))
    }
}

/// 按人格名称划分的异步锁
///
/// 构建器本身不做协调；宿主在调用构建前获取对应人格的锁。
#[derive(Default)]
pub struct PersonaLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PersonaLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, persona: &str) -> PersonaGuard<'_> {
        let mutex = self
            .locks
            .entry(persona.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        PersonaGuard {
            locks: self,
            persona: persona.to_string(),
            guard: Some(mutex.lock_owned().await),
        }
    }
}

/// 持有期间独占该人格；释放时若无人等待则移除登记项
pub struct PersonaGuard<'a> {
    locks: &'a PersonaLocks,
    persona: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PersonaGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // entry() and remove_if() hold the same shard lock
        self.locks
            .locks
            .remove_if(&self.persona, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
