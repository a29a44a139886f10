//! 可观测性模块
//!
//! 提供结构化日志初始化和流水线计数指标。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::config::LoggingConfig;

// ===== Pipeline Metrics =====

/// 流水线指标
#[derive(Clone, Default)]
pub struct PipelineMetrics {
    pub messages_parsed: Arc<AtomicU64>,
    pub lines_dropped: Arc<AtomicU64>,
    pub stores_built: Arc<AtomicU64>,
    pub stores_loaded: Arc<AtomicU64>,
    pub responses_total: Arc<AtomicU64>,
    pub response_latency_sum: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
}

impl PipelineMetrics {
    /// 记录一次解析
    pub fn record_parse(&self, messages: usize, dropped: usize) {
        self.messages_parsed
            .fetch_add(messages as u64, Ordering::SeqCst);
        self.lines_dropped.fetch_add(dropped as u64, Ordering::SeqCst);
    }

    /// 记录知识库构建或加载
    pub fn record_store(&self, built: bool) {
        let counter = if built {
            &self.stores_built
        } else {
            &self.stores_loaded
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    /// 记录一次回复
    pub fn record_response(&self, duration_ms: u64) {
        self.responses_total.fetch_add(1, Ordering::SeqCst);
        self.response_latency_sum
            .fetch_add(duration_ms, Ordering::SeqCst);
    }

    /// 记录错误
    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::SeqCst);
    }

    /// 生成 Prometheus 文本格式
    pub fn gather(&self) -> String {
        format!(
            r#"# HELP chattwin_messages_parsed_total Messages produced by the segmenter
# TYPE chattwin_messages_parsed_total counter
chattwin_messages_parsed_total {}
# HELP chattwin_lines_dropped_total Continuation lines dropped before the first header
# TYPE chattwin_lines_dropped_total counter
chattwin_lines_dropped_total {}
# HELP chattwin_stores_built_total Persona stores built
# TYPE chattwin_stores_built_total counter
chattwin_stores_built_total {}
# HELP chattwin_stores_loaded_total Persona stores loaded from disk
# TYPE chattwin_stores_loaded_total counter
chattwin_stores_loaded_total {}
# HELP chattwin_response_latency_seconds Persona response latency in seconds
# TYPE chattwin_response_latency_seconds summary
chattwin_response_latency_seconds_sum {}
chattwin_response_latency_seconds_count {}
# HELP chattwin_errors_total Total errors
# TYPE chattwin_errors_total counter
chattwin_errors_total {}
"#,
            self.messages_parsed.load(Ordering::SeqCst),
            self.lines_dropped.load(Ordering::SeqCst),
            self.stores_built.load(Ordering::SeqCst),
            self.stores_loaded.load(Ordering::SeqCst),
            self.response_latency_sum.load(Ordering::SeqCst) as f64 / 1000.0,
            self.responses_total.load(Ordering::SeqCst),
            self.errors_total.load(Ordering::SeqCst),
        )
    }
}

// ===== Structured Logging =====

/// 初始化结构化日志
///
/// `RUST_LOG` 优先于配置中的级别；配置了 `log_dir` 时按天滚动写入文件，
/// 否则写到 stderr。返回的 guard 必须持有到进程结束。
pub fn init_tracing(config: &LoggingConfig) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (writer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "chattwin.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_line_number(true)
        .with_writer(writer);

    let result = if config.structured {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(e) = result {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    guard
}
