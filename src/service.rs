//! 命令门面
//!
//! # 设计思路
//!
//! `ClipboardService` 是外部协作方（UI、托盘、快捷键）唯一的入口，
//! 把每个调用翻译成对状态存储的一次加锁操作：
//! - 修改类操作在锁内完成，并在同一把锁内把快照交给持久化队列
//! - 事件在修改返回之后发出，订阅者不会看到尚未入队的状态
//! - 所有操作返回 `Result<T, AppError>`，不向外抛 panic
//!
//! 监控循环通过 `ChangeHandler` 回调 `ingest`，与命令调用争用同一把锁。
//!
//! # 生命周期
//!
//! `new` → `initialize`（加载、启动写入任务）→ `start_monitoring` →
//! `shutdown`（先停监控，再写完队列）。未初始化时操作只作用于内存。

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::clipboard::monitor::ChangeHandler;
use crate::clipboard::{ClipboardMonitor, ClipboardSource, Fingerprint, ip_detection};
use crate::config::EngineConfig;
use crate::error::AppError;
use crate::events::{CoreEvent, EventBus};
use crate::persistence::log_file::DEFAULT_TAIL_LINES;
use crate::persistence::writer::WriterStats;
use crate::persistence::{DataPaths, DiagnosticLog, FileStats, JsonStore, LoadSource, PersistenceWriter};
use crate::store::{
    self, AppSettings, AppStats, BookmarkItem, BookmarkPatch, ClipboardItem, DuplicateBookmarkGroup,
    DuplicateHistoryGroup, IngestOutcome, IpHistoryItem, ItemKind, NewBookmark, SettingsChange, SortMode,
    Store, bookmarks, history, ips, stats,
};

/// 诊断信息
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub load_source: Option<LoadSource>,
    pub monitoring: bool,
    pub stats: AppStats,
    pub settings: AppSettings,
    pub files: FileStats,
    pub writer: Option<WriterStats>,
}

struct Inner {
    paths: DataPaths,
    store: Store,
    events: EventBus,
    log: Arc<DiagnosticLog>,
    json: Arc<JsonStore>,
    writer: tokio::sync::Mutex<Option<PersistenceWriter>>,
    monitor: ClipboardMonitor,
    load_source: Mutex<Option<LoadSource>>,
    started_at: DateTime<Utc>,
}

/// 剪贴板状态引擎的命令入口，克隆后共享同一份状态
#[derive(Clone)]
pub struct ClipboardService {
    inner: Arc<Inner>,
}

impl ClipboardService {
    pub fn new(config: EngineConfig) -> Result<Self, AppError> {
        let dir = config.resolve_data_dir()?;
        let paths = DataPaths::new(dir);
        Self::with_json_store(config, JsonStore::new(paths))
    }

    /// 使用自定义的快照存储（例如带故障注入钩子的存储）
    pub fn with_json_store(config: EngineConfig, json: JsonStore) -> Result<Self, AppError> {
        let paths = json.paths().clone();
        let log = DiagnosticLog::new(paths.log.clone(), paths.log_old.clone(), config.log_max_bytes());
        Ok(Self {
            inner: Arc::new(Inner {
                store: Store::new(store::AppData::default()),
                events: EventBus::new(config.event_capacity()),
                log: Arc::new(log),
                json: Arc::new(json),
                writer: tokio::sync::Mutex::new(None),
                monitor: ClipboardMonitor::new(config.monitor_config()),
                load_source: Mutex::new(None),
                started_at: Utc::now(),
                paths,
            }),
        })
    }

    pub fn data_paths(&self) -> &DataPaths {
        &self.inner.paths
    }

    /// 诊断日志，`main` 用它把 `env_logger` 输出同时写入文件
    pub fn diagnostic_log(&self) -> Arc<DiagnosticLog> {
        self.inner.log.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.inner.events.subscribe()
    }

    // ------------------------------------------------------------------
    // 生命周期
    // ------------------------------------------------------------------

    /// 加载数据并启动持久化任务；重复调用返回首次加载的来源
    pub async fn initialize(&self) -> Result<LoadSource, AppError> {
        let mut writer_slot = self.inner.writer.lock().await;
        if writer_slot.is_some() {
            return self
                .lock_load_source()
                .ok_or_else(|| AppError::State("初始化状态不一致".to_string()));
        }

        let json = self.inner.json.clone();
        let outcome = tokio::task::spawn_blocking(move || json.load())
            .await
            .map_err(|e| AppError::State(format!("加载任务异常: {}", e)))?;

        let writer = PersistenceWriter::spawn(self.inner.json.clone())?;
        self.inner.store.replace_quietly(outcome.data.clone());
        self.inner.store.attach_queue(writer.queue());

        if outcome.needs_persist() {
            self.inner.store.persist_current();
            if let Err(e) = writer.flush().await {
                log::warn!("启动时写入恢复后的数据失败: {}", e);
            }
        }

        *writer_slot = Some(writer);
        *self.lock_load_source() = Some(outcome.source);
        log::info!("剪贴板引擎初始化完成，数据目录: {}", self.inner.paths.dir.display());
        Ok(outcome.source)
    }

    /// 开始监控剪贴板；已在运行时返回 `false`
    pub fn start_monitoring(&self, source: Arc<dyn ClipboardSource>) -> Result<bool, AppError> {
        let handler: Arc<dyn ChangeHandler> = Arc::new(self.clone());
        self.inner.monitor.start(source, handler)
    }

    pub async fn stop_monitoring(&self) {
        self.inner.monitor.stop().await;
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner.monitor.is_running()
    }

    /// 等待此前的修改全部落盘
    pub async fn flush(&self) -> Result<(), AppError> {
        match self.inner.writer.lock().await.as_ref() {
            Some(writer) => writer.flush().await,
            None => Ok(()),
        }
    }

    /// 停止监控，写完队列中的快照后结束持久化任务
    pub async fn shutdown(&self) -> Result<(), AppError> {
        self.inner.monitor.stop().await;
        self.inner.store.detach_queue();
        let writer = self.inner.writer.lock().await.take();
        match writer {
            Some(writer) => {
                let result = writer.shutdown().await;
                log::info!("剪贴板引擎已关闭");
                result
            }
            None => Ok(()),
        }
    }

    fn lock_load_source(&self) -> std::sync::MutexGuard<'_, Option<LoadSource>> {
        self.inner
            .load_source
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------
    // 历史
    // ------------------------------------------------------------------

    /// 记录一段剪贴板文本：去重 / 淘汰，并合并其中的 IP 地址
    pub fn ingest(&self, content: impl Into<String>) -> Result<IngestOutcome, AppError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(AppError::validation("剪贴板内容为空"));
        }
        let found_ips = ip_detection::extract_ipv4(&content);
        let now = Utc::now();

        let (outcome, new_ips) = self.inner.store.mutate(|data| {
            let outcome = history::ingest(data, content, now);
            let new_ips = if found_ips.is_empty() {
                Vec::new()
            } else {
                ips::record(data, &found_ips, now)
            };
            Ok((outcome, new_ips))
        })?;

        self.inner.events.emit(CoreEvent::ClipboardUpdated {
            id: outcome.id().to_string(),
            is_new: outcome.is_new(),
        });
        for ip in new_ips {
            log::info!("检测到新的 IP 地址: {}", ip);
            self.inner.events.emit(CoreEvent::IpDetected { ip });
        }
        Ok(outcome)
    }

    pub fn get_history(&self) -> Vec<ClipboardItem> {
        self.inner.store.read(history::newest_first)
    }

    pub fn search_history(&self, query: &str) -> Vec<ClipboardItem> {
        let results = self.inner.store.read(|data| history::search(data, query));
        log::debug!("历史搜索: '{}' -> {} 条", query, results.len());
        results
    }

    pub fn get_sorted_history(&self, mode: SortMode) -> Vec<ClipboardItem> {
        self.inner.store.read(|data| history::sorted(data, mode))
    }

    pub fn delete_history_item(&self, id: &str) -> Result<ClipboardItem, AppError> {
        let removed = self.inner.store.mutate(|data| history::delete(data, id))?;
        log::info!("删除历史记录: {}", id);
        Ok(removed)
    }

    pub fn clear_history(&self) -> Result<usize, AppError> {
        let count = self.inner.store.mutate(|data| Ok(history::clear(data)))?;
        log::info!("清空历史记录: {} 条", count);
        Ok(count)
    }

    pub fn remove_duplicate_history(&self) -> Result<usize, AppError> {
        self.inner.store.mutate(|data| Ok(history::remove_duplicates(data)))
    }

    pub fn find_duplicate_history(&self) -> Vec<DuplicateHistoryGroup> {
        self.inner.store.read(history::find_duplicates)
    }

    pub fn increment_access_count(&self, id: &str, kind: ItemKind) -> Result<u32, AppError> {
        let now = Utc::now();
        self.inner.store.mutate(|data| match kind {
            ItemKind::History => history::increment_access(data, id, now),
            ItemKind::Bookmark => bookmarks::increment_access(data, id, now),
        })
    }

    /// 删除超过阈值的大条目
    pub fn optimize_memory(&self, size_threshold_bytes: usize) -> Result<usize, AppError> {
        let removed = self
            .inner
            .store
            .mutate(|data| Ok(history::optimize_memory(data, size_threshold_bytes)))?;
        if removed > 0 {
            log::info!("内存优化: 删除 {} 条超过 {} 字节的记录", removed, size_threshold_bytes);
        }
        Ok(removed)
    }

    pub fn cleanup_old_items(&self, days: u32) -> Result<usize, AppError> {
        let now = Utc::now();
        let removed = self.inner.store.mutate(|data| Ok(history::cleanup_old(data, days, now)))?;
        if removed > 0 {
            log::info!("清理 {} 天前的记录: {} 条", days, removed);
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // 书签
    // ------------------------------------------------------------------

    pub fn get_bookmarks(&self) -> Vec<BookmarkItem> {
        self.inner.store.read(|data| data.bookmarks.clone())
    }

    pub fn search_bookmarks(&self, query: &str) -> Vec<BookmarkItem> {
        self.inner.store.read(|data| bookmarks::search(data, query))
    }

    pub fn get_sorted_bookmarks(&self, mode: SortMode) -> Vec<BookmarkItem> {
        self.inner.store.read(|data| bookmarks::sorted(data, mode))
    }

    pub fn add_bookmark(&self, new: NewBookmark) -> Result<BookmarkItem, AppError> {
        let now = Utc::now();
        let bookmark = self.inner.store.mutate(|data| bookmarks::add(data, new, now))?;
        log::info!("新增书签: {}", bookmark.id);
        Ok(bookmark)
    }

    pub fn bookmark_from_history(
        &self,
        history_id: &str,
        name: Option<String>,
        tags: Vec<String>,
    ) -> Result<BookmarkItem, AppError> {
        let now = Utc::now();
        let bookmark = self
            .inner
            .store
            .mutate(|data| bookmarks::from_history(data, history_id, name, tags, now))?;
        log::info!("历史记录 {} 已收藏为书签 {}", history_id, bookmark.id);
        Ok(bookmark)
    }

    pub fn update_bookmark(&self, id: &str, patch: BookmarkPatch) -> Result<BookmarkItem, AppError> {
        let now = Utc::now();
        self.inner.store.mutate(|data| bookmarks::update(data, id, patch, now))
    }

    pub fn delete_bookmark(&self, id: &str) -> Result<BookmarkItem, AppError> {
        let removed = self.inner.store.mutate(|data| bookmarks::delete(data, id))?;
        log::info!("删除书签: {}", id);
        Ok(removed)
    }

    pub fn duplicate_bookmark(&self, id: &str) -> Result<BookmarkItem, AppError> {
        let now = Utc::now();
        self.inner.store.mutate(|data| bookmarks::duplicate(data, id, now))
    }

    pub fn clear_bookmarks(&self) -> Result<usize, AppError> {
        let count = self.inner.store.mutate(|data| Ok(bookmarks::clear(data)))?;
        log::info!("清空书签: {} 条", count);
        Ok(count)
    }

    pub fn find_duplicate_bookmarks(&self) -> Vec<DuplicateBookmarkGroup> {
        self.inner.store.read(bookmarks::find_duplicates)
    }

    // ------------------------------------------------------------------
    // IP
    // ------------------------------------------------------------------

    pub fn get_recent_ips(&self) -> Vec<IpHistoryItem> {
        self.inner.store.read(|data| data.recent_ips.clone())
    }

    pub fn search_ip_history(&self, query: &str) -> Vec<IpHistoryItem> {
        self.inner.store.read(|data| ips::search(data, query))
    }

    /// 手动添加 IP；首次出现时发出 `ip-detected`
    pub fn add_ip(&self, ip: &str) -> Result<bool, AppError> {
        let now = Utc::now();
        let inserted = self.inner.store.mutate(|data| ips::add(data, ip, now))?;
        if inserted {
            self.inner.events.emit(CoreEvent::IpDetected { ip: ip.trim().to_string() });
        }
        Ok(inserted)
    }

    /// 只提取不记录
    pub fn detect_ips(&self, text: &str) -> Vec<String> {
        ip_detection::extract_ipv4(text)
    }

    pub fn reset_ip_count(&self, ip: &str) -> Result<(), AppError> {
        self.inner.store.mutate(|data| ips::reset_count(data, ip))
    }

    pub fn remove_ip(&self, ip: &str) -> Result<IpHistoryItem, AppError> {
        self.inner.store.mutate(|data| ips::remove(data, ip))
    }

    pub fn clear_ip_history(&self) -> Result<usize, AppError> {
        let count = self.inner.store.mutate(|data| Ok(ips::clear(data)))?;
        log::info!("清空 IP 记录: {} 条", count);
        Ok(count)
    }

    // ------------------------------------------------------------------
    // 设置、统计与诊断
    // ------------------------------------------------------------------

    pub fn get_settings(&self) -> AppSettings {
        self.inner.store.read(|data| data.settings.clone())
    }

    pub fn update_settings(&self, settings: AppSettings) -> Result<SettingsChange, AppError> {
        let change = self.inner.store.mutate(|data| store::apply_settings(data, settings))?;
        log::info!("设置已更新");
        Ok(change)
    }

    pub fn get_stats(&self) -> AppStats {
        self.inner.store.read(stats::compute)
    }

    /// 诊断日志的最后若干行，默认 500 行
    pub fn get_logs(&self, max_lines: Option<usize>) -> Result<Vec<String>, AppError> {
        self.inner.log.tail(max_lines.unwrap_or(DEFAULT_TAIL_LINES))
    }

    pub fn clear_logs(&self) -> Result<(), AppError> {
        self.inner.log.clear()?;
        log::info!("诊断日志已清空");
        Ok(())
    }

    pub async fn get_diagnostics(&self) -> Diagnostics {
        let writer = self.inner.writer.lock().await.as_ref().map(PersistenceWriter::stats);
        let (stats, settings) = self
            .inner
            .store
            .read(|data| (stats::compute(data), data.settings.clone()));
        let now = Utc::now();
        Diagnostics {
            version: env!("CARGO_PKG_VERSION"),
            timestamp: now,
            uptime_seconds: (now - self.inner.started_at).num_seconds(),
            load_source: *self.lock_load_source(),
            monitoring: self.is_monitoring(),
            stats,
            settings,
            files: self.inner.json.file_stats(),
            writer,
        }
    }
}

impl ChangeHandler for ClipboardService {
    fn on_clipboard_change(&self, text: String, fingerprint: Fingerprint) {
        match self.ingest(text) {
            Ok(outcome) => log::debug!("剪贴板变化已记录 {:?}: {}", fingerprint, outcome.id()),
            Err(e) => log::warn!("记录剪贴板变化失败: {}", e),
        }
    }
}
