//! 状态存储模块
//!
//! # 设计思路
//!
//! `AppData` 是唯一的数据源，包含三个集合与用户设置：
//! - `history`：有界、按内容指纹去重的剪贴板历史
//! - `bookmarks`：用户主动收藏，不受容量限制，永不自动淘汰
//! - `recent_ips`：有界的 IP 出现记录
//!
//! 监控循环与命令门面共享同一把互斥锁，任意时刻最多一个修改在进行；
//! 读取方拿到的是一致的快照副本，序列化和 UI 格式化都不持锁。
//!
//! # 实现思路
//!
//! - 各子模块只提供作用于 `&mut AppData` 的纯函数，便于单元测试。
//! - `Store::mutate` 在持锁期间把修改后的快照交给持久化队列，
//!   保证磁盘写入顺序与内存修改顺序一致，调用方不等待落盘。
//! - 锁中毒时恢复数据继续运行，不让某次 panic 拖垮整个进程。

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clipboard::Fingerprint;
use crate::error::AppError;
use crate::persistence::writer::PersistQueue;

pub mod bookmarks;
pub mod history;
pub mod ips;
pub mod stats;

pub use bookmarks::{BookmarkPatch, DuplicateBookmarkGroup, NewBookmark};
pub use history::{DuplicateHistoryGroup, IngestOutcome};
pub use stats::AppStats;

pub const DATA_VERSION: &str = "1.0.0";
pub const HISTORY_LIMIT_DEFAULT: usize = 50;
pub const IP_LIMIT_DEFAULT: usize = 10;
pub const LIMIT_MIN: usize = 1;
pub const LIMIT_MAX: usize = 1_000;

// ============================================================================
// 数据模型
// ============================================================================

/// 剪贴板历史条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipboardItem {
    pub id: String,
    pub content: String,
    pub content_type: String,
    pub timestamp: DateTime<Utc>,
    pub size: usize,
    #[serde(default)]
    pub access_count: u32,
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
    /// 运行期字段，加载后重新计算
    #[serde(skip)]
    pub(crate) fingerprint: Fingerprint,
}

impl ClipboardItem {
    /// 最近使用时间：访问过取最后访问时间，否则取创建时间
    pub fn recency(&self) -> DateTime<Utc> {
        self.last_accessed.unwrap_or(self.timestamp)
    }
}

/// 书签条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkItem {
    pub id: String,
    pub name: String,
    pub content: String,
    pub content_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub access_count: u32,
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
}

impl BookmarkItem {
    pub fn recency(&self) -> DateTime<Utc> {
        self.last_accessed.unwrap_or(self.timestamp)
    }
}

/// IP 出现记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpHistoryItem {
    pub ip: String,
    /// 最后一次出现的时间
    pub timestamp: DateTime<Utc>,
    pub count: u32,
}

/// 用户设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub hotkey: String,
    pub history_limit: usize,
    pub ip_limit: usize,
    pub auto_start: bool,
    pub show_notifications: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            hotkey: "cmd+shift+v".to_string(),
            history_limit: HISTORY_LIMIT_DEFAULT,
            ip_limit: IP_LIMIT_DEFAULT,
            auto_start: true,
            show_notifications: false,
        }
    }
}

impl AppSettings {
    /// 校验用户提交的设置，不合法时整体拒绝
    pub fn validate(&self) -> Result<(), AppError> {
        if !(LIMIT_MIN..=LIMIT_MAX).contains(&self.history_limit) {
            return Err(AppError::validation(format!(
                "历史记录上限必须在 {LIMIT_MIN}–{LIMIT_MAX} 之间，当前为 {}",
                self.history_limit
            )));
        }
        if !(LIMIT_MIN..=LIMIT_MAX).contains(&self.ip_limit) {
            return Err(AppError::validation(format!(
                "IP 记录上限必须在 {LIMIT_MIN}–{LIMIT_MAX} 之间，当前为 {}",
                self.ip_limit
            )));
        }
        if self.hotkey.trim().is_empty() {
            return Err(AppError::validation("快捷键不能为空"));
        }
        Ok(())
    }

    /// 把磁盘中读到的越界值夹回合法范围（加载路径不拒绝数据）
    fn clamp_limits(&mut self) -> bool {
        let history_limit = self.history_limit.clamp(LIMIT_MIN, LIMIT_MAX);
        let ip_limit = self.ip_limit.clamp(LIMIT_MIN, LIMIT_MAX);
        let changed = history_limit != self.history_limit || ip_limit != self.ip_limit;
        self.history_limit = history_limit;
        self.ip_limit = ip_limit;
        if self.hotkey.trim().is_empty() {
            self.hotkey = AppSettings::default().hotkey;
            return true;
        }
        changed
    }
}

/// 持久化的完整应用数据
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppData {
    pub version: String,
    pub history: Vec<ClipboardItem>,
    pub bookmarks: Vec<BookmarkItem>,
    pub recent_ips: Vec<IpHistoryItem>,
    pub settings: AppSettings,
}

impl Default for AppData {
    fn default() -> Self {
        Self {
            version: DATA_VERSION.to_string(),
            history: Vec::new(),
            bookmarks: Vec::new(),
            recent_ips: Vec::new(),
            settings: AppSettings::default(),
        }
    }
}

/// 排序方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    /// 最近使用在前
    #[default]
    Recent,
    /// 使用次数多的在前
    Frequency,
    /// 按字母顺序（忽略大小写）
    Alphabetical,
}

impl std::str::FromStr for SortMode {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "recent" | "recency" | "time" => Ok(SortMode::Recent),
            "frequency" | "count" | "usage" => Ok(SortMode::Frequency),
            "alphabetical" | "alpha" | "name" => Ok(SortMode::Alphabetical),
            other => Err(AppError::validation(format!("未知的排序方式: {other}"))),
        }
    }
}

/// 访问计数的目标集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    #[serde(alias = "clipboard")]
    History,
    Bookmark,
}

impl std::str::FromStr for ItemKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "history" | "clipboard" => Ok(ItemKind::History),
            "bookmark" => Ok(ItemKind::Bookmark),
            other => Err(AppError::validation(format!("未知的条目类型: {other}"))),
        }
    }
}

// ============================================================================
// 设置与加载后规整
// ============================================================================

/// 设置变更后被淘汰的条目数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SettingsChange {
    pub history_evicted: usize,
    pub ips_evicted: usize,
}

/// 应用新设置，并立即把集合裁剪到新上限
pub(crate) fn apply_settings(data: &mut AppData, settings: AppSettings) -> Result<SettingsChange, AppError> {
    settings.validate()?;
    data.settings = settings;
    let history_evicted = history::enforce_limit(data).len();
    let ips_evicted = ips::enforce_limit(data);
    if history_evicted > 0 || ips_evicted > 0 {
        log::info!("设置更新后裁剪: 历史 {} 条，IP {} 条", history_evicted, ips_evicted);
    }
    Ok(SettingsChange { history_evicted, ips_evicted })
}

/// 加载后规整的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub duplicates_merged: usize,
    pub history_evicted: usize,
    pub ips_dropped: usize,
    pub ids_assigned: usize,
    pub settings_clamped: bool,
}

impl NormalizeReport {
    pub fn changed(&self) -> bool {
        self.duplicates_merged > 0
            || self.history_evicted > 0
            || self.ips_dropped > 0
            || self.ids_assigned > 0
            || self.settings_clamped
    }
}

/// 对从磁盘加载的数据做自愈：重算指纹与大小、合并重复、裁剪上限、
/// 丢弃非法 IP、补齐缺失的 id
pub(crate) fn normalize(data: &mut AppData) -> NormalizeReport {
    let mut report = NormalizeReport {
        settings_clamped: data.settings.clamp_limits(),
        ..NormalizeReport::default()
    };

    for item in &mut data.history {
        item.fingerprint = Fingerprint::of(&item.content);
        item.size = item.content.len();
        if item.id.trim().is_empty() {
            item.id = uuid::Uuid::new_v4().to_string();
            report.ids_assigned += 1;
        }
    }
    for bookmark in &mut data.bookmarks {
        if bookmark.id.trim().is_empty() {
            bookmark.id = uuid::Uuid::new_v4().to_string();
            report.ids_assigned += 1;
        }
    }

    report.duplicates_merged = history::remove_duplicates(data);
    report.history_evicted = history::enforce_limit(data).len();
    report.ips_dropped = ips::sanitize(data);

    if data.version.trim().is_empty() {
        data.version = DATA_VERSION.to_string();
    }
    report
}

// ============================================================================
// 共享状态
// ============================================================================

/// 共享的应用数据句柄
///
/// 克隆开销只是一个 `Arc`，可以传给监控循环与每个命令调用。
#[derive(Clone)]
pub struct Store {
    data: Arc<Mutex<AppData>>,
    queue: Arc<Mutex<Option<PersistQueue>>>,
}

impl Store {
    pub fn new(data: AppData) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
            queue: Arc::new(Mutex::new(None)),
        }
    }

    /// 接入持久化队列，此后每次成功修改都会提交快照
    pub(crate) fn attach_queue(&self, queue: PersistQueue) {
        *recover(self.queue.lock(), "持久化队列") = Some(queue);
    }

    pub(crate) fn detach_queue(&self) -> Option<PersistQueue> {
        recover(self.queue.lock(), "持久化队列").take()
    }

    fn lock_data(&self) -> MutexGuard<'_, AppData> {
        recover(self.data.lock(), "应用数据")
    }

    /// 在锁内执行只读操作
    pub fn read<T>(&self, op: impl FnOnce(&AppData) -> T) -> T {
        let data = self.lock_data();
        op(&data)
    }

    /// 当前数据的一致快照
    pub fn snapshot(&self) -> AppData {
        self.read(AppData::clone)
    }

    /// 在锁内执行修改；成功后在同一把锁内把快照交给持久化队列
    ///
    /// 失败时不提交快照，调用方需保证失败路径没有做部分修改。
    pub fn mutate<T>(&self, op: impl FnOnce(&mut AppData) -> Result<T, AppError>) -> Result<T, AppError> {
        let mut data = self.lock_data();
        let value = op(&mut data)?;
        self.submit_locked(&data);
        Ok(value)
    }

    /// 整体替换数据但不提交快照（加载路径）
    pub(crate) fn replace_quietly(&self, new_data: AppData) {
        *self.lock_data() = new_data;
    }

    /// 把当前数据提交给持久化队列
    pub(crate) fn persist_current(&self) {
        let data = self.lock_data();
        self.submit_locked(&data);
    }

    fn submit_locked(&self, data: &AppData) {
        let queue = recover(self.queue.lock(), "持久化队列");
        if let Some(queue) = queue.as_ref() {
            queue.submit(data.clone());
        }
    }
}

fn recover<'a, T>(
    result: Result<MutexGuard<'a, T>, std::sync::PoisonError<MutexGuard<'a, T>>>,
    what: &str,
) -> MutexGuard<'a, T> {
    match result {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("{}锁中毒，继续使用恢复数据", what);
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    /// 测试用的确定性时间：基准时间 + `secs` 秒
    pub fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .expect("valid base time")
            + Duration::seconds(secs)
    }
}
