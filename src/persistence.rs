//! 持久化模块
//!
//! # 设计思路
//!
//! 数据目录中的文件：
//! - `clipboard_data.json`：主数据文件
//! - `clipboard_data.json.bak`：最近一次已知完好的备份
//! - `clipboard_data.json.tmp`：写入中的临时文件
//! - `clipboard_data.json.corrupt`：保留下来的损坏主文件，便于人工排查
//! - `clipboard_manager.log` / `.log.old`：诊断日志（见 `log_file`）
//!
//! 任何时刻断电或被杀进程，磁盘上至少有一份可读的完整快照。
//!
//! # 实现思路
//!
//! - 写入：序列化 → 写临时文件并 fsync → 把当前完好的主文件复制为备份 →
//!   原子 rename 覆盖主文件。rename 之前失败时，主文件保持旧内容。
//! - 每次写入前检查主文件；若已损坏（首次加载时或会话中途被外部改坏），
//!   先复制为 `.corrupt`，且不让它覆盖完好的备份。
//! - 加载：主文件 → 备份 → 全新默认值。空文件视为损坏。加载后统一规整。
//! - 实际写入由 `writer` 子模块的后台任务串行执行。

pub mod log_file;
pub mod writer;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::error::AppError;
use crate::store::{self, AppData, NormalizeReport};

pub use log_file::DiagnosticLog;
pub use writer::{PersistQueue, PersistenceWriter};

pub const DATA_FILE_NAME: &str = "clipboard_data.json";
pub const LOG_FILE_NAME: &str = "clipboard_manager.log";

/// 数据目录中各文件的路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub dir: PathBuf,
    pub primary: PathBuf,
    pub backup: PathBuf,
    pub temp: PathBuf,
    pub corrupt: PathBuf,
    pub log: PathBuf,
    pub log_old: PathBuf,
}

impl DataPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let primary = dir.join(DATA_FILE_NAME);
        let log = dir.join(LOG_FILE_NAME);
        Self {
            backup: with_suffix(&primary, "bak"),
            temp: with_suffix(&primary, "tmp"),
            corrupt: with_suffix(&primary, "corrupt"),
            log_old: with_suffix(&log, "old"),
            primary,
            log,
            dir,
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// 数据来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadSource {
    Primary,
    Backup,
    Fresh,
}

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub data: AppData,
    pub source: LoadSource,
    pub report: NormalizeReport,
}

impl LoadOutcome {
    /// 数据并非直接来自完好的主文件，或加载后被修正过，需要立即落盘
    pub fn needs_persist(&self) -> bool {
        self.source != LoadSource::Primary || self.report.changed()
    }
}

/// 数据文件的大小与存在情况
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStats {
    pub data_dir: String,
    pub data_file_size: u64,
    pub backup_exists: bool,
    pub backup_file_size: u64,
    pub corrupt_file_exists: bool,
    pub log_file_size: u64,
}

/// rename 之前调用的故障注入钩子（测试模拟写入中途崩溃）
pub type FaultHook = Arc<dyn Fn() -> std::io::Result<()> + Send + Sync>;

/// 基于 JSON 文件的快照存储
pub struct JsonStore {
    paths: DataPaths,
    fault_hook: Option<FaultHook>,
}

impl JsonStore {
    pub fn new(paths: DataPaths) -> Self {
        Self {
            paths,
            fault_hook: None,
        }
    }

    pub fn with_fault_hook(mut self, hook: FaultHook) -> Self {
        self.fault_hook = Some(hook);
        self
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    /// 按 主文件 → 备份 → 默认值 的顺序加载，并做自愈规整
    pub fn load(&self) -> LoadOutcome {
        let (mut data, source) = match read_data(&self.paths.primary) {
            Ok(data) => (data, LoadSource::Primary),
            Err(primary_err) => {
                if self.paths.primary.exists() {
                    log::warn!("主数据文件不可用: {}", primary_err);
                } else {
                    log::info!("主数据文件不存在: {}", self.paths.primary.display());
                }
                match read_data(&self.paths.backup) {
                    Ok(data) => {
                        log::warn!("已从备份恢复数据: {}", self.paths.backup.display());
                        (data, LoadSource::Backup)
                    }
                    Err(backup_err) => {
                        if self.paths.backup.exists() {
                            log::error!("备份文件同样不可用，使用默认数据: {}", backup_err);
                        }
                        (AppData::default(), LoadSource::Fresh)
                    }
                }
            }
        };

        let report = store::normalize(&mut data);
        if report.changed() {
            log::info!("加载后规整数据: {:?}", report);
        }
        log::info!(
            "数据加载完成 ({:?}): 历史 {} 条，书签 {} 条，IP {} 条",
            source,
            data.history.len(),
            data.bookmarks.len(),
            data.recent_ips.len()
        );
        LoadOutcome { data, source, report }
    }

    /// 原子写入一份快照
    pub fn save(&self, data: &AppData) -> Result<(), AppError> {
        fs::create_dir_all(&self.paths.dir).map_err(|e| {
            AppError::Storage(format!("创建数据目录 '{}' 失败: {}", self.paths.dir.display(), e))
        })?;

        let bytes = serde_json::to_vec_pretty(data)?;
        write_synced(&self.paths.temp, &bytes)?;

        if self.primary_is_intact() {
            fs::copy(&self.paths.primary, &self.paths.backup).map_err(|e| {
                AppError::Storage(format!("更新备份文件失败: {}", e))
            })?;
        }

        if let Some(hook) = &self.fault_hook {
            hook()?;
        }

        fs::rename(&self.paths.temp, &self.paths.primary)?;
        sync_dir(&self.paths.dir);
        log::trace!("快照已写入: {} 字节", bytes.len());
        Ok(())
    }

    /// 主文件存在且可解析时才允许它成为新的备份；损坏时保留为 `.corrupt`
    fn primary_is_intact(&self) -> bool {
        if !self.paths.primary.exists() {
            return false;
        }
        match read_data(&self.paths.primary) {
            Ok(_) => true,
            Err(e) => {
                match fs::copy(&self.paths.primary, &self.paths.corrupt) {
                    Ok(_) => log::warn!(
                        "主数据文件已损坏 ({})，已保留为 {}",
                        e,
                        self.paths.corrupt.display()
                    ),
                    Err(copy_err) => log::error!("保留损坏的主数据文件失败: {}", copy_err),
                }
                false
            }
        }
    }

    pub fn file_stats(&self) -> FileStats {
        let size = |path: &Path| fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        FileStats {
            data_dir: self.paths.dir.to_string_lossy().to_string(),
            data_file_size: size(&self.paths.primary),
            backup_exists: self.paths.backup.exists(),
            backup_file_size: size(&self.paths.backup),
            corrupt_file_exists: self.paths.corrupt.exists(),
            log_file_size: size(&self.paths.log),
        }
    }
}

/// 读取并解析一个数据文件；空文件视为损坏
pub fn read_data(path: &Path) -> Result<AppData, AppError> {
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Err(AppError::Storage(format!("数据文件为空: {}", path.display())));
    }
    Ok(serde_json::from_str(&content)?)
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// rename 之后同步目录项；部分平台不支持，失败时忽略
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(handle) = File::open(dir) {
            let _ = handle.sync_all();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}
