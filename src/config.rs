//! 引擎配置
//!
//! 与用户设置（`AppSettings`，随数据文件持久化）不同，这里是进程级参数：
//! 数据目录、轮询节奏、日志上限、事件通道容量。
//!
//! 读取默认应用目录下的 `config.json`；文件缺失或内容损坏时回退到默认值，
//! 启动不应因为一个配置文件失败。加载发生在日志初始化之前，
//! 解析问题作为 `warning` 交给调用方，待日志就绪后再输出。

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::clipboard::MonitorConfig;
use crate::clipboard::monitor::{BACKOFF_CEILING_DEFAULT_MS, POLL_INTERVAL_DEFAULT_MS, READ_TIMEOUT_DEFAULT_MS};
use crate::error::AppError;

pub const APP_DIR_NAME: &str = "clipkeeper";
pub const CONFIG_FILE_NAME: &str = "config.json";

const LOG_MAX_BYTES_DEFAULT: u64 = 5 * 1024 * 1024;
const LOG_MAX_BYTES_MIN: u64 = 64 * 1024;
const EVENT_CAPACITY_DEFAULT: usize = 256;
const EVENT_CAPACITY_MIN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 数据目录，未设置时使用默认应用目录
    pub data_dir: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub max_poll_interval_ms: u64,
    pub read_timeout_ms: u64,
    pub log_max_bytes: u64,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            poll_interval_ms: POLL_INTERVAL_DEFAULT_MS,
            max_poll_interval_ms: BACKOFF_CEILING_DEFAULT_MS,
            read_timeout_ms: READ_TIMEOUT_DEFAULT_MS,
            log_max_bytes: LOG_MAX_BYTES_DEFAULT,
            event_capacity: EVENT_CAPACITY_DEFAULT,
        }
    }
}

/// 配置加载结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedConfig {
    pub config: EngineConfig,
    /// 配置文件存在但无法使用时的说明
    pub warning: Option<String>,
}

impl EngineConfig {
    /// 指定数据目录（测试和嵌入方使用）
    pub fn with_data_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// 读取默认应用目录下的配置
    pub fn load() -> Result<LoadedConfig, AppError> {
        let app_dir = default_app_dir()?;
        let mut loaded = load_config_from_path(&app_dir.join(CONFIG_FILE_NAME));
        if loaded.config.data_dir.is_none() {
            loaded.config.data_dir = Some(app_dir);
        }
        Ok(loaded)
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig::from_millis(self.poll_interval_ms, self.max_poll_interval_ms, self.read_timeout_ms)
    }

    pub fn log_max_bytes(&self) -> u64 {
        self.log_max_bytes.max(LOG_MAX_BYTES_MIN)
    }

    pub fn event_capacity(&self) -> usize {
        self.event_capacity.max(EVENT_CAPACITY_MIN)
    }

    /// 解析并创建数据目录
    pub fn resolve_data_dir(&self) -> Result<PathBuf, AppError> {
        let dir = match self.data_dir.as_ref().filter(|dir| !dir.as_os_str().is_empty()) {
            Some(dir) => dir.clone(),
            None => default_app_dir()?,
        };
        fs::create_dir_all(&dir).map_err(|e| {
            AppError::Storage(format!("创建数据目录 '{}' 失败: {}", dir.display(), e))
        })?;
        Ok(dir)
    }
}

/// 平台默认的应用数据目录
pub fn default_app_dir() -> Result<PathBuf, AppError> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| AppError::Storage("获取应用数据目录失败".to_string()))
}

pub(crate) fn load_config_from_path(config_path: &Path) -> LoadedConfig {
    let fallback = |warning| LoadedConfig { config: EngineConfig::default(), warning };
    let content = match fs::read_to_string(config_path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return fallback(None),
        Err(e) => {
            return fallback(Some(format!("配置文件 {} 无法读取，使用默认配置: {}", config_path.display(), e)));
        }
    };
    match serde_json::from_str(&content) {
        Ok(config) => LoadedConfig { config, warning: None },
        Err(e) => fallback(Some(format!("配置文件 {} 无法解析，使用默认配置: {}", config_path.display(), e))),
    }
}
