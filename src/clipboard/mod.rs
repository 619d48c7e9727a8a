//! 剪贴板管理模块
//!
//! # 设计思路
//!
//! 统一管理剪贴板相关的核心能力：
//! - **读取**：`ClipboardSource` 抽象原生剪贴板，生产环境使用 `arboard`，
//!   测试可注入脚本化的假数据源
//! - **指纹**：对文本原始字节做 BLAKE3 摘要，用于变化检测与历史去重
//! - **监控**：`monitor` 子模块负责轮询、退避与取消
//! - **内容识别**：`content_type` 判断 text/url/code/json，`ip_detection` 提取 IPv4
//!
//! # 实现思路
//!
//! - 原生读取是同步阻塞调用，由监控循环放到阻塞线程池中并加超时。
//! - 剪贴板里没有文本（空 / 图片 / 文件）视为一次成功读取，返回 `Ok(None)`，
//!   只有真正的读取失败才计入退避。

pub mod content_type;
pub mod ip_detection;
pub mod monitor;

use std::fmt;

use crate::error::AppError;

pub use monitor::{ClipboardMonitor, MonitorConfig};

// ============================================================================
// 内容指纹
// ============================================================================

/// 剪贴板内容指纹（BLAKE3 摘要）
///
/// 两段字节完全相同的文本视为同一条逻辑记录，与 id 无关。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// 对文本的 UTF-8 原始字节计算指纹
    pub fn of(text: &str) -> Self {
        Self(*blake3::hash(text.as_bytes()).as_bytes())
    }

    /// 是否为未计算的占位值（从磁盘加载后尚未重算）
    pub fn is_unset(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint(")?;
        for byte in &self.0[..6] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "…)")
    }
}

// ============================================================================
// 剪贴板数据源
// ============================================================================

/// 原生剪贴板的只读抽象
///
/// 返回值约定：
/// - `Ok(Some(text))`：读到文本
/// - `Ok(None)`：剪贴板可读，但没有文本内容
/// - `Err(AppError::Clipboard)`：读取失败（权限未授予、被其他进程占用等）
pub trait ClipboardSource: Send + Sync + 'static {
    fn read_text(&self) -> Result<Option<String>, AppError>;
}

/// 基于 `arboard` 的系统剪贴板数据源
///
/// 每次读取都新建 `arboard::Clipboard`，避免跨线程持有原生句柄。
#[derive(Debug, Default, Clone, Copy)]
pub struct ArboardSource;

impl ClipboardSource for ArboardSource {
    fn read_text(&self) -> Result<Option<String>, AppError> {
        let mut clipboard = arboard::Clipboard::new()
            .map_err(|e| AppError::Clipboard(e.to_string()))?;

        match clipboard.get_text() {
            Ok(text) => Ok(Some(text)),
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(e) => Err(AppError::Clipboard(e.to_string())),
        }
    }
}
