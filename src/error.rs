//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 定义全局统一的 `AppError` 枚举，命令门面（`service`）的每个操作
//! 统一返回 `Result<T, AppError>`，外部协作方（UI）拿到的是可读字符串。
//!
//! 错误按来源分为四类：
//! - **瞬时 I/O**：剪贴板暂不可读（`Clipboard`），由监控循环退避重试，从不致命
//! - **持久化**：磁盘读写或文件损坏（`Io` / `Storage` / `Serialization`），
//!   由备份恢复链兜底
//! - **校验**：非法 IP、空书签名等（`Validation`），不产生任何部分修改
//! - **未找到**：引用了已不存在的 id（`NotFound`），删除类操作也会显式报告
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 为 `std::io::Error` 与 `serde_json::Error` 提供 `From` 转换，`?` 直接可用。
//! - 实现 `Serialize` 将错误序列化为字符串，便于直接透传给前端。

use serde::Serialize;

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 剪贴板读取失败（权限未授予、系统繁忙等）
    #[error("剪贴板操作失败: {0}")]
    Clipboard(String),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化 / 反序列化失败
    #[error("数据序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 存储目录或数据文件不可用
    #[error("存储不可用: {0}")]
    Storage(String),

    /// 入参校验失败
    #[error("参数无效: {0}")]
    Validation(String),

    /// 引用的条目不存在
    #[error("{kind}不存在: {id}")]
    NotFound { kind: &'static str, id: String },

    /// 内部状态异常（锁、后台任务已退出等）
    #[error("内部状态异常: {0}")]
    State(String),
}

impl AppError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        AppError::NotFound { kind, id: id.into() }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }
}

/// 外部协作方要求返回值实现 `Serialize`。
/// 将错误序列化为人类可读的字符串。
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn not_found_message_names_kind_and_id() {
        let err = AppError::not_found("书签", "abc");
        assert_eq!(err.to_string(), "书签不存在: abc");
    }

    #[test]
    fn serializes_as_display_string() {
        let err = AppError::validation("书签名称不能为空");
        let json = serde_json::to_string(&err).expect("serialize error");
        assert_eq!(json, "\"参数无效: 书签名称不能为空\"");
    }

    #[test]
    fn io_error_converts_via_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: AppError = io.into();
        assert!(matches!(err, AppError::Io(_)));
    }
}
