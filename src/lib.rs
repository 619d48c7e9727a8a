//! # clipkeeper：剪贴板状态引擎
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │          外部协作方 (UI / 托盘 / 快捷键 / main.rs)        │
//! └───────┬──────────────────────────────────▲───────────────┘
//!         │ Result<T, AppError>              │ CoreEvent (broadcast)
//! ┌───────▼──────────────────────────────────┴───────────────┐
//! │  service ──── ClipboardService (命令门面)                 │
//! │     │                                                    │
//! │     ├─ clipboard ── 原生读取 + 指纹                       │
//! │     │   ├─ monitor       轮询·退避·取消                   │
//! │     │   ├─ content_type  text/url/code/json              │
//! │     │   └─ ip_detection  IPv4 提取与校验                  │
//! │     │                                                    │
//! │     ├─ store ──── Arc<Mutex<AppData>>                    │
//! │     │   ├─ history   去重·LRU 淘汰·查询                   │
//! │     │   ├─ bookmarks 书签 (永不淘汰)                      │
//! │     │   ├─ ips       IP 计数·上限                         │
//! │     │   └─ stats     统计                                 │
//! │     │        │ 快照 (持锁入队)                            │
//! │     ├─ persistence ▼                                     │
//! │     │   ├─ writer    后台写入任务 (合并·串行)              │
//! │     │   └─ log_file  诊断日志 (5MB 轮转)                  │
//! │     │                                                    │
//! │     ├─ events ─── clipboard-updated / ip-detected         │
//! │     ├─ config ─── EngineConfig (config.json)             │
//! │     └─ error ──── AppError                               │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `AppError`，所有命令的返回类型 |
//! | [`clipboard`] | 原生剪贴板读取、内容指纹、监控循环、内容类型与 IP 识别 |
//! | [`store`] | 三个有界集合与设置、去重淘汰、查询排序、统计 |
//! | [`persistence`] | 原子 JSON 快照、备份恢复链、后台写入、诊断日志 |
//! | [`events`] | 发送即忘的事件广播 |
//! | [`config`] | 进程级配置（数据目录、轮询节奏等） |
//! | [`service`] | 命令门面，串联以上所有模块 |

pub mod clipboard;
pub mod config;
pub mod error;
pub mod events;
pub mod persistence;
pub mod service;
pub mod store;

pub use config::EngineConfig;
pub use error::AppError;
pub use events::CoreEvent;
pub use service::ClipboardService;
