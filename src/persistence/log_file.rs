//! 诊断日志文件
//!
//! 纯文本、只追加，每行格式为 `[YYYY-mm-dd HH:MM:SS UTC] LEVEL: 消息`。
//! 文件超过上限后整体改名为 `.old`（覆盖旧的 `.old`），再从空文件重新开始。
//!
//! `LogTee` 把 `env_logger` 的输出同时写到 stderr 和日志文件，
//! 因此 `get_logs` 看到的内容与控制台一致。

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::error::AppError;

pub const DEFAULT_TAIL_LINES: usize = 500;

/// 按统一格式生成一行日志（不含换行）
pub fn format_line(at: DateTime<Utc>, level: log::Level, message: &str) -> String {
    format!("[{}] {}: {}", at.format("%Y-%m-%d %H:%M:%S UTC"), level, message)
}

pub struct DiagnosticLog {
    path: PathBuf,
    old_path: PathBuf,
    max_bytes: u64,
    // 串行化追加与轮转
    guard: Mutex<()>,
}

impl DiagnosticLog {
    pub fn new(path: impl Into<PathBuf>, old_path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            path: path.into(),
            old_path: old_path.into(),
            max_bytes,
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, level: log::Level, message: &str) -> Result<(), AppError> {
        let mut line = format_line(Utc::now(), level, message);
        line.push('\n');
        self.append_raw(line.as_bytes())
    }

    /// 追加已经格式化好的内容
    pub fn append_raw(&self, bytes: &[u8]) -> Result<(), AppError> {
        let _guard = self.guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let current = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if current > 0 && current + bytes.len() as u64 > self.max_bytes {
            fs::rename(&self.path, &self.old_path)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(())
    }

    /// 最后 `max_lines` 行；文件不存在时返回空
    pub fn tail(&self, max_lines: usize) -> Result<Vec<String>, AppError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(max_lines);
        Ok(lines[start..].iter().map(|line| line.to_string()).collect())
    }

    /// 清空当前日志文件，`.old` 一并删除
    pub fn clear(&self) -> Result<(), AppError> {
        let _guard = self.guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        fs::write(&self.path, b"")?;
        match fs::remove_file(&self.old_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn size(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }
}

/// 同时写 stderr 与诊断日志的 `Write` 实现，交给 `env_logger::Target::Pipe`
pub struct LogTee {
    log: Arc<DiagnosticLog>,
}

impl LogTee {
    pub fn new(log: Arc<DiagnosticLog>) -> Self {
        Self { log }
    }
}

impl Write for LogTee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        // 日志文件不可写时不影响控制台输出
        let _ = self.log.append_raw(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use chrono::TimeZone;

    use super::*;

    fn temp_log(tag: &str, max_bytes: u64) -> (PathBuf, DiagnosticLog) {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock error")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("clipkeeper-log-{tag}-{nanos}"));
        fs::create_dir_all(&dir).expect("create temp dir");
        let log = DiagnosticLog::new(dir.join("app.log"), dir.join("app.log.old"), max_bytes);
        (dir, log)
    }

    #[test]
    fn line_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).single().expect("valid time");
        assert_eq!(
            format_line(at, log::Level::Warn, "磁盘已满"),
            "[2024-03-05 07:08:09 UTC] WARN: 磁盘已满"
        );
    }

    #[test]
    fn tail_returns_last_lines() {
        let (dir, log) = temp_log("tail", 1024 * 1024);
        assert!(log.tail(10).expect("tail of missing file").is_empty());
        for i in 0..5 {
            log.append(log::Level::Info, &format!("line {i}")).expect("append");
        }
        let tail = log.tail(2).expect("tail");
        assert_eq!(tail.len(), 2);
        assert!(tail[0].ends_with("INFO: line 3"));
        assert!(tail[1].ends_with("INFO: line 4"));
        assert_eq!(log.tail(DEFAULT_TAIL_LINES).expect("tail").len(), 5);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn rotates_when_over_ceiling() {
        let (dir, log) = temp_log("rotate", 64);
        log.append_raw(&[b'a'; 50]).expect("first");
        log.append_raw(&[b'b'; 30]).expect("second");

        assert_eq!(fs::read(dir.join("app.log.old")).expect("old log"), vec![b'a'; 50]);
        assert_eq!(log.size(), 30);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn clear_empties_log_and_drops_old() {
        let (dir, log) = temp_log("clear", 16);
        log.append_raw(&[b'x'; 10]).expect("append");
        log.append_raw(&[b'y'; 10]).expect("append");
        log.clear().expect("clear");
        assert_eq!(log.size(), 0);
        assert!(!dir.join("app.log.old").exists());
        log.clear().expect("clear twice");
        let _ = fs::remove_dir_all(dir);
    }
}
