//! 统计信息

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::AppData;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppStats {
    pub history_count: usize,
    pub bookmark_count: usize,
    pub ip_count: usize,
    /// 历史与书签内容的总字节数
    pub total_content_bytes: usize,
    pub history_bytes: usize,
    pub average_item_size: usize,
    pub history_usage_percent: f64,
    pub ip_usage_percent: f64,
    /// 最近一条历史的创建时间
    pub most_recent: Option<DateTime<Utc>>,
}

fn usage_percent(len: usize, limit: usize) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    (len as f64 / limit as f64 * 1000.0).round() / 10.0
}

pub(crate) fn compute(data: &AppData) -> AppStats {
    let history_bytes: usize = data.history.iter().map(|item| item.size).sum();
    let bookmark_bytes: usize = data.bookmarks.iter().map(|b| b.content.len()).sum();
    let history_count = data.history.len();

    AppStats {
        history_count,
        bookmark_count: data.bookmarks.len(),
        ip_count: data.recent_ips.len(),
        total_content_bytes: history_bytes + bookmark_bytes,
        history_bytes,
        average_item_size: history_bytes.checked_div(history_count).unwrap_or(0),
        history_usage_percent: usage_percent(history_count, data.settings.history_limit),
        ip_usage_percent: usage_percent(data.recent_ips.len(), data.settings.ip_limit),
        most_recent: data.history.iter().map(|item| item.timestamp).max(),
    }
}
