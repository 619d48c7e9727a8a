//! 剪贴板历史：去重、LRU 淘汰与查询
//!
//! 存储顺序为“旧 → 新”，最近写入或刷新的条目位于末尾。
//! 淘汰时线性扫描找出最近使用时间最早的条目；历史上限被校验在 1000 以内，
//! O(n) 扫描足够。

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use super::{AppData, ClipboardItem, SortMode};
use crate::clipboard::{Fingerprint, content_type};
use crate::error::AppError;

const PREVIEW_CHARS: usize = 50;

/// 一次写入的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// 新内容，已插入；`evicted` 为因容量被淘汰的条目 id
    Inserted { id: String, evicted: Vec<String> },
    /// 已存在的内容，刷新了访问信息并移到最新位置
    Refreshed { id: String },
}

impl IngestOutcome {
    pub fn id(&self) -> &str {
        match self {
            IngestOutcome::Inserted { id, .. } | IngestOutcome::Refreshed { id } => id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, IngestOutcome::Inserted { .. })
    }
}

/// 内容相同的一组历史条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateHistoryGroup {
    pub content_preview: String,
    pub count: usize,
    pub item_ids: Vec<String>,
    pub timestamps: Vec<DateTime<Utc>>,
}

pub(crate) fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// 记录一次剪贴板内容
///
/// 已存在（指纹相同）时只刷新访问计数与时间，并把条目移到末尾；
/// 内容类型不重新识别。否则插入新条目并按 LRU 淘汰超出上限的部分。
pub(crate) fn ingest(data: &mut AppData, content: String, now: DateTime<Utc>) -> IngestOutcome {
    let fingerprint = Fingerprint::of(&content);

    if let Some(pos) = data.history.iter().position(|item| item.fingerprint == fingerprint) {
        let mut item = data.history.remove(pos);
        item.access_count = item.access_count.saturating_add(1);
        item.last_accessed = Some(now);
        let id = item.id.clone();
        data.history.push(item);
        log::debug!("重复内容，刷新历史条目: {}", id);
        return IngestOutcome::Refreshed { id };
    }

    let item = ClipboardItem {
        id: uuid::Uuid::new_v4().to_string(),
        content_type: content_type::detect(&content).as_str().to_string(),
        size: content.len(),
        content,
        timestamp: now,
        access_count: 0,
        last_accessed: None,
        fingerprint,
    };
    let id = item.id.clone();
    data.history.push(item);

    let evicted = evict_over_limit(data, Some(id.as_str()));
    log::debug!("新增历史条目: {} (淘汰 {} 条)", id, evicted.len());
    IngestOutcome::Inserted { id, evicted }
}

/// 最近使用时间最早的条目位置；并列时取存储位置靠前者，`keep` 不参与选择
fn lru_position(history: &[ClipboardItem], keep: Option<&str>) -> Option<usize> {
    history
        .iter()
        .enumerate()
        .filter(|(_, item)| keep != Some(item.id.as_str()))
        .min_by_key(|(_, item)| item.recency())
        .map(|(pos, _)| pos)
}

/// 淘汰直到不超过 `history_limit`，返回被淘汰的 id
pub(crate) fn enforce_limit(data: &mut AppData) -> Vec<String> {
    evict_over_limit(data, None)
}

/// 刚插入的条目即使时间戳落后于他人（时钟回拨、手改文件）也不会被淘汰
fn evict_over_limit(data: &mut AppData, keep: Option<&str>) -> Vec<String> {
    let limit = data.settings.history_limit;
    let mut evicted = Vec::new();
    while data.history.len() > limit {
        let Some(pos) = lru_position(&data.history, keep) else {
            break;
        };
        evicted.push(data.history.remove(pos).id);
    }
    evicted
}

pub(crate) fn delete(data: &mut AppData, id: &str) -> Result<ClipboardItem, AppError> {
    let pos = data
        .history
        .iter()
        .position(|item| item.id == id)
        .ok_or_else(|| AppError::not_found("历史记录", id))?;
    Ok(data.history.remove(pos))
}

pub(crate) fn clear(data: &mut AppData) -> usize {
    let count = data.history.len();
    data.history.clear();
    count
}

/// 合并内容相同的条目，返回移除数量
///
/// 幸存者为最近使用的那条，访问次数累加，保留最晚的访问时间。
pub(crate) fn remove_duplicates(data: &mut AppData) -> usize {
    let mut survivor_of: HashMap<Fingerprint, usize> = HashMap::new();
    for (pos, item) in data.history.iter().enumerate() {
        survivor_of
            .entry(item.fingerprint)
            .and_modify(|best| {
                if item.recency() >= data.history[*best].recency() {
                    *best = pos;
                }
            })
            .or_insert(pos);
    }
    if survivor_of.len() == data.history.len() {
        return 0;
    }

    let mut merged: HashMap<Fingerprint, (u32, Option<DateTime<Utc>>)> = HashMap::new();
    for item in &data.history {
        let entry = merged.entry(item.fingerprint).or_insert((0, None));
        entry.0 = entry.0.saturating_add(item.access_count);
        entry.1 = entry.1.max(item.last_accessed);
    }

    let keep: HashSet<usize> = survivor_of.into_values().collect();
    let before = data.history.len();
    let mut pos = 0;
    data.history.retain(|_| {
        let survives = keep.contains(&pos);
        pos += 1;
        survives
    });
    for item in &mut data.history {
        if let Some((count, last)) = merged.get(&item.fingerprint) {
            item.access_count = *count;
            item.last_accessed = *last;
        }
    }

    let removed = before - data.history.len();
    log::info!("合并重复历史记录: {} 条", removed);
    removed
}

pub(crate) fn find_duplicates(data: &AppData) -> Vec<DuplicateHistoryGroup> {
    let mut groups: Vec<(Fingerprint, Vec<&ClipboardItem>)> = Vec::new();
    for item in &data.history {
        match groups.iter_mut().find(|(fp, _)| *fp == item.fingerprint) {
            Some((_, items)) => items.push(item),
            None => groups.push((item.fingerprint, vec![item])),
        }
    }

    groups
        .into_iter()
        .filter(|(_, items)| items.len() > 1)
        .map(|(_, items)| DuplicateHistoryGroup {
            content_preview: preview(&items[0].content),
            count: items.len(),
            item_ids: items.iter().map(|item| item.id.clone()).collect(),
            timestamps: items.iter().map(|item| item.timestamp).collect(),
        })
        .collect()
}

/// 最新在前的历史列表
pub(crate) fn newest_first(data: &AppData) -> Vec<ClipboardItem> {
    data.history.iter().rev().cloned().collect()
}

/// 不区分大小写地匹配内容与内容类型；空查询返回全部
pub(crate) fn search(data: &AppData, query: &str) -> Vec<ClipboardItem> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return newest_first(data);
    }

    let mut results: Vec<ClipboardItem> = data
        .history
        .iter()
        .rev()
        .filter(|item| {
            item.content.to_lowercase().contains(&query)
                || item.content_type.to_lowercase().contains(&query)
        })
        .cloned()
        .collect();
    results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    results
}

pub(crate) fn sorted(data: &AppData, mode: SortMode) -> Vec<ClipboardItem> {
    let mut items = newest_first(data);
    match mode {
        SortMode::Recent => items.sort_by(|a, b| b.recency().cmp(&a.recency())),
        SortMode::Frequency => items.sort_by(|a, b| {
            b.access_count
                .cmp(&a.access_count)
                .then_with(|| b.recency().cmp(&a.recency()))
        }),
        SortMode::Alphabetical => {
            items.sort_by_cached_key(|item| item.content.to_lowercase());
        }
    }
    items
}

pub(crate) fn increment_access(data: &mut AppData, id: &str, now: DateTime<Utc>) -> Result<u32, AppError> {
    let item = data
        .history
        .iter_mut()
        .find(|item| item.id == id)
        .ok_or_else(|| AppError::not_found("历史记录", id))?;
    item.access_count = item.access_count.saturating_add(1);
    item.last_accessed = Some(now);
    Ok(item.access_count)
}

/// 删除超过 `threshold_bytes` 的大条目，返回删除数量
pub(crate) fn optimize_memory(data: &mut AppData, threshold_bytes: usize) -> usize {
    let before = data.history.len();
    data.history.retain(|item| item.size <= threshold_bytes);
    before - data.history.len()
}

/// 删除创建时间早于 `days` 天前的条目，返回删除数量
///
/// 截止时间超出可表示范围时没有条目足够旧，不删除任何内容。
pub(crate) fn cleanup_old(data: &mut AppData, days: u32, now: DateTime<Utc>) -> usize {
    let Some(cutoff) = TimeDelta::try_days(i64::from(days)).and_then(|age| now.checked_sub_signed(age)) else {
        log::debug!("清理天数 {} 超出时间范围，跳过", days);
        return 0;
    };
    let before = data.history.len();
    data.history.retain(|item| item.timestamp > cutoff);
    before - data.history.len()
}
