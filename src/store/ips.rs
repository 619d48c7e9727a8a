//! IP 出现记录
//!
//! 集合按最后出现时间倒序保存；超过 `ip_limit` 时淘汰最久未出现的地址。

use chrono::{DateTime, Utc};

use super::{AppData, IpHistoryItem};
use crate::clipboard::ip_detection;
use crate::error::AppError;

fn sort_newest_first(data: &mut AppData) {
    data.recent_ips.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// 合并一次粘贴中提取到的地址，返回首次出现（新插入）的地址
///
/// `ips` 应已在单次粘贴内去重；同一地址在这里只计一次。
pub(crate) fn record(data: &mut AppData, ips: &[String], now: DateTime<Utc>) -> Vec<String> {
    let mut inserted = Vec::new();
    for (i, ip) in ips.iter().enumerate() {
        if ips[..i].contains(ip) {
            continue;
        }
        match data.recent_ips.iter().position(|item| &item.ip == ip) {
            Some(pos) => {
                let mut item = data.recent_ips.remove(pos);
                item.count = item.count.saturating_add(1);
                item.timestamp = now;
                data.recent_ips.insert(0, item);
            }
            None => {
                data.recent_ips.insert(0, IpHistoryItem { ip: ip.clone(), timestamp: now, count: 1 });
                inserted.push(ip.clone());
            }
        }
    }
    sort_newest_first(data);
    let evicted = enforce_limit(data);
    if evicted > 0 {
        log::debug!("IP 记录超出上限，淘汰 {} 条", evicted);
    }
    inserted.retain(|ip| data.recent_ips.iter().any(|item| &item.ip == ip));
    inserted
}

/// 手动添加一个地址，格式非法时拒绝
pub(crate) fn add(data: &mut AppData, ip: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
    let ip = ip.trim();
    if !ip_detection::is_valid_ipv4(ip) {
        return Err(AppError::validation(format!("IP 地址格式无效: {ip}")));
    }
    Ok(!record(data, &[ip.to_string()], now).is_empty())
}

/// 淘汰最久未出现的地址直到不超过上限，返回淘汰数量
pub(crate) fn enforce_limit(data: &mut AppData) -> usize {
    let limit = data.settings.ip_limit;
    if data.recent_ips.len() <= limit {
        return 0;
    }
    sort_newest_first(data);
    let evicted = data.recent_ips.len() - limit;
    data.recent_ips.truncate(limit);
    evicted
}

/// 加载后清理：丢弃非法地址、合并重复地址、恢复排序与上限
pub(crate) fn sanitize(data: &mut AppData) -> usize {
    let before = data.recent_ips.len();
    data.recent_ips.retain(|item| ip_detection::is_valid_ipv4(&item.ip));

    let mut merged: Vec<IpHistoryItem> = Vec::with_capacity(data.recent_ips.len());
    for item in data.recent_ips.drain(..) {
        match merged.iter_mut().find(|existing| existing.ip == item.ip) {
            Some(existing) => {
                existing.count = existing.count.saturating_add(item.count);
                existing.timestamp = existing.timestamp.max(item.timestamp);
            }
            None => merged.push(item),
        }
    }
    data.recent_ips = merged;
    sort_newest_first(data);
    enforce_limit(data);
    before - data.recent_ips.len()
}

pub(crate) fn remove(data: &mut AppData, ip: &str) -> Result<IpHistoryItem, AppError> {
    let pos = data
        .recent_ips
        .iter()
        .position(|item| item.ip == ip)
        .ok_or_else(|| AppError::not_found("IP 记录", ip))?;
    Ok(data.recent_ips.remove(pos))
}

/// 把出现次数重置为 1
pub(crate) fn reset_count(data: &mut AppData, ip: &str) -> Result<(), AppError> {
    let item = data
        .recent_ips
        .iter_mut()
        .find(|item| item.ip == ip)
        .ok_or_else(|| AppError::not_found("IP 记录", ip))?;
    item.count = 1;
    Ok(())
}

pub(crate) fn clear(data: &mut AppData) -> usize {
    let count = data.recent_ips.len();
    data.recent_ips.clear();
    count
}

pub(crate) fn search(data: &AppData, query: &str) -> Vec<IpHistoryItem> {
    let query = query.trim();
    data.recent_ips
        .iter()
        .filter(|item| query.is_empty() || item.ip.contains(query))
        .cloned()
        .collect()
}
