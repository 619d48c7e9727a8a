//! 书签：用户主动收藏的条目
//!
//! 书签不参与去重，也永不因容量被淘汰，只能显式删除或清空。

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AppData, BookmarkItem, SortMode};
use crate::clipboard::content_type;
use crate::error::AppError;

const DUPLICATE_SUFFIX: &str = " (副本)";

/// 新建书签的入参
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewBookmark {
    pub name: String,
    pub content: String,
    /// 为空时自动识别
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// 书签的局部更新，`None` 表示保持不变
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookmarkPatch {
    pub name: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// 名称与内容都相同的一组书签
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateBookmarkGroup {
    pub name: String,
    pub content_preview: String,
    pub count: usize,
    pub bookmark_ids: Vec<String>,
}

/// 去掉首尾空白、空标签和重复标签，保留首次出现的顺序
fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty() && seen.insert(tag.clone()))
        .collect()
}

fn require_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::validation("书签名称不能为空"));
    }
    Ok(name.to_string())
}

fn require_content(content: &str) -> Result<(), AppError> {
    if content.trim().is_empty() {
        return Err(AppError::validation("书签内容不能为空"));
    }
    Ok(())
}

pub(crate) fn add(data: &mut AppData, new: NewBookmark, now: DateTime<Utc>) -> Result<BookmarkItem, AppError> {
    let name = require_name(&new.name)?;
    require_content(&new.content)?;

    let content_type = match new.content_type.trim() {
        "" => content_type::detect(&new.content).as_str().to_string(),
        given => given.to_string(),
    };
    let bookmark = BookmarkItem {
        id: uuid::Uuid::new_v4().to_string(),
        name,
        content: new.content,
        content_type,
        timestamp: now,
        tags: normalize_tags(new.tags),
        access_count: 0,
        last_accessed: None,
    };
    data.bookmarks.push(bookmark.clone());
    Ok(bookmark)
}

/// 把一条历史记录收藏为书签；名称为空时使用内容预览
pub(crate) fn from_history(
    data: &mut AppData,
    history_id: &str,
    name: Option<String>,
    tags: Vec<String>,
    now: DateTime<Utc>,
) -> Result<BookmarkItem, AppError> {
    let item = data
        .history
        .iter()
        .find(|item| item.id == history_id)
        .ok_or_else(|| AppError::not_found("历史记录", history_id))?;

    let name = name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| super::history::preview(item.content.trim()));
    let new = NewBookmark {
        name,
        content: item.content.clone(),
        content_type: item.content_type.clone(),
        tags,
    };
    add(data, new, now)
}

pub(crate) fn update(
    data: &mut AppData,
    id: &str,
    patch: BookmarkPatch,
    now: DateTime<Utc>,
) -> Result<BookmarkItem, AppError> {
    // 先校验再定位，保证失败时不产生部分修改
    let name = patch.name.as_deref().map(require_name).transpose()?;
    if let Some(content) = patch.content.as_deref() {
        require_content(content)?;
    }

    let bookmark = data
        .bookmarks
        .iter_mut()
        .find(|bookmark| bookmark.id == id)
        .ok_or_else(|| AppError::not_found("书签", id))?;

    if let Some(name) = name {
        bookmark.name = name;
    }
    if let Some(content) = patch.content {
        bookmark.content_type = content_type::detect(&content).as_str().to_string();
        bookmark.content = content;
    }
    if let Some(tags) = patch.tags {
        bookmark.tags = normalize_tags(tags);
    }
    bookmark.last_accessed = Some(now);
    Ok(bookmark.clone())
}

pub(crate) fn delete(data: &mut AppData, id: &str) -> Result<BookmarkItem, AppError> {
    let pos = data
        .bookmarks
        .iter()
        .position(|bookmark| bookmark.id == id)
        .ok_or_else(|| AppError::not_found("书签", id))?;
    Ok(data.bookmarks.remove(pos))
}

/// 复制书签：新 id、名称加后缀、访问信息清零
pub(crate) fn duplicate(data: &mut AppData, id: &str, now: DateTime<Utc>) -> Result<BookmarkItem, AppError> {
    let original = data
        .bookmarks
        .iter()
        .find(|bookmark| bookmark.id == id)
        .ok_or_else(|| AppError::not_found("书签", id))?;

    let copy = BookmarkItem {
        id: uuid::Uuid::new_v4().to_string(),
        name: format!("{}{DUPLICATE_SUFFIX}", original.name),
        timestamp: now,
        access_count: 0,
        last_accessed: None,
        ..original.clone()
    };
    data.bookmarks.push(copy.clone());
    Ok(copy)
}

pub(crate) fn clear(data: &mut AppData) -> usize {
    let count = data.bookmarks.len();
    data.bookmarks.clear();
    count
}

pub(crate) fn find_duplicates(data: &AppData) -> Vec<DuplicateBookmarkGroup> {
    let mut groups: Vec<((&str, &str), DuplicateBookmarkGroup)> = Vec::new();
    for bookmark in &data.bookmarks {
        let key = (bookmark.name.as_str(), bookmark.content.as_str());
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, group)) => {
                group.count += 1;
                group.bookmark_ids.push(bookmark.id.clone());
            }
            None => groups.push((
                key,
                DuplicateBookmarkGroup {
                    name: bookmark.name.clone(),
                    content_preview: super::history::preview(&bookmark.content),
                    count: 1,
                    bookmark_ids: vec![bookmark.id.clone()],
                },
            )),
        }
    }
    groups
        .into_iter()
        .map(|(_, group)| group)
        .filter(|group| group.count > 1)
        .collect()
}

/// 不区分大小写地匹配名称、内容与标签，结果按创建时间倒序
pub(crate) fn search(data: &AppData, query: &str) -> Vec<BookmarkItem> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return data.bookmarks.clone();
    }

    let mut results: Vec<BookmarkItem> = data
        .bookmarks
        .iter()
        .filter(|bookmark| {
            bookmark.name.to_lowercase().contains(&query)
                || bookmark.content.to_lowercase().contains(&query)
                || bookmark.tags.iter().any(|tag| tag.to_lowercase().contains(&query))
        })
        .cloned()
        .collect();
    results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    results
}

pub(crate) fn sorted(data: &AppData, mode: SortMode) -> Vec<BookmarkItem> {
    let mut items = data.bookmarks.clone();
    match mode {
        SortMode::Recent => items.sort_by(|a, b| b.recency().cmp(&a.recency())),
        SortMode::Frequency => items.sort_by(|a, b| {
            b.access_count
                .cmp(&a.access_count)
                .then_with(|| b.recency().cmp(&a.recency()))
        }),
        SortMode::Alphabetical => items.sort_by_cached_key(|item| item.name.to_lowercase()),
    }
    items
}

pub(crate) fn increment_access(data: &mut AppData, id: &str, now: DateTime<Utc>) -> Result<u32, AppError> {
    let bookmark = data
        .bookmarks
        .iter_mut()
        .find(|bookmark| bookmark.id == id)
        .ok_or_else(|| AppError::not_found("书签", id))?;
    bookmark.access_count = bookmark.access_count.saturating_add(1);
    bookmark.last_accessed = Some(now);
    Ok(bookmark.access_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::history;
    use crate::store::test_support::at;

    fn new_bookmark(name: &str, content: &str) -> NewBookmark {
        NewBookmark {
            name: name.to_string(),
            content: content.to_string(),
            ..NewBookmark::default()
        }
    }

    #[test]
    fn add_validates_and_normalizes() {
        let mut data = AppData::default();
        let err = add(&mut data, new_bookmark("  ", "x"), at(0)).expect_err("empty name");
        assert_eq!(err.to_string(), "参数无效: 书签名称不能为空");
        assert!(add(&mut data, new_bookmark("n", " \n"), at(0)).is_err());
        assert!(data.bookmarks.is_empty());

        let bookmark = add(
            &mut data,
            NewBookmark {
                tags: vec![" work ".into(), "work".into(), "".into(), "ops".into()],
                ..new_bookmark(" deploy ", "https://ci.example.com")
            },
            at(1),
        )
        .expect("add");
        assert_eq!(bookmark.name, "deploy");
        assert_eq!(bookmark.content_type, "url");
        assert_eq!(bookmark.tags, vec!["work", "ops"]);
        assert_eq!(data.bookmarks.len(), 1);
    }

    #[test]
    fn bookmarks_are_never_deduplicated() {
        let mut data = AppData::default();
        add(&mut data, new_bookmark("a", "same"), at(0)).expect("add");
        add(&mut data, new_bookmark("a", "same"), at(1)).expect("add");
        assert_eq!(data.bookmarks.len(), 2);

        let groups = find_duplicates(&data);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].count, 2);
    }

    #[test]
    fn same_name_different_content_is_not_duplicate() {
        let mut data = AppData::default();
        add(&mut data, new_bookmark("a", "one"), at(0)).expect("add");
        add(&mut data, new_bookmark("a", "two"), at(1)).expect("add");
        assert!(find_duplicates(&data).is_empty());
    }

    #[test]
    fn promote_from_history() {
        let mut data = AppData::default();
        let outcome = history::ingest(&mut data, "ssh admin@10.0.0.1".to_string(), at(0));
        let bookmark = from_history(&mut data, outcome.id(), None, vec!["ops".into()], at(1)).expect("promote");
        assert_eq!(bookmark.name, "ssh admin@10.0.0.1");
        assert_eq!(bookmark.content, "ssh admin@10.0.0.1");
        assert_eq!(data.history.len(), 1);

        let err = from_history(&mut data, "missing", None, vec![], at(2)).expect_err("missing");
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[test]
    fn update_applies_patch_atomically() {
        let mut data = AppData::default();
        let id = add(&mut data, new_bookmark("a", "b"), at(0)).expect("add").id;

        let bad = BookmarkPatch { name: Some("new".into()), content: Some("".into()), tags: None };
        assert!(update(&mut data, &id, bad, at(1)).is_err());
        assert_eq!(data.bookmarks[0].name, "a");

        let patch = BookmarkPatch { name: Some("renamed".into()), content: None, tags: Some(vec!["t".into()]) };
        let updated = update(&mut data, &id, patch, at(2)).expect("update");
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.content, "b");
        assert_eq!(updated.tags, vec!["t"]);
        assert_eq!(updated.last_accessed, Some(at(2)));
    }

    #[test]
    fn duplicate_resets_usage() {
        let mut data = AppData::default();
        let id = add(&mut data, new_bookmark("note", "text"), at(0)).expect("add").id;
        increment_access(&mut data, &id, at(1)).expect("touch");

        let copy = duplicate(&mut data, &id, at(2)).expect("duplicate");
        assert_ne!(copy.id, id);
        assert_eq!(copy.name, "note (副本)");
        assert_eq!(copy.access_count, 0);
        assert!(copy.last_accessed.is_none());
        assert_eq!(data.bookmarks.len(), 2);
    }

    #[test]
    fn search_matches_tags_and_sort_by_name() {
        let mut data = AppData::default();
        add(&mut data, NewBookmark { tags: vec!["Prod".into()], ..new_bookmark("beta", "x1") }, at(0)).expect("add");
        add(&mut data, new_bookmark("Alpha", "prod notes"), at(1)).expect("add");
        add(&mut data, new_bookmark("gamma", "x3"), at(2)).expect("add");

        let names: Vec<String> = search(&data, "prod").into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["Alpha", "beta"]);

        let names: Vec<String> = sorted(&data, SortMode::Alphabetical).into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["Alpha", "beta", "gamma"]);
    }

    #[test]
    fn delete_and_clear() {
        let mut data = AppData::default();
        let id = add(&mut data, new_bookmark("a", "b"), at(0)).expect("add").id;
        add(&mut data, new_bookmark("c", "d"), at(0)).expect("add");
        assert!(delete(&mut data, "nope").is_err());
        assert_eq!(delete(&mut data, &id).expect("delete").name, "a");
        assert_eq!(clear(&mut data), 1);
        assert!(data.bookmarks.is_empty());
    }
}
