//! 内容类型识别模块
//!
//! # 设计思路
//!
//! 新记录入库时给出一个“建议性”的内容类型（text / url / code / json），
//! 仅供 UI 展示与筛选，不做强校验，也不会因此拒绝任何内容。
//!
//! 判定顺序：JSON → URL → 代码 → 纯文本。
//!
//! # 实现思路
//!
//! - JSON 仅识别对象 / 数组，并用 `serde_json` 真实解析一次，避免把 `"abc"`、`42` 误判。
//! - URL 使用单行正则，要求整段内容就是一个链接。
//! - 代码特征使用 `RegexSet` 一次性多模式匹配，
//!   通过 `once_cell::sync::Lazy` 在首次调用时编译，后续零成本复用。

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};

/// 建议性内容类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Url,
    Code,
    Json,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Url => "url",
            ContentType::Code => "code",
            ContentType::Json => "json",
        }
    }
}

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)(https?|ftp|file)://[^\s]+$|^(?i)www\.[^\s]+\.[a-z]{2,}[^\s]*$")
        .expect("URL 正则必须合法")
});

/// 代码特征：语言关键字、属性 / 预处理指令、常见运算符与调用形态
static CODE_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?m)^[\s]*(fn|function|const|let|var|class|struct|impl|mod|use|import|export|def|async|pub|private|static|interface|enum|trait)\s",
        r"#!\[",
        r"#\[[\w\s:(),]+\]",
        r"(?m)^[\s]*#(include|define|ifdef|ifndef|endif)",
        r"\w+!\(",
        r"\)\s*(->|=>)",
        r"\w::\w",
        r"&mut\s+\w+",
        r"(?m)[;{}]\s*$",
        r"\b(return|if|else|for|while)\b.*[({]",
    ])
    .expect("代码特征正则必须合法")
});

/// 判断文本是否可能包含代码
///
/// 极短的单行文本（<5 字符）直接排除，避免误判。
pub fn is_likely_code(text: &str) -> bool {
    if text.len() < 5 && !text.contains('\n') {
        return false;
    }
    CODE_PATTERNS.is_match(text)
}

fn is_json_document(text: &str) -> bool {
    let trimmed = text.trim();
    let looks_structured = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    looks_structured && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
}

fn is_url(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.contains('\n') && URL_PATTERN.is_match(trimmed)
}

/// 识别文本的建议内容类型
pub fn detect(text: &str) -> ContentType {
    if is_json_document(text) {
        ContentType::Json
    } else if is_url(text) {
        ContentType::Url
    } else if is_likely_code(text) {
        ContentType::Code
    } else {
        ContentType::Text
    }
}
