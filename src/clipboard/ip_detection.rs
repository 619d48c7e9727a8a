//! IPv4 地址提取模块
//!
//! # 设计思路
//!
//! 从剪贴板文本中找出形如 `a.b.c.d` 的子串，并逐段校验 0–255。
//! 只按位数匹配的正则会把 `999.999.999.999` 也当成地址，必须二次校验。
//!
//! 计数策略：同一次粘贴里重复出现的地址只算一次，
//! 因此提取结果按首次出现顺序去重。
//!
//! # 实现思路
//!
//! - 正则只负责“四组 1–3 位数字”的粗筛，`[0-9]` 避免匹配全角等 Unicode 数字。
//! - 每段用 `u8` 解析完成范围校验。
//! - 前后紧挨着 `.数字` 的候选（如版本号 `1.2.3.4.5`）不是地址，直接丢弃。

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

static IPV4_CANDIDATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b").expect("IPv4 正则必须合法")
});

/// 校验字符串是否为合法的点分十进制 IPv4
pub fn is_valid_ipv4(candidate: &str) -> bool {
    let mut parts = 0;
    for part in candidate.split('.') {
        parts += 1;
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        if part.parse::<u8>().is_err() {
            return false;
        }
    }
    parts == 4
}

/// 候选是否只是更长点分数字串（版本号等）的一部分
fn is_embedded_in_dotted_run(text: &str, start: usize, end: usize) -> bool {
    let after = &text.as_bytes()[end..];
    if after.len() >= 2 && after[0] == b'.' && after[1].is_ascii_digit() {
        return true;
    }

    let before = &text.as_bytes()[..start];
    let n = before.len();
    n >= 2 && before[n - 1] == b'.' && before[n - 2].is_ascii_digit()
}

/// 提取文本中的全部合法 IPv4 地址
///
/// 返回值按首次出现顺序排列，且不含重复项。
pub fn extract_ipv4(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ips = Vec::new();

    for candidate in IPV4_CANDIDATE.find_iter(text) {
        let ip = candidate.as_str();
        if !is_valid_ipv4(ip) {
            log::trace!("丢弃越界的 IP 候选: {}", ip);
            continue;
        }
        if is_embedded_in_dotted_run(text, candidate.start(), candidate.end()) {
            log::trace!("丢弃版本号样式的 IP 候选: {}", ip);
            continue;
        }
        if seen.insert(ip) {
            ips.push(ip.to_string());
        }
    }

    ips
}
