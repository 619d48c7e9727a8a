// Shared helpers for integration tests
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use clipkeeper::{ClipboardService, EngineConfig};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

/// A fresh, empty directory under the system temp dir
pub fn unique_temp_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock error")
        .as_nanos();
    let seq = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!("clipkeeper-it-{tag}-{nanos}-{seq}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub fn service_in(dir: &PathBuf) -> ClipboardService {
    ClipboardService::new(EngineConfig::with_data_dir(dir)).expect("create service")
}

pub fn contents(service: &ClipboardService) -> Vec<String> {
    service.get_history().into_iter().map(|item| item.content).collect()
}

pub fn cleanup(dir: PathBuf) {
    let _ = std::fs::remove_dir_all(dir);
}
