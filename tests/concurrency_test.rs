// Concurrent commands against the monitor's ingestion path
mod common;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clipkeeper::AppError;
use clipkeeper::clipboard::ClipboardSource;
use clipkeeper::store::{AppSettings, ItemKind};
use proptest::prelude::*;

use common::{cleanup, contents, service_in, unique_temp_dir};

const SEEDED: usize = 10;
const INCREMENTS_PER_ID: u32 = 50;
const HISTORY_LIMIT: usize = 20;
const MONITORED: usize = 40;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_increments_race_monitor_ingestion_and_eviction() {
    let dir = unique_temp_dir("increments");
    let mut config = clipkeeper::EngineConfig::with_data_dir(&dir);
    config.poll_interval_ms = 20;
    let service = clipkeeper::ClipboardService::new(config).expect("service");
    service.initialize().await.expect("initialize");
    service
        .update_settings(AppSettings { history_limit: HISTORY_LIMIT, ..AppSettings::default() })
        .expect("lower limit");

    let seeded: Vec<String> = (0..SEEDED)
        .map(|i| service.ingest(format!("seeded {i}")).expect("seed").id().to_string())
        .collect();

    let script = (0..MONITORED).map(|i| Ok(Some(format!("monitored {i}")))).collect();
    assert!(service.start_monitoring(Arc::new(ScriptedClipboard::new(script))).expect("start"));

    let mut tasks = Vec::new();
    for id in &seeded {
        for _ in 0..INCREMENTS_PER_ID {
            let service = service.clone();
            let id = id.clone();
            tasks.push(tokio::task::spawn_blocking(move || {
                let result = service.increment_access_count(&id, ItemKind::History);
                assert!(service.get_history().len() <= HISTORY_LIMIT);
                (id, result)
            }));
        }
    }

    let mut succeeded: HashMap<String, u32> = HashMap::new();
    let mut missing: HashSet<String> = HashSet::new();
    for task in tasks {
        let (id, result) = task.await.expect("join");
        match result {
            Ok(_) => *succeeded.entry(id).or_default() += 1,
            Err(AppError::NotFound { .. }) => {
                missing.insert(id);
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    let last = format!("monitored {}", MONITORED - 1);
    let mut waited = 0;
    while !contents(&service).contains(&last) && waited < 250 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += 1;
    }
    service.stop_monitoring().await;

    let history = service.get_history();
    assert!(history.len() <= HISTORY_LIMIT);
    assert!(contents(&service).contains(&last));

    let surviving: HashMap<&str, u32> = history
        .iter()
        .map(|item| (item.id.as_str(), item.access_count))
        .collect();
    for id in &seeded {
        // evicted ids may have counted some increments first; only survivors are exact
        let Some(&count) = surviving.get(id.as_str()) else {
            continue;
        };
        assert!(!missing.contains(id), "{id} was reported missing but survived");
        assert_eq!(count, INCREMENTS_PER_ID);
        assert_eq!(succeeded.get(id).copied(), Some(INCREMENTS_PER_ID));
    }
    for id in &missing {
        assert!(!surviving.contains_key(id.as_str()), "NotFound for {id} without eviction");
    }

    service.shutdown().await.expect("shutdown");
    cleanup(dir);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_ids_report_not_found_under_load() {
    let dir = unique_temp_dir("missing");
    let service = service_in(&dir);
    let err = service
        .increment_access_count("missing", ItemKind::Bookmark)
        .expect_err("no bookmark");
    assert!(matches!(err, AppError::NotFound { .. }));
    cleanup(dir);
}

/// Scripted clipboard standing in for the native one
struct ScriptedClipboard {
    script: Mutex<VecDeque<Result<Option<String>, AppError>>>,
    last: Mutex<Option<String>>,
}

impl ScriptedClipboard {
    fn new(script: Vec<Result<Option<String>, AppError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
        }
    }
}

impl ClipboardSource for ScriptedClipboard {
    fn read_text(&self) -> Result<Option<String>, AppError> {
        let next = self.script.lock().expect("script lock").pop_front();
        match next {
            Some(Ok(text)) => {
                *self.last.lock().expect("last lock") = text.clone();
                Ok(text)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self.last.lock().expect("last lock").clone()),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn monitor_feeds_service_and_stops_cleanly() {
    let dir = unique_temp_dir("monitor");
    let mut config = clipkeeper::EngineConfig::with_data_dir(&dir);
    config.poll_interval_ms = 20;
    config.max_poll_interval_ms = 80;
    let service = clipkeeper::ClipboardService::new(config).expect("service");
    service.initialize().await.expect("initialize");

    let source = Arc::new(ScriptedClipboard::new(vec![
        Ok(Some("copied 10.0.0.9".to_string())),
        Err(AppError::Clipboard("busy".to_string())),
        Ok(Some("   ".to_string())),
        Ok(None),
        Ok(Some("second copy".to_string())),
    ]));
    assert!(service.start_monitoring(source).expect("start"));
    assert!(service.is_monitoring());

    let mut waited = 0;
    while service.get_history().len() < 2 && waited < 100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += 1;
    }

    assert_eq!(contents(&service), vec!["second copy", "copied 10.0.0.9"]);
    assert_eq!(service.get_recent_ips()[0].ip, "10.0.0.9");

    service.shutdown().await.expect("shutdown");
    assert!(!service.is_monitoring());
    cleanup(dir);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn history_stays_bounded_and_unique(
        limit in 1usize..8,
        copies in prop::collection::vec(0u8..12, 1..60),
    ) {
        let dir = unique_temp_dir("prop-capacity");
        let service = service_in(&dir);
        service
            .update_settings(AppSettings { history_limit: limit, ..AppSettings::default() })
            .expect("set limit");

        for value in &copies {
            service.ingest(format!("value {value}")).expect("ingest");
            let history = contents(&service);
            prop_assert!(history.len() <= limit);
            let unique: HashSet<&String> = history.iter().collect();
            prop_assert_eq!(unique.len(), history.len());
        }

        let last = format!("value {}", copies[copies.len() - 1]);
        let newest = contents(&service);
        prop_assert_eq!(newest[0].clone(), last);
        cleanup(dir);
    }
}
