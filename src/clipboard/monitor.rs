//! 剪贴板轮询监控
//!
//! 固定基础间隔轮询系统剪贴板，按内容指纹判断是否变化。
//! 读取失败（权限被收回、系统繁忙、读取超时）从不终止循环，
//! 而是按连续失败次数指数退避，首次成功后立即恢复基础间隔。
//!
//! 超时的原生读取仍占着阻塞线程；在它返回之前不再发起新的读取，
//! 这一轮直接按失败计，阻塞线程数始终不超过一个。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{ClipboardSource, Fingerprint};
use crate::error::AppError;

pub(crate) const POLL_INTERVAL_DEFAULT_MS: u64 = 250;
const POLL_INTERVAL_MIN_MS: u64 = 20;
const POLL_INTERVAL_MAX_MS: u64 = 5_000;
pub(crate) const BACKOFF_CEILING_DEFAULT_MS: u64 = 4_000;
const BACKOFF_CEILING_MAX_MS: u64 = 60_000;
pub(crate) const READ_TIMEOUT_DEFAULT_MS: u64 = 1_000;
const READ_TIMEOUT_MIN_MS: u64 = 50;
const READ_TIMEOUT_MAX_MS: u64 = 10_000;

/// 监控循环参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// 基础轮询间隔
    pub base_interval: Duration,
    /// 退避上限
    pub max_interval: Duration,
    /// 单次原生读取的超时
    pub read_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(POLL_INTERVAL_DEFAULT_MS),
            max_interval: Duration::from_millis(BACKOFF_CEILING_DEFAULT_MS),
            read_timeout: Duration::from_millis(READ_TIMEOUT_DEFAULT_MS),
        }
    }
}

impl MonitorConfig {
    /// 按毫秒值构造，并把越界值夹回合理范围
    pub fn from_millis(base_ms: u64, max_ms: u64, read_timeout_ms: u64) -> Self {
        let base_ms = normalize_poll_interval_ms(base_ms);
        let max_ms = max_ms.clamp(base_ms, BACKOFF_CEILING_MAX_MS);
        let read_timeout_ms = read_timeout_ms.clamp(READ_TIMEOUT_MIN_MS, READ_TIMEOUT_MAX_MS);
        Self {
            base_interval: Duration::from_millis(base_ms),
            max_interval: Duration::from_millis(max_ms),
            read_timeout: Duration::from_millis(read_timeout_ms),
        }
    }
}

fn normalize_poll_interval_ms(value_ms: u64) -> u64 {
    value_ms.clamp(POLL_INTERVAL_MIN_MS, POLL_INTERVAL_MAX_MS)
}

/// 连续失败 `failures` 次后的轮询间隔：`base × 2^failures`，不超过 `max`
fn compute_poll_interval(base: Duration, max: Duration, failures: u32) -> Duration {
    let factor = 1_u32 << failures.min(16);
    base.saturating_mul(factor).min(max)
}

/// 剪贴板变化回调
///
/// 仅在指纹变化且内容非空白时调用，实现方负责入库。
pub trait ChangeHandler: Send + Sync + 'static {
    fn on_clipboard_change(&self, text: String, fingerprint: Fingerprint);
}

#[derive(Debug, PartialEq, Eq)]
enum PollDecision {
    /// 内容变化，需要入库
    Changed(String, Fingerprint),
    /// 与上次相同，或是空白内容
    Unchanged,
    /// 剪贴板中没有文本
    NoText,
    /// 读取失败，附带连续失败次数
    Failed(u32),
}

#[derive(Debug, Default)]
struct PollState {
    last_fingerprint: Option<Fingerprint>,
    consecutive_failures: u32,
}

impl PollState {
    fn on_read(&mut self, result: Result<Option<String>, AppError>) -> PollDecision {
        let text = match result {
            Ok(text) => {
                if self.consecutive_failures > 0 {
                    log::info!("📋 剪贴板读取已恢复（此前连续失败 {} 次）", self.consecutive_failures);
                }
                self.consecutive_failures = 0;
                text
            }
            Err(err) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures <= 3 {
                    log::warn!("📋 剪贴板读取失败 #{}: {}", self.consecutive_failures, err);
                } else {
                    log::debug!("📋 剪贴板读取失败 #{}: {}", self.consecutive_failures, err);
                }
                return PollDecision::Failed(self.consecutive_failures);
            }
        };

        let Some(text) = text else {
            return PollDecision::NoText;
        };

        let fingerprint = Fingerprint::of(&text);
        if self.last_fingerprint == Some(fingerprint) {
            return PollDecision::Unchanged;
        }
        self.last_fingerprint = Some(fingerprint);

        if text.trim().is_empty() {
            return PollDecision::Unchanged;
        }
        PollDecision::Changed(text, fingerprint)
    }
}

type PendingRead = JoinHandle<Result<Option<String>, AppError>>;

/// 带超时的原生读取
///
/// 超时后读取句柄留在 `pending` 中；它结束之前的每一轮都直接返回错误。
/// 迟到的结果已经过时，直接丢弃，下一轮重新读取。
async fn read_with_timeout(
    pending: &mut Option<PendingRead>,
    source: &Arc<dyn ClipboardSource>,
    timeout: Duration,
) -> Result<Option<String>, AppError> {
    if let Some(stale) = pending.take() {
        if !stale.is_finished() {
            *pending = Some(stale);
            return Err(AppError::Clipboard("上一次读取仍未返回".to_string()));
        }
    }

    let source = Arc::clone(source);
    let mut handle = tokio::task::spawn_blocking(move || source.read_text());
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(AppError::Clipboard(format!("读取线程异常退出: {join_err}"))),
        Err(_) => {
            *pending = Some(handle);
            Err(AppError::Clipboard(format!("读取超时（{}ms）", timeout.as_millis())))
        }
    }
}

async fn run_poll_loop(
    source: Arc<dyn ClipboardSource>,
    handler: Arc<dyn ChangeHandler>,
    config: MonitorConfig,
    cancel: CancellationToken,
) {
    let mut state = PollState::default();
    let mut interval = config.base_interval;
    let mut pending: Option<PendingRead> = None;

    log::info!(
        "📋 剪贴板监听已启动（间隔 {}ms，退避上限 {}ms）",
        config.base_interval.as_millis(),
        config.max_interval.as_millis()
    );

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let result = read_with_timeout(&mut pending, &source, config.read_timeout).await;
        match state.on_read(result) {
            PollDecision::Changed(text, fingerprint) => {
                log::debug!("📋 检测到剪贴板变化: {} 字节", text.len());
                handler.on_clipboard_change(text, fingerprint);
            }
            PollDecision::Unchanged | PollDecision::NoText => {}
            PollDecision::Failed(_) => {}
        }

        let next = compute_poll_interval(config.base_interval, config.max_interval, state.consecutive_failures);
        if next != interval {
            log::trace!("📋 轮询间隔调整: {}ms → {}ms", interval.as_millis(), next.as_millis());
            interval = next;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    log::info!("📋 剪贴板监听已停止");
}

/// 可取消的剪贴板监控任务
///
/// 同一时间最多运行一个轮询任务；`stop` 会等待任务真正退出，不留悬挂定时器。
pub struct ClipboardMonitor {
    config: MonitorConfig,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl ClipboardMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> MonitorConfig {
        self.config
    }

    /// 在当前 tokio 运行时中启动轮询
    ///
    /// # 返回
    /// - `Ok(true)`：已启动
    /// - `Ok(false)`：已在运行，本次调用被忽略
    /// - `Err(AppError::State)`：当前线程没有 tokio 运行时
    pub fn start(
        &self,
        source: Arc<dyn ClipboardSource>,
        handler: Arc<dyn ChangeHandler>,
    ) -> Result<bool, AppError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AppError::State(format!("启动剪贴板监听需要 tokio 运行时: {e}")))?;

        let mut running = self.lock_running();
        if let Some((_, handle)) = running.as_ref() {
            if !handle.is_finished() {
                return Ok(false);
            }
        }

        let cancel = CancellationToken::new();
        let handle = runtime.spawn(run_poll_loop(source, handler, self.config, cancel.clone()));
        *running = Some((cancel, handle));
        Ok(true)
    }

    pub fn is_running(&self) -> bool {
        self.lock_running()
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// 取消轮询并等待任务退出
    pub async fn stop(&self) {
        let taken = self.lock_running().take();
        if let Some((cancel, handle)) = taken {
            cancel.cancel();
            if let Err(err) = handle.await {
                log::warn!("📋 剪贴板监听任务退出异常: {}", err);
            }
        }
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<(CancellationToken, JoinHandle<()>)>> {
        match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("剪贴板监听状态锁中毒，继续使用恢复数据");
                poisoned.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn normalize_poll_interval_clamps_bounds() {
        assert_eq!(normalize_poll_interval_ms(5), 20);
        assert_eq!(normalize_poll_interval_ms(250), 250);
        assert_eq!(normalize_poll_interval_ms(6_000), 5_000);
    }

    #[test]
    fn monitor_config_keeps_ceiling_above_base() {
        let config = MonitorConfig::from_millis(500, 100, 1);
        assert_eq!(config.base_interval, Duration::from_millis(500));
        assert_eq!(config.max_interval, Duration::from_millis(500));
        assert_eq!(config.read_timeout, Duration::from_millis(50));
    }

    #[test]
    fn poll_interval_doubles_then_caps() {
        let base = Duration::from_millis(250);
        let max = Duration::from_millis(4_000);
        assert_eq!(compute_poll_interval(base, max, 0), base);
        assert_eq!(compute_poll_interval(base, max, 1), Duration::from_millis(500));
        assert_eq!(compute_poll_interval(base, max, 2), Duration::from_millis(1_000));
        assert_eq!(compute_poll_interval(base, max, 4), max);
        assert_eq!(compute_poll_interval(base, max, 40), max);
    }

    #[test]
    fn poll_state_reports_change_once() {
        let mut state = PollState::default();
        let first = state.on_read(Ok(Some("abc".to_string())));
        assert_eq!(first, PollDecision::Changed("abc".to_string(), Fingerprint::of("abc")));
        assert_eq!(state.on_read(Ok(Some("abc".to_string()))), PollDecision::Unchanged);
    }

    #[test]
    fn poll_state_skips_whitespace_but_remembers_it() {
        let mut state = PollState::default();
        assert_eq!(state.on_read(Ok(Some("  \n".to_string()))), PollDecision::Unchanged);
        assert_eq!(state.last_fingerprint, Some(Fingerprint::of("  \n")));
    }

    #[test]
    fn poll_state_counts_failures_and_resets_on_success() {
        let mut state = PollState::default();
        let err = || Err(AppError::Clipboard("denied".to_string()));
        assert_eq!(state.on_read(err()), PollDecision::Failed(1));
        assert_eq!(state.on_read(err()), PollDecision::Failed(2));
        assert_eq!(state.on_read(Ok(None)), PollDecision::NoText);
        assert_eq!(state.consecutive_failures, 0);
    }

    #[test]
    fn poll_state_does_not_forget_fingerprint_on_failure() {
        let mut state = PollState::default();
        let _ = state.on_read(Ok(Some("a".to_string())));
        let _ = state.on_read(Err(AppError::Clipboard("busy".to_string())));
        assert_eq!(state.on_read(Ok(Some("a".to_string()))), PollDecision::Unchanged);
    }

    struct ScriptedSource {
        script: Mutex<VecDeque<Result<Option<String>, AppError>>>,
        fallback: String,
    }

    impl ClipboardSource for ScriptedSource {
        fn read_text(&self) -> Result<Option<String>, AppError> {
            let mut script = self.script.lock().expect("script lock");
            script
                .pop_front()
                .unwrap_or_else(|| Ok(Some(self.fallback.clone())))
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ChangeHandler for Recorder {
        fn on_clipboard_change(&self, text: String, _fingerprint: Fingerprint) {
            self.0.lock().expect("recorder lock").push(text);
        }
    }

    #[tokio::test]
    async fn monitor_survives_failures_and_stops_cleanly() {
        let source = Arc::new(ScriptedSource {
            script: Mutex::new(VecDeque::from(vec![
                Err(AppError::Clipboard("permission denied".to_string())),
                Err(AppError::Clipboard("permission denied".to_string())),
                Ok(Some("first".to_string())),
                Ok(Some("first".to_string())),
                Ok(None),
                Ok(Some("second".to_string())),
            ])),
            fallback: "second".to_string(),
        });
        let recorder = Arc::new(Recorder::default());
        let monitor = ClipboardMonitor::new(MonitorConfig::from_millis(20, 80, 500));

        assert!(monitor.start(source.clone(), recorder.clone()).expect("start"));
        assert!(!monitor.start(source, recorder.clone()).expect("second start"));
        assert!(monitor.is_running());

        tokio::time::sleep(Duration::from_millis(600)).await;
        monitor.stop().await;
        assert!(!monitor.is_running());

        let seen = recorder.0.lock().expect("recorder lock").clone();
        assert_eq!(seen, vec!["first".to_string(), "second".to_string()]);
    }

    /// 一直阻塞到被放行的数据源，记录同时在读的线程数
    #[derive(Default)]
    struct HangingSource {
        release: AtomicBool,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ClipboardSource for HangingSource {
        fn read_text(&self) -> Result<Option<String>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            while !self.release.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Some("late".to_string()))
        }
    }

    #[tokio::test]
    async fn hung_read_is_not_stacked_with_new_reads() {
        let source = Arc::new(HangingSource::default());
        let recorder = Arc::new(Recorder::default());
        let monitor = ClipboardMonitor::new(MonitorConfig::from_millis(20, 40, 50));

        assert!(monitor.start(source.clone(), recorder.clone()).expect("start"));
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.peak.load(Ordering::SeqCst), 1);
        assert!(recorder.0.lock().expect("recorder lock").is_empty());

        source.release.store(true, Ordering::SeqCst);
        let mut waited = 0;
        while recorder.0.lock().expect("recorder lock").is_empty() && waited < 100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += 1;
        }
        monitor.stop().await;

        assert_eq!(source.peak.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.0.lock().expect("recorder lock").clone(), vec!["late".to_string()]);
    }

    #[test]
    fn start_without_runtime_is_an_error() {
        let monitor = ClipboardMonitor::new(MonitorConfig::default());
        let source: Arc<dyn ClipboardSource> = Arc::new(ScriptedSource {
            script: Mutex::new(VecDeque::new()),
            fallback: String::new(),
        });
        let result = monitor.start(source, Arc::new(Recorder::default()));
        assert!(matches!(result, Err(AppError::State(_))));
    }
}
