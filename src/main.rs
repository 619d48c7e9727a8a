//! # clipkeeper：无界面入口
//!
//! 初始化日志与引擎，监控系统剪贴板，把引擎事件写进日志，
//! 收到 Ctrl-C 后先停监控、再写完队列中的数据后退出。

use std::io::Write;
use std::sync::Arc;

use clipkeeper::clipboard::ArboardSource;
use clipkeeper::persistence::log_file::{LogTee, format_line};
use clipkeeper::{ClipboardService, CoreEvent, EngineConfig};
use tokio::sync::broadcast::error::RecvError;

fn init_logging(service: &ClipboardService) {
    let tee = LogTee::new(service.diagnostic_log());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let line = format_line(chrono::Utc::now(), record.level(), &record.args().to_string());
            writeln!(buf, "{line}")
        })
        .target(env_logger::Target::Pipe(Box::new(tee)))
        .init();
}

#[tokio::main]
async fn main() {
    let loaded = match EngineConfig::load() {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("无法确定数据目录: {err}");
            std::process::exit(1);
        }
    };

    let service = match ClipboardService::new(loaded.config) {
        Ok(service) => service,
        Err(err) => {
            eprintln!("引擎创建失败: {err}");
            std::process::exit(1);
        }
    };
    init_logging(&service);
    if let Some(warning) = loaded.warning {
        log::warn!("{}", warning);
    }
    log::info!("数据目录: {}", service.data_paths().dir.display());

    match service.initialize().await {
        Ok(source) => log::info!("数据来源: {:?}", source),
        Err(err) => {
            log::error!("引擎初始化失败: {err}");
            std::process::exit(1);
        }
    }

    let mut events = service.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("事件订阅落后，跳过 {} 条", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match &event {
                CoreEvent::ClipboardUpdated { id, is_new } => {
                    log::info!("{}: {} (新记录: {})", event.name(), id, is_new);
                }
                CoreEvent::IpDetected { ip } => log::info!("{}: {}", event.name(), ip),
            }
        }
    });

    match service.start_monitoring(Arc::new(ArboardSource)) {
        Ok(_) => log::info!("剪贴板监控已启动"),
        Err(err) => log::error!("剪贴板监控启动失败，仅提供已有数据: {err}"),
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("监听退出信号失败: {err}");
    }
    log::info!("收到退出信号，正在关闭");

    if let Err(err) = service.shutdown().await {
        log::error!("关闭时写入数据失败: {err}");
    }
    event_log.abort();
}
