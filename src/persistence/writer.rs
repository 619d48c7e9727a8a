//! 后台持久化任务
//!
//! 修改方只负责把快照放进无界队列，不等待磁盘。后台任务一次取空队列，
//! 只写最新的一份快照，并在阻塞线程池里逐次执行，写入之间不会交叠。
//! 写入失败只记录日志，下一次修改会再次尝试。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::JsonStore;
use crate::error::AppError;
use crate::store::AppData;

type Reply = oneshot::Sender<Result<(), String>>;

enum WriteRequest {
    Save(Box<AppData>),
    Flush(Reply),
    Shutdown(Reply),
}

/// 提交快照的句柄，可随意克隆
#[derive(Clone)]
pub struct PersistQueue {
    tx: mpsc::UnboundedSender<WriteRequest>,
}

impl PersistQueue {
    pub(crate) fn submit(&self, data: AppData) {
        if self.tx.send(WriteRequest::Save(Box::new(data))).is_err() {
            log::warn!("持久化任务已退出，本次修改未落盘");
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    writes: AtomicU64,
    failures: AtomicU64,
    coalesced: AtomicU64,
}

/// 写入统计（诊断用）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    pub writes: u64,
    pub failures: u64,
    /// 被更新快照覆盖、未单独写入的快照数
    pub coalesced: u64,
}

pub struct PersistenceWriter {
    queue: PersistQueue,
    counters: Arc<Counters>,
    handle: JoinHandle<()>,
}

impl PersistenceWriter {
    /// 在当前 tokio 运行时中启动后台写入任务
    pub fn spawn(store: Arc<JsonStore>) -> Result<Self, AppError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AppError::State(format!("持久化任务需要 tokio 运行时: {}", e)))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let handle = runtime.spawn(run_writer(store, rx, counters.clone()));
        Ok(Self {
            queue: PersistQueue { tx },
            counters,
            handle,
        })
    }

    pub fn queue(&self) -> PersistQueue {
        self.queue.clone()
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            writes: self.counters.writes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
        }
    }

    /// 等待此前提交的快照全部落盘；最近一次写入失败时返回错误
    pub async fn flush(&self) -> Result<(), AppError> {
        let (reply, done) = oneshot::channel();
        self.queue
            .tx
            .send(WriteRequest::Flush(reply))
            .map_err(|_| AppError::State("持久化任务已退出".to_string()))?;
        wait_reply(done).await
    }

    /// 写完队列中剩余的快照后结束任务
    pub async fn shutdown(self) -> Result<(), AppError> {
        let (reply, done) = oneshot::channel();
        let result = match self.queue.tx.send(WriteRequest::Shutdown(reply)) {
            Ok(()) => wait_reply(done).await,
            Err(_) => Err(AppError::State("持久化任务已退出".to_string())),
        };
        if let Err(e) = self.handle.await {
            log::error!("持久化任务异常结束: {}", e);
        }
        result
    }
}

async fn wait_reply(done: oneshot::Receiver<Result<(), String>>) -> Result<(), AppError> {
    done.await
        .map_err(|_| AppError::State("持久化任务未响应".to_string()))?
        .map_err(AppError::Storage)
}

async fn run_writer(
    store: Arc<JsonStore>,
    mut rx: mpsc::UnboundedReceiver<WriteRequest>,
    counters: Arc<Counters>,
) {
    let mut last_result: Result<(), String> = Ok(());

    while let Some(first) = rx.recv().await {
        let mut latest: Option<Box<AppData>> = None;
        let mut waiters: Vec<Reply> = Vec::new();
        let mut stop: Option<Reply> = None;

        let mut next = Some(first);
        while let Some(request) = next {
            match request {
                WriteRequest::Save(data) => {
                    if latest.replace(data).is_some() {
                        counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    }
                }
                WriteRequest::Flush(reply) => waiters.push(reply),
                WriteRequest::Shutdown(reply) => stop = Some(reply),
            }
            next = rx.try_recv().ok();
        }

        if let Some(data) = latest {
            last_result = write_snapshot(store.clone(), data).await;
            match &last_result {
                Ok(()) => {
                    counters.writes.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    log::error!("保存数据失败: {}", e);
                }
            }
        }

        for waiter in waiters {
            let _ = waiter.send(last_result.clone());
        }
        if let Some(reply) = stop {
            log::debug!("持久化任务退出");
            let _ = reply.send(last_result);
            return;
        }
    }
}

async fn write_snapshot(store: Arc<JsonStore>, data: Box<AppData>) -> Result<(), String> {
    match tokio::task::spawn_blocking(move || store.save(&data)).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(e) => Err(format!("写入线程异常: {}", e)),
    }
}
