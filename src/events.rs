//! 引擎事件
//!
//! 发送即忘：没有订阅者或订阅者落后时直接丢弃，不影响修改本身。
//! 事件总是在对应修改完成、快照已交给持久化队列之后发出。

use serde::Serialize;
use tokio::sync::broadcast;

/// 剪贴板历史新增或刷新
pub const CLIPBOARD_UPDATED: &str = "clipboard-updated";
/// 首次见到某个 IP 地址
pub const IP_DETECTED: &str = "ip-detected";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum CoreEvent {
    ClipboardUpdated { id: String, is_new: bool },
    IpDetected { ip: String },
}

impl CoreEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CoreEvent::ClipboardUpdated { .. } => CLIPBOARD_UPDATED,
            CoreEvent::IpDetected { .. } => IP_DETECTED,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: CoreEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            log::trace!("事件 {} 无订阅者", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_constants() {
        let updated = CoreEvent::ClipboardUpdated { id: "1".into(), is_new: true };
        let ip = CoreEvent::IpDetected { ip: "10.0.0.1".into() };
        assert_eq!(updated.name(), "clipboard-updated");
        assert_eq!(ip.name(), "ip-detected");

        let json = serde_json::to_value(&ip).expect("serialize");
        assert_eq!(json["event"], IP_DETECTED);
        assert_eq!(json["payload"]["ip"], "10.0.0.1");
    }

    #[test]
    fn emit_without_subscribers_is_harmless() {
        EventBus::new(4).emit(CoreEvent::IpDetected { ip: "1.1.1.1".into() });
    }

    #[test]
    fn subscribers_receive_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(CoreEvent::IpDetected { ip: "1.1.1.1".into() });
        bus.emit(CoreEvent::ClipboardUpdated { id: "a".into(), is_new: false });
        assert_eq!(rx.try_recv().expect("first").name(), IP_DETECTED);
        assert_eq!(rx.try_recv().expect("second").name(), CLIPBOARD_UPDATED);
    }
}
