//! 事件桥
//!
//! 将核心的异步结果以具名事件序列推送给应用层。事件只在会话工作线程上发出，
//! 因此每个订阅者看到的顺序与状态转换顺序一致。

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::SessionError;
use crate::message::DeliveryState;
use crate::session::SessionPhase;
use crate::wifi::{Device, Role};

/// 订阅者缓冲容量
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SessionEvent {
    DiscoveryStarted,
    DiscoveryFailed { reason: SessionError },
    DiscoveryStopped,
    PeersChanged { devices: Vec<Device> },
    ConnectionEstablished { role: Role },
    ConnectionFailed { reason: SessionError },
    MessageReceived { text: String, sequence: u64 },
    MessageStatus { sequence: u64, state: DeliveryState },
    ProtocolViolation { detail: String },
    SessionDisconnected { reason: SessionError },
    PhaseChanged { phase: SessionPhase },
}

impl SessionEvent {
    /// 应用层监听使用的事件名
    pub fn event_name(&self) -> &'static str {
        match self {
            SessionEvent::DiscoveryStarted => "onDiscoveryStarted",
            SessionEvent::DiscoveryFailed { .. } => "onDiscoveryFailed",
            SessionEvent::DiscoveryStopped => "onDiscoveryStopped",
            SessionEvent::PeersChanged { .. } => "onPeersAvailable",
            SessionEvent::ConnectionEstablished { .. } => "onConnectionSuccess",
            SessionEvent::ConnectionFailed { .. } => "onConnectionFailed",
            SessionEvent::MessageReceived { .. } => "onMessageReceived",
            SessionEvent::MessageStatus { .. } => "onMessageStatus",
            SessionEvent::ProtocolViolation { .. } => "onProtocolViolation",
            SessionEvent::SessionDisconnected { .. } => "onSessionDisconnected",
            SessionEvent::PhaseChanged { .. } => "onPhaseChanged",
        }
    }
}

/// 事件广播
#[derive(Debug, Clone)]
pub struct EventBridge {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for EventBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBridge {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: SessionEvent) {
        debug!("Event {}: {:?}", event.event_name(), event);
        // 没有订阅者时丢弃
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
        }
    }
}

/// 单个订阅者的事件流
#[derive(Debug)]
pub struct EventSubscription {
    rx: broadcast::Receiver<SessionEvent>,
}

impl EventSubscription {
    /// 等待下一个事件，桥关闭后返回 `None`
    ///
    /// 订阅者处理过慢时会跳过被覆盖的事件并记录警告。
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event subscriber lagged, skipped {} event(s)", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// 非阻塞地取出下一个事件
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("Event subscriber lagged, skipped {} event(s)", skipped);
                }
                Err(_) => return None,
            }
        }
    }
}
