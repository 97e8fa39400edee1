//! 会话
//!
//! 进程内唯一的会话由一个工作任务持有。所有触发（应用命令、平台回调、
//! 通道事件、协商超时）都投递到同一个有序收件箱，逐个处理，
//! 因此会话状态、对端注册表与消息日志只在工作任务上被修改。
//!
//! 应用层通过 [`SessionHandle`] 发送命令、读取快照和订阅事件：
//!
//! ```ignore
//! let session = Session::spawn(platform, SessionConfig::default());
//! let mut events = session.subscribe();
//!
//! session.start_discovery().await?;
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::PeersChanged { devices } = event {
//!         session.connect(&devices[0].address).await?;
//!         break;
//!     }
//! }
//! ```

mod state;
mod worker;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::bridge::{EventBridge, EventSubscription};
use crate::channel::ChannelEvent;
use crate::config::SessionConfig;
use crate::discovery::DiscoveryOutcome;
use crate::error::SessionError;
use crate::message::Message;
use crate::wifi::{Device, P2pPlatform, PlatformEvent, Role};

pub use state::{SessionPhase, SessionState, Transition};

use worker::SessionWorker;

/// 会话的只读副本
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub role: Role,
    pub peer: Option<Device>,
    pub peers: Vec<Device>,
    pub messages: Vec<Message>,
    pub discovering: bool,
}

/// 应用命令
pub(crate) enum Command {
    StartDiscovery(oneshot::Sender<Result<DiscoveryOutcome, SessionError>>),
    StopDiscovery(oneshot::Sender<bool>),
    Connect {
        address: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Send {
        text: String,
        reply: oneshot::Sender<Result<u64, SessionError>>,
    },
    Disconnect(oneshot::Sender<Result<(), SessionError>>),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    IsAvailable(oneshot::Sender<bool>),
}

/// 收件箱中的触发
pub(crate) enum Trigger {
    Command(Command),
    /// 平台回调；来自连接请求的回调带有协商尝试编号
    Platform {
        attempt: Option<u64>,
        event: PlatformEvent,
    },
    Channel(ChannelEvent),
    NegotiationTimeout(u64),
    /// 清理完成后应答
    Shutdown(oneshot::Sender<()>),
}

pub struct Session;

impl Session {
    /// 启动会话工作任务
    ///
    /// 必须在 tokio 运行时内调用。所有句柄被丢弃或调用 `shutdown` 后工作任务退出。
    pub fn spawn(platform: Arc<dyn P2pPlatform>, config: SessionConfig) -> SessionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let bridge = EventBridge::new();

        let worker = SessionWorker::new(platform, config, bridge.clone(), rx, tx.downgrade());
        tokio::spawn(worker.run());

        SessionHandle { tx, bridge }
    }
}

/// 会话句柄
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Trigger>,
    bridge: EventBridge,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Trigger::Command(make(reply)))
            .map_err(|_| SessionError::WorkerStopped)?;
        rx.await.map_err(|_| SessionError::WorkerStopped)
    }

    /// 开始发现，扫描进行中时返回 `AlreadyRunning`
    pub async fn start_discovery(&self) -> Result<DiscoveryOutcome, SessionError> {
        self.request(Command::StartDiscovery).await?
    }

    /// 停止发现（尽力而为），返回此前是否在扫描
    pub async fn stop_discovery(&self) -> Result<bool, SessionError> {
        self.request(Command::StopDiscovery).await
    }

    /// 向对端发起连接
    ///
    /// 返回 `Ok` 表示协商已被平台接受，结果通过事件 `ConnectionEstablished`
    /// 或 `ConnectionFailed` 送达。
    pub async fn connect(&self, address: &str) -> Result<(), SessionError> {
        let address = address.to_string();
        self.request(|reply| Command::Connect { address, reply })
            .await?
    }

    /// 发送文本，返回分配的序号
    pub async fn send(&self, text: &str) -> Result<u64, SessionError> {
        let text = text.to_string();
        self.request(|reply| Command::Send { text, reply }).await?
    }

    /// 主动断开已建立的链路
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.request(Command::Disconnect).await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(Command::Snapshot).await
    }

    pub async fn phase(&self) -> Result<SessionPhase, SessionError> {
        Ok(self.snapshot().await?.phase)
    }

    pub async fn peers(&self) -> Result<Vec<Device>, SessionError> {
        Ok(self.snapshot().await?.peers)
    }

    pub async fn messages(&self) -> Result<Vec<Message>, SessionError> {
        Ok(self.snapshot().await?.messages)
    }

    /// 平台无线服务是否可用
    pub async fn is_available(&self) -> Result<bool, SessionError> {
        self.request(Command::IsAvailable).await
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.bridge.subscribe()
    }

    /// 让工作任务退出，等待链路、扫描与平台组的清理完成后返回
    ///
    /// 工作任务已退出时立即返回。
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Trigger::Shutdown(ack)).is_ok() {
            let _ = done.await;
        }
    }
}
