//! DirectChat Core Library
//!
//! Wi-Fi Direct 点对点聊天的会话核心：发现附近设备、与选中的对端协商链路，
//! 并在协商出的链路上收发长度前缀的文本消息。
//!
//! # 模块
//!
//! - **registry**: 最近一次发现快照
//! - **discovery**: 扫描开始/停止
//! - **negotiator**: 连接协商，角色由平台决定
//! - **session**: 会话状态机与唯一的工作任务
//! - **channel**: 字节流链路与帧编解码
//! - **bridge**: 面向应用层的事件流
//! - **wifi**: 平台抽象与 `wpa_cli` 实现
//!
//! # 使用示例
//!
//! ```ignore
//! use directchat_core::{Session, SessionConfig, SessionEvent, WpaCliPlatform};
//!
//! let platform = Arc::new(WpaCliPlatform::new("wlan0"));
//! let session = Session::spawn(platform, SessionConfig::default());
//! let mut events = session.subscribe();
//!
//! session.start_discovery().await?;
//! session.connect("AA:BB:CC:DD:EE:FF").await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::ConnectionEstablished { role } = event {
//!         println!("connected as {role}");
//!         session.send("hi").await?;
//!     }
//! }
//! ```

pub mod bridge;
pub mod channel;
pub mod config;
pub mod discovery;
pub mod error;
pub mod ipc;
pub mod message;
pub mod negotiator;
pub mod registry;
pub mod session;
pub mod test_support;
pub mod wifi;

pub use bridge::{EventBridge, EventSubscription, SessionEvent};
pub use config::{AppSettings, SessionConfig};
pub use discovery::DiscoveryOutcome;
pub use error::SessionError;
pub use message::{DeliveryState, Direction, Message};
pub use session::{Session, SessionHandle, SessionPhase, SessionSnapshot};
pub use wifi::{
    Device, DeviceStatus, GroupInfo, P2pPlatform, PlatformError, PlatformEvent, PlatformNotifier,
    Role, WpaCliPlatform,
};
