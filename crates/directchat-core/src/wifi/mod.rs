//! WiFi P2P 平台接口
//!
//! 核心逻辑与宿主平台的 ad-hoc 无线子系统之间的接缝：
//!
//! - [`P2pPlatform`]: 扫描、停止扫描、请求连接、移除组
//! - [`PlatformNotifier`]: 平台异步完成事件的投递口
//! - [`wpa_cli::WpaCliPlatform`]: 基于 `wpa_supplicant` 的 Linux 实现

pub mod wpa_cli;

#[cfg(test)]
mod tests;

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use wpa_cli::{WpaCliConfig, WpaCliPlatform};

/// 设备状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    Available,
    Invited,
    Connected,
    Failed,
}

/// 发现的对端设备，以 `address` 为唯一标识
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// 显示名称（可能为空）
    pub name: String,
    /// 平台分配的稳定地址（通常是 P2P 设备 MAC）
    pub address: String,
    pub status: DeviceStatus,
}

impl Device {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            status: DeviceStatus::Available,
        }
    }

    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.status = status;
        self
    }
}

/// 协商后的组角色
///
/// 由平台在协商完成后决定，核心只负责暴露，从不自行选择。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[default]
    Undetermined,
    /// Group Owner，监听传输端口
    Owner,
    /// Client，主动连接 Owner
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Undetermined => "undetermined",
            Role::Owner => "owner",
            Role::Client => "client",
        };
        f.write_str(name)
    }
}

/// 协商结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub role: Role,
    /// Group Owner 的 IP 地址（Client 连接目标，Owner 时为本机地址）
    pub owner_ip: IpAddr,
    /// 组网络接口（如 p2p-wlan0-0）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
}

/// 平台失败原因代码：内部错误
pub const REASON_ERROR: i32 = 0;
/// 平台失败原因代码：不支持 P2P
pub const REASON_P2P_UNSUPPORTED: i32 = 1;
/// 平台失败原因代码：忙
pub const REASON_BUSY: i32 = 2;

/// 平台请求失败原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("wireless radio unavailable")]
    RadioUnavailable,
    #[error("platform busy")]
    Busy,
    #[error("platform failure (code {0})")]
    Failure(i32),
    #[error("platform command failed: {0}")]
    Command(String),
}

impl PlatformError {
    /// 从平台失败原因代码转换
    pub fn from_reason_code(code: i32) -> Self {
        match code {
            REASON_P2P_UNSUPPORTED => PlatformError::RadioUnavailable,
            REASON_BUSY => PlatformError::Busy,
            other => PlatformError::Failure(other),
        }
    }
}

/// 平台异步完成事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    /// 完整的对端快照（全量替换，不是增量）
    PeersChanged(Vec<Device>),
    /// 平台停止了扫描
    DiscoveryStopped,
    /// 协商完成，组已建立
    GroupFormed(GroupInfo),
    /// 协商失败（不透明代码）
    ConnectFailed(i32),
    /// 组被移除（对端离开等）
    GroupRemoved(String),
}

/// 平台事件投递口
///
/// 平台的各个回调可能来自不同的执行上下文，全部经由此处汇入
/// 会话工作线程的单一有序收件箱。
#[derive(Clone)]
pub struct PlatformNotifier {
    sink: Arc<dyn Fn(PlatformEvent) + Send + Sync>,
}

impl PlatformNotifier {
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(PlatformEvent) + Send + Sync + 'static,
    {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn notify(&self, event: PlatformEvent) {
        (self.sink)(event);
    }

    pub fn peers_changed(&self, peers: Vec<Device>) {
        self.notify(PlatformEvent::PeersChanged(peers));
    }

    pub fn group_formed(&self, info: GroupInfo) {
        self.notify(PlatformEvent::GroupFormed(info));
    }

    pub fn connect_failed(&self, code: i32) {
        self.notify(PlatformEvent::ConnectFailed(code));
    }
}

impl fmt::Debug for PlatformNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformNotifier").finish_non_exhaustive()
    }
}

/// 宿主平台的 ad-hoc 无线服务
///
/// 每个方法只返回"请求是否被接受"，结果通过 `notifier` 异步上报。
#[async_trait::async_trait]
pub trait P2pPlatform: Send + Sync {
    /// 开始扫描，之后每次对端集合变化都通过 `PeersChanged` 上报
    async fn start_scan(&self, notifier: PlatformNotifier) -> Result<(), PlatformError>;

    /// 停止扫描
    async fn stop_scan(&self) -> Result<(), PlatformError>;

    /// 请求连接到指定设备，结果通过 `GroupFormed` / `ConnectFailed` 上报
    async fn request_connect(
        &self,
        address: &str,
        notifier: PlatformNotifier,
    ) -> Result<(), PlatformError>;

    /// 移除当前组（断开链路）
    async fn remove_group(&self) -> Result<(), PlatformError>;

    /// 平台是否可用
    async fn is_available(&self) -> bool {
        true
    }
}
