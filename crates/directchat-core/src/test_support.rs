//! 测试辅助工具
//!
//! 提供一个可脚本化的 [`MockPlatform`]，无需真实无线硬件即可驱动会话：
//! 测试代码决定何时上报对端快照、组建立或协商失败。配合回环地址，
//! 两个会话可以在同一进程内完成完整的发现-协商-聊天流程。
//!
//! ```ignore
//! let platform = MockPlatform::new();
//! let session = Session::spawn(platform.clone(), SessionConfig::default());
//!
//! session.start_discovery().await?;
//! platform.report_peers(vec![Device::new("Phone A", "AA:BB")]);
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::wifi::{Device, GroupInfo, P2pPlatform, PlatformError, PlatformEvent, PlatformNotifier, Role};

/// 平台调用记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    StartScan,
    StopScan,
    RequestConnect(String),
    RemoveGroup,
}

#[derive(Default)]
struct MockState {
    scan_notifier: Option<PlatformNotifier>,
    connect_notifier: Option<PlatformNotifier>,
    scan_error: Option<PlatformError>,
    connect_error: Option<PlatformError>,
    calls: Vec<PlatformCall>,
    unavailable: bool,
}

/// 可脚本化的平台实现
#[derive(Default)]
pub struct MockPlatform {
    state: Mutex<MockState>,
}

impl MockPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 之后的 `start_scan` 返回错误
    pub fn fail_scan_with(&self, error: PlatformError) {
        self.state().scan_error = Some(error);
    }

    /// 之后的 `request_connect` 返回错误
    pub fn fail_connect_with(&self, error: PlatformError) {
        self.state().connect_error = Some(error);
    }

    pub fn set_unavailable(&self) {
        self.state().unavailable = true;
    }

    /// 上报对端快照，扫描未开始时返回 `false`
    pub fn report_peers(&self, peers: Vec<Device>) -> bool {
        self.notify_scan(PlatformEvent::PeersChanged(peers))
    }

    /// 平台自行停止扫描
    pub fn report_discovery_stopped(&self) -> bool {
        self.notify_scan(PlatformEvent::DiscoveryStopped)
    }

    /// 协商成功
    pub fn form_group(&self, info: GroupInfo) -> bool {
        self.notify_connect(PlatformEvent::GroupFormed(info))
    }

    /// 协商失败
    pub fn fail_negotiation(&self, code: i32) -> bool {
        self.notify_connect(PlatformEvent::ConnectFailed(code))
    }

    /// 组被远端移除
    pub fn remove_group_remotely(&self, reason: &str) -> bool {
        self.notify_connect(PlatformEvent::GroupRemoved(reason.to_string()))
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.state().calls.clone()
    }

    fn notify_scan(&self, event: PlatformEvent) -> bool {
        let notifier = self.state().scan_notifier.clone();
        notifier.map(|n| n.notify(event)).is_some()
    }

    fn notify_connect(&self, event: PlatformEvent) -> bool {
        let notifier = self.state().connect_notifier.clone();
        notifier.map(|n| n.notify(event)).is_some()
    }
}

#[async_trait::async_trait]
impl P2pPlatform for MockPlatform {
    async fn start_scan(&self, notifier: PlatformNotifier) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.calls.push(PlatformCall::StartScan);
        if let Some(err) = state.scan_error.clone() {
            return Err(err);
        }
        state.scan_notifier = Some(notifier);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), PlatformError> {
        self.state().calls.push(PlatformCall::StopScan);
        Ok(())
    }

    async fn request_connect(
        &self,
        address: &str,
        notifier: PlatformNotifier,
    ) -> Result<(), PlatformError> {
        let mut state = self.state();
        state
            .calls
            .push(PlatformCall::RequestConnect(address.to_string()));
        if let Some(err) = state.connect_error.clone() {
            return Err(err);
        }
        state.connect_notifier = Some(notifier);
        Ok(())
    }

    async fn remove_group(&self) -> Result<(), PlatformError> {
        self.state().calls.push(PlatformCall::RemoveGroup);
        Ok(())
    }

    async fn is_available(&self) -> bool {
        !self.state().unavailable
    }
}

/// 回环地址上的协商结果
pub fn loopback_group(role: Role) -> GroupInfo {
    GroupInfo {
        role,
        owner_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        interface: None,
    }
}

/// 获取一个当前空闲的本地端口
pub fn free_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}
