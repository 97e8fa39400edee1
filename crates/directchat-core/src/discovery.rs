//! 发现控制器
//!
//! 负责对平台无线服务发起/停止扫描。对端变化由平台通过 `PeersChanged`
//! 上报，每次都是权威的全量快照。

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::wifi::{P2pPlatform, PlatformNotifier};

/// `start` 的成功结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryOutcome {
    Started,
    AlreadyRunning,
}

pub struct DiscoveryController {
    platform: Arc<dyn P2pPlatform>,
    timeout: Duration,
    active: bool,
}

impl DiscoveryController {
    pub fn new(platform: Arc<dyn P2pPlatform>, timeout: Duration) -> Self {
        Self {
            platform,
            timeout,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// 开始扫描，扫描进行中时返回 `AlreadyRunning` 而不重启
    pub async fn start(
        &mut self,
        notifier: PlatformNotifier,
    ) -> Result<DiscoveryOutcome, SessionError> {
        if self.active {
            debug!("Discovery already running");
            return Ok(DiscoveryOutcome::AlreadyRunning);
        }

        tokio::time::timeout(self.timeout, self.platform.start_scan(notifier))
            .await
            .map_err(|_| SessionError::Timeout("discovery start".to_string()))??;

        self.active = true;
        info!("Discovery started");
        Ok(DiscoveryOutcome::Started)
    }

    /// 停止扫描，平台错误只记录不上报，返回此前是否在扫描
    pub async fn stop(&mut self) -> bool {
        let was_active = self.active;
        self.active = false;

        match tokio::time::timeout(self.timeout, self.platform.stop_scan()).await {
            Ok(Ok(())) => debug!("Discovery stopped"),
            Ok(Err(e)) => warn!("Failed to stop discovery: {}", e),
            Err(_) => warn!("Timed out stopping discovery"),
        }

        was_active
    }

    /// 平台自行停止了扫描
    pub fn mark_stopped(&mut self) -> bool {
        std::mem::replace(&mut self.active, false)
    }
}
