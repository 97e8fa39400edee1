//! 连接协商器
//!
//! 向平台请求到某个对端的链路。协商是非对称的：由平台在自动协商后决定
//! 哪一端成为 Group Owner，协商器只负责暴露这个结果，从不自行选择，
//! 也不解释或重试平台的失败代码。

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::error::SessionError;
use crate::wifi::{P2pPlatform, PlatformError, PlatformNotifier};

/// 进行中的协商
#[derive(Debug, Clone)]
pub struct PendingNegotiation {
    pub attempt: u64,
    pub address: String,
    pub started: Instant,
}

pub struct ConnectionNegotiator {
    platform: Arc<dyn P2pPlatform>,
    timeout: Duration,
    pending: Option<PendingNegotiation>,
    next_attempt: u64,
}

impl ConnectionNegotiator {
    pub fn new(platform: Arc<dyn P2pPlatform>, timeout: Duration) -> Self {
        Self {
            platform,
            timeout,
            pending: None,
            next_attempt: 1,
        }
    }

    pub fn pending(&self) -> Option<&PendingNegotiation> {
        self.pending.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// 下一次 `connect` 将使用的尝试编号，用于提前标记平台回调
    pub fn upcoming_attempt(&self) -> u64 {
        self.next_attempt
    }

    /// 当前进行中的尝试是否为 `attempt`
    pub fn is_current(&self, attempt: u64) -> bool {
        self.pending.as_ref().is_some_and(|p| p.attempt == attempt)
    }

    /// 发起协商，返回本次尝试编号
    ///
    /// 同一时间只允许一个协商，第二个请求返回 `Busy`。
    pub async fn connect(
        &mut self,
        address: &str,
        notifier: PlatformNotifier,
    ) -> Result<u64, SessionError> {
        if self.pending.is_some() {
            return Err(SessionError::Busy);
        }

        let request = self.platform.request_connect(address, notifier);
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(())) => {}
            Ok(Err(PlatformError::Failure(code))) => {
                warn!("Platform rejected connect to {}: code {}", address, code);
                return Err(SessionError::NegotiationFailed(code));
            }
            Ok(Err(e)) => {
                warn!("Platform rejected connect to {}: {}", address, e);
                return Err(e.into());
            }
            Err(_) => return Err(SessionError::Timeout("connect request".to_string())),
        }

        let attempt = self.next_attempt;
        self.next_attempt += 1;
        self.pending = Some(PendingNegotiation {
            attempt,
            address: address.to_string(),
            started: Instant::now(),
        });

        info!("Negotiation #{} with {} in progress", attempt, address);
        Ok(attempt)
    }

    /// 协商结束（成功或失败），清除进行中的状态
    pub fn resolve(&mut self) -> Option<PendingNegotiation> {
        let pending = self.pending.take();
        if let Some(p) = &pending {
            info!(
                "Negotiation #{} with {} resolved after {:?}",
                p.attempt,
                p.address,
                p.started.elapsed()
            );
        }
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockPlatform, PlatformCall};

    fn notifier() -> PlatformNotifier {
        PlatformNotifier::new(|_| {})
    }

    #[tokio::test]
    async fn test_second_connect_is_busy() {
        let platform = MockPlatform::new();
        let mut negotiator = ConnectionNegotiator::new(platform.clone(), Duration::from_secs(1));

        assert_eq!(negotiator.upcoming_attempt(), 1);
        assert_eq!(negotiator.connect("AA:BB", notifier()).await, Ok(1));
        assert!(negotiator.is_current(1));
        assert_eq!(
            negotiator.connect("CC:DD", notifier()).await,
            Err(SessionError::Busy)
        );

        // 第一次协商不受影响
        assert_eq!(negotiator.pending().unwrap().address, "AA:BB");
        assert_eq!(
            platform.calls(),
            vec![PlatformCall::RequestConnect("AA:BB".to_string())]
        );

        assert_eq!(negotiator.resolve().unwrap().attempt, 1);
        assert!(!negotiator.is_pending());
        assert_eq!(negotiator.connect("CC:DD", notifier()).await, Ok(2));
    }

    #[tokio::test]
    async fn test_platform_codes_are_opaque() {
        let platform = MockPlatform::new();
        platform.fail_connect_with(PlatformError::Failure(7));
        let mut negotiator = ConnectionNegotiator::new(platform.clone(), Duration::from_secs(1));

        assert_eq!(
            negotiator.connect("AA:BB", notifier()).await,
            Err(SessionError::NegotiationFailed(7))
        );
        assert!(!negotiator.is_pending());

        platform.fail_connect_with(PlatformError::PermissionDenied);
        assert_eq!(
            negotiator.connect("AA:BB", notifier()).await,
            Err(SessionError::PermissionDenied)
        );
    }
}
