//! 会话错误类型
//!
//! 所有命令结果和事件中携带的错误都使用 [`SessionError`]。
//! 错误分为两类：
//!
//! - **命令局部错误**: 同步返回给调用者，不改变会话阶段
//!   (`InvalidTarget`, `Busy`, `EmptyMessage`, ...)
//! - **会话致命错误**: 强制会话进入 `FAILED`/`DISCONNECTED`，并通过事件通知
//!   (`NegotiationFailed`, `ProtocolViolation`, `LinkLost`, ...)

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::wifi::PlatformError;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum SessionError {
    /// 平台拒绝了权限
    #[error("permission denied by platform")]
    PermissionDenied,

    /// 无线硬件不可用（已关闭或不支持 P2P）
    #[error("wireless radio unavailable")]
    RadioUnavailable,

    /// 命令引用了未知或已过期的设备
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// 已有同类操作在进行中
    #[error("operation already in progress")]
    Busy,

    /// 平台协商失败（不透明的平台代码）
    #[error("negotiation failed (code {0})")]
    NegotiationFailed(i32),

    /// 收到格式错误的帧
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// 连接意外断开
    #[error("link lost: {0}")]
    LinkLost(String),

    #[error("not connected")]
    NotConnected,

    #[error("message is empty")]
    EmptyMessage,

    #[error("message too large: {len} bytes (max {max})")]
    MessageTooLarge { len: usize, max: usize },

    /// 有界操作超时
    #[error("timed out during {0}")]
    Timeout(String),

    /// 其他平台错误
    #[error("platform error: {0}")]
    Platform(String),

    /// 会话工作线程已停止
    #[error("session worker stopped")]
    WorkerStopped,
}

impl SessionError {
    /// 该错误是否使当前会话失效
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::NegotiationFailed(_)
                | SessionError::ProtocolViolation(_)
                | SessionError::LinkLost(_)
                | SessionError::Timeout(_)
        )
    }
}

impl From<PlatformError> for SessionError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::PermissionDenied => SessionError::PermissionDenied,
            PlatformError::RadioUnavailable => SessionError::RadioUnavailable,
            PlatformError::Busy => SessionError::Busy,
            PlatformError::Failure(code) => SessionError::Platform(format!("code {code}")),
            PlatformError::Command(detail) => SessionError::Platform(detail),
        }
    }
}
