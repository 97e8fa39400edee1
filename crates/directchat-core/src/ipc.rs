//! 守护进程 IPC 协议
//!
//! Unix Domain Socket 上的 JSON 行协议，守护进程与 CLI 共用。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::bridge::SessionEvent;
use crate::error::SessionError;
use crate::message::Message;
use crate::session::SessionPhase;
use crate::wifi::{Device, Role};

pub fn socket_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("directchat.sock")
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    Status,
    Scan,
    StopScan,
    Peers,
    Connect { address: String },
    Send { text: String },
    Disconnect,
    Messages,
    /// 将连接转为事件流
    Watch,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    Ok { message: String },
    Error { error: SessionError },
    /// 请求行无法解析
    Invalid { message: String },
    Devices { devices: Vec<Device> },
    Status {
        phase: SessionPhase,
        role: Role,
        peer: Option<Device>,
    },
    Accepted { sequence: u64 },
    Messages { messages: Vec<Message> },
    Event { event: SessionEvent },
}

impl From<SessionError> for IpcResponse {
    fn from(error: SessionError) -> Self {
        IpcResponse::Error { error }
    }
}
