//! 会话阶段与转换表

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::wifi::{Device, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    #[default]
    Idle,
    Discovering,
    PeersAvailable,
    Negotiating,
    LinkEstablishing,
    Connected,
    Disconnected,
    Failed,
}

impl SessionPhase {
    /// 是否处于连接中/已连接阶段
    pub fn is_linking(self) -> bool {
        matches!(
            self,
            SessionPhase::Negotiating | SessionPhase::LinkEstablishing | SessionPhase::Connected
        )
    }

    /// 查转换表，非法触发返回 `None`
    pub fn next(self, trigger: Transition) -> Option<SessionPhase> {
        use SessionPhase::*;

        match (self, trigger) {
            (Idle, Transition::DiscoveryStarted) => Some(Discovering),
            (Discovering, Transition::PeersChanged { empty: false }) => Some(PeersAvailable),
            (PeersAvailable, Transition::PeersChanged { empty: true }) => Some(Discovering),
            (Discovering | PeersAvailable, Transition::DiscoveryStopped) => Some(Idle),
            (Idle | Discovering | PeersAvailable, Transition::ConnectAccepted) => Some(Negotiating),
            (Negotiating, Transition::NegotiationEstablished) => Some(LinkEstablishing),
            (LinkEstablishing, Transition::ChannelOpened) => Some(Connected),
            (Negotiating | LinkEstablishing, Transition::Failure) => Some(Failed),
            (Connected, Transition::LinkDropped) => Some(Disconnected),
            (Failed | Disconnected, Transition::Reset) => Some(Idle),
            _ => None,
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Idle => "IDLE",
            SessionPhase::Discovering => "DISCOVERING",
            SessionPhase::PeersAvailable => "PEERS_AVAILABLE",
            SessionPhase::Negotiating => "NEGOTIATING",
            SessionPhase::LinkEstablishing => "LINK_ESTABLISHING",
            SessionPhase::Connected => "CONNECTED",
            SessionPhase::Disconnected => "DISCONNECTED",
            SessionPhase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// 状态机触发
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    DiscoveryStarted,
    DiscoveryStopped,
    PeersChanged { empty: bool },
    ConnectAccepted,
    NegotiationEstablished,
    ChannelOpened,
    Failure,
    LinkDropped,
    Reset,
}

/// 会话状态
///
/// `peer` 只在协商/连接阶段存在；`role` 只在 `LinkEstablishing`/`Connected`
/// 阶段为 Owner 或 Client。
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    phase: SessionPhase,
    peer: Option<Device>,
    role: Role,
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn peer(&self) -> Option<&Device> {
        self.peer.as_ref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// 应用一次触发，返回新阶段；非法触发不改变状态
    pub fn apply(&mut self, trigger: Transition) -> Option<SessionPhase> {
        let next = self.phase.next(trigger)?;
        self.phase = next;

        if !matches!(
            next,
            SessionPhase::LinkEstablishing | SessionPhase::Connected
        ) {
            self.role = Role::Undetermined;
        }
        if !next.is_linking() {
            self.peer = None;
        }
        Some(next)
    }

    /// 协商开始时记录对端
    pub fn set_peer(&mut self, peer: Device) {
        if self.phase.is_linking() {
            self.peer = Some(peer);
        }
    }

    /// 协商完成时记录平台决定的角色
    pub fn set_role(&mut self, role: Role) {
        if matches!(
            self.phase,
            SessionPhase::LinkEstablishing | SessionPhase::Connected
        ) {
            self.role = role;
        }
    }
}
