//! 会话工作任务

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Command, SessionPhase, SessionSnapshot, SessionState, Transition, Trigger};
use crate::bridge::{EventBridge, SessionEvent};
use crate::channel::{self, ChannelEvent, ChannelEventKind, ChannelSink, Link, LinkEndpoint, OutboundFrame};
use crate::config::SessionConfig;
use crate::discovery::{DiscoveryController, DiscoveryOutcome};
use crate::error::SessionError;
use crate::message::{DeliveryState, MessageLog};
use crate::negotiator::ConnectionNegotiator;
use crate::registry::PeerRegistry;
use crate::wifi::{DeviceStatus, GroupInfo, P2pPlatform, PlatformEvent, PlatformNotifier};

type Poster = mpsc::WeakUnboundedSender<Trigger>;

fn post(poster: &Poster, trigger: Trigger) {
    match poster.upgrade() {
        Some(tx) => {
            let _ = tx.send(trigger);
        }
        None => debug!("Session worker gone, dropping trigger"),
    }
}

pub(super) struct SessionWorker {
    config: SessionConfig,
    platform: Arc<dyn P2pPlatform>,
    state: SessionState,
    registry: PeerRegistry,
    log: MessageLog,
    discovery: DiscoveryController,
    negotiator: ConnectionNegotiator,
    bridge: EventBridge,
    inbox: mpsc::UnboundedReceiver<Trigger>,
    poster: Poster,
    /// 当前会话所属的协商尝试
    attempt: Option<u64>,
    /// 正在打开的链路
    opening: Option<(u64, JoinHandle<()>)>,
    link: Option<Link>,
    next_link: u64,
}

impl SessionWorker {
    pub(super) fn new(
        platform: Arc<dyn P2pPlatform>,
        config: SessionConfig,
        bridge: EventBridge,
        inbox: mpsc::UnboundedReceiver<Trigger>,
        poster: Poster,
    ) -> Self {
        Self {
            discovery: DiscoveryController::new(platform.clone(), config.platform_timeout),
            negotiator: ConnectionNegotiator::new(platform.clone(), config.platform_timeout),
            config,
            platform,
            state: SessionState::default(),
            registry: PeerRegistry::new(),
            log: MessageLog::new(),
            bridge,
            inbox,
            poster,
            attempt: None,
            opening: None,
            link: None,
            next_link: 1,
        }
    }

    pub(super) async fn run(mut self) {
        info!("Session worker started");
        let mut stopped = None;

        while let Some(trigger) = self.inbox.recv().await {
            match trigger {
                Trigger::Command(command) => self.handle_command(command).await,
                Trigger::Platform { attempt, event } => self.handle_platform(attempt, event).await,
                Trigger::Channel(event) => self.handle_channel(event).await,
                Trigger::NegotiationTimeout(attempt) => {
                    if self.negotiator.is_current(attempt)
                        && self.state.phase() == SessionPhase::Negotiating
                    {
                        warn!("Negotiation #{} timed out", attempt);
                        self.fail_connection(SessionError::Timeout("negotiation".to_string()))
                            .await;
                    }
                }
                Trigger::Shutdown(ack) => {
                    stopped = Some(ack);
                    break;
                }
            }
        }

        self.shutdown().await;
        info!("Session worker stopped");
        if let Some(ack) = stopped {
            let _ = ack.send(());
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartDiscovery(reply) => {
                let result = self.start_discovery().await;
                let _ = reply.send(result);
            }
            Command::StopDiscovery(reply) => {
                let result = self.stop_discovery().await;
                let _ = reply.send(result);
            }
            Command::Connect { address, reply } => {
                let result = self.connect(&address).await;
                let _ = reply.send(result);
            }
            Command::Send { text, reply } => {
                let result = self.send(text).await;
                let _ = reply.send(result);
            }
            Command::Disconnect(reply) => {
                let result = match self.state.phase() {
                    SessionPhase::Connected => {
                        self.link_dropped(SessionError::LinkLost("closed locally".to_string()))
                            .await;
                        Ok(())
                    }
                    // 协商和打开套接字无法中止，只能等待超时
                    SessionPhase::Negotiating | SessionPhase::LinkEstablishing => {
                        Err(SessionError::Busy)
                    }
                    _ => Err(SessionError::NotConnected),
                };
                let _ = reply.send(result);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::IsAvailable(reply) => {
                let available = tokio::time::timeout(
                    self.config.platform_timeout,
                    self.platform.is_available(),
                )
                .await
                .unwrap_or(false);
                let _ = reply.send(available);
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.state.phase(),
            role: self.state.role(),
            peer: self.state.peer().cloned(),
            peers: self.registry.snapshot(),
            messages: self.log.snapshot(),
            discovering: self.discovery.is_active(),
        }
    }

    fn transition(&mut self, trigger: Transition) -> bool {
        let from = self.state.phase();
        match self.state.apply(trigger) {
            Some(phase) => {
                info!("Session {} -> {} ({:?})", from, phase, trigger);
                self.bridge.emit(SessionEvent::PhaseChanged { phase });
                true
            }
            None => {
                debug!("Ignoring {:?} in phase {}", trigger, from);
                false
            }
        }
    }

    fn scan_notifier(&self) -> PlatformNotifier {
        let poster = self.poster.clone();
        PlatformNotifier::new(move |event| {
            post(
                &poster,
                Trigger::Platform {
                    attempt: None,
                    event,
                },
            );
        })
    }

    fn connect_notifier(&self, attempt: u64) -> PlatformNotifier {
        let poster = self.poster.clone();
        PlatformNotifier::new(move |event| {
            post(
                &poster,
                Trigger::Platform {
                    attempt: Some(attempt),
                    event,
                },
            );
        })
    }

    fn channel_sink(&self) -> ChannelSink {
        let poster = self.poster.clone();
        Arc::new(move |event| post(&poster, Trigger::Channel(event)))
    }

    // ---- 发现 ----

    async fn start_discovery(&mut self) -> Result<DiscoveryOutcome, SessionError> {
        if self.discovery.is_active() {
            return Ok(DiscoveryOutcome::AlreadyRunning);
        }
        if self.state.phase() != SessionPhase::Idle {
            return Err(SessionError::Busy);
        }

        let notifier = self.scan_notifier();
        match self.discovery.start(notifier).await {
            Ok(outcome) => {
                self.bridge.emit(SessionEvent::DiscoveryStarted);
                self.transition(Transition::DiscoveryStarted);
                Ok(outcome)
            }
            Err(reason) => {
                warn!("Discovery failed to start: {}", reason);
                self.bridge.emit(SessionEvent::DiscoveryFailed {
                    reason: reason.clone(),
                });
                Err(reason)
            }
        }
    }

    async fn stop_discovery(&mut self) -> bool {
        let was_active = self.discovery.stop().await;
        if was_active {
            self.bridge.emit(SessionEvent::DiscoveryStopped);
        }
        self.transition(Transition::DiscoveryStopped);
        was_active
    }

    // ---- 连接 ----

    async fn connect(&mut self, address: &str) -> Result<(), SessionError> {
        if self.state.phase().is_linking() || self.negotiator.is_pending() {
            return Err(SessionError::Busy);
        }
        let Some(device) = self.registry.get(address).cloned() else {
            return Err(SessionError::InvalidTarget(address.to_string()));
        };
        if device.status != DeviceStatus::Available {
            return Err(SessionError::InvalidTarget(address.to_string()));
        }

        let attempt = self.negotiator.upcoming_attempt();
        let notifier = self.connect_notifier(attempt);

        if let Err(reason) = self.negotiator.connect(address, notifier).await {
            self.registry.set_status(address, DeviceStatus::Failed);
            self.bridge.emit(SessionEvent::PeersChanged {
                devices: self.registry.snapshot(),
            });
            self.bridge.emit(SessionEvent::ConnectionFailed {
                reason: reason.clone(),
            });
            return Err(reason);
        }

        self.attempt = Some(attempt);
        self.registry.pin(address, DeviceStatus::Invited);
        self.transition(Transition::ConnectAccepted);
        self.state
            .set_peer(device.with_status(DeviceStatus::Invited));
        self.bridge.emit(SessionEvent::PeersChanged {
            devices: self.registry.snapshot(),
        });

        let poster = self.poster.clone();
        let timeout = self.config.negotiation_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            post(&poster, Trigger::NegotiationTimeout(attempt));
        });

        Ok(())
    }

    async fn group_formed(&mut self, info: GroupInfo) {
        let Some(endpoint) = LinkEndpoint::for_group(&info, self.config.chat_port) else {
            self.fail_connection(SessionError::Platform(
                "group formed without a role".to_string(),
            ))
            .await;
            return;
        };

        self.negotiator.resolve();
        self.transition(Transition::NegotiationEstablished);
        self.state.set_role(info.role);
        info!("Negotiated role {} (owner at {})", info.role, info.owner_ip);

        let id = self.next_link;
        self.next_link += 1;
        let handle = channel::spawn_open(
            id,
            endpoint,
            self.config.connect_timeout,
            self.channel_sink(),
        );
        self.opening = Some((id, handle));
    }

    /// 协商或建链失败：FAILED -> IDLE
    async fn fail_connection(&mut self, reason: SessionError) {
        warn!("Connection failed: {}", reason);

        self.negotiator.resolve();
        if let Some((_, handle)) = self.opening.take() {
            handle.abort();
        }
        if let Some(link) = self.link.take() {
            link.close();
        }

        if let Some(peer) = self.state.peer().map(|p| p.address.clone()) {
            self.registry.unpin();
            self.registry.set_status(&peer, DeviceStatus::Failed);
        }

        self.transition(Transition::Failure);
        self.bridge.emit(SessionEvent::PeersChanged {
            devices: self.registry.snapshot(),
        });
        self.bridge
            .emit(SessionEvent::ConnectionFailed { reason });
        self.reset().await;
    }

    /// 已建立的链路断开：DISCONNECTED -> IDLE
    async fn link_dropped(&mut self, reason: SessionError) {
        info!("Link dropped: {}", reason);

        if let Some(link) = self.link.take() {
            link.close();
        }
        for sequence in self.log.fail_pending() {
            self.bridge.emit(SessionEvent::MessageStatus {
                sequence,
                state: DeliveryState::Failed,
            });
        }
        if let SessionError::ProtocolViolation(detail) = &reason {
            self.bridge.emit(SessionEvent::ProtocolViolation {
                detail: detail.clone(),
            });
        }

        if let Some(peer) = self.state.peer().map(|p| p.address.clone()) {
            self.registry.unpin();
            self.registry.set_status(&peer, DeviceStatus::Available);
        }

        self.transition(Transition::LinkDropped);
        self.bridge
            .emit(SessionEvent::SessionDisconnected { reason });
        self.reset().await;
    }

    /// 回到 IDLE，尽力停止扫描并移除平台组
    async fn reset(&mut self) {
        self.attempt = None;

        if self.discovery.stop().await {
            self.bridge.emit(SessionEvent::DiscoveryStopped);
        }
        match tokio::time::timeout(self.config.platform_timeout, self.platform.remove_group())
            .await
        {
            Ok(Ok(())) => debug!("Platform group removed"),
            Ok(Err(e)) => warn!("Failed to remove platform group: {}", e),
            Err(_) => warn!("Timed out removing platform group"),
        }

        self.transition(Transition::Reset);
    }

    // ---- 平台回调 ----

    async fn handle_platform(&mut self, attempt: Option<u64>, event: PlatformEvent) {
        match event {
            PlatformEvent::PeersChanged(devices) => {
                if !self.discovery.is_active() {
                    debug!("Ignoring peer snapshot while discovery is stopped");
                    return;
                }
                self.registry.replace(devices);
                self.bridge.emit(SessionEvent::PeersChanged {
                    devices: self.registry.snapshot(),
                });
                self.transition(Transition::PeersChanged {
                    empty: self.registry.is_empty(),
                });
            }
            PlatformEvent::DiscoveryStopped => {
                if self.discovery.mark_stopped() {
                    self.bridge.emit(SessionEvent::DiscoveryStopped);
                    self.transition(Transition::DiscoveryStopped);
                }
            }
            PlatformEvent::GroupFormed(info) => match attempt {
                Some(a)
                    if self.negotiator.is_current(a)
                        && self.state.phase() == SessionPhase::Negotiating =>
                {
                    self.group_formed(info).await;
                }
                _ => debug!("Ignoring stale group formation {:?}", attempt),
            },
            PlatformEvent::ConnectFailed(code) => match attempt {
                Some(a)
                    if self.negotiator.is_current(a)
                        && self.state.phase() == SessionPhase::Negotiating =>
                {
                    self.fail_connection(SessionError::NegotiationFailed(code))
                        .await;
                }
                _ => debug!("Ignoring stale connect failure {} {:?}", code, attempt),
            },
            PlatformEvent::GroupRemoved(reason) => {
                if attempt.is_none() || attempt != self.attempt {
                    debug!("Ignoring removal of a stale group: {}", reason);
                    return;
                }
                let error = SessionError::LinkLost(format!("group removed: {reason}"));
                match self.state.phase() {
                    SessionPhase::Connected => self.link_dropped(error).await,
                    SessionPhase::Negotiating | SessionPhase::LinkEstablishing => {
                        self.fail_connection(error).await;
                    }
                    phase => debug!("Ignoring group removal in phase {}", phase),
                }
            }
        }
    }

    // ---- 通道 ----

    async fn handle_channel(&mut self, event: ChannelEvent) {
        let ChannelEvent { link, kind } = event;

        match kind {
            ChannelEventKind::Opened(stream) => {
                if !self.is_opening(link) {
                    debug!("Dropping stale connection for link {}", link);
                    return;
                }
                self.opening = None;
                self.link = Some(Link::start(
                    link,
                    stream,
                    self.config.max_frame_len,
                    self.config.connect_timeout,
                    self.channel_sink(),
                ));
                self.log.reset();

                if let Some(peer) = self.state.peer().map(|p| p.address.clone()) {
                    self.registry.pin(&peer, DeviceStatus::Connected);
                }
                self.transition(Transition::ChannelOpened);
                self.bridge.emit(SessionEvent::PeersChanged {
                    devices: self.registry.snapshot(),
                });
                self.bridge.emit(SessionEvent::ConnectionEstablished {
                    role: self.state.role(),
                });
            }
            ChannelEventKind::OpenFailed(reason) => {
                if self.is_opening(link) {
                    self.opening = None;
                    self.fail_connection(reason).await;
                }
            }
            ChannelEventKind::Received(text) => {
                if !self.is_current_link(link) {
                    debug!("Dropping frame from stale link {}", link);
                    return;
                }
                let sequence = self.log.record_received(text.clone());
                self.bridge
                    .emit(SessionEvent::MessageReceived { text, sequence });
            }
            ChannelEventKind::Delivered(sequence) => {
                if self.is_current_link(link)
                    && self.log.set_delivery(sequence, DeliveryState::Delivered)
                {
                    self.bridge.emit(SessionEvent::MessageStatus {
                        sequence,
                        state: DeliveryState::Delivered,
                    });
                }
            }
            ChannelEventKind::WriteFailed { sequence, error } => {
                if !self.is_current_link(link) {
                    return;
                }
                warn!("Write of message {} failed: {}", sequence, error);
                if self.log.set_delivery(sequence, DeliveryState::Failed) {
                    self.bridge.emit(SessionEvent::MessageStatus {
                        sequence,
                        state: DeliveryState::Failed,
                    });
                }
                self.link_dropped(error).await;
            }
            ChannelEventKind::Closed(reason) => {
                if self.is_current_link(link) {
                    self.link_dropped(reason).await;
                } else {
                    debug!("Ignoring close of stale link {}", link);
                }
            }
        }
    }

    fn is_opening(&self, link: u64) -> bool {
        self.state.phase() == SessionPhase::LinkEstablishing
            && self.opening.as_ref().is_some_and(|(id, _)| *id == link)
    }

    fn is_current_link(&self, link: u64) -> bool {
        self.state.phase() == SessionPhase::Connected
            && self.link.as_ref().is_some_and(|l| l.id() == link)
    }

    // ---- 消息 ----

    async fn send(&mut self, text: String) -> Result<u64, SessionError> {
        if self.state.phase() != SessionPhase::Connected {
            return Err(SessionError::NotConnected);
        }
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if text.len() > self.config.max_frame_len {
            return Err(SessionError::MessageTooLarge {
                len: text.len(),
                max: self.config.max_frame_len,
            });
        }
        let Some(link) = &self.link else {
            return Err(SessionError::NotConnected);
        };

        let sequence = self.log.record_sent(text.clone());
        if let Err(e) = link.send(OutboundFrame { sequence, text }) {
            // 写任务已退出，消息在拆除链路时标记为失败
            self.link_dropped(e).await;
        }
        Ok(sequence)
    }

    async fn shutdown(&mut self) {
        if let Some((_, handle)) = self.opening.take() {
            handle.abort();
        }
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.discovery.stop().await;
        if self.state.phase().is_linking() {
            match tokio::time::timeout(self.config.platform_timeout, self.platform.remove_group())
                .await
            {
                Ok(Ok(())) => debug!("Platform group removed on shutdown"),
                Ok(Err(e)) => warn!("Failed to remove platform group on shutdown: {}", e),
                Err(_) => warn!("Timed out removing platform group on shutdown"),
            }
        }
    }
}
