//! 基于 `wpa_cli` 的 WiFi P2P 平台实现 (Linux)
//!
//! 通过 `wpa_supplicant` 的 P2P 命令完成发现和协商：
//!
//! - `p2p_find` / `p2p_stop_find`: 开始/停止扫描
//! - `p2p_peers` + `p2p_peer <addr>`: 轮询对端列表，生成全量快照
//! - `p2p_connect <addr> pbc`: 发起协商，随后轮询组接口的 `status`
//! - 组建立后继续轮询，组接口消失或失去关联时上报 `GroupRemoved`
//! - `p2p_group_remove`: 拆除组
//!
//! # 注意事项
//!
//! - 角色由 `wpa_supplicant` 的 GO 协商决定（`mode=P2P GO` 或 `mode=station`）
//! - Client 端的 Owner IP 取组子网的 `.1` 网关

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::wifi::{
    Device, DeviceStatus, GroupInfo, P2pPlatform, PlatformError, PlatformEvent, PlatformNotifier,
    REASON_BUSY, REASON_ERROR, REASON_P2P_UNSUPPORTED, Role,
};

/// 协商超时时上报的失败代码
pub const NEGOTIATION_TIMEOUT_CODE: i32 = -1;

/// 连续多少次观察到组不在才判定组已消失
const GROUP_MISSES_BEFORE_REMOVED: u32 = 2;

/// wpa_supplicant 默认的 GO 地址
const DEFAULT_GO_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 49, 1);

/// wpa_cli 平台配置
#[derive(Debug, Clone)]
pub struct WpaCliConfig {
    /// 网络接口名称 (通常是 wlan0)
    pub interface: String,
    /// 对端列表轮询间隔
    pub poll_interval: Duration,
    /// 平台侧协商超时
    pub negotiation_timeout: Duration,
}

impl Default for WpaCliConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            poll_interval: Duration::from_millis(1500),
            negotiation_timeout: Duration::from_secs(30),
        }
    }
}

/// `wpa_cli` 命令执行器
#[derive(Debug, Clone)]
struct WpaCli {
    interface: String,
}

impl WpaCli {
    async fn run(&self, interface: &str, args: &[&str]) -> Result<String, PlatformError> {
        let output = Command::new("wpa_cli")
            .arg("-i")
            .arg(interface)
            .args(args)
            .output()
            .await
            .map_err(|e| PlatformError::Command(format!("wpa_cli: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);

        if let Some(err) = classify_failure(&stdout, &stderr) {
            debug!("wpa_cli {:?} failed: {}", args, err);
            return Err(err);
        }
        if !output.status.success() {
            return Err(PlatformError::Command(stderr.trim().to_string()));
        }
        Ok(stdout)
    }

    async fn command(&self, args: &[&str]) -> Result<String, PlatformError> {
        self.run(&self.interface, args).await
    }

    /// 查询当前所有对端，生成全量快照
    async fn peers(&self) -> Result<Vec<Device>, PlatformError> {
        let listing = self.command(&["p2p_peers"]).await?;
        let mut devices = Vec::new();

        for address in parse_peer_addresses(&listing) {
            match self.command(&["p2p_peer", &address]).await {
                Ok(details) => devices.push(parse_peer(&address, &details)),
                // 对端可能在两次查询之间消失
                Err(e) => debug!("Peer {} vanished before query: {}", address, e),
            }
        }

        Ok(devices)
    }

    async fn group_interface(&self) -> Option<String> {
        let listing = self.command(&["interface"]).await.ok()?;
        parse_group_interface(&listing)
    }

    async fn interface_ipv4(&self, interface: &str) -> Option<Ipv4Addr> {
        let output = Command::new("ip")
            .args(["-o", "addr", "show", interface])
            .output()
            .await
            .ok()?;
        parse_inet(&String::from_utf8_lossy(&output.stdout))
    }

    /// 检查组是否已建立，返回协商结果
    async fn probe_group(&self) -> Option<GroupInfo> {
        let group_iface = self.group_interface().await?;
        let status = self.run(&group_iface, &["status"]).await.ok()?;
        let role = parse_status_role(&status)?;
        let local_ip = self.interface_ipv4(&group_iface).await?;

        let owner_ip = match role {
            Role::Owner => local_ip,
            _ => gateway_for(local_ip),
        };

        Some(GroupInfo {
            role,
            owner_ip: IpAddr::V4(owner_ip),
            interface: Some(group_iface),
        })
    }

    /// 组是否仍然存在，查询本身失败时返回 `None`
    async fn group_alive(&self, group_iface: &str) -> Option<bool> {
        let listing = self.command(&["interface"]).await.ok()?;
        if !interface_listed(&listing, group_iface) {
            return Some(false);
        }
        let status = self.run(group_iface, &["status"]).await.ok()?;
        Some(parse_status_role(&status).is_some())
    }
}

/// 组存活判定：连续多次观察到组不在才算消失，查询失败不计入
#[derive(Debug, Default)]
pub(crate) struct GroupWatch {
    misses: u32,
}

impl GroupWatch {
    /// 记录一次观察，返回组是否已消失
    pub(crate) fn observe(&mut self, alive: Option<bool>) -> bool {
        match alive {
            Some(true) => self.misses = 0,
            Some(false) => self.misses += 1,
            None => {}
        }
        self.misses >= GROUP_MISSES_BEFORE_REMOVED
    }
}

/// wpa_supplicant P2P 平台
pub struct WpaCliPlatform {
    config: WpaCliConfig,
    cli: WpaCli,
    scan_token: Mutex<Option<CancellationToken>>,
    /// 协商与组监视任务
    group_token: Mutex<Option<CancellationToken>>,
    group_interface: Arc<Mutex<Option<String>>>,
}

impl WpaCliPlatform {
    pub fn new(interface: &str) -> Self {
        Self::with_config(WpaCliConfig {
            interface: interface.to_string(),
            ..Default::default()
        })
    }

    pub fn with_config(config: WpaCliConfig) -> Self {
        let cli = WpaCli {
            interface: config.interface.clone(),
        };
        Self {
            config,
            cli,
            scan_token: Mutex::new(None),
            group_token: Mutex::new(None),
            group_interface: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait::async_trait]
impl P2pPlatform for WpaCliPlatform {
    async fn start_scan(&self, notifier: PlatformNotifier) -> Result<(), PlatformError> {
        self.cli.command(&["p2p_find"]).await?;
        info!("P2P find started on {}", self.config.interface);

        let token = CancellationToken::new();
        if let Some(previous) = self.scan_token.lock().await.replace(token.clone()) {
            previous.cancel();
        }

        let cli = self.cli.clone();
        let interval = self.config.poll_interval;
        tokio::spawn(async move {
            let mut last: Option<Vec<Device>> = None;
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match cli.peers().await {
                    Ok(snapshot) => {
                        if last.as_ref() != Some(&snapshot) {
                            debug!("Peer snapshot changed: {} device(s)", snapshot.len());
                            notifier.peers_changed(snapshot.clone());
                            last = Some(snapshot);
                        }
                    }
                    Err(e) => warn!("Failed to poll P2P peers: {}", e),
                }
            }
            debug!("Peer polling stopped");
        });

        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), PlatformError> {
        if let Some(token) = self.scan_token.lock().await.take() {
            token.cancel();
        }
        self.cli.command(&["p2p_stop_find"]).await?;
        Ok(())
    }

    async fn request_connect(
        &self,
        address: &str,
        notifier: PlatformNotifier,
    ) -> Result<(), PlatformError> {
        self.cli.command(&["p2p_connect", address, "pbc"]).await?;
        info!("P2P connect requested: {}", address);

        let token = CancellationToken::new();
        if let Some(previous) = self.group_token.lock().await.replace(token.clone()) {
            previous.cancel();
        }

        let cli = self.cli.clone();
        let interval = self.config.poll_interval;
        let deadline = Instant::now() + self.config.negotiation_timeout;
        let slot = self.group_interface.clone();

        tokio::spawn(async move {
            let group_iface = loop {
                if Instant::now() >= deadline {
                    warn!("P2P negotiation timed out");
                    notifier.connect_failed(NEGOTIATION_TIMEOUT_CODE);
                    return;
                }
                tokio::select! {
                    () = token.cancelled() => return,
                    () = tokio::time::sleep(interval) => {}
                }

                if let Some(info) = cli.probe_group().await {
                    info!(
                        "P2P group formed: role={}, owner={}, iface={:?}",
                        info.role, info.owner_ip, info.interface
                    );
                    let iface = info.interface.clone();
                    slot.lock().await.clone_from(&iface);
                    notifier.group_formed(info);
                    match iface {
                        Some(iface) => break iface,
                        None => return,
                    }
                }
            };

            // 对端离开范围时没有任何套接字错误，只能观察组本身
            let mut watch = GroupWatch::default();
            loop {
                tokio::select! {
                    () = token.cancelled() => return,
                    () = tokio::time::sleep(interval) => {}
                }

                if watch.observe(cli.group_alive(&group_iface).await) {
                    info!("P2P group {} is gone", group_iface);
                    slot.lock().await.take();
                    notifier.notify(PlatformEvent::GroupRemoved(format!(
                        "{group_iface} disappeared"
                    )));
                    return;
                }
            }
        });

        Ok(())
    }

    async fn remove_group(&self) -> Result<(), PlatformError> {
        if let Some(token) = self.group_token.lock().await.take() {
            token.cancel();
        }
        let group = self.group_interface.lock().await.take();
        let target = group.as_deref().unwrap_or("*");
        debug!("Removing P2P group {}", target);
        self.cli.command(&["p2p_group_remove", target]).await?;
        Ok(())
    }

    async fn is_available(&self) -> bool {
        matches!(self.cli.command(&["ping"]).await, Ok(out) if out.trim() == "PONG")
    }
}

/// 根据 wpa_cli 输出判断失败原因
pub(crate) fn classify_failure(stdout: &str, stderr: &str) -> Option<PlatformError> {
    let combined = format!("{stdout}\n{stderr}");

    if combined.contains("Permission denied") {
        return Some(PlatformError::PermissionDenied);
    }
    if combined.contains("Failed to connect to non-global ctrl_ifname")
        || combined.contains("No such device")
    {
        return Some(PlatformError::from_reason_code(REASON_P2P_UNSUPPORTED));
    }

    match stdout.trim() {
        "FAIL-BUSY" => Some(PlatformError::from_reason_code(REASON_BUSY)),
        "FAIL" => Some(PlatformError::from_reason_code(REASON_ERROR)),
        _ => None,
    }
}

/// 解析 `p2p_peers` 输出：每行一个设备地址
pub(crate) fn parse_peer_addresses(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| is_mac_address(line))
        .map(str::to_uppercase)
        .collect()
}

/// 解析 `p2p_peer <addr>` 输出
pub(crate) fn parse_peer(address: &str, output: &str) -> Device {
    let name = output
        .lines()
        .find_map(|line| line.trim().strip_prefix("device_name="))
        .unwrap_or_default()
        .to_string();

    Device::new(name, address.to_uppercase()).with_status(DeviceStatus::Available)
}

/// 解析 `wpa_cli interface` 输出，找到 P2P 组接口（如 p2p-wlan0-0）
pub(crate) fn parse_group_interface(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("p2p-") && !line.starts_with("p2p-dev-"))
        .map(ToString::to_string)
}

/// `wpa_cli interface` 输出中是否列出了指定接口
pub(crate) fn interface_listed(output: &str, interface: &str) -> bool {
    output.lines().any(|line| line.trim() == interface)
}

/// 解析组接口 `status` 输出中的角色
pub(crate) fn parse_status_role(output: &str) -> Option<Role> {
    let mut mode = None;
    let mut completed = false;

    for line in output.lines() {
        if let Some(value) = line.trim().strip_prefix("mode=") {
            mode = Some(value.to_string());
        } else if line.trim() == "wpa_state=COMPLETED" {
            completed = true;
        }
    }

    match mode.as_deref() {
        Some("P2P GO") => Some(Role::Owner),
        Some("station" | "P2P client") if completed => Some(Role::Client),
        _ => None,
    }
}

/// 解析 `ip -o addr show` 输出中的 IPv4 地址
pub(crate) fn parse_inet(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let pos = parts.iter().position(|&s| s == "inet")?;
        parts.get(pos + 1)?.split('/').next()?.parse().ok()
    })
}

/// 从本地 IP 推断 Group Owner 地址（通常是 x.x.x.1）
pub(crate) fn gateway_for(local: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, _] = local.octets();
    if local.is_unspecified() {
        DEFAULT_GO_ADDRESS
    } else {
        Ipv4Addr::new(a, b, c, 1)
    }
}

fn is_mac_address(s: &str) -> bool {
    let parts: Vec<&str> = s.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}
