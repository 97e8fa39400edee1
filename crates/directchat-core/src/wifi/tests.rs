//! WiFi 模块测试
//!
//! 包含平台类型和 wpa_cli 输出解析的单元测试

use std::net::Ipv4Addr;

use super::wpa_cli::{
    GroupWatch, classify_failure, gateway_for, interface_listed, parse_group_interface,
    parse_inet, parse_peer, parse_peer_addresses, parse_status_role,
};
use super::*;

// ============================================================================
// 平台类型测试
// ============================================================================

#[test]
fn test_platform_reason_codes() {
    assert_eq!(
        PlatformError::from_reason_code(1),
        PlatformError::RadioUnavailable
    );
    assert_eq!(PlatformError::from_reason_code(2), PlatformError::Busy);
    assert_eq!(PlatformError::from_reason_code(0), PlatformError::Failure(0));
}

/// 验证 Device 序列化格式
#[test]
fn test_device_serialization() {
    let device = Device::new("Phone A", "AA:BB").with_status(DeviceStatus::Invited);
    let json = serde_json::to_string(&device).unwrap();

    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["name"], "Phone A");
    assert_eq!(parsed["address"], "AA:BB");
    assert_eq!(parsed["status"], "INVITED");
}

#[test]
fn test_role_default_is_undetermined() {
    assert_eq!(Role::default(), Role::Undetermined);
    assert_eq!(Role::Owner.to_string(), "owner");
}

#[test]
fn test_notifier_forwards_events() {
    let (tx, rx) = std::sync::mpsc::channel();
    let notifier = PlatformNotifier::new(move |event| {
        let _ = tx.send(event);
    });

    notifier.peers_changed(vec![Device::new("A", "AA:BB")]);
    notifier.connect_failed(2);

    assert_eq!(
        rx.recv().unwrap(),
        PlatformEvent::PeersChanged(vec![Device::new("A", "AA:BB")])
    );
    assert_eq!(rx.recv().unwrap(), PlatformEvent::ConnectFailed(2));
}

// ============================================================================
// wpa_cli 输出解析测试
// ============================================================================

#[test]
fn test_parse_peer_addresses() {
    let output = "02:11:22:33:44:55\nde:ad:be:ef:00:01\n\nFAIL\n";
    assert_eq!(
        parse_peer_addresses(output),
        vec!["02:11:22:33:44:55".to_string(), "DE:AD:BE:EF:00:01".to_string()]
    );
}

#[test]
fn test_parse_peer_details() {
    let output = "02:11:22:33:44:55\n\
                  pri_dev_type=10-0050F204-5\n\
                  device_name=Phone A\n\
                  manufacturer=ACME\n\
                  config_methods=0x188\n";

    let device = parse_peer("02:11:22:33:44:55", output);
    assert_eq!(device.name, "Phone A");
    assert_eq!(device.address, "02:11:22:33:44:55");
    assert_eq!(device.status, DeviceStatus::Available);
}

#[test]
fn test_parse_peer_without_name() {
    let device = parse_peer("aa:bb:cc:dd:ee:ff", "aa:bb:cc:dd:ee:ff\nlevel=-40\n");
    assert!(device.name.is_empty());
    assert_eq!(device.address, "AA:BB:CC:DD:EE:FF");
}

#[test]
fn test_parse_group_interface() {
    let output = "Selected interface 'wlan0'\nAvailable interfaces:\np2p-dev-wlan0\nwlan0\np2p-wlan0-0\n";
    assert_eq!(
        parse_group_interface(output),
        Some("p2p-wlan0-0".to_string())
    );

    let no_group = "Available interfaces:\np2p-dev-wlan0\nwlan0\n";
    assert_eq!(parse_group_interface(no_group), None);
}

#[test]
fn test_interface_listed() {
    let output = "Available interfaces:\np2p-dev-wlan0\nwlan0\np2p-wlan0-0\n";
    assert!(interface_listed(output, "p2p-wlan0-0"));
    assert!(!interface_listed(output, "p2p-wlan0-1"));

    // 组被移除后只剩主接口
    let removed = "Available interfaces:\np2p-dev-wlan0\nwlan0\n";
    assert!(!interface_listed(removed, "p2p-wlan0-0"));
}

#[test]
fn test_group_watch_needs_consecutive_misses() {
    let mut watch = GroupWatch::default();

    assert!(!watch.observe(Some(true)));
    assert!(!watch.observe(Some(false)));
    // 一次存活观察清零计数
    assert!(!watch.observe(Some(true)));
    assert!(!watch.observe(Some(false)));
    assert!(watch.observe(Some(false)));
}

#[test]
fn test_group_watch_ignores_failed_queries() {
    let mut watch = GroupWatch::default();

    assert!(!watch.observe(Some(false)));
    assert!(!watch.observe(None));
    assert!(!watch.observe(None));
    assert!(watch.observe(Some(false)));
}

#[test]
fn test_parse_status_role() {
    let go = "bssid=02:11:22:33:44:55\nssid=DIRECT-xy\nmode=P2P GO\nwpa_state=COMPLETED\n";
    assert_eq!(parse_status_role(go), Some(Role::Owner));

    let client = "bssid=02:11:22:33:44:55\nmode=station\nwpa_state=COMPLETED\n";
    assert_eq!(parse_status_role(client), Some(Role::Client));

    // 尚未完成关联
    let associating = "mode=station\nwpa_state=ASSOCIATING\n";
    assert_eq!(parse_status_role(associating), None);

    let forming = "mode=P2P GO - group formation\nwpa_state=COMPLETED\n";
    assert_eq!(parse_status_role(forming), None);
}

#[test]
fn test_parse_inet() {
    let output = "7: p2p-wlan0-0    inet 192.168.49.23/24 brd 192.168.49.255 scope global p2p-wlan0-0\n";
    assert_eq!(parse_inet(output), Some(Ipv4Addr::new(192, 168, 49, 23)));
    assert_eq!(parse_inet(""), None);
}

#[test]
fn test_gateway_for() {
    assert_eq!(
        gateway_for(Ipv4Addr::new(192, 168, 49, 23)),
        Ipv4Addr::new(192, 168, 49, 1)
    );
    assert_eq!(
        gateway_for(Ipv4Addr::UNSPECIFIED),
        Ipv4Addr::new(192, 168, 49, 1)
    );
}

#[test]
fn test_classify_failure() {
    assert_eq!(classify_failure("OK\n", ""), None);
    assert_eq!(
        classify_failure("FAIL\n", ""),
        Some(PlatformError::Failure(0))
    );
    assert_eq!(
        classify_failure("FAIL-BUSY\n", ""),
        Some(PlatformError::Busy)
    );
    assert_eq!(
        classify_failure(
            "",
            "Failed to connect to non-global ctrl_ifname: wlan0  error: No such file or directory"
        ),
        Some(PlatformError::RadioUnavailable)
    );
    assert_eq!(
        classify_failure("", "connect: Permission denied"),
        Some(PlatformError::PermissionDenied)
    );
}

#[test]
fn test_wpa_cli_config_default() {
    let config = WpaCliConfig::default();

    assert_eq!(config.interface, "wlan0");
    assert_eq!(config.negotiation_timeout.as_secs(), 30);
}
