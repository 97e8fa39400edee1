//! 对端注册表
//!
//! 只保存最近一次发现快照，每次快照整体替换，不做增量合并。

use crate::wifi::{Device, DeviceStatus};

#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    devices: Vec<Device>,
    /// 正在协商/连接的设备及其状态，跨快照保留
    pinned: Option<(String, DeviceStatus)>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用新快照整体替换内容
    ///
    /// 同一地址重复出现时保留第一条。
    pub fn replace(&mut self, snapshot: Vec<Device>) {
        let mut devices: Vec<Device> = Vec::with_capacity(snapshot.len());
        for device in snapshot {
            if devices.iter().any(|d| d.address == device.address) {
                continue;
            }
            devices.push(device);
        }
        self.devices = devices;
        self.apply_pin();
    }

    /// 固定某个设备的状态（协商期间使用）
    pub fn pin(&mut self, address: &str, status: DeviceStatus) {
        self.pinned = Some((address.to_string(), status));
        self.apply_pin();
    }

    /// 取消固定，设备保留最后一次状态直到下一个快照
    pub fn unpin(&mut self) {
        self.pinned = None;
    }

    /// 修改单个设备的状态，不跨快照保留
    pub fn set_status(&mut self, address: &str, status: DeviceStatus) -> bool {
        match self.devices.iter_mut().find(|d| d.address == address) {
            Some(device) => {
                device.status = status;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, address: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.address == address)
    }

    pub fn is_available(&self, address: &str) -> bool {
        self.get(address)
            .is_some_and(|d| d.status == DeviceStatus::Available)
    }

    pub fn snapshot(&self) -> Vec<Device> {
        self.devices.clone()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn apply_pin(&mut self) {
        if let Some((address, status)) = &self.pinned
            && let Some(device) = self.devices.iter_mut().find(|d| &d.address == address)
        {
            device.status = *status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(&str, &str)]) -> Vec<Device> {
        entries
            .iter()
            .map(|(name, addr)| Device::new(*name, *addr))
            .collect()
    }

    #[test]
    fn test_replace_holds_only_latest_snapshot() {
        let mut registry = PeerRegistry::new();

        let snapshots = [
            snapshot(&[("Phone A", "AA:BB"), ("Phone B", "CC:DD")]),
            snapshot(&[("Phone B", "CC:DD")]),
            snapshot(&[]),
            snapshot(&[("Phone C", "EE:FF"), ("Phone A", "AA:BB")]),
        ];

        for snap in snapshots {
            registry.replace(snap.clone());
            assert_eq!(registry.snapshot(), snap);
        }
    }

    #[test]
    fn test_replace_refreshes_attributes() {
        let mut registry = PeerRegistry::new();
        registry.replace(snapshot(&[("", "AA:BB")]));
        registry.replace(vec![
            Device::new("Phone A", "AA:BB").with_status(DeviceStatus::Failed),
        ]);

        let device = registry.get("AA:BB").unwrap();
        assert_eq!(device.name, "Phone A");
        assert_eq!(device.status, DeviceStatus::Failed);
        assert!(!registry.is_available("AA:BB"));
    }

    #[test]
    fn test_duplicate_addresses_collapse() {
        let mut registry = PeerRegistry::new();
        registry.replace(snapshot(&[("first", "AA:BB"), ("second", "AA:BB")]));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("AA:BB").unwrap().name, "first");
    }

    #[test]
    fn test_pinned_status_survives_snapshot() {
        let mut registry = PeerRegistry::new();
        registry.replace(snapshot(&[("Phone A", "AA:BB")]));
        registry.pin("AA:BB", DeviceStatus::Invited);

        registry.replace(snapshot(&[("Phone A", "AA:BB"), ("Phone B", "CC:DD")]));
        assert_eq!(registry.get("AA:BB").unwrap().status, DeviceStatus::Invited);
        assert!(registry.is_available("CC:DD"));

        registry.unpin();
        registry.replace(snapshot(&[("Phone A", "AA:BB")]));
        assert!(registry.is_available("AA:BB"));
    }

    #[test]
    fn test_set_status_lasts_until_next_snapshot() {
        let mut registry = PeerRegistry::new();
        registry.replace(snapshot(&[("Phone A", "AA:BB")]));

        assert!(registry.set_status("AA:BB", DeviceStatus::Failed));
        assert!(!registry.set_status("CC:DD", DeviceStatus::Failed));
        assert!(!registry.is_available("AA:BB"));

        registry.replace(snapshot(&[("Phone A", "AA:BB")]));
        assert!(registry.is_available("AA:BB"));
    }
}
