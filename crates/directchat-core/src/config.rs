//! 应用配置和持久化
//!
//! 提供设备名称、接口、端口和超时等设置的存储和读取。

use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::wifi::WpaCliConfig;

/// 默认聊天端口
pub const DEFAULT_CHAT_PORT: u16 = 8988;

/// 单帧最大长度 (64 KiB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// 应用设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// 设备名称
    pub device_name: String,
    /// WiFi 接口名称
    pub wifi_interface: String,
    /// 聊天传输端口（Owner 监听，Client 连接）
    pub chat_port: u16,
    /// 套接字打开超时（秒）
    pub connect_timeout_secs: u64,
    /// 协商超时（秒）
    pub negotiation_timeout_secs: u64,
    /// 单次平台请求超时（秒）
    pub platform_timeout_secs: u64,
    /// 对端列表轮询间隔（毫秒）
    pub scan_poll_interval_ms: u64,
    /// 单帧最大字节数
    pub max_frame_len: usize,
    /// 详细日志模式
    pub verbose: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            device_name: get_default_device_name(),
            wifi_interface: "wlan0".to_string(),
            chat_port: DEFAULT_CHAT_PORT,
            connect_timeout_secs: 10,
            negotiation_timeout_secs: 30,
            platform_timeout_secs: 5,
            scan_poll_interval_ms: 1500,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            verbose: false,
        }
    }
}

impl AppSettings {
    /// 获取配置文件路径
    fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("directchat");
        config_dir.join("settings.toml")
    }

    /// 加载设置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        let path = Self::config_path();
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    /// 生成 wpa_cli 平台配置
    pub fn wpa_cli_config(&self) -> WpaCliConfig {
        WpaCliConfig {
            interface: self.wifi_interface.clone(),
            poll_interval: Duration::from_millis(self.scan_poll_interval_ms),
            negotiation_timeout: Duration::from_secs(self.negotiation_timeout_secs),
        }
    }
}

/// 会话运行时配置
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub chat_port: u16,
    pub connect_timeout: Duration,
    pub negotiation_timeout: Duration,
    pub platform_timeout: Duration,
    pub max_frame_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&AppSettings::default())
    }
}

impl From<&AppSettings> for SessionConfig {
    fn from(settings: &AppSettings) -> Self {
        Self {
            chat_port: settings.chat_port,
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            negotiation_timeout: Duration::from_secs(settings.negotiation_timeout_secs),
            platform_timeout: Duration::from_secs(settings.platform_timeout_secs),
            max_frame_len: settings.max_frame_len,
        }
    }
}

/// 获取默认设备名称（主机名）
fn get_default_device_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "DirectChat".to_string())
}
