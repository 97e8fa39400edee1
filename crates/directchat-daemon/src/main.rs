//! DirectChat Daemon
//!
//! 后台守护进程，负责：
//! - 持有进程内唯一的聊天会话
//! - 通过 wpa_cli 驱动 Wi-Fi Direct 发现与协商
//! - 通过 Unix Socket 与 CLI 通信

mod ipc;

use std::sync::Arc;

use anyhow::Result;
use directchat_core::{AppSettings, Session, SessionConfig, WpaCliPlatform};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 桥接 log crate（directchat-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let settings = AppSettings::load();

    let default_filter = if settings.verbose {
        "debug"
    } else {
        "info,directchat_core=debug"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init();

    tracing::info!(
        "DirectChat Daemon starting as {:?} on {}",
        settings.device_name,
        settings.wifi_interface
    );

    let platform = Arc::new(WpaCliPlatform::with_config(settings.wpa_cli_config()));
    let session = Session::spawn(platform, SessionConfig::from(&settings));

    if !session.is_available().await.unwrap_or(false) {
        tracing::warn!(
            "wpa_supplicant does not answer on {}, P2P commands will fail",
            settings.wifi_interface
        );
    }

    tokio::select! {
        res = ipc::run_ipc_server(session.clone()) => {
            tracing::error!("IPC server exited: {:?}", res);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    // 等待扫描与 P2P 组清理完成，运行时随 main 返回而销毁
    session.shutdown().await;
    let _ = std::fs::remove_file(directchat_core::ipc::socket_path());

    Ok(())
}
