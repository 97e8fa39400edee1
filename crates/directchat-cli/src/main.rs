//! DirectChat CLI
//!
//! 命令行客户端，通过 Unix Socket 与守护进程通信

mod client;

use anyhow::Result;
use clap::{Parser, Subcommand};
use directchat_core::ipc::{IpcRequest, IpcResponse};
use directchat_core::{DeliveryState, Direction, SessionEvent};

#[derive(Parser)]
#[command(name = "directchat", version, about = "Wi-Fi Direct 点对点聊天")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 开始扫描附近设备
    Scan,
    /// 停止扫描
    StopScan,
    /// 列出最近一次发现的设备
    Peers,
    /// 连接到设备
    Connect {
        /// 设备地址 (见 `peers`)
        address: String,
    },
    /// 发送一条消息
    Send {
        /// 消息文本
        text: String,
    },
    /// 断开当前会话
    Disconnect,
    /// 查看当前状态
    Status,
    /// 查看消息记录
    Messages,
    /// 持续输出会话事件
    Watch {
        /// 输出原始 JSON
        #[arg(long)]
        json: bool,
    },
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::PeersChanged { devices } => {
            println!("📡 发现 {} 个设备", devices.len());
            for dev in devices {
                println!("   {} ({}) {:?}", dev.name, dev.address, dev.status);
            }
        }
        SessionEvent::ConnectionEstablished { role } => println!("🔗 已连接 (角色: {})", role),
        SessionEvent::ConnectionFailed { reason } => println!("❌ 连接失败: {}", reason),
        SessionEvent::MessageReceived { text, sequence } => println!("💬 [{}] {}", sequence, text),
        SessionEvent::SessionDisconnected { reason } => println!("⛔ 会话断开: {}", reason),
        SessionEvent::DiscoveryFailed { reason } => println!("❌ 扫描失败: {}", reason),
        other => println!("   {}", other.event_name()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan => {
            println!("🔍 开始扫描设备...");
            client::send_request(IpcRequest::Scan).await?;
        }
        Commands::StopScan => {
            client::send_request(IpcRequest::StopScan).await?;
        }
        Commands::Peers => {
            let resp = client::send_request(IpcRequest::Peers).await?;
            if let IpcResponse::Devices { devices } = resp {
                if devices.is_empty() {
                    println!("   未发现设备");
                } else {
                    for (i, dev) in devices.iter().enumerate() {
                        println!("   [{}] {} ({}) {:?}", i, dev.name, dev.address, dev.status);
                    }
                }
            }
        }
        Commands::Connect { address } => {
            println!("🔗 连接到 {}", address);
            client::send_request(IpcRequest::Connect { address }).await?;
        }
        Commands::Send { text } => {
            let resp = client::send_request(IpcRequest::Send { text }).await?;
            if let IpcResponse::Accepted { sequence } = resp {
                println!("📤 已提交 (#{})", sequence);
            }
        }
        Commands::Disconnect => {
            client::send_request(IpcRequest::Disconnect).await?;
        }
        Commands::Status => {
            let resp = client::send_request(IpcRequest::Status).await?;
            if let IpcResponse::Status { phase, role, peer } = resp {
                println!("状态: {}", phase);
                println!("角色: {}", role);
                if let Some(peer) = peer {
                    println!("对端: {} ({})", peer.name, peer.address);
                }
            }
        }
        Commands::Messages => {
            let resp = client::send_request(IpcRequest::Messages).await?;
            if let IpcResponse::Messages { messages } = resp {
                for msg in messages {
                    let arrow = match msg.direction {
                        Direction::Sent => "→",
                        Direction::Received => "←",
                    };
                    let state = match msg.delivery_state {
                        DeliveryState::Pending => " (发送中)",
                        DeliveryState::Failed => " (失败)",
                        DeliveryState::Delivered => "",
                    };
                    println!("[{}] {} {}{}", msg.sequence, arrow, msg.text, state);
                }
            }
        }
        Commands::Watch { json } => {
            client::watch(|resp| {
                if json {
                    if let Ok(line) = serde_json::to_string(&resp) {
                        println!("{}", line);
                    }
                } else if let IpcResponse::Event { event } = resp {
                    print_event(&event);
                }
            })
            .await?;
        }
    }

    Ok(())
}
