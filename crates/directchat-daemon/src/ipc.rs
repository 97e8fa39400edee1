//! IPC Server - Unix Domain Socket 通信

use anyhow::Result;
use directchat_core::ipc::{IpcRequest, IpcResponse, socket_path};
use directchat_core::{DiscoveryOutcome, SessionHandle};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};

pub async fn run_ipc_server(session: SessionHandle) -> Result<()> {
    let path = socket_path();

    // 删除旧的 socket 文件
    let _ = std::fs::remove_file(&path);

    let listener = UnixListener::bind(&path)?;
    tracing::info!("IPC server listening on {:?}", path);

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let session = session.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, session).await {
                        tracing::debug!("IPC client error: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!("Failed to accept IPC connection: {}", e);
            }
        }
    }
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &IpcResponse) -> Result<()> {
    writer
        .write_all(serde_json::to_string(response)?.as_bytes())
        .await?;
    writer.write_all(b"\n").await?;
    Ok(())
}

async fn handle_client(stream: UnixStream, session: SessionHandle) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let request: IpcRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                let resp = IpcResponse::Invalid {
                    message: format!("Invalid request: {}", e),
                };
                write_response(&mut writer, &resp).await?;
                line.clear();
                continue;
            }
        };
        line.clear();

        tracing::debug!("IPC request: {:?}", request);

        let result = match request {
            IpcRequest::Watch => return watch(&session, &mut writer).await,
            IpcRequest::Status => session.snapshot().await.map(|s| IpcResponse::Status {
                phase: s.phase,
                role: s.role,
                peer: s.peer,
            }),
            IpcRequest::Scan => session.start_discovery().await.map(|outcome| {
                let message = match outcome {
                    DiscoveryOutcome::Started => "Discovery started",
                    DiscoveryOutcome::AlreadyRunning => "Discovery already running",
                };
                IpcResponse::Ok {
                    message: message.to_string(),
                }
            }),
            IpcRequest::StopScan => session.stop_discovery().await.map(|was_active| {
                let message = if was_active {
                    "Discovery stopped"
                } else {
                    "Discovery was not running"
                };
                IpcResponse::Ok {
                    message: message.to_string(),
                }
            }),
            IpcRequest::Peers => session
                .peers()
                .await
                .map(|devices| IpcResponse::Devices { devices }),
            IpcRequest::Connect { address } => {
                tracing::info!("Connecting to {}", address);
                session.connect(&address).await.map(|()| IpcResponse::Ok {
                    message: format!("Negotiating with {address}"),
                })
            }
            IpcRequest::Send { text } => session
                .send(&text)
                .await
                .map(|sequence| IpcResponse::Accepted { sequence }),
            IpcRequest::Disconnect => session.disconnect().await.map(|()| IpcResponse::Ok {
                message: "Disconnected".to_string(),
            }),
            IpcRequest::Messages => session
                .messages()
                .await
                .map(|messages| IpcResponse::Messages { messages }),
        };

        let response = result.unwrap_or_else(IpcResponse::from);
        write_response(&mut writer, &response).await?;
    }

    Ok(())
}

/// 将连接转为事件流，直到客户端断开或会话退出
async fn watch(session: &SessionHandle, writer: &mut OwnedWriteHalf) -> Result<()> {
    let mut events = session.subscribe();
    tracing::info!("IPC client is watching session events");

    while let Some(event) = events.recv().await {
        write_response(writer, &IpcResponse::Event { event }).await?;
    }

    Ok(())
}
