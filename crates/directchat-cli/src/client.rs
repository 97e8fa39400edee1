//! IPC Client - 与守护进程通信

use anyhow::{Result, bail};
use directchat_core::ipc::{IpcRequest, IpcResponse, socket_path};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::OwnedReadHalf;

async fn connect(request: &IpcRequest) -> Result<BufReader<OwnedReadHalf>> {
    let path = socket_path();

    let stream = match UnixStream::connect(&path).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ 无法连接到守护进程: {}", e);
            eprintln!("   请确保 directchat-daemon 正在运行");
            return Err(e.into());
        }
    };

    let (reader, mut writer) = stream.into_split();

    // 发送请求
    let json = serde_json::to_string(request)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;

    Ok(BufReader::new(reader))
}

pub async fn send_request(request: IpcRequest) -> Result<IpcResponse> {
    let mut reader = connect(&request).await?;

    // 读取响应
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        bail!("daemon closed the connection");
    }

    let response: IpcResponse = serde_json::from_str(&line)?;

    match &response {
        IpcResponse::Ok { message } => println!("✅ {}", message),
        IpcResponse::Error { error } => eprintln!("❌ {}", error),
        IpcResponse::Invalid { message } => eprintln!("❌ {}", message),
        _ => {}
    }

    Ok(response)
}

/// 订阅事件流，对每个事件调用 `on_event`，直到守护进程断开
pub async fn watch(mut on_event: impl FnMut(IpcResponse)) -> Result<()> {
    let mut reader = connect(&IpcRequest::Watch).await?;
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        on_event(serde_json::from_str(&line)?);
        line.clear();
    }

    Ok(())
}
