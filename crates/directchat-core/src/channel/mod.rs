//! 消息通道
//!
//! 链路建立后打开字节流连接：协商为 Owner 的一端监听并只接受一个入站连接，
//! Client 一端主动连接 Owner。连接上双向传输长度前缀文本帧。
//!
//! 所有结果以 [`ChannelEvent`] 的形式投递给会话工作线程，每个事件都带有
//! 链路编号，旧链路的迟到事件由会话丢弃。

pub mod codec;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::SessionError;
use crate::wifi::{GroupInfo, Role};

pub use codec::{FrameCodec, FrameError};

/// Client 重试连接的间隔
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(200);

/// 通道事件
#[derive(Debug)]
pub struct ChannelEvent {
    pub link: u64,
    pub kind: ChannelEventKind,
}

#[derive(Debug)]
pub enum ChannelEventKind {
    /// 套接字已打开
    Opened(TcpStream),
    /// 在超时内未能绑定/连接
    OpenFailed(SessionError),
    /// 收到一帧
    Received(String),
    /// 发送完成
    Delivered(u64),
    /// 发送失败，链路随之拆除
    WriteFailed { sequence: u64, error: SessionError },
    /// 链路关闭（对端断开、传输错误或协议违规）
    Closed(SessionError),
}

/// 事件投递口
pub type ChannelSink = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// 链路端点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEndpoint {
    /// Owner: 监听并接受一个连接
    Listen(SocketAddr),
    /// Client: 连接到 Owner
    Connect(SocketAddr),
}

impl LinkEndpoint {
    /// 根据协商结果选择端点
    pub fn for_group(info: &GroupInfo, port: u16) -> Option<Self> {
        let addr = SocketAddr::new(info.owner_ip, port);
        match info.role {
            Role::Owner => Some(LinkEndpoint::Listen(addr)),
            Role::Client => Some(LinkEndpoint::Connect(addr)),
            Role::Undetermined => None,
        }
    }
}

/// 打开字节流连接，超时后返回失败
pub async fn open(endpoint: LinkEndpoint, timeout: Duration) -> Result<TcpStream, SessionError> {
    match endpoint {
        LinkEndpoint::Listen(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|e| SessionError::LinkLost(format!("bind {addr}: {e}")))?;
            info!("Waiting for peer on {}", addr);

            let (stream, peer) = tokio::time::timeout(timeout, listener.accept())
                .await
                .map_err(|_| SessionError::Timeout("accept".to_string()))?
                .map_err(|e| SessionError::LinkLost(format!("accept: {e}")))?;

            info!("Accepted peer connection from {}", peer);
            Ok(stream)
        }
        LinkEndpoint::Connect(addr) => {
            let attempt = async {
                let mut tries = 0u32;
                loop {
                    tries += 1;
                    match TcpStream::connect(addr).await {
                        Ok(stream) => return stream,
                        Err(e) => {
                            // Owner 可能尚未开始监听
                            debug!("Connect attempt {} to {} failed: {}", tries, addr, e);
                            tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                        }
                    }
                }
            };

            let stream = tokio::time::timeout(timeout, attempt)
                .await
                .map_err(|_| SessionError::Timeout("connect".to_string()))?;

            info!("Connected to owner at {}", addr);
            Ok(stream)
        }
    }
}

/// 在后台打开连接，完成后投递 `Opened` 或 `OpenFailed`
pub fn spawn_open(
    link: u64,
    endpoint: LinkEndpoint,
    timeout: Duration,
    sink: ChannelSink,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let kind = match open(endpoint, timeout).await {
            Ok(stream) => ChannelEventKind::Opened(stream),
            Err(e) => {
                warn!("Failed to open link {}: {}", link, e);
                ChannelEventKind::OpenFailed(e)
            }
        };
        sink(ChannelEvent { link, kind });
    })
}

/// 待发送帧
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub sequence: u64,
    pub text: String,
}

/// 已建立的链路
///
/// 读写各一个后台任务。发送队列是 FIFO，写入顺序与提交顺序一致。
/// 读任务结束时把原因交给写任务，由写任务投递 `Closed`，
/// 因此已写完的帧的 `Delivered` 总是排在 `Closed` 之前。
pub struct Link {
    id: u64,
    peer_addr: Option<SocketAddr>,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Link {
    pub fn start(
        id: u64,
        stream: TcpStream,
        max_frame_len: usize,
        write_timeout: Duration,
        sink: ChannelSink,
    ) -> Self {
        let peer_addr = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        let (outbound, rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = oneshot::channel();

        let codec = FrameCodec::new(max_frame_len);
        let reader = tokio::spawn(read_loop(
            id,
            read_half,
            codec.clone(),
            sink.clone(),
            closed_tx,
        ));
        let writer = tokio::spawn(write_loop(
            id,
            write_half,
            codec,
            WriteQueue { rx, closed: closed_rx },
            write_timeout,
            sink,
        ));

        debug!("Link {} started with {:?}", id, peer_addr);

        Self {
            id,
            peer_addr,
            outbound,
            reader,
            writer,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// 加入发送队列
    pub fn send(&self, frame: OutboundFrame) -> Result<(), SessionError> {
        self.outbound
            .send(frame)
            .map_err(|_| SessionError::LinkLost("writer stopped".to_string()))
    }

    /// 拆除链路，关闭套接字
    pub fn close(self) {
        debug!("Closing link {}", self.id);
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn read_loop(
    id: u64,
    read_half: OwnedReadHalf,
    codec: FrameCodec,
    sink: ChannelSink,
    closed: oneshot::Sender<SessionError>,
) {
    let mut frames = FramedRead::new(read_half, codec);

    let reason = loop {
        match frames.next().await {
            Some(Ok(text)) => sink(ChannelEvent {
                link: id,
                kind: ChannelEventKind::Received(text),
            }),
            Some(Err(e)) if e.is_protocol_violation() => {
                warn!("Link {} protocol violation: {}", id, e);
                break SessionError::ProtocolViolation(e.to_string());
            }
            Some(Err(e)) => break SessionError::LinkLost(e.to_string()),
            None => break SessionError::LinkLost("peer closed the connection".to_string()),
        }
    };

    // 写任务已因写失败退出时，链路已经通过 WriteFailed 拆除
    if closed.send(reason).is_err() {
        debug!("Link {} writer already stopped", id);
    }
}

/// 写任务的输入：待发送帧与读任务的关闭通知
struct WriteQueue {
    rx: mpsc::UnboundedReceiver<OutboundFrame>,
    closed: oneshot::Receiver<SessionError>,
}

async fn write_loop(
    id: u64,
    write_half: OwnedWriteHalf,
    codec: FrameCodec,
    queue: WriteQueue,
    write_timeout: Duration,
    sink: ChannelSink,
) {
    let WriteQueue { mut rx, mut closed } = queue;
    let mut frames = FramedWrite::new(write_half, codec);

    let reason = loop {
        let frame = tokio::select! {
            biased;
            reason = &mut closed => {
                break reason
                    .unwrap_or_else(|_| SessionError::LinkLost("reader stopped".to_string()));
            }
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => return,
            },
        };

        let sequence = frame.sequence;
        let kind = match tokio::time::timeout(write_timeout, frames.send(frame.text)).await {
            Ok(Ok(())) => ChannelEventKind::Delivered(sequence),
            Ok(Err(e)) => ChannelEventKind::WriteFailed {
                sequence,
                error: SessionError::LinkLost(e.to_string()),
            },
            Err(_) => ChannelEventKind::WriteFailed {
                sequence,
                error: SessionError::Timeout("write".to_string()),
            },
        };

        let failed = matches!(kind, ChannelEventKind::WriteFailed { .. });
        sink(ChannelEvent { link: id, kind });
        if failed {
            // 流已损坏，无法从帧中间恢复
            return;
        }
    };

    sink(ChannelEvent {
        link: id,
        kind: ChannelEventKind::Closed(reason),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn collecting_sink() -> (ChannelSink, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: ChannelSink = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        (sink, rx)
    }

    async fn stream_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[test]
    fn test_endpoint_for_group() {
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 49, 1));
        let owner = GroupInfo {
            role: Role::Owner,
            owner_ip: ip,
            interface: None,
        };
        let client = GroupInfo {
            role: Role::Client,
            ..owner.clone()
        };
        let undetermined = GroupInfo {
            role: Role::Undetermined,
            ..owner.clone()
        };

        let addr = SocketAddr::new(ip, 8988);
        assert_eq!(
            LinkEndpoint::for_group(&owner, 8988),
            Some(LinkEndpoint::Listen(addr))
        );
        assert_eq!(
            LinkEndpoint::for_group(&client, 8988),
            Some(LinkEndpoint::Connect(addr))
        );
        assert_eq!(LinkEndpoint::for_group(&undetermined, 8988), None);
    }

    #[tokio::test]
    async fn test_connect_times_out_without_owner() {
        // 绑定后立即释放，得到一个无人监听的端口
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let result = open(LinkEndpoint::Connect(addr), Duration::from_millis(300)).await;
        assert_eq!(result.unwrap_err(), SessionError::Timeout("connect".into()));
    }

    #[tokio::test]
    async fn test_accept_times_out_without_client() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let result = open(LinkEndpoint::Listen(addr), Duration::from_millis(100)).await;
        assert_eq!(result.unwrap_err(), SessionError::Timeout("accept".into()));
    }

    #[tokio::test]
    async fn test_link_delivers_in_order() {
        let (local, mut remote) = stream_pair().await;
        let (sink, mut events) = collecting_sink();
        let link = Link::start(7, local, 1024, Duration::from_secs(5), sink);

        for (sequence, text) in [(1, "one"), (2, "two"), (3, "three")] {
            link.send(OutboundFrame {
                sequence,
                text: text.to_string(),
            })
            .unwrap();
        }

        for expected in 1..=3 {
            let event = events.recv().await.unwrap();
            assert_eq!(event.link, 7);
            assert!(matches!(event.kind, ChannelEventKind::Delivered(seq) if seq == expected));
        }

        let mut wire = vec![0u8; 4 + 3 + 4 + 3 + 4 + 5];
        remote.read_exact(&mut wire).await.unwrap();
        assert_eq!(&wire[..7], &[0, 0, 0, 3, b'o', b'n', b'e']);
        assert_eq!(&wire[14..], &[0, 0, 0, 5, b't', b'h', b'r', b'e', b'e']);
    }

    #[tokio::test]
    async fn test_link_reassembles_chunked_frames() {
        let (local, mut remote) = stream_pair().await;
        let (sink, mut events) = collecting_sink();
        let _link = Link::start(1, local, 1024, Duration::from_secs(5), sink);

        let mut wire = Vec::new();
        for text in ["hi", "there"] {
            wire.extend((text.len() as u32).to_be_bytes());
            wire.extend(text.as_bytes());
        }
        for chunk in wire.chunks(3) {
            remote.write_all(chunk).await.unwrap();
            remote.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        for expected in ["hi", "there"] {
            let event = events.recv().await.unwrap();
            assert!(matches!(event.kind, ChannelEventKind::Received(ref t) if t == expected));
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_link() {
        let (local, mut remote) = stream_pair().await;
        let (sink, mut events) = collecting_sink();
        let _link = Link::start(1, local, 16, Duration::from_secs(5), sink);

        remote.write_all(&17u32.to_be_bytes()).await.unwrap();

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event.kind,
            ChannelEventKind::Closed(SessionError::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_close_reported_after_deliveries() {
        let (local, mut remote) = stream_pair().await;
        let (sink, mut events) = collecting_sink();
        let link = Link::start(3, local, 1024, Duration::from_secs(5), sink);

        for sequence in 1..=3 {
            link.send(OutboundFrame {
                sequence,
                text: "ping".to_string(),
            })
            .unwrap();
        }

        // 对端读完全部帧后断开
        let mut wire = vec![0u8; 3 * (4 + 4)];
        remote.read_exact(&mut wire).await.unwrap();
        drop(remote);

        let mut delivered = Vec::new();
        loop {
            let event = events.recv().await.unwrap();
            match event.kind {
                ChannelEventKind::Delivered(seq) => delivered.push(seq),
                ChannelEventKind::Closed(SessionError::LinkLost(_)) => break,
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(delivered, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_peer_close_reports_link_lost() {
        let (local, remote) = stream_pair().await;
        let (sink, mut events) = collecting_sink();
        let _link = Link::start(1, local, 16, Duration::from_secs(5), sink);

        drop(remote);

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event.kind,
            ChannelEventKind::Closed(SessionError::LinkLost(_))
        ));
    }
}
