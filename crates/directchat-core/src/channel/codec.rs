//! 消息帧编解码
//!
//! 帧格式: `[4 字节大端长度][UTF-8 文本]`
//!
//! 长度为 0 或超过上限的帧视为协议违规。

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

const LENGTH_PREFIX: usize = 4;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zero-length frame")]
    EmptyFrame,

    #[error("frame length {len} exceeds maximum {max}")]
    TooLarge { len: usize, max: usize },

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

impl FrameError {
    /// 是否为协议层面的错误（而非传输错误）
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(self, FrameError::Io(_))
    }
}

/// 长度前缀文本帧 Codec
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_len: usize,
}

impl FrameCodec {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, FrameError> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX]);
        let len = u32::from_be_bytes(prefix) as usize;

        if len == 0 {
            return Err(FrameError::EmptyFrame);
        }
        if len > self.max_len {
            return Err(FrameError::TooLarge {
                len,
                max: self.max_len,
            });
        }

        if src.len() < LENGTH_PREFIX + len {
            src.reserve(LENGTH_PREFIX + len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        let payload = src.split_to(len);
        String::from_utf8(payload.to_vec())
            .map(Some)
            .map_err(|_| FrameError::InvalidUtf8)
    }
}

impl Encoder<String> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, text: String, dst: &mut BytesMut) -> Result<(), FrameError> {
        let len = text.len();
        if len == 0 {
            return Err(FrameError::EmptyFrame);
        }
        if len > self.max_len {
            return Err(FrameError::TooLarge {
                len,
                max: self.max_len,
            });
        }

        let prefix = u32::try_from(len).map_err(|_| FrameError::TooLarge {
            len,
            max: self.max_len,
        })?;

        dst.reserve(LENGTH_PREFIX + len);
        dst.put_u32(prefix);
        dst.extend_from_slice(text.as_bytes());
        Ok(())
    }
}
