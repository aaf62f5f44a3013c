use bytes::{Buf, BytesMut};
use tether_core::error::{CoreError, Result, codes};

use crate::codec::{DecodedFrame, FrameCodec};

const NEWLINE: u8 = b'\n';

/// 增量分帧器：把任意切分的入站字节流还原为逐行帧。
///
/// # 行为概览（How）
/// - [`extend`](Self::extend) 追加字节，[`decode_next`](Self::decode_next) 每次取出一个完整行并交给 [`FrameCodec`]；
/// - 未遇到换行且缓冲已超出帧预算时，丢弃已缓冲的字节并进入“丢弃到下一个换行”状态，
///   返回 `protocol.budget_exceeded`，之后的帧照常解码；
/// - 非 UTF-8 行返回 `protocol.decode`，该行被消费，不影响后续行。
///
/// # 契约说明（What）
/// - `Ok(None)` 表示需要更多字节；
/// - 单个实例只服务一条连接，重连后应调用 [`reset`](Self::reset)。
#[derive(Debug, Default)]
pub struct FrameDecoder {
    codec: FrameCodec,
    buffer: BytesMut,
    discarding: bool,
}

impl FrameDecoder {
    /// 使用给定编解码器（及其帧预算）创建分帧器。
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            buffer: BytesMut::new(),
            discarding: false,
        }
    }

    /// 追加入站字节。
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// 尚未成帧的字节数。
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// 丢弃所有缓冲字节。
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }

    /// 取出下一帧。
    pub fn decode_next(&mut self) -> Result<Option<DecodedFrame>> {
        loop {
            let Some(pos) = self.buffer.iter().position(|byte| *byte == NEWLINE) else {
                return self.check_partial();
            };
            let line = self.buffer.split_to(pos + 1);
            if self.discarding {
                self.discarding = false;
                continue;
            }
            let text = std::str::from_utf8(&line).map_err(|err| {
                CoreError::new(codes::PROTOCOL_DECODE, "frame is not valid UTF-8").with_cause(err)
            })?;
            return self.codec.decode(text).map(Some);
        }
    }

    /// 取出缓冲中所有完整帧；单帧错误不会中断后续帧。
    pub fn drain(&mut self) -> Vec<Result<DecodedFrame>> {
        let mut out = Vec::new();
        loop {
            match self.decode_next() {
                Ok(Some(frame)) => out.push(Ok(frame)),
                Ok(None) => return out,
                Err(err) => out.push(Err(err)),
            }
        }
    }

    fn check_partial(&mut self) -> Result<Option<DecodedFrame>> {
        let Some(limit) = self.codec.max_frame_size() else {
            return Ok(None);
        };
        if self.discarding {
            self.buffer.clear();
            return Ok(None);
        }
        if self.buffer.len() > limit {
            let dropped = self.buffer.len();
            self.buffer.advance(dropped);
            self.discarding = true;
            return Err(CoreError::new(
                codes::PROTOCOL_BUDGET_EXCEEDED,
                format!("{dropped} bytes buffered without a newline exceed frame budget {limit}"),
            ));
        }
        Ok(None)
    }
}
