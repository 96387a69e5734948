//! 读循环的分帧接缝。
//!
//! Worker 把每次读到的字节追加到累积缓冲，再反复调用 [`FrameDecoder::decode`]
//! 取出完整消息，直到返回 `Ok(None)`。具体协议的分帧由调用方提供。

use bytes::BytesMut;
use spark_channel::{ChannelError, Message};

/// 字节流分帧器；每个 Worker 独占一个实例，可以持有跨读取的状态。
pub trait FrameDecoder: Send + 'static {
    /// 从累积缓冲中取出一条完整消息。
    ///
    /// - `Ok(Some(_))`：已消费对应字节，Worker 会继续调用；
    /// - `Ok(None)`：数据不足，等待下一次读取；
    /// - `Err(_)`：数据损坏，Worker 上报异常事件并丢弃缓冲内容。
    fn decode(&mut self, buffer: &mut BytesMut) -> Result<Option<Message>, ChannelError>;
}

/// 每次读取的全部字节作为一条 [`bytes::Bytes`] 消息。
#[derive(Clone, Copy, Debug, Default)]
pub struct ChunkDecoder;

impl FrameDecoder for ChunkDecoder {
    fn decode(&mut self, buffer: &mut BytesMut) -> Result<Option<Message>, ChannelError> {
        if buffer.is_empty() {
            return Ok(None);
        }
        Ok(Some(Message::new(buffer.split().freeze())))
    }
}
