//! 每连接一个的阻塞读循环，以及关闭、写入、兴趣位三条共享路径。
//!
//! # 设计背景（Why）
//! - 已连接通道由专属 Worker 阻塞读取输入流，经分帧器切分后上行派发；
//! - 关闭路径既可能由应用的下行事件触发，也可能由 Worker 在读到 EOF/错误时触发，
//!   二者必须收敛为恰好一次的 `Closed` 迁移。
//!
//! # 契约说明（What）
//! - [`close`]：首次调用释放资源并依次上行 `CONNECTED(None)`（若曾连接）、`BOUND(None)`（若曾绑定）、
//!   `OPEN(false)`，随后解决通道的关闭令牌；之后的调用只把令牌标记为成功；
//! - [`write`]：全部字节写出并刷新后才解决令牌，随后上行写完成事件；
//! - [`set_interest_ops`]：`WRITE` 位由传输维护，调用方只能改变其余位；掩码变化时唤醒 Worker 并上行兴趣变更事件。

use std::{
    io::{self, Read, Write},
    sync::Arc,
};

use bytes::{Bytes, BytesMut};
use spark_channel::{
    Channel, ChannelError, ChannelFuture, ChannelLifecycle, InterestOps, Message, channels,
};
use tracing::{debug, trace, warn};

use crate::{channel::OioSocketChannel, frame::FrameDecoder};

/// 单个通道的读循环。
pub struct OioWorker {
    channel: Arc<OioSocketChannel>,
    decoder: Box<dyn FrameDecoder>,
}

impl OioWorker {
    pub fn new(channel: Arc<OioSocketChannel>, decoder: Box<dyn FrameDecoder>) -> Self {
        Self { channel, decoder }
    }

    /// 运行读循环直到 EOF、读错误或通道关闭，退出前执行关闭路径。
    pub fn run(mut self) {
        let channel = Arc::clone(&self.channel);
        let handle: Arc<dyn Channel> = channel.clone();
        match channel.take_input() {
            Some(input) => self.read_loop(&handle, input),
            None => debug!(channel = %channel.id(), "no input stream, worker exits"),
        }
        close(&channel, &ChannelFuture::new());
        trace!(channel = %channel.id(), "worker finished");
    }

    fn read_loop(&mut self, handle: &Arc<dyn Channel>, mut input: Box<dyn Read + Send>) {
        let capacity = self.channel.config().snapshot().read_buffer_size();
        let mut chunk = vec![0u8; capacity];
        let mut pending = BytesMut::with_capacity(capacity);

        while self.channel.wait_until_readable() {
            let read = match input.read(&mut chunk) {
                Ok(0) => {
                    trace!(channel = %handle.id(), "end of stream");
                    break;
                }
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    // 主动关闭导致的读失败不是异常。
                    if handle.is_open() {
                        report(handle, ChannelError::io("read", err));
                    }
                    break;
                }
            };
            pending.extend_from_slice(&chunk[..read]);
            self.drain(handle, &mut pending);
        }
    }

    fn drain(&mut self, handle: &Arc<dyn Channel>, pending: &mut BytesMut) {
        loop {
            match self.decoder.decode(pending) {
                Ok(Some(message)) => {
                    let remote = handle.remote_addr();
                    if let Err(err) = channels::fire_message_received(handle, message, remote) {
                        warn!(
                            channel = %handle.id(),
                            code = err.code(),
                            error = %err,
                            "inbound message rejected by pipeline"
                        );
                    }
                }
                Ok(None) => return,
                Err(err) => {
                    pending.clear();
                    report(handle, err);
                    return;
                }
            }
        }
    }
}

/// 上行异常事件；Handler 在处理异常时再次失败只记录日志。
pub(crate) fn report(handle: &Arc<dyn Channel>, cause: ChannelError) {
    if let Err(err) = channels::fire_exception_caught(handle, cause) {
        warn!(channel = %handle.id(), error = %err, "exception handler failed");
    }
}

/// 解决令牌为失败并上行异常事件。
pub(crate) fn fail(handle: &Arc<dyn Channel>, future: &ChannelFuture, cause: ChannelError) {
    future.set_failure(cause.clone());
    report(handle, cause);
}

fn fire_quietly(handle: &Arc<dyn Channel>, what: &'static str, result: Result<(), ChannelError>) {
    if let Err(err) = result {
        warn!(channel = %handle.id(), event = what, error = %err, "handler failed during close");
    }
}

/// 关闭通道；幂等。
pub fn close(channel: &Arc<OioSocketChannel>, future: &ChannelFuture) {
    let handle: Arc<dyn Channel> = channel.clone();
    let Some(previous) = channel.mark_closed() else {
        future.set_success();
        return;
    };
    debug!(channel = %channel.id(), previous = ?previous, "closing channel");

    let released = channel.socket().close();
    channel.release_streams();
    match released {
        Ok(()) => {
            future.set_success();
        }
        Err(err) => fail(&handle, future, ChannelError::io("close", err)),
    }

    if previous == ChannelLifecycle::Connected {
        fire_quietly(&handle, "disconnected", channels::fire_channel_disconnected(&handle));
    }
    if matches!(previous, ChannelLifecycle::Bound | ChannelLifecycle::Connected) {
        fire_quietly(&handle, "unbound", channels::fire_channel_unbound(&handle));
    }
    fire_quietly(&handle, "closed", channels::fire_channel_closed(&handle));
    channel.close_future().set_success();
}

fn payload(message: &Message) -> Option<Bytes> {
    if let Some(bytes) = message.downcast_ref::<Bytes>() {
        Some(bytes.clone())
    } else if let Some(bytes) = message.downcast_ref::<BytesMut>() {
        Some(Bytes::copy_from_slice(bytes))
    } else if let Some(bytes) = message.downcast_ref::<Vec<u8>>() {
        Some(Bytes::copy_from_slice(bytes))
    } else {
        message
            .downcast_ref::<String>()
            .map(|text| Bytes::copy_from_slice(text.as_bytes()))
    }
}

/// 写出消息；支持 `Bytes`、`BytesMut`、`Vec<u8>` 与 `String` 载荷。
pub fn write(channel: &Arc<OioSocketChannel>, future: &ChannelFuture, message: &Message) {
    let handle: Arc<dyn Channel> = channel.clone();
    if !channel.is_open() {
        fail(&handle, future, ChannelError::Closed(channel.id()));
        return;
    }
    let Some(bytes) = payload(message) else {
        fail(
            &handle,
            future,
            ChannelError::UnsupportedMessage {
                type_name: message.type_name(),
            },
        );
        return;
    };

    let outcome = {
        let mut output = channel.output().lock();
        match output.as_mut() {
            None if channel.is_open() => Err(ChannelError::NotYetConnected(channel.id())),
            None => Err(ChannelError::Closed(channel.id())),
            Some(stream) => stream
                .write_all(&bytes)
                .and_then(|()| stream.flush())
                .map_err(|err| ChannelError::io("write", err)),
        }
    };

    match outcome {
        Ok(()) => {
            future.set_success();
            let written = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
            if let Err(err) = channels::fire_write_complete(&handle, written) {
                warn!(channel = %channel.id(), error = %err, "write completion handler failed");
            }
        }
        Err(cause) => fail(&handle, future, cause),
    }
}

/// 合并兴趣位：`WRITE` 位保持当前值，其余位取请求值。
pub(crate) fn merge_interest(current: InterestOps, requested: InterestOps) -> InterestOps {
    let write = InterestOps::WRITE.bits();
    InterestOps::from_bits((requested.bits() & !write) | (current.bits() & write))
}

/// 应用兴趣位，用于暂停或恢复读循环。
pub fn set_interest_ops(channel: &Arc<OioSocketChannel>, future: &ChannelFuture, ops: InterestOps) {
    let handle: Arc<dyn Channel> = channel.clone();
    let merged = merge_interest(channel.interest_ops(), ops);
    let changed = channel.apply_interest_ops(merged);
    future.set_success();
    if changed {
        trace!(channel = %channel.id(), interest = ?merged, "interest ops changed");
        if let Err(err) = channels::fire_interest_changed(&handle, merged) {
            warn!(channel = %channel.id(), error = %err, "interest change handler failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn write_bit_is_owned_by_the_transport(current in 0u32..16, requested in 0u32..16) {
            let merged = merge_interest(
                InterestOps::from_bits(current),
                InterestOps::from_bits(requested),
            );
            let write = InterestOps::WRITE.bits();
            prop_assert_eq!(merged.bits() & write, current & write);
            prop_assert_eq!(merged.bits() & !write, requested & !write);
        }
    }

    #[test]
    fn supported_payloads_are_flattened() {
        let cases = [
            Message::new(Bytes::from_static(b"a")),
            Message::new(b"a".to_vec()),
            Message::new(String::from("a")),
            Message::new(BytesMut::from(&b"a"[..])),
        ];
        for message in &cases {
            assert_eq!(payload(message), Some(Bytes::from_static(b"a")), "{message:?}");
        }
        assert!(payload(&Message::new(42u32)).is_none());
    }
}
