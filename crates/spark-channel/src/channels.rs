//! 通道操作的自由函数入口。
//!
//! # 设计背景（Why）
//! - 下行：应用通过这些函数构造事件并投入管线，拿回对应的完成令牌；
//! - 上行：传输 Sink 与 Worker 通过 `fire_*` 系列函数把生命周期与消息事件送入管线，
//!   这是 Handler 可见的唯一变更入口。
//!
//! # 契约说明（What）
//! - 下行函数总是返回令牌；Handler 链返回的错误已写入令牌，因此这里不再额外返回；
//! - `fire_*` 返回 Handler 链的同步结果，调用方据此决定如何处理变换失败。

use std::{net::SocketAddr, sync::Arc};

use crate::{
    ChannelError,
    channel::Channel,
    event::{
        ChannelEvent, ExceptionEvent, InterestOps, Message, MessageEvent, StateEvent, StateValue,
        WriteCompletionEvent,
    },
    future::ChannelFuture,
};

fn issue(channel: &Arc<dyn Channel>, value: StateValue) -> ChannelFuture {
    let future = ChannelFuture::new();
    let event = StateEvent::new(Arc::clone(channel), future.clone(), value);
    // 错误已由管线写入令牌。
    let _ = channel.pipeline().send_downstream(ChannelEvent::State(event));
    future
}

/// 请求绑定本地地址。
pub fn bind(channel: &Arc<dyn Channel>, local: SocketAddr) -> ChannelFuture {
    issue(channel, StateValue::Bound(Some(local)))
}

/// 请求连接远端地址。
pub fn connect(channel: &Arc<dyn Channel>, remote: SocketAddr) -> ChannelFuture {
    issue(channel, StateValue::Connected(Some(remote)))
}

/// 请求写出消息。
pub fn write(channel: &Arc<dyn Channel>, message: Message) -> ChannelFuture {
    write_to(channel, message, None)
}

/// 请求写出消息并附带目标地址（面向连接的传输会忽略该地址）。
pub fn write_to(
    channel: &Arc<dyn Channel>,
    message: Message,
    remote: Option<SocketAddr>,
) -> ChannelFuture {
    let future = ChannelFuture::new();
    let event = MessageEvent::new(Arc::clone(channel), future.clone(), message, remote);
    let _ = channel.pipeline().send_downstream(ChannelEvent::Message(event));
    future
}

/// 请求替换兴趣位。
pub fn set_interest_ops(channel: &Arc<dyn Channel>, ops: InterestOps) -> ChannelFuture {
    issue(channel, StateValue::InterestOps(ops))
}

/// 暂停或恢复读循环，其余兴趣位保持不变。
pub fn set_readable(channel: &Arc<dyn Channel>, readable: bool) -> ChannelFuture {
    let ops = channel.interest_ops().with_readable(readable);
    set_interest_ops(channel, ops)
}

/// 请求断开连接。
pub fn disconnect(channel: &Arc<dyn Channel>) -> ChannelFuture {
    issue(channel, StateValue::Connected(None))
}

/// 请求解绑本地地址。
pub fn unbind(channel: &Arc<dyn Channel>) -> ChannelFuture {
    issue(channel, StateValue::Bound(None))
}

/// 请求关闭通道。
pub fn close(channel: &Arc<dyn Channel>) -> ChannelFuture {
    issue(channel, StateValue::Open(false))
}

fn fire_state(channel: &Arc<dyn Channel>, value: StateValue) -> Result<(), ChannelError> {
    let event = StateEvent::new(Arc::clone(channel), ChannelFuture::completed(), value);
    channel.pipeline().send_upstream(ChannelEvent::State(event))
}

pub fn fire_channel_open(channel: &Arc<dyn Channel>) -> Result<(), ChannelError> {
    fire_state(channel, StateValue::Open(true))
}

pub fn fire_channel_bound(
    channel: &Arc<dyn Channel>,
    local: SocketAddr,
) -> Result<(), ChannelError> {
    fire_state(channel, StateValue::Bound(Some(local)))
}

pub fn fire_channel_connected(
    channel: &Arc<dyn Channel>,
    remote: SocketAddr,
) -> Result<(), ChannelError> {
    fire_state(channel, StateValue::Connected(Some(remote)))
}

pub fn fire_interest_changed(
    channel: &Arc<dyn Channel>,
    ops: InterestOps,
) -> Result<(), ChannelError> {
    fire_state(channel, StateValue::InterestOps(ops))
}

pub fn fire_channel_disconnected(channel: &Arc<dyn Channel>) -> Result<(), ChannelError> {
    fire_state(channel, StateValue::Connected(None))
}

pub fn fire_channel_unbound(channel: &Arc<dyn Channel>) -> Result<(), ChannelError> {
    fire_state(channel, StateValue::Bound(None))
}

pub fn fire_channel_closed(channel: &Arc<dyn Channel>) -> Result<(), ChannelError> {
    fire_state(channel, StateValue::Open(false))
}

/// 上行派发读到的消息。
pub fn fire_message_received(
    channel: &Arc<dyn Channel>,
    message: Message,
    remote: Option<SocketAddr>,
) -> Result<(), ChannelError> {
    let event = MessageEvent::new(
        Arc::clone(channel),
        ChannelFuture::completed(),
        message,
        remote,
    );
    channel.pipeline().send_upstream(ChannelEvent::Message(event))
}

/// 上行派发传输层异常。
pub fn fire_exception_caught(
    channel: &Arc<dyn Channel>,
    cause: ChannelError,
) -> Result<(), ChannelError> {
    let event = ExceptionEvent::new(Arc::clone(channel), cause);
    channel.pipeline().send_upstream(ChannelEvent::Exception(event))
}

/// 上行报告一次写出完成。
pub fn fire_write_complete(channel: &Arc<dyn Channel>, written: u64) -> Result<(), ChannelError> {
    let event = WriteCompletionEvent::new(Arc::clone(channel), written);
    channel
        .pipeline()
        .send_upstream(ChannelEvent::WriteCompleted(event))
}
