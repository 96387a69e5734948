//! 一对一消息变换阶段。
//!
//! # 设计背景（Why）
//! - 解码、过滤、协议适配等阶段的共同形态是“一条消息进，零或一条消息出”；
//!   把这一形态抽象为 [`Transformer`]，由 [`TransformHandler`]（上行）与
//!   [`EncodeHandler`]（下行）负责事件的拆装与传播。
//!
//! # 契约说明（What）
//! - [`Transformed::Unchanged`] 或返回同一载荷（[`Message::ptr_eq`]）：原事件对象原样传播；
//! - [`Transformed::Replaced`]：合成新的消息事件，沿用原事件的远端地址；
//! - [`Transformed::Discarded`]：吞掉事件，不产生任何传播，也不触碰令牌或异常事件；
//! - 非消息事件绕过变换器；
//! - 变换器返回的错误沿派发调用栈同步传回，不转化为异常事件。

use std::sync::Arc;

use crate::{
    ChannelError,
    channel::Channel,
    event::{ChannelEvent, Message, MessageEvent},
    future::ChannelFuture,
    handler::{DownstreamHandler, UpstreamHandler},
    pipeline::HandlerContext,
};

/// 变换结果。
#[derive(Clone, Debug)]
pub enum Transformed {
    /// 保留原消息。
    Unchanged,
    /// 以新消息替换。
    Replaced(Message),
    /// 丢弃该消息（例如有状态阶段仍在缓冲不完整的输入）。
    Discarded,
}

/// 一对一消息变换器。
///
/// 实现可以持有内部缓冲状态；同一通道上的调用由派发线程串行发起。
pub trait Transformer: Send + Sync + 'static {
    fn transform(
        &self,
        ctx: &HandlerContext<'_>,
        channel: &Arc<dyn Channel>,
        message: &Message,
    ) -> Result<Transformed, ChannelError>;
}

/// 以闭包实现的变换器，见 [`transform_fn`]。
pub struct TransformFn<F>(F);

/// 以闭包构造变换器。
pub fn transform_fn<F>(f: F) -> TransformFn<F>
where
    F: Fn(&HandlerContext<'_>, &Arc<dyn Channel>, &Message) -> Result<Transformed, ChannelError>
        + Send
        + Sync
        + 'static,
{
    TransformFn(f)
}

impl<F> Transformer for TransformFn<F>
where
    F: Fn(&HandlerContext<'_>, &Arc<dyn Channel>, &Message) -> Result<Transformed, ChannelError>
        + Send
        + Sync
        + 'static,
{
    fn transform(
        &self,
        ctx: &HandlerContext<'_>,
        channel: &Arc<dyn Channel>,
        message: &Message,
    ) -> Result<Transformed, ChannelError> {
        (self.0)(ctx, channel, message)
    }
}

/// 判断变换结果是否需要合成新事件。
fn replacement(original: &Message, outcome: Transformed) -> Option<Option<Message>> {
    match outcome {
        Transformed::Unchanged => Some(None),
        Transformed::Replaced(next) if next.ptr_eq(original) => Some(None),
        Transformed::Replaced(next) => Some(Some(next)),
        Transformed::Discarded => None,
    }
}

/// 上行变换阶段（一对一解码器）。
pub struct TransformHandler<T> {
    transformer: T,
}

impl<T: Transformer> TransformHandler<T> {
    pub fn new(transformer: T) -> Self {
        Self { transformer }
    }
}

impl<T: Transformer> UpstreamHandler for TransformHandler<T> {
    fn handle_upstream(
        &self,
        ctx: &HandlerContext<'_>,
        event: ChannelEvent,
    ) -> Result<(), ChannelError> {
        let inbound = match event {
            ChannelEvent::Message(inbound) => inbound,
            other => return ctx.send_upstream(other),
        };
        let outcome = self
            .transformer
            .transform(ctx, ctx.channel(), inbound.message())?;
        match replacement(inbound.message(), outcome) {
            None => Ok(()),
            Some(None) => ctx.send_upstream(ChannelEvent::Message(inbound)),
            Some(Some(message)) => ctx.send_upstream(ChannelEvent::Message(MessageEvent::new(
                Arc::clone(ctx.channel()),
                ChannelFuture::completed(),
                message,
                inbound.remote_addr(),
            ))),
        }
    }
}

/// 下行变换阶段（一对一编码器）。
///
/// 与 [`TransformHandler`] 的区别：新事件沿用原事件的完成令牌；
/// 丢弃时令牌直接以成功解决，避免写入方永远等待。
pub struct EncodeHandler<T> {
    transformer: T,
}

impl<T: Transformer> EncodeHandler<T> {
    pub fn new(transformer: T) -> Self {
        Self { transformer }
    }
}

impl<T: Transformer> DownstreamHandler for EncodeHandler<T> {
    fn handle_downstream(
        &self,
        ctx: &HandlerContext<'_>,
        event: ChannelEvent,
    ) -> Result<(), ChannelError> {
        let outbound = match event {
            ChannelEvent::Message(outbound) => outbound,
            other => return ctx.send_downstream(other),
        };
        let outcome = self
            .transformer
            .transform(ctx, ctx.channel(), outbound.message())?;
        match replacement(outbound.message(), outcome) {
            None => {
                outbound.future().set_success();
                Ok(())
            }
            Some(None) => ctx.send_downstream(ChannelEvent::Message(outbound)),
            Some(Some(message)) => ctx.send_downstream(ChannelEvent::Message(MessageEvent::new(
                Arc::clone(ctx.channel()),
                outbound.future().clone(),
                message,
                outbound.remote_addr(),
            ))),
        }
    }
}
