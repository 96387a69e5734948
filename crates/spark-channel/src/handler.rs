use crate::{
    ChannelError,
    event::{
        ChannelEvent, ExceptionEvent, MessageEvent, StateEvent, StateValue, WriteCompletionEvent,
    },
    pipeline::HandlerContext,
};

/// 上行事件处理合约，面向从传输层到应用层的数据流。
///
/// # 设计背景（Why）
/// - Handler 是管线中的值，按顺序组成责任链；每个 Handler 自行决定是否通过
///   [`HandlerContext::send_upstream`] 继续传播。
///
/// # 契约说明（What）
/// - 方法在派发线程上同步执行：对 Worker 派发的事件即 Worker 线程，对 Sink 触发的事件即下行调用方线程；
/// - 返回的错误沿派发调用栈同步传回，不会被转换为异常事件。
///
/// # 风险提示（Trade-offs）
/// - 不要在回调中执行长时间阻塞操作，否则会暂停该通道的读循环。
pub trait UpstreamHandler: Send + Sync + 'static {
    fn handle_upstream(
        &self,
        ctx: &HandlerContext<'_>,
        event: ChannelEvent,
    ) -> Result<(), ChannelError>;
}

/// 下行事件处理合约，负责从应用层到传输 Sink 的逆向数据流。
///
/// # 契约说明（What）
/// - 通过 [`HandlerContext::send_downstream`] 继续向 Sink 方向传播；
/// - 返回错误时，管线会把该错误写入事件的完成令牌，再返回给调用方。
pub trait DownstreamHandler: Send + Sync + 'static {
    fn handle_downstream(
        &self,
        ctx: &HandlerContext<'_>,
        event: ChannelEvent,
    ) -> Result<(), ChannelError>;
}

/// 以闭包实现的上行 Handler，见 [`upstream_fn`]。
pub struct UpstreamFn<F>(F);

/// 以闭包构造上行 Handler。
pub fn upstream_fn<F>(f: F) -> UpstreamFn<F>
where
    F: Fn(&HandlerContext<'_>, ChannelEvent) -> Result<(), ChannelError> + Send + Sync + 'static,
{
    UpstreamFn(f)
}

impl<F> UpstreamHandler for UpstreamFn<F>
where
    F: Fn(&HandlerContext<'_>, ChannelEvent) -> Result<(), ChannelError> + Send + Sync + 'static,
{
    fn handle_upstream(
        &self,
        ctx: &HandlerContext<'_>,
        event: ChannelEvent,
    ) -> Result<(), ChannelError> {
        (self.0)(ctx, event)
    }
}

/// 以闭包实现的下行 Handler，见 [`downstream_fn`]。
pub struct DownstreamFn<F>(F);

/// 以闭包构造下行 Handler。
pub fn downstream_fn<F>(f: F) -> DownstreamFn<F>
where
    F: Fn(&HandlerContext<'_>, ChannelEvent) -> Result<(), ChannelError> + Send + Sync + 'static,
{
    DownstreamFn(f)
}

impl<F> DownstreamHandler for DownstreamFn<F>
where
    F: Fn(&HandlerContext<'_>, ChannelEvent) -> Result<(), ChannelError> + Send + Sync + 'static,
{
    fn handle_downstream(
        &self,
        ctx: &HandlerContext<'_>,
        event: ChannelEvent,
    ) -> Result<(), ChannelError> {
        (self.0)(ctx, event)
    }
}

/// 按生命周期事件拆分的上行 Handler。
///
/// # 教案式说明
/// - **意图 (Why)**：大多数只关心生命周期的阶段（如连接计数、日志）只需覆盖一两个回调，
///   其余事件应原样透传；
/// - **逻辑 (How)**：所有方法默认调用 `ctx.send_upstream` 透传；通过 [`Lifecycle`]
///   包装后即可注册到管线；
/// - **契约 (What)**：`OPEN(true)`/`OPEN(false)` 分别映射为 `channel_open`/`channel_closed`，
///   `BOUND(None)` 映射为 `channel_unbound`，`CONNECTED(None)` 映射为 `channel_disconnected`。
pub trait LifecycleHandler: Send + Sync + 'static {
    fn channel_open(
        &self,
        ctx: &HandlerContext<'_>,
        event: StateEvent,
    ) -> Result<(), ChannelError> {
        ctx.send_upstream(ChannelEvent::State(event))
    }

    fn channel_bound(
        &self,
        ctx: &HandlerContext<'_>,
        event: StateEvent,
    ) -> Result<(), ChannelError> {
        ctx.send_upstream(ChannelEvent::State(event))
    }

    fn channel_connected(
        &self,
        ctx: &HandlerContext<'_>,
        event: StateEvent,
    ) -> Result<(), ChannelError> {
        ctx.send_upstream(ChannelEvent::State(event))
    }

    fn interest_changed(
        &self,
        ctx: &HandlerContext<'_>,
        event: StateEvent,
    ) -> Result<(), ChannelError> {
        ctx.send_upstream(ChannelEvent::State(event))
    }

    fn channel_disconnected(
        &self,
        ctx: &HandlerContext<'_>,
        event: StateEvent,
    ) -> Result<(), ChannelError> {
        ctx.send_upstream(ChannelEvent::State(event))
    }

    fn channel_unbound(
        &self,
        ctx: &HandlerContext<'_>,
        event: StateEvent,
    ) -> Result<(), ChannelError> {
        ctx.send_upstream(ChannelEvent::State(event))
    }

    fn channel_closed(
        &self,
        ctx: &HandlerContext<'_>,
        event: StateEvent,
    ) -> Result<(), ChannelError> {
        ctx.send_upstream(ChannelEvent::State(event))
    }

    fn message_received(
        &self,
        ctx: &HandlerContext<'_>,
        event: MessageEvent,
    ) -> Result<(), ChannelError> {
        ctx.send_upstream(ChannelEvent::Message(event))
    }

    fn exception_caught(
        &self,
        ctx: &HandlerContext<'_>,
        event: ExceptionEvent,
    ) -> Result<(), ChannelError> {
        ctx.send_upstream(ChannelEvent::Exception(event))
    }

    fn write_completed(
        &self,
        ctx: &HandlerContext<'_>,
        event: WriteCompletionEvent,
    ) -> Result<(), ChannelError> {
        ctx.send_upstream(ChannelEvent::WriteCompleted(event))
    }
}

/// 将 [`LifecycleHandler`] 适配为 [`UpstreamHandler`]。
pub struct Lifecycle<H>(pub H);

impl<H: LifecycleHandler> UpstreamHandler for Lifecycle<H> {
    fn handle_upstream(
        &self,
        ctx: &HandlerContext<'_>,
        event: ChannelEvent,
    ) -> Result<(), ChannelError> {
        let handler = &self.0;
        match event {
            ChannelEvent::Message(e) => handler.message_received(ctx, e),
            ChannelEvent::Exception(e) => handler.exception_caught(ctx, e),
            ChannelEvent::WriteCompleted(e) => handler.write_completed(ctx, e),
            ChannelEvent::State(e) => match e.value() {
                StateValue::Open(true) => handler.channel_open(ctx, e),
                StateValue::Open(false) => handler.channel_closed(ctx, e),
                StateValue::Bound(Some(_)) => handler.channel_bound(ctx, e),
                StateValue::Bound(None) => handler.channel_unbound(ctx, e),
                StateValue::Connected(Some(_)) => handler.channel_connected(ctx, e),
                StateValue::Connected(None) => handler.channel_disconnected(ctx, e),
                StateValue::InterestOps(_) => handler.interest_changed(ctx, e),
            },
        }
    }
}
