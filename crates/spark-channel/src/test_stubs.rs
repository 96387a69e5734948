//! 测试桩集合：内存通道、记录型 Sink 与记录型 Handler。
//!
//! # 设计定位（Why）
//! - 管线、变换阶段与传输实现的测试都需要“一个能挂管线的通道”和“一个能观察事件的终点”；
//!   集中维护可避免各测试文件重复定义，并在契约演进时获得单点编译错误提示。
//!
//! # 使用方式（How）
//! - [`StubChannel::attached`] 返回已附着 [`RecordingSink`] 的通道，下行事件被记录并以成功解决；
//! - [`RecordingHandler`] 作为上行链路终点记录事件，可跨线程等待特定事件出现。
//!
//! # 风险与权衡（Trade-offs）
//! - 记录值为 [`Recorded`] 而非事件本身，避免“通道 → 管线 → 记录 → 通道”的引用环；
//! - 模块对外可见，生产代码不应依赖。

use std::{
    any::Any,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use crate::{
    ChannelError,
    channel::{Channel, ChannelId, ChannelLifecycle},
    config::ChannelConfig,
    event::{ChannelEvent, InterestOps, Message, StateValue},
    future::ChannelFuture,
    handler::UpstreamHandler,
    pipeline::{HandlerContext, Pipeline, PipelineSink},
};

/// 事件的可记录摘要。
#[derive(Clone, Debug)]
pub enum Recorded {
    State(StateValue),
    Message {
        message: Message,
        remote: Option<SocketAddr>,
        future: ChannelFuture,
    },
    Exception(ChannelError),
    WriteCompleted(u64),
}

impl Recorded {
    pub fn from_event(event: &ChannelEvent) -> Self {
        match event {
            ChannelEvent::State(e) => Self::State(e.value()),
            ChannelEvent::Message(e) => Self::Message {
                message: e.message().clone(),
                remote: e.remote_addr(),
                future: e.future().clone(),
            },
            ChannelEvent::Exception(e) => Self::Exception(e.cause().clone()),
            ChannelEvent::WriteCompleted(e) => Self::WriteCompleted(e.written()),
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception(_))
    }

    pub fn state(&self) -> Option<StateValue> {
        match self {
            Self::State(value) => Some(*value),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Journal {
    entries: Mutex<Vec<Recorded>>,
    changed: Condvar,
}

impl Journal {
    fn push(&self, entry: Recorded) {
        self.entries.lock().push(entry);
        self.changed.notify_all();
    }

    fn snapshot(&self) -> Vec<Recorded> {
        self.entries.lock().clone()
    }

    fn wait_until<F>(&self, timeout: Duration, mut predicate: F) -> bool
    where
        F: FnMut(&[Recorded]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut entries = self.entries.lock();
        loop {
            if predicate(entries.as_slice()) {
                return true;
            }
            if self.changed.wait_until(&mut entries, deadline).timed_out() {
                return predicate(entries.as_slice());
            }
        }
    }
}

/// 记录所有下行事件、并以成功解决其令牌的 Sink。
#[derive(Default)]
pub struct RecordingSink {
    journal: Journal,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Recorded> {
        self.journal.snapshot()
    }
}

impl PipelineSink for RecordingSink {
    fn event_sunk(&self, _pipeline: &Pipeline, event: ChannelEvent) {
        self.journal.push(Recorded::from_event(&event));
        event.future().set_success();
    }
}

/// 作为上行链路终点的记录型 Handler；克隆共享同一份记录。
#[derive(Clone, Default)]
pub struct RecordingHandler {
    journal: Arc<Journal>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.journal.snapshot()
    }

    /// 仅保留状态事件的取值。
    pub fn states(&self) -> Vec<StateValue> {
        self.events().iter().filter_map(Recorded::state).collect()
    }

    pub fn exceptions(&self) -> Vec<ChannelError> {
        self.events()
            .into_iter()
            .filter_map(|entry| match entry {
                Recorded::Exception(cause) => Some(cause),
                _ => None,
            })
            .collect()
    }

    /// 阻塞等待记录满足条件，超时返回 `false`。
    pub fn wait_until<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: FnMut(&[Recorded]) -> bool,
    {
        self.journal.wait_until(timeout, predicate)
    }
}

impl UpstreamHandler for RecordingHandler {
    fn handle_upstream(
        &self,
        _ctx: &HandlerContext<'_>,
        event: ChannelEvent,
    ) -> Result<(), ChannelError> {
        self.journal.push(Recorded::from_event(&event));
        Ok(())
    }
}

struct StubState {
    lifecycle: ChannelLifecycle,
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
    interest: InterestOps,
}

/// 不持有任何 IO 资源的内存通道。
pub struct StubChannel {
    id: ChannelId,
    pipeline: Arc<Pipeline>,
    config: ChannelConfig,
    state: Mutex<StubState>,
    close_future: ChannelFuture,
}

impl StubChannel {
    /// 未附着 Sink 的通道。
    pub fn detached() -> Arc<Self> {
        Arc::new(Self {
            id: ChannelId::next(),
            pipeline: Arc::new(Pipeline::new()),
            config: ChannelConfig::default(),
            state: Mutex::new(StubState {
                lifecycle: ChannelLifecycle::Open,
                local: None,
                remote: None,
                interest: InterestOps::READ,
            }),
            close_future: ChannelFuture::new(),
        })
    }

    /// 附着了 [`RecordingSink`] 的通道。
    pub fn attached() -> (Arc<Self>, Arc<RecordingSink>) {
        let channel = Self::detached();
        let sink = Arc::new(RecordingSink::default());
        let as_sink: Arc<dyn PipelineSink> = sink.clone();
        // 新建管线首次附着不会失败。
        let _ = channel.pipeline.attach(channel.id, as_sink);
        (channel, sink)
    }

    pub fn set_lifecycle(&self, lifecycle: ChannelLifecycle) {
        self.state.lock().lifecycle = lifecycle;
    }

    pub fn set_addresses(&self, local: Option<SocketAddr>, remote: Option<SocketAddr>) {
        let mut state = self.state.lock();
        state.local = local;
        state.remote = remote;
    }

    pub fn set_interest(&self, ops: InterestOps) {
        self.state.lock().interest = ops;
    }
}

impl Channel for StubChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn lifecycle(&self) -> ChannelLifecycle {
        self.state.lock().lifecycle
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().local
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.state.lock().remote
    }

    fn interest_ops(&self) -> InterestOps {
        self.state.lock().interest
    }

    fn close_future(&self) -> ChannelFuture {
        self.close_future.clone()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
