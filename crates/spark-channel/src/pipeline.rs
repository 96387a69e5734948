//! Handler 管线。
//!
//! # 设计背景（Why）
//! - 管线是附着在单个通道上的有序 Handler 链：上行事件从首个阶段流向末尾，
//!   下行事件从末尾流向首个阶段，最终落入传输 Sink；
//! - 每个阶段都是实现了 [`UpstreamHandler`] 和/或 [`DownstreamHandler`] 的值，
//!   不依赖继承层次。
//!
//! # 逻辑解析（How）
//! - 阶段序列以 `Arc<[Stage]>` 保存在读写锁中：派发前取一次快照，派发过程中不持锁，
//!   因此 Handler 可以在回调内增删阶段而不会死锁，新的序列只影响之后的派发；
//! - Sink 通过 [`Pipeline::attach`] 一次性绑定，之后不可更换。
//!
//! # 契约说明（What）
//! - 上行链路走到末尾仍未被消费的事件记录日志后丢弃（异常事件为 `warn`，其余为 `trace`）；
//! - 下行派发中 Handler 返回的错误会写入该事件的完成令牌，并返回给发起方；
//! - 未附着 Sink 的管线拒绝下行事件，令牌以 [`ChannelError::Detached`] 失败。

use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use parking_lot::RwLock;
use tracing::{trace, warn};

use crate::{
    ChannelError,
    channel::{Channel, ChannelId},
    event::ChannelEvent,
    handler::{DownstreamHandler, UpstreamHandler},
};

/// 传输 Sink：下行链路的终点，把下行事件翻译为真实 IO。
///
/// # 契约说明（What）
/// - Sink 自行捕获所有失败，转化为“令牌失败 + 上行异常事件”，因此没有返回值；
/// - 调用发生在下行事件的发起线程上，可以执行阻塞 IO。
pub trait PipelineSink: Send + Sync + 'static {
    fn event_sunk(&self, pipeline: &Pipeline, event: ChannelEvent);
}

/// 管线中的一个具名阶段。
#[derive(Clone)]
pub struct Stage {
    name: Arc<str>,
    upstream: Option<Arc<dyn UpstreamHandler>>,
    downstream: Option<Arc<dyn DownstreamHandler>>,
}

impl Stage {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn upstream(&self) -> Option<&Arc<dyn UpstreamHandler>> {
        self.upstream.as_ref()
    }

    pub fn downstream(&self) -> Option<&Arc<dyn DownstreamHandler>> {
        self.downstream.as_ref()
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("upstream", &self.upstream.is_some())
            .field("downstream", &self.downstream.is_some())
            .finish()
    }
}

struct Attachment {
    channel: ChannelId,
    sink: Arc<dyn PipelineSink>,
}

/// 附着于单个通道的 Handler 管线。
pub struct Pipeline {
    stages: RwLock<Arc<[Stage]>>,
    attachment: OnceLock<Attachment>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            stages: RwLock::new(Arc::from(Vec::new())),
            attachment: OnceLock::new(),
        }
    }

    /// 在末尾追加上行阶段。
    pub fn add_last_upstream<H>(&self, name: &str, handler: H) -> Result<(), ChannelError>
    where
        H: UpstreamHandler,
    {
        self.insert(false, name, Some(Arc::new(handler)), None)
    }

    /// 在末尾追加下行阶段。
    pub fn add_last_downstream<H>(&self, name: &str, handler: H) -> Result<(), ChannelError>
    where
        H: DownstreamHandler,
    {
        self.insert(false, name, None, Some(Arc::new(handler)))
    }

    /// 在末尾追加同时处理两个方向的阶段，两侧共享同一个 Handler 实例。
    pub fn add_last_duplex<H>(&self, name: &str, handler: H) -> Result<(), ChannelError>
    where
        H: UpstreamHandler + DownstreamHandler,
    {
        let handler = Arc::new(handler);
        let upstream: Arc<dyn UpstreamHandler> = handler.clone();
        let downstream: Arc<dyn DownstreamHandler> = handler;
        self.insert(false, name, Some(upstream), Some(downstream))
    }

    /// 在首部插入上行阶段。
    pub fn add_first_upstream<H>(&self, name: &str, handler: H) -> Result<(), ChannelError>
    where
        H: UpstreamHandler,
    {
        self.insert(true, name, Some(Arc::new(handler)), None)
    }

    /// 在首部插入下行阶段。
    pub fn add_first_downstream<H>(&self, name: &str, handler: H) -> Result<(), ChannelError>
    where
        H: DownstreamHandler,
    {
        self.insert(true, name, None, Some(Arc::new(handler)))
    }

    fn insert(
        &self,
        first: bool,
        name: &str,
        upstream: Option<Arc<dyn UpstreamHandler>>,
        downstream: Option<Arc<dyn DownstreamHandler>>,
    ) -> Result<(), ChannelError> {
        let mut guard = self.stages.write();
        if guard.iter().any(|stage| &*stage.name == name) {
            return Err(ChannelError::DuplicateHandler(name.to_owned()));
        }
        let stage = Stage {
            name: Arc::from(name),
            upstream,
            downstream,
        };
        let mut next: Vec<Stage> = guard.to_vec();
        if first {
            next.insert(0, stage);
        } else {
            next.push(stage);
        }
        *guard = Arc::from(next);
        Ok(())
    }

    /// 移除具名阶段，返回被移除的阶段。
    pub fn remove(&self, name: &str) -> Option<Stage> {
        let mut guard = self.stages.write();
        let position = guard.iter().position(|stage| &*stage.name == name)?;
        let mut next: Vec<Stage> = guard.to_vec();
        let removed = next.remove(position);
        *guard = Arc::from(next);
        Some(removed)
    }

    /// 按名称查找阶段。
    pub fn get(&self, name: &str) -> Option<Stage> {
        self.stages
            .read()
            .iter()
            .find(|stage| &*stage.name == name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.read().iter().any(|stage| &*stage.name == name)
    }

    /// 按顺序列出阶段名称。
    pub fn names(&self) -> Vec<String> {
        self.stages
            .read()
            .iter()
            .map(|stage| stage.name.to_string())
            .collect()
    }

    /// 把管线附着到通道并绑定 Sink，只允许调用一次。
    pub fn attach(
        &self,
        channel: ChannelId,
        sink: Arc<dyn PipelineSink>,
    ) -> Result<(), ChannelError> {
        if let Some(existing) = self.attachment.get() {
            return Err(ChannelError::AlreadyAttached(existing.channel));
        }
        self.attachment
            .set(Attachment { channel, sink })
            .map_err(|rejected| {
                let owner = self
                    .attachment
                    .get()
                    .map_or(rejected.channel, |current| current.channel);
                ChannelError::AlreadyAttached(owner)
            })
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.get().is_some()
    }

    /// 所附着通道的标识。
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.attachment.get().map(|a| a.channel)
    }

    fn snapshot(&self) -> Arc<[Stage]> {
        Arc::clone(&self.stages.read())
    }

    /// 从首个上行阶段开始派发上行事件。
    pub fn send_upstream(&self, event: ChannelEvent) -> Result<(), ChannelError> {
        let stages = self.snapshot();
        self.upstream_from(&stages, 0, event)
    }

    fn upstream_from(
        &self,
        stages: &Arc<[Stage]>,
        from: usize,
        event: ChannelEvent,
    ) -> Result<(), ChannelError> {
        let next = stages
            .iter()
            .enumerate()
            .skip(from)
            .find_map(|(idx, stage)| stage.upstream.as_ref().map(|h| (idx, Arc::clone(h))));
        match next {
            Some((index, handler)) => {
                let ctx = HandlerContext {
                    pipeline: self,
                    stages,
                    index,
                    channel: Arc::clone(event.channel()),
                };
                handler.handle_upstream(&ctx, event)
            }
            None => {
                Self::unhandled_upstream(&event);
                Ok(())
            }
        }
    }

    fn unhandled_upstream(event: &ChannelEvent) {
        let channel = event.channel().id();
        match event {
            ChannelEvent::Exception(e) => warn!(
                channel = %channel,
                code = e.cause().code(),
                error = %e.cause(),
                "exception event reached the end of the pipeline unhandled"
            ),
            other => trace!(channel = %channel, event = ?other, "upstream event not handled"),
        }
    }

    /// 从最后一个下行阶段开始派发下行事件，链路终点为 Sink。
    ///
    /// Handler 返回的错误会写入事件令牌后原样返回。
    pub fn send_downstream(&self, event: ChannelEvent) -> Result<(), ChannelError> {
        let stages = self.snapshot();
        let future = event.future().clone();
        let result = self.downstream_before(&stages, stages.len(), event);
        if let Err(err) = &result {
            future.set_failure(err.clone());
        }
        result
    }

    fn downstream_before(
        &self,
        stages: &Arc<[Stage]>,
        before: usize,
        event: ChannelEvent,
    ) -> Result<(), ChannelError> {
        let next = stages[..before.min(stages.len())]
            .iter()
            .enumerate()
            .rev()
            .find_map(|(idx, stage)| stage.downstream.as_ref().map(|h| (idx, Arc::clone(h))));
        match next {
            Some((index, handler)) => {
                let ctx = HandlerContext {
                    pipeline: self,
                    stages,
                    index,
                    channel: Arc::clone(event.channel()),
                };
                handler.handle_downstream(&ctx, event)
            }
            None => match self.attachment.get() {
                Some(attachment) => {
                    attachment.sink.event_sunk(self, event);
                    Ok(())
                }
                None => Err(ChannelError::Detached),
            },
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.names())
            .field("channel", &self.channel_id())
            .finish()
    }
}

/// Handler 在回调期间可见的上下文。
///
/// 上下文记录了当前阶段在本次派发快照中的位置，`send_upstream`/`send_downstream`
/// 从该位置继续向相应方向传播。
pub struct HandlerContext<'a> {
    pipeline: &'a Pipeline,
    stages: &'a Arc<[Stage]>,
    index: usize,
    channel: Arc<dyn Channel>,
}

impl HandlerContext<'_> {
    /// 当前阶段名称。
    pub fn name(&self) -> &str {
        &self.stages[self.index].name
    }

    /// 当前事件所属通道。
    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    pub fn pipeline(&self) -> &Pipeline {
        self.pipeline
    }

    /// 把事件交给下一个上行阶段。
    pub fn send_upstream(&self, event: ChannelEvent) -> Result<(), ChannelError> {
        self.pipeline.upstream_from(self.stages, self.index + 1, event)
    }

    /// 把事件交给前一个下行阶段；没有更多阶段时交给 Sink。
    pub fn send_downstream(&self, event: ChannelEvent) -> Result<(), ChannelError> {
        self.pipeline.downstream_before(self.stages, self.index, event)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        channels,
        handler::{downstream_fn, upstream_fn},
        test_stubs::StubChannel,
    };

    #[test]
    fn duplicate_names_are_rejected() {
        let pipeline = Pipeline::new();
        pipeline
            .add_last_upstream("a", upstream_fn(|ctx, e| ctx.send_upstream(e)))
            .expect("first registration");
        let err = pipeline
            .add_first_downstream("a", downstream_fn(|ctx, e| ctx.send_downstream(e)))
            .expect_err("duplicate must fail");
        assert!(matches!(err, ChannelError::DuplicateHandler(name) if name == "a"));
        assert_eq!(pipeline.names(), vec!["a".to_owned()]);
    }

    #[test]
    fn stages_run_in_registration_order() {
        let (channel, _sink) = StubChannel::attached();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for name in ["first", "second"] {
            let order = Arc::clone(&order);
            channel
                .pipeline()
                .add_last_upstream(
                    name,
                    upstream_fn(move |ctx, e| {
                        order.lock().push(ctx.name().to_owned());
                        ctx.send_upstream(e)
                    }),
                )
                .expect("register");
        }
        let dyn_channel: Arc<dyn Channel> = channel;
        channels::fire_channel_open(&dyn_channel).expect("fire");
        assert_eq!(*order.lock(), vec!["first".to_owned(), "second".to_owned()]);
    }

    #[test]
    fn downstream_reaches_sink_after_stages() {
        let (channel, sink) = StubChannel::attached();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        channel
            .pipeline()
            .add_last_downstream(
                "count",
                downstream_fn(move |ctx, e| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    ctx.send_downstream(e)
                }),
            )
            .expect("register");
        let dyn_channel: Arc<dyn Channel> = channel;
        let future = channels::close(&dyn_channel);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(sink.events().len(), 1);
        assert!(future.is_success());
    }

    #[test]
    fn downstream_handler_error_fails_token() {
        let (channel, sink) = StubChannel::attached();
        channel
            .pipeline()
            .add_last_downstream(
                "reject",
                downstream_fn(|_, _| Err(ChannelError::handler("reject", "not allowed"))),
            )
            .expect("register");
        let dyn_channel: Arc<dyn Channel> = channel;
        let future = channels::write(&dyn_channel, crate::Message::new(1u8));
        assert!(matches!(future.cause(), Some(ChannelError::Handler { .. })));
        assert!(sink.events().is_empty());
    }

    #[test]
    fn detached_pipeline_fails_downstream_events() {
        let channel: Arc<dyn Channel> = StubChannel::detached();
        let future = channels::close(&channel);
        assert!(matches!(future.cause(), Some(ChannelError::Detached)));
    }

    #[test]
    fn second_attach_is_rejected() {
        let (channel, sink) = StubChannel::attached();
        let err = channel
            .pipeline()
            .attach(ChannelId::next(), sink)
            .expect_err("already attached");
        assert!(matches!(err, ChannelError::AlreadyAttached(id) if id == channel.id()));
    }

    #[test]
    fn removed_stage_is_skipped() {
        let (channel, _sink) = StubChannel::attached();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        channel
            .pipeline()
            .add_last_upstream(
                "gone",
                upstream_fn(move |ctx, e| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    ctx.send_upstream(e)
                }),
            )
            .expect("register");
        assert!(channel.pipeline().remove("gone").is_some());
        assert!(channel.pipeline().get("gone").is_none());
        let dyn_channel: Arc<dyn Channel> = channel;
        channels::fire_channel_open(&dyn_channel).expect("fire");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn add_first_runs_before_existing_stages() {
        let (channel, _sink) = StubChannel::attached();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for (name, first) in [("tail", false), ("head", true)] {
            let order = Arc::clone(&order);
            let stage = upstream_fn(move |ctx, e| {
                order.lock().push(ctx.name().to_owned());
                ctx.send_upstream(e)
            });
            let added = if first {
                channel.pipeline().add_first_upstream(name, stage)
            } else {
                channel.pipeline().add_last_upstream(name, stage)
            };
            added.expect("register");
        }
        assert_eq!(channel.pipeline().names(), vec!["head".to_owned(), "tail".to_owned()]);
        let dyn_channel: Arc<dyn Channel> = channel;
        channels::fire_channel_open(&dyn_channel).expect("fire");
        assert_eq!(*order.lock(), vec!["head".to_owned(), "tail".to_owned()]);
    }

    struct Counting {
        upstream: AtomicUsize,
        downstream: AtomicUsize,
    }

    impl UpstreamHandler for Arc<Counting> {
        fn handle_upstream(
            &self,
            ctx: &HandlerContext<'_>,
            event: ChannelEvent,
        ) -> Result<(), ChannelError> {
            self.upstream.fetch_add(1, Ordering::SeqCst);
            ctx.send_upstream(event)
        }
    }

    impl DownstreamHandler for Arc<Counting> {
        fn handle_downstream(
            &self,
            ctx: &HandlerContext<'_>,
            event: ChannelEvent,
        ) -> Result<(), ChannelError> {
            self.downstream.fetch_add(1, Ordering::SeqCst);
            ctx.send_downstream(event)
        }
    }

    #[test]
    fn duplex_stage_sees_both_directions() {
        let (channel, sink) = StubChannel::attached();
        let counting = Arc::new(Counting {
            upstream: AtomicUsize::new(0),
            downstream: AtomicUsize::new(0),
        });
        channel
            .pipeline()
            .add_last_duplex("both", Arc::clone(&counting))
            .expect("register");
        let stage = channel.pipeline().get("both").expect("stage");
        assert!(stage.upstream().is_some() && stage.downstream().is_some());

        let dyn_channel: Arc<dyn Channel> = channel;
        channels::fire_channel_open(&dyn_channel).expect("fire");
        assert!(channels::close(&dyn_channel).is_success());
        assert_eq!(counting.upstream.load(Ordering::SeqCst), 1);
        assert_eq!(counting.downstream.load(Ordering::SeqCst), 1);
        assert_eq!(sink.events().len(), 1);
    }
}
