//! 阻塞式客户端传输 Sink。
//!
//! # 设计背景（Why）
//! - 下行事件到达管线末端后，由 Sink 在发起线程上执行阻塞的绑定、建连、写入与关闭，
//!   并驱动通道的生命周期状态机；
//! - Sink 的入口从不返回错误：所有失败都转化为“令牌失败 + 上行异常事件”，且资源清理先于事件触发。
//!
//! # 逻辑解析（How）
//! - 状态事件按取值分派：`OPEN(false)`、`BOUND(None)`、`CONNECTED(None)` 走关闭路径；
//!   `BOUND(Some)` 绑定；`CONNECTED(Some)` 建连；`INTEREST_OPS` 交给 Worker 的兴趣位路径；
//! - 建连前注册“失败即关闭”监听器；建连过程记录 `connected` 与 `worker_started` 两个进度标志，
//!   若套接字已连上却没能启动 Worker，则显式关闭以释放套接字。
//!
//! # 契约说明（What）
//! - 未建连的通道建连成功时，`BOUND` 严格先于 `CONNECTED` 触发；已绑定的通道只触发 `CONNECTED`；
//! - 绑定失败不关闭通道；
//! - Worker 通过注入的 [`TaskLauncher`] 启动，启动器负责在饱和时升级而不是阻塞。

use std::{net::SocketAddr, sync::Arc, time::Duration};

use spark_channel::{
    Channel, ChannelError, ChannelEvent, ChannelFuture, Pipeline, PipelineSink, StateValue,
    TaskLauncher, channels,
};
use tracing::{debug, trace};

use crate::{
    channel::OioSocketChannel,
    frame::{ChunkDecoder, FrameDecoder},
    worker::{self, OioWorker, fail},
};

/// 为每个新连接创建分帧器。
pub type DecoderFactory = Arc<dyn Fn() -> Box<dyn FrameDecoder> + Send + Sync>;

/// 建连过程中的进度标志。
#[derive(Clone, Copy, Debug, Default)]
struct ConnectProgress {
    connected: bool,
    worker_started: bool,
}

/// 阻塞式客户端 Sink。
pub struct OioClientSink {
    launcher: Arc<dyn TaskLauncher>,
    decoders: DecoderFactory,
}

impl OioClientSink {
    pub fn new(launcher: Arc<dyn TaskLauncher>) -> Self {
        Self::with_decoder(
            launcher,
            Arc::new(|| Box::new(ChunkDecoder) as Box<dyn FrameDecoder>),
        )
    }

    pub fn with_decoder(launcher: Arc<dyn TaskLauncher>, decoders: DecoderFactory) -> Self {
        Self { launcher, decoders }
    }

    fn bind(&self, channel: &Arc<OioSocketChannel>, future: &ChannelFuture, local: SocketAddr) {
        let handle: Arc<dyn Channel> = channel.clone();
        if let Err(cause) = Self::try_bind(channel, &handle, future, local) {
            fail(&handle, future, cause);
        }
    }

    fn try_bind(
        channel: &Arc<OioSocketChannel>,
        handle: &Arc<dyn Channel>,
        future: &ChannelFuture,
        local: SocketAddr,
    ) -> Result<(), ChannelError> {
        if !channel.is_open() {
            return Err(ChannelError::Closed(channel.id()));
        }
        let socket = channel.socket();
        socket
            .configure(&channel.config().snapshot())
            .and_then(|()| socket.bind(local))
            .map_err(|err| ChannelError::bind(local, err))?;
        let realized = socket
            .local_addr()
            .map_err(|err| ChannelError::io("local address", err))?;
        if !channel.set_bound(realized) {
            return Err(ChannelError::Closed(channel.id()));
        }
        future.set_success();
        debug!(channel = %channel.id(), addr = %realized, "bound");
        channels::fire_channel_bound(handle, realized)
    }

    fn connect(&self, channel: &Arc<OioSocketChannel>, future: &ChannelFuture, remote: SocketAddr) {
        let handle: Arc<dyn Channel> = channel.clone();
        let bound = channel.is_bound();
        let mut progress = ConnectProgress::default();

        future.add_listener(ChannelFuture::close_on_failure(Arc::clone(&handle)));

        if let Err(cause) =
            self.try_connect(channel, &handle, future, remote, bound, &mut progress)
        {
            fail(&handle, future, cause);
        }
        if progress.connected && !progress.worker_started {
            debug!(channel = %channel.id(), "connected without a worker, releasing socket");
            worker::close(channel, future);
        }
    }

    fn try_connect(
        &self,
        channel: &Arc<OioSocketChannel>,
        handle: &Arc<dyn Channel>,
        future: &ChannelFuture,
        remote: SocketAddr,
        bound: bool,
        progress: &mut ConnectProgress,
    ) -> Result<(), ChannelError> {
        if !channel.is_open() {
            return Err(ChannelError::Closed(channel.id()));
        }
        let options = channel.config().snapshot();
        let timeout = options.connect_timeout();
        let socket = channel.socket();
        socket
            .configure(&options)
            .and_then(|()| socket.connect(remote, timeout))
            .map_err(|err| ChannelError::connect(remote, timeout.unwrap_or(Duration::ZERO), err))?;
        progress.connected = true;

        let (input, output) = socket
            .open_streams()
            .map_err(|err| ChannelError::io("open streams", err))?;
        let local = socket
            .local_addr()
            .map_err(|err| ChannelError::io("local address", err))?;
        let peer = socket.remote_addr().unwrap_or(remote);
        if !channel.set_connected(local, peer, input, output) {
            return Err(ChannelError::Closed(channel.id()));
        }

        future.set_success();
        debug!(channel = %channel.id(), local = %local, remote = %peer, "connected");
        if !bound {
            channels::fire_channel_bound(handle, local)?;
        }
        channels::fire_channel_connected(handle, peer)?;

        let task = OioWorker::new(Arc::clone(channel), (self.decoders)());
        self.launcher.launch(
            &format!("spark-oio-worker-{}", channel.id()),
            Box::new(move || task.run()),
        )?;
        progress.worker_started = true;
        Ok(())
    }
}

impl PipelineSink for OioClientSink {
    fn event_sunk(&self, _pipeline: &Pipeline, event: ChannelEvent) {
        let future = event.future().clone();
        let Some(channel) = OioSocketChannel::downcast(event.channel()) else {
            let handle = Arc::clone(event.channel());
            fail(&handle, &future, ChannelError::UnsupportedChannel(handle.id()));
            return;
        };

        match &event {
            ChannelEvent::State(state) => match state.value() {
                StateValue::Open(false) | StateValue::Bound(None) | StateValue::Connected(None) => {
                    worker::close(&channel, &future)
                }
                StateValue::Open(true) => {
                    trace!(channel = %channel.id(), "downstream OPEN(true) ignored");
                    future.set_success();
                }
                StateValue::Bound(Some(local)) => self.bind(&channel, &future, local),
                StateValue::Connected(Some(remote)) => self.connect(&channel, &future, remote),
                StateValue::InterestOps(ops) => worker::set_interest_ops(&channel, &future, ops),
            },
            ChannelEvent::Message(message) => worker::write(&channel, &future, message.message()),
            ChannelEvent::Exception(_) | ChannelEvent::WriteCompleted(_) => {
                trace!(channel = %channel.id(), event = ?event, "upstream-only event sunk");
                future.set_success();
            }
        }
    }
}
