use std::sync::Arc;

use spark_channel::{
    Channel, ChannelConfig, ChannelError, ChannelOptions, Pipeline, TaskLauncher, channels,
};
use tracing::debug;

use crate::{
    channel::OioSocketChannel,
    sink::{DecoderFactory, OioClientSink},
    socket::{SocketTransport, TcpSocket},
};

/// 阻塞式客户端通道工厂。
///
/// # 契约说明（What）
/// - 所有由同一工厂创建的通道共享一个 Sink，因而共享 Worker 启动器与分帧器工厂；
/// - 新通道附着到调用方提供的管线，并立即上行 `OPEN(true)`；
/// - 管线已附着到其他通道时返回 [`ChannelError::AlreadyAttached`]。
pub struct OioClientChannelFactory {
    sink: Arc<OioClientSink>,
    options: ChannelOptions,
}

impl OioClientChannelFactory {
    pub fn new(launcher: Arc<dyn TaskLauncher>) -> Self {
        Self {
            sink: Arc::new(OioClientSink::new(launcher)),
            options: ChannelOptions::default(),
        }
    }

    pub fn with_decoder(launcher: Arc<dyn TaskLauncher>, decoders: DecoderFactory) -> Self {
        Self {
            sink: Arc::new(OioClientSink::with_decoder(launcher, decoders)),
            options: ChannelOptions::default(),
        }
    }

    /// 新通道的初始选项。
    pub fn options(mut self, options: ChannelOptions) -> Self {
        self.options = options;
        self
    }

    /// 以真实 TCP 套接字创建通道。
    pub fn new_channel(
        &self,
        pipeline: Arc<Pipeline>,
    ) -> Result<Arc<OioSocketChannel>, ChannelError> {
        self.new_channel_with(pipeline, Box::new(TcpSocket::new()))
    }

    /// 以指定的套接字实现创建通道。
    pub fn new_channel_with(
        &self,
        pipeline: Arc<Pipeline>,
        socket: Box<dyn SocketTransport>,
    ) -> Result<Arc<OioSocketChannel>, ChannelError> {
        let channel = Arc::new(OioSocketChannel::new(
            pipeline,
            ChannelConfig::new(self.options.clone()),
            socket,
        ));
        channel.pipeline().attach(channel.id(), self.sink.clone())?;
        debug!(channel = %channel.id(), "channel created");
        let handle: Arc<dyn Channel> = channel.clone();
        channels::fire_channel_open(&handle)?;
        Ok(channel)
    }
}
