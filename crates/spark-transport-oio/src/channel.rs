use std::{any::Any, net::SocketAddr, sync::Arc};

use parking_lot::{Condvar, Mutex};
use spark_channel::{
    Channel, ChannelConfig, ChannelFuture, ChannelId, ChannelLifecycle, InterestOps, Pipeline,
};

use crate::socket::{InputStream, OutputStream, SocketTransport};

struct Endpoint {
    lifecycle: ChannelLifecycle,
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
}

/// 阻塞式客户端通道。
///
/// # 教案式说明
///
/// ## 意图 (Why)
/// - 持有独占的套接字与读写半部，供 Sink 执行阻塞 IO、供 Worker 运行读循环；
/// - 管线与 Worker 只引用通道，不拥有其 IO 资源。
///
/// ## 逻辑 (How)
/// - 生命周期与地址共用一把锁，[`OioSocketChannel::mark_closed`] 在锁内完成“检查并迁移到 Closed”，
///   保证 Worker 与应用并发关闭时只有一方执行清理；
/// - 兴趣位配合条件变量实现读循环的暂停与恢复，关闭时同样唤醒等待者；
/// - 读半部在 Worker 启动时整体移交，写半部留在通道内由写入方串行使用。
///
/// ## 契约 (What)
/// - 读半部、写半部仅在建连成功后存在，关闭后全部释放；
/// - 生命周期只前进，`Closed` 为终态。
pub struct OioSocketChannel {
    id: ChannelId,
    pipeline: Arc<Pipeline>,
    config: ChannelConfig,
    socket: Box<dyn SocketTransport>,
    endpoint: Mutex<Endpoint>,
    interest: Mutex<InterestOps>,
    interest_changed: Condvar,
    input: Mutex<Option<InputStream>>,
    output: Mutex<Option<OutputStream>>,
    close_future: ChannelFuture,
}

impl OioSocketChannel {
    pub(crate) fn new(
        pipeline: Arc<Pipeline>,
        config: ChannelConfig,
        socket: Box<dyn SocketTransport>,
    ) -> Self {
        Self {
            id: ChannelId::next(),
            pipeline,
            config,
            socket,
            endpoint: Mutex::new(Endpoint {
                lifecycle: ChannelLifecycle::Open,
                local: None,
                remote: None,
            }),
            interest: Mutex::new(InterestOps::READ),
            interest_changed: Condvar::new(),
            input: Mutex::new(None),
            output: Mutex::new(None),
            close_future: ChannelFuture::new(),
        }
    }

    /// 从通用通道句柄取回具体类型。
    pub fn downcast(channel: &Arc<dyn Channel>) -> Option<Arc<Self>> {
        Arc::clone(channel).into_any().downcast::<Self>().ok()
    }

    pub(crate) fn socket(&self) -> &dyn SocketTransport {
        self.socket.as_ref()
    }

    /// 记录绑定结果；通道已关闭或状态无法前进时返回 `false`。
    pub(crate) fn set_bound(&self, local: SocketAddr) -> bool {
        let mut endpoint = self.endpoint.lock();
        if !endpoint.lifecycle.can_advance_to(ChannelLifecycle::Bound) {
            return false;
        }
        endpoint.lifecycle = ChannelLifecycle::Bound;
        endpoint.local = Some(local);
        true
    }

    /// 记录建连结果并安装读写半部；通道已关闭时返回 `false`，读写半部随之丢弃。
    pub(crate) fn set_connected(
        &self,
        local: SocketAddr,
        remote: SocketAddr,
        input: InputStream,
        output: OutputStream,
    ) -> bool {
        let mut endpoint = self.endpoint.lock();
        if !endpoint.lifecycle.can_advance_to(ChannelLifecycle::Connected) {
            return false;
        }
        endpoint.lifecycle = ChannelLifecycle::Connected;
        endpoint.local = Some(local);
        endpoint.remote = Some(remote);
        *self.input.lock() = Some(input);
        *self.output.lock() = Some(output);
        true
    }

    /// 迁移到 `Closed`，返回迁移前的状态；已关闭时返回 `None`。
    ///
    /// 返回 `Some` 的调用方负责释放资源并触发关闭事件。
    pub(crate) fn mark_closed(&self) -> Option<ChannelLifecycle> {
        let previous = {
            let mut endpoint = self.endpoint.lock();
            if endpoint.lifecycle == ChannelLifecycle::Closed {
                return None;
            }
            std::mem::replace(&mut endpoint.lifecycle, ChannelLifecycle::Closed)
        };
        // 持有兴趣锁再通知，避免与 wait_until_readable 的检查交错而丢失唤醒。
        let _interest = self.interest.lock();
        self.interest_changed.notify_all();
        Some(previous)
    }

    /// 丢弃通道内残留的读写半部。
    pub(crate) fn release_streams(&self) {
        self.input.lock().take();
        self.output.lock().take();
    }

    pub(crate) fn take_input(&self) -> Option<InputStream> {
        self.input.lock().take()
    }

    pub(crate) fn output(&self) -> &Mutex<Option<OutputStream>> {
        &self.output
    }

    /// 阻塞直到通道可读或关闭；返回通道是否仍然打开。
    pub(crate) fn wait_until_readable(&self) -> bool {
        let mut interest = self.interest.lock();
        loop {
            if !self.is_open() {
                return false;
            }
            if interest.is_readable() {
                return true;
            }
            self.interest_changed.wait(&mut interest);
        }
    }

    /// 替换兴趣位，返回是否发生变化。
    pub(crate) fn apply_interest_ops(&self, ops: InterestOps) -> bool {
        let mut interest = self.interest.lock();
        if *interest == ops {
            return false;
        }
        *interest = ops;
        self.interest_changed.notify_all();
        true
    }
}

impl Channel for OioSocketChannel {
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
        self.endpoint.lock().lifecycle
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.endpoint.lock().local
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.endpoint.lock().remote
    }

    fn interest_ops(&self) -> InterestOps {
        *self.interest.lock()
    }

    fn close_future(&self) -> ChannelFuture {
        self.close_future.clone()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
