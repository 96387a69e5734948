use std::{
    any::Any,
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{config::ChannelConfig, event::InterestOps, future::ChannelFuture, pipeline::Pipeline};

/// 通道在进程内的唯一标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    /// 分配下一个标识，单调递增且进程内不重复。
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// 原始数值，供日志与调试使用。
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// 通道生命周期状态。
///
/// # 教案式说明
/// - **意图 (Why)**：阻塞式传输需要一个单调推进的状态机来判定“能否继续绑定/建连/写入”；
/// - **逻辑 (How)**：`Open → Bound（可选）→ Connected → Closed`，其中 `Closed`
///   可由任意状态进入，且进入后不可离开；
/// - **契约 (What)**：`Open` 表示通道已创建、尚未绑定本地地址。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelLifecycle {
    /// 已创建，尚未绑定。
    Open,
    /// 已绑定本地地址。
    Bound,
    /// 已与远端建立连接。
    Connected,
    /// 已关闭（终态）。
    Closed,
}

impl ChannelLifecycle {
    fn rank(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Bound => 1,
            Self::Connected => 2,
            Self::Closed => 3,
        }
    }

    /// 判断从 `self` 迁移到 `next` 是否合法。
    ///
    /// 状态只允许前进；`Closed` 可从任意非终态进入。
    pub fn can_advance_to(self, next: ChannelLifecycle) -> bool {
        self != Self::Closed && next.rank() > self.rank()
    }
}

/// 管线视角下的通道契约。
///
/// # 教案式说明
///
/// ## 意图 (Why)
/// - Handler 与事件只需要“身份 + 状态 + 配置 + 所属管线”，不应感知具体套接字类型；
/// - 传输实现（如阻塞 TCP）持有真实 IO 资源，并通过该 Trait 暴露只读视图。
///
/// ## 契约 (What)
/// - `pipeline`：通道生命周期内绑定的唯一管线；
/// - `lifecycle`：当前状态，满足 [`ChannelLifecycle::can_advance_to`] 的单调约束；
/// - `close_future`：通道关闭时解决为成功的令牌，可用于等待连接结束；
/// - `into_any`：传输实现据此取回自身的具体类型。
///
/// ## 注意事项 (Trade-offs)
/// - `into_any` 需要实现方返回 `self`，这是在对象安全前提下支持向下转型的最小代价。
pub trait Channel: Send + Sync + 'static {
    /// 通道标识。
    fn id(&self) -> ChannelId;

    /// 所属管线。
    fn pipeline(&self) -> &Arc<Pipeline>;

    /// 通道配置。
    fn config(&self) -> &ChannelConfig;

    /// 当前生命周期状态。
    fn lifecycle(&self) -> ChannelLifecycle;

    /// 本地地址，绑定或建连后可用。
    fn local_addr(&self) -> Option<SocketAddr>;

    /// 远端地址，建连后可用。
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// 当前兴趣位。
    fn interest_ops(&self) -> InterestOps;

    /// 关闭令牌。
    fn close_future(&self) -> ChannelFuture;

    /// 转为 `Any`，供传输实现向下转型。
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn is_open(&self) -> bool {
        self.lifecycle() != ChannelLifecycle::Closed
    }

    fn is_bound(&self) -> bool {
        matches!(self.lifecycle(), ChannelLifecycle::Bound | ChannelLifecycle::Connected)
    }

    fn is_connected(&self) -> bool {
        self.lifecycle() == ChannelLifecycle::Connected
    }

    fn is_readable(&self) -> bool {
        self.interest_ops().is_readable()
    }
}

impl fmt::Debug for dyn Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id())
            .field("lifecycle", &self.lifecycle())
            .field("local_addr", &self.local_addr())
            .field("remote_addr", &self.remote_addr())
            .finish()
    }
}
