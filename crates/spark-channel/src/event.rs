//! 管线事件模型。
//!
//! # 设计背景（Why）
//! - 上行（传输 → 应用）与下行（应用 → 传输）共用一套带标签的事件：消息事件、状态事件、
//!   异常事件与写完成事件；
//! - 每个事件都携带完成令牌，下行事件借此回报结果，上行事件通常携带已完成的令牌。
//!
//! # 契约说明（What）
//! - [`StateEvent`] 的取值与状态一一对应，通过 [`StateValue`] 在类型层面排除非法组合：
//!   `OPEN` 携带布尔值（`false` 表示拆除），`BOUND`/`CONNECTED` 携带可选地址
//!   （`None` 表示解绑/断开），`INTEREST_OPS` 携带兴趣位；
//! - [`Message`] 是不透明载荷，按引用计数共享，可通过 [`Message::ptr_eq`] 观察同一性。

use std::{
    any::{Any, type_name},
    fmt,
    net::SocketAddr,
    sync::Arc,
};

use crate::{ChannelError, channel::Channel, future::ChannelFuture};

/// 不透明的消息载荷。
///
/// 克隆只增加引用计数；两个句柄指向同一载荷时 [`Message::ptr_eq`] 为真。
#[derive(Clone)]
pub struct Message {
    payload: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Message {
    /// 包装任意载荷。
    pub fn new<T>(payload: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            payload: Arc::new(payload),
            type_name: type_name::<T>(),
        }
    }

    /// 按具体类型借用载荷。
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// 载荷是否为类型 `T`。
    pub fn is<T: Any>(&self) -> bool {
        self.payload.is::<T>()
    }

    /// 载荷的类型名，仅用于诊断。
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// 两个消息是否共享同一载荷。
    pub fn ptr_eq(&self, other: &Message) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// 兴趣位掩码，控制读循环是否活跃（唯一的背压手段）。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InterestOps(u32);

impl InterestOps {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(1);
    pub const WRITE: Self = Self(4);
    pub const READ_WRITE: Self = Self(1 | 4);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_readable(self) -> bool {
        self.0 & Self::READ.0 != 0
    }

    /// 返回设置/清除读位后的掩码，其余位保持不变。
    pub const fn with_readable(self, readable: bool) -> Self {
        if readable {
            Self(self.0 | Self::READ.0)
        } else {
            Self(self.0 & !Self::READ.0)
        }
    }
}

impl fmt::Debug for InterestOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterestOps({:#x})", self.0)
    }
}

/// 状态事件所描述的状态维度。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Open,
    Bound,
    Connected,
    InterestOps,
}

/// 状态事件的取值，与 [`ChannelState`] 一一对应。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateValue {
    /// `false` 表示拆除通道。
    Open(bool),
    /// `None` 表示解绑。
    Bound(Option<SocketAddr>),
    /// `None` 表示断开。
    Connected(Option<SocketAddr>),
    InterestOps(InterestOps),
}

impl StateValue {
    /// 取值对应的状态维度。
    pub fn state(&self) -> ChannelState {
        match self {
            Self::Open(_) => ChannelState::Open,
            Self::Bound(_) => ChannelState::Bound,
            Self::Connected(_) => ChannelState::Connected,
            Self::InterestOps(_) => ChannelState::InterestOps,
        }
    }
}

/// 消息事件：上行为读到的消息，下行为待写出的消息。
pub struct MessageEvent {
    channel: Arc<dyn Channel>,
    future: ChannelFuture,
    message: Message,
    remote_addr: Option<SocketAddr>,
}

impl MessageEvent {
    pub fn new(
        channel: Arc<dyn Channel>,
        future: ChannelFuture,
        message: Message,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            channel,
            future,
            message,
            remote_addr,
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn future(&self) -> &ChannelFuture {
        &self.future
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

/// 状态事件：下行表示请求迁移，上行表示迁移已发生。
pub struct StateEvent {
    channel: Arc<dyn Channel>,
    future: ChannelFuture,
    value: StateValue,
}

impl StateEvent {
    pub fn new(channel: Arc<dyn Channel>, future: ChannelFuture, value: StateValue) -> Self {
        Self {
            channel,
            future,
            value,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.value.state()
    }

    pub fn value(&self) -> StateValue {
        self.value
    }

    pub fn future(&self) -> &ChannelFuture {
        &self.future
    }
}

/// 异常事件：仅上行，承载传输层捕获的失败。
pub struct ExceptionEvent {
    channel: Arc<dyn Channel>,
    future: ChannelFuture,
    cause: ChannelError,
}

impl ExceptionEvent {
    pub fn new(channel: Arc<dyn Channel>, cause: ChannelError) -> Self {
        Self {
            channel,
            future: ChannelFuture::completed(),
            cause,
        }
    }

    pub fn cause(&self) -> &ChannelError {
        &self.cause
    }
}

/// 写完成事件：仅上行，报告一次写出的字节数。
pub struct WriteCompletionEvent {
    channel: Arc<dyn Channel>,
    future: ChannelFuture,
    written: u64,
}

impl WriteCompletionEvent {
    pub fn new(channel: Arc<dyn Channel>, written: u64) -> Self {
        Self {
            channel,
            future: ChannelFuture::completed(),
            written,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

/// 在管线中流动的事件。
pub enum ChannelEvent {
    Message(MessageEvent),
    State(StateEvent),
    Exception(ExceptionEvent),
    WriteCompleted(WriteCompletionEvent),
}

impl ChannelEvent {
    /// 事件所属通道。
    pub fn channel(&self) -> &Arc<dyn Channel> {
        match self {
            Self::Message(e) => &e.channel,
            Self::State(e) => &e.channel,
            Self::Exception(e) => &e.channel,
            Self::WriteCompleted(e) => &e.channel,
        }
    }

    /// 事件关联的完成令牌。
    pub fn future(&self) -> &ChannelFuture {
        match self {
            Self::Message(e) => &e.future,
            Self::State(e) => &e.future,
            Self::Exception(e) => &e.future,
            Self::WriteCompleted(e) => &e.future,
        }
    }
}

impl fmt::Debug for ChannelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.channel().id();
        match self {
            Self::Message(e) => f
                .debug_struct("MessageEvent")
                .field("channel", &id)
                .field("message", &e.message)
                .field("remote_addr", &e.remote_addr)
                .finish(),
            Self::State(e) => f
                .debug_struct("StateEvent")
                .field("channel", &id)
                .field("value", &e.value)
                .finish(),
            Self::Exception(e) => f
                .debug_struct("ExceptionEvent")
                .field("channel", &id)
                .field("cause", &e.cause)
                .finish(),
            Self::WriteCompleted(e) => f
                .debug_struct("WriteCompletionEvent")
                .field("channel", &id)
                .field("written", &e.written)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_identity_survives_clone() {
        let original = Message::new(String::from("abc"));
        let copy = original.clone();
        let other = Message::new(String::from("abc"));
        assert!(original.ptr_eq(&copy));
        assert!(!original.ptr_eq(&other));
        assert_eq!(copy.downcast_ref::<String>().map(String::as_str), Some("abc"));
        assert!(copy.downcast_ref::<u32>().is_none());
    }

    #[test]
    fn interest_ops_toggle_read_bit_only() {
        let ops = InterestOps::READ_WRITE.with_readable(false);
        assert_eq!(ops, InterestOps::WRITE);
        assert!(!ops.is_readable());
        assert_eq!(ops.with_readable(true), InterestOps::READ_WRITE);
    }

    #[test]
    fn state_value_maps_to_state() {
        assert_eq!(StateValue::Open(false).state(), ChannelState::Open);
        assert_eq!(StateValue::Bound(None).state(), ChannelState::Bound);
        assert_eq!(StateValue::Connected(None).state(), ChannelState::Connected);
        assert_eq!(
            StateValue::InterestOps(InterestOps::NONE).state(),
            ChannelState::InterestOps
        );
    }
}
