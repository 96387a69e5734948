//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 汇总通道生命周期（绑定、建连、读写、关闭）与 Handler 链路上可能出现的失败，
//!   让 [`ChannelFuture`](crate::ChannelFuture) 与上行异常事件共享同一种错误表示；
//! - 每个变体都映射到稳定的点分错误码，便于日志检索与告警聚合。
//!
//! ## 设计要求（What）
//! - 错误需要同时写入完成令牌并随异常事件上行，因此类型必须可 `Clone`：
//!   底层 `io::Error` 统一以 `Arc` 包裹；
//! - [`ChannelError::is_transport`] 区分“传输层失败”与“变换/Handler 失败”，
//!   两者在管线中的传播路径不同（前者进入令牌 + 异常事件，后者同步返回给派发调用方）。

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use thiserror::Error;

use crate::channel::ChannelId;

/// 稳定错误码集合。
pub mod codes {
    pub const BIND_FAILED: &str = "spark.channel.bind_failed";
    pub const CONNECT_FAILED: &str = "spark.channel.connect_failed";
    pub const CONNECT_TIMEOUT: &str = "spark.channel.connect_timeout";
    pub const IO_FAILED: &str = "spark.channel.io_failed";
    pub const CLOSED: &str = "spark.channel.closed";
    pub const NOT_YET_CONNECTED: &str = "spark.channel.not_yet_connected";
    pub const UNSUPPORTED_MESSAGE: &str = "spark.channel.unsupported_message";
    pub const UNSUPPORTED_CHANNEL: &str = "spark.channel.unsupported_channel";
    pub const LAUNCH_FAILED: &str = "spark.channel.launch_failed";
    pub const WAIT_IN_IO_THREAD: &str = "spark.channel.wait_in_io_thread";
    pub const DETACHED: &str = "spark.pipeline.detached";
    pub const ALREADY_ATTACHED: &str = "spark.pipeline.already_attached";
    pub const DUPLICATE_HANDLER: &str = "spark.pipeline.duplicate_handler";
    pub const TRANSFORM_FAILED: &str = "spark.pipeline.transform_failed";
    pub const HANDLER_FAILED: &str = "spark.pipeline.handler_failed";
}

/// 通道与管线的统一错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：阻塞式传输的每个失败路径都要“解决令牌 + 上行异常事件”，
///   需要一个既能跨线程移动、又能廉价复制的错误值；
/// - **契约 (What)**：
///   - `Bind`/`Connect`/`ConnectTimeout`/`Io` 携带底层 IO 原因；
///   - `Transform`/`Handler` 由 Handler 返回，沿派发调用栈同步传播；
///   - 其余变体描述通道状态违例（已关闭、尚未连接、消息类型不支持等）。
/// - **权衡 (Trade-offs)**：`detail` 字段使用 `String` 保存 Handler 提供的描述，
///   放弃保留原始错误类型，换取 `Clone + Send + Sync` 的简单约束。
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ChannelError {
    #[error("bind to {addr} failed: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },

    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("channel {0} is closed")]
    Closed(ChannelId),

    #[error("channel {0} is not yet connected")]
    NotYetConnected(ChannelId),

    #[error("unsupported message type `{type_name}` for write")]
    UnsupportedMessage { type_name: &'static str },

    #[error("channel {0} is not handled by this transport")]
    UnsupportedChannel(ChannelId),

    #[error("failed to launch worker `{name}`: {source}")]
    Launch {
        name: String,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("blocking wait on a channel future from an I/O worker thread would deadlock")]
    WaitInIoThread,

    #[error("pipeline is not attached to a sink")]
    Detached,

    #[error("pipeline is already attached to channel {0}")]
    AlreadyAttached(ChannelId),

    #[error("handler name `{0}` is already registered")]
    DuplicateHandler(String),

    #[error("transform stage `{stage}` failed: {detail}")]
    Transform { stage: String, detail: String },

    #[error("handler `{handler}` failed: {detail}")]
    Handler { handler: String, detail: String },
}

impl ChannelError {
    /// 构造绑定失败错误。
    pub fn bind(addr: SocketAddr, error: io::Error) -> Self {
        Self::Bind {
            addr,
            source: Arc::new(error),
        }
    }

    /// 构造建连失败错误；`TimedOut` 会被归类为 [`ChannelError::ConnectTimeout`]。
    pub fn connect(addr: SocketAddr, timeout: Duration, error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::TimedOut => Self::ConnectTimeout { addr, timeout },
            _ => Self::Connect {
                addr,
                source: Arc::new(error),
            },
        }
    }

    /// 构造一般 IO 失败错误，`op` 为人类可读的操作名，例如 `"read"`。
    pub fn io(op: &'static str, error: io::Error) -> Self {
        Self::Io {
            op,
            source: Arc::new(error),
        }
    }

    /// 构造变换阶段失败错误。
    pub fn transform(stage: impl Into<String>, detail: impl ToString) -> Self {
        Self::Transform {
            stage: stage.into(),
            detail: detail.to_string(),
        }
    }

    /// 构造 Handler 失败错误。
    pub fn handler(handler: impl Into<String>, detail: impl ToString) -> Self {
        Self::Handler {
            handler: handler.into(),
            detail: detail.to_string(),
        }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Bind { .. } => codes::BIND_FAILED,
            Self::Connect { .. } => codes::CONNECT_FAILED,
            Self::ConnectTimeout { .. } => codes::CONNECT_TIMEOUT,
            Self::Io { .. } => codes::IO_FAILED,
            Self::Closed(_) => codes::CLOSED,
            Self::NotYetConnected(_) => codes::NOT_YET_CONNECTED,
            Self::UnsupportedMessage { .. } => codes::UNSUPPORTED_MESSAGE,
            Self::UnsupportedChannel(_) => codes::UNSUPPORTED_CHANNEL,
            Self::Launch { .. } => codes::LAUNCH_FAILED,
            Self::WaitInIoThread => codes::WAIT_IN_IO_THREAD,
            Self::Detached => codes::DETACHED,
            Self::AlreadyAttached(_) => codes::ALREADY_ATTACHED,
            Self::DuplicateHandler(_) => codes::DUPLICATE_HANDLER,
            Self::Transform { .. } => codes::TRANSFORM_FAILED,
            Self::Handler { .. } => codes::HANDLER_FAILED,
        }
    }

    /// 判断错误是否源自传输层（Sink 或 Worker）。
    ///
    /// 传输层错误经由完成令牌与上行异常事件暴露；其余错误由派发调用同步返回。
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Bind { .. }
                | Self::Connect { .. }
                | Self::ConnectTimeout { .. }
                | Self::Io { .. }
                | Self::Closed(_)
                | Self::NotYetConnected(_)
                | Self::UnsupportedMessage { .. }
                | Self::UnsupportedChannel(_)
                | Self::Launch { .. }
        )
    }

    /// 若错误携带底层 IO 原因，返回其 [`io::ErrorKind`]。
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Bind { source, .. }
            | Self::Connect { source, .. }
            | Self::Io { source, .. }
            | Self::Launch { source, .. } => Some(source.kind()),
            Self::ConnectTimeout { .. } => Some(io::ErrorKind::TimedOut),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_timeout_is_classified() {
        let addr: SocketAddr = "127.0.0.1:9".parse().expect("addr");
        let err = ChannelError::connect(
            addr,
            Duration::from_millis(30),
            io::Error::from(io::ErrorKind::TimedOut),
        );
        assert!(matches!(err, ChannelError::ConnectTimeout { .. }));
        assert_eq!(err.code(), codes::CONNECT_TIMEOUT);
        assert_eq!(err.io_kind(), Some(io::ErrorKind::TimedOut));
        assert!(err.is_transport());
    }

    #[test]
    fn transform_errors_are_not_transport_errors() {
        let err = ChannelError::transform("upper", "not ascii");
        assert!(!err.is_transport());
        assert_eq!(err.code(), codes::TRANSFORM_FAILED);
        assert_eq!(err.to_string(), "transform stage `upper` failed: not ascii");
    }

    #[test]
    fn cloned_error_keeps_source_chain() {
        let err = ChannelError::io("read", io::Error::from(io::ErrorKind::ConnectionReset));
        let copy = err.clone();
        let source = std::error::Error::source(&copy).expect("source");
        assert_eq!(
            source.to_string(),
            io::Error::from(io::ErrorKind::ConnectionReset).to_string()
        );
        assert_eq!(copy.io_kind(), Some(io::ErrorKind::ConnectionReset));
    }
}
