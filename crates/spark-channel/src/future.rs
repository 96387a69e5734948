//! 单次赋值的完成令牌。
//!
//! # 设计背景（Why）
//! - 阻塞式的绑定/建连/写入在调用线程上同步完成，但结果需要被任意线程观察：
//!   发起方可能等待、Handler 可能注册回调、Worker 可能在另一线程关闭通道；
//! - 令牌必须满足“至多一次迁移出 pending”与“监听器恰好通知一次”，即使解决与注册并发发生。
//!
//! # 逻辑解析（How）
//! - `parking_lot::Mutex` 保护结果与监听器队列，`Condvar` 服务阻塞等待；
//! - 解决令牌时在锁内写入结果并取走监听器，释放锁后按注册顺序回调，
//!   避免监听器重入令牌时发生死锁；
//! - 注册监听器时若已解决，则在注册线程上立即同步回调。
//!
//! # 契约说明（What）
//! - `set_success`/`set_failure` 返回是否真正完成了迁移，第二次调用恒为 `false`；
//! - 监听器在解决线程上执行；注册晚于解决时在注册线程上执行；
//! - [`ChannelFuture::wait`] 拒绝在 Worker 线程上阻塞，返回 [`ChannelError::WaitInIoThread`]。

use std::{
    fmt, mem,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{trace, warn};

use crate::{ChannelError, channel::Channel, channels, launcher};

type Listener = Box<dyn FnOnce(&ChannelFuture) + Send + 'static>;

#[derive(Clone, Debug)]
enum Outcome {
    Pending,
    Succeeded,
    Failed(ChannelError),
}

struct FutureState {
    outcome: Outcome,
    listeners: Vec<Listener>,
}

struct FutureInner {
    state: Mutex<FutureState>,
    done: Condvar,
}

/// 异步结果令牌：`pending → succeeded | failed(cause)`，且只迁移一次。
///
/// 克隆得到的是同一令牌的另一个句柄。
#[derive(Clone)]
pub struct ChannelFuture {
    inner: Arc<FutureInner>,
}

impl ChannelFuture {
    /// 创建处于 pending 状态的令牌。
    pub fn new() -> Self {
        Self::with_outcome(Outcome::Pending)
    }

    /// 创建已成功的令牌，用于无需确认的事件（如入站消息）。
    pub fn completed() -> Self {
        Self::with_outcome(Outcome::Succeeded)
    }

    /// 创建已失败的令牌。
    pub fn failed(cause: ChannelError) -> Self {
        Self::with_outcome(Outcome::Failed(cause))
    }

    fn with_outcome(outcome: Outcome) -> Self {
        Self {
            inner: Arc::new(FutureInner {
                state: Mutex::new(FutureState {
                    outcome,
                    listeners: Vec::new(),
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// 将令牌标记为成功；若已解决则不做任何改变并返回 `false`。
    pub fn set_success(&self) -> bool {
        self.resolve(Outcome::Succeeded)
    }

    /// 将令牌标记为失败；若已解决则不做任何改变并返回 `false`。
    pub fn set_failure(&self, cause: ChannelError) -> bool {
        self.resolve(Outcome::Failed(cause))
    }

    fn resolve(&self, outcome: Outcome) -> bool {
        let listeners = {
            let mut state = self.inner.state.lock();
            if !matches!(state.outcome, Outcome::Pending) {
                trace!(current = ?state.outcome, ignored = ?outcome, "future already resolved");
                return false;
            }
            state.outcome = outcome;
            self.inner.done.notify_all();
            mem::take(&mut state.listeners)
        };
        for listener in listeners {
            self.notify(listener);
        }
        true
    }

    fn notify(&self, listener: Listener) {
        if catch_unwind(AssertUnwindSafe(|| listener(self))).is_err() {
            warn!("channel future listener panicked");
        }
    }

    /// 注册监听器。
    ///
    /// - 令牌仍为 pending：入队，并在解决时由解决线程恰好回调一次；
    /// - 令牌已解决：立即在当前线程同步回调。
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&ChannelFuture) + Send + 'static,
    {
        {
            let mut state = self.inner.state.lock();
            if matches!(state.outcome, Outcome::Pending) {
                state.listeners.push(Box::new(listener));
                return;
            }
        }
        self.notify(Box::new(listener));
    }

    /// 构造“失败即关闭通道”的监听器。
    ///
    /// 建连路径在发起阻塞调用前注册它，覆盖经由下游监听链异步暴露的失败。
    pub fn close_on_failure(
        channel: Arc<dyn Channel>,
    ) -> impl FnOnce(&ChannelFuture) + Send + 'static {
        move |future: &ChannelFuture| {
            if future.cause().is_some() {
                channels::close(&channel);
            }
        }
    }

    /// 令牌是否已解决。
    pub fn is_done(&self) -> bool {
        !matches!(self.inner.state.lock().outcome, Outcome::Pending)
    }

    /// 令牌是否已成功。
    pub fn is_success(&self) -> bool {
        matches!(self.inner.state.lock().outcome, Outcome::Succeeded)
    }

    /// 失败原因；pending 或成功时为 `None`。
    pub fn cause(&self) -> Option<ChannelError> {
        match &self.inner.state.lock().outcome {
            Outcome::Failed(cause) => Some(cause.clone()),
            _ => None,
        }
    }

    /// 已解决时返回结果，pending 时返回 `None`。
    pub fn outcome(&self) -> Option<Result<(), ChannelError>> {
        Self::to_result(&self.inner.state.lock().outcome)
    }

    fn to_result(outcome: &Outcome) -> Option<Result<(), ChannelError>> {
        match outcome {
            Outcome::Pending => None,
            Outcome::Succeeded => Some(Ok(())),
            Outcome::Failed(cause) => Some(Err(cause.clone())),
        }
    }

    /// 阻塞等待令牌解决。
    ///
    /// 在启动器派发的 Worker 线程上调用且令牌仍未解决时，直接返回
    /// [`ChannelError::WaitInIoThread`]：该线程正是推动令牌解决所需的线程。
    pub fn wait(&self) -> Result<(), ChannelError> {
        let mut state = self.inner.state.lock();
        if matches!(state.outcome, Outcome::Pending) && launcher::is_io_thread() {
            return Err(ChannelError::WaitInIoThread);
        }
        while matches!(state.outcome, Outcome::Pending) {
            self.inner.done.wait(&mut state);
        }
        Self::to_result(&state.outcome).unwrap_or(Ok(()))
    }

    /// 限时等待；超时仍未解决时返回 `None`。
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), ChannelError>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while matches!(state.outcome, Outcome::Pending) {
            if self.inner.done.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        Self::to_result(&state.outcome)
    }

    /// 判断两个句柄是否指向同一令牌。
    pub fn ptr_eq(&self, other: &ChannelFuture) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for ChannelFuture {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChannelFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ChannelFuture")
            .field("outcome", &state.outcome)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}
