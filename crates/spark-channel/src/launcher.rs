//! Worker 任务启动器。
//!
//! # 设计背景（Why）
//! - 每个已连接通道需要一个专属的阻塞读循环；它们由启动器派发到线程上执行；
//! - 建连往往发生在某个池化线程上，若启动器在池满时阻塞等待空闲线程，
//!   而释放线程又依赖当前线程推进，就会形成死锁。
//!
//! # 逻辑解析（How）
//! - [`BoundedExecutor`] 描述“只在有空闲容量时接受任务”的有界执行器，
//!   [`FixedThreadPool`] 以零容量的 crossbeam 通道实现：`try_send` 成功当且仅当有线程正阻塞在 `recv` 上；
//! - [`DeadlockProofLauncher`] 先尝试有界执行器，被拒绝时升级到 [`ThreadLauncher`] 新建独立线程，
//!   从不阻塞调用线程；
//! - 所有经由启动器执行的任务都会标记所在线程为 IO 线程，
//!   [`ChannelFuture::wait`](crate::ChannelFuture::wait) 据此拒绝在其中阻塞。
//!
//! # 契约说明（What）
//! - `launch` 要么把任务交给某个线程并返回 `Ok`，要么返回 [`ChannelError::Launch`]，任务被丢弃；
//! - 任务 panic 不会终止池内线程，只记录 `warn` 日志。

use std::{
    cell::Cell,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::ChannelError;

/// 可交给启动器执行的任务。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static IO_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// 当前线程是否正在执行启动器派发的任务。
pub fn is_io_thread() -> bool {
    IO_THREAD.with(Cell::get)
}

struct IoThreadGuard {
    previous: bool,
}

impl IoThreadGuard {
    fn enter() -> Self {
        Self {
            previous: IO_THREAD.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for IoThreadGuard {
    fn drop(&mut self) {
        IO_THREAD.with(|flag| flag.set(self.previous));
    }
}

fn run_marked(name: &str, task: Task) {
    let _guard = IoThreadGuard::enter();
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        warn!(worker = name, "launched task panicked");
    }
}

/// 任务启动器合约。
pub trait TaskLauncher: Send + Sync + 'static {
    /// 启动一个具名任务；名称用于线程命名与日志。
    fn launch(&self, name: &str, task: Task) -> Result<(), ChannelError>;
}

/// 有界执行器：仅在存在空闲容量时接受任务，否则原样退回。
pub trait BoundedExecutor: Send + Sync + 'static {
    fn try_execute(&self, task: Task) -> Result<(), Task>;

    /// 当前空闲容量的估计值，仅用于诊断。
    fn available(&self) -> usize;
}

/// 每个任务一个新线程的启动器，永不拒绝（除非操作系统无法创建线程）。
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadLauncher;

impl TaskLauncher for ThreadLauncher {
    fn launch(&self, name: &str, task: Task) -> Result<(), ChannelError> {
        let worker = name.to_owned();
        thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || run_marked(&worker, task))
            .map(drop)
            .map_err(|err| ChannelError::Launch {
                name: name.to_owned(),
                source: Arc::new(err),
            })
    }
}

/// 固定大小的线程池。
///
/// # 契约说明（What）
/// - 任务通道容量为零，`try_execute` 只会把任务交给正在等待的空闲线程；
/// - 池被丢弃后，空闲线程在下一次 `recv` 时退出，正在执行的任务不受影响。
pub struct FixedThreadPool {
    sender: Sender<Task>,
    idle: Arc<AtomicUsize>,
    size: usize,
}

impl FixedThreadPool {
    /// 创建包含 `size` 个线程的池，线程名为 `{prefix}-{序号}`。
    pub fn new(prefix: &str, size: usize) -> Result<Self, ChannelError> {
        let (sender, receiver) = crossbeam_channel::bounded::<Task>(0);
        let idle = Arc::new(AtomicUsize::new(0));
        for idx in 0..size {
            let name = format!("{prefix}-{idx}");
            let receiver = receiver.clone();
            let idle = Arc::clone(&idle);
            let worker = name.clone();
            thread::Builder::new()
                .name(name.clone())
                .spawn(move || Self::serve(&worker, &receiver, &idle))
                .map_err(|err| ChannelError::Launch {
                    name,
                    source: Arc::new(err),
                })?;
        }
        Ok(Self { sender, idle, size })
    }

    fn serve(name: &str, receiver: &Receiver<Task>, idle: &AtomicUsize) {
        loop {
            idle.fetch_add(1, Ordering::AcqRel);
            let next = receiver.recv();
            idle.fetch_sub(1, Ordering::AcqRel);
            match next {
                Ok(task) => run_marked(name, task),
                Err(_) => break,
            }
        }
        debug!(worker = name, "pool thread exiting");
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl BoundedExecutor for FixedThreadPool {
    fn try_execute(&self, task: Task) -> Result<(), Task> {
        match self.sender.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task) | TrySendError::Disconnected(task)) => Err(task),
        }
    }

    fn available(&self) -> usize {
        self.idle.load(Ordering::Acquire)
    }
}

/// 永远不会因执行器饱和而阻塞的启动器。
///
/// # 教案式说明
/// - **意图 (Why)**：建连线程可能正是执行器中的一员；等待执行器腾出容量可能永远等不到；
/// - **逻辑 (How)**：先 `try_execute`，被退回后记录 `debug` 日志并交给后备启动器；
/// - **契约 (What)**：调用线程最多承担一次线程创建的开销，不会等待任何其他任务完成。
pub struct DeadlockProofLauncher<E, L = ThreadLauncher> {
    executor: E,
    fallback: L,
}

impl<E: BoundedExecutor> DeadlockProofLauncher<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            fallback: ThreadLauncher,
        }
    }
}

impl<E: BoundedExecutor, L: TaskLauncher> DeadlockProofLauncher<E, L> {
    pub fn with_fallback(executor: E, fallback: L) -> Self {
        Self { executor, fallback }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }
}

impl<E: BoundedExecutor, L: TaskLauncher> TaskLauncher for DeadlockProofLauncher<E, L> {
    fn launch(&self, name: &str, task: Task) -> Result<(), ChannelError> {
        let worker = name.to_owned();
        let marked: Task = Box::new(move || run_marked(&worker, task));
        match self.executor.try_execute(marked) {
            Ok(()) => Ok(()),
            Err(rejected) => {
                debug!(
                    worker = name,
                    available = self.executor.available(),
                    "executor saturated, escalating to a dedicated thread"
                );
                self.fallback.launch(name, rejected)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc, time::Duration};

    use super::*;

    #[test]
    fn marker_is_scoped_to_launched_tasks() {
        assert!(!is_io_thread());
        let (tx, rx) = mpsc::channel();
        ThreadLauncher
            .launch(
                "marker",
                Box::new(move || {
                    tx.send(is_io_thread()).expect("send");
                }),
            )
            .expect("launch");
        assert!(rx.recv_timeout(Duration::from_secs(5)).expect("task ran"));
        assert!(!is_io_thread());
    }

    #[test]
    fn nested_marking_restores_previous_state() {
        let outer = IoThreadGuard::enter();
        {
            let _inner = IoThreadGuard::enter();
            assert!(is_io_thread());
        }
        assert!(is_io_thread());
        drop(outer);
        assert!(!is_io_thread());
    }

    #[test]
    fn empty_pool_rejects_everything() {
        let pool = FixedThreadPool::new("empty", 0).expect("pool");
        assert_eq!(pool.available(), 0);
        assert!(pool.try_execute(Box::new(|| {})).is_err());
    }
}
