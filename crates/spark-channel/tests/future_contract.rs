//! ChannelFuture 单次赋值与监听器通知的契约测试。
//!
//! # 教案级导览
//!
//! - **Why**：完成令牌被绑定、建连、写入、关闭等所有路径共享，若出现二次通知或遗漏通知，
//!   上层会看到重复回调或永远挂起的等待；
//! - **How**：性质测试随机生成解决序列与监听器注册时机；并发测试在两个线程上同时注册与解决；
//! - **What**：
//!   - 第一次解决后，观测值与监听器调用次数不再变化；
//!   - 解决后注册的监听器在注册调用内同步执行，看到已解决的值；
//!   - 任意交错下，每个监听器恰好被调用一次。

use std::{
    sync::{
        Arc, Barrier,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use proptest::prelude::*;
use spark_channel::{ChannelError, ChannelFuture};

#[derive(Clone, Debug)]
enum Step {
    Succeed,
    Fail,
    Listen,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![Just(Step::Succeed), Just(Step::Fail), Just(Step::Listen)]
}

proptest! {
    /// ## 性质一：只有第一次解决生效
    ///
    /// - **意图 (Why)**：令牌的可观测值必须由第一次解决决定；
    /// - **逻辑 (How)**：按随机顺序执行“成功/失败/注册监听器”，记录第一次解决的类型；
    /// - **契约 (What)**：最终 `is_success` 与第一次解决一致，每个监听器计数恰为 1。
    #[test]
    fn first_resolution_wins(steps in prop::collection::vec(step(), 1..32)) {
        let future = ChannelFuture::new();
        let mut first: Option<bool> = None;
        let mut counters = Vec::new();

        for step in &steps {
            match step {
                Step::Succeed => {
                    let changed = future.set_success();
                    prop_assert_eq!(changed, first.is_none(), "只有第一次解决应返回 true");
                    first.get_or_insert(true);
                }
                Step::Fail => {
                    let changed = future.set_failure(ChannelError::Detached);
                    prop_assert_eq!(changed, first.is_none(), "只有第一次解决应返回 true");
                    first.get_or_insert(false);
                }
                Step::Listen => {
                    let counter = Arc::new(AtomicUsize::new(0));
                    let seen = Arc::clone(&counter);
                    let resolved_before = first.is_some();
                    future.add_listener(move |_| {
                        seen.fetch_add(1, Ordering::SeqCst);
                    });
                    if resolved_before {
                        prop_assert_eq!(
                            counter.load(Ordering::SeqCst),
                            1,
                            "已解决时注册应同步回调"
                        );
                    }
                    counters.push(counter);
                }
            }
        }

        // 收尾：确保令牌被解决一次，便于统一检查监听器。
        let closing = future.set_success();
        prop_assert_eq!(closing, first.is_none());
        let expected_success = first.unwrap_or(true);

        prop_assert!(future.is_done());
        prop_assert_eq!(future.is_success(), expected_success);
        prop_assert_eq!(future.cause().is_some(), !expected_success);
        for counter in &counters {
            prop_assert_eq!(counter.load(Ordering::SeqCst), 1, "监听器必须恰好调用一次");
        }
    }
}

/// ## 并发注册与解决
///
/// - **意图 (Why)**：注册线程与解决线程交错时，监听器既不能丢失也不能重复；
/// - **逻辑 (How)**：屏障对齐两个线程，一边连续注册 64 个监听器，一边解决令牌，重复多轮；
/// - **契约 (What)**：每轮结束后计数恰为 64。
#[test]
fn concurrent_registration_never_misses_a_listener() {
    for _ in 0..64 {
        let future = ChannelFuture::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(2));

        let registrar = {
            let future = future.clone();
            let hits = Arc::clone(&hits);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..64 {
                    let hits = Arc::clone(&hits);
                    future.add_listener(move |_| {
                        hits.fetch_add(1, Ordering::SeqCst);
                    });
                }
            })
        };

        barrier.wait();
        future.set_failure(ChannelError::Detached);
        registrar.join().expect("注册线程不应 panic");

        assert_eq!(hits.load(Ordering::SeqCst), 64, "每个监听器必须恰好调用一次");
    }
}

/// ## 跨线程等待
///
/// - **意图 (Why)**：普通线程上的 `wait` 应阻塞到另一线程解决令牌；
/// - **契约 (What)**：返回第一次解决的失败原因。
#[test]
fn wait_observes_resolution_from_another_thread() {
    let future = ChannelFuture::new();
    let resolver = {
        let future = future.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            future.set_failure(ChannelError::Detached);
            future.set_success();
        })
    };
    let outcome = future.wait();
    resolver.join().expect("解决线程不应 panic");
    assert!(matches!(outcome, Err(ChannelError::Detached)), "应观测到第一次解决的失败");
}
