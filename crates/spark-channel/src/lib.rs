#![doc = r#"
# spark-channel

## 设计动机（Why）
- **定位**：该 crate 定义事件驱动通道的传输无关契约：完成令牌、事件模型、
  Handler 管线、一对一变换阶段以及 Worker 启动器。
- **架构角色**：传输实现（如 `spark-transport-oio`）提供 [`PipelineSink`] 与
  [`Channel`] 的具体类型，应用只与本 crate 的管线与令牌交互。
- **设计理念**：上行（传输 → 应用）与下行（应用 → 传输）共享同一套事件；
  传输层失败一律体现为“令牌失败 + 上行异常事件”，Handler/变换失败沿派发调用栈同步返回。

## 核心契约（What）
- [`ChannelFuture`]：至多一次迁移出 pending，监听器恰好通知一次；
- [`Pipeline`]：上行从首个阶段开始，下行从末尾开始并终止于 Sink；
- [`TransformHandler`]：一条消息进，零或一条消息出，原样返回时保留事件同一性；
- [`DeadlockProofLauncher`]：有界执行器饱和时升级为独立线程，从不阻塞调用方。

## 实现策略（How）
- 同步原语统一使用 `parking_lot`，不存在锁中毒路径；
- 日志通过 `tracing` 输出，crate 自身不安装订阅者；
- 配置以 `serde` + `toml` 反序列化为 [`ChannelOptions`]。

## 风险与考量（Trade-offs）
- 下行派发在调用线程上同步执行并可能阻塞于 IO；需要非阻塞语义的调用方应在自己愿意阻塞的线程上发起。
"#]

pub mod channel;
pub mod channels;
pub mod config;
pub mod error;
pub mod event;
pub mod future;
pub mod handler;
pub mod launcher;
pub mod pipeline;
/// 测试桩命名空间，集中暴露内存通道与记录型 Sink/Handler，供集成测试与下游传输实现复用。
pub mod test_stubs;
pub mod transform;

pub use channel::{Channel, ChannelId, ChannelLifecycle};
pub use config::{ChannelConfig, ChannelOptions};
pub use error::ChannelError;
pub use event::{
    ChannelEvent, ChannelState, ExceptionEvent, InterestOps, Message, MessageEvent, StateEvent,
    StateValue, WriteCompletionEvent,
};
pub use future::ChannelFuture;
pub use handler::{
    DownstreamHandler, Lifecycle, LifecycleHandler, UpstreamHandler, downstream_fn, upstream_fn,
};
pub use launcher::{
    BoundedExecutor, DeadlockProofLauncher, FixedThreadPool, Task, TaskLauncher, ThreadLauncher,
};
pub use pipeline::{HandlerContext, Pipeline, PipelineSink, Stage};
pub use transform::{EncodeHandler, TransformHandler, Transformed, Transformer, transform_fn};
