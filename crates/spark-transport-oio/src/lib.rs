#![doc = r#"
# spark-transport-oio

## 设计动机（Why）
- **定位**：该 crate 提供基于阻塞套接字的客户端传输：下行的绑定、建连、写入与关闭
  在发起线程上同步执行，每个已连接通道由一个专属 Worker 线程运行读循环。
- **架构角色**：实现 `spark-channel` 的 [`PipelineSink`](spark_channel::PipelineSink) 与
  [`Channel`](spark_channel::Channel) 契约，应用只通过管线与完成令牌交互。

## 核心契约（What）
- 所有传输层失败都体现为“令牌失败 + 上行异常事件”，Sink 入口从不向调用方抛出错误；
- 新建通道首次建连成功时 `BOUND` 严格先于 `CONNECTED`；
- 关闭路径对 Worker 与应用的并发调用幂等，`OPEN(false)` 恰好触发一次；
- 读循环的暂停与恢复只由兴趣位控制。

## 实现策略（How）
- 套接字操作抽象为 [`SocketTransport`]，默认实现 [`TcpSocket`] 基于 `socket2`；
- Worker 通过注入的 [`TaskLauncher`](spark_channel::TaskLauncher) 启动，
  推荐使用 [`DeadlockProofLauncher`](spark_channel::DeadlockProofLauncher) 以避免池饱和时的死锁；
- 分帧通过 [`FrameDecoder`] 接缝注入，默认 [`ChunkDecoder`] 把每次读取作为一条消息。

## 风险与考量（Trade-offs）
- 每连接一个线程，连接数受线程资源约束；
- 建连在持有套接字锁的情况下阻塞，期间的并发关闭会等待建连结束或超时。
"#]

mod channel;
mod factory;
mod frame;
mod sink;
mod socket;
mod worker;

pub use channel::OioSocketChannel;
pub use factory::OioClientChannelFactory;
pub use frame::{ChunkDecoder, FrameDecoder};
pub use sink::{DecoderFactory, OioClientSink};
pub use socket::{InputStream, OutputStream, SocketTransport, TcpSocket};
pub use worker::{OioWorker, close, set_interest_ops, write};
