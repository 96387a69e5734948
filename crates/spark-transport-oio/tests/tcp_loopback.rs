//! 真实回环 TCP 上的端到端测试。
//!
//! - **Why**：脚本化套接字验证状态机，这里确认 `socket2` 套接字、读写半部与 Worker 在真实内核上协作；
//! - **What**：回显往返、暂停读后恢复、连接被拒时通道关闭。

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpListener},
    sync::Arc,
    thread,
    time::Duration,
};

use bytes::Bytes;
use spark_channel::{
    Channel, ChannelError, DeadlockProofLauncher, FixedThreadPool, Message, Pipeline, StateValue,
    TaskLauncher, ThreadLauncher, channels,
    test_stubs::{Recorded, RecordingHandler},
};
use spark_transport_oio::OioClientChannelFactory;

const WAIT: Duration = Duration::from_secs(5);

fn received_bytes(entries: &[Recorded]) -> Vec<u8> {
    entries
        .iter()
        .filter_map(|e| match e {
            Recorded::Message { message, .. } => message.downcast_ref::<Bytes>().cloned(),
            _ => None,
        })
        .flat_map(|bytes| bytes.to_vec())
        .collect()
}

fn open_channel(launcher: Arc<dyn TaskLauncher>) -> (Arc<dyn Channel>, RecordingHandler) {
    let pipeline = Arc::new(Pipeline::new());
    let recorder = RecordingHandler::new();
    pipeline
        .add_last_upstream("recorder", recorder.clone())
        .expect("注册记录器");
    let channel: Arc<dyn Channel> = OioClientChannelFactory::new(launcher)
        .new_channel(pipeline)
        .expect("创建通道");
    (channel, recorder)
}

/// 回显服务器：逐块把读到的内容写回，直到对端关闭。
fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("监听回环");
    let addr = listener.local_addr().expect("监听地址");
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = [0u8; 1024];
            while let Ok(n) = stream.read(&mut buf) {
                if n == 0 || stream.write_all(&buf[..n]).is_err() {
                    break;
                }
            }
        }
    });
    addr
}

/// ## 回显往返：写出的字节经 Worker 原样上行，关闭后事件完整
#[test]
fn echo_round_trip_over_loopback() {
    let pool = FixedThreadPool::new("oio-test", 2).expect("线程池");
    let (channel, recorder) = open_channel(Arc::new(DeadlockProofLauncher::new(pool)));
    let server = echo_server();

    let connect = channels::connect(&channel, server);
    assert!(connect.is_success(), "建连失败：{connect:?}");
    assert_eq!(channel.remote_addr(), Some(server));

    let write = channels::write(&channel, Message::new(String::from("hello spark")));
    assert!(write.is_success(), "{write:?}");
    assert!(
        recorder.wait_until(WAIT, |entries| received_bytes(entries) == b"hello spark"),
        "应收到回显"
    );

    channels::close(&channel)
        .wait_timeout(WAIT)
        .expect("关闭超时")
        .expect("关闭成功");
    let states = recorder.states();
    assert_eq!(states.last(), Some(&StateValue::Open(false)));
    assert!(states.contains(&StateValue::Connected(None)));
    assert!(recorder.exceptions().is_empty(), "{:?}", recorder.exceptions());
}

/// ## 暂停读：兴趣位去掉 READ 后不上行消息，恢复后补齐
#[test]
fn paused_reads_resume_after_interest_restored() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("监听回环");
    let server = listener.local_addr().expect("监听地址");
    let (channel, recorder) = open_channel(Arc::new(ThreadLauncher));

    assert!(channels::set_readable(&channel, false).is_success());
    assert!(channels::connect(&channel, server).is_success());
    let (mut peer, _) = listener.accept().expect("接受连接");
    peer.write_all(b"queued").expect("对端写入");

    assert!(
        !recorder.wait_until(Duration::from_millis(200), |entries| {
            !received_bytes(entries).is_empty()
        }),
        "暂停期间不应上行消息"
    );
    assert!(channels::set_readable(&channel, true).is_success());
    assert!(recorder.wait_until(WAIT, |entries| received_bytes(entries) == b"queued"));

    drop(peer);
    channel
        .close_future()
        .wait_timeout(WAIT)
        .expect("对端关闭后通道应关闭")
        .expect("关闭成功");
}

/// ## 连接被拒：令牌失败且通道被关闭
#[test]
fn refused_connect_closes_the_channel() {
    let closed_port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("占用端口");
        listener.local_addr().expect("地址")
    };
    let (channel, recorder) = open_channel(Arc::new(ThreadLauncher));

    let future = channels::connect(&channel, closed_port);

    assert!(
        matches!(
            future.cause(),
            Some(ChannelError::Connect { .. } | ChannelError::ConnectTimeout { .. })
        ),
        "{future:?}"
    );
    assert!(!channel.is_open());
    assert!(channel.close_future().is_success());
    assert_eq!(recorder.exceptions().len(), 1);
}
