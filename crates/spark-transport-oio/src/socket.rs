//! 阻塞套接字协作者。
//!
//! # 设计背景（Why）
//! - Sink 与 Worker 只依赖“绑定、建连、取流、查地址、关闭”这组同步原语；
//!   把它们抽象为 [`SocketTransport`]，测试即可用脚本化实现替换真实套接字；
//! - [`TcpSocket`] 基于 `socket2` 实现：套接字在首次绑定或建连时按地址族惰性创建，
//!   以便在 `bind` 之前应用 `SO_REUSEADDR` 等选项。
//!
//! # 契约说明（What）
//! - 所有方法都可能阻塞并以 `io::Error` 失败；
//! - `open_streams` 只在建连成功后调用，返回的读写半部彼此独立，可分别移交给不同线程；
//! - `close` 必须唤醒阻塞在读半部上的线程，且可重复调用；
//!   建连期间的关闭不必等待建连返回，建连随后以 `NotConnected` 失败。

use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    time::Duration,
};

use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use spark_channel::ChannelOptions;

/// 读半部。
pub type InputStream = Box<dyn Read + Send>;
/// 写半部。
pub type OutputStream = Box<dyn Write + Send>;

/// 阻塞套接字原语。
pub trait SocketTransport: Send + Sync + 'static {
    /// 在绑定或建连之前应用通道选项。
    fn configure(&self, _options: &ChannelOptions) -> io::Result<()> {
        Ok(())
    }

    fn bind(&self, local: SocketAddr) -> io::Result<()>;

    /// 建连；`timeout` 为 `None` 时等待操作系统判定。
    fn connect(&self, remote: SocketAddr, timeout: Option<Duration>) -> io::Result<()>;

    /// 获取独立的读写半部。
    fn open_streams(&self) -> io::Result<(InputStream, OutputStream)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn remote_addr(&self) -> io::Result<SocketAddr>;

    /// 关闭套接字并唤醒阻塞中的读取方；重复调用无副作用。
    fn close(&self) -> io::Result<()>;
}

struct TcpState {
    socket: Option<Socket>,
    options: ChannelOptions,
    closed: bool,
}

/// 基于 `socket2` 的 TCP 客户端套接字。
pub struct TcpSocket {
    state: Mutex<TcpState>,
}

impl TcpSocket {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TcpState {
                socket: None,
                options: ChannelOptions::default(),
                closed: false,
            }),
        }
    }

    fn ensure<'a>(state: &'a mut TcpState, addr: &SocketAddr) -> io::Result<&'a Socket> {
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "socket is closed"));
        }
        if state.socket.is_none() {
            let domain = Domain::for_address(*addr);
            let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
            socket.set_reuse_address(state.options.reuse_address)?;
            socket.set_keepalive(state.options.keep_alive)?;
            socket.set_linger(state.options.linger())?;
            state.socket = Some(socket);
        }
        state
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket is not created"))
    }

    fn with_socket<T>(&self, f: impl FnOnce(&Socket) -> io::Result<T>) -> io::Result<T> {
        let state = self.state.lock();
        match state.socket.as_ref() {
            Some(socket) if !state.closed => f(socket),
            _ => Err(io::Error::new(io::ErrorKind::NotConnected, "socket is not open")),
        }
    }
}

impl Default for TcpSocket {
    fn default() -> Self {
        Self::new()
    }
}

fn inet(addr: SockAddr) -> io::Result<SocketAddr> {
    addr.as_socket()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "not an inet address"))
}

impl SocketTransport for TcpSocket {
    fn configure(&self, options: &ChannelOptions) -> io::Result<()> {
        self.state.lock().options = options.clone();
        Ok(())
    }

    fn bind(&self, local: SocketAddr) -> io::Result<()> {
        let mut state = self.state.lock();
        Self::ensure(&mut state, &local)?.bind(&local.into())
    }

    fn connect(&self, remote: SocketAddr, timeout: Option<Duration>) -> io::Result<()> {
        // 在克隆句柄上阻塞，状态锁只覆盖创建过程，关闭方无需等待建连结束。
        let socket = {
            let mut state = self.state.lock();
            Self::ensure(&mut state, &remote)?.try_clone()?
        };
        let addr = SockAddr::from(remote);
        match timeout {
            Some(timeout) => socket.connect_timeout(&addr, timeout)?,
            None => socket.connect(&addr)?,
        }
        if self.state.lock().closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "socket closed while connecting",
            ));
        }
        Ok(())
    }

    fn open_streams(&self) -> io::Result<(InputStream, OutputStream)> {
        let nodelay = self.state.lock().options.tcp_nodelay;
        self.with_socket(|socket| {
            let input: TcpStream = socket.try_clone()?.into();
            let output: TcpStream = socket.try_clone()?.into();
            output.set_nodelay(nodelay)?;
            Ok((Box::new(input) as InputStream, Box::new(output) as OutputStream))
        })
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.with_socket(|socket| inet(socket.local_addr()?))
    }

    fn remote_addr(&self) -> io::Result<SocketAddr> {
        self.with_socket(|socket| inet(socket.peer_addr()?))
    }

    fn close(&self) -> io::Result<()> {
        let socket = {
            let mut state = self.state.lock();
            state.closed = true;
            state.socket.take()
        };
        if let Some(socket) = socket {
            // 未连接的套接字 shutdown 会返回 NotConnected，关闭本身仍然成立。
            match socket.shutdown(Shutdown::Both) {
                Err(err) if err.kind() != io::ErrorKind::NotConnected => return Err(err),
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{net::TcpListener, sync::Arc, thread, time::Instant};

    use super::*;

    #[test]
    fn streams_require_a_connected_socket() {
        let socket = TcpSocket::new();
        assert!(socket.open_streams().is_err());
        assert!(socket.local_addr().is_err());
    }

    #[test]
    fn closed_socket_refuses_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener");
        let socket = TcpSocket::new();
        socket.close().expect("close unopened socket");
        socket.close().expect("close twice");
        let err = socket
            .connect(listener.local_addr().expect("addr"), None)
            .expect_err("closed socket");
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn connect_reports_both_addresses() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener");
        let server = listener.local_addr().expect("addr");
        let socket = TcpSocket::new();
        socket
            .connect(server, Some(Duration::from_secs(5)))
            .expect("connect");
        assert_eq!(socket.remote_addr().expect("peer"), server);
        assert!(socket.local_addr().expect("local").port() != 0);
        let (_input, _output) = socket.open_streams().expect("streams");
        socket.close().expect("close");
    }

    /// 建连阻塞期间关闭：`close` 立即返回，建连以失败告终且不留下可用套接字。
    #[test]
    fn close_does_not_wait_for_inflight_connect() {
        let socket = Arc::new(TcpSocket::new());
        let connecting = Arc::clone(&socket);
        // TEST-NET-1 不可路由：要么长时间挂起，要么立即报不可达。
        let blackhole: SocketAddr = "192.0.2.1:9".parse().expect("addr");
        let handle =
            thread::spawn(move || connecting.connect(blackhole, Some(Duration::from_secs(2))));
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        socket.close().expect("close");
        assert!(
            started.elapsed() < Duration::from_millis(500),
            "close blocked for {:?}",
            started.elapsed()
        );

        let outcome = handle.join().expect("connect thread");
        assert!(outcome.is_err(), "{outcome:?}");
        assert!(socket.open_streams().is_err());
    }
}
