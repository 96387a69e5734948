//! 通道配置。
//!
//! # 设计背景（Why）
//! - 建连超时、读缓冲大小、套接字选项需要由应用在创建通道前声明，也允许 Handler
//!   在运行期调整（例如握手完成后关闭 Nagle）；
//! - 这是 Handler 之间唯一允许共享的可变状态，因此以读写锁包裹，读取方拿到快照后再执行阻塞调用。
//!
//! # 契约说明（What）
//! - [`ChannelOptions`] 为纯数据结构，可从 TOML 反序列化，缺省字段取默认值；
//! - [`ChannelConfig`] 为共享容器，`snapshot` 返回当前值的副本，`update` 原子地修改。

use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;

/// 默认建连超时（毫秒）。
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
/// 默认单次读取缓冲大小（字节）。
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;
/// 单次读取缓冲的上限（字节）。
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// 通道选项。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelOptions {
    /// 建连超时；`0` 表示不设超时，等待操作系统判定。
    pub connect_timeout_ms: u64,
    pub read_buffer_size: usize,
    pub tcp_nodelay: bool,
    pub keep_alive: bool,
    pub so_linger_secs: Option<u64>,
    pub reuse_address: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            tcp_nodelay: true,
            keep_alive: false,
            so_linger_secs: None,
            reuse_address: false,
        }
    }
}

impl ChannelOptions {
    /// 从 TOML 文本解析选项。
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// 建连超时；`None` 表示不设超时。
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }

    /// 读缓冲大小，限定在 `1..=MAX_READ_BUFFER_SIZE`。
    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size.clamp(1, MAX_READ_BUFFER_SIZE)
    }

    /// `SO_LINGER` 时长。
    pub fn linger(&self) -> Option<Duration> {
        self.so_linger_secs.map(Duration::from_secs)
    }
}

/// 通道内共享的配置容器。
#[derive(Debug, Default)]
pub struct ChannelConfig {
    options: RwLock<ChannelOptions>,
}

impl ChannelConfig {
    pub fn new(options: ChannelOptions) -> Self {
        Self {
            options: RwLock::new(options),
        }
    }

    /// 当前选项的快照。
    pub fn snapshot(&self) -> ChannelOptions {
        self.options.read().clone()
    }

    /// 原子地修改选项。
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut ChannelOptions),
    {
        let mut guard = self.options.write();
        f(&mut *guard);
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.options.read().connect_timeout()
    }

    pub fn set_connect_timeout(&self, timeout: Duration) {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.options.write().connect_timeout_ms = millis;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let options = ChannelOptions::from_toml_str(
            r#"
            connect_timeout_ms = 250
            tcp_nodelay = false
            "#,
        )
        .expect("valid options");
        assert_eq!(options.connect_timeout(), Some(Duration::from_millis(250)));
        assert!(!options.tcp_nodelay);
        assert_eq!(options.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(options.linger(), None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ChannelOptions::from_toml_str("connect_timeout = 5").is_err());
    }

    #[test]
    fn zero_timeout_means_unbounded() {
        let config = ChannelConfig::default();
        config.set_connect_timeout(Duration::ZERO);
        assert_eq!(config.connect_timeout(), None);
        config.update(|o| o.read_buffer_size = 0);
        assert_eq!(config.snapshot().read_buffer_size(), 1);
    }

    #[test]
    fn oversized_read_buffer_is_capped() {
        let options =
            ChannelOptions::from_toml_str("read_buffer_size = 1073741824").expect("1 GiB parses");
        assert_eq!(options.read_buffer_size(), MAX_READ_BUFFER_SIZE);
    }
}
