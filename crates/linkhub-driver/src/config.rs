//! Hub 配置
//!
//! 支持从 TOML 加载，所有字段都有默认值：
//!
//! ```toml
//! tcp_port = 80
//! tcp_connect_timeout_ms = 5000
//! read_buffer_size = 1024
//! max_connections = 2
//! join_timeout_ms = 1000
//!
//! [heartbeat]
//! interval_ms = 500
//! failure_threshold = 2
//!
//! [radio]
//! bluez_root = "/var/lib/bluetooth"
//! fallback_channel = 1
//! ```

use linkhub_protocol::{ALIVE_MSG, DEFAULT_CHUNK_SIZE, DEFAULT_TCP_PORT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// 配置加载错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Hub 配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// LAN 设备端口
    pub tcp_port: u16,
    /// TCP 连接超时（毫秒）
    pub tcp_connect_timeout_ms: u64,
    /// 单次读取缓冲区大小（字节）
    pub read_buffer_size: usize,
    /// 预期的最大同时连接数
    ///
    /// 仅用于预分配连接表，超出时记录警告，不拒绝连接。
    pub max_connections: usize,
    /// 断开时等待读线程退出的上限（毫秒）
    pub join_timeout_ms: u64,
    pub heartbeat: HeartbeatConfig,
    pub radio: RadioConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            tcp_port: DEFAULT_TCP_PORT,
            tcp_connect_timeout_ms: 5000,
            read_buffer_size: DEFAULT_CHUNK_SIZE,
            max_connections: 2,
            join_timeout_ms: 1000,
            heartbeat: HeartbeatConfig::default(),
            radio: RadioConfig::default(),
        }
    }
}

/// 心跳配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// 探测间隔（毫秒）
    pub interval_ms: u64,
    /// 连续失败多少次判定超时
    pub failure_threshold: u32,
    /// 探测消息
    pub probe: Vec<u8>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            failure_threshold: 2,
            probe: ALIVE_MSG.to_vec(),
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// 无线链路配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// BlueZ 持久化目录
    pub bluez_root: PathBuf,
    /// 服务查找失败时使用的 RFCOMM 通道
    pub fallback_channel: u8,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            bluez_root: PathBuf::from("/var/lib/bluetooth"),
            fallback_channel: 1,
        }
    }
}

impl HubConfig {
    /// 从 TOML 字符串解析
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// 校验取值范围
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_buffer_size == 0 {
            return Err(ConfigError::Invalid("read_buffer_size must be > 0".into()));
        }
        if self.heartbeat.interval_ms == 0 {
            return Err(ConfigError::Invalid("heartbeat.interval_ms must be > 0".into()));
        }
        if self.heartbeat.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat.failure_threshold must be > 0".into(),
            ));
        }
        if self.heartbeat.probe.is_empty() {
            return Err(ConfigError::Invalid("heartbeat.probe must not be empty".into()));
        }
        Ok(())
    }

    pub fn tcp_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.tcp_connect_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}
