//! 驱动层错误类型定义

use crate::config::ConfigError;
use crate::state::ServiceState;
use crate::subscription::StoreError;
use linkhub_protocol::ProtocolError;
use linkhub_transport::{TransportError, TransportKind};
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum HubError {
    /// 地址语法不合法（快速失败，不改变服务状态）
    #[error("Invalid {kind} address: {raw:?}")]
    InvalidAddress { raw: String, kind: TransportKind },

    /// 没有为该链路类型配置连接器
    #[error("No connector configured for {0} links")]
    UnsupportedTransport(TransportKind),

    /// 操作只允许在 IDLE 状态执行
    #[error("Operation requires IDLE service state (current: {state})")]
    NotIdle { state: ServiceState },

    /// 传输层错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 协议解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 订阅存储错误
    #[error("Subscription store error: {0}")]
    Store(#[from] StoreError),

    /// 配置错误
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// 工作线程创建失败
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl HubError {
    pub(crate) fn from_address_error(err: TransportError) -> Self {
        match err {
            TransportError::InvalidAddress { raw, kind } => Self::InvalidAddress { raw, kind },
            other => Self::Transport(other),
        }
    }
}
