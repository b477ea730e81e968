//! # linkhub Transport Layer
//!
//! 设备字节流传输抽象层，为不同链路提供统一的阻塞读写接口。
//!
//! ## 支持的链路
//!
//! - `tcp`: 直连 TCP（协议固定端口）
//! - `radio`: RFCOMM 无线串口链路（需要先配对，Linux/BlueZ）
//! - `mock`: 内存传输（`mock` feature，用于测试）
//!
//! ## 取消语义
//!
//! 阻塞的 `read` / `write_all` 不支持协作式取消，唯一的取消方式是
//! 调用 `close()`：关闭后阻塞中的读返回 EOF 或错误。

use std::sync::Arc;
use thiserror::Error;

pub mod address;
pub mod radio;
pub mod tcp;

#[cfg(all(target_os = "linux", feature = "radio"))]
mod rfcomm;

#[cfg(feature = "mock")]
pub mod mock;

pub use address::{DeviceAddress, TransportKind};
pub use radio::{BluezBackend, RadioBackend, RadioConnector};
pub use tcp::{TcpConnector, TcpTransport};

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid {kind} address: {raw:?}")]
    InvalidAddress { raw: String, kind: TransportKind },

    #[error("Device {0} is not paired")]
    NotPaired(DeviceAddress),

    #[error("Device {address} unreachable: {reason}")]
    Unreachable {
        address: DeviceAddress,
        reason: String,
    },

    #[error("Unknown host: {0}")]
    UnknownHost(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport closed")]
    Closed,
}

impl TransportError {
    /// 是否需要提示用户配对（而不是普通的连接失败）
    pub fn is_pairing_required(&self) -> bool {
        matches!(self, Self::NotPaired(_))
    }
}

/// 双向字节流
///
/// 所有方法都以 `&self` 调用：读循环与心跳/发送方在不同线程上
/// 共享同一个传输对象。实现需要自行串行化并发写入。
pub trait Transport: Send + Sync {
    /// 阻塞读取一块数据
    ///
    /// 返回 `Ok(0)` 表示对端关闭（EOF）。
    fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// 阻塞写入全部字节
    fn write_all(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// 关闭传输，唤醒阻塞中的读写（幂等）
    fn close(&self);

    /// 链路类型
    fn kind(&self) -> TransportKind;
}

/// 按链路类型打开传输
///
/// `open` 可能长时间阻塞（配对检查、服务发现、TCP 握手），
/// 调用方应在独立线程中调用。
pub trait Connector: Send + Sync {
    /// 该连接器负责的链路类型
    fn kind(&self) -> TransportKind;

    /// 打开到设备的传输
    ///
    /// # 错误
    /// - `NotPaired`: 无线设备尚未配对，调用方应提示配对而不是重试
    /// - `Unreachable`: 无线链路打开失败（含回退通道）
    /// - `UnknownHost` / `Io`: TCP 解析或连接失败
    fn open(&self, address: &DeviceAddress) -> Result<Arc<dyn Transport>, TransportError>;
}
