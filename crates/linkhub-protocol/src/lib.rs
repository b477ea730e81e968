//! # linkhub Protocol
//!
//! 设备串行协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `constants`: 控制码、数据类型码
//! - `decoder`: 流式帧解码器（设备 → 主机）
//! - `encoder`: 出站消息编码（主机 → 设备）
//!
//! ## 帧格式
//!
//! 每次阻塞读取得到的字节块（chunk）即为一帧：
//!
//! ```text
//! <typeChar><decimalCount><space><payload…>
//! ```
//!
//! payload 中的数据字符与单字节控制码交错出现，
//! `#` 或 `ACK_FLAG` 结束一条消息。

pub mod constants;
pub mod decoder;
pub mod encoder;

// 重新导出常用类型
pub use constants::*;
pub use decoder::{Decode, DecodedEvent, DecodedMessage, FrameDecoder, FrameHeader};
pub use encoder::{DelimitedEncoder, MessageEncoder, OutboundPayload, Value};

use thiserror::Error;

/// 协议解析错误类型
///
/// 所有变体都属于 "MalformedFrame"：调用方丢弃该帧并继续读取，
/// 单个损坏的帧不会终止连接。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed frame: empty chunk")]
    EmptyFrame,

    #[error("Malformed frame: header delimiter missing")]
    MissingDelimiter,

    #[error("Malformed frame: header has no data type code")]
    MissingTypeCode,

    #[error("Malformed frame: invalid value count {raw:?}")]
    InvalidCount { raw: String },
}

