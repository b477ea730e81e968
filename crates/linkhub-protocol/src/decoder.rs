//! 流式帧解码器
//!
//! 将阻塞读取得到的字节块转换为惰性的解码事件序列。
//!
//! # 帧结构
//!
//! ```text
//! A3 xy#ab#cd#
//! │└─ 值个数（十进制）
//! └── 数据类型码
//! ```
//!
//! 帧头（第一个空格之前）只解析一次，帧内所有以结束符结尾的消息
//! 共用同一个数据类型与数组标志。这是协议本身的限制，解码器保持该行为。
//!
//! 累积缓冲区跨帧保留：一条消息可以在后续帧中结束，
//! 此时使用结束所在帧的帧头类型。

use crate::ProtocolError;
use crate::constants::*;

/// 帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// 数据类型
    pub data_type: DataType,
    /// 帧头声明的值个数
    pub num_values: u32,
}

impl FrameHeader {
    /// 解析帧头，返回帧头和 payload 区域
    ///
    /// # 错误
    /// - `EmptyFrame`: 空字节块
    /// - `MissingDelimiter`: 没有找到帧头分隔符
    /// - `MissingTypeCode`: 分隔符之前没有类型码
    /// - `InvalidCount`: 值个数不是十进制数字
    pub fn parse(chunk: &[u8]) -> Result<(Self, &[u8]), ProtocolError> {
        if chunk.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }

        let delimiter = chunk
            .iter()
            .position(|&b| b == HEADER_DELIMITER)
            .ok_or(ProtocolError::MissingDelimiter)?;

        let header = &chunk[..delimiter];
        let (&code, count) = header.split_first().ok_or(ProtocolError::MissingTypeCode)?;

        let num_values = parse_count(count).ok_or_else(|| ProtocolError::InvalidCount {
            raw: latin1(count),
        })?;

        Ok((
            Self {
                data_type: DataType::from_code(code),
                num_values,
            },
            &chunk[delimiter + 1..],
        ))
    }

    /// 值个数大于 1 时为数组类型
    pub fn is_array(&self) -> bool {
        self.num_values > 1
    }
}

fn parse_count(raw: &[u8]) -> Option<u32> {
    if raw.is_empty() || !raw.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(raw).ok()?.parse().ok()
}

/// ISO-8859-1：一个字节对应一个字符，永不失败
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// 解码得到的应用消息
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DecodedMessage {
    /// 文本内容（不含控制码和结束符）
    pub payload: String,
    /// 帧头声明的数据类型
    pub data_type: DataType,
    /// 帧头声明的数组标志
    pub is_array: bool,
}

/// 解码事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    /// 一条完整消息
    Message(DecodedMessage),
    /// 设备请求开启心跳
    HeartbeatOn,
    /// 设备请求关闭心跳
    HeartbeatOff,
}

/// 帧解码器（每个连接独占一个实例）
///
/// # Example
///
/// ```
/// use linkhub_protocol::{DecodedEvent, FrameDecoder};
///
/// let mut decoder = FrameDecoder::new();
/// let events: Vec<_> = decoder.decode(b"i1 42#").unwrap().collect();
/// assert!(matches!(&events[0], DecodedEvent::Message(m) if m.payload == "42"));
/// ```
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// 累积缓冲区（跨帧保留）
    buffer: String,
}

impl FrameDecoder {
    /// 创建新的解码器
    pub fn new() -> Self {
        Self::default()
    }

    /// 解码一个字节块
    ///
    /// 帧头错误时整块丢弃，累积缓冲区保持不变。
    /// 返回的迭代器是惰性的：未被消费的 payload 字节会在迭代器 drop 时丢失，
    /// 调用方应当将其完全消费。
    pub fn decode<'a>(&'a mut self, chunk: &'a [u8]) -> Result<Decode<'a>, ProtocolError> {
        let (header, payload) = FrameHeader::parse(chunk)?;
        Ok(Decode {
            buffer: &mut self.buffer,
            header,
            payload,
            pos: 0,
        })
    }

    /// 解码并收集所有事件
    pub fn decode_all(&mut self, chunk: &[u8]) -> Result<Vec<DecodedEvent>, ProtocolError> {
        Ok(self.decode(chunk)?.collect())
    }

    /// 尚未结束的累积内容
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// 丢弃累积内容
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// 单个字节块的惰性解码迭代器
pub struct Decode<'a> {
    buffer: &'a mut String,
    header: FrameHeader,
    payload: &'a [u8],
    pos: usize,
}

impl Decode<'_> {
    /// 当前帧的帧头
    pub fn header(&self) -> FrameHeader {
        self.header
    }
}

impl Iterator for Decode<'_> {
    type Item = DecodedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(&byte) = self.payload.get(self.pos) {
            self.pos += 1;
            match byte {
                ACK_FLAG | ALT_TERMINATOR => {
                    return Some(DecodedEvent::Message(DecodedMessage {
                        payload: std::mem::take(&mut *self.buffer),
                        data_type: self.header.data_type,
                        is_array: self.header.is_array(),
                    }));
                },
                HB_ON_FLAG => return Some(DecodedEvent::HeartbeatOn),
                HB_OFF_FLAG => return Some(DecodedEvent::HeartbeatOff),
                MSG_FLAG => continue,
                other => self.buffer.push(char::from(other)),
            }
        }
        None
    }
}
