//! 出站消息编码（主机 → 设备）
//!
//! 设备端按 `flag` 分发到注册的处理函数，消息格式：
//!
//! ```text
//! [flag][v1;v2;...][ACK_FLAG]
//! ```

use crate::constants::*;

/// 单个出站值
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    Boolean(bool),
    Byte(u8),
    Char(char),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Text(String),
}

impl Value {
    /// 值对应的数据类型
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Boolean(_) => DataType::Boolean,
            Self::Byte(_) => DataType::Byte,
            Self::Char(_) => DataType::Char,
            Self::Short(_) => DataType::Short,
            Self::Int(_) => DataType::Int,
            Self::Long(_) => DataType::Long,
            Self::Float(_) => DataType::Float,
            Self::Double(_) => DataType::Double,
            Self::Text(_) => DataType::String,
        }
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Self::Boolean(v) => out.push(if *v { b'1' } else { b'0' }),
            Self::Byte(v) => out.extend_from_slice(v.to_string().as_bytes()),
            Self::Char(c) => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            },
            Self::Short(v) => out.extend_from_slice(v.to_string().as_bytes()),
            Self::Int(v) => out.extend_from_slice(v.to_string().as_bytes()),
            Self::Long(v) => out.extend_from_slice(v.to_string().as_bytes()),
            Self::Float(v) => out.extend_from_slice(v.to_string().as_bytes()),
            Self::Double(v) => out.extend_from_slice(v.to_string().as_bytes()),
            Self::Text(s) => out.extend_from_slice(s.as_bytes()),
        }
    }
}

/// 结构化出站 payload
///
/// 多个值时按数组发送。
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OutboundPayload {
    pub values: Vec<Value>,
}

impl OutboundPayload {
    /// 单值 payload
    pub fn scalar(value: Value) -> Self {
        Self {
            values: vec![value],
        }
    }

    /// 数组 payload
    pub fn array(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_array(&self) -> bool {
        self.values.len() > 1
    }
}

/// 出站消息编码器
///
/// 返回 `None` 表示"无需发送"，不是错误。
pub trait MessageEncoder: Send + Sync {
    fn encode(&self, flag: u8, payload: &OutboundPayload) -> Option<Vec<u8>>;
}

/// 默认编码器：`[flag][v1;v2;...][ACK_FLAG]`
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimitedEncoder;

impl MessageEncoder for DelimitedEncoder {
    fn encode(&self, flag: u8, payload: &OutboundPayload) -> Option<Vec<u8>> {
        if payload.is_empty() {
            return None;
        }

        let mut out = Vec::with_capacity(2 + payload.values.len() * 4);
        out.push(flag);
        for (i, value) in payload.values.iter().enumerate() {
            if i > 0 {
                out.push(VALUE_DELIMITER);
            }
            value.write_to(&mut out);
        }
        out.push(ACK_FLAG);
        Some(out)
    }
}
