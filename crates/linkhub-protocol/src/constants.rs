//! 协议常量定义
//!
//! 单字节控制码与数据类型码。控制码取自 ASCII 控制字符区间，
//! 不会与设备发送的可打印数据冲突。

/// 消息起始标志（设备 → 主机时被解码器忽略）
pub const MSG_FLAG: u8 = 0x12;

/// 消息完成标志（结束当前消息）
pub const ACK_FLAG: u8 = 0x13;

/// 备用消息结束符
pub const ALT_TERMINATOR: u8 = b'#';

/// 开启心跳控制码
pub const HB_ON_FLAG: u8 = 0x15;

/// 关闭心跳控制码
pub const HB_OFF_FLAG: u8 = 0x16;

/// 帧头与 payload 之间的分隔符
pub const HEADER_DELIMITER: u8 = b' ';

/// 数组元素分隔符（出站编码）
pub const VALUE_DELIMITER: u8 = b';';

/// 默认心跳探测消息
pub const ALIVE_MSG: &[u8] = &[MSG_FLAG, b'!', ACK_FLAG];

/// 单次读取的默认缓冲区大小（字节）
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// LAN 设备的协议端口
pub const DEFAULT_TCP_PORT: u16 = 80;

/// SPP (Serial Port Profile) 服务 UUID
pub const SPP_UUID: &str = "00001101-0000-1000-8000-00805F9B34FB";

/// 数据类型（帧头第一个字符）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataType {
    Boolean,
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    String,
    /// 未识别的类型码，原样保留
    Unknown(u8),
}

impl DataType {
    /// 从帧头类型码解析
    pub fn from_code(code: u8) -> Self {
        match code {
            b'b' => Self::Boolean,
            b'y' => Self::Byte,
            b'c' => Self::Char,
            b'd' => Self::Double,
            b'f' => Self::Float,
            b'i' => Self::Int,
            b'l' => Self::Long,
            b's' => Self::Short,
            b'S' => Self::String,
            other => Self::Unknown(other),
        }
    }

    /// 转换为帧头类型码
    pub fn code(self) -> u8 {
        match self {
            Self::Boolean => b'b',
            Self::Byte => b'y',
            Self::Char => b'c',
            Self::Double => b'd',
            Self::Float => b'f',
            Self::Int => b'i',
            Self::Long => b'l',
            Self::Short => b's',
            Self::String => b'S',
            Self::Unknown(code) => code,
        }
    }

    /// 类型名称（数组类型带 `[]` 后缀）
    pub fn name(self, is_array: bool) -> String {
        let base = match self {
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Char => "char",
            Self::Double => "double",
            Self::Float => "float",
            Self::Int => "int",
            Self::Long => "long",
            Self::Short => "short",
            Self::String => "string",
            Self::Unknown(code) => return format!("unknown(0x{code:02X})"),
        };
        if is_array {
            format!("{base}[]")
        } else {
            base.to_string()
        }
    }
}

/// 判断字节是否为协议控制码
pub fn is_control_code(byte: u8) -> bool {
    matches!(byte, MSG_FLAG | ACK_FLAG | HB_ON_FLAG | HB_OFF_FLAG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_code_roundtrip() {
        for code in [b'b', b'y', b'c', b'd', b'f', b'i', b'l', b's', b'S'] {
            assert_eq!(DataType::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_unknown_data_type_preserved() {
        let ty = DataType::from_code(b'A');
        assert_eq!(ty, DataType::Unknown(b'A'));
        assert_eq!(ty.code(), b'A');
        assert_eq!(ty.name(true), "unknown(0x41)");
    }

    #[test]
    fn test_data_type_name_array_suffix() {
        assert_eq!(DataType::Int.name(false), "int");
        assert_eq!(DataType::Int.name(true), "int[]");
    }

    #[test]
    fn test_control_codes_are_distinct() {
        let codes = [MSG_FLAG, ACK_FLAG, HB_ON_FLAG, HB_OFF_FLAG, ALT_TERMINATOR];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert!(!is_control_code(ALT_TERMINATOR));
        assert!(is_control_code(HB_ON_FLAG));
    }
}
