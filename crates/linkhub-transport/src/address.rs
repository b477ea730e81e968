//! 设备地址与链路类型
//!
//! 地址在进入连接流程之前完成语法校验，非法地址快速失败，
//! 不会改变服务状态。

use crate::TransportError;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// 链路类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TransportKind {
    /// RFCOMM 无线串口链路
    Radio,
    /// TCP 直连
    Tcp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Radio => write!(f, "radio"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "radio" | "bt" | "bluetooth" | "rfcomm" => Ok(Self::Radio),
            "tcp" | "lan" | "wifi" => Ok(Self::Tcp),
            other => Err(format!("unknown transport kind '{other}'")),
        }
    }
}

/// 经过校验的设备地址
///
/// - 无线链路：`AA:BB:CC:DD:EE:FF` 形式的 MAC 地址，统一为大写
/// - TCP：IPv4 / IPv6 字面量或 RFC 1123 主机名
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// 按链路类型校验并规范化地址
    ///
    /// # 错误
    /// - `TransportError::InvalidAddress`: 地址语法不合法
    pub fn parse(raw: &str, kind: TransportKind) -> Result<Self, TransportError> {
        let trimmed = raw.trim();
        let normalized = match kind {
            TransportKind::Radio => normalize_mac(trimmed),
            TransportKind::Tcp => {
                is_valid_host(trimmed).then(|| trimmed.to_ascii_lowercase())
            },
        };

        normalized.map(Self).ok_or_else(|| TransportError::InvalidAddress {
            raw: raw.to_string(),
            kind,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 将 MAC 地址转换为 6 字节（按书写顺序）
    ///
    /// 非 MAC 地址返回 `None`。
    pub fn mac_bytes(&self) -> Option<[u8; 6]> {
        let mut out = [0u8; 6];
        let mut parts = self.0.split(':');
        for byte in &mut out {
            *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
        }
        parts.next().is_none().then_some(out)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn normalize_mac(raw: &str) -> Option<String> {
    let parts: Vec<&str> = raw.split(':').collect();
    let valid = parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.bytes().all(|b| b.is_ascii_hexdigit()));
    valid.then(|| raw.to_ascii_uppercase())
}

fn is_valid_host(raw: &str) -> bool {
    if raw.is_empty() || raw.len() > 253 {
        return false;
    }
    if raw.parse::<IpAddr>().is_ok() {
        return true;
    }
    // 纯数字和点组成但不是合法 IPv4 的，不当作主机名
    if raw.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return false;
    }
    raw.trim_end_matches('.').split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}
