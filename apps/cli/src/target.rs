//! 命令行参数解析：设备目标与出站值

use anyhow::{Result, bail};
use linkhub_driver::{DeviceAddress, TransportKind, Value};

/// 解析设备目标
///
/// 支持 `tcp:192.168.1.7`、`bt:00:06:66:0A:BC:DE` 形式的显式前缀；
/// 无前缀时，合法的 MAC 地址按无线链路处理，其余按 TCP 处理。
pub fn parse_target(raw: &str) -> Result<(DeviceAddress, TransportKind)> {
    let raw = raw.trim();
    if let Some((prefix, rest)) = raw.split_once(':')
        && let Ok(kind) = prefix.parse::<TransportKind>()
    {
        return Ok((DeviceAddress::parse(rest, kind)?, kind));
    }

    if let Ok(address) = DeviceAddress::parse(raw, TransportKind::Radio) {
        return Ok((address, TransportKind::Radio));
    }
    Ok((DeviceAddress::parse(raw, TransportKind::Tcp)?, TransportKind::Tcp))
}

/// 解析单个出站值
///
/// `true`/`false` → 布尔；整数 → Int（超出 i32 时为 Long）；
/// 小数 → Double；单引号包裹的单个字符 → Char；其余为文本。
pub fn parse_value(raw: &str) -> Value {
    match raw {
        "true" => return Value::Boolean(true),
        "false" => return Value::Boolean(false),
        _ => {},
    }
    if let Ok(v) = raw.parse::<i32>() {
        return Value::Int(v);
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Value::Long(v);
    }
    if raw.contains('.')
        && let Ok(v) = raw.parse::<f64>()
    {
        return Value::Double(v);
    }
    let mut chars = raw.chars();
    if let (Some('\''), Some(c), Some('\''), None) =
        (chars.next(), chars.next(), chars.next(), chars.next())
    {
        return Value::Char(c);
    }
    Value::Text(raw.to_string())
}

/// 解析逗号分隔的值列表
pub fn parse_values(raw: &str) -> Vec<Value> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_value)
        .collect()
}

/// 解析单字符 flag
pub fn parse_flag(raw: &str) -> Result<u8> {
    match raw.as_bytes() {
        [b] if b.is_ascii() => Ok(*b),
        _ => bail!("flag 必须是单个 ASCII 字符: {raw:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_prefix() {
        let (addr, kind) = parse_target("tcp:Sensor.local").unwrap();
        assert_eq!(kind, TransportKind::Tcp);
        assert_eq!(addr.as_str(), "sensor.local");

        let (addr, kind) = parse_target("bt:00:06:66:0a:bc:de").unwrap();
        assert_eq!(kind, TransportKind::Radio);
        assert_eq!(addr.as_str(), "00:06:66:0A:BC:DE");
    }

    #[test]
    fn test_target_inferred() {
        assert_eq!(parse_target("00:06:66:0A:BC:DE").unwrap().1, TransportKind::Radio);
        assert_eq!(parse_target("10.0.0.4").unwrap().1, TransportKind::Tcp);
        assert!(parse_target("tcp:bad host").is_err());
    }

    #[test]
    fn test_values() {
        assert_eq!(
            parse_values("1, 2.5,true,'x',hi,9999999999"),
            vec![
                Value::Int(1),
                Value::Double(2.5),
                Value::Boolean(true),
                Value::Char('x'),
                Value::Text("hi".into()),
                Value::Long(9_999_999_999),
            ]
        );
        assert!(parse_values(" , ").is_empty());
    }

    #[test]
    fn test_flag() {
        assert_eq!(parse_flag("T").unwrap(), b'T');
        assert!(parse_flag("TT").is_err());
        assert!(parse_flag("").is_err());
    }
}
