//! 宿主事件的终端输出格式

use linkhub_driver::{HostEvent, MetricsSnapshot};

/// 单行事件描述
pub fn describe(event: &HostEvent) -> String {
    match event {
        HostEvent::ConnectionEstablished(address) => format!("✅ connected      {address}"),
        HostEvent::ConnectionFailed { address, reason } => {
            format!("❌ connect failed {address}: {reason}")
        },
        HostEvent::Disconnected { address, reason } => {
            format!("🔌 disconnected   {address} ({reason})")
        },
        HostEvent::PairingRequested(address) => {
            format!("🔑 pairing needed {address}: pair the device, then connect again")
        },
        HostEvent::HeartbeatTimeout(address) => format!("💔 heartbeat lost {address}"),
        HostEvent::ConnectionList(list) if list.is_empty() => "📋 connections: (none)".to_string(),
        HostEvent::ConnectionList(list) => {
            let names: Vec<&str> = list.iter().map(|a| a.as_str()).collect();
            format!("📋 connections: {}", names.join(", "))
        },
        HostEvent::Enable {
            owner,
            address,
            subscription_id,
            ..
        } => format!("➕ enable  #{subscription_id} ({owner}) on {address}"),
        HostEvent::Disable {
            owner,
            address,
            subscription_id,
            ..
        } => format!("➖ disable #{subscription_id} ({owner}) on {address}"),
        HostEvent::DataReceived { address, message } => format!(
            "📨 {address} [{}] {}",
            message.data_type.name(message.is_array),
            message.payload
        ),
        HostEvent::ServiceIdle => "💤 service idle".to_string(),
        HostEvent::DisableAll => "⏹  disable all".to_string(),
        HostEvent::Shutdown => "👋 shutdown".to_string(),
    }
}

/// 计数器摘要
pub fn metrics_table(m: &MetricsSnapshot) -> String {
    [
        ("chunks read", m.chunks_read),
        ("bytes read", m.bytes_read),
        ("messages decoded", m.messages_decoded),
        ("malformed frames", m.malformed_frames),
        ("bytes written", m.bytes_written),
        ("write failures", m.write_failures),
        ("heartbeat probes", m.heartbeat_probes),
        ("heartbeat failures", m.heartbeat_failures),
        ("connects ok", m.connects_ok),
        ("connects failed", m.connects_failed),
    ]
    .iter()
    .map(|(name, value)| format!("  {name:<20}{value}"))
    .collect::<Vec<_>>()
    .join("\n")
}
