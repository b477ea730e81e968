//! 驱动层模块
//!
//! 本 crate 管理主机与多台串行设备之间的连接，包括：
//! - 连接表与服务状态（IDLE / BUSY / ACTIVE）
//! - 每连接一个读循环线程：流式解码 → 路由给订阅者与宿主
//! - 订阅者引用计数：第一台设备 enable，最后一台设备 disable
//! - 设备请求的心跳监控
//!
//! # 使用场景
//!
//! 宿主通过 [`Hub`] 发起连接与发送，通过 [`Hub::subscribe`] 获得的
//! channel 接收 [`HostEvent`]，或者为订阅者注册 [`SubscriberSink`] 回调。

mod builder;
pub mod config;
mod connection;
mod error;
pub mod heartbeat;
mod hub;
pub mod metrics;
mod pipeline;
pub mod registry;
pub mod router;
pub mod state;
pub mod subscription;

pub use builder::HubBuilder;
pub use config::{ConfigError, HeartbeatConfig, HubConfig, RadioConfig};
pub use connection::Connection;
pub use error::HubError;
pub use heartbeat::HeartbeatSupervisor;
pub use hub::Hub;
pub use metrics::{HubMetrics, MetricsSnapshot};
pub use registry::{Device, Notice, SubscriptionRegistry};
pub use router::{DisconnectReason, EventBus, HostEvent, SinkRegistry, SubscriberSink};
pub use state::{AtomicServiceState, ServiceState};
pub use subscription::{MemoryStore, StoreError, Subscription, SubscriptionStore, TomlStore};

// 宿主常用的下层类型
pub use linkhub_protocol::{DataType, DecodedMessage, OutboundPayload, Value};
pub use linkhub_transport::{DeviceAddress, TransportKind};
