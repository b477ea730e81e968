//! Builder 模式实现
//!
//! 提供链式构造 `Hub` 实例的便捷方式。

use crate::config::HubConfig;
use crate::error::HubError;
use crate::hub::{Hub, HubParts};
use crate::metrics::HubMetrics;
use crate::router::{SinkRegistry, SubscriberSink};
use crate::subscription::{MemoryStore, SubscriptionStore};
use linkhub_protocol::{DelimitedEncoder, MessageEncoder};
use linkhub_transport::{Connector, RadioConnector, TcpConnector, TransportKind};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Hub Builder（链式构造）
///
/// 未显式提供的部件使用默认值：
///
/// - 订阅存储：空的 [`MemoryStore`]
/// - 编码器：[`DelimitedEncoder`]
/// - TCP 连接器：按配置的端口与超时
/// - 无线连接器：按配置的 BlueZ 目录与回退通道
///
/// # Example
///
/// ```no_run
/// use linkhub_driver::{HubBuilder, HubConfig, TomlStore};
/// use std::sync::Arc;
///
/// let config = HubConfig {
///     tcp_port: 8080,
///     ..HubConfig::default()
/// };
/// let hub = HubBuilder::new()
///     .config(config)
///     .subscription_store(Arc::new(TomlStore::new("subscriptions.toml")))
///     .build()
///     .unwrap();
/// ```
#[derive(Default)]
pub struct HubBuilder {
    config: HubConfig,
    store: Option<Arc<dyn SubscriptionStore>>,
    encoder: Option<Arc<dyn MessageEncoder>>,
    /// 显式提供的连接器，覆盖同类型的默认连接器
    connectors: HashMap<TransportKind, Arc<dyn Connector>>,
    sinks: Vec<(String, Arc<dyn SubscriberSink>)>,
    metrics: Option<Arc<HubMetrics>>,
}

impl HubBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    /// 设置持久化订阅存储
    pub fn subscription_store(mut self, store: Arc<dyn SubscriptionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 设置出站消息编码器
    pub fn encoder(mut self, encoder: Arc<dyn MessageEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// 为连接器声明的链路类型设置连接器（测试时可注入 mock）
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connectors.insert(connector.kind(), connector);
        self
    }

    /// 预先注册订阅者回调
    pub fn subscriber(mut self, owner: impl Into<String>, sink: Arc<dyn SubscriberSink>) -> Self {
        self.sinks.push((owner.into(), sink));
        self
    }

    /// 共享外部的计数器
    pub fn metrics(mut self, metrics: Arc<HubMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 构建 Hub
    ///
    /// # 错误
    /// - `Config`: 配置校验失败
    pub fn build(self) -> Result<Hub, HubError> {
        self.config.validate()?;

        let mut connectors = self.connectors;
        connectors.entry(TransportKind::Tcp).or_insert_with(|| {
            Arc::new(TcpConnector::new(
                self.config.tcp_port,
                self.config.tcp_connect_timeout(),
            ))
        });
        connectors.entry(TransportKind::Radio).or_insert_with(|| {
            Arc::new(RadioConnector::bluez(
                self.config.radio.bluez_root.clone(),
                self.config.radio.fallback_channel,
            ))
        });

        let sinks = SinkRegistry::new();
        for (owner, sink) in self.sinks {
            sinks.register(owner, sink);
        }

        debug!(
            "Building hub (tcp port {}, read buffer {} bytes, heartbeat every {} ms)",
            self.config.tcp_port, self.config.read_buffer_size, self.config.heartbeat.interval_ms
        );

        Ok(Hub::from_parts(HubParts {
            config: self.config,
            connectors,
            store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            encoder: self.encoder.unwrap_or_else(|| Arc::new(DelimitedEncoder)),
            sinks,
            metrics: self.metrics.unwrap_or_default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;

    #[test]
    fn test_builder_defaults() {
        let hub = HubBuilder::new().build().unwrap();
        assert_eq!(hub.config().tcp_port, 80);
        assert!(hub.state().is_idle());
        assert!(hub.list_connections().is_empty());
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let config = HubConfig {
            read_buffer_size: 0,
            ..HubConfig::default()
        };
        let err = HubBuilder::new().config(config).build().unwrap_err();
        assert!(matches!(err, HubError::Config(ConfigError::Invalid(_))));
    }
}
