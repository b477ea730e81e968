//! Hub：连接管理器
//!
//! 维护地址 → 连接的表、订阅注册表与服务状态，
//! 并把读循环解码出的事件路由给订阅者和宿主。
//!
//! # 线程模型
//!
//! - 每次 `connect()` 启动一个连接线程执行阻塞的 `open`
//! - 每个连接一个读循环线程，按需一个心跳线程
//! - 工作线程只持有 `Weak<HubInner>`，`Hub` 全部释放后自行退出
//!
//! 连接表、进行中的连接数与注册表在同一把锁下修改，
//! 服务状态在每次修改后按表重新计算。所有通知（总线事件、订阅者回调）
//! 都在释放锁之后发送，回调中可以重入 Hub。

use crate::config::HubConfig;
use crate::connection::Connection;
use crate::error::HubError;
use crate::metrics::{HubMetrics, MetricsSnapshot};
use crate::pipeline::{self, LinkHandler};
use crate::registry::SubscriptionRegistry;
use crate::router::{DisconnectReason, EventBus, HostEvent, SinkRegistry, SubscriberSink};
use crate::state::{AtomicServiceState, ServiceState};
use crate::subscription::{Subscription, SubscriptionStore};
use crossbeam_channel::Receiver;
use linkhub_protocol::{DecodedEvent, MessageEncoder, OutboundPayload};
use linkhub_transport::{Connector, DeviceAddress, TransportKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, trace, warn};

/// 受连接表锁保护的状态
struct Tables {
    connections: HashMap<DeviceAddress, Arc<Connection>>,
    /// 进行中的连接：地址 → 连接代次
    pending: HashMap<DeviceAddress, u64>,
    /// 尚未结束的连接/断开操作数（包括已被取消、仍在 open 中的连接）
    in_flight: usize,
    next_id: u64,
    registry: SubscriptionRegistry,
}

impl Tables {
    fn sorted_addresses(&self) -> Vec<DeviceAddress> {
        let mut list: Vec<DeviceAddress> = self.connections.keys().cloned().collect();
        list.sort();
        list
    }
}

pub(crate) struct HubParts {
    pub config: HubConfig,
    pub connectors: HashMap<TransportKind, Arc<dyn Connector>>,
    pub store: Arc<dyn SubscriptionStore>,
    pub encoder: Arc<dyn MessageEncoder>,
    pub sinks: SinkRegistry,
    pub metrics: Arc<HubMetrics>,
}

pub(crate) struct HubInner {
    config: HubConfig,
    connectors: HashMap<TransportKind, Arc<dyn Connector>>,
    store: Arc<dyn SubscriptionStore>,
    encoder: Arc<dyn MessageEncoder>,
    tables: Mutex<Tables>,
    state: AtomicServiceState,
    events: EventBus,
    sinks: SinkRegistry,
    metrics: Arc<HubMetrics>,
}

/// 设备连接 Hub
///
/// 克隆得到的句柄共享同一个 Hub。
///
/// # Example
///
/// ```no_run
/// use linkhub_driver::{HostEvent, HubBuilder};
/// use linkhub_transport::TransportKind;
///
/// let hub = HubBuilder::new().build().unwrap();
/// let events = hub.subscribe();
/// hub.connect("192.168.1.40", TransportKind::Tcp).unwrap();
///
/// while let Ok(event) = events.recv() {
///     if let HostEvent::DataReceived { address, message } = event {
///         println!("{address}: {}", message.payload);
///     }
/// }
/// ```
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub").finish_non_exhaustive()
    }
}

impl Hub {
    pub(crate) fn from_parts(parts: HubParts) -> Self {
        let capacity = parts.config.max_connections;
        Self {
            inner: Arc::new(HubInner {
                config: parts.config,
                connectors: parts.connectors,
                store: parts.store,
                encoder: parts.encoder,
                tables: Mutex::new(Tables {
                    connections: HashMap::with_capacity(capacity),
                    pending: HashMap::new(),
                    in_flight: 0,
                    next_id: 0,
                    registry: SubscriptionRegistry::new(),
                }),
                state: AtomicServiceState::new(ServiceState::Idle),
                events: EventBus::new(),
                sinks: parts.sinks,
                metrics: parts.metrics,
            }),
        }
    }

    /// 发起连接（异步完成）
    ///
    /// 立即返回；结果通过 `ConnectionEstablished` / `ConnectionFailed` /
    /// `PairingRequested` 事件通知。地址已连接或正在连接时什么也不做。
    ///
    /// # 错误
    /// - `InvalidAddress`: 地址语法不合法（同时发布 `ConnectionFailed`）
    /// - `UnsupportedTransport`: 没有该链路类型的连接器
    /// - `Spawn`: 连接线程创建失败
    pub fn connect(&self, address: &str, kind: TransportKind) -> Result<(), HubError> {
        let inner = &self.inner;
        let address = match DeviceAddress::parse(address, kind) {
            Ok(address) => address,
            Err(e) => {
                warn!("Rejecting connect to {:?}: {}", address, e);
                inner.events.publish(HostEvent::ConnectionFailed {
                    address: address.to_string(),
                    reason: e.to_string(),
                });
                return Err(HubError::from_address_error(e));
            },
        };

        let Some(connector) = inner.connectors.get(&kind).cloned() else {
            inner.events.publish(HostEvent::ConnectionFailed {
                address: address.to_string(),
                reason: format!("no connector for {kind} links"),
            });
            return Err(HubError::UnsupportedTransport(kind));
        };

        let id = {
            let mut tables = inner.tables.lock();
            if tables.connections.contains_key(&address) {
                debug!("{} is already connected", address);
                return Ok(());
            }
            if tables.pending.contains_key(&address) {
                debug!("{} is already connecting", address);
                return Ok(());
            }
            tables.next_id += 1;
            let id = tables.next_id;
            tables.pending.insert(address.clone(), id);
            tables.in_flight += 1;
            inner.reevaluate(&tables);
            id
        };

        info!("Connecting to {} over {}", address, kind);
        let worker = inner.clone();
        let worker_address = address.clone();
        let spawned = thread::Builder::new()
            .name(format!("linkhub-connect-{address}"))
            .spawn(move || worker.complete_connect(worker_address, id, connector));

        if let Err(e) = spawned {
            error!("Failed to spawn connect thread for {}: {}", address, e);
            let entered_idle = {
                let mut tables = inner.tables.lock();
                if tables.pending.get(&address) == Some(&id) {
                    tables.pending.remove(&address);
                }
                tables.in_flight = tables.in_flight.saturating_sub(1);
                inner.reevaluate(&tables)
            };
            inner.events.publish(HostEvent::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            });
            inner.announce_idle(entered_idle);
            return Err(HubError::Spawn(e));
        }
        Ok(())
    }

    /// 断开设备
    ///
    /// 对正在连接的地址取消连接：`open` 返回后传输立即被关闭，
    /// 并以 `ConnectionFailed` 通知。返回是否找到该地址。
    ///
    /// # 错误
    /// - `InvalidAddress`: 地址语法不合法
    pub fn disconnect(&self, address: &str, kind: TransportKind) -> Result<bool, HubError> {
        let address = DeviceAddress::parse(address, kind).map_err(HubError::from_address_error)?;
        Ok(self.disconnect_address(&address))
    }

    /// 按已解析的地址断开
    ///
    /// 地址既未连接也不在连接中时，仍按持久化的订阅补发 disable。
    pub fn disconnect_address(&self, address: &DeviceAddress) -> bool {
        if let Some(id) = self.inner.tables.lock().pending.remove(address) {
            info!("Cancelling connect to {} (#{})", address, id);
            return true;
        }
        if self.inner.teardown(address, None, DisconnectReason::Requested) {
            return true;
        }
        self.inner.release_detached(address);
        false
    }

    /// 向设备写原始字节
    ///
    /// 设备未连接时静默丢弃；写失败记录警告但不断开连接
    /// （连接丢失由读循环或心跳发现）。返回是否写出。
    pub fn send(&self, address: &DeviceAddress, bytes: &[u8]) -> bool {
        let conn = self.inner.tables.lock().connections.get(address).cloned();
        let Some(conn) = conn else {
            debug!("Dropping {} byte(s) for {}: not connected", bytes.len(), address);
            return false;
        };

        let metrics = &self.inner.metrics;
        match conn.transport().write_all(bytes) {
            Ok(()) => {
                HubMetrics::add(&metrics.bytes_written, bytes.len() as u64);
                trace!("{} -> {} byte(s)", address, bytes.len());
                true
            },
            Err(e) => {
                HubMetrics::incr(&metrics.write_failures);
                warn!("Write to {} failed: {}", address, e);
                false
            },
        }
    }

    /// 编码后发送结构化 payload
    pub fn send_typed(&self, address: &DeviceAddress, flag: u8, payload: &OutboundPayload) -> bool {
        match self.inner.encoder.encode(flag, payload) {
            Some(bytes) => self.send(address, &bytes),
            None => {
                trace!("Encoder produced nothing for {}", address);
                false
            },
        }
    }

    /// 发送给订阅者启用的所有设备，每台设备使用自己订阅中的 flag
    ///
    /// 返回成功写出的设备数。
    pub fn send_for_subscriber(&self, subscriber_id: u32, payload: &OutboundPayload) -> usize {
        let targets = self.inner.tables.lock().registry.targets_for(subscriber_id);
        if targets.is_empty() {
            warn!("Subscriber {} is not enabled on any device, dropping send", subscriber_id);
            return 0;
        }
        targets
            .iter()
            .filter(|(address, flag)| self.send_typed(address, *flag, payload))
            .count()
    }

    /// 当前已连接的地址（排序）
    pub fn list_connections(&self) -> Vec<DeviceAddress> {
        self.inner.tables.lock().sorted_addresses()
    }

    /// 在连接表中查找地址（大小写不敏感）
    pub fn resolve(&self, raw: &str) -> Option<DeviceAddress> {
        let raw = raw.trim();
        self.inner
            .tables
            .lock()
            .connections
            .keys()
            .find(|a| a.as_str().eq_ignore_ascii_case(raw))
            .cloned()
    }

    pub fn is_connected(&self, address: &DeviceAddress) -> bool {
        self.inner.tables.lock().connections.contains_key(address)
    }

    /// 发布一次连接列表；空闲时同时发布 `ServiceIdle`
    pub fn publish_connection_list(&self) {
        let list = self.list_connections();
        let idle = list.is_empty() && self.state().is_idle();
        self.inner.events.publish(HostEvent::ConnectionList(list));
        if idle {
            self.inner.events.publish(HostEvent::ServiceIdle);
        }
    }

    pub fn state(&self) -> ServiceState {
        self.inner.state.get()
    }

    /// 全局 disable：通知所有订阅者，随后发布 `Shutdown`
    ///
    /// # 错误
    /// - `NotIdle`: 仍有连接或进行中的连接操作
    pub fn disable_all(&self) -> Result<(), HubError> {
        // 空闲判断与 DisableAll 广播在同一把锁内，
        // 之后开始的连接一定排在 DisableAll 之后
        {
            let tables = self.inner.tables.lock();
            if tables.in_flight > 0 || !tables.connections.is_empty() {
                return Err(HubError::NotIdle {
                    state: self.state(),
                });
            }
            info!("Disabling all subscribers");
            self.inner.events.publish(HostEvent::DisableAll);
        }
        // 回调可能重入 Hub，不持锁
        self.inner.sinks.disable_all();
        self.inner.events.publish(HostEvent::Shutdown);
        Ok(())
    }

    /// 注册订阅者回调，返回被替换的旧回调
    pub fn register_subscriber(
        &self,
        owner: impl Into<String>,
        sink: Arc<dyn SubscriberSink>,
    ) -> Option<Arc<dyn SubscriberSink>> {
        self.inner.sinks.register(owner, sink)
    }

    pub fn unregister_subscriber(&self, owner: &str) -> Option<Arc<dyn SubscriberSink>> {
        self.inner.sinks.unregister(owner)
    }

    /// 新建宿主事件接收端
    pub fn subscribe(&self) -> Receiver<HostEvent> {
        self.inner.events.subscribe()
    }

    /// 设备当前生效的订阅
    pub fn subscriptions_for(&self, address: &DeviceAddress) -> Vec<Subscription> {
        self.inner.tables.lock().registry.subscriptions_for(address)
    }

    /// 当前启用的订阅者 ID
    pub fn active_subscribers(&self) -> Vec<u32> {
        self.inner.tables.lock().registry.active_subscribers()
    }

    pub fn is_heartbeat_running(&self, address: &DeviceAddress) -> bool {
        self.inner
            .tables
            .lock()
            .connections
            .get(address)
            .is_some_and(|c| c.heartbeat_running())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// 断开所有连接并取消所有进行中的连接
    pub fn shutdown(&self) {
        let addresses = {
            let mut tables = self.inner.tables.lock();
            tables.pending.clear();
            tables.sorted_addresses()
        };
        info!("Shutting down {} connection(s)", addresses.len());
        for address in addresses {
            self.inner.teardown(&address, None, DisconnectReason::Shutdown);
        }
    }
}

impl HubInner {
    /// 按表重新计算服务状态，返回是否刚进入 IDLE
    fn reevaluate(&self, tables: &Tables) -> bool {
        let next = if tables.in_flight > 0 {
            ServiceState::Busy
        } else if tables.connections.is_empty() {
            ServiceState::Idle
        } else {
            ServiceState::Active
        };
        let previous = self.state.swap(next);
        if previous != next {
            info!("Service state {} -> {}", previous, next);
        }
        previous != next && next.is_idle()
    }

    fn announce_idle(&self, entered_idle: bool) {
        if entered_idle {
            info!("Service is idle");
            self.events.publish(HostEvent::ServiceIdle);
        }
    }

    fn load_subscriptions(&self, address: &DeviceAddress) -> Vec<Subscription> {
        self.store.fetch_subscriptions(address).unwrap_or_else(|e| {
            warn!("Failed to load subscriptions for {}: {}", address, e);
            Vec::new()
        })
    }

    /// 连接线程主体
    fn complete_connect(
        self: Arc<Self>,
        address: DeviceAddress,
        id: u64,
        connector: Arc<dyn Connector>,
    ) {
        let result = connector.open(&address);

        let mut tables = self.tables.lock();
        let current = tables.pending.get(&address) == Some(&id);
        if current {
            tables.pending.remove(&address);
        }
        tables.in_flight = tables.in_flight.saturating_sub(1);

        let transport = match result {
            Ok(transport) if current => transport,
            Ok(transport) => {
                let entered_idle = self.reevaluate(&tables);
                drop(tables);
                transport.close();
                HubMetrics::incr(&self.metrics.connects_failed);
                info!("Connect to {} was cancelled", address);
                self.events.publish(HostEvent::ConnectionFailed {
                    address: address.to_string(),
                    reason: "cancelled".to_string(),
                });
                self.announce_idle(entered_idle);
                return;
            },
            Err(e) => {
                let entered_idle = self.reevaluate(&tables);
                drop(tables);
                HubMetrics::incr(&self.metrics.connects_failed);
                if e.is_pairing_required() {
                    warn!("{} is not paired, requesting pairing", address);
                    self.events.publish(HostEvent::PairingRequested(address));
                } else {
                    warn!("Connect to {} failed: {}", address, e);
                    self.events.publish(HostEvent::ConnectionFailed {
                        address: address.to_string(),
                        reason: e.to_string(),
                    });
                }
                self.announce_idle(entered_idle);
                return;
            },
        };

        if tables.connections.len() >= self.config.max_connections {
            warn!(
                "{} connection(s) exceed the expected maximum of {}",
                tables.connections.len() + 1,
                self.config.max_connections
            );
        }
        let conn = Arc::new(Connection::new(id, address.clone(), transport));
        tables.connections.insert(address.clone(), conn.clone());
        let subscriptions = self.load_subscriptions(&address);
        let notices = tables.registry.activate(&address, conn.kind(), subscriptions);
        self.reevaluate(&tables);
        let list = tables.sorted_addresses();
        drop(tables);

        HubMetrics::incr(&self.metrics.connects_ok);
        info!("Connected to {} ({} subscription(s))", address, notices.len());
        for notice in &notices {
            self.sinks.dispatch(&self.events, notice);
        }
        self.events.publish(HostEvent::ConnectionEstablished(address));
        self.events.publish(HostEvent::ConnectionList(list));
        self.spawn_reader(&conn);
    }

    fn spawn_reader(self: &Arc<Self>, conn: &Arc<Connection>) {
        let handler = Arc::downgrade(self);
        let reader_conn = conn.clone();
        let metrics = self.metrics.clone();
        let buffer_size = self.config.read_buffer_size;

        let spawned = thread::Builder::new()
            .name(format!("linkhub-rx-{}", conn.address()))
            .spawn(move || pipeline::read_loop(handler, reader_conn, buffer_size, metrics));

        match spawned {
            Ok(handle) => conn.set_reader(handle),
            Err(e) => {
                error!("Failed to spawn read loop for {}: {}", conn.address(), e);
                self.teardown(conn.address(), Some(conn.id()), DisconnectReason::ConnectionLost);
            },
        }
    }

    /// 移除并关闭连接
    ///
    /// `expected_id` 为 `Some` 时只在代次匹配时执行，
    /// 避免旧连接的读循环或心跳拆掉同一地址上的新连接。
    /// 返回是否找到并移除了连接。
    fn teardown(
        &self,
        address: &DeviceAddress,
        expected_id: Option<u64>,
        reason: DisconnectReason,
    ) -> bool {
        let (conn, notices) = {
            let mut tables = self.tables.lock();
            let conn = match tables.connections.get(address) {
                Some(conn) if expected_id.is_none_or(|id| id == conn.id()) => conn.clone(),
                _ => return false,
            };
            tables.connections.remove(address);
            let notices = tables
                .registry
                .deactivate(address, || self.load_subscriptions(address));
            tables.in_flight += 1;
            self.reevaluate(&tables);
            (conn, notices)
        };

        match reason {
            DisconnectReason::Requested | DisconnectReason::Shutdown => {
                info!("Disconnecting {} ({})", address, reason)
            },
            DisconnectReason::ConnectionLost | DisconnectReason::HeartbeatTimeout => {
                warn!("Dropping {} ({})", address, reason)
            },
        }

        if reason == DisconnectReason::HeartbeatTimeout {
            self.events.publish(HostEvent::HeartbeatTimeout(address.clone()));
        }
        for notice in &notices {
            self.sinks.dispatch(&self.events, notice);
        }
        conn.close(self.config.join_timeout());

        let (list, entered_idle) = {
            let mut tables = self.tables.lock();
            tables.in_flight = tables.in_flight.saturating_sub(1);
            (tables.sorted_addresses(), self.reevaluate(&tables))
        };
        self.events.publish(HostEvent::Disconnected {
            address: address.clone(),
            reason,
        });
        self.events.publish(HostEvent::ConnectionList(list));
        self.announce_idle(entered_idle);
        true
    }

    /// 为不在连接表中的地址停用订阅
    ///
    /// 注册表中没有该设备时按存储中的订阅补发 disable（订阅者在别的设备上
    /// 仍启用时除外），随后重新计算状态；空闲时发布 `ServiceIdle`。
    fn release_detached(&self, address: &DeviceAddress) {
        let (notices, idle) = {
            let mut tables = self.tables.lock();
            if tables.connections.contains_key(address) || tables.pending.contains_key(address) {
                return;
            }
            let notices = tables
                .registry
                .deactivate(address, || self.load_subscriptions(address));
            self.reevaluate(&tables);
            let idle = tables.in_flight == 0 && tables.connections.is_empty();
            (notices, idle)
        };

        debug!(
            "{} is not connected, released {} subscription(s)",
            address,
            notices.len()
        );
        for notice in &notices {
            self.sinks.dispatch(&self.events, notice);
        }
        self.announce_idle(idle);
    }

    fn start_heartbeat(self: &Arc<Self>, conn: &Arc<Connection>) {
        let hub = Arc::downgrade(self);
        let address = conn.address().clone();
        let id = conn.id();
        conn.start_heartbeat(&self.config.heartbeat, &self.metrics, move || {
            if let Some(hub) = hub.upgrade() {
                hub.teardown(&address, Some(id), DisconnectReason::HeartbeatTimeout);
            }
        });
    }
}

impl LinkHandler for HubInner {
    fn on_events(self: &Arc<Self>, conn: &Arc<Connection>, events: Vec<DecodedEvent>) {
        let address = conn.address();
        let subscriptions = self.tables.lock().registry.subscriptions_for(address);

        for event in events {
            match event {
                DecodedEvent::Message(message) => {
                    HubMetrics::incr(&self.metrics.messages_decoded);
                    trace!("{} <- {:?} ({:?})", address, message.payload, message.data_type);
                    self.sinks.deliver(address, &subscriptions, &message);
                    self.events.publish(HostEvent::DataReceived {
                        address: address.clone(),
                        message,
                    });
                },
                DecodedEvent::HeartbeatOn => self.start_heartbeat(conn),
                DecodedEvent::HeartbeatOff => {
                    conn.stop_heartbeat(self.config.join_timeout());
                },
            }
        }
    }

    fn on_link_lost(self: &Arc<Self>, conn: &Arc<Connection>, reason: DisconnectReason) {
        self.teardown(conn.address(), Some(conn.id()), reason);
    }
}

impl Drop for HubInner {
    fn drop(&mut self) {
        let join_timeout = self.config.join_timeout();
        let tables = self.tables.get_mut();
        if tables.connections.is_empty() {
            return;
        }
        debug!("Hub dropped, closing {} connection(s)", tables.connections.len());
        for (_, conn) in tables.connections.drain() {
            conn.close(join_timeout);
        }
    }
}
