//! 事件路由
//!
//! 两类出口：
//!
//! - **宿主事件总线** [`EventBus`]：连接生命周期、连接列表、enable/disable、
//!   数据到达等通知，广播给所有通过 `subscribe()` 获得的接收端
//! - **订阅者回调** [`SubscriberSink`]：按订阅的 owner 标识注册，
//!   直接接收 enable/disable 与属于自己的解码消息
//!
//! 所有通知都是 fire-and-forget：总线使用无界 channel，发送不会阻塞；
//! 已被丢弃的接收端在下一次发布时被清理。

use crate::registry::Notice;
use crate::subscription::Subscription;
use crossbeam_channel::{Receiver, Sender, unbounded};
use linkhub_protocol::DecodedMessage;
use linkhub_transport::DeviceAddress;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// 断开原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// 宿主主动断开
    Requested,
    /// 读失败或对端关闭
    ConnectionLost,
    /// 心跳连续失败
    HeartbeatTimeout,
    /// Hub 关闭
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Requested => "requested",
            Self::ConnectionLost => "connection lost",
            Self::HeartbeatTimeout => "heartbeat timeout",
            Self::Shutdown => "shutdown",
        };
        f.write_str(text)
    }
}

/// 宿主事件
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    ConnectionEstablished(DeviceAddress),
    /// 连接失败（地址可能未通过校验，因此使用原始字符串）
    ConnectionFailed {
        address: String,
        reason: String,
    },
    Disconnected {
        address: DeviceAddress,
        reason: DisconnectReason,
    },
    /// 设备未配对，需要用户完成配对
    PairingRequested(DeviceAddress),
    HeartbeatTimeout(DeviceAddress),
    /// 当前连接列表
    ConnectionList(Vec<DeviceAddress>),
    Enable {
        owner: String,
        target: String,
        address: DeviceAddress,
        subscription_id: u32,
    },
    Disable {
        owner: String,
        target: String,
        address: DeviceAddress,
        subscription_id: u32,
    },
    /// 通用数据到达通道
    DataReceived {
        address: DeviceAddress,
        message: DecodedMessage,
    },
    /// 服务进入 IDLE，宿主可以退出
    ServiceIdle,
    /// 全局 disable 广播
    DisableAll,
    /// 宿主应当退出
    Shutdown,
}

impl HostEvent {
    /// 事件关联的设备地址
    pub fn address(&self) -> Option<&str> {
        match self {
            Self::ConnectionEstablished(a)
            | Self::PairingRequested(a)
            | Self::HeartbeatTimeout(a)
            | Self::Disconnected { address: a, .. }
            | Self::Enable { address: a, .. }
            | Self::Disable { address: a, .. }
            | Self::DataReceived { address: a, .. } => Some(a.as_str()),
            Self::ConnectionFailed { address, .. } => Some(address),
            Self::ConnectionList(_) | Self::ServiceIdle | Self::DisableAll | Self::Shutdown => {
                None
            },
        }
    }
}

/// 宿主事件总线（广播）
#[derive(Default)]
pub struct EventBus {
    senders: RwLock<Vec<Sender<HostEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新建一个接收端，只接收之后发布的事件
    pub fn subscribe(&self) -> Receiver<HostEvent> {
        let (tx, rx) = unbounded();
        self.senders.write().push(tx);
        rx
    }

    /// 发布事件，顺带清理接收端已被 drop 的 sender
    pub fn publish(&self, event: HostEvent) {
        trace!("Publishing {:?}", event);
        self.senders
            .write()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn receiver_count(&self) -> usize {
        self.senders.read().len()
    }
}

/// 订阅者回调
///
/// 回调在 Hub 的工作线程（读循环、连接线程）上同步调用，
/// 实现应尽快返回；耗时处理请转发到自己的 channel。
/// 回调中可以安全地调用 Hub 的方法。
pub trait SubscriberSink: Send + Sync {
    /// 订阅在某台设备上启用
    fn on_enable(&self, address: &DeviceAddress, subscription: &Subscription);

    /// 订阅者的最后一台设备停用
    fn on_disable(&self, address: &DeviceAddress, subscription: &Subscription);

    /// 收到属于该订阅者的消息（可选）
    fn on_message(
        &self,
        address: &DeviceAddress,
        subscription: &Subscription,
        message: &DecodedMessage,
    ) {
        let _ = (address, subscription, message);
    }

    /// 全局 disable（可选）
    fn on_disable_all(&self) {}
}

/// 订阅者回调表（owner 标识 → 回调）
#[derive(Default)]
pub struct SinkRegistry {
    sinks: RwLock<HashMap<String, Arc<dyn SubscriberSink>>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册回调，返回被替换的旧回调
    pub fn register(
        &self,
        owner: impl Into<String>,
        sink: Arc<dyn SubscriberSink>,
    ) -> Option<Arc<dyn SubscriberSink>> {
        self.sinks.write().insert(owner.into(), sink)
    }

    pub fn unregister(&self, owner: &str) -> Option<Arc<dyn SubscriberSink>> {
        self.sinks.write().remove(owner)
    }

    fn get(&self, owner: &str) -> Option<Arc<dyn SubscriberSink>> {
        self.sinks.read().get(owner).cloned()
    }

    /// 派发一条注册表通知（总线 + 对应 owner 的回调）
    ///
    /// 回调在读锁之外执行，回调内部可以注册/注销。
    pub fn dispatch(&self, bus: &EventBus, notice: &Notice) {
        let (enable, address, subscription) = match notice {
            Notice::Enable {
                address,
                subscription,
            } => (true, address, subscription),
            Notice::Disable {
                address,
                subscription,
            } => (false, address, subscription),
        };

        let owner = subscription.owner.clone();
        let target = subscription.target.clone();
        let subscription_id = subscription.subscriber_id;
        bus.publish(if enable {
            HostEvent::Enable {
                owner,
                target,
                address: address.clone(),
                subscription_id,
            }
        } else {
            HostEvent::Disable {
                owner,
                target,
                address: address.clone(),
                subscription_id,
            }
        });

        if let Some(sink) = self.get(&subscription.owner) {
            if enable {
                sink.on_enable(address, subscription);
            } else {
                sink.on_disable(address, subscription);
            }
        }
    }

    /// 把消息交给设备上所有订阅的 owner
    pub fn deliver(
        &self,
        address: &DeviceAddress,
        subscriptions: &[Subscription],
        message: &DecodedMessage,
    ) {
        for subscription in subscriptions {
            if let Some(sink) = self.get(&subscription.owner) {
                sink.on_message(address, subscription, message);
            }
        }
    }

    /// 通知所有已注册的订阅者
    pub fn disable_all(&self) {
        let sinks: Vec<_> = self.sinks.read().values().cloned().collect();
        for sink in sinks {
            sink.on_disable_all();
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
