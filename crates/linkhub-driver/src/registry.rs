//! 订阅注册表（运行时）
//!
//! 记录每个订阅者当前在哪些设备上处于启用状态，引用计数即集合大小：
//!
//! - 订阅者从 0 台设备变为 ≥1 台时发送 enable
//! - 最后一台设备停用时才发送 disable
//!
//! 注册表本身不加锁，也不直接发送通知：`activate` / `deactivate` 返回
//! 待发送的 [`Notice`] 列表，由调用方在释放连接表锁之后派发，
//! 避免订阅者回调重入 Hub 时死锁。

use crate::subscription::Subscription;
use linkhub_transport::{DeviceAddress, TransportKind};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

/// 已连接设备
#[derive(Debug, Clone)]
pub struct Device {
    pub address: DeviceAddress,
    pub kind: TransportKind,
    /// 订阅者 ID → 当前生效的订阅
    pub events: BTreeMap<u32, Subscription>,
}

/// 待派发的订阅者通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Enable {
        address: DeviceAddress,
        subscription: Subscription,
    },
    Disable {
        address: DeviceAddress,
        subscription: Subscription,
    },
}

impl Notice {
    pub fn subscription(&self) -> &Subscription {
        match self {
            Self::Enable { subscription, .. } | Self::Disable { subscription, .. } => subscription,
        }
    }
}

/// 订阅注册表
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    /// 订阅者 ID → 启用该订阅者的设备集合
    enabled: HashMap<u32, BTreeSet<DeviceAddress>>,
    devices: HashMap<DeviceAddress, Device>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 激活设备的订阅
    ///
    /// 对已激活的设备重复调用是安全的：设备的订阅表按订阅者 ID 去重，
    /// 并重新发送 enable（订阅者需容忍重复 enable）。重新加载后不再存在的
    /// 订阅按停用处理。
    ///
    /// 每个不同的订阅者 ID 产生一条 enable 通知；同一 ID 的多条订阅以最后一条为准。
    pub fn activate(
        &mut self,
        address: &DeviceAddress,
        kind: TransportKind,
        subscriptions: Vec<Subscription>,
    ) -> Vec<Notice> {
        let mut events = BTreeMap::new();
        for subscription in subscriptions {
            events.insert(subscription.subscriber_id, subscription);
        }

        let mut notices = Vec::with_capacity(events.len());

        // 重新激活时，清理已经不在存储中的订阅
        if let Some(previous) = self.devices.remove(address) {
            for (id, subscription) in previous.events {
                if !events.contains_key(&id)
                    && let Some(notice) = self.release(id, address, subscription)
                {
                    notices.push(notice);
                }
            }
        }

        for (id, subscription) in &events {
            self.enabled.entry(*id).or_default().insert(address.clone());
            notices.push(Notice::Enable {
                address: address.clone(),
                subscription: subscription.clone(),
            });
        }

        debug!(
            "Activated {} subscription(s) for {}",
            events.len(),
            address
        );
        self.devices.insert(
            address.clone(),
            Device {
                address: address.clone(),
                kind,
                events,
            },
        );
        notices
    }

    /// 停用设备的订阅
    ///
    /// `fallback` 仅在设备从未激活时调用，用于从持久化存储补齐订阅集合。
    pub fn deactivate(
        &mut self,
        address: &DeviceAddress,
        fallback: impl FnOnce() -> Vec<Subscription>,
    ) -> Vec<Notice> {
        let events: BTreeMap<u32, Subscription> = match self.devices.remove(address) {
            Some(device) => device.events,
            None => fallback()
                .into_iter()
                .map(|s| (s.subscriber_id, s))
                .collect(),
        };

        events
            .into_iter()
            .filter_map(|(id, subscription)| self.release(id, address, subscription))
            .collect()
    }

    /// 从订阅者的设备集合中移除设备，集合清空时返回 disable
    fn release(
        &mut self,
        id: u32,
        address: &DeviceAddress,
        subscription: Subscription,
    ) -> Option<Notice> {
        let Some(devices) = self.enabled.get_mut(&id) else {
            warn!(
                "Subscriber {} was never enabled on {}, sending disable anyway",
                id, address
            );
            return Some(Notice::Disable {
                address: address.clone(),
                subscription,
            });
        };

        devices.remove(address);
        if devices.is_empty() {
            self.enabled.remove(&id);
            Some(Notice::Disable {
                address: address.clone(),
                subscription,
            })
        } else {
            None
        }
    }

    /// 设备当前生效的订阅
    pub fn subscriptions_for(&self, address: &DeviceAddress) -> Vec<Subscription> {
        self.devices
            .get(address)
            .map(|d| d.events.values().cloned().collect())
            .unwrap_or_default()
    }

    /// 订阅者启用的所有设备及对应的数据类型标志
    pub fn targets_for(&self, subscriber_id: u32) -> Vec<(DeviceAddress, u8)> {
        let Some(devices) = self.enabled.get(&subscriber_id) else {
            return Vec::new();
        };
        devices
            .iter()
            .filter_map(|address| {
                let flag = self.devices.get(address)?.events.get(&subscriber_id)?.flag;
                Some((address.clone(), flag))
            })
            .collect()
    }

    /// 启用某订阅者的设备数
    pub fn ref_count(&self, subscriber_id: u32) -> usize {
        self.enabled.get(&subscriber_id).map_or(0, BTreeSet::len)
    }

    pub fn is_enabled(&self, subscriber_id: u32) -> bool {
        self.enabled.contains_key(&subscriber_id)
    }

    /// 当前启用的订阅者 ID（升序）
    pub fn active_subscribers(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.enabled.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn device(&self, address: &DeviceAddress) -> Option<&Device> {
        self.devices.get(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> DeviceAddress {
        DeviceAddress::parse(&format!("00:06:66:0A:BC:{last:02X}"), TransportKind::Radio)
            .unwrap()
    }

    fn sub(id: u32, flag: u8) -> Subscription {
        Subscription::new(id, flag, format!("event-{id}"), format!("owner-{id}"), "")
    }

    fn count(notices: &[Notice], enable: bool) -> usize {
        notices
            .iter()
            .filter(|n| matches!(n, Notice::Enable { .. }) == enable)
            .count()
    }

    #[test]
    fn test_activate_one_enable_per_subscriber() {
        let mut registry = SubscriptionRegistry::new();
        let notices = registry.activate(
            &mac(1),
            TransportKind::Radio,
            vec![sub(1, b'A'), sub(2, b'B'), sub(1, b'C')],
        );
        assert_eq!(count(&notices, true), 2);
        assert_eq!(registry.device(&mac(1)).unwrap().events.len(), 2);
        // 同一 ID 以最后一条为准
        assert_eq!(registry.targets_for(1), vec![(mac(1), b'C')]);
    }

    #[test]
    fn test_reactivation_is_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        let subs = vec![sub(1, b'A'), sub(2, b'B')];
        registry.activate(&mac(1), TransportKind::Radio, subs.clone());
        let notices = registry.activate(&mac(1), TransportKind::Radio, subs);

        assert_eq!(count(&notices, true), 2);
        assert_eq!(count(&notices, false), 0);
        assert_eq!(registry.device(&mac(1)).unwrap().events.len(), 2);
        assert_eq!(registry.ref_count(1), 1);
    }

    #[test]
    fn test_reactivation_drops_removed_subscriptions() {
        let mut registry = SubscriptionRegistry::new();
        registry.activate(&mac(1), TransportKind::Radio, vec![sub(1, b'A'), sub(2, b'B')]);
        let notices = registry.activate(&mac(1), TransportKind::Radio, vec![sub(1, b'A')]);

        assert_eq!(count(&notices, false), 1);
        assert_eq!(notices[0].subscription().subscriber_id, 2);
        assert!(!registry.is_enabled(2));
    }

    #[test]
    fn test_last_device_triggers_disable() {
        let mut registry = SubscriptionRegistry::new();
        registry.activate(&mac(1), TransportKind::Radio, vec![sub(1, b'A')]);
        registry.activate(&mac(2), TransportKind::Radio, vec![sub(1, b'A')]);
        assert_eq!(registry.ref_count(1), 2);

        let notices = registry.deactivate(&mac(1), Vec::new);
        assert!(notices.is_empty());
        assert!(registry.is_enabled(1));

        let notices = registry.deactivate(&mac(2), Vec::new);
        assert_eq!(notices.len(), 1);
        assert!(matches!(&notices[0], Notice::Disable { address, .. } if *address == mac(2)));
        assert!(!registry.is_enabled(1));
        assert!(registry.active_subscribers().is_empty());
    }

    #[test]
    fn test_deactivate_unknown_device_uses_fallback() {
        let mut registry = SubscriptionRegistry::new();
        let notices = registry.deactivate(&mac(9), || vec![sub(5, b'Z')]);
        // 从未启用的订阅者仍然收到 disable
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].subscription().subscriber_id, 5);
    }

    #[test]
    fn test_fallback_skipped_for_known_device() {
        let mut registry = SubscriptionRegistry::new();
        registry.activate(&mac(1), TransportKind::Radio, vec![sub(1, b'A')]);
        let notices = registry.deactivate(&mac(1), || panic!("store must not be consulted"));
        assert_eq!(notices.len(), 1);
    }

    #[test]
    fn test_targets_span_devices() {
        let mut registry = SubscriptionRegistry::new();
        registry.activate(&mac(1), TransportKind::Radio, vec![sub(1, b'A')]);
        registry.activate(&mac(2), TransportKind::Tcp, vec![sub(1, b'Q')]);

        let mut targets = registry.targets_for(1);
        targets.sort();
        assert_eq!(targets, vec![(mac(1), b'A'), (mac(2), b'Q')]);
        assert!(registry.targets_for(42).is_empty());
    }
}
