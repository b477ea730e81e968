//! 订阅记录与持久化存储
//!
//! 订阅（subscription / event）描述某个订阅者希望从某台设备接收的一类数据。
//! 持久化存储是订阅集合的唯一来源，每次激活设备时同步读取。

use linkhub_transport::DeviceAddress;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 订阅存储错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse subscriptions: {0}")]
    Parse(#[from] toml::de::Error),
}

/// 订阅记录（不可变）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    /// 订阅者 ID
    pub subscriber_id: u32,
    /// 数据类型标志（设备端按此字节分发）
    #[serde(serialize_with = "flag_to_str", deserialize_with = "flag_from_str")]
    pub flag: u8,
    /// 显示名称
    pub name: String,
    /// 所属订阅者标识
    pub owner: String,
    /// 通知目标
    #[serde(default)]
    pub target: String,
}

impl Subscription {
    pub fn new(
        subscriber_id: u32,
        flag: u8,
        name: impl Into<String>,
        owner: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            subscriber_id,
            flag,
            name: name.into(),
            owner: owner.into(),
            target: target.into(),
        }
    }
}

fn flag_to_str<S: Serializer>(flag: &u8, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&char::from(*flag).to_string())
}

/// 标志可以写成单个 ASCII 字符（`"A"`）或数值（`65`）
fn flag_from_str<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Code(u8),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Code(code) => Ok(code),
        Repr::Text(text) => match text.as_bytes() {
            [byte] if byte.is_ascii() => Ok(*byte),
            _ => Err(serde::de::Error::custom(format!(
                "flag must be a single ASCII character, got {text:?}"
            ))),
        },
    }
}

/// 持久化订阅存储
pub trait SubscriptionStore: Send + Sync {
    /// 读取设备的订阅集合（保持存储中的顺序）
    fn fetch_subscriptions(&self, address: &DeviceAddress)
    -> Result<Vec<Subscription>, StoreError>;
}

/// 内存存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<DeviceAddress, Vec<Subscription>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 替换设备的订阅集合
    pub fn set(&self, address: &DeviceAddress, subscriptions: Vec<Subscription>) {
        self.entries.write().insert(address.clone(), subscriptions);
    }

    /// 追加一条订阅
    pub fn add(&self, address: &DeviceAddress, subscription: Subscription) {
        self.entries
            .write()
            .entry(address.clone())
            .or_default()
            .push(subscription);
    }

    pub fn remove(&self, address: &DeviceAddress) {
        self.entries.write().remove(address);
    }
}

impl SubscriptionStore for MemoryStore {
    fn fetch_subscriptions(
        &self,
        address: &DeviceAddress,
    ) -> Result<Vec<Subscription>, StoreError> {
        Ok(self.entries.read().get(address).cloned().unwrap_or_default())
    }
}

/// TOML 文件存储
///
/// 每次读取都重新加载文件，外部修改立即生效：
///
/// ```toml
/// [[device]]
/// address = "00:06:66:0A:BC:DE"
///
/// [[device.subscription]]
/// subscriber_id = 1
/// flag = "A"
/// name = "Temperature"
/// owner = "thermo"
/// target = "thermo/receiver"
/// ```
#[derive(Debug, Clone)]
pub struct TomlStore {
    path: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct StoreFile {
    #[serde(default)]
    device: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize)]
struct DeviceEntry {
    address: String,
    #[serde(default)]
    subscription: Vec<Subscription>,
}

impl TomlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<StoreFile, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            // 文件不存在等价于没有任何订阅
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StoreFile::default()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            },
        };
        Ok(toml::from_str(&content)?)
    }
}

impl SubscriptionStore for TomlStore {
    fn fetch_subscriptions(
        &self,
        address: &DeviceAddress,
    ) -> Result<Vec<Subscription>, StoreError> {
        Ok(self
            .read()?
            .device
            .into_iter()
            .filter(|entry| entry.address.trim().eq_ignore_ascii_case(address.as_str()))
            .flat_map(|entry| entry.subscription)
            .collect())
    }
}
