//! RFCOMM 无线链路
//!
//! 打开流程：
//!
//! 1. 检查设备是否已配对，未配对返回 `NotPaired`（调用方提示配对，不自动重试）
//! 2. 按 SPP 服务 UUID 查找 RFCOMM 通道并连接
//! 3. 查找或连接失败时回退到固定通道（默认 1）
//! 4. 回退仍失败返回 `Unreachable`
//!
//! 配对状态与服务记录来自 BlueZ 的持久化目录（默认 `/var/lib/bluetooth`）。

use crate::{Connector, DeviceAddress, Transport, TransportError, TransportKind};
use linkhub_protocol::SPP_UUID;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// 无线链路后端
///
/// 把系统相关的配对查询、服务发现和 socket 连接与打开流程分离，
/// 便于替换为其他蓝牙栈或测试实现。
pub trait RadioBackend: Send + Sync {
    /// 设备是否已配对
    fn is_paired(&self, address: &DeviceAddress) -> Result<bool, TransportError>;

    /// 查找指定服务 UUID 的 RFCOMM 通道
    fn service_channel(&self, address: &DeviceAddress, uuid: &str)
    -> Result<u8, TransportError>;

    /// 连接指定 RFCOMM 通道
    fn connect_channel(
        &self,
        address: &DeviceAddress,
        channel: u8,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}

/// 无线链路连接器
pub struct RadioConnector {
    backend: Arc<dyn RadioBackend>,
    fallback_channel: u8,
}

impl RadioConnector {
    pub fn new(backend: Arc<dyn RadioBackend>, fallback_channel: u8) -> Self {
        Self {
            backend,
            fallback_channel,
        }
    }

    /// 使用 BlueZ 后端
    pub fn bluez(root: impl Into<PathBuf>, fallback_channel: u8) -> Self {
        Self::new(Arc::new(BluezBackend::new(root)), fallback_channel)
    }
}

impl Connector for RadioConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Radio
    }

    fn open(&self, address: &DeviceAddress) -> Result<Arc<dyn Transport>, TransportError> {
        if !self.backend.is_paired(address)? {
            return Err(TransportError::NotPaired(address.clone()));
        }

        match self.backend.service_channel(address, SPP_UUID) {
            Ok(channel) => match self.backend.connect_channel(address, channel) {
                Ok(transport) => return Ok(transport),
                Err(e) => warn!(
                    "Connecting {} on service channel {} failed: {}, falling back to channel {}",
                    address, channel, e, self.fallback_channel
                ),
            },
            Err(e) => warn!(
                "Service lookup for {} failed: {}, falling back to channel {}",
                address, e, self.fallback_channel
            ),
        }

        self.backend
            .connect_channel(address, self.fallback_channel)
            .map_err(|e| TransportError::Unreachable {
                address: address.clone(),
                reason: e.to_string(),
            })
    }
}

/// BlueZ 持久化目录后端
///
/// 目录结构：
///
/// ```text
/// <root>/<adapter>/<device>/info      # 含 [LinkKey] 段表示已配对
/// <root>/<adapter>/cache/<device>     # [ServiceRecords] 段，SDP 记录十六进制
/// ```
#[derive(Debug, Clone)]
pub struct BluezBackend {
    root: PathBuf,
}

impl BluezBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 本机适配器目录（目录名为 MAC 地址）
    ///
    /// 目录不存在视为没有适配器；无权限等其他错误返回 `Unreachable`，
    /// 不能当作“未配对”。
    fn adapters(&self, address: &DeviceAddress) -> Result<Vec<PathBuf>, TransportError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("BlueZ store {} does not exist", self.root.display());
                return Ok(Vec::new());
            },
            Err(e) => {
                return Err(TransportError::Unreachable {
                    address: address.clone(),
                    reason: format!("cannot read BlueZ store {}: {}", self.root.display(), e),
                });
            },
        };

        Ok(entries
            .filter_map(Result::ok)
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                entry.path().is_dir()
                    && DeviceAddress::parse(&name, TransportKind::Radio).is_ok()
            })
            .map(|entry| entry.path())
            .collect())
    }
}

impl RadioBackend for BluezBackend {
    fn is_paired(&self, address: &DeviceAddress) -> Result<bool, TransportError> {
        for adapter in self.adapters(address)? {
            let info = adapter.join(address.as_str()).join("info");
            match fs::read_to_string(&info) {
                Ok(content) => {
                    if content.lines().any(|l| l.trim() == "[LinkKey]") {
                        trace!("{} paired via {}", address, adapter.display());
                        return Ok(true);
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => return Err(e.into()),
            }
        }
        Ok(false)
    }

    fn service_channel(
        &self,
        address: &DeviceAddress,
        uuid: &str,
    ) -> Result<u8, TransportError> {
        let unreachable = |reason: String| TransportError::Unreachable {
            address: address.clone(),
            reason,
        };

        for adapter in self.adapters(address)? {
            let cache = adapter.join("cache").join(address.as_str());
            let content = match fs::read_to_string(&cache) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if let Some(channel) = find_rfcomm_channel(&content, uuid) {
                return Ok(channel);
            }
        }
        Err(unreachable(format!("no cached service record for {uuid}")))
    }

    fn connect_channel(
        &self,
        address: &DeviceAddress,
        channel: u8,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        #[cfg(all(target_os = "linux", feature = "radio"))]
        {
            let socket = crate::rfcomm::RfcommTransport::connect(address, channel)?;
            Ok(Arc::new(socket))
        }

        #[cfg(not(all(target_os = "linux", feature = "radio")))]
        {
            Err(TransportError::Unreachable {
                address: address.clone(),
                reason: format!("RFCOMM channel {channel} not supported on this platform"),
            })
        }
    }
}

/// 在 `[ServiceRecords]` 段中查找包含指定 UUID 的记录，并解析其 RFCOMM 通道
///
/// SDP 记录以十六进制保存。服务类 UUID 可能以 16 位（`19xxxx`）
/// 或 128 位（`1C` + 32 位十六进制）编码；RFCOMM 协议描述符为
/// `19 0003` 后跟 `08 <channel>`。
fn find_rfcomm_channel(cache: &str, uuid: &str) -> Option<u8> {
    let uuid128: String = uuid
        .chars()
        .filter(|c| *c != '-')
        .collect::<String>()
        .to_ascii_uppercase();
    let uuid16 = format!("19{}", uuid128.get(4..8)?);
    let uuid128 = format!("1C{uuid128}");

    let mut in_records = false;
    for line in cache.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_records = line == "[ServiceRecords]";
            continue;
        }
        if !in_records {
            continue;
        }

        let Some((_, record)) = line.split_once('=') else {
            continue;
        };
        let record = record.to_ascii_uppercase();
        if !record.contains(&uuid16) && !record.contains(&uuid128) {
            continue;
        }

        if let Some(pos) = record.find("19000308") {
            let hex = record.get(pos + 8..pos + 10)?;
            return u8::from_str_radix(hex, 16).ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    const MAC: &str = "00:06:66:0A:BC:DE";
    const ADAPTER: &str = "11:22:33:44:55:66";

    // SPP 服务记录：服务类 0x1101，RFCOMM 通道 3
    const SPP_RECORD: &str = "0x00010000=35310900000A000100000900013503191101090004350C350319010035051900030803";

    fn addr() -> DeviceAddress {
        DeviceAddress::parse(MAC, TransportKind::Radio).unwrap()
    }

    fn bluez_store(paired: bool, record: Option<&str>) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let device = dir.path().join(ADAPTER).join(MAC);
        fs::create_dir_all(&device).unwrap();
        let info = if paired {
            "[General]\nName=HC-06\n\n[LinkKey]\nKey=0123\nType=0\n"
        } else {
            "[General]\nName=HC-06\n"
        };
        fs::write(device.join("info"), info).unwrap();

        if let Some(record) = record {
            let cache = dir.path().join(ADAPTER).join("cache");
            fs::create_dir_all(&cache).unwrap();
            fs::write(
                cache.join(MAC),
                format!("[General]\nName=HC-06\n\n[ServiceRecords]\n{record}\n"),
            )
            .unwrap();
        }
        dir
    }

    #[test]
    fn test_pairing_from_link_key() {
        let store = bluez_store(true, None);
        assert!(BluezBackend::new(store.path()).is_paired(&addr()).unwrap());

        let store = bluez_store(false, None);
        assert!(!BluezBackend::new(store.path()).is_paired(&addr()).unwrap());
    }

    #[test]
    fn test_missing_store_is_unpaired() {
        let backend = BluezBackend::new("/nonexistent/linkhub/bluetooth");
        assert!(!backend.is_paired(&addr()).unwrap());
    }

    #[test]
    fn test_unreadable_store_is_not_reported_as_unpaired() {
        // 根目录是普通文件：read_dir 失败但不是 NotFound
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("bluetooth");
        fs::write(&root, "").unwrap();

        let backend = BluezBackend::new(&root);
        assert!(matches!(
            backend.is_paired(&addr()),
            Err(TransportError::Unreachable { .. })
        ));

        let connector = RadioConnector::bluez(&root, 1);
        let err = connector.open(&addr()).err().unwrap();
        assert!(!err.is_pairing_required());
        assert!(matches!(err, TransportError::Unreachable { .. }));
    }

    #[test]
    fn test_service_channel_from_cache() {
        let store = bluez_store(true, Some(SPP_RECORD));
        let backend = BluezBackend::new(store.path());
        assert_eq!(backend.service_channel(&addr(), SPP_UUID).unwrap(), 3);
    }

    #[test]
    fn test_service_channel_missing_record() {
        let store = bluez_store(true, Some("0x00010001=3503191105"));
        let backend = BluezBackend::new(store.path());
        assert!(matches!(
            backend.service_channel(&addr(), SPP_UUID),
            Err(TransportError::Unreachable { .. })
        ));
    }

    #[test]
    fn test_records_outside_section_ignored() {
        let cache = format!("[General]\n{SPP_RECORD}\n");
        assert_eq!(find_rfcomm_channel(&cache, SPP_UUID), None);
    }

    /// 可编程的后端：记录被尝试连接的通道，可达通道连接到本地 TCP 监听端口
    struct FakeBackend {
        paired: bool,
        channel: Option<u8>,
        reachable: Option<(u8, u16)>,
        attempts: Mutex<Vec<u8>>,
    }

    impl RadioBackend for FakeBackend {
        fn is_paired(&self, _: &DeviceAddress) -> Result<bool, TransportError> {
            Ok(self.paired)
        }

        fn service_channel(&self, address: &DeviceAddress, _: &str) -> Result<u8, TransportError> {
            self.channel.ok_or_else(|| TransportError::Unreachable {
                address: address.clone(),
                reason: "no record".into(),
            })
        }

        fn connect_channel(
            &self,
            address: &DeviceAddress,
            channel: u8,
        ) -> Result<Arc<dyn Transport>, TransportError> {
            self.attempts.lock().push(channel);
            match self.reachable {
                Some((ch, port)) if ch == channel => {
                    let stream = std::net::TcpStream::connect(("127.0.0.1", port))?;
                    Ok(Arc::new(crate::TcpTransport::new(stream)))
                },
                _ => Err(TransportError::Unreachable {
                    address: address.clone(),
                    reason: format!("channel {channel} refused"),
                }),
            }
        }
    }

    fn fake(paired: bool, channel: Option<u8>, reachable: Option<(u8, u16)>) -> Arc<FakeBackend> {
        Arc::new(FakeBackend {
            paired,
            channel,
            reachable,
            attempts: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn test_unpaired_fails_without_connecting() {
        let backend = fake(false, Some(3), None);
        let connector = RadioConnector::new(backend.clone(), 1);
        assert!(matches!(
            connector.open(&addr()),
            Err(TransportError::NotPaired(_))
        ));
        assert!(backend.attempts.lock().is_empty());
    }

    #[test]
    fn test_service_channel_used_first() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let backend = fake(true, Some(3), Some((3, port)));
        let connector = RadioConnector::new(backend.clone(), 1);
        assert!(connector.open(&addr()).is_ok());
        assert_eq!(*backend.attempts.lock(), vec![3]);
    }

    #[test]
    fn test_falls_back_when_service_lookup_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let backend = fake(true, None, Some((1, port)));
        let connector = RadioConnector::new(backend.clone(), 1);
        assert!(connector.open(&addr()).is_ok());
        assert_eq!(*backend.attempts.lock(), vec![1]);
    }

    #[test]
    fn test_unreachable_after_fallback_fails() {
        let backend = fake(true, Some(3), None);
        let connector = RadioConnector::new(backend.clone(), 1);
        assert!(matches!(
            connector.open(&addr()),
            Err(TransportError::Unreachable { .. })
        ));
        assert_eq!(*backend.attempts.lock(), vec![3, 1]);
    }
}
