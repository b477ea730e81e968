//! 内存 Mock 传输（`mock` feature）
//!
//! 用于在没有无线设备或网络的情况下测试连接管理：
//!
//! - [`MockTransport`]: 实现 `Transport`，读取测试注入的数据块
//! - [`MockDevice`]: 测试侧句柄，注入数据/EOF/错误，检查写入内容
//! - [`MockConnector`]: 实现 `Connector`，按地址返回预先注册的设备或失败
//!
//! # Example
//!
//! ```
//! use linkhub_transport::mock::MockConnector;
//! use linkhub_transport::{Connector, DeviceAddress, TransportKind};
//!
//! let connector = MockConnector::new(TransportKind::Tcp);
//! let addr = DeviceAddress::parse("10.0.0.7", TransportKind::Tcp).unwrap();
//! let device = connector.register(&addr);
//!
//! let transport = connector.open(&addr).unwrap();
//! transport.write_all(b"ping").unwrap();
//! assert_eq!(device.written(), vec![b"ping".to_vec()]);
//! ```

use crate::{Connector, DeviceAddress, Transport, TransportError, TransportKind};
use crossbeam_channel::{Receiver, Sender, select, unbounded};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// 注入到读端的事件
#[derive(Debug, Clone)]
pub enum MockRead {
    Chunk(Vec<u8>),
    Eof,
    Error(io::ErrorKind),
}

#[derive(Debug, Default)]
struct MockShared {
    written: Mutex<Vec<Vec<u8>>>,
    write_attempts: AtomicUsize,
    fail_writes: AtomicBool,
    closed: AtomicBool,
}

/// 内存传输
pub struct MockTransport {
    kind: TransportKind,
    rx: Receiver<MockRead>,
    /// drop 后读端立即返回 EOF
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
    shared: Arc<MockShared>,
}

/// 测试侧设备句柄
#[derive(Clone)]
pub struct MockDevice {
    feed: Sender<MockRead>,
    shared: Arc<MockShared>,
}

/// 创建一对相连的传输与设备句柄
pub fn mock_pair(kind: TransportKind) -> (MockTransport, MockDevice) {
    let (feed, rx) = unbounded();
    let (close_tx, close_rx) = unbounded();
    let shared = Arc::new(MockShared::default());
    (
        MockTransport {
            kind,
            rx,
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
            shared: shared.clone(),
        },
        MockDevice { feed, shared },
    )
}

impl Transport for MockTransport {
    fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Ok(0);
        }

        let event = select! {
            recv(self.rx) -> event => event,
            recv(self.close_rx) -> _ => return Ok(0),
        };

        match event {
            Ok(MockRead::Chunk(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            },
            Ok(MockRead::Eof) | Err(_) => Ok(0),
            Ok(MockRead::Error(kind)) => Err(io::Error::from(kind).into()),
        }
    }

    fn write_all(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.shared.write_attempts.fetch_add(1, Ordering::AcqRel);
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if self.shared.fail_writes.load(Ordering::Acquire) {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
        }
        self.shared.written.lock().push(bytes.to_vec());
        Ok(())
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.close_tx.lock().take();
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }
}

impl MockDevice {
    /// 注入一个数据块（一次 `read` 返回一块）
    pub fn push_chunk(&self, bytes: impl Into<Vec<u8>>) {
        let _ = self.feed.send(MockRead::Chunk(bytes.into()));
    }

    /// 注入 EOF
    pub fn push_eof(&self) {
        let _ = self.feed.send(MockRead::Eof);
    }

    /// 注入读错误
    pub fn push_error(&self, kind: io::ErrorKind) {
        let _ = self.feed.send(MockRead::Error(kind));
    }

    /// 已成功写入的数据（按写入顺序）
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.shared.written.lock().clone()
    }

    /// 写入尝试次数（含失败）
    pub fn write_attempts(&self) -> usize {
        self.shared.write_attempts.load(Ordering::Acquire)
    }

    /// 让后续写入全部失败
    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::Release);
    }

    /// 传输是否已被关闭
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

/// `open` 失败方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    NotPaired,
    Unreachable,
    UnknownHost,
    Refused,
}

/// 阻塞 `open` 的闸门，drop 或 `release` 后放行
pub struct OpenGate {
    _tx: Sender<()>,
}

impl OpenGate {
    pub fn release(self) {}
}

/// Mock 连接器
///
/// 未注册的地址返回 `Unreachable`。
pub struct MockConnector {
    kind: TransportKind,
    ready: Mutex<HashMap<DeviceAddress, VecDeque<MockTransport>>>,
    failures: Mutex<HashMap<DeviceAddress, MockFailure>>,
    gate: Mutex<Option<Receiver<()>>>,
    opens: AtomicUsize,
}

impl MockConnector {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            ready: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            gate: Mutex::new(None),
            opens: AtomicUsize::new(0),
        }
    }

    /// 注册一个可连接的设备，每次注册对应一次成功的 `open`
    pub fn register(&self, address: &DeviceAddress) -> MockDevice {
        let (transport, device) = mock_pair(self.kind);
        self.ready
            .lock()
            .entry(address.clone())
            .or_default()
            .push_back(transport);
        device
    }

    /// 让该地址的 `open` 失败
    pub fn fail_with(&self, address: &DeviceAddress, failure: MockFailure) {
        self.failures.lock().insert(address.clone(), failure);
    }

    /// 阻塞后续所有 `open`，直到返回的闸门被释放
    pub fn hold_opens(&self) -> OpenGate {
        let (tx, rx) = unbounded();
        *self.gate.lock() = Some(rx);
        OpenGate { _tx: tx }
    }

    /// `open` 被调用的次数
    pub fn open_calls(&self) -> usize {
        self.opens.load(Ordering::Acquire)
    }
}

impl Connector for MockConnector {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn open(&self, address: &DeviceAddress) -> Result<Arc<dyn Transport>, TransportError> {
        self.opens.fetch_add(1, Ordering::AcqRel);

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            // 闸门的发送端 drop 后 recv 返回 Err，即放行
            let _ = gate.recv();
        }

        if let Some(failure) = self.failures.lock().get(address).copied() {
            return Err(match failure {
                MockFailure::NotPaired => TransportError::NotPaired(address.clone()),
                MockFailure::Unreachable => TransportError::Unreachable {
                    address: address.clone(),
                    reason: "mock unreachable".into(),
                },
                MockFailure::UnknownHost => TransportError::UnknownHost(address.to_string()),
                MockFailure::Refused => {
                    io::Error::from(io::ErrorKind::ConnectionRefused).into()
                },
            });
        }

        let transport = self
            .ready
            .lock()
            .get_mut(address)
            .and_then(VecDeque::pop_front);

        match transport {
            Some(transport) => Ok(Arc::new(transport)),
            None => Err(TransportError::Unreachable {
                address: address.clone(),
                reason: "no mock device registered".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn addr() -> DeviceAddress {
        DeviceAddress::parse("00:06:66:0A:BC:DE", TransportKind::Radio).unwrap()
    }

    #[test]
    fn test_read_chunks_then_eof() {
        let (transport, device) = mock_pair(TransportKind::Radio);
        device.push_chunk(b"i1 5#".to_vec());
        device.push_eof();

        let mut buf = [0u8; 16];
        assert_eq!(transport.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"i1 5#");
        assert_eq!(transport.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_close_unblocks_pending_read() {
        let (transport, device) = mock_pair(TransportKind::Tcp);
        let transport = Arc::new(transport);
        let reader = {
            let transport = transport.clone();
            thread::spawn(move || {
                let mut buf = [0u8; 4];
                transport.read(&mut buf)
            })
        };
        thread::sleep(Duration::from_millis(20));
        transport.close();
        assert!(matches!(reader.join().unwrap(), Ok(0)));
        assert!(device.is_closed());
    }

    #[test]
    fn test_failing_writes_are_counted() {
        let (transport, device) = mock_pair(TransportKind::Tcp);
        device.set_fail_writes(true);
        assert!(transport.write_all(b"x").is_err());
        assert_eq!(device.write_attempts(), 1);
        assert!(device.written().is_empty());
    }

    #[test]
    fn test_connector_outcomes() {
        let connector = MockConnector::new(TransportKind::Radio);
        assert!(matches!(
            connector.open(&addr()),
            Err(TransportError::Unreachable { .. })
        ));

        connector.fail_with(&addr(), MockFailure::NotPaired);
        let err = connector.open(&addr()).err().unwrap();
        assert!(err.is_pairing_required());
        assert_eq!(connector.open_calls(), 2);
    }

    #[test]
    fn test_gate_blocks_open() {
        let connector = Arc::new(MockConnector::new(TransportKind::Radio));
        let _device = connector.register(&addr());
        let gate = connector.hold_opens();

        let opener = {
            let connector = connector.clone();
            thread::spawn(move || connector.open(&addr()).is_ok())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!opener.is_finished());
        gate.release();
        assert!(opener.join().unwrap());
    }
}
