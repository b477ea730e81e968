//! TCP 直连传输
//!
//! 对协议固定端口发起一次直接连接，不重试。
//! 主机名解析失败（`UnknownHost`）与 IO 失败（`Io`）是两种不同的错误，
//! 但都会终止本次连接尝试。

use crate::{Connector, DeviceAddress, Transport, TransportError, TransportKind};
use linkhub_protocol::DEFAULT_TCP_PORT;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

/// TCP 连接器
#[derive(Debug, Clone)]
pub struct TcpConnector {
    port: u16,
    connect_timeout: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_TCP_PORT, Duration::from_secs(5))
    }
}

impl TcpConnector {
    /// 创建连接器
    ///
    /// # 参数
    /// - `port`: 设备端口（协议默认 80）
    /// - `connect_timeout`: 单次连接超时
    pub fn new(port: u16, connect_timeout: Duration) -> Self {
        Self {
            port,
            connect_timeout,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn resolve(&self, address: &DeviceAddress) -> Result<SocketAddr, TransportError> {
        (address.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| {
                debug!("Resolving {} failed: {}", address, e);
                TransportError::UnknownHost(address.to_string())
            })?
            .next()
            .ok_or_else(|| TransportError::UnknownHost(address.to_string()))
    }
}

impl Connector for TcpConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn open(&self, address: &DeviceAddress) -> Result<Arc<dyn Transport>, TransportError> {
        let target = self.resolve(address)?;
        trace!("Connecting to {} ({})", address, target);

        let stream = TcpStream::connect_timeout(&target, self.connect_timeout)?;
        stream.set_nodelay(true)?;
        Ok(Arc::new(TcpTransport::new(stream)))
    }
}

/// 基于 `TcpStream` 的传输
///
/// 读写通过 `&TcpStream` 完成，读线程与写线程互不阻塞；
/// 写入由 `write_lock` 串行化，避免心跳探测与数据交错。
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    write_lock: Mutex<()>,
    closed: AtomicBool,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }
}

impl Transport for TcpTransport {
    fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match (&self.stream).read(buf) {
            Ok(n) => Ok(n),
            // shutdown 之后的读错误视为 EOF
            Err(_) if self.closed.load(Ordering::Acquire) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let _guard = self.write_lock.lock();
        (&self.stream).write_all(bytes)?;
        (&self.stream).flush()?;
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // shutdown 唤醒阻塞中的 read；失败说明对端已断开
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            trace!("TCP shutdown: {}", e);
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn loopback() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn test_open_write_read() {
        let (listener, port) = loopback();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).unwrap();
            sock.write_all(b"i1 7#").unwrap();
            buf
        });

        let connector = TcpConnector::new(port, Duration::from_secs(2));
        let addr = DeviceAddress::parse("127.0.0.1", TransportKind::Tcp).unwrap();
        let transport = connector.open(&addr).unwrap();
        transport.write_all(b"hello").unwrap();

        let mut buf = [0u8; 16];
        let n = transport.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"i1 7#");
        assert_eq!(&server.join().unwrap(), b"hello");
    }

    #[test]
    fn test_close_unblocks_read() {
        let (listener, port) = loopback();
        let server = thread::spawn(move || listener.accept().unwrap());

        let connector = TcpConnector::new(port, Duration::from_secs(2));
        let addr = DeviceAddress::parse("127.0.0.1", TransportKind::Tcp).unwrap();
        let transport = connector.open(&addr).unwrap();
        let _peer = server.join().unwrap();

        let reader = {
            let transport = transport.clone();
            thread::spawn(move || {
                let mut buf = [0u8; 8];
                transport.read(&mut buf)
            })
        };
        thread::sleep(Duration::from_millis(50));
        transport.close();
        transport.close();

        assert!(matches!(reader.join().unwrap(), Ok(0)));
        assert!(matches!(transport.write_all(b"x"), Err(TransportError::Closed)));
    }

    #[test]
    fn test_connection_refused_is_io_error() {
        let (listener, port) = loopback();
        drop(listener);

        let connector = TcpConnector::new(port, Duration::from_secs(1));
        let addr = DeviceAddress::parse("127.0.0.1", TransportKind::Tcp).unwrap();
        assert!(matches!(connector.open(&addr), Err(TransportError::Io(_))));
    }

    #[test]
    fn test_unresolvable_host() {
        let connector = TcpConnector::new(80, Duration::from_secs(1));
        let addr = DeviceAddress::parse("no-such-host.invalid", TransportKind::Tcp).unwrap();
        assert!(matches!(connector.open(&addr), Err(TransportError::UnknownHost(_))));
    }
}
