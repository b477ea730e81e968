//! 单个设备连接
//!
//! 连接独占一个传输、一个读循环线程，以及可选的心跳监控线程。
//! 解码器状态归读循环所有，不在这里保存。

use crate::config::HeartbeatConfig;
use crate::heartbeat::HeartbeatSupervisor;
use crate::metrics::HubMetrics;
use crossbeam_channel::{RecvTimeoutError, bounded};
use linkhub_transport::{DeviceAddress, Transport, TransportKind};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 带超时的 join
pub(crate) trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> Result<(), JoinTimeoutError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinTimeoutError {
    TimedOut,
    Panicked,
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> Result<(), JoinTimeoutError> {
        if self.is_finished() {
            return self.join().map(|_| ()).map_err(|_| JoinTimeoutError::Panicked);
        }

        let (tx, rx) = bounded(1);
        // 看门狗线程负责 join；超时后它继续等待，目标线程退出时一并结束
        thread::spawn(move || {
            let _ = tx.send(self.join().is_ok());
        });

        match rx.recv_timeout(timeout) {
            Ok(true) => Ok(()),
            Ok(false) | Err(RecvTimeoutError::Disconnected) => Err(JoinTimeoutError::Panicked),
            Err(RecvTimeoutError::Timeout) => Err(JoinTimeoutError::TimedOut),
        }
    }
}

/// 设备连接
pub struct Connection {
    /// 连接代次，用于区分同一地址的先后两次连接
    id: u64,
    address: DeviceAddress,
    transport: Arc<dyn Transport>,
    reader: Mutex<Option<JoinHandle<()>>>,
    heartbeat: Mutex<Option<HeartbeatSupervisor>>,
    closed: AtomicBool,
    connected_at: Instant,
}

impl Connection {
    pub(crate) fn new(id: u64, address: DeviceAddress, transport: Arc<dyn Transport>) -> Self {
        Self {
            id,
            address,
            transport,
            reader: Mutex::new(None),
            heartbeat: Mutex::new(None),
            closed: AtomicBool::new(false),
            connected_at: Instant::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat.lock().is_some()
    }

    pub(crate) fn set_reader(&self, handle: JoinHandle<()>) {
        *self.reader.lock() = Some(handle);
    }

    /// 启动心跳；已在运行或连接已关闭时忽略
    ///
    /// 在心跳槽的锁内检查 `closed`，与 `close()` 互斥，
    /// 关闭之后不会再启动新的监控线程。
    pub(crate) fn start_heartbeat(
        &self,
        config: &HeartbeatConfig,
        metrics: &Arc<HubMetrics>,
        on_timeout: impl FnOnce() + Send + 'static,
    ) {
        let mut slot = self.heartbeat.lock();
        if self.is_closed() {
            return;
        }
        if slot.is_some() {
            debug!("Heartbeat already running for {}", self.address);
            return;
        }

        match HeartbeatSupervisor::spawn(
            self.address.clone(),
            self.transport.clone(),
            config.clone(),
            metrics.clone(),
            on_timeout,
        ) {
            Ok(supervisor) => {
                info!(
                    "Heartbeat started for {} (every {} ms)",
                    self.address, config.interval_ms
                );
                *slot = Some(supervisor);
            },
            Err(e) => warn!("Failed to start heartbeat for {}: {}", self.address, e),
        }
    }

    /// 停止心跳（幂等），返回之前是否在运行
    pub(crate) fn stop_heartbeat(&self, join_timeout: Duration) -> bool {
        // 先取出再停止，不在持锁时 join
        let supervisor = self.heartbeat.lock().take();
        match supervisor {
            Some(mut supervisor) => {
                supervisor.stop(join_timeout);
                info!("Heartbeat stopped for {}", self.address);
                true
            },
            None => false,
        }
    }

    /// 关闭连接：停止心跳 → 关闭传输 → 有限等待读线程退出
    ///
    /// 从读线程自身调用时不 join。
    pub(crate) fn close(&self, join_timeout: Duration) {
        {
            let _slot = self.heartbeat.lock();
            self.closed.store(true, Ordering::Release);
        }
        self.stop_heartbeat(join_timeout);
        self.transport.close();

        let reader = self.reader.lock().take();
        if let Some(handle) = reader {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if let Err(e) = handle.join_timeout(join_timeout) {
                warn!("Read loop for {} did not exit cleanly: {:?}", self.address, e);
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("kind", &self.kind())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_timeout_finished_thread() {
        let handle = thread::spawn(|| 7);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(handle.join_timeout(Duration::from_millis(100)), Ok(()));
    }

    #[test]
    fn test_join_timeout_expires() {
        let (tx, rx) = bounded::<()>(0);
        let handle = thread::spawn(move || {
            let _ = rx.recv();
        });
        assert_eq!(
            handle.join_timeout(Duration::from_millis(20)),
            Err(JoinTimeoutError::TimedOut)
        );
        drop(tx);
    }

    #[test]
    fn test_join_timeout_reports_panic() {
        let handle: JoinHandle<()> = thread::spawn(|| panic!("boom"));
        assert_eq!(
            handle.join_timeout(Duration::from_secs(1)),
            Err(JoinTimeoutError::Panicked)
        );
    }
}
