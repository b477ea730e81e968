//! 心跳监控
//!
//! 每个连接至多一个监控线程，由设备流中的 HeartbeatOn / HeartbeatOff
//! 控制码启停。线程按固定间隔写探测消息，连续失败达到阈值后
//! 调用超时回调（由 Hub 执行 teardown），随后退出。
//!
//! 停止是幂等的：`stop()` 取出内部句柄后再通知线程，
//! 第二次调用什么也不做。监控线程自己触发的 teardown 不会 join 自身。

use crate::config::HeartbeatConfig;
use crate::connection::JoinTimeout;
use crate::metrics::HubMetrics;
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use linkhub_transport::{DeviceAddress, Transport};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// 心跳监控线程句柄
pub struct HeartbeatSupervisor {
    address: DeviceAddress,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatSupervisor {
    /// 启动监控线程
    ///
    /// # 参数
    /// - `transport`: 连接的传输（与读循环共享）
    /// - `on_timeout`: 连续失败达到阈值时调用一次
    pub fn spawn(
        address: DeviceAddress,
        transport: Arc<dyn Transport>,
        config: HeartbeatConfig,
        metrics: Arc<HubMetrics>,
        on_timeout: impl FnOnce() + Send + 'static,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let thread_address = address.clone();

        let handle = thread::Builder::new()
            .name(format!("linkhub-hb-{address}"))
            .spawn(move || {
                let interval = config.interval();
                let mut failures = 0u32;

                loop {
                    // 等待间隔；收到停止信号或 sender 被 drop 都退出
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {},
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                            trace!("Heartbeat for {} stopped", thread_address);
                            return;
                        },
                    }

                    HubMetrics::incr(&metrics.heartbeat_probes);
                    match transport.write_all(&config.probe) {
                        Ok(()) => {
                            HubMetrics::add(&metrics.bytes_written, config.probe.len() as u64);
                            failures = 0;
                        },
                        Err(e) => {
                            HubMetrics::incr(&metrics.heartbeat_failures);
                            failures += 1;
                            warn!(
                                "Heartbeat probe to {} failed ({}/{}): {}",
                                thread_address, failures, config.failure_threshold, e
                            );
                            if failures >= config.failure_threshold {
                                warn!("Heartbeat timeout for {}", thread_address);
                                on_timeout();
                                return;
                            }
                        },
                    }
                }
            })?;

        Ok(Self {
            address,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// 停止监控（幂等）
    ///
    /// 从监控线程自身调用时只发信号，不 join。
    pub fn stop(&mut self, join_timeout: Duration) {
        let Some(stop_tx) = self.stop_tx.take() else {
            return;
        };
        let _ = stop_tx.try_send(());
        drop(stop_tx);

        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join_timeout(join_timeout).is_err() {
                debug!("Heartbeat thread for {} did not exit in time", self.address);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for HeartbeatSupervisor {
    fn drop(&mut self) {
        // 只发停止信号，不在 drop 中阻塞
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.try_send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkhub_transport::{TransportError, TransportKind};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Instant;

    /// 记录写入、可切换失败的传输
    #[derive(Default)]
    struct ProbeSink {
        writes: Mutex<Vec<Vec<u8>>>,
        attempts: AtomicUsize,
        failing: AtomicBool,
    }

    impl Transport for ProbeSink {
        fn read(&self, _: &mut [u8]) -> Result<usize, TransportError> {
            Ok(0)
        }

        fn write_all(&self, bytes: &[u8]) -> Result<(), TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }
            self.writes.lock().push(bytes.to_vec());
            Ok(())
        }

        fn close(&self) {}

        fn kind(&self) -> TransportKind {
            TransportKind::Tcp
        }
    }

    fn addr() -> DeviceAddress {
        DeviceAddress::parse("10.0.0.3", TransportKind::Tcp).unwrap()
    }

    fn fast_config() -> HeartbeatConfig {
        HeartbeatConfig {
            interval_ms: 10,
            ..HeartbeatConfig::default()
        }
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_probes_written_periodically() {
        let transport = Arc::new(ProbeSink::default());
        let mut hb = HeartbeatSupervisor::spawn(
            addr(),
            transport.clone(),
            fast_config(),
            Arc::new(HubMetrics::new()),
            || {},
        )
        .unwrap();

        assert!(wait_until(Duration::from_secs(2), || transport.writes.lock().len() >= 3));
        assert!(hb.is_running());
        hb.stop(Duration::from_secs(1));
        assert!(!hb.is_running());
        assert!(transport.writes.lock().iter().all(|w| w == &fast_config().probe));
    }

    #[test]
    fn test_timeout_after_threshold_failures() {
        let transport = Arc::new(ProbeSink::default());
        transport.failing.store(true, Ordering::SeqCst);
        let (tx, rx) = bounded(1);
        let metrics = Arc::new(HubMetrics::new());

        let _hb = HeartbeatSupervisor::spawn(
            addr(),
            transport.clone(),
            fast_config(),
            metrics.clone(),
            move || {
                let _ = tx.send(());
            },
        )
        .unwrap();

        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        // 回调之后线程退出，不再探测
        thread::sleep(Duration::from_millis(50));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.snapshot().heartbeat_failures, 2);
    }

    #[test]
    fn test_success_resets_failure_counter() {
        let transport = Arc::new(ProbeSink::default());
        let timed_out = Arc::new(AtomicBool::new(false));
        let flag = timed_out.clone();
        let config = HeartbeatConfig {
            interval_ms: 10,
            failure_threshold: 3,
            ..HeartbeatConfig::default()
        };

        let mut hb = HeartbeatSupervisor::spawn(
            addr(),
            transport.clone(),
            config,
            Arc::new(HubMetrics::new()),
            move || flag.store(true, Ordering::SeqCst),
        )
        .unwrap();

        // 交替失败/成功：连续失败永远达不到 3
        for _ in 0..4 {
            transport.failing.store(true, Ordering::SeqCst);
            let seen = transport.attempts.load(Ordering::SeqCst);
            wait_until(Duration::from_secs(1), || {
                transport.attempts.load(Ordering::SeqCst) >= seen + 1
            });
            transport.failing.store(false, Ordering::SeqCst);
            let seen = transport.attempts.load(Ordering::SeqCst);
            wait_until(Duration::from_secs(1), || {
                transport.attempts.load(Ordering::SeqCst) >= seen + 1
            });
        }
        assert!(!timed_out.load(Ordering::SeqCst));
        hb.stop(Duration::from_secs(1));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let transport = Arc::new(ProbeSink::default());
        let mut hb = HeartbeatSupervisor::spawn(
            addr(),
            transport,
            fast_config(),
            Arc::new(HubMetrics::new()),
            || {},
        )
        .unwrap();
        hb.stop(Duration::from_secs(1));
        hb.stop(Duration::from_secs(1));
        assert!(!hb.is_running());
    }
}
