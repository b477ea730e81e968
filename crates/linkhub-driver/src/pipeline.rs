//! 每个连接的读循环
//!
//! 读循环独占该连接的 `FrameDecoder`，把阻塞读取得到的数据块解码后
//! 交给 [`LinkHandler`]：
//!
//! - 帧头损坏：记录警告并丢弃该块，连接继续
//! - EOF / 读错误：停止解码（不冲刷未结束的缓冲），以 `ConnectionLost` 通知
//! - 连接已被关闭（teardown 关闭了传输）：直接退出，不再通知

use crate::connection::Connection;
use crate::metrics::HubMetrics;
use crate::router::DisconnectReason;
use linkhub_protocol::{DecodedEvent, FrameDecoder};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// 读循环的回调接口
pub(crate) trait LinkHandler: Send + Sync + 'static {
    /// 一个数据块解码得到的事件（保持流内顺序）
    fn on_events(self: &Arc<Self>, conn: &Arc<Connection>, events: Vec<DecodedEvent>);

    /// 连接在读侧丢失
    fn on_link_lost(self: &Arc<Self>, conn: &Arc<Connection>, reason: DisconnectReason);
}

/// 读循环主体（在独立线程中运行）
///
/// 持有 `Weak` 引用：Hub 被释放后读循环在下一块数据到达或 EOF 时退出。
pub(crate) fn read_loop<H: LinkHandler>(
    handler: Weak<H>,
    conn: Arc<Connection>,
    buffer_size: usize,
    metrics: Arc<HubMetrics>,
) {
    let address = conn.address().clone();
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; buffer_size];
    debug!("Read loop started for {}", address);

    let reason = loop {
        let n = match conn.transport().read(&mut buf) {
            Ok(0) => {
                if !conn.is_closed() {
                    info!("{} closed the connection", address);
                }
                break DisconnectReason::ConnectionLost;
            },
            Ok(n) => n,
            Err(e) => {
                if !conn.is_closed() {
                    error!("Read from {} failed: {}", address, e);
                }
                break DisconnectReason::ConnectionLost;
            },
        };

        HubMetrics::incr(&metrics.chunks_read);
        HubMetrics::add(&metrics.bytes_read, n as u64);

        let events: Vec<DecodedEvent> = match decoder.decode(&buf[..n]) {
            Ok(decoded) => decoded.collect(),
            Err(e) => {
                HubMetrics::incr(&metrics.malformed_frames);
                warn!("Dropping malformed frame from {}: {}", address, e);
                continue;
            },
        };

        if events.is_empty() {
            continue;
        }
        let Some(handler) = handler.upgrade() else {
            debug!("Hub released, read loop for {} exiting", address);
            return;
        };
        handler.on_events(&conn, events);
    };

    if !decoder.pending().is_empty() {
        debug!(
            "Discarding {} unterminated byte(s) from {}",
            decoder.pending().len(),
            address
        );
    }

    if conn.is_closed() {
        debug!("Read loop for {} exited", address);
        return;
    }
    if let Some(handler) = handler.upgrade() {
        handler.on_link_lost(&conn, reason);
    }
}
