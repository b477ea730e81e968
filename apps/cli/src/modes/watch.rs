//! Watch 模式
//!
//! 连接给定的设备并打印所有宿主事件：
//! 1. 发起全部连接
//! 2. 打印事件直到服务回到 IDLE（或 Ctrl+C）
//! 3. 断开并输出计数器

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, select};
use linkhub_driver::{DeviceAddress, HostEvent, Hub, TransportKind};
use tracing::warn;

use crate::display::{describe, metrics_table};

pub fn run_watch(
    hub: Hub,
    targets: Vec<(DeviceAddress, TransportKind)>,
    keep_alive: bool,
) -> Result<()> {
    let events = hub.subscribe();

    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("安装 Ctrl+C 处理器失败")?;

    let mut started = 0;
    for (address, kind) in &targets {
        match hub.connect(address.as_str(), *kind) {
            Ok(()) => started += 1,
            Err(e) => warn!("Skipping {}: {}", address, e),
        }
    }
    if started == 0 && !keep_alive {
        anyhow::bail!("没有可连接的设备");
    }

    loop {
        select! {
            recv(events) -> event => {
                let Ok(event) = event else { break };
                println!("{}", describe(&event));
                if !keep_alive && event == HostEvent::ServiceIdle {
                    break;
                }
            },
            recv(stop_rx) -> _ => {
                eprintln!("\n🛑 收到 Ctrl+C，断开所有连接...");
                hub.shutdown();
                break;
            },
        }
    }

    for event in events.try_iter() {
        println!("{}", describe(&event));
    }
    println!("📊 统计:\n{}", metrics_table(&hub.metrics()));
    Ok(())
}
