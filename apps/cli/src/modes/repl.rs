//! REPL 模式（交互式 Shell）
//!
//! 专用输入线程 + crossbeam 通道：rustyline 在输入线程内阻塞，
//! 主线程同时等待用户命令和 Hub 事件，事件到达时立即打印。

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, bounded, select};
use linkhub_driver::{DeviceAddress, Hub, OutboundPayload};
use rustyline::Editor;
use std::path::PathBuf;
use std::thread;

use crate::display::{describe, metrics_table};
use crate::settings;
use crate::target::{parse_flag, parse_target, parse_values};

/// 输入线程发给主线程的 Ctrl+C 标记
const INTERRUPT: &str = "\u{3}";

/// REPL 输入（专用输入线程）
pub struct ReplInput {
    command_rx: Receiver<String>,
    _input_thread: thread::JoinHandle<Result<()>>,
}

impl ReplInput {
    /// 创建输入线程（保留历史记录）
    pub fn new(history_path: Option<PathBuf>) -> Self {
        let (command_tx, command_rx) = bounded::<String>(10);

        // Editor 在输入线程内创建，生命周期 = REPL 会话
        let input_thread = thread::spawn(move || {
            use rustyline::error::ReadlineError;
            use rustyline::history::DefaultHistory;

            let mut rl = Editor::<(), DefaultHistory>::new()
                .map_err(|e| anyhow::anyhow!("Failed to initialize readline: {}", e))?;
            if let Some(path) = &history_path {
                rl.load_history(path).ok(); // 首次运行没有历史文件
            }

            let save = |rl: &mut Editor<(), DefaultHistory>| {
                if let Some(path) = &history_path {
                    rl.save_history(path).ok();
                }
            };

            loop {
                match rl.readline("linkhub> ") {
                    Ok(line) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        let _ = rl.add_history_entry(line.clone());
                        let exit = line == "exit" || line == "quit";
                        if command_tx.send(line).is_err() || exit {
                            break;
                        }
                    },
                    Err(ReadlineError::Interrupted) => {
                        println!("^C");
                        let _ = command_tx.send(INTERRUPT.to_string());
                    },
                    Err(ReadlineError::Eof) => break,
                    Err(err) => {
                        eprintln!("Error: {:?}", err);
                        break;
                    },
                }
            }

            save(&mut rl);
            Ok(())
        });

        Self {
            command_rx,
            _input_thread: input_thread,
        }
    }
}

/// 运行 REPL 模式
pub fn run_repl(hub: Hub) -> Result<()> {
    let history = settings::config_dir().ok().map(|dir| dir.join("history.txt"));
    if let Some(dir) = history.as_ref().and_then(|p| p.parent()) {
        std::fs::create_dir_all(dir).ok();
    }

    println!("linkhub CLI v{} - 交互式 Shell", env!("CARGO_PKG_VERSION"));
    println!("输入 'help' 查看帮助，'exit' 退出");
    println!();

    let input = ReplInput::new(history);
    let events = hub.subscribe();

    loop {
        select! {
            recv(input.command_rx) -> line => {
                // 输入线程退出（Ctrl+D）
                let Ok(line) = line else { break };
                if line == INTERRUPT {
                    eprintln!("🛑 断开所有连接");
                    hub.shutdown();
                    continue;
                }
                match handle_command(&hub, &line) {
                    Ok(Flow::Continue) => {},
                    Ok(Flow::Exit) => break,
                    Err(err) => {
                        eprintln!("❌ Error: {err}");
                        print_help_hint(&line);
                    },
                }
            },
            recv(events) -> event => {
                if let Ok(event) = event {
                    println!("{}", describe(&event));
                }
            },
        }
    }

    hub.shutdown();
    println!("👋 再见！");
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// 已连接的地址优先（大小写不敏感），否则按目标语法解析
fn lookup(hub: &Hub, raw: &str) -> Result<DeviceAddress> {
    if let Some(address) = hub.resolve(raw) {
        return Ok(address);
    }
    Ok(parse_target(raw)?.0)
}

fn arg<'a>(parts: &[&'a str], index: usize, name: &str) -> Result<&'a str> {
    parts
        .get(index)
        .copied()
        .with_context(|| format!("缺少参数 <{name}>"))
}

/// 处理一行命令
pub fn handle_command(hub: &Hub, line: &str) -> Result<Flow> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(&command) = parts.first() else {
        return Ok(Flow::Continue);
    };

    match command {
        "exit" | "quit" => return Ok(Flow::Exit),

        "help" => print_help(),

        "connect" => {
            let (address, kind) = parse_target(arg(&parts, 1, "target")?)?;
            hub.connect(address.as_str(), kind)?;
            println!("⏳ 连接 {address} ({kind})...");
        },

        "disconnect" => {
            let raw = arg(&parts, 1, "target")?;
            let (address, kind) = match hub.resolve(raw) {
                Some(address) => {
                    let kind = parse_target(address.as_str())?.1;
                    (address, kind)
                },
                None => parse_target(raw)?,
            };
            if !hub.disconnect(address.as_str(), kind)? {
                println!("⚠️  {address} 未连接");
            }
        },

        "send" => {
            let address = lookup(hub, arg(&parts, 1, "address")?)?;
            let text = parts[2..].join(" ");
            if text.is_empty() {
                bail!("缺少参数 <text>");
            }
            if !hub.send(&address, text.as_bytes()) {
                println!("⚠️  未发送到 {address}");
            }
        },

        "send-typed" => {
            let address = lookup(hub, arg(&parts, 1, "address")?)?;
            let flag = parse_flag(arg(&parts, 2, "flag")?)?;
            let payload = OutboundPayload::array(parse_values(arg(&parts, 3, "values")?));
            if !hub.send_typed(&address, flag, &payload) {
                println!("⚠️  未发送到 {address}");
            }
        },

        "notify" => {
            let id: u32 = arg(&parts, 1, "subscriber-id")?
                .parse()
                .context("subscriber-id 必须是整数")?;
            let payload = OutboundPayload::array(parse_values(arg(&parts, 2, "values")?));
            let sent = hub.send_for_subscriber(id, &payload);
            println!("📤 已发送到 {sent} 台设备");
        },

        "list" => hub.publish_connection_list(),

        "subs" => {
            let address = lookup(hub, arg(&parts, 1, "address")?)?;
            let subscriptions = hub.subscriptions_for(&address);
            if subscriptions.is_empty() {
                println!("(无订阅)");
            }
            for s in subscriptions {
                println!(
                    "  #{:<4} {} {:<16} owner={} target={}",
                    s.subscriber_id,
                    char::from(s.flag),
                    s.name,
                    s.owner,
                    s.target
                );
            }
        },

        "status" => {
            println!("📊 状态: {}", hub.state());
            for address in hub.list_connections() {
                let heartbeat = if hub.is_heartbeat_running(&address) {
                    " (heartbeat)"
                } else {
                    ""
                };
                println!("  {address}{heartbeat}");
            }
            let active = hub.active_subscribers();
            if !active.is_empty() {
                println!("  订阅者: {active:?}");
            }
        },

        "metrics" => println!("{}", metrics_table(&hub.metrics())),

        "disable-all" => hub.disable_all()?,

        other => bail!("未知命令: {other}"),
    }

    Ok(Flow::Continue)
}

/// 打印帮助信息
fn print_help() {
    println!("可用命令:");
    println!("  connect <target>                    连接设备（tcp:<host> 或 bt:<mac>）");
    println!("  disconnect <target>                 断开设备或取消连接");
    println!("  send <address> <text>               发送原始文本");
    println!("  send-typed <address> <flag> <v,..>  按 flag 编码发送");
    println!("  notify <subscriber-id> <v,..>       发送到订阅者启用的所有设备");
    println!("  list                                发布连接列表");
    println!("  subs <address>                      显示设备的订阅");
    println!("  status                              服务状态与连接");
    println!("  metrics                             计数器");
    println!("  disable-all                         全局 disable（仅 IDLE）");
    println!("  help                                显示帮助");
    println!("  exit / quit                         退出");
    println!();
    println!("快捷键:");
    println!("  Ctrl+C                              断开所有连接");
    println!("  Ctrl+D                              退出");
    println!();
}

/// 提供基于错误的帮助提示
fn print_help_hint(command: &str) {
    if command.starts_with("connect") {
        eprintln!("💡 提示: 使用 'connect tcp:192.168.1.20' 或 'connect bt:00:06:66:0A:BC:DE'");
    } else if command.starts_with("send-typed") {
        eprintln!("💡 提示: 使用 'send-typed <address> T 1,2,3'");
    } else if command.starts_with("disable-all") {
        eprintln!("💡 提示: 先断开所有连接");
    } else {
        eprintln!("💡 提示: 输入 'help' 查看所有命令");
    }
}
