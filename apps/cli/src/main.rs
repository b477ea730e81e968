//! # linkhub CLI
//!
//! 连接串行设备并路由消息的命令行宿主。
//!
//! ## 双模式架构
//!
//! ### Watch 模式（推荐用于脚本）
//!
//! ```bash
//! # 连接两台设备，打印事件，全部断开后退出
//! linkhub-cli watch bt:00:06:66:0A:BC:DE tcp:192.168.1.20
//! ```
//!
//! ### REPL 模式（推荐用于调试）
//!
//! ```bash
//! $ linkhub-cli shell
//! linkhub> connect tcp:192.168.1.20
//! linkhub> send-typed 192.168.1.20 T 1,2,3
//! linkhub> disconnect 192.168.1.20
//! linkhub> exit
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;
mod modes;
mod settings;
mod target;

use commands::ConfigCommand;
use modes::repl::run_repl;
use modes::watch::run_watch;
use settings::Settings;

/// linkhub CLI - 设备连接命令行工具
#[derive(Parser, Debug)]
#[command(name = "linkhub-cli")]
#[command(about = "Command-line host for linkhub device links", long_about = None)]
#[command(version)]
struct Cli {
    /// Hub 配置文件（TOML）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 订阅文件（TOML）
    #[arg(short, long, global = true)]
    subscriptions: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 连接设备并打印事件
    Watch {
        /// 设备目标（tcp:<host>、bt:<mac>，或直接给出地址）
        #[arg(required = true)]
        targets: Vec<String>,

        /// 所有连接断开后继续运行（直到 Ctrl+C）
        #[arg(short, long)]
        keep_alive: bool,
    },

    /// 启动交互式 Shell（REPL 模式）
    Shell,
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("linkhub=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings {
        config_path: cli.config,
        subscriptions_path: cli.subscriptions,
    };

    match cli.command {
        Commands::Config(cmd) => cmd.execute(&settings),

        Commands::Watch {
            targets,
            keep_alive,
        } => {
            let targets = targets
                .iter()
                .map(|raw| target::parse_target(raw))
                .collect::<Result<Vec<_>>>()?;
            let hub = settings.build_hub()?;
            run_watch(hub, targets, keep_alive)
        },

        Commands::Shell => run_repl(settings.build_hub()?),
    }
}
