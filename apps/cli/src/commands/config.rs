//! 配置管理命令

use anyhow::{Context, Result};
use clap::Subcommand;
use std::fs;

use crate::settings::{self, CONFIG_FILE, SUBSCRIPTIONS_FILE, Settings};

const SUBSCRIPTIONS_TEMPLATE: &str = r#"# linkhub subscriptions
#
# [[device]]
# address = "00:06:66:0A:BC:DE"
#
# [[device.subscription]]
# subscriber_id = 1
# flag = "T"
# name = "Temperature"
# owner = "thermo"
# target = "thermo/rx"
"#;

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 打印生效的配置（TOML）
    Show,

    /// 打印配置文件路径
    Path,

    /// 在默认目录写入配置模板
    Init {
        /// 覆盖已存在的文件
        #[arg(short, long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub fn execute(self, settings: &Settings) -> Result<()> {
        match self {
            ConfigCommand::Show => {
                let config = settings.load_config()?;
                print!("{}", toml::to_string_pretty(&config)?);
            },

            ConfigCommand::Path => {
                let dir = settings::config_dir()?;
                println!("config:        {}", dir.join(CONFIG_FILE).display());
                println!("subscriptions: {}", dir.join(SUBSCRIPTIONS_FILE).display());
            },

            ConfigCommand::Init { force } => {
                let dir = settings::config_dir()?;
                fs::create_dir_all(&dir).context("创建配置目录失败")?;

                let config_path = dir.join(CONFIG_FILE);
                if config_path.exists() && !force {
                    anyhow::bail!("{} 已存在（使用 --force 覆盖）", config_path.display());
                }
                let content = toml::to_string_pretty(&linkhub_driver::HubConfig::default())?;
                fs::write(&config_path, content).context("写入配置文件失败")?;
                println!("✅ 已写入 {}", config_path.display());

                let subs_path = dir.join(SUBSCRIPTIONS_FILE);
                if !subs_path.exists() || force {
                    fs::write(&subs_path, SUBSCRIPTIONS_TEMPLATE).context("写入订阅文件失败")?;
                    println!("✅ 已写入 {}", subs_path.display());
                }
            },
        }
        Ok(())
    }
}
