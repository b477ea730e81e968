//! 配置文件定位与 Hub 构建
//!
//! 查找顺序：命令行参数 → `<config_dir>/linkhub/` 下的默认文件 → 内置默认值。

use anyhow::{Context, Result};
use linkhub_driver::{Hub, HubBuilder, HubConfig, TomlStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const CONFIG_FILE: &str = "config.toml";
pub const SUBSCRIPTIONS_FILE: &str = "subscriptions.toml";

/// 默认配置目录
pub fn config_dir() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("无法确定配置目录"))?;
    path.push("linkhub");
    Ok(path)
}

/// 命令行给出的路径优先；否则使用默认目录下存在的文件
fn resolve(explicit: Option<&Path>, file_name: &str) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let path = config_dir().ok()?.join(file_name);
    path.exists().then_some(path)
}

/// 全局选项
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub config_path: Option<PathBuf>,
    pub subscriptions_path: Option<PathBuf>,
}

impl Settings {
    /// 加载 Hub 配置（找不到文件时使用默认值）
    pub fn load_config(&self) -> Result<HubConfig> {
        match resolve(self.config_path.as_deref(), CONFIG_FILE) {
            Some(path) => {
                debug!("Loading config from {}", path.display());
                HubConfig::load(&path)
                    .with_context(|| format!("加载配置失败: {}", path.display()))
            },
            None => Ok(HubConfig::default()),
        }
    }

    pub fn subscriptions_file(&self) -> Option<PathBuf> {
        resolve(self.subscriptions_path.as_deref(), SUBSCRIPTIONS_FILE)
    }

    /// 按配置构建 Hub
    pub fn build_hub(&self) -> Result<Hub> {
        let config = self.load_config()?;
        let mut builder = HubBuilder::new().config(config);
        if let Some(path) = self.subscriptions_file() {
            info!("Using subscriptions from {}", path.display());
            builder = builder.subscription_store(Arc::new(TomlStore::new(path)));
        }
        Ok(builder.build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_explicit_config_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.toml");
        fs::write(&path, "tcp_port = 8080\n[heartbeat]\ninterval_ms = 250\n").unwrap();

        let settings = Settings {
            config_path: Some(path),
            ..Settings::default()
        };
        let config = settings.load_config().unwrap();
        assert_eq!(config.tcp_port, 8080);
        assert_eq!(config.heartbeat.interval_ms, 250);
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let settings = Settings {
            config_path: Some(PathBuf::from("/nonexistent/linkhub.toml")),
            ..Settings::default()
        };
        assert!(settings.load_config().is_err());
    }

    #[test]
    fn test_explicit_subscriptions_path_wins() {
        let settings = Settings {
            subscriptions_path: Some(PathBuf::from("subs.toml")),
            ..Settings::default()
        };
        assert_eq!(settings.subscriptions_file(), Some(PathBuf::from("subs.toml")));
    }
}
