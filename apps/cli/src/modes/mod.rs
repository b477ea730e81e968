//! 运行模式
//!
//! - Watch 模式：连接给定设备并打印事件，服务回到 IDLE 时退出
//! - REPL 模式：交互式 Shell

pub mod repl;
pub mod watch;
