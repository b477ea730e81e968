//! 服务状态定义
//!
//! - **Idle**: 连接表为空，且没有进行中的连接/断开操作
//! - **Busy**: 有连接/断开操作正在进行（瞬态）
//! - **Active**: 连接表非空，且没有进行中的操作
//!
//! 只有 Idle 状态允许宿主进程退出，以及执行 disable-all。

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// 服务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ServiceState {
    #[default]
    Idle = 0,
    Busy = 1,
    Active = 2,
}

impl ServiceState {
    /// 从 u8 转换
    ///
    /// 如果值无效，返回 Idle。
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Busy,
            2 => Self::Active,
            _ => Self::Idle,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Busy => "BUSY",
            Self::Active => "ACTIVE",
        };
        f.write_str(name)
    }
}

/// 服务状态（原子版本，用于线程间共享）
///
/// 只在连接表锁内写入，读取无锁。
#[derive(Debug, Default)]
pub struct AtomicServiceState {
    inner: AtomicU8,
}

impl AtomicServiceState {
    pub fn new(state: ServiceState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self) -> ServiceState {
        ServiceState::from_u8(self.inner.load(Ordering::Acquire))
    }

    /// 设置新状态，返回旧状态
    pub fn swap(&self, state: ServiceState) -> ServiceState {
        ServiceState::from_u8(self.inner.swap(state.as_u8(), Ordering::AcqRel))
    }
}
