//! Linux RFCOMM socket
//!
//! 直接使用 `AF_BLUETOOTH` / `BTPROTO_RFCOMM` 原始 socket，不依赖 D-Bus。
//! `close()` 通过 `shutdown(SHUT_RDWR)` 唤醒阻塞中的 `recv`。

use crate::{DeviceAddress, Transport, TransportError, TransportKind};
use parking_lot::Mutex;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

/// `<bluetooth/bluetooth.h>`: BTPROTO_RFCOMM
const BTPROTO_RFCOMM: libc::c_int = 3;

/// `<bluetooth/rfcomm.h>`: struct sockaddr_rc
#[repr(C)]
struct SockaddrRc {
    rc_family: libc::sa_family_t,
    /// 小端序（与书写顺序相反）
    rc_bdaddr: [u8; 6],
    rc_channel: u8,
}

/// RFCOMM 连接
pub struct RfcommTransport {
    fd: OwnedFd,
    address: DeviceAddress,
    write_lock: Mutex<()>,
    closed: AtomicBool,
}

impl RfcommTransport {
    /// 连接设备的指定 RFCOMM 通道（阻塞）
    pub fn connect(address: &DeviceAddress, channel: u8) -> Result<Self, TransportError> {
        let mut bdaddr = address.mac_bytes().ok_or_else(|| TransportError::InvalidAddress {
            raw: address.to_string(),
            kind: TransportKind::Radio,
        })?;
        bdaddr.reverse();

        // SAFETY: socket() 返回新的文件描述符或 -1
        let raw = unsafe {
            libc::socket(
                libc::AF_BLUETOOTH,
                libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
                BTPROTO_RFCOMM,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: raw 是刚创建且未被其他对象持有的描述符
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let sockaddr = SockaddrRc {
            rc_family: libc::AF_BLUETOOTH as libc::sa_family_t,
            rc_bdaddr: bdaddr,
            rc_channel: channel,
        };

        debug!("RFCOMM connect {} channel {}", address, channel);
        // SAFETY: sockaddr 在调用期间有效，长度与结构体一致
        let ret = unsafe {
            libc::connect(
                fd.as_raw_fd(),
                &sockaddr as *const SockaddrRc as *const libc::sockaddr,
                std::mem::size_of::<SockaddrRc>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error().into());
        }

        Ok(Self {
            fd,
            address: address.clone(),
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }
}

impl Transport for RfcommTransport {
    fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        loop {
            // SAFETY: buf 在调用期间有效
            let n = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                )
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                _ if self.closed.load(Ordering::Acquire) => return Ok(0),
                _ => return Err(err.into()),
            }
        }
    }

    fn write_all(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let _guard = self.write_lock.lock();
        let mut remaining = bytes;
        while !remaining.is_empty() {
            // SAFETY: remaining 在调用期间有效；MSG_NOSIGNAL 避免 SIGPIPE
            let n = unsafe {
                libc::send(
                    self.fd.as_raw_fd(),
                    remaining.as_ptr() as *const libc::c_void,
                    remaining.len(),
                    libc::MSG_NOSIGNAL,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero).into());
            }
            remaining = &remaining[n as usize..];
        }
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // SAFETY: fd 在 self 生命周期内有效；描述符本身在 drop 时关闭
        let ret = unsafe { libc::shutdown(self.fd.as_raw_fd(), libc::SHUT_RDWR) };
        if ret < 0 {
            trace!(
                "RFCOMM shutdown {}: {}",
                self.address,
                io::Error::last_os_error()
            );
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Radio
    }
}
