//! Raw 802.11 capture socket.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;

use thiserror::Error;

/// Largest 802.11 MPDU the capture path accepts (HT A-MSDU upper bound).
pub const MAX_MPDU: usize = 7935;

/// Read timeout on the capture socket. Bounds how long the controller loop
/// can go without polling its status queue when the air is quiet.
pub const SOCK_READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("no such interface: {0}")]
    NoSuchIface(String),
    #[error("opening capture socket: {0}")]
    Open(#[source] io::Error),
    #[error("binding capture socket to {iface}: {source}")]
    Bind {
        iface: String,
        #[source]
        source: io::Error,
    },
    #[error("reading capture socket: {0}")]
    Read(#[source] io::Error),
}

/// Source of whole captured frames.
pub trait FrameSource {
    /// Pulls the next frame into `buf`, returning its length. `Ok(None)`
    /// means the read timed out with no traffic.
    fn recv_frame(&mut self, buf: &mut [u8]) -> Result<Option<usize>, SocketError>;
}

/// `AF_PACKET` raw socket bound to one interface, protocol `ETH_P_ALL`,
/// with a receive timeout.
#[derive(Debug)]
pub struct PacketSocket {
    fd: OwnedFd,
    iface: String,
}

impl PacketSocket {
    pub fn open(iface: &str, timeout: Duration) -> Result<Self, SocketError> {
        let ifindex = nix::net::if_::if_nametoindex(iface)
            .map_err(|_| SocketError::NoSuchIface(iface.to_string()))?;

        let proto_be = (libc::ETH_P_ALL as u16).to_be();
        // Safety: plain syscall; the fd is checked and then owned.
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                proto_be as libc::c_int,
            )
        };
        if fd < 0 {
            return Err(SocketError::Open(io::Error::last_os_error()));
        }
        // Safety: fd is a fresh, valid descriptor we own.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        // Safety: tv lives across the call; option length matches.
        let rc = unsafe {
            libc::setsockopt(
                fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                (&tv as *const libc::timeval).cast(),
                mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(SocketError::Open(io::Error::last_os_error()));
        }

        // Safety: sockaddr_ll is valid all-zeroes.
        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::sa_family_t;
        addr.sll_protocol = proto_be;
        addr.sll_ifindex = ifindex as libc::c_int;
        // Safety: addr is a properly initialised sockaddr_ll.
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                (&addr as *const libc::sockaddr_ll).cast(),
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(SocketError::Bind {
                iface: iface.to_string(),
                source: io::Error::last_os_error(),
            });
        }

        Ok(Self {
            fd,
            iface: iface.to_string(),
        })
    }

    pub fn iface(&self) -> &str {
        &self.iface
    }
}

impl FrameSource for PacketSocket {
    fn recv_frame(&mut self, buf: &mut [u8]) -> Result<Option<usize>, SocketError> {
        // Safety: buf is valid for buf.len() writable bytes.
        let n = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                0,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
                    Ok(None)
                }
                _ => Err(SocketError::Read(err)),
            };
        }
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(n as usize))
    }
}

#[cfg(any(test, feature = "sim"))]
pub use replay::{ReplaySource, ReplayStep};

#[cfg(any(test, feature = "sim"))]
mod replay {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex, PoisonError};
    use std::thread;
    use std::time::Duration;

    use super::{FrameSource, SocketError};

    #[derive(Debug)]
    pub enum ReplayStep {
        Frame(Vec<u8>),
        Timeout,
        Error(String),
    }

    /// Scripted frame source. Clones share one script, so a test can keep
    /// feeding frames while the controller owns its clone.
    #[derive(Debug, Clone, Default)]
    pub struct ReplaySource {
        steps: Arc<Mutex<VecDeque<ReplayStep>>>,
    }

    impl ReplaySource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_frame(&self, bytes: &[u8]) {
            self.push(ReplayStep::Frame(bytes.to_vec()));
        }

        pub fn push_timeout(&self) {
            self.push(ReplayStep::Timeout);
        }

        pub fn push_error(&self, msg: &str) {
            self.push(ReplayStep::Error(msg.to_string()));
        }

        fn push(&self, step: ReplayStep) {
            self.steps
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(step);
        }
    }

    impl FrameSource for ReplaySource {
        fn recv_frame(&mut self, buf: &mut [u8]) -> Result<Option<usize>, SocketError> {
            let step = self
                .steps
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            match step {
                Some(ReplayStep::Frame(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(Some(n))
                }
                Some(ReplayStep::Timeout) | None => {
                    // An idle air interface; keep the loop from spinning.
                    thread::sleep(Duration::from_millis(1));
                    Ok(None)
                }
                Some(ReplayStep::Error(msg)) => Err(SocketError::Read(io::Error::other(msg))),
            }
        }
    }
}
