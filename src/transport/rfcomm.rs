//! # Bluetooth RFCOMM Transport
//!
//! This module opens raw RFCOMM sockets to the printer's Serial Port
//! Profile (SPP) service.
//!
//! Unlike a `/dev/rfcommN` binding, a socket needs no root privileges and
//! no `rfcomm bind` step. The printer only has to be paired.
//!
//! ## Seams
//!
//! The connection state machine talks to the transport through two traits:
//!
//! - [`Connector`]: opens a link to `(mac, channel)`
//! - [`SerialLink`]: an open, exclusively owned byte pipe
//!
//! [`RfcommConnector`] is the production implementation. Tests substitute
//! in-memory links.
//!
//! ## Bluetooth Setup (Linux)
//!
//! ```bash
//! $ bluetoothctl
//! [bluetooth]# scan on
//! # Look for "CorePrint..."
//! [bluetooth]# pair 66:22:XX:XX:XX:XX
//! [bluetooth]# trust 66:22:XX:XX:XX:XX
//! ```

use std::io;
use std::time::Duration;

use crate::error::{PrinterError, Result};

/// An open byte link to the printer.
pub trait SerialLink: Send {
    /// Write the whole buffer.
    fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read whatever the printer has sent, up to `buf.len()` bytes.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Shut down both directions. Fails if the peer is already gone.
    fn shutdown(&mut self) -> io::Result<()>;

    /// Release the underlying handle, reporting close errors.
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// Opens links to a printer.
pub trait Connector: Send + Sync {
    /// Connect to `mac` on RFCOMM `channel`.
    ///
    /// `read_timeout` bounds every subsequent [`SerialLink::recv`].
    fn connect(&self, mac: &str, channel: u8, read_timeout: Duration)
    -> io::Result<Box<dyn SerialLink>>;
}

/// Production connector backed by kernel RFCOMM sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct RfcommConnector;

impl Connector for RfcommConnector {
    fn connect(
        &self,
        mac: &str,
        channel: u8,
        read_timeout: Duration,
    ) -> io::Result<Box<dyn SerialLink>> {
        #[cfg(target_os = "linux")]
        {
            let socket = RfcommSocket::connect(mac, channel, read_timeout)?;
            Ok(Box::new(socket))
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = (mac, channel, read_timeout);
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "RFCOMM sockets are only supported on Linux",
            ))
        }
    }
}

// ============================================================================
// LINUX RFCOMM SOCKET
// ============================================================================

#[cfg(target_os = "linux")]
pub use linux::RfcommSocket;

#[cfg(target_os = "linux")]
mod linux {
    use std::io;
    use std::mem;
    use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd};
    use std::time::Duration;

    use super::{SerialLink, parse_bdaddr};

    /// `BTPROTO_RFCOMM` from `<bluetooth/bluetooth.h>`
    const BTPROTO_RFCOMM: libc::c_int = 3;

    /// `struct sockaddr_rc` from `<bluetooth/rfcomm.h>`
    #[repr(C)]
    struct SockaddrRc {
        rc_family: libc::sa_family_t,
        rc_bdaddr: [u8; 6],
        rc_channel: u8,
    }

    /// # RFCOMM Stream Socket
    ///
    /// Owns the file descriptor. Dropping the socket closes it; use
    /// [`SerialLink::close`] to observe close errors.
    #[derive(Debug)]
    pub struct RfcommSocket {
        fd: OwnedFd,
    }

    impl RfcommSocket {
        /// Open a socket and connect it to `mac` on `channel`.
        pub fn connect(mac: &str, channel: u8, read_timeout: Duration) -> io::Result<Self> {
            let bdaddr = parse_bdaddr(mac).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid Bluetooth address: {}", mac),
                )
            })?;

            let raw = unsafe {
                libc::socket(
                    libc::AF_BLUETOOTH,
                    libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
                    BTPROTO_RFCOMM,
                )
            };
            if raw < 0 {
                return Err(io::Error::last_os_error());
            }
            // From here on the descriptor is closed on every early return.
            let fd = unsafe { OwnedFd::from_raw_fd(raw) };

            let addr = SockaddrRc {
                rc_family: libc::AF_BLUETOOTH as libc::sa_family_t,
                rc_bdaddr: bdaddr,
                rc_channel: channel,
            };
            let result = unsafe {
                libc::connect(
                    fd.as_raw_fd(),
                    &addr as *const SockaddrRc as *const libc::sockaddr,
                    mem::size_of::<SockaddrRc>() as libc::socklen_t,
                )
            };
            if result != 0 {
                return Err(io::Error::last_os_error());
            }

            let socket = Self { fd };
            socket.set_read_timeout(read_timeout)?;
            Ok(socket)
        }

        fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
            let tv = libc::timeval {
                tv_sec: timeout.as_secs() as libc::time_t,
                tv_usec: timeout.subsec_micros() as libc::suseconds_t,
            };
            let result = unsafe {
                libc::setsockopt(
                    self.fd.as_raw_fd(),
                    libc::SOL_SOCKET,
                    libc::SO_RCVTIMEO,
                    &tv as *const libc::timeval as *const libc::c_void,
                    mem::size_of::<libc::timeval>() as libc::socklen_t,
                )
            };
            if result != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }
    }

    impl SerialLink for RfcommSocket {
        fn send(&mut self, mut data: &[u8]) -> io::Result<()> {
            while !data.is_empty() {
                let n = unsafe {
                    libc::send(
                        self.fd.as_raw_fd(),
                        data.as_ptr() as *const libc::c_void,
                        data.len(),
                        libc::MSG_NOSIGNAL,
                    )
                };
                if n < 0 {
                    let err = io::Error::last_os_error();
                    if err.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(err);
                }
                if n == 0 {
                    return Err(io::ErrorKind::WriteZero.into());
                }
                data = &data[n as usize..];
            }
            Ok(())
        }

        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            loop {
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
                    io::ErrorKind::WouldBlock => {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "printer did not answer in time",
                        ));
                    }
                    _ => return Err(err),
                }
            }
        }

        fn shutdown(&mut self) -> io::Result<()> {
            let result = unsafe { libc::shutdown(self.fd.as_raw_fd(), libc::SHUT_RDWR) };
            if result != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        fn close(self: Box<Self>) -> io::Result<()> {
            let raw = self.fd.into_raw_fd();
            if unsafe { libc::close(raw) } != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }
    }
}

// ============================================================================
// MAC ADDRESS HELPERS
// ============================================================================

/// Validate a Bluetooth MAC address (`XX:XX:XX:XX:XX:XX` or `XX-XX-...`).
///
/// Mixing separators is rejected.
pub fn is_valid_mac(mac: &str) -> bool {
    let sep = if mac.contains('-') { '-' } else { ':' };
    let parts: Vec<&str> = mac.split(sep).collect();
    if parts.len() != 6 {
        return false;
    }
    parts
        .iter()
        .all(|part| part.len() == 2 && part.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Normalize a MAC address to upper-case, colon-separated form.
///
/// ## Example
///
/// ```
/// use coreprint::transport::rfcomm::normalize_mac;
///
/// assert_eq!(normalize_mac("aa-bb-cc-dd-ee-ff")?, "AA:BB:CC:DD:EE:FF");
/// # Ok::<(), coreprint::PrinterError>(())
/// ```
pub fn normalize_mac(mac: &str) -> Result<String> {
    let trimmed = mac.trim();
    if !is_valid_mac(trimmed) {
        return Err(PrinterError::InvalidMac(trimmed.to_string()));
    }
    Ok(trimmed.replace('-', ":").to_uppercase())
}

/// Parse a MAC into the kernel's `bdaddr_t` layout (byte-reversed).
fn parse_bdaddr(mac: &str) -> Option<[u8; 6]> {
    if !is_valid_mac(mac) {
        return None;
    }
    let mut addr = [0u8; 6];
    for (i, part) in mac.split([':', '-']).enumerate() {
        addr[5 - i] = u8::from_str_radix(part, 16).ok()?;
    }
    Some(addr)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_mac_addresses() {
        assert!(is_valid_mac("00:11:22:33:44:55"));
        assert!(is_valid_mac("AA:BB:CC:DD:EE:FF"));
        assert!(is_valid_mac("aa:bb:cc:dd:ee:ff"));
        assert!(is_valid_mac("00-11-22-33-44-55"));
    }

    #[test]
    fn test_invalid_mac_addresses() {
        assert!(!is_valid_mac("00:11:22:33:44")); // too short
        assert!(!is_valid_mac("00:11:22:33:44:55:66")); // too long
        assert!(!is_valid_mac("00-11:22-33:44-55")); // mixed separators
        assert!(!is_valid_mac("GG:HH:II:JJ:KK:LL")); // invalid hex
        assert!(!is_valid_mac("")); // empty
        assert!(!is_valid_mac("not-a-mac")); // garbage
    }

    #[test]
    fn test_normalize_mac() {
        assert_eq!(normalize_mac("aa:bb:cc:dd:ee:ff").unwrap(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(normalize_mac(" 00-1a-2b-3c-4d-5e ").unwrap(), "00:1A:2B:3C:4D:5E");
        assert!(matches!(
            normalize_mac("nope"),
            Err(PrinterError::InvalidMac(_))
        ));
    }

    #[test]
    fn test_parse_bdaddr_is_reversed() {
        assert_eq!(
            parse_bdaddr("AA:BB:CC:DD:EE:FF"),
            Some([0xFF, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA])
        );
        assert_eq!(parse_bdaddr("bogus"), None);
    }
}
