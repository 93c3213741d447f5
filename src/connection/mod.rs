//! # Connection State Machine
//!
//! Owns the RFCOMM link to one printer and tracks its lifecycle:
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected
//!                               │                 │
//!                             fail           write fails / reconnect
//!                               ▼                 ▼
//!                             Error ◀──────── Connecting
//! ```
//!
//! Every state change is pushed to subscribers (see [`observer`]).
//!
//! ## Locking
//!
//! A single mutex guards the socket. Sends, status queries, reconnects and
//! teardown all take it, so writes from a print job can never interleave
//! with a status probe. Session bookkeeping and the observable state live
//! behind their own small locks and are never held across socket I/O, so
//! [`Connection::state`] and [`Connection::is_connected`] stay cheap from any
//! thread.
//!
//! ## Reconnection
//!
//! [`Connection::reconnect`] uses the last MAC address and discovered
//! channel. The first attempt after a success is immediate; later attempts
//! back off exponentially per [`ReconnectPolicy`]. After `max_attempts`
//! consecutive failures it refuses and parks the connection in `Error`.

pub mod controller;
pub mod observer;

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{PrinterError, Result};
use crate::printer::{ConnectionConfig, DEFAULT_RFCOMM_CHANNEL, ReconnectPolicy};
use crate::protocol::commands::{END_PRINT, INITIALIZE, START_PRINT, STATUS_REQUEST, STATUS_RESPONSE_LENGTH};
use crate::sync::lock;
use crate::transport::{ChannelDiscovery, Connector, RfcommConnector, SdpToolDiscovery, SerialLink};

pub use controller::ConnectionController;
pub use observer::{ConnectionObserver, SubscriptionId};

use observer::ObserverRegistry;

/// Lifecycle of the printer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

type Link = Option<Box<dyn SerialLink>>;

#[derive(Debug, Default)]
struct Session {
    mac_address: Option<String>,
    device_name: Option<String>,
    reconnect_attempts: u32,
    last_successful_connection: Option<DateTime<Utc>>,
    discovered_channel: Option<u8>,
}

/// Why a single open-and-verify attempt failed.
enum AttemptError {
    /// The socket could not be opened.
    Socket(io::Error),
    /// The socket opened but the status probe failed.
    Status(PrinterError),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Socket(e) => write!(f, "{}", e),
            AttemptError::Status(e) => write!(f, "{}", e),
        }
    }
}

/// A managed connection to one printer.
///
/// Shareable across threads (`Arc<Connection>`); all methods take `&self`.
pub struct Connection {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    discovery: Arc<dyn ChannelDiscovery>,
    link: Mutex<Link>,
    link_open: AtomicBool,
    state: Mutex<ConnectionState>,
    session: Mutex<Session>,
    auto_reconnect: AtomicBool,
    observers: ObserverRegistry,
}

impl Connection {
    /// Connection over real RFCOMM sockets with `sdptool` channel discovery.
    pub fn new(config: ConnectionConfig) -> Self {
        let discovery = SdpToolDiscovery::new(config.discovery_timeout);
        Self::with_transport(config, Arc::new(RfcommConnector), Arc::new(discovery))
    }

    /// Connection over caller-supplied transport pieces.
    pub fn with_transport(
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        discovery: Arc<dyn ChannelDiscovery>,
    ) -> Self {
        let auto_reconnect = AtomicBool::new(config.auto_reconnect);
        Self {
            config,
            connector,
            discovery,
            link: Mutex::new(None),
            link_open: AtomicBool::new(false),
            state: Mutex::new(ConnectionState::Disconnected),
            session: Mutex::new(Session::default()),
            auto_reconnect,
            observers: ObserverRegistry::default(),
        }
    }

    // ========================================================================
    // Observation
    // ========================================================================

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    /// True only when the state is `Connected` and a socket is held.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && self.link_open.load(Ordering::Acquire)
    }

    pub fn mac_address(&self) -> Option<String> {
        lock(&self.session).mac_address.clone()
    }

    pub fn device_name(&self) -> Option<String> {
        lock(&self.session).device_name.clone()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        lock(&self.session).reconnect_attempts
    }

    /// Time of the last successful connect, status probe or write.
    pub fn last_successful_connection(&self) -> Option<DateTime<Utc>> {
        lock(&self.session).last_successful_connection
    }

    /// Channel found by SDP discovery during the last connect, if it was used.
    pub fn discovered_channel(&self) -> Option<u8> {
        lock(&self.session).discovered_channel
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect.load(Ordering::Relaxed)
    }

    /// Reconnect automatically when a write fails, even if the caller did
    /// not ask for it.
    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.auto_reconnect.store(enabled, Ordering::Relaxed);
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        self.config.reconnect
    }

    /// Register a state observer. See [`observer`] for the callback rules.
    pub fn subscribe(&self, observer: Arc<dyn ConnectionObserver>) -> SubscriptionId {
        self.observers.subscribe(observer)
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open a link to `mac` and verify it with a status query.
    ///
    /// With `discover_channel`, the SPP channel is looked up over SDP first.
    /// If the discovered channel refuses the socket, channel 1 is tried once
    /// before giving up.
    pub fn connect(&self, mac: &str, name: Option<&str>, discover_channel: bool) -> Result<()> {
        let mut link = lock(&self.link);
        if self.is_connected() {
            return Err(PrinterError::AlreadyConnected);
        }

        // A link left over from a failed write is stale.
        self.drop_link(&mut link);
        self.set_state(ConnectionState::Connecting);
        {
            let mut session = lock(&self.session);
            session.mac_address = Some(mac.to_string());
            session.device_name = name.map(str::to_string);
            session.discovered_channel = None;
        }

        let mut channel = DEFAULT_RFCOMM_CHANNEL;
        if discover_channel {
            if let Some(found) = self.discovery.discover_channel(mac) {
                info!(mac, channel = found, "discovered SPP channel");
                lock(&self.session).discovered_channel = Some(found);
                channel = found;
            }
        }

        info!(mac, channel, "connecting to printer");
        let first = match self.open_verified(&mut link, mac, channel) {
            Ok(()) => {
                self.mark_connected();
                info!(mac, channel, "connected");
                return Ok(());
            }
            Err(e) => e,
        };
        self.drop_link(&mut link);

        if discover_channel && channel != DEFAULT_RFCOMM_CHANNEL {
            if let AttemptError::Socket(_) = first {
                warn!(mac, channel, error = %first, "discovered channel failed, trying default channel");
                match self.open_verified(&mut link, mac, DEFAULT_RFCOMM_CHANNEL) {
                    Ok(()) => {
                        lock(&self.session).discovered_channel = None;
                        self.mark_connected();
                        info!(mac, channel = DEFAULT_RFCOMM_CHANNEL, "connected");
                        return Ok(());
                    }
                    Err(second) => {
                        self.drop_link(&mut link);
                        self.set_state(ConnectionState::Error);
                        return Err(PrinterError::Connection(format!(
                            "Failed to connect to {} on channel {} or default channel {}: {}",
                            mac, channel, DEFAULT_RFCOMM_CHANNEL, second
                        )));
                    }
                }
            }
        }

        self.set_state(ConnectionState::Error);
        Err(PrinterError::Connection(format!(
            "Failed to connect to {} on channel {}: {}",
            mac, channel, first
        )))
    }

    /// Close the link.
    ///
    /// Shutdown errors are ignored; a failing close is reported, but the
    /// state still ends in `Disconnected` with no socket held.
    pub fn disconnect(&self) -> Result<()> {
        let mut link = lock(&self.link);
        if !self.is_connected() {
            return Err(PrinterError::NotConnected);
        }

        let result = match link.take() {
            Some(mut socket) => {
                if let Err(e) = socket.shutdown() {
                    debug!(error = %e, "shutdown before close failed");
                }
                socket
                    .close()
                    .map_err(|e| PrinterError::Disconnection(format!("Error during disconnection: {}", e)))
            }
            None => Ok(()),
        };

        self.link_open.store(false, Ordering::Release);
        self.set_state(ConnectionState::Disconnected);
        info!(mac = ?self.mac_address(), "disconnected");
        result
    }

    /// Try once to restore the link to the last printer.
    ///
    /// Returns `Ok(false)` when the attempt fails or the attempt limit is
    /// reached. Errors only when no printer was ever connected.
    pub fn reconnect(&self) -> Result<bool> {
        let mut link = lock(&self.link);
        self.reconnect_locked(&mut link)
    }

    fn reconnect_locked(&self, link: &mut Link) -> Result<bool> {
        let (mac, attempts, channel) = {
            let session = lock(&self.session);
            (session.mac_address.clone(), session.reconnect_attempts, session.discovered_channel)
        };
        let Some(mac) = mac else {
            return Err(PrinterError::Connection("No previous connection to reconnect to".to_string()));
        };

        let policy = self.config.reconnect;
        if attempts >= policy.max_attempts {
            warn!(mac, attempts, "reconnect limit reached");
            self.set_state(ConnectionState::Error);
            return Ok(false);
        }

        let delay = policy.delay_for(attempts);
        if !delay.is_zero() {
            debug!(mac, attempt = attempts + 1, ?delay, "backing off before reconnect");
            thread::sleep(delay);
        }
        lock(&self.session).reconnect_attempts = attempts + 1;

        let channel = channel.unwrap_or(DEFAULT_RFCOMM_CHANNEL);
        self.drop_link(link);
        self.set_state(ConnectionState::Connecting);
        info!(mac, channel, attempt = attempts + 1, max = policy.max_attempts, "reconnecting");

        match self.open_verified(link, &mac, channel) {
            Ok(()) => {
                self.mark_connected();
                info!(mac, channel, "reconnected");
                Ok(true)
            }
            Err(e) => {
                warn!(mac, channel, attempt = attempts + 1, error = %e, "reconnect attempt failed");
                self.drop_link(link);
                self.set_state(ConnectionState::Error);
                Ok(false)
            }
        }
    }

    // ========================================================================
    // I/O
    // ========================================================================

    /// Write bytes to the printer.
    ///
    /// On a write failure, if `reconnect_on_failure` or auto-reconnect is
    /// set and a printer address is known, one reconnect and one resend are
    /// attempted before giving up.
    pub fn send_raw(&self, data: &[u8], reconnect_on_failure: bool) -> Result<()> {
        let mut link = lock(&self.link);
        let Some(socket) = link.as_mut() else {
            return Err(PrinterError::NotConnected);
        };

        let error = match socket.send(data) {
            Ok(()) => {
                self.touch();
                return Ok(());
            }
            Err(e) => e,
        };

        let known_printer = lock(&self.session).mac_address.is_some();
        if !(reconnect_on_failure || self.auto_reconnect()) || !known_printer {
            return Err(PrinterError::Print(format!("Failed to send data: {}", error)));
        }

        warn!(error = %error, bytes = data.len(), "write failed, reconnecting");
        self.set_state(ConnectionState::Error);

        if !matches!(self.reconnect_locked(&mut link), Ok(true)) {
            return Err(PrinterError::Print(format!(
                "Failed to send data and reconnection failed: {}",
                error
            )));
        }

        let Some(socket) = link.as_mut() else {
            return Err(PrinterError::NotConnected);
        };
        match socket.send(data) {
            Ok(()) => {
                self.touch();
                Ok(())
            }
            Err(e) => Err(PrinterError::Print(format!(
                "Failed to send data after reconnection: {}",
                e
            ))),
        }
    }

    /// Send the status request and return the raw reply.
    pub fn get_status(&self) -> Result<Vec<u8>> {
        let mut link = lock(&self.link);
        let status = Self::query_status(&mut link)?;
        self.touch();
        Ok(status)
    }

    /// Probe the printer. False if disconnected or the probe fails.
    pub fn check_connection_quality(&self) -> bool {
        if !self.is_connected() {
            return false;
        }
        match self.get_status() {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "connection quality check failed");
                false
            }
        }
    }

    pub fn initialize(&self) -> Result<()> {
        self.send_raw(&INITIALIZE, false)
    }

    pub fn start_print(&self) -> Result<()> {
        self.send_raw(&START_PRINT, false)
    }

    pub fn end_print(&self) -> Result<()> {
        self.send_raw(&END_PRINT, false)
    }

    /// Send an already-encoded raster command.
    pub fn send_image(&self, raster: &[u8]) -> Result<()> {
        self.send_raw(raster, false)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn open_verified(&self, link: &mut Link, mac: &str, channel: u8) -> std::result::Result<(), AttemptError> {
        let socket = self
            .connector
            .connect(mac, channel, self.config.status_timeout)
            .map_err(AttemptError::Socket)?;
        *link = Some(socket);
        self.link_open.store(true, Ordering::Release);

        let status = Self::query_status(link).map_err(AttemptError::Status)?;
        debug!(mac, channel, status = ?status, "status probe ok");
        Ok(())
    }

    fn query_status(link: &mut Link) -> Result<Vec<u8>> {
        let Some(socket) = link.as_mut() else {
            return Err(PrinterError::NotConnected);
        };
        socket
            .send(&STATUS_REQUEST)
            .map_err(|e| PrinterError::Status(e.to_string()))?;

        let mut reply = [0u8; STATUS_RESPONSE_LENGTH];
        let n = socket
            .recv(&mut reply)
            .map_err(|e| PrinterError::Status(e.to_string()))?;
        if n == 0 {
            return Err(PrinterError::Status("connection closed by printer".to_string()));
        }
        Ok(reply[..n].to_vec())
    }

    /// Release the socket without touching the state. Errors are logged only.
    fn drop_link(&self, link: &mut Link) {
        self.link_open.store(false, Ordering::Release);
        if let Some(mut socket) = link.take() {
            if let Err(e) = socket.shutdown() {
                debug!(error = %e, "shutdown of stale link failed");
            }
            if let Err(e) = socket.close() {
                debug!(error = %e, "close of stale link failed");
            }
        }
    }

    fn mark_connected(&self) {
        {
            let mut session = lock(&self.session);
            session.reconnect_attempts = 0;
            session.last_successful_connection = Some(Utc::now());
        }
        self.set_state(ConnectionState::Connected);
    }

    fn touch(&self) {
        lock(&self.session).last_successful_connection = Some(Utc::now());
    }

    /// Observers hear about changes only; re-entering the current state is silent.
    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *lock(&self.state), state);
        if previous == state {
            return;
        }
        debug!(from = %previous, to = %state, "connection state changed");
        self.observers.notify(state);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("mac_address", &self.mac_address())
            .field("auto_reconnect", &self.auto_reconnect())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.is_connected() {
            if let Err(e) = self.disconnect() {
                warn!(error = %e, "disconnect on drop failed");
            }
        } else {
            let mut link = lock(&self.link);
            self.drop_link(&mut link);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::NoDiscovery;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Connector whose links accept everything and answer status probes.
    struct Healthy {
        refuse: Mutex<VecDeque<bool>>,
    }

    struct OkLink;

    impl SerialLink for OkLink {
        fn send(&mut self, _data: &[u8]) -> io::Result<()> {
            Ok(())
        }
        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            buf[..3].copy_from_slice(&[0x00, 0x01, 0x02]);
            Ok(3)
        }
        fn shutdown(&mut self) -> io::Result<()> {
            Ok(())
        }
        fn close(self: Box<Self>) -> io::Result<()> {
            Ok(())
        }
    }

    impl Connector for Healthy {
        fn connect(&self, _mac: &str, _channel: u8, _timeout: Duration) -> io::Result<Box<dyn SerialLink>> {
            if lock(&self.refuse).pop_front().unwrap_or(false) {
                return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
            }
            Ok(Box::new(OkLink))
        }
    }

    fn connection(refusals: &[bool]) -> Connection {
        let mut config = ConnectionConfig::default();
        config.reconnect.backoff_cap = Duration::ZERO;
        let connector = Healthy {
            refuse: Mutex::new(refusals.iter().copied().collect()),
        };
        Connection::with_transport(config, Arc::new(connector), Arc::new(NoDiscovery))
    }

    #[test]
    fn test_initial_state() {
        let conn = connection(&[]);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.is_connected());
        assert_eq!(conn.mac_address(), None);
        assert_eq!(conn.reconnect_attempts(), 0);
        assert!(!conn.auto_reconnect());
    }

    #[test]
    fn test_connect_and_disconnect() {
        let conn = connection(&[]);
        conn.connect("66:22:B3:00:00:01", Some("CorePrint"), false).unwrap();
        assert!(conn.is_connected());
        assert_eq!(conn.device_name().as_deref(), Some("CorePrint"));
        assert!(conn.last_successful_connection().is_some());

        conn.disconnect().unwrap();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_double_connect_is_rejected() {
        let conn = connection(&[]);
        conn.connect("66:22:B3:00:00:01", None, false).unwrap();
        let err = conn.connect("66:22:B3:00:00:01", None, false).unwrap_err();
        assert!(matches!(err, PrinterError::AlreadyConnected));
        assert!(conn.is_connected());
    }

    #[test]
    fn test_refused_connect_ends_in_error() {
        let conn = connection(&[true]);
        let err = conn.connect("66:22:B3:00:00:01", None, false).unwrap_err();
        assert!(matches!(err, PrinterError::Connection(_)));
        assert_eq!(conn.state(), ConnectionState::Error);
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_disconnect_when_not_connected() {
        let conn = connection(&[]);
        assert!(matches!(conn.disconnect(), Err(PrinterError::NotConnected)));
    }

    #[test]
    fn test_reconnect_without_history_errors() {
        let conn = connection(&[]);
        assert!(matches!(conn.reconnect(), Err(PrinterError::Connection(_))));
    }

    #[test]
    fn test_send_without_link() {
        let conn = connection(&[]);
        assert!(matches!(conn.send_raw(&[0x0A], false), Err(PrinterError::NotConnected)));
        assert!(matches!(conn.get_status(), Err(PrinterError::NotConnected)));
        assert!(!conn.check_connection_quality());
    }

    #[test]
    fn test_status_reply() {
        let conn = connection(&[]);
        conn.connect("66:22:B3:00:00:01", None, false).unwrap();
        assert_eq!(conn.get_status().unwrap(), vec![0x00, 0x01, 0x02]);
        assert!(conn.check_connection_quality());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Error.to_string(), "error");
    }
}
