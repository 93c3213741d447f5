//! In-memory stand-ins for the Bluetooth transport.
//!
//! `MockPrinter` plays the printer end of the link: it records every
//! connect and write, answers status probes, and can be scripted to refuse
//! connections or fail writes.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use coreprint::protocol::commands::STATUS_REQUEST;
use coreprint::transport::{ChannelDiscovery, Connector, SerialLink};
use coreprint::{Connection, ConnectionConfig};

pub const MAC: &str = "66:22:B3:00:00:01";

#[derive(Debug, Default)]
pub struct PrinterState {
    /// Every successful send, one entry per call.
    pub writes: Vec<Vec<u8>>,
    /// `(mac, channel)` per connect attempt, refused ones included.
    pub connects: Vec<(String, u8)>,
    pub closes: usize,
    /// Channels that refuse connections.
    pub refused_channels: HashSet<u8>,
    /// Per-attempt refusals, consumed before `refused_channels` is checked.
    pub refusal_script: VecDeque<bool>,
    /// Successful sends left before scripted failures begin.
    pub sends_before_failure: Option<usize>,
    /// Number of consecutive sends that fail once failures begin.
    pub failing_sends: usize,
    /// Status probes read EOF instead of a reply.
    pub silent: bool,
    pub close_fails: bool,
    pub status_reply: Vec<u8>,
}

#[derive(Clone, Default)]
pub struct MockPrinter {
    state: Arc<Mutex<PrinterState>>,
}

impl MockPrinter {
    pub fn new() -> Self {
        let printer = Self::default();
        printer.state().status_reply = vec![0x00, 0x12, 0x34];
        printer
    }

    pub fn state(&self) -> MutexGuard<'_, PrinterState> {
        self.state.lock().unwrap()
    }

    pub fn refuse_channel(&self, channel: u8) {
        self.state().refused_channels.insert(channel);
    }

    pub fn accept_all(&self) {
        let mut state = self.state();
        state.refused_channels.clear();
        state.refusal_script.clear();
    }

    pub fn script_refusals(&self, script: &[bool]) {
        self.state().refusal_script = script.iter().copied().collect();
    }

    /// Let `after` sends through, then fail the next `count`.
    pub fn fail_sends(&self, after: usize, count: usize) {
        let mut state = self.state();
        state.sends_before_failure = Some(after);
        state.failing_sends = count;
    }

    pub fn connects(&self) -> Vec<(String, u8)> {
        self.state().connects.clone()
    }

    pub fn channels(&self) -> Vec<u8> {
        self.state().connects.iter().map(|(_, channel)| *channel).collect()
    }

    /// Writes other than status probes.
    pub fn data_writes(&self) -> Vec<Vec<u8>> {
        self.state()
            .writes
            .iter()
            .filter(|w| w.as_slice() != STATUS_REQUEST.as_slice())
            .cloned()
            .collect()
    }

    pub fn status_probes(&self) -> usize {
        self.state()
            .writes
            .iter()
            .filter(|w| w.as_slice() == STATUS_REQUEST.as_slice())
            .count()
    }

    /// All non-probe bytes, in order.
    pub fn stream(&self) -> Vec<u8> {
        self.data_writes().concat()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }
}

impl Connector for MockPrinter {
    fn connect(&self, mac: &str, channel: u8, _read_timeout: Duration) -> io::Result<Box<dyn SerialLink>> {
        let mut state = self.state();
        state.connects.push((mac.to_string(), channel));

        let refused = match state.refusal_script.pop_front() {
            Some(refused) => refused,
            None => state.refused_channels.contains(&channel),
        };
        if refused {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"));
        }

        Ok(Box::new(MockLink {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockLink {
    state: Arc<Mutex<PrinterState>>,
}

impl SerialLink for MockLink {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.sends_before_failure {
            Some(0) if state.failing_sends > 0 => {
                state.failing_sends -= 1;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
            }
            Some(n) if n > 0 => state.sends_before_failure = Some(n - 1),
            _ => {}
        }
        state.writes.push(data.to_vec());
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let state = self.state.lock().unwrap();
        if state.silent {
            return Ok(0);
        }
        let n = state.status_reply.len().min(buf.len());
        buf[..n].copy_from_slice(&state.status_reply[..n]);
        Ok(n)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.closes += 1;
        if state.close_fails {
            return Err(io::Error::new(io::ErrorKind::Other, "bad file descriptor"));
        }
        Ok(())
    }
}

/// Discovery that answers with a fixed channel and counts lookups.
#[derive(Default)]
pub struct ScriptedDiscovery {
    pub channel: Option<u8>,
    pub lookups: Mutex<Vec<String>>,
}

impl ScriptedDiscovery {
    pub fn returning(channel: Option<u8>) -> Self {
        Self {
            channel,
            lookups: Mutex::new(Vec::new()),
        }
    }
}

impl ChannelDiscovery for ScriptedDiscovery {
    fn discover_channel(&self, mac: &str) -> Option<u8> {
        self.lookups.lock().unwrap().push(mac.to_string());
        self.channel
    }
}

/// Connection config with instant backoff.
pub fn fast_config() -> ConnectionConfig {
    let mut config = ConnectionConfig::default();
    config.reconnect.backoff_cap = Duration::ZERO;
    config
}

pub fn connection_with(printer: &MockPrinter, discovered: Option<u8>) -> Arc<Connection> {
    Arc::new(Connection::with_transport(
        fast_config(),
        Arc::new(printer.clone()),
        Arc::new(ScriptedDiscovery::returning(discovered)),
    ))
}

/// A connection already connected to [`MAC`] on channel 1.
pub fn connected(printer: &MockPrinter) -> Arc<Connection> {
    let connection = connection_with(printer, None);
    connection.connect(MAC, Some("CorePrint-0001"), false).unwrap();
    connection
}
