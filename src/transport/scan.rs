//! # Printer Scanning
//!
//! Finds nearby Bluetooth devices through `bluetoothctl` and flags the ones
//! that look like CorePrint printers.
//!
//! ## Passes
//!
//! 1. `bluetoothctl devices`: devices BlueZ already knows about
//! 2. `bluetoothctl --timeout N scan on`: active scan, streamed line by line
//! 3. `bluetoothctl devices` again: names that resolved during the scan
//!
//! Results are deduplicated by MAC across all passes. Printers sort first,
//! then everything else alphabetically by name.
//!
//! ## Line Formats
//!
//! ```text
//! Device 66:22:B3:00:00:01 CorePrint-0001
//! [NEW] Device 66:22:B3:00:00:01 CorePrint-0001
//! [CHG] Device 66:22:B3:00:00:01 Name: CorePrint-0001
//! ```

use std::collections::HashMap;
use std::io;
use std::sync::LazyLock;
use std::sync::mpsc::RecvTimeoutError;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use super::process::{self, LineStream, Tool};
use crate::error::{PrinterError, Result, ScanFailure};

/// Name prefix (case-insensitive) that marks a device as a target printer
pub const TARGET_NAME_PREFIX: &str = "coreprint";

/// Timeout for one-shot `bluetoothctl` commands
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on a single wait for scan output
pub const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Grace period between SIGTERM and SIGKILL for the scan process
pub const SCAN_STOP_GRACE: Duration = Duration::from_secs(2);

const TOOL_NAME: &str = "bluetoothctl";

static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("valid ansi regex"));

static CHG_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[CHG\]\s+Device\s+([0-9A-Fa-f:]{17})\s+Name:\s+(.+)").expect("valid chg regex")
});

static NEW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[NEW\]\s+Device\s+([0-9A-Fa-f:]{17})\s+(.+)").expect("valid new regex")
});

static DEVICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Device\s+([0-9A-Fa-f:]{17})\s+(.+)").expect("valid device regex")
});

static ANNOTATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\[.*\]$").expect("valid annotation regex"));

/// A device seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    pub mac_address: String,
    pub display_name: String,
    pub is_target_printer: bool,
}

impl DiscoveredDevice {
    pub fn new(mac_address: impl Into<String>, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        let is_target_printer = display_name
            .to_lowercase()
            .starts_with(TARGET_NAME_PREFIX);
        Self {
            mac_address: mac_address.into(),
            display_name,
            is_target_printer,
        }
    }
}

/// Accumulates devices from scan output, deduplicated by MAC.
///
/// The first real name seen for a MAC wins. BlueZ reports devices whose
/// name has not resolved yet under their address (`66-22-B3-...`); such a
/// placeholder is replaced once a real name shows up.
#[derive(Debug, Default)]
pub struct DeviceCollector {
    devices: Vec<DiscoveredDevice>,
    index: HashMap<String, usize>,
}

impl DeviceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one output line. Returns `true` if it added or renamed a device.
    pub fn ingest_line(&mut self, line: &str) -> bool {
        let Some((mac, name)) = parse_device_line(line) else {
            return false;
        };

        let key = mac.to_uppercase();
        match self.index.get(&key) {
            Some(&i) => {
                let existing = &mut self.devices[i];
                if is_placeholder_name(&existing.display_name) && !is_placeholder_name(&name) {
                    *existing = DiscoveredDevice::new(existing.mac_address.clone(), name);
                    true
                } else {
                    false
                }
            }
            None => {
                self.index.insert(key, self.devices.len());
                self.devices.push(DiscoveredDevice::new(mac, name));
                true
            }
        }
    }

    /// Parse every line of a command's output. Returns how many changed.
    pub fn ingest_output(&mut self, output: &str) -> usize {
        output.lines().filter(|line| self.ingest_line(line)).count()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Sorted result: target printers first, then by name.
    pub fn finish(mut self) -> Vec<DiscoveredDevice> {
        self.devices.sort_by(|a, b| {
            b.is_target_printer
                .cmp(&a.is_target_printer)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });
        self.devices
    }
}

/// Extract `(mac, name)` from a `bluetoothctl` output line.
fn parse_device_line(line: &str) -> Option<(String, String)> {
    let line = ANSI_RE.replace_all(line, "");
    let caps = CHG_NAME_RE
        .captures(&line)
        .or_else(|| NEW_RE.captures(&line))
        .or_else(|| DEVICE_RE.captures(&line))?;

    let mac = caps[1].to_string();
    let name = caps[2].trim();
    let name = ANNOTATION_RE.replace(name, "").trim().to_string();
    if name.is_empty() || name.starts_with("Name:") {
        return None;
    }
    Some((mac, name))
}

fn is_placeholder_name(name: &str) -> bool {
    name.len() == 17 && super::rfcomm::is_valid_mac(name)
}

// ============================================================================
// SCANNER
// ============================================================================

/// Runs the three-pass scan against `bluetoothctl`.
#[derive(Debug, Clone)]
pub struct Scanner {
    tool: Tool,
    command_timeout: Duration,
    poll_interval: Duration,
    stop_grace: Duration,
}

impl Default for Scanner {
    fn default() -> Self {
        Self {
            tool: Tool::new(TOOL_NAME),
            command_timeout: COMMAND_TIMEOUT,
            poll_interval: SCAN_POLL_INTERVAL,
            stop_grace: SCAN_STOP_GRACE,
        }
    }
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different `bluetoothctl` executable or wrapper.
    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tool = tool;
        self
    }

    /// Timeout for the one-shot `devices` passes.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Grace period before the scan process is killed.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Scan for `timeout` and return what was found.
    ///
    /// ## Errors
    ///
    /// - [`ScanFailure::MissingTool`] if `bluetoothctl` is not installed
    /// - [`ScanFailure::TimedOut`] if a `devices` pass hangs
    /// - [`ScanFailure::Failed`] for any other OS error
    pub fn scan(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        let mut collector = DeviceCollector::new();

        let known = self.list_known(&mut collector)?;
        debug!(count = known, "known devices");

        // Errors in the active pass are not fatal; the final listing still
        // reports whatever BlueZ picked up.
        match self.active_scan(&mut collector, timeout) {
            Ok(seen) => debug!(count = seen, "active scan finished"),
            Err(e) => debug!(error = %e, "active scan failed"),
        }

        let late = self.list_known(&mut collector)?;
        debug!(count = late, "late-resolved devices");

        let devices = collector.finish();
        info!(
            total = devices.len(),
            printers = devices.iter().filter(|d| d.is_target_printer).count(),
            "scan complete"
        );
        Ok(devices)
    }

    fn list_known(&self, collector: &mut DeviceCollector) -> Result<usize> {
        let output =
            process::run(&self.tool, &["devices"], self.command_timeout).map_err(scan_error)?;
        if !output.status.success() {
            debug!(status = %output.status, "bluetoothctl devices failed");
            return Ok(0);
        }
        Ok(collector.ingest_output(&output.stdout))
    }

    fn active_scan(&self, collector: &mut DeviceCollector, timeout: Duration) -> io::Result<usize> {
        let secs = timeout.as_secs().max(1).to_string();
        let mut stream = LineStream::spawn(&self.tool, &["--timeout", secs.as_str(), "scan", "on"])?;

        let deadline = Instant::now() + timeout;
        let mut seen = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match stream.lines().recv_timeout(remaining.min(self.poll_interval)) {
                Ok(line) => {
                    if collector.ingest_line(&line) {
                        seen += 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                // stdout closed: every line has been delivered
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        seen += stream
            .lines()
            .try_iter()
            .filter(|line| collector.ingest_line(line))
            .count();

        stream.stop(self.stop_grace)?;
        Ok(seen)
    }
}

/// Scan with the default `bluetoothctl` setup.
pub fn scan_for_printers(timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
    Scanner::default().scan(timeout)
}

/// Scan on a transient worker thread and hand the result to `callback`.
pub fn scan_in_background<F>(scanner: Scanner, timeout: Duration, callback: F) -> JoinHandle<()>
where
    F: FnOnce(Result<Vec<DiscoveredDevice>>) + Send + 'static,
{
    thread::spawn(move || callback(scanner.scan(timeout)))
}

/// Whether the local Bluetooth adapter is powered on.
///
/// Reads `Powered:` from `bluetoothctl show`.
pub fn adapter_powered(tool: &Tool) -> Result<bool> {
    let output = process::run(tool, &["show"], COMMAND_TIMEOUT).map_err(scan_error)?;
    if !output.status.success() {
        return Ok(false);
    }
    Ok(output
        .stdout
        .lines()
        .find(|line| line.contains("Powered:"))
        .is_some_and(|line| line.to_lowercase().contains("yes")))
}

fn scan_error(err: io::Error) -> PrinterError {
    let failure = match err.kind() {
        io::ErrorKind::NotFound => ScanFailure::MissingTool(TOOL_NAME),
        io::ErrorKind::TimedOut => ScanFailure::TimedOut,
        _ => ScanFailure::Failed(err.to_string()),
    };
    PrinterError::Scan(failure)
}

// ============================================================================
// TESTS
// ============================================================================
