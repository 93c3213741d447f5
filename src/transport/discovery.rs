//! # RFCOMM Channel Discovery
//!
//! Some firmware revisions expose the SPP service on a channel other than
//! 1. Before connecting we browse the device's SDP records with
//! `sdptool browse <MAC>` and look for the Serial Port service's RFCOMM
//! channel.
//!
//! Discovery is advisory: any failure (tool missing, timeout, no SPP
//! record) yields `None` and the caller falls back to the default channel.
//!
//! ## What We Parse
//!
//! ```text
//! Service Name: Serial Port
//! Service RecHandle: 0x10001
//! Service Class ID List:
//!   "Serial Port" (0x1101)
//! Protocol Descriptor List:
//!   "L2CAP" (0x0100)
//!   "RFCOMM" (0x0003)
//!     Channel: 2
//! ```

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use super::process::{self, Tool};

static CHANNEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Channel:\s*(\d+)").expect("valid channel regex"));

/// Finds the RFCOMM channel of a device's SPP service.
pub trait ChannelDiscovery: Send + Sync {
    /// `None` means "unknown, use the default channel".
    fn discover_channel(&self, mac: &str) -> Option<u8>;
}

/// Discovery through BlueZ's `sdptool`.
#[derive(Debug, Clone)]
pub struct SdpToolDiscovery {
    tool: Tool,
    timeout: Duration,
}

impl SdpToolDiscovery {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tool: Tool::new("sdptool"),
            timeout,
        }
    }

    /// Use a different executable (wrapper script, alternate path).
    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tool = tool;
        self
    }
}

impl Default for SdpToolDiscovery {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl ChannelDiscovery for SdpToolDiscovery {
    fn discover_channel(&self, mac: &str) -> Option<u8> {
        let output = match process::run(&self.tool, &["browse", mac], self.timeout) {
            Ok(output) => output,
            Err(e) => {
                debug!(mac, error = %e, "sdptool unavailable");
                return None;
            }
        };

        if !output.status.success() {
            debug!(mac, status = %output.status, "sdptool browse failed");
            return None;
        }

        let channel = parse_sdp_channel(&output.stdout);
        debug!(mac, ?channel, "sdp discovery finished");
        channel
    }
}

/// Discovery that never finds anything; connects always use channel 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDiscovery;

impl ChannelDiscovery for NoDiscovery {
    fn discover_channel(&self, _mac: &str) -> Option<u8> {
        None
    }
}

/// Extract the SPP RFCOMM channel from `sdptool browse` output.
///
/// Scans for a Serial Port service block, then for a `Channel: <n>` token
/// inside that block's protocol descriptor list. Returns the first match.
pub fn parse_sdp_channel(output: &str) -> Option<u8> {
    let mut in_spp_service = false;
    let mut in_protocol_descriptor = false;

    for line in output.lines() {
        if line.contains("Serial Port") || line.contains("0x1101") {
            in_spp_service = true;
            continue;
        }

        if (line.starts_with("Service Name:") || line.starts_with("Service RecHandle:"))
            && !in_protocol_descriptor
        {
            in_spp_service = false;
        }

        if in_spp_service && line.contains("Protocol Descriptor List") {
            in_protocol_descriptor = true;
            continue;
        }

        if in_protocol_descriptor {
            if let Some(caps) = CHANNEL_RE.captures(line) {
                if let Ok(channel) = caps[1].parse::<u8>() {
                    return Some(channel);
                }
            }
            if !line.trim().is_empty() && !line.starts_with(' ') {
                in_protocol_descriptor = false;
            }
        }
    }

    None
}

// ============================================================================
// TESTS
// ============================================================================
