//! # Printer Configuration
//!
//! Hardware specification of the supported printer plus the tunables of
//! the connection layer.
//!
//! ## Supported Printers
//!
//! | Model | Width (dots) | Resolution |
//! |-------|--------------|------------|
//! | CorePrint CTP500 | 384 | 203 DPI |
//!
//! ## Usage
//!
//! ```
//! use coreprint::printer::PrinterConfig;
//!
//! let config = PrinterConfig::CTP500;
//! println!("Print width: {} dots ({} bytes)",
//!          config.width_dots,
//!          config.width_bytes);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// RFCOMM channel the printer's SPP service listens on when discovery
/// does not say otherwise.
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

/// Serial Port Profile service class UUID
pub const SPP_UUID: &str = "00001101-0000-1000-8000-00805f9b34fb";

/// # Printer Configuration
///
/// Defines the hardware characteristics of a thermal printer.
///
/// ```text
/// dots_per_mm = dpi / 25.4
/// width_mm = width_dots / dots_per_mm
///
/// For CTP500:
///   dots_per_mm = 203 / 25.4 ≈ 8
///   width_mm = 384 / 8 = 48mm
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PrinterConfig {
    /// Printer model name
    pub name: &'static str,

    /// Raster width in dots (pixels)
    pub width_dots: u16,

    /// Raster width in bytes (width_dots / 8)
    pub width_bytes: u16,

    /// Resolution in dots per inch
    pub dpi: u16,
}

impl PrinterConfig {
    /// # CorePrint CTP500
    ///
    /// 58mm label/receipt printer with a fixed 384 dot head. Every raster
    /// line must be exactly 48 bytes.
    pub const CTP500: Self = Self {
        name: "CorePrint CTP500",
        width_dots: 384,
        width_bytes: 48,
        dpi: 203,
    };

    /// Calculate dots per millimeter
    #[inline]
    pub fn dots_per_mm(&self) -> f32 {
        self.dpi as f32 / 25.4
    }

    /// Calculate print width in millimeters
    #[inline]
    pub fn width_mm(&self) -> f32 {
        self.width_dots as f32 / self.dots_per_mm()
    }
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self::CTP500
    }
}

// ============================================================================
// CONNECTION TUNING
// ============================================================================

/// Exponential backoff used by `Connection::reconnect`.
///
/// The delay before attempt `k` is `min(backoff_base ^ k, backoff_cap)`
/// seconds; the first attempt (`k == 0`) never sleeps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Attempts allowed before the connection gives up and stays in Error
    pub max_attempts: u32,
    /// Base of the exponential backoff, in seconds
    pub backoff_base: f64,
    /// Upper bound on any single backoff sleep
    #[serde(with = "duration_secs")]
    pub backoff_cap: Duration,
}

impl ReconnectPolicy {
    /// Backoff sleep before the attempt numbered `attempts` (0-indexed).
    ///
    /// ## Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use coreprint::printer::ReconnectPolicy;
    ///
    /// let policy = ReconnectPolicy::default();
    /// assert_eq!(policy.delay_for(0), Duration::ZERO);
    /// assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    /// assert_eq!(policy.delay_for(10), Duration::from_secs(30));
    /// ```
    pub fn delay_for(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let exp = i32::try_from(attempts).unwrap_or(i32::MAX);
        let secs = self.backoff_base.powi(exp);
        let cap = self.backoff_cap.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            return self.backoff_cap;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: 2.0,
            backoff_cap: Duration::from_secs(30),
        }
    }
}

/// Connection-level settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Reconnect backoff and attempt limit
    pub reconnect: ReconnectPolicy,
    /// Retry failed writes through a reconnect even when the caller did
    /// not ask for it
    pub auto_reconnect: bool,
    /// How long a status query waits for the printer's answer
    #[serde(with = "duration_secs")]
    pub status_timeout: Duration,
    /// Upper bound on the SDP browse used for channel discovery
    #[serde(with = "duration_secs")]
    pub discovery_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            auto_reconnect: false,
            status_timeout: Duration::from_secs(5),
            discovery_timeout: Duration::from_secs(10),
        }
    }
}

/// Serialize durations as fractional seconds.
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctp500_dimensions() {
        let config = PrinterConfig::CTP500;
        assert_eq!(config.width_dots, 384);
        assert_eq!(config.width_bytes, 48);
        assert_eq!(config.width_dots, config.width_bytes * 8);
    }

    #[test]
    fn test_width_mm() {
        let config = PrinterConfig::CTP500;
        // 384 dots / 8 dpmm = 48mm
        assert!((config.width_mm() - 48.0).abs() < 1.0);
    }

    #[test]
    fn test_backoff_sequence() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (0..7).map(|k| policy.delay_for(k).as_secs()).collect();
        assert_eq!(delays, vec![0, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_backoff_zero_cap() {
        let policy = ReconnectPolicy {
            backoff_cap: Duration::ZERO,
            ..Default::default()
        };
        for k in 0..10 {
            assert_eq!(policy.delay_for(k), Duration::ZERO);
        }
    }

    #[test]
    fn test_backoff_huge_attempt_is_capped() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_connection_config_from_json() {
        let config: ConnectionConfig = serde_json::from_str(
            r#"{ "auto_reconnect": true, "status_timeout": 1.5, "reconnect": { "max_attempts": 2 } }"#,
        )
        .unwrap();

        assert!(config.auto_reconnect);
        assert_eq!(config.status_timeout, Duration::from_millis(1500));
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.reconnect.backoff_base, 2.0);
        assert_eq!(config.discovery_timeout, Duration::from_secs(10));
    }
}
