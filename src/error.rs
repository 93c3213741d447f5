//! # Error Types
//!
//! This module defines error types used throughout the coreprint library.
//!
//! Connection-level structural errors (`AlreadyConnected`, `NotConnected`,
//! `Connection`) are returned to the immediate caller and never retried
//! internally. Write failures inside a print job surface as `Print`.

use thiserror::Error;

/// Main error type for coreprint operations
#[derive(Debug, Error)]
pub enum PrinterError {
    /// `connect()` called while a connection is already open
    #[error("Already connected to a printer")]
    AlreadyConnected,

    /// Operation needs an open connection and there is none
    #[error("Not connected to printer")]
    NotConnected,

    /// Connect attempt failed (discovered and default channel)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Socket close failed during an explicit disconnect
    #[error("Disconnection error: {0}")]
    Disconnection(String),

    /// Status query write or read failed
    #[error("Failed to get printer status: {0}")]
    Status(String),

    /// A write failed, with or without a retried reconnect
    #[error("{0}")]
    Print(String),

    /// Device scanning failed
    #[error("Scan error: {0}")]
    Scan(#[from] ScanFailure),

    /// Bitmap does not satisfy the raster encoder's preconditions
    #[error("Invalid bitmap: {0}")]
    InvalidBitmap(String),

    /// Malformed Bluetooth MAC address
    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),

    /// Settings store could not be read or written
    #[error("Settings error: {0}")]
    Settings(String),

    /// Image decoding or conversion error
    #[error("Image error: {0}")]
    Image(String),

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a device scan failed.
#[derive(Debug, Error)]
pub enum ScanFailure {
    /// The external Bluetooth tool is not installed
    #[error("{0} not found. Is bluez installed?")]
    MissingTool(&'static str),

    /// An external command did not finish in time
    #[error("Bluetooth scan timed out")]
    TimedOut,

    /// Any other OS or subprocess failure
    #[error("Bluetooth scan failed: {0}")]
    Failed(String),
}

/// Result type for coreprint operations
pub type Result<T> = std::result::Result<T, PrinterError>;
