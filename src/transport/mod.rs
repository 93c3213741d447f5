//! # Printer Transport Layer
//!
//! Everything that touches the operating system's Bluetooth stack.
//!
//! ## Modules
//!
//! - [`rfcomm`]: RFCOMM sockets and the `Connector`/`SerialLink` seam
//! - [`discovery`]: SDP channel discovery via `sdptool`
//! - [`scan`]: nearby-device scanning via `bluetoothctl`
//! - [`process`]: bounded external command execution

pub mod discovery;
pub mod process;
pub mod rfcomm;
pub mod scan;

pub use discovery::{ChannelDiscovery, NoDiscovery, SdpToolDiscovery};
pub use rfcomm::{Connector, RfcommConnector, SerialLink};
pub use scan::{DiscoveredDevice, Scanner};
