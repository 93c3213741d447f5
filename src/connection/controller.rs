//! # Connection Facade
//!
//! What a UI talks to: connect with channel discovery, remember the printer
//! on success, reconnect to it at startup, and forget it on request.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{Connection, ConnectionObserver, ConnectionState, SubscriptionId};
use crate::error::Result;
use crate::settings::{SettingsStore, keys};
use crate::transport::rfcomm::normalize_mac;

/// A printer remembered from a previous session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RememberedDevice {
    pub mac_address: String,
    pub device_name: Option<String>,
}

pub struct ConnectionController {
    connection: Arc<Connection>,
    settings: Arc<dyn SettingsStore>,
}

impl ConnectionController {
    pub fn new(connection: Arc<Connection>, settings: Arc<dyn SettingsStore>) -> Self {
        Self { connection, settings }
    }

    /// The managed connection, for handing to a print job executor.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn mac_address(&self) -> Option<String> {
        self.connection.mac_address()
    }

    pub fn device_name(&self) -> Option<String> {
        self.connection.device_name()
    }

    pub fn subscribe(&self, observer: Arc<dyn ConnectionObserver>) -> SubscriptionId {
        self.connection.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.connection.unsubscribe(id)
    }

    /// Connect with channel discovery and remember the printer on success.
    ///
    /// A failure to persist the printer is logged; the connection stays up.
    pub fn connect(&self, mac: &str, name: Option<&str>) -> Result<()> {
        let mac = normalize_mac(mac)?;
        self.connection.connect(&mac, name, true)?;

        if let Err(e) = self.remember(&mac, name) {
            warn!(mac, error = %e, "failed to save printer settings");
        }
        Ok(())
    }

    pub fn disconnect(&self) -> Result<()> {
        self.connection.disconnect()
    }

    /// Connect to the remembered printer, if any. Never errors.
    pub fn auto_connect(&self) -> bool {
        let Some(device) = self.remembered_device() else {
            debug!("no remembered printer");
            return false;
        };

        info!(mac = device.mac_address, "auto-connecting to remembered printer");
        match self.connect(&device.mac_address, device.device_name.as_deref()) {
            Ok(()) => true,
            Err(e) => {
                warn!(mac = device.mac_address, error = %e, "auto-connect failed");
                false
            }
        }
    }

    pub fn remembered_device(&self) -> Option<RememberedDevice> {
        let mac_address = self
            .settings
            .get(keys::PRINTER_MAC_ADDRESS)
            .filter(|mac| !mac.trim().is_empty())?;
        let device_name = self
            .settings
            .get(keys::PRINTER_DEVICE_NAME)
            .filter(|name| !name.is_empty());
        Some(RememberedDevice {
            mac_address,
            device_name,
        })
    }

    /// Drop the remembered printer. Does not disconnect.
    pub fn forget_device(&self) -> Result<()> {
        self.settings.remove(keys::PRINTER_MAC_ADDRESS)?;
        self.settings.remove(keys::PRINTER_DEVICE_NAME)?;
        info!("forgot remembered printer");
        Ok(())
    }

    fn remember(&self, mac: &str, name: Option<&str>) -> Result<()> {
        self.settings.set(keys::PRINTER_MAC_ADDRESS, mac)?;
        match name {
            Some(name) => self.settings.set(keys::PRINTER_DEVICE_NAME, name),
            None => self.settings.remove(keys::PRINTER_DEVICE_NAME),
        }
    }
}
