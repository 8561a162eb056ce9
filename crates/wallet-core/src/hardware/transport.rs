use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device disconnected")]
    Disconnected,

    #[error("transport failure: {0}")]
    Io(String),
}

pub type DisconnectCallback = Box<dyn Fn() + Send + Sync>;

/// Raw byte exchange with signing devices (HID or BLE).
///
/// One `exchange` carries one APDU and returns the device's reply with its
/// two trailing status bytes.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn exchange(&self, device_id: &str, apdu: &[u8]) -> Result<Vec<u8>, TransportError>;

    fn is_present(&self, device_id: &str) -> bool;

    /// Register `callback` to run when `device_id` goes away.
    fn on_disconnect(&self, device_id: &str, callback: DisconnectCallback);
}
