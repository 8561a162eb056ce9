//! External signing devices: transport seam, command framing and the
//! per-device protocol session.

pub mod apdu;
pub mod session;
pub mod transport;

pub use session::{DeviceHub, HardwareWalletSession, SessionState};
pub use transport::{DeviceTransport, DisconnectCallback, TransportError};
