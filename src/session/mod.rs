//! Session lifecycle: state machine, events and device wiring.

pub mod devices;
pub mod events;
pub mod manager;
pub mod state;

#[cfg(feature = "cpal-audio")]
pub use devices::CpalDevices;
pub use devices::{DeviceFactory, MockDevices};
pub use events::SessionEvent;
pub use manager::{SessionManager, SessionOptions};
pub use state::SessionState;
