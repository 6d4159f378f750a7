//! Session topology management
//!
//! - DeviceManager selects and configures the camera and microphone
//! - SessionConfigurator attaches them to the capture session transactionally

pub mod configurator;
pub mod device;

pub use configurator::{SessionConfigurator, Topology};
pub use device::{DeviceManager, DeviceSwitch};
