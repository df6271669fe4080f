//! Native audio devices for parley, backed by cpal.

mod capture;
mod device;
mod playback;
mod worker;

pub use capture::CpalInput;
pub use device::{DeviceInfo, list_devices};
pub use playback::{CpalOutput, DEFAULT_BUFFER_SAMPLES};
