//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod format;
pub mod playback;
pub mod synthetic;

pub use buffer::{create_shared_buffer, RingBuffer, SharedRingBuffer};
pub use device::{list_devices, open_capture, open_playback, CaptureDevice, PlaybackDevice};
pub use format::AudioFormat;
