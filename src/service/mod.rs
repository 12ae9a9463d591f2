//! Capture and playback orchestrators

pub mod capture;
pub mod playback;

pub use capture::CaptureService;
pub use playback::PlaybackService;
