//! Offline export of container audio.

mod wav;

pub use wav::export_wav;
