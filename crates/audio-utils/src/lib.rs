pub mod audio;
pub mod playback;

pub use audio::{INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
pub use playback::{AudioFormat, PlaybackScheduler, RenderClock, ScheduledFragment};
