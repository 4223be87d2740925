//! Outbound audio streaming: playback-rate pacing, codec plumbing, and
//! the WAV container used for recognition uploads.

pub mod codec;
pub mod rate;
pub mod wav;

pub use codec::{decode_frames, encode_frames, resample_linear, CodecError};
pub use rate::AudioRateController;
pub use wav::pcm_to_wav;
