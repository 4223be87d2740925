//! Opus decode/encode and sample-rate conversion.
//!
//! Decoders and encoders are created per call; they carry internal
//! prediction state that must not leak between requests.

use bytes::Bytes;
use thiserror::Error;

use crate::protocol_constants::{FRAME_SAMPLES, OPUS_BITRATE};

/// Codec-layer errors.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Opus error: {0}")]
    Opus(#[from] opus::Error),

    #[error("Unsupported channel count: {0}")]
    Channels(u16),
}

fn channels(count: u16) -> Result<opus::Channels, CodecError> {
    match count {
        1 => Ok(opus::Channels::Mono),
        2 => Ok(opus::Channels::Stereo),
        other => Err(CodecError::Channels(other)),
    }
}

/// Decodes a buffered utterance into interleaved 16-bit PCM.
///
/// Each packet holds one fixed-size frame ([`FRAME_SAMPLES`] samples per
/// channel); frame order is preserved.
pub fn decode_frames(
    packets: &[Bytes],
    sample_rate: u32,
    channel_count: u16,
) -> Result<Vec<i16>, CodecError> {
    let mut decoder = opus::Decoder::new(sample_rate, channels(channel_count)?)?;
    let mut pcm = Vec::with_capacity(packets.len() * FRAME_SAMPLES * channel_count as usize);
    let mut frame = vec![0i16; FRAME_SAMPLES * channel_count as usize];

    for packet in packets {
        let decoded = decoder.decode(packet, &mut frame, false)?;
        pcm.extend_from_slice(&frame[..decoded * channel_count as usize]);
    }
    Ok(pcm)
}

/// Encodes 16-bit PCM into a sequence of fixed-duration Opus frames.
///
/// The tail is zero-padded to a whole frame. Voice application profile at
/// [`OPUS_BITRATE`] bits/s.
pub fn encode_frames(
    pcm: &[i16],
    sample_rate: u32,
    channel_count: u16,
) -> Result<Vec<Bytes>, CodecError> {
    let mut encoder = opus::Encoder::new(
        sample_rate,
        channels(channel_count)?,
        opus::Application::Voip,
    )?;
    encoder.set_bitrate(opus::Bitrate::Bits(OPUS_BITRATE))?;

    let frame_len = FRAME_SAMPLES * channel_count as usize;
    let mut packets = Vec::with_capacity(pcm.len().div_ceil(frame_len));

    for chunk in pcm.chunks(frame_len) {
        let packet = if chunk.len() == frame_len {
            encoder.encode_vec(chunk, 4000)?
        } else {
            let mut padded = chunk.to_vec();
            padded.resize(frame_len, 0);
            encoder.encode_vec(&padded, 4000)?
        };
        packets.push(Bytes::from(packet));
    }
    Ok(packets)
}

/// Linear-interpolation resampler for 16-bit mono PCM.
///
/// Quality is adequate for speech going into a 16 kHz Opus encode; the
/// provider returns 24 kHz, a clean 3:2 ratio.
pub fn resample_linear(input: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }

    let n_in = input.len();
    let n_out = (n_in as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    let step = f64::from(from_rate) / f64::from(to_rate);

    let mut output = Vec::with_capacity(n_out);
    for i in 0..n_out {
        let pos = i as f64 * step;
        let idx = pos as usize;
        let frac = pos - idx as f64;
        let value = if idx + 1 < n_in {
            f64::from(input[idx]) * (1.0 - frac) + f64::from(input[idx + 1]) * frac
        } else if idx < n_in {
            f64::from(input[idx])
        } else {
            0.0
        };
        output.push(value.round().clamp(-32768.0, 32767.0) as i16);
    }
    output
}

/// Reinterprets little-endian PCM bytes as 16-bit samples.
pub fn pcm_bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Serializes 16-bit samples as little-endian PCM bytes.
pub fn samples_to_pcm_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}
