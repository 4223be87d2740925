//! RIFF/WAVE container for recognition uploads.

use bytes::{BufMut, Bytes, BytesMut};

/// Wraps raw 16-bit LPCM in a standard 44-byte WAVE header.
///
/// The transcription endpoint only accepts container formats, so the
/// decoded microphone PCM is wrapped in memory right before upload.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Bytes {
    const BITS_PER_SAMPLE: u16 = 16;

    let bytes_per_sample = BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate * u32::from(channels) * u32::from(bytes_per_sample);
    let block_align = channels * bytes_per_sample;
    let data_size = pcm.len() as u32;

    let mut buf = BytesMut::with_capacity(44 + pcm.len());

    // RIFF header
    buf.put_slice(b"RIFF");
    buf.put_u32_le(36 + data_size);
    buf.put_slice(b"WAVE");

    // fmt chunk
    buf.put_slice(b"fmt ");
    buf.put_u32_le(16); // Chunk size
    buf.put_u16_le(1); // Audio format (PCM)
    buf.put_u16_le(channels);
    buf.put_u32_le(sample_rate);
    buf.put_u32_le(byte_rate);
    buf.put_u16_le(block_align);
    buf.put_u16_le(BITS_PER_SAMPLE);

    // data chunk
    buf.put_slice(b"data");
    buf.put_u32_le(data_size);
    buf.put_slice(pcm);

    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(buf: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn header_layout() {
        let pcm = vec![0u8; 640];
        let wav = pcm_to_wav(&pcm, 16_000, 1);

        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");
    }

    #[test]
    fn declared_sizes_match_payload() {
        let pcm = vec![0u8; 640];
        let wav = pcm_to_wav(&pcm, 16_000, 1);

        assert_eq!(u32_at(&wav, 4), 36 + 640, "RIFF size");
        assert_eq!(u32_at(&wav, 40), 640, "data size");
        assert_eq!(wav.len(), 44 + 640);
    }

    #[test]
    fn sample_rate_and_byte_rate() {
        let wav = pcm_to_wav(&[0u8; 4], 16_000, 1);
        assert_eq!(u32_at(&wav, 24), 16_000);
        assert_eq!(u32_at(&wav, 28), 32_000, "byte rate = rate * ch * 2");
    }

    #[test]
    fn payload_follows_header() {
        let pcm: Vec<u8> = [0x01u8, 0x02].repeat(320);
        let wav = pcm_to_wav(&pcm, 16_000, 1);
        assert_eq!(&wav[44..46], &[0x01, 0x02]);
    }

    #[test]
    fn empty_pcm_yields_valid_header() {
        let wav = pcm_to_wav(&[], 16_000, 1);
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(u32_at(&wav, 40), 0);
        assert_eq!(wav.len(), 44);
    }
}
