//! Linear PCM frames and WAV packaging

use std::io::Cursor;

use crate::{Error, Result};

/// Sample rate used end to end (capture, recognition, synthesis, playback)
pub const SAMPLE_RATE: u32 = 16000;

/// Mono
pub const CHANNELS: u16 = 1;

/// Bytes per 16-bit sample
pub const SAMPLE_WIDTH: usize = 2;

/// Capture frame duration
pub const CHUNK_MS: u32 = 100;

/// Wire identifier for 16-bit signed little-endian PCM
pub const AUDIO_ENCODING: &str = "LINEAR16";

/// Byte length of one capture frame: `sample_rate * chunk_ms / 1000 * 2`
#[must_use]
pub const fn frame_len(sample_rate: u32, chunk_ms: u32) -> usize {
    (sample_rate as usize * chunk_ms as usize / 1000) * SAMPLE_WIDTH
}

/// Number of samples in one capture frame
#[must_use]
pub const fn frame_samples(sample_rate: u32, chunk_ms: u32) -> usize {
    frame_len(sample_rate, chunk_ms) / SAMPLE_WIDTH
}

/// A block of 16-bit signed little-endian mono PCM
///
/// The byte length is always a multiple of the sample width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pcm: Vec<u8>,
}

impl AudioFrame {
    /// Wrap raw PCM bytes
    ///
    /// # Errors
    ///
    /// Returns error if the length is not a whole number of samples
    pub fn from_pcm(pcm: Vec<u8>) -> Result<Self> {
        if pcm.len() % SAMPLE_WIDTH != 0 {
            return Err(Error::Audio(format!(
                "frame of {} bytes is not a whole number of 16-bit samples",
                pcm.len()
            )));
        }
        Ok(Self { pcm })
    }

    /// Build a frame from samples
    #[must_use]
    pub fn from_samples(samples: &[i16]) -> Self {
        Self {
            pcm: samples_to_pcm(samples),
        }
    }

    /// Raw little-endian bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.pcm
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.pcm
    }

    /// Length in bytes
    #[must_use]
    pub const fn len(&self) -> usize {
        self.pcm.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    #[must_use]
    pub const fn sample_count(&self) -> usize {
        self.pcm.len() / SAMPLE_WIDTH
    }

    /// Decoded samples
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.pcm
            .chunks_exact(SAMPLE_WIDTH)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
    }
}

/// Decode little-endian PCM bytes into samples
///
/// # Errors
///
/// Returns error if the byte count is odd
pub fn pcm_to_samples(pcm: &[u8]) -> Result<Vec<i16>> {
    if pcm.len() % SAMPLE_WIDTH != 0 {
        return Err(Error::Audio(format!(
            "PCM payload of {} bytes is not 16-bit aligned",
            pcm.len()
        )));
    }
    Ok(pcm
        .chunks_exact(SAMPLE_WIDTH)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect())
}

/// Encode samples as little-endian PCM bytes
#[must_use]
pub fn samples_to_pcm(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Convert an f32 sample in [-1.0, 1.0] to i16
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Convert an i16 sample to f32 in [-1.0, 1.0)
#[must_use]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Split PCM into frames of `frame_bytes`; the last frame may be shorter
///
/// # Errors
///
/// Returns error if the payload or frame size is not 16-bit aligned
pub fn split_frames(pcm: &[u8], frame_bytes: usize) -> Result<Vec<AudioFrame>> {
    if frame_bytes == 0 || frame_bytes % SAMPLE_WIDTH != 0 {
        return Err(Error::Audio(format!("invalid frame size {frame_bytes}")));
    }
    pcm.chunks(frame_bytes)
        .map(|chunk| AudioFrame::from_pcm(chunk.to_vec()))
        .collect()
}

/// Package mono 16-bit PCM into a WAV file
///
/// # Errors
///
/// Returns error if the payload is misaligned or WAV encoding fails
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let samples = pcm_to_samples(pcm)?;
    let spec = hound::WavSpec {
        channels: CHANNELS,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Decoded WAV payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavAudio {
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
}

/// Extract PCM from a 16-bit mono WAV file
///
/// # Errors
///
/// Returns error if the file is not a 16-bit integer mono WAV
pub fn wav_to_pcm(wav: &[u8]) -> Result<WavAudio> {
    let mut reader = hound::WavReader::new(Cursor::new(wav))?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16
        || spec.sample_format != hound::SampleFormat::Int
        || spec.channels != CHANNELS
    {
        return Err(Error::Audio(format!(
            "audio must be 16-bit mono PCM (got {} bit, {} channels)",
            spec.bits_per_sample, spec.channels
        )));
    }

    let samples = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(WavAudio {
        pcm: samples_to_pcm(&samples),
        sample_rate: spec.sample_rate,
    })
}

/// Strip a RIFF/WAV container if present, returning bare PCM
///
/// # Errors
///
/// Returns error if the container is malformed or the PCM is misaligned
pub fn strip_wav_header(audio: &[u8]) -> Result<Vec<u8>> {
    if audio.starts_with(b"RIFF") {
        return Ok(wav_to_pcm(audio)?.pcm);
    }
    pcm_to_samples(audio)?;
    Ok(audio.to_vec())
}

/// Generate `duration_ms` of silence
#[must_use]
pub fn silence(sample_rate: u32, duration_ms: u32) -> Vec<u8> {
    vec![0; frame_len(sample_rate, duration_ms)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_frame_is_3200_bytes() {
        assert_eq!(frame_len(SAMPLE_RATE, CHUNK_MS), 3200);
        assert_eq!(frame_samples(SAMPLE_RATE, CHUNK_MS), 1600);
    }

    #[test]
    fn odd_length_frame_rejected() {
        assert!(AudioFrame::from_pcm(vec![0; 3]).is_err());
        assert!(AudioFrame::from_pcm(vec![0; 4]).is_ok());
    }

    #[test]
    fn frame_samples_decode_little_endian() {
        let frame = AudioFrame::from_samples(&[1, -2, i16::MAX]);
        assert_eq!(frame.as_bytes(), &[1, 0, 0xfe, 0xff, 0xff, 0x7f]);
        assert_eq!(frame.samples().collect::<Vec<_>>(), vec![1, -2, i16::MAX]);
        assert_eq!(frame.sample_count(), 3);
    }

    #[test]
    fn split_keeps_short_tail() {
        let frames = split_frames(&[0; 10], 4).unwrap();
        assert_eq!(
            frames.iter().map(AudioFrame::len).collect::<Vec<_>>(),
            vec![4, 4, 2]
        );
    }

    #[test]
    fn wav_packaging_preserves_pcm() {
        let pcm = samples_to_pcm(&[0, 100, -100, i16::MIN, i16::MAX]);
        let wav = pcm_to_wav(&pcm, SAMPLE_RATE).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");

        let decoded = wav_to_pcm(&wav).unwrap();
        assert_eq!(decoded.pcm, pcm);
        assert_eq!(decoded.sample_rate, SAMPLE_RATE);
    }

    #[test]
    fn strip_header_passes_bare_pcm_through() {
        let pcm = samples_to_pcm(&[5, 6, 7]);
        assert_eq!(strip_wav_header(&pcm).unwrap(), pcm);

        let wav = pcm_to_wav(&pcm, 24000).unwrap();
        assert_eq!(strip_wav_header(&wav).unwrap(), pcm);
    }

    #[test]
    fn stereo_wav_rejected() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            writer.write_sample(0i16).unwrap();
            writer.write_sample(0i16).unwrap();
            writer.finalize().unwrap();
        }
        assert!(wav_to_pcm(&cursor.into_inner()).is_err());
    }
}
