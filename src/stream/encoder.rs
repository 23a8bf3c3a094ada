//! `encoder.rs`: rendered mix → portable byte stream
//!
//! The preferred path hands 16-bit blocks to an injected lossy encoder
//! (e.g. an MP3 library binding). When no lossy encoder is configured, or it
//! fails on any block, the same samples are wrapped in a WAV container
//! instead and the substitution is reported on the result.
//!
//! Encoding never fails outward.
use std::{io::Cursor, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    audio::renderer::RenderedMix,
    error::{AutomixError, Result},
};

/// Interleaved samples per block handed to the lossy encoder.
pub const LOSSY_BLOCK_SAMPLES: usize = 1152;
/// Fixed attenuation applied before integer quantization.
pub const HEADROOM: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    Mp3,
    Wav,
}

impl Codec {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp3 => "audio/mpeg",
            Self::Wav => "audio/wav",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp3" | "mpeg" => Ok(Self::Mp3),
            "wav" | "wave" => Ok(Self::Wav),
            other => Err(format!("unknown codec '{other}' (expected mp3 or wav)")),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncoderError {
    #[error("encoder unavailable: {0}")]
    Unavailable(String),
    #[error("block {block} failed: {reason}")]
    Block { block: usize, reason: String },
    #[error("flush failed: {0}")]
    Flush(String),
    #[error("lossy encoder produced no output")]
    Empty,
    #[error("container write failed: {0}")]
    Container(String),
}

/// One running lossy encode. Blocks are interleaved i16 samples.
pub trait LossyEncoder: Send {
    fn encode_block(&mut self, samples: &[i16]) -> std::result::Result<Vec<u8>, EncoderError>;
    fn flush(&mut self) -> std::result::Result<Vec<u8>, EncoderError>;
}

/// Creates a fresh [`LossyEncoder`] per export.
pub trait LossyEncoderFactory: Send + Sync {
    fn create(
        &self,
        channels: u16,
        sample_rate: u32,
        bitrate_kbps: u32,
    ) -> std::result::Result<Box<dyn LossyEncoder>, EncoderError>;
}

/// Why the preferred codec was not produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeFallback {
    pub preferred: Codec,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMix {
    pub bytes: Vec<u8>,
    /// Codec actually produced. Pick the file extension from this.
    pub codec: Codec,
    pub fallback: Option<EncodeFallback>,
}

/// Float sample → i16 with the fixed headroom.
///
/// Negative values scale by `0x8000`, positive by `0x7fff`.
#[inline]
pub fn quantize(sample: f32) -> i16 {
    let s = (sample * HEADROOM).clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 0x8000 as f32) as i16
    } else {
        (s * 0x7fff as f32) as i16
    }
}

pub struct SampleEncoder {
    lossy: Option<Box<dyn LossyEncoderFactory>>,
    bitrate_kbps: u32,
}

impl SampleEncoder {
    pub fn new(lossy: Option<Box<dyn LossyEncoderFactory>>) -> Self {
        Self {
            lossy,
            bitrate_kbps: 192,
        }
    }

    /// Only the WAV container is available.
    pub fn wav_only() -> Self {
        Self::new(None)
    }

    pub fn with_bitrate(mut self, bitrate_kbps: u32) -> Self {
        self.bitrate_kbps = bitrate_kbps.max(8);
        self
    }

    pub fn has_lossy(&self) -> bool {
        self.lossy.is_some()
    }

    pub fn encode(&self, mix: &RenderedMix, preferred: Codec) -> EncodedMix {
        let pcm: Vec<i16> = mix.samples().iter().map(|&s| quantize(s)).collect();

        let fallback = match preferred {
            Codec::Wav => None,
            Codec::Mp3 => match self.encode_lossy(&pcm, mix.channels(), mix.sample_rate()) {
                Ok(bytes) => {
                    log::info!("Encoded mix: {} bytes ({})", bytes.len(), Codec::Mp3);
                    return EncodedMix {
                        bytes,
                        codec: Codec::Mp3,
                        fallback: None,
                    };
                }
                Err(e) => {
                    log::warn!("Lossy encode unavailable, writing WAV instead: {e}");
                    Some(EncodeFallback {
                        preferred,
                        reason: e.to_string(),
                    })
                }
            },
        };

        let bytes = wav_or_header(
            write_wav(&pcm, mix.channels(), mix.sample_rate()),
            mix.channels(),
            mix.sample_rate(),
        );
        log::info!("Encoded mix: {} bytes ({})", bytes.len(), Codec::Wav);

        EncodedMix {
            bytes,
            codec: Codec::Wav,
            fallback,
        }
    }

    /// Encode on the blocking thread pool.
    pub async fn encode_async(
        self: Arc<Self>,
        mix: Arc<RenderedMix>,
        preferred: Codec,
    ) -> Result<EncodedMix> {
        tokio::task::spawn_blocking(move || self.encode(&mix, preferred))
            .await
            .map_err(|e| AutomixError::Output(format!("encode task failed: {e}")))
    }

    fn encode_lossy(
        &self,
        pcm: &[i16],
        channels: u16,
        sample_rate: u32,
    ) -> std::result::Result<Vec<u8>, EncoderError> {
        let factory = self
            .lossy
            .as_ref()
            .ok_or_else(|| EncoderError::Unavailable("no lossy encoder configured".into()))?;
        let mut encoder = factory.create(channels, sample_rate, self.bitrate_kbps)?;

        let mut out = Vec::new();
        for (block, chunk) in pcm.chunks(LOSSY_BLOCK_SAMPLES).enumerate() {
            let bytes = encoder.encode_block(chunk).map_err(|e| match e {
                EncoderError::Block { .. } => e,
                other => EncoderError::Block {
                    block,
                    reason: other.to_string(),
                },
            })?;
            out.extend_from_slice(&bytes);
        }
        out.extend_from_slice(&encoder.flush()?);

        if out.is_empty() {
            return Err(EncoderError::Empty);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for SampleEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleEncoder")
            .field("lossy", &self.lossy.is_some())
            .field("bitrate_kbps", &self.bitrate_kbps)
            .finish()
    }
}

/// 16-bit PCM WAV in memory.
fn write_wav(
    pcm: &[i16],
    channels: u16,
    sample_rate: u32,
) -> std::result::Result<Vec<u8>, EncoderError> {
    let spec = hound::WavSpec {
        channels: channels.max(1),
        sample_rate: sample_rate.max(1),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + pcm.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| EncoderError::Container(e.to_string()))?;
        for &s in pcm {
            writer
                .write_sample(s)
                .map_err(|e| EncoderError::Container(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| EncoderError::Container(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

/// The written container, or a header with no samples when the full write
/// failed (data past the 4 GiB RIFF limit).
fn wav_or_header(
    written: std::result::Result<Vec<u8>, EncoderError>,
    channels: u16,
    sample_rate: u32,
) -> Vec<u8> {
    match written {
        Ok(bytes) => bytes,
        Err(e) => {
            log::error!("WAV write failed, emitting header only: {e}");
            write_wav(&[], channels, sample_rate).unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::audio::pcm::PcmBuffer;

    /// Emits a 4-byte tag per block plus a trailer on flush.
    struct TaggingEncoder {
        blocks: Arc<AtomicUsize>,
        fail_at: Option<usize>,
        seen: usize,
    }

    impl LossyEncoder for TaggingEncoder {
        fn encode_block(&mut self, samples: &[i16]) -> std::result::Result<Vec<u8>, EncoderError> {
            if self.fail_at == Some(self.seen) {
                return Err(EncoderError::Block {
                    block: self.seen,
                    reason: "bitstream overflow".into(),
                });
            }
            self.seen += 1;
            self.blocks.fetch_add(1, Ordering::SeqCst);
            Ok((samples.len() as u32).to_le_bytes().to_vec())
        }

        fn flush(&mut self) -> std::result::Result<Vec<u8>, EncoderError> {
            Ok(b"END".to_vec())
        }
    }

    struct TaggingFactory {
        blocks: Arc<AtomicUsize>,
        fail_at: Option<usize>,
    }

    impl LossyEncoderFactory for TaggingFactory {
        fn create(
            &self,
            _channels: u16,
            _sample_rate: u32,
            _bitrate_kbps: u32,
        ) -> std::result::Result<Box<dyn LossyEncoder>, EncoderError> {
            Ok(Box::new(TaggingEncoder {
                blocks: Arc::clone(&self.blocks),
                fail_at: self.fail_at,
                seen: 0,
            }))
        }
    }

    struct MissingLibrary;

    impl LossyEncoderFactory for MissingLibrary {
        fn create(&self, _: u16, _: u32, _: u32) -> std::result::Result<Box<dyn LossyEncoder>, EncoderError> {
            Err(EncoderError::Unavailable("library not loaded".into()))
        }
    }

    fn mix(frames: usize) -> RenderedMix {
        let samples = (0..frames * 2).map(|i| ((i % 200) as f32 / 100.0) - 1.0).collect();
        RenderedMix::from_pcm(PcmBuffer::from_interleaved(2, 8000, samples))
    }

    fn decode_wav(bytes: &[u8]) -> (hound::WavSpec, Vec<i16>) {
        let mut reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        let samples = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        (spec, samples)
    }

    #[test]
    fn quantize_applies_headroom_and_asymmetric_scale() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(1.0), (0.8 * 32767.0) as i16);
        assert_eq!(quantize(-1.0), (-0.8 * 32768.0) as i16);
        assert_eq!(quantize(2.0), i16::MAX);
        assert_eq!(quantize(-2.0), i16::MIN);
        assert_eq!(quantize(-1.25), i16::MIN);
    }

    #[test]
    fn codec_metadata() {
        assert_eq!(Codec::Mp3.mime_type(), "audio/mpeg");
        assert_eq!(Codec::Wav.mime_type(), "audio/wav");
        assert_eq!(Codec::Wav.extension(), "wav");
        assert_eq!("MP3".parse::<Codec>().unwrap(), Codec::Mp3);
        assert!("ogg".parse::<Codec>().is_err());
    }

    #[test]
    fn wav_output_is_readable_and_quantized() {
        let mix = mix(500);
        let encoded = SampleEncoder::wav_only().encode(&mix, Codec::Wav);
        assert_eq!(encoded.codec, Codec::Wav);
        assert!(encoded.fallback.is_none());

        let (spec, samples) = decode_wav(&encoded.bytes);
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 8000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(samples.len(), 1000);
        for (q, &s) in samples.iter().zip(mix.samples()) {
            assert_eq!(*q, quantize(s));
        }
    }

    #[test]
    fn lossy_path_blocks_and_flushes() {
        let blocks = Arc::new(AtomicUsize::new(0));
        let encoder = SampleEncoder::new(Some(Box::new(TaggingFactory {
            blocks: Arc::clone(&blocks),
            fail_at: None,
        })));
        // 1500 frames → 3000 samples → blocks of 1152, 1152, 696.
        let encoded = encoder.encode(&mix(1500), Codec::Mp3);

        assert_eq!(encoded.codec, Codec::Mp3);
        assert!(encoded.fallback.is_none());
        assert_eq!(blocks.load(Ordering::SeqCst), 3);
        assert_eq!(&encoded.bytes[0..4], &1152u32.to_le_bytes());
        assert_eq!(&encoded.bytes[8..12], &696u32.to_le_bytes());
        assert!(encoded.bytes.ends_with(b"END"));
    }

    #[test]
    fn block_failure_falls_back_to_wav() {
        let encoder = SampleEncoder::new(Some(Box::new(TaggingFactory {
            blocks: Arc::new(AtomicUsize::new(0)),
            fail_at: Some(1),
        })));
        let encoded = encoder.encode(&mix(1500), Codec::Mp3);

        assert_eq!(encoded.codec, Codec::Wav);
        let fallback = encoded.fallback.unwrap();
        assert_eq!(fallback.preferred, Codec::Mp3);
        assert!(fallback.reason.contains("block 1"), "{}", fallback.reason);
        assert_eq!(decode_wav(&encoded.bytes).1.len(), 3000);
    }

    #[test]
    fn missing_lossy_encoder_falls_back() {
        for encoder in [
            SampleEncoder::wav_only(),
            SampleEncoder::new(Some(Box::new(MissingLibrary))),
        ] {
            let encoded = encoder.encode(&mix(10), Codec::Mp3);
            assert_eq!(encoded.codec, Codec::Wav);
            assert!(encoded.fallback.is_some());
            assert!(!encoded.bytes.is_empty());
        }
    }

    #[test]
    fn empty_mix_still_yields_a_valid_container() {
        let empty = RenderedMix::from_pcm(PcmBuffer::silence(2, 44100, 0));
        let encoded = SampleEncoder::wav_only().encode(&empty, Codec::Mp3);
        assert_eq!(encoded.codec, Codec::Wav);
        let (spec, samples) = decode_wav(&encoded.bytes);
        assert_eq!(spec.channels, 2);
        assert!(samples.is_empty());
    }

    #[tokio::test]
    async fn encode_async_matches_sync() {
        let encoder = Arc::new(SampleEncoder::wav_only());
        let mix = Arc::new(mix(300));
        let sync = encoder.encode(&mix, Codec::Wav);
        let asynchronous = Arc::clone(&encoder)
            .encode_async(Arc::clone(&mix), Codec::Wav)
            .await
            .unwrap();
        assert_eq!(sync, asynchronous);
    }

    #[test]
    fn failed_wav_write_still_yields_a_container() {
        let bytes = wav_or_header(
            Err(EncoderError::Container("data chunk exceeds 4 GiB".into())),
            2,
            8000,
        );
        assert!(!bytes.is_empty());
        let (spec, samples) = decode_wav(&bytes);
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 8000);
        assert!(samples.is_empty());
    }
}
