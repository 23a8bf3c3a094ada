use std::io::Cursor;

use symphonia::core::{
    audio::{AudioBufferRef, Signal},
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use crate::{audio::analyzer::tempo, error::DecodeError};

use super::pcm::{PcmBuffer, Track};

/// Turns a compressed (or container-wrapped) audio file into PCM.
///
/// Implementations must be deterministic and must not retry on failure.
pub trait Decoder: Send + Sync {
    /// `hint` is a file extension (without the dot) when one is known.
    fn decode(&self, bytes: &[u8], hint: Option<&str>) -> Result<PcmBuffer, DecodeError>;
}

/// Default decoder over symphonia's probe and codec registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for SymphoniaDecoder {
    fn decode(&self, bytes: &[u8], hint: Option<&str>) -> Result<PcmBuffer, DecodeError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
        let mut probe_hint = Hint::new();
        if let Some(ext) = hint {
            probe_hint.with_extension(ext);
        }
        let mut probed = symphonia::default::get_probe()
            .format(
                &probe_hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::new(format!("probe failed: {e}")))?;

        let track = probed
            .format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::new("no audio track found"))?
            .clone();

        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::new(format!("codec init: {e}")))?;

        let mut samples: Vec<f32> = Vec::new();
        loop {
            let packet = match probed.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(e) => {
                    log::warn!("Format read stopped early: {e}");
                    break;
                }
            };
            if packet.track_id() != track_id {
                continue;
            }
            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::warn!("Decode error (skip): {e}");
                    continue;
                }
                Err(e) => return Err(DecodeError::new(format!("fatal decode: {e}"))),
            };

            // Some formats only report the layout on the first decoded packet.
            if sample_rate == 0 {
                sample_rate = decoded.spec().rate;
            }
            if channels == 0 {
                channels = decoded.spec().channels.count();
            }
            append_interleaved(decoded, channels, &mut samples);
        }

        if sample_rate == 0 || channels == 0 {
            return Err(DecodeError::new("stream has no sample rate or channel layout"));
        }
        if samples.is_empty() {
            return Err(DecodeError::new("stream contains no audio frames"));
        }

        Ok(PcmBuffer::from_interleaved(channels as u16, sample_rate, samples))
    }
}

/// Append one decoded packet to `out` as interleaved f32, normalised to ±1.
fn append_interleaved(buf: AudioBufferRef<'_>, channels: usize, out: &mut Vec<f32>) {
    let frames = buf.frames();
    let available = buf.spec().channels.count();
    out.reserve(frames * channels);

    macro_rules! push_frames {
        ($b:expr, $conv:expr) => {{
            for i in 0..frames {
                for ch in 0..channels {
                    // Missing channels (layout changed mid-stream) repeat the first one.
                    let plane = $b.chan(if ch < available { ch } else { 0 });
                    out.push($conv(plane[i]));
                }
            }
        }};
    }

    match buf {
        AudioBufferRef::F32(b) => push_frames!(b, |s: f32| s),
        AudioBufferRef::F64(b) => push_frames!(b, |s: f64| s as f32),
        AudioBufferRef::S32(b) => push_frames!(b, |s: i32| s as f32 / i32::MAX as f32),
        AudioBufferRef::S24(b) => push_frames!(b, |s: symphonia::core::sample::i24| {
            s.inner() as f32 / 8_388_607.0
        }),
        AudioBufferRef::S16(b) => push_frames!(b, |s: i16| s as f32 / i16::MAX as f32),
        AudioBufferRef::S8(b) => push_frames!(b, |s: i8| s as f32 / i8::MAX as f32),
        AudioBufferRef::U32(b) => push_frames!(b, |s: u32| {
            (s as f64 - 2_147_483_648.0) as f32 / 2_147_483_648.0
        }),
        AudioBufferRef::U24(b) => push_frames!(b, |s: symphonia::core::sample::u24| {
            (s.inner() as f32 - 8_388_608.0) / 8_388_608.0
        }),
        AudioBufferRef::U16(b) => push_frames!(b, |s: u16| (s as f32 - 32768.0) / 32768.0),
        // U8 is unsigned 0-255 centred at 128
        AudioBufferRef::U8(b) => push_frames!(b, |s: u8| (s as f32 - 128.0) / 128.0),
    }
}

/// Decode `bytes` into `track`, estimate its tempo and mark it Ready.
///
/// On failure the track is marked Failed and the decoder's reason is
/// returned unchanged.
pub fn load_track(
    decoder: &dyn Decoder,
    track: &mut Track,
    bytes: &[u8],
    hint: Option<&str>,
) -> Result<(), DecodeError> {
    match decoder.decode(bytes, hint) {
        Ok(pcm) => {
            let bpm = tempo::estimate(&pcm);
            log::info!(
                "Loaded '{}': {:.2}s, {} ch @ {} Hz, ~{bpm} BPM",
                track.name,
                pcm.duration(),
                pcm.channels(),
                pcm.sample_rate()
            );
            track.mark_ready(pcm);
            track.tempo = Some(bpm);
            Ok(())
        }
        Err(e) => {
            log::warn!("Failed to load '{}': {e}", track.name);
            track.mark_failed();
            Err(e)
        }
    }
}
