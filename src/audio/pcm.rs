use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Decoded, uncompressed audio: interleaved f32 frames at a fixed rate.
///
/// Immutable once built; tracks share it through `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    channels: u16,
    sample_rate: u32,
    samples: Vec<f32>,
}

impl PcmBuffer {
    /// Build from interleaved samples. Trailing samples that do not fill a
    /// whole frame are dropped.
    pub fn from_interleaved(channels: u16, sample_rate: u32, mut samples: Vec<f32>) -> Self {
        let channels = channels.max(1);
        let whole = samples.len() - samples.len() % channels as usize;
        samples.truncate(whole);
        Self {
            channels,
            sample_rate,
            samples,
        }
    }

    /// Build from one `Vec` per channel (all channels must be equally long;
    /// the shortest one wins otherwise).
    pub fn from_planar(sample_rate: u32, planes: &[Vec<f32>]) -> Self {
        let channels = planes.len().max(1);
        let frames = planes.iter().map(Vec::len).min().unwrap_or(0);
        let mut samples = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            for plane in planes {
                samples.push(plane[i]);
            }
        }
        Self::from_interleaved(channels as u16, sample_rate, samples)
    }

    pub fn silence(channels: u16, sample_rate: u32, frames: usize) -> Self {
        Self::from_interleaved(channels, sample_rate, vec![0.0; frames * channels.max(1) as usize])
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Native duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Frame `i` as a stereo pair. Mono is duplicated to both sides; extra
    /// channels beyond the first two are ignored. Out of range → silence.
    #[inline]
    pub fn stereo_frame(&self, i: usize) -> (f32, f32) {
        let ch = self.channels as usize;
        let base = i * ch;
        match self.samples.get(base..base + ch) {
            Some(frame) if ch == 1 => (frame[0], frame[0]),
            Some(frame) => (frame[0], frame[1]),
            None => (0.0, 0.0),
        }
    }

    /// Mean of all channels of frame `i`.
    #[inline]
    pub fn mono_sample(&self, i: usize) -> f32 {
        let ch = self.channels as usize;
        let base = i * ch;
        match self.samples.get(base..base + ch) {
            Some(frame) => frame.iter().sum::<f32>() / ch as f32,
            None => 0.0,
        }
    }
}

impl AsRef<PcmBuffer> for PcmBuffer {
    fn as_ref(&self) -> &PcmBuffer {
        self
    }
}

// ── Track ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    Pending,
    Ready,
    Failed,
}

/// One playlist entry as seen by the engine.
///
/// The playlist owns tracks; the engine only reads them.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub pcm: Option<Arc<PcmBuffer>>,
    /// Native duration in seconds (0 until decoded).
    pub duration: f64,
    /// Tempo estimate in BPM, filled in after analysis.
    pub tempo: Option<f64>,
    pub state: LoadState,
}

impl Track {
    pub fn pending(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            pcm: None,
            duration: 0.0,
            tempo: None,
            state: LoadState::Pending,
        }
    }

    /// A ready track built straight from PCM (tests, generated audio).
    pub fn from_pcm(id: impl Into<String>, name: impl Into<String>, pcm: PcmBuffer) -> Self {
        let mut track = Self::pending(id, name);
        track.mark_ready(pcm);
        track
    }

    /// Display name for a file: the file name without its extension.
    pub fn name_from_file(file_name: &str) -> String {
        let base = file_name
            .rsplit(&['/', '\\'][..])
            .next()
            .unwrap_or(file_name);
        match base.rfind('.') {
            Some(pos) if pos > 0 => base[..pos].to_string(),
            _ => base.to_string(),
        }
    }

    pub fn mark_ready(&mut self, pcm: PcmBuffer) {
        self.duration = pcm.duration();
        self.pcm = Some(Arc::new(pcm));
        self.state = LoadState::Ready;
    }

    pub fn mark_failed(&mut self) {
        self.pcm = None;
        self.state = LoadState::Failed;
    }

    pub fn is_ready(&self) -> bool {
        self.state == LoadState::Ready && self.pcm.is_some()
    }
}
