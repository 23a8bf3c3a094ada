use std::sync::Arc;

use crate::{
    error::{AutomixError, Result},
    scheduler::timeline::{Timeline, TimelineEntry},
};

use super::pcm::PcmBuffer;

/// Rendered mixes are always stereo.
pub const OUTPUT_CHANNELS: u16 = 2;

/// Slack for comparing a track's native length against what a segment needs.
const DURATION_EPSILON: f64 = 1e-9;

/// Result of one offline render: interleaved stereo f32 at a fixed rate,
/// `ceil(sample_rate · total_duration)` frames long.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMix {
    buffer: PcmBuffer,
}

impl RenderedMix {
    /// Wrap an already mixed buffer, e.g. one produced by another host.
    pub fn from_pcm(buffer: PcmBuffer) -> Self {
        Self { buffer }
    }

    pub fn sample_rate(&self) -> u32 {
        self.buffer.sample_rate()
    }

    pub fn channels(&self) -> u16 {
        self.buffer.channels()
    }

    pub fn frames(&self) -> usize {
        self.buffer.frames()
    }

    pub fn duration(&self) -> f64 {
        self.buffer.duration()
    }

    /// Interleaved L R L R … samples.
    pub fn samples(&self) -> &[f32] {
        self.buffer.samples()
    }

    pub fn pcm(&self) -> &PcmBuffer {
        &self.buffer
    }

    pub fn into_pcm(self) -> PcmBuffer {
        self.buffer
    }
}

/// Offline mixdown of trimmed tracks through their timeline gain envelopes.
///
/// Holds the output rate explicitly instead of reading a shared audio
/// context. Rendering is pure: the same inputs give bit-identical output.
#[derive(Debug, Clone, Copy)]
pub struct MixRenderer {
    sample_rate: u32,
}

impl MixRenderer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Sum every `(track, entry)` pair into one stereo buffer.
    ///
    /// Each track contributes exactly `segment_duration` seconds read from
    /// `source_start_offset` of its native audio, placed at the entry's
    /// `segment_start`. Overlaps are summed with no clipping correction.
    pub fn render<T: AsRef<PcmBuffer>>(
        &self,
        tracks: &[T],
        timeline: &Timeline,
        source_start_offset: f64,
    ) -> Result<RenderedMix> {
        if tracks.is_empty() {
            return Err(AutomixError::EmptyInput);
        }
        if tracks.len() != timeline.len() {
            return Err(AutomixError::InvalidConfig(format!(
                "timeline has {} entries for {} tracks",
                timeline.len(),
                tracks.len()
            )));
        }
        if !(source_start_offset >= 0.0) || !source_start_offset.is_finite() {
            return Err(AutomixError::InvalidConfig(format!(
                "source start offset must be >= 0 (got {source_start_offset})"
            )));
        }

        let required = source_start_offset + timeline.segment_duration();
        for (index, track) in tracks.iter().enumerate() {
            let available = track.as_ref().duration();
            if available + DURATION_EPSILON < required {
                return Err(AutomixError::TrackTooShort {
                    index,
                    available,
                    required,
                });
            }
        }

        let sr = self.sample_rate as f64;
        let out_frames = (sr * timeline.total_duration()).ceil() as usize;
        let mut output = vec![0.0_f32; out_frames * OUTPUT_CHANNELS as usize];

        log::info!(
            "Rendering {} tracks: {:.3}s total, {:.3}s segments, {:.3}s crossfade @ {} Hz",
            tracks.len(),
            timeline.total_duration(),
            timeline.segment_duration(),
            timeline.crossfade(),
            self.sample_rate
        );

        for (track, entry) in tracks.iter().zip(timeline.entries()) {
            self.accumulate(
                &mut output,
                track.as_ref(),
                entry,
                timeline.segment_duration(),
                source_start_offset,
            );
        }

        log::debug!("Render complete: {} frames", out_frames);

        Ok(RenderedMix {
            buffer: PcmBuffer::from_interleaved(OUTPUT_CHANNELS, self.sample_rate, output),
        })
    }

    /// Render on the blocking thread pool so async callers stay responsive.
    pub async fn render_async(
        &self,
        tracks: Vec<Arc<PcmBuffer>>,
        timeline: Timeline,
        source_start_offset: f64,
    ) -> Result<RenderedMix> {
        let renderer = *self;
        tokio::task::spawn_blocking(move || {
            renderer.render(&tracks, &timeline, source_start_offset)
        })
        .await
        .map_err(|e| AutomixError::Output(format!("render task failed: {e}")))?
    }

    /// Add one track's gained segment into `dest` (interleaved stereo).
    fn accumulate(
        &self,
        dest: &mut [f32],
        src: &PcmBuffer,
        entry: &TimelineEntry,
        segment_duration: f64,
        source_start_offset: f64,
    ) {
        let sr = self.sample_rate as f64;
        let out_frames = dest.len() / OUTPUT_CHANNELS as usize;
        let start_frame = (entry.segment_start * sr).round() as usize;
        let segment_frames = (segment_duration * sr).round() as usize;
        let same_rate = src.sample_rate() == self.sample_rate;
        let offset_frames = (source_start_offset * sr).round() as usize;

        for k in 0..segment_frames {
            let out = start_frame + k;
            if out >= out_frames {
                break;
            }
            let local = k as f64 / sr;
            let gain = entry.gain_at(entry.segment_start + local);
            if gain == 0.0 {
                continue;
            }

            let (l, r) = if same_rate {
                src.stereo_frame(offset_frames + k)
            } else {
                read_interpolated(src, (source_start_offset + local) * src.sample_rate() as f64)
            };

            dest[out * 2] += l * gain;
            dest[out * 2 + 1] += r * gain;
        }
    }
}

/// Linear interpolation between the two source frames around `pos`.
#[inline]
fn read_interpolated(src: &PcmBuffer, pos: f64) -> (f32, f32) {
    let i = pos.floor() as usize;
    let frac = (pos - i as f64) as f32;
    let (l0, r0) = src.stereo_frame(i);
    if frac == 0.0 {
        return (l0, r0);
    }
    let (l1, r1) = src.stereo_frame(i + 1);
    (l0 + (l1 - l0) * frac, r0 + (r1 - r0) * frac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::timeline::{schedule, schedule_with, FadeConvention};

    const SR: u32 = 1000;

    fn constant(value: f32, seconds: f64) -> PcmBuffer {
        let frames = (seconds * SR as f64) as usize;
        PcmBuffer::from_interleaved(2, SR, vec![value; frames * 2])
    }

    fn left_at(mix: &RenderedMix, t: f64) -> f32 {
        let frame = (t * mix.sample_rate() as f64).round() as usize;
        mix.samples()[frame * 2]
    }

    #[test]
    fn empty_track_list_is_rejected() {
        let tl = schedule(0, 1.0, 0.0).unwrap();
        let tracks: Vec<PcmBuffer> = Vec::new();
        let err = MixRenderer::new(SR).render(&tracks, &tl, 0.0).unwrap_err();
        assert!(matches!(err, AutomixError::EmptyInput));
    }

    #[test]
    fn short_track_is_rejected_with_its_index() {
        let tl = schedule(2, 2.0, 0.5).unwrap();
        let tracks = vec![constant(0.5, 3.0), constant(0.5, 2.5)];
        let err = MixRenderer::new(SR).render(&tracks, &tl, 1.0).unwrap_err();
        match err {
            AutomixError::TrackTooShort { index, required, .. } => {
                assert_eq!(index, 1);
                assert!((required - 3.0).abs() < 1e-9);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn output_length_is_ceil_of_total_duration() {
        let tl = schedule(3, 1.0005, 0.25).unwrap();
        let tracks = vec![constant(0.1, 2.0), constant(0.1, 2.0), constant(0.1, 2.0)];
        let mix = MixRenderer::new(SR).render(&tracks, &tl, 0.0).unwrap();
        let expected = (SR as f64 * tl.total_duration()).ceil() as usize;
        assert_eq!(mix.frames(), expected);
        assert_eq!(mix.channels(), 2);
    }

    #[test]
    fn single_track_passes_through_at_unity_gain() {
        let tl = schedule(1, 1.0, 0.5).unwrap();
        let mix = MixRenderer::new(SR)
            .render(&[constant(0.25, 1.0)], &tl, 0.0)
            .unwrap();
        assert!(mix.samples().iter().all(|&s| (s - 0.25).abs() < 1e-7));
    }

    #[test]
    fn anchored_crossfade_sums_to_unity_for_equal_signals() {
        let tl = schedule_with(2, 2.0, 1.0, FadeConvention::Anchored).unwrap();
        let tracks = vec![constant(0.5, 2.0), constant(0.5, 2.0)];
        let mix = MixRenderer::new(SR).render(&tracks, &tl, 0.0).unwrap();

        assert!((left_at(&mix, 0.5) - 0.5).abs() < 1e-6);
        // Linear ramps are complementary across the overlap [1, 2].
        for t in [1.1, 1.25, 1.5, 1.9] {
            assert!((left_at(&mix, t) - 0.5).abs() < 1e-4, "t={t}: {}", left_at(&mix, t));
        }
        assert!((left_at(&mix, 2.5) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn overlap_shows_both_tracks_ramping() {
        let tl = schedule_with(2, 2.0, 1.0, FadeConvention::Anchored).unwrap();
        let tracks = vec![constant(1.0, 2.0), constant(0.0, 2.0)];
        let mix = MixRenderer::new(SR).render(&tracks, &tl, 0.0).unwrap();
        // Outgoing track alone: gain falls from 1 at t=1 to 0 at t=2.
        assert!((left_at(&mix, 1.25) - 0.75).abs() < 1e-3);
        assert!((left_at(&mix, 1.75) - 0.25).abs() < 1e-3);
    }

    #[test]
    fn centered_fades_straddle_the_segment_boundaries() {
        // Segments [0, 2] and [1, 3]; windows [0.5, 1.5] and [1.5, 2.5].
        let tl = schedule_with(2, 2.0, 1.0, FadeConvention::Centered).unwrap();
        let r = MixRenderer::new(SR);

        // Incoming track alone: it enters at half gain, not silence.
        let incoming = r
            .render(&[constant(0.0, 2.0), constant(1.0, 2.0)], &tl, 0.0)
            .unwrap();
        assert_eq!(left_at(&incoming, 0.9), 0.0);
        assert!((left_at(&incoming, 1.0) - 0.5).abs() < 1e-6);
        assert!((left_at(&incoming, 1.25) - 0.75).abs() < 1e-3);
        assert!((left_at(&incoming, 2.5) - 1.0).abs() < 1e-6);

        // Outgoing track alone: still at half gain when its segment cuts off.
        let outgoing = r
            .render(&[constant(1.0, 2.0), constant(0.0, 2.0)], &tl, 0.0)
            .unwrap();
        assert!((left_at(&outgoing, 1.5) - 1.0).abs() < 1e-6);
        assert!((left_at(&outgoing, 1.999) - 0.5).abs() < 2e-3);
        assert_eq!(left_at(&outgoing, 2.0), 0.0);
    }

    #[test]
    fn source_offset_selects_the_trimmed_region() {
        // Ramp signal: sample value encodes its own source time.
        let frames = 3 * SR as usize;
        let ramp: Vec<f32> = (0..frames).map(|i| i as f32 / SR as f32).collect();
        let pcm = PcmBuffer::from_interleaved(1, SR, ramp);
        let tl = schedule(1, 1.0, 0.0).unwrap();
        let mix = MixRenderer::new(SR).render(&[pcm], &tl, 1.5).unwrap();
        assert!((left_at(&mix, 0.0) - 1.5).abs() < 1e-3);
        assert!((left_at(&mix, 0.5) - 2.0).abs() < 1e-3);
    }

    #[test]
    fn different_source_rate_is_interpolated() {
        let pcm = PcmBuffer::from_interleaved(1, SR / 2, vec![0.3; SR as usize]);
        let tl = schedule(1, 1.5, 0.0).unwrap();
        let mix = MixRenderer::new(SR).render(&[pcm], &tl, 0.0).unwrap();
        assert!((left_at(&mix, 1.0) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn render_is_deterministic() {
        let tl = schedule(3, 1.0, 0.3).unwrap();
        let tracks: Vec<PcmBuffer> = (0..3)
            .map(|n| {
                let samples = (0..4000)
                    .map(|i| ((i as f32 * 0.01 * (n + 1) as f32).sin()) * 0.7)
                    .collect();
                PcmBuffer::from_interleaved(2, SR, samples)
            })
            .collect();
        let r = MixRenderer::new(SR);
        let a = r.render(&tracks, &tl, 0.2).unwrap();
        let b = r.render(&tracks, &tl, 0.2).unwrap();
        let bits_a: Vec<u32> = a.samples().iter().map(|s| s.to_bits()).collect();
        let bits_b: Vec<u32> = b.samples().iter().map(|s| s.to_bits()).collect();
        assert_eq!(bits_a, bits_b);
    }

    #[test]
    fn mismatched_timeline_is_rejected() {
        let tl = schedule(3, 1.0, 0.0).unwrap();
        let err = MixRenderer::new(SR)
            .render(&[constant(0.1, 1.0)], &tl, 0.0)
            .unwrap_err();
        assert!(matches!(err, AutomixError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn render_async_matches_sync_render() {
        let tl = schedule(2, 1.0, 0.5).unwrap();
        let tracks = vec![Arc::new(constant(0.2, 1.0)), Arc::new(constant(0.4, 1.0))];
        let r = MixRenderer::new(SR);
        let sync = r.render(&tracks, &tl, 0.0).unwrap();
        let asynchronous = r.render_async(tracks, tl, 0.0).await.unwrap();
        assert_eq!(sync, asynchronous);
    }
}
