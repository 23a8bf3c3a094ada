//! Onset-density tempo estimate.
//!
//! This is a heuristic, not a beat tracker: a moving-average energy
//! envelope, a dynamic-threshold peak picker and a histogram of
//! peak-to-peak intervals. Tracks with weak low-frequency rhythm (a cappella,
//! ambient) are often misread. The result is advisory only, so the estimator
//! never fails and falls back to [`DEFAULT_BPM`].

use crate::audio::pcm::PcmBuffer;

pub const DEFAULT_BPM: f64 = 120.0;
pub const MIN_BPM: f64 = 60.0;
pub const MAX_BPM: f64 = 200.0;

/// Cutoff of the moving-average "low-pass" on the energy envelope (Hz).
const ENVELOPE_CUTOFF_HZ: f64 = 200.0;
/// Border excluded from peak picking and half-width of the threshold window.
const PEAK_WINDOW: usize = 2048;
const THRESHOLD_FACTOR: f64 = 1.5;
/// Minimum spacing between accepted peaks (100 ms).
const MIN_PEAK_SPACING_SECS: f64 = 0.1;
/// BPM values closer than this share a histogram bin.
const BIN_TOLERANCE: f64 = 5.0;

#[derive(Debug, Clone, PartialEq)]
pub struct TempoAnalysis {
    /// Clamped to `[MIN_BPM, MAX_BPM]`.
    pub bpm: f64,
    /// Number of accepted peaks.
    pub peaks: usize,
    /// Share of intervals that fell into the winning bin (0 when none).
    pub confidence: f32,
}

/// Tempo estimate in BPM, always within `[60, 200]`.
pub fn estimate(pcm: &PcmBuffer) -> f64 {
    analyze(pcm).bpm
}

pub fn analyze(pcm: &PcmBuffer) -> TempoAnalysis {
    let sample_rate = pcm.sample_rate();
    if sample_rate == 0 || pcm.frames() < 2 * PEAK_WINDOW + 1 {
        return TempoAnalysis {
            bpm: DEFAULT_BPM,
            peaks: 0,
            confidence: 0.0,
        };
    }

    let mono: Vec<f32> = (0..pcm.frames()).map(|i| pcm.mono_sample(i)).collect();
    let radius = ((sample_rate as f64 / ENVELOPE_CUTOFF_HZ).round() as usize).max(1);
    let envelope = build_envelope(&mono, radius);

    let min_spacing = ((sample_rate as f64 * MIN_PEAK_SPACING_SECS).round() as usize).max(1);
    let peaks = detect_peaks(&envelope, min_spacing);

    let bpms: Vec<f64> = peaks
        .windows(2)
        .map(|w| sample_rate as f64 / (w[1] - w[0]) as f64 * 60.0)
        .collect();
    let (dominant, members) = dominant_bpm(&bpms);

    let confidence = if bpms.is_empty() {
        0.0
    } else {
        members as f32 / bpms.len() as f32
    };
    let bpm = dominant.round().clamp(MIN_BPM, MAX_BPM);

    log::debug!(
        "Tempo estimate: {bpm} BPM from {} peaks (confidence {confidence:.2})",
        peaks.len()
    );

    TempoAnalysis {
        bpm,
        peaks: peaks.len(),
        confidence,
    }
}

/// Centered moving average of `|x|` with the given radius, truncated at the
/// edges. Uses running sums so cost is linear in the input length.
fn build_envelope(samples: &[f32], radius: usize) -> Vec<f64> {
    let prefix = prefix_sums(samples.iter().map(|s| s.abs() as f64));
    let n = samples.len();
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius).min(n - 1);
            (prefix[hi + 1] - prefix[lo]) / (hi - lo + 1) as f64
        })
        .collect()
}

/// Indices that beat `1.5 ×` the local mean over `±PEAK_WINDOW`, are strict
/// local maxima, and sit at least `min_spacing` after the previous peak.
fn detect_peaks(env: &[f64], min_spacing: usize) -> Vec<usize> {
    let n = env.len();
    let mut peaks: Vec<usize> = Vec::new();
    if n <= 2 * PEAK_WINDOW {
        return peaks;
    }
    let prefix = prefix_sums(env.iter().copied());
    let span = (2 * PEAK_WINDOW + 1) as f64;

    for i in PEAK_WINDOW..n - PEAK_WINDOW {
        let local_sum = prefix[i + PEAK_WINDOW + 1] - prefix[i - PEAK_WINDOW];
        let threshold = local_sum / span * THRESHOLD_FACTOR;

        if env[i] > threshold && env[i] > env[i - 1] && env[i] > env[i + 1] {
            match peaks.last() {
                Some(&last) if i - last < min_spacing => {}
                _ => peaks.push(i),
            }
        }
    }
    peaks
}

/// Histogram of BPM values with `±BIN_TOLERANCE` bins, first match wins.
/// Returns the winning bin's key and member count, or the default tempo.
fn dominant_bpm(bpms: &[f64]) -> (f64, usize) {
    let mut bins: Vec<(f64, usize)> = Vec::new();
    for &bpm in bpms {
        match bins.iter_mut().find(|(key, _)| (bpm - *key).abs() < BIN_TOLERANCE) {
            Some((_, count)) => *count += 1,
            None => bins.push((bpm.round(), 1)),
        }
    }

    let mut best = (DEFAULT_BPM, 0);
    for &(key, count) in &bins {
        if count > best.1 {
            best = (key, count);
        }
    }
    best
}

fn prefix_sums(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.size_hint().0 + 1);
    let mut acc = 0.0_f64;
    out.push(acc);
    for v in values {
        acc += v;
        out.push(acc);
    }
    out
}
