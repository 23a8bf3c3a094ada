use serde::{Deserialize, Serialize};

use crate::{
    config::MixConfig,
    error::{AutomixError, Result},
};

// ── FadeConvention ───────────────────────────────────────────────────────────

/// Where fade windows sit relative to the crossfade boundary.
///
/// Both conventions have shipped; the choice is part of the engine settings
/// and the same `Timeline` drives render and playback, so the two never
/// disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FadeConvention {
    /// Windows lie exactly on the overlap: fade-in `[start, start + xf]`,
    /// fade-out `[end − xf, end]`.
    #[default]
    Anchored,
    /// Windows are centred on the segment boundary, `xf / 2` each side.
    Centered,
}

// ── FadeWindow ───────────────────────────────────────────────────────────────

/// Absolute time span (seconds from mix origin) of one linear gain ramp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FadeWindow {
    pub start: f64,
    pub end: f64,
}

impl FadeWindow {
    pub fn width(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t <= self.end
    }

    /// Ramp progress at `t`, 0.0 at `start` and 1.0 at `end`.
    fn progress(&self, t: f64) -> f64 {
        let width = self.width();
        if width <= 0.0 {
            return if t < self.start { 0.0 } else { 1.0 };
        }
        ((t - self.start) / width).clamp(0.0, 1.0)
    }
}

// ── TimelineEntry ────────────────────────────────────────────────────────────

/// Placement of one track in the mix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub index: usize,
    pub segment_start: f64,
    pub segment_end: f64,
    /// `None` for the first entry.
    pub fade_in: Option<FadeWindow>,
    /// `None` for the last entry.
    pub fade_out: Option<FadeWindow>,
}

impl TimelineEntry {
    /// Linear gain of this entry at absolute mix time `t`, in `[0, 1]`.
    ///
    /// 1.0 outside any fade window; ramps 0 → 1 across the fade-in window and
    /// 1 → 0 across the fade-out window. Where both windows overlap the
    /// lower of the two ramps wins.
    pub fn gain_at(&self, t: f64) -> f32 {
        let mut gain = 1.0_f64;
        if let Some(w) = &self.fade_in {
            gain = gain.min(w.progress(t));
        }
        if let Some(w) = &self.fade_out {
            let remaining = if w.width() <= 0.0 {
                if t < w.end { 1.0 } else { 0.0 }
            } else {
                1.0 - w.progress(t)
            };
            gain = gain.min(remaining);
        }
        gain as f32
    }

    pub fn duration(&self) -> f64 {
        self.segment_end - self.segment_start
    }
}

// ── Timeline ─────────────────────────────────────────────────────────────────

/// Ordered placement + fade schedule for a whole mix. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
    segment_duration: f64,
    crossfade: f64,
    convention: FadeConvention,
    total_duration: f64,
}

/// Schedule `track_count` segments with the default fade convention.
pub fn schedule(track_count: usize, segment_duration: f64, crossfade: f64) -> Result<Timeline> {
    schedule_with(track_count, segment_duration, crossfade, FadeConvention::default())
}

/// Schedule `track_count` segments of `segment_duration` seconds, each
/// overlapping the next by `crossfade` seconds.
pub fn schedule_with(
    track_count: usize,
    segment_duration: f64,
    crossfade: f64,
    convention: FadeConvention,
) -> Result<Timeline> {
    if !(segment_duration > 0.0) || !segment_duration.is_finite() {
        return Err(AutomixError::InvalidConfig(format!(
            "segment duration must be > 0 (got {segment_duration})"
        )));
    }
    if !(crossfade >= 0.0) {
        return Err(AutomixError::InvalidConfig(format!(
            "crossfade must be >= 0 (got {crossfade})"
        )));
    }
    if crossfade > segment_duration {
        return Err(AutomixError::InvalidConfig(format!(
            "crossfade ({crossfade}) cannot exceed the segment duration ({segment_duration})"
        )));
    }

    // The next segment starts where this one ends minus the overlap; written
    // in closed form so no error accumulates over long playlists.
    let stride = segment_duration - crossfade;
    let half = crossfade / 2.0;

    let entries: Vec<TimelineEntry> = (0..track_count)
        .map(|index| {
            let segment_start = index as f64 * stride;
            let segment_end = segment_start + segment_duration;

            let fade_in = (index > 0).then(|| match convention {
                FadeConvention::Anchored => FadeWindow {
                    start: segment_start,
                    end: segment_start + crossfade,
                },
                FadeConvention::Centered => FadeWindow {
                    start: segment_start - half,
                    end: segment_start + half,
                },
            });
            let fade_out = (index + 1 < track_count).then(|| match convention {
                FadeConvention::Anchored => FadeWindow {
                    start: segment_end - crossfade,
                    end: segment_end,
                },
                FadeConvention::Centered => FadeWindow {
                    start: segment_end - half,
                    end: segment_end + half,
                },
            });

            TimelineEntry {
                index,
                segment_start,
                segment_end,
                fade_in,
                fade_out,
            }
        })
        .collect();

    let total_duration = entries.last().map(|e| e.segment_end).unwrap_or(0.0);

    Ok(Timeline {
        entries,
        segment_duration,
        crossfade,
        convention,
        total_duration,
    })
}

impl Timeline {
    /// Validate `config` and schedule `track_count` tracks from it.
    pub fn from_config(
        track_count: usize,
        config: &MixConfig,
        convention: FadeConvention,
    ) -> Result<Self> {
        config.check()?;
        schedule_with(
            track_count,
            config.segment_duration(),
            config.crossfade_duration,
            convention,
        )
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn segment_duration(&self) -> f64 {
        self.segment_duration
    }

    pub fn crossfade(&self) -> f64 {
        self.crossfade
    }

    pub fn convention(&self) -> FadeConvention {
        self.convention
    }

    /// `segment_duration·N − crossfade·(N−1)`, 0 for an empty timeline.
    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    /// Gain of entry `index` at absolute time `t`; 0.0 for unknown entries.
    pub fn gain_at(&self, index: usize, t: f64) -> f32 {
        self.entries.get(index).map(|e| e.gain_at(t)).unwrap_or(0.0)
    }

    /// Index of the track the listener is on at `position`: the most
    /// recently started entry whose segment covers it.
    pub fn entry_at(&self, position: f64) -> Option<usize> {
        if position < 0.0 || position >= self.total_duration {
            return None;
        }
        self.entries
            .iter()
            .rev()
            .find(|e| e.segment_start <= position && position < e.segment_end)
            .map(|e| e.index)
    }

    /// Mix time at which entry `index` starts.
    pub fn track_start(&self, index: usize) -> Option<f64> {
        self.entries.get(index).map(|e| e.segment_start)
    }
}

// ── TimelineInfo ─────────────────────────────────────────────────────────────

/// Summary numbers for a mix, computed without building entries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimelineInfo {
    pub total_duration: f64,
    pub track_duration: f64,
    pub track_count: usize,
    pub crossfade_duration: f64,
}

pub fn timeline_info(track_count: usize, config: &MixConfig) -> TimelineInfo {
    let track_duration = config.segment_duration();
    let total_duration = if track_count == 0 {
        0.0
    } else {
        track_duration * track_count as f64
            - config.crossfade_duration * (track_count - 1) as f64
    };
    TimelineInfo {
        total_duration: total_duration.max(0.0),
        track_duration,
        track_count,
        crossfade_duration: config.crossfade_duration,
    }
}
