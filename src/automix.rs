//! Host-facing entry point tying scheduling, rendering, export and playback
//! to one set of [`EngineSettings`].

use std::sync::Arc;

use crate::{
    audio::{
        output::OutputBackend,
        pcm::{PcmBuffer, Track},
        player::Player,
        renderer::{MixRenderer, RenderedMix},
    },
    config::{EngineSettings, MixConfig},
    error::{AutomixError, Result},
    scheduler::timeline::Timeline,
    stream::encoder::{EncodedMix, SampleEncoder},
};

pub struct Automix {
    settings: EngineSettings,
    encoder: Arc<SampleEncoder>,
}

impl Automix {
    /// Engine with the WAV-only encoder.
    pub fn new(settings: EngineSettings) -> Self {
        Self::with_encoder(settings, SampleEncoder::wav_only())
    }

    pub fn with_encoder(settings: EngineSettings, encoder: SampleEncoder) -> Self {
        let encoder = encoder.with_bitrate(settings.bitrate_kbps);
        Self {
            settings,
            encoder: Arc::new(encoder),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn renderer(&self) -> MixRenderer {
        MixRenderer::new(self.settings.sample_rate)
    }

    /// Schedule `track_count` tracks with the settings' own mix block.
    pub fn timeline(&self, track_count: usize) -> Result<Timeline> {
        self.timeline_for(track_count, &self.settings.mix)
    }

    pub fn timeline_for(&self, track_count: usize, config: &MixConfig) -> Result<Timeline> {
        Timeline::from_config(track_count, config, self.settings.fade_convention)
    }

    /// Render every track's `[start_trim, end_point)` segment into one mix.
    pub fn render(&self, tracks: &[Track], config: &MixConfig) -> Result<RenderedMix> {
        config.check()?;
        let pcm = collect_pcm(tracks)?;
        let timeline = self.timeline_for(pcm.len(), config)?;
        self.renderer().render(&pcm, &timeline, config.start_trim)
    }

    pub async fn render_async(&self, tracks: &[Track], config: &MixConfig) -> Result<RenderedMix> {
        config.check()?;
        let pcm = collect_pcm(tracks)?;
        let timeline = self.timeline_for(pcm.len(), config)?;
        self.renderer()
            .render_async(pcm, timeline, config.start_trim)
            .await
    }

    /// Encode with the preferred codec from the settings.
    pub fn export(&self, mix: &RenderedMix) -> EncodedMix {
        self.encoder.encode(mix, self.settings.preferred_codec)
    }

    pub async fn export_async(&self, mix: Arc<RenderedMix>) -> Result<EncodedMix> {
        Arc::clone(&self.encoder)
            .encode_async(mix, self.settings.preferred_codec)
            .await
    }

    /// A player over `backend` with the configured volume and repeat mode.
    pub fn player<B: OutputBackend>(&self, backend: B) -> Player<B> {
        let mut player = Player::new(backend);
        player.set_volume(self.settings.volume);
        player.set_repeat_mode(self.settings.repeat_mode);
        player
    }
}

/// Decoded PCM of every track, in order. Fails on the first track that is
/// not Ready.
fn collect_pcm(tracks: &[Track]) -> Result<Vec<Arc<PcmBuffer>>> {
    if tracks.is_empty() {
        return Err(AutomixError::EmptyInput);
    }
    tracks
        .iter()
        .enumerate()
        .map(|(index, track)| match (&track.pcm, track.is_ready()) {
            (Some(pcm), true) => Ok(Arc::clone(pcm)),
            _ => Err(AutomixError::TrackNotReady { index }),
        })
        .collect()
}
