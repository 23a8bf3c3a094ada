pub mod audio;
pub mod automix;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod stream;

pub use audio::{
    analyzer::tempo,
    decoder::{load_track, Decoder, SymphoniaDecoder},
    output::{ManualClock, ManualOutput, OutputBackend},
    pcm::{LoadState, PcmBuffer, Track},
    player::{Player, PlayerEvent, PlayerState, RepeatMode, SharedPlayer, Transport},
    renderer::{MixRenderer, RenderedMix},
};
#[cfg(feature = "device-output")]
pub use audio::output::CpalOutput;
pub use automix::Automix;
pub use config::{EngineSettings, MixConfig};
pub use error::{AutomixError, DecodeError, Result};
pub use scheduler::timeline::{
    schedule, schedule_with, timeline_info, FadeConvention, FadeWindow, Timeline, TimelineEntry,
    TimelineInfo,
};
pub use stream::encoder::{
    quantize, Codec, EncodeFallback, EncodedMix, EncoderError, LossyEncoder,
    LossyEncoderFactory, SampleEncoder,
};
