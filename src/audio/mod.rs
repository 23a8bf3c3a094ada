pub mod analyzer;
pub mod decoder;
pub mod output;
pub mod pcm;
pub mod player;
pub mod renderer;
