use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};

use automix_lib::{
    load_track, tempo, timeline_info, Automix, Codec, EngineSettings, FadeConvention, Result,
    SymphoniaDecoder, Track,
};

/// Crossfaded continuous mixes from a list of audio files
#[derive(Parser, Debug)]
#[command(name = "automix", version, about)]
struct Cli {
    /// Engine settings JSON (missing file means defaults)
    #[arg(long, global = true, value_name = "FILE")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the schedule for N tracks
    Timeline {
        #[arg(long)]
        tracks: usize,
        #[command(flatten)]
        mix: MixArgs,
    },
    /// Print a tempo estimate per file
    Bpm {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Render the files into one mix and write it to STEM.<ext>
    Render {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Output path without extension; the extension follows the codec produced
        #[arg(short, long, value_name = "STEM")]
        output: PathBuf,
        #[arg(long)]
        codec: Option<Codec>,
        #[command(flatten)]
        mix: MixArgs,
    },
    /// Render the files and play the mix on the default output device
    #[cfg(feature = "device-output")]
    Play {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[command(flatten)]
        mix: MixArgs,
    },
}

#[derive(Args, Debug, Default)]
struct MixArgs {
    /// Seconds skipped at the start of every track
    #[arg(long)]
    start_trim: Option<f64>,
    /// Seconds into every track where its segment ends
    #[arg(long)]
    end_point: Option<f64>,
    /// Overlap between neighbouring tracks (seconds)
    #[arg(long)]
    crossfade: Option<f64>,
    #[arg(long, value_enum)]
    convention: Option<ConventionArg>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ConventionArg {
    Anchored,
    Centered,
}

impl MixArgs {
    /// Overlay the flags on the settings' mix block.
    fn apply(&self, settings: &mut EngineSettings) {
        let mix = &mut settings.mix;
        if let Some(v) = self.start_trim {
            mix.start_trim = v;
        }
        if let Some(v) = self.end_point {
            mix.end_point = v;
        }
        if let Some(v) = self.crossfade {
            mix.crossfade_duration = v;
        }
        if let Some(c) = self.convention {
            settings.fade_convention = match c {
                ConventionArg::Anchored => FadeConvention::Anchored,
                ConventionArg::Centered => FadeConvention::Centered,
            };
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        log::error!("{e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = match &cli.settings {
        Some(path) => EngineSettings::load(path)?,
        None => EngineSettings::default(),
    };

    match cli.command {
        Command::Timeline { tracks, mix } => {
            mix.apply(&mut settings);
            print_timeline(&Automix::new(settings), tracks)
        }
        Command::Bpm { files } => {
            let decoder = SymphoniaDecoder::new();
            for (i, path) in files.iter().enumerate() {
                match load_file(&decoder, i, path) {
                    Ok(track) => println!(
                        "{}\t{}",
                        track.tempo.unwrap_or(tempo::DEFAULT_BPM),
                        path.display()
                    ),
                    Err(e) => println!("-\t{}\t({e})", path.display()),
                }
            }
            Ok(())
        }
        Command::Render {
            files,
            output,
            codec,
            mix,
        } => {
            mix.apply(&mut settings);
            if let Some(codec) = codec {
                settings.preferred_codec = codec;
            }
            let engine = Automix::new(settings);
            let tracks = load_files(&files)?;
            let config = engine.settings().mix;
            let rendered = engine.render_async(&tracks, &config).await?;
            let encoded = engine.export_async(std::sync::Arc::new(rendered)).await?;

            if let Some(fallback) = &encoded.fallback {
                log::warn!(
                    "Wrote {} instead of {}: {}",
                    encoded.codec,
                    fallback.preferred,
                    fallback.reason
                );
            }
            let path = output.with_extension(encoded.codec.extension());
            tokio::fs::write(&path, &encoded.bytes).await?;
            println!("{} ({}, {} bytes)", path.display(), encoded.codec.mime_type(), encoded.bytes.len());
            Ok(())
        }
        #[cfg(feature = "device-output")]
        Command::Play { files, mix } => {
            mix.apply(&mut settings);
            play(Automix::new(settings), &files).await
        }
    }
}

fn print_timeline(engine: &Automix, tracks: usize) -> Result<()> {
    let timeline = engine.timeline(tracks)?;
    let info = timeline_info(tracks, &engine.settings().mix);

    println!(
        "{} tracks, {:.3}s each, {:.3}s crossfade ({:?}), total {:.3}s",
        info.track_count,
        info.track_duration,
        info.crossfade_duration,
        timeline.convention(),
        timeline.total_duration()
    );
    for entry in timeline.entries() {
        let window = |w: Option<automix_lib::FadeWindow>| match w {
            Some(w) => format!("{:.3}-{:.3}", w.start, w.end),
            None => "-".to_string(),
        };
        println!(
            "#{:<3} {:>9.3} {:>9.3}  in {:<17} out {}",
            entry.index,
            entry.segment_start,
            entry.segment_end,
            window(entry.fade_in),
            window(entry.fade_out)
        );
    }
    Ok(())
}

fn load_file(decoder: &SymphoniaDecoder, index: usize, path: &Path) -> Result<Track> {
    let bytes = std::fs::read(path)?;
    let file_name = path.to_string_lossy();
    let mut track = Track::pending(index.to_string(), Track::name_from_file(&file_name));
    let hint = path.extension().and_then(|e| e.to_str());
    load_track(decoder, &mut track, &bytes, hint)?;
    Ok(track)
}

fn load_files(files: &[PathBuf]) -> Result<Vec<Track>> {
    let decoder = SymphoniaDecoder::new();
    files
        .iter()
        .enumerate()
        .map(|(i, path)| load_file(&decoder, i, path))
        .collect()
}

#[cfg(feature = "device-output")]
async fn play(engine: Automix, files: &[PathBuf]) -> Result<()> {
    use std::{sync::Arc, time::Duration};

    use automix_lib::{CpalOutput, MixConfig, PlayerEvent};

    let tracks = load_files(files)?;
    let config: MixConfig = engine.settings().mix;
    let rendered = Arc::new(engine.render_async(&tracks, &config).await?);

    let mut player = engine.player(CpalOutput::new()?);
    player.play(Arc::clone(&rendered), 0.0)?;
    log::info!("Playing {:.1}s mix", rendered.duration());

    loop {
        tokio::time::sleep(Duration::from_millis(100)).await;
        match player.poll()? {
            Some(PlayerEvent::Ended) => break,
            Some(PlayerEvent::Restarted) => log::info!("Mix restarted"),
            None => {}
        }
    }
    Ok(())
}
