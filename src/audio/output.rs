use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::error::Result;

use super::renderer::RenderedMix;

/// The audio context a [`Player`](super::player::Player) drives.
///
/// A backend owns a monotonic clock, at most one active source and one
/// persistent volume node. `start` replaces the active source wholesale;
/// `stop` on an idle backend is a no-op.
pub trait OutputBackend: Send {
    /// Seconds on the backend's clock.
    fn now(&self) -> f64;
    /// Begin playing `buffer` from `offset` seconds, replacing any active source.
    fn start(&mut self, buffer: Arc<RenderedMix>, offset: f64) -> Result<()>;
    fn stop(&mut self);
    fn set_volume(&mut self, volume: f32);
}

// ── Manual backend ───────────────────────────────────────────────────────────

/// Shared handle to a caller-driven clock (seconds stored as f64 bits).
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, seconds: f64) {
        self.0.store(seconds.to_bits(), Ordering::Release);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

#[derive(Debug, Clone)]
pub struct ActiveSource {
    pub buffer: Arc<RenderedMix>,
    pub offset: f64,
    /// Clock reading when the source was started.
    pub started_at: f64,
}

/// Headless backend: no device, time moves only when the host advances the
/// clock. Used for tests and offline hosts that drive their own output.
#[derive(Debug)]
pub struct ManualOutput {
    clock: ManualClock,
    active: Option<ActiveSource>,
    volume: f32,
    starts: usize,
}

impl ManualOutput {
    pub fn new() -> Self {
        Self::with_clock(ManualClock::new())
    }

    pub fn with_clock(clock: ManualClock) -> Self {
        Self {
            clock,
            active: None,
            volume: 1.0,
            starts: 0,
        }
    }

    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }

    pub fn active(&self) -> Option<&ActiveSource> {
        self.active.as_ref()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// How many sources have been started over the backend's lifetime.
    pub fn starts(&self) -> usize {
        self.starts
    }
}

impl Default for ManualOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBackend for ManualOutput {
    fn now(&self) -> f64 {
        self.clock.now()
    }

    fn start(&mut self, buffer: Arc<RenderedMix>, offset: f64) -> Result<()> {
        self.active = Some(ActiveSource {
            buffer,
            offset,
            started_at: self.clock.now(),
        });
        self.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.active = None;
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }
}

// ── Device backend ───────────────────────────────────────────────────────────

#[cfg(feature = "device-output")]
pub use device::CpalOutput;

#[cfg(feature = "device-output")]
mod device {
    use std::{
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    };

    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        Device, Stream, StreamConfig,
    };
    use ringbuf::{
        traits::{Consumer as _, Producer as _, Split},
        HeapRb,
    };

    use super::OutputBackend;
    use crate::{
        audio::renderer::RenderedMix,
        error::{AutomixError, Result},
    };

    /// Main thread → real-time thread commands.
    enum OutputCmd {
        Start {
            buffer: Arc<RenderedMix>,
            offset: f64,
            seq: u64,
        },
        Stop,
        SetVolume(f32),
    }

    /// The one source the callback is reading.
    struct Source {
        buffer: Arc<RenderedMix>,
        /// Fractional frame position in `buffer`.
        cursor: f64,
        /// Buffer frames per device frame.
        step: f64,
    }

    struct RtState {
        source: Option<Source>,
        volume: f32,
        device_rate: u32,
        device_channels: usize,
        /// `Start` commands numbered below this were cancelled by a direct stop.
        discard_before: u64,
    }

    impl RtState {
        fn new(device_rate: u32, device_channels: usize) -> Self {
            Self {
                source: None,
                volume: 1.0,
                device_rate,
                device_channels,
                discard_before: 0,
            }
        }
    }

    /// Default output device behind a persistent cpal stream.
    ///
    /// The stream runs for the backend's lifetime and plays silence while no
    /// source is active, so volume is a property of the stream rather than of
    /// any single play.
    pub struct CpalOutput {
        _stream: Stream,
        cmd_tx: ringbuf::HeapProd<OutputCmd>,
        rt_state: Arc<Mutex<RtState>>,
        epoch: Instant,
        next_seq: u64,
    }

    impl CpalOutput {
        const CMD_RING_SIZE: usize = 64;
        /// Pushes attempted before a stop bypasses the queue.
        const STOP_RETRIES: usize = 5;

        pub fn new() -> Result<Self> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| AutomixError::Output("no default audio output device found".into()))?;

            let config = device
                .default_output_config()
                .map_err(|e| AutomixError::Output(format!("default config error: {e}")))?;

            let device_rate = config.sample_rate().0;
            let device_channels = config.channels() as usize;

            log::info!(
                "Audio device: {} | sample rate: {} | channels: {}",
                device.name().unwrap_or_default(),
                device_rate,
                device_channels
            );

            let cmd_rb = HeapRb::<OutputCmd>::new(Self::CMD_RING_SIZE);
            let (cmd_prod, cmd_cons) = cmd_rb.split();

            let rt_arc = Arc::new(Mutex::new(RtState::new(device_rate, device_channels)));

            let stream = Self::build_stream(&device, &config.into(), Arc::clone(&rt_arc), cmd_cons)?;
            stream
                .play()
                .map_err(|e| AutomixError::Output(format!("stream play error: {e}")))?;

            Ok(Self {
                _stream: stream,
                cmd_tx: cmd_prod,
                rt_state: rt_arc,
                epoch: Instant::now(),
                next_seq: 0,
            })
        }

        fn send_cmd(&mut self, cmd: OutputCmd) -> Result<()> {
            self.cmd_tx
                .try_push(cmd)
                .map_err(|_| AutomixError::Output("command queue full".into()))
        }

        /// Silence the source without going through the command queue, and
        /// cancel every `Start` still waiting in it.
        fn stop_direct(&mut self) {
            let mut rt = match self.rt_state.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            rt.source = None;
            rt.discard_before = self.next_seq;
        }

        fn build_stream(
            device: &Device,
            config: &StreamConfig,
            rt_arc: Arc<Mutex<RtState>>,
            mut cmd_cons: ringbuf::HeapCons<OutputCmd>,
        ) -> Result<Stream> {
            let err_fn = |e| log::error!("CPAL stream error: {e}");

            device
                .build_output_stream(
                    config,
                    move |output: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                        audio_callback(output, &rt_arc, &mut cmd_cons);
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| AutomixError::Output(format!("build stream error: {e}")))
        }
    }

    impl OutputBackend for CpalOutput {
        fn now(&self) -> f64 {
            self.epoch.elapsed().as_secs_f64()
        }

        fn start(&mut self, buffer: Arc<RenderedMix>, offset: f64) -> Result<()> {
            let seq = self.next_seq;
            self.send_cmd(OutputCmd::Start {
                buffer,
                offset,
                seq,
            })?;
            self.next_seq += 1;
            Ok(())
        }

        fn stop(&mut self) {
            for _ in 0..Self::STOP_RETRIES {
                if self.send_cmd(OutputCmd::Stop).is_ok() {
                    return;
                }
                std::thread::sleep(Duration::from_millis(2));
            }
            log::warn!("Command queue full: stopping the source directly");
            self.stop_direct();
        }

        fn set_volume(&mut self, volume: f32) {
            if self.send_cmd(OutputCmd::SetVolume(volume)).is_err() {
                log::warn!("Volume change dropped: command queue full");
            }
        }
    }

    // SAFETY: CpalOutput holds a cpal::Stream which is !Send on some platforms.
    // The player that owns it is only driven from one thread at a time behind
    // a Mutex, and the stream itself is never touched after construction.
    unsafe impl Send for CpalOutput {}

    // Runs on the CPAL real-time thread: no blocking locks, no I/O.
    fn audio_callback(
        output: &mut [f32],
        rt_arc: &Arc<Mutex<RtState>>,
        cmd_cons: &mut ringbuf::HeapCons<OutputCmd>,
    ) {
        // Lock held elsewhere: emit silence rather than block.
        let mut rt = match rt_arc.try_lock() {
            Ok(g) => g,
            Err(_) => {
                output.fill(0.0);
                return;
            }
        };

        while let Some(cmd) = cmd_cons.try_pop() {
            match cmd {
                OutputCmd::Start { seq, .. } if seq < rt.discard_before => {}
                OutputCmd::Start { buffer, offset, .. } => {
                    let step = buffer.sample_rate() as f64 / rt.device_rate as f64;
                    let cursor = offset.max(0.0) * buffer.sample_rate() as f64;
                    rt.source = Some(Source {
                        buffer,
                        cursor,
                        step,
                    });
                }
                OutputCmd::Stop => rt.source = None,
                OutputCmd::SetVolume(v) => rt.volume = v,
            }
        }

        let channels = rt.device_channels.max(1);
        let volume = rt.volume;
        let mut finished = false;

        match rt.source.as_mut() {
            Some(src) => {
                let pcm = src.buffer.pcm();
                let total = pcm.frames();
                for frame in output.chunks_mut(channels) {
                    let idx = src.cursor as usize;
                    if idx >= total {
                        frame.fill(0.0);
                        finished = true;
                        continue;
                    }
                    let (l, r) = pcm.stereo_frame(idx);
                    write_frame(frame, l * volume, r * volume);
                    src.cursor += src.step;
                }
            }
            None => output.fill(0.0),
        }

        if finished {
            rt.source = None;
        }
    }

    fn write_frame(frame: &mut [f32], l: f32, r: f32) {
        match frame.len() {
            1 => frame[0] = 0.5 * (l + r),
            _ => {
                frame[0] = l;
                frame[1] = r;
                frame[2..].fill(0.0);
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use ringbuf::traits::Producer as _;

        use super::*;
        use crate::audio::pcm::PcmBuffer;

        fn queue() -> (ringbuf::HeapProd<OutputCmd>, ringbuf::HeapCons<OutputCmd>) {
            HeapRb::<OutputCmd>::new(8).split()
        }

        fn tone() -> Arc<RenderedMix> {
            Arc::new(RenderedMix::from_pcm(PcmBuffer::from_interleaved(
                2,
                100,
                vec![0.5; 200],
            )))
        }

        #[test]
        fn callback_plays_started_source_at_volume() {
            let rt = Arc::new(Mutex::new(RtState::new(100, 2)));
            let (mut tx, mut rx) = queue();
            assert!(tx.try_push(OutputCmd::SetVolume(0.5)).is_ok());
            assert!(tx
                .try_push(OutputCmd::Start {
                    buffer: tone(),
                    offset: 0.0,
                    seq: 0,
                })
                .is_ok());

            let mut out = [0.0_f32; 8];
            audio_callback(&mut out, &rt, &mut rx);
            assert!(out.iter().all(|&s| s == 0.25));
            assert!(rt.lock().unwrap().source.is_some());
        }

        #[test]
        fn cancelled_start_is_ignored_by_the_callback() {
            let rt = Arc::new(Mutex::new(RtState::new(100, 2)));
            let (mut tx, mut rx) = queue();
            assert!(tx
                .try_push(OutputCmd::Start {
                    buffer: tone(),
                    offset: 0.0,
                    seq: 3,
                })
                .is_ok());
            // What a direct stop leaves behind after four starts were queued.
            rt.lock().unwrap().discard_before = 4;

            let mut out = [1.0_f32; 8];
            audio_callback(&mut out, &rt, &mut rx);
            assert!(out.iter().all(|&s| s == 0.0));
            assert!(rt.lock().unwrap().source.is_none());
        }

        #[test]
        fn source_is_dropped_once_it_runs_out() {
            let rt = Arc::new(Mutex::new(RtState::new(100, 1)));
            let (mut tx, mut rx) = queue();
            assert!(tx
                .try_push(OutputCmd::Start {
                    buffer: tone(),
                    offset: 0.9,
                    seq: 0,
                })
                .is_ok());

            let mut out = [0.0_f32; 20];
            audio_callback(&mut out, &rt, &mut rx);
            assert_eq!(out[0], 0.5);
            assert_eq!(out[19], 0.0);
            assert!(rt.lock().unwrap().source.is_none());
        }
    }
}
