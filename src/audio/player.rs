use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::{error::Result, scheduler::timeline::Timeline};

use super::{output::OutputBackend, renderer::RenderedMix};

/// Transport states exposed to the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    #[default]
    Off,
    All,
    One,
}

/// What [`Player::poll`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// Reached the end of the buffer and stopped.
    Ended,
    /// Reached the end of the buffer and started again from 0.
    Restarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub position: f64,
    pub transport: Transport,
    pub volume: f32,
}

/// One play cycle: the buffer being played and where on the backend clock
/// its position 0 lies.
#[derive(Debug)]
struct PlaybackSession {
    buffer: Arc<RenderedMix>,
    start_time: f64,
    generation: u64,
}

/// Transport state machine over an [`OutputBackend`].
///
/// Every transition into `Playing` builds a fresh session; pause, stop and
/// seek tear the old one down first. Calls must be serialised, which
/// [`SharedPlayer`] does with a mutex.
pub struct Player<B: OutputBackend> {
    backend: B,
    session: Option<PlaybackSession>,
    /// Last buffer handed to `play`, kept for resume and seek while idle.
    buffer: Option<Arc<RenderedMix>>,
    transport: Transport,
    /// Position while not playing.
    held_position: f64,
    volume: f32,
    repeat: RepeatMode,
    generation: u64,
}

pub type SharedPlayer<B> = Arc<Mutex<Player<B>>>;

impl<B: OutputBackend> Player<B> {
    pub fn new(mut backend: B) -> Self {
        backend.set_volume(1.0);
        Self {
            backend,
            session: None,
            buffer: None,
            transport: Transport::Stopped,
            held_position: 0.0,
            volume: 1.0,
            repeat: RepeatMode::Off,
            generation: 0,
        }
    }

    pub fn shared(backend: B) -> SharedPlayer<B> {
        Arc::new(Mutex::new(Self::new(backend)))
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat
    }

    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.repeat = mode;
    }

    /// Incremented on every new session.
    pub fn generation(&self) -> u64 {
        self.session.as_ref().map_or(self.generation, |s| s.generation)
    }

    pub fn buffer(&self) -> Option<&Arc<RenderedMix>> {
        self.buffer.as_ref()
    }

    /// `now − start_time` while playing, the held position otherwise.
    pub fn position(&self) -> f64 {
        match &self.session {
            Some(s) => self.backend.now() - s.start_time,
            None => self.held_position,
        }
    }

    pub fn snapshot(&self) -> PlayerState {
        PlayerState {
            position: self.position(),
            transport: self.transport,
            volume: self.volume,
        }
    }

    /// Play `buffer` from `offset` seconds, replacing whatever was playing.
    ///
    /// If the backend refuses the source the player is left `Paused` at
    /// `offset`, so a later `resume` retries.
    pub fn play(&mut self, buffer: Arc<RenderedMix>, offset: f64) -> Result<()> {
        self.teardown();
        let offset = offset.max(0.0);
        self.buffer = Some(Arc::clone(&buffer));
        self.held_position = offset;

        if let Err(e) = self.backend.start(Arc::clone(&buffer), offset) {
            self.transport = Transport::Paused;
            log::warn!("Player: backend start failed at {offset:.3}s: {e}");
            return Err(e);
        }
        let now = self.backend.now();
        self.generation += 1;
        self.session = Some(PlaybackSession {
            buffer,
            start_time: now - offset,
            generation: self.generation,
        });
        self.transport = Transport::Playing;
        log::debug!("Player: playing from {offset:.3}s (session {})", self.generation);
        Ok(())
    }

    /// No-op unless playing.
    pub fn pause(&mut self) {
        if self.transport != Transport::Playing {
            return;
        }
        self.held_position = self.position();
        self.teardown();
        self.transport = Transport::Paused;
        log::debug!("Player: paused at {:.3}s", self.held_position);
    }

    /// No-op unless paused.
    pub fn resume(&mut self) -> Result<()> {
        if self.transport != Transport::Paused {
            return Ok(());
        }
        match self.buffer.clone() {
            Some(buffer) => self.play(buffer, self.held_position),
            None => Ok(()),
        }
    }

    /// Always ends `Stopped` at position 0. Safe to repeat.
    pub fn stop(&mut self) {
        self.teardown();
        self.held_position = 0.0;
        if self.transport != Transport::Stopped {
            log::debug!("Player: stopped");
        }
        self.transport = Transport::Stopped;
    }

    /// Move to `max(0, t)`. A playing session is rebuilt at the new position.
    pub fn seek(&mut self, t: f64) -> Result<()> {
        let target = if t.is_nan() { 0.0 } else { t.max(0.0) };
        match (self.transport, self.buffer.clone()) {
            (Transport::Playing, Some(buffer)) => self.play(buffer, target),
            _ => {
                self.held_position = target;
                Ok(())
            }
        }
    }

    /// Clamped to `[0, 1]`; applied to the persistent output node.
    pub fn set_volume(&mut self, volume: f32) {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.volume = volume;
        self.backend.set_volume(volume);
    }

    /// Check for the end of the buffer. Hosts call this periodically.
    pub fn poll(&mut self) -> Result<Option<PlayerEvent>> {
        let duration = match &self.session {
            Some(s) => s.buffer.duration(),
            None => return Ok(None),
        };
        if self.position() < duration {
            return Ok(None);
        }

        match self.repeat {
            RepeatMode::Off => {
                self.stop();
                log::info!("Player: reached end of mix");
                Ok(Some(PlayerEvent::Ended))
            }
            RepeatMode::All | RepeatMode::One => {
                if let Some(buffer) = self.buffer.clone() {
                    self.play(buffer, 0.0)?;
                }
                Ok(Some(PlayerEvent::Restarted))
            }
        }
    }

    /// Seek to the start of the entry after the one currently heard.
    /// Returns the new position, or `None` at the end without `RepeatMode::All`.
    pub fn next_track(&mut self, timeline: &Timeline) -> Result<Option<f64>> {
        if timeline.is_empty() {
            return Ok(None);
        }
        let current = timeline.entry_at(self.position());
        let next = match current {
            Some(i) if i + 1 < timeline.len() => i + 1,
            Some(_) if self.repeat == RepeatMode::All => 0,
            Some(_) => return Ok(None),
            None if self.position() <= 0.0 => 0,
            None if self.repeat == RepeatMode::All => 0,
            None => return Ok(None),
        };
        self.seek_to_entry(timeline, next)
    }

    /// Seek to the start of the entry before the one currently heard.
    pub fn previous_track(&mut self, timeline: &Timeline) -> Result<Option<f64>> {
        if timeline.is_empty() {
            return Ok(None);
        }
        let last = timeline.len() - 1;
        let prev = match timeline.entry_at(self.position()) {
            Some(0) if self.repeat == RepeatMode::All => last,
            Some(0) => 0,
            Some(i) => i - 1,
            // Past the end: the last entry is the previous one.
            None if self.position() > 0.0 => last,
            None => 0,
        };
        self.seek_to_entry(timeline, prev)
    }

    fn seek_to_entry(&mut self, timeline: &Timeline, index: usize) -> Result<Option<f64>> {
        match timeline.track_start(index) {
            Some(start) => {
                self.seek(start)?;
                Ok(Some(start))
            }
            None => Ok(None),
        }
    }

    /// Release the active session. Tearing down nothing is fine.
    fn teardown(&mut self) {
        if self.session.take().is_some() {
            self.backend.stop();
        }
    }
}

impl<B: OutputBackend> Drop for Player<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}
