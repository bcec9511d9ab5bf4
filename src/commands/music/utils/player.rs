//! Drives playback of one audio resource at a time.
//!
//! `PlayerController` owns the Idle/Playing/Paused state machine; the
//! `PlaybackDriver` seam hides the songbird call so the state machine stays
//! testable. The Idle transition reported by `acknowledge_finished` is the
//! sole trigger for dequeuing the next track.

use std::sync::{Arc, Mutex as StdMutex, Weak};

use serenity::async_trait;
use serenity::prelude::Mutex as SerenityMutex;
use songbird::tracks::TrackHandle;
use songbird::{Call, Event, TrackEvent};
use tracing::{debug, error};

use super::event_handlers::{TrackEndNotifier, TrackErrorNotifier};
use super::session_manager::{MusicError, MusicResult, Session};
use crate::commands::music::audio_sources::track_metadata::Track;

/// Playback states of the audio player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Playing,
    Paused,
}

/// The seam between the player state machine and the actual audio pipeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlaybackDriver: Send + Sync {
    /// Create and start the streamable resource for a track.
    async fn begin(&self, track: &Track) -> MusicResult<()>;
    async fn pause(&self) -> MusicResult<()>;
    async fn resume(&self) -> MusicResult<()>;
    /// Stop the current resource. The resulting track-end event flows back
    /// through the session as the natural Idle transition.
    async fn stop(&self) -> MusicResult<()>;
}

/// Production driver playing through the session's songbird `Call`.
pub struct SongbirdDriver {
    call: Arc<SerenityMutex<Call>>,
    http: reqwest::Client,
    session: Weak<Session>,
    current: StdMutex<Option<TrackHandle>>,
}

impl SongbirdDriver {
    pub fn new(call: Arc<SerenityMutex<Call>>, http: reqwest::Client, session: Weak<Session>) -> Self {
        Self {
            call,
            http,
            session,
            current: StdMutex::new(None),
        }
    }

    fn handle(&self) -> MusicResult<TrackHandle> {
        self.current
            .lock()
            .expect("track handle lock poisoned")
            .clone()
            .ok_or(MusicError::NoQueue)
    }
}

#[async_trait]
impl PlaybackDriver for SongbirdDriver {
    async fn begin(&self, track: &Track) -> MusicResult<()> {
        let input = track.create_audio_resource(&self.http)?;

        let handle = {
            let mut call = self.call.lock().await;
            call.play_input(input)
        };

        handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackEndNotifier {
                    session: self.session.clone(),
                },
            )
            .map_err(|e| MusicError::PlaybackError(format!("Failed to attach track event: {e}")))?;
        handle
            .add_event(
                Event::Track(TrackEvent::Error),
                TrackErrorNotifier {
                    session: self.session.clone(),
                    title: track.metadata.title.clone(),
                },
            )
            .map_err(|e| MusicError::PlaybackError(format!("Failed to attach track event: {e}")))?;

        *self.current.lock().expect("track handle lock poisoned") = Some(handle);
        Ok(())
    }

    async fn pause(&self) -> MusicResult<()> {
        self.handle()?
            .pause()
            .map_err(|e| MusicError::PlaybackError(format!("Failed to pause track: {e}")))
    }

    async fn resume(&self) -> MusicResult<()> {
        self.handle()?
            .play()
            .map_err(|e| MusicError::PlaybackError(format!("Failed to resume track: {e}")))
    }

    async fn stop(&self) -> MusicResult<()> {
        self.handle()?
            .stop()
            .map_err(|e| MusicError::PlaybackError(format!("Failed to stop track: {e}")))
    }
}

/// The audio player state machine. Exclusively owned by its session and
/// mutated only inside the session's command lane.
pub struct PlayerController {
    state: PlayerState,
    current: Option<Track>,
    driver: Arc<dyn PlaybackDriver>,
}

impl PlayerController {
    pub fn new(driver: Arc<dyn PlaybackDriver>) -> Self {
        Self {
            state: PlayerState::Idle,
            current: None,
            driver,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn has_current(&self) -> bool {
        self.current.is_some()
    }

    /// Start a track. Only legal from `Idle`; a driver failure leaves the
    /// player `Idle` with no current track so the caller can advance.
    pub async fn begin(&mut self, track: Track) -> MusicResult<()> {
        if self.state != PlayerState::Idle {
            return Err(MusicError::PlaybackError(
                "player is not idle".to_string(),
            ));
        }

        self.driver.begin(&track).await?;
        debug!("Now playing: {}", track.metadata.title);
        self.state = PlayerState::Playing;
        self.current = Some(track);
        Ok(())
    }

    /// Pause the current resource. Returns `false` when nothing was playing.
    pub async fn pause(&mut self) -> MusicResult<bool> {
        if self.state != PlayerState::Playing {
            return Ok(false);
        }
        self.driver.pause().await?;
        self.state = PlayerState::Paused;
        Ok(true)
    }

    /// Resume a paused resource. Returns `false` when nothing was paused.
    pub async fn resume(&mut self) -> MusicResult<bool> {
        if self.state != PlayerState::Paused {
            return Ok(false);
        }
        self.driver.resume().await?;
        self.state = PlayerState::Playing;
        Ok(true)
    }

    /// Stop the current resource; the Idle transition arrives through the
    /// driver's track-end event. Returns `false` when nothing was active.
    pub async fn stop_current(&mut self) -> bool {
        if self.current.is_none() {
            return false;
        }
        if let Err(e) = self.driver.stop().await {
            error!("Failed to stop current track: {}", e);
        }
        true
    }

    /// The Idle transition: called when the driver reports the previous
    /// track finished. Returns the finished track.
    pub fn acknowledge_finished(&mut self) -> Option<Track> {
        self.state = PlayerState::Idle;
        self.current.take()
    }

    /// Hard reset used during session teardown.
    pub fn force_idle(&mut self) {
        self.state = PlayerState::Idle;
        self.current = None;
    }
}
