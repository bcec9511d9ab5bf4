//! Hand-rolled fakes for the session's seams: stream search, playback
//! driver, voice gateway, and track-event sink.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cadence::commands::music::audio_sources::track_metadata::{
    CatalogItem, Track, TrackEvents, TrackMetadata,
};
use cadence::commands::music::audio_sources::{
    CatalogProvider, Resolution, StreamSearch,
};
use cadence::commands::music::utils::player::PlaybackDriver;
use cadence::commands::music::utils::session_manager::{MusicError, MusicResult};
use cadence::commands::music::utils::voice::VoiceGateway;
use serenity::model::id::ChannelId;

/// Search that answers every query with a deterministic track, except the
/// queries it was told to miss.
pub struct FakeSearch {
    misses: Vec<String>,
}

impl FakeSearch {
    pub fn always_matching() -> Self {
        Self { misses: Vec::new() }
    }

    pub fn missing(misses: &[&str]) -> Self {
        Self {
            misses: misses.iter().map(|m| m.to_string()).collect(),
        }
    }

    fn hit(&self, query: &str) -> Option<TrackMetadata> {
        if self.misses.iter().any(|miss| query.contains(miss.as_str())) {
            return None;
        }
        Some(TrackMetadata {
            title: query.to_string(),
            url: Some(format!("https://youtu.be/{}", query.replace(' ', "-"))),
            ..Default::default()
        })
    }
}

#[async_trait]
impl StreamSearch for FakeSearch {
    async fn search(&self, query: &str) -> MusicResult<Option<TrackMetadata>> {
        Ok(self.hit(query))
    }

    async fn metadata_for_url(&self, url: &str) -> MusicResult<Option<TrackMetadata>> {
        Ok(self.hit(url))
    }
}

/// Catalog provider that recognizes one URL and yields a fixed collection.
pub struct FakeCatalog {
    pub url: String,
    pub name: String,
    pub items: Vec<CatalogItem>,
}

#[async_trait]
impl CatalogProvider for FakeCatalog {
    fn is_valid_url(&self, url: &str) -> bool {
        url == self.url
    }

    async fn resolve(
        &self,
        _url: &str,
        _search: &dyn StreamSearch,
    ) -> MusicResult<Resolution> {
        Ok(Resolution::Collection {
            name: self.name.clone(),
            items: self.items.clone(),
        })
    }
}

/// Driver recording every track it begins; optionally failing some titles.
#[derive(Default)]
pub struct FakeDriver {
    pub began: Mutex<Vec<String>>,
    pub fail_titles: Vec<String>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn began_titles(&self) -> Vec<String> {
        self.began.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlaybackDriver for FakeDriver {
    async fn begin(&self, track: &Track) -> MusicResult<()> {
        if self
            .fail_titles
            .iter()
            .any(|t| track.metadata.title.contains(t.as_str()))
        {
            return Err(MusicError::AudioSourceError("unplayable".to_string()));
        }
        self.began.lock().unwrap().push(track.metadata.title.clone());
        Ok(())
    }

    async fn pause(&self) -> MusicResult<()> {
        Ok(())
    }

    async fn resume(&self) -> MusicResult<()> {
        Ok(())
    }

    async fn stop(&self) -> MusicResult<()> {
        Ok(())
    }
}

/// Gateway with scripted rejoin results.
pub struct FakeGateway {
    rejoin_results: Mutex<VecDeque<MusicResult<()>>>,
    pub rejoin_calls: AtomicUsize,
    pub connected: AtomicBool,
    pub left: AtomicBool,
}

impl FakeGateway {
    pub fn connected() -> Self {
        Self {
            rejoin_results: Mutex::new(VecDeque::new()),
            rejoin_calls: AtomicUsize::new(0),
            connected: AtomicBool::new(true),
            left: AtomicBool::new(false),
        }
    }

    /// A gateway whose every rejoin attempt fails.
    pub fn unreachable() -> Self {
        let gateway = Self::connected();
        gateway.connected.store(false, Ordering::SeqCst);
        gateway
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn rejoin(&self, _channel_id: ChannelId) -> MusicResult<()> {
        self.rejoin_calls.fetch_add(1, Ordering::SeqCst);
        let mut scripted = self.rejoin_results.lock().unwrap();
        match scripted.pop_front() {
            Some(result) => result,
            None => {
                if self.connected.load(Ordering::SeqCst) {
                    Ok(())
                } else {
                    Err(MusicError::JoinError("voice server unreachable".to_string()))
                }
            }
        }
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn leave(&self) {
        self.left.store(true, Ordering::SeqCst);
    }
}

/// Track-event sink recording the order of lifecycle callbacks.
#[derive(Default)]
pub struct RecordingEvents {
    pub log: Mutex<Vec<String>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl TrackEvents for RecordingEvents {
    async fn on_play(&self, track: &TrackMetadata, _up_next: Option<&TrackMetadata>) {
        self.log.lock().unwrap().push(format!("play:{}", track.title));
    }

    async fn on_pause(&self, track: &TrackMetadata, resumed: bool) {
        let verb = if resumed { "resume" } else { "pause" };
        self.log.lock().unwrap().push(format!("{verb}:{}", track.title));
    }

    async fn on_finish(&self, track: &TrackMetadata) {
        self.log.lock().unwrap().push(format!("finish:{}", track.title));
    }

    async fn on_error(&self, track: &TrackMetadata, _error: &MusicError) {
        self.log.lock().unwrap().push(format!("error:{}", track.title));
    }
}
