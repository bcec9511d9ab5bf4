//! The per-guild track queue: ordered request groups ("handlers") feeding
//! the player one track at a time.
//!
//! All mutation happens inside the session's command lane; the only guard
//! the queue itself provides is the player-idle check in `process_queue`.

use std::collections::VecDeque;
use std::sync::Arc;

use serenity::model::id::ChannelId;
use tracing::{debug, error, info};

use super::player::{PlayerController, PlayerState};
use crate::commands::music::audio_sources::StreamSearch;
use crate::commands::music::audio_sources::track_metadata::{
    CatalogItem, Track, TrackEvents, TrackMetadata,
};

/// One enqueue request: a single track or a deferred catalog group.
pub struct Handler {
    pub request_id: u64,
    /// Item count announced at enqueue time; reported unchanged even when
    /// some items later fail to resolve.
    pub total_tracks: usize,
    tracks_loaded: bool,
    tracks: VecDeque<Track>,
    pending: Vec<CatalogItem>,
    pub requested_by: String,
    pub channel_id: ChannelId,
    events: Arc<dyn TrackEvents>,
}

impl Handler {
    /// A fully-resolved request.
    pub fn loaded(
        request_id: u64,
        tracks: Vec<TrackMetadata>,
        requested_by: String,
        channel_id: ChannelId,
        events: Arc<dyn TrackEvents>,
    ) -> Self {
        Self {
            request_id,
            total_tracks: tracks.len(),
            tracks_loaded: true,
            tracks: tracks
                .into_iter()
                .map(|metadata| Track::new(metadata, events.clone()))
                .collect(),
            pending: Vec::new(),
            requested_by,
            channel_id,
            events,
        }
    }

    /// A deferred catalog group: item metadata is known, streams are not.
    pub fn deferred(
        request_id: u64,
        items: Vec<CatalogItem>,
        requested_by: String,
        channel_id: ChannelId,
        events: Arc<dyn TrackEvents>,
    ) -> Self {
        Self {
            request_id,
            total_tracks: items.len(),
            tracks_loaded: false,
            tracks: VecDeque::new(),
            pending: items,
            requested_by,
            channel_id,
            events,
        }
    }

    pub fn tracks_loaded(&self) -> bool {
        self.tracks_loaded
    }

    /// Expand a deferred group, exactly once: every item goes through a
    /// search-per-track step; an item with no match is omitted, not retried.
    pub async fn load_tracks(&mut self, search: &dyn StreamSearch) {
        if self.tracks_loaded {
            return;
        }

        for item in self.pending.drain(..) {
            match search.search(&item.search_query()).await {
                Ok(Some(resolved)) => {
                    let mut metadata = item.overlay(resolved);
                    metadata.requested_by = Some(self.requested_by.clone());
                    self.tracks.push_back(Track::new(metadata, self.events.clone()));
                }
                Ok(None) => {
                    debug!("No stream match for '{}', omitting", item.title);
                }
                Err(e) => {
                    error!("Stream search failed for '{}': {}", item.title, e);
                }
            }
        }

        self.tracks_loaded = true;
        info!(
            "Loaded {}/{} tracks for request {}",
            self.tracks.len(),
            self.total_tracks,
            self.request_id
        );
    }

    /// Shift the next track out of this group.
    fn shift(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }

    fn is_exhausted(&self) -> bool {
        self.tracks_loaded && self.tracks.is_empty()
    }

    /// Tracks still held by this group (deferred items count until loaded).
    pub fn remaining(&self) -> usize {
        if self.tracks_loaded {
            self.tracks.len()
        } else {
            self.pending.len()
        }
    }

    /// Discard up to `count` tracks from the front of this group.
    fn discard(&mut self, count: usize) -> usize {
        let mut discarded = 0;
        while discarded < count {
            if self.tracks.pop_front().is_some() {
                discarded += 1;
            } else if !self.pending.is_empty() {
                self.pending.remove(0);
                discarded += 1;
            } else {
                break;
            }
        }
        discarded
    }

    fn peek_metadata(&self) -> Option<TrackMetadata> {
        if let Some(track) = self.tracks.front() {
            return Some(track.metadata.clone());
        }
        self.pending.first().map(|item| TrackMetadata {
            title: item.title.clone(),
            artists: item.artists.clone(),
            thumbnail: item.thumbnail.clone(),
            requested_by: Some(self.requested_by.clone()),
            ..Default::default()
        })
    }
}

/// Ordered list of pending request groups for one guild.
#[derive(Default)]
pub struct SessionQueue {
    handlers: VecDeque<Handler>,
}

impl SessionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Tracks still queued across every group.
    pub fn pending_len(&self) -> usize {
        self.handlers.iter().map(Handler::remaining).sum()
    }

    /// Append a request group. The caller follows up with `process_queue`.
    pub fn enqueue(&mut self, handler: Handler) -> usize {
        debug!(
            "Enqueueing request {} ({} tracks)",
            handler.request_id, handler.total_tracks
        );
        self.handlers.push_back(handler);
        self.pending_len()
    }

    /// Feed the player the next track, if any.
    ///
    /// No-op while the player is busy or the queue is empty. An exhausted
    /// group is discarded and, unless `high_priority` was already set, the
    /// scan retries once with priority forced true so empty groups are
    /// skipped without waiting for a player-idle event. A track whose
    /// resource creation fails fires `on_error` and never re-enters the
    /// queue; processing always moves forward.
    pub async fn process_queue(
        &mut self,
        player: &mut PlayerController,
        search: &dyn StreamSearch,
        mut high_priority: bool,
    ) {
        loop {
            if player.state() != PlayerState::Idle {
                return;
            }
            let Some(handler) = self.handlers.front_mut() else {
                return;
            };

            if !handler.tracks_loaded() {
                handler.load_tracks(search).await;
            }

            let track = handler.shift();
            if handler.is_exhausted() {
                // The group dies with its last shifted track.
                let done = self.handlers.pop_front().expect("front handler exists");
                debug!("Request {} exhausted, discarding handler", done.request_id);
            }

            let Some(track) = track else {
                if high_priority {
                    return;
                }
                high_priority = true;
                continue;
            };

            let up_next = self.peek_metadata();
            match player.begin(track.clone()).await {
                Ok(()) => {
                    track
                        .events
                        .on_play(&track.metadata, up_next.as_ref())
                        .await;
                    return;
                }
                Err(e) => {
                    error!(
                        "Failed to create resource for '{}': {}",
                        track.metadata.title, e
                    );
                    track.events.on_error(&track.metadata, &e).await;
                    high_priority = true;
                }
            }
        }
    }

    /// Skip the current track plus `count - 1` pending ones. Reports the
    /// total discarded including the currently-playing track, capped at
    /// what actually exists.
    pub async fn skip(&mut self, player: &mut PlayerController, count: usize) -> usize {
        if !player.has_current() {
            return 0;
        }

        let mut skipped = 0;
        if count > 1 {
            skipped += self.discard_pending(count - 1);
        }

        // Stopping triggers the natural Idle transition that pulls the
        // next track.
        player.stop_current().await;
        skipped += 1;

        info!("Skipped {} track(s)", skipped);
        skipped
    }

    /// Discard every pending track, destroy every handler, and hard-stop
    /// the current resource. Returns the removed count including the
    /// currently-playing track.
    pub async fn stop(&mut self, player: &mut PlayerController) -> usize {
        let mut removed = self.clear_handlers();
        if player.stop_current().await {
            removed += 1;
        }
        info!("Stopped playback, removed {} track(s)", removed);
        removed
    }

    /// Drop all handlers without touching the player. Returns the number of
    /// pending tracks released.
    pub fn clear_handlers(&mut self) -> usize {
        let removed = self.pending_len();
        self.handlers.clear();
        removed
    }

    fn discard_pending(&mut self, count: usize) -> usize {
        let mut discarded = 0;
        while discarded < count {
            let Some(handler) = self.handlers.front_mut() else {
                break;
            };
            discarded += handler.discard(count - discarded);
            if handler.remaining() == 0 {
                self.handlers.pop_front();
            }
        }
        discarded
    }

    fn peek_metadata(&self) -> Option<TrackMetadata> {
        self.handlers.iter().find_map(Handler::peek_metadata)
    }

    /// Snapshot of the pending tracks, in play order. Deferred items appear
    /// with their catalog metadata.
    pub fn snapshot(&self) -> Vec<TrackMetadata> {
        let mut upcoming = Vec::new();
        for handler in &self.handlers {
            if handler.tracks_loaded {
                upcoming.extend(handler.tracks.iter().map(|t| t.metadata.clone()));
            } else {
                upcoming.extend(handler.pending.iter().map(|item| TrackMetadata {
                    title: item.title.clone(),
                    artists: item.artists.clone(),
                    thumbnail: item.thumbnail.clone(),
                    requested_by: Some(handler.requested_by.clone()),
                    ..Default::default()
                }));
            }
        }
        upcoming
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::music::audio_sources::MockStreamSearch;
    use crate::commands::music::audio_sources::track_metadata::SilentEvents;
    use crate::commands::music::utils::player::MockPlaybackDriver;
    use crate::commands::music::utils::session_manager::MusicError;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex as StdMutex;

    fn meta(title: &str) -> TrackMetadata {
        TrackMetadata {
            title: title.to_string(),
            url: Some(format!("https://youtu.be/{title}")),
            ..Default::default()
        }
    }

    fn loaded_handler(id: u64, titles: &[&str]) -> Handler {
        Handler::loaded(
            id,
            titles.iter().map(|t| meta(t)).collect(),
            "tester".to_string(),
            ChannelId::new(1),
            Arc::new(SilentEvents),
        )
    }

    /// Driver that records every begun title and optionally fails some.
    fn recording_driver(
        log: Arc<StdMutex<Vec<String>>>,
        fail_titles: &'static [&'static str],
    ) -> MockPlaybackDriver {
        let mut driver = MockPlaybackDriver::new();
        driver.expect_begin().returning(move |track| {
            if fail_titles.contains(&track.metadata.title.as_str()) {
                return Err(MusicError::AudioSourceError("boom".to_string()));
            }
            log.lock().unwrap().push(track.metadata.title.clone());
            Ok(())
        });
        driver.expect_stop().returning(|| Ok(()));
        driver
    }

    /// Run the queue to completion, simulating the track-end events the
    /// driver would deliver.
    async fn drain(queue: &mut SessionQueue, player: &mut PlayerController) {
        let search = MockStreamSearch::new();
        queue.process_queue(player, &search, false).await;
        while player.has_current() {
            player.acknowledge_finished();
            queue.process_queue(player, &search, false).await;
        }
    }

    #[tokio::test]
    async fn single_track_starts_playing() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let driver = recording_driver(log.clone(), &[]);
        let mut player = PlayerController::new(Arc::new(driver));
        let mut queue = SessionQueue::new();
        let search = MockStreamSearch::new();

        queue.enqueue(loaded_handler(1, &["a"]));
        queue.process_queue(&mut player, &search, false).await;

        assert_eq!(player.state(), PlayerState::Playing);
        assert_eq!(*log.lock().unwrap(), vec!["a".to_string()]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn busy_player_defers_processing() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let driver = recording_driver(log.clone(), &[]);
        let mut player = PlayerController::new(Arc::new(driver));
        let mut queue = SessionQueue::new();
        let search = MockStreamSearch::new();

        queue.enqueue(loaded_handler(1, &["a"]));
        queue.process_queue(&mut player, &search, false).await;
        queue.enqueue(loaded_handler(2, &["b"]));
        queue.process_queue(&mut player, &search, false).await;

        // "b" waits for the idle transition.
        assert_eq!(*log.lock().unwrap(), vec!["a".to_string()]);
        assert_eq!(queue.pending_len(), 1);

        player.acknowledge_finished();
        queue.process_queue(&mut player, &search, false).await;
        assert_eq!(*log.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn failing_track_is_skipped_never_retried() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let driver = recording_driver(log.clone(), &["bad"]);
        let mut player = PlayerController::new(Arc::new(driver));
        let mut queue = SessionQueue::new();
        let search = MockStreamSearch::new();

        queue.enqueue(loaded_handler(1, &["bad", "good"]));
        queue.process_queue(&mut player, &search, false).await;

        // "bad" fired on_error and processing moved straight to "good".
        assert_eq!(*log.lock().unwrap(), vec!["good".to_string()]);
        assert_eq!(player.state(), PlayerState::Playing);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn deferred_group_loads_once_and_omits_failures() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let driver = recording_driver(log.clone(), &[]);
        let mut player = PlayerController::new(Arc::new(driver));
        let mut queue = SessionQueue::new();

        let items: Vec<CatalogItem> = (1..=10)
            .map(|i| CatalogItem {
                title: format!("item{i}"),
                artists: vec!["artist".to_string()],
                thumbnail: None,
            })
            .collect();
        let handler = Handler::deferred(
            7,
            items,
            "tester".to_string(),
            ChannelId::new(1),
            Arc::new(SilentEvents),
        );
        assert_eq!(handler.total_tracks, 10);
        queue.enqueue(handler);

        let mut search = MockStreamSearch::new();
        search.expect_search().times(10).returning(|query| {
            // Two of the ten items have no stream match.
            if query.starts_with("item3") || query.starts_with("item8") {
                Ok(None)
            } else {
                Ok(Some(TrackMetadata {
                    title: query.to_string(),
                    url: Some(format!("https://youtu.be/{}", &query[..5])),
                    ..Default::default()
                }))
            }
        });

        queue.process_queue(&mut player, &search, false).await;
        while player.has_current() {
            player.acknowledge_finished();
            queue.process_queue(&mut player, &search, false).await;
        }

        let played = log.lock().unwrap();
        assert_eq!(played.len(), 8);
        // Original relative order is preserved.
        let expected: Vec<String> = [1, 2, 4, 5, 6, 7, 9, 10]
            .iter()
            .map(|i| format!("item{i}"))
            .collect();
        assert_eq!(played.iter().map(|t| t[..t.find(' ').unwrap_or(t.len())].to_string()).collect::<Vec<_>>(), expected);
    }

    #[tokio::test]
    async fn exhausted_group_is_skipped_without_idle_event() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let driver = recording_driver(log.clone(), &[]);
        let mut player = PlayerController::new(Arc::new(driver));
        let mut queue = SessionQueue::new();

        // A deferred group whose every item fails resolution, followed by a
        // playable single.
        let dud = Handler::deferred(
            1,
            vec![CatalogItem {
                title: "ghost".to_string(),
                artists: Vec::new(),
                thumbnail: None,
            }],
            "tester".to_string(),
            ChannelId::new(1),
            Arc::new(SilentEvents),
        );
        queue.enqueue(dud);
        queue.enqueue(loaded_handler(2, &["real"]));

        let mut search = MockStreamSearch::new();
        search.expect_search().returning(|_| Ok(None));

        queue.process_queue(&mut player, &search, false).await;

        assert_eq!(*log.lock().unwrap(), vec!["real".to_string()]);
    }

    #[tokio::test]
    async fn skip_caps_at_available_tracks() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let driver = recording_driver(log.clone(), &[]);
        let mut player = PlayerController::new(Arc::new(driver));
        let mut queue = SessionQueue::new();
        let search = MockStreamSearch::new();

        queue.enqueue(loaded_handler(1, &["only"]));
        queue.process_queue(&mut player, &search, false).await;

        // One playing, nothing queued: skip(3) reports exactly 1.
        let skipped = queue.skip(&mut player, 3).await;
        assert_eq!(skipped, 1);
    }

    #[tokio::test]
    async fn skip_discards_ahead_of_current() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let driver = recording_driver(log.clone(), &[]);
        let mut player = PlayerController::new(Arc::new(driver));
        let mut queue = SessionQueue::new();
        let search = MockStreamSearch::new();

        queue.enqueue(loaded_handler(1, &["a", "b", "c", "d"]));
        queue.process_queue(&mut player, &search, false).await;

        let skipped = queue.skip(&mut player, 3).await;
        assert_eq!(skipped, 3);

        // The natural idle transition pulls the first survivor.
        player.acknowledge_finished();
        queue.process_queue(&mut player, &search, false).await;
        assert_eq!(*log.lock().unwrap(), vec!["a".to_string(), "d".to_string()]);
    }

    #[tokio::test]
    async fn skip_with_nothing_playing_reports_zero() {
        let driver = MockPlaybackDriver::new();
        let mut player = PlayerController::new(Arc::new(driver));
        let mut queue = SessionQueue::new();

        assert_eq!(queue.skip(&mut player, 1).await, 0);
    }

    #[tokio::test]
    async fn stop_reports_current_plus_pending() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let driver = recording_driver(log.clone(), &[]);
        let mut player = PlayerController::new(Arc::new(driver));
        let mut queue = SessionQueue::new();
        let search = MockStreamSearch::new();

        queue.enqueue(loaded_handler(1, &["a", "b", "c", "d"]));
        queue.process_queue(&mut player, &search, false).await;

        let removed = queue.stop(&mut player).await;
        assert_eq!(removed, 4);
        assert!(queue.is_empty());

        // The stop's idle transition finds an empty queue; nothing starts.
        player.acknowledge_finished();
        queue.process_queue(&mut player, &search, false).await;
        assert_eq!(player.state(), PlayerState::Idle);
        assert_eq!(*log.lock().unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn player_plays_each_track_at_most_once() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let driver = recording_driver(log.clone(), &[]);
        let mut player = PlayerController::new(Arc::new(driver));
        let mut queue = SessionQueue::new();

        queue.enqueue(loaded_handler(1, &["a", "b"]));
        queue.enqueue(loaded_handler(2, &["c"]));
        drain(&mut queue, &mut player).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }
}
