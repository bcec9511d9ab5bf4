//! Scenario tests driving a session end to end through its public surface,
//! with the voice transport, playback driver, and stream search faked out.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serenity::model::id::ChannelId;

use cadence::commands::music::utils::player::PlayerState;
use cadence::commands::music::utils::session_manager::{
    PlayOutcome, Session, SkipOutcome, StopOutcome,
};

use common::fixtures::{FEEDBACK_CHANNEL, ten_track_album};
use common::mocks::{FakeCatalog, FakeDriver, FakeGateway, FakeSearch, RecordingEvents};
use common::{TEST_GUILD, session_with};

async fn play(
    session: &Arc<Session>,
    query: &str,
    events: Arc<RecordingEvents>,
) -> PlayOutcome {
    session
        .play(
            1,
            query,
            "tester".to_string(),
            ChannelId::new(FEEDBACK_CHANNEL),
            events,
        )
        .await
}

/// Drain the queue by simulating the driver's track-end events.
async fn run_to_completion(session: &Arc<Session>) {
    loop {
        session.handle_track_end().await;
        if session.list().await.current.is_none() {
            return;
        }
    }
}

#[tokio::test]
async fn scenario_a_single_track_plays_within_one_cycle() {
    let driver = Arc::new(FakeDriver::new());
    let (_registry, session) = session_with(
        Arc::new(FakeSearch::always_matching()),
        Vec::new(),
        Arc::new(FakeGateway::connected()),
        driver.clone(),
    );
    let events = Arc::new(RecordingEvents::new());

    let outcome = play(&session, "resolvable song", events.clone()).await;
    assert_matches!(outcome, PlayOutcome::NowPlaying { ref track, .. } => {
        assert_eq!(track.title, "resolvable song");
    });

    // The player transitioned to Playing and `list` reports Now Playing.
    let view = session.list().await;
    assert_matches!(view.current, Some((ref track, PlayerState::Playing)) => {
        assert_eq!(track.title, "resolvable song");
    });
    assert_eq!(driver.began_titles(), vec!["resolvable song".to_string()]);
    assert_eq!(events.entries(), vec!["play:resolvable song".to_string()]);
}

#[tokio::test]
async fn scenario_b_playlist_with_failed_items_plays_the_rest_in_order() {
    // Two of the ten album items never match a stream.
    let driver = Arc::new(FakeDriver::new());
    let catalog = FakeCatalog {
        url: "https://catalog.example/album/1".to_string(),
        name: "Fixture Album".to_string(),
        items: ten_track_album(),
    };
    let (_registry, session) = session_with(
        Arc::new(FakeSearch::missing(&["track03", "track08"])),
        vec![Arc::new(catalog)],
        Arc::new(FakeGateway::connected()),
        driver.clone(),
    );
    let events = Arc::new(RecordingEvents::new());

    let outcome = play(&session, "https://catalog.example/album/1", events.clone()).await;
    // totalTracks reports the full album size throughout.
    assert_matches!(outcome, PlayOutcome::CollectionQueued { ref name, total: 10, started: true } => {
        assert_eq!(name, "Fixture Album");
    });

    run_to_completion(&session).await;

    // Exactly eight tracks played, in original relative order.
    let began = driver.began_titles();
    assert_eq!(began.len(), 8);
    let expected_order: Vec<String> = [1, 2, 4, 5, 6, 7, 9, 10]
        .iter()
        .map(|i| format!("track{:02}", i))
        .collect();
    for (played, expected) in began.iter().zip(&expected_order) {
        assert!(
            played.starts_with(expected.as_str()),
            "expected {played} to start with {expected}"
        );
    }
}

#[tokio::test]
async fn scenario_c_stop_reports_current_plus_pending() {
    let driver = Arc::new(FakeDriver::new());
    let (registry, session) = session_with(
        Arc::new(FakeSearch::always_matching()),
        Vec::new(),
        Arc::new(FakeGateway::connected()),
        driver.clone(),
    );
    let events = Arc::new(RecordingEvents::new());

    for query in ["one", "two", "three", "four"] {
        play(&session, query, events.clone()).await;
    }

    let outcome = registry
        .stop(serenity::model::id::GuildId::new(TEST_GUILD))
        .await;
    assert_matches!(outcome, StopOutcome::Stopped { removed: 4 });

    // The stop's idle transition finds an empty queue and starts nothing.
    session.handle_track_end().await;
    let view = session.list().await;
    assert!(view.current.is_none());
    assert!(view.upcoming.is_empty());
    assert_eq!(driver.began_titles(), vec!["one".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn scenario_d_reconnect_stops_after_five_attempts() {
    let gateway = Arc::new(FakeGateway::unreachable());
    let (registry, session) = session_with(
        Arc::new(FakeSearch::always_matching()),
        Vec::new(),
        gateway.clone(),
        Arc::new(FakeDriver::new()),
    );

    session.on_driver_disconnect(false).await;

    tokio::time::timeout(Duration::from_secs(600), async {
        while !session.is_destroyed() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("session should tear down after exhausting rejoins");

    // Five rejoin attempts, never a sixth; the session tore down fully.
    assert_eq!(gateway.rejoin_calls.load(Ordering::SeqCst), 5);
    assert!(gateway.left.load(Ordering::SeqCst));
    assert!(
        registry
            .get(serenity::model::id::GuildId::new(TEST_GUILD))
            .is_none()
    );
}

#[tokio::test]
async fn scenario_e_skip_cannot_exceed_whats_available() {
    let driver = Arc::new(FakeDriver::new());
    let (registry, session) = session_with(
        Arc::new(FakeSearch::always_matching()),
        Vec::new(),
        Arc::new(FakeGateway::connected()),
        driver.clone(),
    );
    let events = Arc::new(RecordingEvents::new());

    play(&session, "lonely track", events.clone()).await;

    let outcome = registry
        .skip(serenity::model::id::GuildId::new(TEST_GUILD), 3)
        .await;
    assert_matches!(outcome, SkipOutcome::Skipped { count: 1 });
}

#[tokio::test]
async fn failed_resource_creation_fires_on_error_and_advances() {
    let driver = Arc::new(FakeDriver {
        fail_titles: vec!["broken".to_string()],
        ..FakeDriver::new()
    });
    let (_registry, session) = session_with(
        Arc::new(FakeSearch::always_matching()),
        Vec::new(),
        Arc::new(FakeGateway::connected()),
        driver.clone(),
    );
    let events = Arc::new(RecordingEvents::new());

    play(&session, "broken", events.clone()).await;
    play(&session, "working", events.clone()).await;

    // "broken" never played and never re-entered the queue; "working" did.
    let view = session.list().await;
    assert_matches!(view.current, Some((ref track, PlayerState::Playing)) => {
        assert_eq!(track.title, "working");
    });
    assert_eq!(driver.began_titles(), vec!["working".to_string()]);
    assert_eq!(
        events.entries(),
        vec!["error:broken".to_string(), "play:working".to_string()]
    );
}

#[tokio::test]
async fn pause_and_resume_notify_listeners() {
    let driver = Arc::new(FakeDriver::new());
    let (registry, session) = session_with(
        Arc::new(FakeSearch::always_matching()),
        Vec::new(),
        Arc::new(FakeGateway::connected()),
        driver,
    );
    let events = Arc::new(RecordingEvents::new());
    let guild = serenity::model::id::GuildId::new(TEST_GUILD);

    play(&session, "song", events.clone()).await;
    registry.pause(guild).await;
    registry.resume(guild).await;

    assert_eq!(
        events.entries(),
        vec![
            "play:song".to_string(),
            "pause:song".to_string(),
            "resume:song".to_string(),
        ]
    );
}

#[tokio::test]
async fn queue_order_survives_interleaved_requests() {
    let driver = Arc::new(FakeDriver::new());
    let (_registry, session) = session_with(
        Arc::new(FakeSearch::always_matching()),
        Vec::new(),
        Arc::new(FakeGateway::connected()),
        driver.clone(),
    );
    let events = Arc::new(RecordingEvents::new());

    for query in ["a", "b", "c"] {
        play(&session, query, events.clone()).await;
    }
    run_to_completion(&session).await;

    assert_eq!(
        driver.began_titles(),
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    );
}

#[tokio::test]
async fn unsupported_url_fails_fast_with_untouched_queue() {
    let (_registry, session) = session_with(
        Arc::new(FakeSearch::always_matching()),
        Vec::new(),
        Arc::new(FakeGateway::connected()),
        Arc::new(FakeDriver::new()),
    );
    let events = Arc::new(RecordingEvents::new());

    let outcome = play(&session, "https://example.com/not-music", events).await;
    assert_matches!(outcome, PlayOutcome::Unsupported);

    let view = session.list().await;
    assert!(view.current.is_none());
    assert!(view.upcoming.is_empty());
}

#[tokio::test]
async fn resolve_miss_reports_no_results() {
    let (_registry, session) = session_with(
        Arc::new(FakeSearch::missing(&["ghost"])),
        Vec::new(),
        Arc::new(FakeGateway::connected()),
        Arc::new(FakeDriver::new()),
    );
    let events = Arc::new(RecordingEvents::new());

    let outcome = play(&session, "ghost song", events).await;
    assert_matches!(outcome, PlayOutcome::NoResults { .. });
    assert!(session.list().await.current.is_none());
}
