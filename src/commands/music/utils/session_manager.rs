//! The per-guild music session and its registry.
//!
//! One `Session` owns the voice connection, the player, and the queue for a
//! guild. Every externally-triggered operation runs through the session's
//! command lane (a fair async mutex held for the operation's duration), so
//! overlapping user actions cannot race. The `SessionRegistry` maps guilds
//! to sessions and enforces at-most-one-session per guild; it is injected
//! into command handlers rather than living in a global.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serenity::client::Context;
use serenity::model::id::{ChannelId, GuildId, UserId};
use serenity::model::permissions::Permissions;
use songbird::{CoreEvent, Event};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::event_handlers::DriverDisconnectNotifier;
use super::player::{PlaybackDriver, PlayerController, PlayerState, SongbirdDriver};
use super::session_queue::{Handler, SessionQueue};
use super::voice::{
    DisconnectAction, EMPTY_CHANNEL_GRACE, READY_TIMEOUT, ReconnectPolicy, SongbirdGateway,
    VoiceGateway,
};
use crate::HTTP_CLIENT;
use crate::commands::music::audio_sources::track_metadata::{TrackEvents, TrackMetadata};
use crate::commands::music::audio_sources::{Resolution, Resolver, StreamSearch};

/// Errors that can occur during music operations
#[derive(Error, Debug)]
pub enum MusicError {
    #[error("Not in a guild")]
    NotInGuild,

    #[error("Failed to join voice channel: {0}")]
    JoinError(String),

    #[error("Failed to get voice manager")]
    NoVoiceManager,

    #[error("User is not in a voice channel")]
    UserNotInVoiceChannel,

    #[error("Missing permissions for the voice channel")]
    MissingPermissions,

    #[error("Audio source error: {0}")]
    AudioSourceError(String),

    #[error("External API error: {0}")]
    ExternalApiError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Playback error: {0}")]
    PlaybackError(String),

    #[error("No queue")]
    NoQueue,
}

/// Result type for music operations
pub type MusicResult<T> = Result<T, MusicError>;

/// Structured outcome of a `play` request. Commands render these; nothing
/// here ever crosses the command boundary as an error.
#[derive(Debug)]
pub enum PlayOutcome {
    NowPlaying { track: TrackMetadata, queued: usize },
    Queued { track: TrackMetadata, position: usize },
    CollectionQueued { name: String, total: usize, started: bool },
    NoResults { query: String },
    Unsupported,
    Disabled,
    NotInVoiceChannel,
    MissingPermissions,
    JoinFailed { reason: String },
    ResolveFailed { reason: String },
}

#[derive(Debug)]
pub enum SkipOutcome {
    Skipped { count: usize },
    NothingPlaying,
    NoSession,
}

#[derive(Debug)]
pub enum StopOutcome {
    Stopped { removed: usize },
    NoSession,
}

#[derive(Debug)]
pub enum PauseOutcome {
    Paused { track: TrackMetadata },
    AlreadyPaused,
    NothingPlaying,
    NoSession,
}

#[derive(Debug)]
pub enum ResumeOutcome {
    Resumed { track: TrackMetadata },
    NotPaused,
    NoSession,
}

/// Read-only view of a session's queue.
#[derive(Debug)]
pub struct QueueView {
    pub current: Option<(TrackMetadata, PlayerState)>,
    pub upcoming: Vec<TrackMetadata>,
}

#[derive(Debug)]
pub enum ListOutcome {
    Queue(QueueView),
    NoSession,
}

#[derive(Debug)]
pub enum DisconnectOutcome {
    Disconnected,
    NoSession,
}

/// Queue and player, guarded together by the session's command lane.
pub(crate) struct SessionState {
    queue: SessionQueue,
    player: PlayerController,
    search: Arc<dyn StreamSearch>,
}

impl SessionState {
    async fn enqueue_and_process(&mut self, handler: Handler) {
        self.queue.enqueue(handler);
        self.queue
            .process_queue(&mut self.player, self.search.as_ref(), false)
            .await;
    }

    async fn process_queue(&mut self, high_priority: bool) {
        self.queue
            .process_queue(&mut self.player, self.search.as_ref(), high_priority)
            .await;
    }
}

/// The per-guild aggregate of voice connection, player and queue.
pub struct Session {
    guild_id: GuildId,
    voice_channel: AtomicU64,
    gateway: Arc<dyn VoiceGateway>,
    resolver: Arc<Resolver>,
    /// The command lane: a fair mutex, so waiters run in FIFO order.
    state: Mutex<SessionState>,
    reconnect: StdMutex<ReconnectPolicy>,
    ready_waiting: AtomicBool,
    empty_check: AtomicBool,
    destroyed: AtomicBool,
    registry: Weak<SessionRegistry>,
}

impl Session {
    /// Assemble a session from its parts. The driver factory receives the
    /// session's own weak handle so track events can find their way back.
    pub fn create(
        guild_id: GuildId,
        voice_channel: ChannelId,
        gateway: Arc<dyn VoiceGateway>,
        resolver: Arc<Resolver>,
        registry: Weak<SessionRegistry>,
        driver_factory: impl FnOnce(Weak<Session>) -> Arc<dyn PlaybackDriver>,
    ) -> Arc<Self> {
        let search = resolver.stream_search();
        Arc::new_cyclic(|weak: &Weak<Session>| {
            let player = PlayerController::new(driver_factory(weak.clone()));
            Session {
                guild_id,
                voice_channel: AtomicU64::new(voice_channel.get()),
                gateway,
                resolver,
                state: Mutex::new(SessionState {
                    queue: SessionQueue::new(),
                    player,
                    search,
                }),
                reconnect: StdMutex::new(ReconnectPolicy::new()),
                ready_waiting: AtomicBool::new(false),
                empty_check: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                registry,
            }
        })
    }

    /// Join the guild's voice channel and build a live session around the
    /// resulting call. Waits up to the readiness timeout; a timeout discards
    /// the partially-created connection.
    pub(crate) async fn connect(
        registry: &Arc<SessionRegistry>,
        ctx: &Context,
        guild_id: GuildId,
        voice_channel: ChannelId,
    ) -> MusicResult<Arc<Self>> {
        let songbird = songbird::get(ctx).await.ok_or(MusicError::NoVoiceManager)?;

        let joined = tokio::time::timeout(READY_TIMEOUT, songbird.join(guild_id, voice_channel)).await;
        let call = match joined {
            Ok(Ok(call)) => call,
            Ok(Err(e)) => {
                let _ = songbird.remove(guild_id).await;
                return Err(MusicError::JoinError(e.to_string()));
            }
            Err(_) => {
                let _ = songbird.remove(guild_id).await;
                return Err(MusicError::JoinError(
                    "Timed out waiting for the voice connection to become ready".to_string(),
                ));
            }
        };

        let gateway = Arc::new(SongbirdGateway::new(songbird, guild_id));
        let driver_call = call.clone();
        let session = Session::create(
            guild_id,
            voice_channel,
            gateway,
            registry.resolver().clone(),
            Arc::downgrade(registry),
            move |weak| {
                Arc::new(SongbirdDriver::new(driver_call, HTTP_CLIENT.clone(), weak))
                    as Arc<dyn PlaybackDriver>
            },
        );

        call.lock().await.add_global_event(
            Event::Core(CoreEvent::DriverDisconnect),
            DriverDisconnectNotifier {
                session: Arc::downgrade(&session),
            },
        );

        info!(
            "Created music session for guild {} in channel {}",
            guild_id, voice_channel
        );
        Ok(session)
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn voice_channel(&self) -> ChannelId {
        ChannelId::new(self.voice_channel.load(Ordering::Relaxed))
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Resolve a query and feed the result into the queue. Runs entirely
    /// inside the command lane, including the resolver's network calls.
    pub async fn play(
        &self,
        request_id: u64,
        query: &str,
        requested_by: String,
        channel_id: ChannelId,
        events: Arc<dyn TrackEvents>,
    ) -> PlayOutcome {
        let mut state = self.state.lock().await;

        let resolution = match self.resolver.resolve(query, &requested_by).await {
            Ok(resolution) => resolution,
            Err(e) => {
                error!("Failed to resolve '{}': {}", query, e);
                return PlayOutcome::ResolveFailed {
                    reason: e.to_string(),
                };
            }
        };

        let was_idle =
            state.player.state() == PlayerState::Idle && state.queue.is_empty();

        match resolution {
            Resolution::NoMatches => PlayOutcome::NoResults {
                query: query.to_string(),
            },
            Resolution::Unsupported => PlayOutcome::Unsupported,
            Resolution::Tracks(tracks) => {
                let Some(first) = tracks.first().cloned() else {
                    return PlayOutcome::NoResults {
                        query: query.to_string(),
                    };
                };
                let count = tracks.len();
                let position = state.queue.pending_len()
                    + usize::from(state.player.has_current())
                    + 1;
                let handler =
                    Handler::loaded(request_id, tracks, requested_by, channel_id, events);
                state.enqueue_and_process(handler).await;

                if count > 1 {
                    PlayOutcome::CollectionQueued {
                        name: format!("{} and {} more", first.title, count - 1),
                        total: count,
                        started: was_idle,
                    }
                } else if was_idle {
                    PlayOutcome::NowPlaying {
                        track: first,
                        queued: count - 1,
                    }
                } else {
                    PlayOutcome::Queued {
                        track: first,
                        position,
                    }
                }
            }
            Resolution::Collection { name, items } => {
                let total = items.len();
                let handler =
                    Handler::deferred(request_id, items, requested_by, channel_id, events);
                state.enqueue_and_process(handler).await;
                PlayOutcome::CollectionQueued {
                    name,
                    total,
                    started: was_idle,
                }
            }
        }
    }

    pub async fn skip(&self, count: usize) -> SkipOutcome {
        let mut state = self.state.lock().await;
        let SessionState { queue, player, .. } = &mut *state;
        let skipped = queue.skip(player, count.max(1)).await;
        if skipped == 0 {
            SkipOutcome::NothingPlaying
        } else {
            SkipOutcome::Skipped { count: skipped }
        }
    }

    pub async fn stop(&self) -> StopOutcome {
        let mut state = self.state.lock().await;
        let SessionState { queue, player, .. } = &mut *state;
        let removed = queue.stop(player).await;
        StopOutcome::Stopped { removed }
    }

    pub async fn pause(&self) -> PauseOutcome {
        let mut state = self.state.lock().await;
        match state.player.state() {
            PlayerState::Paused => PauseOutcome::AlreadyPaused,
            PlayerState::Idle => PauseOutcome::NothingPlaying,
            PlayerState::Playing => match state.player.pause().await {
                Ok(true) => {
                    let track = state.player.current().expect("paused track").clone();
                    track.events.on_pause(&track.metadata, false).await;
                    PauseOutcome::Paused {
                        track: track.metadata,
                    }
                }
                Ok(false) => PauseOutcome::NothingPlaying,
                Err(e) => {
                    warn!("Pause failed for guild {}: {}", self.guild_id, e);
                    PauseOutcome::NothingPlaying
                }
            },
        }
    }

    pub async fn resume(&self) -> ResumeOutcome {
        let mut state = self.state.lock().await;
        match state.player.resume().await {
            Ok(true) => {
                let track = state.player.current().expect("resumed track").clone();
                track.events.on_pause(&track.metadata, true).await;
                ResumeOutcome::Resumed {
                    track: track.metadata,
                }
            }
            Ok(false) => ResumeOutcome::NotPaused,
            Err(e) => {
                warn!("Resume failed for guild {}: {}", self.guild_id, e);
                ResumeOutcome::NotPaused
            }
        }
    }

    /// Snapshot read; serialized through the lane for consistency with the
    /// mutating operations.
    pub async fn list(&self) -> QueueView {
        let state = self.state.lock().await;
        QueueView {
            current: state
                .player
                .current()
                .map(|track| (track.metadata.clone(), state.player.state())),
            upcoming: state.queue.snapshot(),
        }
    }

    /// The driver reported the previous track finished: the Idle transition
    /// that is the sole trigger for dequeuing the next track.
    pub async fn handle_track_end(&self) {
        if self.is_destroyed() {
            return;
        }
        let mut state = self.state.lock().await;
        if let Some(track) = state.player.acknowledge_finished() {
            track.events.on_finish(&track.metadata).await;
        }
        state.process_queue(false).await;
    }

    /// The driver reported a runtime failure: report it and move forward,
    /// never retrying the failed track.
    pub async fn handle_track_error(&self, message: String) {
        if self.is_destroyed() {
            return;
        }
        let mut state = self.state.lock().await;
        if let Some(track) = state.player.acknowledge_finished() {
            let err = MusicError::PlaybackError(message);
            track.events.on_error(&track.metadata, &err).await;
        }
        state.process_queue(true).await;
    }

    /// React to a dropped voice connection per the reconnect policy.
    pub async fn on_driver_disconnect(self: &Arc<Self>, removed_from_channel: bool) {
        if self.is_destroyed() {
            return;
        }

        let action = {
            let mut policy = self.reconnect.lock().expect("reconnect lock poisoned");
            policy.on_disconnect(removed_from_channel)
        };

        match action {
            DisconnectAction::AwaitRecovery(window) => {
                let session = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(window).await;
                    if !session.is_destroyed() && !session.gateway.is_connected().await {
                        info!(
                            "Guild {}: no auto-recovery after channel removal, tearing down",
                            session.guild_id
                        );
                        session.terminate().await;
                    }
                });
            }
            DisconnectAction::Rejoin(delay) => {
                let session = self.clone();
                tokio::spawn(async move {
                    session.rejoin_with_backoff(delay).await;
                });
            }
            DisconnectAction::Destroy => {
                warn!(
                    "Guild {}: rejoin attempts exhausted, destroying connection",
                    self.guild_id
                );
                self.terminate().await;
            }
        }
    }

    async fn rejoin_with_backoff(self: Arc<Self>, initial_delay: std::time::Duration) {
        let mut delay = initial_delay;
        loop {
            tokio::time::sleep(delay).await;
            if self.is_destroyed() {
                return;
            }

            let channel = self.voice_channel();
            match self.gateway.rejoin(channel).await {
                Ok(()) => {
                    info!("Guild {}: rejoined voice channel {}", self.guild_id, channel);
                    self.start_ready_watchdog();
                    return;
                }
                Err(e) => {
                    warn!("Guild {}: rejoin failed: {}", self.guild_id, e);
                    let action = {
                        let mut policy =
                            self.reconnect.lock().expect("reconnect lock poisoned");
                        policy.on_disconnect(false)
                    };
                    match action {
                        DisconnectAction::Rejoin(next) => delay = next,
                        _ => {
                            self.terminate().await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Destroy the connection if it has not become ready within the
    /// readiness timeout. The guard keeps overlapping timers from starting.
    pub fn start_ready_watchdog(self: &Arc<Self>) {
        if self.ready_waiting.swap(true, Ordering::SeqCst) {
            return;
        }
        let session = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(READY_TIMEOUT).await;
            session.ready_waiting.store(false, Ordering::SeqCst);
            if !session.is_destroyed() && !session.gateway.is_connected().await {
                warn!(
                    "Guild {}: voice connection not ready within timeout, destroying",
                    session.guild_id
                );
                session.terminate().await;
            }
        });
    }

    /// The bound voice channel looks empty: wait a short grace window (to
    /// absorb the bot's own channel moves), recount, then tear down.
    pub fn schedule_empty_check<F, Fut>(self: &Arc<Self>, recount: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = usize> + Send,
    {
        if self.empty_check.swap(true, Ordering::SeqCst) {
            return;
        }
        let session = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(EMPTY_CHANNEL_GRACE).await;
            session.empty_check.store(false, Ordering::SeqCst);
            if session.is_destroyed() {
                return;
            }
            if recount().await == 0 {
                info!(
                    "Guild {}: voice channel stayed empty, ending session",
                    session.guild_id
                );
                session.terminate().await;
            }
        });
    }

    /// Tear the session down: stop playback, release every queued handler,
    /// drop the voice connection, and unregister. Idempotent.
    pub async fn terminate(self: &Arc<Self>) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut state = self.state.lock().await;
            let released = state.queue.clear_handlers();
            if state.player.has_current() {
                state.player.stop_current().await;
            }
            state.player.force_idle();
            info!(
                "Guild {}: session terminated, released {} queued track(s)",
                self.guild_id, released
            );
        }

        self.gateway.leave().await;

        if let Some(registry) = self.registry.upgrade() {
            registry.remove_session(self.guild_id);
        }
    }

    /// Mark a session that lost a creation race as dead without touching
    /// the shared voice driver.
    fn abandon(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

/// Maps guilds to sessions and hosts the user-facing operations. Injected
/// into command handlers through the framework's shared data.
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<Session>>,
    resolver: Arc<Resolver>,
    disabled: Arc<AtomicBool>,
    request_ids: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        let disabled = Arc::new(AtomicBool::new(false));
        let resolver = Arc::new(Resolver::new(HTTP_CLIENT.clone(), disabled.clone()));
        Self::with_resolver(resolver, disabled)
    }

    pub fn with_resolver(resolver: Arc<Resolver>, disabled: Arc<AtomicBool>) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            resolver,
            disabled,
            request_ids: AtomicU64::new(1),
        })
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<Session>> {
        self.sessions.get(&guild_id).map(|entry| entry.clone())
    }

    fn remove_session(&self, guild_id: GuildId) {
        self.sessions.remove(&guild_id);
    }

    fn next_request_id(&self) -> u64 {
        self.request_ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Whether new `play` requests are short-circuited by the sticky
    /// throttling flag. Cleared manually, never automatically.
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Relaxed);
    }

    /// Register a freshly-connected session. At most one session may exist
    /// per guild: losing a creation race abandons the newcomer and returns
    /// the established session.
    pub fn adopt_session(&self, session: Arc<Session>) -> Arc<Session> {
        match self.sessions.entry(session.guild_id()) {
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
                session
            }
            Entry::Occupied(existing) => {
                warn!(
                    "Guild {}: session already exists, abandoning the new one",
                    session.guild_id()
                );
                session.abandon();
                existing.get().clone()
            }
        }
    }

    /// The voice channel the user currently occupies.
    pub fn get_user_voice_channel(
        ctx: &Context,
        guild_id: GuildId,
        user_id: UserId,
    ) -> MusicResult<ChannelId> {
        let guild = ctx.cache.guild(guild_id).ok_or(MusicError::NotInGuild)?;

        let voice_state = guild
            .voice_states
            .get(&user_id)
            .ok_or(MusicError::UserNotInVoiceChannel)?;

        voice_state
            .channel_id
            .ok_or(MusicError::UserNotInVoiceChannel)
    }

    /// Verify the bot can see, join and speak in the channel before any
    /// session state is touched.
    pub fn check_voice_permissions(
        ctx: &Context,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> MusicResult<()> {
        let bot_id = ctx.cache.current_user().id;
        let guild = ctx.cache.guild(guild_id).ok_or(MusicError::NotInGuild)?;

        let Some(channel) = guild.channels.get(&channel_id) else {
            return Err(MusicError::MissingPermissions);
        };
        let Some(member) = guild.members.get(&bot_id) else {
            // The bot member is not cached; let the join attempt surface
            // any denial instead of guessing.
            return Ok(());
        };

        let permissions = guild.user_permissions_in(channel, member);
        let required =
            Permissions::VIEW_CHANNEL | Permissions::CONNECT | Permissions::SPEAK;
        if permissions.contains(required) {
            Ok(())
        } else {
            Err(MusicError::MissingPermissions)
        }
    }

    /// Resolve and enqueue a request, creating the session on first use.
    #[allow(clippy::too_many_arguments)]
    pub async fn play(
        self: &Arc<Self>,
        ctx: &Context,
        guild_id: GuildId,
        user_id: UserId,
        requested_by: String,
        text_channel: ChannelId,
        query: &str,
        events: Arc<dyn TrackEvents>,
    ) -> PlayOutcome {
        if self.is_disabled() {
            return PlayOutcome::Disabled;
        }

        let voice_channel = match Self::get_user_voice_channel(ctx, guild_id, user_id) {
            Ok(channel) => channel,
            Err(_) => return PlayOutcome::NotInVoiceChannel,
        };

        if Self::check_voice_permissions(ctx, guild_id, voice_channel).is_err() {
            return PlayOutcome::MissingPermissions;
        }

        let session = match self.get(guild_id) {
            Some(session) => session,
            None => {
                match Session::connect(self, ctx, guild_id, voice_channel).await {
                    Ok(session) => self.adopt_session(session),
                    Err(e) => {
                        error!("Guild {}: failed to create session: {}", guild_id, e);
                        return PlayOutcome::JoinFailed {
                            reason: e.to_string(),
                        };
                    }
                }
            }
        };

        session
            .play(
                self.next_request_id(),
                query,
                requested_by,
                text_channel,
                events,
            )
            .await
    }

    pub async fn skip(&self, guild_id: GuildId, count: usize) -> SkipOutcome {
        match self.get(guild_id) {
            Some(session) => session.skip(count).await,
            None => SkipOutcome::NoSession,
        }
    }

    pub async fn stop(&self, guild_id: GuildId) -> StopOutcome {
        match self.get(guild_id) {
            Some(session) => session.stop().await,
            None => StopOutcome::NoSession,
        }
    }

    pub async fn pause(&self, guild_id: GuildId) -> PauseOutcome {
        match self.get(guild_id) {
            Some(session) => session.pause().await,
            None => PauseOutcome::NoSession,
        }
    }

    pub async fn resume(&self, guild_id: GuildId) -> ResumeOutcome {
        match self.get(guild_id) {
            Some(session) => session.resume().await,
            None => ResumeOutcome::NoSession,
        }
    }

    pub async fn list(&self, guild_id: GuildId) -> ListOutcome {
        match self.get(guild_id) {
            Some(session) => ListOutcome::Queue(session.list().await),
            None => ListOutcome::NoSession,
        }
    }

    pub async fn disconnect(&self, guild_id: GuildId) -> DisconnectOutcome {
        match self.get(guild_id) {
            Some(session) => {
                session.terminate().await;
                DisconnectOutcome::Disconnected
            }
            None => DisconnectOutcome::NoSession,
        }
    }
}
