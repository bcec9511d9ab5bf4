//! Common test utilities, fixtures, and fakes shared by the scenario tests.

pub mod fixtures;
pub mod mocks;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use cadence::commands::music::audio_sources::{CatalogProvider, Resolver, StreamSearch};
use cadence::commands::music::utils::player::PlaybackDriver;
use cadence::commands::music::utils::session_manager::{Session, SessionRegistry};
use cadence::commands::music::utils::voice::VoiceGateway;
use serenity::model::id::{ChannelId, GuildId};

pub const TEST_GUILD: u64 = 101;
pub const TEST_VOICE_CHANNEL: u64 = 201;

/// Wire a registry and a registered session out of fakes.
pub fn session_with(
    search: Arc<dyn StreamSearch>,
    catalogs: Vec<Arc<dyn CatalogProvider>>,
    gateway: Arc<dyn VoiceGateway>,
    driver: Arc<dyn PlaybackDriver>,
) -> (Arc<SessionRegistry>, Arc<Session>) {
    let disabled = Arc::new(AtomicBool::new(false));
    let resolver = Arc::new(Resolver::with_sources(search, catalogs, disabled.clone()));
    let registry = SessionRegistry::with_resolver(resolver, disabled);

    let session = Session::create(
        GuildId::new(TEST_GUILD),
        ChannelId::new(TEST_VOICE_CHANNEL),
        gateway,
        registry.resolver().clone(),
        Arc::downgrade(&registry),
        move |_| driver,
    );
    let session = registry.adopt_session(session);

    (registry, session)
}
