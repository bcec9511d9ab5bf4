use std::sync::{Arc, LazyLock};

pub mod commands;
pub mod events;
pub mod utils;

use commands::music::utils::session_manager::SessionRegistry;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
pub type CommandResult = Result<(), Error>;

/// User data, which is stored and accessible in all command invocations.
pub struct Data {
    pub registry: Arc<SessionRegistry>,
}

/// Shared HTTP client for external API calls and audio stream fetching.
pub static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(reqwest::Client::new);
