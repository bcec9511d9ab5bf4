//! Persistent per-guild music settings, stored in SQLite.

use rusqlite::{Connection, OptionalExtension, Result as SqlResult, params};
use serenity::model::id::GuildId;
use std::sync::Once;
use tracing::warn;

pub const DB_PATH: &str = "guild_settings.db";
static DB_INIT: Once = Once::new();

/// The music configuration row for one guild.
#[derive(Debug, Clone, PartialEq)]
pub struct GuildMusicSettings {
    /// Whether music commands are enabled in this guild.
    pub enabled: bool,
    /// Text channel playback UI is posted to; `None` means the invoking
    /// channel.
    pub channel_id: Option<u64>,
    /// Message prefixes the text-command layer ignores.
    pub ignored_prefixes: Vec<String>,
}

impl Default for GuildMusicSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            channel_id: None,
            ignored_prefixes: Vec::new(),
        }
    }
}

pub fn init_db() -> SqlResult<()> {
    DB_INIT.call_once(|| {
        if let Err(e) = Connection::open(DB_PATH).and_then(|conn| create_tables(&conn)) {
            eprintln!("Failed to create database tables: {}", e);
        }
    });
    Ok(())
}

fn create_tables(conn: &Connection) -> SqlResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS guild_music_settings (
            guild_id INTEGER PRIMARY KEY,
            enabled BOOLEAN NOT NULL DEFAULT 1,
            channel_id INTEGER,
            ignored_prefixes TEXT NOT NULL DEFAULT '[]'
        )",
        [],
    )?;
    Ok(())
}

fn get_settings_on(conn: &Connection, guild_id: GuildId) -> SqlResult<GuildMusicSettings> {
    let row = conn
        .query_row(
            "SELECT enabled, channel_id, ignored_prefixes
             FROM guild_music_settings WHERE guild_id = ?1",
            params![guild_id.get() as i64],
            |row| {
                let enabled: bool = row.get(0)?;
                let channel_id: Option<i64> = row.get(1)?;
                let prefixes: String = row.get(2)?;
                Ok((enabled, channel_id, prefixes))
            },
        )
        .optional()?;

    Ok(match row {
        Some((enabled, channel_id, prefixes)) => GuildMusicSettings {
            enabled,
            channel_id: channel_id.map(|id| id as u64),
            ignored_prefixes: serde_json::from_str(&prefixes).unwrap_or_default(),
        },
        None => GuildMusicSettings::default(),
    })
}

fn ensure_row_on(conn: &Connection, guild_id: GuildId) -> SqlResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO guild_music_settings (guild_id) VALUES (?1)",
        params![guild_id.get() as i64],
    )?;
    Ok(())
}

fn set_enabled_on(conn: &Connection, guild_id: GuildId, enabled: bool) -> SqlResult<()> {
    ensure_row_on(conn, guild_id)?;
    conn.execute(
        "UPDATE guild_music_settings SET enabled = ?2 WHERE guild_id = ?1",
        params![guild_id.get() as i64, enabled],
    )?;
    Ok(())
}

fn set_channel_on(conn: &Connection, guild_id: GuildId, channel_id: Option<u64>) -> SqlResult<()> {
    ensure_row_on(conn, guild_id)?;
    conn.execute(
        "UPDATE guild_music_settings SET channel_id = ?2 WHERE guild_id = ?1",
        params![guild_id.get() as i64, channel_id.map(|id| id as i64)],
    )?;
    Ok(())
}

fn set_prefixes_on(conn: &Connection, guild_id: GuildId, prefixes: &[String]) -> SqlResult<()> {
    ensure_row_on(conn, guild_id)?;
    let serialized = serde_json::to_string(prefixes).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "UPDATE guild_music_settings SET ignored_prefixes = ?2 WHERE guild_id = ?1",
        params![guild_id.get() as i64, serialized],
    )?;
    Ok(())
}

pub fn get_guild_settings(guild_id: GuildId) -> SqlResult<GuildMusicSettings> {
    let conn = Connection::open(DB_PATH)?;
    get_settings_on(&conn, guild_id)
}

/// Settings lookup that never fails the caller: storage errors fall back to
/// the defaults.
pub fn guild_settings_or_default(guild_id: GuildId) -> GuildMusicSettings {
    match get_guild_settings(guild_id) {
        Ok(settings) => settings,
        Err(e) => {
            warn!("Failed to load settings for guild {}: {}", guild_id, e);
            GuildMusicSettings::default()
        }
    }
}

pub fn set_music_enabled(guild_id: GuildId, enabled: bool) -> SqlResult<()> {
    let conn = Connection::open(DB_PATH)?;
    set_enabled_on(&conn, guild_id, enabled)
}

pub fn set_bound_channel(guild_id: GuildId, channel_id: Option<u64>) -> SqlResult<()> {
    let conn = Connection::open(DB_PATH)?;
    set_channel_on(&conn, guild_id, channel_id)
}

pub fn set_ignored_prefixes(guild_id: GuildId, prefixes: &[String]) -> SqlResult<()> {
    let conn = Connection::open(DB_PATH)?;
    set_prefixes_on(&conn, guild_id, prefixes)
}
