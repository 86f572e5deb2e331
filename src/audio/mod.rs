//! # Audio Module
//!
//! Per-guild playback orchestration for Tempo Bot.
//!
//! This module provides the core playback functionality including:
//! - One playback session per guild, created on first use
//! - Queue management with loop modes, history and skip votes
//! - Background playlist prefetch with back-pressure
//! - Idle and alone supervision with a single teardown path
//!
//! ## Architecture
//!
//! ### [`player`] - Session Registry
//! - Routes commands to the right guild session
//! - Owns the reaper that acts on expired timers
//!
//! ### [`session`] - Guild Session
//! - Exclusive-lock state: queue, accounting, link, active track
//! - Teardown that cancels and awaits every owned task
//!
//! ### [`driver`] - Playback Driver
//! - Mailbox-driven, one task per session
//! - Advances the queue on completion and ignores stale completions
//!
//! ### [`transport`] - Voice Transport
//! - Songbird-backed streaming with completion notifiers
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serenity::all::{GuildId, UserId};
//! use tempo_bot::audio::{player::AudioPlayer, session::SessionSettings, track::Requester};
//! use tempo_bot::{audit::TracingAuditSink, config::Config, sources::YtDlpResolver};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let player = AudioPlayer::new(
//!     SessionSettings::from(&config),
//!     Arc::new(YtDlpResolver::new(&config)),
//!     Arc::new(TracingAuditSink),
//! );
//! let guild_id = GuildId::new(123456789);
//! let dj = Requester::new(UserId::new(1), "dj");
//!
//! // Requiere una conexión de voz previa (`AudioPlayer::connect`)
//! player.play(guild_id, "never gonna give you up", dj.clone()).await?;
//! player.pause(guild_id, &dj).await?;
//! player.resume(guild_id, &dj).await?;
//! player.skip(guild_id, &dj).await?;
//! # Ok(())
//! # }
//! ```

pub mod accounting;
pub mod driver;
pub mod player;
pub mod playlist;
pub mod queue;
pub mod session;
pub mod supervisor;
pub mod track;
pub mod transport;

#[cfg(test)]
pub mod testing;

pub use player::{AudioPlayer, PlayOutcome};
pub use queue::LoopMode;
pub use session::SessionSettings;
pub use supervisor::TeardownReason;
pub use track::{Requester, Track};
