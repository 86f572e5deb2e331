//! # Tempo Bot
//!
//! Per-guild Discord music playback: one session per server with its own
//! queue, playback driver, playlist prefetch and idle/alone supervision.
//!
//! - [`audio`] - Sessions, queue engine, playback driver and voice transport
//! - [`sources`] - Track and playlist resolution through yt-dlp
//! - [`audit`] - Structured notifications for the admin log channel
//! - [`bot`] - Serenity event handler and slash commands
//! - [`ui`] - Discord embeds

pub mod audio;
pub mod audit;
pub mod bot;
pub mod config;
pub mod error;
pub mod sources;
pub mod ui;
