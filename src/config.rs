use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo
    pub admin_log_channel_id: Option<u64>,

    // Audio
    pub default_volume: f32,
    pub history_limit: usize,
    pub skip_vote_ratio: f64,
    pub download_first: bool,
    pub ffmpeg_path: String,
    pub ytdlp_path: String,

    // Supervisión (segundos)
    pub idle_timeout: u64,
    pub alone_timeout: u64,

    // Prefetch de playlists
    pub prefetch_queue_threshold: usize,
    pub prefetch_poll_ms: u64,

    // Rendimiento
    pub worker_threads: usize,

    // Paths
    pub cache_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),
            admin_log_channel_id: std::env::var("ADMIN_LOG_CHANNEL_ID")
                .ok()
                .and_then(|s| s.parse().ok()),

            // Audio
            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "0.5".to_string())
                .parse()?,
            history_limit: std::env::var("HISTORY_LIMIT")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
            skip_vote_ratio: std::env::var("SKIP_VOTE_RATIO")
                .unwrap_or_else(|_| "0.5".to_string())
                .parse()?,
            download_first: std::env::var("DOWNLOAD_FIRST_MODE")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),

            // Supervisión
            idle_timeout: std::env::var("QUEUE_TIMEOUT")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,
            alone_timeout: std::env::var("ALONE_TIMEOUT")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,

            // Prefetch
            prefetch_queue_threshold: std::env::var("PREFETCH_QUEUE_THRESHOLD")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,
            prefetch_poll_ms: std::env::var("PREFETCH_POLL_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,

            // Rendimiento
            worker_threads: match std::env::var("WORKER_THREADS") {
                Ok(val) if !val.trim().is_empty() => val.parse()?,
                _ => num_cpus::get(),
            },

            // Paths
            cache_dir: std::env::var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
        };

        std::fs::create_dir_all(&config.cache_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0.0 and 2.0
    /// - Both supervisor timeouts must be greater than zero
    /// - The prefetch threshold and poll interval must be greater than zero
    /// - The skip vote ratio must be in (0, 1]
    pub fn validate(&self) -> Result<()> {
        if self.default_volume < 0.0 || self.default_volume > 2.0 {
            anyhow::bail!("Default volume must be between 0.0 and 2.0, got: {}", self.default_volume);
        }

        if self.idle_timeout == 0 {
            anyhow::bail!("Idle timeout must be greater than 0");
        }

        if self.alone_timeout == 0 {
            anyhow::bail!("Alone timeout must be greater than 0");
        }

        if self.prefetch_queue_threshold == 0 {
            anyhow::bail!("Prefetch queue threshold must be greater than 0");
        }

        if self.prefetch_poll_ms == 0 {
            anyhow::bail!("Prefetch poll interval must be greater than 0");
        }

        if !(self.skip_vote_ratio > 0.0 && self.skip_vote_ratio <= 1.0) {
            anyhow::bail!("Skip vote ratio must be in (0, 1], got: {}", self.skip_vote_ratio);
        }

        if self.worker_threads == 0 {
            anyhow::bail!("Worker threads must be greater than 0");
        }

        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    pub fn alone_timeout(&self) -> Duration {
        Duration::from_secs(self.alone_timeout)
    }

    pub fn prefetch_poll(&self) -> Duration {
        Duration::from_millis(self.prefetch_poll_ms)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the Discord token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {}, Admin log: {})\n  \
            Audio: {}% vol, download-first={}, history={}\n  \
            Supervisor: idle {}s, alone {}s\n  \
            Prefetch: threshold {}, poll {}ms, {} resolver workers",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.admin_log_channel_id.map_or("off".to_string(), |id| id.to_string()),
            (self.default_volume * 100.0) as u32,
            self.download_first,
            self.history_limit,
            self.idle_timeout,
            self.alone_timeout,
            self.prefetch_queue_threshold,
            self.prefetch_poll_ms,
            self.worker_threads,
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,
            admin_log_channel_id: None,

            // Audio defaults
            default_volume: 0.5,
            history_limit: 50,
            skip_vote_ratio: 0.5,
            download_first: true,
            ffmpeg_path: "ffmpeg".to_string(),
            ytdlp_path: "yt-dlp".to_string(),

            // Supervisor defaults
            idle_timeout: 300, // 5 minutos
            alone_timeout: 60,

            // Prefetch defaults
            prefetch_queue_threshold: 20,
            prefetch_poll_ms: 1000, // 1 Hz

            worker_threads: num_cpus::get(),

            cache_dir: std::env::temp_dir().join("tempo_bot_audio"),
        }
    }
}
