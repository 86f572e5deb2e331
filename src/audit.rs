//! # Audit Module
//!
//! Discrete notifications about what each guild session does.
//!
//! Sinks are fire-and-forget: [`AuditSink::notify`] never blocks and never
//! reports failure back to the caller, so a broken log channel cannot affect
//! playback.

use serenity::{
    builder::CreateMessage,
    http::Http,
    model::id::{ChannelId, GuildId},
};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

use crate::audio::{accounting::SessionSummary, track::Requester};

#[derive(Debug, Clone, PartialEq)]
pub enum AuditRecord {
    TrackStarted {
        guild: GuildId,
        title: String,
        url: String,
        requester: Requester,
        duration: Option<Duration>,
        position: usize,
        local: bool,
    },
    TrackSkipped {
        guild: GuildId,
        title: String,
        by: Requester,
        votes: Option<(usize, usize)>,
    },
    PlaybackAction {
        guild: GuildId,
        action: String,
        by: Requester,
    },
    QueueChanged {
        guild: GuildId,
        action: String,
        detail: String,
        by: Option<Requester>,
    },
    VoiceJoined {
        guild: GuildId,
        channel: ChannelId,
    },
    VoiceLeft {
        guild: GuildId,
        reason: String,
    },
    Error {
        guild: GuildId,
        context: String,
        error: String,
    },
    SessionSummary {
        guild: GuildId,
        summary: SessionSummary,
    },
    PlaylistAdded {
        guild: GuildId,
        title: String,
        total: usize,
        by: Requester,
    },
    PlaylistCompleted {
        guild: GuildId,
        title: String,
        total: usize,
    },
    PlaylistStopped {
        guild: GuildId,
        title: String,
        remaining: usize,
        by: Requester,
    },
    AloneInChannel {
        guild: GuildId,
        grace: Duration,
    },
}

impl AuditRecord {
    pub fn guild(&self) -> GuildId {
        match self {
            AuditRecord::TrackStarted { guild, .. }
            | AuditRecord::TrackSkipped { guild, .. }
            | AuditRecord::PlaybackAction { guild, .. }
            | AuditRecord::QueueChanged { guild, .. }
            | AuditRecord::VoiceJoined { guild, .. }
            | AuditRecord::VoiceLeft { guild, .. }
            | AuditRecord::Error { guild, .. }
            | AuditRecord::SessionSummary { guild, .. }
            | AuditRecord::PlaylistAdded { guild, .. }
            | AuditRecord::PlaylistCompleted { guild, .. }
            | AuditRecord::PlaylistStopped { guild, .. }
            | AuditRecord::AloneInChannel { guild, .. } => *guild,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuditRecord::TrackStarted { .. } => "track_started",
            AuditRecord::TrackSkipped { .. } => "track_skipped",
            AuditRecord::PlaybackAction { .. } => "playback_action",
            AuditRecord::QueueChanged { .. } => "queue_changed",
            AuditRecord::VoiceJoined { .. } => "voice_joined",
            AuditRecord::VoiceLeft { .. } => "voice_left",
            AuditRecord::Error { .. } => "error",
            AuditRecord::SessionSummary { .. } => "session_summary",
            AuditRecord::PlaylistAdded { .. } => "playlist_added",
            AuditRecord::PlaylistCompleted { .. } => "playlist_completed",
            AuditRecord::PlaylistStopped { .. } => "playlist_stopped",
            AuditRecord::AloneInChannel { .. } => "alone_in_channel",
        }
    }
}

/// Receptor de eventos de auditoría
pub trait AuditSink: Send + Sync {
    fn notify(&self, record: AuditRecord);
}

/// Escribe cada evento como una línea de log estructurada
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn notify(&self, record: AuditRecord) {
        let guild = record.guild();
        match &record {
            AuditRecord::TrackStarted {
                title,
                requester,
                position,
                ..
            } => info!(
                audit = record.kind(),
                "🎵 [{}] #{} {} (pedido por {})", guild, position, title, requester.name
            ),
            AuditRecord::Error { context, error, .. } => warn!(
                audit = record.kind(),
                "❌ [{}] {}: {}", guild, context, error
            ),
            AuditRecord::SessionSummary { summary, .. } => info!(
                audit = record.kind(),
                "📊 [{}] sesión terminada: {} canciones, {:?} escuchado",
                guild,
                summary.track_count,
                summary.total_listened
            ),
            other => info!(audit = other.kind(), "📝 [{}] {:?}", guild, other),
        }
    }
}

/// Publica los eventos como embeds en el canal de administración.
pub struct DiscordAuditSink {
    http: Arc<Http>,
    channel: ChannelId,
}

impl DiscordAuditSink {
    pub fn new(http: Arc<Http>, channel: ChannelId) -> Self {
        Self { http, channel }
    }
}

impl AuditSink for DiscordAuditSink {
    fn notify(&self, record: AuditRecord) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("📝 Sin runtime para publicar auditoría {}", record.kind());
            return;
        };

        let http = self.http.clone();
        let channel = self.channel;
        runtime.spawn(async move {
            let embed = crate::ui::embeds::create_audit_embed(&record);
            let message = CreateMessage::new().embed(embed);
            if let Err(e) = channel.send_message(&http, message).await {
                error!(
                    "📝 No se pudo publicar auditoría {} en {}: {}",
                    record.kind(),
                    channel,
                    e
                );
            }
        });
    }
}

/// Reparte cada evento entre varios receptores
#[derive(Default)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for FanoutAuditSink {
    fn notify(&self, record: AuditRecord) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.notify(record.clone());
            }
            last.notify(record);
        }
    }
}
