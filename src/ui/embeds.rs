use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{
    audio::{
        accounting::SessionSummary,
        queue::{LoopMode, PlaylistContext, QueueInfo},
        session::{SessionSnapshot, VoteOutcome},
        track::Track,
    },
    audit::AuditRecord,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Tempo Bot";

const QUEUE_PAGE_SIZE: usize = 10;
const TITLE_MAX_CHARS: usize = 60;

/// Crea un embed para mostrar la canción actual
pub fn create_now_playing_embed(snapshot: &SessionSnapshot) -> CreateEmbed {
    let Some(track) = &snapshot.current else {
        return create_info_embed("Nada sonando", "💡 Usa `/play <canción>` para agregar música");
    };

    let title = if snapshot.paused {
        "⏸️ En Pausa"
    } else {
        "🎵 Reproduciendo Ahora"
    };

    let mut embed = CreateEmbed::default()
        .title(title)
        .description(format!("**{}**", track.title()))
        .color(colors::SUCCESS_GREEN)
        .field("🎤 Artista", track.uploader(), true)
        .field("⏱️ Progreso", progress_label(snapshot.elapsed, track.duration()), true)
        .field("👤 Solicitado por", format!("<@{}>", track.requester().id), true)
        .field("🔁 Loop", snapshot.loop_mode.label(), true)
        .field("🔊 Volumen", format!("{}%", (snapshot.volume * 100.0) as u32), true)
        .field("📋 En cola", snapshot.queue_len.to_string(), true);

    if let Some(playlist) = &snapshot.playlist {
        embed = embed.field(
            "📜 Playlist",
            format!(
                "{} ({}/{})",
                playlist.title, playlist.track_index, playlist.total_count
            ),
            false,
        );
    }

    if let Some(next) = snapshot.upcoming.first() {
        embed = embed.field("⏭️ Siguiente", truncate(next.title()), false);
    }

    if let Some(thumbnail) = track.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .url(track.url())
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para mostrar que se agregó una canción
pub fn create_track_added_embed(track: &Track, position: usize) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("✅ Canción Agregada")
        .description(format!("**{}**", track.title()))
        .color(colors::SUCCESS_GREEN)
        .field("🎤 Artista", track.uploader(), true)
        .field("⏱️ Duración", track.duration_label(), true)
        .field("📍 Posición", position.to_string(), true);

    if track.is_local() {
        embed = embed.field("💾 Modo", "Descargada", true);
    }

    if let Some(thumbnail) = track.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .url(track.url())
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(
            "🎵 Se reproducirá automáticamente si no hay música sonando",
        ))
}

/// Crea un embed para mostrar que una playlist fue agregada
pub fn create_playlist_added_embed(context: &PlaylistContext, first: Option<&Track>) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Playlist Agregada")
        .description(format!("**{}**", context.title))
        .color(colors::MUSIC_PURPLE)
        .field("📊 Canciones", context.total_count.to_string(), true)
        .field("⏱️ Duración total", format_duration(context.total_duration), true)
        .field("👤 Agregada por", format!("<@{}>", context.added_by.id), true);

    embed = match first {
        Some(track) => embed.field("▶️ Primera", truncate(track.title()), false),
        None => embed.field("⚠️ Primera", "No disponible, se continúa con el resto", false),
    };

    embed
        .footer(CreateEmbedFooter::new(
            "🔄 El resto se agrega en segundo plano • Usa /pl-info para ver el progreso",
        ))
        .timestamp(Timestamp::now())
}

pub fn create_playlist_info_embed(context: &PlaylistContext, queued: usize) -> CreateEmbed {
    let remaining = context.total_count.saturating_sub(context.track_index);

    CreateEmbed::default()
        .title("📜 Playlist Activa")
        .description(format!("**{}**", context.title))
        .color(colors::MUSIC_PURPLE)
        .field(
            "📍 Progreso",
            format!("{}/{}", context.track_index, context.total_count),
            true,
        )
        .field("⏳ Restantes", remaining.to_string(), true)
        .field("📋 En cola", queued.to_string(), true)
        .field("⏱️ Duración total", format_duration(context.total_duration), true)
        .field("👤 Agregada por", format!("<@{}>", context.added_by.id), true)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para mostrar la cola de reproducción
pub fn create_queue_embed(queue_info: &QueueInfo, page: usize) -> CreateEmbed {
    let queue_page = queue_info.page(page, QUEUE_PAGE_SIZE);

    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE);

    if queue_page.total_items == 0 && queue_info.current.is_none() {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `/play <canción>` para agregar música")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    // Canción actual
    if let Some(current) = &queue_info.current {
        let status = match queue_info.loop_mode {
            LoopMode::Track => "🔂",
            LoopMode::Queue => "🔁",
            LoopMode::Off => "▶️",
        };

        embed = embed.field(
            format!("{} Reproduciendo", status),
            format!("**{}** - {}", truncate(current.title()), current.uploader()),
            false,
        );
    }

    // Próximas canciones
    if !queue_page.items.is_empty() {
        let description: String = queue_page
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                format!(
                    "**{}**. {} `[{}]`\n",
                    queue_page.offset + i + 1,
                    truncate(item.title()),
                    item.duration_label()
                )
            })
            .collect();

        embed = embed.field("Próximas canciones", description, false);
    }

    let mut info = format!("**Total:** {} canciones", queue_page.total_items);
    if queue_info.total_duration > Duration::ZERO {
        info.push_str(&format!(
            " • **Duración:** {}",
            format_duration(queue_info.total_duration)
        ));
    }
    embed = embed.field("Información", info, false);

    // Paginación
    if queue_page.total_pages > 1 {
        embed = embed.footer(CreateEmbedFooter::new(format!(
            "Página {} de {} • Tempo Bot",
            queue_page.current_page, queue_page.total_pages
        )));
    } else {
        embed = embed.footer(CreateEmbedFooter::new(STANDARD_FOOTER));
    }

    embed.timestamp(Timestamp::now())
}

/// Historial, del más reciente al más antiguo
pub fn create_history_embed(history: &[Track]) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title("🕘 Historial")
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now());

    if history.is_empty() {
        return embed
            .description("Todavía no sonó nada en esta sesión")
            .color(colors::NEUTRAL_GRAY);
    }

    let description: String = history
        .iter()
        .take(QUEUE_PAGE_SIZE)
        .enumerate()
        .map(|(i, track)| {
            format!(
                "**{}**. {} • <@{}>\n",
                i + 1,
                truncate(track.title()),
                track.requester().id
            )
        })
        .collect();

    embed.description(description)
}

pub fn create_summary_embed(summary: &SessionSummary) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📊 Resumen de la Sesión")
        .color(colors::MUSIC_PURPLE)
        .field("🎵 Canciones", summary.track_count.to_string(), true)
        .field("⏱️ Duración", humantime::format_duration(whole_seconds(summary.session_duration)).to_string(), true)
        .field("🎧 Escuchado", format_duration(summary.total_listened), true);

    if let Some(reason) = &summary.ended_reason {
        embed = embed.field("🚪 Fin", reason.as_str(), true);
    }

    if !summary.recent.is_empty() {
        let recent: String = summary
            .recent
            .iter()
            .rev()
            .map(|record| {
                format!(
                    "• {} • {} ({})\n",
                    record.started_at.format("%H:%M"),
                    truncate(&record.title),
                    record.requester_name
                )
            })
            .collect();
        embed = embed.field("🕘 Últimas", recent, false);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_vote_embed(track: &Track, outcome: &VoteOutcome) -> CreateEmbed {
    if outcome.passed {
        return create_success_embed(
            "Votación Aprobada",
            &format!(
                "Saltando **{}** ({}/{} votos)",
                track.title(),
                outcome.votes,
                outcome.needed
            ),
        );
    }

    create_info_embed(
        "Voto Registrado",
        &format!(
            "**{}/{}** votos para saltar **{}**",
            outcome.votes,
            outcome.needed,
            track.title()
        ),
    )
}

/// Embed para el canal de logs de administración
pub fn create_audit_embed(record: &AuditRecord) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(format!("Guild {}", record.guild())));

    match record {
        AuditRecord::TrackStarted {
            title,
            url,
            requester,
            duration,
            position,
            local,
            ..
        } => embed
            .title("🎵 Reproduciendo")
            .description(format!("**{}**", title))
            .url(url)
            .color(colors::SUCCESS_GREEN)
            .field("👤 Solicitado por", requester.name.as_str(), true)
            .field(
                "⏱️ Duración",
                duration.map(format_duration).unwrap_or_else(|| "🔴 En vivo".to_string()),
                true,
            )
            .field("#️⃣ Sesión", position.to_string(), true)
            .field("💾 Origen", if *local { "Descarga" } else { "Stream" }, true),
        AuditRecord::TrackSkipped {
            title, by, votes, ..
        } => {
            let detail = match votes {
                Some((votes, needed)) => format!("por votación ({}/{})", votes, needed),
                None => format!("por {}", by.name),
            };
            embed
                .title("⏭️ Canción Saltada")
                .description(format!("**{}** {}", title, detail))
                .color(colors::INFO_BLUE)
        }
        AuditRecord::PlaybackAction { action, by, .. } => embed
            .title("🎛️ Control de Reproducción")
            .description(format!("`{}` por {}", action, by.name))
            .color(colors::INFO_BLUE),
        AuditRecord::QueueChanged {
            action, detail, by, ..
        } => {
            let who = by
                .as_ref()
                .map(|r| format!(" por {}", r.name))
                .unwrap_or_default();
            embed
                .title("📋 Cola Modificada")
                .description(format!("`{}`: {}{}", action, detail, who))
                .color(colors::NEUTRAL_GRAY)
        }
        AuditRecord::VoiceJoined { channel, .. } => embed
            .title("🔊 Conectado")
            .description(format!("Canal <#{}>", channel))
            .color(colors::SUCCESS_GREEN),
        AuditRecord::VoiceLeft { reason, .. } => embed
            .title("👋 Desconectado")
            .description(format!("Motivo: {}", reason))
            .color(colors::NEUTRAL_GRAY),
        AuditRecord::Error { context, error, .. } => embed
            .title("❌ Error")
            .description(format!("**{}**\n```{}```", context, error))
            .color(colors::ERROR_RED),
        AuditRecord::SessionSummary { summary, .. } => create_summary_embed(summary)
            .footer(CreateEmbedFooter::new(format!("Guild {}", record.guild()))),
        AuditRecord::PlaylistAdded {
            title, total, by, ..
        } => embed
            .title("📋 Playlist Agregada")
            .description(format!("**{}** ({} canciones) por {}", title, total, by.name))
            .color(colors::MUSIC_PURPLE),
        AuditRecord::PlaylistCompleted { title, total, .. } => embed
            .title("✅ Playlist Completada")
            .description(format!("**{}** ({} canciones)", title, total))
            .color(colors::MUSIC_PURPLE),
        AuditRecord::PlaylistStopped {
            title,
            remaining,
            by,
            ..
        } => embed
            .title("⏹️ Playlist Detenida")
            .description(format!(
                "**{}** por {}, {} canciones descartadas",
                title, by.name, remaining
            ))
            .color(colors::WARNING_ORANGE),
        AuditRecord::AloneInChannel { grace, .. } => embed
            .title("👤 Solo en el Canal")
            .description(format!(
                "Desconexión en {} si nadie vuelve",
                humantime::format_duration(*grace)
            ))
            .color(colors::WARNING_ORANGE),
    }
}

/// Crea un embed de error
pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de éxito
pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de información
pub fn create_info_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("ℹ️ {}", title))
        .description(description)
        .color(colors::INFO_BLUE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de volumen con indicador visual
pub fn create_volume_embed(volume: f32) -> CreateEmbed {
    let percent = (volume * 100.0).round() as u32;
    let status_emoji = match percent {
        0 => "🔇",
        1..=50 => "🔉",
        _ => "🔊",
    };

    CreateEmbed::default()
        .title(format!("{} Volumen: {}%", status_emoji, percent))
        .field("📊 Nivel", volume_bar(volume), false)
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new("💡 Rango 0-200 (100 = normal)"))
        .timestamp(Timestamp::now())
}

/// Barra visual de volumen, 10 segmentos por cada 100%
fn volume_bar(volume: f32) -> String {
    let segments = 20;
    let filled = ((volume * 10.0).round() as usize).min(segments);
    let bar = "█".repeat(filled) + &"▒".repeat(segments - filled);
    format!("`[{}]`", bar)
}

fn progress_label(elapsed: Option<Duration>, duration: Option<Duration>) -> String {
    match (elapsed, duration) {
        (Some(elapsed), Some(duration)) => format!(
            "{} / {}",
            format_duration(elapsed),
            format_duration(duration)
        ),
        (Some(elapsed), None) => format!("{} • 🔴 En vivo", format_duration(elapsed)),
        (None, Some(duration)) => format!("⏳ / {}", format_duration(duration)),
        (None, None) => "⏳".to_string(),
    }
}

fn whole_seconds(duration: Duration) -> Duration {
    Duration::from_secs(duration.as_secs())
}

fn truncate(title: &str) -> String {
    if title.chars().count() <= TITLE_MAX_CHARS {
        return title.to_string();
    }
    let cut: String = title.chars().take(TITLE_MAX_CHARS - 1).collect();
    format!("{}…", cut)
}

/// Formatea una duración en formato legible
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn format_duration_switches_to_hours() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0:00");
        assert_eq!(format_duration(Duration::from_secs(185)), "3:05");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1:02:05");
    }

    #[test]
    fn volume_bar_caps_at_two_hundred_percent() {
        assert_eq!(volume_bar(0.0), format!("`[{}]`", "▒".repeat(20)));
        assert_eq!(volume_bar(1.0), format!("`[{}{}]`", "█".repeat(10), "▒".repeat(10)));
        assert_eq!(volume_bar(5.0), format!("`[{}]`", "█".repeat(20)));
    }

    #[test]
    fn long_titles_are_truncated() {
        let long = "a".repeat(100);
        let cut = truncate(&long);
        assert_eq!(cut.chars().count(), TITLE_MAX_CHARS);
        assert!(cut.ends_with('…'));
        assert_eq!(truncate("corto"), "corto");
    }

    #[test]
    fn progress_label_handles_live_streams() {
        assert_eq!(
            progress_label(Some(Duration::from_secs(65)), Some(Duration::from_secs(200))),
            "1:05 / 3:20"
        );
        assert_eq!(progress_label(Some(Duration::from_secs(5)), None), "0:05 • 🔴 En vivo");
    }
}
