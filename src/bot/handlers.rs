use anyhow::Result;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use crate::{
    audio::{player::PlayOutcome, queue::LoopMode, track::Requester},
    bot::TempoBot,
    ui::embeds,
};

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &TempoBot) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        return respond(
            ctx,
            &command,
            embeds::create_error_embed("Fuera de un servidor", "Este comando solo funciona en servidores"),
            true,
        )
        .await;
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    let requester = Requester::new(command.user.id, command.user.display_name());

    // play y join pueden tardar: se difiere la respuesta
    if matches!(command.data.name.as_str(), "play" | "join") {
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
            )
            .await?;

        let embed = match command.data.name.as_str() {
            "play" => handle_play(ctx, &command, bot, guild_id, requester).await,
            _ => handle_join(ctx, &command, bot, guild_id).await,
        }
        .unwrap_or_else(|e| {
            warn!("⚠️ /{} falló en guild {}: {}", command.data.name, guild_id, e);
            embeds::create_error_embed("No se pudo completar", &e.to_string())
        });

        command
            .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
            .await?;
        return Ok(());
    }

    match run_command(ctx, &command, bot, guild_id, &requester).await {
        Ok(embed) => respond(ctx, &command, embed, false).await,
        Err(e) => {
            warn!("⚠️ /{} falló en guild {}: {}", command.data.name, guild_id, e);
            respond(
                ctx,
                &command,
                embeds::create_error_embed("No se pudo completar", &e.to_string()),
                true,
            )
            .await
        }
    }
}

async fn run_command(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &TempoBot,
    guild_id: GuildId,
    requester: &Requester,
) -> Result<CreateEmbed> {
    let player = &bot.player;

    let embed = match command.data.name.as_str() {
        "skip" => {
            let track = player.skip(guild_id, requester).await?;
            embeds::create_success_embed("Saltada", &format!("⏭️ **{}**", track.title()))
        }
        "voteskip" => {
            let (track, outcome) = player.vote_skip(guild_id, requester).await?;
            embeds::create_vote_embed(&track, &outcome)
        }
        "pause" => {
            player.pause(guild_id, requester).await?;
            embeds::create_success_embed("Pausa", "⏸️ Reproducción pausada")
        }
        "resume" => {
            player.resume(guild_id, requester).await?;
            embeds::create_success_embed("Reanudado", "▶️ Reproducción reanudada")
        }
        "stop" => {
            let removed = player.stop(guild_id, requester).await?;
            embeds::create_success_embed(
                "Detenido",
                &format!("⏹️ Reproducción detenida, {} canciones quitadas de la cola", removed),
            )
        }
        "leave" => {
            bot.leave_voice_channel(ctx, guild_id).await?;
            embeds::create_success_embed("Desconectado", "👋 Hasta la próxima")
        }
        "queue" => {
            let page = int_option(command, "page").unwrap_or(1) as usize;
            let queue_info = player.queue_info(guild_id).await?;
            embeds::create_queue_embed(&queue_info, page)
        }
        "now" => {
            let snapshot = player.snapshot(guild_id).await?;
            embeds::create_now_playing_embed(&snapshot)
        }
        "shuffle" => {
            let len = player.shuffle(guild_id, requester).await?;
            embeds::create_success_embed("Mezclada", &format!("🔀 {} canciones mezcladas", len))
        }
        "loop" => {
            let mode = match str_option(command, "mode") {
                Some("track") => LoopMode::Track,
                Some("queue") => LoopMode::Queue,
                _ => LoopMode::Off,
            };
            player.set_loop_mode(guild_id, mode, requester).await?;
            let message = match mode {
                LoopMode::Track => "🔂 Repetir canción activado",
                LoopMode::Queue => "🔁 Repetir cola activado",
                LoopMode::Off => "➡️ Repetición desactivada",
            };
            embeds::create_success_embed("Repetición", message)
        }
        "clear" => {
            let removed = player.clear(guild_id, requester).await?;
            embeds::create_success_embed("Cola limpia", &format!("🧹 {} canciones quitadas", removed))
        }
        "volume" => match int_option(command, "level") {
            Some(level) => {
                let volume = player
                    .set_volume(guild_id, level as f32 / 100.0, requester)
                    .await?;
                embeds::create_volume_embed(volume)
            }
            None => embeds::create_volume_embed(player.snapshot(guild_id).await?.volume),
        },
        "previous" => {
            let track = player.previous(guild_id, requester).await?;
            embeds::create_success_embed("Anterior", &format!("⏮️ **{}**", track.title()))
        }
        "replay" => {
            let track = player.replay(guild_id, requester).await?;
            embeds::create_success_embed("Desde el principio", &format!("🔄 **{}**", track.title()))
        }
        "jump" => {
            let position = position_option(command, "position")?;
            let track = player.jump(guild_id, position, requester).await?;
            embeds::create_success_embed("Salto", &format!("⏩ **{}**", track.title()))
        }
        "remove" => {
            let position = position_option(command, "position")?;
            let track = player.remove(guild_id, position, requester).await?;
            embeds::create_success_embed("Quitada", &format!("🗑️ **{}**", track.title()))
        }
        "move" => {
            let from = position_option(command, "from")?;
            let to = position_option(command, "to")?;
            player.move_track(guild_id, from, to, requester).await?;
            embeds::create_success_embed("Movida", &format!("↕️ Posición {} → {}", from, to))
        }
        "history" => {
            let history = player.history(guild_id).await?;
            embeds::create_history_embed(&history)
        }
        "pl-stop" => {
            let (context, remaining) = player.playlist_stop(guild_id, requester).await?;
            embeds::create_success_embed(
                "Playlist detenida",
                &format!("⏹️ **{}**, {} canciones descartadas", context.title, remaining),
            )
        }
        "pl-info" => {
            let (context, queued) = player.playlist_info(guild_id).await?;
            embeds::create_playlist_info_embed(&context, queued)
        }
        "summary" => {
            let summary = player.summarize(guild_id).await?;
            embeds::create_summary_embed(&summary)
        }
        other => embeds::create_error_embed("Comando no reconocido", &format!("/{}", other)),
    };

    Ok(embed)
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &TempoBot,
    guild_id: GuildId,
    requester: Requester,
) -> Result<CreateEmbed> {
    let query = str_option(command, "query")
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?;

    // Conectar al canal de voz si no está conectado
    if !bot.player.is_connected(guild_id).await {
        let channel_id = get_user_voice_channel(ctx, guild_id, command.user.id)?;
        bot.join_voice_channel(ctx, guild_id, channel_id).await?;
    }

    let embed = match bot.player.play(guild_id, query, requester).await? {
        PlayOutcome::Track { track, position } => embeds::create_track_added_embed(&track, position),
        PlayOutcome::Playlist { context, first } => {
            embeds::create_playlist_added_embed(&context, first.as_ref())
        }
    };

    Ok(embed)
}

async fn handle_join(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &TempoBot,
    guild_id: GuildId,
) -> Result<CreateEmbed> {
    let channel_id = get_user_voice_channel(ctx, guild_id, command.user.id)?;
    bot.join_voice_channel(ctx, guild_id, channel_id).await?;

    Ok(embeds::create_success_embed(
        "Conectado",
        &format!("🔊 Conectado a <#{}>", channel_id),
    ))
}

async fn respond(
    ctx: &Context,
    command: &CommandInteraction,
    embed: CreateEmbed,
    ephemeral: bool,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .embed(embed)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;

    Ok(())
}

// Funciones auxiliares

fn str_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn int_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

/// Posición base 1 de la cola
fn position_option(command: &CommandInteraction, name: &str) -> Result<usize> {
    int_option(command, name)
        .and_then(|value| usize::try_from(value).ok())
        .ok_or_else(|| anyhow::anyhow!("Posición '{}' inválida", name))
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| anyhow::anyhow!("Guild no encontrada en caché"))?;

    let channel_id = guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| anyhow::anyhow!("Debes estar en un canal de voz"))?;

    Ok(channel_id)
}
