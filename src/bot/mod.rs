//! # Bot Module
//!
//! Discord gateway glue for Tempo Bot.
//!
//! The [`TempoBot`] struct implements Serenity's [`EventHandler`] trait and
//! stays thin: it registers slash commands, opens voice connections through
//! Songbird and forwards gateway events to the [`AudioPlayer`] registry.
//!
//! - `interaction_create` → [`handlers::handle_command`]
//! - `voice_state_update` → `AudioPlayer::link_lost` (the bot left) or
//!   `AudioPlayer::update_listeners` (non-bot members in the bot's channel)
//! - `guild_delete` → `AudioPlayer::guild_removed`

use anyhow::Result;
use serenity::{
    all::{
        ChannelId, Context, EventHandler, Guild, GuildId, Interaction, Ready, UnavailableGuild,
        UserId, VoiceState,
    },
    async_trait,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{
    audio::{player::AudioPlayer, transport::SongbirdTransport},
    config::Config,
};

/// Event handler del bot.
///
/// ## Fields
///
/// - `config`: Bot configuration (tokens, timeouts, binaries)
/// - `player`: Per-guild session registry
pub struct TempoBot {
    config: Arc<Config>,
    pub player: AudioPlayer,
}

impl TempoBot {
    pub fn new(config: Arc<Config>, player: AudioPlayer) -> Self {
        Self { config, player }
    }

    /// Registers slash commands with Discord.
    ///
    /// - **Guild commands** (`GUILD_ID` set): ~1 second propagation time
    /// - **Global commands**: ~1 hour propagation time
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        let bot_id = ctx.cache.current_user().id;
        info!("🤖 Bot ID: {}", bot_id);
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                let guild_id = GuildId::new(guild_id);

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    /// Connects the bot to a voice channel and binds the call to the guild
    /// session.
    ///
    /// # Required Permissions
    ///
    /// - `Connect` - To join the voice channel
    /// - `Speak` - To play audio in the channel
    pub async fn join_voice_channel(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<()> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

        let call = manager.join(guild_id, channel_id).await.map_err(|e| {
            error!("Error al obtener handler de voz: {:?}", e);
            anyhow::anyhow!("Error al conectar al canal de voz")
        })?;

        let transport = SongbirdTransport::new(
            guild_id,
            call,
            manager.clone(),
            self.config.ffmpeg_path.clone(),
        );
        self.player
            .connect(guild_id, channel_id, Arc::new(transport))
            .await?;

        let bot_id = ctx.cache.current_user().id;
        if let Some(count) = count_listeners(ctx, guild_id, bot_id) {
            self.player.update_listeners(guild_id, count).await;
        }

        Ok(())
    }

    /// Disconnects from voice; the session teardown releases the call.
    pub async fn leave_voice_channel(&self, ctx: &Context, guild_id: GuildId) -> Result<()> {
        if self.player.leave(guild_id).await.is_err() {
            // Sin sesión: soltar la llamada si songbird la mantiene
            let manager = songbird::get(ctx)
                .await
                .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;
            if manager.get(guild_id).is_none() {
                anyhow::bail!("No estoy conectado a un canal de voz");
            }
            manager.remove(guild_id).await?;
        }

        info!("👋 Desconectado del canal de voz en guild {}", guild_id);
        Ok(())
    }
}

#[async_trait]
impl EventHandler for TempoBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Monitors voice channel changes:
    /// - **Bot disconnected**: tears the session down
    /// - **Members join/leave**: refreshes the listener count that drives
    ///   vote thresholds and the alone timer
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id.or_else(|| old.as_ref().and_then(|s| s.guild_id)) else {
            return;
        };

        let bot_id = ctx.cache.current_user().id;
        if new.user_id == bot_id && new.channel_id.is_none() {
            info!("🔌 Bot desconectado en guild {}", guild_id);
            self.player.link_lost(guild_id).await;
            return;
        }

        match count_listeners(&ctx, guild_id, bot_id) {
            Some(count) => {
                debug!("👥 [{}] {} oyentes en el canal", guild_id, count);
                self.player.update_listeners(guild_id, count).await;
            }
            None => debug!("[{}] Bot fuera de voz, se ignora el cambio", guild_id),
        }
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        if incomplete.unavailable {
            warn!("⚠️ Guild {} no disponible, cerrando su sesión", incomplete.id);
        } else {
            info!("🚪 Bot removido de la guild {}", incomplete.id);
        }
        self.player.guild_removed(incomplete.id).await;
    }
}

/// Miembros no-bot en el canal de voz del bot, según la caché
fn count_listeners(ctx: &Context, guild_id: GuildId, bot_id: UserId) -> Option<usize> {
    let guild = ctx.cache.guild(guild_id)?;
    let channel = guild.voice_states.get(&bot_id)?.channel_id?;

    let count = guild
        .voice_states
        .values()
        .filter(|state| state.channel_id == Some(channel) && state.user_id != bot_id)
        .filter(|state| {
            let is_bot = state
                .member
                .as_ref()
                .map(|member| member.user.bot)
                .or_else(|| guild.members.get(&state.user_id).map(|member| member.user.bot))
                .unwrap_or(false);
            !is_bot
        })
        .count();

    Some(count)
}
