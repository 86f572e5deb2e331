use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, model::id::ChannelId, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use tracing::{error, info, warn};

use tempo_bot::{
    audio::{player::AudioPlayer, session::SessionSettings},
    audit::{AuditSink, DiscordAuditSink, FanoutAuditSink, TracingAuditSink},
    bot::TempoBot,
    config::Config,
    sources::YtDlpResolver,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tempo_bot=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Tempo Bot v{}", env!("CARGO_PKG_VERSION"));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        let config = Config::load().unwrap_or_default();
        return health_check(&config).await;
    }

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    // Auditoría: siempre a tracing, y al canal de admin si está configurado
    let http = Arc::new(Http::new(&config.discord_token));
    let mut audit = FanoutAuditSink::new().with(Arc::new(TracingAuditSink));
    if let Some(channel_id) = config.admin_log_channel_id {
        info!("📋 Canal de auditoría: {}", channel_id);
        audit = audit.with(Arc::new(DiscordAuditSink::new(
            http.clone(),
            ChannelId::new(channel_id),
        )));
    }
    let audit: Arc<dyn AuditSink> = Arc::new(audit);

    let resolver = Arc::new(YtDlpResolver::new(&config));
    let player = AudioPlayer::new(SessionSettings::from(config.as_ref()), resolver, audit);

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = TempoBot::new(config.clone(), player.clone());

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        player.shutdown_all().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = async_process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await;

    let ffmpeg = async_process::Command::new(&config.ffmpeg_path)
        .arg("-version")
        .output()
        .await;

    let mut healthy = true;
    for (name, output) in [("yt-dlp", yt_dlp), ("ffmpeg", ffmpeg)] {
        match output {
            Ok(output) if output.status.success() => info!("✅ {} disponible", name),
            Ok(output) => {
                warn!("❌ {} terminó con {}", name, output.status);
                healthy = false;
            }
            Err(e) => {
                warn!("❌ {} no encontrado: {}", name, e);
                healthy = false;
            }
        }
    }

    if healthy {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
