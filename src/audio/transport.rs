use async_trait::async_trait;
use serenity::model::id::GuildId;
use songbird::{
    input::{ChildContainer, Input},
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{
    process::Stdio,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{driver::DriverEvent, track::SourceDescriptor};
use crate::error::{PlayerError, PlayerResult};

static NEXT_ATTACH_ID: AtomicU64 = AtomicU64::new(1);

/// Identidad de un attach. Las notificaciones de fin se comparan contra ella.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachId(u64);

impl AttachId {
    pub fn next() -> Self {
        Self(NEXT_ATTACH_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Parámetros de ffmpeg según el tipo de fuente. Tabla fija.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportParams {
    pub before_options: Vec<&'static str>,
    pub options: Vec<&'static str>,
}

impl TransportParams {
    pub fn for_source(source: &SourceDescriptor) -> Self {
        match source {
            SourceDescriptor::LocalFile(_) => Self {
                before_options: Vec::new(),
                options: vec!["-vn", "-ar", "48000", "-ac", "2", "-bufsize", "512k"],
            },
            SourceDescriptor::Stream(_) => Self {
                before_options: vec![
                    "-reconnect",
                    "1",
                    "-reconnect_streamed",
                    "1",
                    "-reconnect_delay_max",
                    "5",
                ],
                options: vec![
                    "-vn",
                    "-ar",
                    "48000",
                    "-ac",
                    "2",
                    "-af",
                    "aresample=async=1:min_hard_comp=0.100000:first_pts=0",
                ],
            },
        }
    }

    pub fn is_reconnecting(&self) -> bool {
        self.before_options.contains(&"-reconnect")
    }

    /// Línea de comandos completa de ffmpeg, salida WAV por stdout
    pub fn ffmpeg_args(&self, location: &str) -> Vec<String> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];
        args.extend(self.before_options.iter().map(|s| s.to_string()));
        args.push("-i".into());
        args.push(location.to_string());
        args.extend(self.options.iter().map(|s| s.to_string()));
        args.extend(["-f", "wav", "pipe:1"].iter().map(|s| s.to_string()));
        args
    }
}

/// Entrega la notificación de fin de un attach al buzón de la sesión.
///
/// Se consume al notificar, así que cada attach avisa una sola vez.
#[derive(Debug)]
pub struct CompletionNotifier {
    id: AttachId,
    mailbox: flume::Sender<DriverEvent>,
}

impl CompletionNotifier {
    pub fn new(id: AttachId, mailbox: flume::Sender<DriverEvent>) -> Self {
        Self { id, mailbox }
    }

    pub fn id(&self) -> AttachId {
        self.id
    }

    pub fn notify(self, error: Option<String>) {
        // El buzón cerrado significa que la sesión ya terminó
        if self
            .mailbox
            .send(DriverEvent::Finished {
                attach: self.id,
                error,
            })
            .is_err()
        {
            debug!("Notificación de fin descartada: sesión cerrada");
        }
    }
}

/// Control del track que está sonando
pub trait PlaybackControl: Send + Sync {
    fn stop(&self);
    fn pause(&self);
    fn resume(&self);
    fn set_volume(&self, volume: f32);
}

#[derive(Clone)]
pub struct AttachHandle {
    id: AttachId,
    control: Arc<dyn PlaybackControl>,
}

impl AttachHandle {
    pub fn new(id: AttachId, control: Arc<dyn PlaybackControl>) -> Self {
        Self { id, control }
    }

    pub fn id(&self) -> AttachId {
        self.id
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn set_volume(&self, volume: f32) {
        self.control.set_volume(volume);
    }
}

impl std::fmt::Debug for AttachHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachHandle").field("id", &self.id).finish()
    }
}

/// Conexión de voz de un guild
#[async_trait]
pub trait Transport: Send + Sync {
    /// Empieza a reproducir `source`. El notifier se dispara una vez cuando el
    /// track termina, falla o es detenido.
    async fn attach(
        &self,
        source: &SourceDescriptor,
        params: &TransportParams,
        notifier: CompletionNotifier,
    ) -> PlayerResult<AttachHandle>;

    async fn is_connected(&self) -> bool;

    async fn disconnect(&self);
}

/// Transporte sobre una llamada de songbird, con ffmpeg como decodificador.
pub struct SongbirdTransport {
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
    manager: Arc<Songbird>,
    ffmpeg_path: String,
}

impl SongbirdTransport {
    pub fn new(
        guild_id: GuildId,
        call: Arc<Mutex<Call>>,
        manager: Arc<Songbird>,
        ffmpeg_path: impl Into<String>,
    ) -> Self {
        Self {
            guild_id,
            call,
            manager,
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

#[async_trait]
impl Transport for SongbirdTransport {
    async fn attach(
        &self,
        source: &SourceDescriptor,
        params: &TransportParams,
        notifier: CompletionNotifier,
    ) -> PlayerResult<AttachHandle> {
        let id = notifier.id();
        let args = params.ffmpeg_args(&source.location());

        let child = std::process::Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PlayerError::Transport(format!("no se pudo iniciar ffmpeg: {}", e)))?;

        let input: Input = ChildContainer::from(child).into();

        let handle = {
            let mut call = self.call.lock().await;
            call.play_input(input)
        };

        let slot = Arc::new(parking_lot::Mutex::new(Some(notifier)));
        for event in [TrackEvent::End, TrackEvent::Error] {
            let handler = CompletionHandler { slot: slot.clone() };
            if let Err(e) = handle.add_event(Event::Track(event), handler) {
                let _ = handle.stop();
                return Err(PlayerError::Transport(format!(
                    "error al agregar event handler: {}",
                    e
                )));
            }
        }

        debug!(
            "🔌 [{}] attach {:?} {} (reconnect={})",
            self.guild_id,
            id,
            source.location(),
            params.is_reconnecting()
        );

        Ok(AttachHandle::new(id, Arc::new(SongbirdControl(handle))))
    }

    async fn is_connected(&self) -> bool {
        self.call.lock().await.current_connection().is_some()
    }

    async fn disconnect(&self) {
        match self.manager.remove(self.guild_id).await {
            Ok(()) => info!("👋 Desconectado del canal de voz en guild {}", self.guild_id),
            Err(e) => warn!("👋 Error al desconectar guild {}: {:?}", self.guild_id, e),
        }
    }
}

struct SongbirdControl(TrackHandle);

impl PlaybackControl for SongbirdControl {
    fn stop(&self) {
        let _ = self.0.stop();
    }

    fn pause(&self) {
        let _ = self.0.pause();
    }

    fn resume(&self) {
        let _ = self.0.play();
    }

    fn set_volume(&self, volume: f32) {
        let _ = self.0.set_volume(volume);
    }
}

/// Handler para cuando termina una canción
struct CompletionHandler {
    slot: Arc<parking_lot::Mutex<Option<CompletionNotifier>>>,
}

#[async_trait]
impl VoiceEventHandler for CompletionHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let error = match ctx {
            EventContext::Track(tracks) => tracks.iter().find_map(|(state, _)| {
                match &state.playing {
                    PlayMode::Errored(e) => Some(format!("{:?}", e)),
                    _ => None,
                }
            }),
            _ => None,
        };

        if let Some(message) = &error {
            error!("Error de reproducción: {}", message);
        }

        // End y Error pueden llegar ambos: solo el primero cuenta
        if let Some(notifier) = self.slot.lock().take() {
            notifier.notify(error);
        }

        None
    }
}
