use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use serenity::model::id::{GuildId, UserId};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{Mutex, MutexGuard},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    accounting::{SessionAccounting, SessionSummary},
    driver::{self, DriverEvent},
    queue::{votes_needed, LoopMode, PlaylistContext, QueueEngine},
    supervisor::{reap_on_expire, ReapRequest, TeardownReason, TimerSlot},
    track::Track,
    transport::{AttachHandle, AttachId, Transport},
};
use crate::{
    audit::{AuditRecord, AuditSink},
    config::Config,
    error::{PlayerError, PlayerResult},
};

static NEXT_SESSION_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Valores de configuración que usa cada sesión
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub idle_timeout: Duration,
    pub alone_timeout: Duration,
    pub prefetch_threshold: usize,
    pub prefetch_poll: Duration,
    pub history_limit: usize,
    pub skip_vote_ratio: f64,
    pub default_volume: f32,
    pub download_first: bool,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            alone_timeout: config.alone_timeout(),
            prefetch_threshold: config.prefetch_queue_threshold,
            prefetch_poll: config.prefetch_poll(),
            history_limit: config.history_limit,
            skip_vote_ratio: config.skip_vote_ratio,
            default_volume: config.default_volume,
            download_first: config.download_first,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    Idle,
    Starting,
    Playing,
    Finishing,
}

/// Reloj de reproducción que descuenta las pausas
#[derive(Debug, Clone)]
pub(super) struct PlayClock {
    started: Instant,
    paused_since: Option<Instant>,
    paused_total: Duration,
}

impl PlayClock {
    fn start() -> Self {
        Self {
            started: Instant::now(),
            paused_since: None,
            paused_total: Duration::ZERO,
        }
    }

    fn pause(&mut self) {
        if self.paused_since.is_none() {
            self.paused_since = Some(Instant::now());
        }
    }

    fn resume(&mut self) {
        if let Some(since) = self.paused_since.take() {
            self.paused_total += since.elapsed();
        }
    }

    fn elapsed(&self) -> Duration {
        let now = self.paused_since.unwrap_or_else(Instant::now);
        now.saturating_duration_since(self.started)
            .saturating_sub(self.paused_total)
    }
}

/// Track asignado al transporte (o a punto de serlo)
#[derive(Debug)]
pub(super) struct ActiveTrack {
    pub attach: AttachId,
    pub track: Track,
    pub handle: Option<AttachHandle>,
    pub clock: Option<PlayClock>,
    pub skip_requested: bool,
}

impl ActiveTrack {
    pub fn starting(attach: AttachId, track: Track) -> Self {
        Self {
            attach,
            track,
            handle: None,
            clock: None,
            skip_requested: false,
        }
    }

    /// Pasa a Playing. Devuelve la hora de inicio para la contabilidad.
    pub fn mark_playing(&mut self, handle: AttachHandle) -> DateTime<Utc> {
        self.handle = Some(handle);
        self.clock = Some(PlayClock::start());
        Utc::now()
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.clock.as_ref().map(PlayClock::elapsed)
    }
}

/// Estado mutable de la sesión. Solo se toca con el lock exclusivo tomado.
pub struct SessionState {
    pub(super) queue: QueueEngine,
    pub(super) accounting: SessionAccounting,
    pub(super) phase: PlaybackPhase,
    pub(super) link: Option<Arc<dyn Transport>>,
    pub(super) active: Option<ActiveTrack>,
    pub(super) listeners: Option<usize>,
    pub(super) volume: f32,
    pub(super) paused: bool,
    pub(super) closed: bool,
}

impl SessionState {
    fn new(settings: &SessionSettings) -> Self {
        Self {
            queue: QueueEngine::new(settings.history_limit),
            accounting: SessionAccounting::new(),
            phase: PlaybackPhase::Idle,
            link: None,
            active: None,
            listeners: None,
            volume: settings.default_volume,
            paused: false,
            closed: false,
        }
    }

    /// Quita el track activo: detiene su handle y lo saca de `current`.
    /// Su notificación de fin queda obsoleta.
    pub(super) fn abort_active(&mut self) -> Option<Track> {
        let active = self.active.take()?;
        if let Some(handle) = &active.handle {
            handle.stop();
        }
        self.queue.retire_current();
        if !self.queue.holds(active.track.id()) {
            active.track.release_storage();
        }
        self.phase = PlaybackPhase::Idle;
        self.paused = false;
        Some(active.track)
    }

    pub(super) fn is_drained(&self) -> bool {
        self.phase == PlaybackPhase::Idle && self.active.is_none() && self.queue.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub current: Option<Track>,
    pub upcoming: Vec<Track>,
    pub queue_len: usize,
    pub loop_mode: LoopMode,
    pub elapsed: Option<Duration>,
    pub remaining: Option<Duration>,
    pub playlist: Option<PlaylistContext>,
    pub phase: PlaybackPhase,
    pub paused: bool,
    pub volume: f32,
    pub listeners: Option<usize>,
    pub total_duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteOutcome {
    pub votes: usize,
    pub needed: usize,
    pub passed: bool,
}

/// Sesión de reproducción de un guild.
///
/// El estado vive tras un lock async exclusivo; el driver consume el buzón en
/// su propia tarea y las notificaciones de fin del transporte solo publican
/// mensajes en ese buzón.
pub struct GuildSession {
    pub(super) guild_id: GuildId,
    pub(super) instance: u64,
    pub(super) settings: SessionSettings,
    pub(super) state: Mutex<SessionState>,
    pub(super) mailbox: flume::Sender<DriverEvent>,
    pub(super) token: CancellationToken,
    playlist_token: SyncMutex<CancellationToken>,
    tasks: SyncMutex<Vec<JoinHandle<()>>>,
    pub(super) idle_timer: TimerSlot,
    pub(super) alone_timer: TimerSlot,
    pub(super) audit: Arc<dyn AuditSink>,
    reaper: flume::Sender<ReapRequest>,
}

impl GuildSession {
    /// Crea la sesión y lanza su driver.
    pub fn spawn(
        guild_id: GuildId,
        settings: SessionSettings,
        audit: Arc<dyn AuditSink>,
        reaper: flume::Sender<ReapRequest>,
    ) -> Arc<Self> {
        let (mailbox, events) = flume::unbounded();
        let token = CancellationToken::new();

        let session = Arc::new(Self {
            guild_id,
            instance: NEXT_SESSION_INSTANCE.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(SessionState::new(&settings)),
            settings,
            mailbox,
            playlist_token: SyncMutex::new(token.child_token()),
            token,
            tasks: SyncMutex::new(Vec::new()),
            idle_timer: TimerSlot::new(),
            alone_timer: TimerSlot::new(),
            audit,
            reaper,
        });

        let handle = tokio::spawn(driver::run(session.clone(), events));
        session.tasks.lock().push(handle);

        info!("🎛️ Sesión creada para guild {}", guild_id);
        session
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub(super) async fn lock_open(&self) -> PlayerResult<MutexGuard<'_, SessionState>> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(PlayerError::SessionClosed(self.guild_id));
        }
        Ok(state)
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Pide al driver que intente arrancar la reproducción
    pub fn kick(&self) {
        let _ = self.mailbox.send(DriverEvent::Kick);
    }

    /// Lanza una tarea propia de la sesión; teardown la espera.
    pub fn spawn_task<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Token para una carga de playlist; `playlist_stop` los cancela todos.
    pub fn playlist_token(&self) -> CancellationToken {
        self.playlist_token.lock().child_token()
    }

    fn cancel_playlist_tasks(&self) {
        let mut token = self.playlist_token.lock();
        token.cancel();
        *token = self.token.child_token();
    }

    fn reap_request(&self, reason: TeardownReason) -> ReapRequest {
        ReapRequest {
            guild: self.guild_id,
            reason,
            instance: self.instance,
        }
    }

    pub(super) async fn arm_idle_timer(&self) {
        self.idle_timer
            .arm(
                self.settings.idle_timeout,
                &self.token,
                reap_on_expire(self.reaper.clone(), self.reap_request(TeardownReason::Idle)),
            )
            .await;
    }

    // Conexión

    pub async fn attach_link(&self, link: Arc<dyn Transport>) -> PlayerResult<()> {
        {
            let mut state = self.lock_open().await?;
            state.link = Some(link);
        }
        self.kick();
        Ok(())
    }

    pub async fn has_link(&self) -> bool {
        self.state.lock().await.link.is_some()
    }

    // Cola

    /// Agrega un track y despierta al driver. Devuelve la posición en la cola.
    pub async fn enqueue(&self, track: Track) -> PlayerResult<usize> {
        let position = {
            let mut state = match self.lock_open().await {
                Ok(state) => state,
                Err(e) => {
                    track.release_storage();
                    return Err(e);
                }
            };
            state.queue.enqueue(track);
            state.queue.len()
        };

        self.idle_timer.cancel().await;
        self.kick();
        Ok(position)
    }

    pub async fn start_playlist(&self, context: PlaylistContext) -> PlayerResult<()> {
        let mut state = self.lock_open().await?;
        info!(
            "📜 [{}] Playlist activa: {} ({} canciones)",
            self.guild_id, context.title, context.total_count
        );
        state.queue.start_playlist(context);
        Ok(())
    }

    pub async fn playlist_entry_failed(&self, playlist_id: u64) -> PlayerResult<()> {
        let mut state = self.lock_open().await?;
        state.queue.playlist_entry_failed(playlist_id);
        Ok(())
    }

    /// Profundidad de la cola y si el driver está ocioso
    pub async fn backlog(&self) -> PlayerResult<(usize, bool)> {
        let state = self.lock_open().await?;
        Ok((state.queue.len(), state.phase == PlaybackPhase::Idle))
    }

    pub async fn clear(&self) -> PlayerResult<usize> {
        let mut state = self.lock_open().await?;
        Ok(state.queue.clear())
    }

    pub async fn shuffle(&self) -> PlayerResult<usize> {
        let mut state = self.lock_open().await?;
        let len = state.queue.len();
        if len < 2 {
            return Err(PlayerError::NotEnoughTracks(len));
        }
        state.queue.shuffle();
        Ok(len)
    }

    pub async fn set_loop_mode(&self, mode: LoopMode) -> PlayerResult<()> {
        let mut state = self.lock_open().await?;
        state.queue.set_loop_mode(mode);
        Ok(())
    }

    pub async fn remove(&self, position: usize) -> PlayerResult<Track> {
        let mut state = self.lock_open().await?;
        let len = state.queue.len();
        let index = position
            .checked_sub(1)
            .ok_or(PlayerError::InvalidPosition { position, len })?;
        state.queue.remove(index)
    }

    pub async fn move_track(&self, from: usize, to: usize) -> PlayerResult<()> {
        let mut state = self.lock_open().await?;
        let len = state.queue.len();
        let (Some(from), Some(to)) = (from.checked_sub(1), to.checked_sub(1)) else {
            return Err(PlayerError::InvalidPosition {
                position: from.min(to),
                len,
            });
        };
        state.queue.move_track(from, to)
    }

    pub async fn history(&self) -> PlayerResult<Vec<Track>> {
        let state = self.lock_open().await?;
        Ok(state.queue.history())
    }

    // Control de reproducción

    /// Detiene el track actual; el driver avanza al recibir el fin.
    pub async fn skip(&self) -> PlayerResult<Track> {
        let mut state = self.lock_open().await?;
        let track = state
            .active
            .as_ref()
            .map(|active| active.track.clone())
            .ok_or(PlayerError::NothingPlaying)?;
        self.restart(&mut state);
        Ok(track)
    }

    fn stop_current(state: &mut SessionState) -> PlayerResult<Track> {
        let active = state.active.as_mut().ok_or(PlayerError::NothingPlaying)?;
        match &active.handle {
            Some(handle) => handle.stop(),
            // Todavía arrancando: el driver lo detiene al terminar el attach
            None => active.skip_requested = true,
        }
        Ok(active.track.clone())
    }

    pub async fn vote_skip(&self, voter: UserId) -> PlayerResult<(Track, VoteOutcome)> {
        let mut state = self.lock_open().await?;
        let track = state
            .active
            .as_ref()
            .map(|active| active.track.clone())
            .ok_or(PlayerError::NothingPlaying)?;

        state.queue.add_skip_vote(voter);
        let needed = votes_needed(state.listeners.unwrap_or(0), self.settings.skip_vote_ratio);
        let votes = state.queue.skip_votes();
        let passed = votes >= needed;

        if passed {
            self.restart(&mut state);
        }

        Ok((
            track,
            VoteOutcome {
                votes,
                needed,
                passed,
            },
        ))
    }

    /// Vacía la cola y detiene el track actual sin soltar la conexión.
    pub async fn stop(&self) -> PlayerResult<usize> {
        let removed = {
            let mut state = self.lock_open().await?;
            let removed = state.queue.clear();
            state.queue.stop_playlist();
            state.abort_active();
            removed
        };

        self.cancel_playlist_tasks();
        self.arm_idle_timer().await;
        info!("⏹️ [{}] Reproducción detenida", self.guild_id);
        Ok(removed)
    }

    pub async fn pause(&self) -> PlayerResult<()> {
        let mut state = self.lock_open().await?;
        let active = state.active.as_mut().ok_or(PlayerError::NothingPlaying)?;
        let handle = active.handle.clone().ok_or(PlayerError::NothingPlaying)?;

        handle.pause();
        if let Some(clock) = active.clock.as_mut() {
            clock.pause();
        }
        state.paused = true;
        Ok(())
    }

    pub async fn resume(&self) -> PlayerResult<()> {
        let mut state = self.lock_open().await?;
        let active = state.active.as_mut().ok_or(PlayerError::NothingPlaying)?;
        let handle = active.handle.clone().ok_or(PlayerError::NothingPlaying)?;

        handle.resume();
        if let Some(clock) = active.clock.as_mut() {
            clock.resume();
        }
        state.paused = false;
        Ok(())
    }

    pub async fn set_volume(&self, volume: f32) -> PlayerResult<f32> {
        let mut state = self.lock_open().await?;
        let volume = volume.clamp(0.0, 2.0);
        state.volume = volume;
        if let Some(handle) = state.active.as_ref().and_then(|a| a.handle.as_ref()) {
            handle.set_volume(volume);
        }
        Ok(volume)
    }

    /// Vuelve a poner el track anterior al frente y salta al siguiente
    pub async fn previous(&self) -> PlayerResult<Track> {
        let mut state = self.lock_open().await?;
        let previous = state.queue.previous().cloned().ok_or(PlayerError::NoPrevious)?;
        state.queue.insert_front(previous.clone());
        self.restart(&mut state);
        Ok(previous)
    }

    pub async fn replay(&self) -> PlayerResult<Track> {
        let mut state = self.lock_open().await?;
        let current = state
            .active
            .as_ref()
            .map(|active| active.track.clone())
            .ok_or(PlayerError::NothingPlaying)?;
        state.queue.insert_front(current.clone());
        self.restart(&mut state);
        Ok(current)
    }

    /// Salta directamente a la posición dada (base 1)
    pub async fn jump(&self, position: usize) -> PlayerResult<Track> {
        let mut state = self.lock_open().await?;
        let len = state.queue.len();
        let index = position
            .checked_sub(1)
            .ok_or(PlayerError::InvalidPosition { position, len })?;
        state.queue.skip_to(index)?;
        let target = state
            .queue
            .front()
            .cloned()
            .ok_or(PlayerError::EmptyQueue)?;
        self.restart(&mut state);
        Ok(target)
    }

    /// Corta el track actual para que el driver tome el frente de la cola.
    /// Con loop de track el actual se retira explícitamente.
    fn restart(&self, state: &mut SessionState) {
        if state.queue.loop_mode() == LoopMode::Track {
            state.abort_active();
            self.kick();
            return;
        }

        if Self::stop_current(state).is_err() {
            self.kick();
        }
    }

    // Playlist

    pub async fn playlist_info(&self) -> PlayerResult<(PlaylistContext, usize)> {
        let state = self.lock_open().await?;
        let context = state.queue.playlist().cloned().ok_or(PlayerError::NoPlaylist)?;
        Ok((context, state.queue.len()))
    }

    /// Cancela la carga de la playlist, vacía la cola y detiene el track actual.
    pub async fn playlist_stop(&self) -> PlayerResult<(PlaylistContext, usize)> {
        let (context, remaining) = {
            let mut state = self.lock_open().await?;
            let context = state.queue.stop_playlist().ok_or(PlayerError::NoPlaylist)?;
            let remaining = state.queue.clear();
            state.abort_active();
            (context, remaining)
        };

        self.cancel_playlist_tasks();
        self.arm_idle_timer().await;
        Ok((context, remaining))
    }

    // Estado

    pub async fn snapshot(&self) -> PlayerResult<SessionSnapshot> {
        let state = self.lock_open().await?;
        let info = state.queue.info();
        let elapsed = state.active.as_ref().and_then(ActiveTrack::elapsed);
        let current = state.active.as_ref().map(|a| a.track.clone());
        let remaining = match (&current, elapsed) {
            (Some(track), Some(elapsed)) => track.duration().map(|d| d.saturating_sub(elapsed)),
            _ => None,
        };

        Ok(SessionSnapshot {
            current,
            upcoming: info.items.iter().take(10).cloned().collect(),
            queue_len: info.items.len(),
            loop_mode: info.loop_mode,
            elapsed,
            remaining,
            playlist: state.queue.playlist().cloned(),
            phase: state.phase,
            paused: state.paused,
            volume: state.volume,
            listeners: state.listeners,
            total_duration: info.total_duration,
        })
    }

    pub async fn queue_info(&self) -> PlayerResult<super::queue::QueueInfo> {
        let state = self.lock_open().await?;
        Ok(state.queue.info())
    }

    pub async fn summarize(&self) -> PlayerResult<SessionSummary> {
        let state = self.lock_open().await?;
        Ok(state.accounting.summarize())
    }

    // Supervisión

    /// Notificación de miembros no-bot en el canal de voz del bot
    pub async fn update_listeners(&self, count: usize) -> PlayerResult<()> {
        {
            let mut state = self.lock_open().await?;
            state.listeners = Some(count);
        }

        if count > 0 {
            self.alone_timer.cancel().await;
            return Ok(());
        }

        if !self.alone_timer.is_armed() {
            info!("👤 [{}] Bot solo en el canal de voz", self.guild_id);
            self.alone_timer
                .arm(
                    self.settings.alone_timeout,
                    &self.token,
                    reap_on_expire(self.reaper.clone(), self.reap_request(TeardownReason::Alone)),
                )
                .await;
            self.audit.notify(AuditRecord::AloneInChannel {
                guild: self.guild_id,
                grace: self.settings.alone_timeout,
            });
        }
        Ok(())
    }

    /// Revisa al vencer un temporizador si su condición sigue vigente
    pub async fn should_reap(&self, reason: TeardownReason) -> bool {
        let state = self.state.lock().await;
        if state.closed {
            return false;
        }
        match reason {
            TeardownReason::Idle => state.is_drained(),
            TeardownReason::Alone => state.listeners == Some(0),
            _ => true,
        }
    }

    /// Destruye la sesión: cancela y espera sus tareas, libera la cola y
    /// desconecta. Solo la primera llamada tiene efecto.
    pub async fn shutdown(&self, reason: TeardownReason) {
        self.token.cancel();
        self.idle_timer.cancel().await;
        self.alone_timer.cancel().await;

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }

        // El driver pudo rearmar un temporizador antes de salir
        self.idle_timer.cancel().await;
        self.alone_timer.cancel().await;

        let (summary, link) = {
            let mut state = self.state.lock().await;
            if state.closed {
                return;
            }
            state.closed = true;
            state.abort_active();
            state.queue.stop_playlist();
            state.queue.clear_all();
            state.phase = PlaybackPhase::Idle;
            let summary = state.accounting.end_session(reason.label());
            (summary, state.link.take())
        };

        if let Some(summary) = summary {
            self.audit.notify(AuditRecord::SessionSummary {
                guild: self.guild_id,
                summary,
            });
        }

        if let Some(link) = link {
            link.disconnect().await;
        }

        self.audit.notify(AuditRecord::VoiceLeft {
            guild: self.guild_id,
            reason: reason.label().to_string(),
        });

        debug!(
            "🧹 [{}] Sesión destruida ({})",
            self.guild_id,
            reason.label()
        );
    }
}
