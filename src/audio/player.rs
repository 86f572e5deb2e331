use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use super::{
    accounting::SessionSummary,
    playlist::{prefetch, PrefetchJob},
    queue::{LoopMode, PlaylistContext, QueueInfo},
    session::{GuildSession, SessionSettings, SessionSnapshot, VoteOutcome},
    supervisor::{ReapRequest, TeardownReason},
    track::{Requester, Track},
    transport::Transport,
};
use crate::{
    audit::{AuditRecord, AuditSink},
    error::{PlayerError, PlayerResult},
    sources::{is_playlist_query, resolve_playable, TrackResolver},
};

/// Resultado de `/play`
#[derive(Debug, Clone)]
pub enum PlayOutcome {
    Track {
        track: Track,
        position: usize,
    },
    Playlist {
        context: PlaylistContext,
        first: Option<Track>,
    },
}

struct PlayerInner {
    sessions: DashMap<GuildId, Arc<GuildSession>>,
    resolver: Arc<dyn TrackResolver>,
    audit: Arc<dyn AuditSink>,
    settings: SessionSettings,
    reaper: flume::Sender<ReapRequest>,
}

/// Registro de sesiones por guild y superficie de comandos.
///
/// Cada sesión se crea en el primer uso y se destruye por un único camino
/// (`teardown`), sea por comando, por temporizador o por el gateway.
#[derive(Clone)]
pub struct AudioPlayer {
    inner: Arc<PlayerInner>,
}

impl AudioPlayer {
    pub fn new(
        settings: SessionSettings,
        resolver: Arc<dyn TrackResolver>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let (reaper, requests) = flume::unbounded();
        let inner = Arc::new(PlayerInner {
            sessions: DashMap::new(),
            resolver,
            audit,
            settings,
            reaper,
        });

        tokio::spawn(reap_expired(Arc::downgrade(&inner), requests));

        Self { inner }
    }

    // Registro

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildSession>> {
        self.inner.sessions.get(&guild_id).map(|s| s.clone())
    }

    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<GuildSession> {
        self.inner
            .sessions
            .entry(guild_id)
            .or_insert_with(|| {
                GuildSession::spawn(
                    guild_id,
                    self.inner.settings.clone(),
                    self.inner.audit.clone(),
                    self.inner.reaper.clone(),
                )
            })
            .clone()
    }

    fn session(&self, guild_id: GuildId) -> PlayerResult<Arc<GuildSession>> {
        self.get(guild_id).ok_or(PlayerError::NotConnected)
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Destruye la sesión del guild. `false` si no existía.
    pub async fn teardown(&self, guild_id: GuildId, reason: TeardownReason) -> bool {
        teardown(&self.inner, guild_id, reason).await
    }

    // Conexión

    pub async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        transport: Arc<dyn Transport>,
    ) -> PlayerResult<()> {
        let session = self.get_or_create(guild_id);
        session.attach_link(transport).await?;
        info!("🔊 [{}] Conectado al canal {}", guild_id, channel_id);
        self.inner.audit.notify(AuditRecord::VoiceJoined {
            guild: guild_id,
            channel: channel_id,
        });
        Ok(())
    }

    pub async fn is_connected(&self, guild_id: GuildId) -> bool {
        match self.get(guild_id) {
            Some(session) => session.has_link().await,
            None => false,
        }
    }

    pub async fn leave(&self, guild_id: GuildId) -> PlayerResult<()> {
        if self.teardown(guild_id, TeardownReason::Leave).await {
            Ok(())
        } else {
            Err(PlayerError::NotConnected)
        }
    }

    // Cola

    pub async fn play(
        &self,
        guild_id: GuildId,
        query: &str,
        requester: Requester,
    ) -> PlayerResult<PlayOutcome> {
        let session = self.session(guild_id)?;

        if is_playlist_query(query) {
            if let Some(outcome) = self.load_playlist(&session, query, &requester).await? {
                return Ok(outcome);
            }
            debug!("[{}] '{}' no es una playlist, se trata como track", guild_id, query);
        }

        let info = resolve_playable(
            self.inner.resolver.as_ref(),
            query,
            self.inner.settings.download_first,
        )
        .await
        .ok_or_else(|| PlayerError::Resolution(query.to_string()))?;

        let track = Track::new(info, requester.clone());
        let position = session.enqueue(track.clone()).await?;

        self.inner.audit.notify(AuditRecord::QueueChanged {
            guild: guild_id,
            action: "add".to_string(),
            detail: track.title().to_string(),
            by: Some(requester),
        });

        Ok(PlayOutcome::Track { track, position })
    }

    /// Carga una playlist: la primera entrada se resuelve aquí, el resto en
    /// segundo plano. `None` si la URL no resultó ser una playlist.
    async fn load_playlist(
        &self,
        session: &Arc<GuildSession>,
        url: &str,
        requester: &Requester,
    ) -> PlayerResult<Option<PlayOutcome>> {
        let Some(playlist) = self.inner.resolver.resolve_playlist(url).await else {
            return Ok(None);
        };

        if playlist.entries.is_empty() {
            return Err(PlayerError::EmptyPlaylist);
        }

        let context = PlaylistContext::new(
            playlist.title.clone(),
            playlist.count(),
            requester.clone(),
            playlist.total_duration(),
        );
        let playlist_id = context.id;

        // Total fijado antes de agregar cualquier track
        session.start_playlist(context.clone()).await?;
        self.inner.audit.notify(AuditRecord::PlaylistAdded {
            guild: session.guild_id(),
            title: context.title.clone(),
            total: context.total_count,
            by: requester.clone(),
        });

        let mut entries = playlist.entries.into_iter();
        let mut first = None;

        if let Some(entry) = entries.next() {
            match resolve_playable(
                self.inner.resolver.as_ref(),
                &entry.url,
                self.inner.settings.download_first,
            )
            .await
            {
                Some(info) => {
                    let track = Track::new(info, requester.clone());
                    session.enqueue(track.clone()).await?;
                    first = Some(track);
                }
                None => {
                    warn!("📜 Primera entrada no disponible: {}", entry.title);
                    session.playlist_entry_failed(playlist_id).await?;
                }
            }
        }

        let rest: Vec<_> = entries.collect();
        if rest.is_empty() {
            session.kick();
        } else {
            let job = PrefetchJob {
                playlist_id,
                entries: rest,
                requester: requester.clone(),
                download_first: self.inner.settings.download_first,
            };
            let token = session.playlist_token();
            let task = prefetch(session.clone(), self.inner.resolver.clone(), job, token);
            session.spawn_task(async move {
                task.await;
            });
        }

        Ok(Some(PlayOutcome::Playlist { context, first }))
    }

    pub async fn enqueue(&self, guild_id: GuildId, track: Track) -> PlayerResult<usize> {
        let position = self.session(guild_id)?.enqueue(track.clone()).await?;
        self.queue_changed(guild_id, "add", track.title().to_string(), track.requester());
        Ok(position)
    }

    pub async fn clear(&self, guild_id: GuildId, by: &Requester) -> PlayerResult<usize> {
        let removed = self.session(guild_id)?.clear().await?;
        self.queue_changed(guild_id, "clear", format!("{} canciones", removed), by);
        Ok(removed)
    }

    pub async fn shuffle(&self, guild_id: GuildId, by: &Requester) -> PlayerResult<usize> {
        let len = self.session(guild_id)?.shuffle().await?;
        self.queue_changed(guild_id, "shuffle", format!("{} canciones", len), by);
        Ok(len)
    }

    pub async fn remove(
        &self,
        guild_id: GuildId,
        position: usize,
        by: &Requester,
    ) -> PlayerResult<Track> {
        let track = self.session(guild_id)?.remove(position).await?;
        self.queue_changed(guild_id, "remove", track.title().to_string(), by);
        Ok(track)
    }

    pub async fn move_track(
        &self,
        guild_id: GuildId,
        from: usize,
        to: usize,
        by: &Requester,
    ) -> PlayerResult<()> {
        self.session(guild_id)?.move_track(from, to).await?;
        self.queue_changed(guild_id, "move", format!("{} -> {}", from, to), by);
        Ok(())
    }

    pub async fn history(&self, guild_id: GuildId) -> PlayerResult<Vec<Track>> {
        self.session(guild_id)?.history().await
    }

    // Reproducción

    pub async fn skip(&self, guild_id: GuildId, by: &Requester) -> PlayerResult<Track> {
        let track = self.session(guild_id)?.skip().await?;
        self.inner.audit.notify(AuditRecord::TrackSkipped {
            guild: guild_id,
            title: track.title().to_string(),
            by: by.clone(),
            votes: None,
        });
        Ok(track)
    }

    pub async fn vote_skip(
        &self,
        guild_id: GuildId,
        voter: &Requester,
    ) -> PlayerResult<(Track, VoteOutcome)> {
        let (track, outcome) = self.session(guild_id)?.vote_skip(voter.id).await?;
        if outcome.passed {
            self.inner.audit.notify(AuditRecord::TrackSkipped {
                guild: guild_id,
                title: track.title().to_string(),
                by: voter.clone(),
                votes: Some((outcome.votes, outcome.needed)),
            });
        }
        Ok((track, outcome))
    }

    /// Detiene y vacía la cola sin desconectar
    pub async fn stop(&self, guild_id: GuildId, by: &Requester) -> PlayerResult<usize> {
        let removed = self.session(guild_id)?.stop().await?;
        self.playback_action(guild_id, "stop", by);
        Ok(removed)
    }

    pub async fn pause(&self, guild_id: GuildId, by: &Requester) -> PlayerResult<()> {
        self.session(guild_id)?.pause().await?;
        self.playback_action(guild_id, "pause", by);
        Ok(())
    }

    pub async fn resume(&self, guild_id: GuildId, by: &Requester) -> PlayerResult<()> {
        self.session(guild_id)?.resume().await?;
        self.playback_action(guild_id, "resume", by);
        Ok(())
    }

    pub async fn set_volume(
        &self,
        guild_id: GuildId,
        volume: f32,
        by: &Requester,
    ) -> PlayerResult<f32> {
        let volume = self.session(guild_id)?.set_volume(volume).await?;
        self.playback_action(guild_id, &format!("volume {}%", (volume * 100.0) as u32), by);
        Ok(volume)
    }

    pub async fn set_loop_mode(
        &self,
        guild_id: GuildId,
        mode: LoopMode,
        by: &Requester,
    ) -> PlayerResult<()> {
        self.session(guild_id)?.set_loop_mode(mode).await?;
        self.playback_action(guild_id, &format!("loop {}", mode.label()), by);
        Ok(())
    }

    pub async fn previous(&self, guild_id: GuildId, by: &Requester) -> PlayerResult<Track> {
        let track = self.session(guild_id)?.previous().await?;
        self.playback_action(guild_id, "previous", by);
        Ok(track)
    }

    pub async fn replay(&self, guild_id: GuildId, by: &Requester) -> PlayerResult<Track> {
        let track = self.session(guild_id)?.replay().await?;
        self.playback_action(guild_id, "replay", by);
        Ok(track)
    }

    pub async fn jump(
        &self,
        guild_id: GuildId,
        position: usize,
        by: &Requester,
    ) -> PlayerResult<Track> {
        let track = self.session(guild_id)?.jump(position).await?;
        self.playback_action(guild_id, &format!("jump {}", position), by);
        Ok(track)
    }

    // Playlist

    pub async fn playlist_info(&self, guild_id: GuildId) -> PlayerResult<(PlaylistContext, usize)> {
        self.session(guild_id)?.playlist_info().await
    }

    pub async fn playlist_stop(
        &self,
        guild_id: GuildId,
        by: &Requester,
    ) -> PlayerResult<(PlaylistContext, usize)> {
        let (context, remaining) = self.session(guild_id)?.playlist_stop().await?;
        self.inner.audit.notify(AuditRecord::PlaylistStopped {
            guild: guild_id,
            title: context.title.clone(),
            remaining,
            by: by.clone(),
        });
        Ok((context, remaining))
    }

    // Estado

    pub async fn snapshot(&self, guild_id: GuildId) -> PlayerResult<SessionSnapshot> {
        self.session(guild_id)?.snapshot().await
    }

    pub async fn queue_info(&self, guild_id: GuildId) -> PlayerResult<QueueInfo> {
        self.session(guild_id)?.queue_info().await
    }

    pub async fn summarize(&self, guild_id: GuildId) -> PlayerResult<SessionSummary> {
        self.session(guild_id)?.summarize().await
    }

    // Notificaciones del gateway

    pub async fn update_listeners(&self, guild_id: GuildId, count: usize) {
        if let Some(session) = self.get(guild_id) {
            if let Err(e) = session.update_listeners(count).await {
                debug!("[{}] Miembros ignorados: {}", guild_id, e);
            }
        }
    }

    pub async fn link_lost(&self, guild_id: GuildId) {
        if self.teardown(guild_id, TeardownReason::LinkLost).await {
            warn!("🔌 [{}] Conexión de voz perdida, sesión destruida", guild_id);
        }
    }

    pub async fn guild_removed(&self, guild_id: GuildId) {
        self.teardown(guild_id, TeardownReason::GuildRemoved).await;
    }

    pub async fn shutdown_all(&self) {
        let guilds: Vec<GuildId> = self.inner.sessions.iter().map(|e| *e.key()).collect();
        for guild_id in guilds {
            self.teardown(guild_id, TeardownReason::Shutdown).await;
        }
        info!("🛑 Todas las sesiones cerradas");
    }

    fn queue_changed(&self, guild_id: GuildId, action: &str, detail: String, by: &Requester) {
        self.inner.audit.notify(AuditRecord::QueueChanged {
            guild: guild_id,
            action: action.to_string(),
            detail,
            by: Some(by.clone()),
        });
    }

    fn playback_action(&self, guild_id: GuildId, action: &str, by: &Requester) {
        self.inner.audit.notify(AuditRecord::PlaybackAction {
            guild: guild_id,
            action: action.to_string(),
            by: by.clone(),
        });
    }
}

async fn teardown(inner: &PlayerInner, guild_id: GuildId, reason: TeardownReason) -> bool {
    // Quitarla del mapa primero: solo un llamador obtiene la sesión
    let Some((_, session)) = inner.sessions.remove(&guild_id) else {
        return false;
    };

    info!("🧹 [{}] Cerrando sesión: {}", guild_id, reason.label());
    session.shutdown(reason).await;
    true
}

/// Recibe vencimientos de temporizadores y destruye la sesión si la
/// condición sigue vigente al momento de procesarlos.
async fn reap_expired(inner: Weak<PlayerInner>, requests: flume::Receiver<ReapRequest>) {
    while let Ok(request) = requests.recv_async().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };

        let session = inner
            .sessions
            .get(&request.guild)
            .map(|s| s.clone())
            .filter(|s| s.instance() == request.instance);

        let Some(session) = session else {
            debug!("[{}] Vencimiento de una sesión anterior", request.guild);
            continue;
        };

        if !session.should_reap(request.reason).await {
            debug!(
                "[{}] Vencimiento descartado, la condición ya no aplica ({})",
                request.guild,
                request.reason.label()
            );
            continue;
        }

        teardown(&inner, request.guild, request.reason).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        session::PlaybackPhase,
        testing::{local_track, remote_info, requester, settle, FakeTransport, RecordingAuditSink},
    };
    use crate::sources::{MockTrackResolver, PlaylistEntry, PlaylistInfo};
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;
    use std::time::Duration;

    const GUILD: GuildId = GuildId::new(77);
    const CHANNEL: ChannelId = ChannelId::new(5);

    struct Harness {
        player: AudioPlayer,
        transport: Arc<FakeTransport>,
        audit: Arc<RecordingAuditSink>,
    }

    fn streaming_settings() -> SessionSettings {
        SessionSettings {
            download_first: false,
            ..SessionSettings::default()
        }
    }

    async fn connected(resolver: MockTrackResolver) -> Harness {
        let audit = Arc::new(RecordingAuditSink::default());
        let player = AudioPlayer::new(streaming_settings(), Arc::new(resolver), audit.clone());
        let transport = Arc::new(FakeTransport::new());
        player.connect(GUILD, CHANNEL, transport.clone()).await.unwrap();
        settle().await;
        Harness {
            player,
            transport,
            audit,
        }
    }

    fn single_track_resolver() -> MockTrackResolver {
        let mut resolver = MockTrackResolver::new();
        resolver
            .expect_resolve_track()
            .returning(|query| Some(remote_info(query, 180)));
        resolver
    }

    fn playlist(count: usize) -> PlaylistInfo {
        PlaylistInfo {
            title: "Mix".to_string(),
            entries: (0..count)
                .map(|i| PlaylistEntry {
                    url: format!("entry-{i}"),
                    title: format!("Entry {i}"),
                    duration: Some(Duration::from_secs(100)),
                })
                .collect(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn play_requires_a_connection() {
        let audit = Arc::new(RecordingAuditSink::default());
        let player = AudioPlayer::new(
            streaming_settings(),
            Arc::new(MockTrackResolver::new()),
            audit,
        );
        let err = player.play(GUILD, "song", requester()).await.unwrap_err();
        assert_eq!(err, PlayerError::NotConnected);
    }

    #[tokio::test(start_paused = true)]
    async fn play_single_track_starts_playback() {
        let h = connected(single_track_resolver()).await;

        let outcome = h.player.play(GUILD, "song", requester()).await.unwrap();
        assert!(matches!(outcome, PlayOutcome::Track { position: 1, .. }));
        settle().await;

        let snapshot = h.player.snapshot(GUILD).await.unwrap();
        assert_eq!(snapshot.phase, PlaybackPhase::Playing);
        assert_eq!(snapshot.current.map(|t| t.title().to_string()), Some("song".to_string()));
        assert_eq!(h.transport.latest_volume(), Some(0.5));
        assert!(h.audit.kinds().contains(&"voice_joined"));
    }

    #[tokio::test(start_paused = true)]
    async fn unresolvable_query_is_a_resolution_failure() {
        let mut resolver = MockTrackResolver::new();
        resolver.expect_resolve_track().returning(|_| None);
        let h = connected(resolver).await;

        let err = h.player.play(GUILD, "nothing", requester()).await.unwrap_err();
        assert_eq!(err, PlayerError::Resolution("nothing".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn playlist_sets_total_before_appending_and_prefetches_the_rest() {
        let mut resolver = single_track_resolver();
        resolver
            .expect_resolve_playlist()
            .times(1)
            .returning(|_| Some(playlist(5)));
        let h = connected(resolver).await;

        let outcome = h
            .player
            .play(GUILD, "https://youtube.com/playlist?list=PL1", requester())
            .await
            .unwrap();

        let PlayOutcome::Playlist { context, first } = outcome else {
            panic!("se esperaba una playlist");
        };
        assert_eq!(context.total_count, 5);
        assert_eq!(context.total_duration, Duration::from_secs(500));
        assert_eq!(first.map(|t| t.title().to_string()), Some("entry-0".to_string()));

        settle().await;
        let (context, queued) = h.player.playlist_info(GUILD).await.unwrap();
        assert_eq!(context.track_index, 1);
        assert_eq!(queued, 4);
        assert_eq!(h.audit.count("playlist_added"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_playlist_is_rejected_and_non_playlists_fall_back() {
        let mut resolver = single_track_resolver();
        let mut calls = 0;
        resolver.expect_resolve_playlist().returning(move |_| {
            calls += 1;
            if calls == 1 {
                Some(playlist(0))
            } else {
                None
            }
        });
        let h = connected(resolver).await;

        let err = h.player.play(GUILD, "https://youtube.com/watch?list=EMPTY", requester()).await.unwrap_err();
        assert_eq!(err, PlayerError::EmptyPlaylist);

        let outcome = h.player.play(GUILD, "https://youtube.com/watch?v=abc&list=VIDEO", requester()).await.unwrap();
        assert!(matches!(outcome, PlayOutcome::Track { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn playlist_stop_cancels_prefetch_and_clears() {
        let mut resolver = single_track_resolver();
        resolver
            .expect_resolve_playlist()
            .returning(|_| Some(playlist(40)));
        let h = connected(resolver).await;

        h.player.play(GUILD, "https://youtube.com/playlist?list=BIG", requester()).await.unwrap();
        settle().await;

        let (context, _) = h.player.playlist_stop(GUILD, &requester()).await.unwrap();
        assert_eq!(context.title, "Mix");
        settle().await;

        let snapshot = h.player.snapshot(GUILD).await.unwrap();
        assert!(snapshot.current.is_none());
        assert_eq!(snapshot.queue_len, 0);
        assert!(snapshot.playlist.is_none());
        assert_eq!(h.audit.count("playlist_stopped"), 1);
        assert_eq!(
            h.player.playlist_stop(GUILD, &requester()).await.unwrap_err(),
            PlayerError::NoPlaylist
        );
    }

    #[tokio::test(start_paused = true)]
    async fn vote_skip_passes_with_two_of_four() {
        let h = connected(single_track_resolver()).await;
        h.player.play(GUILD, "a", requester()).await.unwrap();
        h.player.play(GUILD, "b", requester()).await.unwrap();
        h.player.update_listeners(GUILD, 4).await;
        settle().await;

        let first = Requester::new(UserId::new(1), "one");
        let second = Requester::new(UserId::new(2), "two");

        let (_, outcome) = h.player.vote_skip(GUILD, &first).await.unwrap();
        assert_eq!(outcome, VoteOutcome { votes: 1, needed: 2, passed: false });

        let (skipped, outcome) = h.player.vote_skip(GUILD, &second).await.unwrap();
        assert!(outcome.passed);
        assert_eq!(skipped.title(), "a");
        settle().await;

        let snapshot = h.player.snapshot(GUILD).await.unwrap();
        assert_eq!(snapshot.current.map(|t| t.title().to_string()), Some("b".to_string()));
        assert_eq!(h.audit.count("track_skipped"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn leave_emits_summary_once_and_closes_the_session() {
        let h = connected(single_track_resolver()).await;
        h.player.play(GUILD, "song", requester()).await.unwrap();
        settle().await;
        let session = h.player.get(GUILD).unwrap();

        h.player.leave(GUILD).await.unwrap();
        assert_eq!(h.player.leave(GUILD).await, Err(PlayerError::NotConnected));
        session.shutdown(TeardownReason::Leave).await;

        assert_eq!(h.audit.count("session_summary"), 1);
        assert_eq!(h.audit.count("voice_left"), 1);
        assert!(h.transport.was_disconnected());
        assert!(h.transport.latest_stopped());
        assert_eq!(
            session.enqueue(crate::audio::testing::remote_track("late", 10)).await,
            Err(PlayerError::SessionClosed(GUILD))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_session_teardown_has_no_summary() {
        let h = connected(MockTrackResolver::new()).await;
        h.player.leave(GUILD).await.unwrap();
        assert_eq!(h.audit.count("session_summary"), 0);
        assert_eq!(h.audit.count("voice_left"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_tears_down_after_the_queue_drains() {
        let h = connected(single_track_resolver()).await;
        h.player.play(GUILD, "song", requester()).await.unwrap();
        settle().await;

        h.transport.finish_latest(None);
        settle().await;
        assert_eq!(h.player.active_sessions(), 1);

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(h.player.active_sessions(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(h.player.active_sessions(), 0);
        assert_eq!(h.audit.count("session_summary"), 1);
        assert!(h.transport.was_disconnected());
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_cancels_the_idle_timer() {
        let h = connected(single_track_resolver()).await;
        tokio::time::sleep(Duration::from_secs(200)).await;

        h.player.play(GUILD, "song", requester()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(h.player.active_sessions(), 1);
        assert_eq!(
            h.player.snapshot(GUILD).await.unwrap().phase,
            PlaybackPhase::Playing
        );
    }

    #[tokio::test(start_paused = true)]
    async fn alone_timeout_rechecks_membership() {
        let h = connected(single_track_resolver()).await;
        h.player.play(GUILD, "song", requester()).await.unwrap();
        settle().await;

        h.player.update_listeners(GUILD, 0).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        h.player.update_listeners(GUILD, 1).await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.player.active_sessions(), 1);

        h.player.update_listeners(GUILD, 0).await;
        tokio::time::sleep(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(h.player.active_sessions(), 0);
        assert_eq!(h.audit.count("alone_in_channel"), 2);
        assert_eq!(h.audit.count("session_summary"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn link_lost_discards_queue_and_releases_storage() {
        let h = connected(MockTrackResolver::new()).await;
        let (playing, playing_dir) = local_track("Playing", 60);
        let (queued, queued_dir) = local_track("Queued", 60);
        h.player.enqueue(GUILD, playing).await.unwrap();
        h.player.enqueue(GUILD, queued).await.unwrap();
        settle().await;

        h.player.link_lost(GUILD).await;

        assert_eq!(h.player.active_sessions(), 0);
        assert!(!playing_dir.exists());
        assert!(!queued_dir.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn direct_enqueue_announces_the_queue_change() {
        let h = connected(MockTrackResolver::new()).await;
        let position = h
            .player
            .enqueue(GUILD, Track::new(remote_info("Manual", 60), requester()))
            .await
            .unwrap();
        assert_eq!(position, 1);

        assert!(h.audit.records().iter().any(|record| matches!(
            record,
            AuditRecord::QueueChanged { action, detail, by: Some(_), .. }
                if action == "add" && detail == "Manual"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn new_session_is_not_reaped_by_an_old_timer() {
        let h = connected(MockTrackResolver::new()).await;
        let old = h.player.get(GUILD).unwrap().instance();

        h.player.leave(GUILD).await.unwrap();
        h.player
            .connect(GUILD, CHANNEL, Arc::new(FakeTransport::new()))
            .await
            .unwrap();
        let _ = h.inner_reaper().send(ReapRequest {
            guild: GUILD,
            reason: TeardownReason::Leave,
            instance: old,
        });
        settle().await;

        assert_eq!(h.player.active_sessions(), 1);
        assert_ne!(h.player.get(GUILD).unwrap().instance(), old);
    }

    impl Harness {
        fn inner_reaper(&self) -> flume::Sender<ReapRequest> {
            self.player.inner.reaper.clone()
        }
    }
}
