//! Playback driver: the per-session state machine.
//!
//! One task per session consumes the session mailbox. Transport completions
//! arrive here as [`DriverEvent::Finished`] messages instead of mutating the
//! session from the audio engine's thread, so every transition runs on the
//! driver's own turn with the session lock held.
//!
//! ```text
//! Idle --kick--> Starting --attached--> Playing --end|error|stop--> Finishing
//!   ^                |                                                  |
//!   +--link down-----+                   advance() == None -------------+--> Idle
//!                                        advance() == Some(track) ----------> Starting
//! ```

use std::sync::Arc;
use tokio::sync::MutexGuard;
use tracing::{debug, info, warn};

use super::{
    session::{ActiveTrack, GuildSession, PlaybackPhase, SessionState},
    track::Track,
    transport::{AttachId, CompletionNotifier, Transport, TransportParams},
};
use crate::audit::AuditRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// Hay algo nuevo que reproducir (enqueue, conexión o comando)
    Kick,
    /// El transporte terminó el attach indicado
    Finished {
        attach: AttachId,
        error: Option<String>,
    },
}

pub(super) async fn run(session: Arc<GuildSession>, events: flume::Receiver<DriverEvent>) {
    debug!("🎛️ [{}] Driver iniciado", session.guild_id);

    loop {
        let event = tokio::select! {
            biased;
            _ = session.token.cancelled() => break,
            event = events.recv_async() => match event {
                Ok(event) => event,
                Err(_) => break,
            },
        };

        match event {
            DriverEvent::Kick => on_kick(&session).await,
            DriverEvent::Finished { attach, error } => on_finished(&session, attach, error).await,
        }
    }

    debug!("🎛️ [{}] Driver detenido", session.guild_id);
}

async fn on_kick(session: &GuildSession) {
    let mut state = session.state.lock().await;
    if state.closed || state.phase != PlaybackPhase::Idle {
        return;
    }

    let Some(link) = state.link.clone() else {
        debug!("[{}] Sin conexión de voz, la cola espera", session.guild_id);
        return;
    };

    match state.queue.advance() {
        Some(track) => start(session, state, track, link).await,
        None => drained(session, state, false).await,
    }
}

async fn on_finished(session: &GuildSession, attach: AttachId, error: Option<String>) {
    let mut state = session.state.lock().await;
    if state.closed {
        return;
    }

    let is_current = state.active.as_ref().map(|a| a.attach) == Some(attach);
    if !is_current {
        debug!(
            "[{}] Fin obsoleto ignorado ({:?})",
            session.guild_id, attach
        );
        return;
    }

    state.phase = PlaybackPhase::Finishing;
    let Some(outgoing) = state.active.take() else {
        return;
    };
    state.paused = false;

    if let Some(error) = error {
        warn!(
            "❌ [{}] Error reproduciendo {}: {}",
            session.guild_id,
            outgoing.track.title(),
            error
        );
        session.audit.notify(AuditRecord::Error {
            guild: session.guild_id,
            context: outgoing.track.title().to_string(),
            error,
        });
        // Sin repetición: un track que falla no vuelve a la cola
        state.queue.drop_current();
    }

    let next = state.queue.advance();

    if !state.queue.holds(outgoing.track.id()) {
        outgoing.track.release_storage();
    }

    match (next, state.link.clone()) {
        (Some(track), Some(link)) => start(session, state, track, link).await,
        (Some(_), None) => {
            state.queue.requeue_current();
            state.phase = PlaybackPhase::Idle;
        }
        (None, _) => drained(session, state, true).await,
    }
}

/// `advance()` no devolvió nada: la sesión queda ociosa.
async fn drained(
    session: &GuildSession,
    mut state: MutexGuard<'_, SessionState>,
    after_playback: bool,
) {
    state.phase = PlaybackPhase::Idle;
    let finished = state.queue.take_finished_playlist();
    drop(state);

    if let Some(playlist) = finished {
        session.audit.notify(AuditRecord::PlaylistCompleted {
            guild: session.guild_id,
            title: playlist.title,
            total: playlist.total_count,
        });
    }

    if after_playback {
        info!("📭 [{}] Cola terminada", session.guild_id);
        session.audit.notify(AuditRecord::QueueChanged {
            guild: session.guild_id,
            action: "finished".to_string(),
            detail: "la cola terminó".to_string(),
            by: None,
        });
    }

    session.arm_idle_timer().await;
}

/// Idle/Finishing -> Starting -> Playing. El lock se suelta durante cada
/// llamada al transporte y se revalida al volver.
async fn start(
    session: &GuildSession,
    mut state: MutexGuard<'_, SessionState>,
    track: Track,
    link: Arc<dyn Transport>,
) {
    let attach = AttachId::next();
    state.phase = PlaybackPhase::Starting;
    state.active = Some(ActiveTrack::starting(attach, track.clone()));
    let volume = state.volume;
    drop(state);

    if !link.is_connected().await {
        let mut state = session.state.lock().await;
        if !still_current(&state, attach) {
            return;
        }
        state.active = None;
        state.queue.requeue_current();
        state.phase = PlaybackPhase::Idle;
        drop(state);

        warn!(
            "🔌 [{}] Conexión de voz caída, {} vuelve a la cola",
            session.guild_id,
            track.title()
        );
        session.audit.notify(AuditRecord::Error {
            guild: session.guild_id,
            context: track.title().to_string(),
            error: crate::error::PlayerError::LinkLost.to_string(),
        });
        return;
    }

    let Some(source) = track.playable_source() else {
        let _ = session.mailbox.send(DriverEvent::Finished {
            attach,
            error: Some("fuente de audio no disponible".to_string()),
        });
        return;
    };

    let params = TransportParams::for_source(&source);
    let notifier = CompletionNotifier::new(attach, session.mailbox.clone());

    let handle = match link.attach(&source, &params, notifier).await {
        Ok(handle) => handle,
        Err(e) => {
            // Se procesa en el siguiente turno del driver, sin recursión
            let _ = session.mailbox.send(DriverEvent::Finished {
                attach,
                error: Some(e.to_string()),
            });
            return;
        }
    };

    let mut state = session.state.lock().await;
    if !still_current(&state, attach) {
        handle.stop();
        return;
    }

    handle.set_volume(volume);
    let started = state
        .active
        .as_mut()
        .map(|active| (active.mark_playing(handle.clone()), active.skip_requested));
    let skip_requested = match started {
        Some((started_at, skip_requested)) => {
            state.accounting.record_play(&track, started_at);
            skip_requested
        }
        None => false,
    };
    state.phase = PlaybackPhase::Playing;
    state.paused = false;
    let position = state.accounting.next_position();
    drop(state);

    session.idle_timer.cancel().await;

    info!(
        "🎵 [{}] Reproduciendo: {} ({})",
        session.guild_id,
        track.title(),
        if source.is_local() { "local" } else { "stream" }
    );
    session.audit.notify(AuditRecord::TrackStarted {
        guild: session.guild_id,
        title: track.title().to_string(),
        url: track.url().to_string(),
        requester: track.requester().clone(),
        duration: track.duration(),
        position,
        local: source.is_local(),
    });

    if skip_requested {
        handle.stop();
    }
}

fn still_current(state: &SessionState, attach: AttachId) -> bool {
    !state.closed && state.active.as_ref().map(|a| a.attach) == Some(attach)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        queue::LoopMode,
        session::SessionSettings,
        testing::{local_track, remote_track, settle, FakeTransport, RecordingAuditSink},
    };
    use crate::audio::track::SourceDescriptor;
    use pretty_assertions::assert_eq;
    use serenity::model::id::GuildId;
    use std::time::Duration;

    struct Harness {
        session: Arc<GuildSession>,
        transport: Arc<FakeTransport>,
        audit: Arc<RecordingAuditSink>,
        _reaper: flume::Receiver<crate::audio::supervisor::ReapRequest>,
    }

    async fn harness() -> Harness {
        let audit = Arc::new(RecordingAuditSink::default());
        let transport = Arc::new(FakeTransport::new());
        let (reaper_tx, reaper_rx) = flume::unbounded();
        let session = GuildSession::spawn(
            GuildId::new(42),
            SessionSettings::default(),
            audit.clone(),
            reaper_tx,
        );
        session.attach_link(transport.clone()).await.unwrap();
        settle().await;
        Harness {
            session,
            transport,
            audit,
            _reaper: reaper_rx,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_on_idle_starts_playback() {
        let h = harness().await;
        let track = remote_track("A", 180);
        h.session.enqueue(track.clone()).await.unwrap();
        settle().await;

        assert_eq!(h.transport.attach_count(), 1);
        let snapshot = h.session.snapshot().await.unwrap();
        assert_eq!(snapshot.current, Some(track));
        assert_eq!(snapshot.phase, PlaybackPhase::Playing);
        assert!(h.audit.kinds().contains(&"track_started"));
    }

    #[tokio::test(start_paused = true)]
    async fn natural_end_plays_next_and_records_accounting() {
        let h = harness().await;
        let a = remote_track("A", 180);
        let b = remote_track("B", 200);
        h.session.enqueue(a.clone()).await.unwrap();
        h.session.enqueue(b.clone()).await.unwrap();
        settle().await;

        h.transport.finish_latest(None);
        settle().await;

        let snapshot = h.session.snapshot().await.unwrap();
        assert_eq!(snapshot.current, Some(b));
        assert_eq!(h.transport.attach_count(), 2);
        assert_eq!(h.session.summarize().await.unwrap().track_count, 2);
        assert_eq!(h.session.history().await.unwrap(), vec![a]);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_are_audited_and_auto_advance() {
        let h = harness().await;
        h.session.enqueue(remote_track("Broken", 60)).await.unwrap();
        h.session.enqueue(remote_track("Good", 60)).await.unwrap();
        settle().await;

        h.transport.finish_latest(Some("decoder exploded".to_string()));
        settle().await;

        let records = h.audit.records();
        assert!(records.iter().any(|r| matches!(
            r,
            AuditRecord::Error { context, error, .. }
                if context == "Broken" && error == "decoder exploded"
        )));
        let snapshot = h.session.snapshot().await.unwrap();
        assert_eq!(snapshot.current.map(|t| t.title().to_string()), Some("Good".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn attach_failures_drain_the_queue_instead_of_looping() {
        let h = harness().await;
        h.transport.fail_attaches(true);
        h.session.set_loop_mode(LoopMode::Queue).await.unwrap();
        for i in 0..3 {
            h.session.enqueue(remote_track(&format!("E{i}"), 60)).await.unwrap();
        }
        settle().await;

        let snapshot = h.session.snapshot().await.unwrap();
        assert!(snapshot.current.is_none());
        assert_eq!(snapshot.queue_len, 0);
        assert_eq!(snapshot.phase, PlaybackPhase::Idle);
        assert_eq!(h.audit.count("error"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn link_down_requeues_the_track_at_the_front() {
        let h = harness().await;
        h.transport.set_connected(false);
        let a = remote_track("A", 60);
        h.session.enqueue(a.clone()).await.unwrap();
        h.session.enqueue(remote_track("B", 60)).await.unwrap();
        settle().await;

        assert_eq!(h.transport.attach_count(), 0);
        let snapshot = h.session.snapshot().await.unwrap();
        assert!(snapshot.current.is_none());
        assert_eq!(snapshot.upcoming.first(), Some(&a));
        assert_eq!(snapshot.queue_len, 2);

        h.transport.set_connected(true);
        h.session.kick();
        settle().await;
        assert_eq!(h.session.snapshot().await.unwrap().current, Some(a));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_completions_are_ignored() {
        let h = harness().await;
        h.session.enqueue(remote_track("A", 60)).await.unwrap();
        settle().await;
        let first = h.transport.latest_attach().unwrap();

        h.session.stop().await.unwrap();
        h.session.enqueue(remote_track("B", 60)).await.unwrap();
        settle().await;

        // El fin del primer attach ya llegó por stop(); uno extra no cambia nada
        let _ = h.session.mailbox.send(DriverEvent::Finished {
            attach: first,
            error: None,
        });
        settle().await;

        let snapshot = h.session.snapshot().await.unwrap();
        assert_eq!(snapshot.current.map(|t| t.title().to_string()), Some("B".to_string()));
        assert_eq!(h.transport.attach_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn local_storage_released_after_playback() {
        let h = harness().await;
        let (track, dir) = local_track("Local", 60);
        h.session.enqueue(track).await.unwrap();
        settle().await;

        assert!(matches!(
            h.transport.latest_source(),
            Some(SourceDescriptor::LocalFile(_))
        ));
        let params = h.transport.latest_params().unwrap();
        assert!(!params.is_reconnecting());
        assert!(dir.exists());

        h.transport.finish_latest(None);
        settle().await;
        assert!(!dir.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_track_keeps_storage_and_replays() {
        let h = harness().await;
        let (track, dir) = local_track("Loop", 60);
        h.session.set_loop_mode(LoopMode::Track).await.unwrap();
        h.session.enqueue(track.clone()).await.unwrap();
        settle().await;

        h.transport.finish_latest(None);
        settle().await;

        assert_eq!(h.transport.attach_count(), 2);
        assert!(dir.exists());
        assert_eq!(h.session.snapshot().await.unwrap().current, Some(track));
    }

    #[tokio::test(start_paused = true)]
    async fn skip_bypasses_loop_track() {
        let h = harness().await;
        h.session.set_loop_mode(LoopMode::Track).await.unwrap();
        h.session.enqueue(remote_track("A", 60)).await.unwrap();
        let b = remote_track("B", 60);
        h.session.enqueue(b.clone()).await.unwrap();
        settle().await;

        h.session.skip().await.unwrap();
        settle().await;
        assert_eq!(h.session.snapshot().await.unwrap().current, Some(b));
    }

    #[tokio::test(start_paused = true)]
    async fn drained_queue_completes_playlist_once() {
        let h = harness().await;
        let context = crate::audio::queue::PlaylistContext::new(
            "Mix",
            1,
            crate::audio::testing::requester(),
            std::time::Duration::ZERO,
        );
        h.session.start_playlist(context).await.unwrap();
        h.session.enqueue(remote_track("Only", 60)).await.unwrap();
        settle().await;

        h.transport.finish_latest(None);
        settle().await;
        h.session.kick();
        settle().await;

        assert_eq!(h.audit.count("playlist_completed"), 1);
        assert_eq!(h.audit.count("queue_changed"), 1);
        assert!(h.session.playlist_info().await.is_err());
        assert!(h.session.idle_timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn streams_attach_with_reconnect_params() {
        let h = harness().await;
        h.session.enqueue(remote_track("Remote", 60)).await.unwrap();
        settle().await;

        assert!(matches!(
            h.transport.latest_source(),
            Some(SourceDescriptor::Stream(_))
        ));
        assert!(h.transport.latest_params().unwrap().is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn summary_counts_the_track_that_is_playing() {
        let h = harness().await;
        h.session.enqueue(remote_track("A", 180)).await.unwrap();
        h.session.enqueue(remote_track("B", 200)).await.unwrap();
        settle().await;

        let summary = h.session.summarize().await.unwrap();
        assert_eq!(summary.track_count, 1);
        assert_eq!(summary.recent[0].title, "A");

        h.session.skip().await.unwrap();
        settle().await;
        let summary = h.session.summarize().await.unwrap();
        assert_eq!(summary.track_count, 2);
        assert_eq!(summary.recent.last().map(|r| r.title.as_str()), Some("B"));

        // Detener no vuelve a contar el track que sonaba
        h.session.stop().await.unwrap();
        assert_eq!(h.session.summarize().await.unwrap().track_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_elapsed_until_resume() {
        let h = harness().await;
        h.session.enqueue(remote_track("A", 180)).await.unwrap();
        settle().await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        h.session.pause().await.unwrap();
        assert!(h.transport.latest_paused());

        let paused = h.session.snapshot().await.unwrap();
        assert!(paused.paused);
        let frozen = paused.elapsed.unwrap();
        assert!(frozen >= Duration::from_secs(10) && frozen < Duration::from_secs(11));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.session.snapshot().await.unwrap().elapsed, Some(frozen));

        h.session.resume().await.unwrap();
        assert!(!h.transport.latest_paused());
        tokio::time::sleep(Duration::from_secs(5)).await;

        let snapshot = h.session.snapshot().await.unwrap();
        assert!(!snapshot.paused);
        let elapsed = snapshot.elapsed.unwrap();
        assert!(elapsed >= Duration::from_secs(15) && elapsed < Duration::from_secs(16));
        assert_eq!(snapshot.remaining, Some(Duration::from_secs(180) - elapsed));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_needs_an_attached_track() {
        let h = harness().await;
        assert_eq!(
            h.session.pause().await.unwrap_err(),
            crate::error::PlayerError::NothingPlaying
        );
    }

    #[tokio::test(start_paused = true)]
    async fn previous_under_loop_track_plays_the_earlier_track() {
        let h = harness().await;
        let a = remote_track("A", 60);
        let b = remote_track("B", 60);
        h.session.enqueue(a.clone()).await.unwrap();
        h.session.enqueue(b.clone()).await.unwrap();
        settle().await;
        h.transport.finish_latest(None);
        settle().await;

        h.session.set_loop_mode(LoopMode::Track).await.unwrap();
        assert_eq!(h.session.previous().await.unwrap(), a);
        settle().await;

        assert_eq!(h.session.snapshot().await.unwrap().current, Some(a));
        assert_eq!(h.session.history().await.unwrap().first(), Some(&b));
        assert_eq!(h.transport.attach_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn replay_under_loop_track_restarts_without_touching_the_queue() {
        let h = harness().await;
        h.session.set_loop_mode(LoopMode::Track).await.unwrap();
        let a = remote_track("A", 60);
        h.session.enqueue(a.clone()).await.unwrap();
        h.session.enqueue(remote_track("B", 60)).await.unwrap();
        settle().await;
        let first = h.transport.latest_attach().unwrap();

        assert_eq!(h.session.replay().await.unwrap(), a);
        settle().await;

        let snapshot = h.session.snapshot().await.unwrap();
        assert_eq!(snapshot.current, Some(a));
        assert_eq!(snapshot.queue_len, 1);
        assert_eq!(snapshot.phase, PlaybackPhase::Playing);
        assert_eq!(h.transport.attach_count(), 2);
        assert_ne!(h.transport.latest_attach(), Some(first));
    }

    #[tokio::test(start_paused = true)]
    async fn jump_under_loop_track_moves_to_the_target() {
        let h = harness().await;
        h.session.set_loop_mode(LoopMode::Track).await.unwrap();
        let a = remote_track("A", 60);
        let d = remote_track("D", 60);
        h.session.enqueue(a.clone()).await.unwrap();
        h.session.enqueue(remote_track("B", 60)).await.unwrap();
        h.session.enqueue(remote_track("C", 60)).await.unwrap();
        h.session.enqueue(d.clone()).await.unwrap();
        settle().await;

        assert_eq!(h.session.jump(3).await.unwrap(), d);
        settle().await;

        let snapshot = h.session.snapshot().await.unwrap();
        assert_eq!(snapshot.current, Some(d));
        assert_eq!(snapshot.queue_len, 0);
        assert_eq!(h.session.history().await.unwrap().first(), Some(&a));
    }
}
