//! Background prefetch of playlist entries.
//!
//! The first entry of a playlist is resolved by the caller so playback can
//! start right away; every other entry goes through [`prefetch`], one task per
//! load, resolving sequentially and appending to the queue tail.
//!
//! Back-pressure: while the queue holds at least the configured threshold of
//! tracks and the driver is idle, the task waits, polling at the configured
//! interval. A busy session may queue arbitrarily deep.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{session::GuildSession, track::{Requester, Track}};
use crate::{
    audit::AuditRecord,
    error::PlayerError,
    sources::{resolve_playable, PlaylistEntry, TrackResolver},
};

const PROGRESS_EVERY: usize = 20;

/// Trabajo de una carga de playlist
pub struct PrefetchJob {
    pub playlist_id: u64,
    pub entries: Vec<PlaylistEntry>,
    pub requester: Requester,
    pub download_first: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchTally {
    pub appended: usize,
    pub failed: usize,
    pub cancelled: bool,
}

pub async fn prefetch(
    session: Arc<GuildSession>,
    resolver: Arc<dyn TrackResolver>,
    job: PrefetchJob,
    token: CancellationToken,
) -> PrefetchTally {
    let guild_id = session.guild_id();
    let total = job.entries.len();
    let mut tally = PrefetchTally::default();
    let mut reported = 0;

    info!(
        "📜 [{}] Prefetch iniciado: {} canciones restantes",
        guild_id, total
    );

    for (index, entry) in job.entries.into_iter().enumerate() {
        if token.is_cancelled() || session.is_closed().await {
            tally.cancelled = true;
            break;
        }

        if !wait_for_room(&session, &token).await {
            tally.cancelled = true;
            break;
        }

        let resolved = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tally.cancelled = true;
                break;
            }
            info = resolve_playable(resolver.as_ref(), &entry.url, job.download_first) => info,
        };

        match resolved {
            Some(info) => {
                let track = Track::new(info, job.requester.clone());
                match session.enqueue(track).await {
                    Ok(_) => tally.appended += 1,
                    Err(PlayerError::SessionClosed(_)) => {
                        tally.cancelled = true;
                        break;
                    }
                    Err(e) => warn!("📜 [{}] No se pudo encolar {}: {}", guild_id, entry.title, e),
                }
            }
            None => {
                tally.failed += 1;
                warn!(
                    "📜 [{}] Entrada no disponible, se omite: {}",
                    guild_id, entry.title
                );
                if session.playlist_entry_failed(job.playlist_id).await.is_err() {
                    tally.cancelled = true;
                    break;
                }
            }
        }

        if (index + 1) % PROGRESS_EVERY == 0 {
            info!(
                "📜 [{}] Progreso de playlist: {}/{}",
                guild_id,
                index + 1,
                total
            );
            report_appended(&session, &job.requester, &mut reported, tally.appended, total);
        }
    }

    report_appended(&session, &job.requester, &mut reported, tally.appended, total);

    if tally.cancelled {
        debug!("📜 [{}] Prefetch cancelado", guild_id);
    } else {
        // Si todo falló, advance() limpia el contexto de la playlist
        session.kick();
    }

    info!(
        "📜 [{}] Prefetch terminado: {} agregadas, {} fallidas",
        guild_id, tally.appended, tally.failed
    );
    tally
}

/// Un aviso de cola por tanda de tracks agregados desde el anterior
fn report_appended(
    session: &GuildSession,
    requester: &Requester,
    reported: &mut usize,
    appended: usize,
    total: usize,
) {
    if appended == *reported {
        return;
    }
    *reported = appended;
    session.audit.notify(AuditRecord::QueueChanged {
        guild: session.guild_id(),
        action: "playlist".to_string(),
        detail: format!("{}/{} canciones de la playlist agregadas", appended, total),
        by: Some(requester.clone()),
    });
}

/// Espera mientras la cola esté llena y el driver ocioso. `false` si la sesión
/// terminó o la carga fue cancelada.
async fn wait_for_room(session: &GuildSession, token: &CancellationToken) -> bool {
    let threshold = session.settings().prefetch_threshold;
    let poll = session.settings().prefetch_poll;
    let mut logged = false;

    loop {
        let Ok((depth, idle)) = session.backlog().await else {
            return false;
        };

        if depth < threshold || !idle {
            return true;
        }

        if !logged {
            debug!(
                "📜 [{}] Cola con {} canciones y reproducción ociosa, prefetch en pausa",
                session.guild_id(),
                depth
            );
            logged = true;
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => return false,
            _ = tokio::time::sleep(poll) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        queue::PlaylistContext,
        session::SessionSettings,
        testing::{remote_info, remote_track, requester, settle, RecordingAuditSink},
    };
    use crate::sources::MockTrackResolver;
    use serenity::model::id::GuildId;
    use std::time::Duration;

    fn entries(count: usize) -> Vec<PlaylistEntry> {
        (0..count)
            .map(|i| PlaylistEntry {
                url: format!("https://youtu.be/{i}"),
                title: format!("Entry {i}"),
                duration: Some(Duration::from_secs(60)),
            })
            .collect()
    }

    fn session() -> (Arc<GuildSession>, flume::Receiver<crate::audio::supervisor::ReapRequest>) {
        let (tx, rx) = flume::unbounded();
        let session = GuildSession::spawn(
            GuildId::new(9),
            SessionSettings::default(),
            Arc::new(RecordingAuditSink::default()),
            tx,
        );
        (session, rx)
    }

    fn resolving_resolver() -> Arc<dyn TrackResolver> {
        let mut resolver = MockTrackResolver::new();
        resolver
            .expect_resolve_track()
            .returning(|url| Some(remote_info(url, 60)));
        Arc::new(resolver)
    }

    fn job(playlist_id: u64, count: usize) -> PrefetchJob {
        PrefetchJob {
            playlist_id,
            entries: entries(count),
            requester: requester(),
            download_first: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pauses_while_idle_queue_is_deep() {
        let (session, _reaper) = session();
        for i in 0..25 {
            session.enqueue(remote_track(&format!("Q{i}"), 60)).await.unwrap();
        }

        let token = CancellationToken::new();
        let task = tokio::spawn(prefetch(
            session.clone(),
            resolving_resolver(),
            job(0, 3),
            token.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(session.backlog().await.unwrap().0, 25);

        // Bajar a 20 no alcanza: tiene que quedar por debajo del umbral
        for _ in 0..5 {
            session.remove(1).await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(session.backlog().await.unwrap().0, 20);

        session.remove(1).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(session.backlog().await.unwrap().0, 20);

        token.cancel();
        let tally = task.await.unwrap();
        assert_eq!(tally.appended, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_entries_shrink_the_playlist_total() {
        let (session, _reaper) = session();
        let context = PlaylistContext::new("Mix", 4, requester(), Duration::ZERO);
        let id = context.id;
        session.start_playlist(context).await.unwrap();
        session.enqueue(remote_track("First", 60)).await.unwrap();

        let mut resolver = MockTrackResolver::new();
        resolver.expect_resolve_track().returning(|url| {
            if url.ends_with('1') {
                None
            } else {
                Some(remote_info(url, 60))
            }
        });

        let tally = prefetch(
            session.clone(),
            Arc::new(resolver),
            job(id, 3),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(tally, PrefetchTally { appended: 2, failed: 1, cancelled: false });
        let (context, queued) = session.playlist_info().await.unwrap();
        assert_eq!(context.total_count, 3);
        assert_eq!(queued, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_session_stops_the_pipeline() {
        let (session, _reaper) = session();
        session.shutdown(crate::audio::supervisor::TeardownReason::Leave).await;

        let mut resolver = MockTrackResolver::new();
        resolver.expect_resolve_track().never();

        let tally = prefetch(
            session.clone(),
            Arc::new(resolver),
            job(0, 5),
            CancellationToken::new(),
        )
        .await;
        assert!(tally.cancelled);
        assert_eq!(tally.appended, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn all_failed_playlist_context_is_cleared() {
        let (session, _reaper) = session();
        let context = PlaylistContext::new("Dead", 3, requester(), Duration::ZERO);
        let id = context.id;
        session.start_playlist(context).await.unwrap();

        let mut resolver = MockTrackResolver::new();
        resolver.expect_resolve_track().returning(|_| None);

        let tally = prefetch(session.clone(), Arc::new(resolver), job(id, 3), CancellationToken::new()).await;
        assert_eq!(tally.failed, 3);

        // Sin conexión el driver no avanza; la playlist sigue con total 0
        settle().await;
        let (context, _) = session.playlist_info().await.unwrap();
        assert_eq!(context.total_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn appends_are_announced_once_per_progress_step() {
        let audit = Arc::new(RecordingAuditSink::default());
        let (tx, _reaper) = flume::unbounded();
        let settings = SessionSettings {
            prefetch_threshold: 100,
            ..SessionSettings::default()
        };
        let session = GuildSession::spawn(GuildId::new(9), settings, audit.clone(), tx);

        let tally = prefetch(
            session.clone(),
            resolving_resolver(),
            job(0, 25),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(tally.appended, 25);

        let details: Vec<String> = audit
            .records()
            .into_iter()
            .filter_map(|record| match record {
                AuditRecord::QueueChanged { action, detail, .. } if action == "playlist" => {
                    Some(detail)
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            details,
            vec![
                "20/25 canciones de la playlist agregadas".to_string(),
                "25/25 canciones de la playlist agregadas".to_string(),
            ]
        );
    }
}
