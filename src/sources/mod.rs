//! # Sources Module
//!
//! Track resolution for the playback orchestrator.
//!
//! A [`TrackResolver`] turns a free-form query or URL into a playable
//! [`TrackInfo`], and a playlist URL into a flat list of lightweight
//! [`PlaylistEntry`] values that the prefetch pipeline resolves later.
//! Every resolver call may take arbitrarily long and may fail per item;
//! failure is always reported as `None`, never as a fatal error.

pub mod ytdlp;

use async_trait::async_trait;
use regex::Regex;
use std::{path::PathBuf, sync::LazyLock, time::Duration};
use tempfile::TempDir;
use tracing::debug;

pub use ytdlp::YtDlpResolver;

static PLAYLIST_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)([?&]list=|playlist)").ok());

/// Archivo descargado y el directorio temporal que lo contiene.
#[derive(Debug)]
pub struct LocalDownload {
    pub file: PathBuf,
    pub dir: TempDir,
}

/// Metadatos de un track resuelto más su fuente reproducible.
#[derive(Debug)]
pub struct TrackInfo {
    pub title: String,
    pub webpage_url: String,
    /// URL directa del stream de audio (también sirve de respaldo para descargas)
    pub stream_url: Option<String>,
    pub duration: Option<Duration>,
    pub uploader: String,
    pub thumbnail: Option<String>,
    pub download: Option<LocalDownload>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry {
    pub url: String,
    pub title: String,
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistInfo {
    pub title: String,
    pub entries: Vec<PlaylistEntry>,
}

impl PlaylistInfo {
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn total_duration(&self) -> Duration {
        self.entries.iter().filter_map(|e| e.duration).sum()
    }
}

/// Resolver externo de tracks y playlists
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Resuelve una búsqueda o URL a un track en modo streaming
    async fn resolve_track(&self, query: &str) -> Option<TrackInfo>;

    /// Lista las entradas de una playlist. `None` si la URL no es una playlist.
    async fn resolve_playlist(&self, url: &str) -> Option<PlaylistInfo>;

    /// Descarga el audio a almacenamiento temporal (modo download-first)
    async fn download_track(&self, query: &str) -> Option<TrackInfo>;
}

/// Resuelve una consulta a algo reproducible. En modo download-first intenta
/// descargar y, si falla, cae al modo streaming.
pub async fn resolve_playable(
    resolver: &dyn TrackResolver,
    query: &str,
    download_first: bool,
) -> Option<TrackInfo> {
    if download_first {
        if let Some(info) = resolver.download_track(query).await {
            return Some(info);
        }
        debug!("📥 Descarga fallida, usando streaming para '{}'", query);
    }
    resolver.resolve_track(query).await
}

/// Heurística de la capa de comandos para decidir si una consulta es una playlist.
pub fn is_playlist_query(query: &str) -> bool {
    match PLAYLIST_PATTERN.as_ref() {
        Some(re) => re.is_match(query),
        None => query.contains("list="),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_playlist_queries() {
        assert!(is_playlist_query(
            "https://www.youtube.com/playlist?list=PL1234"
        ));
        assert!(is_playlist_query(
            "https://www.youtube.com/watch?v=abc&list=RD123"
        ));
        assert!(is_playlist_query("my PlayList mix"));
        assert!(!is_playlist_query("https://youtu.be/dQw4w9WgXcQ"));
        assert!(!is_playlist_query("never gonna give you up"));
    }

    #[tokio::test]
    async fn download_first_falls_back_to_streaming() {
        let mut resolver = MockTrackResolver::new();
        resolver.expect_download_track().times(1).returning(|_| None);
        resolver.expect_resolve_track().times(1).returning(|query| {
            Some(TrackInfo {
                title: query.to_string(),
                webpage_url: "https://youtu.be/x".to_string(),
                stream_url: Some("https://cdn/x".to_string()),
                duration: None,
                uploader: "Band".to_string(),
                thumbnail: None,
                download: None,
            })
        });

        let info = resolve_playable(&resolver, "song", true).await.unwrap();
        assert_eq!(info.title, "song");
        assert!(info.download.is_none());
    }

    #[tokio::test]
    async fn streaming_mode_skips_download() {
        let mut resolver = MockTrackResolver::new();
        resolver.expect_download_track().never();
        resolver.expect_resolve_track().times(1).returning(|_| None);
        assert!(resolve_playable(&resolver, "nothing", false).await.is_none());
    }

    #[test]
    fn playlist_totals() {
        let info = PlaylistInfo {
            title: "Mix".to_string(),
            entries: vec![
                PlaylistEntry {
                    url: "a".into(),
                    title: "A".into(),
                    duration: Some(Duration::from_secs(100)),
                },
                PlaylistEntry {
                    url: "b".into(),
                    title: "B".into(),
                    duration: None,
                },
            ],
        };
        assert_eq!(info.count(), 2);
        assert_eq!(info.total_duration(), Duration::from_secs(100));
    }
}
