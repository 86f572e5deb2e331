use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{LocalDownload, PlaylistEntry, PlaylistInfo, TrackInfo, TrackResolver};
use crate::config::Config;

const AUDIO_EXTENSIONS: [&str; 4] = ["mp3", "m4a", "webm", "opus"];

/// Resolver basado en yt-dlp.
///
/// Las llamadas al proceso corren en el pool bloqueante de tokio para no frenar
/// el event loop; un semáforo limita cuántas corren a la vez.
pub struct YtDlpResolver {
    ytdlp_path: String,
    cache_dir: PathBuf,
    permits: Arc<Semaphore>,
}

#[derive(Debug, Deserialize)]
struct YtDlpVideo {
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    entries: Option<Vec<YtDlpVideo>>,
}

#[derive(Debug, Deserialize)]
struct YtDlpFlatEntry {
    id: Option<String>,
    url: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct YtDlpPlaylist {
    title: Option<String>,
    // Las entradas borradas o privadas llegan como null
    entries: Option<Vec<Option<YtDlpFlatEntry>>>,
}

impl YtDlpResolver {
    pub fn new(config: &Config) -> Self {
        Self {
            ytdlp_path: config.ytdlp_path.clone(),
            cache_dir: config.cache_dir.clone(),
            permits: Arc::new(Semaphore::new(config.worker_threads.max(1))),
        }
    }

    /// Ejecuta yt-dlp en el pool bloqueante y devuelve stdout
    async fn run(&self, args: Vec<String>) -> Result<Vec<u8>> {
        let _permit = self.permits.acquire().await?;
        let program = self.ytdlp_path.clone();

        let output = tokio::task::spawn_blocking(move || {
            std::process::Command::new(program).args(&args).output()
        })
        .await;

        let output = match output {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => anyhow::bail!("yt-dlp process error: {}", e),
            Err(_) => anyhow::bail!("yt-dlp task join error"),
        };

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp failed: {}", error.trim());
        }

        Ok(output.stdout)
    }

    fn base_args() -> Vec<String> {
        [
            "--dump-single-json",
            "--default-search",
            "ytsearch",
            "--quiet",
            "--no-warnings",
            "--socket-timeout",
            "30",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    async fn download(&self, query: &str) -> Result<Option<TrackInfo>> {
        let dir = tempfile::Builder::new()
            .prefix("track-")
            .tempdir_in(&self.cache_dir)?;
        let template = dir.path().join("%(title)s.%(ext)s");

        let mut args = Self::base_args();
        args.extend(
            [
                "--no-simulate",
                "--no-playlist",
                "-f",
                "bestaudio[ext=m4a]/bestaudio[ext=webm]/bestaudio",
                "-x",
                "--audio-format",
                "mp3",
                "--audio-quality",
                "192K",
                "-o",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(template.display().to_string());
        args.push(query.to_string());

        // Si algo falla el TempDir se borra al salir de este scope
        let stdout = self.run(args).await?;
        let Some(mut info) = parse_video(&stdout, query)? else {
            return Ok(None);
        };

        let Some(file) = find_audio_file(dir.path()).await? else {
            warn!("📁 Archivo descargado no encontrado en {}", dir.path().display());
            return Ok(None);
        };

        info!("📥 Descargado: {} -> {}", info.title, file.display());
        info.download = Some(LocalDownload { file, dir });
        Ok(Some(info))
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve_track(&self, query: &str) -> Option<TrackInfo> {
        let mut args = Self::base_args();
        args.extend(
            ["--no-playlist", "-f", "bestaudio/best"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(query.to_string());

        match self.run(args).await.and_then(|out| parse_video(&out, query)) {
            Ok(info) => info,
            Err(e) => {
                warn!("🔍 No se pudo resolver '{}': {}", query, e);
                None
            }
        }
    }

    async fn resolve_playlist(&self, url: &str) -> Option<PlaylistInfo> {
        let mut args = Self::base_args();
        args.extend(
            ["--flat-playlist", "--yes-playlist", "--ignore-errors"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(url.to_string());

        match self.run(args).await.and_then(|out| parse_playlist(&out)) {
            Ok(Some(playlist)) => {
                info!(
                    "📜 Extraídas {} canciones de la playlist: {}",
                    playlist.count(),
                    playlist.title
                );
                Some(playlist)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("📜 Error extrayendo playlist '{}': {}", url, e);
                None
            }
        }
    }

    async fn download_track(&self, query: &str) -> Option<TrackInfo> {
        match self.download(query).await {
            Ok(info) => info,
            Err(e) => {
                warn!("📥 Descarga fallida para '{}': {}", query, e);
                None
            }
        }
    }
}

fn seconds(value: Option<f64>) -> Option<Duration> {
    value
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(Duration::from_secs_f64)
}

fn parse_video(stdout: &[u8], query: &str) -> Result<Option<TrackInfo>> {
    let mut data: YtDlpVideo = serde_json::from_slice(stdout)?;

    // Resultado de búsqueda: usar la primera entrada
    if let Some(entries) = data.entries.take() {
        match entries.into_iter().next() {
            Some(first) => data = first,
            None => return Ok(None),
        }
    }

    Ok(Some(TrackInfo {
        title: data.title.unwrap_or_else(|| "Unknown".to_string()),
        webpage_url: data.webpage_url.unwrap_or_else(|| query.to_string()),
        stream_url: data.url,
        duration: seconds(data.duration),
        uploader: data.uploader.unwrap_or_else(|| "Unknown".to_string()),
        thumbnail: data.thumbnail,
        download: None,
    }))
}

fn parse_playlist(stdout: &[u8]) -> Result<Option<PlaylistInfo>> {
    let data: YtDlpPlaylist = serde_json::from_slice(stdout)?;

    // Sin entries: es un video suelto, no una playlist
    let Some(raw_entries) = data.entries else {
        return Ok(None);
    };

    let entries = raw_entries
        .into_iter()
        .flatten()
        .filter_map(|entry| {
            let url = match (entry.url, entry.id) {
                (Some(url), _) => url,
                (None, Some(id)) => format!("https://www.youtube.com/watch?v={}", id),
                (None, None) => return None,
            };
            Some(PlaylistEntry {
                url,
                title: entry.title.unwrap_or_else(|| "Unknown".to_string()),
                duration: seconds(entry.duration),
            })
        })
        .collect();

    Ok(Some(PlaylistInfo {
        title: data.title.unwrap_or_else(|| "Unknown Playlist".to_string()),
        entries,
    }))
}

async fn find_audio_file(dir: &Path) -> Result<Option<PathBuf>> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = reader.next_entry().await? {
        let path = entry.path();
        let is_audio = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| AUDIO_EXTENSIONS.contains(&ext))
            .unwrap_or(false);
        if is_audio {
            return Ok(Some(path));
        }
    }
    debug!("Sin archivos de audio en {}", dir.display());
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_single_video() {
        let json = br#"{"title":"Song","url":"https://cdn/a.m4a","webpage_url":"https://youtu.be/x","duration":181.4,"uploader":"Band","thumbnail":null}"#;
        let info = parse_video(json, "song").unwrap().unwrap();
        assert_eq!(info.title, "Song");
        assert_eq!(info.stream_url.as_deref(), Some("https://cdn/a.m4a"));
        assert_eq!(info.duration.map(|d| d.as_secs()), Some(181));
        assert_eq!(info.uploader, "Band");
    }

    #[test]
    fn search_results_use_first_entry() {
        let json = br#"{"entries":[{"title":"First","url":"u1"},{"title":"Second","url":"u2"}]}"#;
        let info = parse_video(json, "q").unwrap().unwrap();
        assert_eq!(info.title, "First");
        assert_eq!(info.webpage_url, "q");
        assert_eq!(info.uploader, "Unknown");

        let empty = br#"{"entries":[]}"#;
        assert!(parse_video(empty, "q").unwrap().is_none());
    }

    #[test]
    fn parses_flat_playlist_and_skips_unavailable_entries() {
        let json = br#"{"title":"Mix","entries":[
            {"id":"abc","title":"A","duration":100},
            null,
            {"url":"https://youtu.be/def","title":"B"},
            {"title":"no id"}
        ]}"#;
        let playlist = parse_playlist(json).unwrap().unwrap();
        assert_eq!(playlist.title, "Mix");
        assert_eq!(
            playlist.entries,
            vec![
                PlaylistEntry {
                    url: "https://www.youtube.com/watch?v=abc".to_string(),
                    title: "A".to_string(),
                    duration: Some(Duration::from_secs(100)),
                },
                PlaylistEntry {
                    url: "https://youtu.be/def".to_string(),
                    title: "B".to_string(),
                    duration: None,
                },
            ]
        );
    }

    #[test]
    fn single_video_is_not_a_playlist() {
        let json = br#"{"title":"Just a video"}"#;
        assert!(parse_playlist(json).unwrap().is_none());
    }
}
