use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serenity::model::id::UserId;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::sources::TrackInfo;
use crate::ui::embeds::format_duration;

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// Identidad de un track. Los clones comparten la misma identidad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(u64);

impl TrackId {
    fn next() -> Self {
        Self(NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub id: UserId,
    pub name: String,
}

impl Requester {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Directorio temporal de un track descargado.
///
/// `release()` puede llamarse cualquier número de veces: solo la primera borra
/// el directorio y ninguna falla.
#[derive(Debug)]
pub struct TrackStorage {
    path: PathBuf,
    dir: Mutex<Option<TempDir>>,
}

impl TrackStorage {
    pub fn new(dir: TempDir) -> Self {
        Self {
            path: dir.path().to_path_buf(),
            dir: Mutex::new(Some(dir)),
        }
    }

    pub fn is_released(&self) -> bool {
        self.dir.lock().is_none()
    }

    /// Libera el almacenamiento. Devuelve `true` si esta llamada lo borró.
    pub fn release(&self) -> bool {
        let Some(dir) = self.dir.lock().take() else {
            return false;
        };

        if let Err(e) = dir.close() {
            // Puede haber sido borrado desde fuera
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("🗑️ No se pudo borrar {}: {}", self.path.display(), e);
            }
            let _ = std::fs::remove_dir_all(&self.path);
        }

        debug!("🗑️ Archivos temporales liberados: {}", self.path.display());
        true
    }
}

/// Fuente reproducible que el transporte puede consumir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    LocalFile(PathBuf),
    Stream(String),
}

impl SourceDescriptor {
    pub fn is_local(&self) -> bool {
        matches!(self, SourceDescriptor::LocalFile(_))
    }

    pub fn location(&self) -> String {
        match self {
            SourceDescriptor::LocalFile(path) => path.display().to_string(),
            SourceDescriptor::Stream(url) => url.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PlayableSource {
    Remote {
        stream_url: String,
    },
    Local {
        path: PathBuf,
        storage: Arc<TrackStorage>,
        fallback_stream: Option<String>,
    },
}

#[derive(Debug)]
struct TrackInner {
    id: TrackId,
    title: String,
    url: String,
    source: PlayableSource,
    duration: Option<Duration>,
    uploader: String,
    thumbnail: Option<String>,
    requester: Requester,
    added_at: DateTime<Utc>,
}

/// Track resuelto e inmutable. Clonarlo es barato.
#[derive(Debug, Clone)]
pub struct Track {
    inner: Arc<TrackInner>,
}

impl Track {
    pub fn new(info: TrackInfo, requester: Requester) -> Self {
        let source = match info.download {
            Some(download) => PlayableSource::Local {
                path: download.file,
                storage: Arc::new(TrackStorage::new(download.dir)),
                fallback_stream: info.stream_url,
            },
            None => PlayableSource::Remote {
                stream_url: info.stream_url.unwrap_or_else(|| info.webpage_url.clone()),
            },
        };

        Self {
            inner: Arc::new(TrackInner {
                id: TrackId::next(),
                title: info.title,
                url: info.webpage_url,
                source,
                duration: info.duration.filter(|d| !d.is_zero()),
                uploader: info.uploader,
                thumbnail: info.thumbnail,
                requester,
                added_at: Utc::now(),
            }),
        }
    }

    pub fn id(&self) -> TrackId {
        self.inner.id
    }

    pub fn title(&self) -> &str {
        &self.inner.title
    }

    /// URL canónica (página del video).
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn duration(&self) -> Option<Duration> {
        self.inner.duration
    }

    pub fn duration_secs(&self) -> u64 {
        self.inner.duration.map(|d| d.as_secs()).unwrap_or(0)
    }

    pub fn duration_label(&self) -> String {
        match self.inner.duration {
            Some(duration) => format_duration(duration),
            None => "Unknown".to_string(),
        }
    }

    pub fn uploader(&self) -> &str {
        &self.inner.uploader
    }

    pub fn thumbnail(&self) -> Option<&str> {
        self.inner.thumbnail.as_deref()
    }

    pub fn requester(&self) -> &Requester {
        &self.inner.requester
    }

    pub fn added_at(&self) -> DateTime<Utc> {
        self.inner.added_at
    }

    pub fn is_local(&self) -> bool {
        matches!(self.inner.source, PlayableSource::Local { .. })
    }

    /// Descriptor para el transporte. Un archivo local ya liberado cae al stream
    /// remoto guardado al descargarlo, si existe.
    pub fn playable_source(&self) -> Option<SourceDescriptor> {
        match &self.inner.source {
            PlayableSource::Remote { stream_url } => {
                Some(SourceDescriptor::Stream(stream_url.clone()))
            }
            PlayableSource::Local {
                path,
                storage,
                fallback_stream,
            } => {
                if !storage.is_released() {
                    Some(SourceDescriptor::LocalFile(path.clone()))
                } else {
                    fallback_stream.clone().map(SourceDescriptor::Stream)
                }
            }
        }
    }

    /// Libera el almacenamiento local si lo hay. Idempotente.
    pub fn release_storage(&self) -> bool {
        match &self.inner.source {
            PlayableSource::Local { storage, .. } => storage.release(),
            PlayableSource::Remote { .. } => false,
        }
    }

    pub fn storage_released(&self) -> bool {
        match &self.inner.source {
            PlayableSource::Local { storage, .. } => storage.is_released(),
            PlayableSource::Remote { .. } => true,
        }
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Track {}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "**{}** by {}", self.inner.title, self.inner.uploader)
    }
}
