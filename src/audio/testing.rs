//! Test doubles shared by the audio tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::UserId;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use super::{
    track::{Requester, SourceDescriptor, Track},
    transport::{
        AttachHandle, AttachId, CompletionNotifier, PlaybackControl, Transport, TransportParams,
    },
};
use crate::{
    audit::{AuditRecord, AuditSink},
    error::{PlayerError, PlayerResult},
    sources::{LocalDownload, TrackInfo},
};

pub fn requester() -> Requester {
    Requester::new(UserId::new(100), "tester")
}

pub fn remote_info(title: &str, secs: u64) -> TrackInfo {
    TrackInfo {
        title: title.to_string(),
        webpage_url: format!("https://youtu.be/{}", title),
        stream_url: Some(format!("https://stream.example/{}", title)),
        duration: Some(Duration::from_secs(secs)),
        uploader: "Uploader".to_string(),
        thumbnail: None,
        download: None,
    }
}

pub fn remote_track(title: &str, secs: u64) -> Track {
    Track::new(remote_info(title, secs), requester())
}

/// Track con archivo local real; devuelve también el directorio temporal.
pub fn local_track(title: &str, secs: u64) -> (Track, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join(format!("{}.mp3", title));
    std::fs::write(&file, b"ID3").unwrap();
    let path = dir.path().to_path_buf();

    let mut info = remote_info(title, secs);
    info.download = Some(LocalDownload { file, dir });
    (Track::new(info, requester()), path)
}

/// Deja correr al resto de tareas. Con el reloj pausado avanza 1 ms.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[derive(Default)]
pub struct RecordingAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAuditSink {
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.records.lock().iter().map(AuditRecord::kind).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.records.lock().iter().filter(|r| r.kind() == kind).count()
    }
}

impl AuditSink for RecordingAuditSink {
    fn notify(&self, record: AuditRecord) {
        self.records.lock().push(record);
    }
}

type NotifierSlot = Arc<Mutex<Option<CompletionNotifier>>>;

struct FakeAttach {
    id: AttachId,
    source: SourceDescriptor,
    params: TransportParams,
    slot: NotifierSlot,
    control: Arc<FakeControl>,
}

/// Control que, como songbird, dispara el fin del track al detenerlo.
#[derive(Default)]
pub struct FakeControl {
    slot: NotifierSlot,
    stopped: AtomicBool,
    paused: AtomicBool,
    volume: Mutex<Option<f32>>,
}

impl PlaybackControl for FakeControl {
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(notifier) = self.slot.lock().take() {
            notifier.notify(None);
        }
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn set_volume(&self, volume: f32) {
        *self.volume.lock() = Some(volume);
    }
}

pub struct FakeTransport {
    connected: AtomicBool,
    fail_attaches: AtomicBool,
    disconnected: AtomicBool,
    attaches: Mutex<Vec<FakeAttach>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            fail_attaches: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            attaches: Mutex::new(Vec::new()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fail_attaches(&self, fail: bool) {
        self.fail_attaches.store(fail, Ordering::SeqCst);
    }

    pub fn was_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn attach_count(&self) -> usize {
        self.attaches.lock().len()
    }

    pub fn latest_attach(&self) -> Option<AttachId> {
        self.attaches.lock().last().map(|a| a.id)
    }

    pub fn latest_source(&self) -> Option<SourceDescriptor> {
        self.attaches.lock().last().map(|a| a.source.clone())
    }

    pub fn latest_params(&self) -> Option<TransportParams> {
        self.attaches.lock().last().map(|a| a.params.clone())
    }

    pub fn latest_volume(&self) -> Option<f32> {
        self.attaches.lock().last().and_then(|a| *a.control.volume.lock())
    }

    pub fn latest_paused(&self) -> bool {
        self.attaches
            .lock()
            .last()
            .is_some_and(|a| a.control.paused.load(Ordering::SeqCst))
    }

    pub fn latest_stopped(&self) -> bool {
        self.attaches
            .lock()
            .last()
            .is_some_and(|a| a.control.stopped.load(Ordering::SeqCst))
    }

    /// Simula el fin (o error) del último track adjuntado
    pub fn finish_latest(&self, error: Option<String>) {
        let slot = self.attaches.lock().last().map(|a| a.slot.clone());
        if let Some(notifier) = slot.and_then(|slot| slot.lock().take()) {
            notifier.notify(error);
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn attach(
        &self,
        source: &SourceDescriptor,
        params: &TransportParams,
        notifier: CompletionNotifier,
    ) -> PlayerResult<AttachHandle> {
        if self.fail_attaches.load(Ordering::SeqCst) {
            return Err(PlayerError::Transport("attach rechazado".to_string()));
        }

        let id = notifier.id();
        let slot: NotifierSlot = Arc::new(Mutex::new(Some(notifier)));
        let control = Arc::new(FakeControl {
            slot: slot.clone(),
            ..FakeControl::default()
        });

        self.attaches.lock().push(FakeAttach {
            id,
            source: source.clone(),
            params: params.clone(),
            slot,
            control: control.clone(),
        });

        Ok(AttachHandle::new(id, control))
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }
}
