use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serenity::model::id::UserId;
use std::{
    collections::{HashSet, VecDeque},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tracing::{debug, info};

use super::track::{Requester, Track, TrackId};
use crate::error::{PlayerError, PlayerResult};

static NEXT_PLAYLIST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    Off,
    Track,
    Queue,
}

impl LoopMode {
    pub fn label(&self) -> &'static str {
        match self {
            LoopMode::Off => "Off",
            LoopMode::Track => "Track",
            LoopMode::Queue => "Queue",
        }
    }
}

/// Metadatos de la playlist que está poblando la cola.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistContext {
    pub id: u64,
    pub title: String,
    pub total_count: usize,
    pub track_index: usize,
    pub added_by: Requester,
    pub added_at: DateTime<Utc>,
    pub total_duration: Duration,
}

impl PlaylistContext {
    pub fn new(
        title: impl Into<String>,
        total_count: usize,
        added_by: Requester,
        total_duration: Duration,
    ) -> Self {
        Self {
            id: NEXT_PLAYLIST_ID.fetch_add(1, Ordering::Relaxed),
            title: title.into(),
            total_count,
            track_index: 0,
            added_by,
            added_at: Utc::now(),
            total_duration,
        }
    }
}

/// Votos necesarios para saltar: `max(2, ceil(miembros * ratio))`.
pub fn votes_needed(listeners: usize, ratio: f64) -> usize {
    let scaled = (listeners as f64 * ratio).ceil() as usize;
    scaled.max(2)
}

/// Motor de cola de una sesión.
///
/// Todas las mutaciones ocurren bajo el lock exclusivo de la sesión, así que
/// ninguna operación aquí es async ni puede fallar a mitad de camino.
#[derive(Debug)]
pub struct QueueEngine {
    items: VecDeque<Track>,
    current: Option<Track>,
    previous: Option<Track>,
    history: VecDeque<Track>,
    max_history: usize,
    loop_mode: LoopMode,
    playlist: Option<PlaylistContext>,
    finished_playlist: Option<PlaylistContext>,
    skip_votes: HashSet<UserId>,
}

impl QueueEngine {
    pub fn new(max_history: usize) -> Self {
        Self {
            items: VecDeque::new(),
            current: None,
            previous: None,
            history: VecDeque::new(),
            max_history,
            loop_mode: LoopMode::Off,
            playlist: None,
            finished_playlist: None,
            skip_votes: HashSet::new(),
        }
    }

    /// Agrega un track al final de la cola
    pub fn enqueue(&mut self, track: Track) {
        debug!("➕ Agregado a la cola: {}", track.title());
        self.items.push_back(track);
    }

    /// Inserta un track al frente (previous / replay)
    pub fn insert_front(&mut self, track: Track) {
        self.items.push_front(track);
    }

    /// Única función de transición: elige el siguiente track según el modo de loop.
    pub fn advance(&mut self) -> Option<Track> {
        if self.loop_mode == LoopMode::Track {
            if let Some(current) = &self.current {
                self.skip_votes.clear();
                debug!("🔂 Repitiendo track: {}", current.title());
                return Some(current.clone());
            }
        }

        if let Some(outgoing) = self.current.take() {
            self.retire(outgoing);
        }

        match self.items.pop_front() {
            Some(next) => {
                self.skip_votes.clear();

                if let Some(playlist) = self.playlist.as_mut() {
                    playlist.track_index += 1;
                }

                if self.loop_mode == LoopMode::Queue {
                    self.items.push_back(next.clone());
                }

                info!("➡️ Siguiente en cola: {}", next.title());
                self.current = Some(next.clone());
                Some(next)
            }
            None => {
                if let Some(playlist) = self.playlist.take() {
                    info!("📜 Playlist terminada: {}", playlist.title);
                    self.finished_playlist = Some(playlist);
                }
                debug!("📭 Cola vacía, no hay siguiente track");
                None
            }
        }
    }

    /// Deshace un `advance()` cuyo track no pudo arrancar.
    ///
    /// El track vuelve al frente de la cola, se quita la copia del loop de cola
    /// y el cursor de la playlist retrocede.
    pub fn requeue_current(&mut self) -> Option<Track> {
        let current = self.current.take()?;

        if self.loop_mode == LoopMode::Queue
            && self.items.back().map(Track::id) == Some(current.id())
        {
            self.items.pop_back();
        }

        if let Some(playlist) = self.playlist.as_mut() {
            playlist.track_index = playlist.track_index.saturating_sub(1);
        }

        debug!("↩️ Track devuelto al frente: {}", current.title());
        self.items.push_front(current.clone());
        Some(current)
    }

    /// Pasa el track actual al historial sin la repetición del loop de track.
    pub fn retire_current(&mut self) -> Option<Track> {
        let current = self.current.take()?;
        self.skip_votes.clear();
        self.retire(current.clone());
        Some(current)
    }

    /// Como `retire_current`, pero además quita las copias en cola del track.
    /// Un track roto no puede repetirse para siempre.
    pub fn drop_current(&mut self) -> Option<Track> {
        let current = self.retire_current()?;
        let id = current.id();
        self.items.retain(|t| t.id() != id);
        Some(current)
    }

    /// Vacía la cola liberando el almacenamiento de los tracks descartados.
    /// Devuelve cuántos tracks se quitaron.
    pub fn clear(&mut self) -> usize {
        let current_id = self.current.as_ref().map(Track::id);
        let removed = self.items.len();

        for track in self.items.drain(..) {
            if Some(track.id()) != current_id {
                track.release_storage();
            }
        }

        if removed > 0 {
            info!("🗑️ Cola limpiada ({} canciones)", removed);
        }
        removed
    }

    /// Vacía cola y track actual (teardown / pl-stop).
    pub fn clear_all(&mut self) -> usize {
        let removed = self.clear();
        if let Some(current) = self.current.take() {
            current.release_storage();
            self.retire(current);
        }
        self.skip_votes.clear();
        removed
    }

    /// Mezcla la cola en su lugar. Con menos de 2 tracks no hace nada.
    pub fn shuffle(&mut self) {
        if self.items.len() < 2 {
            return;
        }
        let mut rng = rand::thread_rng();
        self.items.make_contiguous().shuffle(&mut rng);
        info!("🔀 Cola mezclada");
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
        match mode {
            LoopMode::Off => info!("➡️ Repetición desactivada"),
            LoopMode::Track => info!("🔂 Repetir canción activado"),
            LoopMode::Queue => info!("🔁 Repetir cola activado"),
        }
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    /// Elimina un track de la cola (índice base 0)
    pub fn remove(&mut self, index: usize) -> PlayerResult<Track> {
        let len = self.items.len();
        let track = self
            .items
            .remove(index)
            .ok_or(PlayerError::InvalidPosition {
                position: index + 1,
                len,
            })?;

        if !self.holds(track.id()) {
            track.release_storage();
        }

        if let Some(playlist) = self.playlist.as_mut() {
            playlist.total_count = playlist.total_count.saturating_sub(1);
        }

        debug!("❌ Track eliminado en posición {}", index);
        Ok(track)
    }

    /// Mueve un track a una nueva posición (índices base 0)
    pub fn move_track(&mut self, from: usize, to: usize) -> PlayerResult<()> {
        let len = self.items.len();
        if from >= len || to >= len {
            return Err(PlayerError::InvalidPosition {
                position: from.max(to) + 1,
                len,
            });
        }

        if from != to {
            if let Some(track) = self.items.remove(from) {
                self.items.insert(to, track);
            }
            debug!("📍 Track movido de posición {} a {}", from, to);
        }

        Ok(())
    }

    /// Descarta los tracks anteriores a `index` para que sea el siguiente.
    pub fn skip_to(&mut self, index: usize) -> PlayerResult<usize> {
        let len = self.items.len();
        if index >= len {
            return Err(PlayerError::InvalidPosition {
                position: index + 1,
                len,
            });
        }

        let dropped: Vec<Track> = self.items.drain(..index).collect();
        for track in &dropped {
            if !self.holds(track.id()) {
                track.release_storage();
            }
        }

        if let Some(playlist) = self.playlist.as_mut() {
            playlist.track_index += dropped.len();
        }

        Ok(dropped.len())
    }

    /// `true` si algún slot reproducible (cola o actual) contiene el track.
    pub fn holds(&self, id: TrackId) -> bool {
        self.current.as_ref().map(Track::id) == Some(id)
            || self.items.iter().any(|t| t.id() == id)
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> Option<&Track> {
        self.previous.as_ref()
    }

    /// Historial, el más reciente primero
    pub fn history(&self) -> Vec<Track> {
        self.history.iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn front(&self) -> Option<&Track> {
        self.items.front()
    }

    // Playlist

    pub fn start_playlist(&mut self, context: PlaylistContext) {
        self.finished_playlist = None;
        self.playlist = Some(context);
    }

    pub fn playlist(&self) -> Option<&PlaylistContext> {
        self.playlist.as_ref()
    }

    /// Una entrada de la playlist `id` no se pudo resolver.
    pub fn playlist_entry_failed(&mut self, id: u64) {
        if let Some(playlist) = self.playlist.as_mut().filter(|p| p.id == id) {
            playlist.total_count = playlist.total_count.saturating_sub(1);
        }
    }

    pub fn stop_playlist(&mut self) -> Option<PlaylistContext> {
        self.finished_playlist = None;
        self.playlist.take()
    }

    /// Notificación de "playlist terminada", entregada una sola vez.
    pub fn take_finished_playlist(&mut self) -> Option<PlaylistContext> {
        self.finished_playlist.take()
    }

    // Votos

    /// Registra un voto. Devuelve `false` si el usuario ya había votado.
    pub fn add_skip_vote(&mut self, voter: UserId) -> bool {
        self.skip_votes.insert(voter)
    }

    pub fn skip_votes(&self) -> usize {
        self.skip_votes.len()
    }

    pub fn info(&self) -> QueueInfo {
        QueueInfo {
            current: self.current.clone(),
            items: self.items.iter().cloned().collect(),
            loop_mode: self.loop_mode,
            total_duration: self.total_duration(),
        }
    }

    fn retire(&mut self, track: Track) {
        self.previous = Some(track.clone());
        self.history.push_back(track);

        // Mantener solo los últimos N items
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }

    fn total_duration(&self) -> Duration {
        let queued: Duration = self.items.iter().filter_map(Track::duration).sum();
        let current = self
            .current
            .as_ref()
            .and_then(Track::duration)
            .unwrap_or_default();
        queued + current
    }
}

#[derive(Debug, Clone)]
pub struct QueueInfo {
    pub current: Option<Track>,
    pub items: Vec<Track>,
    pub loop_mode: LoopMode,
    pub total_duration: Duration,
}

impl QueueInfo {
    /// Obtiene una página específica de la cola (base 1)
    pub fn page(&self, page: usize, items_per_page: usize) -> QueuePage {
        let per_page = items_per_page.max(1);
        let total_items = self.items.len();
        let total_pages = if total_items == 0 {
            1
        } else {
            total_items.div_ceil(per_page)
        };
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * per_page;
        let end = (start + per_page).min(total_items);

        QueuePage {
            items: self.items[start..end].to_vec(),
            offset: start,
            current_page,
            total_pages,
            total_items,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuePage {
    pub items: Vec<Track>,
    pub offset: usize,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}
