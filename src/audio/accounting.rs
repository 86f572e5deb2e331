use chrono::{DateTime, Utc};
use serenity::model::id::UserId;
use std::time::Duration;

use super::track::Track;

const RECENT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct PlayRecord {
    pub title: String,
    pub uploader: String,
    pub url: String,
    pub requester_id: UserId,
    pub requester_name: String,
    pub started_at: DateTime<Utc>,
    pub duration: Option<Duration>,
}

impl PlayRecord {
    fn new(track: &Track, started_at: DateTime<Utc>) -> Self {
        Self {
            title: track.title().to_string(),
            uploader: track.uploader().to_string(),
            url: track.url().to_string(),
            requester_id: track.requester().id,
            requester_name: track.requester().name.clone(),
            started_at,
            duration: track.duration(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub track_count: usize,
    pub session_duration: Duration,
    pub total_listened: Duration,
    /// Últimas 10 reproducciones, la más antigua primero
    pub recent: Vec<PlayRecord>,
    pub ended_reason: Option<String>,
}

/// Registro de lo reproducido durante una sesión de voz.
#[derive(Debug, Default)]
pub struct SessionAccounting {
    records: Vec<PlayRecord>,
    started_at: Option<DateTime<Utc>>,
    position: usize,
}

impl SessionAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra una reproducción. La sesión empieza con el primer registro.
    pub fn record_play(&mut self, track: &Track, started_at: DateTime<Utc>) {
        if self.started_at.is_none() {
            self.started_at = Some(started_at);
        }
        self.records.push(PlayRecord::new(track, started_at));
    }

    /// Cuenta un track que empezó a sonar y devuelve su posición en la sesión
    pub fn next_position(&mut self) -> usize {
        self.position += 1;
        self.position
    }

    pub fn is_active(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn summarize(&self) -> SessionSummary {
        self.summarize_at(Utc::now())
    }

    fn summarize_at(&self, now: DateTime<Utc>) -> SessionSummary {
        let session_duration = self
            .started_at
            .and_then(|start| (now - start).to_std().ok())
            .unwrap_or_default();

        let total_listened = self.records.iter().filter_map(|r| r.duration).sum();
        let skip = self.records.len().saturating_sub(RECENT_LIMIT);

        SessionSummary {
            track_count: self.records.len(),
            session_duration,
            total_listened,
            recent: self.records[skip..].to_vec(),
            ended_reason: None,
        }
    }

    /// Cierra la sesión. Sin registros no hay resumen que emitir.
    pub fn end_session(&mut self, reason: &str) -> Option<SessionSummary> {
        let summary = if self.records.is_empty() {
            None
        } else {
            let mut summary = self.summarize();
            summary.ended_reason = Some(reason.to_string());
            Some(summary)
        };

        self.records.clear();
        self.started_at = None;
        self.position = 0;
        summary
    }
}
