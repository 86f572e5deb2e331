use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Motivo por el que una sesión se destruye
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    Idle,
    Alone,
    Leave,
    LinkLost,
    GuildRemoved,
    Shutdown,
}

impl TeardownReason {
    pub fn label(&self) -> &'static str {
        match self {
            TeardownReason::Idle => "idle timeout",
            TeardownReason::Alone => "alone in channel",
            TeardownReason::Leave => "leave command",
            TeardownReason::LinkLost => "voice link lost",
            TeardownReason::GuildRemoved => "guild removed",
            TeardownReason::Shutdown => "shutdown",
        }
    }
}

/// Pedido de un temporizador vencido al reaper del registro.
///
/// `instance` identifica la sesión que armó el temporizador: una sesión nueva
/// del mismo guild nunca se destruye por un temporizador viejo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapRequest {
    pub guild: GuildId,
    pub reason: TeardownReason,
    pub instance: u64,
}

struct ArmedTimer {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Un temporizador cancelable. Rearmarlo reemplaza la instancia anterior.
#[derive(Default)]
pub struct TimerSlot {
    current: Mutex<Option<ArmedTimer>>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arma una instancia nueva que ejecuta `on_expire` tras `after`, salvo que
    /// se cancele antes. La instancia anterior se cancela y se espera.
    pub async fn arm<F>(&self, after: Duration, parent: &CancellationToken, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let token = parent.child_token();
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(after) => on_expire(),
            }
        });

        let previous = self.current.lock().replace(ArmedTimer { token, handle });
        if let Some(previous) = previous {
            previous.token.cancel();
            let _ = previous.handle.await;
        }
    }

    /// Cancela la instancia armada y espera a que su tarea termine.
    pub async fn cancel(&self) {
        let armed = self.current.lock().take();
        if let Some(armed) = armed {
            armed.token.cancel();
            let _ = armed.handle.await;
            debug!("⏲️ Temporizador cancelado");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|armed| !armed.handle.is_finished())
    }
}

/// Acción de vencimiento: solo envía el pedido al reaper, nunca toca la sesión.
pub fn reap_on_expire(
    reaper: flume::Sender<ReapRequest>,
    request: ReapRequest,
) -> impl FnOnce() + Send + 'static {
    move || {
        debug!(
            "⏲️ [{}] temporizador vencido: {}",
            request.guild,
            request.reason.label()
        );
        let _ = reaper.send(request);
    }
}
