use serenity::model::id::GuildId;
use thiserror::Error;

/// Resultados de error distinguibles que el núcleo devuelve a la capa de comandos.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlayerError {
    /// Mutación sobre una sesión ya destruida. Siempre es un no-op.
    #[error("la sesión del guild {0} ya fue cerrada")]
    SessionClosed(GuildId),

    #[error("el bot no está conectado a un canal de voz")]
    NotConnected,

    #[error("se perdió la conexión de voz")]
    LinkLost,

    #[error("no hay nada reproduciéndose")]
    NothingPlaying,

    #[error("la cola está vacía")]
    EmptyQueue,

    #[error("no hay suficientes canciones en la cola ({0})")]
    NotEnoughTracks(usize),

    #[error("posición inválida {position}, la cola tiene {len} canciones")]
    InvalidPosition { position: usize, len: usize },

    #[error("no hay canción anterior")]
    NoPrevious,

    #[error("no hay ninguna playlist activa")]
    NoPlaylist,

    #[error("la playlist está vacía o no disponible")]
    EmptyPlaylist,

    #[error("no se encontraron resultados: {0}")]
    Resolution(String),

    #[error("error de transporte de audio: {0}")]
    Transport(String),
}

pub type PlayerResult<T> = Result<T, PlayerError>;
