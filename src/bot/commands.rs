use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

pub fn all_commands() -> Vec<CreateCommand> {
    vec![
        // Reproducción
        play_command(),
        CreateCommand::new("skip").description("Salta a la siguiente canción"),
        CreateCommand::new("voteskip").description("Vota para saltar la canción actual"),
        CreateCommand::new("pause").description("Pausa la reproducción actual"),
        CreateCommand::new("resume").description("Reanuda la reproducción pausada"),
        CreateCommand::new("stop").description("Detiene la reproducción y limpia la cola"),
        CreateCommand::new("previous").description("Vuelve a la canción anterior"),
        CreateCommand::new("replay").description("Reinicia la canción actual"),
        position_command("jump", "Salta a una posición de la cola"),
        volume_command(),
        // Cola
        queue_command(),
        CreateCommand::new("now").description("Muestra información de la canción actual"),
        CreateCommand::new("shuffle").description("Mezcla la cola"),
        loop_command(),
        CreateCommand::new("clear").description("Limpia la cola de reproducción"),
        position_command("remove", "Quita una canción de la cola"),
        move_command(),
        CreateCommand::new("history").description("Muestra las últimas canciones reproducidas"),
        // Playlist
        CreateCommand::new("pl-stop").description("Cancela la playlist en curso y limpia la cola"),
        CreateCommand::new("pl-info").description("Muestra el progreso de la playlist"),
        // Conexión
        CreateCommand::new("join").description("Conecta el bot a tu canal de voz"),
        CreateCommand::new("leave").description("Desconecta el bot del canal de voz"),
        CreateCommand::new("summary").description("Muestra el resumen de la sesión"),
    ]
}

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce una canción o playlist")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "URL o término de búsqueda",
            )
            .required(true),
        )
}

fn position_command(name: &str, description: &str) -> CreateCommand {
    CreateCommand::new(name).description(description).add_option(
        CreateCommandOption::new(CommandOptionType::Integer, "position", "Posición en la cola")
            .min_int_value(1)
            .required(true),
    )
}

fn move_command() -> CreateCommand {
    CreateCommand::new("move")
        .description("Mueve una canción dentro de la cola")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "from", "Posición actual")
                .min_int_value(1)
                .required(true),
        )
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "to", "Nueva posición")
                .min_int_value(1)
                .required(true),
        )
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue")
        .description("Muestra la cola de reproducción")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "page", "Número de página")
                .min_int_value(1),
        )
}

fn loop_command() -> CreateCommand {
    CreateCommand::new("loop")
        .description("Configura el modo de repetición")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "mode", "Modo de repetición")
                .add_string_choice("Desactivar", "off")
                .add_string_choice("Canción", "track")
                .add_string_choice("Cola", "queue")
                .required(true),
        )
}

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Ajusta el volumen de reproducción")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "level",
                "Nivel de volumen (0-200)",
            )
            .min_int_value(0)
            .max_int_value(200),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_every_session_command() {
        let names: Vec<String> = all_commands()
            .iter()
            .filter_map(|c| serde_json::to_value(c).ok())
            .filter_map(|v| v["name"].as_str().map(str::to_string))
            .collect();

        for expected in [
            "play", "skip", "voteskip", "pause", "resume", "stop", "leave", "join", "queue",
            "now", "shuffle", "loop", "clear", "volume", "previous", "replay", "jump", "remove",
            "move", "history", "pl-stop", "pl-info", "summary",
        ] {
            assert!(names.iter().any(|n| n == expected), "falta /{}", expected);
        }
        assert_eq!(names.len(), 23);
    }
}
