use thiserror::Error;

use super::conversation_state::{ModelId, UnknownModel};

/// One line of user input, interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ask(String),
    SelectModel(ModelId),
    ListModels,
    History,
    Clear,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Usage: /model <name>")]
    MissingModel,

    #[error(transparent)]
    UnknownModel(#[from] UnknownModel),

    #[error("Unknown command: {0}. Type /help to see the available commands")]
    Unknown(String),
}

impl Command {
    /// Parse a line. Blank lines yield `Ok(None)`.
    pub fn parse(input: &str) -> Result<Option<Self>, CommandError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let Some(rest) = trimmed.strip_prefix('/') else {
            // Only the line terminator is dropped; the message keeps its layout.
            let text = input.trim_end_matches(['\r', '\n']);
            return Ok(Some(Command::Ask(text.to_string())));
        };

        let mut parts = rest.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).filter(|s| !s.is_empty());

        let command = match name {
            "model" => match arg {
                Some(model) => Command::SelectModel(model.parse()?),
                None => return Err(CommandError::MissingModel),
            },
            "models" => Command::ListModels,
            "history" => Command::History,
            "clear" => Command::Clear,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => return Err(CommandError::Unknown(format!("/{}", name))),
        };

        Ok(Some(command))
    }
}
