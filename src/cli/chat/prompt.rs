use rustyline::{Config, Editor, Result};

use super::conversation_state::ModelId;

pub fn generate_prompt(model: ModelId) -> String {
    format!("[{}] > ", model.alias())
}

pub fn rl() -> Result<Editor<()>> {
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    Editor::with_config(config)
}
