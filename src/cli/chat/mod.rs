pub mod command;
pub mod conversation_state;
pub mod prompt;

use std::env;
use std::io::Write;
use std::process::ExitCode;

use color_print::cformat;
use command::Command;
use conversation_state::{ConversationState, ContextWindow, ModelId, Role};
use eyre::{bail, Result};
use prompt::generate_prompt;
use rustyline::error::ReadlineError;
use tracing::{debug, error};

use crate::config::{ApiKey, ClientSettings};
use crate::error::{ChatError, CREDENTIAL_REMEDIATION};
use crate::groq_client::{GroqClient, ModelClient};

const WELCOME_TEXT: &str = "
Hi, I'm Groq Chat. Pick a model and start chatting!

Switching models starts a fresh conversation.

/models       List the available models
/help         Show the help dialogue
/quit         Quit the application
";

const HELP_TEXT: &str = "
Groq Chat CLI

/model <name> Switch model (clears the conversation)
/models       List the available models
/history      Show the conversation so far
/clear        Clear the conversation history
/help         Show this help dialogue
/quit         Quit the application
";

/// What the caller should do after a line has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// The line was accepted but the model did not answer.
    Failed,
    Quit,
}

/// Looks up an environment-style variable by name.
pub type KeyLookup = Box<dyn Fn(&str) -> Option<String>>;

pub struct ChatContext {
    output: Box<dyn Write>,
    input: Option<String>,
    interactive: bool,
    conversation_state: ConversationState,
    settings: ClientSettings,
    key_lookup: KeyLookup,
    model_client: Option<Box<dyn ModelClient>>,
}

impl ChatContext {
    pub fn new(
        output: Box<dyn Write>,
        input: Option<String>,
        interactive: bool,
        model: ModelId,
        context_window: ContextWindow,
        settings: ClientSettings,
    ) -> Self {
        Self {
            output,
            input,
            interactive,
            conversation_state: ConversationState::new(model).with_context_window(context_window),
            settings,
            key_lookup: Box::new(|name| env::var(name).ok()),
            model_client: None,
        }
    }

    /// Use `client` instead of building a Groq client from the environment.
    pub fn with_client(mut self, client: Box<dyn ModelClient>) -> Self {
        self.model_client = Some(client);
        self
    }

    /// Resolve the API key through `lookup` instead of the process environment.
    pub fn with_key_lookup(mut self, lookup: impl Fn(&str) -> Option<String> + 'static) -> Self {
        self.key_lookup = Box::new(lookup);
        self
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation_state
    }

    pub async fn run(&mut self) -> Result<ExitCode> {
        if self.model_client.is_none() {
            let client = ApiKey::resolve(self.key_lookup.as_ref())
                .and_then(|api_key| GroqClient::new(&api_key, &self.settings));
            match client {
                Ok(client) => self.model_client = Some(Box::new(client)),
                Err(e) => {
                    error!("Model client initialization failed: {}", e);
                    self.report_fatal(&e)?;
                    return Ok(ExitCode::FAILURE);
                }
            }
        }

        // Non-interactive mode (single query)
        if let Some(input) = self.input.take() {
            return match self.handle_input(&input).await? {
                Outcome::Failed => Ok(ExitCode::FAILURE),
                _ => Ok(ExitCode::SUCCESS),
            };
        }

        if self.interactive {
            self.print_welcome()?;
            self.run_interactive().await?;
        }

        Ok(ExitCode::SUCCESS)
    }

    fn report_fatal(&mut self, e: &ChatError) -> Result<()> {
        writeln!(self.output, "{}", cformat!("<red><bold>Error:</></> {}", e))?;
        if matches!(e, ChatError::ConfigurationMissing { .. }) {
            writeln!(self.output, "{}", CREDENTIAL_REMEDIATION)?;
        }
        Ok(())
    }

    fn print_welcome(&mut self) -> Result<()> {
        writeln!(self.output, "{}", WELCOME_TEXT)?;
        writeln!(
            self.output,
            "{}",
            cformat!("Current model: <bold>{}</>", self.conversation_state.active_model())
        )?;
        Ok(())
    }

    async fn run_interactive(&mut self) -> Result<()> {
        let mut rl = prompt::rl()?;

        loop {
            let prompt_text = generate_prompt(self.conversation_state.active_model());

            match rl.readline(&prompt_text) {
                Ok(line) => {
                    if self.handle_input(&line).await? == Outcome::Quit {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
                Err(e) => {
                    writeln!(self.output, "Error: {}", e)?;
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle one line of user input.
    pub async fn handle_input(&mut self, input: &str) -> Result<Outcome> {
        let command = match Command::parse(input) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(Outcome::Continue),
            Err(e) => {
                writeln!(self.output, "{}", e)?;
                return Ok(Outcome::Continue);
            }
        };

        match command {
            Command::Ask(text) => return self.on_user_submit(&text).await,
            Command::SelectModel(model) => self.on_model_selected(model)?,
            Command::ListModels => self.print_models()?,
            Command::History => self.render_history()?,
            Command::Clear => {
                self.conversation_state.clear();
                writeln!(self.output, "Conversation cleared.")?;
            }
            Command::Help => writeln!(self.output, "{}", HELP_TEXT)?,
            Command::Quit => return Ok(Outcome::Quit),
        }

        Ok(Outcome::Continue)
    }

    fn on_model_selected(&mut self, model: ModelId) -> Result<()> {
        if self.conversation_state.select_model(model) {
            writeln!(
                self.output,
                "{}",
                cformat!("Switched to <bold>{}</>. Conversation cleared.", model)
            )?;
        } else {
            writeln!(self.output, "Already using {}.", model)?;
        }
        Ok(())
    }

    async fn on_user_submit(&mut self, text: &str) -> Result<Outcome> {
        let client = match self.model_client.as_deref() {
            Some(client) => client,
            None => bail!("Model client not initialized"),
        };

        debug!(
            "Requesting reply from {} with {} turns of history ({:?} context)",
            self.conversation_state.active_model(),
            self.conversation_state.len(),
            self.conversation_state.context_window()
        );

        match self.conversation_state.request_reply(client, text).await {
            Ok(reply) => {
                writeln!(self.output, "{}", cformat!("<green><bold>assistant:</></> {}", reply))?;
                Ok(Outcome::Continue)
            }
            Err(e) => {
                writeln!(self.output, "{}", cformat!("<red><bold>Error:</></> {}", e))?;
                Ok(Outcome::Failed)
            }
        }
    }

    fn print_models(&mut self) -> Result<()> {
        let active = self.conversation_state.active_model();
        for model in ModelId::ALL {
            let marker = if model == active { "*" } else { " " };
            writeln!(
                self.output,
                "{} {:<14} {:<20} {}",
                marker,
                model.alias(),
                model.api_name(),
                model.description()
            )?;
        }
        Ok(())
    }

    fn render_history(&mut self) -> Result<()> {
        let turns = self.conversation_state.render_snapshot();
        if turns.is_empty() {
            writeln!(self.output, "No messages yet.")?;
            return Ok(());
        }

        for turn in turns {
            let line = match turn.role {
                Role::User => cformat!("<cyan><bold>user:</></> {}", turn.content),
                Role::Assistant => cformat!("<green><bold>assistant:</></> {}", turn.content),
            };
            writeln!(self.output, "{}", line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    use super::*;
    use crate::cli::chat::conversation_state::Turn;
    use crate::groq_client::fake::ScriptedClient;
    use crate::groq_client::ClientError;

    #[derive(Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.borrow()).to_string()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn chat(
        replies: impl IntoIterator<Item = std::result::Result<String, ClientError>>,
        input: Option<&str>,
    ) -> (ChatContext, SharedBuffer) {
        let buffer = SharedBuffer::default();
        let context = ChatContext::new(
            Box::new(buffer.clone()),
            input.map(str::to_string),
            false,
            ModelId::Small,
            ContextWindow::Full,
            ClientSettings::default(),
        )
        .with_client(Box::new(ScriptedClient::new(replies)));
        (context, buffer)
    }

    #[tokio::test]
    async fn test_submit_renders_reply() {
        let (mut chat, output) = chat([Ok("Hi there".to_string())], None);

        let outcome = chat.handle_input("Hello").await.unwrap();

        assert_eq!(outcome, Outcome::Continue);
        assert!(output.contents().contains("Hi there"));
        assert_eq!(
            chat.conversation().render_snapshot(),
            &[Turn::user("Hello"), Turn::assistant("Hi there")]
        );
    }

    #[tokio::test]
    async fn test_failed_reply_is_reported_and_session_survives() {
        let (mut chat, output) = chat(
            [
                Err(ClientError::Api {
                    status: 429,
                    message: "rate limited".to_string(),
                }),
                Ok("Pong".to_string()),
            ],
            None,
        );

        assert_eq!(chat.handle_input("Ping").await.unwrap(), Outcome::Failed);
        assert!(output.contents().contains("rate limited"));
        assert_eq!(chat.conversation().render_snapshot(), &[Turn::user("Ping")]);

        assert_eq!(chat.handle_input("Ping?").await.unwrap(), Outcome::Continue);
        assert_eq!(chat.conversation().len(), 3);
    }

    #[tokio::test]
    async fn test_model_switch_clears_conversation() {
        let (mut chat, output) = chat([Ok("Hi there".to_string())], None);
        chat.handle_input("Hello").await.unwrap();

        chat.handle_input("/model model-large").await.unwrap();

        assert!(chat.conversation().is_empty());
        assert_eq!(chat.conversation().active_model(), ModelId::Large);
        assert!(output.contents().contains("Conversation cleared."));

        chat.handle_input("/model llama3-70b-8192").await.unwrap();
        assert!(output.contents().contains("Already using llama3-70b-8192."));
    }

    #[tokio::test]
    async fn test_unknown_model_keeps_state() {
        let (mut chat, output) = chat([Ok("Hi there".to_string())], None);
        chat.handle_input("Hello").await.unwrap();

        let outcome = chat.handle_input("/model gpt-4").await.unwrap();

        assert_eq!(outcome, Outcome::Continue);
        assert!(output.contents().contains("Unknown model 'gpt-4'"));
        assert_eq!(chat.conversation().len(), 2);
        assert_eq!(chat.conversation().active_model(), ModelId::Small);
    }

    #[tokio::test]
    async fn test_history_and_clear() {
        let (mut chat, output) = chat([Ok("Hi there".to_string())], None);

        chat.handle_input("/history").await.unwrap();
        assert!(output.contents().contains("No messages yet."));

        chat.handle_input("Hello").await.unwrap();
        chat.handle_input("/history").await.unwrap();
        assert!(output.contents().contains("Hello"));

        chat.handle_input("/clear").await.unwrap();
        assert!(chat.conversation().is_empty());
        assert_eq!(chat.conversation().active_model(), ModelId::Small);
    }

    #[tokio::test]
    async fn test_list_models_marks_active() {
        let (mut chat, output) = chat([], None);

        chat.handle_input("/models").await.unwrap();

        let contents = output.contents();
        assert!(contents.contains("* model-small"));
        for model in ModelId::ALL {
            assert!(contents.contains(model.api_name()));
        }
    }

    #[tokio::test]
    async fn test_quit_and_blank_lines() {
        let (mut chat, _) = chat([], None);

        assert_eq!(chat.handle_input("   ").await.unwrap(), Outcome::Continue);
        assert_eq!(chat.handle_input("/quit").await.unwrap(), Outcome::Quit);
        assert!(chat.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_stops_before_any_request() {
        let buffer = SharedBuffer::default();
        let mut chat = ChatContext::new(
            Box::new(buffer.clone()),
            Some("Hello".to_string()),
            false,
            ModelId::Small,
            ContextWindow::Full,
            ClientSettings::default(),
        )
        .with_key_lookup(|_| None);

        let code = chat.run().await.unwrap();

        assert_eq!(format!("{:?}", code), format!("{:?}", ExitCode::FAILURE));
        let contents = buffer.contents();
        assert!(contents.contains("GROQ_API_KEY not found"));
        assert!(contents.contains("GROQ_API_KEY='your_key_here'"));
        assert!(chat.model_client.is_none());
        assert!(chat.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_unbuildable_client_is_reported_once() {
        let buffer = SharedBuffer::default();
        let settings = ClientSettings {
            base_url: "not a url".to_string(),
            ..ClientSettings::default()
        };
        let mut chat = ChatContext::new(
            Box::new(buffer.clone()),
            Some("Hello".to_string()),
            false,
            ModelId::Small,
            ContextWindow::Full,
            settings,
        )
        .with_key_lookup(|_| Some("gsk_test".to_string()));

        let code = chat.run().await.unwrap();

        assert_eq!(format!("{:?}", code), format!("{:?}", ExitCode::FAILURE));
        let contents = buffer.contents();
        assert_eq!(contents.matches("Failed to initialize the model").count(), 1);
        assert!(!contents.contains("your_key_here"));
        assert!(chat.model_client.is_none());
        assert!(chat.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_input_whitespace_is_kept() {
        let (mut chat, _) = chat([Ok("noted".to_string())], None);

        chat.handle_input("    indented code  \n").await.unwrap();

        assert_eq!(chat.conversation().render_snapshot()[0], Turn::user("    indented code  "));
    }

    #[tokio::test]
    async fn test_single_shot_input() {
        let (mut chat, output) = chat([Ok("Hi there".to_string())], Some("Hello"));

        chat.run().await.unwrap();

        assert!(output.contents().contains("Hi there"));
        assert_eq!(chat.conversation().len(), 2);
    }
}
