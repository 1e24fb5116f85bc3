use thiserror::Error;

/// Shown to the user when the API key cannot be found.
pub const CREDENTIAL_REMEDIATION: &str = "Please create a .env file in your project directory and add your Groq API key to it.

Example: GROQ_API_KEY='your_key_here'";

#[derive(Debug, Error)]
pub enum ChatError {
    /// The API credential is absent. Nothing may be sent to the model.
    #[error("{var} not found in the environment or .env file")]
    ConfigurationMissing { var: String },

    /// The model client could not be constructed.
    #[error("Failed to initialize the model: {0}")]
    ModelInitializationFailed(String),

    /// A single reply request failed. The session stays usable.
    #[error("Model unavailable: {detail}")]
    ModelUnavailable { detail: String },

    /// A reply was requested while another one is still in flight.
    #[error("A reply is already pending for this session")]
    SessionBusy,

    /// A reply arrived after the session was reset and was thrown away.
    #[error("Reply discarded because the conversation was reset")]
    StaleReply,

    #[error("Message cannot be empty")]
    EmptyInput,
}
