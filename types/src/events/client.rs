/// Control actions the client can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientAction {
    /// No more microphone audio in this turn.
    AudioEnd,
    /// Run the operation the assistant proposed.
    Confirm,
    /// Discard the operation the assistant proposed.
    Cancel,
}

/// `{"action": ..., "sql"?: ...}`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ActionEvent {
    action: ClientAction,

    /// The statement being confirmed, echoed back to the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sql: Option<String>,
}

impl ActionEvent {
    pub fn new(action: ClientAction) -> Self {
        Self { action, sql: None }
    }

    pub fn with_sql(mut self, sql: &str) -> Self {
        self.sql = Some(sql.to_string());
        self
    }
}

/// `{"prompt": ..., "userId": ...}`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PromptEvent {
    prompt: String,

    #[serde(rename = "userId")]
    user_id: i64,
}

impl PromptEvent {
    pub fn new(prompt: &str, user_id: i64) -> Self {
        Self {
            prompt: prompt.to_string(),
            user_id,
        }
    }
}

/// JSON text frames sent to the backend.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ClientEvent {
    Action(ActionEvent),
    Prompt(PromptEvent),
}

impl ClientEvent {
    pub fn audio_end() -> Self {
        Self::Action(ActionEvent::new(ClientAction::AudioEnd))
    }

    pub fn prompt(prompt: &str, user_id: i64) -> Self {
        Self::Prompt(PromptEvent::new(prompt, user_id))
    }

    pub fn action(action: ClientAction, sql: Option<&str>) -> Self {
        let event = ActionEvent::new(action);
        Self::Action(match sql {
            Some(sql) => event.with_sql(sql),
            None => event,
        })
    }
}
