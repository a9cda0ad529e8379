use serde::Deserialize;
use serde_json::Value;

/// Typed view over the fields an assistant message may carry.
///
/// The transport forwards messages as raw JSON; UI code that wants the
/// well-known fields reads them through this.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AssistantMessage {
    /// Progress text ("Thinking...", "Offline") rather than a reply
    #[serde(default)]
    status: Option<String>,

    #[serde(default)]
    display_message: Option<String>,

    /// Statement the assistant wants to run once the user confirms
    #[serde(default)]
    sql_to_execute: Option<String>,

    #[serde(default)]
    operation_type: Option<String>,

    #[serde(default)]
    requires_confirmation: bool,
}

impl AssistantMessage {
    pub fn from_value(json: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(json)
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn is_status(&self) -> bool {
        self.status.is_some()
    }

    pub fn display_message(&self) -> &str {
        self.display_message.as_deref().unwrap_or_default()
    }

    pub fn sql_to_execute(&self) -> Option<&str> {
        self.sql_to_execute.as_deref().filter(|sql| !sql.is_empty())
    }

    pub fn operation_type(&self) -> Option<&str> {
        self.operation_type.as_deref().filter(|op| !op.is_empty())
    }

    pub fn requires_confirmation(&self) -> bool {
        self.requires_confirmation
    }
}
