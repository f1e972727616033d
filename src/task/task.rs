//! Task record and lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::factors::{normalize_factors, FactorDefinition, FactorValue};

/// Opaque task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Lifecycle state of a task.
///
/// ```text
/// Start -> Clarifying -> AwaitingClarification -> (resume) -> Clarifying
///                     -> Extracting -> Processing -> Enriching -> Formatting -> Completed
/// any non-terminal state -> Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Start,
    Clarifying,
    AwaitingClarification,
    Extracting,
    Processing,
    Enriching,
    Formatting,
    Completed,
    Error,
}

impl TaskState {
    /// Internal state name as exposed in projections.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Clarifying => "CLARIFYING",
            Self::AwaitingClarification => "AWAITING_CLARIFICATION",
            Self::Extracting => "EXTRACTING",
            Self::Processing => "PROCESSING",
            Self::Enriching => "ENRICHING",
            Self::Formatting => "FORMATTING",
            Self::Completed => "COMPLETED",
            Self::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Whether `self -> next` is a legal lifecycle edge.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Completed | Error, _) => false,
            (_, Error) => true,
            (Start, Clarifying)
            | (Clarifying, AwaitingClarification)
            | (Clarifying, Extracting)
            | (AwaitingClarification, Clarifying)
            | (Extracting, Processing)
            | (Processing, Enriching)
            | (Enriching, Formatting)
            | (Formatting, Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Illegal task transition {from} -> {to}")]
pub struct TransitionError {
    pub from: TaskState,
    pub to: TaskState,
}

/// One committed state change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateTransition {
    pub state: TaskState,
    pub at: DateTime<Utc>,
}

/// One extracted attribute of an item.
///
/// `definition` is processing metadata: it is never serialized and is cleared
/// once the value has been refined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: FactorValue,
    #[serde(skip)]
    pub definition: Option<FactorDefinition>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<FactorValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            definition: None,
        }
    }

    pub fn with_definition(mut self, definition: FactorDefinition) -> Self {
        self.definition = Some(definition);
        self
    }
}

/// One discovered entity (e.g. a product).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "product_name")]
    pub name: Option<String>,
    #[serde(rename = "extracted_factors", default)]
    pub attributes: Vec<Attribute>,
}

impl Item {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Non-blank item name, if any.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Whether any attribute still carries processing metadata.
    pub fn has_processing_metadata(&self) -> bool {
        self.attributes.iter().any(|a| a.definition.is_some())
    }
}

/// One end-to-end research request and its evolving state.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    #[serde(rename = "task_id")]
    pub id: TaskId,
    #[serde(rename = "current_state")]
    state: TaskState,
    pub initial_query: String,
    /// Resolved query, or the pending question while awaiting clarification.
    pub clarified_query: String,
    /// Deduplicated, sorted factor names.
    pub comparison_factors: Vec<String>,
    /// Empty until discovery succeeds.
    pub items: Vec<Item>,
    pub formatted_output: Option<String>,
    #[serde(rename = "error_message")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    transitions: Vec<StateTransition>,
}

impl Task {
    pub fn new(initial_query: impl Into<String>, comparison_factors: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            state: TaskState::Start,
            initial_query: initial_query.into(),
            clarified_query: String::new(),
            comparison_factors: normalize_factors(comparison_factors),
            items: Vec::new(),
            formatted_output: None,
            error: None,
            created_at: now,
            updated_at: now,
            transitions: vec![StateTransition {
                state: TaskState::Start,
                at: now,
            }],
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    /// Query the clarification phase should look at.
    pub fn working_query(&self) -> &str {
        if self.clarified_query.is_empty() {
            &self.initial_query
        } else {
            &self.clarified_query
        }
    }

    /// Move to `next`, rejecting illegal edges.
    pub fn transition(&mut self, next: TaskState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        let now = Utc::now();
        self.state = next;
        self.updated_at = now;
        self.transitions.push(StateTransition { state: next, at: now });
        Ok(())
    }

    /// Finish successfully with the rendered report.
    pub fn complete(&mut self, output: String) -> Result<(), TransitionError> {
        self.transition(TaskState::Completed)?;
        self.formatted_output = Some(output);
        Ok(())
    }

    /// Move to `Error` and capture the message. Rejected once the task is
    /// terminal.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(TaskState::Error)?;
        self.error = Some(message.into());
        Ok(())
    }
}
