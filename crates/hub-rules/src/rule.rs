//! Rule records
//!
//! A rule couples a condition tree with the action emitted when that tree
//! turns true. The last observed outcome is not part of the record; it lives
//! in whichever runner evaluates the rule.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hub_core::{RuleId, SensorId, SequenceId, StoreResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::condition::{Condition, ConditionError};

/// Longest accepted rule name, in characters
pub const MAX_NAME_LEN: usize = 32;

/// Longest accepted rule description, in characters
pub const MAX_DESCRIPTION_LEN: usize = 256;

/// Rule errors
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Failed to parse rule: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid condition configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
}

impl From<ConditionError> for RuleError {
    fn from(err: ConditionError) -> Self {
        match err {
            ConditionError::InvalidConfig(message) => RuleError::InvalidConfig(message),
            other => RuleError::InvalidConfig(other.to_string()),
        }
    }
}

/// Result type for rule operations
pub type RuleResult<T> = Result<T, RuleError>;

/// What kind of entity an action targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTarget {
    /// Write the payload to a device
    #[default]
    Sensor,
    /// Start a timed sequence
    Sequence,
}

/// Action emitted when a rule's condition turns true
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidRuleAction {
    #[serde(default)]
    pub target_type: ActionTarget,

    /// Device or sequence id, depending on `target_type`
    #[serde(alias = "to")]
    pub target_id: Uuid,

    /// Forwarded verbatim to the device
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl ValidRuleAction {
    /// Write a payload to a device
    pub fn sensor(id: SensorId, payload: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            target_type: ActionTarget::Sensor,
            target_id: *id.as_uuid(),
            payload,
        }
    }

    /// Start a sequence
    pub fn sequence(id: SequenceId) -> Self {
        Self {
            target_type: ActionTarget::Sequence,
            target_id: *id.as_uuid(),
            payload: serde_json::Map::new(),
        }
    }
}

/// A rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Condition tree
    pub internal: Condition,

    pub on_valid: ValidRuleAction,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Incremented by the store on every update
    #[serde(default = "default_version")]
    pub version: i32,
}

fn default_version() -> i32 {
    1
}

impl Rule {
    pub fn new(name: impl Into<String>, internal: Condition, on_valid: ValidRuleAction) -> Self {
        Self {
            id: RuleId::new(),
            name: name.into(),
            description: String::new(),
            internal,
            on_valid,
            created_at: Utc::now(),
            version: default_version(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Decode and validate a rule from JSON text
    pub fn parse(json: &str) -> RuleResult<Self> {
        let rule: Rule = serde_json::from_str(json)?;
        rule.validate()?;
        Ok(rule)
    }

    /// Check the record fields and the whole condition tree
    pub fn validate(&self) -> RuleResult<()> {
        let name_len = self.name.chars().count();
        if name_len == 0 {
            return Err(RuleError::Validation {
                field: "name",
                message: "must not be empty".into(),
            });
        }
        if name_len > MAX_NAME_LEN {
            return Err(RuleError::Validation {
                field: "name",
                message: format!("must not be longer than {MAX_NAME_LEN} characters"),
            });
        }
        if self.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(RuleError::Validation {
                field: "description",
                message: format!("must not be longer than {MAX_DESCRIPTION_LEN} characters"),
            });
        }

        self.internal.validate()?;
        Ok(())
    }
}

/// Rule persistence
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn insert(&self, rule: &Rule) -> StoreResult<()>;

    async fn get(&self, id: RuleId) -> StoreResult<Rule>;

    async fn get_all(&self) -> StoreResult<Vec<Rule>>;

    /// Replace a rule, returning the stored record with its bumped version
    ///
    /// Fails with an edit conflict when `rule.version` is stale.
    async fn update(&self, rule: &Rule) -> StoreResult<Rule>;

    async fn delete(&self, id: RuleId) -> StoreResult<()>;
}
