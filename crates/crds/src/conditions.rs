//! Status conditions
//!
//! Kubernetes-style conditions as persisted on the wire, plus `ConditionSet`,
//! the keyed view used while building a status update.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The only condition type this controller writes.
pub const CONDITION_CONFIGURED: &str = "Configured";

/// A single condition entry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g. "Configured")
    #[serde(rename = "type")]
    #[schemars(rename = "type")]
    pub type_: String,

    /// True, False or Unknown
    pub status: ConditionStatus,

    /// Machine-readable reason
    pub reason: String,

    /// Human-readable detail
    #[serde(default)]
    pub message: String,

    /// Generation of the resource this condition was computed for
    #[serde(default)]
    pub observed_generation: i64,

    /// Last time `status` changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// Builds a `Configured` condition stamped with the current time.
    pub fn configured(
        status: ConditionStatus,
        reason: ConfigurationReason,
        message: impl Into<String>,
        observed_generation: i64,
    ) -> Self {
        Self {
            type_: CONDITION_CONFIGURED.to_string(),
            status,
            reason: reason.to_string(),
            message: message.into(),
            observed_generation,
            last_transition_time: Some(Utc::now()),
        }
    }

    /// Parsed reason; `None` when another writer used a reason we don't know.
    pub fn configuration_reason(&self) -> Option<ConfigurationReason> {
        self.reason.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Reasons used with the `Configured` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigurationReason {
    Unknown,
    InProgress,
    Failed,
    NotRequested,
    Succeeded,
}

impl ConfigurationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::InProgress => "InProgress",
            Self::Failed => "Failed",
            Self::NotRequested => "NotRequested",
            Self::Succeeded => "Succeeded",
        }
    }

    /// Settled reasons describe a finished pass for their generation.
    /// InProgress and Unknown mean work for that generation is still owed.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Failed | Self::NotRequested | Self::Succeeded)
    }
}

impl fmt::Display for ConfigurationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigurationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unknown" => Ok(Self::Unknown),
            "InProgress" => Ok(Self::InProgress),
            "Failed" => Ok(Self::Failed),
            "NotRequested" => Ok(Self::NotRequested),
            "Succeeded" => Ok(Self::Succeeded),
            other => Err(format!("unknown configuration reason: {}", other)),
        }
    }
}

/// Conditions keyed by type.
///
/// The wire format is a list; this keeps at most one entry per type and is
/// projected back to a sorted list with [`ConditionSet::into_list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionSet {
    by_type: BTreeMap<String, Condition>,
}

impl ConditionSet {
    /// Builds a set from a persisted list. On duplicate types the last entry wins.
    pub fn from_list(conditions: &[Condition]) -> Self {
        let by_type = conditions
            .iter()
            .map(|c| (c.type_.clone(), c.clone()))
            .collect();
        Self { by_type }
    }

    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.by_type.get(type_)
    }

    /// Inserts or replaces the condition of the same type.
    ///
    /// `last_transition_time` is carried over from the existing entry when
    /// the status value did not change.
    pub fn upsert(&mut self, mut condition: Condition) {
        if let Some(existing) = self.by_type.get(&condition.type_) {
            if existing.status == condition.status && existing.last_transition_time.is_some() {
                condition.last_transition_time = existing.last_transition_time;
            }
        }
        if condition.last_transition_time.is_none() {
            condition.last_transition_time = Some(Utc::now());
        }
        self.by_type.insert(condition.type_.clone(), condition);
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    pub fn into_list(self) -> Vec<Condition> {
        self.by_type.into_values().collect()
    }
}
