//! Storage-isolation scopes for the Data capability.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::{DataError, ParameterError};
use super::ids::{InstanceId, JobId, WorkflowId};

/// Persistence granularity, ordered broadest to narrowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    /// Global per tenant; carries no scope id.
    Account,
    Workflow,
    Instance,
    CurrentExecution,
}

impl Scope {
    pub const ALL: [Scope; 4] = [
        Scope::Account,
        Scope::Workflow,
        Scope::Instance,
        Scope::CurrentExecution,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Account => "ACCOUNT",
            Scope::Workflow => "WORKFLOW",
            Scope::Instance => "INSTANCE",
            Scope::CurrentExecution => "CURRENT_EXECUTION",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scope::ALL
            .into_iter()
            .find(|scope| scope.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParameterError::Invalid {
                key: "scope".to_string(),
                message: format!("unknown scope '{s}'"),
            })
    }
}

/// The runtime ids a single invocation is bound to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeBinding {
    pub job_id: Option<JobId>,
    pub instance_id: Option<InstanceId>,
    pub workflow_id: Option<WorkflowId>,
}

impl ScopeBinding {
    /// Resolves the scope id for `scope`.
    ///
    /// `Ok(None)` only for `Account`. A narrower scope whose id is not bound fails
    /// instead of collapsing into a shared key.
    pub fn scope_id(&self, scope: Scope) -> Result<Option<String>, DataError> {
        let id = match scope {
            Scope::Account => return Ok(None),
            Scope::CurrentExecution => self.job_id.map(|id| id.as_ulid().to_string()),
            Scope::Instance => self.instance_id.map(|id| id.as_ulid().to_string()),
            Scope::Workflow => self.workflow_id.map(|id| id.as_ulid().to_string()),
        };
        id.map(Some).ok_or(DataError::UnboundScope(scope))
    }
}
