/// Run records and their state machine
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::error::{kinds, ErrorPayload, WeftError};
use crate::resource::{MetadataObject, OutputType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Running,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    fn can_become(&self, next: RunState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running) | (Self::Running, Self::Done) | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("run of '{resource}' cannot move from {from} to {to}")]
    Illegal {
        resource: String,
        from: RunState,
        to: RunState,
    },

    #[error("run of '{resource}' produced no output artifact")]
    NoOutput { resource: String },
}

impl From<TransitionError> for WeftError {
    fn from(err: TransitionError) -> Self {
        let resource = match &err {
            TransitionError::Illegal { resource, .. } | TransitionError::NoOutput { resource } => {
                resource.clone()
            }
        };
        WeftError::Execution {
            resource,
            payload: ErrorPayload::new(kinds::EXECUTION_ERROR, err.to_string()),
        }
    }
}

/// One execution attempt of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub resource_id: String,
    pub resource_name: String,
    pub run_id: String,
    pub state: RunState,
    /// Variables the resource was invoked with
    #[serde(default)]
    pub bindings: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub output_paths: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_type: Option<OutputType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    /// Outputs were taken from the cache instead of being recomputed
    #[serde(default)]
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn new(resource: &MetadataObject, run_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource.id.clone(),
            resource_name: resource.name.clone(),
            run_id: run_id.into(),
            state: RunState::Pending,
            bindings: serde_json::Map::new(),
            output_paths: Vec::new(),
            output_type: None,
            error: None,
            cached: false,
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, next: RunState) -> Result<(), TransitionError> {
        if !self.state.can_become(next) {
            return Err(TransitionError::Illegal {
                resource: self.resource_name.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// `Pending -> Running`
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(RunState::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// `Running -> Done`; at least one artifact is required
    pub fn complete(
        &mut self,
        output_paths: Vec<PathBuf>,
        output_type: Option<OutputType>,
    ) -> Result<(), TransitionError> {
        if output_paths.is_empty() {
            return Err(TransitionError::NoOutput {
                resource: self.resource_name.clone(),
            });
        }
        self.transition(RunState::Done)?;
        self.output_paths = output_paths;
        self.output_type = output_type;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// `Running -> Done` with outputs taken from a cache entry
    pub fn complete_from_cache(&mut self, output_paths: Vec<PathBuf>) -> Result<(), TransitionError> {
        self.complete(output_paths, None)?;
        self.cached = true;
        Ok(())
    }

    /// `Running -> Failed`
    pub fn fail(&mut self, payload: ErrorPayload) -> Result<(), TransitionError> {
        self.transition(RunState::Failed)?;
        self.error = Some(payload);
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}
