use super::actor::UserId;
use super::request::RequestId;
use crate::error::{EntityRef, PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type TaskId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    CollectPayment,
    PayBill,
    DeliverReceipt,
}

impl FromStr for TaskKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "collect_payment" => Ok(Self::CollectPayment),
            "pay_bill" => Ok(Self::PayBill),
            "deliver_receipt" => Ok(Self::DeliverReceipt),
            other => Err(PipelineError::ValidationError(format!(
                "Unknown task kind '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Accepted,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(PipelineError::ValidationError(format!(
                "Unknown task status '{other}'"
            ))),
        }
    }
}

/// One rider-executable unit of work against a request.
///
/// `rider_id` is unset until the task is accepted and never changes after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    version: u32,
    request_id: RequestId,
    rider_id: Option<UserId>,
    kind: TaskKind,
    status: TaskStatus,
    assigned_at: DateTime<Utc>,
    accepted_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    proof_url: Option<String>,
}

impl Task {
    pub fn new(id: TaskId, request_id: RequestId, kind: TaskKind, now: DateTime<Utc>) -> Self {
        Self {
            id,
            version: 0,
            request_id,
            rider_id: None,
            kind,
            status: TaskStatus::Pending,
            assigned_at: now,
            accepted_at: None,
            started_at: None,
            completed_at: None,
            failed_at: None,
            failure_reason: None,
            proof_url: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn entity(&self) -> EntityRef {
        EntityRef::task(self.id)
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn rider_id(&self) -> Option<UserId> {
        self.rider_id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn assigned_at(&self) -> DateTime<Utc> {
        self.assigned_at
    }

    pub fn accepted_at(&self) -> Option<DateTime<Utc>> {
        self.accepted_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn failed_at(&self) -> Option<DateTime<Utc>> {
        self.failed_at
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn proof_url(&self) -> Option<&str> {
        self.proof_url.as_deref()
    }

    pub fn is_bound_to(&self, rider_id: UserId) -> bool {
        self.rider_id == Some(rider_id)
    }

    /// Binds the rider. Only valid from `pending` with no rider bound.
    pub fn accept(&mut self, rider_id: UserId, now: DateTime<Utc>) -> Result<()> {
        if self.status != TaskStatus::Pending || self.rider_id.is_some() {
            return Err(PipelineError::AlreadyTaken(self.entity()));
        }
        self.status = TaskStatus::Accepted;
        self.rider_id = Some(rider_id);
        self.accepted_at = Some(now);
        Ok(())
    }

    /// Moves along accepted -> in_progress -> completed, or to failed from any
    /// non-terminal status.
    pub fn advance(&mut self, to: TaskStatus, now: DateTime<Utc>) -> Result<()> {
        match (self.status, to) {
            (TaskStatus::Accepted, TaskStatus::InProgress) => {
                self.started_at = Some(now);
            }
            (TaskStatus::InProgress, TaskStatus::Completed) => {
                self.completed_at = Some(now);
            }
            (from, TaskStatus::Failed) if !from.is_terminal() => {
                self.failed_at = Some(now);
            }
            _ => return Err(PipelineError::InvalidTransition(self.entity())),
        }
        self.status = to;
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.advance(TaskStatus::Failed, now)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    pub fn attach_proof(&mut self, url: String) -> Result<()> {
        if self.status == TaskStatus::Failed {
            return Err(PipelineError::InvalidState(self.entity()));
        }
        self.proof_url = Some(url);
        Ok(())
    }
}
