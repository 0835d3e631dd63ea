//! # Document Approval State
//!
//! Entity types for a [`DocumentApprovalWorkflow`], embedded as JSON under
//! `Attachment.metadata.approvalWorkflow` rather than a dedicated table —
//! per spec.md's data model, this state is owned exclusively by the
//! document approval handlers, and readers may consume snapshots of the
//! attachment but never mutate the embedded workflow directly.

use crate::events::payload::ApprovalDecisionKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    SingleApprover,
    MultiStage,
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    InProgress,
    Completed,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverStatus {
    Pending,
    Approved,
    Rejected,
    Delegated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approver {
    pub id: Uuid,
    pub user_id: String,
    pub email: Option<String>,
    pub stage: u32,
    pub order: u32,
    pub status: ApproverStatus,
    pub decision: Option<ApprovalDecisionKind>,
    pub comments: Option<String>,
    pub conditions: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub delegated_to: Option<String>,
    pub delegated_from: Option<String>,
    pub delegation_reason: Option<String>,
}

impl Approver {
    #[must_use]
    pub fn pending(id: Uuid, user_id: impl Into<String>, email: Option<String>, stage: u32, order: u32) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            email,
            stage,
            order,
            status: ApproverStatus::Pending,
            decision: None,
            comments: None,
            conditions: None,
            decided_at: None,
            delegated_to: None,
            delegated_from: None,
            delegation_reason: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentApprovalWorkflow {
    pub id: Uuid,
    pub attachment_id: Uuid,
    pub tenant_id: String,
    pub workflow_type: WorkflowType,
    pub status: ApprovalStatus,
    pub approvers: Vec<Approver>,
    pub require_all_approvers: bool,
    pub allow_self_approval: bool,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub current_stage: u32,
    pub total_stages: u32,
    pub submitted_at: DateTime<Utc>,
    pub submitted_by: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub final_decision: Option<ApprovalDecisionKind>,
    pub reminder_interval_hours: i64,
    pub reminders_sent: u32,
    pub max_reminders: u32,
}

impl DocumentApprovalWorkflow {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == ApprovalStatus::InProgress
    }

    /// Approvers assigned to the current stage, excluding anyone who has
    /// since delegated their vote away.
    pub fn active_current_stage_approvers(&self) -> impl Iterator<Item = &Approver> {
        let stage = self.current_stage;
        self.approvers
            .iter()
            .filter(move |a| a.stage == stage && a.status != ApproverStatus::Delegated)
    }

    pub fn current_stage_approvers_mut(&mut self) -> impl Iterator<Item = &mut Approver> {
        let stage = self.current_stage;
        self.approvers.iter_mut().filter(move |a| a.stage == stage)
    }

    /// Evaluate whether the current stage is complete given its
    /// `require_all_approvers` rule, and if so, whether it resolved
    /// approved or rejected.
    ///
    /// `require_all_approvers = true`: complete once every active
    /// approver at the stage has decided; approved iff all approved.
    /// `require_all_approvers = false`: any rejection completes the stage
    /// as rejected; any approval completes it as approved.
    #[must_use]
    pub fn evaluate_stage(&self) -> StageOutcome {
        let active: Vec<&Approver> = self.active_current_stage_approvers().collect();

        if self.require_all_approvers {
            let all_decided = active
                .iter()
                .all(|a| matches!(a.status, ApproverStatus::Approved | ApproverStatus::Rejected));
            if !all_decided {
                return StageOutcome::Pending;
            }
            if active.iter().all(|a| a.status == ApproverStatus::Approved) {
                StageOutcome::Approved
            } else {
                StageOutcome::Rejected
            }
        } else {
            if active.iter().any(|a| a.status == ApproverStatus::Rejected) {
                return StageOutcome::Rejected;
            }
            if active.iter().any(|a| a.status == ApproverStatus::Approved) {
                return StageOutcome::Approved;
            }
            StageOutcome::Pending
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Pending,
    Approved,
    Rejected,
}

/// Conservative default for how many times a reminder re-schedules
/// itself: `ceil((due_date - submitted_at) / interval)` capped at 10
/// when a due date is set, or 10 flat when it isn't. The source always
/// re-schedules forever; this bound is a deliberate behavior change
/// (documented as an Open Question decision) so a forgotten approval
/// doesn't page someone weekly until the heat death of the universe.
#[must_use]
pub fn default_max_reminders(
    submitted_at: DateTime<Utc>,
    due_date: Option<DateTime<Utc>>,
    interval_hours: i64,
) -> u32 {
    const FALLBACK_MAX: u32 = 10;
    if interval_hours <= 0 {
        return FALLBACK_MAX;
    }
    match due_date {
        Some(due) if due > submitted_at => {
            let total_hours = (due - submitted_at).num_hours();
            let reminders = (total_hours as f64 / interval_hours as f64).ceil().max(1.0) as u32;
            reminders.min(FALLBACK_MAX)
        }
        _ => FALLBACK_MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approver(user_id: &str, stage: u32, status: ApproverStatus) -> Approver {
        let mut a = Approver::pending(Uuid::new_v4(), user_id, None, stage, 0);
        a.status = status;
        a
    }

    #[test]
    fn require_all_waits_for_every_approver() {
        let wf = DocumentApprovalWorkflow {
            id: Uuid::new_v4(),
            attachment_id: Uuid::new_v4(),
            tenant_id: "t1".into(),
            workflow_type: WorkflowType::MultiStage,
            status: ApprovalStatus::InProgress,
            approvers: vec![
                approver("a", 1, ApproverStatus::Approved),
                approver("b", 1, ApproverStatus::Pending),
            ],
            require_all_approvers: true,
            allow_self_approval: false,
            priority: Priority::Normal,
            due_date: None,
            current_stage: 1,
            total_stages: 1,
            submitted_at: Utc::now(),
            submitted_by: "s".into(),
            completed_at: None,
            final_decision: None,
            reminder_interval_hours: 24,
            reminders_sent: 0,
            max_reminders: 10,
        };
        assert_eq!(wf.evaluate_stage(), StageOutcome::Pending);
    }

    #[test]
    fn require_all_approved_when_every_approver_approved() {
        let mut wf = DocumentApprovalWorkflow {
            id: Uuid::new_v4(),
            attachment_id: Uuid::new_v4(),
            tenant_id: "t1".into(),
            workflow_type: WorkflowType::MultiStage,
            status: ApprovalStatus::InProgress,
            approvers: vec![
                approver("a", 1, ApproverStatus::Approved),
                approver("b", 1, ApproverStatus::Pending),
            ],
            require_all_approvers: true,
            allow_self_approval: false,
            priority: Priority::Normal,
            due_date: None,
            current_stage: 1,
            total_stages: 1,
            submitted_at: Utc::now(),
            submitted_by: "s".into(),
            completed_at: None,
            final_decision: None,
            reminder_interval_hours: 24,
            reminders_sent: 0,
            max_reminders: 10,
        };
        wf.approvers[1].status = ApproverStatus::Approved;
        assert_eq!(wf.evaluate_stage(), StageOutcome::Approved);
    }

    #[test]
    fn any_reject_completes_stage_when_not_requiring_all() {
        let wf_approvers = vec![
            approver("a", 1, ApproverStatus::Rejected),
            approver("b", 1, ApproverStatus::Pending),
        ];
        let wf = DocumentApprovalWorkflow {
            id: Uuid::new_v4(),
            attachment_id: Uuid::new_v4(),
            tenant_id: "t1".into(),
            workflow_type: WorkflowType::MultiStage,
            status: ApprovalStatus::InProgress,
            approvers: wf_approvers,
            require_all_approvers: false,
            allow_self_approval: false,
            priority: Priority::Normal,
            due_date: None,
            current_stage: 1,
            total_stages: 2,
            submitted_at: Utc::now(),
            submitted_by: "s".into(),
            completed_at: None,
            final_decision: None,
            reminder_interval_hours: 24,
            reminders_sent: 0,
            max_reminders: 10,
        };
        assert_eq!(wf.evaluate_stage(), StageOutcome::Rejected);
    }

    #[test]
    fn delegated_approver_excluded_from_require_all() {
        let mut wf = DocumentApprovalWorkflow {
            id: Uuid::new_v4(),
            attachment_id: Uuid::new_v4(),
            tenant_id: "t1".into(),
            workflow_type: WorkflowType::MultiStage,
            status: ApprovalStatus::InProgress,
            approvers: vec![approver("a", 1, ApproverStatus::Delegated)],
            require_all_approvers: true,
            allow_self_approval: false,
            priority: Priority::Normal,
            due_date: None,
            current_stage: 1,
            total_stages: 1,
            submitted_at: Utc::now(),
            submitted_by: "s".into(),
            completed_at: None,
            final_decision: None,
            reminder_interval_hours: 24,
            reminders_sent: 0,
            max_reminders: 10,
        };
        wf.approvers.push(approver("c", 1, ApproverStatus::Approved));
        assert_eq!(wf.evaluate_stage(), StageOutcome::Approved);
    }

    #[test]
    fn max_reminders_derived_from_due_date() {
        let start = Utc::now();
        let due = start + chrono::Duration::hours(30);
        assert_eq!(default_max_reminders(start, Some(due), 12), 3);
    }

    #[test]
    fn max_reminders_caps_at_ten() {
        let start = Utc::now();
        let due = start + chrono::Duration::hours(1000);
        assert_eq!(default_max_reminders(start, Some(due), 1), 10);
    }

    #[test]
    fn max_reminders_defaults_to_ten_without_due_date() {
        assert_eq!(default_max_reminders(Utc::now(), None, 24), 10);
    }
}
