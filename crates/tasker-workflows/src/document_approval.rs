//! Multi-stage document approval: `document/approval.start`,
//! `document/approval.decision`, `document/approval.reminder`.
//!
//! Workflow state lives embedded at `Attachment.metadata.approvalWorkflow`
//! (per spec.md's data model, this state is owned exclusively by these
//! three handlers) rather than in a dedicated table, so every step here
//! round-trips through a fetch-mutate-persist of the owning attachment.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tasker_runtime::{HandlerResult, StepContext, WorkflowHandler};
use tasker_shared::approval::{ApprovalStatus, Approver, ApproverStatus, DocumentApprovalWorkflow, StageOutcome};
use tasker_shared::events::{
    names,
    payload::{DocumentApprovedPayload, EmailSendPayload},
};
use tasker_shared::ports::{Attachment, DataPort};
use tasker_shared::{Clock, Event, EventPayload};
use tracing::warn;

const APPROVAL_METADATA_KEY: &str = "approvalWorkflow";

fn read_workflow(attachment: &Attachment) -> Option<DocumentApprovalWorkflow> {
    attachment
        .metadata
        .get(APPROVAL_METADATA_KEY)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
}

fn write_workflow(attachment: &mut Attachment, workflow: &DocumentApprovalWorkflow) {
    let mut metadata = attachment.metadata.as_object().cloned().unwrap_or_default();
    metadata.insert(
        APPROVAL_METADATA_KEY.to_string(),
        serde_json::to_value(workflow).expect("DocumentApprovalWorkflow always serializes"),
    );
    attachment.metadata = serde_json::Value::Object(metadata);
}

fn notify_event(clock: &dyn Clock, to: String, subject: String, template: &str, data: serde_json::Value) -> Event {
    Event::new(
        clock.new_id(),
        names::EMAIL_SEND,
        EventPayload::EmailSend(EmailSendPayload {
            to,
            subject,
            template: template.to_string(),
            data,
            tenant_id: None,
            priority: None,
        }),
        clock.now(),
    )
}

/// `documentApprovalWorkflow.start` (event `document/approval.start`).
#[derive(Debug)]
pub struct DocumentApprovalStartHandler {
    data: Arc<dyn DataPort>,
    clock: Arc<dyn Clock>,
}

impl DocumentApprovalStartHandler {
    #[must_use]
    pub fn new(data: Arc<dyn DataPort>, clock: Arc<dyn Clock>) -> Self {
        Self { data, clock }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct FetchedAttachment {
    attachment: Attachment,
    auto_approved: bool,
}

#[async_trait]
impl WorkflowHandler for DocumentApprovalStartHandler {
    async fn handle(&self, ctx: &StepContext) -> HandlerResult {
        let payload = match &ctx.event.data {
            EventPayload::DocumentApprovalStart(p) => p.clone(),
            other => {
                warn!(kind = other.kind_name(), "document approval start received unexpected payload");
                return Ok(serde_json::json!({ "skipped": true }));
            }
        };

        let attachment_id = payload.attachment_id;
        let fetched = ctx
            .run("fetch-and-validate", || {
                let data = self.data.clone();
                let threshold = payload.auto_approve_threshold;
                async move {
                    let attachment = data
                        .get_attachment(attachment_id)
                        .await?
                        .ok_or_else(|| anyhow::anyhow!("validation: attachment {attachment_id} not found"))?;

                    if let Some(existing) = read_workflow(&attachment) {
                        if existing.is_active() {
                            return Err(anyhow::anyhow!(
                                "validation: an active approval workflow already exists on attachment {attachment_id}"
                            ));
                        }
                    }

                    let auto_approved = match threshold {
                        Some(t) => {
                            attachment.ocr_confidence.is_some_and(|c| c >= t)
                                && attachment.ocr_status.as_deref() == Some("completed")
                        }
                        None => false,
                    };

                    Ok::<_, anyhow::Error>(FetchedAttachment { attachment, auto_approved })
                }
            })
            .await?;

        let now = self.clock.now();

        if fetched.auto_approved {
            let approved_by = "auto-approval".to_string();
            let attachment = ctx
                .run("auto-approve", || {
                    let data = self.data.clone();
                    let mut attachment = fetched.attachment.clone();
                    let workflow_id = self.clock.new_id();
                    let payload = payload.clone();
                    let approved_by = approved_by.clone();
                    async move {
                        let workflow = DocumentApprovalWorkflow {
                            id: workflow_id,
                            attachment_id,
                            tenant_id: payload.tenant_id.clone(),
                            workflow_type: payload.workflow_type,
                            status: ApprovalStatus::Completed,
                            approvers: vec![],
                            require_all_approvers: payload.require_all_approvers,
                            allow_self_approval: payload.allow_self_approval,
                            priority: payload.priority,
                            due_date: payload.due_date,
                            current_stage: 1,
                            total_stages: 1,
                            submitted_at: now,
                            submitted_by: payload.submitted_by.clone(),
                            completed_at: Some(now),
                            final_decision: Some(tasker_shared::events::payload::ApprovalDecisionKind::Approve),
                            reminder_interval_hours: payload.reminder_interval_hours.unwrap_or(24),
                            reminders_sent: 0,
                            max_reminders: 0,
                        };
                        write_workflow(&mut attachment, &workflow);
                        data.upsert_attachment(attachment.clone()).await?;
                        Ok::<_, anyhow::Error>(attachment)
                    }
                })
                .await?;

            ctx.send(
                "publish-approved",
                Event::new(
                    self.clock.new_id(),
                    names::DOCUMENT_APPROVED,
                    EventPayload::DocumentApproved(DocumentApprovedPayload {
                        attachment_id,
                        tenant_id: payload.tenant_id.clone(),
                        approved_by,
                        approved_at: now,
                    }),
                    now,
                ),
            )
            .await?;

            let _ = attachment;
            return Ok(serde_json::json!({ "autoApproved": true }));
        }

        let workflow = ctx
            .run("persist-workflow", || {
                let data = self.data.clone();
                let mut attachment = fetched.attachment.clone();
                let workflow_id = self.clock.new_id();
                let payload = payload.clone();
                let clock = self.clock.clone();
                async move {
                    if payload.approvers.is_empty() {
                        return Err(anyhow::anyhow!("validation: at least one approver is required"));
                    }
                    let total_stages = payload.approvers.iter().map(|a| a.stage).max().unwrap_or(1);
                    let approvers: Vec<Approver> = payload
                        .approvers
                        .iter()
                        .map(|a| Approver::pending(clock.new_id(), a.user_id.clone(), a.email.clone(), a.stage, a.order))
                        .collect();
                    let max_reminders = tasker_shared::approval::default_max_reminders(
                        now,
                        payload.due_date,
                        payload.reminder_interval_hours.unwrap_or(24),
                    );
                    let workflow = DocumentApprovalWorkflow {
                        id: workflow_id,
                        attachment_id,
                        tenant_id: payload.tenant_id.clone(),
                        workflow_type: payload.workflow_type,
                        status: ApprovalStatus::InProgress,
                        approvers,
                        require_all_approvers: payload.require_all_approvers,
                        allow_self_approval: payload.allow_self_approval,
                        priority: payload.priority,
                        due_date: payload.due_date,
                        current_stage: 1,
                        total_stages,
                        submitted_at: now,
                        submitted_by: payload.submitted_by.clone(),
                        completed_at: None,
                        final_decision: None,
                        reminder_interval_hours: payload.reminder_interval_hours.unwrap_or(24),
                        reminders_sent: 0,
                        max_reminders,
                    };
                    write_workflow(&mut attachment, &workflow);
                    data.upsert_attachment(attachment).await?;
                    Ok::<_, anyhow::Error>(workflow)
                }
            })
            .await?;

        for approver in workflow.active_current_stage_approvers() {
            if let Some(email) = approver.email.clone() {
                ctx.send(
                    &format!("notify-approver-{}", approver.id),
                    notify_event(
                        self.clock.as_ref(),
                        email,
                        "A document is awaiting your approval".to_string(),
                        "document-approval-request",
                        serde_json::json!({ "attachmentId": attachment_id, "stage": workflow.current_stage }),
                    ),
                )
                .await?;
            }
        }

        if workflow.max_reminders > 0 {
            let reminder_at = now + chrono::Duration::hours(workflow.reminder_interval_hours);
            ctx.send(
                "schedule-reminder",
                Event::new(
                    self.clock.new_id(),
                    names::DOCUMENT_APPROVAL_REMINDER,
                    EventPayload::DocumentApprovalReminder(tasker_shared::events::payload::DocumentApprovalReminderPayload {
                        attachment_id,
                    }),
                    now,
                )
                .with_scheduled_for(reminder_at),
            )
            .await?;
        }

        Ok(serde_json::json!({ "autoApproved": false, "currentStage": workflow.current_stage }))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
enum DecisionKind {
    Delegated,
    Pending,
    Rejected,
    ApprovedAdvancedStage,
    ApprovedCompleted,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct DecisionResult {
    kind: DecisionKind,
    workflow: DocumentApprovalWorkflow,
    delegate_email: Option<String>,
}

/// `documentApprovalWorkflow.decision` (event `document/approval.decision`).
#[derive(Debug)]
pub struct DocumentApprovalDecisionHandler {
    data: Arc<dyn DataPort>,
    clock: Arc<dyn Clock>,
}

impl DocumentApprovalDecisionHandler {
    #[must_use]
    pub fn new(data: Arc<dyn DataPort>, clock: Arc<dyn Clock>) -> Self {
        Self { data, clock }
    }
}

#[async_trait]
impl WorkflowHandler for DocumentApprovalDecisionHandler {
    async fn handle(&self, ctx: &StepContext) -> HandlerResult {
        let payload = match &ctx.event.data {
            EventPayload::DocumentApprovalDecision(p) => p.clone(),
            other => {
                warn!(kind = other.kind_name(), "document approval decision received unexpected payload");
                return Ok(serde_json::json!({ "skipped": true }));
            }
        };

        let attachment_id = payload.attachment_id;
        let now = self.clock.now();

        let result = ctx
            .run("apply-decision", || {
                let data = self.data.clone();
                let payload = payload.clone();
                let clock_id = self.clock.clone();
                async move {
                    let mut attachment = data
                        .get_attachment(attachment_id)
                        .await?
                        .ok_or_else(|| anyhow::anyhow!("validation: attachment {attachment_id} not found"))?;
                    let mut workflow = read_workflow(&attachment)
                        .ok_or_else(|| anyhow::anyhow!("validation: no approval workflow on attachment {attachment_id}"))?;

                    if !workflow.is_active() {
                        return Err(anyhow::anyhow!("validation: approval workflow is no longer active"));
                    }

                    if workflow.submitted_by == payload.user_id && !workflow.allow_self_approval {
                        return Err(anyhow::anyhow!("validation: self-approval is not permitted for this workflow"));
                    }

                    let stage = workflow.current_stage;
                    let approver_idx = workflow
                        .approvers
                        .iter()
                        .position(|a| a.stage == stage && a.user_id == payload.user_id && a.status == ApproverStatus::Pending)
                        .ok_or_else(|| {
                            anyhow::anyhow!(
                                "validation: '{}' is not a pending approver at stage {stage} of attachment {attachment_id}",
                                payload.user_id
                            )
                        })?;

                    if let Some(delegate_to) = payload.delegate_to.clone() {
                        let order = workflow.approvers[approver_idx].order;
                        let new_id = clock_id.new_id();
                        // The decision payload carries only the delegate's user id; recover
                        // an email for the notification from any other stage where that
                        // same user was already registered as an approver.
                        let delegate_email = workflow
                            .approvers
                            .iter()
                            .find(|a| a.user_id == delegate_to)
                            .and_then(|a| a.email.clone());
                        workflow.approvers[approver_idx].status = ApproverStatus::Delegated;
                        workflow.approvers[approver_idx].delegated_to = Some(delegate_to.clone());
                        workflow.approvers[approver_idx].delegation_reason = payload.delegation_reason.clone();
                        let mut delegate = Approver::pending(new_id, delegate_to.clone(), delegate_email.clone(), stage, order);
                        delegate.delegated_from = Some(payload.user_id.clone());
                        workflow.approvers.push(delegate);

                        write_workflow(&mut attachment, &workflow);
                        data.upsert_attachment(attachment).await?;
                        return Ok::<_, anyhow::Error>(DecisionResult {
                            kind: DecisionKind::Delegated,
                            workflow,
                            delegate_email,
                        });
                    }

                    workflow.approvers[approver_idx].status = match payload.decision {
                        tasker_shared::events::payload::ApprovalDecisionKind::Approve => ApproverStatus::Approved,
                        tasker_shared::events::payload::ApprovalDecisionKind::Reject => ApproverStatus::Rejected,
                    };
                    workflow.approvers[approver_idx].decision = Some(payload.decision);
                    workflow.approvers[approver_idx].comments = payload.comments.clone();
                    workflow.approvers[approver_idx].conditions = payload.conditions.clone();
                    workflow.approvers[approver_idx].decided_at = Some(now);

                    let kind = match workflow.evaluate_stage() {
                        StageOutcome::Pending => DecisionKind::Pending,
                        StageOutcome::Rejected => {
                            workflow.status = ApprovalStatus::Rejected;
                            workflow.completed_at = Some(now);
                            workflow.final_decision = Some(tasker_shared::events::payload::ApprovalDecisionKind::Reject);
                            DecisionKind::Rejected
                        }
                        StageOutcome::Approved => {
                            if workflow.current_stage >= workflow.total_stages {
                                workflow.status = ApprovalStatus::Completed;
                                workflow.completed_at = Some(now);
                                workflow.final_decision = Some(tasker_shared::events::payload::ApprovalDecisionKind::Approve);
                                DecisionKind::ApprovedCompleted
                            } else {
                                workflow.current_stage += 1;
                                DecisionKind::ApprovedAdvancedStage
                            }
                        }
                    };

                    write_workflow(&mut attachment, &workflow);
                    data.upsert_attachment(attachment).await?;
                    Ok::<_, anyhow::Error>(DecisionResult {
                        kind,
                        workflow,
                        delegate_email: None,
                    })
                }
            })
            .await?;

        match result.kind {
            DecisionKind::Pending | DecisionKind::Rejected => {}
            DecisionKind::Delegated => {
                if let Some(email) = result.delegate_email.clone() {
                    ctx.send(
                        "notify-delegate",
                        notify_event(
                            self.clock.as_ref(),
                            email,
                            "A document approval has been delegated to you".to_string(),
                            "document-approval-delegated",
                            serde_json::json!({ "attachmentId": attachment_id }),
                        ),
                    )
                    .await?;
                }
            }
            DecisionKind::ApprovedAdvancedStage => {
                for approver in result.workflow.active_current_stage_approvers() {
                    if let Some(email) = approver.email.clone() {
                        ctx.send(
                            &format!("notify-approver-{}", approver.id),
                            notify_event(
                                self.clock.as_ref(),
                                email,
                                "A document is awaiting your approval".to_string(),
                                "document-approval-request",
                                serde_json::json!({ "attachmentId": attachment_id, "stage": result.workflow.current_stage }),
                            ),
                        )
                        .await?;
                    }
                }
            }
            DecisionKind::ApprovedCompleted => {
                ctx.send(
                    "publish-approved",
                    Event::new(
                        self.clock.new_id(),
                        names::DOCUMENT_APPROVED,
                        EventPayload::DocumentApproved(DocumentApprovedPayload {
                            attachment_id,
                            tenant_id: result.workflow.tenant_id.clone(),
                            approved_by: payload.user_id.clone(),
                            approved_at: now,
                        }),
                        now,
                    ),
                )
                .await?;
            }
        }

        Ok(serde_json::json!({ "status": format!("{:?}", result.kind), "currentStage": result.workflow.current_stage }))
    }
}

/// `documentApprovalWorkflow.reminder` (event `document/approval.reminder`).
#[derive(Debug)]
pub struct DocumentApprovalReminderHandler {
    data: Arc<dyn DataPort>,
    clock: Arc<dyn Clock>,
}

impl DocumentApprovalReminderHandler {
    #[must_use]
    pub fn new(data: Arc<dyn DataPort>, clock: Arc<dyn Clock>) -> Self {
        Self { data, clock }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ReminderCheck {
    active: bool,
    workflow: Option<DocumentApprovalWorkflow>,
}

#[async_trait]
impl WorkflowHandler for DocumentApprovalReminderHandler {
    async fn handle(&self, ctx: &StepContext) -> HandlerResult {
        let payload = match &ctx.event.data {
            EventPayload::DocumentApprovalReminder(p) => p.clone(),
            other => {
                warn!(kind = other.kind_name(), "document approval reminder received unexpected payload");
                return Ok(serde_json::json!({ "skipped": true }));
            }
        };

        let attachment_id = payload.attachment_id;
        let now = self.clock.now();

        let check = ctx
            .run("check-still-active", || {
                let data = self.data.clone();
                async move {
                    let Some(mut attachment) = data.get_attachment(attachment_id).await? else {
                        return Ok::<_, anyhow::Error>(ReminderCheck { active: false, workflow: None });
                    };
                    let Some(mut workflow) = read_workflow(&attachment) else {
                        return Ok(ReminderCheck { active: false, workflow: None });
                    };
                    if !workflow.is_active() || workflow.reminders_sent >= workflow.max_reminders {
                        return Ok(ReminderCheck { active: false, workflow: Some(workflow) });
                    }
                    workflow.reminders_sent += 1;
                    write_workflow(&mut attachment, &workflow);
                    data.upsert_attachment(attachment).await?;
                    Ok(ReminderCheck { active: true, workflow: Some(workflow) })
                }
            })
            .await?;

        let Some(workflow) = check.workflow else {
            return Ok(serde_json::json!({ "active": false }));
        };

        if !check.active {
            return Ok(serde_json::json!({ "active": false, "remindersSent": workflow.reminders_sent }));
        }

        for approver in workflow.active_current_stage_approvers() {
            if let Some(email) = approver.email.clone() {
                ctx.send(
                    &format!("notify-approver-{}-reminder-{}", approver.id, workflow.reminders_sent),
                    notify_event(
                        self.clock.as_ref(),
                        email,
                        "Reminder: a document is awaiting your approval".to_string(),
                        "document-approval-reminder",
                        serde_json::json!({ "attachmentId": attachment_id, "stage": workflow.current_stage }),
                    ),
                )
                .await?;
            }
        }

        if workflow.reminders_sent < workflow.max_reminders {
            let reminder_at = now + chrono::Duration::hours(workflow.reminder_interval_hours);
            ctx.send(
                "schedule-next-reminder",
                Event::new(
                    self.clock.new_id(),
                    names::DOCUMENT_APPROVAL_REMINDER,
                    EventPayload::DocumentApprovalReminder(tasker_shared::events::payload::DocumentApprovalReminderPayload {
                        attachment_id,
                    }),
                    now,
                )
                .with_scheduled_for(reminder_at),
            )
            .await?;
        }

        Ok(serde_json::json!({ "active": true, "remindersSent": workflow.reminders_sent }))
    }
}
