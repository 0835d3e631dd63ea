//! `invoiceApproved` (event `accounting.invoice.approved`): render the
//! invoice to PDF, store it, and email the customer a link. A duplicate
//! delivery (same `idempotencyKey`, collapsed by the bus to the same
//! event id, hence the same run id) re-enters every step as a memo hit —
//! nothing is rendered, stored, or sent twice.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tasker_runtime::{HandlerResult, StepContext, WorkflowHandler};
use tasker_shared::ports::{BlobPort, EmailMessage, EmailSender, PdfRenderer};
use tasker_shared::{Clock, EventPayload};
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone)]
struct StoredInvoicePdf {
    blob_key: String,
    public_url: String,
}

#[derive(Debug)]
pub struct InvoiceApprovedHandler {
    renderer: Arc<dyn PdfRenderer>,
    blob: Arc<dyn BlobPort>,
    sender: Arc<dyn EmailSender>,
    clock: Arc<dyn Clock>,
}

impl InvoiceApprovedHandler {
    #[must_use]
    pub fn new(renderer: Arc<dyn PdfRenderer>, blob: Arc<dyn BlobPort>, sender: Arc<dyn EmailSender>, clock: Arc<dyn Clock>) -> Self {
        Self {
            renderer,
            blob,
            sender,
            clock,
        }
    }
}

#[async_trait]
impl WorkflowHandler for InvoiceApprovedHandler {
    async fn handle(&self, ctx: &StepContext) -> HandlerResult {
        let payload = match &ctx.event.data {
            EventPayload::InvoiceApproved(p) => p.clone(),
            other => {
                warn!(kind = other.kind_name(), "invoice-approved handler received unexpected payload");
                return Ok(serde_json::json!({ "skipped": true }));
            }
        };

        let html = ctx
            .run("build-html", || {
                let invoice_id = payload.invoice_id.clone();
                let amount = payload.amount;
                let currency = payload.currency.clone();
                async move {
                    Ok::<_, anyhow::Error>(format!(
                        "<html><body><h1>Invoice {invoice_id}</h1><p>{amount:?} {currency:?}</p></body></html>"
                    ))
                }
            })
            .await?;

        let pdf_bytes = ctx
            .run("render-pdf", || {
                let renderer = self.renderer.clone();
                let html = html.clone();
                async move {
                    let rendered = renderer.render("invoice", serde_json::json!({ "html": html })).await?;
                    Ok::<_, anyhow::Error>(rendered.bytes)
                }
            })
            .await?;

        let blob_key = format!("{}/invoices/{}.pdf", payload.tenant_id, payload.invoice_id);
        let stored = ctx
            .run("store-pdf", || {
                let blob = self.blob.clone();
                let blob_key = blob_key.clone();
                let bytes = pdf_bytes.clone();
                async move {
                    let public_url = blob.put(&blob_key, bytes, "application/pdf").await?;
                    Ok::<_, anyhow::Error>(StoredInvoicePdf { blob_key, public_url })
                }
            })
            .await?;

        if let Some(customer_email) = payload.customer_email.clone() {
            let invoice_id = payload.invoice_id.clone();
            let public_url = stored.public_url.clone();
            ctx.run("email", || {
                let sender = self.sender.clone();
                async move {
                    let message = EmailMessage {
                        to: customer_email,
                        subject: format!("Your invoice {invoice_id} is ready"),
                        template: "invoice-approved".to_string(),
                        data: serde_json::json!({ "invoiceId": invoice_id, "pdfUrl": public_url }),
                    };
                    Ok::<_, anyhow::Error>(sender.send(message).await?)
                }
            })
            .await?;
        }

        Ok(serde_json::json!({ "publicUrl": stored.public_url }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tasker_runtime::StepContext;
    use tasker_shared::error::TaskerResult;
    use tasker_shared::events::{names, payload::InvoiceApprovedPayload};
    use tasker_shared::ports::{
        Attachment, ConditionalUpdateOutcome, DataPort, DlqRecord, DlqStatus, FxRateRecord, RenderedPdf, StepMemo,
        WorkflowRun, WorkflowRunStatus,
    };
    use tasker_shared::Event;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    #[derive(Debug, Default)]
    struct InMemoryData {
        memos: Mutex<std::collections::HashMap<(Uuid, String), StepMemo>>,
    }

    #[async_trait]
    impl DataPort for InMemoryData {
        async fn upsert_workflow_run(&self, _run: WorkflowRun) -> TaskerResult<()> {
            Ok(())
        }
        async fn get_workflow_run(&self, _run_id: Uuid) -> TaskerResult<Option<WorkflowRun>> {
            Ok(None)
        }
        async fn conditional_update_run_status(
            &self,
            _run_id: Uuid,
            _expected: WorkflowRunStatus,
            _new: WorkflowRunStatus,
        ) -> TaskerResult<ConditionalUpdateOutcome> {
            Ok(ConditionalUpdateOutcome::Applied)
        }
        async fn upsert_step_memo(&self, memo: StepMemo) -> TaskerResult<()> {
            self.memos.lock().await.insert((memo.run_id, memo.step_name.clone()), memo);
            Ok(())
        }
        async fn get_step_memo(&self, run_id: Uuid, step_name: &str) -> TaskerResult<Option<StepMemo>> {
            Ok(self.memos.lock().await.get(&(run_id, step_name.to_string())).cloned())
        }
        async fn list_step_memos(&self, _run_id: Uuid) -> TaskerResult<Vec<StepMemo>> {
            Ok(vec![])
        }
        async fn insert_dlq_record(&self, _record: DlqRecord) -> TaskerResult<()> {
            Ok(())
        }
        async fn get_dlq_record(&self, _id: Uuid) -> TaskerResult<Option<DlqRecord>> {
            Ok(None)
        }
        async fn update_dlq_record(&self, _record: DlqRecord) -> TaskerResult<()> {
            Ok(())
        }
        async fn scan_dlq_records(&self, _status: Option<DlqStatus>) -> TaskerResult<Vec<DlqRecord>> {
            Ok(vec![])
        }
        async fn dlq_record_exists_for_run(&self, _run_id: Uuid) -> TaskerResult<bool> {
            Ok(false)
        }
        async fn get_attachment(&self, _id: Uuid) -> TaskerResult<Option<Attachment>> {
            Ok(None)
        }
        async fn upsert_attachment(&self, _attachment: Attachment) -> TaskerResult<()> {
            Ok(())
        }
        async fn insert_fx_rates(&self, _rates: Vec<FxRateRecord>) -> TaskerResult<()> {
            Ok(())
        }
        async fn latest_fx_rate_timestamp(&self) -> TaskerResult<Option<chrono::DateTime<Utc>>> {
            Ok(None)
        }
        async fn list_fx_rates(&self) -> TaskerResult<Vec<FxRateRecord>> {
            Ok(vec![])
        }
    }

    #[derive(Debug, Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl tasker_runtime::Publisher for RecordingPublisher {
        async fn publish(&self, event: Event) -> TaskerResult<Uuid> {
            let id = event.id;
            self.published.lock().await.push(event);
            Ok(id)
        }
    }

    #[derive(Debug, Default)]
    struct StubRenderer {
        renders: Mutex<u32>,
    }

    #[async_trait]
    impl PdfRenderer for StubRenderer {
        async fn render(&self, _template_type: &str, _data: serde_json::Value) -> TaskerResult<RenderedPdf> {
            *self.renders.lock().await += 1;
            Ok(RenderedPdf {
                bytes: b"%PDF-1.4 invoice".to_vec(),
                file_name: "invoice.pdf".to_string(),
            })
        }
    }

    #[derive(Debug, Default)]
    struct StubBlob {
        puts: Mutex<u32>,
    }

    #[async_trait]
    impl BlobPort for StubBlob {
        async fn put(&self, key: &str, _bytes: Vec<u8>, _content_type: &str) -> TaskerResult<String> {
            *self.puts.lock().await += 1;
            Ok(format!("https://blobs.test/{key}"))
        }
        async fn get(&self, _key: &str) -> TaskerResult<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn delete(&self, _key: &str) -> TaskerResult<()> {
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct StubEmailSender {
        sent: Mutex<u32>,
    }

    #[async_trait]
    impl EmailSender for StubEmailSender {
        async fn send(&self, _message: EmailMessage) -> TaskerResult<String> {
            *self.sent.lock().await += 1;
            Ok("stub-message-id".to_string())
        }
    }

    fn event() -> Event {
        Event::new(
            Uuid::new_v4(),
            names::INVOICE_APPROVED,
            EventPayload::InvoiceApproved(InvoiceApprovedPayload {
                invoice_id: "INV-1".to_string(),
                tenant_id: "tenant-a".to_string(),
                company_id: "company-a".to_string(),
                customer_email: Some("customer@example.com".to_string()),
                amount: Some(199.99),
                currency: Some("MYR".to_string()),
            }),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn renders_stores_and_emails_once() {
        let renderer = Arc::new(StubRenderer::default());
        let blob = Arc::new(StubBlob::default());
        let sender = Arc::new(StubEmailSender::default());
        let clock: Arc<dyn Clock> = Arc::new(tasker_shared::FakeClock::new(Utc::now()));
        let handler = InvoiceApprovedHandler::new(renderer.clone(), blob.clone(), sender.clone(), clock);
        let data = Arc::new(InMemoryData::default());
        let bus = Arc::new(RecordingPublisher::default());
        let ctx = StepContext::new(Uuid::new_v4(), 1, event(), data, bus, Utc::now());

        let result = handler.handle(&ctx).await.unwrap();
        assert!(result["publicUrl"].as_str().unwrap().contains("INV-1"));
        assert_eq!(*renderer.renders.lock().await, 1);
        assert_eq!(*blob.puts.lock().await, 1);
        assert_eq!(*sender.sent.lock().await, 1);
    }

    #[tokio::test]
    async fn duplicate_delivery_replays_every_step_as_a_memo_hit() {
        let renderer = Arc::new(StubRenderer::default());
        let blob = Arc::new(StubBlob::default());
        let sender = Arc::new(StubEmailSender::default());
        let clock: Arc<dyn Clock> = Arc::new(tasker_shared::FakeClock::new(Utc::now()));
        let handler = InvoiceApprovedHandler::new(renderer.clone(), blob.clone(), sender.clone(), clock);
        let data = Arc::new(InMemoryData::default());
        let bus = Arc::new(RecordingPublisher::default());
        let run_id = Uuid::new_v4();
        let invoice_event = event();

        for attempt in 1..=2 {
            let ctx = StepContext::new(run_id, attempt, invoice_event.clone(), data.clone(), bus.clone(), Utc::now());
            handler.handle(&ctx).await.unwrap();
        }

        assert_eq!(*renderer.renders.lock().await, 1);
        assert_eq!(*blob.puts.lock().await, 1);
        assert_eq!(*sender.sent.lock().await, 1);
    }

    #[tokio::test]
    async fn missing_customer_email_skips_notification() {
        let renderer = Arc::new(StubRenderer::default());
        let blob = Arc::new(StubBlob::default());
        let sender = Arc::new(StubEmailSender::default());
        let clock: Arc<dyn Clock> = Arc::new(tasker_shared::FakeClock::new(Utc::now()));
        let handler = InvoiceApprovedHandler::new(renderer, blob, sender.clone(), clock);
        let data = Arc::new(InMemoryData::default());
        let bus = Arc::new(RecordingPublisher::default());

        let mut invoice_event = event();
        if let EventPayload::InvoiceApproved(p) = &mut invoice_event.data {
            p.customer_email = None;
        }
        let ctx = StepContext::new(Uuid::new_v4(), 1, invoice_event, data, bus, Utc::now());
        handler.handle(&ctx).await.unwrap();

        assert_eq!(*sender.sent.lock().await, 0);
    }
}
