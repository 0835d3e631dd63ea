//! `pdfGeneration` (event `pdf/generate`): render an HTML template to a
//! PDF, store it in the blob port, and optionally attach it to an entity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tasker_runtime::{HandlerResult, StepContext, WorkflowHandler};
use tasker_shared::events::{names, payload::PdfGeneratedPayload};
use tasker_shared::ports::{Attachment, BlobPort, DataPort, PdfRenderer};
use tasker_shared::{Clock, EventPayload};
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone)]
struct PreparedTemplate {
    template_type: String,
    html: String,
}

fn assemble_html(template_type: &str, data: &serde_json::Value) -> String {
    match template_type {
        "invoice" => format!("<html><body><h1>Invoice</h1><pre>{data}</pre></body></html>"),
        "journal" => format!("<html><body><h1>Journal Entry</h1><pre>{data}</pre></body></html>"),
        "balance_sheet" => format!("<html><body><h1>Balance Sheet</h1><pre>{data}</pre></body></html>"),
        "profit_loss" => format!("<html><body><h1>Profit &amp; Loss</h1><pre>{data}</pre></body></html>"),
        other => format!("<html><body><h1>{other}</h1><pre>{data}</pre></body></html>"),
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct StoredPdf {
    blob_key: String,
    public_url: String,
    size_kb: u64,
}

#[derive(Debug)]
pub struct PdfGenerationHandler {
    renderer: Arc<dyn PdfRenderer>,
    blob: Arc<dyn BlobPort>,
    data: Arc<dyn DataPort>,
    clock: Arc<dyn Clock>,
    step_timeout: Duration,
}

impl PdfGenerationHandler {
    #[must_use]
    pub fn new(
        renderer: Arc<dyn PdfRenderer>,
        blob: Arc<dyn BlobPort>,
        data: Arc<dyn DataPort>,
        clock: Arc<dyn Clock>,
        step_timeout: Duration,
    ) -> Self {
        Self {
            renderer,
            blob,
            data,
            clock,
            step_timeout,
        }
    }
}

#[async_trait]
impl WorkflowHandler for PdfGenerationHandler {
    async fn handle(&self, ctx: &StepContext) -> HandlerResult {
        let payload = match &ctx.event.data {
            EventPayload::PdfGenerate(p) => p.clone(),
            other => {
                warn!(kind = other.kind_name(), "pdf generation handler received unexpected payload");
                return Ok(serde_json::json!({ "skipped": true }));
            }
        };

        let prepared = ctx
            .run("prepare-template", || {
                let template_type = payload.template_type.clone();
                let data = payload.data.clone();
                async move {
                    Ok::<_, anyhow::Error>(PreparedTemplate {
                        html: assemble_html(&template_type, &data),
                        template_type,
                    })
                }
            })
            .await?;

        let timeout = self.step_timeout;
        let rendered_bytes = ctx
            .run("generate-pdf", || {
                let renderer = self.renderer.clone();
                let template_type = prepared.template_type.clone();
                let data = payload.data.clone();
                async move {
                    let rendered = tokio::time::timeout(timeout, renderer.render(&template_type, data))
                        .await
                        .map_err(|_| anyhow::anyhow!("timeout: pdf render exceeded {}ms", timeout.as_millis()))??;
                    Ok::<_, anyhow::Error>(rendered.bytes)
                }
            })
            .await?;

        let epoch_ms = self.clock.now().timestamp_millis();
        let entity_id = payload.entity_id.clone().unwrap_or_else(|| "none".to_string());
        let blob_key = format!(
            "{}/{}/pdfs/{}-{}-{}.pdf",
            payload.tenant_id, payload.company_id, payload.template_type, entity_id, epoch_ms
        );
        let file_name = format!("{}-{}-{}.pdf", payload.template_type, entity_id, epoch_ms);

        let stored = ctx
            .run("store-pdf", || {
                let blob = self.blob.clone();
                let blob_key = blob_key.clone();
                let bytes = rendered_bytes.clone();
                async move {
                    let public_url = blob.put(&blob_key, bytes.clone(), "application/pdf").await?;
                    Ok::<_, anyhow::Error>(StoredPdf {
                        blob_key,
                        public_url,
                        size_kb: (bytes.len() as u64 + 512) / 1024,
                    })
                }
            })
            .await?;

        if let (Some(entity_id), Some(entity_type)) = (payload.entity_id.clone(), payload.entity_type.clone()) {
            let tenant_id = payload.tenant_id.clone();
            let company_id = payload.company_id.clone();
            let file_name = file_name.clone();
            let blob_key = stored.blob_key.clone();
            let data = self.data.clone();
            let new_id = self.clock.new_id();
            // Non-fatal on DB error: the PDF is already stored, so a
            // failure to record the cross-reference is logged, not raised.
            let _ = ctx
                .run("update-entity-reference", move || async move {
                    let attachment = Attachment {
                        id: new_id,
                        tenant_id,
                        company_id,
                        entity_type: Some(entity_type),
                        entity_id: Some(entity_id),
                        file_name,
                        file_path: blob_key,
                        file_type: "application/pdf".to_string(),
                        file_size: 0,
                        created_by: "pdf-generation".to_string(),
                        ocr_confidence: None,
                        ocr_status: None,
                        metadata: serde_json::json!({}),
                    };
                    if let Err(e) = data.upsert_attachment(attachment).await {
                        warn!(error = %e, "failed to record pdf attachment reference, continuing");
                    }
                    Ok::<_, anyhow::Error>(())
                })
                .await;
        }

        ctx.send(
            "notify-completion",
            tasker_shared::Event::new(
                self.clock.new_id(),
                names::PDF_GENERATED,
                EventPayload::PdfGenerated(PdfGeneratedPayload {
                    template_type: payload.template_type.clone(),
                    file_path: stored.blob_key.clone(),
                    file_name,
                    public_url: stored.public_url.clone(),
                    tenant_id: payload.tenant_id.clone(),
                    company_id: payload.company_id.clone(),
                    entity_id: payload.entity_id.clone(),
                    entity_type: payload.entity_type.clone(),
                    size_kb: stored.size_kb,
                }),
                self.clock.now(),
            ),
        )
        .await?;

        Ok(serde_json::json!({ "publicUrl": stored.public_url, "sizeKb": stored.size_kb }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tasker_runtime::StepContext;
    use tasker_shared::error::TaskerResult;
    use tasker_shared::events::{names, payload::PdfGeneratePayload};
    use tasker_shared::ports::{
        ConditionalUpdateOutcome, DlqRecord, DlqStatus, FxRateRecord, RenderedPdf, StepMemo, WorkflowRun,
        WorkflowRunStatus,
    };
    use tasker_shared::{Event, FakeClock};
    use tokio::sync::Mutex;
    use uuid::Uuid;

    #[derive(Debug, Default)]
    struct InMemoryData {
        memos: Mutex<std::collections::HashMap<(Uuid, String), StepMemo>>,
        attachments: Mutex<Vec<Attachment>>,
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
        async fn upsert_attachment(&self, attachment: Attachment) -> TaskerResult<()> {
            self.attachments.lock().await.push(attachment);
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

    #[derive(Debug)]
    struct StubRenderer {
        delay: Duration,
        renders: Mutex<u32>,
    }

    impl StubRenderer {
        fn instant() -> Self {
            Self { delay: Duration::ZERO, renders: Mutex::new(0) }
        }
    }

    #[async_trait]
    impl PdfRenderer for StubRenderer {
        async fn render(&self, _template_type: &str, _data: serde_json::Value) -> TaskerResult<RenderedPdf> {
            tokio::time::sleep(self.delay).await;
            *self.renders.lock().await += 1;
            Ok(RenderedPdf {
                bytes: b"%PDF-1.4 report".to_vec(),
                file_name: "report.pdf".to_string(),
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

    fn event(entity_id: Option<&str>) -> Event {
        Event::new(
            Uuid::new_v4(),
            names::PDF_GENERATE,
            EventPayload::PdfGenerate(PdfGeneratePayload {
                template_type: "invoice".to_string(),
                data: serde_json::json!({"total": 100}),
                tenant_id: "tenant-a".to_string(),
                company_id: "company-a".to_string(),
                entity_id: entity_id.map(str::to_string),
                entity_type: entity_id.map(|_| "invoice".to_string()),
            }),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn renders_stores_and_links_attachment() {
        let renderer = Arc::new(StubRenderer::instant());
        let blob = Arc::new(StubBlob::default());
        let data = Arc::new(InMemoryData::default());
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(Utc::now()));
        let handler = PdfGenerationHandler::new(renderer.clone(), blob.clone(), data.clone(), clock, Duration::from_millis(45_000));
        let bus = Arc::new(RecordingPublisher::default());
        let ctx = StepContext::new(Uuid::new_v4(), 1, event(Some("inv-1")), data.clone(), bus.clone(), Utc::now());

        let result = handler.handle(&ctx).await.unwrap();
        assert!(result["publicUrl"].as_str().is_some());
        assert_eq!(data.attachments.lock().await.len(), 1);
        assert!(bus.published.lock().await.iter().any(|e| e.name == names::PDF_GENERATED));
    }

    #[tokio::test]
    async fn render_exceeding_step_timeout_aborts_transiently() {
        let renderer = Arc::new(StubRenderer { delay: Duration::from_millis(50), renders: Mutex::new(0) });
        let blob = Arc::new(StubBlob::default());
        let data = Arc::new(InMemoryData::default());
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(Utc::now()));
        let handler = PdfGenerationHandler::new(renderer, blob, data.clone(), clock, Duration::from_millis(5));
        let bus = Arc::new(RecordingPublisher::default());
        let ctx = StepContext::new(Uuid::new_v4(), 1, event(None), data, bus, Utc::now());

        let result = handler.handle(&ctx).await;
        assert!(result.is_err());
        match ctx.take_outcome().await {
            Some(tasker_runtime::RunOutcome::Transient { step_name, .. }) => assert_eq!(step_name, "generate-pdf"),
            other => panic!("expected Transient timeout outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn replaying_the_same_run_does_not_re_render_or_re_store() {
        let renderer = Arc::new(StubRenderer::instant());
        let blob = Arc::new(StubBlob::default());
        let data = Arc::new(InMemoryData::default());
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(Utc::now()));
        let handler = PdfGenerationHandler::new(renderer.clone(), blob.clone(), data.clone(), clock, Duration::from_millis(45_000));
        let bus = Arc::new(RecordingPublisher::default());
        let run_id = Uuid::new_v4();
        let pdf_event = event(Some("inv-2"));

        for attempt in 1..=2 {
            let ctx = StepContext::new(run_id, attempt, pdf_event.clone(), data.clone(), bus.clone(), Utc::now());
            handler.handle(&ctx).await.unwrap();
        }

        assert_eq!(*renderer.renders.lock().await, 1, "memoized render must not run twice on replay");
        assert_eq!(*blob.puts.lock().await, 1, "memoized store must not run twice on replay");
    }
}
