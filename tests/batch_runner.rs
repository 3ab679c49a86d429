//! End-to-end batch runs against in-memory stores and a scripted provider.

mod common;

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use ai_job_pipeline::concurrency::{ConcurrencyLimits, SlotCounts};
use ai_job_pipeline::jobs::{InMemoryJobStore, JobStatus, JobStore, JobType, NewJob};
use ai_job_pipeline::provider::{ChatProvider, CompletionRequest, FailureCategory};
use ai_job_pipeline::resilience::RateQuota;
use ai_job_pipeline::runner::{BatchLimit, BatchRunner, StopReason, Worker};
use ai_job_pipeline::tasks::{EntityStore, Handlers};
use ai_job_pipeline::types::Usage;
use ai_job_pipeline::{ChatCompletionResponse, Error, Result};

use common::{Fixture, ScriptedProvider, TRANSLATION_REPLY};

fn fixture() -> Fixture {
    Fixture::new(ConcurrencyLimits::new(5).with_limit(JobType::Translation, 3))
}

#[tokio::test]
async fn test_translation_completes_and_persists() {
    let fx = fixture();
    fx.content.add_chapter("ch-1", "It was a bright cold day in April.").unwrap();
    let job = fx.jobs.insert(NewJob::translation("ch-1", "de")).await.unwrap();

    let runner = fx.runner(Arc::new(ScriptedProvider::replying(TRANSLATION_REPLY)));
    let report = runner
        .run_batch(JobType::Translation, BatchLimit::UntilEmpty)
        .await
        .unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.stop, StopReason::Exhausted);
    assert_eq!(report.usage, Usage::new(10, 5));
    assert_eq!(report.success_rate(), 1.0);

    let stored = fx.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert!(stored.error_message.is_empty());

    let saved = fx.content.translation("ch-1", "de").unwrap().unwrap();
    assert_eq!(saved.title, "Kapitel 1");
    assert_eq!(
        fx.entities.get_translation("Winston", "de").await.unwrap().as_deref(),
        Some("Winston")
    );
}

#[tokio::test]
async fn test_existing_entity_translation_is_kept() {
    let fx = fixture();
    fx.content.add_chapter("ch-1", "Winston walked home.").unwrap();
    fx.entities.set_translation("Winston", "de", "Winni").await.unwrap();
    fx.jobs.insert(NewJob::translation("ch-1", "de")).await.unwrap();

    let runner = fx.runner(Arc::new(ScriptedProvider::replying(TRANSLATION_REPLY)));
    runner
        .run_batch(JobType::Translation, BatchLimit::UntilEmpty)
        .await
        .unwrap();

    assert_eq!(
        fx.entities.get_translation("Winston", "de").await.unwrap().as_deref(),
        Some("Winni")
    );
}

#[tokio::test]
async fn test_analysis_and_extraction_outputs_saved() {
    let fx = fixture();
    fx.content.add_chapter("ch-1", "Julia met Winston in the Golden Country.").unwrap();
    fx.content
        .add_upload("up-1", "Chapter 1\nIt begins.\nChapter 2\nIt ends.")
        .unwrap();
    fx.jobs.insert(NewJob::analysis("ch-1")).await.unwrap();
    fx.jobs.insert(NewJob::extraction("up-1")).await.unwrap();

    let provider = ScriptedProvider::replying("unused")
        .then_reply(
            r#"```json
{"characters":["Julia",{"name":"Winston","description":"clerk"}],"places":["Golden Country"],"terms":[],"summary":"They meet."}
```"#,
        )
        .then_reply(
            r#"{"chapters":[{"title":"Chapter 1","content":"It begins."},{"title":"Chapter 2","content":"It ends."}]}"#,
        );
    let runner = fx.runner(Arc::new(provider));

    let analysis = runner
        .run_batch(JobType::Analysis, BatchLimit::UntilEmpty)
        .await
        .unwrap();
    assert_eq!(analysis.completed, 1);
    let saved = fx.content.analysis("ch-1").unwrap().unwrap();
    assert_eq!(saved.characters.len(), 2);
    assert_eq!(saved.characters[1].description, "clerk");

    let extraction = runner
        .run_batch(JobType::Extraction, BatchLimit::UntilEmpty)
        .await
        .unwrap();
    assert_eq!(extraction.completed, 1);
    let chapters = fx.content.extracted_chapters("up-1").unwrap();
    assert_eq!(chapters.len(), 2);
    assert_eq!(chapters[1].content, "It ends.");
}

#[tokio::test(start_paused = true)]
async fn test_local_rate_limit_defers_job_and_stops_batch() {
    let fx = fixture();
    fx.content.add_chapter("ch-1", "one").unwrap();
    fx.content.add_chapter("ch-2", "two").unwrap();
    let first = fx.jobs.insert(NewJob::translation("ch-1", "de")).await.unwrap();
    let second = fx.jobs.insert(NewJob::translation("ch-2", "de")).await.unwrap();

    let provider = Arc::new(ScriptedProvider::replying(TRANSLATION_REPLY));
    let runner = fx
        .runner(provider.clone())
        .with_quota(RateQuota::per_minute(1))
        .with_max_wait(Duration::from_secs(5));
    let report = runner
        .run_batch(JobType::Translation, BatchLimit::UntilEmpty)
        .await
        .unwrap();

    assert_eq!(report.completed, 1);
    assert_eq!(report.deferred, 1);
    assert_eq!(report.failed, 0);
    match report.stop {
        StopReason::RateLimited {
            retry_after: Some(after),
        } => assert!(after > Duration::from_secs(5)),
        other => panic!("unexpected stop: {other:?}"),
    }
    assert!(report.stop.is_throttled());
    // the deferred job never reached the provider
    assert_eq!(provider.calls(), 1);

    let first = fx.jobs.get(first.id).await.unwrap().unwrap();
    assert_eq!(first.status, JobStatus::Completed);
    let second = fx.jobs.get(second.id).await.unwrap().unwrap();
    assert_eq!(second.status, JobStatus::Pending);
    assert_eq!(second.retry_count, 1);
    assert!(second.error_message.contains("Rate limit"));
    assert_eq!(
        fx.concurrency.counts(JobType::Translation).await.unwrap(),
        SlotCounts::default()
    );
}

#[tokio::test]
async fn test_provider_rate_limit_defers_with_retry_after() {
    let fx = fixture();
    fx.content.add_chapter("ch-1", "one").unwrap();
    fx.content.add_chapter("ch-2", "two").unwrap();
    fx.jobs.insert(NewJob::translation("ch-1", "de")).await.unwrap();
    fx.jobs.insert(NewJob::translation("ch-2", "de")).await.unwrap();

    let provider = ScriptedProvider::replying(TRANSLATION_REPLY).then_fail(Error::rate_limit(
        "scripted",
        "429 too many requests",
        Some(Duration::from_secs(20)),
    ));
    let runner = fx.runner(Arc::new(provider));
    let report = runner
        .run_batch(JobType::Translation, BatchLimit::UntilEmpty)
        .await
        .unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.deferred, 1);
    assert_eq!(
        report.stop,
        StopReason::RateLimited {
            retry_after: Some(Duration::from_secs(20))
        }
    );
    assert_eq!(
        fx.jobs
            .count_by_status(JobType::Translation, JobStatus::Pending)
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn test_unparseable_response_fails_job_with_diagnostics() {
    let fx = fixture();
    fx.content.add_chapter("ch-1", "It was a bright cold day in April.").unwrap();
    let job = fx.jobs.insert(NewJob::translation("ch-1", "de")).await.unwrap();

    let runner = fx.runner(Arc::new(ScriptedProvider::replying("not json")));
    let report = runner
        .run_batch(JobType::Translation, BatchLimit::UntilEmpty)
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.stop, StopReason::Exhausted);
    let stored = fx.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error_message.contains("Response parsing error"));
    assert!(stored.error_message.contains("provider=scripted model=scripted-1"));
    assert!(stored.error_message.contains("bright cold day"));
    assert!(stored.error_message.contains("response: not json"));
}

#[tokio::test]
async fn test_missing_required_field_fails_job() {
    let fx = fixture();
    fx.content.add_chapter("ch-1", "text").unwrap();
    let job = fx.jobs.insert(NewJob::translation("ch-1", "de")).await.unwrap();

    let runner = fx.runner(Arc::new(ScriptedProvider::replying(r#"{"title":"A"}"#)));
    runner
        .run_batch(JobType::Translation, BatchLimit::UntilEmpty)
        .await
        .unwrap();

    let stored = fx.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error_message.contains("Validation error"));
    assert!(stored.error_message.contains("field: content"));
}

#[tokio::test]
async fn test_api_failure_fails_job_and_batch_continues() {
    let fx = fixture();
    fx.content.add_chapter("ch-1", "one").unwrap();
    fx.content.add_chapter("ch-2", "two").unwrap();
    let first = fx.jobs.insert(NewJob::translation("ch-1", "de")).await.unwrap();
    let second = fx.jobs.insert(NewJob::translation("ch-2", "de")).await.unwrap();

    let provider = ScriptedProvider::replying(TRANSLATION_REPLY).then_fail(Error::Api {
        provider: "scripted".into(),
        category: FailureCategory::ServerError,
        status: Some(500),
        message: "upstream exploded".into(),
    });
    let runner = fx.runner(Arc::new(provider));
    let report = runner
        .run_batch(JobType::Translation, BatchLimit::UntilEmpty)
        .await
        .unwrap();

    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.success_rate(), 0.5);

    let first = fx.jobs.get(first.id).await.unwrap().unwrap();
    assert_eq!(first.status, JobStatus::Failed);
    assert!(first.error_message.contains("HTTP 500"));
    assert!(first.error_message.contains("response: -"));
    let second = fx.jobs.get(second.id).await.unwrap().unwrap();
    assert_eq!(second.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_missing_chapter_fails_job() {
    let fx = fixture();
    let job = fx.jobs.insert(NewJob::analysis("ghost")).await.unwrap();

    let provider = Arc::new(ScriptedProvider::replying("{}"));
    let runner = fx.runner(provider.clone());
    runner
        .run_batch(JobType::Analysis, BatchLimit::UntilEmpty)
        .await
        .unwrap();

    let stored = fx.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error_message.contains("chapter ghost not found"));
    assert!(stored.error_message.contains("prompt: -"));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_slots_released_after_every_outcome() {
    let fx = fixture();
    for i in 0..3 {
        fx.content.add_chapter(&format!("ch-{i}"), "text").unwrap();
        fx.jobs
            .insert(NewJob::translation(format!("ch-{i}"), "de"))
            .await
            .unwrap();
    }
    let before = fx.concurrency.counts(JobType::Translation).await.unwrap();

    let provider = ScriptedProvider::replying(TRANSLATION_REPLY)
        .then_reply("not json")
        .then_fail(Error::validation("bad request"));
    let runner = fx.runner(Arc::new(provider));
    let report = runner
        .run_batch(JobType::Translation, BatchLimit::UntilEmpty)
        .await
        .unwrap();

    assert_eq!(report.processed, 3);
    assert_eq!(report.failed, 2);
    assert_eq!(report.completed, 1);
    let after = fx.concurrency.counts(JobType::Translation).await.unwrap();
    assert_eq!(before, after);
    assert_eq!(after, SlotCounts::default());
}

#[tokio::test]
async fn test_no_capacity_leaves_jobs_untouched() {
    let fx = Fixture::new(ConcurrencyLimits::new(1));
    fx.content.add_chapter("ch-1", "text").unwrap();
    let job = fx.jobs.insert(NewJob::translation("ch-1", "de")).await.unwrap();
    let held = fx.concurrency.acquire(JobType::Analysis).await.unwrap();

    let provider = Arc::new(ScriptedProvider::replying(TRANSLATION_REPLY));
    let runner = fx.runner(provider.clone());
    let report = runner
        .run_batch(JobType::Translation, BatchLimit::UntilEmpty)
        .await
        .unwrap();

    assert_eq!(report.stop, StopReason::CapacityReached);
    assert_eq!(report.processed, 0);
    assert_eq!(provider.calls(), 0);
    let stored = fx.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.retry_count, 0);

    held.release().await.unwrap();
    let report = runner
        .run_batch(JobType::Translation, BatchLimit::UntilEmpty)
        .await
        .unwrap();
    assert_eq!(report.completed, 1);
}

#[tokio::test]
async fn test_count_limit_stops_batch() {
    let fx = fixture();
    for i in 0..3 {
        fx.content.add_chapter(&format!("ch-{i}"), "text").unwrap();
        fx.jobs
            .insert(NewJob::translation(format!("ch-{i}"), "de"))
            .await
            .unwrap();
    }

    let runner = fx.runner(Arc::new(ScriptedProvider::replying(TRANSLATION_REPLY)));
    let report = runner
        .run_batch(JobType::Translation, BatchLimit::Count(2))
        .await
        .unwrap();

    assert_eq!(report.processed, 2);
    assert_eq!(report.stop, StopReason::LimitReached);
    assert_eq!(
        fx.jobs
            .count_by_status(JobType::Translation, JobStatus::Pending)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_unhandled_job_type_is_configuration_error() {
    let fx = fixture();
    let runner = BatchRunner::new(
        fx.jobs.clone(),
        fx.concurrency.clone(),
        fx.limiter.clone(),
        Arc::new(ScriptedProvider::replying("{}")),
        Handlers::new(),
    );
    let err = runner
        .run_batch(JobType::Translation, BatchLimit::UntilEmpty)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
}

/// Cancels every in-flight job from inside the provider call, as an operator would.
struct CancellingProvider {
    jobs: Arc<InMemoryJobStore>,
}

#[async_trait]
impl ChatProvider for CancellingProvider {
    fn name(&self) -> &str {
        "cancelling"
    }

    fn model(&self) -> &str {
        "cancelling-1"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<ChatCompletionResponse> {
        for job in self.jobs.snapshot()? {
            if job.status == JobStatus::Processing {
                self.jobs.cancel(job.id, "cancelled by operator")?;
            }
        }
        Ok(ChatCompletionResponse {
            content: TRANSLATION_REPLY.into(),
            model: "cancelling-1".into(),
            provider: "cancelling".into(),
            finish_reason: Some("stop".into()),
            usage: Usage::new(1, 1),
        })
    }
}

#[tokio::test]
async fn test_operator_cancel_discards_result() {
    let fx = fixture();
    fx.content.add_chapter("ch-1", "text").unwrap();
    let job = fx.jobs.insert(NewJob::translation("ch-1", "de")).await.unwrap();

    let runner = fx.runner(Arc::new(CancellingProvider {
        jobs: fx.jobs.clone(),
    }));
    let report = runner
        .run_batch(JobType::Translation, BatchLimit::UntilEmpty)
        .await
        .unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.completed, 0);
    assert_eq!(report.discarded, 1);
    let stored = fx.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.error_message, "cancelled by operator");
    assert!(fx.content.translation("ch-1", "de").unwrap().is_none());
    assert!(fx
        .entities
        .get_translation("Winston", "de")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_oversized_provider_error_is_bounded() {
    let fx = fixture();
    fx.content.add_chapter("ch-1", "text").unwrap();
    let job = fx.jobs.insert(NewJob::translation("ch-1", "de")).await.unwrap();

    let provider = ScriptedProvider::replying(TRANSLATION_REPLY).then_fail(Error::Api {
        provider: "scripted".into(),
        category: FailureCategory::ServerError,
        status: Some(502),
        message: "<html>".repeat(40_000),
    });
    fx.runner(Arc::new(provider))
        .run_batch(JobType::Translation, BatchLimit::UntilEmpty)
        .await
        .unwrap();

    let stored = fx.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error_message.starts_with("API error"));
    assert!(stored.error_message.contains("provider=scripted"));
    assert!(stored.error_message.chars().count() < 2_000);
}

/// Records the chapter text of every request it sees.
struct RecordingProvider {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl ChatProvider for RecordingProvider {
    fn name(&self) -> &str {
        "recording"
    }

    fn model(&self) -> &str {
        "recording-1"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<ChatCompletionResponse> {
        let text = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.seen.lock().unwrap().push(text);
        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok(ChatCompletionResponse {
            content: TRANSLATION_REPLY.into(),
            model: "recording-1".into(),
            provider: "recording".into(),
            finish_reason: Some("stop".into()),
            usage: Usage::new(1, 1),
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runners_send_each_job_once() {
    let fx = fixture();
    for i in 0..20 {
        fx.content.add_chapter(&format!("ch-{i}"), &format!("text {i}")).unwrap();
        fx.jobs
            .insert(NewJob::translation(format!("ch-{i}"), "de"))
            .await
            .unwrap();
    }
    let provider = Arc::new(RecordingProvider {
        seen: Mutex::new(Vec::new()),
    });

    let runs = (0..2).map(|_| {
        let runner = BatchRunner::new(
            fx.jobs.clone(),
            fx.concurrency.clone(),
            fx.limiter.clone(),
            provider.clone(),
            fx.handlers(),
        );
        tokio::spawn(async move {
            runner
                .run_batch(JobType::Translation, BatchLimit::UntilEmpty)
                .await
        })
    });
    let reports: Vec<_> = join_all(runs)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(reports.iter().map(|r| r.completed).sum::<usize>(), 20);
    assert_eq!(reports.iter().map(|r| r.processed).sum::<usize>(), 20);

    let mut seen = provider.seen.lock().unwrap().clone();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 20);
    assert_eq!(provider.seen.lock().unwrap().len(), 20);
    assert_eq!(
        fx.jobs
            .count_by_status(JobType::Translation, JobStatus::Completed)
            .await
            .unwrap(),
        20
    );
    assert_eq!(
        fx.concurrency.counts(JobType::Translation).await.unwrap(),
        SlotCounts::default()
    );
}

#[tokio::test(start_paused = true)]
async fn test_worker_drains_queue_until_cancelled() {
    let fx = fixture();
    fx.content.add_chapter("ch-1", "text").unwrap();
    fx.content.add_upload("up-1", "Chapter 1\nbody").unwrap();
    fx.jobs.insert(NewJob::translation("ch-1", "de")).await.unwrap();
    fx.jobs.insert(NewJob::extraction("up-1")).await.unwrap();

    // translation runs first in each pass, extraction gets the fallback
    let provider =
        ScriptedProvider::replying(r#"{"chapters":[{"title":"Chapter 1","content":"body"}]}"#)
            .then_reply(TRANSLATION_REPLY);
    let runner = Arc::new(fx.runner(Arc::new(provider)));
    let worker = Arc::new(Worker::new(runner).with_poll_interval(Duration::from_secs(1)));

    let token = CancellationToken::new();
    let handle = worker.start(token.clone());
    tokio::time::sleep(Duration::from_secs(3)).await;
    token.cancel();
    let stats = handle.await.unwrap();

    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.errors, 0);
    assert!(stats.passes >= 2);
    assert_eq!(fx.content.extracted_chapters("up-1").unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_worker_sleeps_for_provider_retry_after() {
    let fx = fixture();
    fx.content.add_chapter("ch-1", "text").unwrap();
    fx.jobs.insert(NewJob::translation("ch-1", "de")).await.unwrap();

    let provider = ScriptedProvider::replying(TRANSLATION_REPLY).then_fail(Error::rate_limit(
        "scripted",
        "slow down",
        Some(Duration::from_secs(30)),
    ));
    let runner = Arc::new(fx.runner(Arc::new(provider)));
    let worker = Worker::new(runner)
        .with_job_types(vec![JobType::Translation])
        .with_poll_interval(Duration::from_secs(5));

    let mut stats = Default::default();
    let delay = worker.run_once(&mut stats).await;
    assert_eq!(delay, Duration::from_secs(30));
    assert_eq!(stats.deferred, 1);

    let delay = worker.run_once(&mut stats).await;
    assert_eq!(delay, Duration::from_secs(5));
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.passes, 2);
}

#[tokio::test]
async fn test_worker_keeps_going_while_count_limit_hits() {
    let fx = fixture();
    for i in 0..3 {
        fx.content.add_chapter(&format!("ch-{i}"), "text").unwrap();
        fx.jobs
            .insert(NewJob::translation(format!("ch-{i}"), "de"))
            .await
            .unwrap();
    }
    let runner = Arc::new(fx.runner(Arc::new(ScriptedProvider::replying(TRANSLATION_REPLY))));
    let worker = Worker::new(runner)
        .with_job_types(vec![JobType::Translation])
        .with_batch_limit(BatchLimit::Count(2));

    let mut stats = Default::default();
    assert_eq!(worker.run_once(&mut stats).await, Duration::ZERO);
    assert_ne!(worker.run_once(&mut stats).await, Duration::ZERO);
    assert_eq!(stats.completed, 3);
}
