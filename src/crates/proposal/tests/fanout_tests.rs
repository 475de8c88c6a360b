//! Integration tests for multi-provider fan-out and version management

mod common;

use async_trait::async_trait;
use common::{
    failing, harness, harness_with_references, harness_with_registry, harness_with_store, ok, slow,
};
use llm::{LlmError, ProviderConfig, ProviderRegistry, UsageCounters, Vendor};
use proposal::model::{ReferenceExcerpt, SubjectId, VersionId, VersionOutcome};
use proposal::{
    GenerationRequest, MemoryStore, ProposalError, ProviderStore, ReferenceSource,
    StaticReferences, SubjectProfile, VersionRecord, VersionStatus, VersionStore,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn request(subject_id: i64, requirements: &str, providers: &[&str]) -> GenerationRequest {
    GenerationRequest {
        subject_id,
        requirements: requirements.to_string(),
        provider_ids: providers.iter().map(|p| p.to_string()).collect(),
        parent_version_id: None,
        feedback: None,
    }
}

#[tokio::test]
async fn test_one_failing_provider_does_not_affect_siblings() {
    let p3 = failing("m3", LlmError::rejected("mock", Some(429), "quota exceeded"));
    let h = harness(vec![("p1", ok("m1")), ("p2", ok("m2")), ("p3", p3.clone())]);

    let records = h
        .service
        .fan_out_generate(request(1, "Build a customer portal", &["p1", "p2", "p3"]))
        .await
        .unwrap();

    assert_eq!(records.len(), 3);
    let providers: Vec<_> = records.iter().map(|r| r.provider_id.as_str()).collect();
    assert_eq!(providers, vec!["p1", "p2", "p3"]);
    assert!(records.iter().all(|r| r.version_number == 1));

    assert_eq!(records[0].status, VersionStatus::Completed);
    assert_eq!(records[1].status, VersionStatus::Completed);
    assert_eq!(records[2].status, VersionStatus::Failed);
    assert_eq!(records[0].tokens_used, 40);
    assert!(records[0].content.full_text.contains("Section 1 by m1."));

    let diagnostic = records[2].error_message.as_deref().unwrap();
    assert!(diagnostic.contains("mock"));
    assert!(diagnostic.contains("quota exceeded"));
    assert!(diagnostic.chars().count() <= 350);
    // the first section failed, so no further calls were made
    assert_eq!(p3.get_call_count(), 1);

    for record in &records {
        let stored = h.service.get_version(record.id).await.unwrap();
        assert_eq!(stored.status, record.status);
        assert_eq!(stored.content, record.content);
    }
}

#[tokio::test]
async fn test_end_to_end_versions_for_subject_7() {
    let h = harness(vec![("p1", ok("m1")), ("p2", ok("m2"))]);

    let first = h
        .service
        .fan_out_generate(request(7, "Upgrade core ledger system", &["p1", "p2"]))
        .await
        .unwrap();
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|r| r.version_number == 1));
    assert!(first.iter().all(|r| r.status == VersionStatus::Completed));

    let second = h
        .service
        .fan_out_generate(request(7, "Upgrade core ledger system", &["p1", "p2"]))
        .await
        .unwrap();
    assert!(second.iter().all(|r| r.version_number == 2));

    let listed = h.service.list_versions(7).await.unwrap();
    let numbers: Vec<_> = listed.iter().map(|r| r.version_number).collect();
    assert_eq!(numbers, vec![1, 1, 2, 2]);

    let counters = h.usage.counters("p1").await.unwrap();
    assert_eq!(counters.total_calls, 8);
    assert_eq!(counters.successful_calls, 8);
    assert_eq!(h.metrics.total_calls(), 16);
}

#[tokio::test]
async fn test_version_numbers_are_sequential_without_gaps() {
    let h = harness(vec![
        ("p1", ok("m1")),
        ("bad", failing("m2", LlmError::timeout("mock", "deadline exceeded"))),
    ]);

    for expected in 1..=5 {
        // even a fan-out where every provider fails consumes its number
        let providers: &[&str] = if expected % 2 == 0 { &["bad"] } else { &["p1"] };
        let records = h
            .service
            .fan_out_generate(request(3, "Data warehouse migration", providers))
            .await
            .unwrap();
        assert_eq!(records[0].version_number, expected);
    }
    assert_eq!(h.versions.max_version_number(3).await.unwrap(), 5);
    assert_eq!(h.versions.max_version_number(4).await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_fan_outs_get_distinct_numbers() {
    let h = harness(vec![("p1", ok("m1")), ("p2", ok("m2"))]);

    let (a, b) = tokio::join!(
        h.service.fan_out_generate(request(5, "ERP rollout", &["p1"])),
        h.service.fan_out_generate(request(5, "ERP rollout", &["p2"])),
    );
    let numbers: HashSet<_> = [a.unwrap()[0].version_number, b.unwrap()[0].version_number]
        .into_iter()
        .collect();
    assert_eq!(numbers, HashSet::from([1, 2]));
}

#[tokio::test]
async fn test_invalid_requests_allocate_nothing() {
    let h = harness(vec![("p1", ok("m1")), ("p2", ok("m2")), ("p3", ok("m3")), ("p4", ok("m4"))]);

    let cases = vec![
        request(1, "req", &[]),
        request(1, "req", &["p1", "p2", "p3", "p4"]),
        request(1, "req", &["p1", "p1"]),
        request(1, "req", &["nope"]),
        request(1, "   ", &["p1"]),
    ];
    for case in cases {
        let err = h.service.fan_out_generate(case).await.unwrap_err();
        assert!(matches!(err, ProposalError::InvalidRequest(_)), "got {:?}", err);
    }

    let mut orphan = request(1, "req", &["p1"]);
    orphan.parent_version_id = Some(uuid::Uuid::new_v4());
    assert!(h.service.fan_out_generate(orphan).await.unwrap_err().is_not_found());

    assert_eq!(h.versions.max_version_number(1).await.unwrap(), 0);
}

#[tokio::test]
async fn test_parent_must_belong_to_subject() {
    let h = harness(vec![("p1", ok("m1"))]);
    let parent = h
        .service
        .fan_out_generate(request(1, "req", &["p1"]))
        .await
        .unwrap()
        .remove(0);

    let mut foreign = request(2, "req", &["p1"]);
    foreign.parent_version_id = Some(parent.id);
    let err = h.service.fan_out_generate(foreign).await.unwrap_err();
    assert!(matches!(err, ProposalError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_misconfigured_provider_fails_only_its_record() {
    let good = ok("m1");
    // OpenAI without an api key cannot be built
    let registry = ProviderRegistry::from_configs(vec![ProviderConfig::new(
        "broken",
        Vendor::OpenAi,
        "gpt-4o-mini",
    )])
    .with_adapter(ProviderConfig::new("good", Vendor::Ollama, "m1"), good);
    let h = harness_with_registry(Arc::new(MemoryStore::new()), registry);

    let records = h
        .service
        .fan_out_generate(request(1, "req", &["good", "broken"]))
        .await
        .unwrap();
    assert_eq!(records[0].status, VersionStatus::Completed);
    assert_eq!(records[1].status, VersionStatus::Failed);
    assert_eq!(records[1].model_id, "gpt-4o-mini");
    assert!(records[1].error_message.as_deref().unwrap().contains("api_key"));
}

#[tokio::test]
async fn test_abandoned_fan_out_keeps_running() {
    let h = harness(vec![("p1", slow("m1", Duration::from_millis(30)))]);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        h.service.fan_out_generate(request(9, "Slow request", &["p1"])),
    )
    .await;
    assert!(abandoned.is_err());

    // the record exists as soon as the fan-out starts
    let pending = h.versions.list_for_subject(9).await.unwrap();
    assert_eq!(pending.len(), 1);

    let mut status = pending[0].status;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        status = h.versions.get(pending[0].id).await.unwrap().unwrap().status;
        if status != VersionStatus::Generating {
            break;
        }
    }
    assert_eq!(status, VersionStatus::Completed);
}

#[tokio::test]
async fn test_iterate_carries_parent_content_and_feedback() {
    let p1 = ok("m1");
    let h = harness(vec![("p1", p1.clone()), ("p2", ok("m2"))]);

    let parent = h
        .service
        .fan_out_generate(request(11, "Modernize billing", &["p1"]))
        .await
        .unwrap()
        .remove(0);

    let children = h
        .service
        .iterate(parent.id, "Add a migration timeline", vec!["p1".into(), "p2".into()])
        .await
        .unwrap();

    assert_eq!(children.len(), 2);
    for child in &children {
        assert_eq!(child.version_number, 2);
        assert_eq!(child.parent_version_id, Some(parent.id));
        assert_eq!(child.requirements, "Modernize billing");
    }

    let prompts = p1.prompts.lock().unwrap().clone();
    let iteration_prompt = &prompts[4];
    assert!(iteration_prompt.contains("Previous version:\nSection 1 by m1."));
    assert!(iteration_prompt.contains("Reviewer feedback to address:\nAdd a migration timeline"));

    let stored_parent = h.service.get_version(parent.id).await.unwrap();
    assert_eq!(stored_parent.feedback.as_deref(), Some("Add a migration timeline"));

    let lineage = h.service.lineage(children[0].id).await.unwrap();
    let ids: Vec<_> = lineage.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![parent.id, children[0].id]);
}

#[tokio::test]
async fn test_compare_and_select() {
    let h = harness(vec![
        ("p1", ok("m1")),
        ("p2", ok("m2")),
        ("p3", failing("m3", LlmError::unavailable("mock", "connection refused"))),
    ]);
    let records = h
        .service
        .fan_out_generate(request(20, "Cloud migration", &["p1", "p2", "p3"]))
        .await
        .unwrap();
    let ids: Vec<_> = records.iter().map(|r| r.id).collect();

    let summary = h.service.compare(&ids).await.unwrap();
    assert_eq!(summary.versions.len(), 3);
    assert_eq!(summary.aggregate.providers, vec!["p1/m1", "p2/m2", "p3/m3"]);
    assert_eq!(summary.aggregate.status_histogram["completed"], 2);
    assert_eq!(summary.aggregate.status_histogram["failed"], 1);
    assert_eq!(summary.aggregate.min_version_number, 1);
    assert_eq!(summary.aggregate.max_version_number, 1);
    let serialized = serde_json::to_string(&summary).unwrap();
    assert!(!serialized.contains("Section 1 by m1."));

    assert!(h.service.compare(&ids[..1]).await.is_err());
    assert!(h.service.compare(&[ids[0], ids[0]]).await.is_err());

    let selected = h.service.select_version(ids[0]).await.unwrap();
    assert_eq!(selected.status, VersionStatus::Selected);
    h.service.select_version(ids[1]).await.unwrap();
    assert_eq!(
        h.service.get_version(ids[0]).await.unwrap().status,
        VersionStatus::Completed
    );
    assert_eq!(
        h.service.get_version(ids[1]).await.unwrap().status,
        VersionStatus::Selected
    );

    let err = h.service.select_version(ids[2]).await.unwrap_err();
    assert!(matches!(err, ProposalError::InvalidRequest(_)));

    assert_eq!(h.service.rate_version(ids[1], 5).await.unwrap().user_rating, Some(5));
    assert!(h.service.rate_version(ids[1], 9).await.is_err());
}

#[tokio::test]
async fn test_version_list_cache_is_invalidated() {
    let h = harness(vec![("p1", ok("m1"))]);

    h.service
        .fan_out_generate(request(30, "req", &["p1"]))
        .await
        .unwrap();
    assert_eq!(h.service.list_versions(30).await.unwrap().len(), 1);
    assert!(h.cache.get("subject:30:versions").await.is_some());

    h.service
        .fan_out_generate(request(30, "req", &["p1"]))
        .await
        .unwrap();
    assert_eq!(h.service.list_versions(30).await.unwrap().len(), 2);

    let listed = h.service.list_versions(30).await.unwrap();
    h.service.select_version(listed[0].id).await.unwrap();
    let listed = h.service.list_versions(30).await.unwrap();
    assert_eq!(listed[0].status, VersionStatus::Selected);
}

#[tokio::test]
async fn test_diff_between_versions() {
    let h = harness(vec![("p1", ok("m1")), ("p2", ok("m2"))]);
    let records = h
        .service
        .fan_out_generate(request(40, "req", &["p1", "p2"]))
        .await
        .unwrap();

    let same = h.service.diff_versions(records[0].id, records[0].id).await.unwrap();
    assert_eq!(proposal::human_summary(&same), "no changes");

    let diff = h.service.diff_versions(records[0].id, records[1].id).await.unwrap();
    assert_eq!(diff.summary.total_fields, 5);
    assert_eq!(diff.summary.changed_fields, 5);
    assert_eq!(proposal::human_summary(&diff), "modified 5 fields");
    assert!(proposal::is_major_change(&diff, proposal::DEFAULT_MAJOR_CHANGE_THRESHOLD));
}

/// Memory store whose listing returns what it read, but only after a delay
struct SlowListStore {
    inner: MemoryStore,
    delay: Duration,
}

#[async_trait]
impl VersionStore for SlowListStore {
    async fn max_version_number(&self, subject_id: SubjectId) -> proposal::Result<i64> {
        self.inner.max_version_number(subject_id).await
    }

    async fn reserve_version_number(&self, subject_id: SubjectId, n: i64) -> proposal::Result<()> {
        self.inner.reserve_version_number(subject_id, n).await
    }

    async fn create(&self, record: &VersionRecord) -> proposal::Result<()> {
        self.inner.create(record).await
    }

    async fn get(&self, id: VersionId) -> proposal::Result<Option<VersionRecord>> {
        self.inner.get(id).await
    }

    async fn list_for_subject(&self, subject_id: SubjectId) -> proposal::Result<Vec<VersionRecord>> {
        let records = self.inner.list_for_subject(subject_id).await?;
        tokio::time::sleep(self.delay).await;
        Ok(records)
    }

    async fn finish(&self, id: VersionId, outcome: VersionOutcome) -> proposal::Result<VersionRecord> {
        self.inner.finish(id, outcome).await
    }

    async fn set_status(&self, id: VersionId, status: VersionStatus) -> proposal::Result<VersionRecord> {
        self.inner.set_status(id, status).await
    }

    async fn set_rating(&self, id: VersionId, rating: u8) -> proposal::Result<VersionRecord> {
        self.inner.set_rating(id, rating).await
    }

    async fn set_feedback(&self, id: VersionId, feedback: &str) -> proposal::Result<VersionRecord> {
        self.inner.set_feedback(id, feedback).await
    }
}

#[async_trait]
impl ProviderStore for SlowListStore {
    async fn record_usage(&self, provider_id: &str, success: bool, tokens: u64) -> proposal::Result<()> {
        self.inner.record_usage(provider_id, success, tokens).await
    }

    async fn counters(&self, provider_id: &str) -> proposal::Result<UsageCounters> {
        self.inner.counters(provider_id).await
    }
}

#[tokio::test]
async fn test_list_loaded_during_generation_is_not_cached() {
    let store = Arc::new(SlowListStore {
        inner: MemoryStore::new(),
        delay: Duration::from_millis(200),
    });
    // four sections at 30ms each finish well before the listing returns
    let h = harness_with_store(store, vec![("p1", slow("m1", Duration::from_millis(30)))]);

    let fan_out = h.service.fan_out_generate(request(50, "Migrate payroll", &["p1"]));
    let listing = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.service.list_versions(50).await.unwrap()
    };
    let (records, during) = tokio::join!(fan_out, listing);
    let records = records.unwrap();

    assert_eq!(records[0].status, VersionStatus::Completed);
    assert_eq!(during[0].status, VersionStatus::Generating);
    assert!(h.cache.get("subject:50:versions").await.is_none());

    let after = h.service.list_versions(50).await.unwrap();
    assert_eq!(after[0].status, VersionStatus::Completed);
    assert!(h.cache.get("subject:50:versions").await.is_some());
}

struct CountingReferences {
    inner: StaticReferences,
    calls: AtomicUsize,
}

#[async_trait]
impl ReferenceSource for CountingReferences {
    async fn subject(&self, subject_id: SubjectId) -> proposal::Result<Option<SubjectProfile>> {
        self.inner.subject(subject_id).await
    }

    async fn references(
        &self,
        subject_id: SubjectId,
        requirements: &str,
        limit: usize,
    ) -> proposal::Result<Vec<ReferenceExcerpt>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.references(subject_id, requirements, limit).await
    }
}

#[tokio::test]
async fn test_references_are_looked_up_once_per_fan_out() {
    let source = Arc::new(CountingReferences {
        inner: StaticReferences::new().with_reference(
            60,
            "Payroll rollout 2023",
            "Phased migration across three regions",
        ),
        calls: AtomicUsize::new(0),
    });
    let p1 = ok("m1");
    let h = harness_with_references(
        source.clone(),
        vec![("p1", p1.clone()), ("p2", ok("m2")), ("p3", ok("m3"))],
    );

    h.service
        .fan_out_generate(request(60, "Migrate payroll", &["p1", "p2", "p3"]))
        .await
        .unwrap();
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    assert!(p1.prompts.lock().unwrap()[0].contains("Payroll rollout 2023"));

    // a second fan-out for the same requirements is served from the cache
    h.service
        .fan_out_generate(request(60, "Migrate payroll", &["p1", "p2"]))
        .await
        .unwrap();
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
}
