//! Human answers flow back into the semantic cache.

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use e2e_tests::{note, TestHarness};
use insight_pipeline::MemoryVault;
use insight_router::{EscalationQueue, RoutingPath};

const TEXT: &str = "Quarterly review: the team shipped the new storage engine.";

#[tokio::test]
async fn test_resolved_escalation_answers_the_next_run() {
    let harness = TestHarness::new(0.0);
    let vault = MemoryVault::with_notes([note("review.md", TEXT)]);
    let pipeline = harness.pipeline();
    let mut resolved = harness.escalations.subscribe();

    let first = pipeline.run(&vault, CancellationToken::new()).await.unwrap();
    let escalation_id = first
        .produced_for("review.md")
        .and_then(|p| p.escalation_id.clone())
        .unwrap();

    let escalation = harness
        .router
        .resolve_escalation(&escalation_id, "Storage engine shipped on time.")
        .await
        .unwrap();
    assert_eq!(escalation.id, escalation_id);
    assert_eq!(resolved.try_recv().unwrap().id, escalation_id);
    assert!(harness.escalations.pending().unwrap().is_empty());

    let second = pipeline.run(&vault, CancellationToken::new()).await.unwrap();

    assert_eq!(second.routing.cache_hits, 1);
    assert_eq!(second.escalated(), 0);
    assert_eq!(harness.provider.calls(), 0);
    let latest = harness.sink.artifacts().last().cloned().unwrap();
    assert_eq!(latest.analysis.as_deref(), Some("Storage engine shipped on time."));
    assert_eq!(latest.decisions[0].path, RoutingPath::CacheHit);
}

#[tokio::test]
async fn test_resolving_twice_is_rejected() {
    let harness = TestHarness::new(0.0);
    let vault = MemoryVault::with_notes([note("review.md", TEXT)]);
    harness
        .pipeline()
        .run(&vault, CancellationToken::new())
        .await
        .unwrap();
    let id = harness.escalations.pending().unwrap()[0].id.clone();

    harness.router.resolve_escalation(&id, "first").await.unwrap();
    assert!(harness.router.resolve_escalation(&id, "second").await.is_err());
    assert_eq!(harness.responses.len(), 1);
}
