//! Webhook event routing against an in-memory tracker.

use paperbridge_core::error::ErrorCode;
use paperbridge_core::event::{FIELD_ENTRY_ACCEPTED, FIELD_SUPERVISOR, InboundEvent};
use paperbridge_core::model::IssueState;
use paperbridge_core::router::{RouterContext, RouterError};
use paperbridge_core::testing::{InMemoryTracker, static_credentials};
use serde_json::json;

fn check_event(accepted: &str) -> InboundEvent {
    serde_json::from_value(json!({
        "kind": "ideal_stage_1_check",
        "paper_id": "P1",
        FIELD_SUPERVISOR: "Ben",
        FIELD_ENTRY_ACCEPTED: accepted,
    }))
    .expect("event decodes")
}

#[test]
fn accepted_check_comments_accepted() {
    let tracker = InMemoryTracker::new();
    let number = tracker.seed_issue("P1 Ana + Ben", &["paper_id=P1", "P1"], IssueState::Open);
    let credentials = static_credentials("t");
    let router = RouterContext {
        tracker: &tracker,
        credentials: &credentials,
    };

    let issue = router.route(&check_event("1")).expect("routed");
    assert_eq!(issue.number, number);
    let comments = tracker.comments();
    assert_eq!(comments.len(), 1);
    assert!(comments[0].1.contains("Accepted."));
    assert!(!comments[0].1.contains("Requires revision."));
}

#[test]
fn rejected_check_comments_requires_revision() {
    let tracker = InMemoryTracker::new();
    tracker.seed_issue("P1 Ana + Ben", &["paper_id=P1"], IssueState::Open);
    let credentials = static_credentials("t");
    let router = RouterContext {
        tracker: &tracker,
        credentials: &credentials,
    };

    router.route(&check_event("0")).expect("routed");
    let comments = tracker.comments();
    assert!(comments[0].1.contains("Requires revision."));
    assert!(!comments[0].1.contains("Accepted."));
}

#[test]
fn unknown_kind_makes_no_remote_calls() {
    let tracker = InMemoryTracker::new();
    tracker.seed_issue("P1 Ana + Ben", &["paper_id=P1"], IssueState::Open);
    let credentials = static_credentials("t");
    let router = RouterContext {
        tracker: &tracker,
        credentials: &credentials,
    };
    let event: InboundEvent =
        serde_json::from_value(json!({"kind": "bogus", "paper_id": "P1"})).expect("decodes");

    let err = router.route(&event).expect_err("unknown kind");
    assert!(matches!(err, RouterError::UnknownKind(_)));
    assert_eq!(err.code(), ErrorCode::UnknownEventKind);
    assert_eq!(tracker.total_calls(), 0);
}

#[test]
fn unknown_paper_makes_no_comment_calls() {
    let tracker = InMemoryTracker::new();
    tracker.seed_issue("P1 Ana + Ben", &["paper_id=P1"], IssueState::Open);
    tracker.seed_issue("P404 closed + issue", &["paper_id=P404"], IssueState::Closed);
    let credentials = static_credentials("t");
    let router = RouterContext {
        tracker: &tracker,
        credentials: &credentials,
    };

    let err = router
        .route(&InboundEvent::new("ideal_stage_2_entry", "P404"))
        .expect_err("no open issue");
    assert!(matches!(err, RouterError::NoMatchingIssue(ref id) if id == "P404"));
    assert_eq!(tracker.comment_calls(), 0);
    assert_eq!(tracker.create_calls(), 0);
}

#[test]
fn title_fallback_routes_legacy_issues() {
    let tracker = InMemoryTracker::new();
    let legacy = tracker.seed_issue("P7 Ana + Ben", &["P7"], IssueState::Open);
    let credentials = static_credentials("t");
    let router = RouterContext {
        tracker: &tracker,
        credentials: &credentials,
    };
    let event: InboundEvent = serde_json::from_value(json!({
        "form_id": "ideal_stage_1_entry",
        "paper_id": "P7",
        "coder": "Ana",
        "is_correction": "yes",
        "corrected_entry_id": "E-12"
    }))
    .expect("decodes");

    let issue = router.route(&event).expect("routed by title");
    assert_eq!(issue.number, legacy);
    assert!(tracker.comments()[0].1.contains("Correction of entry E-12."));
}

#[test]
fn title_prefix_never_overrides_another_papers_label() {
    let tracker = InMemoryTracker::new();
    tracker.seed_issue("P1 follow-up for P2", &["paper_id=P2"], IssueState::Open);
    let credentials = static_credentials("t");
    let router = RouterContext {
        tracker: &tracker,
        credentials: &credentials,
    };

    let err = router
        .route(&InboundEvent::new("ideal_stage_1_entry", "P1"))
        .expect_err("issue belongs to P2");
    assert!(matches!(err, RouterError::NoMatchingIssue(ref id) if id == "P1"));
    assert_eq!(tracker.comment_calls(), 0);
    assert!(tracker.comments().is_empty());
}
