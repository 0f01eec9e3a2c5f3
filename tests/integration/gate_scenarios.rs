//! End-to-end gate scenarios
//!
//! Every test drives a fresh handler with IPC commands only, the same way
//! the browser host does.

use container_gate::gate::{GateDecision, Verdict, VerdictReason};
use container_gate::ipc::{IpcCommand, IpcHandler, IpcResponse};
use container_gate::rules::{RuleState, SubdomainSetting};

use super::{
    build_handler, intercept, navigate, seeded_provider, BANKING, DEFAULT, PERSONAL, SHOPPING, WORK,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn handler() -> IpcHandler {
    build_handler(seeded_provider(), RuleState::new(), None)
}

async fn decide(handler: &IpcHandler, command: IpcCommand) -> GateDecision {
    match handler.handle(command).await {
        IpcResponse::Verdict(decision) => decision,
        other => panic!("Expected Verdict response, got {other:?}"),
    }
}

async fn add_rule(
    handler: &IpcHandler,
    domain: &str,
    container: &str,
    subdomains: SubdomainSetting,
) {
    let response = handler
        .handle(IpcCommand::AddRule {
            domain: domain.into(),
            container_name: container.into(),
            subdomains,
        })
        .await;
    assert!(matches!(response, IpcResponse::Rule { .. }), "{response:?}");
}

async fn pending_counts(handler: &IpcHandler, tab: i64) -> Vec<(String, u64)> {
    match handler.handle(IpcCommand::GetPendingRequests { tab_id: tab }).await {
        IpcResponse::PendingRequests { requests, .. } => requests
            .into_iter()
            .map(|r| (r.domain, r.count))
            .collect(),
        other => panic!("Expected PendingRequests response, got {other:?}"),
    }
}

async fn rule_version(handler: &IpcHandler) -> u64 {
    match handler.handle(IpcCommand::GetState).await {
        IpcResponse::State(snapshot) => snapshot.version,
        other => panic!("Expected State response, got {other:?}"),
    }
}

// ============================================================================
// Ownership and Inheritance
// ============================================================================

#[tokio::test]
async fn test_container_inheritance_allows_subdomain() {
    let handler = handler();
    add_rule(&handler, "amazon.com", "Shopping", SubdomainSetting::Defer).await;

    // Global default asks, so the subdomain waits for a decision
    let before = decide(&handler, intercept(1, SHOPPING, "https://pay.amazon.com/")).await;
    assert_eq!(before.reason, VerdictReason::Paused);

    let response = handler
        .handle(IpcCommand::SetContainerSubdomains {
            cookie_store_id: SHOPPING.into(),
            value: SubdomainSetting::Inherit,
        })
        .await;
    assert!(!response.is_error());

    let after = decide(&handler, intercept(2, SHOPPING, "https://pay.amazon.com/")).await;
    assert_eq!(after.verdict, Verdict::Allow);
    assert_eq!(after.reason, VerdictReason::SamePartition);
}

#[tokio::test]
async fn test_inheriting_rule_covers_every_unruled_subdomain() {
    let handler = handler();
    add_rule(&handler, "example.org", "Work", SubdomainSetting::Inherit).await;

    for host in ["a.example.org", "b.c.example.org", "deep.x.y.example.org"] {
        let decision = decide(&handler, intercept(3, WORK, &format!("https://{host}/"))).await;
        assert_eq!(decision.verdict, Verdict::Allow, "{host}");
    }
}

#[tokio::test]
async fn test_exact_rule_beats_inheriting_ancestor() {
    let handler = handler();
    add_rule(&handler, "example.com", "Shopping", SubdomainSetting::Inherit).await;
    add_rule(&handler, "mail.example.com", "Work", SubdomainSetting::ExactOnly).await;

    let in_work = decide(&handler, intercept(4, WORK, "https://mail.example.com/")).await;
    assert_eq!(in_work.reason, VerdictReason::SamePartition);

    let in_shopping = decide(&handler, intercept(5, SHOPPING, "https://mail.example.com/")).await;
    assert_eq!(in_shopping.verdict, Verdict::Block);
    assert_eq!(in_shopping.reason, VerdictReason::Paused);

    let sibling = decide(&handler, intercept(5, SHOPPING, "https://shop.example.com/")).await;
    assert_eq!(sibling.verdict, Verdict::Allow);
}

// ============================================================================
// Pausing and Intents
// ============================================================================

#[tokio::test]
async fn test_unowned_domain_pauses_until_allowed_once() {
    let handler = handler();
    let version = rule_version(&handler).await;

    let first = decide(&handler, intercept(7, PERSONAL, "https://tracker.io/p.gif")).await;
    assert_eq!(first.verdict, Verdict::Block);
    assert_eq!(first.pending_count, Some(1));

    let second = decide(&handler, intercept(7, PERSONAL, "https://tracker.io/p.gif")).await;
    assert_eq!(second.pending_count, Some(2));
    assert_eq!(pending_counts(&handler, 7).await, [("tracker.io".to_string(), 2)]);

    let response = handler
        .handle(IpcCommand::AllowOnce {
            tab_id: 7,
            domain: "tracker.io".into(),
        })
        .await;
    assert!(!response.is_error());
    assert!(pending_counts(&handler, 7).await.is_empty());
    assert_eq!(rule_version(&handler).await, version);

    let third = decide(&handler, intercept(7, PERSONAL, "https://tracker.io/p.gif")).await;
    assert_eq!(third.verdict, Verdict::Allow);
    assert_eq!(third.reason, VerdictReason::AllowedOnce);

    // Another tab still has to ask
    let other_tab = decide(&handler, intercept(8, PERSONAL, "https://tracker.io/p.gif")).await;
    assert_eq!(other_tab.reason, VerdictReason::Paused);
}

#[tokio::test]
async fn test_counts_accumulate_per_domain() {
    let handler = handler();
    for _ in 0..3 {
        decide(&handler, intercept(9, PERSONAL, "https://cdn.one.net/x.js")).await;
    }
    decide(&handler, intercept(9, PERSONAL, "https://two.net/y.js")).await;

    let mut counts = pending_counts(&handler, 9).await;
    counts.sort();
    assert_eq!(
        counts,
        [("cdn.one.net".to_string(), 3), ("two.net".to_string(), 1)]
    );
}

#[tokio::test]
async fn test_allow_permanently_creates_rule_and_clears_pending() {
    let handler = handler();
    decide(&handler, intercept(10, WORK, "https://docs.corp.dev/")).await;

    let response = handler
        .handle(IpcCommand::AllowDomain {
            tab_id: 10,
            domain: "docs.corp.dev".into(),
            add_rule: true,
            container_name: Some("Work".into()),
            enable_subdomains: SubdomainSetting::Defer,
        })
        .await;
    let IpcResponse::Rule { domain, rule } = response else {
        panic!("Expected Rule response, got {response:?}");
    };
    assert_eq!(domain, "docs.corp.dev");
    assert_eq!(rule.owner_id, WORK);
    assert!(pending_counts(&handler, 10).await.is_empty());

    // A fresh tab in the same partition is allowed by the rule
    let decision = decide(&handler, intercept(11, WORK, "https://docs.corp.dev/")).await;
    assert_eq!(decision.reason, VerdictReason::SamePartition);
}

#[tokio::test]
async fn test_block_for_page_then_navigation_resets() {
    let handler = handler();
    decide(&handler, intercept(12, PERSONAL, "https://ads.example.net/")).await;

    let response = handler
        .handle(IpcCommand::BlockDomain {
            tab_id: 12,
            domain: "ads.example.net".into(),
            add_exclusion: false,
            cookie_store_id: PERSONAL.into(),
        })
        .await;
    assert!(!response.is_error());

    let blocked = decide(&handler, intercept(12, PERSONAL, "https://ads.example.net/")).await;
    assert_eq!(blocked.reason, VerdictReason::BlockedByUser);

    // Navigating the tab elsewhere forgets page-scoped decisions
    decide(&handler, navigate(12, PERSONAL, "https://news.example.org/")).await;
    let again = decide(&handler, intercept(12, PERSONAL, "https://ads.example.net/")).await;
    assert_eq!(again.reason, VerdictReason::Paused);
}

#[tokio::test]
async fn test_exclusion_covers_subdomains() {
    let handler = handler();
    add_rule(&handler, "example.com", "Personal", SubdomainSetting::Inherit).await;

    let response = handler
        .handle(IpcCommand::BlockDomain {
            tab_id: 13,
            domain: "example.com".into(),
            add_exclusion: true,
            cookie_store_id: PERSONAL.into(),
        })
        .await;
    assert!(!response.is_error());

    for (tab, host) in [(14, "example.com"), (15, "a.example.com")] {
        let url = format!("https://{host}/");
        let decision = decide(&handler, intercept(tab, PERSONAL, &url)).await;
        assert_eq!(decision.verdict, Verdict::Block, "{host}");
        assert_eq!(decision.reason, VerdictReason::Excluded, "{host}");
    }

    let removed = handler
        .handle(IpcCommand::RemoveExclusion {
            cookie_store_id: PERSONAL.into(),
            domain: "example.com".into(),
        })
        .await;
    assert!(!removed.is_error());
    let decision = decide(&handler, intercept(16, PERSONAL, "https://a.example.com/")).await;
    assert_eq!(decision.verdict, Verdict::Allow);
}

// ============================================================================
// Blends
// ============================================================================

#[tokio::test]
async fn test_blend_is_one_directional() {
    let handler = handler();
    add_rule(&handler, "paypal.com", "Banking", SubdomainSetting::Inherit).await;
    add_rule(&handler, "intranet.work", "Work", SubdomainSetting::Inherit).await;

    let paused = decide(&handler, intercept(20, WORK, "https://www.paypal.com/")).await;
    assert_eq!(paused.reason, VerdictReason::Paused);

    let response = handler
        .handle(IpcCommand::AddBlend {
            cookie_store_id: WORK.into(),
            domain: "www.paypal.com".into(),
            tab_id: Some(20),
            confirmed: false,
        })
        .await;
    let IpcResponse::BlendConfirmationRequired { target, owner_label, .. } = response else {
        panic!("Expected BlendConfirmationRequired, got {response:?}");
    };
    assert_eq!(target, "paypal.com");
    assert_eq!(owner_label.as_deref(), Some("Banking"));

    let response = handler
        .handle(IpcCommand::AddBlend {
            cookie_store_id: WORK.into(),
            domain: "www.paypal.com".into(),
            tab_id: Some(20),
            confirmed: true,
        })
        .await;
    assert!(matches!(response, IpcResponse::Blended { .. }), "{response:?}");
    assert!(pending_counts(&handler, 20).await.is_empty());

    let allowed = decide(&handler, intercept(20, WORK, "https://www.paypal.com/")).await;
    assert_eq!(allowed.verdict, Verdict::Allow);
    assert_eq!(allowed.reason, VerdictReason::Blended);

    // The owner of paypal.com gains nothing from the work partition
    let reverse = decide(&handler, intercept(21, BANKING, "https://intranet.work/")).await;
    assert_eq!(reverse.reason, VerdictReason::Paused);
}

#[tokio::test]
async fn test_hidden_blend_warning_applies_immediately() {
    let handler = handler();
    add_rule(&handler, "paypal.com", "Banking", SubdomainSetting::Inherit).await;
    handler
        .handle(IpcCommand::SetHideBlendWarning { value: true })
        .await;

    let response = handler
        .handle(IpcCommand::AddBlend {
            cookie_store_id: SHOPPING.into(),
            domain: "paypal.com".into(),
            tab_id: None,
            confirmed: false,
        })
        .await;
    assert!(matches!(response, IpcResponse::Blended { .. }), "{response:?}");

    let decision = decide(&handler, intercept(22, SHOPPING, "https://paypal.com/")).await;
    assert_eq!(decision.reason, VerdictReason::Blended);
}

// ============================================================================
// Navigation and Temporary Partitions
// ============================================================================

#[tokio::test]
async fn test_navigation_to_foreign_owner_reopens() {
    let handler = handler();
    add_rule(&handler, "bank.example", "Banking", SubdomainSetting::Inherit).await;

    let decision = decide(&handler, navigate(30, PERSONAL, "https://bank.example/login")).await;
    assert_eq!(
        decision.verdict,
        Verdict::Reopen {
            cookie_store_id: BANKING.into()
        }
    );
    assert_eq!(decision.reason, VerdictReason::OwnedElsewhere);
}

#[tokio::test]
async fn test_unowned_navigation_uses_temporary_partition() {
    let handler = handler();

    let decision = decide(&handler, navigate(31, DEFAULT, "https://random.site/")).await;
    assert_eq!(decision.reason, VerdictReason::Temporary);
    let Verdict::Reopen { cookie_store_id } = decision.verdict else {
        panic!("Expected Reopen verdict");
    };

    // Reopened tab loads inside the temporary partition
    let inside = decide(&handler, navigate(32, &cookie_store_id, "https://random.site/")).await;
    assert_eq!(inside.verdict, Verdict::Allow);

    // The partition lives until its last tab closes
    let response = handler.handle(IpcCommand::TabClosed { tab_id: 31 }).await;
    assert!(matches!(response, IpcResponse::Success { message: None }), "{response:?}");
    let response = handler.handle(IpcCommand::TabClosed { tab_id: 32 }).await;
    assert!(matches!(response, IpcResponse::Success { message: Some(_) }), "{response:?}");
}

#[tokio::test]
async fn test_unparseable_url() {
    let handler = handler();

    let default = decide(&handler, intercept(40, DEFAULT, "not a url")).await;
    assert_eq!(default.verdict, Verdict::Allow);

    let permanent = decide(&handler, intercept(41, PERSONAL, "not a url")).await;
    assert_eq!(permanent.verdict, Verdict::Block);
    assert_eq!(permanent.reason, VerdictReason::Unparseable);
}
