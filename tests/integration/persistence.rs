//! State persistence across restarts
//!
//! A handler backed by a JSON file store is mutated through intents, then a
//! second handler is built from the same file, as the daemon does at
//! startup.

use std::sync::Arc;

use tempfile::tempdir;

use container_gate::gate::{Verdict, VerdictReason};
use container_gate::ipc::{IpcCommand, IpcHandler, IpcResponse};
use container_gate::partition::TempPartitionManager;
use container_gate::rules::{GlobalSubdomains, SubdomainSetting};
use container_gate::store::{JsonFileStore, StateStore};

use super::{
    build_handler, intercept, navigate, seeded_provider, BANKING, DEFAULT, PERSONAL, SHOPPING,
};

fn reopen(path: &std::path::Path) -> IpcHandler {
    let store = JsonFileStore::new(path);
    let state = store.load().unwrap();
    build_handler(seeded_provider(), state.rules, Some(Arc::new(store)))
}

async fn verdict(handler: &IpcHandler, command: IpcCommand) -> (Verdict, VerdictReason) {
    match handler.handle(command).await {
        IpcResponse::Verdict(decision) => (decision.verdict, decision.reason),
        other => panic!("Expected Verdict response, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rules_survive_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");

    {
        let handler = reopen(&path);
        for command in [
            IpcCommand::AddRule {
                domain: "paypal.com".into(),
                container_name: "Banking".into(),
                subdomains: SubdomainSetting::Inherit,
            },
            IpcCommand::SetHideBlendWarning { value: true },
            IpcCommand::AddBlend {
                cookie_store_id: SHOPPING.into(),
                domain: "paypal.com".into(),
                tab_id: None,
                confirmed: false,
            },
            IpcCommand::BlockDomain {
                tab_id: 1,
                domain: "ads.example".into(),
                add_exclusion: true,
                cookie_store_id: PERSONAL.into(),
            },
            IpcCommand::SetGlobalSubdomains {
                value: GlobalSubdomains::Inherit,
            },
        ] {
            let response = handler.handle(command).await;
            assert!(!response.is_error(), "{response:?}");
        }
    }

    let handler = reopen(&path);
    assert_eq!(
        verdict(&handler, intercept(2, BANKING, "https://www.paypal.com/")).await,
        (Verdict::Allow, VerdictReason::SamePartition)
    );
    assert_eq!(
        verdict(&handler, intercept(2, SHOPPING, "https://paypal.com/")).await,
        (Verdict::Allow, VerdictReason::Blended)
    );
    assert_eq!(
        verdict(&handler, intercept(3, PERSONAL, "https://x.ads.example/")).await,
        (Verdict::Block, VerdictReason::Excluded)
    );

    let IpcResponse::State(snapshot) = handler.handle(IpcCommand::GetState).await else {
        panic!("Expected State response");
    };
    assert!(snapshot.state.rules.hide_blend_warning);
    assert_eq!(snapshot.state.rules.global_subdomains, GlobalSubdomains::Inherit);
}

#[tokio::test]
async fn test_read_only_intents_do_not_write() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");
    let handler = reopen(&path);

    handler.handle(IpcCommand::Ping).await;
    handler.handle(IpcCommand::GetState).await;
    handler.handle(intercept(1, PERSONAL, "https://tracker.io/")).await;
    handler
        .handle(IpcCommand::AllowOnce {
            tab_id: 1,
            domain: "tracker.io".into(),
        })
        .await;

    assert!(!path.exists());
}

#[tokio::test]
async fn test_temporary_partitions_are_recorded_for_cleanup() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");

    let created = {
        let handler = reopen(&path);
        let (action, reason) =
            verdict(&handler, navigate(5, DEFAULT, "https://unknown.site/")).await;
        assert_eq!(reason, VerdictReason::Temporary);
        let Verdict::Reopen { cookie_store_id } = action else {
            panic!("Expected Reopen verdict");
        };
        cookie_store_id
    };

    let stored = JsonFileStore::new(&path).load().unwrap();
    assert_eq!(stored.temp_containers, [created.clone()]);

    // A restarted daemon has no tabs, so every stored partition is stale
    let temps = TempPartitionManager::new(seeded_provider(), "Temp");
    assert_eq!(temps.restore(&stored.temp_containers), [created]);
    assert!(temps.known().is_empty());
}
