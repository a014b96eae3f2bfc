//! Integration tests for subscriptions and hot-patch points.

mod helpers;

use std::sync::Arc;

use hookhost_runtime::hooks::{FilePatchSource, PatchDescriptor};
use hookhost_sdk::prelude::*;

use helpers::{TestHost, counting_unit};

fn patched(hook: &str, method: &str) -> HookDefinition {
    HookDefinition::new(hook).with_patch(PatchDescriptor::new("Host.Server", method))
}

#[test]
fn test_patch_installed_exactly_while_subscribed() {
    let mut host = TestHost::new();
    host.runtime
        .define_hook(patched("OnSave", "Save()"))
        .expect("define");
    assert!(host.patches.installed().is_empty());

    // Deterministic interleaving of three subscribers.
    let script = [
        ("a", true),
        ("b", true),
        ("a", true),
        ("a", false),
        ("c", false),
        ("b", false),
        ("b", false),
        ("c", true),
        ("c", false),
    ];
    let mut expected = std::collections::BTreeSet::new();
    for (subscriber, subscribe) in script {
        if subscribe {
            host.runtime.subscribe("OnSave", subscriber).expect("subscribe");
            expected.insert(subscriber);
        } else {
            host.runtime
                .unsubscribe("OnSave", subscriber)
                .expect("unsubscribe");
            expected.remove(subscriber);
        }
        assert_eq!(host.runtime.is_subscribed("OnSave"), !expected.is_empty());
        assert_eq!(host.patches.installed().len(), usize::from(!expected.is_empty()));
    }

    assert_eq!(
        host.patches.events(),
        vec![
            "install Host.Server::Save()",
            "uninstall Host.Server::Save()",
            "install Host.Server::Save()",
            "uninstall Host.Server::Save()",
        ]
    );
}

#[test]
fn test_refused_install_leaves_hook_unsubscribed() {
    let mut host = TestHost::new();
    host.patches.refuse("Save()");
    host.runtime
        .define_hook(patched("OnSave", "Save()"))
        .expect("define");

    assert!(host.runtime.subscribe("OnSave", "Saver").is_err());
    assert!(!host.runtime.is_subscribed("OnSave"));
    assert!(host.runtime.subscriptions().is_empty());
}

#[test]
fn test_unit_load_and_unload_drive_patches() {
    let mut host = TestHost::new();
    host.runtime
        .define_hook(patched("OnTick", "Update()").with_policy(ResultPolicy::Aggregate))
        .expect("define");
    let (ticker, _) = counting_unit("Ticker", "OnTick", HookValue::Null);
    let path = host.native("ticker", ticker);

    host.runtime.load_unit(&path);
    assert_eq!(host.patches.installed().len(), 1);

    host.runtime.unload_unit("Ticker");
    assert!(host.patches.installed().is_empty());
}

#[test]
fn test_redefining_patches_reconciles_installed_points() {
    let mut host = TestHost::new();
    host.runtime
        .define_hook(patched("OnSave", "Save()"))
        .expect("define");
    host.runtime.subscribe("OnSave", "Saver").expect("subscribe");

    host.runtime
        .define_hook(patched("OnSave", "SaveAll()"))
        .expect("redefine");

    let installed = host.patches.installed();
    assert_eq!(installed, vec![PatchDescriptor::new("Host.Server", "SaveAll()")]);
}

#[tokio::test]
async fn test_fetched_catalog_applies_on_tick() {
    let mut host = TestHost::new();
    let (ticker, _) = counting_unit("Ticker", "OnTick", HookValue::Null);
    let path = host.native("ticker", ticker);
    host.runtime.load_unit(&path);

    let catalog = host.write(
        "patches.json",
        &serde_json::json!([
            {
                "hook": "OnTick",
                "descriptor": { "type_name": "Host.Server", "method": "Update()" },
                "protocol": "1"
            },
            {
                "hook": "OnSave",
                "descriptor": { "type_name": "Host.Server", "method": "Save()" },
                "protocol": "0"
            }
        ])
        .to_string(),
    );

    let report = host
        .runtime
        .patch_fetcher(Arc::new(FilePatchSource::new(catalog)))
        .run()
        .await
        .expect("fetch");
    assert_eq!(report.accepted.len(), 1);
    assert_eq!(report.rejected.len(), 1);
    assert!(host.patches.installed().is_empty());

    assert_eq!(host.runtime.tick(), 1);
    assert!(host.runtime.hooks().contains(&"OnTick".to_string()));
    assert!(!host.runtime.hooks().contains(&"OnSave".to_string()));
    assert!(host.runtime.is_subscribed("OnTick"));
    assert_eq!(
        host.patches.installed(),
        vec![PatchDescriptor::new("Host.Server", "Update()")]
    );
}

#[tokio::test]
async fn test_missing_catalog_is_an_error() {
    let host = TestHost::new();
    let missing = host.dir.path().join("absent.json");
    let result = host
        .runtime
        .patch_fetcher(Arc::new(FilePatchSource::new(missing)))
        .run()
        .await;
    assert!(result.is_err());
    assert_eq!(host.runtime.queue().len(), 0);
}
