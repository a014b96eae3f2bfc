//! Integration tests for unit lifecycle and dependency resolution.

mod helpers;

use hookhost_runtime::loader::{DependencyStall, LoadResult, StallReason};
use hookhost_sdk::prelude::*;

use helpers::{TestHost, counting_unit, plain_unit, requiring_unit};

#[test]
fn test_required_reference_defers_until_dependency_loads() {
    let mut host = TestHost::new();
    let alpha = host.write("alpha.toml", &requiring_unit("Alpha", "Beta"));
    let beta = host.write("beta.toml", &plain_unit("Beta", "1.0.0"));

    let results = host.runtime.load_unit(&alpha);
    assert!(matches!(
        &results[0],
        LoadResult::Unresolved(DependencyStall { reason: StallReason::Missing { dependency }, .. })
            if dependency == "Beta"
    ));
    assert!(host.runtime.unit("Alpha").is_none());
    assert!(host.runtime.packages().iter().all(|p| p.units.is_empty()));

    let pending = host.runtime.pending_requirees();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].dependency, "Beta");
    assert_eq!(pending[0].waiter, "Alpha");
    assert_eq!(pending[0].origin, alpha);

    let results = host.runtime.load_unit(&beta);
    let ready: Vec<_> = results.iter().filter_map(LoadResult::unit_name).collect();
    assert!(results.iter().all(LoadResult::is_ready));
    assert_eq!(ready, vec!["Beta", "Alpha"]);
    assert!(host.runtime.unit("Alpha").is_some());
    assert!(host.runtime.pending_requirees().is_empty());
}

#[test]
fn test_unloading_dependency_cascades_and_returns_with_it() {
    let mut host = TestHost::new();
    let base = host.write("base.toml", &plain_unit("Base", "1.0.0"));
    let user = host.write("user.toml", &requiring_unit("User", "Base"));
    host.runtime.load_unit(&base);
    assert!(host.runtime.load_unit(&user)[0].is_ready());

    let unloaded = host.runtime.unload_unit("Base");
    assert_eq!(unloaded, vec!["User".to_string(), "Base".to_string()]);
    assert!(host.runtime.unit("User").is_none());
    assert!(host.runtime.is_ignored(&base));
    assert!(!host.runtime.is_ignored(&user));

    let pending = host.runtime.pending_requirees();
    assert_eq!(pending.len(), 1);
    assert_eq!((pending[0].dependency.as_str(), pending[0].waiter.as_str()), ("Base", "User"));

    host.runtime.load_unit(&base);
    assert!(host.runtime.unit("Base").is_some());
    assert!(host.runtime.unit("User").is_some());
    assert!(host.runtime.pending_requirees().is_empty());
}

#[test]
fn test_removed_package_does_not_return_when_dependency_loads() {
    let mut host = TestHost::new();
    let waiter = host.write("waiter.toml", &requiring_unit("Waiter", "Dep"));
    let dep = host.write("dep.toml", &plain_unit("Dep", "1.0.0"));

    host.runtime.load_unit(&waiter);
    assert_eq!(host.runtime.pending_requirees().len(), 1);

    host.runtime.remove_package(&waiter).expect("registered");
    assert!(host.runtime.pending_requirees().is_empty());

    let results = host.runtime.load_unit(&dep);
    assert_eq!(results.len(), 1);
    assert!(host.runtime.unit("Dep").is_some());
    assert!(host.runtime.unit("Waiter").is_none());
    let names: Vec<_> = host.runtime.packages().iter().map(|p| p.name.clone()).collect();
    assert_eq!(names, vec!["dep".to_string()]);
}

#[test]
fn test_repeated_failure_replaces_record() {
    let mut host = TestHost::new();
    let path = host.write("broken.toml", "[unit\n");
    host.runtime.load_unit(&path);

    host.write("broken.toml", "[unit]\nname = \"Broken\"\nversion = \"one\"\n");
    let results = host.runtime.load_unit(&path);
    assert!(matches!(results[0], LoadResult::Failed(_)));

    let failed = host.runtime.failed_units();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].origin, path);
    assert_eq!(failed[0].errors[0].code, "invalid-version");
    assert_eq!(failed[0].errors[0].line, Some(3));

    host.write("broken.toml", &plain_unit("Broken", "1.0.0"));
    assert!(host.runtime.load_unit(&path)[0].is_ready());
    assert!(host.runtime.failed_units().is_empty());
}

#[test]
fn test_dependency_cycle_is_reported_not_deadlocked() {
    let mut host = TestHost::new();
    let a = host.write("a.toml", &requiring_unit("A", "B"));
    let b = host.write("b.toml", &requiring_unit("B", "A"));

    host.runtime.load_unit(&a);
    let results = host.runtime.load_unit(&b);

    assert!(matches!(
        &results[0],
        LoadResult::Unresolved(DependencyStall { reason: StallReason::Cycle { .. }, .. })
    ));
    assert!(host.runtime.unit("A").is_none());
    assert!(host.runtime.unit("B").is_none());
    assert!(host.runtime.pending_requirees().is_empty());

    let failed = host.runtime.failed_units();
    let mut origins: Vec<_> = failed.iter().map(|f| f.origin.clone()).collect();
    origins.sort();
    assert_eq!(origins, vec![a, b]);
    assert!(failed.iter().all(|f| f.errors[0].code == "dependency-cycle"));
}

#[test]
fn test_init_failure_records_failed_unit() {
    let mut host = TestHost::new();
    host.define("OnTick", ResultPolicy::Aggregate);
    let broken = UnitExportBuilder::new(unit_info!(name: "Broken", version: "1.0.0"))
        .on("OnTick", |_| Ok(HookValue::Null))
        .init(|_| Err("database unavailable".to_string()))
        .build_arc();
    let path = host.native("broken", broken);

    let results = host.runtime.load_unit(&path);
    match &results[0] {
        LoadResult::Failed(failed) => assert_eq!(failed.errors[0].code, "init-failed"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(host.runtime.unit("Broken").is_none());
    assert!(!host.runtime.is_subscribed("OnTick"));
}

#[test]
fn test_manual_subscriptions_skip_discovery() {
    let mut host = TestHost::new();
    host.define("OnTick", ResultPolicy::Aggregate);
    host.define("OnPlayerChat", ResultPolicy::FirstNonNull);

    let picky = UnitExportBuilder::new(unit_info!(
        name: "Picky",
        version: "1.0.0",
        manual_subscriptions: true,
    ))
    .on("OnTick", |_| Ok(HookValue::Null))
    .on("OnPlayerChat", |_| Ok(HookValue::Bool(false)))
    .init(|ctx| ctx.subscribe("OnPlayerChat").map_err(|e| e.to_string()))
    .build_arc();
    let path = host.native("picky", picky);
    host.runtime.load_unit(&path);

    assert!(!host.runtime.is_subscribed("OnTick"));
    assert!(host.runtime.is_subscribed("OnPlayerChat"));
}

#[test]
fn test_unit_level_ignored_hooks_are_never_called() {
    let mut host = TestHost::new();
    host.define("OnTick", ResultPolicy::Aggregate);
    let quiet = UnitExportBuilder::new(unit_info!(name: "Quiet", version: "1.0.0"))
        .on("OnTick", |_| Ok(HookValue::Int(1)))
        .ignore("OnTick")
        .build_arc();
    let path = host.native("quiet", quiet);
    host.runtime.load_unit(&path);

    assert!(!host.runtime.is_subscribed("OnTick"));
    assert_eq!(host.runtime.dispatch("OnTick", &mut HookArgs::new()), None);
}

#[test]
fn test_archive_package_and_removal() {
    let mut host = TestHost::new();
    host.define("OnGreet", ResultPolicy::Aggregate);
    let path = host.write(
        "bundle.toml",
        r#"
[package]
name = "Bundle"

[[units]]
name = "Hello"
version = "1.0.0"

[[units.hooks]]
name = "OnGreet"
action = "return"
value = "hello"

[[units]]
name = "World"
version = "1.0.0"

[[units.hooks]]
name = "OnGreet"
action = "return"
value = "world"
"#,
    );

    let results = host.runtime.load_unit(&path);
    assert_eq!(results.len(), 2);
    let packages = host.runtime.packages();
    assert_eq!(packages[0].name, "Bundle");
    assert_eq!(packages[0].units.len(), 2);
    assert_eq!(
        host.runtime.dispatch("OnGreet", &mut HookArgs::new()),
        Some(HookValue::from("world"))
    );

    let unloaded = host.runtime.remove_package(&path).expect("registered");
    assert_eq!(unloaded.len(), 2);
    assert!(host.runtime.packages().is_empty());
    assert!(!host.runtime.is_subscribed("OnGreet"));
    assert!(host.runtime.remove_package(&path).is_err());
}

#[test]
fn test_shutdown_unloads_everything() {
    let mut host = TestHost::new();
    host.define("OnTick", ResultPolicy::Aggregate);
    let (ticker, _) = counting_unit("Ticker", "OnTick", HookValue::Null);
    let base = host.write("base.toml", &plain_unit("Base", "1.0.0"));
    let user = host.write("user.toml", &requiring_unit("User", "Base"));
    let ticker = host.native("ticker", ticker);
    for path in [&base, &user, &ticker] {
        host.runtime.load_unit(path);
    }

    host.runtime.shutdown();

    assert!(host.runtime.unit("Base").is_none());
    assert!(host.runtime.unit("User").is_none());
    assert!(host.runtime.unit("Ticker").is_none());
    assert!(host.runtime.pending_requirees().is_empty());
    assert!(host.runtime.subscriptions().is_empty());
    assert!(host.patches.installed().is_empty());
}
