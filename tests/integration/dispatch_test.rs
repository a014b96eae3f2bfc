//! Integration tests for hook dispatch.

mod helpers;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use hookhost_sdk::prelude::*;

use helpers::{TestHost, counting_unit};

#[test]
fn test_first_non_null_short_circuits() {
    let mut host = TestHost::new();
    host.define("OnPlayerChat", ResultPolicy::FirstNonNull);

    let (first, first_calls) = counting_unit("First", "OnPlayerChat", HookValue::Null);
    let (second, second_calls) = counting_unit("Second", "OnPlayerChat", HookValue::Bool(false));
    let (third, third_calls) = counting_unit("Third", "OnPlayerChat", HookValue::Bool(true));
    for (entry, unit) in [("first", first), ("second", second), ("third", third)] {
        let path = host.native(entry, unit);
        assert!(host.runtime.load_unit(&path)[0].is_ready());
    }

    let result = host
        .runtime
        .dispatch("OnPlayerChat", &mut hook_args![1_i64, "hello"]);

    assert_eq!(result, Some(HookValue::Bool(false)));
    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    assert_eq!(third_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_aggregate_runs_every_handler() {
    let mut host = TestHost::new();
    host.define("OnTick", ResultPolicy::Aggregate);

    let (a, a_calls) = counting_unit("A", "OnTick", HookValue::Int(1));
    let (b, b_calls) = counting_unit("B", "OnTick", HookValue::Int(2));
    let path = host.native("a", a);
    host.runtime.load_unit(&path);
    let path = host.native("b", b);
    host.runtime.load_unit(&path);

    let result = host.runtime.dispatch("OnTick", &mut HookArgs::new());

    assert_eq!(result, Some(HookValue::Int(2)));
    assert_eq!(a_calls.load(Ordering::SeqCst), 1);
    assert_eq!(b_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_faulting_unit_does_not_block_others() {
    let mut host = TestHost::new();
    host.define("OnPlayerChat", ResultPolicy::FirstNonNull);

    let failing = UnitExportBuilder::new(unit_info!(name: "Failing", version: "1.0.0"))
        .on("OnPlayerChat", |_| Err(HookFault::failed("boom")))
        .build_arc();
    let panicking = UnitExportBuilder::new(unit_info!(name: "Panicking", version: "1.0.0"))
        .on("OnPlayerChat", |_| panic!("handler bug"))
        .build_arc();
    let (healthy, healthy_calls) = counting_unit("Healthy", "OnPlayerChat", HookValue::from("ok"));
    let path = host.native("failing", failing);
    host.runtime.load_unit(&path);
    let path = host.native("panicking", panicking);
    host.runtime.load_unit(&path);
    let path = host.native("healthy", healthy);
    host.runtime.load_unit(&path);

    let result = host.runtime.dispatch("OnPlayerChat", &mut hook_args!["hi"]);

    assert_eq!(result, Some(HookValue::from("ok")));
    assert_eq!(healthy_calls.load(Ordering::SeqCst), 1);
    assert_eq!(host.runtime.unit("Failing").map(|v| v.faults), Some(1));
    assert_eq!(host.runtime.unit("Panicking").map(|v| v.faults), Some(1));
    assert!(host.runtime.unit("Panicking").is_some_and(|v| v.is_loaded));
}

#[test]
fn test_by_ref_arguments_are_written_back() {
    let mut host = TestHost::new();
    host.define("OnDamage", ResultPolicy::FirstNonNull);

    let armor = UnitExportBuilder::new(unit_info!(name: "Armor", version: "1.0.0"))
        .on_ref("OnDamage", |args| {
            if let Some(amount) = args.get(1).and_then(HookValue::as_float) {
                args[1] = HookValue::Float(amount / 2.0);
            }
            Ok(HookValue::Null)
        })
        .build_arc();
    let path = host.native("armor", armor);
    host.runtime.load_unit(&path);

    let mut args = hook_args![7_i64, ref 10.0_f64];
    assert_eq!(host.runtime.dispatch("OnDamage", &mut args), None);
    assert_eq!(args.get(0), Some(&HookValue::Int(7)));
    assert_eq!(args.get(1), Some(&HookValue::Float(5.0)));
}

#[test]
fn test_arity_selects_overload() {
    let mut host = TestHost::new();
    host.define("OnCommand", ResultPolicy::FirstNonNull);

    let commands = UnitExportBuilder::new(unit_info!(name: "Commands", version: "1.0.0"))
        .export(
            HookExport::new("OnCommand", FnHandler::wrap(|_| Ok(HookValue::from("one"))))
                .with_arity(1),
        )
        .export(
            HookExport::new("OnCommand", FnHandler::wrap(|_| Ok(HookValue::from("two"))))
                .with_arity(2),
        )
        .build_arc();
    let path = host.native("commands", commands);
    host.runtime.load_unit(&path);

    assert_eq!(
        host.runtime.dispatch("OnCommand", &mut hook_args!["kick"]),
        Some(HookValue::from("one"))
    );
    assert_eq!(
        host.runtime.dispatch("OnCommand", &mut hook_args!["kick", "bob"]),
        Some(HookValue::from("two"))
    );
    assert_eq!(host.runtime.dispatch("OnCommand", &mut HookArgs::new()), None);
}

#[test]
fn test_unit_reference_calls_exported_method() {
    let mut host = TestHost::new();

    let economy = UnitExportBuilder::new(unit_info!(name: "Economy", version: "2.0.0"))
        .on("Balance", |args| {
            Ok(HookValue::Int(args.first().and_then(HookValue::as_int).unwrap_or(0) * 10))
        })
        .build_arc();
    let seen = Arc::new(parking_lot::Mutex::new(None));
    let recorded = seen.clone();
    let shop = UnitExportBuilder::new(unit_info!(name: "Shop", version: "1.0.0"))
        .requires("Economy")
        .init(move |ctx| {
            let economy = ctx.reference("Economy").ok_or("Economy not bound")?;
            *recorded.lock() = economy.call("Balance", &mut hook_args![4_i64]);
            Ok(())
        })
        .build_arc();

    let path = host.native("economy", economy);
    host.runtime.load_unit(&path);
    let path = host.native("shop", shop);
    assert!(host.runtime.load_unit(&path)[0].is_ready());
    assert_eq!(*seen.lock(), Some(HookValue::Int(40)));
}

#[test]
fn test_profiling_counts_fires() {
    let mut host = TestHost::new();
    host.define("OnTick", ResultPolicy::Aggregate);
    let (ticker, _) = counting_unit("Ticker", "OnTick", HookValue::Null);
    let path = host.native("ticker", ticker);
    host.runtime.load_unit(&path);

    for _ in 0..3 {
        host.runtime.dispatch("OnTick", &mut HookArgs::new());
    }
    assert_eq!(host.runtime.unit("Ticker").map(|v| v.fires), Some(3));

    host.runtime.set_unit_profiling("Ticker", false).expect("known unit");
    host.runtime.dispatch("OnTick", &mut HookArgs::new());
    assert_eq!(host.runtime.unit("Ticker").map(|v| v.fires), Some(3));
}
