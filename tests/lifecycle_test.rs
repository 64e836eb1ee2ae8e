//! Plugin lifecycle integration tests.
//!
//! These tests drive the registry through a host and verify:
//! - State machine sequences and rejected transitions
//! - Hook ordering and failure handling
//! - Per-plugin serialization and cross-plugin concurrency
//! - Extension resolution tracking the STARTED state
//! - Lifecycle notifications on the bus

mod common;

use common::*;
use plugin_host::{
    ExtensionDeclaration, ExtensionInstance, ExtensionPointDescriptor, HookError, LifecyclePhase,
    PluginBuilder, PluginContext, PluginError, PluginState, LIFECYCLE_TOPIC,
};
use plugin_host::plugin::LifecycleEvent;
use rand::Rng;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_test::{assert_err, assert_ok};

trait Formatter: Send + Sync {
    fn format(&self, value: u32) -> String;
}

struct Decimal;

impl Formatter for Decimal {
    fn format(&self, value: u32) -> String {
        value.to_string()
    }
}

struct Hex;

impl Formatter for Hex {
    fn format(&self, value: u32) -> String {
        format!("{:#x}", value)
    }
}

// ========== State Machine ==========

#[tokio::test]
async fn test_hooks_run_in_lifecycle_order() {
    let log = HookLog::default();
    let host = test_host();
    let registry = host.registry();

    assert_ok!(registry.register(RecordingPlugin::new("p", &log).build()).await);
    assert_ok!(registry.initialize("p").await);
    assert_ok!(registry.start("p").await);
    assert_ok!(registry.stop("p").await);
    assert_ok!(registry.start("p").await);
    assert_ok!(registry.uninstall("p").await);

    assert_eq!(
        log.entries(),
        vec![
            "p:initialize",
            "p:start",
            "p:stop",
            "p:start",
            "p:stop",
            "p:uninstall"
        ]
    );
}

#[tokio::test]
async fn test_rejected_transitions_never_mutate_state() {
    let log = HookLog::default();
    let host = test_host();
    let registry = host.registry();
    assert_ok!(registry.register(RecordingPlugin::new("p", &log).build()).await);

    // REGISTERED: only initialize is allowed
    assert_err!(registry.start("p").await);
    assert_err!(registry.stop("p").await);
    assert_eq!(registry.get_descriptor("p").unwrap().state, PluginState::Registered);

    // INITIALIZED: no second initialize, no stop
    assert_ok!(registry.initialize("p").await);
    let err = assert_err!(registry.initialize("p").await);
    assert!(matches!(
        err,
        PluginError::InvalidStateTransition {
            from: PluginState::Initialized,
            to: PluginState::Initialized,
            ..
        }
    ));
    assert_err!(registry.stop("p").await);
    assert_eq!(registry.get_descriptor("p").unwrap().state, PluginState::Initialized);

    // STARTED: no second start
    assert_ok!(registry.start("p").await);
    assert_err!(registry.start("p").await);
    assert_eq!(registry.get_descriptor("p").unwrap().state, PluginState::Started);

    // No hook ran for a rejected transition
    assert_eq!(log.entries(), vec!["p:initialize", "p:start"]);
}

#[tokio::test]
async fn test_failed_restart_moves_stopped_plugin_to_failed() {
    let host = test_host();
    let registry = host.registry();
    let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let counter = attempts.clone();
    let plugin = PluginBuilder::new("flaky")
        .extension_point(ExtensionPointDescriptor::multiple("work", "Work sources"))
        .extension("work", 0, ExtensionInstance::from_value(1u32))
        .on_start(move |_| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                    Ok(())
                } else {
                    Err(HookError::failed("second start refused"))
                }
            }
        })
        .build();

    assert_ok!(host.install(plugin).await);
    assert_ok!(registry.stop("flaky").await);
    let err = assert_err!(registry.start("flaky").await);

    assert!(matches!(
        err,
        PluginError::LifecycleHook {
            phase: LifecyclePhase::Start,
            ..
        }
    ));
    assert_eq!(registry.get_descriptor("flaky").unwrap().state, PluginState::Failed);
    assert_eq!(host.extensions().registration_count("work"), 0);
}

#[tokio::test]
async fn test_uninstall_after_failure_runs_uninstall_hook_only() {
    let log = HookLog::default();
    let host = test_host();
    let registry = host.registry();
    assert_ok!(
        registry
            .register(
                RecordingPlugin::new("p", &log)
                    .failing_on(LifecyclePhase::Initialize)
                    .build()
            )
            .await
    );

    assert_err!(registry.initialize("p").await);
    let descriptor = assert_ok!(registry.uninstall("p").await);

    assert_eq!(descriptor.state, PluginState::Uninstalled);
    assert_eq!(log.entries(), vec!["p:initialize", "p:uninstall"]);
}

#[tokio::test]
async fn test_uninstall_hook_failure_is_logged_not_fatal() {
    let log = HookLog::default();
    let host = test_host();
    let registry = host.registry();
    assert_ok!(
        registry
            .register(
                RecordingPlugin::new("p", &log)
                    .failing_on(LifecyclePhase::Uninstall)
                    .build()
            )
            .await
    );

    let descriptor = assert_ok!(registry.uninstall("p").await);

    assert_eq!(descriptor.state, PluginState::Uninstalled);
    assert!(descriptor.last_error.is_some());
    assert!(!registry.contains("p"));
}

#[tokio::test]
async fn test_uninstall_twice_cleans_up_once() {
    let log = HookLog::default();
    let host = test_host();
    let registry = host.registry();
    assert_ok!(host.install(RecordingPlugin::new("p", &log).build()).await);

    assert_ok!(registry.uninstall("p").await);
    let err = assert_err!(registry.uninstall("p").await);

    assert!(err.is_not_found());
    assert_eq!(log.plugins_for(LifecyclePhase::Uninstall), vec!["p"]);
    assert_eq!(registry.plugin_count(), 0);
}

// ========== Concurrency ==========

#[tokio::test]
async fn test_concurrent_starts_on_one_plugin_serialize() {
    let log = HookLog::default();
    let host = test_host();
    let registry = host.registry().clone();
    assert_ok!(
        registry
            .register(
                RecordingPlugin::new("p", &log)
                    .slow(Duration::from_millis(50))
                    .build()
            )
            .await
    );
    assert_ok!(registry.initialize("p").await);

    let first = tokio::spawn({
        let registry = registry.clone();
        async move { registry.start("p").await }
    });
    let second = tokio::spawn({
        let registry = registry.clone();
        async move { registry.start("p").await }
    });
    let results = [first.await.unwrap(), second.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(PluginError::InvalidStateTransition {
            from: PluginState::Started,
            ..
        })
    )));
    assert_eq!(log.plugins_for(LifecyclePhase::Start), vec!["p"]);
}

#[tokio::test]
async fn test_distinct_plugins_transition_concurrently() {
    let log = HookLog::default();
    let host = test_host();
    let registry = host.registry().clone();
    let ids: Vec<String> = (0..5).map(|i| format!("p{}", i)).collect();
    for id in &ids {
        assert_ok!(
            registry
                .register(
                    RecordingPlugin::new(id, &log)
                        .slow(Duration::from_millis(200))
                        .build()
                )
                .await
        );
    }

    let started = Instant::now();
    let results =
        futures::future::join_all(ids.iter().map(|id| registry.initialize(id))).await;

    assert!(results.iter().all(|r| r.is_ok()));
    // Five 200ms hooks run serially would take a full second
    assert!(started.elapsed() < Duration::from_millis(800));
}

#[tokio::test]
async fn test_uninstall_waits_for_pending_transition() {
    let log = HookLog::default();
    let host = test_host();
    let registry = host.registry().clone();
    assert_ok!(
        registry
            .register(
                RecordingPlugin::new("p", &log)
                    .slow(Duration::from_millis(100))
                    .build()
            )
            .await
    );

    let initialize = tokio::spawn({
        let registry = registry.clone();
        async move { registry.initialize("p").await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let uninstalled = assert_ok!(registry.uninstall("p").await);

    assert_ok!(initialize.await.unwrap());
    assert_eq!(uninstalled.state, PluginState::Uninstalled);
    assert_eq!(log.entries(), vec!["p:initialize", "p:uninstall"]);
    assert!(assert_err!(registry.start("p").await).is_not_found());
}

// ========== Extensions ==========

#[tokio::test]
async fn test_resolution_follows_priority_and_started_state() {
    let host = test_host();
    let registry = host.registry();
    let point = PluginBuilder::new("core")
        .extension_point(ExtensionPointDescriptor::multiple("format", "Number formats"))
        .build();
    assert_ok!(host.install(point).await);

    let decimal: Arc<dyn Formatter> = Arc::new(Decimal);
    let hex: Arc<dyn Formatter> = Arc::new(Hex);
    assert_ok!(
        host.install(
            PluginBuilder::new("decimal")
                .extension("format", 1, ExtensionInstance::new(decimal))
                .build()
        )
        .await
    );
    assert_ok!(
        host.install(
            PluginBuilder::new("hex")
                .extension("format", 10, ExtensionInstance::new(hex))
                .build()
        )
        .await
    );

    let formatters = host.extensions().resolve_as::<dyn Formatter>("format");
    let rendered: Vec<String> = formatters.iter().map(|f| f.format(255)).collect();
    assert_eq!(rendered, vec!["0xff", "255"]);

    assert_ok!(registry.stop("hex").await);
    let first = host
        .extensions()
        .resolve_first::<dyn Formatter>("format")
        .unwrap();
    assert_eq!(first.format(255), "255");
}

#[tokio::test]
async fn test_random_priorities_resolve_in_descending_order() {
    let host = test_host();
    assert_ok!(
        host.install(
            PluginBuilder::new("core")
                .extension_point(ExtensionPointDescriptor::multiple("rank", "Ranked"))
                .build()
        )
        .await
    );

    let mut rng = rand::thread_rng();
    for i in 0..20 {
        let priority = rng.gen_range(-50..50);
        assert_ok!(
            host.install(
                PluginBuilder::new(format!("r{}", i))
                    .extension("rank", priority, ExtensionInstance::from_value(i))
                    .build()
            )
            .await
        );
    }

    let resolved = host.extensions().resolve("rank");
    assert_eq!(resolved.len(), 20);
    for pair in resolved.windows(2) {
        assert!(
            pair[0].priority > pair[1].priority
                || (pair[0].priority == pair[1].priority && pair[0].sequence < pair[1].sequence)
        );
    }
}

#[tokio::test]
async fn test_single_implementation_point_rejects_second_provider() {
    let host = test_host();
    assert_ok!(
        host.install(
            PluginBuilder::new("storage")
                .extension_point(ExtensionPointDescriptor::single("store", "Backing store"))
                .extension("store", 0, ExtensionInstance::from_value("disk"))
                .build()
        )
        .await
    );

    let descriptor = assert_ok!(
        host.registry()
            .register(
                PluginBuilder::new("other")
                    .extension("store", 5, ExtensionInstance::from_value("memory"))
                    .build()
            )
            .await
    );

    assert_eq!(descriptor.extension_errors.len(), 1);
    assert!(descriptor.extension_errors[0].contains("single implementation"));
    assert_eq!(host.extensions().registration_count("store"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resolve_never_sees_part_of_a_plugins_registrations() {
    let host = test_host();
    let registry = host.registry().clone();
    assert_ok!(
        host.install(
            PluginBuilder::new("core")
                .extension_point(ExtensionPointDescriptor::multiple("work", "Work sources"))
                .extension("work", 0, ExtensionInstance::from_value(0u32))
                .build()
        )
        .await
    );

    let mut toggled = PluginBuilder::new("toggled");
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let mut flaky = PluginBuilder::new("flaky").on_start(move |_| {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(())
            } else {
                Err(HookError::failed("refusing to restart"))
            }
        }
    });
    for i in 1..=3u32 {
        toggled = toggled.extension("work", i as i32, ExtensionInstance::from_value(i));
        flaky = flaky.extension("work", i as i32, ExtensionInstance::from_value(i + 10));
    }
    assert_ok!(host.install(toggled.build()).await);
    assert_ok!(host.install(flaky.build()).await);

    let done = Arc::new(AtomicBool::new(false));
    let resolver = tokio::spawn({
        let extensions = host.extensions().clone();
        let done = done.clone();
        async move {
            let mut seen = BTreeSet::new();
            while !done.load(Ordering::SeqCst) {
                let resolved = extensions.resolve("work");
                for owner in ["toggled", "flaky"] {
                    let owned = resolved.iter().filter(|r| r.plugin_id == owner).count();
                    seen.insert(owned);
                }
                tokio::task::yield_now().await;
            }
            seen
        }
    });

    // Act: stop and restart, fail, then uninstall while resolving
    for _ in 0..50 {
        assert_ok!(registry.stop("toggled").await);
        assert_ok!(registry.start("toggled").await);
    }
    assert_ok!(registry.stop("flaky").await);
    assert_err!(registry.start("flaky").await);
    assert_ok!(registry.uninstall("toggled").await);
    done.store(true, Ordering::SeqCst);

    // Assert
    let seen = resolver.await.unwrap();
    assert!(
        seen.iter().all(|owned| *owned == 0 || *owned == 3),
        "partial snapshot observed: {:?}",
        seen
    );
    assert_eq!(registry.get_descriptor("flaky").unwrap().state, PluginState::Failed);
    assert_eq!(host.extensions().resolve("work").len(), 1);
}

#[tokio::test]
async fn test_kept_context_cannot_register_after_uninstall() {
    let host = test_host();
    let kept: Arc<Mutex<Option<PluginContext>>> = Arc::default();
    let stash = kept.clone();
    let old = PluginBuilder::new("old")
        .extension_point(ExtensionPointDescriptor::single("storage", "Backing store"))
        .on_initialize(move |ctx| {
            *stash.lock().unwrap() = Some(ctx);
            async { Ok::<(), HookError>(()) }
        })
        .build();
    assert_ok!(host.install(old).await);
    assert_ok!(host.registry().uninstall("old").await);

    let ctx = kept.lock().unwrap().take().unwrap();
    let err = assert_err!(ctx.register_extension(ExtensionDeclaration::new(
        "storage",
        0,
        ExtensionInstance::from_value("orphan"),
    )));
    assert!(matches!(err, PluginError::Retired(ref id) if id == "old"));

    let descriptor = assert_ok!(
        host.install(
            PluginBuilder::new("new")
                .extension("storage", 0, ExtensionInstance::from_value("disk"))
                .build()
        )
        .await
    );
    assert!(descriptor.extension_errors.is_empty());
    let resolved = host.extensions().resolve("storage");
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].plugin_id, "new");
}

// ========== Notifications and shutdown ==========

#[tokio::test]
async fn test_lifecycle_events_are_published_in_order() {
    let host = test_host();
    let handler = CollectingHandler::new();
    assert_ok!(host.bus().subscribe(LIFECYCLE_TOPIC, handler.clone()));

    assert_ok!(host.install(PluginBuilder::new("p").build()).await);
    assert_ok!(host.registry().uninstall("p").await);
    wait_until(|| handler.count() == 4).await;

    let events: Vec<LifecycleEvent> = handler
        .events()
        .iter()
        .map(|e| e.payload.decode_json().unwrap())
        .collect();
    let transitions: Vec<(Option<PluginState>, PluginState)> =
        events.iter().map(|e| (e.from, e.to)).collect();
    assert_eq!(
        transitions,
        vec![
            (None, PluginState::Registered),
            (Some(PluginState::Registered), PluginState::Initialized),
            (Some(PluginState::Initialized), PluginState::Started),
            (Some(PluginState::Started), PluginState::Uninstalled),
        ]
    );
    assert!(handler.events().iter().all(|e| e.source_plugin_id.is_none()));
}

#[tokio::test]
async fn test_shutdown_stops_dependents_before_dependencies() {
    let log = HookLog::default();
    let host = test_host();
    assert_ok!(host.install(RecordingPlugin::new("db", &log).build()).await);
    assert_ok!(
        host.install(RecordingPlugin::new("cache", &log).depends_on("db").build())
            .await
    );
    assert_ok!(
        host.install(RecordingPlugin::new("web", &log).depends_on("cache").build())
            .await
    );

    assert_eq!(host.shutdown().await, 3);

    assert_eq!(
        log.plugins_for(LifecyclePhase::Stop),
        vec!["web", "cache", "db"]
    );
}
