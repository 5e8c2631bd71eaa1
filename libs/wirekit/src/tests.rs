use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{ComposeError, Container, Dep, Hook, State};

const DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, PartialEq)]
struct Settings(&'static str);

#[derive(Debug)]
struct Service {
    settings: &'static str,
}

type Log = Arc<Mutex<Vec<String>>>;

fn log(events: &Log, what: impl Into<String>) {
    events.lock().unwrap().push(what.into());
}

#[tokio::test]
async fn constructs_dependencies_before_dependents() {
    let events: Log = Arc::new(Mutex::new(Vec::new()));
    let mut c = Container::new();

    // Dependent registered first; construction order must still follow the
    // graph.
    let ev = events.clone();
    c.provide::<Service, _>(&[Dep::on::<Settings>()], move |cx| {
        log(&ev, "service");
        let settings = cx.get::<Settings>()?;
        Ok(Service { settings: settings.0 })
    })
    .unwrap();
    let ev = events.clone();
    c.provide::<Settings, _>(&[], move |_| {
        log(&ev, "settings");
        Ok(Settings("prod"))
    })
    .unwrap();

    c.build().unwrap();
    c.start(DEADLINE).await.unwrap();

    assert_eq!(*events.lock().unwrap(), vec!["settings", "service"]);
    assert_eq!(c.get::<Service>().unwrap().settings, "prod");
    assert_eq!(c.state(), State::Started);
}

#[tokio::test]
async fn collection_keeps_registration_order_despite_execution_order() {
    #[derive(Debug)]
    struct Entry(u32);

    let mut c = Container::new();
    c.declare_collection::<Entry>("entries").unwrap();

    // First contribution blocks on a provider registered last, so it
    // executes after the second one. Its slot must still come first.
    c.contribute::<Entry, _>("entries", &[Dep::on::<Settings>()], |cx| {
        cx.get::<Settings>()?;
        Ok(Entry(1))
    })
    .unwrap();
    c.contribute::<Entry, _>("entries", &[], |_| Ok(Entry(2))).unwrap();
    c.supply(Settings("x")).unwrap();

    c.build().unwrap();
    c.start(DEADLINE).await.unwrap();

    let entries = c.resolve::<Entry>("entries").unwrap();
    assert_eq!(
        entries.iter().map(|e| e.0).collect::<Vec<_>>(),
        vec![1, 2]
    );
}

#[tokio::test]
async fn producers_run_once_and_resolve_is_memoized() {
    #[derive(Debug)]
    struct Entry;

    static RUNS: AtomicUsize = AtomicUsize::new(0);

    let mut c = Container::new();
    c.declare_collection::<Entry>("entries").unwrap();
    c.contribute::<Entry, _>("entries", &[], |_| {
        RUNS.fetch_add(1, Ordering::SeqCst);
        Ok(Entry)
    })
    .unwrap();

    c.build().unwrap();
    c.start(DEADLINE).await.unwrap();

    let first = c.resolve::<Entry>("entries").unwrap();
    let second = c.resolve::<Entry>("entries").unwrap();
    assert_eq!(RUNS.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&first[0], &second[0]));
}

#[tokio::test]
async fn consumer_sees_every_contribution() {
    #[derive(Debug)]
    struct Entry(&'static str);
    #[derive(Debug)]
    struct Gateway(Vec<&'static str>);

    let mut c = Container::new();
    c.declare_collection::<Entry>("entries").unwrap();
    c.provide::<Gateway, _>(&[Dep::group("entries")], |cx| {
        let entries = cx.collect::<Entry>("entries")?;
        Ok(Gateway(entries.iter().map(|e| e.0).collect()))
    })
    .unwrap();
    c.contribute::<Entry, _>("entries", &[], |_| Ok(Entry("health"))).unwrap();
    c.contribute::<Entry, _>("entries", &[], |_| Ok(Entry("users"))).unwrap();

    c.build().unwrap();
    c.start(DEADLINE).await.unwrap();

    assert_eq!(c.get::<Gateway>().unwrap().0, vec!["health", "users"]);
}

#[test]
fn duplicate_provider_is_rejected() {
    let mut c = Container::new();
    c.supply(Settings("a")).unwrap();
    let err = c.supply(Settings("b")).unwrap_err();
    assert!(matches!(err, ComposeError::DuplicateProvider { .. }));
}

#[test]
fn duplicate_collection_is_rejected() {
    let mut c = Container::new();
    c.declare_collection::<u32>("entries").unwrap();
    let err = c.declare_collection::<u32>("entries").unwrap_err();
    assert!(matches!(
        err,
        ComposeError::DuplicateCollection { name: "entries" }
    ));
}

#[test]
fn contribution_type_must_match_declaration() {
    let mut c = Container::new();
    c.declare_collection::<u32>("entries").unwrap();
    let err = c
        .contribute::<String, _>("entries", &[], |_| Ok("nope".to_string()))
        .unwrap_err();
    assert!(matches!(err, ComposeError::CollectionTypeMismatch { .. }));
}

#[test]
fn missing_dependency_fails_build() {
    let mut c = Container::new();
    c.provide::<Service, _>(&[Dep::on::<Settings>()], |cx| {
        let settings = cx.get::<Settings>()?;
        Ok(Service { settings: settings.0 })
    })
    .unwrap();

    let err = c.build().unwrap_err();
    assert!(matches!(err, ComposeError::MissingDependency { .. }));
    assert_eq!(c.state(), State::Failed);
}

#[test]
fn cycle_is_reported_with_its_path() {
    struct A;
    struct B;

    let mut c = Container::new();
    c.provide::<A, _>(&[Dep::on::<B>()], |_| Ok(A)).unwrap();
    c.provide::<B, _>(&[Dep::on::<A>()], |_| Ok(B)).unwrap();

    let err = c.build().unwrap_err();
    match err {
        ComposeError::CyclicDependency { path } => {
            assert!(path.len() >= 3);
            assert_eq!(path.first(), path.last());
        }
        other => panic!("expected cycle, got {other}"),
    }
    assert_eq!(c.state(), State::Failed);
}

#[tokio::test]
async fn undeclared_dependency_cannot_be_fetched() {
    let mut c = Container::new();
    c.supply(Settings("x")).unwrap();
    // No declared dep on Settings.
    c.provide::<Service, _>(&[], |cx| {
        let settings = cx.get::<Settings>()?;
        Ok(Service { settings: settings.0 })
    })
    .unwrap();

    c.build().unwrap();
    let err = c.start(DEADLINE).await.unwrap_err();
    assert!(matches!(err, ComposeError::Construct { .. }));
    assert_eq!(c.state(), State::Failed);
}

#[tokio::test]
async fn start_hooks_run_in_order_and_stop_in_reverse() {
    let events: Log = Arc::new(Mutex::new(Vec::new()));

    struct A;
    struct B;

    let mut c = Container::new();
    let ev = events.clone();
    c.provide::<A, _>(&[], move |cx| {
        let (ev_start, ev_stop) = (ev.clone(), ev.clone());
        cx.append_hook(
            Hook::new()
                .on_start(move |_| async move {
                    log(&ev_start, "start a");
                    Ok(())
                })
                .on_stop(move |cancel| async move {
                    assert!(cancel.is_cancelled());
                    log(&ev_stop, "stop a");
                    Ok(())
                }),
        );
        Ok(A)
    })
    .unwrap();
    let ev = events.clone();
    c.provide::<B, _>(&[Dep::on::<A>()], move |cx| {
        let (ev_start, ev_stop) = (ev.clone(), ev.clone());
        cx.append_hook(
            Hook::new()
                .on_start(move |_| async move {
                    log(&ev_start, "start b");
                    Ok(())
                })
                .on_stop(move |_| async move {
                    log(&ev_stop, "stop b");
                    Ok(())
                }),
        );
        Ok(B)
    })
    .unwrap();

    c.build().unwrap();
    c.start(DEADLINE).await.unwrap();
    c.stop(DEADLINE).await.unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec!["start a", "start b", "stop b", "stop a"]
    );
}

#[tokio::test]
async fn startup_failure_unwinds_started_components_only() {
    let events: Log = Arc::new(Mutex::new(Vec::new()));

    struct A;
    struct B;
    struct Broken;

    let mut c = Container::new();
    let ev = events.clone();
    c.provide::<A, _>(&[], move |cx| {
        let ev_stop = ev.clone();
        cx.append_hook(Hook::new().on_stop(move |_| async move {
            log(&ev_stop, "stop a");
            Ok(())
        }));
        Ok(A)
    })
    .unwrap();
    let ev = events.clone();
    c.provide::<B, _>(&[Dep::on::<A>()], move |cx| {
        let ev_stop = ev.clone();
        cx.append_hook(Hook::new().on_stop(move |_| async move {
            log(&ev_stop, "stop b");
            Ok(())
        }));
        Ok(B)
    })
    .unwrap();
    let ev = events.clone();
    c.provide::<Broken, _>(&[Dep::on::<B>()], move |cx| {
        let ev_stop = ev.clone();
        cx.append_hook(
            Hook::new()
                .on_start(|_| async { anyhow::bail!("listener bind failed") })
                .on_stop(move |_| async move {
                    log(&ev_stop, "stop broken");
                    Ok(())
                }),
        );
        Ok(Broken)
    })
    .unwrap();

    c.build().unwrap();
    let err = c.start(DEADLINE).await.unwrap_err();
    assert!(matches!(err, ComposeError::StartupHook { .. }));
    assert_eq!(c.state(), State::Failed);

    // The failed component never started, so its stop hook must not run;
    // the others unwind in reverse order.
    assert_eq!(*events.lock().unwrap(), vec!["stop b", "stop a"]);
}

#[tokio::test]
async fn slow_start_hook_hits_the_deadline() {
    struct Slow;

    let mut c = Container::new();
    c.provide::<Slow, _>(&[], |cx| {
        cx.append_hook(Hook::new().on_start(|_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }));
        Ok(Slow)
    })
    .unwrap();

    c.build().unwrap();
    let err = c.start(Duration::from_millis(20)).await.unwrap_err();
    assert!(matches!(err, ComposeError::Timeout { phase: "start", .. }));
    assert_eq!(c.state(), State::Failed);
}

#[tokio::test]
async fn stop_collects_every_failure() {
    let events: Log = Arc::new(Mutex::new(Vec::new()));

    struct A;
    struct B;

    let mut c = Container::new();
    c.provide::<A, _>(&[], |cx| {
        cx.append_hook(
            Hook::new().on_stop(|_| async { anyhow::bail!("flush failed") }),
        );
        Ok(A)
    })
    .unwrap();
    let ev = events.clone();
    c.provide::<B, _>(&[Dep::on::<A>()], move |cx| {
        let ev_stop = ev.clone();
        cx.append_hook(Hook::new().on_stop(move |_| async move {
            log(&ev_stop, "stop b");
            Ok(())
        }));
        Ok(B)
    })
    .unwrap();

    c.build().unwrap();
    c.start(DEADLINE).await.unwrap();
    let err = c.stop(DEADLINE).await.unwrap_err();

    match err {
        ComposeError::ShutdownAggregate { failures } => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].source.to_string().contains("flush failed"));
        }
        other => panic!("expected aggregate, got {other}"),
    }
    // B still got its shutdown attempt even though A's hook failed.
    assert_eq!(*events.lock().unwrap(), vec!["stop b"]);
    assert_eq!(c.state(), State::Stopped);
}

#[tokio::test]
async fn stop_before_start_is_a_no_op() {
    let mut c = Container::new();
    c.supply(Settings("x")).unwrap();
    assert!(c.stop(DEADLINE).await.is_ok());
    assert_eq!(c.state(), State::Declared);

    c.build().unwrap();
    assert!(c.stop(DEADLINE).await.is_ok());
    assert_eq!(c.state(), State::Built);
}

#[tokio::test]
async fn stopped_container_rejects_restart() {
    let mut c = Container::new();
    c.supply(Settings("x")).unwrap();
    c.build().unwrap();
    c.start(DEADLINE).await.unwrap();
    c.stop(DEADLINE).await.unwrap();

    let err = c.start(DEADLINE).await.unwrap_err();
    assert!(matches!(
        err,
        ComposeError::InvalidState {
            state: State::Stopped,
            ..
        }
    ));
}

#[test]
fn registration_after_build_is_rejected() {
    let mut c = Container::new();
    c.supply(Settings("x")).unwrap();
    c.build().unwrap();
    let err = c.supply(Settings("y")).unwrap_err();
    assert!(matches!(err, ComposeError::InvalidState { .. }));
}

#[tokio::test]
async fn run_drives_the_full_lifecycle() {
    let events: Log = Arc::new(Mutex::new(Vec::new()));

    struct A;

    let mut c = Container::new();
    let ev = events.clone();
    c.provide::<A, _>(&[], move |cx| {
        let (ev_start, ev_stop) = (ev.clone(), ev.clone());
        cx.append_hook(
            Hook::new()
                .on_start(move |_| async move {
                    log(&ev_start, "start");
                    Ok(())
                })
                .on_stop(move |_| async move {
                    log(&ev_stop, "stop");
                    Ok(())
                }),
        );
        Ok(A)
    })
    .unwrap();

    c.run(crate::RunOptions::default(), async {}).await.unwrap();
    assert_eq!(*events.lock().unwrap(), vec!["start", "stop"]);
    assert_eq!(c.state(), State::Stopped);
}
