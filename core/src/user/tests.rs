//! Integration tests for the virtual user module

use super::*;
use crate::bus::MetricEventBus;
use crate::config::ThinkTime;
use crate::event::{Classifier, MetricCategory, MetricEvent};
use crate::request::{Request, RequestExecutor, RequestOutcome};
use crate::task::{Behavior, TaskTable};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

// ============================================================================
// Mock RequestExecutor
// ============================================================================

/// Answers by path: `/ok` -> 200, `/error` -> 500, anything else -> refused
struct MockExecutor {
    calls: AtomicUsize,
}

impl MockExecutor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl RequestExecutor for MockExecutor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, request: &Request) -> RequestOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match request.path.as_str() {
            "/ok" => RequestOutcome::response(200, 2, 1.0),
            "/error" => RequestOutcome::response(500, 0, 1.0),
            _ => RequestOutcome::transport_error("connection refused", 0.1),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn context(user_id: usize, executor: Arc<MockExecutor>, bus: Arc<MetricEventBus>) -> UserContext {
    UserContext::new(
        user_id,
        executor,
        bus,
        Classifier::default(),
        StdRng::seed_from_u64(user_id as u64),
    )
}

fn collect(bus: &MetricEventBus) -> Arc<Mutex<Vec<MetricEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    bus.register_fn("collector", move |e| {
        sink.lock().unwrap().push(e.clone());
        Ok(())
    });
    events
}

fn request_behavior(name: &str, path: &'static str) -> Behavior {
    Behavior::new(name, move |ctx| {
        Box::pin(async move {
            ctx.request(&Request::post(path)).await;
            Ok(())
        })
    })
}

fn counting_behavior(name: &str, counter: Arc<AtomicUsize>) -> Behavior {
    Behavior::new(name, move |_ctx| {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    })
}

fn table(behavior: Behavior) -> Arc<TaskTable> {
    Arc::new(TaskTable::new().with(behavior, 1).unwrap())
}

// ============================================================================
// Request classification
// ============================================================================

#[tokio::test]
async fn test_request_outcomes_are_classified() {
    let bus = Arc::new(MetricEventBus::new());
    let events = collect(&bus);
    let mut ctx = context(7, MockExecutor::new(), Arc::clone(&bus));

    ctx.request(&Request::get("/ok")).await;
    ctx.request(&Request::get("/error")).await;
    let refused = ctx.request(&Request::get("/refused")).await;
    assert!(refused.status_code.is_none());

    let events = events.lock().unwrap();
    let categories: Vec<_> = events.iter().map(|e| e.category).collect();
    assert_eq!(
        categories,
        vec![
            MetricCategory::Success,
            MetricCategory::Failure,
            MetricCategory::Exception
        ]
    );
    assert_eq!(events[0].status_code, Some(200));
    assert_eq!(events[1].status_code, Some(500));
    assert!(events[2].status_code.is_none());
    assert_eq!(events[2].error.as_deref(), Some("connection refused"));
    assert!(events.iter().all(|e| e.user_id == 7));

    let stats = ctx.stats();
    assert_eq!(
        (stats.successes, stats.failures, stats.exceptions),
        (1, 1, 1)
    );
}

#[tokio::test]
async fn test_request_context_and_expected_status() {
    let bus = Arc::new(MetricEventBus::new());
    let events = collect(&bus);
    let mut ctx = context(0, MockExecutor::new(), Arc::clone(&bus));

    let request = Request::post("/error")
        .name("search_text")
        .context("query", "embeddings")
        .expect_status(500);
    ctx.request(&request).await;

    let events = events.lock().unwrap();
    assert_eq!(events[0].category, MetricCategory::Success);
    assert_eq!(events[0].name, "search_text");
    assert_eq!(
        events[0].context.get("query").map(String::as_str),
        Some("embeddings")
    );
}

// ============================================================================
// Run loop
// ============================================================================

#[tokio::test]
async fn test_behavior_error_becomes_exception_event() {
    let bus = Arc::new(MetricEventBus::new());
    let events = collect(&bus);
    let failing = Behavior::new("broken", |_ctx| {
        Box::pin(async { Err("payload rejected".into()) })
    });

    let user = VirtualUser::new(
        context(0, MockExecutor::new(), Arc::clone(&bus)),
        table(failing),
        ThinkTime::none(),
    )
    .with_budget(Some(IterationBudget::new(3)));

    let (_tx, rx) = broadcast::channel(1);
    let stats = user.run(rx).await;

    assert_eq!(stats.iterations, 3);
    assert_eq!(stats.behavior_errors, 3);
    let events = events.lock().unwrap();
    assert_eq!(events.len(), 3);
    for event in events.iter() {
        assert_eq!(event.category, MetricCategory::Exception);
        assert_eq!(event.name, "broken");
        assert_eq!(event.error.as_deref(), Some("payload rejected"));
        assert!(event.request_type.is_none());
    }
}

#[tokio::test]
async fn test_panicking_behavior_does_not_stop_user() {
    let bus = Arc::new(MetricEventBus::new());
    let events = collect(&bus);
    let panicking = Behavior::new("explodes", |_ctx| Box::pin(async { panic!("boom") }));
    let in_flight = Arc::new(AtomicUsize::new(0));

    let user = VirtualUser::new(
        context(0, MockExecutor::new(), Arc::clone(&bus)),
        table(panicking),
        ThinkTime::none(),
    )
    .with_in_flight(Arc::clone(&in_flight))
    .with_budget(Some(IterationBudget::new(2)));

    let (_tx, rx) = broadcast::channel(1);
    let stats = user.run(rx).await;

    assert_eq!(stats.iterations, 2);
    assert_eq!(stats.behavior_errors, 2);
    assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    let events = events.lock().unwrap();
    assert!(events[0].error.as_deref().unwrap().contains("boom"));
}

#[tokio::test]
async fn test_startup_failure_still_reaches_running() {
    let bus = Arc::new(MetricEventBus::new());
    let events = collect(&bus);
    let startup = Behavior::new("on_start", |_ctx| Box::pin(async { Err("seed failed".into()) }));
    let executed = Arc::new(AtomicUsize::new(0));

    let user = VirtualUser::new(
        context(0, MockExecutor::new(), Arc::clone(&bus)),
        table(counting_behavior("task", Arc::clone(&executed))),
        ThinkTime::none(),
    )
    .with_startup(Some(startup))
    .with_budget(Some(IterationBudget::new(4)));
    let status = user.status();

    let (_tx, rx) = broadcast::channel(1);
    let stats = user.run(rx).await;

    assert!(status.reached_running());
    assert_eq!(status.get(), UserState::Stopped);
    assert_eq!(executed.load(Ordering::SeqCst), 4);
    assert_eq!(stats.behavior_errors, 1);

    let events = events.lock().unwrap();
    assert_eq!(events[0].name, "on_start");
    assert_eq!(events[0].category, MetricCategory::Exception);
}

#[tokio::test]
async fn test_stop_during_startup_never_reports_running() {
    let executed = Arc::new(AtomicUsize::new(0));
    let stop_flag = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop_flag);
    let startup = Behavior::new("on_start", move |_ctx| {
        let flag = Arc::clone(&flag);
        Box::pin(async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
    });

    let user = VirtualUser::new(
        context(0, MockExecutor::new(), Arc::new(MetricEventBus::new())),
        table(counting_behavior("task", Arc::clone(&executed))),
        ThinkTime::none(),
    )
    .with_startup(Some(startup))
    .with_stop_flag(stop_flag);
    let status = user.status();

    let (_tx, rx) = broadcast::channel(1);
    let stats = user.run(rx).await;

    assert!(!status.reached_running());
    assert_eq!(status.get(), UserState::Stopped);
    assert_eq!(stats.iterations, 0);
    assert_eq!(executed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_startup_populates_session() {
    #[derive(Debug)]
    struct SeededIds(Vec<u32>);

    let bus = Arc::new(MetricEventBus::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let startup = Behavior::new("on_start", |ctx| {
        Box::pin(async move {
            ctx.session_mut().insert(SeededIds(vec![1, 2, 3]));
            Ok(())
        })
    });
    let sink = Arc::clone(&seen);
    let reader = Behavior::new("reader", move |ctx| {
        let sink = Arc::clone(&sink);
        Box::pin(async move {
            let ids = ctx.session().get::<SeededIds>().ok_or("no session")?;
            sink.lock().unwrap().push(ids.0.len());
            Ok(())
        })
    });

    let user = VirtualUser::new(
        context(0, MockExecutor::new(), bus),
        table(reader),
        ThinkTime::none(),
    )
    .with_startup(Some(startup))
    .with_budget(Some(IterationBudget::new(2)));

    let (_tx, rx) = broadcast::channel(1);
    let stats = user.run(rx).await;

    assert_eq!(stats.behavior_errors, 0);
    assert_eq!(*seen.lock().unwrap(), vec![3, 3]);
}

#[tokio::test]
async fn test_stop_prevents_new_behaviors() {
    let bus = Arc::new(MetricEventBus::new());
    let executed = Arc::new(AtomicUsize::new(0));
    let stop_flag = Arc::new(AtomicBool::new(false));
    let in_flight = Arc::new(AtomicUsize::new(0));

    let user = VirtualUser::new(
        context(0, MockExecutor::new(), bus),
        table(counting_behavior("task", Arc::clone(&executed))),
        ThinkTime::between(1, 2).unwrap(),
    )
    .with_stop_flag(Arc::clone(&stop_flag))
    .with_in_flight(Arc::clone(&in_flight));
    let status = user.status();

    let (tx, rx) = broadcast::channel(1);
    let handle = tokio::spawn(user.run(rx));
    tokio::time::sleep(Duration::from_millis(30)).await;

    stop_flag.store(true, Ordering::SeqCst);
    let _ = tx.send(());
    let at_stop = executed.load(Ordering::SeqCst);

    let stats = handle.await.unwrap();
    assert!(at_stop > 0);
    assert_eq!(executed.load(Ordering::SeqCst), at_stop);
    assert_eq!(stats.iterations, at_stop);
    assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    assert_eq!(status.get(), UserState::Stopped);
}

#[tokio::test]
async fn test_in_flight_behavior_is_not_cancelled() {
    let bus = Arc::new(MetricEventBus::new());
    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    let stop_flag = Arc::new(AtomicBool::new(false));
    let in_flight = Arc::new(AtomicUsize::new(0));

    let (s, f) = (Arc::clone(&started), Arc::clone(&finished));
    let slow = Behavior::new("slow", move |_ctx| {
        let (started, finished) = (Arc::clone(&s), Arc::clone(&f));
        Box::pin(async move {
            started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });

    let user = VirtualUser::new(
        context(0, MockExecutor::new(), bus),
        table(slow),
        ThinkTime::none(),
    )
    .with_stop_flag(Arc::clone(&stop_flag))
    .with_in_flight(Arc::clone(&in_flight));

    let (tx, rx) = broadcast::channel(1);
    let handle = tokio::spawn(user.run(rx));

    while started.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(in_flight.load(Ordering::SeqCst), 1);
    stop_flag.store(true, Ordering::SeqCst);
    let _ = tx.send(());

    let stats = handle.await.unwrap();
    assert_eq!(stats.iterations, 1);
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_think_time_within_range() {
    let bus = Arc::new(MetricEventBus::new());
    let stamps = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&stamps);
    let stamp = Behavior::new("stamp", move |_ctx| {
        let sink = Arc::clone(&sink);
        Box::pin(async move {
            sink.lock().unwrap().push(tokio::time::Instant::now());
            Ok(())
        })
    });

    let user = VirtualUser::new(
        context(3, MockExecutor::new(), bus),
        table(stamp),
        ThinkTime::between(5, 20).unwrap(),
    )
    .with_budget(Some(IterationBudget::new(25)));

    let (_tx, rx) = broadcast::channel(1);
    user.run(rx).await;

    let stamps = stamps.lock().unwrap();
    assert_eq!(stamps.len(), 25);
    for pair in stamps.windows(2) {
        let gap = pair[1] - pair[0];
        // The paused clock advances in whole timer ticks.
        assert!(gap >= Duration::from_millis(5), "gap {gap:?} below minimum");
        assert!(gap <= Duration::from_millis(21), "gap {gap:?} above maximum");
    }
}

#[tokio::test]
async fn test_shared_budget_bounds_total_iterations() {
    let bus = Arc::new(MetricEventBus::new());
    let executed = Arc::new(AtomicUsize::new(0));
    let tasks = table(counting_behavior("task", Arc::clone(&executed)));
    let budget = IterationBudget::new(10);
    let (tx, _) = broadcast::channel::<()>(1);

    let handles: Vec<_> = (0..3)
        .map(|id| {
            let user = VirtualUser::new(
                context(id, MockExecutor::new(), Arc::clone(&bus)),
                Arc::clone(&tasks),
                ThinkTime::none(),
            )
            .with_budget(Some(budget.clone()));
            tokio::spawn(user.run(tx.subscribe()))
        })
        .collect();

    let mut iterations = 0;
    for handle in handles {
        iterations += handle.await.unwrap().iterations;
    }
    assert_eq!(iterations, 10);
    assert_eq!(executed.load(Ordering::SeqCst), 10);
    assert_eq!(budget.claimed(), 10);
    assert!(!budget.try_claim());
}

#[tokio::test]
async fn test_deadline_ends_user() {
    let bus = Arc::new(MetricEventBus::new());
    let deadline = tokio::time::Instant::now() + Duration::from_millis(40);
    let user = VirtualUser::new(
        context(0, MockExecutor::new(), bus),
        table(request_behavior("ok", "/ok")),
        ThinkTime::between(1, 3).unwrap(),
    )
    .with_deadline(Some(deadline));

    let (_tx, rx) = broadcast::channel(1);
    let stats = tokio::time::timeout(Duration::from_secs(5), user.run(rx))
        .await
        .expect("user should stop at its deadline");

    assert!(stats.iterations > 0);
    assert_eq!(stats.successes, stats.iterations);
    assert!(tokio::time::Instant::now() >= deadline);
}

#[tokio::test]
async fn test_closed_shutdown_channel_stops_user() {
    let bus = Arc::new(MetricEventBus::new());
    let user = VirtualUser::new(
        context(0, MockExecutor::new(), bus),
        table(request_behavior("ok", "/ok")),
        ThinkTime::between(1_000, 1_000).unwrap(),
    );

    let (tx, rx) = broadcast::channel::<()>(1);
    drop(tx);
    let stats = tokio::time::timeout(Duration::from_secs(5), user.run(rx))
        .await
        .expect("closed channel should end think-time");
    assert_eq!(stats.iterations, 1);
}
