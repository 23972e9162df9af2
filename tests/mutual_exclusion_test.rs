//! Integration tests for mutex-domain scheduling
//!
//! These tests validate:
//! - One job at a time per domain, in submission order
//! - Parallelism across domains
//! - Permit hand-off on rejection, cancellation and expiration
//! - Refusal of await calls from permit holders
//! - Audit trail and exception handler wiring

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};
use parking_lot::Mutex;
use prometheus_jobs::config::{SchedulerConfig, WorkerPoolConfig};
use prometheus_jobs::core::{
    AuditAction, CancelCause, Executor, FailureOrigin, FutureFilter, InMemoryAuditSink, JobError,
    JobInput, JobStatus, MutexDomain, Rejected, Runnable, Scheduler, SchedulerError, WorkerPool,
};
use prometheus_jobs::util::{init_test_tracing, ManualClock};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

fn config(workers: usize) -> SchedulerConfig {
    SchedulerConfig {
        worker_pool: WorkerPoolConfig::new().with_worker_count(workers),
        ..SchedulerConfig::default()
    }
}

fn scheduler(workers: usize) -> Scheduler {
    init_test_tracing();
    Scheduler::new(config(workers)).expect("scheduler")
}

/// Body that blocks until the test sends on the returned gate.
fn gated() -> (crossbeam_channel::Sender<()>, Receiver<()>) {
    bounded(1)
}

/// Executor that refuses its second submission and forwards the rest.
struct RejectSecond {
    pool: WorkerPool,
    seen: AtomicUsize,
}

impl Executor for RejectSecond {
    fn execute(&self, task: Runnable) -> Result<(), Rejected> {
        if self.seen.fetch_add(1, Ordering::SeqCst) == 1 {
            return Err(Rejected::new(task, "second submission refused"));
        }
        self.pool.execute(task)
    }

    fn shutdown(&self) {
        self.pool.shutdown();
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[test]
fn test_same_domain_never_overlaps() {
    let scheduler = scheduler(4);
    let domain = MutexDomain::new("ledger");
    let active = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    for _ in 0..20 {
        let active = Arc::clone(&active);
        let max_seen = Arc::clone(&max_seen);
        let _ = scheduler.schedule(
            move |ctx| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                ctx.sleep(Duration::from_millis(2))?;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            },
            JobInput::new().with_domain(domain.clone()),
        );
    }

    assert!(scheduler.await_finished(&FutureFilter::all(), WAIT).unwrap());
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.permit_count(&domain), 0);
}

#[test]
fn test_same_domain_runs_in_submission_order() {
    let scheduler = scheduler(4);
    let order = Arc::new(Mutex::new(Vec::new()));

    let futures: Vec<_> = (0..10)
        .map(|i| {
            let order = Arc::clone(&order);
            scheduler.schedule(
                move |_ctx| {
                    order.lock().push(i);
                    Ok(i)
                },
                JobInput::named(format!("ordered-{i}")).with_domain("fifo"),
            )
        })
        .collect();

    for (i, future) in futures.iter().enumerate() {
        assert_eq!(future.await_done_and_get(WAIT).unwrap(), i);
    }
    assert_eq!(*order.lock(), (0..10).collect::<Vec<_>>());
}

#[test]
fn test_different_domains_run_in_parallel() {
    let scheduler = scheduler(2);
    let (a_tx, a_rx) = bounded::<()>(1);
    let (b_tx, b_rx) = bounded::<()>(1);

    // Each job needs the other one running to finish in time.
    let a = scheduler.schedule(
        move |_ctx| {
            a_tx.send(())?;
            b_rx.recv_timeout(Duration::from_secs(5))?;
            Ok("a")
        },
        JobInput::new().with_domain("left"),
    );
    let b = scheduler.schedule(
        move |_ctx| {
            b_tx.send(())?;
            a_rx.recv_timeout(Duration::from_secs(5))?;
            Ok("b")
        },
        JobInput::new().with_domain("right"),
    );

    assert_eq!(a.await_done_and_get(WAIT).unwrap(), "a");
    assert_eq!(b.await_done_and_get(WAIT).unwrap(), "b");
}

#[test]
fn test_rejected_job_hands_permit_to_next() {
    init_test_tracing();
    let executor = RejectSecond {
        pool: WorkerPool::new(WorkerPoolConfig::new().with_worker_count(2)).unwrap(),
        seen: AtomicUsize::new(0),
    };
    let scheduler = Scheduler::builder(config(2))
        .executor(Arc::new(executor))
        .build()
        .unwrap();
    let domain = MutexDomain::new("hand-off");
    let second_ran = Arc::new(AtomicBool::new(false));

    let first = scheduler.schedule(
        |ctx| {
            ctx.sleep(Duration::from_millis(20))?;
            Ok(1)
        },
        JobInput::new().with_domain(domain.clone()),
    );
    let flag = Arc::clone(&second_ran);
    let second = scheduler.schedule(
        move |_ctx| {
            flag.store(true, Ordering::SeqCst);
            Ok(2)
        },
        JobInput::new().with_domain(domain.clone()),
    );
    let third = scheduler.schedule(|_ctx| Ok(3), JobInput::new().with_domain(domain.clone()));

    assert_eq!(first.await_done_and_get(WAIT).unwrap(), 1);
    assert_eq!(third.await_done_and_get(WAIT).unwrap(), 3);
    assert!(second.is_cancelled());
    assert_eq!(second.cancel_cause(), Some(CancelCause::Rejected));
    assert!(second.await_done_and_get(WAIT).unwrap_err().is_cancellation());
    assert!(!second_ran.load(Ordering::SeqCst));

    assert!(scheduler.await_finished(&FutureFilter::all(), WAIT).unwrap());
    assert_eq!(scheduler.permit_count(&domain), 0);
}

#[test]
fn test_cancel_queued_job_skips_it() {
    let scheduler = scheduler(2);
    let domain = MutexDomain::new("cancel-queued");
    let (release, gate) = gated();
    let skipped_ran = Arc::new(AtomicBool::new(false));

    let holder = scheduler.schedule(
        move |_ctx| {
            gate.recv_timeout(Duration::from_secs(5))?;
            Ok(())
        },
        JobInput::new().with_domain(domain.clone()),
    );
    let flag = Arc::clone(&skipped_ran);
    let skipped = scheduler.schedule(
        move |_ctx| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        },
        JobInput::new().with_domain(domain.clone()),
    );
    let after = scheduler.schedule(|_ctx| Ok("after"), JobInput::new().with_domain(domain.clone()));

    assert_eq!(skipped.status(), JobStatus::Queued);
    assert!(skipped.cancel(false));
    assert!(!skipped.cancel(false));
    assert_eq!(skipped.status(), JobStatus::Cancelled);
    assert_eq!(skipped.cancel_cause(), Some(CancelCause::Requested));

    release.send(()).unwrap();
    assert!(holder.await_done(WAIT));
    assert_eq!(after.await_done_and_get(WAIT).unwrap(), "after");
    assert!(!skipped_ran.load(Ordering::SeqCst));
}

#[test]
fn test_cancel_with_interrupt_wakes_sleeping_job() {
    let scheduler = scheduler(2);
    let (started_tx, started_rx) = bounded::<()>(1);
    let saw_interrupt = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&saw_interrupt);
    let sleeper = scheduler.schedule(
        move |ctx| {
            started_tx.send(())?;
            let slept = ctx.sleep(Duration::from_secs(30));
            flag.store(matches!(slept, Err(JobError::Interrupted)), Ordering::SeqCst);
            slept?;
            Ok(())
        },
        JobInput::named("sleeper").with_domain("interrupt"),
    );

    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(sleeper.cancel(true));
    assert!(scheduler
        .await_finished(&FutureFilter::future(&sleeper), WAIT)
        .unwrap());
    assert!(saw_interrupt.load(Ordering::SeqCst));
    assert_eq!(sleeper.status(), JobStatus::Cancelled);
    assert!(sleeper.await_done_and_get(WAIT).unwrap_err().is_cancellation());
}

#[test]
fn test_cancel_by_filter() {
    let scheduler = scheduler(1);
    let domain = MutexDomain::new("bulk");
    let (release, gate) = gated();

    let holder = scheduler.schedule(
        move |_ctx| {
            gate.recv_timeout(Duration::from_secs(5))?;
            Ok(())
        },
        JobInput::named("holder").with_domain(domain.clone()),
    );
    let queued: Vec<_> = (0..3)
        .map(|_| scheduler.schedule(|_ctx| Ok(()), JobInput::named("victim").with_domain(domain.clone())))
        .collect();

    let cancelled = scheduler.cancel(&FutureFilter::all().with_name("victim"), false);
    assert_eq!(cancelled, 3);
    assert!(queued.iter().all(|f| f.is_cancelled()));

    release.send(()).unwrap();
    assert!(holder.await_done_and_get(WAIT).is_ok());
    assert!(scheduler.await_done(&FutureFilter::all().with_domain(domain), WAIT).unwrap());
}

#[test]
fn test_expired_job_fails_before_start() {
    init_test_tracing();
    let clock = ManualClock::new();
    let scheduler = Scheduler::builder(config(2))
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    let domain = MutexDomain::new("expiring");
    let (release, gate) = gated();
    let (started_tx, started_rx) = bounded::<()>(1);
    let late_ran = Arc::new(AtomicBool::new(false));

    let holder = scheduler.schedule(
        move |_ctx| {
            started_tx.send(())?;
            gate.recv_timeout(Duration::from_secs(5))?;
            Ok(())
        },
        JobInput::new()
            .with_domain(domain.clone())
            .with_expiration(Duration::from_secs(1)),
    );
    let flag = Arc::clone(&late_ran);
    let late = scheduler.schedule(
        move |_ctx| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        },
        JobInput::new()
            .with_domain(domain.clone())
            .with_expiration(Duration::from_secs(1)),
    );

    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    clock.advance(Duration::from_secs(2));
    scheduler.expire_overdue();

    let err = late.await_done_and_get(WAIT).unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(late.status(), JobStatus::Failed);

    // Already running when its deadline passed, so it is unaffected.
    release.send(()).unwrap();
    assert!(holder.await_done_and_get(WAIT).is_ok());
    assert!(!late_ran.load(Ordering::SeqCst));
    assert!(scheduler.await_finished(&FutureFilter::all(), WAIT).unwrap());
    assert_eq!(scheduler.permit_count(&domain), 0);
}

#[test]
fn test_await_from_permit_holder_is_refused() {
    let scheduler = scheduler(2);
    let future = scheduler.schedule(
        |ctx| {
            let refused = ctx
                .scheduler()
                .await_done(&FutureFilter::all(), Some(Duration::from_millis(10)));
            Ok(matches!(refused, Err(SchedulerError::AwaitWhileHoldingPermit(_))))
        },
        JobInput::new().with_domain("holder"),
    );
    assert!(future.await_done_and_get(WAIT).unwrap());

    // Jobs without a domain hold no permit and may wait.
    let free = scheduler.schedule(
        |ctx| {
            let filter = FutureFilter::all().with_name("nothing");
            Ok(ctx.scheduler().await_done(&filter, Some(Duration::from_millis(10)))?)
        },
        JobInput::new(),
    );
    assert!(free.await_done_and_get(WAIT).unwrap());
}

#[test]
fn test_unbounded_timeouts_wait_without_overflow() {
    let scheduler = scheduler(2);
    let future = scheduler.schedule(
        |ctx| {
            ctx.sleep(Duration::from_millis(1))?;
            Ok(5)
        },
        JobInput::new()
            .with_domain("far-future")
            .with_expiration(Duration::MAX),
    );

    assert_eq!(future.await_done_and_get(Some(Duration::MAX)).unwrap(), 5);
    assert!(future.await_done(Some(Duration::MAX)));
    assert!(scheduler
        .await_finished(&FutureFilter::all(), Some(Duration::MAX))
        .unwrap());
    assert_eq!(scheduler.expire_overdue(), 0);
}

#[test]
fn test_audit_trail_records_lifecycle() {
    init_test_tracing();
    let sink = InMemoryAuditSink::new(100);
    let scheduler = Scheduler::builder(config(2))
        .audit_sink(Arc::new(sink.clone()))
        .build()
        .unwrap();

    let ok = scheduler.schedule(|_ctx| Ok(()), JobInput::named("audited").with_domain("audit"));
    let failed = scheduler.schedule(
        |_ctx| -> anyhow::Result<()> { anyhow::bail!("nope") },
        JobInput::named("audited-failure")
            .with_domain("audit")
            .with_log_on_error(false),
    );
    assert!(scheduler.await_finished(&FutureFilter::all(), WAIT).unwrap());

    assert_eq!(
        sink.actions_for(ok.id()),
        vec![AuditAction::Scheduled, AuditAction::Started, AuditAction::Completed]
    );
    assert_eq!(
        sink.actions_for(failed.id()),
        vec![AuditAction::Scheduled, AuditAction::Started, AuditAction::Failed]
    );
    let event = sink
        .events()
        .into_iter()
        .find(|e| e.job_id == ok.id())
        .unwrap();
    assert_eq!(event.domain.as_deref(), Some("audit"));
    assert_eq!(event.job_name, "audited");
}

#[test]
fn test_unobserved_failure_reaches_exception_handler() {
    init_test_tracing();
    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reported);
    let scheduler = Scheduler::builder(config(2))
        .exception_handler(Arc::new(move |origin: &FailureOrigin, error: &JobError| {
            sink.lock().push((origin.name.clone(), error.to_string()));
        }))
        .build()
        .unwrap();

    let _ = scheduler.schedule(
        |_ctx| -> anyhow::Result<()> { anyhow::bail!("disk full") },
        JobInput::named("reported"),
    );
    let _ = scheduler.schedule(
        |_ctx| -> anyhow::Result<()> { anyhow::bail!("quiet") },
        JobInput::named("silenced").with_log_on_error(false),
    );
    assert!(scheduler.await_finished(&FutureFilter::all(), WAIT).unwrap());

    let reported = reported.lock();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].0, "reported");
    assert!(reported[0].1.contains("disk full"));
}

#[test]
fn test_shutdown_cancels_pending_jobs() {
    let scheduler = scheduler(1);
    let domain = MutexDomain::new("shutdown");
    let (started_tx, started_rx) = bounded::<()>(1);

    let running = scheduler.schedule(
        move |ctx| {
            started_tx.send(())?;
            ctx.sleep(Duration::from_secs(30))?;
            Ok(())
        },
        JobInput::new().with_domain(domain.clone()),
    );
    let queued = scheduler.schedule(|_ctx| Ok(()), JobInput::new().with_domain(domain.clone()));
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    scheduler.shutdown();
    assert!(scheduler.is_shut_down());
    assert!(running.await_done(WAIT));
    assert!(queued.is_cancelled());
    assert!(running.is_cancelled());
}
