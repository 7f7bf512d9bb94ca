//! Virtual users: one simulated client running a request/think-time loop.

use crate::execution::TestExecution;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use stampede_core::metrics::{ACTIVE_VIRTUAL_USERS, REQUESTS_TOTAL, REQUEST_DURATION};
use stampede_core::{
    RequestExecutor, RequestTemplate, VirtualUserId, VirtualUserStatus, VirtualUserSummary,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A unit of concurrent simulated traffic.
///
/// Owned by the load pattern engine that spawned it. Counters are atomics so
/// readers never block the request loop; status changes go through
/// [`VirtualUser::transition`] and only move forward.
#[derive(Debug)]
pub struct VirtualUser {
    id: VirtualUserId,
    /// Spawn order within the run, used for oldest-first shrinking.
    index: usize,
    start_time: DateTime<Utc>,
    end_time: Mutex<Option<DateTime<Utc>>>,
    status: RwLock<VirtualUserStatus>,
    request_count: AtomicU64,
    error_count: AtomicU64,
    success_count: AtomicU64,
    total_response_us: AtomicU64,
    wake: Notify,
}

impl VirtualUser {
    pub fn new(index: usize) -> Self {
        ACTIVE_VIRTUAL_USERS.inc();
        Self {
            id: VirtualUserId::new(),
            index,
            start_time: Utc::now(),
            end_time: Mutex::new(None),
            status: RwLock::new(VirtualUserStatus::Active),
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            total_response_us: AtomicU64::new(0),
            wake: Notify::new(),
        }
    }

    pub fn id(&self) -> VirtualUserId {
        self.id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn status(&self) -> VirtualUserStatus {
        *self.status.read()
    }

    pub fn is_active(&self) -> bool {
        self.status() == VirtualUserStatus::Active
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Move to `next` if that is a forward transition. Returns whether the
    /// status changed.
    pub fn transition(&self, next: VirtualUserStatus) -> bool {
        let mut status = self.status.write();
        if !status.can_advance_to(next) {
            return false;
        }

        if *status == VirtualUserStatus::Active {
            ACTIVE_VIRTUAL_USERS.dec();
        }
        *status = next;
        if next.is_terminal() {
            *self.end_time.lock() = Some(Utc::now());
        }
        true
    }

    /// Ask the user to leave its loop at the next check.
    pub fn request_stop(&self) -> bool {
        let changed = self.transition(VirtualUserStatus::Stopping);
        if changed {
            self.wake.notify_waiters();
        }
        changed
    }

    /// Mark the user failed (setup error, panicked task, failed to quiesce).
    pub fn mark_failed(&self) -> bool {
        self.transition(VirtualUserStatus::Failed)
    }

    fn record_success(&self, latency: Duration) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_response_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Average of this user's successful response times in milliseconds.
    pub fn average_response_time(&self) -> f64 {
        let successes = self.success_count.load(Ordering::Relaxed);
        if successes == 0 {
            return 0.0;
        }
        self.total_response_us.load(Ordering::Relaxed) as f64 / successes as f64 / 1000.0
    }

    pub fn summary(&self) -> VirtualUserSummary {
        VirtualUserSummary {
            id: self.id,
            status: self.status(),
            start_time: self.start_time,
            end_time: *self.end_time.lock(),
            request_count: self.request_count(),
            error_count: self.error_count(),
            average_response_time: self.average_response_time(),
        }
    }

    /// Resolves once this user has been asked to stop.
    async fn stop_requested(&self) {
        loop {
            let notified = self.wake.notified();
            if !self.is_active() {
                return;
            }
            notified.await;
        }
    }
}

/// Everything a virtual user needs to run its loop.
#[derive(Clone)]
pub struct UserContext {
    pub execution: Arc<TestExecution>,
    pub executor: Arc<dyn RequestExecutor>,
    pub template: Arc<RequestTemplate>,
    pub think_time: Duration,
    /// Hard end of the test; no iteration starts after it.
    pub end_at: Instant,
    /// Optional iteration cap (warmup).
    pub max_iterations: Option<u64>,
}

/// Run one virtual user until it is stopped, the test ends, or the owning
/// execution is stopping.
pub async fn run_virtual_user(user: Arc<VirtualUser>, ctx: UserContext) {
    if let Err(e) = ctx.executor.prepare(&ctx.template).await {
        tracing::warn!(
            test_id = %ctx.execution.id(),
            user_id = %user.id(),
            error = %e,
            "Virtual user setup failed"
        );
        user.mark_failed();
        return;
    }

    let accumulator = ctx.execution.accumulator();
    let mut iterations: u64 = 0;

    loop {
        if !user.is_active()
            || Instant::now() >= ctx.end_at
            || ctx.execution.is_stop_requested()
        {
            break;
        }
        if ctx.max_iterations.is_some_and(|max| iterations >= max) {
            break;
        }

        accumulator.record_sent();
        match ctx.executor.execute(&ctx.template).await {
            Ok(outcome) => {
                accumulator.record_success(outcome.latency, outcome.bytes);
                user.record_success(outcome.latency);
                REQUESTS_TOTAL.with_label_values(&["success"]).inc();
                REQUEST_DURATION.observe(outcome.latency.as_secs_f64());
            }
            Err(e) => {
                let category = e.category();
                accumulator.record_failure(&category);
                user.record_failure();
                REQUESTS_TOTAL.with_label_values(&["failure"]).inc();
                tracing::debug!(
                    user_id = %user.id(),
                    category = %category,
                    error = %e,
                    "Request failed"
                );
            }
        }
        iterations += 1;

        let now = Instant::now();
        if now >= ctx.end_at {
            break;
        }
        let pause = ctx.think_time.min(ctx.end_at - now);
        if pause.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = user.stop_requested() => {}
                _ = ctx.execution.stop_requested() => {}
            }
        }
    }

    user.transition(VirtualUserStatus::Completed);
    tracing::trace!(
        user_id = %user.id(),
        requests = user.request_count(),
        errors = user.error_count(),
        avg_ms = user.average_response_time(),
        "Virtual user finished"
    );
}
