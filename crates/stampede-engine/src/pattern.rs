//! Load pattern engine: turns a load shape into a virtual-user timeline.
//!
//! [`plan`] is a pure function from a [`LoadConfig`] to a list of
//! `(offset, target population)` steps. [`LoadPatternEngine`] walks that
//! list on the runtime clock, growing the population by spawning users into
//! a task group and shrinking it by asking the oldest active users to stop.

use crate::execution::TestExecution;
use crate::virtual_user::{run_virtual_user, UserContext, VirtualUser};
use stampede_core::{
    LoadConfig, LoadPattern, RequestExecutor, RequestTemplate, StampedeError, StampedeResult,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};

/// Population target reached `at` after the pattern starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanStep {
    pub at: Duration,
    pub target: u32,
}

impl PlanStep {
    fn new(at_ms: u64, target: u32) -> Self {
        Self {
            at: Duration::from_millis(at_ms),
            target,
        }
    }
}

const RAMP_STEPS: u64 = 10;
const STAIR_STEPS: u64 = 5;
const SPIKE_WINDOW_CAP_MS: u64 = 30_000;

/// `ceil(users * num / den)`
fn share(users: u32, num: u64, den: u64) -> u32 {
    ((u64::from(users) * num).div_ceil(den)) as u32
}

fn ramp(users: u32, over_ms: u64, offset_ms: u64) -> impl Iterator<Item = PlanStep> {
    (0..RAMP_STEPS).map(move |k| {
        PlanStep::new(
            offset_ms + over_ms * k / RAMP_STEPS,
            share(users, k + 1, RAMP_STEPS),
        )
    })
}

/// Seconds to milliseconds, refusing anything beyond the supported timeline.
fn to_ms(secs: u64, field: &str) -> StampedeResult<u64> {
    if secs > LoadConfig::MAX_DURATION_SECS {
        return Err(StampedeError::Pattern(format!(
            "{field} of {secs}s exceeds the {}s limit",
            LoadConfig::MAX_DURATION_SECS
        )));
    }
    secs.checked_mul(1000)
        .ok_or_else(|| StampedeError::Pattern(format!("{field} of {secs}s overflows")))
}

/// Compute the population timeline for `load`.
///
/// Every step lies strictly inside the test duration except the initial one
/// at offset zero. Targets never exceed `load.virtual_users`.
///
/// # Errors
///
/// Returns [`StampedeError::Pattern`] for a custom pattern without steps, or
/// for a duration or ramp time longer than [`LoadConfig::MAX_DURATION_SECS`].
pub fn plan(load: &LoadConfig) -> StampedeResult<Vec<PlanStep>> {
    let users = load.virtual_users;
    let duration_ms = to_ms(load.duration, "duration")?;
    let half_ms = duration_ms / 2;
    let ramp_up_ms = load
        .ramp_up_time
        .map(|secs| to_ms(secs, "rampUpTime"))
        .transpose()?;
    let ramp_down_ms = load
        .ramp_down_time
        .map(|secs| to_ms(secs, "rampDownTime"))
        .transpose()?;

    let steps: Vec<PlanStep> = match load.pattern {
        LoadPattern::Constant => vec![PlanStep::new(0, users)],

        LoadPattern::RampUp => {
            let ramp_ms = ramp_up_ms.unwrap_or(half_ms).min(duration_ms);
            ramp(users, ramp_ms, 0).collect()
        }

        LoadPattern::RampDown => {
            let up_ms = ramp_up_ms.unwrap_or(half_ms).min(half_ms);
            let down_ms = ramp_down_ms.unwrap_or(half_ms);

            let mut steps: Vec<PlanStep> = ramp(users, up_ms, 0).collect();
            steps.extend((0..RAMP_STEPS).map(|j| {
                let remaining = (u64::from(users) * (RAMP_STEPS - 1 - j) / RAMP_STEPS) as u32;
                PlanStep::new(half_ms + down_ms * (j + 1) / RAMP_STEPS, remaining)
            }));
            steps
        }

        LoadPattern::Step => (0..STAIR_STEPS)
            .map(|s| {
                PlanStep::new(
                    duration_ms * s / STAIR_STEPS,
                    share(users, s + 1, STAIR_STEPS),
                )
            })
            .collect(),

        LoadPattern::Spike => {
            let baseline = share(users, 1, 10).max(1).min(users);
            let window_ms = (duration_ms * 3 / 10).min(SPIKE_WINDOW_CAP_MS);
            let pre_ms = (duration_ms - window_ms) / 2;
            vec![
                PlanStep::new(0, baseline),
                PlanStep::new(pre_ms, users),
                PlanStep::new(pre_ms + window_ms, baseline),
            ]
        }

        LoadPattern::Custom => {
            let custom = load
                .steps
                .as_deref()
                .filter(|steps| !steps.is_empty())
                .ok_or_else(|| {
                    StampedeError::Pattern("custom load pattern requires at least one step".into())
                })?;

            let mut steps = Vec::with_capacity(custom.len());
            let mut offset_ms: u64 = 0;
            for step in custom {
                steps.push(PlanStep::new(offset_ms, step.target_users.min(users)));
                offset_ms = offset_ms
                    .checked_add(to_ms(step.duration_seconds, "durationSeconds")?)
                    .ok_or_else(|| {
                        StampedeError::Pattern("custom steps overflow the timeline".into())
                    })?;
            }
            steps
        }
    };

    let limit = Duration::from_millis(duration_ms);
    Ok(steps
        .into_iter()
        .enumerate()
        .filter(|(i, step)| *i == 0 || step.at < limit)
        .map(|(_, step)| step)
        .collect())
}

/// Drives the virtual-user population of one execution.
pub struct LoadPatternEngine {
    execution: Arc<TestExecution>,
    executor: Arc<dyn RequestExecutor>,
    template: Arc<RequestTemplate>,
    think_time: Duration,
    max_iterations: Option<u64>,
    /// How long to wait for users after the timeline before aborting them.
    grace: Duration,
}

impl LoadPatternEngine {
    pub fn new(
        execution: Arc<TestExecution>,
        executor: Arc<dyn RequestExecutor>,
        template: RequestTemplate,
        think_time: Duration,
    ) -> Self {
        Self {
            execution,
            executor,
            template: Arc::new(template),
            think_time,
            max_iterations: None,
            grace: Duration::from_secs(10),
        }
    }

    /// Cap the number of iterations each user runs.
    pub fn with_max_iterations(mut self, max: u64) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Run the pattern to completion (or until the execution is stopping),
    /// then join every spawned user.
    ///
    /// # Errors
    ///
    /// Returns a pattern error before any user is spawned if the load shape
    /// cannot be planned.
    pub async fn run(&self, load: &LoadConfig) -> StampedeResult<()> {
        let steps = plan(load)?;
        let start = Instant::now();
        let end_at = start + load.duration();
        let mut tasks = JoinSet::new();

        tracing::debug!(
            test_id = %self.execution.id(),
            pattern = %load.pattern,
            steps = steps.len(),
            "Load pattern started"
        );

        for step in steps {
            tokio::select! {
                _ = sleep_until(start + step.at) => {}
                _ = self.execution.stop_requested() => break,
            }
            if self.execution.is_stop_requested() {
                break;
            }
            self.adjust_population(step.target, &mut tasks, end_at);
        }

        self.drain(&mut tasks, end_at).await;
        Ok(())
    }

    fn adjust_population(&self, target: u32, tasks: &mut JoinSet<()>, end_at: Instant) {
        let active: Vec<Arc<VirtualUser>> = self
            .execution
            .users_snapshot()
            .into_iter()
            .filter(|u| u.is_active())
            .collect();
        let current = active.len() as u32;

        if target > current {
            for _ in current..target {
                let user = Arc::new(VirtualUser::new(self.execution.user_total()));
                self.execution.add_user(Arc::clone(&user));
                tasks.spawn(run_virtual_user(user, self.context(end_at)));
            }
        } else {
            // users_snapshot is in spawn order: oldest first
            for user in active.iter().take((current - target) as usize) {
                user.request_stop();
            }
        }

        tracing::debug!(
            test_id = %self.execution.id(),
            from = current,
            to = target,
            "Virtual user population adjusted"
        );
    }

    fn context(&self, end_at: Instant) -> UserContext {
        UserContext {
            execution: Arc::clone(&self.execution),
            executor: Arc::clone(&self.executor),
            template: Arc::clone(&self.template),
            think_time: self.think_time,
            end_at,
            max_iterations: self.max_iterations,
        }
    }

    async fn drain(&self, tasks: &mut JoinSet<()>, end_at: Instant) {
        let mut deadline = end_at + self.grace;
        let mut stop_seen = false;

        loop {
            if !stop_seen && self.execution.is_stop_requested() {
                stop_seen = true;
                deadline = deadline.min(Instant::now() + self.grace);
            }

            tokio::select! {
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Err(e)) if e.is_panic() => {
                        tracing::error!(test_id = %self.execution.id(), "Virtual user task panicked");
                    }
                    Some(_) => {}
                },
                _ = sleep_until(deadline) => {
                    tracing::warn!(
                        test_id = %self.execution.id(),
                        remaining = tasks.len(),
                        "Virtual users did not finish in time, aborting"
                    );
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    break;
                }
                _ = self.execution.stop_requested(), if !stop_seen => {}
            }
        }

        // Users whose task panicked or was aborted never reached a terminal state
        for user in self.execution.users_snapshot() {
            if !user.status().is_terminal() {
                user.mark_failed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampede_core::CustomStep;

    fn load(pattern: LoadPattern, users: u32, secs: u64) -> LoadConfig {
        LoadConfig {
            pattern,
            ..LoadConfig::constant(users, secs)
        }
    }

    fn targets(steps: &[PlanStep]) -> Vec<u32> {
        steps.iter().map(|s| s.target).collect()
    }

    #[test]
    fn test_constant_plan() {
        let steps = plan(&load(LoadPattern::Constant, 5, 2)).unwrap();
        assert_eq!(steps, vec![PlanStep::new(0, 5)]);
    }

    #[test]
    fn test_ramp_up_plan() {
        let mut config = load(LoadPattern::RampUp, 10, 10);
        config.ramp_up_time = Some(5);
        let steps = plan(&config).unwrap();

        assert_eq!(targets(&steps), (1..=10).collect::<Vec<_>>());
        assert_eq!(steps[1].at, Duration::from_millis(500));
        assert_eq!(steps[9].at, Duration::from_millis(4500));
    }

    #[test]
    fn test_ramp_up_rounds_up() {
        let steps = plan(&load(LoadPattern::RampUp, 3, 20)).unwrap();
        assert_eq!(targets(&steps), vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 3]);
        // default ramp is half the duration
        assert_eq!(steps[9].at, Duration::from_millis(9000));
    }

    #[test]
    fn test_ramp_down_plan() {
        let steps = plan(&load(LoadPattern::RampDown, 10, 20)).unwrap();
        // 10 up steps plus 9 decrements (the last lands on the end)
        assert_eq!(steps.len(), 19);
        assert_eq!(steps[9].target, 10);
        assert_eq!(steps[10].at, Duration::from_secs(11));
        assert_eq!(steps[10].target, 9);
        assert_eq!(steps[18].target, 1);
    }

    #[test]
    fn test_step_plan() {
        let steps = plan(&load(LoadPattern::Step, 12, 50)).unwrap();
        assert_eq!(targets(&steps), vec![3, 5, 8, 10, 12]);
        assert_eq!(steps[4].at, Duration::from_secs(40));
    }

    #[test]
    fn test_spike_plan() {
        let steps = plan(&load(LoadPattern::Spike, 20, 60)).unwrap();
        assert_eq!(
            steps,
            vec![
                PlanStep::new(0, 2),
                PlanStep::new(21_000, 20),
                PlanStep::new(39_000, 2),
            ]
        );

        // Window is capped at 30s on long runs
        let steps = plan(&load(LoadPattern::Spike, 5, 600)).unwrap();
        assert_eq!(steps[0].target, 1);
        assert_eq!(steps[2].at - steps[1].at, Duration::from_secs(30));
    }

    #[test]
    fn test_custom_plan_clamps_and_truncates() {
        let mut config = load(LoadPattern::Custom, 4, 25);
        config.steps = Some(vec![
            CustomStep {
                target_users: 2,
                duration_seconds: 10,
            },
            CustomStep {
                target_users: 9,
                duration_seconds: 10,
            },
            CustomStep {
                target_users: 1,
                duration_seconds: 10,
            },
            CustomStep {
                target_users: 3,
                duration_seconds: 10,
            },
        ]);

        let steps = plan(&config).unwrap();
        assert_eq!(targets(&steps), vec![2, 4, 1]);
    }

    #[test]
    fn test_custom_without_steps_is_pattern_error() {
        let err = plan(&load(LoadPattern::Custom, 4, 10)).unwrap_err();
        assert!(matches!(err, StampedeError::Pattern(_)));

        let mut config = load(LoadPattern::Custom, 4, 10);
        config.steps = Some(Vec::new());
        assert!(plan(&config).is_err());
    }

    #[test]
    fn test_oversized_timeline_is_pattern_error() {
        for pattern in [LoadPattern::Spike, LoadPattern::Step, LoadPattern::Constant] {
            let err = plan(&load(pattern, 5, u64::MAX / 100)).unwrap_err();
            assert!(matches!(err, StampedeError::Pattern(_)), "{pattern}");
        }

        let mut config = load(LoadPattern::RampUp, 5, 60);
        config.ramp_up_time = Some(u64::MAX);
        assert!(matches!(plan(&config), Err(StampedeError::Pattern(_))));

        let mut config = load(LoadPattern::Custom, 5, 60);
        config.steps = Some(vec![
            CustomStep {
                target_users: 1,
                duration_seconds: 30,
            },
            CustomStep {
                target_users: 2,
                duration_seconds: u64::MAX / 10,
            },
        ]);
        assert!(matches!(plan(&config), Err(StampedeError::Pattern(_))));

        let longest = load(LoadPattern::Spike, 5, LoadConfig::MAX_DURATION_SECS);
        assert_eq!(plan(&longest).unwrap().len(), 3);
    }

    #[test]
    fn test_targets_never_exceed_users() {
        for pattern in [
            LoadPattern::Constant,
            LoadPattern::RampUp,
            LoadPattern::RampDown,
            LoadPattern::Step,
            LoadPattern::Spike,
        ] {
            for users in [1, 3, 7, 100] {
                let steps = plan(&load(pattern, users, 37)).unwrap();
                assert!(!steps.is_empty());
                assert!(steps.iter().all(|s| s.target <= users), "{pattern}");
                assert!(steps.iter().all(|s| s.at < Duration::from_secs(37)));
            }
        }
    }
}
