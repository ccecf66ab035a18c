//! Parallel test executor.
//!
//! Architecture:
//! 1. One task per (battery entry, sequence), plus one entropy task
//! 2. A fixed pool of named worker threads pulls jobs from a shared queue
//! 3. Workers report `Started` / `Finished` events back to the scheduler
//! 4. In blocking mode a dependent is queued only after its dependencies passed
//! 5. The scheduler stops at completion, timeout or cancellation
//!
//! Panics inside a test are caught on the worker and recorded as errors. Workers
//! still busy when the run ends are detached and their results dropped.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rngaudit_tests::{StatisticalTest, Strategy, TestParams};
use serde::{Deserialize, Serialize};

use crate::battery::DependencyMode;
use crate::entropy::{EntropyReport, estimate_entropy};
use crate::error::ValidationError;
use crate::outcome::{TestOutcome, TestStatus};
use crate::source::BitBuffer;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Cloneable flag that cancels a running session.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Completed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    /// Returned an evaluation.
    Completed,
    /// Panicked.
    Failed,
    /// Returned an error, or was stopped by timeout or cancellation.
    Errored,
    /// Never ran because a blocking dependency did not pass.
    Skipped,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Plan
// ═══════════════════════════════════════════════════════════════════════════════

/// One battery entry, resolved against the test catalog.
#[derive(Clone)]
pub struct PlannedEntry {
    pub label: String,
    pub test: Arc<dyn StatisticalTest>,
    pub params: TestParams,
    /// Indices of the entries this one depends on.
    pub depends_on: Vec<usize>,
}

/// Everything the executor needs to run a battery over a sample.
#[derive(Clone)]
pub struct ExecutionPlan {
    pub entries: Vec<PlannedEntry>,
    pub sequences: usize,
    pub bits_per_sequence: usize,
    pub significance_level: f64,
    pub dependency_mode: DependencyMode,
    /// Forced strategy; `None` picks one per sample size.
    pub strategy: Option<Strategy>,
    /// Markov order for the entropy task, `None` to skip entropy estimation.
    pub entropy_markov_order: Option<usize>,
}

impl ExecutionPlan {
    fn task_count(&self) -> usize {
        self.entries.len() * self.sequences
    }

    fn task_index(&self, entry: usize, sequence: usize) -> usize {
        entry * self.sequences + sequence
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub workers: usize,
    pub timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timeout: None,
        }
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// One outcome per task, ordered by (entry, sequence).
    pub outcomes: Vec<TestOutcome>,
    pub states: Vec<TaskState>,
    pub entropy: Option<EntropyReport>,
    pub termination: Termination,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Workers
// ═══════════════════════════════════════════════════════════════════════════════

enum JobOutput {
    Test(TestOutcome),
    Entropy(EntropyReport),
}

type Job = Box<dyn FnOnce() -> JobOutput + Send>;

enum Event {
    Started(usize),
    Finished(usize, Result<JobOutput, String>),
}

fn spawn_worker(
    index: usize,
    jobs: Arc<Mutex<Receiver<(usize, Job)>>>,
    events: Sender<Event>,
) -> Result<JoinHandle<()>, ValidationError> {
    std::thread::Builder::new()
        .name(format!("rngaudit-worker-{index}"))
        .spawn(move || {
            loop {
                let next = {
                    let queue = jobs.lock().unwrap_or_else(|e| e.into_inner());
                    queue.recv()
                };
                let Ok((id, job)) = next else {
                    break;
                };
                if events.send(Event::Started(id)).is_err() {
                    break;
                }
                let result = catch_unwind(AssertUnwindSafe(job)).map_err(panic_message);
                if events.send(Event::Finished(id, result)).is_err() {
                    // scheduler gone: late result dropped
                    break;
                }
            }
        })
        .map_err(ValidationError::WorkerSpawn)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn test_job(plan: &ExecutionPlan, entry: usize, sequence: usize, sample: &Arc<BitBuffer>) -> Job {
    let planned = &plan.entries[entry];
    let test = Arc::clone(&planned.test);
    let params = planned.params.clone();
    let label = planned.label.clone();
    let sample = Arc::clone(sample);
    let strategy = plan.strategy;
    let alpha = plan.significance_level;
    let start = sequence * plan.bits_per_sequence;
    let end = start + plan.bits_per_sequence;
    Box::new(move || {
        let t0 = Instant::now();
        let mut bits = sample.sample(start, end);
        if let Some(strategy) = strategy {
            bits = bits.with_strategy(strategy);
        }
        let result = test.evaluate(&bits, &params);
        JobOutput::Test(TestOutcome::from_result(
            &label,
            test.id(),
            sequence,
            result,
            alpha,
            end - start,
            t0.elapsed(),
        ))
    })
}

fn entropy_job(sample: &Arc<BitBuffer>, markov_order: usize) -> Job {
    let sample = Arc::clone(sample);
    Box::new(move || {
        let bits = sample.sample(0, sample.len());
        JobOutput::Entropy(estimate_entropy(&bits, markov_order))
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Scheduler
// ═══════════════════════════════════════════════════════════════════════════════

struct Scheduler<'a> {
    plan: &'a ExecutionPlan,
    jobs: Vec<Option<Job>>,
    states: Vec<TaskState>,
    outcomes: Vec<Option<TestOutcome>>,
    /// Per task: task indices it waits on (blocking mode only).
    waits_on: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    entropy: Option<EntropyReport>,
    remaining: usize,
    queue: Sender<(usize, Job)>,
}

impl Scheduler<'_> {
    fn entropy_task(&self) -> Option<usize> {
        self.plan
            .entropy_markov_order
            .map(|_| self.plan.task_count())
    }

    fn dispatch(&mut self, id: usize) {
        let Some(job) = self.jobs[id].take() else {
            return;
        };
        if self.queue.send((id, job)).is_err() {
            self.states[id] = TaskState::Errored;
            self.record_missing(id, TestStatus::Error, "worker pool stopped");
        }
    }

    fn record_missing(&mut self, id: usize, status: TestStatus, message: &str) {
        self.remaining -= 1;
        if Some(id) == self.entropy_task() {
            return;
        }
        let entry = id / self.plan.sequences;
        let planned = &self.plan.entries[entry];
        self.outcomes[id] = Some(TestOutcome::without_result(
            &planned.label,
            planned.test.id(),
            id % self.plan.sequences,
            status,
            message,
        ));
    }

    fn finish(&mut self, id: usize, result: Result<JobOutput, String>) {
        if self.states[id].is_terminal() {
            return;
        }
        match result {
            Ok(JobOutput::Test(outcome)) => {
                log::debug!(
                    "{} seq {}: {} ({:.1} ms)",
                    outcome.entry,
                    outcome.sequence,
                    outcome.status,
                    outcome.duration_ms
                );
                self.states[id] = match outcome.status {
                    TestStatus::Passed | TestStatus::Failed => TaskState::Completed,
                    _ => TaskState::Errored,
                };
                self.outcomes[id] = Some(outcome);
                self.remaining -= 1;
            }
            Ok(JobOutput::Entropy(report)) => {
                self.states[id] = TaskState::Completed;
                self.entropy = Some(report);
                self.remaining -= 1;
            }
            Err(panic) => {
                log::warn!("task {id} panicked: {panic}");
                self.states[id] = TaskState::Failed;
                self.record_missing(id, TestStatus::Error, &format!("panicked: {panic}"));
            }
        }
        self.release_dependents(id);
    }

    /// Queue or skip dependents whose dependencies are now all resolved.
    fn release_dependents(&mut self, finished: usize) {
        let mut settled = vec![finished];
        while let Some(id) = settled.pop() {
            for j in self.dependents[id].clone() {
                if self.states[j] != TaskState::Pending || self.jobs[j].is_none() {
                    continue;
                }
                let deps = &self.waits_on[j];
                if !deps.iter().all(|&d| self.states[d].is_terminal()) {
                    continue;
                }
                let blocker = deps.iter().copied().find(|&d| {
                    self.outcomes[d]
                        .as_ref()
                        .is_none_or(|o| o.status != TestStatus::Passed)
                });
                match blocker {
                    None => self.dispatch(j),
                    Some(d) => {
                        let dep_label = self.plan.entries[d / self.plan.sequences].label.clone();
                        self.jobs[j] = None;
                        self.states[j] = TaskState::Skipped;
                        self.record_missing(
                            j,
                            TestStatus::Skipped,
                            &format!("dependency `{dep_label}` did not pass"),
                        );
                        settled.push(j);
                    }
                }
            }
        }
    }

    /// Resolve every non-terminal task as an error after timeout or cancellation.
    fn abandon(&mut self, message: &str) {
        for id in 0..self.states.len() {
            if !self.states[id].is_terminal() {
                self.states[id] = TaskState::Errored;
                self.jobs[id] = None;
                self.record_missing(id, TestStatus::Error, message);
            }
        }
    }
}

/// Run every task in `plan` over `sample` and block until the run ends.
pub fn execute(
    plan: &ExecutionPlan,
    sample: Arc<BitBuffer>,
    config: &ExecutorConfig,
    token: &CancellationToken,
) -> Result<ExecutionReport, ValidationError> {
    let test_tasks = plan.task_count();
    let total = test_tasks + usize::from(plan.entropy_markov_order.is_some());

    let mut jobs: Vec<Option<Job>> = Vec::with_capacity(total);
    let mut waits_on = vec![Vec::new(); total];
    let mut dependents = vec![Vec::new(); total];
    for (e, entry) in plan.entries.iter().enumerate() {
        for seq in 0..plan.sequences {
            let id = plan.task_index(e, seq);
            jobs.push(Some(test_job(plan, e, seq, &sample)));
            if plan.dependency_mode == DependencyMode::Blocking {
                for &d in &entry.depends_on {
                    let dep = plan.task_index(d, seq);
                    waits_on[id].push(dep);
                    dependents[dep].push(id);
                }
            }
        }
    }
    if let Some(order) = plan.entropy_markov_order {
        jobs.push(Some(entropy_job(&sample, order)));
    }

    let (job_tx, job_rx) = mpsc::channel::<(usize, Job)>();
    let (event_tx, event_rx) = mpsc::channel::<Event>();
    let job_rx = Arc::new(Mutex::new(job_rx));
    let workers = config.workers.clamp(1, total.max(1));
    let mut handles = Vec::with_capacity(workers);
    for i in 0..workers {
        handles.push(spawn_worker(i, Arc::clone(&job_rx), event_tx.clone())?);
    }
    drop(event_tx);

    let mut scheduler = Scheduler {
        plan,
        jobs,
        states: vec![TaskState::Pending; total],
        outcomes: vec![None; test_tasks],
        waits_on,
        dependents,
        entropy: None,
        remaining: total,
        queue: job_tx,
    };

    log::debug!("executing {total} tasks on {workers} workers");
    for id in 0..total {
        if scheduler.waits_on[id].is_empty() {
            scheduler.dispatch(id);
        }
    }

    // a timeout too large for the clock means no deadline
    let deadline = config.timeout.and_then(|t| Instant::now().checked_add(t));
    let mut termination = Termination::Completed;
    while scheduler.remaining > 0 {
        if token.is_cancelled() {
            termination = Termination::Cancelled;
            break;
        }
        let wait = match deadline {
            Some(d) => {
                let left = d.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    termination = Termination::TimedOut;
                    break;
                }
                left.min(POLL_INTERVAL)
            }
            None => POLL_INTERVAL,
        };
        match event_rx.recv_timeout(wait) {
            Ok(Event::Started(id)) => {
                if scheduler.states[id] == TaskState::Pending {
                    scheduler.states[id] = TaskState::Running;
                }
            }
            Ok(Event::Finished(id, result)) => scheduler.finish(id, result),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                log::warn!("all workers exited with {} tasks pending", scheduler.remaining);
                scheduler.abandon("worker pool stopped");
            }
        }
    }

    match termination {
        Termination::Completed => {}
        Termination::TimedOut => {
            log::warn!("execution timed out with {} tasks unfinished", scheduler.remaining);
            scheduler.abandon("execution timeout");
        }
        Termination::Cancelled => {
            log::warn!("execution cancelled with {} tasks unfinished", scheduler.remaining);
            scheduler.abandon("cancelled");
        }
    }

    let Scheduler {
        states,
        outcomes,
        entropy,
        queue,
        ..
    } = scheduler;
    drop(queue);
    if termination == Termination::Completed {
        for handle in handles {
            let _ = handle.join();
        }
    }

    let outcomes = outcomes
        .into_iter()
        .enumerate()
        .map(|(id, o)| {
            o.unwrap_or_else(|| {
                let entry = &plan.entries[id / plan.sequences];
                TestOutcome::without_result(
                    &entry.label,
                    entry.test.id(),
                    id % plan.sequences,
                    TestStatus::Error,
                    "no result",
                )
            })
        })
        .collect();

    Ok(ExecutionReport {
        outcomes,
        states,
        entropy,
        termination,
    })
}
