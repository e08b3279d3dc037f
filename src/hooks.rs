//! Per-iteration observation and cooperative termination.
//!
//! A [`Callback`] sees a snapshot of the solver state at the end of each
//! outer iteration; a [`Terminator`] may stop a long-running solve from
//! the outside. Terminators are handed the same [`IterationRecord`] as
//! callbacks, so stopping rules can key off solver progress (a stagnating
//! composite error) as well as wall-clock time or signals. Both hooks are
//! carried by [`SolverHooks`], which defaults to doing nothing.
//!
//! # Note
//! [`InterruptTerminator`] installs a global signal handler and **can only
//! be constructed once** per process. Attempting to create multiple
//! instances will panic.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::{E, Status};

/// Snapshot of one outer iteration, handed to callbacks and terminators.
#[derive(Debug, Clone, Copy, Default)]
pub struct IterationRecord {
    pub iteration: usize,
    pub mu: E,
    pub sigma: Option<E>,
    pub alpha_primal: E,
    pub alpha_dual: E,
    pub primal_objective: E,
    pub dual_objective: E,
    pub relative_gap: E,
    pub primal_residual: E,
    pub dual_residual: E,
    pub error: E,
}

/// Hook invoked once per solver iteration for logging or monitoring.
pub trait Callback {
    /// Called once before the first iteration.
    fn begin(&mut self) {}

    /// Called at the end of each iteration with the current snapshot.
    fn call(&mut self, record: &IterationRecord);
}

/// A callback that does nothing.
pub struct NoOpCallback {}

impl Callback for NoOpCallback {
    fn call(&mut self, _record: &IterationRecord) {}
}

/// Prints a convergence table to stdout each iteration.
pub struct ProgressOutput {}

impl Callback for ProgressOutput {
    fn begin(&mut self) {
        println!(
            "| {:>4} | {:>9} | {:>9} | {:>9} | {:>9} | {:>9} | {:>9} |",
            "it", "mu", "a_pri", "a_dual", "r_pri", "r_dual", "error"
        );
    }

    fn call(&mut self, record: &IterationRecord) {
        println!(
            "| {:4} | {:<9.2e} | {:<9.2e} | {:<9.2e} | {:<9.2e} | {:<9.2e} | {:<9.2e} |",
            record.iteration,
            record.mu,
            record.alpha_primal,
            record.alpha_dual,
            record.primal_residual,
            record.dual_residual,
            record.error,
        );
    }
}

/// External stopping condition, polled once per outer iteration with the
/// current iteration snapshot.
pub trait Terminator {
    /// Called once before the first iteration.
    fn initialize(&mut self) {}

    /// Returns the status to stop with, or `None` to keep iterating.
    fn terminate(&mut self, record: &IterationRecord) -> Option<Status>;
}

/// Stops the solve on Ctrl-C (SIGINT) or a programmatic interrupt.
///
/// # Note
/// Only one instance can be constructed per process, as it installs a
/// global signal handler. Creating more than one will panic.
pub struct InterruptTerminator {
    interrupted: Arc<AtomicBool>,
}

impl InterruptTerminator {
    pub fn new() -> Self {
        let interrupted = Arc::new(AtomicBool::new(false));
        ctrlc::set_handler({
            let interrupted = interrupted.clone();
            // The handler only raises a flag that the driver polls between
            // iterations, so relaxed ordering is enough.
            move || interrupted.store(true, Ordering::Relaxed)
        })
        .expect("Error setting Ctrl-C handler");
        Self { interrupted }
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Relaxed);
    }
}

impl Terminator for InterruptTerminator {
    fn terminate(&mut self, _record: &IterationRecord) -> Option<Status> {
        self.interrupted
            .load(Ordering::Relaxed)
            .then_some(Status::Interrupted)
    }
}

/// Stops the solve once a wall-clock deadline passes.
///
/// Outer iterations usually take well under a second, so the budget is a
/// [`Duration`] rather than whole seconds. `initialize` re-arms the
/// deadline, letting one hook set serve several solves.
pub struct DeadlineTerminator {
    budget: Duration,
    deadline: Option<Instant>,
}

impl DeadlineTerminator {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            deadline: None,
        }
    }
}

impl Terminator for DeadlineTerminator {
    fn initialize(&mut self) {
        self.deadline = Some(Instant::now() + self.budget);
    }

    fn terminate(&mut self, _record: &IterationRecord) -> Option<Status> {
        let deadline = *self
            .deadline
            .get_or_insert_with(|| Instant::now() + self.budget);
        (Instant::now() >= deadline).then_some(Status::TimeLimit)
    }
}

/// Stops the solve once the composite error has gone a full window of
/// iterations without improving.
///
/// Central-path iterations normally cut the composite error by an order
/// of magnitude every few steps; a flat stretch means the step lengths
/// have collapsed and further factorizations are wasted work.
pub struct StagnationTerminator {
    window: usize,
    best_error: E,
    flat_iterations: usize,
}

impl StagnationTerminator {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            best_error: E::INFINITY,
            flat_iterations: 0,
        }
    }
}

impl Terminator for StagnationTerminator {
    fn initialize(&mut self) {
        self.best_error = E::INFINITY;
        self.flat_iterations = 0;
    }

    fn terminate(&mut self, record: &IterationRecord) -> Option<Status> {
        if record.error < self.best_error {
            self.best_error = record.error;
            self.flat_iterations = 0;
            return None;
        }
        self.flat_iterations += 1;
        (self.flat_iterations >= self.window).then_some(Status::Stalled)
    }
}

/// Terminators compose by collection; the first that triggers wins.
impl Terminator for Vec<Box<dyn Terminator>> {
    fn initialize(&mut self) {
        for terminator in self.iter_mut() {
            terminator.initialize();
        }
    }

    fn terminate(&mut self, record: &IterationRecord) -> Option<Status> {
        self.iter_mut()
            .find_map(|terminator| terminator.terminate(record))
    }
}

/// Observation and termination hooks carried through a solve.
pub struct SolverHooks {
    pub callback: Box<dyn Callback>,
    pub terminator: Box<dyn Terminator>,
}

impl Default for SolverHooks {
    fn default() -> Self {
        Self {
            callback: Box::new(NoOpCallback {}),
            terminator: Box::new(Vec::<Box<dyn Terminator>>::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_error(error: E) -> IterationRecord {
        IterationRecord {
            error,
            ..IterationRecord::default()
        }
    }

    #[test]
    fn test_deadline_terminator() {
        let mut terminator = DeadlineTerminator::new(Duration::ZERO);
        terminator.initialize();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(
            terminator.terminate(&record_with_error(1.0)),
            Some(Status::TimeLimit)
        );
    }

    #[test]
    fn test_empty_terminator_collection_never_fires() {
        let mut terminators: Vec<Box<dyn Terminator>> = Vec::new();
        assert_eq!(terminators.terminate(&record_with_error(1.0)), None);
    }

    #[test]
    fn test_interrupt_terminator_programmatic() {
        let mut terminator = InterruptTerminator::new();
        assert_eq!(terminator.terminate(&record_with_error(1.0)), None);
        terminator.interrupt();
        assert_eq!(
            terminator.terminate(&record_with_error(1.0)),
            Some(Status::Interrupted)
        );
    }

    #[test]
    fn test_stagnation_terminator_waits_for_a_flat_window() {
        let mut terminator = StagnationTerminator::new(2);
        terminator.initialize();
        assert_eq!(terminator.terminate(&record_with_error(1.0)), None);
        assert_eq!(terminator.terminate(&record_with_error(0.5)), None);
        assert_eq!(terminator.terminate(&record_with_error(0.5)), None);
        assert_eq!(
            terminator.terminate(&record_with_error(0.5)),
            Some(Status::Stalled)
        );
        // A fresh improvement resets the window.
        assert_eq!(terminator.terminate(&record_with_error(0.1)), None);
    }
}
