//! Ordered execution of steps over one shared mutable context.
//!
//! Steps run one after another in an explicit loop. A step returns [`Flow::Halt`] to
//! skip everything after it; an error stops the pipeline immediately and nothing that
//! already ran is rolled back.

use super::error::EngineError;
use super::progress::{Progress, ProgressReporter};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt,
}

pub trait Step<C> {
    fn name(&self) -> &str;

    fn run(&mut self, ctx: &mut C) -> Result<Flow, EngineError>;
}

/// A named closure usable as a [`Step`].
pub struct FnStep<F> {
    name: String,
    f: F,
}

impl<F> FnStep<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<C, F> Step<C> for FnStep<F>
where
    F: FnMut(&mut C) -> Result<Flow, EngineError>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &mut C) -> Result<Flow, EngineError> {
        (self.f)(ctx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed { executed: usize },
    /// `at` is the position of the halting step, which itself ran.
    Halted { at: usize, step: String },
}

impl PipelineOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, PipelineOutcome::Completed { .. })
    }
}

pub struct Pipeline<'s, C> {
    steps: Vec<Box<dyn Step<C> + 's>>,
}

impl<'s, C> Default for Pipeline<'s, C> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<'s, C> Pipeline<'s, C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: impl Step<C> + 's) {
        self.steps.push(Box::new(step));
    }

    pub fn then(mut self, step: impl Step<C> + 's) -> Self {
        self.push(step);
        self
    }

    pub fn then_fn<F>(self, name: &str, f: F) -> Self
    where
        F: FnMut(&mut C) -> Result<Flow, EngineError> + 's,
    {
        self.then(FnStep::new(name, f))
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn run(
        &mut self,
        ctx: &mut C,
        reporter: &ProgressReporter,
    ) -> Result<PipelineOutcome, EngineError> {
        reporter.report(Progress::TaskStart {
            total_steps: self.steps.len() as u64,
        });

        let mut position = 0;
        while position < self.steps.len() {
            let step = &mut self.steps[position];
            trace!("Running step {} ({})", position, step.name());
            let flow = step.run(ctx)?;
            reporter.report(Progress::TaskIncrement);

            if flow == Flow::Halt {
                debug!("Step '{}' halted the pipeline", step.name());
                reporter.report(Progress::TaskFinish);
                return Ok(PipelineOutcome::Halted {
                    at: position,
                    step: step.name().to_string(),
                });
            }
            position += 1;
        }

        reporter.report(Progress::TaskFinish);
        Ok(PipelineOutcome::Completed { executed: position })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn record(
        label: &'static str,
    ) -> FnStep<impl FnMut(&mut Vec<&'static str>) -> Result<Flow, EngineError>> {
        FnStep::new(label, move |log: &mut Vec<&'static str>| {
            log.push(label);
            Ok(Flow::Continue)
        })
    }

    #[test]
    fn empty_pipeline_completes_without_running_anything() {
        let mut log: Vec<&'static str> = Vec::new();
        let outcome = Pipeline::new()
            .run(&mut log, &ProgressReporter::new())
            .unwrap();

        assert_eq!(outcome, PipelineOutcome::Completed { executed: 0 });
        assert!(log.is_empty());
    }

    #[test]
    fn steps_run_in_order() {
        let mut log = Vec::new();
        let outcome = Pipeline::new()
            .then(record("a"))
            .then(record("b"))
            .then(record("c"))
            .run(&mut log, &ProgressReporter::new())
            .unwrap();

        assert_eq!(log, vec!["a", "b", "c"]);
        assert_eq!(outcome, PipelineOutcome::Completed { executed: 3 });
    }

    #[test]
    fn halt_skips_the_remaining_steps() {
        let mut log = Vec::new();
        let outcome = Pipeline::new()
            .then(record("a"))
            .then_fn("stop", |log: &mut Vec<&'static str>| {
                log.push("stop");
                Ok(Flow::Halt)
            })
            .then(record("never"))
            .run(&mut log, &ProgressReporter::new())
            .unwrap();

        assert_eq!(log, vec!["a", "stop"]);
        assert_eq!(
            outcome,
            PipelineOutcome::Halted {
                at: 1,
                step: "stop".to_string()
            }
        );
        assert!(!outcome.is_completed());
    }

    #[test]
    fn errors_propagate_and_keep_earlier_mutations() {
        let mut log = Vec::new();
        let result = Pipeline::new()
            .then(record("a"))
            .then_fn("fail", |_: &mut Vec<&'static str>| {
                Err(EngineError::NotSelected("run"))
            })
            .then(record("never"))
            .run(&mut log, &ProgressReporter::new());

        assert!(matches!(result, Err(EngineError::NotSelected("run"))));
        assert_eq!(log, vec!["a"]);
    }

    #[test]
    fn long_pipelines_do_not_grow_the_stack() {
        let mut counter = 0usize;
        let mut pipeline = Pipeline::new();
        for _ in 0..100_000 {
            pipeline.push(FnStep::new("inc", |c: &mut usize| {
                *c += 1;
                Ok(Flow::Continue)
            }));
        }

        pipeline.run(&mut counter, &ProgressReporter::new()).unwrap();
        assert_eq!(counter, 100_000);
    }

    #[test]
    fn progress_counts_executed_steps() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let reporter = ProgressReporter::with_callback(Box::new(move |p: Progress| {
            sink.lock().unwrap().push(format!("{:?}", p));
        }));

        let mut log = Vec::new();
        Pipeline::new()
            .then(record("a"))
            .then(record("b"))
            .run(&mut log, &reporter)
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                "TaskStart { total_steps: 2 }",
                "TaskIncrement",
                "TaskIncrement",
                "TaskFinish"
            ]
        );
    }
}
