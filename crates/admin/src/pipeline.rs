//! Report pipeline runner
//!
//! A pipeline is an ordered list of named steps. Each step reads aggregates
//! through the [`PipelineContext`] and writes into one accumulator owned by
//! the caller. Steps run strictly in order; the first error aborts the run
//! and nothing is retried.

use crate::stats::StatsSource;
use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use medesk_common::{metrics, Result};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{error, info};

/// Read-only inputs shared by every step of a run
pub struct PipelineContext<'s> {
    pub source: &'s dyn StatsSource,

    /// Reference instant; ages, windows and file names derive from it
    pub now: DateTime<Utc>,

    /// Length of each trend window
    pub trend_window: Duration,
}

impl<'s> PipelineContext<'s> {
    pub fn new(source: &'s dyn StatsSource, now: DateTime<Utc>, trend_window_days: i64) -> Self {
        Self {
            source,
            now,
            trend_window: Duration::days(trend_window_days.max(1)),
        }
    }
}

/// Step body: borrows the context and the accumulator for one await chain
pub type StepFn<'s, A> =
    for<'a> fn(&'a PipelineContext<'s>, &'a mut A) -> BoxFuture<'a, Result<()>>;

/// One named pipeline step
pub struct Step<'s, A> {
    pub name: &'static str,
    pub run: StepFn<'s, A>,
}

impl<'s, A> Step<'s, A> {
    pub fn new(name: &'static str, run: StepFn<'s, A>) -> Self {
        Self { name, run }
    }
}

/// Wall time of a finished step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepTiming {
    pub step: String,
    pub duration_ms: u64,
}

/// Run `steps` in order against `acc`.
pub async fn run_steps<'s, A: Send>(
    pipeline: &str,
    ctx: &PipelineContext<'s>,
    acc: &mut A,
    steps: &[Step<'s, A>],
) -> Result<Vec<StepTiming>> {
    let started = Instant::now();
    let mut timings = Vec::with_capacity(steps.len());

    for step in steps {
        let step_started = Instant::now();

        if let Err(e) = (step.run)(ctx, acc).await {
            error!(pipeline, step = step.name, error = %e, "Pipeline step failed");
            metrics::record_pipeline_run(pipeline, false);
            return Err(e);
        }

        let elapsed = step_started.elapsed();
        metrics::record_pipeline_step(pipeline, step.name, elapsed.as_secs_f64());
        info!(pipeline, step = step.name, elapsed_ms = elapsed.as_millis() as u64, "Step complete");

        timings.push(StepTiming {
            step: step.name.to_string(),
            duration_ms: elapsed.as_millis() as u64,
        });
    }

    metrics::record_pipeline_run(pipeline, true);
    info!(pipeline, steps = steps.len(), elapsed_ms = started.elapsed().as_millis() as u64, "Pipeline complete");

    Ok(timings)
}
