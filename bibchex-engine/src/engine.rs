//! Three-phase consistency check executor
//!
//! 1. **Reset**: every Resettable plugin clears its accumulator
//! 2. **Collect**: `check()` for every enabled (plugin, entry) pair, all
//!    concurrently; the phase ends when the whole batch has finished
//! 3. **Reduce**: `complete()` once per GlobalReducer, in registration order
//!
//! Any plugin error aborts the run. A panic inside a plugin is caught and
//! reported as [`CheckError::PluginFailure`].

use crate::checks::{Capability, CheckPlugin, CheckRegistry, RunContext};
use crate::error::CheckError;
use crate::options::CheckOptions;
use crate::types::{Entry, Finding, Problem};
use crate::worker_pool::WorkerPool;
use futures::future::try_join_all;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Problems of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckResults {
    /// Ordered by (plugin registration order, entry order)
    pub problems: Vec<Problem>,
    /// Ordered by plugin registration order
    pub global_problems: Vec<Problem>,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Await a plugin call, turning a panic into a PluginFailure
async fn guarded<T>(plugin: &str, call: impl Future<Output = Result<T, CheckError>>) -> Result<T, CheckError> {
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(CheckError::plugin(
            plugin,
            format!("panicked: {}", panic_message(payload)),
        )),
    }
}

/// Executor over a [`CheckRegistry`]
pub struct ConsistencyEngine {
    registry: CheckRegistry,
}

impl ConsistencyEngine {
    pub fn new(registry: CheckRegistry) -> Self {
        Self { registry }
    }

    /// Context whose accumulator slots match this engine's registry
    pub fn context(&self, options: Arc<CheckOptions>, pool: WorkerPool, http: reqwest::Client) -> RunContext {
        RunContext::new(&self.registry, options, pool, http)
    }

    /// Run all three phases
    pub async fn run(&self, entries: &[Arc<Entry>], ctx: &RunContext) -> Result<CheckResults, CheckError> {
        let started = Instant::now();

        self.reset(ctx).await?;
        let problems = self.collect(entries, ctx).await?;
        let global_problems = self.reduce(ctx).await?;

        info!(
            entries = entries.len(),
            problems = problems.len(),
            global_problems = global_problems.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Consistency checks complete"
        );

        Ok(CheckResults {
            problems,
            global_problems,
        })
    }

    /// Phase 1: clear accumulated state
    pub async fn reset(&self, ctx: &RunContext) -> Result<(), CheckError> {
        for plugin in self.with_capability(Capability::Resettable) {
            guarded(plugin.name(), plugin.reset(ctx)).await?;
        }
        Ok(())
    }

    /// Phase 2: per-entry checks over the full cross-product
    pub async fn collect(&self, entries: &[Arc<Entry>], ctx: &RunContext) -> Result<Vec<Problem>, CheckError> {
        let mut calls = Vec::new();
        for plugin in self.with_capability(Capability::PerEntry) {
            for entry in entries {
                if !self.registry.is_enabled(plugin.as_ref(), entry, ctx.options())? {
                    continue;
                }
                calls.push(Self::check_one(plugin, entry, ctx));
            }
        }

        debug!(checks = calls.len(), "Running per-entry checks");
        let batches = try_join_all(calls).await?;
        Ok(batches.into_iter().flatten().collect())
    }

    /// Phase 3: document-wide reduction
    pub async fn reduce(&self, ctx: &RunContext) -> Result<Vec<Problem>, CheckError> {
        let mut problems = Vec::new();
        for plugin in self.with_capability(Capability::GlobalReducer) {
            let findings = guarded(plugin.name(), plugin.complete(ctx)).await?;
            debug!(plugin = plugin.name(), findings = findings.len(), "Reducer complete");
            problems.extend(
                findings
                    .into_iter()
                    .map(|f| Problem::global(plugin.name(), f)),
            );
        }
        Ok(problems)
    }

    async fn check_one(
        plugin: &Arc<dyn CheckPlugin>,
        entry: &Entry,
        ctx: &RunContext,
    ) -> Result<Vec<Problem>, CheckError> {
        let findings: Vec<Finding> = guarded(plugin.name(), plugin.check(entry, ctx)).await?;
        Ok(findings
            .into_iter()
            .map(|f| Problem::for_entry(entry.id(), plugin.name(), f))
            .collect())
    }

    fn with_capability(&self, capability: Capability) -> impl Iterator<Item = &Arc<dyn CheckPlugin>> {
        self.registry.plugins().iter().filter(move |p| p.has(capability))
    }
}
