use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;

/// What a step asks the runner to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// End the pass cleanly without running later steps.
    Stop(String),
}

/// Result of a pass that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassResult {
    Completed,
    Stopped { step: &'static str, reason: String },
}

/// One named unit of convergence for an object of type `T`.
#[async_trait]
pub trait ReconcileStep<T: Send + Sync>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn reconcile(&self, obj: &T) -> anyhow::Result<Outcome>;
}

/// Stands in for a step whose feature is disabled.
pub struct Nop {
    name: &'static str,
}

impl Nop {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl<T: Send + Sync> ReconcileStep<T> for Nop {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn reconcile(&self, _obj: &T) -> anyhow::Result<Outcome> {
        Ok(Outcome::Continue)
    }
}

/// Ordered step list, assembled once and run for every pass.
pub struct Steps<T: Send + Sync> {
    steps: Vec<Box<dyn ReconcileStep<T>>>,
}

impl<T: Send + Sync> Default for Steps<T> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<T: Send + Sync> Steps<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, step: impl ReconcileStep<T> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn with_boxed(mut self, step: Box<dyn ReconcileStep<T>>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step in order. The first error or stop ends the pass.
    pub async fn run(&self, obj: &T) -> anyhow::Result<PassResult> {
        for step in &self.steps {
            let outcome = step
                .reconcile(obj)
                .await
                .with_context(|| format!("failed to reconcile {}", step.name()))?;
            if let Outcome::Stop(reason) = outcome {
                debug!("Stop signal from step {}: {}", step.name(), reason);
                return Ok(PassResult::Stopped {
                    step: step.name(),
                    reason,
                });
            }
        }
        Ok(PassResult::Completed)
    }
}
