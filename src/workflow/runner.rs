//! The step runner contract

use super::step::Step;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Performs the work behind a step.
///
/// Invoked concurrently for distinct steps of the same level. An `Err`
/// fails only that step.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, step: &Step) -> anyhow::Result<serde_json::Value>;
}

#[async_trait]
impl<R: StepRunner + ?Sized> StepRunner for Arc<R> {
    async fn run(&self, step: &Step) -> anyhow::Result<serde_json::Value> {
        (**self).run(step).await
    }
}

#[async_trait]
impl StepRunner for Box<dyn StepRunner> {
    async fn run(&self, step: &Step) -> anyhow::Result<serde_json::Value> {
        (**self).run(step).await
    }
}

/// Adapts an async closure into a [`StepRunner`]
pub struct FnRunner<F> {
    f: F,
}

impl<F, Fut> FnRunner<F>
where
    F: Fn(Step) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> StepRunner for FnRunner<F>
where
    F: Fn(Step) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    async fn run(&self, step: &Step) -> anyhow::Result<serde_json::Value> {
        (self.f)(step.clone()).await
    }
}

/// Shorthand for `Arc::new(FnRunner::new(f))`
pub fn runner_fn<F, Fut>(f: F) -> Arc<FnRunner<F>>
where
    F: Fn(Step) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    Arc::new(FnRunner::new(f))
}
