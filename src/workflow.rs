use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;

/// Output of one finished step, kept in execution order.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub key: String,
    pub value: Value,
}

/// Shared state threaded through a workflow execution.
#[derive(Debug, Clone, Default)]
pub struct WorkflowContext {
    pub state: Map<String, Value>,
    pub outputs: Vec<StepOutput>,
}

impl WorkflowContext {
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.state.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Adds `by` to an integer counter, starting from zero.
    pub fn increment(&mut self, key: &str, by: u64) {
        let current = self.get(key).and_then(Value::as_u64).unwrap_or(0);
        self.insert(key, Value::from(current + by));
    }

    pub fn output(&self, key: &str) -> Option<&Value> {
        self.outputs.iter().find(|o| o.key == key).map(|o| &o.value)
    }
}

#[async_trait]
pub trait WorkflowTask: Send + Sync {
    fn key(&self) -> &str;
    async fn run(&self, ctx: &mut WorkflowContext) -> Result<Value>;
}

type TaskFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;

/// Wrap a plain async function as a workflow task.
pub struct FunctionTask<F>
where
    F: for<'a> Fn(&'a mut WorkflowContext) -> TaskFuture<'a> + Send + Sync,
{
    key: String,
    func: F,
}

impl<F> FunctionTask<F>
where
    F: for<'a> Fn(&'a mut WorkflowContext) -> TaskFuture<'a> + Send + Sync,
{
    pub fn new(key: impl Into<String>, func: F) -> Self {
        Self {
            key: key.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> WorkflowTask for FunctionTask<F>
where
    F: for<'a> Fn(&'a mut WorkflowContext) -> TaskFuture<'a> + Send + Sync,
{
    fn key(&self) -> &str {
        &self.key
    }

    async fn run(&self, ctx: &mut WorkflowContext) -> Result<Value> {
        (self.func)(ctx).await
    }
}

/// Notified around each step. Implementations must not block.
pub trait StepObserver: Send + Sync {
    fn step_started(&self, _index: usize, _total: usize, _key: &str) {}
    fn step_finished(&self, _index: usize, _total: usize, _key: &str, _output: &Value) {}
}

/// Observer that ignores every notification.
pub struct NoopObserver;

impl StepObserver for NoopObserver {}

/// A fixed, strictly ordered list of steps.
#[derive(Clone)]
pub struct Workflow {
    pub name: String,
    steps: Vec<Arc<dyn WorkflowTask>>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn then(mut self, task: Arc<dyn WorkflowTask>) -> Self {
        self.steps.push(task);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_keys(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.key()).collect()
    }

    /// Runs every step in order and returns the last step's output. The first
    /// failing step aborts the run.
    pub async fn run(&self, ctx: &mut WorkflowContext, observer: &dyn StepObserver) -> Result<Value> {
        let total = self.steps.len();
        let mut last = Value::Null;
        for (index, step) in self.steps.iter().enumerate() {
            observer.step_started(index, total, step.key());
            let value = step.run(ctx).await?;
            observer.step_finished(index, total, step.key(), &value);
            ctx.outputs.push(StepOutput {
                key: step.key().to_string(),
                value: value.clone(),
            });
            last = value;
        }
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MeetprepError;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl StepObserver for Recorder {
        fn step_started(&self, index: usize, total: usize, key: &str) {
            self.0.lock().unwrap().push(format!("start {key} {}/{total}", index + 1));
        }

        fn step_finished(&self, _index: usize, _total: usize, key: &str, _output: &Value) {
            self.0.lock().unwrap().push(format!("done {key}"));
        }
    }

    #[tokio::test]
    async fn runs_steps_in_order_and_shares_state() {
        let first = FunctionTask::new("a", |ctx: &mut WorkflowContext| {
            Box::pin(async move {
                ctx.increment("count", 1);
                Ok(json!("first"))
            })
        });
        let second = FunctionTask::new("b", |ctx: &mut WorkflowContext| {
            Box::pin(async move {
                let previous = ctx.output("a").cloned().unwrap_or(Value::Null);
                ctx.increment("count", 2);
                Ok(json!(format!("after {}", previous.as_str().unwrap_or("?"))))
            })
        });

        let flow = Workflow::new("demo").then(Arc::new(first)).then(Arc::new(second));
        let recorder = Recorder::default();
        let mut ctx = WorkflowContext::default();

        let result = flow.run(&mut ctx, &recorder).await.unwrap();

        assert_eq!(result, json!("after first"));
        assert_eq!(ctx.get("count"), Some(&json!(3)));
        assert_eq!(flow.step_keys(), vec!["a", "b"]);
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec!["start a 1/2", "done a", "start b 2/2", "done b"]
        );
    }

    #[tokio::test]
    async fn failing_step_stops_the_run() {
        let failing = FunctionTask::new("boom", |_ctx: &mut WorkflowContext| {
            Box::pin(async move { Err(MeetprepError::Protocol("boom".into())) })
        });
        let never = FunctionTask::new("never", |ctx: &mut WorkflowContext| {
            Box::pin(async move {
                ctx.insert("ran", json!(true));
                Ok(Value::Null)
            })
        });

        let flow = Workflow::new("fails").then(Arc::new(failing)).then(Arc::new(never));
        let mut ctx = WorkflowContext::default();

        assert!(flow.run(&mut ctx, &NoopObserver).await.is_err());
        assert!(ctx.get("ran").is_none());
        assert!(ctx.outputs.is_empty());
    }
}
