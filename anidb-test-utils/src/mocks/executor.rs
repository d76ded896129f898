//! Command executor double recording what the processors run

use anidb_queue_core::error::InternalError;
use anidb_queue_core::{CommandExecutor, CommandOutcome, CommandRequest, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// One scripted execution result
#[derive(Debug, Clone)]
pub enum ExecutorStep {
    Outcome(CommandOutcome),
    Panic(String),
    /// Fail like a broken command store
    StoreError,
}

impl From<CommandOutcome> for ExecutorStep {
    fn from(outcome: CommandOutcome) -> Self {
        Self::Outcome(outcome)
    }
}

/// One recorded execution
#[derive(Debug, Clone)]
pub struct Execution {
    pub identity: String,
    pub attempt_count: u32,
    pub at: Instant,
}

#[derive(Default)]
struct State {
    scripts: HashMap<String, VecDeque<ExecutorStep>>,
    executions: Vec<Execution>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Executor that completes everything unless told otherwise
///
/// Steps are scripted per command identity and consumed in order; once a
/// script runs out the command completes.
#[derive(Default)]
pub struct RecordingExecutor {
    state: Mutex<State>,
    delay: Duration,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every execution for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn script(&self, identity: &str, steps: impl IntoIterator<Item = ExecutorStep>) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .entry(identity.to_string())
            .or_default()
            .extend(steps);
    }

    pub fn executions(&self) -> Vec<Execution> {
        self.state.lock().unwrap().executions.clone()
    }

    /// Identities in execution order
    pub fn executed(&self) -> Vec<String> {
        self.executions().into_iter().map(|e| e.identity).collect()
    }

    pub fn count(&self, identity: &str) -> usize {
        self.executions()
            .iter()
            .filter(|e| e.identity == identity)
            .count()
    }

    /// Highest number of commands that ran at the same time
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, request: &CommandRequest) -> Result<CommandOutcome> {
        let step = {
            let mut state = self.state.lock().unwrap();
            state.executions.push(Execution {
                identity: request.identity.clone(),
                attempt_count: request.attempt_count,
                at: Instant::now(),
            });
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state
                .scripts
                .get_mut(&request.identity)
                .and_then(VecDeque::pop_front)
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.state.lock().unwrap().in_flight -= 1;

        match step {
            None => Ok(CommandOutcome::Completed),
            Some(ExecutorStep::Outcome(outcome)) => Ok(outcome),
            Some(ExecutorStep::Panic(message)) => panic!("{message}"),
            Some(ExecutorStep::StoreError) => {
                Err(InternalError::database("injected store failure").into())
            }
        }
    }
}
