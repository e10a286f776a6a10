use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::RemoteError;
use super::WatchService;
use crate::watch::CommandField;
use crate::watch::RawTelemetry;
use crate::watch::WatchId;

/// One scripted answer to `fetch_state`.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(Result<RawTelemetry, RemoteError>),
    /// Answers after a delay.
    Delayed(Duration, Result<RawTelemetry, RemoteError>),
    /// Never answers; exercises the request timeout.
    Hang,
}

/// Mock watch service for testing
///
/// Each watch has a queue of steps. The last step of a queue is sticky so a
/// single scripted reply answers every poll.
#[derive(Debug, Default)]
pub struct MockWatchService {
    fetches: Mutex<HashMap<WatchId, VecDeque<Step>>>,
    command_replies: Mutex<VecDeque<Result<(), RemoteError>>>,
    pub fetch_log: Mutex<Vec<WatchId>>,
    pub commands: Mutex<Vec<(WatchId, CommandField, bool)>>,
}

impl MockWatchService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, watch: &str, step: Step) {
        self.fetches
            .lock()
            .unwrap()
            .entry(WatchId::new(watch))
            .or_default()
            .push_back(step);
    }

    pub fn reply(&self, watch: &str, telemetry: RawTelemetry) {
        self.push(watch, Step::Reply(Ok(telemetry)));
    }

    pub fn fail(&self, watch: &str, err: RemoteError) {
        self.push(watch, Step::Reply(Err(err)));
    }

    /// Drop any queued steps for `watch` and answer with `step` from now on.
    pub fn set(&self, watch: &str, step: Step) {
        let mut fetches = self.fetches.lock().unwrap();
        let queue = fetches.entry(WatchId::new(watch)).or_default();
        queue.clear();
        queue.push_back(step);
    }

    pub fn reply_to_command(&self, result: Result<(), RemoteError>) {
        self.command_replies.lock().unwrap().push_back(result);
    }

    pub fn fetch_count(&self, watch: &str) -> usize {
        self.fetch_log
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == watch)
            .count()
    }

    fn next_step(&self, watch: &WatchId) -> Step {
        let mut fetches = self.fetches.lock().unwrap();
        match fetches.get_mut(watch) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Step::Reply(Err(RemoteError::UnknownWatch(watch.clone()))),
        }
    }
}

#[async_trait]
impl WatchService for MockWatchService {
    async fn fetch_state(&self, watch: &WatchId) -> Result<RawTelemetry, RemoteError> {
        self.fetch_log.lock().unwrap().push(watch.clone());
        match self.next_step(watch) {
            Step::Reply(result) => result,
            Step::Delayed(delay, result) => {
                tokio::time::sleep(delay).await;
                result
            }
            Step::Hang => std::future::pending().await,
        }
    }

    async fn send_command(
        &self,
        watch: &WatchId,
        field: CommandField,
        value: bool,
    ) -> Result<(), RemoteError> {
        self.commands
            .lock()
            .unwrap()
            .push((watch.clone(), field, value));
        self.command_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }
}
