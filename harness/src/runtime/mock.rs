//! Mock runtime for testing.
//!
//! Records every call in order and serves canned exit codes, logs and
//! archives, so controller and cluster ordering can be asserted without a
//! Docker daemon.

use async_trait::async_trait;
use chrono::DateTime;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ContainerRuntime, LogStreams, NetworkHandle, RunTimes, UnitHandle, UnitSpec};
use crate::error::{HarnessError, Result};

/// A runtime call as recorded by [`MockRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `create_network(name)`
    CreateNetwork(String),
    /// `connect(network, unit)`
    Connect(String, String),
    /// `remove_network(name)`
    RemoveNetwork(String),
    /// `create(spec)`
    Create(UnitSpec),
    /// `start(unit)`
    Start(String),
    /// `wait(unit)`
    Wait(String),
    /// `stop(unit)`
    Stop(String),
    /// `remove(unit)`
    Remove(String),
    /// `logs(unit)`
    Logs(String),
    /// `copy_in(unit, path)`
    CopyIn(String, String),
    /// `copy_out(unit, path)`
    CopyOut(String, String),
    /// `commit(unit, reference)`
    Commit(String, String),
}

/// Mock container runtime.
#[derive(Debug, Default)]
pub struct MockRuntime {
    inner: Arc<Mutex<MockRuntimeInner>>,
}

#[derive(Debug, Default)]
struct MockRuntimeInner {
    images: HashSet<String>,
    live_units: HashSet<String>,
    calls: Vec<MockCall>,
    exit_codes: HashMap<String, VecDeque<i64>>,
    stdout: HashMap<String, String>,
    stderr: HashMap<String, String>,
    archives: HashMap<(String, String), Vec<u8>>,
    copied_in: HashMap<String, Vec<u8>>,
    hanging: HashSet<String>,
    fail_remove: HashSet<String>,
    fail_stop: HashSet<String>,
    fail_create: HashSet<String>,
    fail_start: HashSet<String>,
    fail_copy_in: HashSet<String>,
}

impl MockRuntime {
    /// Create a new mock runtime with no images.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image reference as present.
    pub fn add_image(&self, image: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.images.insert(image.to_string());
    }

    /// Queue an exit code for the next `wait()` on the named unit.
    /// Units without a queued code exit with 0.
    pub fn queue_exit_code(&self, unit: &str, code: i64) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .exit_codes
            .entry(unit.to_string())
            .or_default()
            .push_back(code);
    }

    /// Set the stdout returned by `logs()` for the named unit.
    pub fn set_stdout(&self, unit: &str, output: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.stdout.insert(unit.to_string(), output.to_string());
    }

    /// Set the stderr returned by `logs()` for the named unit.
    pub fn set_stderr(&self, unit: &str, output: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.stderr.insert(unit.to_string(), output.to_string());
    }

    /// Set the archive returned by `copy_out()` for a unit path.
    pub fn set_archive(&self, unit: &str, path: &str, archive: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .archives
            .insert((unit.to_string(), path.to_string()), archive);
    }

    /// Make `wait()` on the named unit exceed any timeout.
    pub fn hang(&self, unit: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.hanging.insert(unit.to_string());
    }

    /// Make `remove()` of the named unit fail.
    pub fn fail_remove(&self, unit: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_remove.insert(unit.to_string());
    }

    /// Make `stop()` of the named unit fail.
    pub fn fail_stop(&self, unit: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_stop.insert(unit.to_string());
    }

    /// Make `create()` of the named unit fail.
    pub fn fail_create(&self, unit: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_create.insert(unit.to_string());
    }

    /// Make `start()` of the named unit fail.
    pub fn fail_start(&self, unit: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_start.insert(unit.to_string());
    }

    /// Make `copy_in()` into the named unit fail.
    pub fn fail_copy_in(&self, unit: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_copy_in.insert(unit.to_string());
    }

    /// All calls, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        let inner = self.inner.lock().unwrap();
        inner.calls.clone()
    }

    /// The last archive copied into the named unit.
    pub fn copied_in(&self, unit: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner.copied_in.get(unit).cloned()
    }

    /// Units created and not yet removed.
    pub fn live_units(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut units: Vec<String> = inner.live_units.iter().cloned().collect();
        units.sort();
        units
    }

    fn record(&self, call: MockCall) {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(call);
    }
}

impl Clone for MockRuntime {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.images.contains(image))
    }

    async fn create_network(&self, name: &str) -> Result<NetworkHandle> {
        self.record(MockCall::CreateNetwork(name.to_string()));
        Ok(NetworkHandle::new(name))
    }

    async fn connect(&self, network: &NetworkHandle, unit: &UnitHandle) -> Result<()> {
        self.record(MockCall::Connect(
            network.name().to_string(),
            unit.id().to_string(),
        ));
        Ok(())
    }

    async fn remove_network(&self, network: &NetworkHandle) -> Result<()> {
        self.record(MockCall::RemoveNetwork(network.name().to_string()));
        Ok(())
    }

    async fn create(&self, spec: &UnitSpec) -> Result<UnitHandle> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(MockCall::Create(spec.clone()));

        if inner.fail_create.contains(&spec.name) {
            return Err(HarnessError::Runtime(format!("cannot create {}", spec.name)));
        }
        if !inner.live_units.insert(spec.name.clone()) {
            return Err(HarnessError::Runtime(format!(
                "conflict: unit name {} already in use",
                spec.name
            )));
        }
        Ok(UnitHandle::new(spec.name.clone()))
    }

    async fn start(&self, unit: &UnitHandle) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(MockCall::Start(unit.id().to_string()));

        if inner.fail_start.contains(unit.id()) {
            return Err(HarnessError::Runtime(format!("cannot start {}", unit)));
        }
        Ok(())
    }

    async fn wait(&self, unit: &UnitHandle, timeout: Duration) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(MockCall::Wait(unit.id().to_string()));

        if inner.hanging.contains(unit.id()) {
            return Err(HarnessError::Timeout {
                unit: unit.id().to_string(),
                secs: timeout.as_secs(),
            });
        }
        let code = inner
            .exit_codes
            .get_mut(unit.id())
            .and_then(|codes| codes.pop_front())
            .unwrap_or(0);
        Ok(code)
    }

    async fn stop(&self, unit: &UnitHandle, _timeout: Duration) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(MockCall::Stop(unit.id().to_string()));

        if inner.fail_stop.contains(unit.id()) {
            return Err(HarnessError::Runtime(format!("cannot stop {}", unit)));
        }
        Ok(())
    }

    async fn remove(&self, unit: &UnitHandle) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(MockCall::Remove(unit.id().to_string()));

        if inner.fail_remove.contains(unit.id()) {
            return Err(HarnessError::Runtime(format!("cannot remove {}", unit)));
        }
        inner.live_units.remove(unit.id());
        Ok(())
    }

    async fn logs(&self, unit: &UnitHandle, streams: LogStreams) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(MockCall::Logs(unit.id().to_string()));

        let mut output = String::new();
        if streams.stdout {
            if let Some(out) = inner.stdout.get(unit.id()) {
                output.push_str(out);
            }
        }
        if streams.stderr {
            if let Some(err) = inner.stderr.get(unit.id()) {
                output.push_str(err);
            }
        }
        Ok(output)
    }

    async fn copy_in(&self, unit: &UnitHandle, path: &str, archive: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(MockCall::CopyIn(unit.id().to_string(), path.to_string()));

        if inner.fail_copy_in.contains(unit.id()) {
            return Err(HarnessError::Runtime(format!("cannot copy into {}", unit)));
        }
        inner.copied_in.insert(unit.id().to_string(), archive);
        Ok(())
    }

    async fn copy_out(&self, unit: &UnitHandle, path: &str) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(MockCall::CopyOut(unit.id().to_string(), path.to_string()));

        inner
            .archives
            .get(&(unit.id().to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| HarnessError::Runtime(format!("{}:{} does not exist", unit, path)))
    }

    async fn commit(&self, unit: &UnitHandle, repo: &str, tag: &str) -> Result<String> {
        let reference = format!("{}:{}", repo, tag);
        self.record(MockCall::Commit(unit.id().to_string(), reference.clone()));
        Ok(reference)
    }

    async fn run_times(&self, _unit: &UnitHandle) -> Result<RunTimes> {
        let started_at = DateTime::parse_from_rfc3339("2026-01-15T10:00:00Z")
            .map_err(|e| HarnessError::Runtime(e.to_string()))?;
        let finished_at = DateTime::parse_from_rfc3339("2026-01-15T10:00:42Z")
            .map_err(|e| HarnessError::Runtime(e.to_string()))?;
        Ok(RunTimes {
            started_at,
            finished_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> UnitSpec {
        UnitSpec {
            image: "img:1".into(),
            entrypoint: vec!["true".into()],
            name: name.into(),
            env: vec![],
        }
    }

    #[tokio::test]
    async fn duplicate_unit_names_conflict() {
        let runtime = MockRuntime::new();
        runtime.create(&spec("NodeA")).await.unwrap();
        assert!(runtime.create(&spec("NodeA")).await.is_err());
    }

    #[tokio::test]
    async fn removed_unit_name_can_be_reused() {
        let runtime = MockRuntime::new();
        let unit = runtime.create(&spec("client1")).await.unwrap();
        runtime.remove(&unit).await.unwrap();
        assert!(runtime.live_units().is_empty());
        runtime.create(&spec("client1")).await.unwrap();
    }

    #[tokio::test]
    async fn exit_codes_are_served_in_order() {
        let runtime = MockRuntime::new();
        runtime.queue_exit_code("client1", 3);
        let unit = UnitHandle::new("client1");
        let timeout = Duration::from_secs(1);

        assert_eq!(runtime.wait(&unit, timeout).await.unwrap(), 3);
        assert_eq!(runtime.wait(&unit, timeout).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn logs_respect_requested_streams() {
        let runtime = MockRuntime::new();
        runtime.set_stdout("client1", "out\n");
        runtime.set_stderr("client1", "err\n");
        let unit = UnitHandle::new("client1");

        assert_eq!(runtime.logs(&unit, LogStreams::STDOUT).await.unwrap(), "out\n");
        assert_eq!(runtime.logs(&unit, LogStreams::ALL).await.unwrap(), "out\nerr\n");
    }

    #[tokio::test]
    async fn failure_knobs_are_per_unit() {
        let runtime = MockRuntime::new();
        runtime.fail_create("client1");
        runtime.fail_start("NodeA");
        runtime.fail_copy_in("NodeA");

        assert!(runtime.create(&spec("client1")).await.is_err());
        assert!(runtime.live_units().is_empty());

        let unit = runtime.create(&spec("NodeA")).await.unwrap();
        assert!(runtime.start(&unit).await.is_err());
        assert!(runtime.copy_in(&unit, "/", vec![]).await.is_err());
        assert_eq!(runtime.copied_in("NodeA"), None);
        runtime.start(&UnitHandle::new("client2")).await.unwrap();
    }

    #[tokio::test]
    async fn clone_shares_journal() {
        let runtime = MockRuntime::new();
        let clone = runtime.clone();
        clone.start(&UnitHandle::new("NodeA")).await.unwrap();
        assert_eq!(runtime.calls(), vec![MockCall::Start("NodeA".into())]);
    }
}
