//! Scripted in-memory stand-ins for the virtualization host
//!
//! Tests drive orchestration logic against a `ScriptedRemote` that replays
//! canned command output and records every side-effecting call. Captured
//! replies are queued per command; the last queued reply repeats so a probe
//! sequence can settle into a steady state.

use crate::domain::ports::{InstanceInfo, InstanceProvider, NodeSpec, RemoteExecutor};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

fn command_key(node: &str, argv: &[&str]) -> String {
    format!("{}: {}", node, argv.join(" "))
}

#[derive(Default)]
struct Script {
    captured: HashMap<String, VecDeque<Option<String>>>,
    failing_commands: HashSet<String>,
    executed: Vec<String>,
    queried: Vec<String>,
    instances: Vec<InstanceInfo>,
    failing_launches: HashSet<String>,
    launched: Vec<String>,
    removed: Vec<String>,
}

/// Scripted remote implementing both host ports
#[derive(Default)]
pub struct ScriptedRemote {
    script: Mutex<Script>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a captured reply for a command
    ///
    /// Replies are consumed in order; the final one repeats indefinitely.
    /// Commands with no stubbed reply return `None`, the absent marker.
    pub fn stub_captured(&self, node: &str, argv: &[&str], reply: Option<&str>) {
        self.script
            .lock()
            .captured
            .entry(command_key(node, argv))
            .or_default()
            .push_back(reply.map(str::to_string));
    }

    /// Make a side-effecting command fail with a transport error
    pub fn fail_command(&self, node: &str, argv: &[&str]) {
        self.script
            .lock()
            .failing_commands
            .insert(command_key(node, argv));
    }

    /// Every side-effecting command attempted so far, in order
    pub fn executed(&self) -> Vec<String> {
        self.script.lock().executed.clone()
    }

    /// Count executed commands whose key contains `needle`
    pub fn executed_matching(&self, needle: &str) -> usize {
        self.script
            .lock()
            .executed
            .iter()
            .filter(|key| key.contains(needle))
            .count()
    }

    /// Every captured query attempted so far, in order
    pub fn queried(&self) -> Vec<String> {
        self.script.lock().queried.clone()
    }

    /// Count captured queries whose key contains `needle`
    pub fn queried_matching(&self, needle: &str) -> usize {
        self.script
            .lock()
            .queried
            .iter()
            .filter(|key| key.contains(needle))
            .count()
    }

    /// Seed a pre-existing instance
    pub fn add_instance(&self, name: &str, state: &str, ip: Option<&str>) {
        self.script.lock().instances.push(InstanceInfo {
            name: name.to_string(),
            state: state.to_string(),
            ipv4: ip.map(str::to_string).into_iter().collect(),
            release: String::new(),
        });
    }

    /// Make launching a named instance fail
    pub fn fail_launch(&self, name: &str) {
        self.script
            .lock()
            .failing_launches
            .insert(name.to_string());
    }

    /// Names actually launched (reuse of an existing instance not included)
    pub fn launches(&self) -> Vec<String> {
        self.script.lock().launched.clone()
    }

    /// Names removed via the provider
    pub fn removed(&self) -> Vec<String> {
        self.script.lock().removed.clone()
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedRemote {
    async fn execute(&self, node: &str, argv: &[&str], _timeout: Duration) -> Result<()> {
        let key = command_key(node, argv);
        let mut script = self.script.lock();
        script.executed.push(key.clone());
        if script.failing_commands.contains(&key) {
            return Err(Error::Transport {
                node: node.to_string(),
                detail: "scripted failure".into(),
            });
        }
        Ok(())
    }

    async fn execute_captured(
        &self,
        node: &str,
        argv: &[&str],
        _timeout: Duration,
    ) -> Option<String> {
        let key = command_key(node, argv);
        let mut script = self.script.lock();
        script.queried.push(key.clone());
        let queue = script.captured.get_mut(&key)?;
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap_or(None)
        }
    }
}

#[async_trait]
impl InstanceProvider for ScriptedRemote {
    async fn is_available(&self) -> bool {
        true
    }

    async fn launch(&self, spec: &NodeSpec) -> Result<()> {
        let mut script = self.script.lock();
        if script.instances.iter().any(|i| i.name == spec.name) {
            return Ok(());
        }
        script.launched.push(spec.name.clone());
        if script.failing_launches.contains(&spec.name) {
            return Err(Error::LaunchFailed {
                name: spec.name.clone(),
                reason: "scripted failure".into(),
            });
        }
        let host = script.instances.len() + 2;
        script.instances.push(InstanceInfo {
            name: spec.name.clone(),
            state: "Running".into(),
            ipv4: vec![format!("10.64.104.{}", host)],
            release: spec.image.clone(),
        });
        Ok(())
    }

    async fn instances(&self) -> Result<Vec<InstanceInfo>> {
        Ok(self.script.lock().instances.clone())
    }

    async fn instance_ip(&self, name: &str) -> Option<String> {
        self.script
            .lock()
            .instances
            .iter()
            .find(|i| i.name == name)
            .and_then(|i| i.ipv4.first().cloned())
    }

    async fn remove_instances(&self, names: &[String]) -> Result<()> {
        let mut script = self.script.lock();
        script.instances.retain(|i| !names.contains(&i.name));
        script.removed.extend(names.iter().cloned());
        Ok(())
    }
}
