//! Process registry: which target processes exist and which tasks they own.
//!
//! Owned by the tick loop. Everything else sees it through a
//! [`RegistrySnapshot`] published on a watch channel.

use std::collections::BTreeMap;

use butler_core::{ButlerError, ProcessId, Result};
use serde::Serialize;

use crate::task::{Task, TaskId, TaskView};

/// A registered target process.
#[derive(Debug)]
pub struct Process {
    pub id: ProcessId,
    pub disconnected: bool,
    pub tasks: Vec<Task>,
}

impl Process {
    fn new(id: ProcessId, disconnected: bool) -> Self {
        Self {
            id,
            disconnected,
            tasks: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ProcessRegistry {
    processes: BTreeMap<ProcessId, Process>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a process. Returns false (and updates its flag) if it is already known.
    pub fn attach(&mut self, id: ProcessId, disconnected: bool) -> bool {
        match self.processes.get_mut(&id) {
            Some(p) => {
                p.disconnected = disconnected;
                false
            }
            None => {
                self.processes.insert(id, Process::new(id, disconnected));
                true
            }
        }
    }

    /// Unregister a process and hand back its tasks.
    pub fn detach(&mut self, id: ProcessId) -> Option<Process> {
        self.processes.remove(&id)
    }

    /// Returns whether the flag changed.
    pub fn set_disconnected(&mut self, id: ProcessId, disconnected: bool) -> Result<bool> {
        let process = self
            .processes
            .get_mut(&id)
            .ok_or(ButlerError::ProcessNotFound(id))?;
        let changed = process.disconnected != disconnected;
        process.disconnected = disconnected;
        Ok(changed)
    }

    pub fn add_task(&mut self, task: Task) -> Result<()> {
        let pid = task.process();
        let process = self
            .processes
            .get_mut(&pid)
            .ok_or(ButlerError::ProcessNotFound(pid))?;
        if process.tasks.iter().any(|t| *t == task) {
            return Err(ButlerError::DuplicateTask {
                process: pid,
                kind: task.kind().to_string(),
            });
        }
        process.tasks.push(task);
        Ok(())
    }

    pub fn remove_task(&mut self, id: TaskId) -> Option<Task> {
        for process in self.processes.values_mut() {
            if let Some(idx) = process.tasks.iter().position(|t| t.id() == id) {
                return Some(process.tasks.remove(idx));
            }
        }
        None
    }

    pub fn get(&self, id: ProcessId) -> Option<&Process> {
        self.processes.get(&id)
    }

    pub fn processes(&self) -> impl Iterator<Item = &Process> {
        self.processes.values()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            processes: self
                .processes
                .values()
                .map(|p| ProcessSnapshot {
                    id: p.id,
                    disconnected: p.disconnected,
                    tasks: p.tasks.clone(),
                })
                .collect(),
        }
    }
}

/// One process as of the last published snapshot. Task handles are live.
#[derive(Debug, Clone)]
pub struct ProcessSnapshot {
    pub id: ProcessId,
    pub disconnected: bool,
    pub tasks: Vec<Task>,
}

/// What the tick loop last published.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub processes: Vec<ProcessSnapshot>,
}

impl RegistrySnapshot {
    pub fn process(&self, id: ProcessId) -> Option<&ProcessSnapshot> {
        self.processes.iter().find(|p| p.id == id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.processes.iter().flat_map(|p| p.tasks.iter())
    }

    pub fn views(&self) -> Vec<ProcessView> {
        self.processes
            .iter()
            .map(|p| ProcessView {
                id: p.id,
                disconnected: p.disconnected,
                tasks: p.tasks.iter().map(Task::view).collect(),
            })
            .collect()
    }
}

/// Serializable copy of one process and its tasks.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessView {
    pub id: ProcessId,
    pub disconnected: bool,
    pub tasks: Vec<TaskView>,
}
