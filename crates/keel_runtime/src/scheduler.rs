//! Dependency-order scheduler for targets.
//!
//! Targets become ready once every dependency has completed. Ready targets
//! are handed out in the order they became ready, so a plan built in
//! declaration order runs in declaration order where dependencies allow.
//! Names compare case-insensitively.

use indexmap::{IndexMap, IndexSet};

/// What to run next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// Run this target next
    Run(String),
    /// Nothing is ready but some targets are still pending
    Wait,
    /// Every target has completed or failed
    Complete,
}

/// Scheduler errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    /// Adding the target would close a dependency cycle
    #[error("Dependency cycle through target '{target}'")]
    Cycle {
        /// Target being added
        target: String,
    },
    /// Target was already added
    #[error("Target '{target}' scheduled twice")]
    Duplicate {
        /// Target name
        target: String,
    },
}

/// Dependency-order scheduler
#[derive(Debug, Default)]
pub struct Scheduler {
    /// Declared name of every target, by key
    names: IndexMap<String, String>,
    /// Ready targets, in the order they became ready
    ready: IndexSet<String>,
    /// Completed targets
    completed: IndexSet<String>,
    /// Failed targets
    failed: IndexSet<String>,
    /// Target -> targets it depends on
    dependencies: IndexMap<String, IndexSet<String>>,
    /// Target -> targets that depend on it
    dependents: IndexMap<String, IndexSet<String>>,
}

fn key(name: &str) -> String {
    name.to_lowercase()
}

impl Scheduler {
    /// Create an empty scheduler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target with its dependencies
    ///
    /// # Errors
    ///
    /// Returns error if the target is already scheduled or the new edges
    /// close a cycle
    pub fn add_target<I, S>(&mut self, name: &str, depends: I) -> Result<(), ScheduleError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let id = key(name);
        if self.names.contains_key(&id) {
            return Err(ScheduleError::Duplicate {
                target: name.to_string(),
            });
        }

        let deps: IndexSet<String> = depends.into_iter().map(|d| key(d.as_ref())).collect();
        if deps.contains(&id) || deps.iter().any(|dep| self.depends_on(dep, &id)) {
            return Err(ScheduleError::Cycle {
                target: name.to_string(),
            });
        }

        for dep in &deps {
            self.dependents.entry(dep.clone()).or_default().insert(id.clone());
        }
        self.names.insert(id.clone(), name.to_string());
        self.dependencies.insert(id.clone(), deps);

        if self.is_ready(&id) {
            self.ready.insert(id);
        }
        Ok(())
    }

    /// Whether `a` depends on `b`, directly or transitively
    fn depends_on(&self, a: &str, b: &str) -> bool {
        let mut stack = vec![a];
        let mut seen = IndexSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(deps) = self.dependencies.get(current) {
                if deps.contains(b) {
                    return true;
                }
                stack.extend(deps.iter().map(String::as_str));
            }
        }
        false
    }

    fn is_ready(&self, id: &str) -> bool {
        self.dependencies
            .get(id)
            .is_some_and(|deps| deps.iter().all(|dep| self.completed.contains(dep)))
    }

    /// Next scheduling decision
    #[must_use]
    pub fn decide(&self) -> ScheduleDecision {
        if let Some(id) = self.ready.first() {
            ScheduleDecision::Run(self.names.get(id).cloned().unwrap_or_else(|| id.clone()))
        } else if self.completed.len() + self.failed.len() < self.names.len() {
            ScheduleDecision::Wait
        } else {
            ScheduleDecision::Complete
        }
    }

    /// Record a completed target; dependents whose dependencies are now all
    /// complete become ready
    pub fn mark_complete(&mut self, name: &str) {
        let id = key(name);
        self.ready.shift_remove(&id);
        self.completed.insert(id.clone());

        let newly_ready: Vec<String> = self
            .dependents
            .get(&id)
            .into_iter()
            .flatten()
            .filter(|dep| {
                self.is_ready(dep) && !self.completed.contains(*dep) && !self.failed.contains(*dep)
            })
            .cloned()
            .collect();
        self.ready.extend(newly_ready);
    }

    /// Record a failed target; its dependents never become ready
    pub fn mark_failed(&mut self, name: &str) {
        let id = key(name);
        self.ready.shift_remove(&id);
        self.failed.insert(id);
    }

    /// Declared names of targets that neither completed nor failed
    #[must_use]
    pub fn pending(&self) -> Vec<String> {
        self.names
            .iter()
            .filter(|(id, _)| !self.completed.contains(*id) && !self.failed.contains(*id))
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Whether a target is scheduled
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(&key(name))
    }

    /// Number of scheduled targets
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether nothing is scheduled
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Number of ready targets
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Number of completed targets
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Whether any target failed
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Whether every target completed or failed
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed.len() + self.failed.len() == self.names.len()
    }
}
