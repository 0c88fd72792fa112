//! Deadline-ordered queue of cancellable jobs
//!
//! Shared by the timer threads and the reference [`crate::host::Looper`].
//! Jobs with the same deadline run in insertion order (the token breaks the
//! tie), and any job can be removed by token before it runs.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

pub struct DelayQueue<J> {
    jobs: BTreeMap<(Instant, u64), J>,
    deadlines: HashMap<u64, Instant>,
}

impl<J> DelayQueue<J> {
    #[must_use]
    pub fn new() -> Self {
        Self { jobs: BTreeMap::new(), deadlines: HashMap::new() }
    }

    /// Insert `job` under `token`. Tokens must be unique while pending.
    pub fn insert(&mut self, token: u64, deadline: Instant, job: J) {
        if let Some(previous) = self.deadlines.insert(token, deadline) {
            self.jobs.remove(&(previous, token));
        }
        self.jobs.insert((deadline, token), job);
    }

    /// Remove a pending job. Returns `None` if it already ran or never existed.
    pub fn remove(&mut self, token: u64) -> Option<J> {
        let deadline = self.deadlines.remove(&token)?;
        self.jobs.remove(&(deadline, token))
    }

    /// Pop the earliest job whose deadline is at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(u64, J)> {
        let (&(deadline, token), _) = self.jobs.first_key_value()?;
        if deadline > now {
            return None;
        }
        self.deadlines.remove(&token);
        self.jobs.remove(&(deadline, token)).map(|job| (token, job))
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.jobs.keys().next().map(|&(deadline, _)| deadline)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
        self.deadlines.clear();
    }
}

impl<J> Default for DelayQueue<J> {
    fn default() -> Self {
        Self::new()
    }
}
