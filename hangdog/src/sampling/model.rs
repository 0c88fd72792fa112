//! Bounded circular history of sampling records
//!
//! The model is the single source of truth every consumer queries. Only the
//! pipeline thread writes (start/end markers, stack attachment from the
//! capture worker goes through the same lock); the watchdog, the capture
//! worker and the controller read under the shared lock.
//!
//! ## Slot layout
//!
//! Record with sequence index `n` lives in slot `n % capacity`. A slot is
//! only trusted if the record in it carries the sequence index the walk
//! expects, so stale occupants are never returned.

use hangdog_common::Marker;
use log::debug;
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread::ThreadId;

use super::record::{SamplingRecord, SamplingStatus, TaskRecord};
use crate::domain::{PipelineIdentity, Timestamp};

pub struct SamplingModel {
    identity: Arc<PipelineIdentity>,
    capacity: usize,
    state: RwLock<ModelState>,
}

struct ModelState {
    slots: Vec<Option<SamplingRecord>>,
    current_index: u64,
    next_id: u64,
}

impl ModelState {
    fn slot_of(&self, sequence_index: u64) -> usize {
        // capacity fits in usize, so the remainder does too
        usize::try_from(sequence_index % self.slots.len() as u64).unwrap_or(0)
    }

    fn get(&self, sequence_index: u64) -> Option<&SamplingRecord> {
        self.slots[self.slot_of(sequence_index)]
            .as_ref()
            .filter(|r| r.sequence_index() == sequence_index)
    }

    fn get_mut(&mut self, sequence_index: u64) -> Option<&mut SamplingRecord> {
        let slot = self.slot_of(sequence_index);
        self.slots[slot]
            .as_mut()
            .filter(|r| r.sequence_index() == sequence_index)
    }

    /// Index of the in-flight record, or the one that just finished
    fn current_sequence(&self) -> Option<u64> {
        if self.get(self.current_index).is_some() {
            return Some(self.current_index);
        }
        let previous = self.current_index.checked_sub(1)?;
        self.get(previous).map(|_| previous)
    }
}

impl SamplingModel {
    /// Create a model holding at most `capacity` records (minimum 1).
    #[must_use]
    pub fn new(capacity: usize, identity: Arc<PipelineIdentity>) -> Self {
        let capacity = capacity.max(1);
        Self {
            identity,
            capacity,
            state: RwLock::new(ModelState {
                slots: vec![None; capacity],
                current_index: 0,
                next_id: 1,
            }),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Feed one raw marker into the history.
    ///
    /// Returns a copy of the record the marker started or finished, or `None`
    /// when the producer is not the pipeline, the string is not a marker, or
    /// an end marker does not match the in-flight record.
    pub fn handle_task_event(&self, task: &TaskRecord, producer: ThreadId) -> Option<SamplingRecord> {
        if !self.identity.is(producer) {
            debug!("Rejected task event from foreign thread {producer:?}");
            return None;
        }

        match Marker::parse(task.content())? {
            Marker::Dispatch(content) => Some(self.on_start(content, task.enqueued_at())),
            Marker::Finish(payload) => self.on_finish(payload, task.enqueued_at()),
        }
    }

    fn on_start(&self, content: &str, at: Timestamp) -> SamplingRecord {
        let mut state = self.state.write();
        let id = state.next_id;
        state.next_id += 1;
        let index = state.current_index;
        let slot = state.slot_of(index);

        let entry = &mut state.slots[slot];
        if let Some(record) = entry {
            record.restart(id, index, content, at);
            record.clone()
        } else {
            let record = SamplingRecord::started(id, index, content, at);
            *entry = Some(record.clone());
            record
        }
    }

    fn on_finish(&self, payload: &str, at: Timestamp) -> Option<SamplingRecord> {
        let mut state = self.state.write();
        let index = state.current_index;

        let Some(record) = state.get_mut(index) else {
            debug!("Discarded end marker with no open record: {payload}");
            return None;
        };
        if record.status() != SamplingStatus::Started || !record.content().contains(payload) {
            debug!(
                "Discarded end marker {payload:?}, in-flight record is {:?}",
                record.content()
            );
            return None;
        }

        record.finish(at);
        let finished = record.clone();
        state.current_index += 1;
        Some(finished)
    }

    /// The in-flight record, else the one that just finished.
    #[must_use]
    pub fn current_record(&self) -> Option<SamplingRecord> {
        let state = self.state.read();
        let index = state.current_sequence()?;
        state.get(index).cloned()
    }

    /// Recent records, most recent first, at most `capacity` of them.
    #[must_use]
    pub fn history_snapshot(&self) -> Vec<SamplingRecord> {
        let state = self.state.read();
        let mut out = Vec::with_capacity(self.capacity);
        let Some(mut index) = state.current_sequence() else {
            return out;
        };

        while out.len() < self.capacity {
            let Some(record) = state.get(index) else {
                break;
            };
            out.push(record.clone());
            match index.checked_sub(1) {
                Some(prev) => index = prev,
                None => break,
            }
        }
        out
    }

    /// Attach a stack to the current record.
    ///
    /// With `overwrite == false` an existing stack is kept. Returns the id of
    /// the record the stack landed on.
    pub fn attach_stack(&self, stack: String, overwrite: bool) -> Option<u64> {
        let mut state = self.state.write();
        let index = state.current_sequence()?;
        let record = state.get_mut(index)?;
        if !overwrite && record.stack().is_some() {
            return None;
        }
        debug!("Attached stack to record {} ({})", record.id(), record.content());
        record.set_stack(stack);
        Some(record.id())
    }

    /// Reset the index and empty every slot. Record ids keep counting.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.current_index = 0;
        state.slots.iter_mut().for_each(|slot| *slot = None);
    }
}
