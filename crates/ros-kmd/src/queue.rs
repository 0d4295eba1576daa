//! Bounded submission FIFO backed by a fixed arena of descriptors.
//!
//! Every slot is in exactly one place at a time: the free list, the pending queue, or in flight
//! with the worker. Both lists are preallocated to the arena capacity, so the critical section
//! only moves indices and never allocates or waits.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::buffer::DmaBuffer;

/// One enqueued unit of work.
#[derive(Clone, Debug)]
pub struct SubmissionDescriptor {
    pub buffer: Arc<DmaBuffer>,
    /// Byte range of the buffer executed by this submission.
    pub range: Range<usize>,
    pub fence_id: u64,
    pub dma_buffer_physical_address: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotId(usize);

impl SlotId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A descriptor handed to the worker; its slot stays in flight until [`SubmissionQueue::release`].
#[derive(Debug)]
pub struct DequeuedSubmission {
    pub slot: SlotId,
    pub descriptor: SubmissionDescriptor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Free,
    Pending,
    InFlight,
}

#[derive(Debug)]
struct Slot {
    state: SlotState,
    descriptor: Option<SubmissionDescriptor>,
}

#[derive(Debug)]
struct QueueState {
    slots: Vec<Slot>,
    free: Vec<usize>,
    pending: VecDeque<usize>,
}

#[derive(Debug)]
pub struct SubmissionQueue {
    state: Mutex<QueueState>,
    capacity: usize,
}

impl SubmissionQueue {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                state: SlotState::Free,
                descriptor: None,
            })
            .collect();
        // Pop from the back, so hand out slot 0 first.
        let free = (0..capacity).rev().collect();
        Self {
            state: Mutex::new(QueueState {
                slots,
                free,
                pending: VecDeque::with_capacity(capacity),
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Appends `descriptor` to the tail of the pending queue.
    ///
    /// # Panics
    ///
    /// Panics when every slot is in use. The scheduler bounds in-flight submissions to the pool
    /// capacity, so exhaustion means the caller broke that contract.
    pub fn enqueue(&self, descriptor: SubmissionDescriptor) -> SlotId {
        let mut state = self.lock();
        let Some(index) = state.free.pop() else {
            drop(state);
            panic!(
                "submission pool exhausted: all {} descriptors in use",
                self.capacity
            );
        };
        let slot = &mut state.slots[index];
        debug_assert_eq!(slot.state, SlotState::Free);
        slot.state = SlotState::Pending;
        slot.descriptor = Some(descriptor);
        state.pending.push_back(index);
        SlotId(index)
    }

    /// Removes the head of the pending queue, or returns `None` if nothing is pending.
    pub fn dequeue(&self) -> Option<DequeuedSubmission> {
        let mut state = self.lock();
        let index = state.pending.pop_front()?;
        let slot = &mut state.slots[index];
        debug_assert_eq!(slot.state, SlotState::Pending);
        slot.state = SlotState::InFlight;
        let descriptor = slot
            .descriptor
            .take()
            .unwrap_or_else(|| unreachable!("pending slot {index} has no descriptor"));
        Some(DequeuedSubmission {
            slot: SlotId(index),
            descriptor,
        })
    }

    /// Returns an in-flight slot to the free list.
    pub fn release(&self, slot: SlotId) {
        let mut state = self.lock();
        let entry = &mut state.slots[slot.0];
        assert_eq!(
            entry.state,
            SlotState::InFlight,
            "released submission slot {} that was not in flight",
            slot.0
        );
        entry.state = SlotState::Free;
        state.free.push(slot.0);
    }

    pub fn free_count(&self) -> usize {
        self.lock().free.len()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }
}
