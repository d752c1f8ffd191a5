//! Ordered context and ordering-lock slots
//!
//! A worker that takes an event from an ORDERED queue holds an ordered
//! context until its next `schedule()` or an explicit release. The
//! context carries the event's order number and one ticket per
//! ordering-lock slot of the queue.
//!
//! Slot protocol, per slot:
//! - `acquire` spins until the queue's consumed counter equals the ticket
//! - `release` sets the counter to `ticket + 1`, admitting the next holder
//! - releasing the context passes through every slot the holder never
//!   touched (wait for its turn, then advance), so a consumer that skips
//!   a guarded action never stalls the ones after it
//!
//! Enqueues made while the context is held are deferred and committed
//! at release. Each deferred batch is reserved on its target queue,
//! which refuses destroy until the batch lands.

use dpsched_core::constants::MAX_ORDERED_LOCKS;
use dpsched_core::{dps_error, dps_trace, Event, QueueHandle, SchedError, SchedResult};

use crate::dispatch::Dispatch;
use crate::queue::{OrderStamp, QueueTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Pending,
    Held,
    Done,
}

pub(crate) struct OrderedContext {
    queue: QueueHandle,
    stamp: OrderStamp,
    slots: [SlotState; MAX_ORDERED_LOCKS],
    /// Enqueues deferred until release, batched per target queue
    deferred: Vec<(QueueHandle, Vec<Event>)>,
}

impl OrderedContext {
    pub(crate) fn new(queue: QueueHandle, stamp: OrderStamp) -> Self {
        Self {
            queue,
            stamp,
            slots: [SlotState::Pending; MAX_ORDERED_LOCKS],
            deferred: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn queue(&self) -> QueueHandle {
        self.queue
    }

    #[inline]
    pub(crate) fn order(&self) -> u64 {
        self.stamp.order
    }

    fn slot_index(&self, slot: u32) -> SchedResult<usize> {
        if slot < self.stamp.lock_count {
            Ok(slot as usize)
        } else {
            Err(SchedError::InvalidOperation)
        }
    }

    /// Wait for this context's turn on `slot`
    pub(crate) fn acquire(&mut self, slot: u32, queues: &QueueTable) -> SchedResult<()> {
        let idx = self.slot_index(slot)?;
        match self.slots[idx] {
            SlotState::Done => Err(SchedError::SlotAlreadyReleased),
            SlotState::Held => Ok(()),
            SlotState::Pending => {
                queues.wait_ticket(self.queue, idx, self.stamp.tickets[idx]);
                self.slots[idx] = SlotState::Held;
                Ok(())
            }
        }
    }

    /// Hand `slot` to the next ticket holder
    pub(crate) fn release(&mut self, slot: u32, queues: &QueueTable) -> SchedResult<()> {
        let idx = self.slot_index(slot)?;
        match self.slots[idx] {
            SlotState::Done => Err(SchedError::SlotAlreadyReleased),
            SlotState::Pending => Err(SchedError::InvalidOperation),
            SlotState::Held => {
                queues.consume_ticket(self.queue, idx, self.stamp.tickets[idx]);
                self.slots[idx] = SlotState::Done;
                Ok(())
            }
        }
    }

    /// Hold `events` for `target` until release.
    ///
    /// The batch is reserved on `target` first, so a queue that is not
    /// live fails here with the events still in `events`.
    pub(crate) fn defer(
        &mut self,
        target: QueueHandle,
        events: &mut Vec<Event>,
        queues: &QueueTable,
    ) -> SchedResult<usize> {
        let count = events.len();
        queues.reserve_deferred(target, count)?;
        match self.deferred.last_mut() {
            Some((q, batch)) if *q == target => batch.append(events),
            _ => self.deferred.push((target, std::mem::take(events))),
        }
        Ok(count)
    }

    /// End the context: settle every slot, commit deferred enqueues and
    /// drop the queue's held-context count.
    pub(crate) fn finish(mut self, queues: &QueueTable, dispatch: &Dispatch) {
        for idx in 0..self.stamp.lock_count as usize {
            let ticket = self.stamp.tickets[idx];
            match self.slots[idx] {
                SlotState::Done => {}
                SlotState::Held => queues.consume_ticket(self.queue, idx, ticket),
                SlotState::Pending => {
                    queues.wait_ticket(self.queue, idx, ticket);
                    queues.consume_ticket(self.queue, idx, ticket);
                }
            }
            self.slots[idx] = SlotState::Done;
        }

        for (target, mut events) in self.deferred.drain(..) {
            let count = events.len();
            let committed = queues.enqueue_multi(target, &mut events, dispatch);
            queues.settle_deferred(target, count);
            if let Err(e) = committed {
                dps_error!(
                    "deferred enqueue of {} events to {} failed: {}",
                    events.len(),
                    target,
                    e
                );
            }
        }

        queues.release_ordered_held(self.queue);
        dps_trace!("ordered context {}#{} released", self.queue, self.stamp.order);
    }
}
