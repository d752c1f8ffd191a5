//! Packet-input poll adapter
//!
//! A started device is represented in the dispatch tiers by a poll
//! command. A worker that pops it asks the device for one bounded burst
//! and enqueues what arrives into the device's input queue, which then
//! schedules like any other queue. A device that reports itself stopped,
//! or fails a receive, loses its command and is not polled again.
//!
//! # Device lifecycle
//!
//! ```text
//!   open ──► Opened ──start──► Started ──stop──► Stopped
//!              ▲                  │                 │
//!              └──── device stops / errors ◄────────┘ (next poll)
//!   close: Opened ──► free;  Stopped ──► Closing ──(next poll)──► free
//! ```

use std::sync::Arc;

use dpsched_core::{
    dps_debug, dps_error, truncate_name, CmdId, Event, GroupId, IdAllocator, PktioHandle,
    Priority, QueueHandle, QueueType, SchedError, SchedResult, SpinLock,
};

use crate::dispatch::{Dispatch, SchedCmd};
use crate::queue::QueueTable;

/// Receive side of a packet-input backend
pub trait PktInput: Send + Sync {
    /// Device name, for logs and lookup
    fn name(&self) -> &str;

    /// Append up to `max` received packets to `out`.
    ///
    /// Returns how many were appended, or a backend error code.
    fn receive(&self, out: &mut Vec<Event>, max: usize) -> Result<usize, i32>;

    /// True once the device will produce no more packets
    fn is_stopped(&self) -> bool;
}

/// Content-based routing for packet-input queues
pub trait Classifier: Send + Sync {
    /// Class queue for `ev`, or `None` to keep it on the input queue
    fn classify(&self, ev: &Event) -> Option<QueueHandle>;
}

/// Device lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PktioState {
    Free,
    Opened,
    Started(CmdId),
    /// Stop requested; the command is retired on its next poll
    Stopped(CmdId),
    /// Close requested while the command was in flight
    Closing(CmdId),
}

/// What the scheduler does with a poll command after polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    /// Push the command back
    Rearm,
    /// Drop the command; the device is no longer polled
    Retire,
}

struct PktioEntry {
    device: Option<Arc<dyn PktInput>>,
    name: String,
    inq: QueueHandle,
    state: PktioState,
}

impl PktioEntry {
    fn free() -> Self {
        Self {
            device: None,
            name: String::new(),
            inq: QueueHandle::INVALID,
            state: PktioState::Free,
        }
    }
}

/// Table of open packet-input devices
pub struct PktioTable {
    entries: Box<[SpinLock<PktioEntry>]>,
    ids: IdAllocator,
}

impl PktioTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: (0..capacity).map(|_| SpinLock::new(PktioEntry::free())).collect(),
            ids: IdAllocator::new(capacity),
        }
    }

    fn entry(&self, h: PktioHandle) -> SchedResult<&SpinLock<PktioEntry>> {
        if !self.ids.is_allocated(h.as_u32()) {
            return Err(SchedError::InvalidHandle);
        }
        self.entries.get(h.index()).ok_or(SchedError::InvalidHandle)
    }

    /// Bind a device to a live packet-input queue
    pub(crate) fn open(
        &self,
        device: Arc<dyn PktInput>,
        inq: QueueHandle,
        queues: &QueueTable,
    ) -> SchedResult<PktioHandle> {
        if queues.queue_type(inq)? != QueueType::PktIn {
            return Err(SchedError::InvalidOperation);
        }
        let id = self.ids.allocate().ok_or(SchedError::NoFreePktio)?;
        let name = truncate_name(device.name());
        dps_debug!("pktio {} opened on {}", name, inq);
        *self.entries[id as usize].lock() = PktioEntry {
            device: Some(device),
            name,
            inq,
            state: PktioState::Opened,
        };
        Ok(PktioHandle::new(id))
    }

    /// Register a poll command at `prio`/`group` and queue it
    pub(crate) fn start(
        &self,
        h: PktioHandle,
        prio: Priority,
        group: GroupId,
        dispatch: &Dispatch,
    ) -> SchedResult<()> {
        let mut entry = self.entry(h)?.lock();
        if entry.state != PktioState::Opened {
            return Err(SchedError::InvalidOperation);
        }
        let cmd = dispatch.register(SchedCmd::PollPktin {
            pktio: h,
            prio,
            group,
        })?;
        entry.state = PktioState::Started(cmd);
        drop(entry);
        dispatch.push(prio, cmd);
        Ok(())
    }

    pub(crate) fn stop(&self, h: PktioHandle) -> SchedResult<()> {
        let mut entry = self.entry(h)?.lock();
        if let PktioState::Started(cmd) = entry.state {
            entry.state = PktioState::Stopped(cmd);
        }
        Ok(())
    }

    /// Close a device that is not running.
    /// A stopped device whose command is still queued is freed by its
    /// final poll.
    pub(crate) fn close(&self, h: PktioHandle) -> SchedResult<()> {
        let mut entry = self.entry(h)?.lock();
        match entry.state {
            PktioState::Opened => {
                dps_debug!("pktio {} closed", entry.name);
                *entry = PktioEntry::free();
                drop(entry);
                self.ids.release(h.as_u32());
                Ok(())
            }
            PktioState::Stopped(cmd) => {
                entry.state = PktioState::Closing(cmd);
                Ok(())
            }
            PktioState::Started(_) => Err(SchedError::InvalidOperation),
            PktioState::Closing(_) | PktioState::Free => Err(SchedError::InvalidHandle),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<PktioHandle> {
        let name = truncate_name(name);
        self.entries.iter().enumerate().find_map(|(idx, e)| {
            let e = e.lock();
            (e.state != PktioState::Free && e.name == name).then(|| PktioHandle::new(idx as u32))
        })
    }

    pub fn state(&self, h: PktioHandle) -> PktioState {
        self.entries
            .get(h.index())
            .map_or(PktioState::Free, |e| e.lock().state)
    }

    /// Input queue a device feeds
    pub fn input_queue(&self, h: PktioHandle) -> SchedResult<QueueHandle> {
        Ok(self.entry(h)?.lock().inq)
    }

    /// Poll a device once for up to `burst` packets.
    ///
    /// `scratch` is the caller's receive buffer; it is empty on return.
    pub(crate) fn poll(
        &self,
        h: PktioHandle,
        queues: &QueueTable,
        dispatch: &Dispatch,
        burst: usize,
        scratch: &mut Vec<Event>,
    ) -> PollOutcome {
        let Some(slot) = self.entries.get(h.index()) else {
            return PollOutcome::Retire;
        };
        let started = {
            let entry = slot.lock();
            match (&entry.state, &entry.device) {
                (PktioState::Started(_), Some(dev)) => Some((Arc::clone(dev), entry.inq)),
                _ => None,
            }
        };
        let Some((device, inq)) = started else {
            self.retire(h);
            return PollOutcome::Retire;
        };

        if device.is_stopped() {
            dps_debug!("pktio {} stopped, not re-armed", device.name());
            self.retire(h);
            return PollOutcome::Retire;
        }

        scratch.clear();
        match device.receive(scratch, burst) {
            Ok(0) => PollOutcome::Rearm,
            Ok(_) => match queues.enqueue_multi(inq, scratch, dispatch) {
                Ok(_) => PollOutcome::Rearm,
                Err(e) => {
                    dps_error!(
                        "pktio {}: input queue {} rejected {} packets: {}",
                        device.name(),
                        inq,
                        scratch.len(),
                        e
                    );
                    scratch.clear();
                    self.retire(h);
                    PollOutcome::Retire
                }
            },
            Err(code) => {
                dps_error!("pktio {}: {}", device.name(), SchedError::PktioRecv(code));
                scratch.clear();
                self.retire(h);
                PollOutcome::Retire
            }
        }
    }

    /// The poll command is being dropped: settle the device state
    fn retire(&self, h: PktioHandle) {
        let Some(slot) = self.entries.get(h.index()) else {
            return;
        };
        let mut entry = slot.lock();
        match entry.state {
            PktioState::Started(_) | PktioState::Stopped(_) => entry.state = PktioState::Opened,
            PktioState::Closing(_) => {
                dps_debug!("pktio {} closed after final poll", entry.name);
                *entry = PktioEntry::free();
                drop(entry);
                self.ids.release(h.as_u32());
            }
            PktioState::Opened | PktioState::Free => {}
        }
    }

    pub fn open_count(&self) -> usize {
        self.ids.allocated_count() as usize
    }
}
