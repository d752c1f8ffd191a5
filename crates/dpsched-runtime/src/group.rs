//! Scheduling groups
//!
//! A group is a named thread mask. A queue bound to a group is only
//! scheduled to threads in the mask. Three groups always exist:
//! `ALL` (every attached thread), `WORKER` and `CONTROL` (threads of
//! that type). Built-in groups are maintained by attach/detach and
//! cannot be destroyed, joined or left explicitly.

use dpsched_core::constants::{FIRST_NAMED_GROUP, MAX_SCHED_GROUPS};
use dpsched_core::{
    dps_debug, truncate_name, GroupId, SchedError, SchedResult, SpinLock, ThreadId, ThreadMask,
    ThreadType,
};

#[derive(Debug, Clone, Default)]
struct GroupEntry {
    name: String,
    mask: ThreadMask,
    live: bool,
}

/// Fixed table of scheduling groups
pub struct GroupRegistry {
    groups: SpinLock<Vec<GroupEntry>>,
}

impl GroupRegistry {
    pub(crate) fn new() -> Self {
        let mut groups = vec![GroupEntry::default(); MAX_SCHED_GROUPS];
        for (id, name) in [
            (GroupId::ALL, "all"),
            (GroupId::WORKER, "worker"),
            (GroupId::CONTROL, "control"),
        ] {
            groups[id.index()] = GroupEntry {
                name: name.to_string(),
                mask: ThreadMask::zero(),
                live: true,
            };
        }
        Self {
            groups: SpinLock::new(groups),
        }
    }

    /// Create a named group with an initial mask.
    ///
    /// Fails with `NameInUse` if a live group already has the
    /// (truncated) name, `NoFreeGroup` if the table is full.
    pub fn create(&self, name: &str, mask: &ThreadMask) -> SchedResult<GroupId> {
        let name = truncate_name(name);
        let mut groups = self.groups.lock();
        if groups.iter().any(|g| g.live && g.name == name) {
            return Err(SchedError::NameInUse);
        }
        let idx = groups
            .iter()
            .enumerate()
            .skip(FIRST_NAMED_GROUP as usize)
            .find(|(_, g)| !g.live)
            .map(|(i, _)| i)
            .ok_or(SchedError::NoFreeGroup)?;

        groups[idx] = GroupEntry {
            name,
            mask: *mask,
            live: true,
        };
        let id = GroupId::new(idx as u32);
        dps_debug!("group {} created as {}", groups[idx].name, id);
        Ok(id)
    }

    /// Free a named group. Callers check that nothing still schedules
    /// through it; see `Scheduler::group_destroy`.
    pub(crate) fn destroy(&self, id: GroupId) -> SchedResult<()> {
        self.with_named(id, |g| {
            *g = GroupEntry::default();
        })
    }

    /// Find a live group by name
    pub fn lookup(&self, name: &str) -> Option<GroupId> {
        let name = truncate_name(name);
        self.groups
            .lock()
            .iter()
            .position(|g| g.live && g.name == name)
            .map(|i| GroupId::new(i as u32))
    }

    /// Add the threads in `mask` to a named group
    pub fn join(&self, id: GroupId, mask: &ThreadMask) -> SchedResult<()> {
        self.with_named(id, |g| g.mask.union_with(mask))
    }

    /// Remove the threads in `mask` from a named group
    pub fn leave(&self, id: GroupId, mask: &ThreadMask) -> SchedResult<()> {
        self.with_named(id, |g| g.mask.difference_with(mask))
    }

    /// Current thread mask of a live group, built-in groups included
    pub fn thrmask(&self, id: GroupId) -> SchedResult<ThreadMask> {
        let groups = self.groups.lock();
        match groups.get(id.index()) {
            Some(g) if g.live => Ok(g.mask),
            _ => Err(SchedError::InvalidHandle),
        }
    }

    /// Whether `thread` may be handed work from a queue bound to `id`.
    /// `ALL` admits every thread without a lookup.
    #[inline]
    pub fn is_member(&self, id: GroupId, thread: ThreadId) -> bool {
        if id == GroupId::ALL {
            return true;
        }
        let groups = self.groups.lock();
        groups
            .get(id.index())
            .map_or(false, |g| g.live && g.mask.is_set(thread))
    }

    pub(crate) fn attach_thread(&self, thread: ThreadId, ty: ThreadType) {
        let mut groups = self.groups.lock();
        groups[GroupId::ALL.index()].mask.set(thread);
        groups[builtin_for(ty).index()].mask.set(thread);
    }

    /// Remove a detaching thread from every group, named ones included,
    /// so a recycled thread id starts with no memberships.
    pub(crate) fn detach_thread(&self, thread: ThreadId) {
        let mut groups = self.groups.lock();
        for g in groups.iter_mut() {
            g.mask.clear(thread);
        }
    }

    /// Named groups currently live
    pub fn count_named(&self) -> usize {
        self.groups
            .lock()
            .iter()
            .skip(FIRST_NAMED_GROUP as usize)
            .filter(|g| g.live)
            .count()
    }

    fn with_named(&self, id: GroupId, f: impl FnOnce(&mut GroupEntry)) -> SchedResult<()> {
        if id.is_builtin() {
            return Err(SchedError::BuiltinGroup);
        }
        let mut groups = self.groups.lock();
        match groups.get_mut(id.index()) {
            Some(g) if g.live => {
                f(g);
                Ok(())
            }
            _ => Err(SchedError::InvalidHandle),
        }
    }
}

fn builtin_for(ty: ThreadType) -> GroupId {
    match ty {
        ThreadType::Worker => GroupId::WORKER,
        ThreadType::Control => GroupId::CONTROL,
    }
}
