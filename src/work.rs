//! Deferred work slots for the single charger worker.
//!
//! Each task has one slot. Queueing a task that is already pending does nothing, like a
//! kernel delayed work item. Interrupt handlers cannot read the scheduling clock, so a
//! slot is first `Queued` with a relative delay and turned into an absolute deadline the
//! next time the worker runs.

/// Deferred charger tasks.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Work {
    DetectUsbType,
    UsbLinkStatus,
    UsbAttach,
    UsbStateChanged,
    UsbThermalCheck,
    UsbChargerNotOkCheck,
    HwFailureCheck,
    VbusDropEnd,
    VbatCheck,
    KickWatchdog,
}

impl Work {
    pub const COUNT: usize = 10;

    pub const ALL: [Work; Work::COUNT] = [
        Work::DetectUsbType,
        Work::UsbLinkStatus,
        Work::UsbAttach,
        Work::UsbStateChanged,
        Work::UsbThermalCheck,
        Work::UsbChargerNotOkCheck,
        Work::HwFailureCheck,
        Work::VbusDropEnd,
        Work::VbatCheck,
        Work::KickWatchdog,
    ];
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Slot {
    Idle,
    Queued { delay_ms: u64 },
    Armed { deadline_ms: u64 },
}

/// Pending deferred tasks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WorkQueue {
    slots: [Slot; Work::COUNT],
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub const fn new() -> Self {
        Self {
            slots: [Slot::Idle; Work::COUNT],
        }
    }

    /// Queue `work` to run `delay_ms` after the worker next looks at the queue.
    /// Returns `false` if it was already pending.
    pub fn queue(&mut self, work: Work, delay_ms: u64) -> bool {
        let slot = &mut self.slots[work as usize];
        if *slot != Slot::Idle {
            return false;
        }
        *slot = Slot::Queued { delay_ms };
        true
    }

    /// Drop a pending `work`. Returns `true` if it was pending.
    pub fn cancel(&mut self, work: Work) -> bool {
        let was_pending = self.is_pending(work);
        self.slots[work as usize] = Slot::Idle;
        was_pending
    }

    pub fn is_pending(&self, work: Work) -> bool {
        self.slots[work as usize] != Slot::Idle
    }

    /// Turn relative delays into deadlines against `now_ms`.
    pub fn arm(&mut self, now_ms: u64) {
        for slot in self.slots.iter_mut() {
            if let Slot::Queued { delay_ms } = *slot {
                *slot = Slot::Armed {
                    deadline_ms: now_ms.saturating_add(delay_ms),
                };
            }
        }
    }

    /// Time left until `work` runs, if pending.
    pub fn remaining_ms(&self, work: Work, now_ms: u64) -> Option<u64> {
        match self.slots[work as usize] {
            Slot::Idle => None,
            Slot::Queued { delay_ms } => Some(delay_ms),
            Slot::Armed { deadline_ms } => Some(deadline_ms.saturating_sub(now_ms)),
        }
    }

    /// Remove and return the due task with the earliest deadline.
    /// Ties go to the task declared first in [`Work`].
    pub fn take_due(&mut self, now_ms: u64) -> Option<Work> {
        let mut best: Option<(u64, Work)> = None;
        for work in Work::ALL {
            if let Slot::Armed { deadline_ms } = self.slots[work as usize] {
                if deadline_ms <= now_ms && best.is_none_or(|(d, _)| deadline_ms < d) {
                    best = Some((deadline_ms, work));
                }
            }
        }
        let (_, work) = best?;
        self.slots[work as usize] = Slot::Idle;
        Some(work)
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.slots
            .iter()
            .filter_map(|slot| match *slot {
                Slot::Armed { deadline_ms } => Some(deadline_ms),
                _ => None,
            })
            .min()
    }
}
