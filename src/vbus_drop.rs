//! VBUS drop handling.
//!
//! When the USB source sags under load the hardware lowers the input current on its own
//! and raises a drop-end interrupt. The driver then periodically retries the requested
//! current. A source that keeps settling at the same ceiling gets exponentially longer
//! retry intervals until the ceiling is accepted for good.

/// First retry interval after a new ceiling is observed (s).
pub const RETRY_SET_TIME_S: u32 = 30;
/// Longest retry interval (s). Doubling past it freezes the ceiling.
pub const RETRY_MAX_TIME_S: u32 = 3840;

/// Outcome of a drop-end evaluation.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DropVerdict {
    /// A new ceiling was observed; retry after the base interval.
    Limiting { ceiling_ma: u16, retry_secs: u32 },
    /// Same ceiling again; retry after a doubled interval.
    StillLimiting { ceiling_ma: u16, retry_secs: u32 },
    /// Ceiling accepted as the enforced cap; no more retries.
    Frozen { ceiling_ma: u16 },
}

impl DropVerdict {
    /// The requested current should be applied again.
    pub fn retries(&self) -> bool {
        !matches!(self, DropVerdict::Frozen { .. })
    }
}

/// VBUS drop state.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VbusDropState {
    /// Cap applied to the VBUS input current (mA). Zero means none.
    pub cap_ma: u16,
    /// Last ceiling the hardware settled at (mA).
    pub observed_ma: u16,
    /// Current retry interval (s).
    pub retry_secs: u32,
    /// Boottime deadline of a retry cancelled by suspend.
    pub work_expire_ms: Option<u64>,
}

impl Default for VbusDropState {
    fn default() -> Self {
        Self::new()
    }
}

impl VbusDropState {
    pub const fn new() -> Self {
        Self {
            cap_ma: 0,
            observed_ma: 0,
            retry_secs: RETRY_SET_TIME_S,
            work_expire_ms: None,
        }
    }

    /// Forget everything learned about the source (cable unplugged).
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Evaluate the ceiling the hardware settled at after a drop.
    pub fn on_drop_end(&mut self, ceiling_ma: u16) -> DropVerdict {
        if self.observed_ma != ceiling_ma {
            self.observed_ma = ceiling_ma;
            self.retry_secs = RETRY_SET_TIME_S;
            return DropVerdict::Limiting {
                ceiling_ma,
                retry_secs: self.retry_secs,
            };
        }
        let next = self.retry_secs.saturating_mul(2);
        if next > RETRY_MAX_TIME_S {
            self.cap_ma = self.observed_ma;
            return DropVerdict::Frozen { ceiling_ma };
        }
        self.retry_secs = next;
        DropVerdict::StillLimiting {
            ceiling_ma,
            retry_secs: next,
        }
    }

    /// Record a pending retry as a suspend-proof deadline.
    pub fn suspend(&mut self, remaining_ms: u64, boottime_ms: u64) {
        self.work_expire_ms = Some(boottime_ms.saturating_add(remaining_ms));
    }

    /// Time left of the retry recorded by [`suspend`](Self::suspend), zero if it already
    /// passed while suspended.
    pub fn resume(&mut self, boottime_ms: u64) -> u64 {
        self.work_expire_ms
            .take()
            .map_or(0, |expire| expire.saturating_sub(boottime_ms))
    }
}
