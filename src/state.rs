//! State shared between interrupt handlers and the charger worker.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::data_types::{ChargerInfo, EventFlags, Source, UsbBusState, UsbEvent, UsbLinkState};
use crate::config::IrqMap;
use crate::irq::Irq;
use crate::vbus_drop::VbusDropState;
use crate::work::{Work, WorkQueue};

/// Everything interrupt context may touch.
#[derive(Clone, Copy, Debug)]
pub struct SharedState {
    pub flags: EventFlags,
    pub ac: ChargerInfo,
    pub usb: ChargerInfo,
    pub usb_link: UsbLinkState,
    pub vbus_drop: VbusDropState,
    pub vbus_detected: bool,
    pub work: WorkQueue,
    /// In-flight current ramps; suspend is refused while non-zero.
    pub stepping_sessions: u32,
    notify_ac: bool,
    notify_usb: bool,
}

impl SharedState {
    pub const fn new() -> Self {
        Self {
            flags: EventFlags::empty(),
            ac: ChargerInfo {
                connected: false,
                online: false,
                voltage_mv: 0,
                cv_active: false,
                wd_expired: false,
            },
            usb: ChargerInfo {
                connected: false,
                online: false,
                voltage_mv: 0,
                cv_active: false,
                wd_expired: false,
            },
            usb_link: UsbLinkState::new(),
            vbus_drop: VbusDropState::new(),
            vbus_detected: false,
            work: WorkQueue::new(),
            stepping_sessions: 0,
            notify_ac: false,
            notify_usb: false,
        }
    }

    pub fn info(&self, source: Source) -> &ChargerInfo {
        match source {
            Source::Ac => &self.ac,
            Source::Usb => &self.usb,
        }
    }

    pub fn info_mut(&mut self, source: Source) -> &mut ChargerInfo {
        match source {
            Source::Ac => &mut self.ac,
            Source::Usb => &mut self.usb,
        }
    }

    /// Ask the worker to notify consumers about `source`.
    pub fn request_notify(&mut self, source: Source) {
        match source {
            Source::Ac => self.notify_ac = true,
            Source::Usb => self.notify_usb = true,
        }
    }

    /// Take the pending notification requests.
    pub fn take_notifications(&mut self) -> (bool, bool) {
        let pending = (self.notify_ac, self.notify_usb);
        self.notify_ac = false;
        self.notify_usb = false;
        pending
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle shared by interrupt handlers, the USB transceiver notifier and the worker.
///
/// Can live in a `static`; all access goes through a critical section.
pub struct ChargerShared {
    state: Mutex<RefCell<SharedState>>,
}

impl Default for ChargerShared {
    fn default() -> Self {
        Self::new()
    }
}

impl ChargerShared {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(SharedState::new())),
        }
    }

    /// Run `f` with exclusive access to the shared state. Must not block.
    pub fn with<R>(&self, f: impl FnOnce(&mut SharedState) -> R) -> R {
        critical_section::with(|cs| f(&mut *self.state.borrow_ref_mut(cs)))
    }

    /// Entry point for a charger interrupt.
    pub fn handle_irq(&self, irq: Irq) {
        let handler = irq.handler();
        self.with(handler);
    }

    /// Entry point for a hardware interrupt line. Returns `false` if the line does not
    /// belong to the charger.
    pub fn handle_irq_line(&self, irqs: &IrqMap, line: u32) -> bool {
        match irqs.irq_for_line(line) {
            Some(irq) => {
                self.handle_irq(irq);
                true
            }
            None => false,
        }
    }

    /// USB transceiver notification. Only VBUS budget announcements are of interest;
    /// the result is staged and committed by the worker after negotiation settles.
    pub fn usb_event(&self, event: UsbEvent, ma: u32) -> bool {
        if event != UsbEvent::Vbus {
            log::debug!("not a standard host, ignoring USB event");
            return false;
        }
        self.with(|s| {
            let state = UsbBusState::from_budget(s.usb_link.usb_current_ma, ma);
            log::debug!("usb_state: {:?} mA: {}", state, ma);
            s.usb_link.stage(state, ma);
            s.work.queue(Work::UsbStateChanged, 500);
        });
        true
    }

    pub fn flags(&self) -> EventFlags {
        self.with(|s| s.flags)
    }

    pub fn info(&self, source: Source) -> ChargerInfo {
        self.with(|s| *s.info(source))
    }

    pub fn usb_link(&self) -> UsbLinkState {
        self.with(|s| s.usb_link)
    }

    pub fn vbus_drop(&self) -> VbusDropState {
        self.with(|s| s.vbus_drop)
    }

    pub fn is_pending(&self, work: Work) -> bool {
        self.with(|s| s.work.is_pending(work))
    }

    /// A current ramp is in progress.
    pub fn stepping_active(&self) -> bool {
        self.with(|s| s.stepping_sessions > 0)
    }
}
