//! Charger state types shared between interrupt context, the deferred worker and consumers.

/// Charging source.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Source {
    /// Main (wall adapter) charger input.
    Ac,
    /// USB charger input fed from VBUS.
    Usb,
}

/// Per-source charger state.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ChargerInfo {
    /// A cable is attached and identified.
    pub connected: bool,
    /// Charging is enabled on this source.
    pub online: bool,
    /// Last measured input voltage (mV).
    pub voltage_mv: i32,
    /// Last sampled constant-voltage phase indication.
    pub cv_active: bool,
    /// The charger watchdog expired while this source was online.
    pub wd_expired: bool,
}

bitflags::bitflags! {
    /// Latched hardware events. Each flag is set by one interrupt or poll path and
    /// cleared by its recheck task once the condition is gone.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct EventFlags: u16 {
        const MAIN_EXT_NOT_OK    = 1 << 0;
        const MAIN_THERMAL_PROT  = 1 << 1;
        const USB_THERMAL_PROT   = 1 << 2;
        const VBUS_OVV           = 1 << 3;
        const USB_CHARGER_NOT_OK = 1 << 4;
        const CHG_WD_EXP         = 1 << 5;
        const VBUS_COLLAPSE      = 1 << 6;
        /// Hardware finished an input current drop; gates upward VBUS current ramps.
        const VBUS_DROP_END      = 1 << 7;
        const REPORT_NO_CHARGE   = 1 << 8;
    }
}

/// USB device state as derived from transceiver notifications.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum UsbBusState {
    /// High-speed reset.
    #[default]
    ResetHs,
    /// Full/low-speed reset.
    ResetFs,
    Configured,
    Suspend,
    Resume,
}

impl UsbBusState {
    /// Derive the bus state from a VBUS budget announcement.
    ///
    /// `previous_ma` is the last committed budget: 2 mA means suspended, so any larger
    /// budget after it is a resume.
    pub fn from_budget(previous_ma: Option<u32>, ma: u32) -> Self {
        if previous_ma == Some(2) && ma > 2 {
            UsbBusState::Resume
        } else if ma == 0 {
            UsbBusState::ResetHs
        } else if ma == 2 {
            UsbBusState::Suspend
        } else if ma >= 8 {
            UsbBusState::Configured
        } else {
            UsbBusState::ResetFs
        }
    }
}

/// USB stack state, double-buffered.
///
/// Notifications write the pending half; only the worker commits it, so everything
/// else sees the last accepted negotiation result rather than one in progress.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UsbLinkState {
    pub state: UsbBusState,
    pub usb_current_ma: Option<u32>,
    pub state_pending: UsbBusState,
    pub usb_current_pending_ma: Option<u32>,
}

impl UsbLinkState {
    pub const fn new() -> Self {
        Self {
            state: UsbBusState::ResetHs,
            usb_current_ma: None,
            state_pending: UsbBusState::ResetHs,
            usb_current_pending_ma: None,
        }
    }

    /// Record a notification without changing the committed view.
    pub fn stage(&mut self, state: UsbBusState, ma: u32) {
        self.state_pending = state;
        self.usb_current_pending_ma = Some(ma);
    }

    /// Promote the pending half to the committed view.
    pub fn commit(&mut self) -> (UsbBusState, Option<u32>) {
        self.state = self.state_pending;
        self.usb_current_ma = self.usb_current_pending_ma;
        (self.state, self.usb_current_ma)
    }
}

/// Event kinds delivered by the USB role transceiver.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UsbEvent {
    /// VBUS budget announcement from the USB stack.
    Vbus,
    /// Any other transceiver event; ignored by the charger.
    Other,
}
