//! Charger interrupt lines and their handlers.
//!
//! Handlers run in interrupt context: they only latch flags and queue deferred work,
//! never touch the bus.

use crate::data_types::{EventFlags, Source};
use crate::state::SharedState;
use crate::work::Work;

/// Charger interrupt lines.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Irq {
    /// VBUS falling edge.
    VbusDetF,
    /// VBUS rising edge.
    VbusDetR,
    UsbLinkStatus,
    /// Die temperature rose above the USB charger thermal protection threshold.
    UsbChThProtR,
    /// Die temperature fell below the USB charger thermal protection threshold.
    UsbChThProtF,
    UsbChargerNotOkR,
    VbusOvv,
    /// Charger watchdog expired.
    ChWdExp,
    /// Hardware finished lowering the VBUS input current after a drop.
    VbusChDropEnd,
}

/// Interrupt handler signature.
pub type IrqHandler = fn(&mut SharedState);

impl Irq {
    pub const COUNT: usize = 9;

    pub const ALL: [Irq; Irq::COUNT] = [
        Irq::VbusDetF,
        Irq::VbusDetR,
        Irq::UsbLinkStatus,
        Irq::UsbChThProtR,
        Irq::UsbChThProtF,
        Irq::UsbChargerNotOkR,
        Irq::VbusOvv,
        Irq::ChWdExp,
        Irq::VbusChDropEnd,
    ];

    /// Platform name of the interrupt.
    pub const fn name(self) -> &'static str {
        match self {
            Irq::VbusDetF => "VBUS_DET_F",
            Irq::VbusDetR => "VBUS_DET_R",
            Irq::UsbLinkStatus => "USB_LINK_STATUS",
            Irq::UsbChThProtR => "USB_CH_TH_PROT_R",
            Irq::UsbChThProtF => "USB_CH_TH_PROT_F",
            Irq::UsbChargerNotOkR => "USB_CHARGER_NOT_OKR",
            Irq::VbusOvv => "VBUS_OVV",
            Irq::ChWdExp => "CH_WD_EXP",
            Irq::VbusChDropEnd => "VBUS_CH_DROP_END",
        }
    }

    pub fn from_name(name: &str) -> Option<Irq> {
        Irq::ALL.into_iter().find(|irq| irq.name() == name)
    }

    pub fn handler(self) -> IrqHandler {
        match self {
            Irq::VbusDetF => vbus_det_falling,
            Irq::VbusDetR => vbus_det_rising,
            Irq::UsbLinkStatus => usb_link_status,
            Irq::UsbChThProtR => usb_thermal_prot_rising,
            Irq::UsbChThProtF => usb_thermal_prot_falling,
            Irq::UsbChargerNotOkR => usb_charger_not_ok,
            Irq::VbusOvv => vbus_overvoltage,
            Irq::ChWdExp => watchdog_expired,
            Irq::VbusChDropEnd => vbus_drop_end,
        }
    }
}

fn vbus_det_falling(s: &mut SharedState) {
    log::debug!("VBUS falling detected");
    s.vbus_detected = false;
    s.work.queue(Work::DetectUsbType, 0);
}

fn vbus_det_rising(s: &mut SharedState) {
    log::debug!("VBUS rising detected");
    s.vbus_detected = true;
    s.work.queue(Work::DetectUsbType, 0);
}

fn usb_link_status(s: &mut SharedState) {
    log::debug!("USB link status changed");
    s.work.queue(Work::UsbLinkStatus, 0);
}

fn usb_thermal_prot_rising(s: &mut SharedState) {
    log::debug!("die temp above USB charger thermal protection threshold");
    s.work.queue(Work::UsbThermalCheck, 0);
}

fn usb_thermal_prot_falling(s: &mut SharedState) {
    log::debug!("die temp ok for USB charger thermal protection threshold");
    s.work.queue(Work::UsbThermalCheck, 0);
}

fn usb_charger_not_ok(s: &mut SharedState) {
    log::debug!("not allowed USB charger detected");
    s.work.queue(Work::UsbChargerNotOkCheck, 0);
}

fn vbus_overvoltage(s: &mut SharedState) {
    log::debug!("VBUS overvoltage detected");
    s.flags.insert(EventFlags::VBUS_OVV);
    s.request_notify(Source::Usb);
    s.work.queue(Work::HwFailureCheck, 0);
}

fn watchdog_expired(s: &mut SharedState) {
    log::debug!("charger watchdog expired");
    s.flags.insert(EventFlags::CHG_WD_EXP);
    // The source that was online has to be re-enabled before charging resumes.
    for source in [Source::Ac, Source::Usb] {
        let info = s.info_mut(source);
        if info.online {
            info.wd_expired = true;
            s.request_notify(source);
        }
    }
}

fn vbus_drop_end(s: &mut SharedState) {
    log::debug!("VBUS charger drop ended");
    s.flags.insert(EventFlags::VBUS_DROP_END);
    // The drop may have been a bad contact; retry the requested limit later.
    let delay_ms = u64::from(s.vbus_drop.retry_secs) * 1000;
    s.work.queue(Work::VbusDropEnd, delay_ms);
}
