//! One 802.11 station: PHY, MAC low and station manager wired together.

use embassy_time::Duration;
use std::cell::RefCell;
use std::rc::Rc;

use super::frame::{Frame, Mac48Address};
use super::mac_low::{MacContext, MacEvent, MacLow, MacLowListener, TxParams};
use super::mac_parameters::MacParameters;
use super::mode::{WifiMode, WifiPreamble};
use super::phy::{PhyConfig, PhyEvent, PhyListener, RxOutcome, Transmission, WifiPhy};
use super::station_manager::{RateControlConfig, StationManager, StationManagerConfig, build_station_manager};
use crate::error::ConfigError;
use crate::simulation::scheduler::EventQueue;
use crate::simulation::trace::TraceRecord;

/// Scheduled work for a device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Phy(PhyEvent),
    Mac(MacEvent),
}

/// Medium activity seen by a PHY, as announced when each period starts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Airtime {
    pub tx: Duration,
    pub rx: Duration,
    pub cca_busy: Duration,
    pub rx_ok: u64,
    pub rx_error: u64,
}

/// PHY listener accumulating [`Airtime`] into a shared cell.
pub struct AirtimeMonitor(Rc<RefCell<Airtime>>);

impl AirtimeMonitor {
    pub fn new(airtime: Rc<RefCell<Airtime>>) -> Self {
        Self(airtime)
    }
}

impl PhyListener for AirtimeMonitor {
    fn notify_rx_start(&mut self, duration: Duration) {
        let mut airtime = self.0.borrow_mut();
        airtime.rx = airtime.rx + duration;
    }

    fn notify_rx_end_ok(&mut self) {
        self.0.borrow_mut().rx_ok += 1;
    }

    fn notify_rx_end_error(&mut self) {
        self.0.borrow_mut().rx_error += 1;
    }

    fn notify_tx_start(&mut self, duration: Duration) {
        let mut airtime = self.0.borrow_mut();
        airtime.tx = airtime.tx + duration;
    }

    fn notify_cca_busy_start(&mut self, duration: Duration) {
        let mut airtime = self.0.borrow_mut();
        airtime.cca_busy = airtime.cca_busy + duration;
    }
}

pub struct WifiDevice {
    phy: WifiPhy,
    mac: MacLow,
    manager: Box<dyn StationManager>,
    airtime: Rc<RefCell<Airtime>>,
}

impl WifiDevice {
    pub fn new(
        address: Mac48Address,
        phy_config: &PhyConfig,
        station_config: &StationManagerConfig,
        rate_control: &RateControlConfig,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        let mut phy = WifiPhy::new(phy_config.clone(), seed)?;
        let standard = phy.standard();
        let manager = build_station_manager(station_config.clone(), rate_control, standard, phy.n_tx_power())?;
        let airtime = Rc::new(RefCell::new(Airtime::default()));
        phy.register_listener(Box::new(AirtimeMonitor::new(airtime.clone())));
        Ok(Self {
            phy,
            mac: MacLow::new(address, MacParameters::for_standard(standard)),
            manager,
            airtime,
        })
    }

    pub fn address(&self) -> Mac48Address {
        self.mac.address()
    }

    pub fn phy(&self) -> &WifiPhy {
        &self.phy
    }

    pub fn phy_mut(&mut self) -> &mut WifiPhy {
        &mut self.phy
    }

    pub fn mac(&self) -> &MacLow {
        &self.mac
    }

    pub fn manager(&self) -> &dyn StationManager {
        self.manager.as_ref()
    }

    pub fn manager_mut(&mut self) -> &mut dyn StationManager {
        self.manager.as_mut()
    }

    pub fn airtime(&self) -> Airtime {
        self.airtime.borrow().clone()
    }

    /// Medium time of a whole exchange for a frame of `size` bytes to `peer`.
    pub fn calculate_transmission_time(&mut self, size: u32, peer: Mac48Address, params: &TxParams) -> Duration {
        self.mac.calculate_transmission_time(self.manager.as_mut(), size, peer, params)
    }

    pub fn start_transmission(&mut self, queue: &mut dyn EventQueue<DeviceEvent>, listener: &mut dyn MacLowListener, frame: Frame, params: TxParams) {
        let mut ctx = MacContext {
            queue,
            phy: &mut self.phy,
            manager: self.manager.as_mut(),
            listener,
        };
        self.mac.start_transmission(&mut ctx, frame, params);
    }

    /// A signal reaches the antenna.
    pub fn start_receive(&mut self, queue: &mut dyn EventQueue<DeviceEvent>, frame: Frame, rx_power_dbm: f64, mode: WifiMode, preamble: WifiPreamble) {
        self.phy.start_receive(queue, frame, rx_power_dbm, mode, preamble);
    }

    pub fn handle_event(&mut self, queue: &mut dyn EventQueue<DeviceEvent>, listener: &mut dyn MacLowListener, event: DeviceEvent) {
        match event {
            DeviceEvent::Phy(PhyEvent::EndReceive { rx }) => {
                let Some(outcome) = self.phy.end_receive(queue, rx) else {
                    return;
                };
                let mut ctx = MacContext {
                    queue,
                    phy: &mut self.phy,
                    manager: self.manager.as_mut(),
                    listener,
                };
                match outcome {
                    RxOutcome::Ok { frame, snr, mode, .. } => self.mac.receive_ok(&mut ctx, frame, snr, mode),
                    RxOutcome::Error { frame, snr } => self.mac.receive_error(&mut ctx, &frame, snr),
                }
            }
            DeviceEvent::Mac(event) => {
                let mut ctx = MacContext {
                    queue,
                    phy: &mut self.phy,
                    manager: self.manager.as_mut(),
                    listener,
                };
                self.mac.handle_event(&mut ctx, event);
            }
        }
    }

    /// Frames put on the air since the last call.
    pub fn drain_transmissions(&mut self) -> Vec<Transmission> {
        self.phy.drain_transmissions()
    }

    /// PHY and station manager trace records, oldest first.
    pub fn drain_trace(&mut self) -> Vec<TraceRecord> {
        let mut records = self.phy.trace_mut().drain();
        records.extend(self.manager.trace_mut().drain());
        records.sort_by_key(|record| record.timestamp);
        records
    }
}
