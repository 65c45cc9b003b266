//! Simulated EV and EVSE controllers
//!
//! Stand-ins for the vehicle and charger hardware so both roles can run a
//! complete session on a desk. Each controller keeps its physical state
//! behind a short `parking_lot` lock.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{debug, info};
use v2g_core::{
    DcEvErrorCode, DcEvStatus, EnergyTransferMode, EvController, EvseController, EvseNotification,
    MeterInfo, PhysicalValue, SessionId,
};

use crate::config::{EvSimConfig, EvseSimConfig};

// =============================================================================
// EV
// =============================================================================

#[derive(Debug)]
struct EvState {
    soc: u8,
    rounds: u32,
    /// Current limit granted by the EVSE (A)
    granted_current: Option<PhysicalValue>,
}

/// Vehicle that charges a fixed SoC step per loop round
#[derive(Debug)]
pub struct SimulatedEv {
    config: EvSimConfig,
    state: Mutex<EvState>,
}

impl SimulatedEv {
    pub fn new(config: EvSimConfig) -> Self {
        let state = EvState {
            soc: config.initial_soc,
            rounds: 0,
            granted_current: None,
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn soc(&self) -> u8 {
        self.state.lock().soc
    }

    pub fn granted_current(&self) -> Option<PhysicalValue> {
        self.state.lock().granted_current
    }
}

impl EvController for SimulatedEv {
    fn evcc_id(&self) -> String {
        self.config.evcc_id.clone()
    }

    fn energy_transfer_mode(&self) -> EnergyTransferMode {
        self.config.energy_transfer_mode
    }

    fn target_voltage(&self) -> PhysicalValue {
        PhysicalValue::volts(self.config.target_voltage, 0)
    }

    fn target_current(&self) -> PhysicalValue {
        let requested = PhysicalValue::amperes(self.config.target_current, 0);
        match self.state.lock().granted_current {
            Some(granted) if granted.cmp_magnitude(&requested).is_lt() => granted,
            _ => requested,
        }
    }

    fn max_voltage(&self) -> PhysicalValue {
        PhysicalValue::volts(self.config.max_voltage, 0)
    }

    fn max_current(&self) -> PhysicalValue {
        PhysicalValue::amperes(self.config.max_current, 0)
    }

    fn dc_ev_status(&self) -> DcEvStatus {
        DcEvStatus {
            ev_ready: true,
            error_code: DcEvErrorCode::NoError,
            ress_soc: self.state.lock().soc,
        }
    }

    fn adjust_max_current(&self, value: PhysicalValue) {
        debug!(current = %value, "EVSE granted current");
        self.state.lock().granted_current = Some(value);
    }

    /// Each poll is one charging loop round
    fn is_charging_loop_active(&self) -> bool {
        let mut state = self.state.lock();
        if state.rounds >= self.config.charging_rounds {
            return false;
        }
        state.rounds += 1;
        state.soc = state.soc.saturating_add(self.config.soc_step).min(100);
        debug!(round = state.rounds, soc = state.soc, "Charging");
        true
    }

    fn is_charging_complete(&self) -> bool {
        let complete = self.state.lock().soc >= self.config.target_soc;
        if complete {
            info!(target_soc = self.config.target_soc, "Battery reached target SoC");
        }
        complete
    }
}

// =============================================================================
// EVSE
// =============================================================================

#[derive(Debug)]
struct EvseState {
    /// Output voltage (V)
    present_voltage: i32,
    target_voltage: i32,
    target_current: i32,
    authorization_polls: u32,
    cable_check_polls: u32,
    meter_reading: u64,
}

/// Charger whose output ramps towards the EV targets
#[derive(Debug)]
pub struct SimulatedEvse {
    config: EvseSimConfig,
    state: Mutex<EvseState>,
}

impl SimulatedEvse {
    pub fn new(config: EvseSimConfig) -> Self {
        let state = EvseState {
            present_voltage: 0,
            target_voltage: 0,
            target_current: 0,
            authorization_polls: 0,
            cable_check_polls: 0,
            meter_reading: 0,
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn meter_reading(&self) -> u64 {
        self.state.lock().meter_reading
    }
}

/// Whole volts or amperes of a physical value, rounded
fn whole_units(value: &PhysicalValue) -> i32 {
    value.as_f64().round() as i32
}

fn clamp_i16(value: i32) -> i16 {
    value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

impl EvseController for SimulatedEvse {
    fn evse_id(&self) -> String {
        self.config.evse_id.clone()
    }

    /// One outlet: the newest session restarts authorization and cable check.
    /// The meter keeps counting.
    fn session_started(&self, session_id: SessionId) {
        let mut state = self.state.lock();
        state.authorization_polls = 0;
        state.cable_check_polls = 0;
        state.present_voltage = 0;
        state.target_voltage = 0;
        state.target_current = 0;
        debug!(%session_id, "EVSE reset for new session");
    }

    fn supported_energy_transfer_modes(&self) -> Vec<EnergyTransferMode> {
        self.config.energy_transfer_modes.clone()
    }

    fn present_voltage(&self) -> PhysicalValue {
        PhysicalValue::volts(clamp_i16(self.state.lock().present_voltage), 0)
    }

    fn present_current(&self) -> PhysicalValue {
        let state = self.state.lock();
        let current = state.target_current.min(i32::from(self.config.max_current));
        PhysicalValue::amperes(clamp_i16(current), 0)
    }

    fn max_current(&self) -> PhysicalValue {
        PhysicalValue::amperes(self.config.max_current, 0)
    }

    fn is_authorized(&self) -> bool {
        let mut state = self.state.lock();
        if state.authorization_polls < self.config.authorization_rounds {
            state.authorization_polls += 1;
            return false;
        }
        true
    }

    fn is_cable_check_finished(&self) -> bool {
        let mut state = self.state.lock();
        if state.cable_check_polls < self.config.cable_check_rounds {
            state.cable_check_polls += 1;
            return false;
        }
        true
    }

    fn notification(&self) -> EvseNotification {
        EvseNotification::None
    }

    /// Each reading counts one round of delivered energy
    fn meter_info(&self) -> MeterInfo {
        let mut state = self.state.lock();
        state.meter_reading += self.config.energy_per_round_wh;
        let t_meter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .ok();
        MeterInfo {
            meter_id: self.config.meter_id.clone(),
            meter_reading: Some(state.meter_reading),
            t_meter,
        }
    }

    fn is_receipt_required(&self) -> bool {
        self.config.receipt_required
    }

    /// Move the output one voltage step towards the requested target
    fn set_target(&self, voltage: PhysicalValue, current: PhysicalValue) {
        let mut state = self.state.lock();
        state.target_voltage = whole_units(&voltage);
        state.target_current = whole_units(&current);

        let step = i32::from(self.config.voltage_step.max(1));
        let delta = state.target_voltage - state.present_voltage;
        state.present_voltage += delta.clamp(-step, step);
        debug!(
            present = state.present_voltage,
            target = state.target_voltage,
            "EVSE output voltage"
        );
    }
}
