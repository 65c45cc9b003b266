//! Field types read by the session engine

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// V2G response code (ISO 15118-2 `responseCodeType`, subset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseCode {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "OK_NewSessionEstablished")]
    OkNewSessionEstablished,
    #[serde(rename = "OK_OldSessionJoined")]
    OkOldSessionJoined,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "FAILED_SequenceError")]
    FailedSequenceError,
    #[serde(rename = "FAILED_SignatureError")]
    FailedSignatureError,
    #[serde(rename = "FAILED_UnknownSession")]
    FailedUnknownSession,
    #[serde(rename = "FAILED_NoChargeServiceSelected")]
    FailedNoChargeServiceSelected,
    #[serde(rename = "FAILED_PaymentSelectionInvalid")]
    FailedPaymentSelectionInvalid,
    #[serde(rename = "FAILED_WrongEnergyTransferMode")]
    FailedWrongEnergyTransferMode,
}

impl ResponseCode {
    pub fn is_ok(&self) -> bool {
        matches!(
            self,
            Self::Ok | Self::OkNewSessionEstablished | Self::OkOldSessionJoined
        )
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::OkNewSessionEstablished => "OK_NewSessionEstablished",
            Self::OkOldSessionJoined => "OK_OldSessionJoined",
            Self::Failed => "FAILED",
            Self::FailedSequenceError => "FAILED_SequenceError",
            Self::FailedSignatureError => "FAILED_SignatureError",
            Self::FailedUnknownSession => "FAILED_UnknownSession",
            Self::FailedNoChargeServiceSelected => "FAILED_NoChargeServiceSelected",
            Self::FailedPaymentSelectionInvalid => "FAILED_PaymentSelectionInvalid",
            Self::FailedWrongEnergyTransferMode => "FAILED_WrongEnergyTransferMode",
        };
        f.write_str(name)
    }
}

/// Outcome of the application protocol handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppProtocolResponseCode {
    #[serde(rename = "OK_SuccessfulNegotiation")]
    SuccessfulNegotiation,
    #[serde(rename = "OK_SuccessfulNegotiationWithMinorDeviation")]
    SuccessfulNegotiationWithMinorDeviation,
    #[serde(rename = "Failed_NoNegotiation")]
    FailedNoNegotiation,
}

impl AppProtocolResponseCode {
    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::FailedNoNegotiation)
    }
}

/// One entry of a supported-application-protocol list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppProtocol {
    /// Protocol namespace URN, e.g. `urn:iso:15118:2:2013:MsgDef`
    pub namespace: String,
    pub major: u32,
    pub minor: u32,
    pub schema_id: u8,
    /// 1 is the highest priority
    #[serde(default = "default_priority")]
    pub priority: u8,
}

fn default_priority() -> u8 {
    1
}

impl AppProtocol {
    pub fn new(namespace: impl Into<String>, major: u32, minor: u32) -> Self {
        Self {
            namespace: namespace.into(),
            major,
            minor,
            schema_id: 0,
            priority: default_priority(),
        }
    }

    pub fn with_schema_id(mut self, schema_id: u8) -> Self {
        self.schema_id = schema_id;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// Namespace of ISO 15118-2:2013 message definitions
pub const ISO_15118_2_2013_NAMESPACE: &str = "urn:iso:15118:2:2013:MsgDef";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvseProcessing {
    Finished,
    Ongoing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvseNotification {
    #[default]
    None,
    StopCharging,
    ReNegotiation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeProgress {
    Start,
    Stop,
    Renegotiate,
}

impl fmt::Display for ChargeProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "START",
            Self::Stop => "STOP_CHARGING",
            Self::Renegotiate => "RE_NEGOTIATION",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingSession {
    Terminate,
    Pause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnergyTransferMode {
    AcSinglePhaseCore,
    AcThreePhaseCore,
    DcCore,
    DcExtended,
    DcComboCore,
    DcUnique,
}

impl EnergyTransferMode {
    pub fn is_dc(&self) -> bool {
        !matches!(self, Self::AcSinglePhaseCore | Self::AcThreePhaseCore)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentOption {
    Contract,
    ExternalPayment,
}

/// Security requested/offered during SECC discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Security {
    Tls,
    NoTls,
}

impl Security {
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Tls => 0x00,
            Self::NoTls => 0x10,
        }
    }

    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Tls),
            0x10 => Some(Self::NoTls),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

impl TransportProtocol {
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Tcp => 0x00,
            Self::Udp => 0x10,
        }
    }

    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Tcp),
            0x10 => Some(Self::Udp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "V")]
    Volt,
    #[serde(rename = "A")]
    Ampere,
    #[serde(rename = "W")]
    Watt,
    #[serde(rename = "Wh")]
    WattHour,
    #[serde(rename = "s")]
    Second,
}

/// Physical quantity as `value * 10^multiplier` in `unit`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalValue {
    pub value: i16,
    pub multiplier: i8,
    pub unit: Unit,
}

impl PhysicalValue {
    pub fn new(value: i16, multiplier: i8, unit: Unit) -> Self {
        Self {
            value,
            multiplier,
            unit,
        }
    }

    pub fn volts(value: i16, multiplier: i8) -> Self {
        Self::new(value, multiplier, Unit::Volt)
    }

    pub fn amperes(value: i16, multiplier: i8) -> Self {
        Self::new(value, multiplier, Unit::Ampere)
    }

    /// Approximate value for display and simulation
    pub fn as_f64(&self) -> f64 {
        f64::from(self.value) * 10f64.powi(i32::from(self.multiplier))
    }

    /// Mantissa rescaled to `exponent`, `None` if it would overflow
    fn scaled_to(&self, exponent: i32) -> Option<i128> {
        let shift = u32::try_from(i32::from(self.multiplier) - exponent).ok()?;
        10i128.checked_pow(shift)?.checked_mul(i128::from(self.value))
    }

    /// Compare magnitudes exactly, independent of the chosen multiplier
    ///
    /// `(1200, -1)` and `(120, 0)` are both 120.0 and compare equal.
    pub fn cmp_magnitude(&self, other: &Self) -> Ordering {
        let exponent = i32::from(self.multiplier.min(other.multiplier));
        match (self.scaled_to(exponent), other.scaled_to(exponent)) {
            (Some(a), Some(b)) => a.cmp(&b),
            // Only reachable for multipliers far outside the schema range
            _ => self
                .as_f64()
                .partial_cmp(&other.as_f64())
                .unwrap_or(Ordering::Equal),
        }
    }

    pub fn magnitude_eq(&self, other: &Self) -> bool {
        self.cmp_magnitude(other) == Ordering::Equal
    }
}

impl fmt::Display for PhysicalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.unit {
            Unit::Volt => "V",
            Unit::Ampere => "A",
            Unit::Watt => "W",
            Unit::WattHour => "Wh",
            Unit::Second => "s",
        };
        write!(f, "{}e{} {}", self.value, self.multiplier, unit)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DcEvErrorCode {
    #[default]
    NoError,
    FailedRessTemperatureInhibit,
    FailedEvShiftPosition,
    FailedChargerConnectorLockFault,
    FailedEvRessMalfunction,
    FailedChargingCurrentDifferential,
    FailedChargingVoltageOutOfRange,
    FailedChargingSystemIncompatibility,
}

/// DC status the EV reports with every DC request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DcEvStatus {
    pub ev_ready: bool,
    pub error_code: DcEvErrorCode,
    /// State of charge in percent
    pub ress_soc: u8,
}

/// EVSE status carried in charging-loop responses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvseStatus {
    pub notification: EvseNotification,
    /// Seconds the EVSE grants the EV to react to the notification
    pub notification_max_delay: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterInfo {
    pub meter_id: String,
    /// Meter reading in Wh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter_reading: Option<u64>,
    /// Unix timestamp of the reading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_meter: Option<i64>,
}
