//! Message bodies, one payload struct per message kind

use std::net::{IpAddr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use super::kind::MessageKind;
use super::types::*;
use super::SessionId;
use crate::error::{CodecError, CodecResult};

// ===== Application protocol handshake =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedAppProtocolReq {
    pub app_protocols: Vec<AppProtocol>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedAppProtocolRes {
    pub response_code: AppProtocolResponseCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<u8>,
}

// ===== SECC discovery =====

/// SDP request, 2 bytes on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeccDiscoveryReq {
    pub security: Security,
    pub transport_protocol: TransportProtocol,
}

impl SeccDiscoveryReq {
    pub const LEN: usize = 2;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        [self.security.to_byte(), self.transport_protocol.to_byte()]
    }

    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() != Self::LEN {
            return Err(CodecError::Malformed(format!(
                "SDP request must be {} bytes, got {}",
                Self::LEN,
                bytes.len()
            )));
        }
        Ok(Self {
            security: parse_security(bytes[0])?,
            transport_protocol: parse_transport(bytes[1])?,
        })
    }
}

/// SDP response, 20 bytes on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeccDiscoveryRes {
    pub address: IpAddr,
    pub port: u16,
    pub security: Security,
    pub transport_protocol: TransportProtocol,
}

impl SeccDiscoveryRes {
    pub const LEN: usize = 20;

    /// IPv4 addresses are carried as IPv4-mapped IPv6 addresses
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let v6 = match self.address {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        let mut out = [0u8; Self::LEN];
        out[..16].copy_from_slice(&v6.octets());
        out[16..18].copy_from_slice(&self.port.to_be_bytes());
        out[18] = self.security.to_byte();
        out[19] = self.transport_protocol.to_byte();
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() != Self::LEN {
            return Err(CodecError::Malformed(format!(
                "SDP response must be {} bytes, got {}",
                Self::LEN,
                bytes.len()
            )));
        }
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&bytes[..16]);
        let v6 = Ipv6Addr::from(octets);
        let address = match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        };
        Ok(Self {
            address,
            port: u16::from_be_bytes([bytes[16], bytes[17]]),
            security: parse_security(bytes[18])?,
            transport_protocol: parse_transport(bytes[19])?,
        })
    }
}

fn parse_security(byte: u8) -> CodecResult<Security> {
    Security::from_byte(byte)
        .ok_or_else(|| CodecError::Malformed(format!("unknown security byte 0x{:02X}", byte)))
}

fn parse_transport(byte: u8) -> CodecResult<TransportProtocol> {
    TransportProtocol::from_byte(byte).ok_or_else(|| {
        CodecError::Malformed(format!("unknown transport protocol byte 0x{:02X}", byte))
    })
}

// ===== Session setup and service selection =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSetupReq {
    /// EVCC identifier, usually the MAC address in hex
    pub evcc_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSetupRes {
    pub response_code: ResponseCode,
    pub evse_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDiscoveryReq {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDiscoveryRes {
    pub response_code: ResponseCode,
    pub payment_options: Vec<PaymentOption>,
    pub energy_transfer_modes: Vec<EnergyTransferMode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentServiceSelectionReq {
    pub selected_payment_option: PaymentOption,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentServiceSelectionRes {
    pub response_code: ResponseCode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationReq {
    /// Challenge echoed back when contract payment is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gen_challenge: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRes {
    pub response_code: ResponseCode,
    pub evse_processing: EvseProcessing,
}

// ===== Charge parameters and DC preparation =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeParameterDiscoveryReq {
    pub requested_energy_transfer_mode: EnergyTransferMode,
    pub max_voltage: PhysicalValue,
    pub max_current: PhysicalValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dc_ev_status: Option<DcEvStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeParameterDiscoveryRes {
    pub response_code: ResponseCode,
    pub evse_processing: EvseProcessing,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sa_schedule_tuple_id: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evse_max_current: Option<PhysicalValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CableCheckReq {
    pub dc_ev_status: DcEvStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CableCheckRes {
    pub response_code: ResponseCode,
    pub evse_processing: EvseProcessing,
    #[serde(default)]
    pub evse_status: EvseStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreChargeReq {
    pub dc_ev_status: DcEvStatus,
    pub target_voltage: PhysicalValue,
    pub target_current: PhysicalValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreChargeRes {
    pub response_code: ResponseCode,
    pub present_voltage: PhysicalValue,
    #[serde(default)]
    pub evse_status: EvseStatus,
}

// ===== Power delivery and charging loops =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerDeliveryReq {
    pub charge_progress: ChargeProgress,
    pub sa_schedule_tuple_id: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dc_ev_status: Option<DcEvStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerDeliveryRes {
    pub response_code: ResponseCode,
    #[serde(default)]
    pub evse_status: EvseStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargingStatusReq {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargingStatusRes {
    pub response_code: ResponseCode,
    pub evse_id: String,
    pub sa_schedule_tuple_id: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evse_max_current: Option<PhysicalValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter_info: Option<MeterInfo>,
    #[serde(default)]
    pub receipt_required: bool,
    #[serde(default)]
    pub evse_status: EvseStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentDemandReq {
    pub dc_ev_status: DcEvStatus,
    pub target_voltage: PhysicalValue,
    pub target_current: PhysicalValue,
    pub charging_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentDemandRes {
    pub response_code: ResponseCode,
    pub present_voltage: PhysicalValue,
    pub present_current: PhysicalValue,
    pub evse_id: String,
    pub sa_schedule_tuple_id: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter_info: Option<MeterInfo>,
    #[serde(default)]
    pub receipt_required: bool,
    #[serde(default)]
    pub evse_status: EvseStatus,
}

// ===== Metering receipt and session stop =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeteringReceiptReq {
    pub session_id: SessionId,
    pub sa_schedule_tuple_id: u8,
    pub meter_info: MeterInfo,
    /// Signature over [`MeteringReceiptReq::signed_content`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Vec<u8>>,
}

impl MeteringReceiptReq {
    /// Canonical bytes covered by the receipt signature
    pub fn signed_content(&self) -> CodecResult<Vec<u8>> {
        #[derive(Serialize)]
        struct Signed<'a> {
            session_id: &'a SessionId,
            sa_schedule_tuple_id: u8,
            meter_info: &'a MeterInfo,
        }
        Ok(serde_json::to_vec(&Signed {
            session_id: &self.session_id,
            sa_schedule_tuple_id: self.sa_schedule_tuple_id,
            meter_info: &self.meter_info,
        })?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeteringReceiptRes {
    pub response_code: ResponseCode,
    #[serde(default)]
    pub evse_status: EvseStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStopReq {
    pub charging_session: ChargingSession,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStopRes {
    pub response_code: ResponseCode,
}

// ===== Body =====

/// A body struct together with the kind it is carried as
pub trait Payload: Into<Body> {
    const KIND: MessageKind;

    fn from_body(body: &Body) -> Option<&Self>;
}

macro_rules! bodies {
    ($($name:ident),+ $(,)?) => {
        /// Typed message body; the variant determines the [`MessageKind`]
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub enum Body {
            $($name($name),)+
        }

        impl Body {
            pub fn kind(&self) -> MessageKind {
                match self {
                    $(Body::$name(_) => MessageKind::$name,)+
                }
            }
        }

        $(
            impl From<$name> for Body {
                fn from(body: $name) -> Self {
                    Body::$name(body)
                }
            }

            impl Payload for $name {
                const KIND: MessageKind = MessageKind::$name;

                fn from_body(body: &Body) -> Option<&Self> {
                    match body {
                        Body::$name(payload) => Some(payload),
                        _ => None,
                    }
                }
            }
        )+
    };
}

bodies! {
    SupportedAppProtocolReq,
    SupportedAppProtocolRes,
    SeccDiscoveryReq,
    SeccDiscoveryRes,
    SessionSetupReq,
    SessionSetupRes,
    ServiceDiscoveryReq,
    ServiceDiscoveryRes,
    PaymentServiceSelectionReq,
    PaymentServiceSelectionRes,
    AuthorizationReq,
    AuthorizationRes,
    ChargeParameterDiscoveryReq,
    ChargeParameterDiscoveryRes,
    CableCheckReq,
    CableCheckRes,
    PreChargeReq,
    PreChargeRes,
    PowerDeliveryReq,
    PowerDeliveryRes,
    ChargingStatusReq,
    ChargingStatusRes,
    CurrentDemandReq,
    CurrentDemandRes,
    MeteringReceiptReq,
    MeteringReceiptRes,
    SessionStopReq,
    SessionStopRes,
}

impl Body {
    /// Response code of a V2G response
    ///
    /// The app protocol handshake and SECC discovery use their own result
    /// types and return `None`, as do all requests.
    pub fn response_code(&self) -> Option<ResponseCode> {
        let code = match self {
            Body::SessionSetupRes(res) => res.response_code,
            Body::ServiceDiscoveryRes(res) => res.response_code,
            Body::PaymentServiceSelectionRes(res) => res.response_code,
            Body::AuthorizationRes(res) => res.response_code,
            Body::ChargeParameterDiscoveryRes(res) => res.response_code,
            Body::CableCheckRes(res) => res.response_code,
            Body::PreChargeRes(res) => res.response_code,
            Body::PowerDeliveryRes(res) => res.response_code,
            Body::ChargingStatusRes(res) => res.response_code,
            Body::CurrentDemandRes(res) => res.response_code,
            Body::MeteringReceiptRes(res) => res.response_code,
            Body::SessionStopRes(res) => res.response_code,
            _ => return None,
        };
        Some(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    #[test]
    fn test_body_kind_matches_variant() {
        let body: Body = SessionStopReq {
            charging_session: ChargingSession::Terminate,
        }
        .into();
        assert_eq!(body.kind(), MessageKind::SessionStopReq);
        assert_eq!(body.response_code(), None);

        let body: Body = PowerDeliveryRes {
            response_code: ResponseCode::FailedSequenceError,
            evse_status: EvseStatus::default(),
        }
        .into();
        assert_eq!(body.kind(), MessageKind::PowerDeliveryRes);
        assert_eq!(body.response_code(), Some(ResponseCode::FailedSequenceError));
        assert!(PowerDeliveryRes::from_body(&body).is_some());
        assert!(PowerDeliveryReq::from_body(&body).is_none());
    }

    #[test]
    fn test_sdp_response_ipv4_mapped() {
        let res = SeccDiscoveryRes {
            address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)),
            port: 64_109,
            security: Security::Tls,
            transport_protocol: TransportProtocol::Tcp,
        };
        let bytes = res.to_bytes();
        assert_eq!(&bytes[..12], &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF]);
        assert_eq!(&bytes[12..16], &[192, 168, 1, 10]);
        assert_eq!(&bytes[16..18], &64_109u16.to_be_bytes());
        assert_eq!(SeccDiscoveryRes::from_bytes(&bytes).unwrap(), res);
    }

    #[test]
    fn test_sdp_request_rejects_bad_input() {
        assert!(SeccDiscoveryReq::from_bytes(&[0x00]).is_err());
        assert!(SeccDiscoveryReq::from_bytes(&[0x00, 0x42]).is_err());
        let req = SeccDiscoveryReq::from_bytes(&[0x10, 0x00]).unwrap();
        assert_eq!(req.security, Security::NoTls);
    }

    #[test]
    fn test_receipt_signed_content_ignores_signature() {
        let mut req = MeteringReceiptReq {
            session_id: SessionId([1; 8]),
            sa_schedule_tuple_id: 1,
            meter_info: MeterInfo {
                meter_id: "METER-1".to_string(),
                meter_reading: Some(1500),
                t_meter: None,
            },
            signature: None,
        };
        let unsigned = req.signed_content().unwrap();
        req.signature = Some(vec![1, 2, 3]);
        assert_eq!(req.signed_content().unwrap(), unsigned);
    }
}
