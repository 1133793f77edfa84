//! Variable-length parameters carried by INIT, INIT-ACK and HEARTBEAT chunks.

use super::{split_tlvs, write_tlv};
use crate::error::Result;

pub const HEARTBEAT_INFO: u16 = 1;
pub const STATE_COOKIE: u16 = 7;
pub const UNRECOGNIZED_PARAMETER: u16 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parameter {
    /// Opaque sender data echoed back in HEARTBEAT-ACK
    HeartbeatInfo(Vec<u8>),
    /// Opaque cookie from INIT-ACK, echoed back in COOKIE-ECHO
    StateCookie(Vec<u8>),
    /// Copy of a parameter the INIT-ACK sender did not understand
    UnrecognizedParameter(Vec<u8>),
    Unknown { param_type: u16, value: Vec<u8> },
}

/// What to do with a parameter whose type is not understood, taken from the
/// two high bits of the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownParameterAction {
    /// Keep processing the remaining parameters
    pub skip: bool,
    /// Report the parameter back to the sender
    pub report: bool,
}

impl UnknownParameterAction {
    pub fn for_type(param_type: u16) -> Self {
        Self {
            skip: param_type & 0x8000 != 0,
            report: param_type & 0x4000 != 0,
        }
    }
}

impl Parameter {
    pub fn param_type(&self) -> u16 {
        match self {
            Parameter::HeartbeatInfo(_) => HEARTBEAT_INFO,
            Parameter::StateCookie(_) => STATE_COOKIE,
            Parameter::UnrecognizedParameter(_) => UNRECOGNIZED_PARAMETER,
            Parameter::Unknown { param_type, .. } => *param_type,
        }
    }

    fn value(&self) -> &[u8] {
        match self {
            Parameter::HeartbeatInfo(v)
            | Parameter::StateCookie(v)
            | Parameter::UnrecognizedParameter(v) => v,
            Parameter::Unknown { value, .. } => value,
        }
    }

    pub fn parse_all(data: &[u8]) -> Result<Vec<Parameter>> {
        Ok(split_tlvs(data)?
            .into_iter()
            .map(|(param_type, value)| {
                let value = value.to_vec();
                match param_type {
                    HEARTBEAT_INFO => Parameter::HeartbeatInfo(value),
                    STATE_COOKIE => Parameter::StateCookie(value),
                    UNRECOGNIZED_PARAMETER => Parameter::UnrecognizedParameter(value),
                    _ => Parameter::Unknown { param_type, value },
                }
            })
            .collect())
    }

    pub fn write_all(params: &[Parameter], buf: &mut Vec<u8>) {
        for param in params {
            write_tlv(buf, param.param_type(), param.value());
        }
    }

    /// UNRECOGNIZED-PARAMETER entries answering the unknown parameters of an
    /// INIT. Processing stops at the first unknown type without the skip bit.
    pub fn unrecognized_report(params: &[Parameter]) -> Vec<Parameter> {
        let mut report = Vec::new();
        for param in params {
            let Parameter::Unknown { param_type, value } = param else {
                continue;
            };
            let action = UnknownParameterAction::for_type(*param_type);
            if action.report {
                let mut tlv = Vec::new();
                write_tlv(&mut tlv, *param_type, value);
                report.push(Parameter::UnrecognizedParameter(tlv));
            }
            if !action.skip {
                break;
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_keep_order_and_unknowns() {
        let params = vec![
            Parameter::StateCookie(vec![1, 2, 3, 4, 5]),
            Parameter::Unknown {
                param_type: 0x8008,
                value: vec![0xC0],
            },
        ];
        let mut buf = Vec::new();
        Parameter::write_all(&params, &mut buf);

        assert_eq!(Parameter::parse_all(&buf).unwrap(), params);
    }

    #[test]
    fn test_unknown_parameter_action_bits() {
        let stop = UnknownParameterAction::for_type(0x0005);
        assert!(!stop.skip && !stop.report);

        let stop_report = UnknownParameterAction::for_type(0x4005);
        assert!(!stop_report.skip && stop_report.report);

        let skip = UnknownParameterAction::for_type(0x8008);
        assert!(skip.skip && !skip.report);

        let skip_report = UnknownParameterAction::for_type(0xC000);
        assert!(skip_report.skip && skip_report.report);
    }

    #[test]
    fn test_unrecognized_report() {
        let params = vec![
            Parameter::StateCookie(vec![1]),
            Parameter::Unknown {
                param_type: 0xC001,
                value: vec![9, 9],
            },
            Parameter::Unknown {
                param_type: 0x8002,
                value: vec![],
            },
            Parameter::Unknown {
                param_type: 0x4003,
                value: vec![1],
            },
            Parameter::Unknown {
                param_type: 0xC004,
                value: vec![2],
            },
        ];

        let report = Parameter::unrecognized_report(&params);
        assert_eq!(
            report,
            vec![
                Parameter::UnrecognizedParameter(vec![0xC0, 0x01, 0, 6, 9, 9, 0, 0]),
                Parameter::UnrecognizedParameter(vec![0x40, 0x03, 0, 5, 1, 0, 0, 0]),
            ]
        );
    }
}
