use super::{Decoder, Layout, Reader};
use crate::error::DecodeError;
use serde::Serialize;

/// Value of a single warning slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Warning {
    Normal,
    BelowLowerLimit,
    AboveUpperLimit,
    UserDefined(u8),
    OtherFault,
    Unknown(u8),
}

impl From<u8> for Warning {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Warning::Normal,
            0x01 => Warning::BelowLowerLimit,
            0x02 => Warning::AboveUpperLimit,
            0x80..=0xEF => Warning::UserDefined(value),
            0xF0 => Warning::OtherFault,
            other => Warning::Unknown(other),
        }
    }
}

impl Warning {
    pub fn is_normal(&self) -> bool {
        *self == Warning::Normal
    }
}

/// The status bytes that carry independent bit flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusChannel {
    Protection1,
    Protection2,
    System,
    Configuration,
    Fault,
    Warning1,
    Warning2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusFlag {
    CellOverVoltage,
    CellUnderVoltage,
    PackOverVoltage,
    PackUnderVoltage,
    ChargeOverCurrent,
    DischargeOverCurrent,
    ShortCircuit,
    ChargeOverTemperature,
    DischargeOverTemperature,
    ChargeUnderTemperature,
    DischargeUnderTemperature,
    MosfetOverTemperature,
    EnvironmentOverTemperature,
    EnvironmentUnderTemperature,
    FullyCharged,
    CurrentLimiterOff,
    ChargeMosfetOn,
    DischargeMosfetOn,
    Discharging,
    ReversePolarity,
    Charging,
    Heartbeat,
    BuzzerEnabled,
    ChargeMosfetOff,
    DischargeMosfetOff,
    CurrentLimiterLowGear,
    CurrentLimiterEnabled,
    LedAlarmEnabled,
    ChargeMosfetFault,
    DischargeMosfetFault,
    TemperatureSensorFault,
    CellFault,
    SamplingFault,
    LowPower,
}

use StatusChannel as C;
use StatusFlag as F;

/// (channel, bit, flag). Bits missing here end up in [`Bitfield::unknown_bits`].
const FLAG_TABLE: &[(StatusChannel, u8, StatusFlag)] = &[
    (C::Protection1, 0, F::CellOverVoltage),
    (C::Protection1, 1, F::CellUnderVoltage),
    (C::Protection1, 2, F::PackOverVoltage),
    (C::Protection1, 3, F::PackUnderVoltage),
    (C::Protection1, 4, F::ChargeOverCurrent),
    (C::Protection1, 5, F::DischargeOverCurrent),
    (C::Protection1, 6, F::ShortCircuit),
    (C::Protection2, 0, F::ChargeOverTemperature),
    (C::Protection2, 1, F::DischargeOverTemperature),
    (C::Protection2, 2, F::ChargeUnderTemperature),
    (C::Protection2, 3, F::DischargeUnderTemperature),
    (C::Protection2, 4, F::MosfetOverTemperature),
    (C::Protection2, 5, F::EnvironmentOverTemperature),
    (C::Protection2, 6, F::EnvironmentUnderTemperature),
    (C::Protection2, 7, F::FullyCharged),
    (C::System, 0, F::CurrentLimiterOff),
    (C::System, 1, F::ChargeMosfetOn),
    (C::System, 2, F::DischargeMosfetOn),
    (C::System, 3, F::Discharging),
    (C::System, 4, F::ReversePolarity),
    (C::System, 5, F::Charging),
    (C::System, 7, F::Heartbeat),
    (C::Configuration, 0, F::BuzzerEnabled),
    (C::Configuration, 1, F::ChargeMosfetOff),
    (C::Configuration, 2, F::DischargeMosfetOff),
    (C::Configuration, 3, F::CurrentLimiterLowGear),
    (C::Configuration, 4, F::CurrentLimiterEnabled),
    (C::Configuration, 5, F::LedAlarmEnabled),
    (C::Fault, 0, F::ChargeMosfetFault),
    (C::Fault, 1, F::DischargeMosfetFault),
    (C::Fault, 2, F::TemperatureSensorFault),
    (C::Fault, 4, F::CellFault),
    (C::Fault, 5, F::SamplingFault),
    (C::Warning1, 0, F::CellOverVoltage),
    (C::Warning1, 1, F::CellUnderVoltage),
    (C::Warning1, 2, F::PackOverVoltage),
    (C::Warning1, 3, F::PackUnderVoltage),
    (C::Warning1, 4, F::ChargeOverCurrent),
    (C::Warning1, 5, F::DischargeOverCurrent),
    (C::Warning2, 0, F::ChargeOverTemperature),
    (C::Warning2, 1, F::DischargeOverTemperature),
    (C::Warning2, 2, F::ChargeUnderTemperature),
    (C::Warning2, 3, F::DischargeUnderTemperature),
    (C::Warning2, 4, F::EnvironmentOverTemperature),
    (C::Warning2, 5, F::EnvironmentUnderTemperature),
    (C::Warning2, 6, F::MosfetOverTemperature),
    (C::Warning2, 7, F::LowPower),
];

/// One status byte: raw value, named flags, and whatever bits have no name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bitfield {
    pub raw: u8,
    pub flags: Vec<StatusFlag>,
    pub unknown_bits: u8,
}

impl Bitfield {
    pub fn decode(channel: StatusChannel, raw: u8) -> Self {
        let mut flags = Vec::new();
        let mut mapped = 0u8;
        for (_, bit, flag) in FLAG_TABLE.iter().filter(|(c, _, _)| *c == channel) {
            mapped |= 1 << bit;
            if raw & (1 << bit) != 0 {
                flags.push(*flag);
            }
        }
        let unknown_bits = raw & !mapped;
        if unknown_bits != 0 {
            log::debug!("{channel:?} has unmapped bits set: {unknown_bits:#010b}");
        }
        Self {
            raw,
            flags,
            unknown_bits,
        }
    }

    pub fn contains(&self, flag: StatusFlag) -> bool {
        self.flags.contains(&flag)
    }
}

/// Alarm and protection state of one pack.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusRecord {
    pub cell_warnings: Vec<Warning>,
    pub temperature_warnings: Vec<Warning>,
    pub charge_current_warning: Option<Warning>,
    pub total_voltage_warning: Option<Warning>,
    pub discharge_current_warning: Option<Warning>,
    pub protection1: Option<Bitfield>,
    pub protection2: Option<Bitfield>,
    pub system: Option<Bitfield>,
    pub configuration: Option<Bitfield>,
    pub fault: Option<Bitfield>,
    /// Bit n set means cell n+1 is balancing.
    pub balancing: Option<u16>,
    pub warning1: Option<Bitfield>,
    pub warning2: Option<Bitfield>,
    /// Status bytes 1 to 5 of the V20 layout, not interpreted.
    pub legacy_status: Option<Vec<u8>>,
}

impl StatusRecord {
    pub(crate) fn decode(decoder: &Decoder, payload: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(payload);
        decoder.header(&mut reader)?;

        let cells = decoder.cell_count(&mut reader, 1)?;
        let cell_warnings = (0..cells)
            .filter_map(|_| reader.u8())
            .map(Warning::from)
            .collect();
        let temperatures =
            decoder.temperature_count(&mut reader, 1, decoder.layout() == Layout::V20)?;
        let temperature_warnings = (0..temperatures)
            .filter_map(|_| reader.u8())
            .map(Warning::from)
            .collect();

        let mut record = StatusRecord {
            cell_warnings,
            temperature_warnings,
            charge_current_warning: reader.u8().map(Warning::from),
            total_voltage_warning: reader.u8().map(Warning::from),
            discharge_current_warning: reader.u8().map(Warning::from),
            ..Default::default()
        };

        match decoder.layout() {
            Layout::V25 => {
                let mut bitfield = |channel| reader.u8().map(|raw| Bitfield::decode(channel, raw));
                record.protection1 = bitfield(C::Protection1);
                record.protection2 = bitfield(C::Protection2);
                record.system = bitfield(C::System);
                record.configuration = bitfield(C::Configuration);
                record.fault = bitfield(C::Fault);
                record.balancing = reader.u16();
                record.warning1 = reader.u8().map(|raw| Bitfield::decode(C::Warning1, raw));
                record.warning2 = reader.u8().map(|raw| Bitfield::decode(C::Warning2, raw));
            }
            Layout::V20 => {
                if !decoder.features().skip_status_flags {
                    record.legacy_status = reader.bytes(5).map(<[u8]>::to_vec);
                }
            }
        }
        if reader.remaining() > 0 {
            log::warn!(
                "Length mismatch reading status information, {} bytes left",
                reader.remaining()
            );
        }
        Ok(record)
    }

    /// All warning slots that are not normal, for display.
    pub fn active_warnings(&self) -> impl Iterator<Item = (String, Warning)> + '_ {
        let cells = self
            .cell_warnings
            .iter()
            .enumerate()
            .map(|(i, w)| (format!("cell {}", i + 1), *w));
        let temperatures = self
            .temperature_warnings
            .iter()
            .enumerate()
            .map(|(i, w)| (format!("temperature {}", i + 1), *w));
        let singles = [
            ("charge current", self.charge_current_warning),
            ("total voltage", self.total_voltage_warning),
            ("discharge current", self.discharge_current_warning),
        ]
        .into_iter()
        .filter_map(|(name, w)| w.map(|w| (name.to_string(), w)));
        cells
            .chain(temperatures)
            .chain(singles)
            .filter(|(_, w)| !w.is_normal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::tests::{decoder, payload_of};
    use crate::protocol::FeatureSet;

    const STATUS_RESPONSE_V25: &[u8] =
        b"~25014600004C000110000000000000000000000000000000000600000000000000000000000E000000000000EF3A\r";
    const STATUS_RESPONSE_V20: &[u8] = b"~20014A007054100110000000000000000000000000000000000400000000000000000900000000000003020000000000EDC3\r";

    #[test]
    fn decodes_v25_capture() {
        let decoder = decoder(0x25, 1, FeatureSet::default());
        let record = decoder.status(&payload_of(STATUS_RESPONSE_V25)).unwrap();
        assert_eq!(record.cell_warnings, vec![Warning::Normal; 16]);
        assert_eq!(record.temperature_warnings, vec![Warning::Normal; 6]);
        assert_eq!(record.discharge_current_warning, Some(Warning::Normal));
        let system = record.system.as_ref().unwrap();
        assert_eq!(
            system.flags,
            vec![
                StatusFlag::ChargeMosfetOn,
                StatusFlag::DischargeMosfetOn,
                StatusFlag::Discharging
            ]
        );
        assert_eq!(system.unknown_bits, 0);
        assert_eq!(record.balancing, Some(0));
        assert!(record.protection1.as_ref().unwrap().flags.is_empty());
        assert_eq!(record.warning2.as_ref().map(|w| w.raw), Some(0));
        assert_eq!(record.legacy_status, None);
        assert_eq!(record.active_warnings().count(), 0);
    }

    #[test]
    fn reserved_bits_do_not_disturb_other_fields() {
        let decoder = decoder(0x25, 1, FeatureSet::default());
        let mut payload = payload_of(STATUS_RESPONSE_V25);
        // protection1 bit 7 and system bit 6 are reserved
        payload[29] = 0x81;
        payload[31] = 0x4E;
        payload[34] = 0x80;
        payload[35] = 0x01;
        payload[37] = 0x80;
        let record = decoder.status(&payload).unwrap();

        let protection1 = record.protection1.unwrap();
        assert_eq!(protection1.flags, vec![StatusFlag::CellOverVoltage]);
        assert_eq!(protection1.unknown_bits, 0x80);
        let system = record.system.as_ref().unwrap();
        assert_eq!(system.unknown_bits, 0x40);
        assert!(system.contains(StatusFlag::Discharging));
        assert!(!system.contains(StatusFlag::Charging));
        assert_eq!(record.balancing, Some(0x8001));
        assert_eq!(record.warning2.unwrap().flags, vec![StatusFlag::LowPower]);
        assert_eq!(record.configuration.unwrap().raw, 0);
        assert_eq!(record.cell_warnings.len(), 16);
    }

    #[test]
    fn decodes_v20_capture_with_temperature_quirk() {
        let decoder = decoder(0x20, 1, FeatureSet::default());
        let record = decoder.status(&payload_of(STATUS_RESPONSE_V20)).unwrap();
        assert_eq!(record.cell_warnings.len(), 16);
        assert_eq!(record.temperature_warnings, vec![Warning::Normal; 6]);
        assert_eq!(record.charge_current_warning, Some(Warning::Normal));
        assert_eq!(record.discharge_current_warning, Some(Warning::Unknown(0x09)));
        assert_eq!(record.legacy_status, Some(vec![0; 5]));
        assert_eq!(record.system, None);

        let active: Vec<_> = record.active_warnings().collect();
        assert_eq!(
            active,
            vec![("discharge current".to_string(), Warning::Unknown(0x09))]
        );
    }

    #[test]
    fn warning_values() {
        assert_eq!(Warning::from(0x01), Warning::BelowLowerLimit);
        assert_eq!(Warning::from(0x02), Warning::AboveUpperLimit);
        assert_eq!(Warning::from(0x85), Warning::UserDefined(0x85));
        assert_eq!(Warning::from(0xF0), Warning::OtherFault);
        assert_eq!(Warning::from(0xF1), Warning::Unknown(0xF1));
    }
}
