use super::{Decoder, FeatureSet, Layout, Reader};
use crate::error::DecodeError;
use serde::Serialize;

/// Temperatures are sent in tenths of Kelvin.
pub(crate) const TEMPERATURE_OFFSET: i32 = 2730;
const V25_CONSTANT: u8 = 0x03;
const V20_UD2_CONSTANT: u8 = 0x02;

/// Live measurements of one pack.
///
/// Every value is optional: a field the pack did not send, or could not be derived, is
/// `None` and never a silent zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalogRecord {
    pub cell_voltages_mv: Vec<Option<u16>>,
    /// Tenths of a degree Celsius.
    pub temperatures: Vec<Option<i16>>,
    /// Negative while discharging.
    pub current_ma: Option<i32>,
    pub total_voltage_mv: Option<u32>,
    pub remaining_capacity_mah: Option<u32>,
    pub full_capacity_mah: Option<u32>,
    pub design_capacity_mah: Option<u32>,
    pub cycle_count: Option<u16>,
    pub state_of_charge: Option<f32>,
    pub state_of_health: Option<f32>,
    pub port_voltage_mv: Option<u32>,
    pub power_w: Option<f32>,
    pub min_cell_voltage_mv: Option<u16>,
    pub max_cell_voltage_mv: Option<u16>,
    pub avg_cell_voltage_mv: Option<u16>,
    pub max_cell_difference_mv: Option<u16>,
}

pub(crate) fn temperature(raw: u16) -> Option<i16> {
    if raw == 0 || raw == u16::MAX {
        return None;
    }
    i16::try_from(i32::from(raw) - TEMPERATURE_OFFSET).ok()
}

fn tenfold(raw: u16) -> u32 {
    u32::from(raw) * 10
}

fn percent(part: Option<u32>, whole: Option<u32>) -> Option<f32> {
    match (part, whole) {
        (Some(part), Some(whole)) if whole > 0 => Some(part as f32 / whole as f32 * 100.0),
        _ => None,
    }
}

impl AnalogRecord {
    pub(crate) fn decode(decoder: &Decoder, payload: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(payload);
        decoder.header(&mut reader)?;

        let cells = decoder.cell_count(&mut reader, 2)?;
        let cell_voltages_mv = (0..cells)
            .map(|_| reader.u16().filter(|mv| *mv != u16::MAX))
            .collect();
        let temperatures_count = decoder.temperature_count(&mut reader, 2, false)?;
        let temperatures = (0..temperatures_count)
            .map(|_| reader.u16().and_then(temperature))
            .collect();

        let mut record = AnalogRecord {
            cell_voltages_mv,
            temperatures,
            current_ma: reader.i16().map(|raw| i32::from(raw) * 10),
            ..Default::default()
        };

        match decoder.layout() {
            Layout::V25 => record.decode_v25(&mut reader),
            Layout::V20 => record.decode_v20(&mut reader, decoder.features()),
        }
        if reader.remaining() > 0 {
            log::warn!(
                "Length mismatch reading analog information, {} bytes left",
                reader.remaining()
            );
        }

        let features = decoder.features();
        if features.design_capacity_mah_override != 0 {
            record.design_capacity_mah = Some(features.design_capacity_mah_override);
        }
        if record.state_of_charge.is_none() {
            record.state_of_charge = percent(record.remaining_capacity_mah, record.full_capacity_mah);
        }
        if record.state_of_health.is_none() {
            record.state_of_health = percent(record.full_capacity_mah, record.design_capacity_mah)
                .map(|soh| soh.min(100.0));
        }
        record.derive();
        Ok(record)
    }

    fn decode_v25(&mut self, reader: &mut Reader) {
        self.total_voltage_mv = reader.u16().map(u32::from);
        self.remaining_capacity_mah = reader.u16().map(tenfold);
        match reader.u8() {
            Some(V25_CONSTANT) | None => {}
            Some(other) => log::warn!(
                "Response contains a constant with an unexpected value {other:#04X}"
            ),
        }
        self.full_capacity_mah = reader.u16().map(tenfold);
        self.cycle_count = reader.u16();
        self.design_capacity_mah = reader.u16().map(tenfold);
    }

    /// Optional blocks are skipped according to `features`, the payload may also simply end.
    fn decode_v20(&mut self, reader: &mut Reader, features: FeatureSet) {
        self.total_voltage_mv = reader.u16().map(tenfold);
        self.remaining_capacity_mah = reader.u16().map(tenfold);
        if !features.skip_ud2 {
            match reader.u8() {
                Some(V20_UD2_CONSTANT) | None => {}
                Some(other) => log::warn!(
                    "Response contains a constant with an unexpected value {other:#04X}"
                ),
            }
        }
        self.full_capacity_mah = reader.u16().map(tenfold);
        if !features.skip_soc {
            self.state_of_charge = reader.u16().map(|raw| f32::from(raw) * 0.1);
        }
        if !features.skip_design_capacity {
            self.design_capacity_mah = reader.u16().map(tenfold);
        }
        self.cycle_count = reader.u16();
        if !features.skip_soh {
            self.state_of_health = reader.u16().map(|raw| f32::from(raw) * 0.1);
        }
        if !features.skip_port_voltage {
            // tenths of a volt on the wire
            self.port_voltage_mv = reader.u16().map(|raw| u32::from(raw) * 100);
        }
    }

    fn derive(&mut self) {
        self.power_w = match (self.total_voltage_mv, self.current_ma) {
            (Some(mv), Some(ma)) => Some(mv as f32 * ma as f32 / 1_000_000.0),
            _ => None,
        };

        let cells: Vec<u16> = self.cell_voltages_mv.iter().flatten().copied().collect();
        let (Some(min), Some(max)) = (cells.iter().min(), cells.iter().max()) else {
            return;
        };
        let sum: u32 = cells.iter().map(|mv| u32::from(*mv)).sum();
        self.min_cell_voltage_mv = Some(*min);
        self.max_cell_voltage_mv = Some(*max);
        self.max_cell_difference_mv = Some(max - min);
        self.avg_cell_voltage_mv = u16::try_from(sum / cells.len() as u32).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::tests::{decoder, payload_of};

    const ANALOG_RESPONSE_V25: &[u8] = b"~25014600F07A0001100CC70CC80CC70CC70CC70CC50CC60CC70CC70CC60CC70CC60CC60CC70CC60CC7060B9B0B990B990B990BB30BBCFF1FCCCD12D303286A008C2710E1E4\r";
    const ANALOG_RESPONSE_V20: &[u8] = b"~20014A00A0CA1001100D2F0D2C0D2C0D2D0D2D0D2F0D2F0D2F0D2C0D2D0D2D0D2F0D300D2C0D300D2C040B9B0BA50B9B0B9B0BB90BAF029D151521A9268400540F005700620D300D2C00040BA50B9B000ADAC0000A54550005D473000570A600000680000004CA56897E24D1A5\r";

    fn approx(value: Option<f32>, expected: f32) -> bool {
        value.is_some_and(|value| (value - expected).abs() < 0.01)
    }

    #[test]
    fn decodes_v25_capture() {
        let decoder = decoder(0x25, 1, FeatureSet::default());
        let record = decoder.analog(&payload_of(ANALOG_RESPONSE_V25)).unwrap();

        let cells: Vec<u16> = vec![
            3271, 3272, 3271, 3271, 3271, 3269, 3270, 3271, 3271, 3270, 3271, 3270, 3270, 3271,
            3270, 3271,
        ];
        assert_eq!(
            record.cell_voltages_mv,
            cells.into_iter().map(Some).collect::<Vec<_>>()
        );
        assert_eq!(
            record.temperatures,
            vec![Some(241), Some(239), Some(239), Some(239), Some(265), Some(274)]
        );
        assert_eq!(record.current_ma, Some(-2250));
        assert_eq!(record.total_voltage_mv, Some(52429));
        assert_eq!(record.remaining_capacity_mah, Some(48190));
        assert_eq!(record.full_capacity_mah, Some(103460));
        assert_eq!(record.cycle_count, Some(140));
        assert_eq!(record.design_capacity_mah, Some(100000));
        assert!(approx(record.state_of_charge, 46.578));
        assert!(approx(record.state_of_health, 100.0));
        assert!(approx(record.power_w, -117.965));
        assert_eq!(record.port_voltage_mv, None);
        assert_eq!(record.min_cell_voltage_mv, Some(3269));
        assert_eq!(record.max_cell_voltage_mv, Some(3272));
        assert_eq!(record.max_cell_difference_mv, Some(3));
        assert_eq!(record.avg_cell_voltage_mv, Some(3270));
    }

    #[test]
    fn decodes_v20_capture_with_skipped_blocks() {
        let decoder = decoder(
            0x20,
            1,
            FeatureSet {
                skip_address_payload: true,
                skip_ud2: true,
                skip_soc: true,
                skip_design_capacity: true,
                skip_soh: true,
                skip_port_voltage: true,
                temperature_count_override: 6,
                design_capacity_mah_override: 100_000,
                ..Default::default()
            },
        );
        let record = decoder.analog(&payload_of(ANALOG_RESPONSE_V20)).unwrap();

        assert_eq!(record.cell_voltages_mv.len(), 16);
        assert_eq!(record.cell_voltages_mv[0], Some(3375));
        assert_eq!(record.cell_voltages_mv[12], Some(3376));
        assert_eq!(
            record.temperatures,
            vec![Some(241), Some(251), Some(241), Some(241), Some(271), Some(261)]
        );
        assert_eq!(record.current_ma, Some(6690));
        assert_eq!(record.total_voltage_mv, Some(53970));
        assert_eq!(record.remaining_capacity_mah, Some(86170));
        assert_eq!(record.full_capacity_mah, Some(98600));
        assert_eq!(record.cycle_count, Some(84));
        assert_eq!(record.design_capacity_mah, Some(100_000));
        assert!(approx(record.state_of_charge, 87.394));
        assert!(approx(record.state_of_health, 98.6));
        assert_eq!(record.port_voltage_mv, None);
        assert_eq!(record.min_cell_voltage_mv, Some(3372));
        assert_eq!(record.max_cell_difference_mv, Some(4));
    }

    #[test]
    fn twenty_cells_overflow() {
        let mut payload = vec![0x00, 0x01, 20];
        payload.extend(std::iter::repeat([0x0C, 0xC7]).take(20).flatten());
        let decoder = decoder(0x25, 1, FeatureSet::default());
        assert_eq!(
            decoder.analog(&payload),
            Err(DecodeError::CountOverflow {
                channel: "cell",
                declared: 20,
                limit: 16
            })
        );
    }

    #[test]
    fn count_beyond_payload_overflows() {
        // 10 cells declared, room for 2
        let payload = [0x00, 0x01, 10, 0x0C, 0xC7, 0x0C, 0xC8];
        let decoder = decoder(0x25, 1, FeatureSet::default());
        assert_eq!(
            decoder.analog(&payload),
            Err(DecodeError::CountOverflow {
                channel: "cell",
                declared: 10,
                limit: 2
            })
        );
    }

    #[test]
    fn short_payload_keeps_decoded_fields() {
        // two cells, one temperature, current, then the payload ends
        let payload = [0x00, 0x01, 2, 0x0C, 0xC7, 0xFF, 0xFF, 1, 0x0B, 0x9B, 0x00, 0x10];
        let decoder = decoder(0x25, 1, FeatureSet::default());
        let record = decoder.analog(&payload).unwrap();
        assert_eq!(record.cell_voltages_mv, vec![Some(3271), None]);
        assert_eq!(record.temperatures, vec![Some(241)]);
        assert_eq!(record.current_ma, Some(160));
        assert_eq!(record.total_voltage_mv, None);
        assert_eq!(record.state_of_charge, None);
        assert_eq!(record.power_w, None);
        assert_eq!(record.avg_cell_voltage_mv, Some(3271));
    }

    #[test]
    fn wrong_address_is_rejected() {
        let decoder = decoder(0x25, 2, FeatureSet::default());
        assert_eq!(
            decoder.analog(&payload_of(ANALOG_RESPONSE_V25)),
            Err(DecodeError::AddressMismatch {
                expected: 2,
                received: 1
            })
        );
    }
}
