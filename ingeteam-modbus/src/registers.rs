//! Ingeteam input-register map.
//!
//! Addresses are offsets into the input-register space (device register
//! `30001 + address`). Every key published in a [`Snapshot`](crate::Snapshot)
//! is described here, together with the human-readable name, unit and
//! sensor group the host entity layer needs.

use serde::Serialize;

/// A fixed code-to-label lookup table.
#[derive(Debug)]
pub struct CodeTable {
    entries: &'static [(u16, &'static str)],
}

impl CodeTable {
    pub const fn new(entries: &'static [(u16, &'static str)]) -> Self {
        Self { entries }
    }

    /// Label configured for `code`, if any.
    pub fn get(&self, code: u16) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, label)| *label)
    }
}

pub static BOOLEAN_STATUS: CodeTable = CodeTable::new(&[(0, "Off"), (1, "On")]);

pub static INVERTER_STATUS: CodeTable = CodeTable::new(&[
    (0, "Inverter Stopped"),
    (1, "Starting"),
    (2, "Off-grid"),
    (3, "On-grid"),
    (4, "On-grid (Standby Battery)"),
    (5, "Waiting to connect to Grid"),
    (6, "Critical Loads Bypassed to Grid"),
    (7, "Emergency Charge from PV"),
    (8, "Emergency Charge from Grid"),
    (9, "Inverter Locked waiting for Reset"),
    (10, "Error Mode"),
]);

/// Battery status code reported when no battery is configured.
pub const BATTERY_NOT_CONFIGURED: u16 = 7;

pub static BATTERY_STATUS: CodeTable = CodeTable::new(&[
    (0, "Standby"),
    (1, "Discharging"),
    (2, "Constant Current Charging"),
    (3, "Constant Voltage Charging"),
    (4, "Floating"),
    (5, "Equalizing"),
    (6, "Error Communication with BMS"),
    (BATTERY_NOT_CONFIGURED, "No Configured"),
    (8, "Capacity Calibration (Step 1)"),
    (9, "Capacity Calibration (Step 2)"),
    (10, "Standby Manual"),
]);

pub static BATTERY_LIMITATION_REASONS: CodeTable = CodeTable::new(&[
    (0, "No limitation"),
    (1, "Heat Sink Temperature"),
    (2, "PT100 Temperature"),
    (3, "Low Bus Voltage Protection"),
    (4, "Battery Settings"),
    (5, "BMS Communication"),
    (6, "SOC Max Configured"),
    (7, "SOC Min Configured"),
    (8, "Maximum Battery Power"),
    (9, "Modbus command"),
    (10, "Digital Input 2"),
    (11, "Digital Input 3"),
    (12, "PV Charging scheduling"),
]);

pub static AP_REDUCTION_REASONS: CodeTable = CodeTable::new(&[
    (0, "No limitation"),
    (1, "Communication"),
    (2, "PCB Temperature"),
    (3, "Heat Sink Temperature"),
    (4, "Pac vs Fac Algorithm"),
    (5, "Soft Start"),
    (6, "Charge Power Configured"),
    (7, "PV Surplus injected to the Loads"),
    (8, "Pac vs Vac Algorithm"),
    (9, "Battery Power Limited"),
    (10, "AC Grid Power Limited"),
    (11, "Self-Consumption Mode"),
    (12, "High Bus Voltage Protection"),
    (13, "LVRT or HVRT Process"),
    (14, "Nominal AC Current"),
    (15, "Grid Consumption Protection"),
    (16, "PV Surplus Injected to the Grid"),
]);

/// How a field's raw register word(s) become a value.
#[derive(Debug, Clone, Copy)]
pub enum Encoding {
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 16-bit integer (two's complement).
    I16,
    /// Unsigned 32-bit integer over two registers, low-order word first.
    U32WordSwapped,
    /// Fixed-point value divided by `divisor`.
    Scaled { signed: bool, divisor: f64 },
    /// Enum code mapped through a label table.
    Label(&'static CodeTable),
    /// Positive part of a signed power reading, `max(0, P)`.
    PositivePart,
    /// Negative part of a signed power reading, `max(0, -P)`.
    NegativePart,
}

impl Encoding {
    /// Number of registers the encoding occupies.
    pub fn width(&self) -> u16 {
        match self {
            Encoding::U32WordSwapped => 2,
            _ => 1,
        }
    }
}

/// Where a field's value comes from.
#[derive(Debug, Clone, Copy)]
pub enum Source {
    /// Read from the register at `address`.
    Register { address: u16, encoding: Encoding },
    /// Sum of other fields decoded in the same pass.
    Sum(&'static [&'static str]),
}

/// Entity grouping, used to gate optional groups behind feature flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorGroup {
    Status,
    Inverter,
    Pv,
    Meter,
    Battery,
}

/// Description of one published measurement.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub key: &'static str,
    pub name: &'static str,
    pub source: Source,
    pub unit: Option<&'static str>,
    pub group: SensorGroup,
}

impl FieldSpec {
    /// Register range `[start, end)` covered by this field, if register-backed.
    pub fn register_span(&self) -> Option<(u16, u16)> {
        match self.source {
            Source::Register { address, encoding } => Some((address, address + encoding.width())),
            Source::Sum(_) => None,
        }
    }
}

/// A contiguous range of input registers read in one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterBlock {
    pub name: &'static str,
    pub address: u16,
    pub count: u16,
}

impl RegisterBlock {
    pub const fn new(name: &'static str, address: u16, count: u16) -> Self {
        Self {
            name,
            address,
            count,
        }
    }

    pub fn end(&self) -> u16 {
        self.address + self.count
    }

    /// Whether the whole register span of `field` lies inside this block.
    pub fn covers(&self, field: &FieldSpec) -> bool {
        match field.register_span() {
            Some((start, end)) => start >= self.address && end <= self.end(),
            None => false,
        }
    }
}

/// The full map, read in a single request.
pub static SINGLE_BLOCK: [RegisterBlock; 1] = [RegisterBlock::new("all", 0, 81)];

/// The same map split into the five documented sub-ranges.
pub static MULTI_BLOCK: [RegisterBlock; 5] = [
    RegisterBlock::new("status", 0, 17),
    RegisterBlock::new("battery", 17, 14),
    RegisterBlock::new("pv", 31, 6),
    RegisterBlock::new("inverter", 37, 31),
    RegisterBlock::new("meter", 68, 13),
];

const fn reg(
    key: &'static str,
    name: &'static str,
    address: u16,
    encoding: Encoding,
    unit: Option<&'static str>,
    group: SensorGroup,
) -> FieldSpec {
    FieldSpec {
        key,
        name,
        source: Source::Register { address, encoding },
        unit,
        group,
    }
}

const fn scaled(signed: bool, divisor: f64) -> Encoding {
    Encoding::Scaled { signed, divisor }
}

use Encoding::{I16, Label, NegativePart, PositivePart, U16, U32WordSwapped};
use SensorGroup::{Battery, Inverter, Meter, Pv, Status};

const V: Option<&str> = Some("V");
const A: Option<&str> = Some("A");
const W: Option<&str> = Some("W");
const VAR: Option<&str> = Some("var");
const HZ: Option<&str> = Some("Hz");
const PCT: Option<&str> = Some("%");
const CELSIUS: Option<&str> = Some("°C");

/// Every field published by the decoder.
///
/// Derived fields come after the fields they sum.
#[rustfmt::skip]
pub static FIELDS: &[FieldSpec] = &[
    // Inverter status and lifetime
    reg("total_operation_time", "Total Operation Time", 6, U32WordSwapped, Some("s"), Status),
    reg("stop_code", "Stop Event Code", 9, U16, None, Status),
    reg("alarm_code", "Alarm Code", 10, U32WordSwapped, None, Status),
    reg("status", "Status", 15, Label(&INVERTER_STATUS), None, Status),
    reg("waiting_time", "Waiting Time to Connect to Grid", 16, U16, Some("s"), Status),
    // Battery
    reg("battery_voltage", "Battery Voltage", 17, scaled(false, 10.0), V, Battery),
    reg("battery_current", "Battery Current", 18, scaled(true, 100.0), A, Battery),
    reg("battery_discharging_power", "Battery Discharging Power", 19, PositivePart, W, Battery),
    reg("battery_charging_power", "Battery Charging Power", 19, NegativePart, W, Battery),
    reg("battery_state_of_charge", "Battery State of Charge", 20, U16, PCT, Battery),
    reg("battery_state_of_health", "Battery State of Health", 21, U16, PCT, Battery),
    reg("battery_charging_voltage", "Battery Charging Voltage", 22, scaled(false, 10.0), V, Battery),
    reg("battery_discharging_voltage", "Battery Discharging Voltage", 23, scaled(false, 10.0), V, Battery),
    reg("battery_charging_current_max", "Battery Max. Charging Current", 24, scaled(false, 100.0), A, Battery),
    reg("battery_discharging_current_max", "Battery Max. Discharging Current", 25, scaled(false, 100.0), A, Battery),
    reg("battery_status", "Battery Status", 26, Label(&BATTERY_STATUS), None, Battery),
    reg("battery_temp", "Battery Temp", 27, scaled(true, 10.0), CELSIUS, Battery),
    reg("battery_bms_alarm", "Battery BMS Alarm", 28, U16, None, Battery),
    reg("battery_discharge_limitation_reason", "Battery Discharge Limitation Reason", 29, Label(&BATTERY_LIMITATION_REASONS), None, Battery),
    reg("battery_voltage_internal", "Battery Voltage Internal Sensor", 30, scaled(false, 10.0), V, Battery),
    reg("battery_bms_flags", "Battery BMS Flags", 68, U16, None, Battery),
    reg("battery_bms_warnings", "Battery BMS Warnings", 73, U16, None, Battery),
    reg("battery_bms_errors", "Battery BMS Errors", 74, U16, None, Battery),
    reg("battery_bms_faults", "Battery BMS Faults", 75, U16, None, Battery),
    reg("battery_charge_limitation_reason", "Battery Charge Limitation Reason", 77, U16, None, Battery),
    // PV strings
    reg("pv1_voltage", "PV1 Voltage", 31, U16, V, Pv),
    reg("pv1_current", "PV1 Current", 32, scaled(false, 100.0), A, Pv),
    reg("pv1_power", "PV1 Power", 33, U16, W, Pv),
    reg("pv2_voltage", "PV2 Voltage", 34, U16, V, Pv),
    reg("pv2_current", "PV2 Current", 35, scaled(false, 100.0), A, Pv),
    reg("pv2_power", "PV2 Power", 36, U16, W, Pv),
    reg("external_pv_power", "External PV Power", 79, U16, W, Pv),
    // Inverter and critical loads
    reg("active_power", "Active Power", 37, I16, W, Inverter),
    reg("reactive_power", "Reactive Power", 38, I16, VAR, Inverter),
    reg("power_factor", "Power factor Cosφ", 39, scaled(true, 1000.0), None, Inverter),
    reg("ap_reduction_ratio", "Active Power Reduction Ratio", 40, scaled(false, 10.0), PCT, Inverter),
    reg("ap_reduction_reason", "Active Power Reduction Reason", 41, Label(&AP_REDUCTION_REASONS), None, Inverter),
    reg("reactive_setpoint_type", "Reactive Power Set-Point Type", 42, U16, None, Inverter),
    reg("cl_voltage", "Critical Loads. Voltage", 43, U16, V, Inverter),
    reg("cl_current", "Critical Loads. Current", 44, scaled(false, 100.0), A, Inverter),
    reg("cl_freq", "Critical Loads. Frequency", 45, scaled(false, 100.0), HZ, Inverter),
    reg("cl_active_power", "Critical Loads. Active Power", 46, I16, W, Inverter),
    reg("cl_reactive_power", "Critical Loads. Reactive Power", 47, I16, VAR, Inverter),
    reg("total_loads_power", "Total Loads Power", 78, U16, W, Inverter),
    reg("ev_power", "EV Charger Power", 80, I16, W, Inverter),
    // Internal meter
    reg("im_voltage", "Internal Meter Voltage", 48, U16, V, Inverter),
    reg("im_current", "Internal Meter Current", 49, scaled(false, 100.0), A, Inverter),
    reg("im_freq", "Internal Meter Frequency", 50, scaled(false, 100.0), HZ, Inverter),
    reg("im_active_power", "Internal Active Power", 51, I16, W, Inverter),
    reg("im_reactive_power", "Internal Reactive Power", 52, I16, VAR, Inverter),
    reg("im_power_factor", "Internal Power Factor Cosφ", 53, scaled(true, 1000.0), None, Inverter),
    // Diagnostics
    reg("dc_bus_voltage", "DC Bus Voltage", 54, U16, V, Inverter),
    reg("temp_mod_1", "Module 1 Temperature", 55, scaled(true, 10.0), CELSIUS, Inverter),
    reg("temp_mod_2", "Module 2 Temperature", 56, scaled(true, 10.0), CELSIUS, Inverter),
    reg("temp_pcb", "PCB Temperature", 57, scaled(true, 10.0), CELSIUS, Inverter),
    reg("positive_isolation_resistance", "Positive Isolation Resistance", 59, U16, Some("kΩ"), Inverter),
    reg("negative_isolation_resistance", "Negative Isolation Resistance", 60, U16, Some("kΩ"), Inverter),
    reg("rms_diff_current", "RMS Differential Current", 61, scaled(false, 10.0), Some("mA"), Inverter),
    reg("do_1_status", "Digital Output 1. Status", 62, Label(&BOOLEAN_STATUS), None, Inverter),
    reg("do_2_status", "Digital Output 2. Status", 63, Label(&BOOLEAN_STATUS), None, Inverter),
    reg("di_drm_status", "Digital Input DRM0 Status", 64, Label(&BOOLEAN_STATUS), None, Inverter),
    reg("di_2_status", "Digital Input 2. Status", 65, Label(&BOOLEAN_STATUS), None, Inverter),
    reg("di_3_status", "Digital Input 3. Status", 66, Label(&BOOLEAN_STATUS), None, Inverter),
    // External meter
    reg("em_voltage", "External Meter AC Voltage", 69, U16, V, Meter),
    reg("em_freq", "External Meter AC Frequency", 70, scaled(false, 10.0), HZ, Meter),
    reg("em_active_power", "External Meter AC Active Power", 71, PositivePart, W, Meter),
    reg("em_active_power_returned", "External Meter AC Active Power Returned", 71, NegativePart, W, Meter),
    reg("em_reactive_power", "External Meter AC Reactive Power", 72, I16, VAR, Meter),
    // Derived totals
    FieldSpec {
        key: "pv_internal_total_power",
        name: "PV Internal Total Power",
        source: Source::Sum(&["pv1_power", "pv2_power"]),
        unit: W,
        group: Pv,
    },
    FieldSpec {
        key: "pv_total_power",
        name: "PV Total Power",
        source: Source::Sum(&["pv_internal_total_power", "external_pv_power"]),
        unit: W,
        group: Pv,
    },
];

/// A device-specific override: while `field` decodes from `code`, the
/// listed fields carry garbage and are published as zero.
#[derive(Debug)]
pub struct Quirk {
    pub field: &'static str,
    pub code: u16,
    pub zeroed: &'static [&'static str],
}

/// With no battery configured the inverter keeps publishing whatever is
/// left in the battery registers.
pub static QUIRKS: &[Quirk] = &[Quirk {
    field: "battery_status",
    code: BATTERY_NOT_CONFIGURED,
    zeroed: &[
        "battery_voltage",
        "battery_current",
        "battery_discharging_power",
        "battery_charging_power",
        "battery_state_of_charge",
        "battery_state_of_health",
        "battery_charging_voltage",
        "battery_discharging_voltage",
        "battery_charging_current_max",
        "battery_discharging_current_max",
        "battery_temp",
        "battery_voltage_internal",
    ],
}];


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn field(key: &str) -> Option<&'static FieldSpec> {
        FIELDS.iter().find(|f| f.key == key)
    }

    #[test]
    fn test_pv_block_fields() {
        let keys: Vec<_> = FIELDS
            .iter()
            .filter(|f| MULTI_BLOCK[2].covers(f))
            .map(|f| f.key)
            .collect();
        assert_eq!(
            keys,
            vec![
                "pv1_voltage",
                "pv1_current",
                "pv1_power",
                "pv2_voltage",
                "pv2_current",
                "pv2_power"
            ]
        );
    }

    #[test]
    fn test_keys_are_unique() {
        let mut seen = HashSet::new();
        for field in FIELDS {
            assert!(seen.insert(field.key), "duplicate key {}", field.key);
        }
    }

    #[test]
    fn test_every_register_field_fits_single_block() {
        for field in FIELDS.iter().filter(|f| f.register_span().is_some()) {
            assert!(SINGLE_BLOCK[0].covers(field), "{} outside block", field.key);
        }
    }

    #[test]
    fn test_every_register_field_in_exactly_one_sub_block() {
        for field in FIELDS.iter().filter(|f| f.register_span().is_some()) {
            let owners = MULTI_BLOCK.iter().filter(|b| b.covers(field)).count();
            assert_eq!(owners, 1, "{} covered by {} blocks", field.key, owners);
        }
    }

    #[test]
    fn test_sub_blocks_stay_inside_single_block() {
        for block in &MULTI_BLOCK {
            assert!(block.end() <= SINGLE_BLOCK[0].end());
        }
    }

    #[test]
    fn test_derived_fields_follow_their_inputs() {
        for (idx, field) in FIELDS.iter().enumerate() {
            if let Source::Sum(inputs) = field.source {
                for input in inputs {
                    let pos = FIELDS.iter().position(|f| f.key == *input).unwrap();
                    assert!(pos < idx, "{} must come before {}", input, field.key);
                }
            }
        }
    }

    #[test]
    fn test_quirk_keys_exist() {
        for quirk in QUIRKS {
            let trigger = field(quirk.field).unwrap();
            assert!(matches!(
                trigger.source,
                Source::Register {
                    encoding: Encoding::Label(_),
                    ..
                }
            ));
            for key in quirk.zeroed {
                assert!(field(key).is_some(), "unknown quirk key {}", key);
            }
        }
    }

    #[test]
    fn test_u32_width() {
        let op_time = field("total_operation_time").unwrap();
        assert_eq!(op_time.register_span(), Some((6, 8)));
    }

    #[test]
    fn test_code_table_lookup() {
        assert_eq!(BATTERY_STATUS.get(7), Some("No Configured"));
        assert_eq!(INVERTER_STATUS.get(3), Some("On-grid"));
        assert_eq!(INVERTER_STATUS.get(11), None);
        assert_eq!(BOOLEAN_STATUS.get(1), Some("On"));
    }
}
