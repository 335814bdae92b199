use crate::EnumTable;

const BATTERY_TYPE: &[(u16, &str)] = &[
    (1, "open"),
    (2, "sealed"),
    (3, "gel"),
    (4, "lithium"),
    (5, "self-customized"),
];

const CHARGING_STATE: &[(u16, &str)] = &[
    (0, "deactivated"),
    (1, "activated"),
    (2, "mppt"),
    (3, "equalizing"),
    (4, "boost"),
    (5, "floating"),
    (6, "current limiting"),
];

impl EnumTable {
    pub fn entries(self) -> &'static [(u16, &'static str)] {
        match self {
            EnumTable::BatteryType => BATTERY_TYPE,
            EnumTable::ChargingState => CHARGING_STATE,
        }
    }

    pub fn label(self, code: u16) -> Option<&'static str> {
        self.entries()
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, label)| *label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        assert_eq!(EnumTable::BatteryType.label(4), Some("lithium"));
        assert_eq!(EnumTable::BatteryType.label(0), None);
        assert_eq!(EnumTable::ChargingState.label(0), Some("deactivated"));
        assert_eq!(EnumTable::ChargingState.label(6), Some("current limiting"));
        assert_eq!(EnumTable::ChargingState.label(7), None);
    }
}
