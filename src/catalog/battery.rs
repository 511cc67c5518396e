//! Battery voltage to charge-percentage conversion for 18650 Li-ion cells.
//!
//! The devices report raw pack voltage; charge level is derived from it
//! at query time using the typical 18650 discharge curve (4.20 V = 100%,
//! 3.00 V = 0%). Li-ion discharge is nonlinear, so a lookup table with
//! piecewise linear interpolation beats any single formula.

/// Discharge-curve anchor points `(volts, percent)`, descending.
const VOLTAGE_TABLE: [(f64, f64); 12] = [
    (4.20, 100.0),
    (4.06, 90.0),
    (3.98, 80.0),
    (3.92, 70.0),
    (3.87, 60.0),
    (3.82, 50.0),
    (3.79, 40.0),
    (3.77, 30.0),
    (3.74, 20.0),
    (3.68, 10.0),
    (3.45, 5.0),
    (3.00, 0.0),
];

/// Estimate the charge percentage for an 18650 Li-ion cell voltage.
///
/// Interpolates linearly between the discharge-curve anchor points;
/// voltages outside the curve clamp to 0 or 100.
pub fn voltage_to_percentage(volts: f64) -> f64 {
    if volts >= 4.20 {
        return 100.0;
    }
    if volts <= 3.00 {
        return 0.0;
    }

    for pair in VOLTAGE_TABLE.windows(2) {
        let (v_high, p_high) = pair[0];
        let (v_low, p_low) = pair[1];
        if (v_low..=v_high).contains(&volts) {
            let ratio = (volts - v_low) / (v_high - v_low);
            return p_low + ratio * (p_high - p_low);
        }
    }

    0.0
}
