//! Demand curves
//!
//! Fee multipliers by UTC hour and by weekday, both centred near 1.0.
//! Quiet hours sit under 1.0, the US/EU overlap in the afternoon above it.

const HOUR_MULTIPLIERS: [f64; 24] = [
    0.90, 0.85, 0.82, 0.80, 0.80, 0.82, // 00-05
    0.88, 0.95, 1.00, 1.05, 1.08, 1.10, // 06-11
    1.12, 1.15, 1.20, 1.22, 1.20, 1.15, // 12-17
    1.10, 1.05, 1.02, 1.00, 0.96, 0.92, // 18-23
];

/// Index 0 is Sunday
const DAY_OF_WEEK_MULTIPLIERS: [f64; 7] = [0.85, 1.00, 1.05, 1.06, 1.05, 1.00, 0.88];

pub fn hour_multiplier(hour: u32) -> f64 {
    HOUR_MULTIPLIERS[(hour % 24) as usize]
}

pub fn day_of_week_multiplier(day_of_week: u32) -> f64 {
    DAY_OF_WEEK_MULTIPLIERS[(day_of_week % 7) as usize]
}
