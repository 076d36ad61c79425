//! Fare derivation.
//!
//! Applied at completion when the client omits actual fare values. The
//! schedule constants are configuration; the fare table itself is managed
//! outside the core.

use serde::Deserialize;

/// Converts a currency amount to integer cents, rounding half away
/// from zero.
pub fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// Per-trip fare schedule in currency units.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FareSchedule {
    pub base_fare: f64,
    pub rate_per_km: f64,
    pub rate_per_minute: f64,
    pub min_fare: f64,
    /// Fraction of the fare paid to the driver; the rest is commission.
    pub driver_share: f64,
}

impl Default for FareSchedule {
    fn default() -> Self {
        Self {
            base_fare: 50.0,
            rate_per_km: 15.0,
            rate_per_minute: 2.0,
            min_fare: 100.0,
            driver_share: 0.85,
        }
    }
}

/// A derived fare split, in currency units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FareBreakdown {
    pub fare: f64,
    pub driver_earnings: f64,
    pub commission: f64,
}

impl FareBreakdown {
    /// Persisted representation: `(fare, earnings, commission)` cents.
    /// Commission is derived by subtraction so the parts always sum to
    /// the fare exactly after rounding.
    pub fn as_cents(&self) -> (i64, i64, i64) {
        let fare_cents = to_cents(self.fare).max(0);
        let earnings_cents = to_cents(self.driver_earnings).clamp(0, fare_cents);
        (fare_cents, earnings_cents, fare_cents - earnings_cents)
    }
}

impl FareSchedule {
    /// `fare = max(min_fare, base + per_km * distance + per_minute * duration)`
    pub fn quote(&self, distance_km: f64, duration_minutes: i32) -> FareBreakdown {
        let metered = self.base_fare
            + self.rate_per_km * distance_km
            + self.rate_per_minute * f64::from(duration_minutes);
        let fare = metered.max(self.min_fare);
        self.split(fare)
    }

    /// Splits a known fare into driver earnings and commission.
    pub fn split(&self, fare: f64) -> FareBreakdown {
        let driver_earnings = fare * self.driver_share;
        FareBreakdown {
            fare,
            driver_earnings,
            commission: fare - driver_earnings,
        }
    }
}
