use hifitime::{Duration, Epoch};

const DAYS_PER_WEEK: f64 = 7.0;

/// Convert a GPS week and millisecond of week to an [Epoch].
#[must_use]
pub fn gps_epoch(week: u16, milliseconds: f64) -> Epoch {
    Epoch::from_gpst_duration(
        Duration::from_days(f64::from(week) * DAYS_PER_WEEK)
            + Duration::from_milliseconds(milliseconds),
    )
}
