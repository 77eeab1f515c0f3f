//! Synthetic ISS-like samples for populating an empty store.
//!
//! Uses a circular orbit in an inertial frame rotated into the Earth-fixed
//! frame by the Earth's rotation angle, which is close enough to the real
//! ground track for exercising the dashboards without network access.

use std::f64::consts::TAU;

use chrono::{DateTime, Duration, Utc};

use super::{SampleStore, StoreResult};
use crate::sample::Sample;

pub const EARTH_ROTATION_RAD_S: f64 = 7.292_115e-5;

const INCLINATION_DEG: f64 = 51.64;
const ORBITAL_PERIOD_S: f64 = 5_561.0;
const MEAN_ALTITUDE_KM: f64 = 420.0;
const MEAN_VELOCITY_KMH: f64 = 27_600.0;

/// Position and speed of the synthetic orbit at `instant`.
pub fn orbit_sample(instant: DateTime<Utc>) -> Sample {
    let t = instant.timestamp() as f64;
    let u = (t / ORBITAL_PERIOD_S * TAU).rem_euclid(TAU);
    let inclination = INCLINATION_DEG.to_radians();

    let inertial = [
        u.cos(),
        u.sin() * inclination.cos(),
        u.sin() * inclination.sin(),
    ];
    let earth_fixed = inertial_to_earth_fixed(inertial, (EARTH_ROTATION_RAD_S * t).rem_euclid(TAU));

    let latitude = earth_fixed[2].clamp(-1.0, 1.0).asin().to_degrees();
    let longitude = earth_fixed[1].atan2(earth_fixed[0]).to_degrees();

    Sample::new(
        instant,
        round5(latitude),
        round5(longitude),
        Some(round5(MEAN_ALTITUDE_KM + 3.0 * (2.0 * u).sin())),
        Some(round5(MEAN_VELOCITY_KMH + 12.0 * u.cos())),
    )
}

/// Samples every `spacing` over the `days` days ending at `end`, oldest first.
pub fn synthetic_samples(end: DateTime<Utc>, days: u32, spacing: Duration) -> Vec<Sample> {
    if spacing <= Duration::zero() {
        return Vec::new();
    }

    let start = end - Duration::days(i64::from(days));
    let mut cursor = start;
    let mut samples = Vec::new();
    while cursor < end {
        samples.push(orbit_sample(cursor));
        cursor += spacing;
    }
    samples
}

/// Populate `store` when it holds nothing yet. Returns how many were added.
pub fn seed_if_empty(
    store: &dyn SampleStore,
    end: DateTime<Utc>,
    days: u32,
    spacing: Duration,
) -> StoreResult<usize> {
    if store.count()? > 0 {
        return Ok(0);
    }

    let samples = synthetic_samples(end, days, spacing);
    for sample in &samples {
        store.append(sample)?;
    }
    Ok(samples.len())
}

fn inertial_to_earth_fixed(pos: [f64; 3], earth_angle: f64) -> [f64; 3] {
    let cos_a = earth_angle.cos();
    let sin_a = earth_angle.sin();
    [
        pos[0] * cos_a + pos[1] * sin_a,
        -pos[0] * sin_a + pos[1] * cos_a,
        pos[2],
    ]
}

fn round5(value: f64) -> f64 {
    (value * 100_000.0).round() / 100_000.0
}
