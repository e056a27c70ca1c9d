//! Globe traversal: lazy sequences of search circles covering the sphere.
//!
//! Two strategies share the [`GeoSweeper`] iterator:
//!
//! - [`Boustrophedon`]: one radius per sweep, longitude bands walked pole to
//!   pole in alternating directions. Finite.
//! - [`Drift`]: latitude rows of longitude steps, the radius jittered before
//!   every circle. Wraps back to the south pole forever.
//!
//! Both use the same spacing rule: consecutive centres are one radius apart
//! (expressed in degrees along a meridian), so neighbouring circles overlap.
//! The longitude handling near the poles is an approximation, not an exact
//! great-circle cover.

use rand::{rngs::StdRng, Rng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::Circle;

/// Earth circumference in kilometers.
pub const EARTH_CIRCUMFERENCE_KM: f64 = 40_075.0;

/// Multiplicative jitter range applied to the drift radius before each circle.
pub const DRIFT_FACTOR: (f64, f64) = (0.8, 1.2);

// Float slack when comparing accumulated steps against the pole/antimeridian.
const EPS: f64 = 1e-9;

/// Invalid sweep configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SweepError {
    /// A bound is zero, negative, NaN or infinite.
    #[error("radius bounds must be finite and positive (min={min_km} km, max={max_km} km)")]
    NonPositive {
        /// Configured minimum.
        min_km: f64,
        /// Configured maximum.
        max_km: f64,
    },
    /// `min_km > max_km`.
    #[error("min radius {min_km} km exceeds max radius {max_km} km")]
    Inverted {
        /// Configured minimum.
        min_km: f64,
        /// Configured maximum.
        max_km: f64,
    },
}

/// Inclusive range the search radius is drawn from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadiusBounds {
    min_km: f64,
    max_km: f64,
}

impl RadiusBounds {
    /// Validates and builds the range.
    pub fn new(min_km: f64, max_km: f64) -> Result<Self, SweepError> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(min_km) || !valid(max_km) {
            return Err(SweepError::NonPositive { min_km, max_km });
        }
        if min_km > max_km {
            return Err(SweepError::Inverted { min_km, max_km });
        }
        Ok(Self { min_km, max_km })
    }

    /// Lower bound in kilometers.
    pub fn min_km(&self) -> f64 {
        self.min_km
    }

    /// Upper bound in kilometers.
    pub fn max_km(&self) -> f64 {
        self.max_km
    }

    /// Clamps `radius_km` into the range.
    pub fn clamp(&self, radius_km: f64) -> f64 {
        radius_km.clamp(self.min_km, self.max_km)
    }

    /// Draws a radius uniformly from the range.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        if self.min_km == self.max_km {
            return self.min_km;
        }
        rng.random_range(self.min_km..=self.max_km)
    }
}

/// Which traversal strategy a [`GeoSweeper`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    /// Finite pole-to-pole bands in alternating directions.
    #[default]
    Boustrophedon,
    /// Endless rows with a randomly drifting radius.
    Drift,
}

impl std::fmt::Display for SweepMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SweepMode::Boustrophedon => f.write_str("boustrophedon"),
            SweepMode::Drift => f.write_str("drift"),
        }
    }
}

/// Latitude step in degrees for a given radius: the radius as an arc along
/// a meridian, computed from the circumference as `r / C * 360`.
///
/// This is one radius of arc, so consecutive centres overlap by a full
/// radius. Spacing by the diameter (`2 * r / R * 180/π`) would double the
/// step and leave the circles merely touching. Strictly positive and
/// increasing for positive radii.
pub fn step_lat_deg(radius_km: f64) -> f64 {
    radius_km / EARTH_CIRCUMFERENCE_KM * 360.0
}

/// Clamps a latitude into `[-90, 90]`.
pub fn clamp_lat(lat: f64) -> f64 {
    lat.clamp(-90.0, 90.0)
}

/// Clamps a longitude into `[-180, 180]`.
pub fn clamp_lon(lon: f64) -> f64 {
    lon.clamp(-180.0, 180.0)
}

/// Fixed-radius sweep over longitude bands, alternating north-to-south and
/// south-to-north so consecutive circles stay adjacent.
#[derive(Debug, Clone)]
pub struct Boustrophedon {
    radius_km: f64,
    step_lat: f64,
    step_lon: f64,
    band: u64,
    row: u64,
    done: bool,
}

impl Boustrophedon {
    /// Draws the sweep radius from `bounds`.
    pub fn new<R: Rng>(bounds: RadiusBounds, rng: &mut R) -> Self {
        Self::with_radius(bounds.sample(rng))
    }

    /// Sweep with a known radius. `radius_km` must be positive.
    pub fn with_radius(radius_km: f64) -> Self {
        let step_lat = step_lat_deg(radius_km);
        Self {
            radius_km,
            step_lat,
            // Bands are twice as wide as rows to space the columns out.
            step_lon: 2.0 * step_lat,
            band: 0,
            row: 0,
            done: false,
        }
    }

    /// Radius used for every circle of this sweep.
    pub fn radius_km(&self) -> f64 {
        self.radius_km
    }

    fn band_lon(&self) -> f64 {
        -180.0 + self.band as f64 * self.step_lon
    }

    fn row_lat(&self) -> f64 {
        let offset = self.row as f64 * self.step_lat;
        if self.band % 2 == 0 {
            90.0 - offset
        } else {
            -90.0 + offset
        }
    }

    /// Shifts the band longitude west by `step_lat / cos(lat)`, capped at one
    /// band width so the shift stays bounded where `cos(lat)` approaches zero.
    fn corrected_lon(&self, band_lon: f64, lat: f64) -> f64 {
        let cos = lat.to_radians().cos().abs().max(0.01);
        band_lon - (self.step_lat / cos).min(self.step_lon)
    }
}

impl Iterator for Boustrophedon {
    type Item = Circle;

    fn next(&mut self) -> Option<Circle> {
        loop {
            if self.done {
                return None;
            }

            let band_lon = self.band_lon();
            if band_lon > 180.0 + EPS {
                self.done = true;
                info!("finished traversing the globe");
                return None;
            }
            if self.row == 0 {
                info!(lon = band_lon, "moving to longitude band");
            }

            let lat = self.row_lat();
            if !(-90.0 - EPS..=90.0 + EPS).contains(&lat) {
                self.band += 1;
                self.row = 0;
                continue;
            }
            self.row += 1;

            let lat = clamp_lat(lat);
            return Some(Circle {
                lat,
                lon: clamp_lon(self.corrected_lon(band_lon, lat)),
                radius_km: self.radius_km,
            });
        }
    }
}

/// Endless sweep whose radius drifts by a random factor before every circle.
///
/// Rows run from the south pole northwards, each row walking longitudes
/// west to east. The longitude step equals the latitude step (no widening
/// toward the poles), which over-samples high latitudes but leaves no gaps.
#[derive(Debug, Clone)]
pub struct Drift<R> {
    bounds: RadiusBounds,
    rng: R,
    radius_km: f64,
    lat: f64,
    lon: f64,
    passes: u64,
}

impl<R: Rng> Drift<R> {
    /// Starts at the south-west corner with a radius drawn from `bounds`.
    pub fn new(bounds: RadiusBounds, mut rng: R) -> Self {
        let radius_km = bounds.sample(&mut rng);
        Self {
            bounds,
            rng,
            radius_km,
            lat: -90.0,
            lon: -180.0,
            passes: 0,
        }
    }

    /// Number of completed pole-to-pole passes.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    fn jitter(&mut self) {
        let factor = self.rng.random_range(DRIFT_FACTOR.0..=DRIFT_FACTOR.1);
        self.radius_km = self.bounds.clamp(self.radius_km * factor);
    }
}

impl<R: Rng> Iterator for Drift<R> {
    type Item = Circle;

    fn next(&mut self) -> Option<Circle> {
        let circle = Circle {
            lat: clamp_lat(self.lat),
            lon: clamp_lon(self.lon),
            radius_km: self.radius_km,
        };

        let step = step_lat_deg(self.radius_km);
        self.lon += step;
        if self.lon > 180.0 + EPS {
            self.lon = -180.0;
            self.lat += step;
            debug!(lat = self.lat, "drift sweep moving to next row");
            if self.lat > 90.0 + EPS {
                self.lat = -90.0;
                self.passes += 1;
                info!(passes = self.passes, "drift sweep wrapped to the south pole");
            }
        }
        self.jitter();

        Some(circle)
    }
}

/// A traversal strategy behind one iterator contract.
///
/// Restarting means building a new sweeper; there is no resume offset.
#[derive(Debug, Clone)]
pub enum GeoSweeper<R = StdRng> {
    /// See [`Boustrophedon`].
    Boustrophedon(Boustrophedon),
    /// See [`Drift`].
    Drift(Drift<R>),
}

impl<R: Rng> GeoSweeper<R> {
    /// Builds the strategy for `mode`, drawing randomness from `rng`.
    pub fn new(mode: SweepMode, bounds: RadiusBounds, mut rng: R) -> Self {
        match mode {
            SweepMode::Boustrophedon => Self::Boustrophedon(Boustrophedon::new(bounds, &mut rng)),
            SweepMode::Drift => Self::Drift(Drift::new(bounds, rng)),
        }
    }

    /// Strategy being run.
    pub fn mode(&self) -> SweepMode {
        match self {
            Self::Boustrophedon(_) => SweepMode::Boustrophedon,
            Self::Drift(_) => SweepMode::Drift,
        }
    }
}

impl<R: Rng> Iterator for GeoSweeper<R> {
    type Item = Circle;

    fn next(&mut self) -> Option<Circle> {
        match self {
            Self::Boustrophedon(s) => s.next(),
            Self::Drift(s) => s.next(),
        }
    }
}
