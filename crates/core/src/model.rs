use serde::{Deserialize, Serialize};

/// A search region: center coordinate plus radius.
///
/// Produced by [`crate::GeoSweeper`], which clamps the center into
/// `[-90, 90]` / `[-180, 180]` before handing it out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    /// Center latitude in degrees.
    pub lat: f64,
    /// Center longitude in degrees.
    pub lon: f64,
    /// Search radius in kilometers.
    pub radius_km: f64,
}

/// A claimable geotagged item as reported by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Opaque remote id.
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub amount: u64,
    /// Username of the current claimant, if any.
    #[serde(default)]
    pub claimed_by: Option<String>,
}

impl Resource {
    /// Returns the claimant username, treating an empty string as unclaimed.
    pub fn claimant(&self) -> Option<&str> {
        self.claimed_by.as_deref().filter(|name| !name.is_empty())
    }
}

/// The local record kept for one resource after the collection policy ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionOutcome {
    pub lat: f64,
    pub lon: f64,
    pub amount: u64,
    /// True when our own identity ends up as claimant.
    pub owned: bool,
}

/// One visited circle and the outcomes of the resources found inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitRecord {
    /// Position in the history, assigned on append.
    #[serde(default)]
    pub seq: u64,
    /// Wall-clock time of the append, assigned on append.
    #[serde(default)]
    pub visited_at_ms: i64,
    pub lat: f64,
    pub lon: f64,
    pub radius_km: f64,
    /// Same order as the query returned the resources.
    pub resources: Vec<CollectionOutcome>,
}

impl VisitRecord {
    /// Starts an empty record for `circle`. `seq` and `visited_at_ms` are
    /// filled in by the history store.
    pub fn for_circle(circle: &Circle) -> Self {
        Self {
            seq: 0,
            visited_at_ms: 0,
            lat: circle.lat,
            lon: circle.lon,
            radius_km: circle.radius_km,
            resources: Vec::new(),
        }
    }
}

/// Who we are on the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Id passed as claimant when collecting.
    pub user_id: String,
    /// Name the remote service reports in a resource's claim status.
    pub username: String,
}
