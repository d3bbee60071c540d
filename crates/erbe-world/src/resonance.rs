//! Resonance: a bounded, decaying overlay of weighted markers.
//!
//! The overlay sits beside the authoritative record fields. It holds one
//! global [`OverlayBucket`] and any number of zone buckets, each mapping
//! marker names to non-negative weights plus an overlay density.
//!
//! # Lifecycle
//!
//! - [`ResonanceOverlay::add_weight`] bumps markers and density, creating a
//!   zone bucket on first reference.
//! - [`ResonanceOverlay::decay`] runs once per tick and scales everything by
//!   `lambda`. Markers at or below [`MARKER_FLOOR`] are dropped, and zone
//!   buckets with no markers and density under [`ZONE_EVICTION_DENSITY`]
//!   are evicted.
//! - Each bucket holds at most `max_markers` markers. When a bump pushes a
//!   bucket over the cap, the lowest-weight markers go first, oldest first
//!   on ties.
//!
//! # Persistence
//!
//! The overlay is stored in the record document under the `resonance` key:
//!
//! ```json
//! {"global": {"m": {"omen": {"w": 1.0, "seq": 0}}, "density": 0.02, "t": 1, "prov": [], "next_seq": 1},
//!  "zones": {}}
//! ```
//!
//! Older documents that store bare numbers in `m` are accepted.

use std::collections::{BTreeMap, VecDeque};

use erbe_types::{Value, ValueMap};
use serde::Deserialize;

use crate::error::ResonanceError;

/// Default per-tick decay factor.
pub const DEFAULT_DECAY_LAMBDA: f64 = 0.93;
/// Default marker cap per bucket.
pub const DEFAULT_MAX_MARKERS: usize = 50;
/// Default blended weight at which a marker becomes visible.
pub const DEFAULT_VISIBILITY_THRESHOLD: f64 = 0.5;
/// Default weight added per marker by one bump.
pub const DEFAULT_WEIGHT_BUMP: f64 = 1.0;
/// Default density added by one bump.
pub const DEFAULT_DENSITY_BUMP: f64 = 0.02;
/// Default blend coefficient for the global bucket.
pub const DEFAULT_GLOBAL_COEF: f64 = 0.15;
/// Default blend coefficient for the zone bucket.
pub const DEFAULT_ZONE_COEF: f64 = 0.35;
/// Markers whose decayed weight is at or below this are removed.
pub const MARKER_FLOOR: f64 = 1e-3;
/// Empty zone buckets with density below this are evicted on decay.
pub const ZONE_EVICTION_DENSITY: f64 = 1e-5;
/// Provenance records kept per bucket.
pub const PROVENANCE_CAP: usize = 32;
/// Fields kept per provenance record.
pub const PROVENANCE_MAX_FIELDS: usize = 6;

/// Which bucket an operation targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The global bucket.
    Global,
    /// The bucket of the named zone.
    Zone(String),
}

/// What [`ResonanceOverlay::clear`] resets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClearTarget {
    /// Every bucket.
    All,
    /// Only the global bucket.
    Global,
    /// Only the named zone bucket.
    Zone(String),
}

/// Weight of one marker and its insertion order within the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "MarkerRepr")]
pub struct MarkerWeight {
    /// Current weight, never negative.
    pub weight: f64,
    /// Insertion sequence; lower is older.
    pub seq: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MarkerRepr {
    Bare(f64),
    Full {
        w: f64,
        #[serde(default)]
        seq: u32,
    },
}

impl From<MarkerRepr> for MarkerWeight {
    fn from(repr: MarkerRepr) -> Self {
        match repr {
            MarkerRepr::Bare(weight) => Self { weight, seq: 0 },
            MarkerRepr::Full { w, seq } => Self { weight: w, seq },
        }
    }
}

/// One scope of the overlay.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct OverlayBucket {
    #[serde(rename = "m")]
    markers: BTreeMap<String, MarkerWeight>,
    density: f64,
    #[serde(rename = "t")]
    touch_count: u32,
    #[serde(rename = "prov")]
    provenance: VecDeque<ValueMap>,
    next_seq: u32,
}

impl OverlayBucket {
    /// Weight of `marker`, if present.
    pub fn weight(&self, marker: &str) -> Option<f64> {
        self.markers.get(marker).map(|m| m.weight)
    }

    /// Marker names and weights in name order.
    pub fn markers(&self) -> impl Iterator<Item = (&str, f64)> {
        self.markers.iter().map(|(name, m)| (name.as_str(), m.weight))
    }

    /// Number of markers held.
    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    /// Overlay density.
    pub const fn density(&self) -> f64 {
        self.density
    }

    /// How many bumps this bucket has received.
    pub const fn touch_count(&self) -> u32 {
        self.touch_count
    }

    /// Provenance records, oldest first.
    pub const fn provenance(&self) -> &VecDeque<ValueMap> {
        &self.provenance
    }

    fn bump(&mut self, markers: &[String], weight_inc: f64, density_inc: f64, provenance: Option<&ValueMap>) {
        for name in markers {
            let next_seq = &mut self.next_seq;
            let marker = self.markers.entry(name.clone()).or_insert_with(|| {
                let seq = *next_seq;
                *next_seq = next_seq.saturating_add(1);
                MarkerWeight { weight: 0.0, seq }
            });
            marker.weight = (marker.weight + weight_inc).max(0.0);
        }
        self.density = (self.density + density_inc).max(0.0);
        self.touch_count = self.touch_count.saturating_add(1);

        if let Some(fields) = provenance.filter(|fields| !fields.is_empty()) {
            let record = fields
                .iter()
                .take(PROVENANCE_MAX_FIELDS)
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            self.provenance.push_back(record);
            while self.provenance.len() > PROVENANCE_CAP {
                self.provenance.pop_front();
            }
        }
    }

    fn enforce_cap(&mut self, cap: usize) {
        while self.markers.len() > cap {
            let weakest = self
                .markers
                .iter()
                .min_by(|(_, a), (_, b)| a.weight.total_cmp(&b.weight).then(a.seq.cmp(&b.seq)))
                .map(|(name, _)| name.clone());
            match weakest {
                Some(name) => {
                    self.markers.remove(&name);
                }
                None => break,
            }
        }
    }

    fn decay(&mut self, lambda: f64) {
        self.density *= lambda;
        self.markers.retain(|_, marker| {
            marker.weight *= lambda;
            marker.weight > MARKER_FLOOR
        });
    }

    fn to_value(&self) -> Value {
        let markers: ValueMap = self
            .markers
            .iter()
            .map(|(name, m)| {
                let entry = ValueMap::from([
                    ("w".to_owned(), Value::Number(m.weight)),
                    ("seq".to_owned(), Value::from(m.seq)),
                ]);
                (name.clone(), Value::Map(entry))
            })
            .collect();
        let provenance = self.provenance.iter().cloned().map(Value::Map).collect();
        Value::Map(ValueMap::from([
            ("m".to_owned(), Value::Map(markers)),
            ("density".to_owned(), Value::Number(self.density)),
            ("t".to_owned(), Value::from(self.touch_count)),
            ("prov".to_owned(), Value::List(provenance)),
            ("next_seq".to_owned(), Value::from(self.next_seq)),
        ]))
    }

    /// Older documents carry no `next_seq`; keep new markers after old ones.
    fn repair_sequence(&mut self) {
        let after_last = self
            .markers
            .values()
            .map(|m| m.seq.saturating_add(1))
            .max()
            .unwrap_or(0);
        self.next_seq = self.next_seq.max(after_last);
    }
}

/// Tunables that are not persisted with the overlay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayLimits {
    /// Marker cap per bucket.
    pub max_markers: usize,
    /// Blended weight at which a marker is visible in a projection.
    pub visibility_threshold: f64,
}

impl Default for OverlayLimits {
    fn default() -> Self {
        Self {
            max_markers: DEFAULT_MAX_MARKERS,
            visibility_threshold: DEFAULT_VISIBILITY_THRESHOLD,
        }
    }
}

/// Read-only view of the overlay for one zone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayProjection {
    /// Markers whose blended weight reaches the visibility threshold, sorted.
    pub visible_markers: Vec<String>,
    /// Blended density.
    pub density: f64,
}

/// The global bucket plus per-zone buckets.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResonanceOverlay {
    global: OverlayBucket,
    zones: BTreeMap<String, OverlayBucket>,
    #[serde(skip)]
    limits: OverlayLimits,
}

impl ResonanceOverlay {
    /// An empty overlay with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the limits, trimming buckets that exceed the new cap.
    pub fn set_limits(&mut self, limits: OverlayLimits) {
        self.limits = limits;
        self.global.enforce_cap(limits.max_markers);
        for bucket in self.zones.values_mut() {
            bucket.enforce_cap(limits.max_markers);
        }
    }

    /// Current limits.
    pub const fn limits(&self) -> OverlayLimits {
        self.limits
    }

    /// The global bucket.
    pub const fn global(&self) -> &OverlayBucket {
        &self.global
    }

    /// The bucket of `zone`, if one exists.
    pub fn zone(&self, zone: &str) -> Option<&OverlayBucket> {
        self.zones.get(zone)
    }

    /// Ids of zones with a bucket.
    pub fn zone_ids(&self) -> impl Iterator<Item = &str> {
        self.zones.keys().map(String::as_str)
    }

    /// Add `weight_inc` to each marker and `density_inc` to the bucket.
    ///
    /// Weights and density clamp at zero. A non-empty provenance map is
    /// recorded with at most [`PROVENANCE_MAX_FIELDS`] fields.
    pub fn add_weight(
        &mut self,
        scope: &Scope,
        markers: &[String],
        weight_inc: f64,
        density_inc: f64,
        provenance: Option<&ValueMap>,
    ) -> Result<(), ResonanceError> {
        if !weight_inc.is_finite() {
            return Err(ResonanceError::NonFinite {
                field: "weight",
                value: weight_inc,
            });
        }
        if !density_inc.is_finite() {
            return Err(ResonanceError::NonFinite {
                field: "density",
                value: density_inc,
            });
        }
        let bucket = match scope {
            Scope::Global => &mut self.global,
            Scope::Zone(zone) => self.zones.entry(zone.clone()).or_default(),
        };
        bucket.bump(markers, weight_inc, density_inc, provenance);
        bucket.enforce_cap(self.limits.max_markers);
        Ok(())
    }

    /// Scale every weight and density by `lambda`, then drop what fell
    /// under the floors.
    pub fn decay(&mut self, lambda: f64) -> Result<(), ResonanceError> {
        let in_range = lambda > 0.0 && lambda < 1.0;
        if !in_range {
            return Err(ResonanceError::InvalidDecay { lambda });
        }
        self.global.decay(lambda);
        self.zones.retain(|_, bucket| {
            bucket.decay(lambda);
            !(bucket.markers.is_empty() && bucket.density < ZONE_EVICTION_DENSITY)
        });
        Ok(())
    }

    /// Reset part or all of the overlay.
    pub fn clear(&mut self, target: &ClearTarget) {
        match target {
            ClearTarget::All => {
                self.global = OverlayBucket::default();
                self.zones.clear();
            }
            ClearTarget::Global => self.global = OverlayBucket::default(),
            ClearTarget::Zone(zone) => {
                self.zones.remove(zone);
            }
        }
    }

    /// Blend the global bucket with `zone`'s bucket.
    ///
    /// Each marker's blended weight is `global * global_coef + zone *
    /// zone_coef`; density blends the same way. A missing zone contributes
    /// nothing.
    pub fn compute_overlay(&self, zone: Option<&str>, global_coef: f64, zone_coef: f64) -> OverlayProjection {
        let zone_bucket = zone.and_then(|id| self.zones.get(id));
        let mut blended: BTreeMap<&str, f64> = BTreeMap::new();
        for (name, weight) in self.global.markers() {
            *blended.entry(name).or_insert(0.0) += weight * global_coef;
        }
        if let Some(bucket) = zone_bucket {
            for (name, weight) in bucket.markers() {
                *blended.entry(name).or_insert(0.0) += weight * zone_coef;
            }
        }
        let visible_markers = blended
            .into_iter()
            .filter(|(_, weight)| *weight >= self.limits.visibility_threshold)
            .map(|(name, _)| name.to_owned())
            .collect();
        let zone_density = zone_bucket.map_or(0.0, OverlayBucket::density);
        OverlayProjection {
            visible_markers,
            density: self.global.density * global_coef + zone_density * zone_coef,
        }
    }

    /// Encode for the record document.
    pub fn to_value(&self) -> Value {
        let zones = self
            .zones
            .iter()
            .map(|(zone, bucket)| (zone.clone(), bucket.to_value()))
            .collect();
        Value::Map(ValueMap::from([
            ("global".to_owned(), self.global.to_value()),
            ("zones".to_owned(), Value::Map(zones)),
        ]))
    }

    /// Decode from the record document, with default limits.
    pub fn from_value(value: &Value) -> Result<Self, ResonanceError> {
        let json = serde_json::to_value(value)?;
        let mut overlay: Self = serde_json::from_value(json)?;
        overlay.global.repair_sequence();
        for bucket in overlay.zones.values_mut() {
            bucket.repair_sequence();
        }
        Ok(overlay)
    }
}
