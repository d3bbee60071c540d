//! The shape of an Erbe world record and the domain operations on it.
//!
//! A [`WorldRecord`] is a map-rooted [`Value`] tree plus its typed
//! [`ResonanceOverlay`]. This crate owns everything that knows which keys a
//! world record has: the default field set, legacy-shape normalization,
//! hydration of missing fields, compaction of growing logs, zone intake, the
//! effect merger used by upstream producers, and schema migration.
//!
//! # Modules
//!
//! - [`record`] -- [`WorldRecord`], the default field set, and the shared
//!   audit-log helpers.
//! - [`normalize`] -- Legacy-shape upgrades, hydration of missing fields,
//!   and compaction of capped lists.
//! - [`resonance`] -- The bounded, decaying marker overlay with global and
//!   per-zone buckets.
//! - [`zones`] -- Zone defaults, standalone zone files, non-destructive
//!   merging, and ring auto-linking.
//! - [`effects`] -- Merging upstream scalar and sub-tree effects into a
//!   record.
//! - [`migration`] -- Ordered schema-version migration steps.
//! - [`error`] -- Error types for this crate.
//!
//! [`Value`]: erbe_types::Value

pub mod effects;
pub mod error;
pub mod migration;
pub mod normalize;
pub mod record;
pub mod resonance;
pub mod zones;

// Re-export primary types at crate root.
pub use effects::apply_effects;
pub use error::{MigrationError, ResonanceError, WorldError};
pub use migration::{CURRENT_SCHEMA_VERSION, MigrationRegistry, MigrationReport, MigrationStep, SchemaVersion};
pub use normalize::{compact, hydrate, normalize_legacy};
pub use record::{WorldRecord, default_fields, default_record};
pub use resonance::{ClearTarget, OverlayBucket, OverlayLimits, OverlayProjection, ResonanceOverlay, Scope};
pub use zones::{MergeReport, autolink_ring, load_zone_dir, merge_zones, zone_defaults};
