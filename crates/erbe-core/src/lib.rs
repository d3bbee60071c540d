//! Tick orchestration for the Erbe world engine.
//!
//! A tick loads the world record, runs an ordered list of stages over it,
//! decays the resonance overlay, records density metrics, computes what
//! changed, and saves. The store lock is held for the whole tick.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `erbe-config.yaml` into
//!   strongly-typed structs.
//! - [`stage`] -- The [`Stage`] trait and [`StageError`].
//! - [`stages`] -- Built-in stages: clock, zone intake, patch and effect
//!   queues, density smoothing.
//! - [`tick`] -- [`TickOrchestrator`] and the per-tick bookkeeping.
//! - [`runner`] -- The periodic loop with a stop flag and tick limit.
//!
//! [`Stage`]: stage::Stage
//! [`StageError`]: stage::StageError
//! [`TickOrchestrator`]: tick::TickOrchestrator

pub mod config;
pub mod runner;
pub mod stage;
pub mod stages;
pub mod tick;
