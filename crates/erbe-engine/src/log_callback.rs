//! Tick callback that reports what each tick changed.

use erbe_core::runner::TickCallback;
use erbe_core::tick::TickSummary;
use tracing::{debug, info, warn};

/// Changes smaller than this are left out of the per-tick report.
const REPORT_MIN_ABS: f64 = 1e-3;

/// Decimal places in rendered deltas.
const REPORT_PRECISION: usize = 4;

/// Logs a one-line summary per tick. At debug level it adds per-zone
/// rollups, the resonance projection of each zone, and the largest deltas.
pub struct LogCallback {
    max_lines: usize,
    global_coef: f64,
    zone_coef: f64,
}

impl LogCallback {
    /// A callback that prints at most `max_lines` delta lines per tick and
    /// blends resonance with the given coefficients.
    pub const fn new(max_lines: usize, global_coef: f64, zone_coef: f64) -> Self {
        Self {
            max_lines,
            global_coef,
            zone_coef,
        }
    }
}

impl TickCallback for LogCallback {
    fn on_tick(&mut self, summary: &TickSummary) {
        for failure in &summary.failures {
            warn!(
                tick_index = summary.tick_index,
                stage = %failure.stage,
                stage_index = failure.stage_index,
                panicked = failure.panicked,
                "stage failed this tick"
            );
        }

        let notable = summary.deltas.filter_min_abs(REPORT_MIN_ABS);
        info!(
            tick_index = summary.tick_index,
            ops = summary.ops.len(),
            deltas = notable.len(),
            elapsed_ms = summary.elapsed_ms,
            "tick saved"
        );
        for (zone, total) in notable.sum_by_zone() {
            debug!(tick_index = summary.tick_index, zone = %zone, total, "zone delta");
        }
        let overlay = summary.record.resonance();
        for zone in overlay.zone_ids() {
            let projection = overlay.compute_overlay(Some(zone), self.global_coef, self.zone_coef);
            if !projection.visible_markers.is_empty() {
                debug!(
                    zone = %zone,
                    markers = ?projection.visible_markers,
                    density = projection.density,
                    "resonance visible"
                );
            }
        }
        for line in notable.summary_lines(REPORT_PRECISION).into_iter().take(self.max_lines) {
            debug!(tick_index = summary.tick_index, "{line}");
        }
    }
}
