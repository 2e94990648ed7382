//! Rebuilds the two unified fact tables from the raw extracts.
//!
//! The metrics aggregator produces one row per
//! `(date, platform, agency, business_model)`; the notes aggregator one row
//! per `(date, note_id)`. Both recompute a whole date window and replace the
//! window's rows, so re-running a window is always safe.

pub mod error;
pub mod metrics;
pub mod notes;
pub mod window;

pub use error::AggregateError;
pub use metrics::{aggregate_metrics, MetricsReport, PlatformMetrics, PlatformOutcome};
pub use notes::{aggregate_notes, build_note_metrics, split_metric, NotesReport};
pub use window::{metrics_window, notes_window, DateWindow};

use std::path::Path;

use adrecon_core::{load_inference_rules, InferenceRules};

/// The configured inference rules, or the built-in set when no file is
/// configured.
///
/// # Errors
///
/// Returns [`AggregateError::Rules`] if the file cannot be read or fails
/// validation.
pub fn inference_rules(path: Option<&Path>) -> Result<InferenceRules, AggregateError> {
    match path {
        Some(path) => {
            let rules = load_inference_rules(path)?;
            tracing::info!(path = %path.display(), "loaded inference rules");
            Ok(rules)
        }
        None => Ok(InferenceRules::default()),
    }
}
