// =============================================================================
// Strategy — confluence scoring, regime, gates, sizing, SL/TP, the tick loop
// =============================================================================

pub mod confluence;
pub mod correlation;
pub mod engine;
pub mod regime;
pub mod session;
pub mod sizing;
pub mod sltp;

pub use confluence::{ConfluenceReport, SignalDirection};
pub use engine::{run_analysis_loop, AnalysisOutcome};
pub use regime::{Regime, RegimeAssessment, RegimeStrategy};
pub use session::SessionAdvice;
