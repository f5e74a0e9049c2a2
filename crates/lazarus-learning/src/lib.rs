//! Adaptive learning over resurrection outcomes
//!
//! Two read paths over the outcome store feed back into policy without
//! ever changing it silently: the [`PatternAnalyzer`] surfaces systemic
//! patterns (false-positive spikes, unstable modules, calibration drift),
//! and the [`ThresholdAdapter`] proposes threshold changes that are only
//! applied on approval.

mod adapter;
mod analyzer;
mod patterns;
mod thresholds;

pub use adapter::{SimulationResult, ThresholdAdapter};
pub use analyzer::{AnalysisSummary, PatternAnalyzer};
pub use patterns::{
    DetectedPattern, ModuleProfile, PatternSeverity, PatternType, RiskTrend,
};
pub use thresholds::{
    AdjustmentDirection, AdjustmentProposal, ProposalStatus, SharedThresholds,
    ThresholdAdjustment, ThresholdState,
};
