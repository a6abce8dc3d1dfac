mod analysis;
mod research;
mod writing;

pub use analysis::{
    AbstractClaimDrafter, AnalysisReport, AnalysisStage, ClaimDrafter, ProvenanceEntry,
    VerifiedFindings,
};
pub use research::{
    ProviderFailure, ResearchOutcome, ResearchStage, ResearchStatus, merge_sources, rank_sources,
};
pub use writing::{Citation, Report, WritingStage};
