//! Scout core - shared types, classification, bundle simulation and relay
//! submission for the detect -> simulate -> submit pipeline.

pub mod classifier;
pub mod fork;
pub mod metrics;
pub mod oracle;
pub mod simulation;
pub mod strategy;
pub mod submit;
pub mod types;

pub use classifier::{encode_swap_payload, Classifier, SWAP_INSTRUCTION_TAG};
pub use fork::{ForkProvider, HttpForkProvider, StateFork, TxExecution};
pub use metrics::{MetricsServer, PipelineMetrics};
pub use oracle::PricingOracle;
pub use simulation::{
    fee_lamports, validate_bundle, BatchSimulationSummary, BundleSimulator, BundleValidation,
    SimulationConfig,
};
pub use strategy::{Opportunity, OpportunityKind, Strategy};
pub use submit::{
    HttpRelayClient, MultiRelaySubmitter, RelayClient, RelayHealth, SubmissionAttempt,
    SubmissionOutcome, SubmitterConfig,
};
pub use types::{
    lamports_to_usd_micros, lamports_to_usd_micros_signed, usd_micros_display, Bundle,
    BundleTransaction, ClassifiedTransaction, PendingTransaction, ProfitEstimate,
    SimulationResult, SwapDetails, TxKind, LAMPORTS_PER_SOL, MAX_BUNDLE_TRANSACTIONS,
};
