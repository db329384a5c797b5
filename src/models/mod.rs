//! Domain models shared by the ledger, dedup engine and orchestrator.

pub mod ledger;
pub mod record;
pub mod run;

pub use ledger::{
    ConditionalHeaders, FetchResult, LedgerEntry, LedgerState, LedgerStats, Metadata,
    PreviousOutcome, DUPLICATE_OF_KEY, PREVIOUS_OUTCOME_KEY,
};
pub use record::{DiscoveredUrl, RawRecord, ETAG_HINT_KEY, LAST_MODIFIED_HINT_KEY};
pub use run::{PipelineRun, RunStatus};
