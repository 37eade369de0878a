// Re-export all public modules
pub mod shared;
pub mod path_record;
pub mod dump_reader;
pub mod analyzer;
pub mod extractor;
pub mod geo;
pub mod scorer;
pub mod config;
pub mod report;
pub mod pipeline;
pub mod logging;

// Re-export commonly used types at the crate root
pub use analyzer::{analyze, PathStats};
pub use config::{CacheBackend, RunConfig, ScoringWeights};
pub use dump_reader::{discover_sources, DumpSource};
pub use extractor::{representative_address, Candidate, CandidateSource, TargetExtractor};
pub use geo::{GeoCache, GeoKey, GeoPoint, GeoResolver, Resolution};
pub use path_record::{parse_line, ParseOutcome, PathRecord};
pub use pipeline::{RunOutput, TargetPipeline};
pub use scorer::{merge_candidates, Assembly, PriorityScorer, RankedTarget};
pub use shared::{CandidateKind, PipelineError, Prefix, ProviderKind, TargetASNs, ASN};
