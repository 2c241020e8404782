// crates/risk-engine/src/atomizer/mod.rs
// The atomization pipeline (§4.1-4.6, L1-L8): turns a commit's raw diff
// into CodeBlock-level change events and replays them against the
// relational store and graph mirror.

pub mod chunker;
pub mod diff;
pub mod extractor;
pub mod merger;
pub mod processor;
pub mod state_tracker;

pub use chunker::{chunk_file, Chunk, ChunkResult};
pub use diff::{get_line_range, is_binary_file, is_code_file, parse_diff, ChangeType, FileChange, Hunk};
pub use extractor::{empty_event_log, extract_chunk, ChangeEvent, EventLog, RawChangeEvent, RawExtractorOutput};
pub use merger::{merge_events, normalize_signature, parameter_count, signatures_match};
pub use processor::{process_commits, ProcessSummary};
pub use state_tracker::StateTracker;
