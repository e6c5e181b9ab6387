//! Post-hoc analysis: trace autopsy, file chunking, and repo introspection
//! (spec §9's "introspection chunk-map-reduce" design note).

pub mod autopsy;
pub mod chunking;
pub mod introspection;

pub use autopsy::{autopsy_from_trace, render_autopsy_markdown, AutopsyReport};
pub use chunking::{chunk_file, Chunk};
pub use introspection::{resolve_repo_root, summarize_repo_file, SummarizeOptions, SummarizeResult};
