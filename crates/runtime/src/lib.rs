//! The scheduler and protocol layer: marker parsers, sanitizer, condenser,
//! capabilities, checkpoint store, trace writer, history framing, memory
//! feedback, retrieval adapter, pipeline scheduler, and turn controller
//! (spec §4).

pub mod capabilities;
pub mod checkpoint;
pub mod condense;
pub mod controller;
pub mod history;
pub mod memory_feedback;
pub mod notes;
pub mod pipeline;
pub mod retrieval;
pub mod sanitize;
pub mod tool_calls;
pub mod tracer;

pub use controller::run_turn;
pub use pipeline::run_pipeline;
