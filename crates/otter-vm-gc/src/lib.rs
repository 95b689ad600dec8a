//! # Otter VM Garbage Collector: external memory
//!
//! Heap-side bookkeeping for memory that lives outside the managed heap.
//!
//! ## Design
//!
//! - **Side records**: owners register an [`Extension`] instead of being
//!   scanned; the tracer flips generation-scoped [`ExtensionMarks`]
//! - **Two lists**: young and old, so young sweeps touch only fresh records
//! - **Accounting**: external bytes are charged on append and released on
//!   detach or sweep

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod heap;
pub mod marks;
pub mod registry;

pub use heap::{GcConfig, GcHeap, OomHandler, abort_on_oom};
pub use marks::{ExtensionMarks, Generation, MarkScope, SweepScope};
pub use registry::{Extension, ExtensionRegistry, SweepStats};
