//! # Otter VM Buffers
//!
//! ArrayBuffer, SharedArrayBuffer and TypedArray objects for the Otter
//! JavaScript runtime, and the external memory behind them.
//!
//! ## Design Principles
//!
//! - **Backing stores**: memory lives outside the managed heap in
//!   reference-counted [`BackingStore`]s, freed once, by their last owner
//! - **Extensions**: the collector sees a buffer's memory only through its
//!   [`ArrayBufferExtension`], registered with the isolate's heap
//! - **Live lengths**: resizable and growable buffers are re-read on every
//!   access; growable shared lengths are SeqCst loads from the store
//! - **Exotic indices**: typed arrays define numeric keys against their
//!   current bounds, never as ordinary properties

#![warn(clippy::all)]
#![warn(missing_docs)]
// All unsafe code must have SAFETY comments

pub mod allocator;
pub mod array_buffer;
pub mod backing_store;
pub mod error;
pub mod extension;
pub mod integer_indexed;
pub mod isolate;
pub mod number;
pub mod object;
pub mod protectors;
pub mod typed_array;
pub mod value;

pub use allocator::{ArrayBufferAllocator, LimitedAllocator, SystemAllocator};
pub use array_buffer::JsArrayBuffer;
pub use backing_store::{BackingStore, InitializedFlag, ResizableFlag, SharedFlag};
pub use error::{ShouldThrow, VmError, VmResult};
pub use extension::ArrayBufferExtension;
pub use isolate::{Isolate, IsolateConfig};
pub use number::{CanonicalNumericIndex, canonical_numeric_index_string};
pub use object::{JsObject, Property, PropertyDescriptor, PropertyKey};
pub use protectors::{ARRAY_BUFFER_DETACHING, Protector};
pub use typed_array::{JsTypedArray, TypedArrayKind};
pub use value::Value;
