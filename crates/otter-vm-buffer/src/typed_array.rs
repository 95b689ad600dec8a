//! TypedArray implementation
//!
//! A typed array is a view over an ArrayBuffer. Small arrays created without a
//! buffer keep their elements inline ("on-heap") behind an empty buffer object;
//! the first request for the real buffer moves them into a fresh backing store.
//! That move is one-way.
//!
//! A view is either fixed-length or length-tracking. Length-tracking views and
//! views over resizable buffers recompute their length on every access, since
//! the buffer may have shrunk, grown, or been detached since the last one.

use parking_lot::RwLock;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::array_buffer::JsArrayBuffer;
use crate::backing_store::{BackingStore, InitializedFlag, SharedFlag};
use crate::error::{VmError, VmResult};
use crate::isolate::Isolate;
use crate::number::canonical_numeric_index_string;
use crate::object::{JsObject, Property, PropertyKey};
use crate::value::Value;

/// The type of a TypedArray
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypedArrayKind {
    /// Int8Array - 8-bit signed integers
    Int8,
    /// Uint8Array - 8-bit unsigned integers
    Uint8,
    /// Uint8ClampedArray - 8-bit unsigned integers (clamped)
    Uint8Clamped,
    /// Int16Array - 16-bit signed integers
    Int16,
    /// Uint16Array - 16-bit unsigned integers
    Uint16,
    /// Int32Array - 32-bit signed integers
    Int32,
    /// Uint32Array - 32-bit unsigned integers
    Uint32,
    /// Float32Array - 32-bit floating point
    Float32,
    /// Float64Array - 64-bit floating point
    Float64,
    /// BigInt64Array - 64-bit signed integers (BigInt)
    BigInt64,
    /// BigUint64Array - 64-bit unsigned integers (BigInt)
    BigUint64,
}

/// An element value after coercion, before it is encoded
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ElementValue {
    /// Result of ToNumber
    Number(f64),
    /// Result of ToBigInt
    BigInt(i128),
}

/// ToInt8 .. ToUint32 share this: the low `bits` of the truncated value
fn to_int_bits(n: f64, bits: u32) -> u64 {
    if !n.is_finite() {
        return 0;
    }
    let modulus = (1u64 << bits) as f64;
    n.trunc().rem_euclid(modulus) as u64
}

/// ToUint8Clamp
fn to_uint8_clamp(n: f64) -> u8 {
    if n.is_nan() || n <= 0.0 {
        0
    } else if n >= 255.0 {
        255
    } else {
        n.round_ties_even() as u8
    }
}

impl TypedArrayKind {
    /// Get the byte size of each element
    pub fn element_size(&self) -> usize {
        match self {
            TypedArrayKind::Int8 | TypedArrayKind::Uint8 | TypedArrayKind::Uint8Clamped => 1,
            TypedArrayKind::Int16 | TypedArrayKind::Uint16 => 2,
            TypedArrayKind::Int32 | TypedArrayKind::Uint32 | TypedArrayKind::Float32 => 4,
            TypedArrayKind::Float64 | TypedArrayKind::BigInt64 | TypedArrayKind::BigUint64 => 8,
        }
    }

    /// Get the name of this TypedArray type
    pub fn name(&self) -> &'static str {
        match self {
            TypedArrayKind::Int8 => "Int8Array",
            TypedArrayKind::Uint8 => "Uint8Array",
            TypedArrayKind::Uint8Clamped => "Uint8ClampedArray",
            TypedArrayKind::Int16 => "Int16Array",
            TypedArrayKind::Uint16 => "Uint16Array",
            TypedArrayKind::Int32 => "Int32Array",
            TypedArrayKind::Uint32 => "Uint32Array",
            TypedArrayKind::Float32 => "Float32Array",
            TypedArrayKind::Float64 => "Float64Array",
            TypedArrayKind::BigInt64 => "BigInt64Array",
            TypedArrayKind::BigUint64 => "BigUint64Array",
        }
    }

    /// Check if this is a BigInt typed array
    pub fn is_bigint(&self) -> bool {
        matches!(self, TypedArrayKind::BigInt64 | TypedArrayKind::BigUint64)
    }

    /// Coerce a script value for storage; may run user code
    pub fn coerce(&self, value: &Value) -> VmResult<ElementValue> {
        if self.is_bigint() {
            value.to_big_int().map(ElementValue::BigInt)
        } else {
            value.to_number().map(ElementValue::Number)
        }
    }

    /// Encode a coerced value into `out` (little-endian, `element_size` bytes)
    pub fn write_element(&self, value: ElementValue, out: &mut [u8]) {
        debug_assert_eq!(out.len(), self.element_size());
        match (self, value) {
            (TypedArrayKind::Uint8Clamped, ElementValue::Number(n)) => {
                out[0] = to_uint8_clamp(n);
            }
            (TypedArrayKind::Float32, ElementValue::Number(n)) => {
                out.copy_from_slice(&(n as f32).to_le_bytes());
            }
            (TypedArrayKind::Float64, ElementValue::Number(n)) => {
                out.copy_from_slice(&n.to_le_bytes());
            }
            (TypedArrayKind::BigInt64 | TypedArrayKind::BigUint64, ElementValue::BigInt(n)) => {
                out.copy_from_slice(&(n as i64).to_le_bytes());
            }
            (TypedArrayKind::BigInt64 | TypedArrayKind::BigUint64, ElementValue::Number(_))
            | (_, ElementValue::BigInt(_)) => {
                debug_assert!(false, "{value:?} stored into {}", self.name());
            }
            (_, ElementValue::Number(n)) => {
                let bits = to_int_bits(n, (self.element_size() * 8) as u32);
                out.copy_from_slice(&bits.to_le_bytes()[..out.len()]);
            }
        }
    }

    /// Decode one element from `bytes` (little-endian)
    pub fn read_element(&self, bytes: &[u8]) -> Value {
        debug_assert_eq!(bytes.len(), self.element_size());
        let mut raw = [0u8; 8];
        raw[..bytes.len()].copy_from_slice(bytes);
        match self {
            TypedArrayKind::Int8 => Value::Number(f64::from(raw[0] as i8)),
            TypedArrayKind::Uint8 | TypedArrayKind::Uint8Clamped => {
                Value::Number(f64::from(raw[0]))
            }
            TypedArrayKind::Int16 => {
                Value::Number(f64::from(i16::from_le_bytes([raw[0], raw[1]])))
            }
            TypedArrayKind::Uint16 => {
                Value::Number(f64::from(u16::from_le_bytes([raw[0], raw[1]])))
            }
            TypedArrayKind::Int32 => Value::Number(f64::from(i32::from_le_bytes([
                raw[0], raw[1], raw[2], raw[3],
            ]))),
            TypedArrayKind::Uint32 => Value::Number(f64::from(u32::from_le_bytes([
                raw[0], raw[1], raw[2], raw[3],
            ]))),
            TypedArrayKind::Float32 => Value::Number(f64::from(f32::from_le_bytes([
                raw[0], raw[1], raw[2], raw[3],
            ]))),
            TypedArrayKind::Float64 => Value::Number(f64::from_le_bytes(raw)),
            TypedArrayKind::BigInt64 => Value::BigInt(i128::from(i64::from_le_bytes(raw))),
            TypedArrayKind::BigUint64 => Value::BigInt(i128::from(u64::from_le_bytes(raw))),
        }
    }
}

/// Where the elements live
enum Placement {
    /// Inline bytes; the buffer object is still empty
    OnHeap(Box<[u8]>),
    /// In the buffer's backing store
    OffHeap,
}

/// A JavaScript TypedArray
pub struct JsTypedArray {
    kind: TypedArrayKind,
    buffer: Arc<JsArrayBuffer>,
    byte_offset: usize,
    /// Element count for fixed-length views; unused when length-tracking
    length: usize,
    length_tracking: bool,
    placement: RwLock<Placement>,
    /// Ordinary (non-index) properties
    object: JsObject,
}

// SAFETY: element bytes are reached through the buffer's region pointer only
// while holding the placement lock, after re-validating the index.
unsafe impl Send for JsTypedArray {}
unsafe impl Sync for JsTypedArray {}

impl JsTypedArray {
    /// Create a new TypedArray view over an ArrayBuffer
    ///
    /// With `length == None` the view covers the rest of the buffer, and
    /// tracks the buffer's length if it is resizable or growable.
    pub fn new(
        buffer: Arc<JsArrayBuffer>,
        kind: TypedArrayKind,
        byte_offset: usize,
        length: Option<usize>,
    ) -> VmResult<Self> {
        let elem_size = kind.element_size();

        if byte_offset % elem_size != 0 {
            return Err(VmError::range_error(format!(
                "start offset of {} should be a multiple of {elem_size}",
                kind.name()
            )));
        }
        if buffer.was_detached() {
            return Err(VmError::Detached);
        }

        let buffer_byte_length = buffer.get_byte_length();
        let (length, length_tracking) = match length {
            None if buffer.is_resizable() => {
                if byte_offset > buffer_byte_length {
                    return Err(VmError::range_error(format!(
                        "Start offset {byte_offset} is outside the bounds of the buffer"
                    )));
                }
                (0, true)
            }
            None => {
                if buffer_byte_length % elem_size != 0 {
                    return Err(VmError::range_error(format!(
                        "byte length of {} should be a multiple of {elem_size}",
                        kind.name()
                    )));
                }
                if byte_offset > buffer_byte_length {
                    return Err(VmError::range_error(format!(
                        "Start offset {byte_offset} is outside the bounds of the buffer"
                    )));
                }
                ((buffer_byte_length - byte_offset) / elem_size, false)
            }
            Some(length) => {
                let end = length
                    .checked_mul(elem_size)
                    .and_then(|byte_length| byte_length.checked_add(byte_offset));
                if end.is_none_or(|end| end > buffer_byte_length) {
                    return Err(VmError::range_error(format!(
                        "Invalid typed array length: {length}"
                    )));
                }
                (length, false)
            }
        };

        Ok(Self {
            kind,
            buffer,
            byte_offset,
            length,
            length_tracking,
            placement: RwLock::new(Placement::OffHeap),
            object: JsObject::new(),
        })
    }

    /// Create a new TypedArray with its own zeroed storage
    ///
    /// Arrays up to the isolate's on-heap threshold keep their elements inline
    /// until [`JsTypedArray::get_buffer`] is called.
    pub fn with_length(
        isolate: &Arc<Isolate>,
        kind: TypedArrayKind,
        length: usize,
    ) -> VmResult<Self> {
        let byte_length = length
            .checked_mul(kind.element_size())
            .filter(|&byte_length| byte_length <= isolate.max_byte_length())
            .ok_or_else(|| VmError::range_error(format!("Invalid typed array length: {length}")))?;

        let (buffer, placement) = if byte_length <= isolate.typed_array_max_size_in_heap() {
            (
                JsArrayBuffer::new(isolate),
                Placement::OnHeap(vec![0u8; byte_length].into_boxed_slice()),
            )
        } else {
            (
                JsArrayBuffer::allocate(isolate, byte_length)?,
                Placement::OffHeap,
            )
        };

        Ok(Self {
            kind,
            buffer,
            byte_offset: 0,
            length,
            length_tracking: false,
            placement: RwLock::new(placement),
            object: JsObject::new(),
        })
    }

    /// Get the kind of this TypedArray
    pub fn kind(&self) -> TypedArrayKind {
        self.kind
    }

    /// The buffer object, without materializing on-heap storage
    pub fn buffer(&self) -> &Arc<JsArrayBuffer> {
        &self.buffer
    }

    /// Get the byte offset into the buffer
    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    /// Ordinary property table
    pub fn object(&self) -> &JsObject {
        &self.object
    }

    /// Whether the length follows the buffer's length
    pub fn is_length_tracking(&self) -> bool {
        self.length_tracking
    }

    /// Backed by a resizable, non-shared buffer
    pub fn is_backed_by_rab(&self) -> bool {
        self.buffer.is_resizable() && !self.buffer.is_shared()
    }

    /// Whether the length must be recomputed on access
    pub fn is_variable_length(&self) -> bool {
        self.length_tracking || self.is_backed_by_rab()
    }

    /// Elements still live inline
    pub fn is_on_heap(&self) -> bool {
        matches!(*self.placement.read(), Placement::OnHeap(_))
    }

    /// Whether the underlying buffer was detached
    pub fn was_detached(&self) -> bool {
        self.buffer.was_detached()
    }

    /// Current element count, or `None` when the view is out of bounds
    ///
    /// A detached view has length 0 and is not out of bounds.
    pub fn get_length_or_out_of_bounds(&self) -> Option<usize> {
        if self.buffer.was_detached() {
            return Some(0);
        }
        let elem_size = self.kind.element_size();

        if self.is_backed_by_rab() {
            let buffer_byte_length = self.buffer.byte_length();
            if self.length_tracking {
                if self.byte_offset > buffer_byte_length {
                    return None;
                }
                return Some((buffer_byte_length - self.byte_offset) / elem_size);
            }
            if self.byte_offset + self.length * elem_size > buffer_byte_length {
                return None;
            }
            return Some(self.length);
        }

        if self.length_tracking {
            return Some(self.length_tracking_gsab_backed_length());
        }
        Some(self.length)
    }

    /// Element count; 0 when detached or out of bounds
    pub fn length(&self) -> usize {
        self.get_length_or_out_of_bounds().unwrap_or(0)
    }

    /// Byte length of the view; 0 when detached or out of bounds
    pub fn byte_length(&self) -> usize {
        self.length() * self.kind.element_size()
    }

    /// Element count of a length-tracking view over a growable shared buffer
    ///
    /// Reads the store's length with SeqCst; growable shared buffers never
    /// shrink, so the length is at least the offset validated at construction.
    pub fn length_tracking_gsab_backed_length(&self) -> usize {
        assert!(self.length_tracking);
        assert!(self.buffer.is_resizable());
        assert!(self.buffer.is_shared());
        let backing_byte_length = self.buffer.gsab_byte_length();
        assert!(backing_byte_length >= self.byte_offset);
        (backing_byte_length - self.byte_offset) / self.kind.element_size()
    }

    /// IsValidIntegerIndex
    pub fn is_valid_integer_index(&self, index: usize) -> bool {
        if self.buffer.was_detached() {
            return false;
        }
        self.get_length_or_out_of_bounds()
            .is_some_and(|length| index < length)
    }

    /// Start of the element data
    ///
    /// Off-heap views point into the backing store at `byte_offset`; on-heap
    /// views point at the inline bytes, which move when the view is promoted.
    pub fn data_ptr(&self) -> NonNull<u8> {
        match &*self.placement.read() {
            Placement::OnHeap(bytes) => NonNull::from(&bytes[..]).cast(),
            Placement::OffHeap => {
                let start = self.buffer.backing_store_ptr();
                NonNull::new(start.as_ptr().wrapping_add(self.byte_offset)).unwrap_or(start)
            }
        }
    }

    /// The buffer object, moving inline elements into a backing store first
    ///
    /// Allocation failure here is fatal for the isolate. If the buffer was
    /// detached while the elements were still inline, nothing is allocated
    /// and the detached buffer is returned.
    pub fn get_buffer(&self) -> Arc<JsArrayBuffer> {
        let mut placement = self.placement.write();
        if self.buffer.was_detached() {
            // The inline elements went with the detach.
            *placement = Placement::OffHeap;
            return Arc::clone(&self.buffer);
        }
        let Placement::OnHeap(bytes) = &*placement else {
            return Arc::clone(&self.buffer);
        };
        debug_assert!(!self.buffer.is_resizable());
        debug_assert!(self.buffer.is_empty());

        let isolate = self.buffer.isolate();
        let byte_length = bytes.len();
        let Some(store) = BackingStore::allocate(
            isolate.allocator(),
            byte_length,
            SharedFlag::NotShared,
            InitializedFlag::Uninitialized,
        ) else {
            isolate.fatal_process_out_of_memory("JsTypedArray::get_buffer");
        };

        if byte_length > 0 {
            // SAFETY: the new store holds `byte_length` bytes and cannot
            // overlap the inline storage.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    bytes.as_ptr(),
                    store.buffer_start().as_ptr(),
                    byte_length,
                );
            }
        }

        self.buffer.attach(store);
        *placement = Placement::OffHeap;

        tracing::trace!(
            target: "otter::buffer",
            kind = self.kind.name(),
            byte_length,
            "typed array moved off-heap"
        );

        Arc::clone(&self.buffer)
    }

    /// Read element `index`; `None` when the index is not valid
    pub fn get_element(&self, index: usize) -> Option<Value> {
        let placement = self.placement.read();
        if !self.is_valid_integer_index(index) {
            return None;
        }
        let elem_size = self.kind.element_size();
        let offset = index * elem_size;
        match &*placement {
            Placement::OnHeap(bytes) => {
                Some(self.kind.read_element(&bytes[offset..offset + elem_size]))
            }
            Placement::OffHeap => {
                let mut raw = [0u8; 8];
                let src = self
                    .buffer
                    .backing_store_ptr()
                    .as_ptr()
                    .wrapping_add(self.byte_offset + offset);
                // SAFETY: the index was validated against the buffer's current
                // length under the placement lock.
                unsafe { std::ptr::copy_nonoverlapping(src, raw.as_mut_ptr(), elem_size) };
                Some(self.kind.read_element(&raw[..elem_size]))
            }
        }
    }

    /// IntegerIndexedElementSet
    ///
    /// The value is coerced first, which may run user code that detaches or
    /// resizes the buffer; the index is validated afterwards and the write is
    /// silently dropped when it is no longer valid.
    pub fn set_element(&self, index: usize, value: &Value) -> VmResult<()> {
        let element = self.kind.coerce(value)?;

        let mut placement = self.placement.write();
        if !self.is_valid_integer_index(index) {
            return Ok(());
        }
        let elem_size = self.kind.element_size();
        let offset = index * elem_size;
        let mut raw = [0u8; 8];
        self.kind.write_element(element, &mut raw[..elem_size]);

        match &mut *placement {
            Placement::OnHeap(bytes) => {
                bytes[offset..offset + elem_size].copy_from_slice(&raw[..elem_size]);
            }
            Placement::OffHeap => {
                let dst = self
                    .buffer
                    .backing_store_ptr()
                    .as_ptr()
                    .wrapping_add(self.byte_offset + offset);
                // SAFETY: validated as for `get_element`.
                unsafe { std::ptr::copy_nonoverlapping(raw.as_ptr(), dst, elem_size) };
            }
        }
        Ok(())
    }

    /// `[[GetOwnProperty]]`
    ///
    /// Numeric keys describe elements (writable, enumerable, configurable);
    /// other keys read the ordinary property table.
    pub fn get_own_property(&self, key: &PropertyKey) -> Option<Property> {
        match canonical_numeric_index_string(key) {
            Some(numeric) => {
                let index = usize::try_from(numeric.as_index()?).ok()?;
                self.get_element(index).map(Property::data)
            }
            None => self.object.get_own_property(key),
        }
    }
}

impl fmt::Debug for JsTypedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsTypedArray")
            .field("kind", &self.kind)
            .field("byte_offset", &self.byte_offset)
            .field("length", &self.get_length_or_out_of_bounds())
            .field("length_tracking", &self.length_tracking)
            .field("on_heap", &self.is_on_heap())
            .finish()
    }
}
