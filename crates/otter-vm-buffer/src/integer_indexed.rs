//! Integer-indexed exotic `[[DefineOwnProperty]]`
//!
//! Canonical numeric keys never create ordinary properties on a typed array.
//! They either address an element that exists right now, or the definition
//! fails. Every element is a writable, enumerable, configurable data
//! property, so descriptors asking for anything else are rejected.

use crate::error::{ShouldThrow, VmError, VmResult};
use crate::number::{CanonicalNumericIndex, canonical_numeric_index_string};
use crate::object::{PropertyDescriptor, PropertyKey};
use crate::typed_array::JsTypedArray;

impl JsTypedArray {
    /// `[[DefineOwnProperty]]`
    pub fn define_own_property(
        &self,
        key: PropertyKey,
        desc: PropertyDescriptor,
        should_throw: ShouldThrow,
    ) -> VmResult<bool> {
        let Some(numeric_index) = canonical_numeric_index_string(&key) else {
            return self
                .object()
                .ordinary_define_own_property(key, desc, should_throw);
        };

        // IsValidIntegerIndex: -0 and non-integral numbers never are.
        let index = match numeric_index {
            CanonicalNumericIndex::Integer(index) => usize::try_from(index).ok(),
            CanonicalNumericIndex::MinusZero | CanonicalNumericIndex::NotAnIndex(_) => None,
        };
        let Some(index) = index.filter(|&index| self.is_valid_integer_index(index)) else {
            return should_throw.fail(VmError::InvalidTypedArrayIndex);
        };

        if desc.is_accessor_descriptor()
            || desc.configurable == Some(false)
            || desc.enumerable == Some(false)
            || desc.writable == Some(false)
        {
            return should_throw.fail(VmError::RedefineDisallowed(key.to_string()));
        }

        // Unset attributes default to true, which every element already has.
        if let Some(value) = &desc.value {
            self.set_element(index, value)?;
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::array_buffer::JsArrayBuffer;
    use crate::error::{ShouldThrow, VmError};
    use crate::isolate::{Isolate, IsolateConfig};
    use crate::object::{PropertyDescriptor, PropertyKey};
    use crate::typed_array::{JsTypedArray, TypedArrayKind};
    use crate::value::Value;

    fn uint8(length: usize) -> JsTypedArray {
        let isolate = Isolate::new(IsolateConfig::default());
        JsTypedArray::with_length(&isolate, TypedArrayKind::Uint8, length).unwrap()
    }

    #[test]
    fn test_value_descriptor_writes_element() {
        let view = uint8(4);
        let defined = view
            .define_own_property(
                PropertyKey::Index(2),
                PropertyDescriptor::value(Value::Number(42.0)),
                ShouldThrow::Throw,
            )
            .unwrap();
        assert!(defined);
        assert_eq!(view.get_element(2), Some(Value::Number(42.0)));
    }

    #[test]
    fn test_string_index_key() {
        let view = uint8(4);
        view.define_own_property(
            PropertyKey::from("3"),
            PropertyDescriptor::data(Value::Number(1.0)),
            ShouldThrow::Throw,
        )
        .unwrap();
        assert_eq!(view.get_element(3), Some(Value::Number(1.0)));
    }

    #[test]
    fn test_attribute_only_descriptor_is_noop() {
        let view = uint8(2);
        assert!(
            view.define_own_property(
                PropertyKey::Index(0),
                PropertyDescriptor::default().with_enumerable(true),
                ShouldThrow::Throw
            )
            .unwrap()
        );
        assert_eq!(view.get_element(0), Some(Value::Number(0.0)));
    }

    #[test]
    fn test_invalid_index_fails() {
        let view = uint8(2);
        for key in [
            PropertyKey::Index(2),
            PropertyKey::from("-0"),
            PropertyKey::from("-1"),
            PropertyKey::from("1.5"),
            PropertyKey::from("NaN"),
        ] {
            let err = view
                .define_own_property(
                    key.clone(),
                    PropertyDescriptor::value(Value::Number(1.0)),
                    ShouldThrow::Throw,
                )
                .unwrap_err();
            assert!(matches!(err, VmError::InvalidTypedArrayIndex), "{key}");
            assert!(
                !view
                    .define_own_property(
                        key,
                        PropertyDescriptor::value(Value::Number(1.0)),
                        ShouldThrow::DontThrow
                    )
                    .unwrap()
            );
        }
    }

    #[test]
    fn test_non_canonical_key_is_ordinary() {
        let view = uint8(2);
        for name in ["01", "1.0", "2E1", " 1", "foo"] {
            assert!(
                view.define_own_property(
                    PropertyKey::from(name),
                    PropertyDescriptor::data(Value::Number(5.0)),
                    ShouldThrow::Throw
                )
                .unwrap()
            );
            assert_eq!(
                view.object().get(&PropertyKey::from(name)),
                Some(Value::Number(5.0))
            );
        }
        assert_eq!(view.get_element(1), Some(Value::Number(0.0)));
    }

    #[test]
    fn test_coercion_error_propagates_in_sloppy_mode() {
        let view = uint8(2);
        let err = view
            .define_own_property(
                PropertyKey::Index(0),
                PropertyDescriptor::value(Value::BigInt(1)),
                ShouldThrow::DontThrow,
            )
            .unwrap_err();
        assert!(err.is_type_error());
    }

    #[test]
    fn test_detach_during_coercion_drops_write() {
        let isolate = Isolate::new(IsolateConfig::default());
        let buffer = JsArrayBuffer::allocate(&isolate, 4).unwrap();
        let view = JsTypedArray::new(buffer.clone(), TypedArrayKind::Uint8, 0, None).unwrap();
        let detaching = Arc::clone(&buffer);
        let value = Value::object(move || {
            detaching.detach(false);
            Ok(Value::Number(9.0))
        });
        assert!(
            view.define_own_property(
                PropertyKey::Index(0),
                PropertyDescriptor::value(value),
                ShouldThrow::Throw
            )
            .unwrap()
        );
        assert!(buffer.was_detached());
        assert_eq!(view.get_element(0), None);
    }
}
