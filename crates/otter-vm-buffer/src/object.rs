//! Ordinary object properties
//!
//! Typed arrays answer index keys themselves; every other key lands in an
//! ordinary property table with the usual `[[DefineOwnProperty]]` rules.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ShouldThrow, VmError, VmResult};
use crate::value::Value;

/// Property key
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// Array index (0 ..= 2^32 - 2)
    Index(u32),
    /// String property key
    String(Arc<str>),
    /// Symbol property key
    Symbol(u64),
}

impl PropertyKey {
    /// Create a string key; array-index strings become [`PropertyKey::Index`]
    pub fn string(s: &str) -> Self {
        match parse_array_index(s) {
            Some(index) => Self::Index(index),
            None => Self::String(Arc::from(s)),
        }
    }

    /// Create an index property key
    pub fn index(i: u32) -> Self {
        Self::Index(i)
    }
}

/// `s` is ToString(ToUint32(s)) and not 2^32 - 1
fn parse_array_index(s: &str) -> Option<u32> {
    if s.is_empty() || (s.len() > 1 && s.starts_with('0')) {
        return None;
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<u32>().ok().filter(|&index| index != u32::MAX)
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<u32> for PropertyKey {
    fn from(i: u32) -> Self {
        Self::Index(i)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::String(s) => f.write_str(s),
            Self::Symbol(id) => write!(f, "Symbol({id})"),
        }
    }
}

/// Property attributes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PropertyAttributes {
    /// Property is writable (data properties only)
    pub writable: bool,
    /// Property is enumerable
    pub enumerable: bool,
    /// Property is configurable
    pub configurable: bool,
}

impl PropertyAttributes {
    /// Writable, enumerable, configurable
    pub const fn data() -> Self {
        Self {
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Non-writable, non-enumerable, non-configurable
    pub const fn frozen() -> Self {
        Self {
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }
}

/// A stored property
#[derive(Clone, Debug, PartialEq)]
pub enum Property {
    /// Data property
    Data {
        /// The value
        value: Value,
        /// Attributes
        attributes: PropertyAttributes,
    },
    /// Accessor property
    Accessor {
        /// Getter function (`undefined` when absent)
        get: Value,
        /// Setter function (`undefined` when absent)
        set: Value,
        /// Attributes; `writable` is unused
        attributes: PropertyAttributes,
    },
}

impl Property {
    /// Create a data property with default attributes
    pub fn data(value: Value) -> Self {
        Self::Data {
            value,
            attributes: PropertyAttributes::data(),
        }
    }

    /// Attributes of either shape
    pub fn attributes(&self) -> PropertyAttributes {
        match self {
            Self::Data { attributes, .. } | Self::Accessor { attributes, .. } => *attributes,
        }
    }

    /// Get the value (for data properties)
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }

    /// Whether this is an accessor property
    pub fn is_accessor(&self) -> bool {
        matches!(self, Self::Accessor { .. })
    }

    /// The complete descriptor describing this property
    pub fn to_descriptor(&self) -> PropertyDescriptor {
        match self {
            Self::Data { value, attributes } => PropertyDescriptor {
                value: Some(value.clone()),
                writable: Some(attributes.writable),
                enumerable: Some(attributes.enumerable),
                configurable: Some(attributes.configurable),
                ..PropertyDescriptor::default()
            },
            Self::Accessor {
                get,
                set,
                attributes,
            } => PropertyDescriptor {
                get: Some(get.clone()),
                set: Some(set.clone()),
                enumerable: Some(attributes.enumerable),
                configurable: Some(attributes.configurable),
                ..PropertyDescriptor::default()
            },
        }
    }
}

/// A property descriptor as passed to `[[DefineOwnProperty]]`
///
/// Every field is optional; an absent field leaves the existing value alone
/// (or takes its default when the property is created).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropertyDescriptor {
    /// `[[Value]]`
    pub value: Option<Value>,
    /// `[[Get]]`
    pub get: Option<Value>,
    /// `[[Set]]`
    pub set: Option<Value>,
    /// `[[Writable]]`
    pub writable: Option<bool>,
    /// `[[Enumerable]]`
    pub enumerable: Option<bool>,
    /// `[[Configurable]]`
    pub configurable: Option<bool>,
}

impl PropertyDescriptor {
    /// `{ value }`
    pub fn value(value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    /// `{ value, writable, enumerable, configurable }` all true
    pub fn data(value: Value) -> Self {
        Self {
            value: Some(value),
            writable: Some(true),
            enumerable: Some(true),
            configurable: Some(true),
            ..Self::default()
        }
    }

    /// `{ get, set }`
    pub fn accessor(get: Option<Value>, set: Option<Value>) -> Self {
        Self {
            get,
            set,
            ..Self::default()
        }
    }

    /// Set `[[Writable]]`
    pub fn with_writable(mut self, writable: bool) -> Self {
        self.writable = Some(writable);
        self
    }

    /// Set `[[Enumerable]]`
    pub fn with_enumerable(mut self, enumerable: bool) -> Self {
        self.enumerable = Some(enumerable);
        self
    }

    /// Set `[[Configurable]]`
    pub fn with_configurable(mut self, configurable: bool) -> Self {
        self.configurable = Some(configurable);
        self
    }

    /// IsAccessorDescriptor
    pub fn is_accessor_descriptor(&self) -> bool {
        self.get.is_some() || self.set.is_some()
    }

    /// IsDataDescriptor
    pub fn is_data_descriptor(&self) -> bool {
        self.value.is_some() || self.writable.is_some()
    }

    /// IsGenericDescriptor
    pub fn is_generic_descriptor(&self) -> bool {
        !self.is_accessor_descriptor() && !self.is_data_descriptor()
    }

    fn is_empty(&self) -> bool {
        self.is_generic_descriptor() && self.enumerable.is_none() && self.configurable.is_none()
    }

    /// Build the property created when no property exists yet
    fn to_new_property(&self) -> Property {
        let attributes = PropertyAttributes {
            writable: self.writable.unwrap_or(false),
            enumerable: self.enumerable.unwrap_or(false),
            configurable: self.configurable.unwrap_or(false),
        };
        if self.is_accessor_descriptor() {
            Property::Accessor {
                get: self.get.clone().unwrap_or_default(),
                set: self.set.clone().unwrap_or_default(),
                attributes: PropertyAttributes {
                    writable: false,
                    ..attributes
                },
            }
        } else {
            Property::Data {
                value: self.value.clone().unwrap_or_default(),
                attributes,
            }
        }
    }
}

/// An ordinary object's own property table
pub struct JsObject {
    properties: RwLock<FxHashMap<PropertyKey, Property>>,
    extensible: RwLock<bool>,
}

impl JsObject {
    /// Create a new empty, extensible object
    pub fn new() -> Self {
        Self {
            properties: RwLock::new(FxHashMap::default()),
            extensible: RwLock::new(true),
        }
    }

    /// `[[GetOwnProperty]]`
    pub fn get_own_property(&self, key: &PropertyKey) -> Option<Property> {
        self.properties.read().get(key).cloned()
    }

    /// Own data value, if any
    pub fn get(&self, key: &PropertyKey) -> Option<Value> {
        self.properties.read().get(key).and_then(|p| p.value().cloned())
    }

    /// Own property keys
    pub fn own_keys(&self) -> Vec<PropertyKey> {
        self.properties.read().keys().cloned().collect()
    }

    /// Whether new properties may be added
    pub fn is_extensible(&self) -> bool {
        *self.extensible.read()
    }

    /// `[[PreventExtensions]]`
    pub fn prevent_extensions(&self) {
        *self.extensible.write() = false;
    }

    /// OrdinaryDefineOwnProperty
    pub fn ordinary_define_own_property(
        &self,
        key: PropertyKey,
        desc: PropertyDescriptor,
        should_throw: ShouldThrow,
    ) -> VmResult<bool> {
        let mut properties = self.properties.write();
        let current = properties.get(&key).cloned();

        let Some(current) = current else {
            if !*self.extensible.read() {
                return should_throw.fail(VmError::type_error(format!(
                    "Cannot define property {key}, object is not extensible"
                )));
            }
            properties.insert(key, desc.to_new_property());
            return Ok(true);
        };

        if desc.is_empty() {
            return Ok(true);
        }

        if !is_compatible(&current, &desc) {
            return should_throw.fail(VmError::RedefineDisallowed(key.to_string()));
        }

        properties.insert(key, apply_descriptor(current, &desc));
        Ok(true)
    }
}

impl Default for JsObject {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `desc` may be applied to a non-extensibility-constrained `current`
fn is_compatible(current: &Property, desc: &PropertyDescriptor) -> bool {
    let attributes = current.attributes();
    if attributes.configurable {
        return true;
    }
    if desc.configurable == Some(true) {
        return false;
    }
    if desc
        .enumerable
        .is_some_and(|enumerable| enumerable != attributes.enumerable)
    {
        return false;
    }
    if !desc.is_generic_descriptor() && desc.is_accessor_descriptor() != current.is_accessor() {
        return false;
    }
    match current {
        Property::Accessor { get, set, .. } => {
            desc.get.as_ref().is_none_or(|g| g.same_value(get))
                && desc.set.as_ref().is_none_or(|s| s.same_value(set))
        }
        Property::Data { value, attributes } => {
            if attributes.writable {
                return true;
            }
            desc.writable != Some(true) && desc.value.as_ref().is_none_or(|v| v.same_value(value))
        }
    }
}

/// Merge `desc` into `current`, converting between data and accessor shapes
fn apply_descriptor(current: Property, desc: &PropertyDescriptor) -> Property {
    let attributes = current.attributes();
    let enumerable = desc.enumerable.unwrap_or(attributes.enumerable);
    let configurable = desc.configurable.unwrap_or(attributes.configurable);

    match current {
        Property::Data { .. } if desc.is_accessor_descriptor() => Property::Accessor {
            get: desc.get.clone().unwrap_or_default(),
            set: desc.set.clone().unwrap_or_default(),
            attributes: PropertyAttributes {
                writable: false,
                enumerable,
                configurable,
            },
        },
        Property::Accessor { .. } if desc.is_data_descriptor() => Property::Data {
            value: desc.value.clone().unwrap_or_default(),
            attributes: PropertyAttributes {
                writable: desc.writable.unwrap_or(false),
                enumerable,
                configurable,
            },
        },
        Property::Data { value, attributes } => Property::Data {
            value: desc.value.clone().unwrap_or(value),
            attributes: PropertyAttributes {
                writable: desc.writable.unwrap_or(attributes.writable),
                enumerable,
                configurable,
            },
        },
        Property::Accessor { get, set, .. } => Property::Accessor {
            get: desc.get.clone().unwrap_or(get),
            set: desc.set.clone().unwrap_or(set),
            attributes: PropertyAttributes {
                writable: false,
                enumerable,
                configurable,
            },
        },
    }
}
