//! Value types and register classes.

use std::fmt;

use strum::{EnumCount, EnumIter};

/// The type of the value an instruction produces.
///
/// Only the distinctions the allocator cares about are modelled: the register
/// class a value lives in, whether it needs two slots (or a register pair on
/// 32-bit targets), and whether the collector must see it at safepoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount)]
pub enum ValueType {
    /// No value.
    Void,
    /// A boolean, held in a core register.
    Boolean,
    /// A signed 8-bit integer.
    Byte,
    /// An unsigned 16-bit character.
    Char,
    /// A signed 16-bit integer.
    Short,
    /// A 32-bit integer.
    Int,
    /// A 64-bit integer.
    Long,
    /// A 32-bit float.
    Float,
    /// A 64-bit float.
    Double,
    /// A reference to a managed object, tracked by the collector.
    Reference,
}

impl ValueType {
    /// Returns `true` for float and double.
    #[must_use]
    pub fn is_floating_point(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    /// Returns `true` for the 64-bit types, which need two spill slots.
    #[must_use]
    pub fn is_wide(self) -> bool {
        matches!(self, Self::Long | Self::Double)
    }

    /// Returns `true` for references.
    #[must_use]
    pub fn is_reference(self) -> bool {
        self == Self::Reference
    }

    /// The register class values of this type are allocated in.
    #[must_use]
    pub fn register_class(self) -> RegisterClass {
        if self.is_floating_point() {
            RegisterClass::FloatingPoint
        } else {
            RegisterClass::Core
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Void => "void",
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Char => "char",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Reference => "reference",
        };
        f.write_str(name)
    }
}

/// The two register files the allocator runs a separate pass over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount)]
pub enum RegisterClass {
    /// General purpose registers.
    Core,
    /// Floating-point registers.
    FloatingPoint,
}

impl fmt::Display for RegisterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Core => f.write_str("core"),
            Self::FloatingPoint => f.write_str("floating-point"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_value_type_classes() {
        let fp: Vec<ValueType> = ValueType::iter().filter(|t| t.is_floating_point()).collect();
        assert_eq!(fp, vec![ValueType::Float, ValueType::Double]);

        let wide: Vec<ValueType> = ValueType::iter().filter(|t| t.is_wide()).collect();
        assert_eq!(wide, vec![ValueType::Long, ValueType::Double]);

        assert_eq!(ValueType::Reference.register_class(), RegisterClass::Core);
        assert_eq!(ValueType::Double.register_class(), RegisterClass::FloatingPoint);
        assert_eq!(ValueType::COUNT, 10);
    }

    #[test]
    fn test_register_class_display() {
        assert_eq!(RegisterClass::Core.to_string(), "core");
        assert_eq!(RegisterClass::FloatingPoint.to_string(), "floating-point");
    }
}
