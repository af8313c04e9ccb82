//! Macros for defining typed string keys.

/// Macro to define a typed, string-backed key.
///
/// This generates a newtype wrapper around `String` with:
/// - `new()` that rejects empty values and embedded whitespace
/// - `as_str()` and `into_inner()`
/// - `Display`, `FromStr`, `AsRef<str>` and `Borrow<str>` implementations
/// - `Serialize` and validating `Deserialize` implementations
/// - `Ord` and `Hash`, so keys can index ordered tables
///
/// # Example
///
/// ```ignore
/// define_key!(NodeName, "node name");
///
/// let name = NodeName::new("gpu-017")?;
/// let parsed: NodeName = "gpu-017".parse()?;
/// ```
#[macro_export]
macro_rules! define_key {
    ($name:ident, $what:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Human-readable name of this key type, used in errors.
            pub const WHAT: &'static str = $what;

            /// Creates a key, validating that it is non-empty and has no whitespace.
            pub fn new(value: impl Into<String>) -> Result<Self, $crate::KeyError> {
                let value = value.into();
                if value.is_empty() {
                    return Err($crate::KeyError::Empty { what: Self::WHAT });
                }
                if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
                    return Err($crate::KeyError::InvalidCharacters {
                        what: Self::WHAT,
                        value,
                    });
                }
                Ok(Self(value))
            }

            /// Returns the key as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the key, returning the owned string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::KeyError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::new(s).map_err(serde::de::Error::custom)
            }
        }
    };
}
