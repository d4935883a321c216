//! The `define_id!` macro and the parser it shares.

use crate::{IdError, Ulid};

/// Split `{prefix}_{ulid}` and check the prefix.
///
/// Only the first underscore separates; ULIDs never contain one.
#[doc(hidden)]
pub fn parse_prefixed(input: &str, prefix: &'static str) -> Result<Ulid, IdError> {
    if input.is_empty() {
        return Err(IdError::Empty);
    }
    let (kind, body) = input
        .split_once('_')
        .ok_or_else(|| IdError::Malformed(input.to_string()))?;
    if kind != prefix {
        return Err(IdError::WrongKind {
            expected: prefix,
            found: kind.to_string(),
        });
    }
    body.parse::<Ulid>().map_err(|e| IdError::BadUlid {
        input: input.to_string(),
        reason: e.to_string(),
    })
}

/// Define a ULID-backed id type rendered as `{prefix}_{ulid}`.
///
/// ```ignore
/// define_id!(CallId, "call");
///
/// let call_id = CallId::new();
/// let parsed: CallId = "call_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse()?;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($crate::Ulid);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// A fresh id; later ids sort after earlier ones.
            #[must_use]
            pub fn new() -> Self {
                Self($crate::Ulid::new())
            }

            #[must_use]
            pub const fn from_ulid(ulid: $crate::Ulid) -> Self {
                Self(ulid)
            }

            #[must_use]
            pub const fn ulid(&self) -> $crate::Ulid {
                self.0
            }

            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                $crate::parse_prefixed(s, Self::PREFIX).map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}_{}", Self::PREFIX, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct IdVisitor;

                impl serde::de::Visitor<'_> for IdVisitor {
                    type Value = $name;

                    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                        write!(f, "a {}_ prefixed id", $prefix)
                    }

                    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<$name, E> {
                        $name::parse(v).map_err(E::custom)
                    }
                }

                deserializer.deserialize_str(IdVisitor)
            }
        }
    };
}
