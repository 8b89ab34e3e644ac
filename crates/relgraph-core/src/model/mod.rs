//! Domain vocabulary shared by aggregates, repositories and projectors.

pub mod contact;
pub mod contract;
pub mod email;
pub mod flow;
pub mod opportunity;
pub mod organization;
pub mod satellite;
pub mod source;

use chrono::{DateTime, Utc};
use std::fmt;

/// Wall clock used for `createdAt`/`updatedAt` stamps.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Error returned when parsing a stored enum value fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.expected, self.got)
    }
}

impl std::error::Error for ParseEnumError {}

/// Declares an enum stored as a fixed upper-case string in the graph.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $expected:literal {
            $($variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(#[serde(rename = $wire)] $variant),+
        }

        impl $name {
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::model::ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($wire => Ok(Self::$variant),)+
                    _ => Err($crate::model::ParseEnumError {
                        expected: $expected,
                        got: s.to_string(),
                    }),
                }
            }
        }
    };
}
pub(crate) use wire_enum;
