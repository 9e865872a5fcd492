//! Identifier types for ledgers, entries, and bookies.
//!
//! Numeric identifiers are generated by [`define_id!`] as `Copy` newtypes so a
//! ledger id can never be passed where an entry id is expected. [`BookieId`]
//! is a validated string identity, parsed once at the edge of the system.

use std::{fmt, net::SocketAddr, str::FromStr};

use serde::{Deserialize, Serialize};
use snafu::{Snafu, ensure};

/// Generates a newtype wrapper around `i64` for type-safe identifiers.
///
/// Each generated type provides:
/// - Standard derives: Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord
/// - Serde with `#[serde(transparent)]` for wire format compatibility
/// - `From<i64>` and `Into<i64>` conversions
/// - `Display` with a one-letter prefix (e.g., `L42`)
/// - `INVALID` sentinel (`-1`) and `is_valid()`
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident, $prefix:expr
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Sentinel for "no identifier".
            pub const INVALID: Self = Self(-1);

            /// Creates a new identifier from a raw value.
            #[inline]
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw numeric value.
            #[inline]
            pub const fn value(self) -> i64 {
                self.0
            }

            /// Returns true for non-negative identifiers.
            #[inline]
            pub const fn is_valid(self) -> bool {
                self.0 >= 0
            }
        }

        impl From<i64> for $name {
            #[inline]
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of a ledger.
    ///
    /// Allocated by the ledger manager, or supplied by the caller when a ledger
    /// is created in advertised mode. [`LedgerId::INVALID`] asks the system to
    /// allocate one.
    ///
    /// # Display
    ///
    /// Formats with `L` prefix: `L42`.
    LedgerId, "L"
);

define_id!(
    /// Identifier of an entry within a ledger.
    ///
    /// [`EntryId::INVALID`] doubles as the empty last-add-confirmed marker.
    ///
    /// # Display
    ///
    /// Formats with `E` prefix: `E7`.
    EntryId, "E"
);

impl EntryId {
    /// Returns the following entry id.
    #[inline]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Maximum length of a bookie identity in bytes.
pub const MAX_BOOKIE_ID_LEN: usize = 255;

/// Identity that bookies must never register under.
const RESERVED_BOOKIE_ID: &str = "readonly";

/// Error returned when a string is not a valid [`BookieId`].
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum BookieIdError {
    /// The identity is empty.
    #[snafu(display("bookie id must not be empty"))]
    Empty,

    /// The identity exceeds [`MAX_BOOKIE_ID_LEN`].
    #[snafu(display("bookie id is {len} bytes, limit is {MAX_BOOKIE_ID_LEN}"))]
    TooLong {
        /// Actual byte length.
        len: usize,
    },

    /// The identity contains a character outside `[A-Za-z0-9._:-]`.
    #[snafu(display("bookie id '{id}' contains invalid character '{ch}'"))]
    InvalidCharacter {
        /// Offending identity.
        id: String,
        /// First invalid character.
        ch: char,
    },

    /// The identity is reserved.
    #[snafu(display("bookie id '{id}' is reserved"))]
    Reserved {
        /// Offending identity.
        id: String,
    },
}

/// Identity of one storage node.
///
/// Usually a `host:port` pair, but any string made of `[A-Za-z0-9._:-]` is
/// accepted; resolution to a network address is the job of an address
/// resolver. Ordering is lexicographic, which is what fault reports sort by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BookieId(String);

impl BookieId {
    /// Parses and validates a bookie identity.
    ///
    /// # Errors
    ///
    /// Returns [`BookieIdError`] if the string is empty, too long, contains
    /// characters outside `[A-Za-z0-9._:-]`, or equals the reserved `readonly`.
    pub fn parse(id: &str) -> Result<Self, BookieIdError> {
        ensure!(!id.is_empty(), EmptySnafu);
        ensure!(id.len() <= MAX_BOOKIE_ID_LEN, TooLongSnafu { len: id.len() });
        if let Some(ch) = id.chars().find(|c| !is_bookie_id_char(*c)) {
            return InvalidCharacterSnafu { id, ch }.fail();
        }
        ensure!(!id.eq_ignore_ascii_case(RESERVED_BOOKIE_ID), ReservedSnafu { id });
        Ok(Self(id.to_owned()))
    }

    /// Builds the identity of a bookie listening on `addr`.
    #[must_use]
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        // The textual form of a socket address only contains valid characters
        // except for IPv6 brackets, which are dropped.
        Self(addr.to_string().chars().filter(|c| is_bookie_id_char(*c)).collect())
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_bookie_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-')
}

impl FromStr for BookieId {
    type Err = BookieIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BookieId {
    type Error = BookieIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BookieId> for String {
    fn from(id: BookieId) -> Self {
        id.0
    }
}

impl fmt::Display for BookieId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
