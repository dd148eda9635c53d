//! Service name validation and case folding.

use std::fmt;

use thiserror::Error;

/// Maximum number of bytes in a service name, excluding the terminator.
pub const MAX_NAME_LEN: usize = 255;

const FIRST_ACCEPTED: u8 = 32;
const LAST_ACCEPTED: u8 = 127;

/// Errors raised while validating a raw service name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NameError {
    /// A byte fell outside the accepted ASCII range.
    #[error("byte {byte:#04x} at offset {offset} is not a printable ASCII character")]
    InvalidCharacter {
        /// Offending byte value.
        byte: u8,
        /// Position of the byte within the name.
        offset: usize,
    },
}

/// Canonical, lowercase service name used as the registry key.
///
/// An empty name is valid: an announcement consisting of a bare `\r\n`
/// names the empty service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceName(String);

impl ServiceName {
    /// Validates raw announcement bytes and folds them to lowercase.
    ///
    /// Bytes below 32 or above 127 are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`NameError::InvalidCharacter`] for the first out-of-range byte.
    pub fn parse(raw: &[u8]) -> Result<Self, NameError> {
        let mut canonical = String::with_capacity(raw.len());
        for (offset, &byte) in raw.iter().enumerate() {
            if !(FIRST_ACCEPTED..=LAST_ACCEPTED).contains(&byte) {
                return Err(NameError::InvalidCharacter { byte, offset });
            }
            canonical.push(char::from(byte.to_ascii_lowercase()));
        }
        Ok(Self(canonical))
    }

    /// Returns the canonical name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the announcement line for this name, terminator included.
    #[must_use]
    pub fn announcement(&self) -> Vec<u8> {
        let mut line = Vec::with_capacity(self.0.len() + 2);
        line.extend_from_slice(self.0.as_bytes());
        line.extend_from_slice(b"\r\n");
        line
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl AsRef<str> for ServiceName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(b"echo".as_slice(), "echo")]
    #[case(b"EcHo".as_slice(), "echo")]
    #[case(b"Web Server-2".as_slice(), "web server-2")]
    #[case(b"".as_slice(), "")]
    #[case(b"~\x7f".as_slice(), "~\x7f")]
    fn folds_valid_names(#[case] raw: &[u8], #[case] expected: &str) {
        let name = ServiceName::parse(raw).expect("name should be valid");
        assert_eq!(name.as_str(), expected);
    }

    #[rstest]
    #[case(b"bad\tname".as_slice(), 0x09, 3)]
    #[case(b"\x1f".as_slice(), 0x1f, 0)]
    #[case(b"caf\xc3\xa9".as_slice(), 0xc3, 3)]
    #[case(b"nul\x00".as_slice(), 0x00, 3)]
    fn rejects_out_of_range_bytes(#[case] raw: &[u8], #[case] byte: u8, #[case] offset: usize) {
        let error = ServiceName::parse(raw).expect_err("name should be rejected");
        assert_eq!(error, NameError::InvalidCharacter { byte, offset });
    }

    #[test]
    fn mixed_case_spellings_share_a_canonical_name() {
        let lower = ServiceName::parse(b"metrics").expect("lowercase");
        let upper = ServiceName::parse(b"METRICS").expect("uppercase");
        assert_eq!(lower, upper);
    }

    #[test]
    fn announcement_appends_terminator() {
        let name = ServiceName::parse(b"Echo").expect("valid name");
        assert_eq!(name.announcement(), b"echo\r\n");
    }
}
