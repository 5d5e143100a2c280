use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use sha2::{Digest as _, Sha256};

use crate::error::{Error, ErrorKind, Result};

const SHA256_HEX_LEN: usize = 64;

/// A content-addressable `sha256:<hex>` digest.
///
/// Only SHA-256 is accepted; the hex part is normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    hex: String,
}
impl Digest {
    pub const ALGORITHM: &'static str = "sha256";

    /// Hash `bytes`.
    pub fn of(bytes: impl AsRef<[u8]>) -> Self {
        Self { hex: hex::encode(Sha256::digest(bytes.as_ref())) }
    }

    /// The lowercase hex part, without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Recompute the digest of `bytes` and compare it against this one.
    pub fn verify(&self, bytes: impl AsRef<[u8]>) -> Result<()> {
        self.verify_digest(&Self::of(bytes))
    }

    /// Compare an already computed digest against this one.
    pub fn verify_digest(&self, actual: &Digest) -> Result<()> {
        if actual != self {
            exn::bail!(ErrorKind::DigestMismatch { expected: self.to_string(), actual: actual.to_string() });
        }
        Ok(())
    }
}
impl FromStr for Digest {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ErrorKind::InvalidDigest(s.to_string());
        let Some((algorithm, hex)) = s.trim().split_once(':') else {
            exn::bail!(invalid());
        };
        if !algorithm.eq_ignore_ascii_case(Self::ALGORITHM)
            || hex.len() != SHA256_HEX_LEN
            || !hex.bytes().all(|b| b.is_ascii_hexdigit())
        {
            exn::bail!(invalid());
        }
        Ok(Self { hex: hex.to_ascii_lowercase() })
    }
}
impl TryFrom<&str> for Digest {
    type Error = Error;
    fn try_from(value: &str) -> Result<Self> {
        value.parse()
    }
}
impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}:{}", Self::ALGORITHM, self.hex)
    }
}
