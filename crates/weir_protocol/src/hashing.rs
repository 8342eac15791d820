//! One-way hashing of sensitive column values.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
    Blake3,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Blake3 => "blake3",
        }
    }

    /// Lowercase hex digest of `input`.
    pub fn digest(&self, input: &[u8]) -> String {
        match self {
            HashAlgorithm::Sha256 => format!("{:x}", Sha256::digest(input)),
            HashAlgorithm::Sha512 => format!("{:x}", Sha512::digest(input)),
            HashAlgorithm::Blake3 => blake3::hash(input).to_hex().to_string(),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            "blake3" => Ok(HashAlgorithm::Blake3),
            _ => Err(format!(
                "Invalid hash algorithm: '{}'. Expected: sha256, sha512, or blake3",
                s
            )),
        }
    }
}

/// Which columns get hashed, and how.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HashSpec {
    pub columns: Vec<String>,
    #[serde(default)]
    pub algorithm: HashAlgorithm,
}

impl HashSpec {
    pub fn new(columns: Vec<String>, algorithm: HashAlgorithm) -> Self {
        Self { columns, algorithm }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn applies_to(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn digest(&self, value: &str) -> String {
        self.algorithm.digest(value.as_bytes())
    }
}
