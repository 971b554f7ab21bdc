use super::*;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("Endpoint id '{0}' has no scheme separator")]
    MissingSeparator(String),

    #[error("Endpoint id has an empty scheme")]
    EmptyScheme,

    #[error("Endpoint id contains an embedded NUL byte")]
    EmbeddedNul,
}

/// A DTN endpoint identifier: a `scheme:ssp` pair.
///
/// Only the split the dictionary needs is modelled here; scheme-specific
/// syntax is a routing concern and stays outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Eid {
    scheme: String,
    ssp: String,
}

impl Eid {
    pub fn new(scheme: &str, ssp: &str) -> Result<Self, Error> {
        if scheme.is_empty() {
            return Err(Error::EmptyScheme);
        }
        // The wire dictionary is NUL-delimited
        if scheme.contains('\0') || ssp.contains('\0') {
            return Err(Error::EmbeddedNul);
        }
        Ok(Self {
            scheme: scheme.to_string(),
            ssp: ssp.to_string(),
        })
    }

    /// The null endpoint id, `dtn:none`.
    pub fn null() -> Self {
        Self {
            scheme: "dtn".to_string(),
            ssp: "none".to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.scheme == "dtn" && self.ssp == "none"
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn ssp(&self) -> &str {
        &self.ssp
    }
}

impl Default for Eid {
    fn default() -> Self {
        Self::null()
    }
}

impl core::fmt::Display for Eid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.scheme, self.ssp)
    }
}

impl core::str::FromStr for Eid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((scheme, ssp)) = s.split_once(':') else {
            return Err(Error::MissingSeparator(s.to_string()));
        };
        Self::new(scheme, ssp)
    }
}
