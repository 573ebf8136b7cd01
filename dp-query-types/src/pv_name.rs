use std::sync::Arc;

use derive_more::{Deref, Display};
use serde::{Deserialize, Serialize};

use crate::error::DpQueryError;

/// A non-empty process-variable name, unique within a response.
///
/// Backed by `Arc<str>` rather than `String`: a single PV name is cloned
/// into every row entry it contributes to during materialization (§4.6),
/// and those clones should be pointer copies, not allocations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deref, Display, Serialize, Deserialize)]
#[display("{_0}")]
#[serde(try_from = "String", into = "String")]
pub struct PvName(Arc<str>);

impl PvName {
    pub fn new(name: impl Into<String>) -> Result<Self, DpQueryError> {
        let name = name.into();
        if name.is_empty() {
            return Err(DpQueryError::InvalidRequest(
                "PV name must not be empty".to_string(),
            ));
        }
        Ok(Self(Arc::from(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PvName {
    type Error = DpQueryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PvName::new(value)
    }
}

impl From<PvName> for String {
    fn from(value: PvName) -> Self {
        value.0.to_string()
    }
}
