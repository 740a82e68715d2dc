//! Compiled-in entry points
//!
//! A logic manifest names one of these with `entry: <name>`; the entry point
//! returns the package's capability table.

mod local_files;
mod self_learning;

pub use local_files::local_files;
pub use self_learning::{is_valid_skill_name, self_learning};

use super::{CapabilityError, CapabilityTable, LoadContext};
use crate::directive::Arguments;
use serde::de::DeserializeOwned;

pub type EntryPoint = fn(&LoadContext) -> CapabilityTable;

const CATALOGUE: &[(&str, EntryPoint)] = &[
    ("local_files", local_files),
    ("self_learning", self_learning),
];

pub fn lookup(name: &str) -> Option<EntryPoint> {
    CATALOGUE
        .iter()
        .find(|(entry, _)| *entry == name)
        .map(|(_, build)| *build)
}

pub fn names() -> Vec<&'static str> {
    CATALOGUE.iter().map(|(name, _)| *name).collect()
}

/// Decode validated arguments into a capability's typed argument struct
pub(crate) fn decode_args<T: DeserializeOwned>(action: &str, args: Arguments) -> Result<T, CapabilityError> {
    serde_json::from_value(serde_json::Value::Object(args)).map_err(|e| {
        CapabilityError::InvalidArguments {
            action: action.to_string(),
            reason: e.to_string(),
        }
    })
}
