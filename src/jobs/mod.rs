//! # Built-in Jobs
//!
//! Job kinds that ship with the crate and back the `echo` and `command` kinds of
//! bundle manifests.

pub mod command;
pub mod echo;

pub use command::CommandJob;
pub use echo::EchoJob;

use crate::loader::JobSpec;
use anyhow::bail;

pub(crate) fn setting_str(spec: &JobSpec, key: &str) -> anyhow::Result<Option<String>> {
    match spec.settings.get(key) {
        None => Ok(None),
        Some(serde_json::Value::String(value)) => Ok(Some(value.clone())),
        Some(other) => bail!("job '{}': setting '{key}' must be a string, got {other}", spec.name),
    }
}

pub(crate) fn setting_u64(spec: &JobSpec, key: &str) -> anyhow::Result<Option<u64>> {
    match spec.settings.get(key) {
        None => Ok(None),
        Some(value) => match value.as_u64() {
            Some(number) => Ok(Some(number)),
            None => bail!(
                "job '{}': setting '{key}' must be a non-negative integer, got {value}",
                spec.name
            ),
        },
    }
}
