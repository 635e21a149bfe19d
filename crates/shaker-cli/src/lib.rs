pub mod input;
pub mod output;
pub mod runner;

use anyhow::Context;
use std::path::Path;

pub fn read_json<P, T>(path: P) -> anyhow::Result<T>
where
    P: AsRef<Path>,
    T: for<'de> serde::Deserialize<'de>,
{
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read `{}`", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse `{}`", path.display()))
}
