//! Argument values after validation.
//!
//! The validator turns the raw JSON object of a request into
//! [`NormalizedArgs`]: values are coerced to their declared types, defaults
//! are filled in and sandboxed paths are resolved to absolute paths.
//! Backends only ever see this form.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ExecError;
use crate::tools::names::ToolName;

/// A single validated argument value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ArgValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Path(PathBuf),
}

impl ArgValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path(p) => Some(p),
            _ => None,
        }
    }

    /// Paths render as strings. The validator rejects paths that are not
    /// UTF-8, so only hand-built values can reach the `null` case.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Str(s) => serde_json::Value::from(s.as_str()),
            Self::Int(n) => serde_json::Value::from(*n),
            Self::Bool(b) => serde_json::Value::from(*b),
            Self::Path(p) => p.to_str().map_or(serde_json::Value::Null, serde_json::Value::from),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<i64> for ArgValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for ArgValue {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<bool> for ArgValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Validated arguments for one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedArgs {
    tool: ToolName,
    values: BTreeMap<String, ArgValue>,
}

impl NormalizedArgs {
    pub(crate) fn new(tool: ToolName, values: BTreeMap<String, ArgValue>) -> Self {
        Self { tool, values }
    }

    pub fn tool(&self) -> ToolName {
        self.tool
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ArgValue::as_str)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ArgValue::as_int)
    }

    pub fn path(&self, name: &str) -> Option<&Path> {
        self.get(name).and_then(ArgValue::as_path)
    }

    /// The arguments as a JSON object, paths rendered as strings.
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }

    /// Deserialize into a typed argument struct.
    ///
    /// The validator has already enforced types and required parameters, so
    /// a failure here means the typed struct and the descriptor disagree.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ExecError> {
        serde_json::from_value(self.to_json()).map_err(|e| {
            ExecError::Backend(format!("internal argument mismatch for {}: {e}", self.tool))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Sample {
        host: String,
        count: u32,
        verbose: bool,
        file: PathBuf,
    }

    fn sample() -> NormalizedArgs {
        let mut values = BTreeMap::new();
        values.insert("host".to_string(), ArgValue::from("example.org"));
        values.insert("count".to_string(), ArgValue::from(3));
        values.insert("verbose".to_string(), ArgValue::from(true));
        values.insert("file".to_string(), ArgValue::Path(PathBuf::from("/srv/a.txt")));
        NormalizedArgs::new(ToolName::PingHost, values)
    }

    #[test]
    fn accessors_return_typed_values() {
        let args = sample();
        assert_eq!(args.str("host"), Some("example.org"));
        assert_eq!(args.int("count"), Some(3));
        assert_eq!(args.path("file"), Some(Path::new("/srv/a.txt")));
        assert_eq!(args.str("count"), None);
    }

    #[test]
    fn parse_into_typed_struct() {
        let parsed: Sample = sample().parse().unwrap();
        assert_eq!(parsed.host, "example.org");
        assert_eq!(parsed.count, 3);
        assert!(parsed.verbose);
        assert_eq!(parsed.file, PathBuf::from("/srv/a.txt"));
    }

    #[test]
    fn to_json_renders_paths_as_strings() {
        let json = sample().to_json();
        assert_eq!(json["file"], "/srv/a.txt");
        assert_eq!(json["count"], 3);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_paths_never_render_lossily() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let odd = ArgValue::Path(PathBuf::from(OsStr::from_bytes(b"/srv/caf\xe9")));
        assert_eq!(odd.to_json(), serde_json::Value::Null);
    }
}
