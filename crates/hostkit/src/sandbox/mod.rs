//! Argument validation and sandboxing.
//!
//! [`Validator::check`] is the only way raw request arguments become
//! [`NormalizedArgs`]. It runs in two passes over the tool's descriptor:
//!
//! 1. **Coerce**: every declared parameter is converted to its wire type,
//!    defaults are applied and missing required parameters are reported.
//! 2. **Constrain**: each value is checked against its [`Constraint`]:
//!    paths are resolved and contained, numbers range-checked, hosts and
//!    port lists parsed, commands screened against the denylist.
//!
//! The validator holds no mutable state. Its only filesystem access is
//! path resolution and, once containment is proven, the size check on
//! paths that will be read back.
//!
//! - [`path`]: symlink-aware containment in the sandbox roots.
//! - [`denylist`]: dangerous-command and scanner-option screening.
//! - [`net`]: host, network, port list and user name syntax.

pub mod denylist;
pub mod net;
pub mod path;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::SandboxPolicy;
use crate::error::Rejection;
use crate::tools::args::{ArgValue, NormalizedArgs};
use crate::tools::names::{BackendKind, ToolName};
use crate::tools::registry::Registry;
use crate::tools::spec::{Constraint, ParamSpec, ParamType, PathAccess, ToolDescriptor};

use denylist::Denylist;
use path::PathDenied;

/// Result of validating one request. Never partially accepted.
pub type ValidationOutcome = Result<NormalizedArgs, Rejection>;

/// Longest remote command accepted by `ssh_execute`.
pub const MAX_COMMAND_LEN: usize = 500;

/// Longest remote path accepted for scp/ftp.
pub const MAX_REMOTE_PATH_LEN: usize = 1024;

/// Checks requests against the registry and the sandbox policy.
#[derive(Debug, Clone)]
pub struct Validator {
    registry: Arc<Registry>,
    policy: Arc<SandboxPolicy>,
    shell_denylist: Denylist,
    transfer_denylist: Denylist,
}

impl Validator {
    pub fn new(registry: Arc<Registry>, policy: Arc<SandboxPolicy>) -> Self {
        let shell_denylist = Denylist::new(&policy.shell.denylist);
        let transfer_denylist = Denylist::new(&policy.transfer.denylist);
        Self {
            registry,
            policy,
            shell_denylist,
            transfer_denylist,
        }
    }

    pub fn check(&self, tool: &str, raw: &Map<String, Value>) -> ValidationOutcome {
        let name: ToolName = tool.parse()?;
        let descriptor = self
            .registry
            .get(name)
            .ok_or_else(|| Rejection::UnknownTool(tool.to_string()))?;

        if let Some(unexpected) = raw.keys().find(|k| descriptor.param(k).is_none()) {
            return Err(Rejection::type_mismatch(unexpected, "unexpected parameter"));
        }

        let mut values = coerce_all(descriptor, raw)?;
        for param in &descriptor.params {
            self.constrain(descriptor, param, &mut values)?;
        }
        check_line_window(&values)?;

        Ok(NormalizedArgs::new(name, values))
    }

    fn denylist_for(&self, kind: BackendKind) -> &Denylist {
        match kind {
            BackendKind::Transfer => &self.transfer_denylist,
            _ => &self.shell_denylist,
        }
    }

    fn constrain(
        &self,
        descriptor: &ToolDescriptor,
        param: &ParamSpec,
        values: &mut BTreeMap<String, ArgValue>,
    ) -> Result<(), Rejection> {
        let name = param.name;
        let Some(value) = values.get(name).cloned() else {
            return Ok(());
        };

        match (&param.constraint, &value) {
            (Constraint::None, _) => Ok(()),
            (Constraint::Range { min, max }, ArgValue::Int(n)) => check_range(name, *n, *min, *max),
            (Constraint::Timeout, ArgValue::Int(n)) => {
                let ceiling = self.policy.timeout_secs(descriptor.backend);
                let ceiling = i64::try_from(ceiling).unwrap_or(i64::MAX);
                check_range(name, *n, 1, ceiling)
            }
            (Constraint::OneOf(allowed), ArgValue::Str(s)) => {
                if allowed.contains(&s.as_str()) {
                    Ok(())
                } else {
                    Err(Rejection::out_of_range(
                        name,
                        format!("'{s}' is not one of: {}", allowed.join(", ")),
                    ))
                }
            }
            (Constraint::Path(access), ArgValue::Str(raw)) => {
                let resolved = self.resolve_path(name, raw, *access)?;
                values.insert(name.to_string(), resolved);
                Ok(())
            }
            (
                Constraint::PathWhen {
                    param: switch,
                    equals,
                    access,
                },
                ArgValue::Str(raw),
            ) => {
                let local = values.get(*switch).and_then(ArgValue::as_str) == Some(*equals);
                if local {
                    let resolved = self.resolve_path(name, raw, *access)?;
                    values.insert(name.to_string(), resolved);
                    Ok(())
                } else {
                    self.check_remote_path(descriptor, name, raw)
                }
            }
            (Constraint::RemotePath, ArgValue::Str(raw)) => {
                self.check_remote_path(descriptor, name, raw)
            }
            (Constraint::Host, ArgValue::Str(s)) => net::check_host(name, s),
            (Constraint::Target, ArgValue::Str(s)) => net::check_target(name, s),
            (Constraint::Network, ArgValue::Str(s)) => net::check_network(name, s),
            (Constraint::PortList, ArgValue::Str(s)) => net::parse_port_list(name, s).map(|_| ()),
            (Constraint::Username, ArgValue::Str(s)) => net::check_username(name, s),
            (Constraint::Command, ArgValue::Str(cmd)) => {
                if cmd.trim().is_empty() {
                    return Err(Rejection::out_of_range(name, "command must not be empty"));
                }
                if cmd.len() > MAX_COMMAND_LEN {
                    return Err(Rejection::out_of_range(
                        name,
                        format!("command is {} characters, limit is {MAX_COMMAND_LEN}", cmd.len()),
                    ));
                }
                match denylist::check_command(self.denylist_for(descriptor.backend), cmd) {
                    Some(detail) => Err(Rejection::dangerous(name, detail)),
                    None => Ok(()),
                }
            }
            (Constraint::ScanOptions, ArgValue::Str(opts)) => {
                match denylist::check_scan_options(&self.policy.scan.denylist, opts) {
                    Some(detail) => Err(Rejection::dangerous(name, detail)),
                    None => Ok(()),
                }
            }
            (Constraint::MaxLen(max), ArgValue::Str(s)) => {
                if s.chars().count() > *max {
                    Err(Rejection::out_of_range(
                        name,
                        format!("longer than {max} characters"),
                    ))
                } else {
                    Ok(())
                }
            }
            // Coercion guarantees the value matches the declared type; a
            // constraint on a mismatched type is a descriptor bug.
            (constraint, value) => Err(Rejection::type_mismatch(
                name,
                format!("constraint {constraint:?} cannot apply to {value:?}"),
            )),
        }
    }

    fn resolve_path(&self, param: &str, raw: &str, access: PathAccess) -> Result<ArgValue, Rejection> {
        let resolved = path::resolve_within(raw, self.policy.roots()).map_err(|denied| match denied {
            PathDenied::Empty => Rejection::out_of_range(param, "path must not be empty"),
            PathDenied::NoRoots => Rejection::PathEscape {
                param: param.to_string(),
                path: raw.into(),
            },
            PathDenied::SymlinkLoop => {
                Rejection::out_of_range(param, "too many levels of symbolic links")
            }
            PathDenied::Escape(path) => Rejection::PathEscape {
                param: param.to_string(),
                path,
            },
        })?;

        // Arguments travel as JSON strings, so a symlink that resolves to a
        // non-UTF-8 name cannot be reported back faithfully.
        if resolved.to_str().is_none() {
            return Err(Rejection::type_mismatch(
                param,
                format!("resolved path {} is not valid UTF-8", resolved.display()),
            ));
        }

        if access == PathAccess::Read
            && let Ok(meta) = std::fs::metadata(&resolved)
            && meta.is_file()
            && meta.len() > self.policy.file.max_read_bytes
        {
            return Err(Rejection::out_of_range(
                param,
                format!(
                    "file is {} bytes, read limit is {}",
                    meta.len(),
                    self.policy.file.max_read_bytes
                ),
            ));
        }
        Ok(ArgValue::Path(resolved))
    }

    fn check_remote_path(
        &self,
        descriptor: &ToolDescriptor,
        param: &str,
        raw: &str,
    ) -> Result<(), Rejection> {
        if raw.is_empty() {
            return Err(Rejection::out_of_range(param, "remote path must not be empty"));
        }
        if raw.len() > MAX_REMOTE_PATH_LEN {
            return Err(Rejection::out_of_range(
                param,
                format!("remote path longer than {MAX_REMOTE_PATH_LEN} characters"),
            ));
        }
        match denylist::check_remote_path(self.denylist_for(descriptor.backend), raw) {
            Some(detail) => Err(Rejection::dangerous(param, detail)),
            None => Ok(()),
        }
    }
}

// ── Coercion ───────────────────────────────────────────────────────

fn coerce_all(
    descriptor: &ToolDescriptor,
    raw: &Map<String, Value>,
) -> Result<BTreeMap<String, ArgValue>, Rejection> {
    let mut values = BTreeMap::new();
    for param in &descriptor.params {
        let supplied = raw.get(param.name).filter(|v| !v.is_null());
        let value = match (supplied, &param.default) {
            (Some(v), _) => coerce(param, v)?,
            (None, Some(default)) => default.clone(),
            (None, None) if param.required => {
                return Err(Rejection::MissingRequired(param.name.to_string()));
            }
            (None, None) => continue,
        };
        values.insert(param.name.to_string(), value);
    }
    Ok(values)
}

fn coerce(param: &ParamSpec, value: &Value) -> Result<ArgValue, Rejection> {
    let mismatch = |expected: &str| {
        Rejection::type_mismatch(param.name, format!("expected {expected}, got {value}"))
    };
    match param.ty {
        ParamType::String => match value {
            Value::String(s) => Ok(ArgValue::Str(s.clone())),
            Value::Number(n) => Ok(ArgValue::Str(n.to_string())),
            Value::Bool(b) => Ok(ArgValue::Str(b.to_string())),
            _ => Err(mismatch("a string")),
        },
        ParamType::Integer => match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(ArgValue::Int(i))
                } else if let Some(f) = n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15) {
                    Ok(ArgValue::Int(f as i64))
                } else {
                    Err(mismatch("an integer"))
                }
            }
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(ArgValue::Int)
                .map_err(|_| mismatch("an integer")),
            _ => Err(mismatch("an integer")),
        },
        ParamType::Boolean => match value {
            Value::Bool(b) => Ok(ArgValue::Bool(*b)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(ArgValue::Bool(true)),
                "false" | "no" | "0" => Ok(ArgValue::Bool(false)),
                _ => Err(mismatch("a boolean")),
            },
            Value::Number(n) => match n.as_i64() {
                Some(1) => Ok(ArgValue::Bool(true)),
                Some(0) => Ok(ArgValue::Bool(false)),
                _ => Err(mismatch("a boolean")),
            },
            _ => Err(mismatch("a boolean")),
        },
    }
}

fn check_range(param: &str, n: i64, min: i64, max: i64) -> Result<(), Rejection> {
    if (min..=max).contains(&n) {
        Ok(())
    } else if max == i64::MAX {
        Err(Rejection::out_of_range(param, format!("must be at least {min}, got {n}")))
    } else {
        Err(Rejection::out_of_range(
            param,
            format!("must be between {min} and {max}, got {n}"),
        ))
    }
}

/// `end_line` may not precede `start_line`.
fn check_line_window(values: &BTreeMap<String, ArgValue>) -> Result<(), Rejection> {
    let start = values.get("start_line").and_then(ArgValue::as_int);
    let end = values.get("end_line").and_then(ArgValue::as_int);
    match (start, end) {
        (Some(start), Some(end)) if end < start => Err(Rejection::out_of_range(
            "end_line",
            format!("end_line {end} is before start_line {start}"),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use std::path::Path;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: std::path::PathBuf,
        validator: Validator,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let policy = SandboxPolicy::for_root(dir.path()).unwrap();
        let root = policy.roots()[0].clone();
        let validator = Validator::new(Arc::new(Registry::standard()), Arc::new(policy));
        Fixture {
            _dir: dir,
            root,
            validator,
        }
    }

    fn check(f: &Fixture, tool: &str, args: Value) -> ValidationOutcome {
        let map = args.as_object().cloned().unwrap_or_default();
        f.validator.check(tool, &map)
    }

    fn kind(outcome: ValidationOutcome) -> ErrorKind {
        outcome.unwrap_err().kind()
    }

    #[test]
    fn unknown_tool() {
        let f = fixture();
        assert_eq!(kind(check(&f, "format_disk", json!({}))), ErrorKind::UnknownTool);
    }

    #[test]
    fn unexpected_parameter_is_a_type_mismatch() {
        let f = fixture();
        let outcome = check(&f, "ping_host", json!({"host": "127.0.0.1", "flood": true}));
        assert_eq!(kind(outcome), ErrorKind::TypeMismatch);
    }

    #[test]
    fn missing_required() {
        let f = fixture();
        assert_eq!(kind(check(&f, "ping_host", json!({}))), ErrorKind::MissingRequired);
        assert_eq!(
            kind(check(&f, "ping_host", json!({"host": null}))),
            ErrorKind::MissingRequired
        );
    }

    #[test]
    fn defaults_are_applied() {
        let f = fixture();
        let args = check(&f, "ping_host", json!({"host": "127.0.0.1"})).unwrap();
        assert_eq!(args.int("count"), Some(4));
        assert_eq!(args.int("timeout"), Some(5));
    }

    #[test]
    fn strings_coerce_to_integers_and_booleans() {
        let f = fixture();
        let args = check(&f, "ping_host", json!({"host": "127.0.0.1", "count": "2"})).unwrap();
        assert_eq!(args.int("count"), Some(2));

        let args = check(
            &f,
            "list_directory",
            json!({"directory_path": ".", "show_hidden": "true", "max_items": 5.0}),
        )
        .unwrap();
        assert_eq!(args.get("show_hidden"), Some(&ArgValue::Bool(true)));
        assert_eq!(args.int("max_items"), Some(5));
    }

    #[test]
    fn uncoercible_values_are_type_mismatches() {
        let f = fixture();
        let outcome = check(&f, "ping_host", json!({"host": "127.0.0.1", "count": "many"}));
        assert_eq!(kind(outcome), ErrorKind::TypeMismatch);
        let outcome = check(&f, "ping_host", json!({"host": ["a"]}));
        assert_eq!(kind(outcome), ErrorKind::TypeMismatch);
        let outcome = check(&f, "ping_host", json!({"host": "127.0.0.1", "count": 2.5}));
        assert_eq!(kind(outcome), ErrorKind::TypeMismatch);
    }

    #[test]
    fn ranges() {
        let f = fixture();
        let outcome = check(&f, "ping_host", json!({"host": "127.0.0.1", "count": 11}));
        assert_eq!(kind(outcome), ErrorKind::OutOfRange);
        let outcome = check(&f, "ping_host", json!({"host": "127.0.0.1", "timeout": 0}));
        assert_eq!(kind(outcome), ErrorKind::OutOfRange);
        let outcome = check(&f, "telnet_port_check", json!({"host": "127.0.0.1", "port": 70000}));
        assert_eq!(kind(outcome), ErrorKind::OutOfRange);
    }

    #[test]
    fn call_timeout_is_bounded_by_backend_ceiling() {
        let f = fixture();
        let ok = check(
            &f,
            "ssh_execute",
            json!({"host": "h", "username": "u", "command": "uptime", "timeout": 60}),
        );
        assert!(ok.is_ok());
        let too_long = check(
            &f,
            "ssh_execute",
            json!({"host": "h", "username": "u", "command": "uptime", "timeout": 61}),
        );
        assert_eq!(kind(too_long), ErrorKind::OutOfRange);
    }

    #[test]
    fn enumerations() {
        let f = fixture();
        let outcome = check(&f, "nmap_scan", json!({"target": "127.0.0.1", "scan_type": "xmas"}));
        assert_eq!(kind(outcome), ErrorKind::OutOfRange);
    }

    #[test]
    fn port_65536_is_out_of_range() {
        let f = fixture();
        let outcome = check(&f, "port_scan", json!({"host": "127.0.0.1", "ports": "65536"}));
        assert_eq!(kind(outcome), ErrorKind::OutOfRange);
    }

    #[test]
    fn recursive_delete_is_dangerous() {
        let f = fixture();
        let outcome = check(
            &f,
            "ssh_execute",
            json!({"host": "10.0.0.5", "username": "ops", "command": "rm -rf /var/www"}),
        );
        assert_eq!(kind(outcome), ErrorKind::DangerousOperation);
    }

    #[test]
    fn overlong_command_is_out_of_range() {
        let f = fixture();
        let outcome = check(
            &f,
            "ssh_execute",
            json!({"host": "h", "username": "u", "command": "x".repeat(501)}),
        );
        assert_eq!(kind(outcome), ErrorKind::OutOfRange);
    }

    #[test]
    fn scanner_options_are_screened() {
        let f = fixture();
        let outcome = check(&f, "nmap_scan", json!({"target": "127.0.0.1", "options": "-oN /tmp/x"}));
        assert_eq!(kind(outcome), ErrorKind::DangerousOperation);
        let outcome = check(&f, "nmap_scan", json!({"target": "127.0.0.1", "options": "-T4 | sh"}));
        assert_eq!(kind(outcome), ErrorKind::DangerousOperation);
        let outcome = check(
            &f,
            "nmap_scan",
            json!({"target": "127.0.0.1", "options": "-sV --script=http-enum"}),
        );
        assert_eq!(kind(outcome), ErrorKind::DangerousOperation);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn non_utf8_resolution_is_a_type_mismatch() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let f = fixture();
        let odd = f.root.join(OsStr::from_bytes(b"caf\xe9"));
        std::fs::create_dir(&odd).unwrap();
        std::os::unix::fs::symlink(&odd, f.root.join("cafe")).unwrap();

        let outcome = check(&f, "list_directory", json!({"directory_path": "cafe"}));
        assert_eq!(kind(outcome), ErrorKind::TypeMismatch);
        let outcome = check(&f, "get_file_info", json!({"file_path": "cafe/notes.txt"}));
        assert_eq!(kind(outcome), ErrorKind::TypeMismatch);
    }

    #[test]
    fn host_injection_is_dangerous() {
        let f = fixture();
        let outcome = check(&f, "ping_host", json!({"host": "-f 127.0.0.1"}));
        assert_eq!(kind(outcome), ErrorKind::DangerousOperation);
    }

    #[test]
    fn path_escape_whether_or_not_target_exists() {
        let f = fixture();
        let existing = check(&f, "read_file", json!({"file_path": "/etc/hostname"}));
        assert_eq!(kind(existing), ErrorKind::PathEscape);
        let missing = check(&f, "read_file", json!({"file_path": "../../no/such/file"}));
        assert_eq!(kind(missing), ErrorKind::PathEscape);
    }

    #[test]
    fn paths_are_resolved_to_absolute() {
        let f = fixture();
        std::fs::write(f.root.join("notes.txt"), "hello").unwrap();
        let args = check(&f, "read_file", json!({"file_path": "notes.txt"})).unwrap();
        assert_eq!(args.path("file_path"), Some(f.root.join("notes.txt").as_path()));
    }

    #[test]
    fn read_ceiling_applies_after_containment() {
        let dir = tempfile::tempdir().unwrap();
        let policy = SandboxPolicy::for_root(dir.path()).unwrap().with_max_read_bytes(8);
        let validator = Validator::new(Arc::new(Registry::standard()), Arc::new(policy));
        std::fs::write(dir.path().join("big.txt"), "0123456789").unwrap();
        std::fs::write(dir.path().join("small.txt"), "0123").unwrap();

        let map = |p: &str| json!({"file_path": p}).as_object().cloned().unwrap();
        let big = validator.check("read_file", &map("big.txt"));
        assert_eq!(big.unwrap_err().kind(), ErrorKind::OutOfRange);
        assert!(validator.check("read_file", &map("small.txt")).is_ok());
        // Metadata is not subject to the read ceiling.
        assert!(validator.check("get_file_info", &map("big.txt")).is_ok());
    }

    #[test]
    fn line_window_must_be_ordered() {
        let f = fixture();
        let outcome = check(
            &f,
            "read_file",
            json!({"file_path": "a.txt", "start_line": 5, "end_line": 2}),
        );
        assert_eq!(kind(outcome), ErrorKind::OutOfRange);
        let outcome = check(&f, "read_file", json!({"file_path": "a.txt", "start_line": 0}));
        assert_eq!(kind(outcome), ErrorKind::OutOfRange);
    }

    #[test]
    fn copy_direction_decides_which_side_is_local() {
        let f = fixture();
        let upload = check(
            &f,
            "ssh_copy_file",
            json!({
                "source_file": "out.tar",
                "dest_file": "/tmp/in.tar",
                "host": "10.0.0.5",
                "username": "ops",
                "direction": "upload",
            }),
        )
        .unwrap();
        assert_eq!(upload.path("source_file"), Some(f.root.join("out.tar").as_path()));
        assert_eq!(upload.str("dest_file"), Some("/tmp/in.tar"));

        let download = check(
            &f,
            "ssh_copy_file",
            json!({
                "source_file": "/etc/motd",
                "dest_file": "/etc/motd",
                "host": "10.0.0.5",
                "username": "ops",
                "direction": "download",
            }),
        );
        assert_eq!(kind(download), ErrorKind::PathEscape);
    }

    #[test]
    fn remote_paths_are_screened() {
        let f = fixture();
        let outcome = check(
            &f,
            "ftp_download_file",
            json!({"host": "ftp.example.org", "remote_file": "a;rm", "local_file": "a"}),
        );
        assert_eq!(kind(outcome), ErrorKind::DangerousOperation);
    }

    #[test]
    fn checks_touch_nothing_but_paths() {
        let f = fixture();
        let before: Vec<_> = std::fs::read_dir(&f.root).unwrap().collect();
        let _ = check(&f, "ftp_download_file", json!({"host": "h", "remote_file": "r", "local_file": "x/y"}));
        let after: Vec<_> = std::fs::read_dir(&f.root).unwrap().collect();
        assert_eq!(before.len(), after.len());
        assert!(!Path::new(&f.root.join("x")).exists());
    }
}
