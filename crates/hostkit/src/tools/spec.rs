//! Structured tool descriptors.
//!
//! A [`ToolDescriptor`] is the single source of truth for a tool: it names
//! the backend that runs it, declares every parameter with its type,
//! default and policy constraint, and lists the external programs it needs.
//! The validator enforces descriptors; transports advertise them through
//! [`ToolDescriptor::input_schema`].

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::tools::args::ArgValue;
use crate::tools::names::{BackendKind, ToolName};

/// Wire type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Boolean,
}

/// How a sandboxed path will be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathAccess {
    /// Content is read back to the caller; the read ceiling applies.
    Read,
    /// Destination of a write; the file may not exist yet.
    Write,
    /// Metadata, listings or uploads.
    Any,
}

/// Policy check applied to a parameter after type coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    None,
    /// Inclusive integer range.
    Range { min: i64, max: i64 },
    /// Call budget in seconds, bounded by the backend's timeout ceiling.
    Timeout,
    OneOf(&'static [&'static str]),
    /// Local path that must resolve inside a sandbox root.
    Path(PathAccess),
    /// Local path when `param` equals `equals`, remote path otherwise.
    PathWhen {
        param: &'static str,
        equals: &'static str,
        access: PathAccess,
    },
    /// Path on a remote host. Never resolved locally.
    RemotePath,
    Host,
    /// Host name, address or CIDR network.
    Target,
    Network,
    PortList,
    /// Remote shell command, checked against the backend denylist.
    Command,
    /// Extra scanner flags, checked against the backend denylist.
    ScanOptions,
    Username,
    MaxLen(usize),
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub required: bool,
    pub default: Option<ArgValue>,
    pub constraint: Constraint,
    pub description: &'static str,
    /// External program needed only when a call supplies this parameter.
    pub needs: Option<&'static str>,
}

impl ParamSpec {
    fn new(name: &'static str, ty: ParamType, description: &'static str) -> Self {
        Self {
            name,
            ty,
            required: false,
            default: None,
            constraint: Constraint::None,
            description,
            needs: None,
        }
    }

    pub fn string(name: &'static str, description: &'static str) -> Self {
        Self::new(name, ParamType::String, description)
    }

    pub fn integer(name: &'static str, description: &'static str) -> Self {
        Self::new(name, ParamType::Integer, description)
    }

    pub fn boolean(name: &'static str, description: &'static str) -> Self {
        Self::new(name, ParamType::Boolean, description)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default(mut self, value: impl Into<ArgValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = constraint;
        self
    }

    pub fn range(self, min: i64, max: i64) -> Self {
        self.constraint(Constraint::Range { min, max })
    }

    pub fn needs(mut self, program: &'static str) -> Self {
        self.needs = Some(program);
        self
    }

    /// JSON Schema fragment for this parameter.
    fn schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".into(), json!(self.ty));
        schema.insert("description".into(), json!(self.description));
        if let Some(default) = &self.default {
            schema.insert("default".into(), default.to_json());
        }
        match &self.constraint {
            Constraint::Range { min, max } => {
                schema.insert("minimum".into(), json!(min));
                schema.insert("maximum".into(), json!(max));
            }
            Constraint::Timeout => {
                schema.insert("minimum".into(), json!(1));
            }
            Constraint::OneOf(values) => {
                schema.insert("enum".into(), json!(values));
            }
            Constraint::MaxLen(max) => {
                schema.insert("maxLength".into(), json!(max));
            }
            _ => {}
        }
        Value::Object(schema)
    }
}

/// Immutable description of one tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDescriptor {
    pub name: ToolName,
    pub backend: BackendKind,
    pub purpose: String,
    pub params: Vec<ParamSpec>,
    /// External programs that must be on `PATH` for the tool to run.
    pub requires: &'static [&'static str],
}

impl ToolDescriptor {
    pub fn builder(name: ToolName) -> ToolDescriptorBuilder {
        ToolDescriptorBuilder {
            name,
            purpose: String::new(),
            output_format: None,
            params: Vec::new(),
            requires: &[],
        }
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn required_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|p| p.required)
    }

    /// Every program the tool can run: `requires` first, then the ones
    /// individual parameters pull in.
    pub fn programs(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.requires
            .iter()
            .copied()
            .chain(self.params.iter().filter_map(|p| p.needs))
    }

    /// JSON Schema of the tool's arguments object.
    pub fn input_schema(&self) -> Value {
        let properties = self
            .params
            .iter()
            .map(|p| (p.name.to_string(), p.schema()))
            .collect::<Map<_, _>>();
        let required: Vec<&str> = self.required_params().map(|p| p.name).collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

/// Builder for a [`ToolDescriptor`].
pub struct ToolDescriptorBuilder {
    name: ToolName,
    purpose: String,
    output_format: Option<String>,
    params: Vec<ParamSpec>,
    requires: &'static [&'static str],
}

impl ToolDescriptorBuilder {
    pub fn purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }

    pub fn output_format(mut self, format: impl Into<String>) -> Self {
        self.output_format = Some(format.into());
        self
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn requires(mut self, programs: &'static [&'static str]) -> Self {
        self.requires = programs;
        self
    }

    pub fn build(self) -> ToolDescriptor {
        let mut purpose = self.purpose;
        if let Some(format) = self.output_format {
            purpose.push_str(&format!("\nOutput format: {format}"));
        }
        ToolDescriptor {
            name: self.name,
            backend: self.name.backend(),
            purpose,
            params: self.params,
            requires: self.requires,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ToolDescriptor {
        ToolDescriptor::builder(ToolName::PingHost)
            .purpose("Ping a host")
            .output_format("Reachability and round-trip samples")
            .param(ParamSpec::string("host", "Host to ping").required().constraint(Constraint::Host))
            .param(ParamSpec::integer("count", "Echo requests").default(4).range(1, 10))
            .requires(&["ping"])
            .build()
    }

    #[test]
    fn builder_derives_backend_from_name() {
        let desc = sample();
        assert_eq!(desc.backend, BackendKind::Scan);
        assert!(desc.purpose.contains("Output format:"));
        assert_eq!(desc.requires, &["ping"]);
    }

    #[test]
    fn programs_include_parameter_needs() {
        let desc = ToolDescriptor::builder(ToolName::SshExecute)
            .param(ParamSpec::string("password", "Login password").needs("sshpass"))
            .param(ParamSpec::string("key_file", "Key"))
            .requires(&["ssh"])
            .build();
        assert_eq!(desc.programs().collect::<Vec<_>>(), vec!["ssh", "sshpass"]);
        assert_eq!(desc.param("key_file").unwrap().needs, None);
    }

    #[test]
    fn input_schema_lists_required_and_bounds() {
        let schema = sample().input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["host"]));
        assert_eq!(schema["properties"]["count"]["minimum"], 1);
        assert_eq!(schema["properties"]["count"]["maximum"], 10);
        assert_eq!(schema["properties"]["count"]["default"], 4);
        assert_eq!(schema["properties"]["host"]["type"], "string");
    }
}
