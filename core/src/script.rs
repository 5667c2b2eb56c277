//! Sandboxed scripted control of external applications.
//!
//! A user-provided Python-syntax script is parsed into a syntax tree
//! and statically rejected if it imports anything, calls a forbidden
//! builtin, touches dunder attributes, or references OS modules. Only
//! then does a minimal evaluator run it against a single bound value
//! `app` - a capability façade whose root attributes are whitelisted
//! per target application - collecting output from a `result` variable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use serde_json::json;
use tree_sitter::Node;
use tree_sitter::Parser;

use crate::error::Result;
use crate::error::ToolError;

/// Supported targets and their automation identifiers.
pub const SUPPORTED_APPS: [(&str, &str); 6] = [
    ("word", "Word.Application"),
    ("excel", "Excel.Application"),
    ("powerpoint", "PowerPoint.Application"),
    ("outlook", "Outlook.Application"),
    ("photoshop", "Photoshop.Application"),
    ("access", "Access.Application"),
];

/// Root attributes the façade exposes per application. Everything else
/// on `app` is refused at evaluation time.
fn allowed_roots(app: &str) -> &'static [&'static str] {
    match app {
        "word" => &[
            "ActiveDocument",
            "Documents",
            "Selection",
            "Visible",
            "Version",
        ],
        "excel" => &[
            "ActiveWorkbook",
            "ActiveSheet",
            "Workbooks",
            "Range",
            "Cells",
            "Visible",
            "Version",
        ],
        "powerpoint" => &["ActivePresentation", "Presentations", "Visible", "Version"],
        "outlook" => &["Session", "ActiveExplorer", "Version"],
        "photoshop" => &["ActiveDocument", "Documents", "Version"],
        "access" => &["CurrentDb", "CurrentProject", "Visible", "Version"],
        _ => &[],
    }
}

const FORBIDDEN_NAMES: [&str; 26] = [
    "eval",
    "exec",
    "compile",
    "execfile",
    "__import__",
    "open",
    "input",
    "globals",
    "locals",
    "vars",
    "dir",
    "getattr",
    "setattr",
    "delattr",
    "hasattr",
    "type",
    "super",
    "classmethod",
    "staticmethod",
    "property",
    "memoryview",
    "bytearray",
    "breakpoint",
    "exit",
    "quit",
    "help",
];

const FORBIDDEN_ATTRS: [&str; 16] = [
    "__class__",
    "__bases__",
    "__subclasses__",
    "__mro__",
    "__builtins__",
    "__globals__",
    "__code__",
    "__func__",
    "__self__",
    "__dict__",
    "__init_subclass__",
    "__import__",
    "__loader__",
    "__spec__",
    "__reduce__",
    "__reduce_ex__",
];

const FORBIDDEN_MODULES: [&str; 15] = [
    "os",
    "sys",
    "subprocess",
    "shutil",
    "pathlib",
    "importlib",
    "ctypes",
    "socket",
    "http",
    "urllib",
    "pickle",
    "shelve",
    "tempfile",
    "glob",
    "signal",
];

/// Interpreter step budget; the subset has loops, so runaway scripts
/// must hit a wall before the wall clock does.
const MAX_STEPS: usize = 10_000;

// ── Static validation ───────────────────────────────────────────

fn node_text<'a>(node: Node<'_>, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

fn validate_node(node: Node<'_>, source: &[u8], errors: &mut Vec<String>) {
    let line = node.start_position().row + 1;
    match node.kind() {
        "import_statement" | "import_from_statement" | "future_import_statement" => {
            errors.push(format!("Line {line}: import statements are forbidden"));
        }
        "call" => {
            if let Some(function) = node.child_by_field_name("function") {
                if function.kind() == "identifier" {
                    let name = node_text(function, source);
                    if FORBIDDEN_NAMES.contains(&name) {
                        errors.push(format!("Line {line}: calling '{name}()' is forbidden"));
                    }
                }
            }
        }
        "attribute" => {
            if let Some(attribute) = node.child_by_field_name("attribute") {
                let name = node_text(attribute, source);
                if FORBIDDEN_ATTRS.contains(&name) {
                    errors.push(format!(
                        "Line {line}: accessing dunder attribute '{name}' is forbidden"
                    ));
                }
                if let Some(object) = node.child_by_field_name("object") {
                    if object.kind() == "identifier" {
                        let module = node_text(object, source);
                        if FORBIDDEN_MODULES.contains(&module) {
                            errors.push(format!(
                                "Line {line}: accessing '{module}.{name}' is forbidden"
                            ));
                        }
                    }
                }
            }
        }
        "identifier" => {
            let name = node_text(node, source);
            if FORBIDDEN_MODULES.contains(&name) {
                errors.push(format!("Line {line}: referencing '{name}' is forbidden"));
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        validate_node(child, source, errors);
    }
}

/// Parse and statically check a script. Returns the tree for the
/// evaluator on success.
fn validate_script(script: &str) -> Result<tree_sitter::Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| ToolError::internal(format!("script grammar failed to load: {e}")))?;
    let tree = parser
        .parse(script, None)
        .ok_or_else(|| ToolError::invalid("Script could not be parsed"))?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(ToolError::invalid("Script has a syntax error"));
    }

    let mut errors = Vec::new();
    validate_node(root, script.as_bytes(), &mut errors);
    if !errors.is_empty() {
        let shown: Vec<&String> = errors.iter().take(5).collect();
        return Err(ToolError::invalid(format!(
            "Script validation failed ({} issue(s)): {}",
            errors.len(),
            shown
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        )));
    }
    Ok(tree)
}

// ── Host façade ─────────────────────────────────────────────────

/// Bridge from the evaluator to the real application. Paths are
/// attribute chains below `app` (e.g. `["ActiveWorkbook", "Name"]`).
pub trait AppScriptHost: Send + Sync {
    fn get_attr(&self, path: &[String]) -> Result<JsonValue>;
    fn call_method(&self, path: &[String], args: &[JsonValue]) -> Result<JsonValue>;
}

/// Reaches COM applications through a PowerShell bridge, so the engine
/// needs no in-process COM plumbing. Each access round-trips one
/// PowerShell invocation.
pub struct PowershellComHost {
    prog_id: String,
    visible: bool,
}

impl PowershellComHost {
    pub fn new(prog_id: &str, visible: bool) -> Self {
        Self {
            prog_id: prog_id.to_string(),
            visible,
        }
    }

    fn ps_literal(value: &JsonValue) -> String {
        match value {
            JsonValue::String(s) => format!("'{}'", s.replace('\'', "''")),
            JsonValue::Bool(true) => "$true".to_string(),
            JsonValue::Bool(false) => "$false".to_string(),
            JsonValue::Null => "$null".to_string(),
            other => other.to_string(),
        }
    }

    fn preamble(&self) -> String {
        format!(
            "$ErrorActionPreference = 'Stop'; \
             try {{ $app = [Runtime.InteropServices.Marshal]::GetActiveObject('{0}') }} \
             catch {{ $app = New-Object -ComObject '{0}'; $app.Visible = ${1} }};",
            self.prog_id, self.visible,
        )
    }

    /// Synchronous on purpose: host calls arrive on the evaluator's
    /// worker thread, outside any async runtime.
    fn run_expression(&self, expression: &str) -> Result<JsonValue> {
        let script = format!(
            "{} ({expression}) | ConvertTo-Json -Depth 4 -Compress",
            self.preamble(),
        );
        let output = std::process::Command::new("powershell")
            .args(["-NoProfile", "-Command", &script])
            .stdin(std::process::Stdio::null())
            .output()
            .map_err(|e| {
                ToolError::external(format!("failed to start the application bridge: {e}"))
                    .with_hint("PowerShell must be available on this host.")
            })?;
        if !output.status.success() {
            return Err(ToolError::external(format!(
                "application bridge failed: {}",
                String::from_utf8_lossy(&output.stderr).trim(),
            ))
            .with_hint("Make sure the application is installed and reachable."));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let raw = stdout.trim();
        if raw.is_empty() {
            return Ok(JsonValue::Null);
        }
        Ok(serde_json::from_str(raw).unwrap_or_else(|_| json!(raw)))
    }
}

impl AppScriptHost for PowershellComHost {
    fn get_attr(&self, path: &[String]) -> Result<JsonValue> {
        let expression = format!("$app.{}", path.join("."));
        self.run_expression(&expression)
    }

    fn call_method(&self, path: &[String], args: &[JsonValue]) -> Result<JsonValue> {
        let rendered_args: Vec<String> = args.iter().map(Self::ps_literal).collect();
        let expression = format!("$app.{}({})", path.join("."), rendered_args.join(", "));
        self.run_expression(&expression)
    }
}

// ── Evaluator ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum ScriptValue {
    Json(JsonValue),
    /// A handle into the target app: the attribute chain below `app`.
    App(Vec<String>),
}

impl ScriptValue {
    fn into_json(self) -> JsonValue {
        match self {
            ScriptValue::Json(value) => value,
            ScriptValue::App(path) => json!(format!("<app object: {}>", path.join("."))),
        }
    }
}

struct Evaluator<'a> {
    source: &'a [u8],
    host: &'a dyn AppScriptHost,
    app_name: String,
    vars: HashMap<String, ScriptValue>,
    steps: usize,
}

impl<'a> Evaluator<'a> {
    fn step(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > MAX_STEPS {
            return Err(ToolError::invalid("script exceeded its step budget"));
        }
        Ok(())
    }

    fn check_root(&self, attr: &str) -> Result<()> {
        if allowed_roots(&self.app_name).contains(&attr) {
            Ok(())
        } else {
            Err(ToolError::invalid(format!(
                "'{attr}' is not an allowed attribute of the {} app handle",
                self.app_name,
            )))
        }
    }

    fn exec_block(&mut self, node: Node<'_>) -> Result<()> {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.exec_statement(child)?;
        }
        Ok(())
    }

    fn exec_statement(&mut self, node: Node<'_>) -> Result<()> {
        self.step()?;
        match node.kind() {
            "expression_statement" => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    if child.kind() == "assignment" {
                        self.exec_assignment(child)?;
                    } else {
                        self.eval(child)?;
                    }
                }
                Ok(())
            }
            "if_statement" => {
                let condition = node
                    .child_by_field_name("condition")
                    .ok_or_else(|| ToolError::invalid("malformed if statement"))?;
                if truthy(&self.eval(condition)?) {
                    if let Some(consequence) = node.child_by_field_name("consequence") {
                        self.exec_block(consequence)?;
                    }
                } else if let Some(alternative) = node.child_by_field_name("alternative") {
                    if alternative.kind() == "elif_clause" {
                        return Err(ToolError::invalid(
                            "elif is not supported in sandboxed scripts; nest an if instead",
                        ));
                    }
                    // else_clause wraps a block.
                    let mut cursor = alternative.walk();
                    for child in alternative.named_children(&mut cursor) {
                        if child.kind() == "block" {
                            self.exec_block(child)?;
                        }
                    }
                }
                Ok(())
            }
            "for_statement" => {
                let left = node
                    .child_by_field_name("left")
                    .ok_or_else(|| ToolError::invalid("malformed for statement"))?;
                let right = node
                    .child_by_field_name("right")
                    .ok_or_else(|| ToolError::invalid("malformed for statement"))?;
                let body = node
                    .child_by_field_name("body")
                    .ok_or_else(|| ToolError::invalid("malformed for statement"))?;
                if left.kind() != "identifier" {
                    return Err(ToolError::invalid(
                        "only simple loop variables are supported",
                    ));
                }
                let variable = node_text(left, self.source).to_string();
                let iterable = self.eval(right)?;
                let ScriptValue::Json(JsonValue::Array(items)) = iterable else {
                    return Err(ToolError::invalid("for loops iterate over lists"));
                };
                for item in items {
                    self.step()?;
                    self.vars
                        .insert(variable.clone(), ScriptValue::Json(item));
                    self.exec_block(body)?;
                }
                Ok(())
            }
            "comment" => Ok(()),
            other => Err(ToolError::invalid(format!(
                "unsupported statement in sandboxed script: {other}"
            ))),
        }
    }

    fn exec_assignment(&mut self, node: Node<'_>) -> Result<()> {
        let left = node
            .child_by_field_name("left")
            .ok_or_else(|| ToolError::invalid("malformed assignment"))?;
        let right = node
            .child_by_field_name("right")
            .ok_or_else(|| ToolError::invalid("malformed assignment"))?;
        if left.kind() != "identifier" {
            return Err(ToolError::invalid(
                "only simple variable assignment is supported",
            ));
        }
        let name = node_text(left, self.source).to_string();
        if name == "app" {
            return Err(ToolError::invalid("the app handle cannot be reassigned"));
        }
        let value = self.eval(right)?;
        self.vars.insert(name, value);
        Ok(())
    }

    fn eval(&mut self, node: Node<'_>) -> Result<ScriptValue> {
        self.step()?;
        match node.kind() {
            "identifier" => {
                let name = node_text(node, self.source);
                if name == "app" {
                    return Ok(ScriptValue::App(Vec::new()));
                }
                self.vars
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ToolError::invalid(format!("undefined name '{name}'")))
            }
            "string" => {
                let raw = node_text(node, self.source);
                Ok(ScriptValue::Json(json!(strip_quotes(raw))))
            }
            "integer" => {
                let raw = node_text(node, self.source);
                let parsed: i64 = raw
                    .parse()
                    .map_err(|_| ToolError::invalid(format!("bad integer literal '{raw}'")))?;
                Ok(ScriptValue::Json(json!(parsed)))
            }
            "float" => {
                let raw = node_text(node, self.source);
                let parsed: f64 = raw
                    .parse()
                    .map_err(|_| ToolError::invalid(format!("bad float literal '{raw}'")))?;
                Ok(ScriptValue::Json(json!(parsed)))
            }
            "true" => Ok(ScriptValue::Json(json!(true))),
            "false" => Ok(ScriptValue::Json(json!(false))),
            "none" => Ok(ScriptValue::Json(JsonValue::Null)),
            "list" => {
                let mut items = Vec::new();
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    items.push(self.eval(child)?.into_json());
                }
                Ok(ScriptValue::Json(JsonValue::Array(items)))
            }
            "parenthesized_expression" => {
                let inner = node
                    .named_child(0)
                    .ok_or_else(|| ToolError::invalid("empty parentheses"))?;
                self.eval(inner)
            }
            "attribute" => self.eval_attribute(node),
            "call" => self.eval_call(node),
            "binary_operator" | "comparison_operator" => self.eval_binary(node),
            "unary_operator" => {
                let operand = node
                    .child_by_field_name("argument")
                    .ok_or_else(|| ToolError::invalid("malformed unary operator"))?;
                let value = self.eval(operand)?.into_json();
                match value {
                    JsonValue::Number(n) => {
                        let f = n.as_f64().unwrap_or(0.0);
                        Ok(ScriptValue::Json(number(-f)))
                    }
                    _ => Err(ToolError::invalid("unary minus needs a number")),
                }
            }
            "not_operator" => {
                let operand = node
                    .child_by_field_name("argument")
                    .ok_or_else(|| ToolError::invalid("malformed not"))?;
                let value = self.eval(operand)?;
                Ok(ScriptValue::Json(json!(!truthy(&value))))
            }
            "subscript" => {
                let value = node
                    .child_by_field_name("value")
                    .ok_or_else(|| ToolError::invalid("malformed subscript"))?;
                let index = node
                    .child_by_field_name("subscript")
                    .ok_or_else(|| ToolError::invalid("malformed subscript"))?;
                let value = self.eval(value)?.into_json();
                let index = self.eval(index)?.into_json();
                match (value, index) {
                    (JsonValue::Array(items), JsonValue::Number(n)) => {
                        let i = n.as_i64().unwrap_or(0);
                        let len = items.len() as i64;
                        let i = if i < 0 { len + i } else { i };
                        items
                            .get(i.max(0) as usize)
                            .cloned()
                            .map(ScriptValue::Json)
                            .ok_or_else(|| ToolError::invalid("list index out of range"))
                    }
                    (JsonValue::Object(map), JsonValue::String(key)) => map
                        .get(&key)
                        .cloned()
                        .map(ScriptValue::Json)
                        .ok_or_else(|| ToolError::invalid(format!("missing key '{key}'"))),
                    _ => Err(ToolError::invalid("unsupported subscript")),
                }
            }
            other => Err(ToolError::invalid(format!(
                "unsupported expression in sandboxed script: {other}"
            ))),
        }
    }

    /// Resolve an attribute chain. Chains rooted at `app` become host
    /// lookups; the first hop is checked against the app's whitelist.
    fn eval_attribute(&mut self, node: Node<'_>) -> Result<ScriptValue> {
        let object = node
            .child_by_field_name("object")
            .ok_or_else(|| ToolError::invalid("malformed attribute access"))?;
        let attribute = node
            .child_by_field_name("attribute")
            .ok_or_else(|| ToolError::invalid("malformed attribute access"))?;
        let attr_name = node_text(attribute, self.source).to_string();

        match self.eval(object)? {
            ScriptValue::App(mut path) => {
                if path.is_empty() {
                    self.check_root(&attr_name)?;
                }
                path.push(attr_name);
                Ok(ScriptValue::App(path))
            }
            ScriptValue::Json(_) => Err(ToolError::invalid(format!(
                "attribute '{attr_name}' is only available on the app handle"
            ))),
        }
    }

    fn eval_call(&mut self, node: Node<'_>) -> Result<ScriptValue> {
        let function = node
            .child_by_field_name("function")
            .ok_or_else(|| ToolError::invalid("malformed call"))?;
        let mut args = Vec::new();
        if let Some(arguments) = node.child_by_field_name("arguments") {
            let mut cursor = arguments.walk();
            for child in arguments.named_children(&mut cursor) {
                args.push(self.eval(child)?);
            }
        }

        match function.kind() {
            "identifier" => {
                let name = node_text(function, self.source).to_string();
                let json_args: Vec<JsonValue> =
                    args.into_iter().map(ScriptValue::into_json).collect();
                builtin(&name, &json_args).map(ScriptValue::Json)
            }
            "attribute" => {
                let target = self.eval_attribute(function)?;
                let ScriptValue::App(path) = target else {
                    return Err(ToolError::invalid("only app methods can be called"));
                };
                let json_args: Vec<JsonValue> =
                    args.into_iter().map(ScriptValue::into_json).collect();
                let result = self.host.call_method(&path, &json_args)?;
                Ok(ScriptValue::Json(result))
            }
            other => Err(ToolError::invalid(format!(
                "unsupported call target: {other}"
            ))),
        }
    }

    fn eval_binary(&mut self, node: Node<'_>) -> Result<ScriptValue> {
        let left = node
            .child_by_field_name("left")
            .ok_or_else(|| ToolError::invalid("malformed operator"))?;
        let right = node
            .child_by_field_name("right")
            .ok_or_else(|| ToolError::invalid("malformed operator"))?;
        let operator = node
            .child_by_field_name("operator")
            .map(|op| node_text(op, self.source).to_string())
            .or_else(|| {
                // comparison_operator keeps its operator as an anonymous
                // child between the operands.
                let mut cursor = node.walk();
                node.children(&mut cursor)
                    .find(|c| !c.is_named())
                    .map(|c| node_text(c, self.source).to_string())
            })
            .ok_or_else(|| ToolError::invalid("malformed operator"))?;

        let left_val = self.eval_owned(left)?;
        let left = self.resolve(left_val)?;
        let right_val = self.eval_owned(right)?;
        let right = self.resolve(right_val)?;

        apply_operator(&operator, &left, &right).map(ScriptValue::Json)
    }

    fn eval_owned(&mut self, node: Node<'_>) -> Result<ScriptValue> {
        self.eval(node)
    }

    /// App handles used as plain values resolve through the host, so
    /// `x = app.ActiveWorkbook.Name` reads the property.
    fn resolve(&self, value: ScriptValue) -> Result<JsonValue> {
        match value {
            ScriptValue::Json(value) => Ok(value),
            ScriptValue::App(path) => self.host.get_attr(&path),
        }
    }
}

fn strip_quotes(raw: &str) -> String {
    let trimmed = raw
        .trim_start_matches(['r', 'b', 'f'])
        .trim_matches(|c| c == '"' || c == '\'');
    trimmed.replace("\\n", "\n").replace("\\t", "\t")
}

fn truthy(value: &ScriptValue) -> bool {
    match value {
        ScriptValue::App(_) => true,
        ScriptValue::Json(JsonValue::Bool(b)) => *b,
        ScriptValue::Json(JsonValue::Null) => false,
        ScriptValue::Json(JsonValue::Number(n)) => n.as_f64().unwrap_or(0.0) != 0.0,
        ScriptValue::Json(JsonValue::String(s)) => !s.is_empty(),
        ScriptValue::Json(JsonValue::Array(a)) => !a.is_empty(),
        ScriptValue::Json(JsonValue::Object(o)) => !o.is_empty(),
    }
}

fn number(f: f64) -> JsonValue {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        json!(f as i64)
    } else {
        json!(f)
    }
}

/// The minimal builtin environment. `print` is accepted and silenced.
fn builtin(name: &str, args: &[JsonValue]) -> Result<JsonValue> {
    let num = |v: &JsonValue| -> Result<f64> {
        v.as_f64()
            .ok_or_else(|| ToolError::invalid(format!("{name}() needs numbers")))
    };
    match name {
        "print" => Ok(JsonValue::Null),
        "len" => match args.first() {
            Some(JsonValue::String(s)) => Ok(json!(s.chars().count())),
            Some(JsonValue::Array(a)) => Ok(json!(a.len())),
            Some(JsonValue::Object(o)) => Ok(json!(o.len())),
            _ => Err(ToolError::invalid("len() needs a string or list")),
        },
        "str" => Ok(json!(match args.first() {
            Some(JsonValue::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        })),
        "int" => {
            let value = args
                .first()
                .ok_or_else(|| ToolError::invalid("int() needs an argument"))?;
            match value {
                JsonValue::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(|i| json!(i))
                    .map_err(|_| ToolError::invalid(format!("int() cannot parse '{s}'"))),
                other => Ok(json!(num(other)? as i64)),
            }
        }
        "float" => Ok(json!(num(
            args.first()
                .ok_or_else(|| ToolError::invalid("float() needs an argument"))?
        )?)),
        "abs" => Ok(number(num(
            args.first()
                .ok_or_else(|| ToolError::invalid("abs() needs an argument"))?
        )?
        .abs())),
        "round" => Ok(number(num(
            args.first()
                .ok_or_else(|| ToolError::invalid("round() needs an argument"))?
        )?
        .round())),
        "min" | "max" | "sum" => {
            let items: Vec<f64> = match args {
                [JsonValue::Array(items)] => items.iter().map(num).collect::<Result<_>>()?,
                args => args.iter().map(num).collect::<Result<_>>()?,
            };
            if items.is_empty() {
                return Err(ToolError::invalid(format!("{name}() of empty sequence")));
            }
            let result = match name {
                "min" => items.iter().copied().fold(f64::INFINITY, f64::min),
                "max" => items.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                _ => items.iter().sum(),
            };
            Ok(number(result))
        }
        "range" => {
            let (start, end) = match args {
                [end] => (0, end.as_i64().unwrap_or(0)),
                [start, end, ..] => (start.as_i64().unwrap_or(0), end.as_i64().unwrap_or(0)),
                [] => return Err(ToolError::invalid("range() needs an argument")),
            };
            let capped = (start..end).take(MAX_STEPS);
            Ok(JsonValue::Array(capped.map(|i| json!(i)).collect()))
        }
        "sorted" => match args.first() {
            Some(JsonValue::Array(items)) => {
                let mut sorted = items.clone();
                sorted.sort_by(|a, b| {
                    a.to_string()
                        .partial_cmp(&b.to_string())
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                Ok(JsonValue::Array(sorted))
            }
            _ => Err(ToolError::invalid("sorted() needs a list")),
        },
        other => Err(ToolError::invalid(format!(
            "'{other}' is not available in the sandbox"
        ))),
    }
}

fn apply_operator(operator: &str, left: &JsonValue, right: &JsonValue) -> Result<JsonValue> {
    if operator == "+" {
        if let (JsonValue::String(a), JsonValue::String(b)) = (left, right) {
            return Ok(json!(format!("{a}{b}")));
        }
    }
    match operator {
        "==" => return Ok(json!(left == right)),
        "!=" => return Ok(json!(left != right)),
        _ => {}
    }
    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(ToolError::invalid(format!(
            "operator '{operator}' needs numeric operands"
        )));
    };
    let result = match operator {
        "+" => number(a + b),
        "-" => number(a - b),
        "*" => number(a * b),
        "/" => {
            if b == 0.0 {
                return Err(ToolError::invalid("division by zero"));
            }
            json!(a / b)
        }
        "<" => json!(a < b),
        ">" => json!(a > b),
        "<=" => json!(a <= b),
        ">=" => json!(a >= b),
        other => {
            return Err(ToolError::invalid(format!(
                "unsupported operator '{other}'"
            )));
        }
    };
    Ok(result)
}

// ── Runner ──────────────────────────────────────────────────────

pub struct ScriptRunner {
    host_factory: Box<dyn Fn(&str, &str, bool) -> Arc<dyn AppScriptHost> + Send + Sync>,
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptRunner {
    pub fn new() -> Self {
        Self {
            host_factory: Box::new(|_app, prog_id, visible| {
                Arc::new(PowershellComHost::new(prog_id, visible))
            }),
        }
    }

    /// Replace the application bridge; the test-suite injects a scripted
    /// host here.
    pub fn with_host_factory(
        factory: impl Fn(&str, &str, bool) -> Arc<dyn AppScriptHost> + Send + Sync + 'static,
    ) -> Self {
        Self {
            host_factory: Box::new(factory),
        }
    }

    /// The `run_app_script` tool body: validate, evaluate under a
    /// wall-clock cap, JSON-normalize `result`.
    pub async fn run(
        &self,
        app_name: &str,
        script: &str,
        timeout_secs: u64,
        visible: bool,
    ) -> Result<JsonValue> {
        let app = app_name.trim().to_lowercase();
        let Some((_, prog_id)) = SUPPORTED_APPS.iter().find(|(name, _)| *name == app) else {
            return Err(ToolError::invalid(format!(
                "Unsupported application: '{app_name}'"
            ))
            .with_hint(format!(
                "Supported apps: {}",
                SUPPORTED_APPS
                    .iter()
                    .map(|(name, _)| *name)
                    .collect::<Vec<_>>()
                    .join(", "),
            )));
        };

        let tree = validate_script(script)?;
        let host = (self.host_factory)(&app, prog_id, visible);

        let script_owned = script.to_string();
        let app_owned = app.clone();
        let timeout = Duration::from_secs(timeout_secs.max(1));
        let evaluated = tokio::time::timeout(
            timeout,
            tokio::task::spawn_blocking(move || {
                let mut evaluator = Evaluator {
                    source: script_owned.as_bytes(),
                    host: host.as_ref(),
                    app_name: app_owned,
                    vars: HashMap::new(),
                    steps: 0,
                };
                evaluator.exec_block(tree.root_node())?;
                // An app handle left in `result` resolves to its value.
                let result = match evaluator.vars.remove("result") {
                    Some(ScriptValue::App(path)) => evaluator.host.get_attr(&path)?,
                    Some(value) => value.into_json(),
                    None => JsonValue::Null,
                };
                Ok::<JsonValue, ToolError>(result)
            }),
        )
        .await
        .map_err(|_| ToolError::timeout("script", timeout))???;

        Ok(json!({
            "success": true,
            "app": app,
            "result": evaluated,
        }))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    struct FakeHost;

    impl AppScriptHost for FakeHost {
        fn get_attr(&self, path: &[String]) -> Result<JsonValue> {
            match path.join(".").as_str() {
                "ActiveWorkbook.Name" => Ok(json!("Book1")),
                "ActiveSheet.Rows" => Ok(json!([1, 2, 3])),
                other => Ok(json!(format!("attr:{other}"))),
            }
        }

        fn call_method(&self, path: &[String], args: &[JsonValue]) -> Result<JsonValue> {
            Ok(json!({"called": path.join("."), "args": args}))
        }
    }

    fn runner() -> ScriptRunner {
        ScriptRunner::with_host_factory(|_, _, _| Arc::new(FakeHost))
    }

    #[tokio::test]
    async fn import_is_rejected_by_static_validation() {
        let err = runner()
            .run("excel", "import os", 30, false)
            .await
            .unwrap_err();
        assert!(err.message.contains("import"));
    }

    #[tokio::test]
    async fn eval_call_is_rejected() {
        let err = runner()
            .run("excel", "x = eval('1+1')", 30, false)
            .await
            .unwrap_err();
        assert!(err.message.contains("eval"));
    }

    #[tokio::test]
    async fn dunder_access_is_rejected() {
        let err = runner()
            .run("excel", "x = app.__class__.__bases__", 30, false)
            .await
            .unwrap_err();
        assert!(err.message.contains("dunder") || err.message.contains("__class__"));

        let err = runner()
            .run("excel", "x = app.__reduce_ex__", 30, false)
            .await
            .unwrap_err();
        assert!(err.message.contains("__reduce_ex__"));
    }

    #[tokio::test]
    async fn interpreter_escape_hatches_are_rejected() {
        for script in ["help(app)", "quit()"] {
            let err = runner().run("excel", script, 30, false).await.unwrap_err();
            assert!(
                err.message.contains("forbidden"),
                "{script} slipped past validation: {}",
                err.message,
            );
        }
    }

    #[tokio::test]
    async fn os_module_reference_is_rejected() {
        let err = runner()
            .run("excel", "x = os.system('dir')", 30, false)
            .await
            .unwrap_err();
        assert!(err.message.contains("os"));
    }

    #[tokio::test]
    async fn unsupported_app_is_rejected() {
        let err = runner().run("doom", "result = 1", 30, false).await.unwrap_err();
        assert!(err.message.contains("Unsupported application"));
    }

    #[tokio::test]
    async fn property_read_flows_through_the_host() {
        let result = runner()
            .run("excel", "result = app.ActiveWorkbook.Name + '!'", 30, false)
            .await
            .unwrap();
        assert_eq!(result["result"], json!("Book1!"));
    }

    #[tokio::test]
    async fn method_call_passes_arguments() {
        let result = runner()
            .run(
                "excel",
                "result = app.ActiveWorkbook.Save('fast', 2)",
                30,
                false,
            )
            .await
            .unwrap();
        assert_eq!(result["result"]["called"], json!("ActiveWorkbook.Save"));
        assert_eq!(result["result"]["args"], json!(["fast", 2]));
    }

    #[tokio::test]
    async fn root_attribute_whitelist_is_enforced() {
        let err = runner()
            .run("excel", "result = app.Quit()", 30, false)
            .await
            .unwrap_err();
        assert!(err.message.contains("not an allowed attribute"));
    }

    #[tokio::test]
    async fn loops_and_arithmetic_work() {
        let script = "total = 0\nfor n in range(5):\n    total = total + n\nresult = total";
        let result = runner().run("excel", script, 30, false).await.unwrap();
        assert_eq!(result["result"], json!(10));
    }

    #[tokio::test]
    async fn missing_result_degrades_to_null() {
        let result = runner().run("excel", "x = 1 + 1", 30, false).await.unwrap();
        assert_eq!(result["result"], JsonValue::Null);
    }

    #[tokio::test]
    async fn step_budget_stops_runaway_scripts() {
        let script = "x = 0\nfor a in range(9999):\n    for b in range(9999):\n        x = x + 1";
        let err = runner().run("excel", script, 30, false).await.unwrap_err();
        assert!(err.message.contains("step budget"));
    }
}
