//! Module compilers
//!
//! A [`Compiler`] turns one source file into a CommonJS-style module body
//! that the bundle prelude can register. [`ModuleCompiler`] is the built-in
//! implementation; editors with a richer toolchain plug in their own through
//! a [`CompilerFactory`].

use crate::error::Result;
use crate::typestrip::strip_types;
use async_trait::async_trait;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};

pub use crate::lexer::check_brackets;

/// How a file is compiled, selected by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransformMode {
    /// `ts`, `tsx`, `cs`
    TypedScript,
    /// `js`, `jsx`, `mjs`, `cjs`
    Script,
    /// `json`
    Json,
    /// `yaml`, `yml`
    Yaml,
    /// `css`
    Stylesheet,
}

impl TransformMode {
    /// Pick a mode from the path's extension; `None` for unsupported files
    pub fn from_path(path: &str) -> Option<Self> {
        let name = path.rsplit('/').next().unwrap_or(path);
        let (_, ext) = name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "ts" | "tsx" | "cs" => Some(Self::TypedScript),
            "js" | "jsx" | "mjs" | "cjs" => Some(Self::Script),
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            "css" => Some(Self::Stylesheet),
            _ => None,
        }
    }

    pub fn is_script(&self) -> bool {
        matches!(self, Self::TypedScript | Self::Script)
    }
}

/// Input to a single compilation
#[derive(Debug, Clone, Copy)]
pub struct TransformRequest<'a> {
    pub path: &'a str,
    pub source: &'a str,
    pub mode: TransformMode,
    pub source_map: bool,
}

/// Compiled module body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOutput {
    pub code: String,
    /// Version 3 source map as JSON text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_map: Option<String>,
}

/// Compilation failure, optionally pointing at a source position (1-based)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
            column: Some(column),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, "{}:{}: {}", line, column, self.message),
            _ => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for CompileError {}

/// The underlying compiler
pub trait Compiler: Send + Sync {
    fn name(&self) -> &str;

    fn transform(
        &self,
        request: &TransformRequest<'_>,
    ) -> std::result::Result<TransformOutput, CompileError>;
}

/// One-time, possibly slow, compiler setup
#[async_trait]
pub trait CompilerFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn Compiler>>;
}

/// Factory for the built-in [`ModuleCompiler`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleCompilerFactory;

#[async_trait]
impl CompilerFactory for ModuleCompilerFactory {
    async fn create(&self) -> Result<Arc<dyn Compiler>> {
        Ok(Arc::new(ModuleCompiler::new()))
    }
}

/// Built-in compiler
///
/// Scripts are checked for balanced brackets and their ES module syntax is
/// lowered to `require`/`exports`. Typed scripts first have their type
/// syntax erased in place (annotations, interfaces, aliases, casts, generic
/// arguments, modifiers, overloads and `declare` statements), and `enum`s
/// become plain objects. Data and stylesheet files become modules exporting
/// their content.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleCompiler;

impl ModuleCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl Compiler for ModuleCompiler {
    fn name(&self) -> &str {
        "ember-module"
    }

    fn transform(
        &self,
        request: &TransformRequest<'_>,
    ) -> std::result::Result<TransformOutput, CompileError> {
        let code = match request.mode {
            TransformMode::TypedScript => {
                let erased = strip_types(&strip_type_only(request.source))?;
                to_commonjs(&erased)
            }
            TransformMode::Script => {
                check_brackets(request.source)?;
                to_commonjs(request.source)
            }
            TransformMode::Json => {
                let value: serde_json::Value = serde_json::from_str(request.source)
                    .map_err(|e| CompileError::at(e.to_string(), e.line(), e.column()))?;
                let json = serde_json::to_string(&value)
                    .map_err(|e| CompileError::new(e.to_string()))?;
                format!("module.exports = {};\n", json)
            }
            TransformMode::Yaml | TransformMode::Stylesheet => {
                format!("module.exports = {};\n", js_string(request.source))
            }
        };

        let source_map = request
            .source_map
            .then(|| identity_source_map(request.path, request.source, &code));

        Ok(TransformOutput { code, source_map })
    }
}

fn type_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^[ \t]*import\s+type\s[^;'"]*?from\s*["'][^"']*["'][ \t]*;?"#)
            .expect("valid regex")
    })
}

fn type_export_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^[ \t]*export\s+type\s*\{[^}]*\}(?:\s*from\s*["'][^"']*["'])?[ \t]*;?"#)
            .expect("valid regex")
    })
}

/// Remove `import type ...` and `export type { ... }` statements, keeping
/// line numbers stable
pub fn strip_type_only(source: &str) -> String {
    let stripped = type_import_re().replace_all(source, |caps: &Captures| keep_lines(&caps[0], ""));
    type_export_re()
        .replace_all(&stripped, |caps: &Captures| keep_lines(&caps[0], ""))
        .into_owned()
}

fn import_from_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^([ \t]*)import\s+([\w$*{][^;'"]*?)\s*from\s*["']([^"']+)["'][ \t]*;?"#)
            .expect("valid regex")
    })
}

fn import_bare_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^([ \t]*)import\s*["']([^"']+)["'][ \t]*;?"#).expect("valid regex")
    })
}

fn export_from_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?m)^([ \t]*)export\s*(\*(?:\s+as\s+[\w$]+)?|\{[^}]*\})\s*from\s*["']([^"']+)["'][ \t]*;?"#,
        )
        .expect("valid regex")
    })
}

fn export_list_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^([ \t]*)export\s*\{([^}]*)\}[ \t]*;?"#).expect("valid regex")
    })
}

fn export_default_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?m)^([ \t]*)export\s+default\s+"#).expect("valid regex"))
}

fn export_decl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?m)^([ \t]*)export\s+((?:async\s+)?function\s*\*?|class|const|let|var)\s*([\w$]+)"#,
        )
        .expect("valid regex")
    })
}

/// Lower ES module statements to `require`/`exports`
///
/// Line numbers of the remaining code are preserved; exported bindings are
/// assigned on lines appended after the module body.
pub fn to_commonjs(source: &str) -> String {
    let mut counter = 0usize;
    let mut exported: Vec<(String, String)> = Vec::new();
    let mut has_exports = false;

    let code = import_from_re().replace_all(source, |caps: &Captures| {
        counter += 1;
        let stmt = import_statement(&caps[2], &caps[3], counter);
        keep_lines(&caps[0], &format!("{}{}", &caps[1], stmt))
    });

    let code = import_bare_re().replace_all(&code, |caps: &Captures| {
        keep_lines(&caps[0], &format!("{}require({});", &caps[1], js_string(&caps[2])))
    });

    let code = export_from_re().replace_all(&code, |caps: &Captures| {
        has_exports = true;
        let req = format!("require({})", js_string(&caps[3]));
        let clause = caps[2].trim();
        let stmt = if clause == "*" {
            format!("Object.assign(exports, {});", req)
        } else if clause.starts_with('*') {
            format!("exports.{} = {};", namespace_name(clause), req)
        } else {
            let assigns: Vec<String> = specifier_pairs(clause)
                .into_iter()
                .map(|(local, public)| format!("exports.{} = m.{};", public, local))
                .collect();
            format!("(function (m) {{ {} }})({});", assigns.join(" "), req)
        };
        keep_lines(&caps[0], &format!("{}{}", &caps[1], stmt))
    });

    let code = export_list_re().replace_all(&code, |caps: &Captures| {
        has_exports = true;
        exported.extend(specifier_pairs(&caps[2]));
        keep_lines(&caps[0], &caps[1])
    });

    let code = export_default_re().replace_all(&code, |caps: &Captures| {
        has_exports = true;
        format!("{}exports.default = ", &caps[1])
    });

    let code = export_decl_re().replace_all(&code, |caps: &Captures| {
        has_exports = true;
        exported.push((caps[3].to_string(), caps[3].to_string()));
        format!("{}{} {}", &caps[1], caps[2].trim_end(), &caps[3])
    });

    let mut out = code.into_owned();
    if has_exports {
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("Object.defineProperty(exports, \"__esModule\", { value: true });\n");
        for (local, public) in &exported {
            out.push_str(&format!("exports.{} = {};\n", public, local));
        }
    }
    out
}

fn import_statement(clause: &str, specifier: &str, counter: usize) -> String {
    let req = format!("require({})", js_string(specifier));
    let clause = clause.trim();

    let (default, rest) = if clause.starts_with('{') || clause.starts_with('*') {
        (None, Some(clause))
    } else {
        match clause.split_once(',') {
            Some((default, rest)) => (Some(default.trim()), Some(rest.trim())),
            None => (Some(clause), None),
        }
    };

    let bind_rest = |rest: &str, source: &str| -> String {
        if rest.starts_with('*') {
            format!("const {} = {};", namespace_name(rest), source)
        } else {
            let fields: Vec<String> = specifier_pairs(rest)
                .into_iter()
                .map(|(imported, local)| {
                    if imported == local {
                        local
                    } else {
                        format!("{}: {}", imported, local)
                    }
                })
                .collect();
            format!("const {{ {} }} = {};", fields.join(", "), source)
        }
    };

    match (default, rest) {
        (Some(default), None) => format!("const {} = __ember_default({});", default, req),
        (None, Some(rest)) => bind_rest(rest, &req),
        (Some(default), Some(rest)) => {
            let temp = format!("__ember_m{}", counter);
            format!(
                "const {} = {}; const {} = __ember_default({}); {}",
                temp,
                req,
                default,
                temp,
                bind_rest(rest, &temp)
            )
        }
        (None, None) => format!("{};", req),
    }
}

/// `* as ns` -> `ns`
fn namespace_name(clause: &str) -> &str {
    let rest = clause.trim_start_matches('*').trim_start();
    rest.strip_prefix("as").unwrap_or(rest).trim()
}

/// Parse `{ a, b as c, type T }` into `(a, a), (b, c)`
fn specifier_pairs(list: &str) -> Vec<(String, String)> {
    list.trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.starts_with("type "))
        .map(|s| match s.split_once(" as ") {
            Some((from, to)) => (from.trim().to_string(), to.trim().to_string()),
            None => (s.to_string(), s.to_string()),
        })
        .collect()
}

/// Replacement text padded with the newlines the matched text spanned
fn keep_lines(matched: &str, replacement: &str) -> String {
    let lines = matched.matches('\n').count();
    format!("{}{}", replacement, "\n".repeat(lines))
}

/// Quote a string as a JavaScript string literal
pub fn js_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Version 3 source map mapping output line N to source line N, column 0
fn identity_source_map(path: &str, source: &str, code: &str) -> String {
    let lines = code.lines().count().max(1);
    let mappings = std::iter::once("AAAA")
        .chain(std::iter::repeat("AACA").take(lines - 1))
        .collect::<Vec<_>>()
        .join(";");

    serde_json::json!({
        "version": 3,
        "file": path,
        "sources": [path],
        "sourcesContent": [source],
        "names": [],
        "mappings": mappings,
    })
    .to_string()
}
