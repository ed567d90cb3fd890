//! Bundle assembly
//!
//! A bundle is one self-contained script: a small module registry, the asset
//! table, one `__ember_define` per module and a final require of the entry.

use crate::compiler::js_string;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const PRELUDE: &str = r#"var __ember_defs = {};
var __ember_cache = {};
function __ember_default(m) {
  return m && m.__esModule ? m["default"] : m;
}
function __ember_define(id, deps, factory) {
  __ember_defs[id] = { deps: deps, factory: factory };
}
function __ember_require(id) {
  var cached = __ember_cache[id];
  if (cached) return cached.exports;
  var def = __ember_defs[id];
  if (!def) {
    if (Object.prototype.hasOwnProperty.call(__ember_assets, id)) {
      return { path: id, hash: __ember_assets[id] };
    }
    throw new Error("Module not found: " + id);
  }
  var module = { exports: {} };
  __ember_cache[id] = module;
  def.factory.call(module.exports, module, module.exports, function (specifier) {
    var target = def.deps[specifier];
    if (target !== undefined) return __ember_require(target);
    if (typeof require === "function") return require(specifier);
    throw new Error("Cannot resolve '" + specifier + "' from " + id);
  }, __ember_assets);
  return module.exports;
}
"#;

/// A compiled module ready for bundling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledModule {
    pub id: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_map: Option<String>,
    /// Import specifier -> resolved project path
    pub dependencies: BTreeMap<String, String>,
}

impl CompiledModule {
    /// Approximate retained size, for cache statistics
    pub fn size(&self) -> usize {
        self.code.len()
            + self.source_map.as_ref().map_or(0, String::len)
            + self
                .dependencies
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }
}

/// Assemble a bundle from modules in build order
pub fn assemble(
    entry: &str,
    modules: &[&CompiledModule],
    assets: &BTreeMap<String, String>,
) -> String {
    let mut out = String::from("(function () {\n\"use strict\";\n");

    out.push_str("var __ember_assets = {");
    let asset_entries: Vec<String> = assets
        .iter()
        .map(|(path, hash)| format!("{}: {}", js_string(path), js_string(hash)))
        .collect();
    out.push_str(&asset_entries.join(", "));
    out.push_str("};\n");
    out.push_str(PRELUDE);

    for module in modules {
        let deps: Vec<String> = module
            .dependencies
            .iter()
            .map(|(specifier, target)| format!("{}: {}", js_string(specifier), js_string(target)))
            .collect();

        out.push_str(&format!(
            "__ember_define({}, {{{}}}, function (module, exports, require, __ember_assets) {{\n",
            js_string(&module.id),
            deps.join(", ")
        ));
        out.push_str(&module.code);
        if !module.code.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&format!("//# sourceURL=ember:///{}\n", source_url_path(&module.id)));
        out.push_str("});\n");
    }

    out.push_str(&format!("__ember_require({});\n", js_string(entry)));
    out.push_str("})();\n");
    out
}

/// Percent-encode anything that could end the `sourceURL` comment early
fn source_url_path(id: &str) -> String {
    let mut encoded = String::with_capacity(id.len());
    for c in id.chars() {
        if c.is_control() || c.is_whitespace() || c == '%' {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                encoded.push_str(&format!("%{:02X}", byte));
            }
        } else {
            encoded.push(c);
        }
    }
    encoded
}
