//! Bundle emission.
//!
//! Renders a resolved graph into the browserify-compatible layout:
//!
//! ```text
//! (function (modules, entries) { ...loader... })({
//! 1: [function (require, module, exports) {
//! <module code>
//! }, {"./b": 2}],
//! 2: [function (require, module, exports) {
//! <module code>
//! }, {}],
//! }, [1]);
//! ```
//!
//! Chunks are rendered lazily as the stream is polled.

use super::graph::{CachedModule, Dependency};
use super::{BundleError, BundleStream};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const PRELUDE: &str = r#"(function (modules, entries) {
  var cache = {};
  function load(id) {
    if (cache[id]) return cache[id].exports;
    if (!modules[id]) {
      var err = new Error("Cannot find module '" + id + "'");
      err.code = "MODULE_NOT_FOUND";
      throw err;
    }
    var module = cache[id] = { exports: {} };
    modules[id][0].call(module.exports, function (x) {
      var dep = modules[id][1][x];
      if (dep === null) return {};
      return load(dep === undefined ? x : dep);
    }, module, module.exports);
    return module.exports;
  }
  for (var i = 0; i < entries.length; i++) load(entries[i]);
  return load;
})({
"#;

/// Everything needed to render one bundle.
#[derive(Debug)]
pub struct BundlePlan {
    /// Modules in sorted path order.
    pub modules: Vec<Arc<CachedModule>>,
    pub entry: PathBuf,
    pub full_paths: bool,
    pub debug: bool,
    /// Leading version comment.
    pub banner: bool,
    /// Base for source map paths.
    pub cwd: PathBuf,
}

impl BundlePlan {
    /// Module identifiers: absolute paths, or 1..n in sorted path order.
    fn ids(&self) -> FxHashMap<PathBuf, serde_json::Value> {
        self.modules
            .iter()
            .enumerate()
            .map(|(idx, module)| {
                let id = if self.full_paths {
                    serde_json::Value::String(module.path.display().to_string())
                } else {
                    serde_json::Value::from(idx + 1)
                };
                (module.path.clone(), id)
            })
            .collect()
    }

    fn banner_text(&self) -> String {
        if self.banner {
            format!("/* {} */\n", crate::version::version_string())
        } else {
            String::new()
        }
    }
}

/// Turn `plan` into a lazily rendered stream.
pub fn render(plan: BundlePlan) -> BundleStream {
    let plan = Arc::new(plan);
    let ids = Arc::new(plan.ids());
    let chunk_count = plan.modules.len() + 2;

    stream::iter(0..chunk_count)
        .map(move |idx| {
            let chunk = if idx == 0 {
                format!("{}{PRELUDE}", plan.banner_text())
            } else if idx <= plan.modules.len() {
                module_chunk(&plan.modules[idx - 1], &ids)
            } else {
                footer(&plan, &ids)
            };
            Ok::<_, BundleError>(Bytes::from(chunk))
        })
        .boxed()
}

fn id_json(ids: &FxHashMap<PathBuf, serde_json::Value>, path: &Path) -> serde_json::Value {
    ids.get(path)
        .cloned()
        .unwrap_or_else(|| serde_json::Value::String(path.display().to_string()))
}

fn module_chunk(module: &CachedModule, ids: &FxHashMap<PathBuf, serde_json::Value>) -> String {
    let deps: BTreeMap<&str, serde_json::Value> = module
        .dependencies
        .iter()
        .map(|(spec, dep)| {
            let value = match dep {
                Dependency::Module(path) => id_json(ids, path),
                Dependency::Builtin(_) => serde_json::Value::Null,
            };
            (spec.as_str(), value)
        })
        .collect();
    let deps = serde_json::to_string(&deps).unwrap_or_else(|_| "{}".to_string());

    format!(
        "{}: [function (require, module, exports) {{\n{}\n}}, {}],\n",
        id_json(ids, &module.path),
        module.code,
        deps
    )
}

fn footer(plan: &BundlePlan, ids: &FxHashMap<PathBuf, serde_json::Value>) -> String {
    let mut out = format!("}}, [{}]);\n", id_json(ids, &plan.entry));
    if plan.debug {
        let map = source_map(plan);
        out.push_str("//# sourceMappingURL=data:application/json;charset=utf-8;base64,");
        out.push_str(&STANDARD.encode(map));
        out.push('\n');
    }
    out
}

// =============================================================================
// Source Map Support
// =============================================================================

/// VLQ-encode a signed integer and append to output string.
fn vlq_encode(value: i64, out: &mut String) {
    const B64: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    #[allow(clippy::cast_sign_loss)]
    let mut v = (if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    }) as u64;
    loop {
        let mut digit = (v & 0x1f) as u8;
        v >>= 5;
        if v > 0 {
            digit |= 0x20;
        }
        out.push(B64[digit as usize] as char);
        if v == 0 {
            break;
        }
    }
}

/// Line-level V3 source map for the rendered bundle.
///
/// Each line of a module's code maps to the same line of its source (clamped
/// to the source length).
fn source_map(plan: &BundlePlan) -> String {
    let mut sources = Vec::with_capacity(plan.modules.len());
    let mut contents = Vec::with_capacity(plan.modules.len());
    let mut mappings = String::new();

    let mut output_line = count_lines(&plan.banner_text()) + count_lines(PRELUDE);
    for _ in 0..output_line {
        mappings.push(';');
    }

    let mut prev_source: i64 = 0;
    let mut prev_line: i64 = 0;

    for (source_idx, module) in plan.modules.iter().enumerate() {
        let display = module
            .path
            .strip_prefix(&plan.cwd)
            .unwrap_or(&module.path)
            .display()
            .to_string();
        sources.push(display);
        contents.push(module.source.clone());

        // Header line of the module wrapper.
        mappings.push(';');
        output_line += 1;

        let source_lines = module.source.lines().count().max(1);
        let code_lines = module.code.split('\n').count();
        for line in 0..code_lines {
            let source_line = line.min(source_lines - 1) as i64;
            let source_idx = source_idx as i64;
            vlq_encode(0, &mut mappings);
            vlq_encode(source_idx - prev_source, &mut mappings);
            vlq_encode(source_line - prev_line, &mut mappings);
            vlq_encode(0, &mut mappings);
            mappings.push(';');
            prev_source = source_idx;
            prev_line = source_line;
            output_line += 1;
        }

        // Closing line with the dependency map.
        mappings.push(';');
        output_line += 1;
    }

    tracing::trace!(lines = output_line, "source map generated");

    serde_json::json!({
        "version": 3,
        "file": "bundle.js",
        "sources": sources,
        "sourcesContent": contents,
        "names": [],
        "mappings": mappings,
    })
    .to_string()
}

fn count_lines(text: &str) -> usize {
    text.matches('\n').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(path: &str, code: &str, deps: &[(&str, Dependency)]) -> Arc<CachedModule> {
        Arc::new(CachedModule {
            path: PathBuf::from(path),
            source: code.to_string(),
            code: code.to_string(),
            dependencies: deps
                .iter()
                .map(|(s, d)| ((*s).to_string(), d.clone()))
                .collect(),
            inputs: Vec::new(),
            digest: String::new(),
        })
    }

    fn plan(full_paths: bool, debug: bool) -> BundlePlan {
        BundlePlan {
            modules: vec![
                module(
                    "/p/a.js",
                    "var b = require('./b');\nvar fs = require('fs');",
                    &[
                        ("./b", Dependency::Module(PathBuf::from("/p/b.js"))),
                        ("fs", Dependency::Builtin("fs".to_string())),
                    ],
                ),
                module("/p/b.js", "module.exports = 2;", &[]),
            ],
            entry: PathBuf::from("/p/a.js"),
            full_paths,
            debug,
            banner: false,
            cwd: PathBuf::from("/p"),
        }
    }

    async fn collect(stream: BundleStream) -> String {
        let chunks: Vec<_> = stream.collect().await;
        let mut out = String::new();
        for chunk in chunks {
            out.push_str(std::str::from_utf8(&chunk.unwrap()).unwrap());
        }
        out
    }

    #[test]
    fn test_vlq_encode() {
        let mut out = String::new();
        vlq_encode(0, &mut out);
        vlq_encode(1, &mut out);
        vlq_encode(-1, &mut out);
        vlq_encode(16, &mut out);
        assert_eq!(out, "ACDgB");
    }

    #[tokio::test]
    async fn test_numeric_ids() {
        let out = collect(render(plan(false, false))).await;
        assert!(out.starts_with("(function (modules, entries) {"));
        assert!(out.contains("1: [function (require, module, exports) {\nvar b = require('./b');"));
        assert!(out.contains(r#"}, {"./b":2,"fs":null}],"#));
        assert!(out.contains("2: [function (require, module, exports) {\nmodule.exports = 2;\n}, {}],"));
        assert!(out.ends_with("}, [1]);\n"));
    }

    #[tokio::test]
    async fn test_full_path_ids() {
        let out = collect(render(plan(true, false))).await;
        assert!(out.contains(r#""/p/a.js": [function"#));
        assert!(out.contains(r#"{"./b":"/p/b.js","fs":null}"#));
        assert!(out.ends_with("}, [\"/p/a.js\"]);\n"));
    }

    #[tokio::test]
    async fn test_debug_appends_source_map() {
        let out = collect(render(plan(false, true))).await;
        let (_, encoded) = out
            .trim_end()
            .rsplit_once("base64,")
            .expect("source map comment");
        let json = STANDARD.decode(encoded).unwrap();
        let map: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(map["version"], 3);
        assert_eq!(map["sources"][0], "a.js");
        assert_eq!(map["sourcesContent"][1], "module.exports = 2;");

        let without = collect(render(plan(false, false))).await;
        assert!(out.starts_with(without.as_str()));
    }
}
