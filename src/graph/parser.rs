//! Regex-level source parsers.
//!
//! Deliberately approximate: declarations, imports, exports, and inheritance
//! are recognized line-by-line with language-specific patterns. A real parser
//! can replace any language here without changing the graph contract.

use regex::Regex;
use std::sync::LazyLock;

use super::types::NodeKind;

/// Kind of declaration a parser recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKind {
    Function,
    Class,
    Interface,
    Type,
    Variable,
}

impl DeclarationKind {
    pub fn node_kind(self) -> NodeKind {
        match self {
            Self::Function => NodeKind::Function,
            Self::Class => NodeKind::Class,
            Self::Interface => NodeKind::Interface,
            Self::Type => NodeKind::Type,
            Self::Variable => NodeKind::Variable,
        }
    }
}

/// A top-level declaration found in a source file.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: String,
    pub kind: DeclarationKind,
    /// 1-based line of the declaration.
    pub line: usize,
    pub is_exported: bool,
    pub parameters: Vec<String>,
    pub return_type: Option<String>,
    /// Parents this declaration extends/implements.
    pub parents: Vec<String>,
    /// Source text from the declaration to the next top-level declaration.
    pub content: String,
}

/// Parse result for one file.
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub language: Option<&'static str>,
    pub declarations: Vec<Declaration>,
    /// `(module target, line)` pairs.
    pub imports: Vec<(String, usize)>,
    /// `(exported name, line)` pairs.
    pub exports: Vec<(String, usize)>,
}

static TS_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(export\s+)?(default\s+)?(async\s+)?function\s+(\w+)\s*\(([^)]*)\)(\s*:\s*([\w<>\[\]. |]+))?")
        .expect("invalid regex")
});

static TS_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(export\s+)?(default\s+)?(abstract\s+)?class\s+(\w+)(\s+extends\s+([\w.]+))?(\s+implements\s+([\w,\s.]+))?")
        .expect("invalid regex")
});

static TS_INTERFACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(export\s+)?interface\s+(\w+)(\s+extends\s+([\w,\s.]+))?").expect("invalid regex")
});

static TS_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(export\s+)?type\s+(\w+)\s*=").expect("invalid regex"));

static TS_ARROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(export\s+)?(const|let|var)\s+(\w+)\s*=\s*(async\s*)?\(([^)]*)\)\s*(:\s*[\w<>\[\]. |]+\s*)?=>")
        .expect("invalid regex")
});

static TS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^import\s+.*?from\s+['"]([^'"]+)['"]|require\(['"]([^'"]+)['"]\)"#)
        .expect("invalid regex")
});

static TS_EXPORT_NAMES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^export\s+\{([^}]+)\}").expect("invalid regex"));

static PY_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(async\s+)?def\s+(\w+)\s*\(([^)]*)\)(\s*->\s*([^:]+))?:").expect("invalid regex")
});

static PY_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^class\s+(\w+)(\(([^)]*)\))?:").expect("invalid regex"));

static PY_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(from\s+([\w.]+)\s+import|import\s+([\w.]+))").expect("invalid regex")
});

static JAVA_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(public\s+)?(abstract\s+|final\s+)?class\s+(\w+)(\s+extends\s+(\w+))?(\s+implements\s+([\w,\s]+))?")
        .expect("invalid regex")
});

static JAVA_INTERFACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(public\s+)?interface\s+(\w+)(\s+extends\s+([\w,\s]+))?").expect("invalid regex")
});

static JAVA_METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(public|private|protected)\s+(static\s+)?([\w<>\[\]]+)\s+(\w+)\s*\(([^)]*)\)")
        .expect("invalid regex")
});

static JAVA_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^import\s+(static\s+)?([\w.]+);").expect("invalid regex"));

static RUST_FN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(pub(\([^)]*\))?\s+)?(async\s+)?fn\s+(\w+)\s*(<[^>]*>)?\(([^)]*)\)(\s*->\s*([^{]+))?")
        .expect("invalid regex")
});

static RUST_TYPE_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(pub(\([^)]*\))?\s+)?(struct|enum|trait)\s+(\w+)").expect("invalid regex")
});

static RUST_USE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^use\s+([\w:]+)").expect("invalid regex"));

/// Language for a file extension supported by the parsers.
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "ts" | "tsx" => Some("typescript"),
        "js" | "jsx" | "mjs" => Some("javascript"),
        "py" => Some("python"),
        "java" => Some("java"),
        "rs" => Some("rust"),
        _ => None,
    }
}

/// Parse a source file with the parser for its extension.
pub fn parse_source(content: &str, extension: &str) -> ParsedFile {
    let language = language_for_extension(extension);
    let mut parsed = match language {
        Some("typescript") | Some("javascript") => parse_ts(content),
        Some("python") => parse_python(content),
        Some("java") => parse_java(content),
        Some("rust") => parse_rust(content),
        _ => ParsedFile::default(),
    };
    parsed.language = language;
    attach_content(content, &mut parsed);
    parsed
}

/// Fill each declaration's content: its line through the line before the
/// next declaration (or end of file).
fn attach_content(content: &str, parsed: &mut ParsedFile) {
    let lines: Vec<&str> = content.lines().collect();
    let mut starts: Vec<usize> = parsed.declarations.iter().map(|d| d.line - 1).collect();
    starts.push(lines.len());

    for (i, declaration) in parsed.declarations.iter_mut().enumerate() {
        let from = starts[i];
        let to = starts[i + 1].min(lines.len());
        declaration.content = lines[from..to].join("\n");
    }
}

fn parse_params(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|p| p.split(':').next().unwrap_or(p).trim().to_string())
        .filter(|p| !p.is_empty() && p != "self" && p != "&self" && p != "&mut self")
        .collect()
}

fn parse_parents(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty() && p != "object")
        .collect()
}

fn parse_ts(content: &str) -> ParsedFile {
    let mut parsed = ParsedFile::default();

    for (i, line) in content.lines().enumerate() {
        let line_no = i + 1;

        if let Some(caps) = TS_FUNCTION.captures(line) {
            parsed.declarations.push(Declaration {
                name: caps[4].to_string(),
                kind: DeclarationKind::Function,
                line: line_no,
                is_exported: caps.get(1).is_some(),
                parameters: parse_params(&caps[5]),
                return_type: caps.get(7).map(|m| m.as_str().trim().to_string()),
                parents: Vec::new(),
                content: String::new(),
            });
        } else if let Some(caps) = TS_CLASS.captures(line) {
            let mut parents = Vec::new();
            if let Some(parent) = caps.get(6) {
                parents.push(parent.as_str().to_string());
            }
            if let Some(implemented) = caps.get(8) {
                parents.extend(parse_parents(implemented.as_str()));
            }
            parsed.declarations.push(Declaration {
                name: caps[4].to_string(),
                kind: DeclarationKind::Class,
                line: line_no,
                is_exported: caps.get(1).is_some(),
                parameters: Vec::new(),
                return_type: None,
                parents,
                content: String::new(),
            });
        } else if let Some(caps) = TS_INTERFACE.captures(line) {
            parsed.declarations.push(Declaration {
                name: caps[2].to_string(),
                kind: DeclarationKind::Interface,
                line: line_no,
                is_exported: caps.get(1).is_some(),
                parameters: Vec::new(),
                return_type: None,
                parents: caps
                    .get(4)
                    .map(|m| parse_parents(m.as_str()))
                    .unwrap_or_default(),
                content: String::new(),
            });
        } else if let Some(caps) = TS_TYPE.captures(line) {
            parsed.declarations.push(Declaration {
                name: caps[2].to_string(),
                kind: DeclarationKind::Type,
                line: line_no,
                is_exported: caps.get(1).is_some(),
                parameters: Vec::new(),
                return_type: None,
                parents: Vec::new(),
                content: String::new(),
            });
        } else if let Some(caps) = TS_ARROW.captures(line) {
            parsed.declarations.push(Declaration {
                name: caps[3].to_string(),
                kind: DeclarationKind::Function,
                line: line_no,
                is_exported: caps.get(1).is_some(),
                parameters: parse_params(&caps[5]),
                return_type: None,
                parents: Vec::new(),
                content: String::new(),
            });
        }

        if let Some(caps) = TS_IMPORT.captures(line) {
            let target = caps.get(1).or_else(|| caps.get(2));
            if let Some(target) = target {
                parsed.imports.push((target.as_str().to_string(), line_no));
            }
        }
        if let Some(caps) = TS_EXPORT_NAMES.captures(line) {
            for name in caps[1].split(',') {
                let name = name.trim().split_whitespace().next().unwrap_or("");
                if !name.is_empty() {
                    parsed.exports.push((name.to_string(), line_no));
                }
            }
        }
    }

    parsed
}

fn parse_python(content: &str) -> ParsedFile {
    let mut parsed = ParsedFile::default();

    for (i, line) in content.lines().enumerate() {
        let line_no = i + 1;

        if let Some(caps) = PY_DEF.captures(line) {
            parsed.declarations.push(Declaration {
                name: caps[2].to_string(),
                kind: DeclarationKind::Function,
                line: line_no,
                is_exported: !caps[2].starts_with('_'),
                parameters: parse_params(&caps[3]),
                return_type: caps.get(5).map(|m| m.as_str().trim().to_string()),
                parents: Vec::new(),
                content: String::new(),
            });
        } else if let Some(caps) = PY_CLASS.captures(line) {
            parsed.declarations.push(Declaration {
                name: caps[1].to_string(),
                kind: DeclarationKind::Class,
                line: line_no,
                is_exported: !caps[1].starts_with('_'),
                parameters: Vec::new(),
                return_type: None,
                parents: caps
                    .get(3)
                    .map(|m| parse_parents(m.as_str()))
                    .unwrap_or_default(),
                content: String::new(),
            });
        } else if let Some(caps) = PY_IMPORT.captures(line) {
            let target = caps.get(2).or_else(|| caps.get(3));
            if let Some(target) = target {
                parsed.imports.push((target.as_str().to_string(), line_no));
            }
        }
    }

    parsed
}

fn parse_java(content: &str) -> ParsedFile {
    let mut parsed = ParsedFile::default();

    for (i, line) in content.lines().enumerate() {
        let line_no = i + 1;

        if let Some(caps) = JAVA_CLASS.captures(line) {
            let mut parents = Vec::new();
            if let Some(parent) = caps.get(5) {
                parents.push(parent.as_str().to_string());
            }
            if let Some(implemented) = caps.get(7) {
                parents.extend(parse_parents(implemented.as_str()));
            }
            parsed.declarations.push(Declaration {
                name: caps[3].to_string(),
                kind: DeclarationKind::Class,
                line: line_no,
                is_exported: caps.get(1).is_some(),
                parameters: Vec::new(),
                return_type: None,
                parents,
                content: String::new(),
            });
        } else if let Some(caps) = JAVA_INTERFACE.captures(line) {
            parsed.declarations.push(Declaration {
                name: caps[2].to_string(),
                kind: DeclarationKind::Interface,
                line: line_no,
                is_exported: caps.get(1).is_some(),
                parameters: Vec::new(),
                return_type: None,
                parents: caps
                    .get(4)
                    .map(|m| parse_parents(m.as_str()))
                    .unwrap_or_default(),
                content: String::new(),
            });
        } else if let Some(caps) = JAVA_METHOD.captures(line) {
            parsed.declarations.push(Declaration {
                name: caps[4].to_string(),
                kind: DeclarationKind::Function,
                line: line_no,
                is_exported: &caps[1] == "public",
                parameters: parse_params(&caps[5]),
                return_type: Some(caps[3].to_string()),
                parents: Vec::new(),
                content: String::new(),
            });
        } else if let Some(caps) = JAVA_IMPORT.captures(line) {
            parsed.imports.push((caps[2].to_string(), line_no));
        }
    }

    parsed
}

fn parse_rust(content: &str) -> ParsedFile {
    let mut parsed = ParsedFile::default();

    for (i, line) in content.lines().enumerate() {
        let line_no = i + 1;

        if let Some(caps) = RUST_FN.captures(line) {
            parsed.declarations.push(Declaration {
                name: caps[4].to_string(),
                kind: DeclarationKind::Function,
                line: line_no,
                is_exported: caps.get(1).is_some(),
                parameters: parse_params(&caps[6]),
                return_type: caps.get(8).map(|m| m.as_str().trim().to_string()),
                parents: Vec::new(),
                content: String::new(),
            });
        } else if let Some(caps) = RUST_TYPE_DECL.captures(line) {
            let kind = match &caps[3] {
                "trait" => DeclarationKind::Interface,
                _ => DeclarationKind::Class,
            };
            parsed.declarations.push(Declaration {
                name: caps[4].to_string(),
                kind,
                line: line_no,
                is_exported: caps.get(1).is_some(),
                parameters: Vec::new(),
                return_type: None,
                parents: Vec::new(),
                content: String::new(),
            });
        } else if let Some(caps) = RUST_USE.captures(line) {
            parsed.imports.push((caps[1].to_string(), line_no));
        }
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ts_function_and_class() {
        let source = r#"import { thing } from './thing';

export function handleRequest(req: Request): Response {
  return process(req);
}

export class Controller extends BaseController implements Disposable {
  run() {}
}

const helper = (x: number) => x * 2;
"#;
        let parsed = parse_source(source, "ts");
        assert_eq!(parsed.language, Some("typescript"));
        assert_eq!(parsed.imports, vec![("./thing".to_string(), 1)]);
        assert_eq!(parsed.declarations.len(), 3);

        let function = &parsed.declarations[0];
        assert_eq!(function.name, "handleRequest");
        assert!(function.is_exported);
        assert_eq!(function.parameters, vec!["req"]);
        assert_eq!(function.return_type.as_deref(), Some("Response"));
        assert!(function.content.contains("process(req)"));

        let class = &parsed.declarations[1];
        assert_eq!(class.name, "Controller");
        assert_eq!(class.parents, vec!["BaseController", "Disposable"]);

        assert_eq!(parsed.declarations[2].name, "helper");
    }

    #[test]
    fn test_parse_python() {
        let source = "import os\nfrom pathlib import Path\n\nclass Walker(Base):\n    pass\n\ndef walk(root):\n    return []\n\ndef _private():\n    pass\n";
        let parsed = parse_source(source, "py");
        assert_eq!(parsed.imports.len(), 2);
        assert_eq!(parsed.declarations.len(), 3);
        assert_eq!(parsed.declarations[0].name, "Walker");
        assert_eq!(parsed.declarations[0].parents, vec!["Base"]);
        assert!(parsed.declarations[1].is_exported);
        assert!(!parsed.declarations[2].is_exported);
    }

    #[test]
    fn test_parse_java() {
        let source = "import java.util.List;\n\npublic class Service extends Base implements Runnable {\n    public void run() {\n    }\n}\n";
        let parsed = parse_source(source, "java");
        assert_eq!(parsed.imports, vec![("java.util.List".to_string(), 1)]);
        assert_eq!(parsed.declarations[0].name, "Service");
        assert_eq!(parsed.declarations[0].parents, vec!["Base", "Runnable"]);
        assert_eq!(parsed.declarations[1].name, "run");
    }

    #[test]
    fn test_parse_rust() {
        let source = "use std::fs;\n\npub struct Engine;\n\npub fn start(config: &Config) -> Result<()> {\n    Ok(())\n}\n";
        let parsed = parse_source(source, "rs");
        assert_eq!(parsed.imports, vec![("std::fs".to_string(), 1)]);
        assert_eq!(parsed.declarations.len(), 2);
        assert_eq!(parsed.declarations[0].name, "Engine");
        assert_eq!(parsed.declarations[1].name, "start");
        assert_eq!(parsed.declarations[1].parameters, vec!["config"]);
    }

    #[test]
    fn test_unknown_extension_yields_empty() {
        let parsed = parse_source("whatever", "bin");
        assert!(parsed.declarations.is_empty());
        assert!(parsed.language.is_none());
    }
}
