//! Tree-sitter outlines for the languages the source map understands.

use jacob_core::source_map::{OutlineKind, OutlineSymbol};
use std::cell::RefCell;
use std::path::Path;
use tree_sitter::{Node, Parser};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Rust,
    JavaScript,
    TypeScript,
    Python,
    Go,
    Unknown,
}

impl Language {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "rs" => Language::Rust,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "tsx" | "mts" | "cts" => Language::TypeScript,
            "py" | "pyi" => Language::Python,
            "go" => Language::Go,
            _ => Language::Unknown,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Language::from_extension)
            .unwrap_or(Language::Unknown)
    }
}

// One parser per language per rayon worker.
thread_local! {
    static RUST_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_rust::LANGUAGE.into());
        p
    });

    static JS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_javascript::LANGUAGE.into());
        p
    });

    static TS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into());
        p
    });

    static TSX_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TSX.into());
        p
    });

    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });

    static GO_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_go::LANGUAGE.into());
        p
    });
}

fn parse_with_pooled_parser(
    content: &str,
    language: Language,
    path: &Path,
) -> anyhow::Result<tree_sitter::Tree> {
    let parse_result = match language {
        Language::Rust => RUST_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::JavaScript => JS_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::TypeScript => {
            let use_tsx = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("tsx"));
            if use_tsx {
                TSX_PARSER.with(|p| p.borrow_mut().parse(content, None))
            } else {
                TS_PARSER.with(|p| p.borrow_mut().parse(content, None))
            }
        }
        Language::Python => PYTHON_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::Go => GO_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::Unknown => return Err(anyhow::anyhow!("Unknown language")),
    };

    parse_result.ok_or_else(|| anyhow::anyhow!("Failed to parse {}", path.display()))
}

fn node_text<'a>(node: &Node, content: &'a str) -> &'a str {
    content.get(node.start_byte()..node.end_byte()).unwrap_or_default()
}

fn named(kind: OutlineKind, node: &Node, content: &str) -> Option<OutlineSymbol> {
    let name = node.child_by_field_name("name")?;
    let name = node_text(&name, content).trim();
    (!name.is_empty()).then(|| OutlineSymbol {
        kind,
        name: name.to_string(),
        line: node.start_position().row + 1,
    })
}

/// Top-level declarations of a file, in source order.
pub fn outline_file(path: &Path, content: &str) -> anyhow::Result<Vec<OutlineSymbol>> {
    let language = Language::from_path(path);
    if language == Language::Unknown {
        return Ok(Vec::new());
    }
    let tree = parse_with_pooled_parser(content, language, path)?;
    let root = tree.root_node();
    let mut symbols = Vec::new();

    let mut cursor = root.walk();
    for node in root.named_children(&mut cursor) {
        match language {
            Language::JavaScript | Language::TypeScript => js_symbols(&node, content, &mut symbols),
            Language::Rust => rust_symbols(&node, content, &mut symbols),
            Language::Python => python_symbols(&node, content, &mut symbols),
            Language::Go => go_symbols(&node, content, &mut symbols),
            Language::Unknown => {}
        }
    }
    Ok(symbols)
}

fn js_symbols(node: &Node, content: &str, out: &mut Vec<OutlineSymbol>) {
    match node.kind() {
        "export_statement" => {
            if let Some(decl) = node.child_by_field_name("declaration") {
                js_symbols(&decl, content, out);
            }
        }
        "function_declaration" | "generator_function_declaration" => {
            out.extend(named(OutlineKind::Function, node, content));
        }
        "class_declaration" | "abstract_class_declaration" => {
            out.extend(named(OutlineKind::Class, node, content));
        }
        "interface_declaration" => out.extend(named(OutlineKind::Interface, node, content)),
        "type_alias_declaration" => out.extend(named(OutlineKind::Type, node, content)),
        "enum_declaration" => out.extend(named(OutlineKind::Enum, node, content)),
        "lexical_declaration" | "variable_declaration" => {
            let mut cursor = node.walk();
            for declarator in node.named_children(&mut cursor) {
                if declarator.kind() != "variable_declarator" {
                    continue;
                }
                let is_function = declarator
                    .child_by_field_name("value")
                    .is_some_and(|v| matches!(v.kind(), "arrow_function" | "function_expression" | "function"));
                let kind = if is_function {
                    OutlineKind::Function
                } else {
                    OutlineKind::Constant
                };
                out.extend(named(kind, &declarator, content));
            }
        }
        _ => {}
    }
}

fn rust_symbols(node: &Node, content: &str, out: &mut Vec<OutlineSymbol>) {
    let kind = match node.kind() {
        "function_item" => OutlineKind::Function,
        "struct_item" => OutlineKind::Struct,
        "enum_item" => OutlineKind::Enum,
        "trait_item" => OutlineKind::Trait,
        "mod_item" => OutlineKind::Module,
        "const_item" | "static_item" => OutlineKind::Constant,
        "type_item" => OutlineKind::Type,
        "impl_item" => {
            let Some(body) = node.child_by_field_name("body") else {
                return;
            };
            let mut cursor = body.walk();
            for item in body.named_children(&mut cursor) {
                if item.kind() == "function_item" {
                    out.extend(named(OutlineKind::Method, &item, content));
                }
            }
            return;
        }
        _ => return,
    };
    out.extend(named(kind, node, content));
}

fn python_symbols(node: &Node, content: &str, out: &mut Vec<OutlineSymbol>) {
    match node.kind() {
        "function_definition" => out.extend(named(OutlineKind::Function, node, content)),
        "class_definition" => out.extend(named(OutlineKind::Class, node, content)),
        "decorated_definition" => {
            if let Some(def) = node.child_by_field_name("definition") {
                python_symbols(&def, content, out);
            }
        }
        _ => {}
    }
}

fn go_symbols(node: &Node, content: &str, out: &mut Vec<OutlineSymbol>) {
    match node.kind() {
        "function_declaration" => out.extend(named(OutlineKind::Function, node, content)),
        "method_declaration" => out.extend(named(OutlineKind::Method, node, content)),
        "type_declaration" => {
            let mut cursor = node.walk();
            for spec in node.named_children(&mut cursor) {
                if spec.kind() == "type_spec" {
                    out.extend(named(OutlineKind::Type, &spec, content));
                }
            }
        }
        _ => {}
    }
}

/// Source text of every exported or top-level `type`/`interface`/`enum`
/// declaration in a TypeScript file.
pub fn type_declarations(path: &Path, content: &str) -> anyhow::Result<Vec<String>> {
    if Language::from_path(path) != Language::TypeScript {
        return Ok(Vec::new());
    }
    let tree = parse_with_pooled_parser(content, Language::TypeScript, path)?;
    let root = tree.root_node();
    let mut out = Vec::new();
    let mut cursor = root.walk();
    for node in root.named_children(&mut cursor) {
        let decl = if node.kind() == "export_statement" {
            node.child_by_field_name("declaration")
        } else {
            Some(node)
        };
        let Some(decl) = decl else {
            continue;
        };
        if matches!(
            decl.kind(),
            "type_alias_declaration" | "interface_declaration" | "enum_declaration"
        ) {
            out.push(node_text(&node, content).to_string());
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(symbols: &[OutlineSymbol]) -> Vec<(OutlineKind, &str)> {
        symbols.iter().map(|s| (s.kind, s.name.as_str())).collect()
    }

    #[test]
    fn test_typescript_outline() {
        let src = "import x from 'x';\nexport function startServer() {}\nexport const handler = () => 1;\nconst PORT = 3000;\nexport interface Health { status: string }\nclass App {}\n";
        let symbols = outline_file(Path::new("src/server.ts"), src).unwrap();
        assert_eq!(
            names(&symbols),
            vec![
                (OutlineKind::Function, "startServer"),
                (OutlineKind::Function, "handler"),
                (OutlineKind::Constant, "PORT"),
                (OutlineKind::Interface, "Health"),
                (OutlineKind::Class, "App"),
            ]
        );
        assert_eq!(symbols[0].line, 2);
    }

    #[test]
    fn test_rust_outline_includes_impl_methods() {
        let src = "pub struct Server;\nimpl Server {\n    pub fn start(&self) {}\n}\nfn main() {}\n";
        let symbols = outline_file(Path::new("src/main.rs"), src).unwrap();
        assert_eq!(
            names(&symbols),
            vec![
                (OutlineKind::Struct, "Server"),
                (OutlineKind::Method, "start"),
                (OutlineKind::Function, "main"),
            ]
        );
    }

    #[test]
    fn test_python_and_go_outlines() {
        let py = "@app.get('/')\ndef index():\n    pass\n\nclass Model:\n    pass\n";
        assert_eq!(
            names(&outline_file(Path::new("app.py"), py).unwrap()),
            vec![(OutlineKind::Function, "index"), (OutlineKind::Class, "Model")]
        );

        let go = "package main\n\ntype Server struct{}\n\nfunc (s *Server) Start() {}\n\nfunc main() {}\n";
        assert_eq!(
            names(&outline_file(Path::new("main.go"), go).unwrap()),
            vec![
                (OutlineKind::Type, "Server"),
                (OutlineKind::Method, "Start"),
                (OutlineKind::Function, "main"),
            ]
        );
    }

    #[test]
    fn test_type_declarations() {
        let src = "export type Id = string;\ninterface User { id: Id }\nexport function f() {}\n";
        let decls = type_declarations(Path::new("src/types.ts"), src).unwrap();
        assert_eq!(decls, vec!["export type Id = string;", "interface User { id: Id }"]);
        assert!(type_declarations(Path::new("a.rs"), "struct A;").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_language_has_no_symbols() {
        assert!(outline_file(Path::new("README.md"), "# hi").unwrap().is_empty());
    }
}
