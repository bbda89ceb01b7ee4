/// Code Metrics Analyzer - structural features of a submission
///
/// **Critical Properties:**
/// - Pure: same source, same counts, no I/O
/// - Total: a submission that does not parse yields zero counts, never
///   an error
///
/// Counts one per function definition and one per distinct name first
/// introduced by an assignment target, a tuple-unpacking target, or a
/// loop-control variable. All bindings share one flat namespace
/// regardless of nesting; a function-local `x` and a module-level `x`
/// count once, so the metric is a rough proxy for vocabulary size
/// rather than true scoping.
use std::collections::HashSet;

use codelab_common::types::CodeMetrics;
use rustpython_parser::{ast, Parse};

pub fn analyze(source: &str) -> CodeMetrics {
    let suite = match ast::Suite::parse(source, "<submission>") {
        Ok(suite) => suite,
        Err(_) => return CodeMetrics::default(),
    };

    let mut counter = Counter::default();
    counter.visit_body(&suite);

    CodeMetrics {
        variable_count: counter.seen_names.len() as u32,
        function_count: counter.function_count,
    }
}

#[derive(Default)]
struct Counter {
    seen_names: HashSet<String>,
    function_count: u32,
}

impl Counter {
    fn visit_body(&mut self, body: &[ast::Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &ast::Stmt) {
        match stmt {
            ast::Stmt::FunctionDef(def) => {
                self.function_count += 1;
                self.visit_body(&def.body);
            }
            ast::Stmt::AsyncFunctionDef(def) => {
                self.function_count += 1;
                self.visit_body(&def.body);
            }
            ast::Stmt::ClassDef(def) => self.visit_body(&def.body),
            ast::Stmt::Assign(assign) => {
                for target in &assign.targets {
                    self.bind_target(target);
                }
            }
            ast::Stmt::For(stmt) => {
                self.bind_target(&stmt.target);
                self.visit_body(&stmt.body);
                self.visit_body(&stmt.orelse);
            }
            ast::Stmt::AsyncFor(stmt) => {
                self.bind_target(&stmt.target);
                self.visit_body(&stmt.body);
                self.visit_body(&stmt.orelse);
            }
            ast::Stmt::While(stmt) => {
                self.visit_body(&stmt.body);
                self.visit_body(&stmt.orelse);
            }
            ast::Stmt::If(stmt) => {
                self.visit_body(&stmt.body);
                self.visit_body(&stmt.orelse);
            }
            ast::Stmt::With(stmt) => self.visit_body(&stmt.body),
            ast::Stmt::AsyncWith(stmt) => self.visit_body(&stmt.body),
            ast::Stmt::Try(stmt) => {
                self.visit_body(&stmt.body);
                for handler in &stmt.handlers {
                    let ast::ExceptHandler::ExceptHandler(handler) = handler;
                    self.visit_body(&handler.body);
                }
                self.visit_body(&stmt.orelse);
                self.visit_body(&stmt.finalbody);
            }
            ast::Stmt::TryStar(stmt) => {
                self.visit_body(&stmt.body);
                for handler in &stmt.handlers {
                    let ast::ExceptHandler::ExceptHandler(handler) = handler;
                    self.visit_body(&handler.body);
                }
                self.visit_body(&stmt.orelse);
                self.visit_body(&stmt.finalbody);
            }
            ast::Stmt::Match(stmt) => {
                for case in &stmt.cases {
                    self.visit_body(&case.body);
                }
            }
            _ => {}
        }
    }

    /// Direct names and tuple-unpacked names bind; anything else
    /// (subscripts, attributes, starred targets) does not count.
    fn bind_target(&mut self, target: &ast::Expr) {
        match target {
            ast::Expr::Name(name) => {
                self.seen_names.insert(name.id.to_string());
            }
            ast::Expr::Tuple(tuple) => {
                for element in &tuple.elts {
                    if let ast::Expr::Name(name) = element {
                        self.seen_names.insert(name.id.to_string());
                    }
                }
            }
            _ => {}
        }
    }
}
