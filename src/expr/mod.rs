// Purpose: Define the restricted expression language embedded in templates.
// Inputs/Outputs: Parses expression/code-block text into trees and reports the
//   identifiers each tree reads and writes for the scope analyzer.
// Invariants: The subset stays side-effect free apart from code-block
//   assignments; evaluation lives with the runtime interpreter.
// Gotchas: Identifier sets are in BTreeSet order on purpose; prologue
//   emission order is derived from them and must be deterministic.

pub mod lexer;
pub mod parser;

use std::collections::BTreeSet;

pub use parser::{parse_code_text, parse_expr_text, parse_expr_with_escapes};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    NotEq,
    Add,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<Expr>),
    Name(String),
    Attr {
        base: Box<Expr>,
        name: String,
    },
    Index {
        base: Box<Expr>,
        key: Box<Expr>,
    },
    Call {
        target: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    /// Collect every identifier this expression reads.
    pub fn collect_reads(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Str(_) | Expr::Int(_) | Expr::Bool(_) => {}
            Expr::List(items) => {
                for item in items {
                    item.collect_reads(out);
                }
            }
            Expr::Name(name) => {
                out.insert(name.clone());
            }
            Expr::Attr { base, .. } => base.collect_reads(out),
            Expr::Index { base, key } => {
                base.collect_reads(out);
                key.collect_reads(out);
            }
            Expr::Call {
                target,
                args,
                kwargs,
            } => {
                target.collect_reads(out);
                for arg in args {
                    arg.collect_reads(out);
                }
                for (_, value) in kwargs {
                    value.collect_reads(out);
                }
            }
            Expr::Binary { left, right, .. } => {
                left.collect_reads(out);
                right.collect_reads(out);
            }
        }
    }

    pub fn reads(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_reads(&mut out);
        out
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CodeStmt {
    Assign { name: String, value: Expr },
    Expr(Expr),
}

/// An embedded code block: opaque to the template grammar, a statement list
/// to the evaluator.
#[derive(Clone, Debug, PartialEq)]
pub struct CodeBlock {
    pub stmts: Vec<CodeStmt>,
    pub source: String,
}

impl CodeBlock {
    /// Identifiers read before the block itself assigns them.
    pub fn reads(&self) -> BTreeSet<String> {
        let mut written = BTreeSet::new();
        let mut reads = BTreeSet::new();
        for stmt in &self.stmts {
            let expr = match stmt {
                CodeStmt::Assign { value, .. } => value,
                CodeStmt::Expr(expr) => expr,
            };
            for name in expr.reads() {
                if !written.contains(&name) {
                    reads.insert(name);
                }
            }
            if let CodeStmt::Assign { name, .. } = stmt {
                written.insert(name.clone());
            }
        }
        reads
    }

    /// Identifiers the block assigns.
    pub fn writes(&self) -> BTreeSet<String> {
        self.stmts
            .iter()
            .filter_map(|stmt| match stmt {
                CodeStmt::Assign { name, .. } => Some(name.clone()),
                CodeStmt::Expr(_) => None,
            })
            .collect()
    }
}
