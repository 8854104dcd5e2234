// SPDX-License-Identifier: AGPL-3.0

//! JSON-deserializable AST for the supported Python subset.
//!
//! Input arrives shaped like Python's own `ast` module: every node carries a
//! `kind` discriminator and a `loc: {line, col}`. Rather than deriving
//! `Deserialize` on a tagged enum (which would fail the whole parse on the
//! first node outside the supported subset with an opaque serde error), this
//! crate walks the raw `serde_json::Value` tree by hand and reports the
//! unsupported node's kind and position through
//! `SymError::UnsupportedAst`, exactly as the engine's boundary contract
//! requires.

use serde_json::Value as Json;

pub use symex_exceptions::SourceLoc;
use symex_exceptions::{SymError, SymResult};
use symex_values::BinOpKind;

/// A chained comparison operator (`Compare`'s `ops` list).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Eq,
    NotEq,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOpKind {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOpKind {
    Neg,
    Pos,
    Not,
}

/// A `Num` literal, kept as the two Python literal shapes rather than
/// pre-collapsed to `f64`, since `1` and `1.0` take different `Value` sorts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumLiteral {
    Int(i64),
    Real(f64),
}

/// A formal parameter, with its optional default value expression.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

/// A `name=value` call argument.
#[derive(Debug, Clone)]
pub struct Keyword {
    pub name: String,
    pub value: Expr,
}

/// A `Subscript`'s index, either a single expression or a `lower:upper` slice.
#[derive(Debug, Clone)]
pub enum Slice {
    Index(Box<Expr>),
    Range {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone)]
pub enum Expr {
    BinOp {
        op: BinOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
        loc: SourceLoc,
    },
    UnaryOp {
        op: UnaryOpKind,
        operand: Box<Expr>,
        loc: SourceLoc,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
        loc: SourceLoc,
    },
    BoolOp {
        op: BoolOpKind,
        values: Vec<Expr>,
        loc: SourceLoc,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
        loc: SourceLoc,
    },
    Name {
        id: String,
        loc: SourceLoc,
    },
    Num {
        value: NumLiteral,
        loc: SourceLoc,
    },
    Str {
        value: String,
        loc: SourceLoc,
    },
    List {
        elements: Vec<Expr>,
        loc: SourceLoc,
    },
    Subscript {
        value: Box<Expr>,
        slice: Slice,
        loc: SourceLoc,
    },
    /// `[element for target in iter]`. Only a single generator clause and no
    /// `if` filters are supported; anything richer is `UnsupportedAst`.
    ListComp {
        element: Box<Expr>,
        target: String,
        iter: Box<Expr>,
        loc: SourceLoc,
    },
}

impl Expr {
    pub fn loc(&self) -> SourceLoc {
        match self {
            Expr::BinOp { loc, .. }
            | Expr::UnaryOp { loc, .. }
            | Expr::Compare { loc, .. }
            | Expr::BoolOp { loc, .. }
            | Expr::Call { loc, .. }
            | Expr::Name { loc, .. }
            | Expr::Num { loc, .. }
            | Expr::Str { loc, .. }
            | Expr::List { loc, .. }
            | Expr::Subscript { loc, .. }
            | Expr::ListComp { loc, .. } => *loc,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Stmt {
    /// Single-target assignment (`x = value`). Tuple/attribute targets are
    /// outside the supported subset.
    Assign {
        target: String,
        value: Expr,
        loc: SourceLoc,
    },
    AugAssign {
        target: String,
        op: BinOpKind,
        value: Expr,
        loc: SourceLoc,
    },
    FunctionDef {
        name: String,
        params: Vec<Param>,
        body: Vec<Stmt>,
        loc: SourceLoc,
    },
    /// An expression evaluated for effect and discarded (e.g. a bare call).
    Expr {
        value: Expr,
        loc: SourceLoc,
    },
    Pass {
        loc: SourceLoc,
    },
    Return {
        value: Option<Expr>,
        loc: SourceLoc,
    },
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        loc: SourceLoc,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        loc: SourceLoc,
    },
    Break {
        loc: SourceLoc,
    },
}

impl Stmt {
    pub fn loc(&self) -> SourceLoc {
        match self {
            Stmt::Assign { loc, .. }
            | Stmt::AugAssign { loc, .. }
            | Stmt::FunctionDef { loc, .. }
            | Stmt::Expr { loc, .. }
            | Stmt::Pass { loc, .. }
            | Stmt::Return { loc, .. }
            | Stmt::If { loc, .. }
            | Stmt::While { loc, .. }
            | Stmt::Break { loc, .. } => *loc,
        }
    }
}

/// A whole program: a flat list of top-level statements. Function bodies
/// nest their own statement lists; there is no separate module wrapper type
/// because nothing in the supported subset hangs off one.
pub type Program = Vec<Stmt>;

/// Parses a JSON document shaped `{"body": [<stmt>, ...]}` into a `Program`.
pub fn parse_program(source: &str) -> SymResult<Program> {
    let value: Json = serde_json::from_str(source).map_err(|e| {
        SymError::UnsupportedAst {
            kind: format!("invalid json: {e}"),
            loc: SourceLoc::default(),
        }
    })?;
    let body = field(&value, "body")?;
    let stmts = body.as_array().ok_or_else(|| {
        SymError::UnsupportedAst {
            kind: "program body must be an array".to_string(),
            loc: SourceLoc::default(),
        }
    })?;
    stmts.iter().map(stmt_from_json).collect()
}

fn loc_of(v: &Json) -> SourceLoc {
    v.get("loc")
        .map(|l| SourceLoc::new(as_u32(l.get("line")), as_u32(l.get("col"))))
        .unwrap_or_default()
}

fn as_u32(v: Option<&Json>) -> u32 {
    v.and_then(Json::as_u64).unwrap_or(0) as u32
}

fn kind_of(v: &Json) -> &str {
    v.get("kind").and_then(Json::as_str).unwrap_or("")
}

fn unsupported(v: &Json) -> SymError {
    SymError::UnsupportedAst {
        kind: kind_of(v).to_string(),
        loc: loc_of(v),
    }
}

fn field<'a>(v: &'a Json, name: &str) -> SymResult<&'a Json> {
    v.get(name).ok_or_else(|| {
        SymError::Internal(format!("AST node `{}` missing field `{name}`", kind_of(v)))
    })
}

fn str_field(v: &Json, name: &str) -> SymResult<String> {
    field(v, name)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| SymError::Internal(format!("field `{name}` is not a string")))
}

fn stmt_array(v: &Json, name: &str) -> SymResult<Vec<Stmt>> {
    match v.get(name) {
        None => Ok(Vec::new()),
        Some(arr) => arr
            .as_array()
            .ok_or_else(|| SymError::Internal(format!("field `{name}` is not an array")))?
            .iter()
            .map(stmt_from_json)
            .collect(),
    }
}

fn expr_array(v: &Json, name: &str) -> SymResult<Vec<Expr>> {
    field(v, name)?
        .as_array()
        .ok_or_else(|| SymError::Internal(format!("field `{name}` is not an array")))?
        .iter()
        .map(expr_from_json)
        .collect()
}

fn binop_kind(op: &str, v: &Json) -> SymResult<BinOpKind> {
    Ok(match op {
        "+" => BinOpKind::Add,
        "-" => BinOpKind::Sub,
        "*" => BinOpKind::Mul,
        "/" => BinOpKind::Div,
        "%" => BinOpKind::Mod,
        "**" => BinOpKind::Pow,
        "^" => BinOpKind::BitXor,
        "&" => BinOpKind::BitAnd,
        "|" => BinOpKind::BitOr,
        "<<" => BinOpKind::Shl,
        ">>" => BinOpKind::Shr,
        _ => return Err(unsupported(v)),
    })
}

fn cmp_op(op: &str, v: &Json) -> SymResult<CmpOp> {
    Ok(match op {
        "<" => CmpOp::Lt,
        "<=" => CmpOp::Le,
        "==" => CmpOp::Eq,
        "!=" => CmpOp::NotEq,
        ">" => CmpOp::Gt,
        ">=" => CmpOp::Ge,
        _ => return Err(unsupported(v)),
    })
}

fn stmt_from_json(v: &Json) -> SymResult<Stmt> {
    let loc = loc_of(v);
    match kind_of(v) {
        "Assign" => Ok(Stmt::Assign {
            target: str_field(v, "target")?,
            value: expr_from_json(field(v, "value")?)?,
            loc,
        }),
        "AugAssign" => Ok(Stmt::AugAssign {
            target: str_field(v, "target")?,
            op: binop_kind(&str_field(v, "op")?, v)?,
            value: expr_from_json(field(v, "value")?)?,
            loc,
        }),
        "FunctionDef" => {
            let params = match v.get("params") {
                None => Vec::new(),
                Some(arr) => arr
                    .as_array()
                    .ok_or_else(|| SymError::Internal("field `params` is not an array".to_string()))?
                    .iter()
                    .map(|p| {
                        Ok(Param {
                            name: str_field(p, "name")?,
                            default: match p.get("default") {
                                None | Some(Json::Null) => None,
                                Some(d) => Some(expr_from_json(d)?),
                            },
                        })
                    })
                    .collect::<SymResult<Vec<_>>>()?,
            };
            Ok(Stmt::FunctionDef {
                name: str_field(v, "name")?,
                params,
                body: stmt_array(v, "body")?,
                loc,
            })
        }
        "Expr" => Ok(Stmt::Expr {
            value: expr_from_json(field(v, "value")?)?,
            loc,
        }),
        "Pass" => Ok(Stmt::Pass { loc }),
        "Return" => Ok(Stmt::Return {
            value: match v.get("value") {
                None | Some(Json::Null) => None,
                Some(e) => Some(expr_from_json(e)?),
            },
            loc,
        }),
        "If" => Ok(Stmt::If {
            test: expr_from_json(field(v, "test")?)?,
            body: stmt_array(v, "body")?,
            orelse: stmt_array(v, "orelse")?,
            loc,
        }),
        "While" => Ok(Stmt::While {
            test: expr_from_json(field(v, "test")?)?,
            body: stmt_array(v, "body")?,
            orelse: stmt_array(v, "orelse")?,
            loc,
        }),
        "Break" => Ok(Stmt::Break { loc }),
        _ => Err(unsupported(v)),
    }
}

fn expr_from_json(v: &Json) -> SymResult<Expr> {
    let loc = loc_of(v);
    match kind_of(v) {
        "BinOp" => Ok(Expr::BinOp {
            op: binop_kind(&str_field(v, "op")?, v)?,
            left: Box::new(expr_from_json(field(v, "left")?)?),
            right: Box::new(expr_from_json(field(v, "right")?)?),
            loc,
        }),
        "UnaryOp" => {
            let op = match str_field(v, "op")?.as_str() {
                "-" => UnaryOpKind::Neg,
                "+" => UnaryOpKind::Pos,
                "not" => UnaryOpKind::Not,
                _ => return Err(unsupported(v)),
            };
            Ok(Expr::UnaryOp {
                op,
                operand: Box::new(expr_from_json(field(v, "operand")?)?),
                loc,
            })
        }
        "Compare" => {
            let ops_json = field(v, "ops")?
                .as_array()
                .ok_or_else(|| SymError::Internal("field `ops` is not an array".to_string()))?;
            let ops = ops_json
                .iter()
                .map(|o| {
                    let s = o
                        .as_str()
                        .ok_or_else(|| SymError::Internal("comparison op is not a string".to_string()))?;
                    cmp_op(s, v)
                })
                .collect::<SymResult<Vec<_>>>()?;
            Ok(Expr::Compare {
                left: Box::new(expr_from_json(field(v, "left")?)?),
                ops,
                comparators: expr_array(v, "comparators")?,
                loc,
            })
        }
        "BoolOp" => {
            let op = match str_field(v, "op")?.as_str() {
                "and" => BoolOpKind::And,
                "or" => BoolOpKind::Or,
                _ => return Err(unsupported(v)),
            };
            Ok(Expr::BoolOp {
                op,
                values: expr_array(v, "values")?,
                loc,
            })
        }
        "Call" => {
            let keywords = match v.get("keywords") {
                None => Vec::new(),
                Some(arr) => arr
                    .as_array()
                    .ok_or_else(|| SymError::Internal("field `keywords` is not an array".to_string()))?
                    .iter()
                    .map(|k| {
                        Ok(Keyword {
                            name: str_field(k, "name")?,
                            value: expr_from_json(field(k, "value")?)?,
                        })
                    })
                    .collect::<SymResult<Vec<_>>>()?,
            };
            Ok(Expr::Call {
                func: Box::new(expr_from_json(field(v, "func")?)?),
                args: match v.get("args") {
                    None => Vec::new(),
                    Some(_) => expr_array(v, "args")?,
                },
                keywords,
                loc,
            })
        }
        "Name" => Ok(Expr::Name {
            id: str_field(v, "id")?,
            loc,
        }),
        "Num" => {
            let raw = field(v, "value")?;
            let value = if let Some(i) = raw.as_i64() {
                NumLiteral::Int(i)
            } else if let Some(f) = raw.as_f64() {
                NumLiteral::Real(f)
            } else {
                return Err(SymError::Internal("`Num` value is not numeric".to_string()));
            };
            Ok(Expr::Num { value, loc })
        }
        "Str" => Ok(Expr::Str {
            value: str_field(v, "value")?,
            loc,
        }),
        "List" => Ok(Expr::List {
            elements: expr_array(v, "elements")?,
            loc,
        }),
        "Subscript" => {
            let value = Box::new(expr_from_json(field(v, "value")?)?);
            let slice_json = field(v, "slice")?;
            let slice = match kind_of(slice_json) {
                "Index" => Slice::Index(Box::new(expr_from_json(field(slice_json, "value")?)?)),
                "Slice" => Slice::Range {
                    lower: match slice_json.get("lower") {
                        None | Some(Json::Null) => None,
                        Some(e) => Some(Box::new(expr_from_json(e)?)),
                    },
                    upper: match slice_json.get("upper") {
                        None | Some(Json::Null) => None,
                        Some(e) => Some(Box::new(expr_from_json(e)?)),
                    },
                },
                _ => return Err(unsupported(slice_json)),
            };
            Ok(Expr::Subscript { value, slice, loc })
        }
        "ListComp" => {
            let generators = field(v, "generators")?
                .as_array()
                .ok_or_else(|| SymError::Internal("field `generators` is not an array".to_string()))?;
            if generators.len() != 1 {
                return Err(SymError::UnsupportedAst {
                    kind: "ListComp with multiple or zero generators".to_string(),
                    loc,
                });
            }
            let generator = &generators[0];
            if generator.get("ifs").and_then(Json::as_array).map_or(false, |ifs| !ifs.is_empty()) {
                return Err(SymError::UnsupportedAst {
                    kind: "ListComp with `if` filters".to_string(),
                    loc,
                });
            }
            Ok(Expr::ListComp {
                element: Box::new(expr_from_json(field(v, "element")?)?),
                target: str_field(generator, "target")?,
                iter: Box::new(expr_from_json(field(generator, "iter")?)?),
                loc,
            })
        }
        _ => Err(unsupported(v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_assignment() {
        let program = parse_program(
            r#"{"body": [{"kind": "Assign", "target": "x", "value": {"kind": "Num", "value": 1}}]}"#,
        )
        .unwrap();
        assert_eq!(program.len(), 1);
        match &program[0] {
            Stmt::Assign { target, value, .. } => {
                assert_eq!(target, "x");
                assert!(matches!(value, Expr::Num { value: NumLiteral::Int(1), .. }));
            }
            other => panic!("unexpected statement: {other:?}"),
        }
    }

    #[test]
    fn rejects_unsupported_node_kind_with_location() {
        let err = parse_program(
            r#"{"body": [{"kind": "Lambda", "loc": {"line": 4, "col": 8}}]}"#,
        )
        .unwrap_err();
        match err {
            SymError::UnsupportedAst { kind, loc } => {
                assert_eq!(kind, "Lambda");
                assert_eq!(loc, SourceLoc::new(4, 8));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parses_while_with_orelse_and_break() {
        let program = parse_program(
            r#"{"body": [{
                "kind": "While",
                "test": {"kind": "Name", "id": "cond"},
                "body": [{"kind": "Break"}],
                "orelse": [{"kind": "Pass"}]
            }]}"#,
        )
        .unwrap();
        match &program[0] {
            Stmt::While { body, orelse, .. } => {
                assert!(matches!(body[0], Stmt::Break { .. }));
                assert!(matches!(orelse[0], Stmt::Pass { .. }));
            }
            other => panic!("unexpected statement: {other:?}"),
        }
    }

    #[test]
    fn parses_chained_compare() {
        let expr = expr_from_json(
            &serde_json::from_str(
                r#"{
                "kind": "Compare",
                "left": {"kind": "Num", "value": 1},
                "ops": ["<", "<="],
                "comparators": [{"kind": "Num", "value": 2}, {"kind": "Num", "value": 3}]
            }"#,
            )
            .unwrap(),
        )
        .unwrap();
        match expr {
            Expr::Compare { ops, comparators, .. } => {
                assert_eq!(ops, vec![CmpOp::Lt, CmpOp::Le]);
                assert_eq!(comparators.len(), 2);
            }
            other => panic!("unexpected expression: {other:?}"),
        }
    }

    #[test]
    fn parses_listcomp_single_generator() {
        let expr = expr_from_json(
            &serde_json::from_str(
                r#"{
                "kind": "ListComp",
                "element": {"kind": "Name", "id": "x"},
                "generators": [{"target": "x", "iter": {"kind": "Call", "func": {"kind": "Name", "id": "range"}, "args": [{"kind": "Num", "value": 5}]}}]
            }"#,
            )
            .unwrap(),
        )
        .unwrap();
        assert!(matches!(expr, Expr::ListComp { .. }));
    }

    #[test]
    fn rejects_listcomp_with_if_filter() {
        let err = expr_from_json(
            &serde_json::from_str(
                r#"{
                "kind": "ListComp",
                "element": {"kind": "Name", "id": "x"},
                "generators": [{"target": "x", "iter": {"kind": "Name", "id": "xs"}, "ifs": [{"kind": "Name", "id": "x"}]}]
            }"#,
            )
            .unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, SymError::UnsupportedAst { .. }));
    }

    #[test]
    fn parses_subscript_slice_and_index() {
        let idx = expr_from_json(
            &serde_json::from_str(
                r#"{"kind": "Subscript", "value": {"kind": "Name", "id": "l"}, "slice": {"kind": "Index", "value": {"kind": "Num", "value": 0}}}"#,
            )
            .unwrap(),
        )
        .unwrap();
        assert!(matches!(idx, Expr::Subscript { slice: Slice::Index(_), .. }));

        let sl = expr_from_json(
            &serde_json::from_str(
                r#"{"kind": "Subscript", "value": {"kind": "Name", "id": "l"}, "slice": {"kind": "Slice", "lower": {"kind": "Num", "value": 1}, "upper": null}}"#,
            )
            .unwrap(),
        )
        .unwrap();
        assert!(matches!(sl, Expr::Subscript { slice: Slice::Range { upper: None, .. }, .. }));
    }
}
