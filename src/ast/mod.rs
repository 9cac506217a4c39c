//! The input AST.
//!
//! Produced by an external parser; every node carries a source span and a
//! stable [`NodeId`](crate::span::NodeId). The shape follows the surface
//! language: Python-like statements plus the `with sequential:` and
//! `with interleave:`/`with parallel:` timing blocks.

pub mod build;

use serde::{Deserialize, Serialize};

use crate::span::Spanned;

pub type Body = Vec<Spanned<Stmt>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub body: Body,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: Spanned<String>,
    pub params: Vec<Param>,
    pub body: Body,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: Spanned<String>,
    pub default: Option<Spanned<Expr>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: Spanned<String>,
    pub bases: Vec<Spanned<Expr>>,
    pub body: Body,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptHandler {
    /// `None` for a bare `except:`.
    pub kind: Option<Spanned<Expr>>,
    pub name: Option<Spanned<String>>,
    pub body: Body,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithItem {
    pub context: Spanned<Expr>,
    pub target: Option<Spanned<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyword {
    pub name: Spanned<String>,
    pub value: Spanned<Expr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    Expr(Spanned<Expr>),
    Assign {
        targets: Vec<Spanned<Expr>>,
        value: Spanned<Expr>,
    },
    AugAssign {
        target: Spanned<Expr>,
        op: BinOp,
        value: Spanned<Expr>,
    },
    Pass,
    If {
        test: Spanned<Expr>,
        body: Body,
        orelse: Body,
    },
    While {
        test: Spanned<Expr>,
        body: Body,
        orelse: Body,
    },
    For {
        target: Spanned<Expr>,
        iter: Spanned<Expr>,
        body: Body,
        orelse: Body,
    },
    Try {
        body: Body,
        handlers: Vec<Spanned<ExceptHandler>>,
        orelse: Body,
        finalbody: Body,
    },
    With {
        items: Vec<Spanned<WithItem>>,
        body: Body,
    },
    FunctionDef(FunctionDef),
    ClassDef(ClassDef),
    Return(Option<Spanned<Expr>>),
    Break,
    Continue,
    Raise(Option<Spanned<Expr>>),
    Nonlocal(Vec<Spanned<String>>),
    Global(Vec<Spanned<String>>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    NoneLit,
    Name(String),
    BinOp {
        op: BinOp,
        lhs: Box<Spanned<Expr>>,
        rhs: Box<Spanned<Expr>>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Spanned<Expr>>,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Spanned<Expr>>,
    },
    Compare {
        lhs: Box<Spanned<Expr>>,
        ops: Vec<(CmpOp, Spanned<Expr>)>,
    },
    Call {
        func: Box<Spanned<Expr>>,
        args: Vec<Spanned<Expr>>,
        keywords: Vec<Keyword>,
    },
    Attribute {
        value: Box<Spanned<Expr>>,
        attr: Spanned<String>,
    },
    Subscript {
        value: Box<Spanned<Expr>>,
        index: Box<Spanned<Expr>>,
    },
    IfExp {
        test: Box<Spanned<Expr>>,
        body: Box<Spanned<Expr>>,
        orelse: Box<Spanned<Expr>>,
    },
    List(Vec<Spanned<Expr>>),
    Tuple(Vec<Spanned<Expr>>),
    Lambda {
        params: Vec<Param>,
        body: Box<Spanned<Expr>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

/// The timing role of a `with` item, if it is one of the block markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimingBlock {
    Sequential,
    Interleave,
}

impl Spanned<WithItem> {
    pub fn timing_block(&self) -> Option<TimingBlock> {
        match &self.node.context.node {
            Expr::Name(n) if n == "sequential" => Some(TimingBlock::Sequential),
            Expr::Name(n) if n == "interleave" || n == "parallel" => Some(TimingBlock::Interleave),
            _ => None,
        }
    }
}

impl Stmt {
    /// The timing block kind of a `with` statement whose single item is a marker.
    pub fn timing_block(&self) -> Option<TimingBlock> {
        match self {
            Stmt::With { items, .. } if items.len() == 1 => items[0].timing_block(),
            _ => None,
        }
    }
}

impl Expr {
    /// Dotted path of a name/attribute chain, e.g. `self.ttl0` for `self.ttl0`.
    pub fn dotted_path(&self) -> Option<String> {
        match self {
            Expr::Name(n) => Some(n.clone()),
            Expr::Attribute { value, attr } => {
                value.node.dotted_path().map(|base| format!("{}.{}", base, attr.node))
            }
            _ => None,
        }
    }
}
