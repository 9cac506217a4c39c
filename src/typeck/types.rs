use std::fmt;

use serde::Serialize;

use crate::exceptions::ExceptionKind;
use crate::span::NodeId;

/// A type variable, resolved through the unification table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TyVar(pub u32);

/// The delay variable carried by every function type.
///
/// Unifying two function types unifies their delay variables; the scheduler
/// later fixes each variable to the delay it proves for the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DelayVar(pub u32);

/// A class by identity: the id of its `class` statement plus its name for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassRef {
    pub id: NodeId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Ty {
    Var(TyVar),
    Bool,
    NoneType,
    /// An integer; the argument is a `Width` or a variable standing for one.
    Int(Box<Ty>),
    /// Bit width, only ever the argument of `Int`.
    Width(u32),
    Float,
    Str,
    Bytes,
    List(Box<Ty>),
    Tuple(Vec<Ty>),
    Array(Box<Ty>, u32),
    Range(Box<Ty>),
    Instance(ClassRef),
    Constructor(ClassRef),
    Function(FnTy),
    /// A function with its first parameter bound to a receiver.
    Method(Box<FnTy>, Box<Ty>),
    Exception(ExceptionKind),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FnTy {
    pub params: Vec<ParamTy>,
    pub ret: Box<Ty>,
    pub delay: DelayVar,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamTy {
    pub name: String,
    pub ty: Ty,
    pub has_default: bool,
}

impl Ty {
    pub fn int(width: u32) -> Ty {
        Ty::Int(Box::new(Ty::Width(width)))
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Ty::Int(_))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Ty::Int(_) | Ty::Float)
    }

    /// Whether the type supports `+` concatenation and `*` repetition.
    pub fn is_sequence(&self) -> bool {
        matches!(self, Ty::List(_) | Ty::Tuple(_) | Ty::Str | Ty::Bytes)
    }

    /// Short kind name used in operator error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Ty::Var(_) => "unknown",
            Ty::Bool => "bool",
            Ty::NoneType => "none",
            Ty::Int(_) | Ty::Width(_) => "int",
            Ty::Float => "float",
            Ty::Str => "str",
            Ty::Bytes => "bytes",
            Ty::List(_) => "list",
            Ty::Tuple(_) => "tuple",
            Ty::Array(..) => "array",
            Ty::Range(_) => "range",
            Ty::Instance(_) => "instance",
            Ty::Constructor(_) => "class",
            Ty::Function(_) => "function",
            Ty::Method(..) => "method",
            Ty::Exception(_) => "exception",
        }
    }
}

impl FnTy {
    /// The signature seen through a bound receiver: the first parameter dropped.
    pub fn without_self(&self) -> FnTy {
        FnTy {
            params: self.params.iter().skip(1).cloned().collect(),
            ret: self.ret.clone(),
            delay: self.delay,
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Var(v) => write!(f, "'t{}", v.0),
            Ty::Bool => write!(f, "bool"),
            Ty::NoneType => write!(f, "none"),
            Ty::Int(width) => match width.as_ref() {
                Ty::Width(n) => write!(f, "int{}", n),
                _ => write!(f, "int"),
            },
            Ty::Width(n) => write!(f, "{}", n),
            Ty::Float => write!(f, "float"),
            Ty::Str => write!(f, "str"),
            Ty::Bytes => write!(f, "bytes"),
            Ty::List(elt) => write!(f, "list({})", elt),
            Ty::Tuple(elts) => {
                write!(f, "tuple(")?;
                for (i, elt) in elts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", elt)?;
                }
                write!(f, ")")
            }
            Ty::Array(elt, ndims) => write!(f, "array({}, {})", elt, ndims),
            Ty::Range(elt) => write!(f, "range({})", elt),
            Ty::Instance(class) => write!(f, "{}", class.name),
            Ty::Constructor(class) => write!(f, "<constructor {}>", class.name),
            Ty::Function(func) => write!(f, "{}", func),
            Ty::Method(func, recv) => write!(f, "method of {}: {}", recv, func),
            Ty::Exception(kind) => write!(f, "{}", kind),
        }
    }
}

impl fmt::Display for FnTy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", p.name, p.ty)?;
            if p.has_default {
                write!(f, " = ...")?;
            }
        }
        write!(f, ") -> {}", self.ret)
    }
}
