//! AST model for the typed subset.
//!
//! The lexer and parser are external: they hand the compiler a serialized
//! [`Module`] (see [`Module::from_json`]). Every node is a tagged variant
//! keyed by [`NodeKind`]; visitor dispatch is a `match` over the tag, so an
//! unhandled kind is a compile-time error rather than a runtime surprise.
//!
//! Expression nodes carry two analysis slots filled in by sema:
//! - `inferred`: the resolved [`TypeKind`] for the expression
//! - `ckey`: the canonical key, a stable string derived from the node shape
//!   and operand keys, used as the equivalence-class id for CSE/GVN

use serde::{Deserialize, Serialize};

/// Source location carried by every node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub file: String,
    pub line: u32,
    pub col: u32,
}

impl Span {
    pub fn new(file: impl Into<String>, line: u32, col: u32) -> Self {
        Span {
            file: file.into(),
            line,
            col,
        }
    }

    /// Synthetic span for nodes materialized by rewrites (no source line).
    pub fn synthetic() -> Self {
        Span::default()
    }
}

/// Closed set of type kinds tracked by the analyzer and codegen.
///
/// Inference represents finite unions as bitmasks over these kinds
/// (see `sema::types::TypeMask`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    NoneType,
    Int,
    Float,
    Bool,
    Str,
    List,
    Tuple,
    Dict,
    Set,
    Bytes,
    ByteArray,
    /// Instance of a user-defined class; the class name is tracked by the
    /// type environment, not the kind itself.
    Class,
    /// Unknown/dynamic; produced by unresolved calls and opaque attributes.
    Opaque,
}

impl TypeKind {
    /// Bit index used by the union mask representation.
    pub fn bit(self) -> u32 {
        match self {
            TypeKind::NoneType => 0,
            TypeKind::Int => 1,
            TypeKind::Float => 2,
            TypeKind::Bool => 3,
            TypeKind::Str => 4,
            TypeKind::List => 5,
            TypeKind::Tuple => 6,
            TypeKind::Dict => 7,
            TypeKind::Set => 8,
            TypeKind::Bytes => 9,
            TypeKind::ByteArray => 10,
            TypeKind::Class => 11,
            TypeKind::Opaque => 12,
        }
    }

    pub fn from_bit(bit: u32) -> Option<TypeKind> {
        Some(match bit {
            0 => TypeKind::NoneType,
            1 => TypeKind::Int,
            2 => TypeKind::Float,
            3 => TypeKind::Bool,
            4 => TypeKind::Str,
            5 => TypeKind::List,
            6 => TypeKind::Tuple,
            7 => TypeKind::Dict,
            8 => TypeKind::Set,
            9 => TypeKind::Bytes,
            10 => TypeKind::ByteArray,
            11 => TypeKind::Class,
            12 => TypeKind::Opaque,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeKind::NoneType => "None",
            TypeKind::Int => "int",
            TypeKind::Float => "float",
            TypeKind::Bool => "bool",
            TypeKind::Str => "str",
            TypeKind::List => "list",
            TypeKind::Tuple => "tuple",
            TypeKind::Dict => "dict",
            TypeKind::Set => "set",
            TypeKind::Bytes => "bytes",
            TypeKind::ByteArray => "bytearray",
            TypeKind::Class => "object",
            TypeKind::Opaque => "<opaque>",
        }
    }
}

/// Flat node tag shared by expressions and statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    IntLiteral,
    FloatLiteral,
    BoolLiteral,
    StringLiteral,
    BytesLiteral,
    NoneLiteral,
    EllipsisLiteral,
    ImagLiteral,
    FStringLiteral,
    Name,
    Attribute,
    Subscript,
    NamedExpr,
    Unary,
    Binary,
    Compare,
    TupleLiteral,
    ListLiteral,
    SetLiteral,
    DictLiteral,
    ObjectLiteral,
    Lambda,
    IfExpr,
    Await,
    Yield,
    Comprehension,
    Call,
    ExprStmt,
    AssignStmt,
    AugAssignStmt,
    ReturnStmt,
    IfStmt,
    WhileStmt,
    ForStmt,
    BreakStmt,
    ContinueStmt,
    PassStmt,
    TryStmt,
    WithStmt,
    RaiseStmt,
    GlobalStmt,
    NonlocalStmt,
    AssertStmt,
    DelStmt,
    Import,
    ImportFrom,
    ClassDef,
    DefStmt,
    MatchStmt,
}

/// Load/store/delete context for names, attributes, and subscripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExprCtx {
    Load,
    Store,
    Del,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
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
    Shl,
    Shr,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
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

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
        }
    }
}

/// One piece of an f-string: literal text or an embedded expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FStringPart {
    Text(String),
    Expr(Box<Expr>),
}

/// Dict literal entry: a key/value pair or a `**expr` unpack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DictEntry {
    KeyValue { key: Expr, value: Expr },
    Unpack { value: Expr },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    /// None for `**kwargs` spread at a call site.
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompKind {
    Generator,
    List,
    Set,
    Dict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompClause {
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprNode {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    NoneLit,
    Ellipsis,
    Imag(f64),
    FString(Vec<FStringPart>),
    Name {
        id: String,
        ctx: ExprCtx,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
        ctx: ExprCtx,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
        ctx: ExprCtx,
    },
    NamedExpr {
        target: String,
        value: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Comparison chain: `a < b < c` has `left = a`, `ops = [Lt, Lt]`,
    /// `comparators = [b, c]`. `ops.len() == comparators.len()` always.
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<DictEntry>),
    /// Positional fixed-size field aggregate.
    Object(Vec<Expr>),
    Lambda {
        params: Vec<String>,
        body: Box<Expr>,
    },
    IfExpr {
        cond: Box<Expr>,
        then: Box<Expr>,
        orelse: Box<Expr>,
    },
    Await(Box<Expr>),
    Yield {
        value: Option<Box<Expr>>,
        from: bool,
    },
    Comprehension {
        kind: CompKind,
        element: Box<Expr>,
        /// Value expression for dict comprehensions; None otherwise.
        value: Option<Box<Expr>>,
        clauses: Vec<CompClause>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub node: ExprNode,
    pub span: Span,
    /// Type kind recorded by sema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inferred: Option<TypeKind>,
    /// Canonical key recorded by sema for pure expressions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ckey: Option<String>,
}

impl Expr {
    pub fn new(node: ExprNode, span: Span) -> Self {
        Expr {
            node,
            span,
            inferred: None,
            ckey: None,
        }
    }

    pub fn node_kind(&self) -> NodeKind {
        match &self.node {
            ExprNode::Int(_) => NodeKind::IntLiteral,
            ExprNode::Float(_) => NodeKind::FloatLiteral,
            ExprNode::Bool(_) => NodeKind::BoolLiteral,
            ExprNode::Str(_) => NodeKind::StringLiteral,
            ExprNode::Bytes(_) => NodeKind::BytesLiteral,
            ExprNode::NoneLit => NodeKind::NoneLiteral,
            ExprNode::Ellipsis => NodeKind::EllipsisLiteral,
            ExprNode::Imag(_) => NodeKind::ImagLiteral,
            ExprNode::FString(_) => NodeKind::FStringLiteral,
            ExprNode::Name { .. } => NodeKind::Name,
            ExprNode::Attribute { .. } => NodeKind::Attribute,
            ExprNode::Subscript { .. } => NodeKind::Subscript,
            ExprNode::NamedExpr { .. } => NodeKind::NamedExpr,
            ExprNode::Unary { .. } => NodeKind::Unary,
            ExprNode::Binary { .. } => NodeKind::Binary,
            ExprNode::Compare { .. } => NodeKind::Compare,
            ExprNode::Tuple(_) => NodeKind::TupleLiteral,
            ExprNode::List(_) => NodeKind::ListLiteral,
            ExprNode::Set(_) => NodeKind::SetLiteral,
            ExprNode::Dict(_) => NodeKind::DictLiteral,
            ExprNode::Object(_) => NodeKind::ObjectLiteral,
            ExprNode::Lambda { .. } => NodeKind::Lambda,
            ExprNode::IfExpr { .. } => NodeKind::IfExpr,
            ExprNode::Await(_) => NodeKind::Await,
            ExprNode::Yield { .. } => NodeKind::Yield,
            ExprNode::Comprehension { .. } => NodeKind::Comprehension,
            ExprNode::Call { .. } => NodeKind::Call,
        }
    }

    /// Simple-name id if this expression is a bare name.
    pub fn as_name(&self) -> Option<&str> {
        match &self.node {
            ExprNode::Name { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn as_const_int(&self) -> Option<i64> {
        match &self.node {
            ExprNode::Int(v) => Some(*v),
            _ => None,
        }
    }
}

/// Parameter position class for full signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    Positional,
    PosOnly,
    KwOnly,
    VarArg,
    KwVarArg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    pub kind: ParamKind,
    /// Annotation expression; sema interprets names, `X | Y` unions, and
    /// `list[T]` subscripts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Expr>,
}

impl ParamDecl {
    pub fn simple(name: impl Into<String>, annotation: Option<Expr>) -> Self {
        ParamDecl {
            name: name.into(),
            kind: ParamKind::Positional,
            annotation,
            default: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<ParamDecl>,
    pub body: Vec<Stmt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<Expr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decorators: Vec<Expr>,
    #[serde(default)]
    pub is_async: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bases: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decorators: Vec<Expr>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptHandler {
    /// Declared exception type name; None for a bare `except`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// `as`-bound name for the caught exception object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithItem {
    pub context: Expr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alias {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asname: Option<String>,
}

/// Structural match patterns. Children are owned by their parent pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Pattern {
    Wildcard,
    /// `case x:` or `case <sub> as x:`
    Capture {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sub: Option<Box<Pattern>>,
    },
    Literal(Expr),
    Or(Vec<Pattern>),
    Class {
        name: String,
        args: Vec<Pattern>,
    },
    Sequence(Vec<Pattern>),
    Mapping {
        keys: Vec<Expr>,
        patterns: Vec<Pattern>,
    },
    Star(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCase {
    pub pattern: Pattern,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtNode {
    Expr(Expr),
    Assign {
        targets: Vec<Expr>,
        value: Expr,
    },
    AugAssign {
        target: Expr,
        op: BinaryOp,
        value: Expr,
    },
    Return(Option<Expr>),
    If {
        cond: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    Break,
    Continue,
    Pass,
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    },
    With {
        items: Vec<WithItem>,
        body: Vec<Stmt>,
    },
    Raise {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exc: Option<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cause: Option<Expr>,
    },
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    Assert {
        test: Expr,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        msg: Option<Expr>,
    },
    Del(Vec<Expr>),
    Import(Vec<Alias>),
    ImportFrom {
        module: String,
        #[serde(default)]
        level: u32,
        names: Vec<Alias>,
    },
    ClassDef(ClassDef),
    FunctionDef(FunctionDef),
    Match {
        subject: Expr,
        cases: Vec<MatchCase>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub node: StmtNode,
    pub span: Span,
}

impl Stmt {
    pub fn new(node: StmtNode, span: Span) -> Self {
        Stmt { node, span }
    }

    pub fn node_kind(&self) -> NodeKind {
        match &self.node {
            StmtNode::Expr(_) => NodeKind::ExprStmt,
            StmtNode::Assign { .. } => NodeKind::AssignStmt,
            StmtNode::AugAssign { .. } => NodeKind::AugAssignStmt,
            StmtNode::Return(_) => NodeKind::ReturnStmt,
            StmtNode::If { .. } => NodeKind::IfStmt,
            StmtNode::While { .. } => NodeKind::WhileStmt,
            StmtNode::For { .. } => NodeKind::ForStmt,
            StmtNode::Break => NodeKind::BreakStmt,
            StmtNode::Continue => NodeKind::ContinueStmt,
            StmtNode::Pass => NodeKind::PassStmt,
            StmtNode::Try { .. } => NodeKind::TryStmt,
            StmtNode::With { .. } => NodeKind::WithStmt,
            StmtNode::Raise { .. } => NodeKind::RaiseStmt,
            StmtNode::Global(_) => NodeKind::GlobalStmt,
            StmtNode::Nonlocal(_) => NodeKind::NonlocalStmt,
            StmtNode::Assert { .. } => NodeKind::AssertStmt,
            StmtNode::Del(_) => NodeKind::DelStmt,
            StmtNode::Import(_) => NodeKind::Import,
            StmtNode::ImportFrom { .. } => NodeKind::ImportFrom,
            StmtNode::ClassDef(_) => NodeKind::ClassDef,
            StmtNode::FunctionDef(_) => NodeKind::DefStmt,
            StmtNode::Match { .. } => NodeKind::MatchStmt,
        }
    }
}

/// One source file's worth of definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub file: String,
    pub body: Vec<Stmt>,
}

impl Module {
    pub fn new(name: impl Into<String>, file: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            file: file.into(),
            body: Vec::new(),
        }
    }

    /// Deserialize a module from the front end's JSON wire format.
    pub fn from_json(text: &str) -> Result<Module, String> {
        serde_json::from_str(text).map_err(|e| format!("invalid AST module: {}", e))
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| format!("AST serialization: {}", e))
    }

    pub fn find_function(&self, name: &str) -> Option<&FunctionDef> {
        self.body.iter().find_map(|s| match &s.node {
            StmtNode::FunctionDef(f) if f.name == name => Some(f),
            _ => None,
        })
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionDef> {
        self.body.iter().filter_map(|s| match &s.node {
            StmtNode::FunctionDef(f) => Some(f),
            _ => None,
        })
    }

    pub fn functions_mut(&mut self) -> impl Iterator<Item = &mut FunctionDef> {
        self.body.iter_mut().filter_map(|s| match &mut s.node {
            StmtNode::FunctionDef(f) => Some(f),
            _ => None,
        })
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.body.iter().filter_map(|s| match &s.node {
            StmtNode::ClassDef(c) => Some(c),
            _ => None,
        })
    }
}

/// Apply `f` to every sub-expression of `e`, including `e` itself, pre-order.
pub fn walk_expr<'a>(e: &'a Expr, f: &mut dyn FnMut(&'a Expr)) {
    f(e);
    match &e.node {
        ExprNode::Int(_)
        | ExprNode::Float(_)
        | ExprNode::Bool(_)
        | ExprNode::Str(_)
        | ExprNode::Bytes(_)
        | ExprNode::NoneLit
        | ExprNode::Ellipsis
        | ExprNode::Imag(_) => {}
        ExprNode::FString(parts) => {
            for p in parts {
                if let FStringPart::Expr(x) = p {
                    walk_expr(x, f);
                }
            }
        }
        ExprNode::Name { .. } => {}
        ExprNode::Attribute { value, .. } => walk_expr(value, f),
        ExprNode::Subscript { value, index, .. } => {
            walk_expr(value, f);
            walk_expr(index, f);
        }
        ExprNode::NamedExpr { value, .. } => walk_expr(value, f),
        ExprNode::Unary { operand, .. } => walk_expr(operand, f),
        ExprNode::Binary { lhs, rhs, .. } => {
            walk_expr(lhs, f);
            walk_expr(rhs, f);
        }
        ExprNode::Compare {
            left, comparators, ..
        } => {
            walk_expr(left, f);
            for c in comparators {
                walk_expr(c, f);
            }
        }
        ExprNode::Tuple(els) | ExprNode::List(els) | ExprNode::Set(els) | ExprNode::Object(els) => {
            for el in els {
                walk_expr(el, f);
            }
        }
        ExprNode::Dict(entries) => {
            for entry in entries {
                match entry {
                    DictEntry::KeyValue { key, value } => {
                        walk_expr(key, f);
                        walk_expr(value, f);
                    }
                    DictEntry::Unpack { value } => walk_expr(value, f),
                }
            }
        }
        ExprNode::Lambda { body, .. } => walk_expr(body, f),
        ExprNode::IfExpr { cond, then, orelse } => {
            walk_expr(cond, f);
            walk_expr(then, f);
            walk_expr(orelse, f);
        }
        ExprNode::Await(x) => walk_expr(x, f),
        ExprNode::Yield { value, .. } => {
            if let Some(v) = value {
                walk_expr(v, f);
            }
        }
        ExprNode::Comprehension {
            element,
            value,
            clauses,
            ..
        } => {
            walk_expr(element, f);
            if let Some(v) = value {
                walk_expr(v, f);
            }
            for c in clauses {
                walk_expr(&c.target, f);
                walk_expr(&c.iter, f);
                for i in &c.ifs {
                    walk_expr(i, f);
                }
            }
        }
        ExprNode::Call {
            func,
            args,
            keywords,
        } => {
            walk_expr(func, f);
            for a in args {
                walk_expr(a, f);
            }
            for k in keywords {
                walk_expr(&k.value, f);
            }
        }
    }
}

/// Apply `f` to every expression directly contained in `s`, without
/// descending into nested statement bodies.
pub fn stmt_exprs<'a>(s: &'a Stmt, f: &mut dyn FnMut(&'a Expr)) {
    match &s.node {
        StmtNode::Expr(e) => f(e),
        StmtNode::Assign { targets, value } => {
            for t in targets {
                f(t);
            }
            f(value);
        }
        StmtNode::AugAssign { target, value, .. } => {
            f(target);
            f(value);
        }
        StmtNode::Return(v) => {
            if let Some(v) = v {
                f(v);
            }
        }
        StmtNode::If { cond, .. } | StmtNode::While { cond, .. } => f(cond),
        StmtNode::For { target, iter, .. } => {
            f(target);
            f(iter);
        }
        StmtNode::Raise { exc, cause } => {
            if let Some(e) = exc {
                f(e);
            }
            if let Some(c) = cause {
                f(c);
            }
        }
        StmtNode::Assert { test, msg } => {
            f(test);
            if let Some(m) = msg {
                f(m);
            }
        }
        StmtNode::Del(targets) => {
            for t in targets {
                f(t);
            }
        }
        StmtNode::With { items, .. } => {
            for i in items {
                f(&i.context);
            }
        }
        StmtNode::Match { subject, .. } => f(subject),
        StmtNode::Break
        | StmtNode::Continue
        | StmtNode::Pass
        | StmtNode::Global(_)
        | StmtNode::Nonlocal(_)
        | StmtNode::Import(_)
        | StmtNode::ImportFrom { .. }
        | StmtNode::Try { .. }
        | StmtNode::ClassDef(_)
        | StmtNode::FunctionDef(_) => {}
    }
}

/// Child statement lists of `s` (then/else bodies, loop bodies, handlers, ...).
pub fn child_bodies(s: &Stmt) -> Vec<&[Stmt]> {
    match &s.node {
        StmtNode::If { body, orelse, .. }
        | StmtNode::While { body, orelse, .. }
        | StmtNode::For { body, orelse, .. } => vec![body, orelse],
        StmtNode::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            let mut out: Vec<&[Stmt]> = vec![body];
            for h in handlers {
                out.push(&h.body);
            }
            out.push(orelse);
            out.push(finalbody);
            out
        }
        StmtNode::With { body, .. } => vec![body],
        StmtNode::Match { cases, .. } => cases.iter().map(|c| c.body.as_slice()).collect(),
        StmtNode::ClassDef(c) => vec![&c.body],
        StmtNode::FunctionDef(f) => vec![&f.body],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp(line: u32) -> Span {
        Span::new("<test>", line, 1)
    }

    fn int(v: i64, line: u32) -> Expr {
        Expr::new(ExprNode::Int(v), sp(line))
    }

    #[test]
    fn test_node_kind_tags() {
        let e = int(42, 1);
        assert_eq!(e.node_kind(), NodeKind::IntLiteral);
        let s = Stmt::new(StmtNode::Pass, sp(1));
        assert_eq!(s.node_kind(), NodeKind::PassStmt);
    }

    #[test]
    fn test_compare_chain_shape() {
        // a < b < c: ops and comparators stay in lockstep
        let e = Expr::new(
            ExprNode::Compare {
                left: Box::new(int(1, 1)),
                ops: vec![CmpOp::Lt, CmpOp::Lt],
                comparators: vec![int(2, 1), int(3, 1)],
            },
            sp(1),
        );
        if let ExprNode::Compare {
            ops, comparators, ..
        } = &e.node
        {
            assert_eq!(ops.len(), comparators.len());
        } else {
            unreachable!();
        }
    }

    #[test]
    fn test_walk_expr_visits_all() {
        let e = Expr::new(
            ExprNode::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(int(1, 1)),
                rhs: Box::new(Expr::new(
                    ExprNode::Unary {
                        op: UnaryOp::Neg,
                        operand: Box::new(int(2, 1)),
                    },
                    sp(1),
                )),
            },
            sp(1),
        );
        let mut count = 0;
        walk_expr(&e, &mut |_| count += 1);
        assert_eq!(count, 4); // binary, 1, unary, 2
    }

    #[test]
    fn test_module_json_round_trip() {
        let mut m = Module::new("main", "main.py");
        m.body.push(Stmt::new(
            StmtNode::Assign {
                targets: vec![Expr::new(
                    ExprNode::Name {
                        id: "x".to_string(),
                        ctx: ExprCtx::Store,
                    },
                    sp(1),
                )],
                value: int(7, 1),
            },
            sp(1),
        ));
        let text = m.to_json().unwrap();
        let back = Module::from_json(&text).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn test_find_function() {
        let mut m = Module::new("main", "main.py");
        m.body.push(Stmt::new(
            StmtNode::FunctionDef(FunctionDef {
                name: "f".to_string(),
                params: vec![],
                body: vec![Stmt::new(StmtNode::Pass, sp(2))],
                returns: None,
                decorators: vec![],
                is_async: false,
                span: sp(1),
            }),
            sp(1),
        ));
        assert!(m.find_function("f").is_some());
        assert!(m.find_function("g").is_none());
    }
}
