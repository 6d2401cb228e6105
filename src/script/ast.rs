//! 脚本语法树

use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Name(String),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// 链式比较：`a < b <= c`
    Compare {
        left: Box<Expr>,
        rest: Vec<(CmpOp, Expr)>,
    },
    Bool {
        op: BoolOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    IfExp {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Index {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        value: Box<Expr>,
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
    },
}

/// 赋值目标
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Index { value: Expr, index: Expr },
    /// `a, b = ...` / `for k, v in ...`
    Unpack(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    Assign {
        target: Target,
        value: Expr,
    },
    AugAssign {
        target: Target,
        op: BinOp,
        value: Expr,
    },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        orelse: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Pass,
    Return(Option<Expr>),
    FunctionDef(Rc<FunctionDef>),
    Import {
        module: String,
        alias: Option<String>,
    },
    FromImport {
        module: String,
        names: Vec<(String, Option<String>)>,
    },
    Raise(Expr),
    Try {
        body: Vec<Stmt>,
        binding: Option<String>,
        handler: Vec<Stmt>,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub body: Vec<Stmt>,
}

/// 深度优先访问所有语句与表达式（分类器使用）
pub trait Visitor {
    fn visit_stmt(&mut self, _stmt: &Stmt) {}
    fn visit_expr(&mut self, _expr: &Expr) {}
}

pub fn walk_program(program: &Program, visitor: &mut dyn Visitor) {
    walk_block(&program.body, visitor);
}

fn walk_block(body: &[Stmt], visitor: &mut dyn Visitor) {
    for stmt in body {
        walk_stmt(stmt, visitor);
    }
}

fn walk_target(target: &Target, visitor: &mut dyn Visitor) {
    if let Target::Index { value, index } = target {
        walk_expr(value, visitor);
        walk_expr(index, visitor);
    }
}

fn walk_stmt(stmt: &Stmt, visitor: &mut dyn Visitor) {
    visitor.visit_stmt(stmt);
    match &stmt.kind {
        StmtKind::Expr(e) | StmtKind::Raise(e) => walk_expr(e, visitor),
        StmtKind::Assign { target, value } | StmtKind::AugAssign { target, value, .. } => {
            walk_target(target, visitor);
            walk_expr(value, visitor);
        }
        StmtKind::If { branches, orelse } => {
            for (cond, body) in branches {
                walk_expr(cond, visitor);
                walk_block(body, visitor);
            }
            walk_block(orelse, visitor);
        }
        StmtKind::While { cond, body } => {
            walk_expr(cond, visitor);
            walk_block(body, visitor);
        }
        StmtKind::For { target, iter, body } => {
            walk_target(target, visitor);
            walk_expr(iter, visitor);
            walk_block(body, visitor);
        }
        StmtKind::Return(Some(e)) => walk_expr(e, visitor),
        StmtKind::FunctionDef(def) => {
            for param in &def.params {
                if let Some(d) = &param.default {
                    walk_expr(d, visitor);
                }
            }
            walk_block(&def.body, visitor);
        }
        StmtKind::Try { body, handler, .. } => {
            walk_block(body, visitor);
            walk_block(handler, visitor);
        }
        StmtKind::Return(None)
        | StmtKind::Break
        | StmtKind::Continue
        | StmtKind::Pass
        | StmtKind::Import { .. }
        | StmtKind::FromImport { .. } => {}
    }
}

fn walk_expr(expr: &Expr, visitor: &mut dyn Visitor) {
    visitor.visit_expr(expr);
    match expr {
        Expr::Literal(_) | Expr::Name(_) => {}
        Expr::List(items) => items.iter().for_each(|e| walk_expr(e, visitor)),
        Expr::Dict(pairs) => {
            for (k, v) in pairs {
                walk_expr(k, visitor);
                walk_expr(v, visitor);
            }
        }
        Expr::Unary { operand, .. } => walk_expr(operand, visitor),
        Expr::Binary { left, right, .. } | Expr::Bool { left, right, .. } => {
            walk_expr(left, visitor);
            walk_expr(right, visitor);
        }
        Expr::Compare { left, rest } => {
            walk_expr(left, visitor);
            rest.iter().for_each(|(_, e)| walk_expr(e, visitor));
        }
        Expr::IfExp {
            cond,
            then,
            otherwise,
        } => {
            walk_expr(cond, visitor);
            walk_expr(then, visitor);
            walk_expr(otherwise, visitor);
        }
        Expr::Call { func, args, kwargs } => {
            walk_expr(func, visitor);
            args.iter().for_each(|e| walk_expr(e, visitor));
            kwargs.iter().for_each(|(_, e)| walk_expr(e, visitor));
        }
        Expr::Attribute { value, .. } => walk_expr(value, visitor),
        Expr::Index { value, index } => {
            walk_expr(value, visitor);
            walk_expr(index, visitor);
        }
        Expr::Slice {
            value,
            lower,
            upper,
        } => {
            walk_expr(value, visitor);
            if let Some(l) = lower {
                walk_expr(l, visitor);
            }
            if let Some(u) = upper {
                walk_expr(u, visitor);
            }
        }
    }
}
