//! 树遍历解释器
//!
//! 每条语句执行前检查取消令牌与截止时间；`ctx.*` 调用经 [`ScriptHost`] 转交宿主（参数与返回值均为 JSON）。

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::ast::*;
use super::methods::{self, MAX_COLLECTION_LEN, MAX_STR_LEN};
use super::policy::SandboxPolicy;
use super::stdlib::{self, as_f64, as_int, Args};
use super::value::{compare_values, values_equal, Function, Value};
use super::ScriptError;

/// 用户函数最大调用深度
pub const MAX_CALL_DEPTH: usize = 64;

const BUILTINS: &[&str] = &[
    "len", "str", "repr", "int", "float", "bool", "list", "dict", "range", "min", "max", "sum",
    "abs", "round", "sorted", "reversed", "enumerate", "zip", "any", "all", "print", "type",
    "Exception", "ValueError", "TypeError", "KeyError", "RuntimeError",
];

/// 宿主调用失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HostError {
    /// 可被脚本 try/except 捕获的普通错误（参数错误、未知方法等）
    #[error("{0}")]
    Runtime(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    Timeout,
}

/// 脚本中 `ctx` 对象的宿主实现
pub trait ScriptHost {
    fn call(
        &mut self,
        method: &str,
        args: Vec<JsonValue>,
        kwargs: serde_json::Map<String, JsonValue>,
    ) -> Result<JsonValue, HostError>;
}

/// 不提供任何 ctx 能力的宿主（分类器 / 纯脚本测试使用）
#[derive(Debug, Default)]
pub struct NullHost;

impl ScriptHost for NullHost {
    fn call(
        &mut self,
        method: &str,
        _args: Vec<JsonValue>,
        _kwargs: serde_json::Map<String, JsonValue>,
    ) -> Result<JsonValue, HostError> {
        Err(HostError::Runtime(format!(
            "ctx.{method} is not available in this context"
        )))
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

pub struct Interpreter<'a> {
    host: &'a mut dyn ScriptHost,
    policy: &'a dyn SandboxPolicy,
    cancel: CancellationToken,
    deadline: Instant,
    timeout_ms: u64,
    globals: HashMap<String, Value>,
    frames: Vec<HashMap<String, Value>>,
    iterations: u64,
    line: usize,
    printed: Vec<String>,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        host: &'a mut dyn ScriptHost,
        policy: &'a dyn SandboxPolicy,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Self {
        let mut globals = HashMap::new();
        globals.insert("ctx".to_string(), Value::Context);
        Self {
            host,
            policy,
            cancel,
            deadline: Instant::now() + timeout,
            timeout_ms: timeout.as_millis() as u64,
            globals,
            frames: Vec::new(),
            iterations: 0,
            line: 0,
            printed: Vec::new(),
        }
    }

    pub fn run(&mut self, program: &Program) -> Result<(), ScriptError> {
        match self.exec_block(&program.body)? {
            Flow::Normal => Ok(()),
            Flow::Return(_) => Err(self.rt("'return' outside function")),
            Flow::Break | Flow::Continue => Err(self.rt("'break' or 'continue' outside loop")),
        }
    }

    /// 模块级绑定（输出提取用）
    pub fn globals(&self) -> &HashMap<String, Value> {
        &self.globals
    }

    pub fn take_printed(&mut self) -> Vec<String> {
        std::mem::take(&mut self.printed)
    }

    fn rt(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Runtime {
            line: self.line,
            message: message.into(),
        }
    }

    fn checkpoint(&self) -> Result<(), ScriptError> {
        if self.cancel.is_cancelled() {
            return Err(ScriptError::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(ScriptError::Timeout {
                timeout_ms: self.timeout_ms,
            });
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<Value, ScriptError> {
        if let Some(v) = self.frames.last().and_then(|f| f.get(name)) {
            return Ok(v.clone());
        }
        if let Some(v) = self.globals.get(name) {
            return Ok(v.clone());
        }
        if let Some(b) = BUILTINS.iter().copied().find(|b| *b == name) {
            return Ok(Value::Builtin(b));
        }
        Err(self.rt(format!("name '{name}' is not defined")))
    }

    fn store(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(frame) => frame.insert(name.to_string(), value),
            None => self.globals.insert(name.to_string(), value),
        };
    }

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Flow, ScriptError> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, ScriptError> {
        self.line = stmt.line;
        self.checkpoint()?;
        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.eval(e)?;
            }
            StmtKind::Assign { target, value } => {
                let v = self.eval(value)?;
                self.assign(target, v)?;
            }
            StmtKind::AugAssign { target, op, value } => match target {
                Target::Name(name) => {
                    let current = self.lookup(name)?;
                    let rhs = self.eval(value)?;
                    let updated = self.binary(*op, current, rhs)?;
                    self.store(name, updated);
                }
                Target::Index { value: container, index } => {
                    let container = self.eval(container)?;
                    let index = self.eval(index)?;
                    let current = self.get_item(&container, &index)?;
                    let rhs = self.eval(value)?;
                    let updated = self.binary(*op, current, rhs)?;
                    self.set_item(&container, index, updated)?;
                }
                Target::Unpack(_) => {
                    return Err(self.rt("illegal expression for augmented assignment"))
                }
            },
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::While { cond, body } => loop {
                if !self.eval(cond)?.truthy() {
                    break;
                }
                self.tick("while")?;
                match self.exec_block(body)? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter)?;
                let kind = iterable.type_name();
                for item in self.iterate(&iterable)? {
                    self.tick(kind)?;
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Return(value) => {
                let v = match value {
                    Some(e) => self.eval(e)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(v));
            }
            StmtKind::FunctionDef(def) => {
                let mut defaults = Vec::with_capacity(def.params.len());
                for param in &def.params {
                    defaults.push(match &param.default {
                        Some(e) => Some(self.eval(e)?),
                        None => None,
                    });
                }
                let func = Function {
                    def: Rc::clone(def),
                    defaults,
                };
                self.store(&def.name, Value::Function(Rc::new(func)));
            }
            StmtKind::Import { module, alias } => {
                let resolved = self.import(module)?;
                self.store(alias.as_deref().unwrap_or(module), Value::Module(resolved));
            }
            StmtKind::FromImport { module, names } => {
                let resolved = self.import(module)?;
                for (name, alias) in names {
                    self.policy
                        .check_attribute("module", name)
                        .map_err(|m| self.rt(m))?;
                    let value = stdlib::module_attr(resolved, name).ok_or_else(|| {
                        self.rt(format!("cannot import name '{name}' from '{module}'"))
                    })?;
                    self.store(alias.as_deref().unwrap_or(name), value);
                }
            }
            StmtKind::Raise(e) => {
                let v = self.eval(e)?;
                return Err(self.rt(v.display()));
            }
            StmtKind::Try {
                body,
                binding,
                handler,
            } => {
                let depth = self.frames.len();
                return match self.exec_block(body) {
                    Err(ScriptError::Runtime { message, .. }) => {
                        self.frames.truncate(depth);
                        if let Some(name) = binding {
                            self.store(name, Value::Str(message));
                        }
                        self.exec_block(handler)
                    }
                    other => other,
                };
            }
        }
        Ok(Flow::Normal)
    }

    fn tick(&mut self, kind: &str) -> Result<(), ScriptError> {
        self.iterations += 1;
        self.policy
            .check_iteration(kind, self.iterations)
            .map_err(|m| self.rt(m))?;
        self.checkpoint()
    }

    fn import(&self, module: &str) -> Result<&'static str, ScriptError> {
        self.policy.check_import(module).map_err(|m| self.rt(m))?;
        stdlib::module_name(module).ok_or_else(|| self.rt(format!("no module named '{module}'")))
    }

    fn assign(&mut self, target: &Target, value: Value) -> Result<(), ScriptError> {
        match target {
            Target::Name(name) => {
                self.store(name, value);
                Ok(())
            }
            Target::Index { value: container, index } => {
                let container = self.eval(container)?;
                let index = self.eval(index)?;
                self.set_item(&container, index, value)
            }
            Target::Unpack(names) => {
                let items = match &value {
                    Value::List(items) => items.borrow().clone(),
                    other => {
                        return Err(self.rt(format!(
                            "cannot unpack non-sequence {}",
                            other.type_name()
                        )))
                    }
                };
                if items.len() != names.len() {
                    return Err(self.rt(format!(
                        "expected {} values to unpack, got {}",
                        names.len(),
                        items.len()
                    )));
                }
                for (name, item) in names.iter().zip(items) {
                    self.store(name, item);
                }
                Ok(())
            }
        }
    }

    /// 物化可迭代对象；类型是否可迭代由策略决定
    fn iterate(&self, value: &Value) -> Result<Vec<Value>, ScriptError> {
        self.policy
            .check_iteration(value.type_name(), self.iterations)
            .map_err(|m| self.rt(m))?;
        match value {
            Value::List(items) => Ok(items.borrow().clone()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            Value::Dict(map) => Ok(map.borrow().keys().map(Value::str).collect()),
            other => Err(self.rt(format!("'{}' object is not iterable", other.type_name()))),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?);
                }
                Ok(Value::list(out))
            }
            Expr::Dict(pairs) => {
                let mut map = BTreeMap::new();
                for (k, v) in pairs {
                    let key = match self.eval(k)? {
                        Value::Str(s) => s,
                        other => {
                            return Err(self.rt(format!(
                                "dict keys must be str, not {}",
                                other.type_name()
                            )))
                        }
                    };
                    let value = self.eval(v)?;
                    map.insert(key, value);
                }
                Ok(Value::dict(map))
            }
            Expr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                self.unary(*op, v)
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                self.binary(*op, l, r)
            }
            Expr::Compare { left, rest } => {
                let mut l = self.eval(left)?;
                for (op, right) in rest {
                    let r = self.eval(right)?;
                    if !self.compare(*op, &l, &r)? {
                        return Ok(Value::Bool(false));
                    }
                    l = r;
                }
                Ok(Value::Bool(true))
            }
            Expr::Bool { op, left, right } => {
                let l = self.eval(left)?;
                match op {
                    BoolOp::And if !l.truthy() => Ok(l),
                    BoolOp::Or if l.truthy() => Ok(l),
                    _ => self.eval(right),
                }
            }
            Expr::IfExp {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call { func, args, kwargs } => {
                let f = self.eval(func)?;
                let mut arg_values = Vec::with_capacity(args.len());
                for a in args {
                    arg_values.push(self.eval(a)?);
                }
                let mut kw_values = BTreeMap::new();
                for (k, e) in kwargs {
                    let v = self.eval(e)?;
                    kw_values.insert(k.clone(), v);
                }
                self.call_value(f, arg_values, kw_values)
            }
            Expr::Attribute { value, attr } => {
                let v = self.eval(value)?;
                self.get_attr(&v, attr)
            }
            Expr::Index { value, index } => {
                let v = self.eval(value)?;
                let i = self.eval(index)?;
                self.get_item(&v, &i)
            }
            Expr::Slice {
                value,
                lower,
                upper,
            } => {
                let v = self.eval(value)?;
                let lower = match lower {
                    Some(e) => Some(self.eval(e)?),
                    None => None,
                };
                let upper = match upper {
                    Some(e) => Some(self.eval(e)?),
                    None => None,
                };
                self.slice(&v, lower, upper)
            }
        }
    }

    fn get_attr(&self, value: &Value, attr: &str) -> Result<Value, ScriptError> {
        self.policy
            .check_attribute(value.type_name(), attr)
            .map_err(|m| self.rt(m))?;
        match value {
            Value::Context => Ok(Value::ContextMethod(attr.to_string())),
            Value::Module(module) => stdlib::module_attr(module, attr)
                .ok_or_else(|| self.rt(format!("module '{module}' has no attribute '{attr}'"))),
            other => methods::attribute(other, attr).ok_or_else(|| {
                self.rt(format!(
                    "'{}' object has no attribute '{}'",
                    other.type_name(),
                    attr
                ))
            }),
        }
    }

    fn get_item(&self, container: &Value, index: &Value) -> Result<Value, ScriptError> {
        match (container, index) {
            (Value::List(items), _) => {
                let i = as_int(index).ok_or_else(|| self.rt("list indices must be integers"))?;
                let items = items.borrow();
                normalize_index(i, items.len())
                    .map(|i| items[i].clone())
                    .ok_or_else(|| self.rt("list index out of range"))
            }
            (Value::Str(s), _) => {
                let i = as_int(index).ok_or_else(|| self.rt("string indices must be integers"))?;
                let len = s.chars().count();
                normalize_index(i, len)
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::Str(c.to_string()))
                    .ok_or_else(|| self.rt("string index out of range"))
            }
            (Value::Dict(map), Value::Str(key)) => map
                .borrow()
                .get(key)
                .cloned()
                .ok_or_else(|| self.rt(format!("key not found: '{key}'"))),
            (Value::Dict(_), other) => Err(self.rt(format!("key not found: {}", other.repr()))),
            (Value::Match(_), _) => {
                methods::call_method(container, "group", vec![index.clone()], BTreeMap::new())
                    .map_err(|m| self.rt(m))
            }
            (other, _) => Err(self.rt(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn set_item(&self, container: &Value, index: Value, value: Value) -> Result<(), ScriptError> {
        match container {
            Value::List(items) => {
                let i = as_int(&index).ok_or_else(|| self.rt("list indices must be integers"))?;
                let mut items = items.borrow_mut();
                let len = items.len();
                let pos = normalize_index(i, len)
                    .ok_or_else(|| self.rt("list assignment index out of range"))?;
                items[pos] = value;
                Ok(())
            }
            Value::Dict(map) => {
                let Value::Str(key) = index else {
                    return Err(self.rt(format!(
                        "dict keys must be str, not {}",
                        index.type_name()
                    )));
                };
                let mut map = map.borrow_mut();
                if !map.contains_key(&key) && map.len() >= MAX_COLLECTION_LEN {
                    return Err(self.rt("collection size limit exceeded"));
                }
                map.insert(key, value);
                Ok(())
            }
            other => Err(self.rt(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    fn slice(
        &self,
        value: &Value,
        lower: Option<Value>,
        upper: Option<Value>,
    ) -> Result<Value, ScriptError> {
        let bound = |v: Option<Value>, default: i64, len: i64| -> Result<i64, ScriptError> {
            match v {
                None | Some(Value::None) => Ok(default),
                Some(v) => {
                    let i = as_int(&v).ok_or_else(|| self.rt("slice indices must be integers"))?;
                    let i = if i < 0 { i + len } else { i };
                    Ok(i.clamp(0, len))
                }
            }
        };
        match value {
            Value::List(items) => {
                let items = items.borrow();
                let len = items.len() as i64;
                let lo = bound(lower, 0, len)?;
                let hi = bound(upper, len, len)?;
                let out = if lo < hi {
                    items[lo as usize..hi as usize].to_vec()
                } else {
                    Vec::new()
                };
                Ok(Value::list(out))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let len = chars.len() as i64;
                let lo = bound(lower, 0, len)?;
                let hi = bound(upper, len, len)?;
                let out: String = if lo < hi {
                    chars[lo as usize..hi as usize].iter().collect()
                } else {
                    String::new()
                };
                Ok(Value::Str(out))
            }
            other => Err(self.rt(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn unary(&self, op: UnaryOp, v: Value) -> Result<Value, ScriptError> {
        match (op, &v) {
            (UnaryOp::Not, _) => Ok(Value::Bool(!v.truthy())),
            (UnaryOp::Neg, Value::Int(i)) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| self.rt("integer overflow")),
            (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
            (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::Int(-i64::from(*b))),
            (UnaryOp::Neg, Value::Timedelta(d)) => Ok(Value::Timedelta(-*d)),
            (UnaryOp::Pos, Value::Int(_) | Value::Float(_)) => Ok(v),
            (UnaryOp::Pos, Value::Bool(b)) => Ok(Value::Int(i64::from(*b))),
            _ => Err(self.rt(format!(
                "bad operand type for unary operator: '{}'",
                v.type_name()
            ))),
        }
    }

    fn binary(&self, op: BinOp, l: Value, r: Value) -> Result<Value, ScriptError> {
        let overflow = || self.rt("integer overflow");
        if let (Some(a), Some(b)) = (as_int(&l), as_int(&r)) {
            return match op {
                BinOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
                BinOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
                BinOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
                BinOp::Div => {
                    if b == 0 {
                        return Err(self.rt("division by zero"));
                    }
                    Ok(Value::Float(a as f64 / b as f64))
                }
                BinOp::FloorDiv => {
                    if b == 0 {
                        return Err(self.rt("integer division or modulo by zero"));
                    }
                    let q = a.checked_div(b).ok_or_else(overflow)?;
                    let adjust = a % b != 0 && ((a < 0) != (b < 0));
                    Ok(Value::Int(if adjust { q - 1 } else { q }))
                }
                BinOp::Mod => {
                    if b == 0 {
                        return Err(self.rt("integer division or modulo by zero"));
                    }
                    let m = a.checked_rem(b).ok_or_else(overflow)?;
                    Ok(Value::Int(if m != 0 && ((m < 0) != (b < 0)) { m + b } else { m }))
                }
                BinOp::Pow => {
                    if b < 0 {
                        return Ok(Value::Float((a as f64).powf(b as f64)));
                    }
                    u32::try_from(b)
                        .ok()
                        .and_then(|e| a.checked_pow(e))
                        .map(Value::Int)
                        .ok_or_else(overflow)
                }
            };
        }
        match (op, &l, &r) {
            (BinOp::Add, Value::Str(a), Value::Str(b)) => {
                if a.len() + b.len() > MAX_STR_LEN {
                    return Err(self.rt("result string too long"));
                }
                Ok(Value::Str(format!("{a}{b}")))
            }
            (BinOp::Add, Value::List(a), Value::List(b)) => {
                let mut out = a.borrow().clone();
                out.extend(b.borrow().iter().cloned());
                if out.len() > MAX_COLLECTION_LEN {
                    return Err(self.rt("collection size limit exceeded"));
                }
                Ok(Value::list(out))
            }
            (BinOp::Mul, Value::Str(s), Value::Int(n)) | (BinOp::Mul, Value::Int(n), Value::Str(s)) => {
                let n = (*n).max(0) as usize;
                if s.len().saturating_mul(n) > MAX_STR_LEN {
                    return Err(self.rt("result string too long"));
                }
                Ok(Value::Str(s.repeat(n)))
            }
            (BinOp::Mul, Value::List(items), Value::Int(n))
            | (BinOp::Mul, Value::Int(n), Value::List(items)) => {
                let n = (*n).max(0) as usize;
                let items = items.borrow();
                if items.len().saturating_mul(n) > MAX_COLLECTION_LEN {
                    return Err(self.rt("collection size limit exceeded"));
                }
                let mut out = Vec::with_capacity(items.len() * n);
                for _ in 0..n {
                    out.extend(items.iter().cloned());
                }
                Ok(Value::list(out))
            }
            (BinOp::Add, Value::DateTime(dt), Value::Timedelta(d))
            | (BinOp::Add, Value::Timedelta(d), Value::DateTime(dt)) => dt
                .checked_add_signed(*d)
                .map(Value::DateTime)
                .ok_or_else(|| self.rt("date value out of range")),
            (BinOp::Sub, Value::DateTime(dt), Value::Timedelta(d)) => dt
                .checked_sub_signed(*d)
                .map(Value::DateTime)
                .ok_or_else(|| self.rt("date value out of range")),
            (BinOp::Sub, Value::DateTime(a), Value::DateTime(b)) => {
                Ok(Value::Timedelta(a.signed_duration_since(*b)))
            }
            (BinOp::Add, Value::Date(dt), Value::Timedelta(d))
            | (BinOp::Add, Value::Timedelta(d), Value::Date(dt)) => dt
                .checked_add_signed(*d)
                .map(Value::Date)
                .ok_or_else(|| self.rt("date value out of range")),
            (BinOp::Sub, Value::Date(dt), Value::Timedelta(d)) => dt
                .checked_sub_signed(*d)
                .map(Value::Date)
                .ok_or_else(|| self.rt("date value out of range")),
            (BinOp::Sub, Value::Date(a), Value::Date(b)) => {
                Ok(Value::Timedelta(a.signed_duration_since(*b)))
            }
            (BinOp::Add, Value::Timedelta(a), Value::Timedelta(b)) => a
                .checked_add(b)
                .map(Value::Timedelta)
                .ok_or_else(|| self.rt("timedelta out of range")),
            (BinOp::Sub, Value::Timedelta(a), Value::Timedelta(b)) => a
                .checked_sub(b)
                .map(Value::Timedelta)
                .ok_or_else(|| self.rt("timedelta out of range")),
            _ => match (as_f64(&l), as_f64(&r)) {
                (Some(a), Some(b)) => {
                    let zero_div = matches!(op, BinOp::Div | BinOp::FloorDiv | BinOp::Mod) && b == 0.0;
                    if zero_div {
                        return Err(self.rt("float division by zero"));
                    }
                    Ok(Value::Float(match op {
                        BinOp::Add => a + b,
                        BinOp::Sub => a - b,
                        BinOp::Mul => a * b,
                        BinOp::Div => a / b,
                        BinOp::FloorDiv => (a / b).floor(),
                        BinOp::Mod => a - b * (a / b).floor(),
                        BinOp::Pow => a.powf(b),
                    }))
                }
                _ => Err(self.rt(format!(
                    "unsupported operand type(s) for {}: '{}' and '{}'",
                    op_symbol(op),
                    l.type_name(),
                    r.type_name()
                ))),
            },
        }
    }

    fn compare(&self, op: CmpOp, l: &Value, r: &Value) -> Result<bool, ScriptError> {
        let ordering = |l: &Value, r: &Value| compare_values(l, r).map_err(|m| self.rt(m));
        Ok(match op {
            CmpOp::Eq => values_equal(l, r),
            CmpOp::NotEq => !values_equal(l, r),
            CmpOp::Lt => ordering(l, r)? == Ordering::Less,
            CmpOp::LtE => ordering(l, r)? != Ordering::Greater,
            CmpOp::Gt => ordering(l, r)? == Ordering::Greater,
            CmpOp::GtE => ordering(l, r)? != Ordering::Less,
            CmpOp::In => self.contains(r, l)?,
            CmpOp::NotIn => !self.contains(r, l)?,
            CmpOp::Is => is_same(l, r),
            CmpOp::IsNot => !is_same(l, r),
        })
    }

    fn contains(&self, container: &Value, item: &Value) -> Result<bool, ScriptError> {
        match (container, item) {
            (Value::Str(hay), Value::Str(needle)) => Ok(hay.contains(needle.as_str())),
            (Value::Str(_), other) => Err(self.rt(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
            (Value::List(items), _) => Ok(items.borrow().iter().any(|v| values_equal(v, item))),
            (Value::Dict(map), Value::Str(key)) => Ok(map.borrow().contains_key(key)),
            (Value::Dict(_), _) => Ok(false),
            (other, _) => Err(self.rt(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            ))),
        }
    }

    fn call_value(
        &mut self,
        func: Value,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
    ) -> Result<Value, ScriptError> {
        match func {
            Value::Function(f) => self.call_function(&f, args, kwargs),
            Value::Builtin(name) => self.call_builtin(name, args, kwargs),
            Value::NativeFn { module, name } => {
                stdlib::call_native(module, &name, args, kwargs).map_err(|m| self.rt(m))
            }
            Value::Module(module @ ("datetime.datetime" | "datetime.date")) => {
                stdlib::call_module(module, args, kwargs).map_err(|m| self.rt(m))
            }
            Value::Method { receiver, name } => match (&*receiver, name.as_str()) {
                (Value::List(items), "sort") => {
                    let mut a = Args::new("list.sort", args, kwargs);
                    a.at_most(0).map_err(|m| self.rt(m))?;
                    let key = a.opt(usize::MAX, "key");
                    let reverse = a.flag("reverse");
                    a.finish().map_err(|m| self.rt(m))?;
                    let snapshot = items.borrow().clone();
                    let sorted = self.sort_values(snapshot, key, reverse)?;
                    *items.borrow_mut() = sorted;
                    Ok(Value::None)
                }
                _ => methods::call_method(&receiver, &name, args, kwargs).map_err(|m| self.rt(m)),
            },
            Value::ContextMethod(name) => self.call_host(&name, args, kwargs),
            other => Err(self.rt(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_host(
        &mut self,
        method: &str,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
    ) -> Result<Value, ScriptError> {
        let mut json_args = Vec::with_capacity(args.len());
        for a in &args {
            json_args.push(a.to_json().map_err(|m| self.rt(m))?);
        }
        let mut json_kwargs = serde_json::Map::new();
        for (k, v) in &kwargs {
            json_kwargs.insert(k.clone(), v.to_json().map_err(|m| self.rt(m))?);
        }
        let result = self.host.call(method, json_args, json_kwargs);
        let value = match result {
            Ok(json) => Value::from_json(&json),
            Err(HostError::Runtime(m)) => return Err(self.rt(m)),
            Err(HostError::Provider(message)) => return Err(ScriptError::Provider { message }),
            Err(HostError::Cancelled) => return Err(ScriptError::Cancelled),
            Err(HostError::Timeout) => {
                return Err(ScriptError::Timeout {
                    timeout_ms: self.timeout_ms,
                })
            }
        };
        self.checkpoint()?;
        Ok(value)
    }

    fn call_function(
        &mut self,
        func: &Rc<Function>,
        args: Vec<Value>,
        mut kwargs: BTreeMap<String, Value>,
    ) -> Result<Value, ScriptError> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(self.rt("maximum recursion depth exceeded"));
        }
        let def = &func.def;
        if args.len() > def.params.len() {
            return Err(self.rt(format!(
                "{}() takes {} positional arguments but {} were given",
                def.name,
                def.params.len(),
                args.len()
            )));
        }
        let mut frame = HashMap::new();
        let mut args = args.into_iter();
        for (i, param) in def.params.iter().enumerate() {
            let value = match args.next() {
                Some(v) => {
                    if kwargs.contains_key(&param.name) {
                        return Err(self.rt(format!(
                            "{}() got multiple values for argument '{}'",
                            def.name, param.name
                        )));
                    }
                    v
                }
                None => match kwargs.remove(&param.name) {
                    Some(v) => v,
                    None => func
                        .defaults
                        .get(i)
                        .cloned()
                        .flatten()
                        .ok_or_else(|| {
                            self.rt(format!(
                                "{}() missing required argument '{}'",
                                def.name, param.name
                            ))
                        })?,
                },
            };
            frame.insert(param.name.clone(), value);
        }
        if let Some(k) = kwargs.keys().next() {
            return Err(self.rt(format!(
                "{}() got an unexpected keyword argument '{}'",
                def.name, k
            )));
        }
        let caller_line = self.line;
        self.frames.push(frame);
        let result = self.exec_block(&def.body);
        self.frames.pop();
        let flow = result?;
        self.line = caller_line;
        match flow {
            Flow::Return(v) => Ok(v),
            Flow::Normal => Ok(Value::None),
            Flow::Break | Flow::Continue => Err(self.rt("'break' or 'continue' outside loop")),
        }
    }

    fn sort_values(
        &mut self,
        items: Vec<Value>,
        key: Option<Value>,
        reverse: bool,
    ) -> Result<Vec<Value>, ScriptError> {
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            let k = match &key {
                Some(f) if !matches!(f, Value::None) => {
                    self.call_value(f.clone(), vec![item.clone()], BTreeMap::new())?
                }
                _ => item.clone(),
            };
            keyed.push((k, item));
        }
        let mut failure = None;
        keyed.sort_by(|a, b| {
            let (l, r) = if reverse { (&b.0, &a.0) } else { (&a.0, &b.0) };
            compare_values(l, r).unwrap_or_else(|e| {
                failure.get_or_insert(e);
                Ordering::Equal
            })
        });
        if let Some(e) = failure {
            return Err(self.rt(e));
        }
        Ok(keyed.into_iter().map(|(_, v)| v).collect())
    }

    /// min / max 共用
    fn extreme(
        &mut self,
        name: &str,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
        want: Ordering,
    ) -> Result<Value, ScriptError> {
        let mut a = Args::new(name, Vec::new(), kwargs);
        let key = a.opt(usize::MAX, "key");
        let default = a.opt(usize::MAX, "default");
        a.finish().map_err(|m| self.rt(m))?;
        let candidates = match args.len() {
            0 => return Err(self.rt(format!("{name} expected at least 1 argument, got 0"))),
            1 => self.iterate(&args[0])?,
            _ => args,
        };
        let mut best: Option<(Value, Value)> = None;
        for item in candidates {
            let k = match &key {
                Some(f) if !matches!(f, Value::None) => {
                    self.call_value(f.clone(), vec![item.clone()], BTreeMap::new())?
                }
                _ => item.clone(),
            };
            let replace = match &best {
                None => true,
                Some((best_key, _)) => {
                    compare_values(&k, best_key).map_err(|m| self.rt(m))? == want
                }
            };
            if replace {
                best = Some((k, item));
            }
        }
        match (best, default) {
            (Some((_, v)), _) => Ok(v),
            (None, Some(d)) => Ok(d),
            (None, None) => Err(self.rt(format!("{name}() arg is an empty sequence"))),
        }
    }

    fn call_builtin(
        &mut self,
        name: &'static str,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
    ) -> Result<Value, ScriptError> {
        match name {
            "min" => return self.extreme(name, args, kwargs, Ordering::Less),
            "max" => return self.extreme(name, args, kwargs, Ordering::Greater),
            "zip" => {
                if !kwargs.is_empty() {
                    return Err(self.rt("zip() takes no keyword arguments"));
                }
                let mut columns = Vec::with_capacity(args.len());
                for a in &args {
                    columns.push(self.iterate(a)?);
                }
                let len = columns.iter().map(Vec::len).min().unwrap_or(0);
                let rows = (0..len)
                    .map(|i| Value::list(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect();
                return Ok(Value::list(rows));
            }
            "print" => {
                let mut a = Args::new(name, Vec::new(), kwargs);
                let sep = a.opt_string(usize::MAX, "sep").map_err(|m| self.rt(m))?;
                let _ = a.opt(usize::MAX, "end");
                a.finish().map_err(|m| self.rt(m))?;
                let parts: Vec<String> = args.iter().map(Value::display).collect();
                self.printed.push(parts.join(sep.as_deref().unwrap_or(" ")));
                return Ok(Value::None);
            }
            _ => {}
        }

        let mut a = Args::new(name, args, kwargs);
        let result = match name {
            "len" => match a.required(0, "obj").map_err(|m| self.rt(m))? {
                Value::Str(s) => Value::Int(s.chars().count() as i64),
                Value::List(items) => Value::Int(items.borrow().len() as i64),
                Value::Dict(map) => Value::Int(map.borrow().len() as i64),
                other => {
                    return Err(self.rt(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )))
                }
            },
            "str" => Value::Str(a.opt(0, "object").map(|v| v.display()).unwrap_or_default()),
            "repr" => Value::Str(a.required(0, "object").map_err(|m| self.rt(m))?.repr()),
            "int" => match a.opt(0, "x").unwrap_or(Value::Int(0)) {
                Value::Int(i) => Value::Int(i),
                Value::Bool(b) => Value::Int(i64::from(b)),
                Value::Float(f) => {
                    if !f.is_finite() || f.abs() >= i64::MAX as f64 {
                        return Err(self.rt(format!("cannot convert float {f} to integer")));
                    }
                    Value::Int(f.trunc() as i64)
                }
                Value::Str(s) => Value::Int(s.trim().replace('_', "").parse::<i64>().map_err(|_| {
                    self.rt(format!("invalid literal for int() with base 10: '{s}'"))
                })?),
                other => {
                    return Err(self.rt(format!(
                        "int() argument must be a string or a number, not '{}'",
                        other.type_name()
                    )))
                }
            },
            "float" => match a.opt(0, "x").unwrap_or(Value::Float(0.0)) {
                Value::Str(s) => Value::Float(s.trim().parse::<f64>().map_err(|_| {
                    self.rt(format!("could not convert string to float: '{s}'"))
                })?),
                other => Value::Float(as_f64(&other).ok_or_else(|| {
                    self.rt(format!(
                        "float() argument must be a string or a number, not '{}'",
                        other.type_name()
                    ))
                })?),
            },
            "bool" => Value::Bool(a.opt(0, "x").is_some_and(|v| v.truthy())),
            "list" => match a.opt(0, "iterable") {
                Some(v) => Value::list(self.iterate(&v)?),
                None => Value::list(Vec::new()),
            },
            "dict" => {
                let mut map = BTreeMap::new();
                match a.opt(0, "mapping") {
                    None => {}
                    Some(Value::Dict(other)) => map.extend(other.borrow().clone()),
                    Some(other) => {
                        for pair in self.iterate(&other)? {
                            let (k, v) = match &pair {
                                Value::List(kv) if kv.borrow().len() == 2 => {
                                    let kv = kv.borrow();
                                    (kv[0].clone(), kv[1].clone())
                                }
                                _ => {
                                    return Err(self.rt(
                                        "dictionary update sequence element must be a pair",
                                    ))
                                }
                            };
                            let Value::Str(k) = k else {
                                return Err(self.rt("dict keys must be str"));
                            };
                            map.insert(k, v);
                        }
                    }
                }
                map.extend(std::mem::take(a.kwargs_mut()));
                Value::dict(map)
            }
            "range" => {
                let first = a.int(0, "start").map_err(|m| self.rt(m))?;
                let second = a.opt_int(1, "stop").map_err(|m| self.rt(m))?;
                let step = a.opt_int(2, "step").map_err(|m| self.rt(m))?.unwrap_or(1);
                let (start, stop) = match second {
                    Some(stop) => (first, stop),
                    None => (0, first),
                };
                if step == 0 {
                    return Err(self.rt("range() arg 3 must not be zero"));
                }
                let span = if step > 0 {
                    (stop as i128 - start as i128 + step as i128 - 1) / step as i128
                } else {
                    (start as i128 - stop as i128 - step as i128 - 1) / (-(step as i128))
                };
                let count = span.max(0);
                if count > MAX_COLLECTION_LEN as i128 {
                    return Err(self.rt("range too large"));
                }
                Value::list(
                    (0..count as i64)
                        .map(|i| Value::Int(start + i * step))
                        .collect(),
                )
            }
            "sum" => {
                let items = a.required(0, "iterable").map_err(|m| self.rt(m))?;
                let mut total = a.opt(1, "start").unwrap_or(Value::Int(0));
                for item in self.iterate(&items)? {
                    total = self.binary(BinOp::Add, total, item)?;
                }
                total
            }
            "abs" => match a.required(0, "x").map_err(|m| self.rt(m))? {
                Value::Int(i) => Value::Int(i.checked_abs().ok_or_else(|| self.rt("integer overflow"))?),
                Value::Float(f) => Value::Float(f.abs()),
                Value::Bool(b) => Value::Int(i64::from(b)),
                Value::Timedelta(d) if d < chrono::Duration::zero() => Value::Timedelta(-d),
                Value::Timedelta(d) => Value::Timedelta(d),
                other => {
                    return Err(self.rt(format!(
                        "bad operand type for abs(): '{}'",
                        other.type_name()
                    )))
                }
            },
            "round" => {
                let x = a.required(0, "number").map_err(|m| self.rt(m))?;
                let digits = a.opt_int(1, "ndigits").map_err(|m| self.rt(m))?;
                match (x, digits) {
                    (Value::Int(i), _) => Value::Int(i),
                    (Value::Float(f), None) => {
                        let r = f.round_ties_even();
                        if !r.is_finite() || r.abs() >= i64::MAX as f64 {
                            return Err(self.rt(format!("cannot round {f} to integer")));
                        }
                        Value::Int(r as i64)
                    }
                    (Value::Float(f), Some(n)) => {
                        let factor = 10f64.powi(n.clamp(-300, 300) as i32);
                        Value::Float((f * factor).round_ties_even() / factor)
                    }
                    (other, _) => {
                        return Err(self.rt(format!(
                            "type {} doesn't define round()",
                            other.type_name()
                        )))
                    }
                }
            }
            "sorted" => {
                let items = a.required(0, "iterable").map_err(|m| self.rt(m))?;
                let key = a.opt(usize::MAX, "key");
                let reverse = a.flag("reverse");
                let items = self.iterate(&items)?;
                Value::list(self.sort_values(items, key, reverse)?)
            }
            "reversed" => {
                let items = a.required(0, "sequence").map_err(|m| self.rt(m))?;
                let mut items = self.iterate(&items)?;
                items.reverse();
                Value::list(items)
            }
            "enumerate" => {
                let items = a.required(0, "iterable").map_err(|m| self.rt(m))?;
                let start = a.opt_int(1, "start").map_err(|m| self.rt(m))?.unwrap_or(0);
                let items = self.iterate(&items)?;
                Value::list(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| Value::list(vec![Value::Int(start + i as i64), v]))
                        .collect(),
                )
            }
            "any" | "all" => {
                let items = a.required(0, "iterable").map_err(|m| self.rt(m))?;
                let items = self.iterate(&items)?;
                if name == "any" {
                    Value::Bool(items.iter().any(Value::truthy))
                } else {
                    Value::Bool(items.iter().all(Value::truthy))
                }
            }
            "type" => Value::str(a.required(0, "object").map_err(|m| self.rt(m))?.type_name()),
            "Exception" | "ValueError" | "TypeError" | "KeyError" | "RuntimeError" => {
                match a.opt(0, "message") {
                    Some(msg) => Value::Str(format!("{name}: {}", msg.display())),
                    None => Value::str(name),
                }
            }
            other => return Err(self.rt(format!("name '{other}' is not defined"))),
        };
        a.finish().map_err(|m| self.rt(m))?;
        Ok(result)
    }
}

fn normalize_index(idx: i64, len: usize) -> Option<usize> {
    let idx = if idx < 0 { idx + len as i64 } else { idx };
    (idx >= 0 && (idx as usize) < len).then_some(idx as usize)
}

fn is_same(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
        (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
        (Value::Context, Value::Context) => true,
        _ => false,
    }
}

fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse;
    use crate::script::policy::RestrictedPolicy;

    fn run(src: &str) -> Result<HashMap<String, Value>, ScriptError> {
        let program = parse(src)?;
        let mut host = NullHost;
        let policy = RestrictedPolicy::default();
        let mut interp = Interpreter::new(
            &mut host,
            &policy,
            CancellationToken::new(),
            Duration::from_secs(5),
        );
        interp.run(&program)?;
        Ok(interp.globals().clone())
    }

    fn get(src: &str, name: &str) -> String {
        run(src).unwrap()[name].display()
    }

    #[test]
    fn test_arithmetic_semantics() {
        assert_eq!(get("x = 7 // -2", "x"), "-4");
        assert_eq!(get("x = -7 % 3", "x"), "2");
        assert_eq!(get("x = 2 ** 10", "x"), "1024");
        assert_eq!(get("x = 1 / 4", "x"), "0.25");
        assert_eq!(get("x = 1 < 2 <= 2", "x"), "True");
    }

    #[test]
    fn test_functions_defaults_and_recursion() {
        let src = "def fact(n, acc=1):\n    if n <= 1:\n        return acc\n    return fact(n - 1, acc * n)\nx = fact(5)";
        assert_eq!(get(src, "x"), "120");
    }

    #[test]
    fn test_recursion_depth_bound() {
        let err = run("def f(n):\n    return f(n + 1)\nf(0)").unwrap_err();
        assert!(err.to_string().contains("recursion depth"));
    }

    #[test]
    fn test_loops_and_collections() {
        let src = r#"
words = "the quick brown the fox".split()
counts = {}
for w in words:
    counts[w] = counts.get(w, 0) + 1
n = 0
while n < 10:
    n += 3
    if n == 6:
        break
pairs = list(enumerate(["a", "b"], 1))
for k, v in counts.items():
    if v > 1:
        repeated = k
"#;
        let globals = run(src).unwrap();
        assert_eq!(
            globals["counts"].display(),
            "{'brown': 1, 'fox': 1, 'quick': 1, 'the': 2}"
        );
        assert_eq!(globals["n"].display(), "6");
        assert_eq!(globals["pairs"].display(), "[[1, 'a'], [2, 'b']]");
        assert_eq!(globals["repeated"].display(), "the");
    }

    #[test]
    fn test_runtime_error_keeps_earlier_bindings() {
        let program = parse("a = 1
b = a / 0
c = 3").unwrap();
        let mut host = NullHost;
        let policy = RestrictedPolicy::default();
        let mut interp = Interpreter::new(
            &mut host,
            &policy,
            CancellationToken::new(),
            Duration::from_secs(1),
        );
        let err = interp.run(&program).unwrap_err();
        assert!(matches!(err, ScriptError::Runtime { line: 2, .. }));
        assert!(interp.globals().contains_key("a"));
        assert!(!interp.globals().contains_key("c"));
    }

    #[test]
    fn test_try_except_binds_message() {
        let src = "try:\n    x = 1 / 0\nexcept ZeroDivisionError as e:\n    msg = e\n";
        assert_eq!(get(src, "msg"), "division by zero");
    }

    #[test]
    fn test_raise_custom_error() {
        let err = run("raise ValueError(\"bad input\")").unwrap_err();
        assert_eq!(
            err,
            ScriptError::Runtime {
                line: 1,
                message: "ValueError: bad input".into()
            }
        );
    }

    #[test]
    fn test_import_policy() {
        assert!(run("import math\nx = math.floor(2.7)").is_ok());
        let err = run("import os").unwrap_err();
        assert!(err.to_string().contains("not allowed"));
        let err = run("x = 'a'.__class__").unwrap_err();
        assert!(err.to_string().contains("not allowed"));
    }

    #[test]
    fn test_loop_budget_enforced() {
        let program = parse("while True:\n    pass").unwrap();
        let mut host = NullHost;
        let policy = RestrictedPolicy::new(1000);
        let mut interp = Interpreter::new(
            &mut host,
            &policy,
            CancellationToken::new(),
            Duration::from_secs(5),
        );
        let err = interp.run(&program).unwrap_err();
        assert!(err.to_string().contains("iteration budget"));
    }

    #[test]
    fn test_deadline_enforced() {
        let program = parse("while True:\n    pass").unwrap();
        let mut host = NullHost;
        let policy = RestrictedPolicy::new(u64::MAX);
        let mut interp = Interpreter::new(
            &mut host,
            &policy,
            CancellationToken::new(),
            Duration::from_millis(20),
        );
        assert!(matches!(
            interp.run(&program),
            Err(ScriptError::Timeout { .. })
        ));
    }

    #[test]
    fn test_cancelled_token_stops_before_first_statement() {
        let program = parse("x = 1").unwrap();
        let mut host = NullHost;
        let policy = RestrictedPolicy::default();
        let token = CancellationToken::new();
        token.cancel();
        let mut interp = Interpreter::new(&mut host, &policy, token, Duration::from_secs(1));
        assert_eq!(interp.run(&program), Err(ScriptError::Cancelled));
        assert!(!interp.globals().contains_key("x"));
    }

    #[test]
    fn test_ctx_call_without_host_is_runtime_error() {
        let err = run("x = ctx.get_current_time()").unwrap_err();
        assert!(matches!(err, ScriptError::Runtime { .. }));
    }

    #[test]
    fn test_datetime_arithmetic() {
        let src = "from datetime import datetime, timedelta\nd = datetime(2024, 1, 31) + timedelta(days=1)\ns = d.strftime('%Y-%m-%d')\nwd = d.weekday()";
        let globals = run(src).unwrap();
        assert_eq!(globals["s"].display(), "2024-02-01");
        assert_eq!(globals["wd"].display(), "3");
    }

    #[test]
    fn test_string_helpers() {
        assert_eq!(get("x = 'Hello {}'.format('World')", "x"), "Hello World");
        assert_eq!(get("x = 'abcdef'[1:-1]", "x"), "bcde");
        assert_eq!(get("x = 'ab' * 3", "x"), "ababab");
        assert_eq!(get("x = ', '.join(['a', 'b'])", "x"), "a, b");
        assert_eq!(get("x = 'b' in 'abc'", "x"), "True");
    }

    #[test]
    fn test_list_sort_with_key() {
        let src = "def neg(v):\n    return -v\nitems = [3, 1, 2]\nitems.sort(key=neg)";
        assert_eq!(get(src, "items"), "[3, 2, 1]");
    }
}
