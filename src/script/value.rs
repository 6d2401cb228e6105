//! 脚本运行期值
//!
//! 值只存在于单次执行的阻塞线程内（Rc / RefCell，不跨线程）；与宿主交互一律经 JSON 转换。

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::rc::Rc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::Value as JsonValue;

use super::ast::FunctionDef;

/// 用户定义函数：定义时求值的默认参数随函数保存
#[derive(Debug)]
pub struct Function {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Option<Value>>,
}

/// `re.search` 等返回的匹配结果
#[derive(Debug)]
pub struct MatchData {
    pub groups: Vec<Option<String>>,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Rc<RefCell<Vec<Value>>>),
    Dict(Rc<RefCell<BTreeMap<String, Value>>>),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Timedelta(Duration),
    Pattern(Rc<Regex>),
    Match(Rc<MatchData>),
    Function(Rc<Function>),
    Builtin(&'static str),
    /// 已导入的标准库模块（或其命名空间，如 `datetime.datetime`）
    Module(&'static str),
    NativeFn {
        module: &'static str,
        name: String,
    },
    /// 绑定到接收者的内置方法，如 `"a".upper`
    Method {
        receiver: Box<Value>,
        name: String,
    },
    /// 脚本中的 `ctx`
    Context,
    ContextMethod(String),
}

/// 输出变量提取结果
pub enum OutputValue {
    Json(JsonValue),
    /// 不可 JSON 序列化，已转为字符串
    Coerced(JsonValue),
    /// 函数、模块等非数据绑定
    Skip,
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(map: BTreeMap<String, Value>) -> Value {
        Value::Dict(Rc::new(RefCell::new(map)))
    }

    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::DateTime(_) => "datetime",
            Value::Date(_) => "date",
            Value::Timedelta(_) => "timedelta",
            Value::Pattern(_) => "Pattern",
            Value::Match(_) => "Match",
            Value::Function(_) => "function",
            Value::Builtin(_) | Value::NativeFn { .. } => "builtin_function",
            Value::Module(_) => "module",
            Value::Method { .. } | Value::ContextMethod(_) => "method",
            Value::Context => "ctx",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Timedelta(d) => *d != Duration::zero(),
            _ => true,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_)
                | Value::Builtin(_)
                | Value::NativeFn { .. }
                | Value::Method { .. }
                | Value::ContextMethod(_)
        )
    }

    /// `str(x)` 的结果
    pub fn display(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.repr(),
        }
    }

    /// `repr(x)` 风格，容器内元素使用
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::List(items) => {
                let items = items.borrow();
                let parts: Vec<String> = items.iter().map(Value::repr).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Dict(map) => {
                let map = map.borrow();
                let parts: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("'{}': {}", k, v.repr()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Timedelta(d) => format_timedelta(*d),
            Value::Pattern(re) => format!("re.compile('{}')", re.as_str()),
            Value::Match(m) => format!(
                "<Match span=({}, {}) match='{}'>",
                m.start,
                m.end,
                m.groups.first().cloned().flatten().unwrap_or_default()
            ),
            Value::Function(f) => format!("<function {}>", f.def.name),
            Value::Builtin(name) => format!("<built-in function {name}>"),
            Value::Module(name) => format!("<module '{name}'>"),
            Value::NativeFn { module, name } => format!("<built-in function {module}.{name}>"),
            Value::Method { receiver, name } => {
                format!("<method {} of {}>", name, receiver.type_name())
            }
            Value::Context => "<ctx>".to_string(),
            Value::ContextMethod(name) => format!("<ctx method {name}>"),
        }
    }

    /// 严格 JSON 转换：只接受数据类值（传给宿主的参数使用）
    pub fn to_json(&self) -> Result<JsonValue, String> {
        Ok(match self {
            Value::None => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .ok_or_else(|| format!("float {} is not JSON serializable", format_float(*f)))?,
            Value::Str(s) => JsonValue::String(s.clone()),
            Value::List(items) => JsonValue::Array(
                items
                    .borrow()
                    .iter()
                    .map(Value::to_json)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Dict(map) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in map.borrow().iter() {
                    obj.insert(k.clone(), v.to_json()?);
                }
                JsonValue::Object(obj)
            }
            other => {
                return Err(format!(
                    "object of type '{}' is not JSON serializable",
                    other.type_name()
                ))
            }
        })
    }

    pub fn from_json(value: &JsonValue) -> Value {
        match value {
            JsonValue::Null => Value::None,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(0.0)),
            },
            JsonValue::String(s) => Value::Str(s.clone()),
            JsonValue::Array(items) => Value::list(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(obj) => Value::dict(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// 顶层绑定 → 输出变量
    pub fn to_output(&self) -> OutputValue {
        match self {
            Value::Function(_)
            | Value::Builtin(_)
            | Value::NativeFn { .. }
            | Value::Module(_)
            | Value::Method { .. }
            | Value::Context
            | Value::ContextMethod(_) => OutputValue::Skip,
            data => match data.to_json() {
                Ok(json) => OutputValue::Json(json),
                Err(_) => OutputValue::Coerced(JsonValue::String(data.display())),
            },
        }
    }
}

/// 结构相等（`==`），int 与 float 按数值比较
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
        (Value::Bool(x), Value::Int(y)) | (Value::Int(y), Value::Bool(x)) => i64::from(*x) == *y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| values_equal(a, b))
        }
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        (Value::DateTime(x), Value::DateTime(y)) => x == y,
        (Value::Date(x), Value::Date(y)) => x == y,
        (Value::Timedelta(x), Value::Timedelta(y)) => x == y,
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        (Value::Module(x), Value::Module(y)) => x == y,
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

/// 排序比较（`<`、`sorted`、`min` / `max`）
pub fn compare_values(a: &Value, b: &Value) -> Result<Ordering, String> {
    let numeric = |v: &Value| match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        _ => None,
    };
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::DateTime(x), Value::DateTime(y)) => Ok(x.cmp(y)),
        (Value::Date(x), Value::Date(y)) => Ok(x.cmp(y)),
        (Value::Timedelta(x), Value::Timedelta(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            for (l, r) in x.iter().zip(y.iter()) {
                match compare_values(l, r)? {
                    Ordering::Equal => continue,
                    other => return Ok(other),
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => match (numeric(a), numeric(b)) {
            (Some(x), Some(y)) => Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal)),
            _ => Err(format!(
                "'<' not supported between instances of '{}' and '{}'",
                a.type_name(),
                b.type_name()
            )),
        },
    }
}

pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

fn format_timedelta(d: Duration) -> String {
    let days = d.num_days();
    let rest = d - Duration::days(days);
    let secs = rest.num_seconds();
    let mut out = String::new();
    if days != 0 {
        let _ = write!(out, "{} day{}, ", days, if days.abs() == 1 { "" } else { "s" });
    }
    let _ = write!(
        out,
        "{}:{:02}:{:02}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    );
    out
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}
