//! 内置类型的属性与方法：str / list / dict / datetime / date / timedelta / Pattern / Match

use std::collections::BTreeMap;

use chrono::{Datelike, Timelike};

use super::stdlib::{self, as_f64, Anchor, Args};
use super::value::{values_equal, Value};

/// 单个字符串的最大字节数
pub(super) const MAX_STR_LEN: usize = 1_000_000;
/// 单个列表 / 字典的最大元素数
pub(super) const MAX_COLLECTION_LEN: usize = 1_000_000;

const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "join", "replace", "startswith",
    "endswith", "find", "index", "count", "title", "capitalize", "isdigit", "isalpha", "isalnum",
    "isspace", "isupper", "islower", "splitlines", "format", "zfill", "ljust", "rjust", "center",
];
const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "index", "count", "reverse", "clear", "copy",
    "sort",
];
const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "setdefault", "update", "clear", "copy",
];
const DATETIME_METHODS: &[&str] = &[
    "strftime", "isoformat", "weekday", "isoweekday", "date", "timestamp",
];
const DATE_METHODS: &[&str] = &["strftime", "isoformat", "weekday", "isoweekday"];
const PATTERN_METHODS: &[&str] = &["search", "match", "fullmatch", "findall", "sub", "split"];
const MATCH_METHODS: &[&str] = &["group", "groups", "start", "end", "span"];

/// 读取 `value.attr`：数据属性直接返回，方法返回绑定对象
pub(super) fn attribute(value: &Value, attr: &str) -> Option<Value> {
    let data = match value {
        Value::DateTime(dt) => match attr {
            "year" => Some(Value::Int(i64::from(dt.year()))),
            "month" => Some(Value::Int(i64::from(dt.month()))),
            "day" => Some(Value::Int(i64::from(dt.day()))),
            "hour" => Some(Value::Int(i64::from(dt.hour()))),
            "minute" => Some(Value::Int(i64::from(dt.minute()))),
            "second" => Some(Value::Int(i64::from(dt.second()))),
            _ => None,
        },
        Value::Date(d) => match attr {
            "year" => Some(Value::Int(i64::from(d.year()))),
            "month" => Some(Value::Int(i64::from(d.month()))),
            "day" => Some(Value::Int(i64::from(d.day()))),
            _ => None,
        },
        Value::Timedelta(d) => match attr {
            "days" => Some(Value::Int(d.num_days())),
            "seconds" => Some(Value::Int(d.num_seconds() - d.num_days() * 86_400)),
            _ => None,
        },
        Value::Pattern(re) if attr == "pattern" => Some(Value::str(re.as_str())),
        _ => None,
    };
    if data.is_some() {
        return data;
    }
    let table: &[&str] = match value {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::DateTime(_) => DATETIME_METHODS,
        Value::Date(_) => DATE_METHODS,
        Value::Timedelta(_) => &["total_seconds"],
        Value::Pattern(_) => PATTERN_METHODS,
        Value::Match(_) => MATCH_METHODS,
        _ => &[],
    };
    table.contains(&attr).then(|| Value::Method {
        receiver: Box::new(value.clone()),
        name: attr.to_string(),
    })
}

pub(super) fn call_method(
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
) -> Result<Value, String> {
    let qualified = format!("{}.{}", receiver.type_name(), name);
    let mut a = Args::new(&qualified, args, kwargs);
    let result = match receiver {
        Value::Str(s) => str_method(s, name, &mut a)?,
        Value::List(_) => list_method(receiver, name, &mut a)?,
        Value::Dict(_) => dict_method(receiver, name, &mut a)?,
        Value::DateTime(dt) => match name {
            "strftime" => Value::Str(stdlib::format_datetime(dt, &a.string(0, "format")?)?),
            "isoformat" => Value::Str(dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
            "weekday" => Value::Int(stdlib::weekday_index(&dt.date())),
            "isoweekday" => Value::Int(stdlib::weekday_index(&dt.date()) + 1),
            "date" => Value::Date(dt.date()),
            "timestamp" => Value::Float(dt.and_utc().timestamp() as f64),
            _ => return Err(no_method(receiver, name)),
        },
        Value::Date(d) => match name {
            "strftime" => Value::Str(stdlib::format_date(d, &a.string(0, "format")?)?),
            "isoformat" => Value::Str(d.format("%Y-%m-%d").to_string()),
            "weekday" => Value::Int(stdlib::weekday_index(d)),
            "isoweekday" => Value::Int(stdlib::weekday_index(d) + 1),
            _ => return Err(no_method(receiver, name)),
        },
        Value::Timedelta(d) if name == "total_seconds" => {
            Value::Float(d.num_milliseconds() as f64 / 1000.0)
        }
        Value::Pattern(re) if name == "sub" => {
            let repl = a.string(0, "repl")?;
            let text = a.string(1, "string")?;
            let count = a.opt_int(2, "count")?.unwrap_or(0).max(0) as usize;
            stdlib::regex_sub(re, &repl, &text, count)
        }
        Value::Pattern(re) => {
            let text = a.string(0, "string")?;
            match name {
                "search" => stdlib::match_value(re, &text, Anchor::Search),
                "match" => stdlib::match_value(re, &text, Anchor::Start),
                "fullmatch" => stdlib::match_value(re, &text, Anchor::Full),
                "findall" => stdlib::findall(re, &text),
                "split" => stdlib::regex_split(re, &text),
                _ => return Err(no_method(receiver, name)),
            }
        }
        Value::Match(m) => match name {
            "group" => {
                let idx = a.opt_int(0, "group")?.unwrap_or(0);
                let group = usize::try_from(idx)
                    .ok()
                    .and_then(|i| m.groups.get(i))
                    .ok_or_else(|| "no such group".to_string())?;
                group.clone().map(Value::Str).unwrap_or(Value::None)
            }
            "groups" => Value::list(
                m.groups
                    .iter()
                    .skip(1)
                    .map(|g| g.clone().map(Value::Str).unwrap_or(Value::None))
                    .collect(),
            ),
            "start" => Value::Int(m.start as i64),
            "end" => Value::Int(m.end as i64),
            "span" => Value::list(vec![Value::Int(m.start as i64), Value::Int(m.end as i64)]),
            _ => return Err(no_method(receiver, name)),
        },
        _ => return Err(no_method(receiver, name)),
    };
    a.finish()?;
    Ok(result)
}

fn no_method(receiver: &Value, name: &str) -> String {
    format!("'{}' object has no attribute '{}'", receiver.type_name(), name)
}

fn char_index(s: &str, byte_idx: usize) -> i64 {
    s[..byte_idx].chars().count() as i64
}

fn str_method(s: &str, name: &str, a: &mut Args) -> Result<Value, String> {
    Ok(match name {
        "upper" => Value::Str(s.to_uppercase()),
        "lower" => Value::Str(s.to_lowercase()),
        "strip" | "lstrip" | "rstrip" => {
            let chars = a.opt_string(0, "chars")?;
            let matcher = |c: char| match &chars {
                Some(set) => set.contains(c),
                None => c.is_whitespace(),
            };
            Value::str(match name {
                "strip" => s.trim_matches(matcher),
                "lstrip" => s.trim_start_matches(matcher),
                _ => s.trim_end_matches(matcher),
            })
        }
        "split" => {
            let sep = a.opt_string(0, "sep")?;
            let maxsplit = a.opt_int(1, "maxsplit")?.unwrap_or(-1);
            Value::list(split(s, sep.as_deref(), maxsplit)?)
        }
        "splitlines" => Value::list(s.lines().map(Value::str).collect()),
        "join" => {
            let items = match a.required(0, "iterable")? {
                Value::List(items) => items.borrow().clone(),
                other => return Err(format!("can only join a list, not {}", other.type_name())),
            };
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Str(p) => parts.push(p),
                    other => {
                        return Err(format!(
                            "sequence item: expected str instance, {} found",
                            other.type_name()
                        ))
                    }
                }
            }
            let joined = parts.join(s);
            check_str_len(&joined)?;
            Value::Str(joined)
        }
        "replace" => {
            let old = a.string(0, "old")?;
            let new = a.string(1, "new")?;
            let replaced = match a.opt_int(2, "count")? {
                Some(n) if n >= 0 => s.replacen(&old, &new, n as usize),
                _ => s.replace(&old, &new),
            };
            check_str_len(&replaced)?;
            Value::Str(replaced)
        }
        "startswith" | "endswith" => {
            let candidates = match a.required(0, "prefix")? {
                Value::Str(p) => vec![p],
                Value::List(items) => items.borrow().iter().map(Value::display).collect(),
                other => {
                    return Err(format!(
                        "{name} first arg must be str or a list of str, not {}",
                        other.type_name()
                    ))
                }
            };
            let hit = candidates.iter().any(|p| {
                if name == "startswith" {
                    s.starts_with(p.as_str())
                } else {
                    s.ends_with(p.as_str())
                }
            });
            Value::Bool(hit)
        }
        "find" | "index" => {
            let needle = a.string(0, "sub")?;
            match s.find(&needle) {
                Some(idx) => Value::Int(char_index(s, idx)),
                None if name == "find" => Value::Int(-1),
                None => return Err("substring not found".to_string()),
            }
        }
        "count" => {
            let needle = a.string(0, "sub")?;
            if needle.is_empty() {
                Value::Int(s.chars().count() as i64 + 1)
            } else {
                Value::Int(s.matches(&needle).count() as i64)
            }
        }
        "title" => {
            let mut out = String::with_capacity(s.len());
            let mut prev_alpha = false;
            for c in s.chars() {
                if c.is_alphabetic() {
                    if prev_alpha {
                        out.extend(c.to_lowercase());
                    } else {
                        out.extend(c.to_uppercase());
                    }
                    prev_alpha = true;
                } else {
                    out.push(c);
                    prev_alpha = false;
                }
            }
            Value::Str(out)
        }
        "capitalize" => {
            let mut chars = s.chars();
            let out = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            };
            Value::Str(out)
        }
        "isdigit" => Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())),
        "isalpha" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)),
        "isalnum" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphanumeric)),
        "isspace" => Value::Bool(!s.is_empty() && s.chars().all(char::is_whitespace)),
        "isupper" => Value::Bool(
            s.chars().any(char::is_alphabetic)
                && s.chars().filter(|c| c.is_alphabetic()).all(char::is_uppercase),
        ),
        "islower" => Value::Bool(
            s.chars().any(char::is_alphabetic)
                && s.chars().filter(|c| c.is_alphabetic()).all(char::is_lowercase),
        ),
        "zfill" | "ljust" | "rjust" | "center" => {
            let width = a.int(0, "width")?.max(0) as usize;
            let fill = match a.opt_string(1, "fillchar")? {
                Some(f) => f.chars().next().unwrap_or(' '),
                None if name == "zfill" => '0',
                None => ' ',
            };
            if width > MAX_STR_LEN {
                return Err("result string too long".to_string());
            }
            let align = match name {
                "ljust" => '<',
                "center" => '^',
                _ => '>',
            };
            Value::Str(pad(s, width, fill, align))
        }
        "format" => {
            let positional: Vec<Value> = (0..a.len()).filter_map(|i| a.opt(i, "")).collect();
            let kwargs = std::mem::take(a.kwargs_mut());
            Value::Str(format_string(s, &positional, &kwargs)?)
        }
        _ => return Err(format!("'str' object has no attribute '{name}'")),
    })
}

fn split(s: &str, sep: Option<&str>, maxsplit: i64) -> Result<Vec<Value>, String> {
    match sep {
        Some("") => Err("empty separator".to_string()),
        Some(sep) if maxsplit < 0 => Ok(s.split(sep).map(Value::str).collect()),
        Some(sep) => Ok(s
            .splitn(maxsplit as usize + 1, sep)
            .map(Value::str)
            .collect()),
        None if maxsplit < 0 => Ok(s.split_whitespace().map(Value::str).collect()),
        None => {
            let mut parts = Vec::new();
            let mut rest = s.trim_start();
            while (parts.len() as i64) < maxsplit && !rest.is_empty() {
                let Some(idx) = rest.find(char::is_whitespace) else {
                    break;
                };
                parts.push(Value::str(&rest[..idx]));
                rest = rest[idx..].trim_start();
            }
            if !rest.is_empty() {
                parts.push(Value::str(rest));
            }
            Ok(parts)
        }
    }
}

fn check_str_len(s: &str) -> Result<(), String> {
    if s.len() > MAX_STR_LEN {
        return Err("result string too long".to_string());
    }
    Ok(())
}

fn check_collection_len(len: usize) -> Result<(), String> {
    if len > MAX_COLLECTION_LEN {
        return Err("collection size limit exceeded".to_string());
    }
    Ok(())
}

fn normalize_index(idx: i64, len: usize) -> Option<usize> {
    let idx = if idx < 0 { idx + len as i64 } else { idx };
    (idx >= 0 && (idx as usize) < len).then_some(idx as usize)
}

fn list_method(receiver: &Value, name: &str, a: &mut Args) -> Result<Value, String> {
    let Value::List(items) = receiver else {
        return Err(no_method(receiver, name));
    };
    Ok(match name {
        "append" => {
            let item = a.required(0, "object")?;
            let mut items = items.borrow_mut();
            check_collection_len(items.len() + 1)?;
            items.push(item);
            Value::None
        }
        "extend" => {
            let extra = match a.required(0, "iterable")? {
                Value::List(other) => other.borrow().clone(),
                Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
                other => return Err(format!("'{}' object is not iterable", other.type_name())),
            };
            let mut items = items.borrow_mut();
            check_collection_len(items.len() + extra.len())?;
            items.extend(extra);
            Value::None
        }
        "insert" => {
            let idx = a.int(0, "index")?;
            let item = a.required(1, "object")?;
            let mut items = items.borrow_mut();
            check_collection_len(items.len() + 1)?;
            let len = items.len() as i64;
            let pos = if idx < 0 { (idx + len).max(0) } else { idx.min(len) };
            items.insert(pos as usize, item);
            Value::None
        }
        "pop" => {
            let mut items = items.borrow_mut();
            let len = items.len();
            let idx = a.opt_int(0, "index")?.unwrap_or(-1);
            let pos = normalize_index(idx, len).ok_or_else(|| {
                if len == 0 {
                    "pop from empty list".to_string()
                } else {
                    "pop index out of range".to_string()
                }
            })?;
            items.remove(pos)
        }
        "remove" => {
            let target = a.required(0, "value")?;
            let mut items = items.borrow_mut();
            let pos = items
                .iter()
                .position(|v| values_equal(v, &target))
                .ok_or_else(|| "list.remove(x): x not in list".to_string())?;
            items.remove(pos);
            Value::None
        }
        "index" => {
            let target = a.required(0, "value")?;
            let items = items.borrow();
            let pos = items
                .iter()
                .position(|v| values_equal(v, &target))
                .ok_or_else(|| format!("{} is not in list", target.repr()))?;
            Value::Int(pos as i64)
        }
        "count" => {
            let target = a.required(0, "value")?;
            let n = items
                .borrow()
                .iter()
                .filter(|v| values_equal(v, &target))
                .count();
            Value::Int(n as i64)
        }
        "reverse" => {
            items.borrow_mut().reverse();
            Value::None
        }
        "clear" => {
            items.borrow_mut().clear();
            Value::None
        }
        "copy" => Value::list(items.borrow().clone()),
        _ => return Err(no_method(receiver, name)),
    })
}

fn dict_key(v: Value) -> Result<String, String> {
    match v {
        Value::Str(s) => Ok(s),
        other => Err(format!("dict keys must be str, not {}", other.type_name())),
    }
}

fn dict_method(receiver: &Value, name: &str, a: &mut Args) -> Result<Value, String> {
    let Value::Dict(map) = receiver else {
        return Err(no_method(receiver, name));
    };
    Ok(match name {
        "get" => {
            let key = a.required(0, "key")?;
            let default = a.opt(1, "default").unwrap_or(Value::None);
            match key {
                Value::Str(k) => map.borrow().get(&k).cloned().unwrap_or(default),
                _ => default,
            }
        }
        "keys" => Value::list(map.borrow().keys().map(Value::str).collect()),
        "values" => Value::list(map.borrow().values().cloned().collect()),
        "items" => Value::list(
            map.borrow()
                .iter()
                .map(|(k, v)| Value::list(vec![Value::str(k), v.clone()]))
                .collect(),
        ),
        "pop" => {
            let key = dict_key(a.required(0, "key")?)?;
            let default = a.opt(1, "default");
            let removed = map.borrow_mut().remove(&key);
            match (removed, default) {
                (Some(v), _) => v,
                (None, Some(d)) => d,
                (None, None) => return Err(format!("key not found: '{key}'")),
            }
        }
        "setdefault" => {
            let key = dict_key(a.required(0, "key")?)?;
            let default = a.opt(1, "default").unwrap_or(Value::None);
            let mut map = map.borrow_mut();
            if !map.contains_key(&key) {
                check_collection_len(map.len() + 1)?;
            }
            map.entry(key).or_insert(default).clone()
        }
        "update" => {
            match a.required(0, "other")? {
                Value::Dict(other) => {
                    let other = other.borrow().clone();
                    let mut map = map.borrow_mut();
                    map.extend(other);
                    check_collection_len(map.len())?;
                }
                other => {
                    return Err(format!(
                        "'{}' object is not a mapping",
                        other.type_name()
                    ))
                }
            }
            Value::None
        }
        "clear" => {
            map.borrow_mut().clear();
            Value::None
        }
        "copy" => Value::dict(map.borrow().clone()),
        _ => return Err(no_method(receiver, name)),
    })
}

fn pad(s: &str, width: usize, fill: char, align: char) -> String {
    let len = s.chars().count();
    if len >= width {
        return s.to_string();
    }
    let total = width - len;
    let (left, right) = match align {
        '<' => (0, total),
        '^' => (total / 2, total - total / 2),
        _ => (total, 0),
    };
    let mut out = String::with_capacity(width);
    out.extend(std::iter::repeat(fill).take(left));
    out.push_str(s);
    out.extend(std::iter::repeat(fill).take(right));
    out
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::new();
    let len = digits.len();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// `{:[[fill]align][+][0][width][,][.precision][type]}`
pub(super) fn format_spec(value: &Value, spec: &str) -> Result<String, String> {
    if spec.is_empty() {
        return Ok(value.display());
    }
    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0;
    let mut fill = ' ';
    let mut align = None;
    if chars.len() >= 2 && "<>^".contains(chars[1]) {
        fill = chars[0];
        align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && "<>^".contains(chars[0]) {
        align = Some(chars[0]);
        i = 1;
    }
    let plus = chars.get(i) == Some(&'+');
    if plus {
        i += 1;
    }
    if chars.get(i) == Some(&'0') && align.is_none() {
        fill = '0';
        align = Some('>');
        i += 1;
    }
    let mut width = 0usize;
    while let Some(d) = chars.get(i).and_then(|c| c.to_digit(10)) {
        width = width.saturating_mul(10).saturating_add(d as usize);
        i += 1;
    }
    let comma = chars.get(i) == Some(&',');
    if comma {
        i += 1;
    }
    let mut precision = None;
    if chars.get(i) == Some(&'.') {
        i += 1;
        let mut p = 0usize;
        while let Some(d) = chars.get(i).and_then(|c| c.to_digit(10)) {
            p = p.saturating_mul(10).saturating_add(d as usize);
            i += 1;
        }
        precision = Some(p.min(50));
    }
    let kind: String = chars[i..].iter().collect();
    if width > MAX_STR_LEN {
        return Err("format width too large".to_string());
    }
    let is_number = matches!(value, Value::Int(_) | Value::Float(_) | Value::Bool(_));
    let mut body = match kind.as_str() {
        "f" | "F" | "%" => {
            let x = as_f64(value)
                .ok_or_else(|| format!("unknown format code '{kind}' for {}", value.type_name()))?;
            let prec = precision.unwrap_or(6);
            if kind == "%" {
                format!("{:.*}%", prec, x * 100.0)
            } else {
                format!("{x:.prec$}")
            }
        }
        "d" => match value {
            Value::Int(n) => n.to_string(),
            Value::Bool(b) => i64::from(*b).to_string(),
            other => {
                return Err(format!(
                    "unknown format code 'd' for object of type '{}'",
                    other.type_name()
                ))
            }
        },
        "" | "s" => match (value, precision) {
            (Value::Float(x), Some(p)) => format!("{x:.p$}"),
            (Value::Str(s), Some(p)) => s.chars().take(p).collect(),
            (other, _) => other.display(),
        },
        other => return Err(format!("unsupported format code '{other}'")),
    };
    if comma && is_number {
        let (sign, rest) = match body.strip_prefix('-') {
            Some(rest) => ("-", rest.to_string()),
            None => ("", body.clone()),
        };
        let (int_part, frac) = match rest.find('.') {
            Some(idx) => (rest[..idx].to_string(), rest[idx..].to_string()),
            None => (rest.clone(), String::new()),
        };
        body = format!("{sign}{}{frac}", group_thousands(&int_part));
    }
    if plus && is_number && !body.starts_with('-') {
        body.insert(0, '+');
    }
    let align = align.unwrap_or(if is_number { '>' } else { '<' });
    Ok(pad(&body, width, fill, align))
}

/// `"...".format(...)`
pub(super) fn format_string(
    template: &str,
    args: &[Value],
    kwargs: &BTreeMap<String, Value>,
) -> Result<String, String> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut auto = 0usize;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            out.push('{');
            i += 2;
            continue;
        }
        if c == '}' && chars.get(i + 1) == Some(&'}') {
            out.push('}');
            i += 2;
            continue;
        }
        if c == '{' {
            let close = chars[i + 1..]
                .iter()
                .position(|c| *c == '}')
                .ok_or_else(|| "single '{' encountered in format string".to_string())?;
            let field: String = chars[i + 1..i + 1 + close].iter().collect();
            let (name, spec) = match field.split_once(':') {
                Some((n, s)) => (n.to_string(), s.to_string()),
                None => (field.clone(), String::new()),
            };
            let value = if name.is_empty() {
                let v = args
                    .get(auto)
                    .ok_or_else(|| "replacement index out of range".to_string())?;
                auto += 1;
                v
            } else if let Ok(idx) = name.parse::<usize>() {
                args.get(idx)
                    .ok_or_else(|| format!("replacement index {idx} out of range"))?
            } else {
                kwargs
                    .get(&name)
                    .ok_or_else(|| format!("missing format key '{name}'"))?
            };
            out.push_str(&format_spec(value, &spec)?);
            if out.len() > MAX_STR_LEN {
                return Err("result string too long".to_string());
            }
            i += close + 2;
            continue;
        }
        if c == '}' {
            return Err("single '}' encountered in format string".to_string());
        }
        out.push(c);
        i += 1;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(receiver: Value, name: &str, args: Vec<Value>) -> Result<Value, String> {
        call_method(&receiver, name, args, BTreeMap::new())
    }

    #[test]
    fn test_str_split_variants() {
        let v = call(Value::str("a  b c"), "split", vec![]).unwrap();
        assert_eq!(v.display(), "['a', 'b', 'c']");
        let v = call(Value::str("a,b,,c"), "split", vec![Value::str(",")]).unwrap();
        assert_eq!(v.display(), "['a', 'b', '', 'c']");
        let v = call(Value::str("a b  c"), "split", vec![Value::None, Value::Int(1)]).unwrap();
        assert_eq!(v.display(), "['a', 'b  c']");
    }

    #[test]
    fn test_format_string() {
        let mut kwargs = BTreeMap::new();
        kwargs.insert("name".to_string(), Value::str("Ada"));
        let out = format_string(
            "{} has {:.2f} points, hi {name}! {{x}} {:>5}",
            &[Value::Int(3), Value::Float(2.5), Value::str("ab")],
            &kwargs,
        );
        // 第一个 {} 取 3，{:.2f} 取 2.5，{:>5} 取 "ab"
        assert_eq!(out.unwrap(), "3 has 2.50 points, hi Ada! {x}    ab");
    }

    #[test]
    fn test_format_spec_thousands_and_percent() {
        assert_eq!(format_spec(&Value::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_spec(&Value::Float(0.256), ".1%").unwrap(), "25.6%");
        assert_eq!(format_spec(&Value::Int(7), "03d").unwrap(), "007");
    }

    #[test]
    fn test_list_methods_mutate_in_place() {
        let list = Value::list(vec![Value::Int(1)]);
        call(list.clone(), "append", vec![Value::Int(2)]).unwrap();
        call(list.clone(), "insert", vec![Value::Int(0), Value::Int(0)]).unwrap();
        assert_eq!(list.display(), "[0, 1, 2]");
        assert_eq!(call(list.clone(), "pop", vec![]).unwrap().display(), "2");
        assert!(call(Value::list(vec![]), "pop", vec![]).is_err());
    }

    #[test]
    fn test_dict_get_with_default() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::Int(1));
        let dict = Value::dict(map);
        assert_eq!(call(dict.clone(), "get", vec![Value::str("a")]).unwrap().display(), "1");
        assert_eq!(
            call(dict, "get", vec![Value::str("z"), Value::Int(0)]).unwrap().display(),
            "0"
        );
    }

    #[test]
    fn test_unknown_method_is_none() {
        assert!(attribute(&Value::str("x"), "encode").is_none());
        assert!(attribute(&Value::str("x"), "upper").is_some());
    }
}
