//! 可导入的标准库子集：datetime / time / math / json / re / uuid / random

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::rc::Rc;
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use rand::seq::SliceRandom;
use rand::Rng;
use regex::{Regex, RegexBuilder};

use super::value::{MatchData, Value};

/// 解析模块名到静态名（含 `datetime.datetime` 这类命名空间）
pub(super) fn module_name(name: &str) -> Option<&'static str> {
    const NAMES: &[&str] = &[
        "datetime",
        "datetime.datetime",
        "datetime.date",
        "time",
        "math",
        "json",
        "re",
        "uuid",
        "random",
    ];
    NAMES.iter().copied().find(|n| *n == name)
}

const RE_IGNORECASE: i64 = 2;
const RE_MULTILINE: i64 = 8;
const RE_DOTALL: i64 = 16;

/// 模块属性：常量直接返回值，函数返回 NativeFn
pub(super) fn module_attr(module: &'static str, attr: &str) -> Option<Value> {
    let native = |name: &str| {
        Some(Value::NativeFn {
            module,
            name: name.to_string(),
        })
    };
    match (module, attr) {
        ("datetime", "datetime") => Some(Value::Module("datetime.datetime")),
        ("datetime", "date") => Some(Value::Module("datetime.date")),
        ("datetime", "timedelta") => native("timedelta"),
        ("datetime.datetime", "now" | "today" | "fromisoformat" | "strptime") => native(attr),
        ("datetime.date", "today" | "fromisoformat") => native(attr),
        ("time", "time" | "monotonic" | "perf_counter" | "strftime") => native(attr),
        ("math", "pi") => Some(Value::Float(std::f64::consts::PI)),
        ("math", "e") => Some(Value::Float(std::f64::consts::E)),
        ("math", "tau") => Some(Value::Float(std::f64::consts::TAU)),
        ("math", "inf") => Some(Value::Float(f64::INFINITY)),
        ("math", "nan") => Some(Value::Float(f64::NAN)),
        (
            "math",
            "sqrt" | "floor" | "ceil" | "pow" | "log" | "log10" | "log2" | "exp" | "sin" | "cos"
            | "tan" | "fabs" | "trunc" | "isnan" | "isinf",
        ) => native(attr),
        ("json", "dumps" | "loads") => native(attr),
        ("re", "IGNORECASE" | "I") => Some(Value::Int(RE_IGNORECASE)),
        ("re", "MULTILINE" | "M") => Some(Value::Int(RE_MULTILINE)),
        ("re", "DOTALL" | "S") => Some(Value::Int(RE_DOTALL)),
        (
            "re",
            "search" | "match" | "fullmatch" | "findall" | "sub" | "split" | "compile" | "escape",
        ) => native(attr),
        ("uuid", "uuid4") => native(attr),
        ("random", "random" | "randint" | "uniform" | "choice" | "shuffle" | "sample") => {
            native(attr)
        }
        _ => None,
    }
}

/// 位置参数 / 关键字参数读取器
pub(super) struct Args {
    func: String,
    positional: Vec<Option<Value>>,
    kwargs: BTreeMap<String, Value>,
}

impl Args {
    pub(super) fn new(func: &str, args: Vec<Value>, kwargs: BTreeMap<String, Value>) -> Self {
        Self {
            func: func.to_string(),
            positional: args.into_iter().map(Some).collect(),
            kwargs,
        }
    }

    pub(super) fn len(&self) -> usize {
        self.positional.len()
    }

    pub(super) fn at_most(&self, n: usize) -> Result<(), String> {
        if self.positional.len() > n {
            return Err(format!(
                "{}() takes at most {} positional arguments ({} given)",
                self.func,
                n,
                self.positional.len()
            ));
        }
        Ok(())
    }

    pub(super) fn opt(&mut self, idx: usize, key: &str) -> Option<Value> {
        self.positional
            .get_mut(idx)
            .and_then(Option::take)
            .or_else(|| self.kwargs.remove(key))
    }

    pub(super) fn required(&mut self, idx: usize, key: &str) -> Result<Value, String> {
        self.opt(idx, key)
            .ok_or_else(|| format!("{}() missing required argument '{}'", self.func, key))
    }

    pub(super) fn string(&mut self, idx: usize, key: &str) -> Result<String, String> {
        let func = self.func.clone();
        match self.required(idx, key)? {
            Value::Str(s) => Ok(s),
            other => Err(format!(
                "{}() argument '{}' must be str, not {}",
                func,
                key,
                other.type_name()
            )),
        }
    }

    pub(super) fn opt_string(&mut self, idx: usize, key: &str) -> Result<Option<String>, String> {
        match self.opt(idx, key) {
            None | Some(Value::None) => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s)),
            Some(other) => Err(format!(
                "{}() argument '{}' must be str, not {}",
                self.func,
                key,
                other.type_name()
            )),
        }
    }

    pub(super) fn int(&mut self, idx: usize, key: &str) -> Result<i64, String> {
        let func = self.func.clone();
        as_int(&self.required(idx, key)?)
            .ok_or_else(|| format!("{func}() argument '{key}' must be int"))
    }

    pub(super) fn opt_int(&mut self, idx: usize, key: &str) -> Result<Option<i64>, String> {
        match self.opt(idx, key) {
            None | Some(Value::None) => Ok(None),
            Some(v) => as_int(&v)
                .map(Some)
                .ok_or_else(|| format!("{}() argument '{}' must be int", self.func, key)),
        }
    }

    pub(super) fn float(&mut self, idx: usize, key: &str) -> Result<f64, String> {
        let func = self.func.clone();
        as_f64(&self.required(idx, key)?)
            .ok_or_else(|| format!("{func}() argument '{key}' must be a number"))
    }

    pub(super) fn opt_float(&mut self, idx: usize, key: &str) -> Result<Option<f64>, String> {
        match self.opt(idx, key) {
            None | Some(Value::None) => Ok(None),
            Some(v) => as_f64(&v)
                .map(Some)
                .ok_or_else(|| format!("{}() argument '{}' must be a number", self.func, key)),
        }
    }

    pub(super) fn kwargs_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.kwargs
    }

    pub(super) fn flag(&mut self, key: &str) -> bool {
        self.kwargs.remove(key).is_some_and(|v| v.truthy())
    }

    /// 剩余未消费的关键字参数视为错误
    pub(super) fn finish(self) -> Result<(), String> {
        match self.kwargs.keys().next() {
            Some(k) => Err(format!(
                "{}() got an unexpected keyword argument '{}'",
                self.func, k
            )),
            None => Ok(()),
        }
    }
}

pub(super) fn as_int(v: &Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

pub(super) fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        _ => None,
    }
}

pub(super) fn format_datetime(dt: &NaiveDateTime, fmt: &str) -> Result<String, String> {
    let mut out = String::new();
    write!(out, "{}", dt.format(fmt)).map_err(|_| format!("invalid format string '{fmt}'"))?;
    Ok(out)
}

pub(super) fn format_date(d: &NaiveDate, fmt: &str) -> Result<String, String> {
    let mut out = String::new();
    write!(out, "{}", d.format(fmt)).map_err(|_| format!("invalid format string '{fmt}'"))?;
    Ok(out)
}

fn parse_iso_datetime(s: &str) -> Result<NaiveDateTime, String> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|d| d.and_time(NaiveTime::MIN))
        .map_err(|_| format!("invalid isoformat string: '{s}'"))
}

fn monotonic_origin() -> Instant {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    *ORIGIN.get_or_init(Instant::now)
}

/// 正则：按 flags 编译
pub(super) fn compile_regex(pattern: &str, flags: i64) -> Result<Regex, String> {
    RegexBuilder::new(pattern)
        .case_insensitive(flags & RE_IGNORECASE != 0)
        .multi_line(flags & RE_MULTILINE != 0)
        .dot_matches_new_line(flags & RE_DOTALL != 0)
        .size_limit(1 << 20)
        .build()
        .map_err(|e| format!("invalid regular expression: {e}"))
}

/// `\1`、`\g<name>` 风格替换串转为 regex crate 的 `${1}`
pub(super) fn translate_replacement(repl: &str) -> String {
    let chars: Vec<char> = repl.chars().collect();
    let mut out = String::with_capacity(repl.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '$' {
            out.push_str("$$");
        } else if c == '\\' && i + 1 < chars.len() {
            let next = chars[i + 1];
            if next.is_ascii_digit() {
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_ascii_digit() {
                    j += 1;
                }
                let group: String = chars[i + 1..j].iter().collect();
                let _ = write!(out, "${{{group}}}");
                i = j;
                continue;
            }
            if next == 'g' && chars.get(i + 2) == Some(&'<') {
                if let Some(close) = chars[i + 3..].iter().position(|c| *c == '>') {
                    let name: String = chars[i + 3..i + 3 + close].iter().collect();
                    let _ = write!(out, "${{{name}}}");
                    i += 4 + close;
                    continue;
                }
            }
            match next {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                '\\' => out.push('\\'),
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
            i += 2;
            continue;
        } else {
            out.push(c);
        }
        i += 1;
    }
    out
}

pub(super) fn match_value(re: &Regex, text: &str, anchored: Anchor) -> Value {
    let Some(caps) = re.captures(text) else {
        return Value::None;
    };
    let Some(whole) = caps.get(0) else {
        return Value::None;
    };
    let accepted = match anchored {
        Anchor::Search => true,
        Anchor::Start => whole.start() == 0,
        Anchor::Full => whole.start() == 0 && whole.end() == text.len(),
    };
    if !accepted {
        return Value::None;
    }
    let groups = caps
        .iter()
        .map(|g| g.map(|m| m.as_str().to_string()))
        .collect();
    Value::Match(Rc::new(MatchData {
        groups,
        start: text[..whole.start()].chars().count(),
        end: text[..whole.end()].chars().count(),
    }))
}

#[derive(Clone, Copy)]
pub(super) enum Anchor {
    Search,
    Start,
    Full,
}

pub(super) fn findall(re: &Regex, text: &str) -> Value {
    let groups = re.captures_len() - 1;
    let items = re
        .captures_iter(text)
        .map(|caps| {
            let group_str = |i: usize| {
                Value::Str(caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default())
            };
            match groups {
                0 => group_str(0),
                1 => group_str(1),
                n => Value::list((1..=n).map(group_str).collect()),
            }
        })
        .collect();
    Value::list(items)
}

pub(super) fn regex_sub(re: &Regex, repl: &str, text: &str, count: usize) -> Value {
    let repl = translate_replacement(repl);
    Value::Str(re.replacen(text, count, repl.as_str()).into_owned())
}

pub(super) fn regex_split(re: &Regex, text: &str) -> Value {
    Value::list(re.split(text).map(Value::str).collect())
}

/// 调用 `module.name(...)`
pub(super) fn call_native(
    module: &str,
    name: &str,
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
) -> Result<Value, String> {
    let qualified = format!("{module}.{name}");
    let mut a = Args::new(&qualified, args, kwargs);
    let result = match (module, name) {
        ("datetime", "timedelta") => {
            let total = a.opt_float(0, "days")?.unwrap_or(0.0) * 86_400.0
                + a.opt_float(1, "seconds")?.unwrap_or(0.0)
                + a.opt_float(2, "microseconds")?.unwrap_or(0.0) / 1_000_000.0
                + a.opt_float(3, "milliseconds")?.unwrap_or(0.0) / 1000.0
                + a.opt_float(4, "minutes")?.unwrap_or(0.0) * 60.0
                + a.opt_float(5, "hours")?.unwrap_or(0.0) * 3600.0
                + a.opt_float(6, "weeks")?.unwrap_or(0.0) * 604_800.0;
            if !total.is_finite() || total.abs() > 1e13 {
                return Err("timedelta out of range".to_string());
            }
            Value::Timedelta(Duration::milliseconds((total * 1000.0).round() as i64))
        }
        ("datetime.datetime", "now" | "today") => Value::DateTime(Local::now().naive_local()),
        ("datetime.datetime", "fromisoformat") => {
            Value::DateTime(parse_iso_datetime(&a.string(0, "date_string")?)?)
        }
        ("datetime.datetime", "strptime") => {
            let text = a.string(0, "date_string")?;
            let fmt = a.string(1, "format")?;
            let dt = NaiveDateTime::parse_from_str(&text, &fmt)
                .or_else(|_| {
                    NaiveDate::parse_from_str(&text, &fmt).map(|d| d.and_time(NaiveTime::MIN))
                })
                .map_err(|_| format!("time data '{text}' does not match format '{fmt}'"))?;
            Value::DateTime(dt)
        }
        ("datetime.date", "today") => Value::Date(Local::now().date_naive()),
        ("datetime.date", "fromisoformat") => {
            let text = a.string(0, "date_string")?;
            Value::Date(
                NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                    .map_err(|_| format!("invalid isoformat string: '{text}'"))?,
            )
        }
        ("time", "time") => {
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            Value::Float(secs)
        }
        ("time", "monotonic" | "perf_counter") => {
            Value::Float(monotonic_origin().elapsed().as_secs_f64())
        }
        ("time", "strftime") => {
            let fmt = a.string(0, "format")?;
            Value::Str(format_datetime(&Local::now().naive_local(), &fmt)?)
        }
        ("math", "floor" | "ceil" | "trunc") => {
            let x = a.float(0, "x")?;
            let r = match name {
                "floor" => x.floor(),
                "ceil" => x.ceil(),
                _ => x.trunc(),
            };
            if !r.is_finite() || r.abs() > i64::MAX as f64 {
                return Err(format!("cannot convert {x} to integer"));
            }
            Value::Int(r as i64)
        }
        ("math", "sqrt") => {
            let x = a.float(0, "x")?;
            if x < 0.0 {
                return Err("math domain error".to_string());
            }
            Value::Float(x.sqrt())
        }
        ("math", "pow") => Value::Float(a.float(0, "x")?.powf(a.float(1, "y")?)),
        ("math", "log") => {
            let x = a.float(0, "x")?;
            if x <= 0.0 {
                return Err("math domain error".to_string());
            }
            match a.opt_float(1, "base")? {
                Some(base) => Value::Float(x.ln() / base.ln()),
                None => Value::Float(x.ln()),
            }
        }
        ("math", "log10" | "log2") => {
            let x = a.float(0, "x")?;
            if x <= 0.0 {
                return Err("math domain error".to_string());
            }
            Value::Float(if name == "log10" { x.log10() } else { x.log2() })
        }
        ("math", "exp") => Value::Float(a.float(0, "x")?.exp()),
        ("math", "sin") => Value::Float(a.float(0, "x")?.sin()),
        ("math", "cos") => Value::Float(a.float(0, "x")?.cos()),
        ("math", "tan") => Value::Float(a.float(0, "x")?.tan()),
        ("math", "fabs") => Value::Float(a.float(0, "x")?.abs()),
        ("math", "isnan") => Value::Bool(a.float(0, "x")?.is_nan()),
        ("math", "isinf") => Value::Bool(a.float(0, "x")?.is_infinite()),
        ("json", "dumps") => {
            let obj = a.required(0, "obj")?;
            let indent = a.opt_int(1, "indent")?;
            a.kwargs.remove("sort_keys");
            a.kwargs.remove("ensure_ascii");
            let json = obj.to_json()?;
            let text = if indent.is_some() {
                serde_json::to_string_pretty(&json)
            } else {
                serde_json::to_string(&json)
            };
            Value::Str(text.map_err(|e| e.to_string())?)
        }
        ("json", "loads") => {
            let text = a.string(0, "s")?;
            let json: serde_json::Value =
                serde_json::from_str(&text).map_err(|e| format!("invalid JSON: {e}"))?;
            Value::from_json(&json)
        }
        ("re", "compile") => {
            let pattern = a.string(0, "pattern")?;
            let flags = a.opt_int(1, "flags")?.unwrap_or(0);
            Value::Pattern(Rc::new(compile_regex(&pattern, flags)?))
        }
        ("re", "escape") => Value::Str(regex::escape(&a.string(0, "pattern")?)),
        ("re", "search" | "match" | "fullmatch") => {
            let pattern = a.string(0, "pattern")?;
            let text = a.string(1, "string")?;
            let flags = a.opt_int(2, "flags")?.unwrap_or(0);
            let re = compile_regex(&pattern, flags)?;
            let anchor = match name {
                "search" => Anchor::Search,
                "match" => Anchor::Start,
                _ => Anchor::Full,
            };
            match_value(&re, &text, anchor)
        }
        ("re", "findall") => {
            let pattern = a.string(0, "pattern")?;
            let text = a.string(1, "string")?;
            let flags = a.opt_int(2, "flags")?.unwrap_or(0);
            findall(&compile_regex(&pattern, flags)?, &text)
        }
        ("re", "sub") => {
            let pattern = a.string(0, "pattern")?;
            let repl = a.string(1, "repl")?;
            let text = a.string(2, "string")?;
            let count = a.opt_int(3, "count")?.unwrap_or(0).max(0) as usize;
            let flags = a.opt_int(4, "flags")?.unwrap_or(0);
            regex_sub(&compile_regex(&pattern, flags)?, &repl, &text, count)
        }
        ("re", "split") => {
            let pattern = a.string(0, "pattern")?;
            let text = a.string(1, "string")?;
            let flags = a.opt_int(2, "flags")?.unwrap_or(0);
            regex_split(&compile_regex(&pattern, flags)?, &text)
        }
        ("uuid", "uuid4") => Value::Str(uuid::Uuid::new_v4().to_string()),
        ("random", "random") => Value::Float(rand::thread_rng().gen::<f64>()),
        ("random", "uniform") => {
            let lo = a.float(0, "a")?;
            let hi = a.float(1, "b")?;
            let t = rand::thread_rng().gen::<f64>();
            Value::Float(lo + (hi - lo) * t)
        }
        ("random", "randint") => {
            let lo = a.int(0, "a")?;
            let hi = a.int(1, "b")?;
            if lo > hi {
                return Err(format!("empty range for randint({lo}, {hi})"));
            }
            Value::Int(rand::thread_rng().gen_range(lo..=hi))
        }
        ("random", "choice") => match a.required(0, "seq")? {
            Value::List(items) => {
                let picked = items.borrow().choose(&mut rand::thread_rng()).cloned();
                picked.ok_or_else(|| "cannot choose from an empty sequence".to_string())?
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                chars
                    .choose(&mut rand::thread_rng())
                    .map(|c| Value::Str(c.to_string()))
                    .ok_or_else(|| "cannot choose from an empty sequence".to_string())?
            }
            other => return Err(format!("cannot choose from '{}'", other.type_name())),
        },
        ("random", "shuffle") => match a.required(0, "x")? {
            Value::List(items) => {
                items.borrow_mut().shuffle(&mut rand::thread_rng());
                Value::None
            }
            other => return Err(format!("cannot shuffle '{}'", other.type_name())),
        },
        ("random", "sample") => {
            let population = a.required(0, "population")?;
            let k = a.int(1, "k")?;
            let Value::List(items) = population else {
                return Err("sample() population must be a list".to_string());
            };
            let items = items.borrow();
            if k < 0 || k as usize > items.len() {
                return Err("sample larger than population or is negative".to_string());
            }
            Value::list(
                items
                    .choose_multiple(&mut rand::thread_rng(), k as usize)
                    .cloned()
                    .collect(),
            )
        }
        _ => return Err(format!("module '{module}' has no attribute '{name}'")),
    };
    a.finish()?;
    Ok(result)
}

/// 调用命名空间本身：`datetime(2024, 1, 1)` / `date(2024, 1, 1)`
pub(super) fn call_module(
    module: &str,
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
) -> Result<Value, String> {
    let mut a = Args::new(module, args, kwargs);
    let year = a.int(0, "year")?;
    let month = a.int(1, "month")?;
    let day = a.int(2, "day")?;
    let date = i32::try_from(year)
        .ok()
        .zip(u32::try_from(month).ok())
        .zip(u32::try_from(day).ok())
        .and_then(|((y, m), d)| NaiveDate::from_ymd_opt(y, m, d))
        .ok_or_else(|| "date value out of range".to_string())?;
    let result = match module {
        "datetime.date" => Value::Date(date),
        "datetime.datetime" => {
            let hour = a.opt_int(3, "hour")?.unwrap_or(0);
            let minute = a.opt_int(4, "minute")?.unwrap_or(0);
            let second = a.opt_int(5, "second")?.unwrap_or(0);
            let time = u32::try_from(hour)
                .ok()
                .zip(u32::try_from(minute).ok())
                .zip(u32::try_from(second).ok())
                .and_then(|((h, m), s)| NaiveTime::from_hms_opt(h, m, s))
                .ok_or_else(|| "time value out of range".to_string())?;
            Value::DateTime(date.and_time(time))
        }
        other => return Err(format!("'module' object '{other}' is not callable")),
    };
    a.finish()?;
    Ok(result)
}

/// 星期名（周一为 0）
pub(super) fn weekday_index(d: &NaiveDate) -> i64 {
    i64::from(d.weekday().num_days_from_monday())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_replacement() {
        assert_eq!(translate_replacement(r"\1-\2"), "${1}-${2}");
        assert_eq!(translate_replacement(r"\g<word>!"), "${word}!");
        assert_eq!(translate_replacement("cost $5"), "cost $$5");
    }

    #[test]
    fn test_invalid_strftime_is_error_not_panic() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        assert_eq!(format_datetime(&dt, "%H:%M").unwrap(), "09:30");
        assert!(format_datetime(&dt, "%Q").is_err());
    }

    #[test]
    fn test_findall_with_groups() {
        let re = compile_regex(r"(\w)=(\d)", 0).unwrap();
        let found = findall(&re, "a=1 b=2");
        assert_eq!(found.display(), "[['a', '1'], ['b', '2']]");
    }

    #[test]
    fn test_unknown_native_is_error() {
        assert!(call_native("math", "system", vec![], BTreeMap::new()).is_err());
    }
}
