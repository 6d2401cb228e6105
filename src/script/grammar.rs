//! 单条逻辑行的文法（nom 组合子）
//!
//! 缩进与代码块由 [`super::layout`] 与 [`super::parser`] 负责，这里只解析
//! 一行之内的复合语句头、简单语句和表达式。输入是 `nom_locate` 的 span，
//! 行内换行（括号内、续行）由 span 自己计数。

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{anychar, char, digit1, line_ending, multispace1, one_of, satisfy},
    combinator::{all_consuming, cut, map, not, opt, recognize, value, verify},
    error::{context, VerboseError, VerboseErrorKind},
    multi::{many0, many0_count, many1, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};
use nom_locate::LocatedSpan;

use super::ast::{BinOp, BoolOp, CmpOp, Expr, Literal, Param, StmtKind, Target, UnaryOp};

pub(crate) type Span<'a> = LocatedSpan<&'a str>;
pub(crate) type PResult<'a, T> = IResult<Span<'a>, T, VerboseError<Span<'a>>>;

const KEYWORDS: &[&str] = &[
    "if", "elif", "else", "while", "for", "in", "break", "continue", "pass", "def", "return",
    "import", "from", "as", "raise", "try", "except", "and", "or", "not", "is", "True", "False",
    "None",
];

/// 受限方言不支持的关键字，出现在行首即编译错误
pub(crate) const UNSUPPORTED: &[&str] = &[
    "class", "lambda", "with", "yield", "global", "nonlocal", "del", "async", "await", "assert",
    "finally",
];

pub(crate) fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name) || UNSUPPORTED.contains(&name)
}

/// 复合语句头
#[derive(Debug, Clone)]
pub(crate) enum Header {
    If(Expr),
    Elif(Expr),
    Else,
    While(Expr),
    For { target: Target, iter: Expr },
    Def { name: String, params: Vec<Param> },
    Try,
    Except(Option<String>),
}

/// 一条逻辑行：简单语句，或语句头加可选的同行语句体
#[derive(Debug, Clone)]
pub(crate) enum LineKind {
    Simple(StmtKind),
    Compound(Header, Option<StmtKind>),
}

fn failure<'a>(at: Span<'a>, message: &'static str) -> nom::Err<VerboseError<Span<'a>>> {
    nom::Err::Failure(VerboseError {
        errors: vec![(at, VerboseErrorKind::Context(message))],
    })
}

fn reject<'a, T>(at: Span<'a>, message: &'static str) -> PResult<'a, T> {
    Err(failure(at, message))
}

// ============================================================================
// Lexical pieces
// ============================================================================

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// 空白、注释与反斜杠续行
fn ws(input: Span) -> PResult<()> {
    value(
        (),
        many0_count(alt((
            value((), multispace1),
            value((), pair(char('#'), take_while(|c: char| c != '\n'))),
            value((), pair(char('\\'), line_ending)),
        ))),
    )(input)
}

/// 运算符；`follow` 中的字符紧随其后时不匹配（`*` 不吃 `**` / `*=`）
fn op<'a>(symbol: &'static str) -> impl FnMut(Span<'a>) -> PResult<'a, Span<'a>> {
    let follow = match symbol {
        "*" => "*=",
        "/" => "/=",
        "=" | "<" | ">" | "+" | "-" | "%" | "//" | "**" => "=",
        _ => "",
    };
    preceded(ws, terminated(tag(symbol), not(one_of(follow))))
}

fn kw<'a>(word: &'static str) -> impl FnMut(Span<'a>) -> PResult<'a, Span<'a>> {
    preceded(ws, terminated(tag(word), not(satisfy(is_ident_char))))
}

fn raw_ident(input: Span) -> PResult<String> {
    map(
        preceded(
            ws,
            recognize(pair(satisfy(is_ident_start), take_while(is_ident_char))),
        ),
        |s: Span| s.fragment().to_string(),
    )(input)
}

fn name(input: Span) -> PResult<String> {
    verify(raw_ident, |n: &str| !is_keyword(n))(input)
}

/// 行首的标识符（含关键字）
pub(crate) fn leading_word(text: &str) -> Option<String> {
    raw_ident(Span::new(text)).ok().map(|(_, word)| word)
}

fn comma_list<'a, O, F>(item: F) -> impl FnMut(Span<'a>) -> PResult<'a, Vec<O>>
where
    F: FnMut(Span<'a>) -> PResult<'a, O>,
{
    terminated(separated_list0(op(","), item), opt(op(",")))
}

fn digits(input: Span) -> PResult<Span> {
    recognize(pair(
        digit1,
        take_while(|c: char| c.is_ascii_digit() || c == '_'),
    ))(input)
}

fn number(input: Span) -> PResult<Expr> {
    let (input, _) = ws(input)?;
    let start = input;
    let (rest, text) = recognize(pair(
        alt((
            recognize(pair(digits, opt(pair(char('.'), opt(digits))))),
            recognize(pair(char('.'), digits)),
        )),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digits))),
    ))(input)?;
    let cleaned: String = text.fragment().chars().filter(|c| *c != '_').collect();
    if cleaned.contains(|c: char| matches!(c, '.' | 'e' | 'E')) {
        match cleaned.parse::<f64>() {
            Ok(f) => Ok((rest, Expr::Literal(Literal::Float(f)))),
            Err(_) => reject(start, "invalid number literal"),
        }
    } else {
        match cleaned.parse::<i64>() {
            Ok(i) => Ok((rest, Expr::Literal(Literal::Int(i)))),
            Err(_) => reject(start, "integer literal out of range"),
        }
    }
}

/// 单个字符串字面量（可带 r 前缀，支持三引号）
fn string_part(input: Span) -> PResult<String> {
    let (input, _) = ws(input)?;
    let start = input;
    let (input, raw) = map(opt(one_of("rR")), |r: Option<char>| r.is_some())(input)?;
    let (mut input, delim) = alt((
        value("\"\"\"", tag("\"\"\"")),
        value("'''", tag("'''")),
        value("\"", tag("\"")),
        value("'", tag("'")),
    ))(input)?;

    let mut out = String::new();
    loop {
        if let Ok((rest, _)) = tag::<_, _, VerboseError<Span>>(delim)(input) {
            return Ok((rest, out));
        }
        let Ok((rest, c)) = anychar::<_, VerboseError<Span>>(input) else {
            return reject(start, "unterminated string literal");
        };
        match c {
            '\n' if delim.len() == 1 => {
                return reject(start, "end of line while scanning string literal")
            }
            '\\' => {
                let Ok((after, escaped)) = anychar::<_, VerboseError<Span>>(rest) else {
                    return reject(start, "unterminated string literal");
                };
                if raw {
                    out.push('\\');
                    out.push(escaped);
                } else {
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '0' => out.push('\0'),
                        '\\' | '\'' | '"' => out.push(escaped),
                        '\n' => {}
                        other => {
                            out.push('\\');
                            out.push(other);
                        }
                    }
                }
                input = after;
            }
            _ => {
                out.push(c);
                input = rest;
            }
        }
    }
}

/// 相邻字符串字面量拼接
fn strings(input: Span) -> PResult<Expr> {
    map(many1(string_part), |parts: Vec<String>| {
        Expr::Literal(Literal::Str(parts.concat()))
    })(input)
}

// ============================================================================
// Expressions
// ============================================================================

fn atom(input: Span) -> PResult<Expr> {
    alt((
        number,
        strings,
        value(Expr::Literal(Literal::Bool(true)), kw("True")),
        value(Expr::Literal(Literal::Bool(false)), kw("False")),
        value(Expr::Literal(Literal::None), kw("None")),
        map(name, Expr::Name),
        parenthesized,
        list_display,
        dict_display,
    ))(input)
}

fn parenthesized(input: Span) -> PResult<Expr> {
    preceded(
        op("("),
        cut(alt((
            value(Expr::List(Vec::new()), op(")")),
            terminated(expr_list, context("expected ')'", op(")"))),
        ))),
    )(input)
}

fn list_display(input: Span) -> PResult<Expr> {
    map(
        delimited(
            op("["),
            cut(comma_list(expr)),
            cut(context("expected ']'", op("]"))),
        ),
        Expr::List,
    )(input)
}

fn dict_entry(input: Span) -> PResult<(Expr, Expr)> {
    separated_pair(expr, cut(context("expected ':'", op(":"))), cut(expr))(input)
}

fn dict_display(input: Span) -> PResult<Expr> {
    map(
        delimited(
            op("{"),
            cut(comma_list(dict_entry)),
            cut(context("expected '}'", op("}"))),
        ),
        Expr::Dict,
    )(input)
}

enum Arg {
    Positional(Expr),
    Keyword(String, Expr),
}

fn call_arg(input: Span) -> PResult<Arg> {
    alt((
        map(separated_pair(name, op("="), cut(expr)), |(n, e)| {
            Arg::Keyword(n, e)
        }),
        map(expr, Arg::Positional),
    ))(input)
}

fn call_args(input: Span) -> PResult<(Vec<Expr>, Vec<(String, Expr)>)> {
    let start = input;
    let (input, items) = comma_list(call_arg)(input)?;
    let mut args = Vec::new();
    let mut kwargs: Vec<(String, Expr)> = Vec::new();
    for item in items {
        match item {
            Arg::Positional(e) => {
                if !kwargs.is_empty() {
                    return reject(start, "positional argument follows keyword argument");
                }
                args.push(e);
            }
            Arg::Keyword(n, e) => {
                if kwargs.iter().any(|(k, _)| *k == n) {
                    return reject(start, "keyword argument repeated");
                }
                kwargs.push((n, e));
            }
        }
    }
    Ok((input, (args, kwargs)))
}

enum Trailer {
    Call(Vec<Expr>, Vec<(String, Expr)>),
    Index(Expr),
    Slice(Option<Expr>, Option<Expr>),
    Attr(String),
}

fn subscript(input: Span) -> PResult<Trailer> {
    let (input, lower) = opt(expr)(input)?;
    let (input, colon) = opt(op(":"))(input)?;
    let (input, trailer) = match (lower, colon) {
        (lower, Some(_)) => {
            let (input, upper) = opt(expr)(input)?;
            (input, Trailer::Slice(lower, upper))
        }
        (Some(index), None) => (input, Trailer::Index(index)),
        (None, None) => return reject(input, "empty subscript"),
    };
    let (input, _) = context("expected ']'", op("]"))(input)?;
    Ok((input, trailer))
}

fn trailer(input: Span) -> PResult<Trailer> {
    alt((
        map(
            delimited(
                op("("),
                cut(call_args),
                cut(context("expected ')'", op(")"))),
            ),
            |(args, kwargs)| Trailer::Call(args, kwargs),
        ),
        preceded(op("["), cut(subscript)),
        map(
            preceded(op("."), cut(context("expected attribute name", raw_ident))),
            Trailer::Attr,
        ),
    ))(input)
}

fn postfix(input: Span) -> PResult<Expr> {
    let (input, base) = atom(input)?;
    let (input, trailers) = many0(trailer)(input)?;
    let expr = trailers.into_iter().fold(base, |value, t| {
        let value = Box::new(value);
        match t {
            Trailer::Call(args, kwargs) => Expr::Call {
                func: value,
                args,
                kwargs,
            },
            Trailer::Index(index) => Expr::Index {
                value,
                index: Box::new(index),
            },
            Trailer::Slice(lower, upper) => Expr::Slice {
                value,
                lower: lower.map(Box::new),
                upper: upper.map(Box::new),
            },
            Trailer::Attr(attr) => Expr::Attribute { value, attr },
        }
    });
    Ok((input, expr))
}

/// `**` 右结合，且比一元负号绑定更紧
fn power(input: Span) -> PResult<Expr> {
    let (input, base) = postfix(input)?;
    let (input, exponent) = opt(preceded(op("**"), cut(factor)))(input)?;
    Ok((
        input,
        match exponent {
            Some(exp) => binary(BinOp::Pow, base, exp),
            None => base,
        },
    ))
}

fn factor(input: Span) -> PResult<Expr> {
    let (input, signs) = many0(alt((
        value(UnaryOp::Neg, op("-")),
        value(UnaryOp::Pos, op("+")),
    )))(input)?;
    let (input, operand) = power(input)?;
    let expr = signs
        .into_iter()
        .rev()
        .fold(operand, |e, op| Expr::Unary {
            op,
            operand: Box::new(e),
        });
    Ok((input, expr))
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn term(input: Span) -> PResult<Expr> {
    let (input, first) = factor(input)?;
    let (input, rest) = many0(pair(
        alt((
            value(BinOp::Mul, op("*")),
            value(BinOp::FloorDiv, op("//")),
            value(BinOp::Div, op("/")),
            value(BinOp::Mod, op("%")),
        )),
        cut(factor),
    ))(input)?;
    Ok((
        input,
        rest.into_iter().fold(first, |l, (op, r)| binary(op, l, r)),
    ))
}

fn arith(input: Span) -> PResult<Expr> {
    let (input, first) = term(input)?;
    let (input, rest) = many0(pair(
        alt((value(BinOp::Add, op("+")), value(BinOp::Sub, op("-")))),
        cut(term),
    ))(input)?;
    Ok((
        input,
        rest.into_iter().fold(first, |l, (op, r)| binary(op, l, r)),
    ))
}

fn cmp_op(input: Span) -> PResult<CmpOp> {
    alt((
        value(CmpOp::Eq, op("==")),
        value(CmpOp::NotEq, op("!=")),
        value(CmpOp::LtE, op("<=")),
        value(CmpOp::GtE, op(">=")),
        value(CmpOp::Lt, op("<")),
        value(CmpOp::Gt, op(">")),
        value(CmpOp::NotIn, pair(kw("not"), kw("in"))),
        value(CmpOp::In, kw("in")),
        value(CmpOp::IsNot, pair(kw("is"), kw("not"))),
        value(CmpOp::Is, kw("is")),
    ))(input)
}

fn comparison(input: Span) -> PResult<Expr> {
    let (input, left) = arith(input)?;
    let (input, rest) = many0(pair(cmp_op, cut(arith)))(input)?;
    if rest.is_empty() {
        return Ok((input, left));
    }
    Ok((
        input,
        Expr::Compare {
            left: Box::new(left),
            rest,
        },
    ))
}

fn not_expr(input: Span) -> PResult<Expr> {
    let (input, count) = many0_count(kw("not"))(input)?;
    let (input, operand) = comparison(input)?;
    let expr = (0..count).fold(operand, |e, _| Expr::Unary {
        op: UnaryOp::Not,
        operand: Box::new(e),
    });
    Ok((input, expr))
}

fn bool_chain<'a>(
    word: &'static str,
    op: BoolOp,
    mut operand: impl FnMut(Span<'a>) -> PResult<'a, Expr>,
) -> impl FnMut(Span<'a>) -> PResult<'a, Expr> {
    move |input: Span<'a>| {
        let (input, first) = operand(input)?;
        let (input, rest) = many0(preceded(kw(word), cut(&mut operand)))(input)?;
        let expr = rest.into_iter().fold(first, |left, right| Expr::Bool {
            op,
            left: Box::new(left),
            right: Box::new(right),
        });
        Ok((input, expr))
    }
}

fn and_expr(input: Span) -> PResult<Expr> {
    bool_chain("and", BoolOp::And, not_expr)(input)
}

fn or_expr(input: Span) -> PResult<Expr> {
    bool_chain("or", BoolOp::Or, and_expr)(input)
}

/// 完整表达式（含条件表达式 `a if cond else b`）
pub(crate) fn expr(input: Span) -> PResult<Expr> {
    let (input, then) = or_expr(input)?;
    let (input, branch) = opt(preceded(
        kw("if"),
        cut(pair(or_expr, preceded(context("expected 'else'", kw("else")), expr))),
    ))(input)?;
    let expr = match branch {
        Some((cond, otherwise)) => Expr::IfExp {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        },
        None => then,
    };
    Ok((input, expr))
}

/// 逗号分隔的表达式；多于一项或带尾逗号时成为列表
pub(crate) fn expr_list(input: Span) -> PResult<Expr> {
    let (input, first) = expr(input)?;
    let (input, rest) = many0(preceded(op(","), expr))(input)?;
    let (input, trailing) = opt(op(","))(input)?;
    if rest.is_empty() && trailing.is_none() {
        return Ok((input, first));
    }
    let mut items = vec![first];
    items.extend(rest);
    Ok((input, Expr::List(items)))
}

// ============================================================================
// Statements
// ============================================================================

fn into_target<'a>(at: Span<'a>, expr: Expr) -> Result<Target, nom::Err<VerboseError<Span<'a>>>> {
    match expr {
        Expr::Name(n) => Ok(Target::Name(n)),
        Expr::Index { value, index } => Ok(Target::Index {
            value: *value,
            index: *index,
        }),
        Expr::List(items) => items
            .into_iter()
            .map(|item| match item {
                Expr::Name(n) => Ok(n),
                _ => Err(failure(at, "can only unpack into plain names")),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Target::Unpack),
        Expr::Attribute { .. } => Err(failure(at, "attribute assignment is not allowed")),
        _ => Err(failure(at, "cannot assign to expression")),
    }
}

fn aug_op(input: Span) -> PResult<BinOp> {
    alt((
        value(BinOp::Add, op("+=")),
        value(BinOp::Sub, op("-=")),
        value(BinOp::Pow, op("**=")),
        value(BinOp::Mul, op("*=")),
        value(BinOp::FloorDiv, op("//=")),
        value(BinOp::Div, op("/=")),
        value(BinOp::Mod, op("%=")),
    ))(input)
}

fn assignment(input: Span) -> PResult<StmtKind> {
    let start = input;
    let (input, lhs) = expr_list(input)?;
    if let Ok((input, _)) = op("=")(input) {
        let (input, value) = cut(expr_list)(input)?;
        let target = into_target(start, lhs)?;
        return Ok((input, StmtKind::Assign { target, value }));
    }
    if let Ok((input, op)) = aug_op(input) {
        let (input, value) = cut(expr)(input)?;
        let target = into_target(start, lhs)?;
        if matches!(target, Target::Unpack(_)) {
            return reject(start, "illegal expression for augmented assignment");
        }
        return Ok((input, StmtKind::AugAssign { target, op, value }));
    }
    Ok((input, StmtKind::Expr(lhs)))
}

fn alias(input: Span) -> PResult<Option<String>> {
    opt(preceded(kw("as"), cut(name)))(input)
}

fn simple_stmt(input: Span) -> PResult<StmtKind> {
    alt((
        value(StmtKind::Pass, kw("pass")),
        value(StmtKind::Break, kw("break")),
        value(StmtKind::Continue, kw("continue")),
        map(preceded(kw("return"), opt(expr_list)), StmtKind::Return),
        map(preceded(kw("raise"), cut(expr)), StmtKind::Raise),
        map(
            preceded(kw("import"), cut(pair(name, alias))),
            |(module, alias)| StmtKind::Import { module, alias },
        ),
        map(
            preceded(
                kw("from"),
                cut(tuple((
                    name,
                    context("expected 'import'", kw("import")),
                    separated_list1(op(","), pair(name, alias)),
                ))),
            ),
            |(module, _, names)| StmtKind::FromImport { module, names },
        ),
        assignment,
    ))(input)
}

fn params(input: Span) -> PResult<Vec<Param>> {
    let start = input;
    let (input, params) = comma_list(map(
        pair(name, opt(preceded(op("="), cut(expr)))),
        |(name, default)| Param { name, default },
    ))(input)?;
    let mut seen_default = false;
    for param in &params {
        if param.default.is_some() {
            seen_default = true;
        } else if seen_default {
            return reject(start, "non-default argument follows default argument");
        }
    }
    Ok((input, params))
}

fn for_target(input: Span) -> PResult<Target> {
    let (input, first) = name(input)?;
    let (input, rest) = many0(preceded(op(","), name))(input)?;
    if rest.is_empty() {
        return Ok((input, Target::Name(first)));
    }
    let mut names = vec![first];
    names.extend(rest);
    Ok((input, Target::Unpack(names)))
}

fn except_clause(input: Span) -> PResult<Option<String>> {
    alt((
        map(preceded(kw("as"), cut(name)), Some),
        map(pair(name, alias), |(_, binding)| binding),
    ))(input)
}

fn header(input: Span) -> PResult<Header> {
    alt((
        map(preceded(kw("if"), cut(expr)), Header::If),
        map(preceded(kw("elif"), cut(expr)), Header::Elif),
        value(Header::Else, kw("else")),
        map(preceded(kw("while"), cut(expr)), Header::While),
        map(
            preceded(
                kw("for"),
                cut(tuple((
                    for_target,
                    context("expected 'in'", kw("in")),
                    expr_list,
                ))),
            ),
            |(target, _, iter)| Header::For { target, iter },
        ),
        map(
            preceded(
                kw("def"),
                cut(tuple((
                    name,
                    context("expected '('", op("(")),
                    params,
                    context("expected ')'", op(")")),
                ))),
            ),
            |(name, _, params, _)| Header::Def { name, params },
        ),
        value(Header::Try, kw("try")),
        map(preceded(kw("except"), opt(except_clause)), |binding| {
            Header::Except(binding.flatten())
        }),
    ))(input)
}

fn compound(input: Span) -> PResult<LineKind> {
    let (input, head) = header(input)?;
    let (input, _) = cut(context("expected ':'", op(":")))(input)?;
    let (input, inline) = opt(simple_stmt)(input)?;
    Ok((input, LineKind::Compound(head, inline)))
}

pub(crate) fn logical_line(input: Span) -> PResult<LineKind> {
    all_consuming(terminated(
        alt((compound, map(simple_stmt, LineKind::Simple))),
        ws,
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_expr(src: &str) -> Expr {
        all_consuming(terminated(expr_list, ws))(Span::new(src))
            .map(|(_, e)| e)
            .unwrap()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(parse_expr("1_000"), Expr::Literal(Literal::Int(1000)));
        assert_eq!(parse_expr(".5"), Expr::Literal(Literal::Float(0.5)));
        assert_eq!(parse_expr("2e3"), Expr::Literal(Literal::Float(2000.0)));
        assert!(expr(Span::new("99999999999999999999")).is_err());
    }

    #[test]
    fn test_string_escapes_and_concatenation() {
        assert_eq!(
            parse_expr(r#"'a\n' "b\"" r'\d'"#),
            Expr::Literal(Literal::Str("a\nb\"\\d".into()))
        );
        assert_eq!(
            parse_expr("\"\"\"x\ny\"\"\""),
            Expr::Literal(Literal::Str("x\ny".into()))
        );
        assert_eq!(
            parse_expr(r"'C:\@x'"),
            Expr::Literal(Literal::Str("C:\\@x".into()))
        );
    }

    #[test]
    fn test_unary_minus_binds_looser_than_power() {
        match parse_expr("-2 ** 2") {
            Expr::Unary { op: UnaryOp::Neg, operand } => {
                assert!(matches!(*operand, Expr::Binary { op: BinOp::Pow, .. }))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_operator_prefixes_do_not_overlap() {
        assert!(matches!(parse_expr("a // b"), Expr::Binary { op: BinOp::FloorDiv, .. }));
        assert!(matches!(parse_expr("a * b"), Expr::Binary { op: BinOp::Mul, .. }));
        assert!(matches!(
            logical_line(Span::new("a **= 2")).unwrap().1,
            LineKind::Simple(StmtKind::AugAssign { op: BinOp::Pow, .. })
        ));
    }

    #[test]
    fn test_keyword_is_not_a_name() {
        assert!(name(Span::new("while")).is_err());
        assert_eq!(name(Span::new("whilst")).unwrap().1, "whilst");
        assert_eq!(leading_word("  class Foo:"), Some("class".into()));
    }

    #[test]
    fn test_compound_header_with_inline_body() {
        match logical_line(Span::new("if x: y = 1  # done")).unwrap().1 {
            LineKind::Compound(Header::If(_), Some(StmtKind::Assign { .. })) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }
}
