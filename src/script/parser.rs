//! 语法分析：缩进预处理 + 逐行 nom 文法，再按 Indent / Dedent 组装语句树
//!
//! 只接受受限方言：class / lambda / with / yield / global 等一律编译错误。

use std::iter::Peekable;
use std::rc::Rc;
use std::vec::IntoIter;

use nom::error::{VerboseError, VerboseErrorKind};

use super::ast::{Expr, FunctionDef, Program, Stmt, StmtKind};
use super::grammar::{self, Header, LineKind, Span, UNSUPPORTED};
use super::layout::{layout, Layout, LogicalLine};
use super::ScriptError;

pub(crate) use super::grammar::is_keyword;

fn compile(line: usize, message: impl Into<String>) -> ScriptError {
    ScriptError::Compile {
        line,
        message: message.into(),
    }
}

pub fn parse(src: &str) -> Result<Program, ScriptError> {
    let mut items = Vec::new();
    for item in layout(src)? {
        items.push(match item {
            Layout::Line(line) => Item::Line {
                line: line.line,
                kind: parse_line(&line)?,
            },
            Layout::Indent { line } => Item::Indent(line),
            Layout::Dedent => Item::Dedent,
        });
    }
    let mut builder = BlockBuilder {
        items: items.into_iter().peekable(),
    };
    let body = builder.statements()?;
    Ok(Program { body })
}

fn parse_line(line: &LogicalLine<'_>) -> Result<LineKind, ScriptError> {
    if let Some(word) = grammar::leading_word(line.text) {
        if UNSUPPORTED.contains(&word.as_str()) {
            return Err(compile(
                line.line,
                format!("'{word}' is not supported in module scripts"),
            ));
        }
    }
    grammar::logical_line(Span::new(line.text))
        .map(|(_, kind)| kind)
        .map_err(|err| convert_error(line.line, err))
}

/// nom 错误 → 编译错误：取最内层的 context 作为消息，行号取自 span
fn convert_error(first_line: usize, err: nom::Err<VerboseError<Span<'_>>>) -> ScriptError {
    let errors = match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => e.errors,
        nom::Err::Incomplete(_) => return compile(first_line, "unexpected end of script"),
    };
    let labelled = errors.iter().find_map(|(at, kind)| match kind {
        VerboseErrorKind::Context(message) => Some((*at, message.to_string())),
        _ => None,
    });
    let (at, message) = match labelled {
        Some((at, message)) => (Some(at), message),
        None => {
            let at = errors.first().map(|(at, _)| *at);
            (at, format!("invalid syntax near {}", describe(at)))
        }
    };
    let offset = at.map_or(0, |span| span.location_line() as usize - 1);
    compile(first_line + offset, message)
}

fn describe(at: Option<Span<'_>>) -> String {
    let rest = at.map(|span| span.fragment().trim_start()).unwrap_or("");
    let token: String = rest
        .chars()
        .take_while(|c| !c.is_whitespace())
        .take(16)
        .collect();
    if token.is_empty() {
        "end of line".to_string()
    } else {
        format!("'{token}'")
    }
}

enum Item {
    Line { line: usize, kind: LineKind },
    Indent(usize),
    Dedent,
}

struct BlockBuilder {
    items: Peekable<IntoIter<Item>>,
}

impl BlockBuilder {
    /// 读到 Dedent 或结尾为止
    fn statements(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        let mut body = Vec::new();
        while let Some(item) = self.items.next() {
            match item {
                Item::Dedent => break,
                Item::Indent(line) => return Err(compile(line, "unexpected indent")),
                Item::Line { line, kind } => body.push(self.statement(line, kind)?),
            }
        }
        Ok(body)
    }

    fn statement(&mut self, line: usize, kind: LineKind) -> Result<Stmt, ScriptError> {
        let (header, inline) = match kind {
            LineKind::Simple(kind) => return Ok(Stmt { kind, line }),
            LineKind::Compound(header, inline) => (header, inline),
        };
        let kind = match header {
            Header::If(cond) => {
                let body = self.suite(line, inline)?;
                self.if_chain(cond, body)?
            }
            Header::While(cond) => StmtKind::While {
                cond,
                body: self.suite(line, inline)?,
            },
            Header::For { target, iter } => StmtKind::For {
                target,
                iter,
                body: self.suite(line, inline)?,
            },
            Header::Def { name, params } => {
                let body = self.suite(line, inline)?;
                StmtKind::FunctionDef(Rc::new(FunctionDef { name, params, body }))
            }
            Header::Try => {
                let body = self.suite(line, inline)?;
                let Some((except_line, clause, inline)) =
                    self.next_clause(|h| matches!(h, Header::Except(_)))
                else {
                    return Err(compile(line, "expected 'except' block after 'try'"));
                };
                let handler = self.suite(except_line, inline)?;
                let binding = match clause {
                    Header::Except(binding) => binding,
                    _ => None,
                };
                StmtKind::Try {
                    body,
                    binding,
                    handler,
                }
            }
            Header::Elif(_) | Header::Else => {
                return Err(compile(line, "'elif' or 'else' without matching 'if'"))
            }
            Header::Except(_) => return Err(compile(line, "'except' without matching 'try'")),
        };
        Ok(Stmt { kind, line })
    }

    fn if_chain(&mut self, cond: Expr, body: Vec<Stmt>) -> Result<StmtKind, ScriptError> {
        let mut branches = vec![(cond, body)];
        let mut orelse = Vec::new();
        while let Some((line, clause, inline)) =
            self.next_clause(|h| matches!(h, Header::Elif(_) | Header::Else))
        {
            let block = self.suite(line, inline)?;
            match clause {
                Header::Elif(cond) => branches.push((cond, block)),
                _ => {
                    orelse = block;
                    break;
                }
            }
        }
        Ok(StmtKind::If { branches, orelse })
    }

    /// 下一行若是续接子句（elif / else / except）则取出
    fn next_clause(
        &mut self,
        accept: fn(&Header) -> bool,
    ) -> Option<(usize, Header, Option<StmtKind>)> {
        let item = self.items.next_if(|item| {
            matches!(item, Item::Line { kind: LineKind::Compound(h, _), .. } if accept(h))
        })?;
        match item {
            Item::Line {
                line,
                kind: LineKind::Compound(header, inline),
            } => Some((line, header, inline)),
            _ => None,
        }
    }

    /// 同行语句体，或下一行开始的缩进块
    fn suite(&mut self, line: usize, inline: Option<StmtKind>) -> Result<Vec<Stmt>, ScriptError> {
        if let Some(kind) = inline {
            return Ok(vec![Stmt { kind, line }]);
        }
        match self.items.next_if(|item| matches!(item, Item::Indent(_))) {
            Some(_) => self.statements(),
            None => Err(compile(line, "expected an indented block")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ast::{CmpOp, Target};

    #[test]
    fn test_parse_assignment() {
        let program = parse("result = \"hi\"").unwrap();
        assert_eq!(program.body.len(), 1);
        assert!(matches!(
            &program.body[0].kind,
            StmtKind::Assign { target: Target::Name(n), .. } if n == "result"
        ));
    }

    #[test]
    fn test_parse_ctx_call_with_kwargs() {
        let program = parse("x = ctx.generate(\"hi\", max_tokens=20)").unwrap();
        let StmtKind::Assign { value, .. } = &program.body[0].kind else {
            panic!("expected assignment");
        };
        let Expr::Call { func, args, kwargs } = value else {
            panic!("expected call");
        };
        assert!(matches!(func.as_ref(), Expr::Attribute { attr, .. } if attr == "generate"));
        assert_eq!(args.len(), 1);
        assert_eq!(kwargs[0].0, "max_tokens");
    }

    #[test]
    fn test_parse_compound_statements() {
        let src = r#"
def greet(name, polite=True):
    if polite:
        return "Hello " + name
    elif name == "x":
        return "x"
    else:
        return "hi"

total = 0
for i in range(3):
    total += i
while total > 0:
    total -= 1
try:
    y = 1 / 0
except Exception as e:
    y = 0
"#;
        let program = parse(src).unwrap();
        assert_eq!(program.body.len(), 5);
        let StmtKind::FunctionDef(def) = &program.body[0].kind else {
            panic!("expected def");
        };
        assert!(matches!(&def.body[0].kind, StmtKind::If { branches, orelse } if branches.len() == 2 && orelse.len() == 1));
        assert!(matches!(
            &program.body[4].kind,
            StmtKind::Try { binding: Some(b), .. } if b == "e"
        ));
    }

    #[test]
    fn test_parse_conditional_expression_and_slices() {
        let program = parse("a = s[1:3] if len(s) > 2 else s[:1]").unwrap();
        assert_eq!(program.body.len(), 1);
    }

    #[test]
    fn test_not_in_and_is_not() {
        let program = parse("a = x not in y\nb = x is not None").unwrap();
        let StmtKind::Assign { value, .. } = &program.body[0].kind else {
            panic!()
        };
        assert!(matches!(value, Expr::Compare { rest, .. } if rest[0].0 == CmpOp::NotIn));
        let StmtKind::Assign { value, .. } = &program.body[1].kind else {
            panic!()
        };
        assert!(matches!(value, Expr::Compare { rest, .. } if rest[0].0 == CmpOp::IsNot));
    }

    #[test]
    fn test_for_unpack_and_multiline_call() {
        let program = parse("for k, v in pairs(\n    a,\n    b,\n):\n    pass\nx = 1").unwrap();
        assert_eq!(program.body.len(), 2);
        assert!(matches!(
            &program.body[0].kind,
            StmtKind::For { target: Target::Unpack(names), .. } if names.len() == 2
        ));
        assert_eq!(program.body[1].line, 6);
    }

    #[test]
    fn test_unsupported_keyword_rejected() {
        let err = parse("class Foo:\n    pass").unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn test_attribute_assignment_rejected() {
        let err = parse("ctx.value = 1").unwrap_err();
        assert!(err.to_string().contains("attribute assignment"));
    }

    #[test]
    fn test_call_argument_order_rejected() {
        let err = parse("f(a=1, 2)").unwrap_err();
        assert!(err.to_string().contains("positional argument follows keyword argument"));
        let err = parse("def f(a=1, b):\n    pass").unwrap_err();
        assert!(err.to_string().contains("non-default argument"));
    }

    #[test]
    fn test_missing_block_and_stray_clause() {
        let err = parse("if x:\ny = 1").unwrap_err();
        assert!(matches!(err, ScriptError::Compile { line: 1, ref message } if message.contains("indented block")));
        assert!(parse("else:\n    pass").is_err());
        assert!(parse("try:\n    pass\nx = 1").is_err());
    }

    #[test]
    fn test_deep_nesting_is_compile_error() {
        let src = format!("x = {}1{}", "(".repeat(500), ")".repeat(500));
        assert!(matches!(parse(&src), Err(ScriptError::Compile { .. })));
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let err = parse("a = 1\nb = (2 +\n").unwrap_err();
        assert!(matches!(err, ScriptError::Compile { line: 2, .. }));
    }

    #[test]
    fn test_error_line_inside_bracketed_line() {
        let err = parse("a = 1\nx = [1,\n  2 +]\n").unwrap_err();
        assert!(matches!(err, ScriptError::Compile { line: 3, .. }));
    }
}
