//! 缩进预处理：把源文本切成逻辑行，并按缩进变化插入 Indent / Dedent
//!
//! 括号内换行、反斜杠续行与三引号字符串并入同一逻辑行；空行与纯注释行被跳过。
//! 行内的具体文法交给 [`super::grammar`]。

use super::ScriptError;

/// Tab 按 4 列计算
const TAB_WIDTH: usize = 4;

/// 括号与代码块的最大嵌套层数
pub(crate) const MAX_NESTING: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalLine<'a> {
    /// 起始行号（从 1 开始）
    pub line: usize,
    /// 去掉行首缩进的文本，可能跨越多个物理行
    pub text: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Layout<'a> {
    Line(LogicalLine<'a>),
    Indent { line: usize },
    Dedent,
}

fn compile(line: usize, message: &str) -> ScriptError {
    ScriptError::Compile {
        line,
        message: message.to_string(),
    }
}

pub fn layout(src: &str) -> Result<Vec<Layout<'_>>, ScriptError> {
    // 结构字符都是 ASCII，按字节扫描不会切到多字节字符中间
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut indents = vec![0usize];
    let mut pos = 0;
    let mut line = 1;

    while pos < bytes.len() {
        let mut width = 0;
        let mut cursor = pos;
        while let Some(&b) = bytes.get(cursor) {
            match b {
                b' ' => width += 1,
                b'\t' => width += TAB_WIDTH,
                b'\r' | b'\x0c' => {}
                _ => break,
            }
            cursor += 1;
        }
        match bytes.get(cursor) {
            None => break,
            Some(b'\n') => {
                pos = cursor + 1;
                line += 1;
                continue;
            }
            Some(b'#') => {
                pos = skip_comment(bytes, cursor);
                continue;
            }
            _ => {}
        }

        let current = *indents.last().unwrap_or(&0);
        if width > current {
            if indents.len() > MAX_NESTING {
                return Err(compile(line, "too many nested blocks"));
            }
            indents.push(width);
            out.push(Layout::Indent { line });
        } else if width < current {
            while indents.last().is_some_and(|&w| w > width) {
                indents.pop();
                out.push(Layout::Dedent);
            }
            if indents.last() != Some(&width) {
                return Err(compile(
                    line,
                    "unindent does not match any outer indentation level",
                ));
            }
        }

        let (end, next, spanned) = scan_logical_line(bytes, cursor, line)?;
        out.push(Layout::Line(LogicalLine {
            line,
            text: src[cursor..end].trim_end(),
        }));
        line += spanned;
        pos = next;
    }

    while indents.len() > 1 {
        indents.pop();
        out.push(Layout::Dedent);
    }
    Ok(out)
}

fn skip_comment(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
    }
    i
}

/// 返回 (文本结束位置, 下一逻辑行起点, 消耗的物理行数)
fn scan_logical_line(
    bytes: &[u8],
    start: usize,
    first_line: usize,
) -> Result<(usize, usize, usize), ScriptError> {
    let mut i = start;
    let mut depth = 0usize;
    let mut newlines = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' if depth == 0 => return Ok((i, i + 1, newlines + 1)),
            b'\n' => {
                newlines += 1;
                i += 1;
            }
            b'#' => i = skip_comment(bytes, i),
            b'\\' if bytes.get(i + 1) == Some(&b'\n') => {
                newlines += 1;
                i += 2;
            }
            b'(' | b'[' | b'{' => {
                depth += 1;
                if depth > MAX_NESTING {
                    return Err(compile(
                        first_line + newlines,
                        "too many nested expressions or blocks",
                    ));
                }
                i += 1;
            }
            b')' | b']' | b'}' => {
                depth = depth.saturating_sub(1);
                i += 1;
            }
            quote @ (b'"' | b'\'') => i = skip_string(bytes, i, quote, first_line, &mut newlines)?,
            _ => i += 1,
        }
    }
    Ok((bytes.len(), bytes.len(), newlines))
}

fn skip_string(
    bytes: &[u8],
    start: usize,
    quote: u8,
    first_line: usize,
    newlines: &mut usize,
) -> Result<usize, ScriptError> {
    let triple = bytes.get(start + 1) == Some(&quote) && bytes.get(start + 2) == Some(&quote);
    let opened_at = first_line + *newlines;
    let mut j = start + if triple { 3 } else { 1 };
    loop {
        match bytes.get(j) {
            None => return Err(compile(opened_at, "unterminated string literal")),
            Some(b'\\') => {
                if bytes.get(j + 1) == Some(&b'\n') {
                    *newlines += 1;
                }
                j += 2;
            }
            Some(&b) if b == quote => {
                if !triple {
                    return Ok(j + 1);
                }
                if bytes.get(j + 1) == Some(&quote) && bytes.get(j + 2) == Some(&quote) {
                    return Ok(j + 3);
                }
                j += 1;
            }
            Some(b'\n') => {
                if !triple {
                    return Err(compile(opened_at, "end of line while scanning string literal"));
                }
                *newlines += 1;
                j += 1;
            }
            Some(_) => j += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(src: &str) -> Vec<(usize, String)> {
        layout(src)
            .unwrap()
            .into_iter()
            .filter_map(|item| match item {
                Layout::Line(l) => Some((l.line, l.text.to_string())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_indent_and_dedent() {
        let items = layout("if x:\n    y = 1\nz = 2\n").unwrap();
        assert_eq!(items.len(), 5);
        assert_eq!(items[1], Layout::Indent { line: 2 });
        assert_eq!(items[3], Layout::Dedent);
    }

    #[test]
    fn test_blank_and_comment_lines_do_not_change_indent() {
        let items = layout("if x:\n    a = 1\n\n# note\n    b = 2\n").unwrap();
        let indents = items
            .iter()
            .filter(|i| matches!(i, Layout::Indent { .. }))
            .count();
        assert_eq!(indents, 1);
        assert_eq!(lines("a = 1\n\n# note\nb = 2"), vec![(1, "a = 1".into()), (4, "b = 2".into())]);
    }

    #[test]
    fn test_brackets_and_triple_quotes_join_lines() {
        let got = lines("x = [1,\n  2]\ns = '''a\nb'''\ny = 3\n");
        assert_eq!(got.len(), 3);
        assert_eq!(got[0], (1, "x = [1,\n  2]".into()));
        assert_eq!(got[2].0, 5);
    }

    #[test]
    fn test_bracket_inside_string_or_comment_ignored() {
        let got = lines("a = '('  # (\nb = 2\n");
        assert_eq!(got, vec![(1, "a = '('  # (".into()), (2, "b = 2".into())]);
    }

    #[test]
    fn test_bad_dedent_is_compile_error() {
        let err = layout("if x:\n    a = 1\n  b = 2\n").unwrap_err();
        assert!(matches!(err, ScriptError::Compile { line: 3, .. }));
    }

    #[test]
    fn test_unterminated_string() {
        let err = layout("x = 1\ny = 'abc").unwrap_err();
        assert!(matches!(err, ScriptError::Compile { line: 2, .. }));
    }

    #[test]
    fn test_nesting_bound() {
        let src = format!("x = {}1{}", "(".repeat(500), ")".repeat(500));
        assert!(matches!(layout(&src), Err(ScriptError::Compile { .. })));
    }
}
