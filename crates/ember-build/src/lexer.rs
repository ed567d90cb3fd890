//! Script tokenizer
//!
//! A small, forgiving lexer for JavaScript and TypeScript sources. It knows
//! enough to tell code apart from strings, comments, template literals and
//! regular expression literals, and records 1-based positions for
//! diagnostics.

use crate::compiler::CompileError;

type LexResult<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Number,
    Str,
    /// Literal part of a template, up to the closing backtick or a `${`
    Template,
    Regex,
    Punct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte range in the source
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
    /// A line break separates this token from the one before it
    pub newline_before: bool,
}

impl Token {
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

/// Multi-character operators, longest first. `<<` and `>>` stay split so
/// nested type arguments close one `>` at a time.
const OPERATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", "&&=", "||=", "??=", "=>", "==", "!=", "<=",
    ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=",
    "**",
];

/// Keywords after which `/` starts a regular expression
const REGEX_AFTER: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

/// Split `source` into tokens, dropping whitespace and comments
pub fn tokenize(source: &str) -> LexResult<Vec<Token>> {
    let mut lexer = Lexer::new(source);
    lexer.run()?;
    Ok(lexer.tokens)
}

/// Match every `(`, `[`, `{` and `${` with its closing token
///
/// The result maps each bracket's index to its partner's; other tokens map
/// to themselves.
pub fn pair_brackets(source: &str, tokens: &[Token]) -> LexResult<Vec<usize>> {
    let mut pairs: Vec<usize> = (0..tokens.len()).collect();
    let mut stack: Vec<usize> = Vec::new();

    for (index, token) in tokens.iter().enumerate() {
        if token.kind != TokenKind::Punct {
            continue;
        }
        let text = token.text(source);
        match text {
            "(" | "[" | "{" | "${" => stack.push(index),
            ")" | "]" | "}" => {
                let Some(open) = stack.pop() else {
                    return Err(CompileError::at(
                        format!("unexpected '{}'", text),
                        token.line,
                        token.column,
                    ));
                };
                let opener = &tokens[open];
                let expected = closer(opener.text(source));
                if expected != text {
                    return Err(CompileError::at(
                        format!(
                            "unexpected '{}', expected '{}' to close '{}' from {}:{}",
                            text,
                            expected,
                            opener.text(source),
                            opener.line,
                            opener.column
                        ),
                        token.line,
                        token.column,
                    ));
                }
                pairs[open] = index;
                pairs[index] = open;
            }
            _ => {}
        }
    }

    if let Some(open) = stack.pop() {
        let token = &tokens[open];
        let what = match token.text(source) {
            "${" => "template expression".to_string(),
            other => format!("'{}'", other),
        };
        return Err(CompileError::at(format!("unclosed {}", what), token.line, token.column));
    }
    Ok(pairs)
}

/// Check that `()`, `[]` and `{}` balance outside strings, comments and
/// regular expressions
pub fn check_brackets(source: &str) -> LexResult<()> {
    let tokens = tokenize(source)?;
    pair_brackets(source, &tokens).map(|_| ())
}

fn closer(open: &str) -> &'static str {
    match open {
        "(" => ")",
        "[" => "]",
        _ => "}",
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || matches!(c, '_' | '$' | '#')
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '$')
}

struct Lexer<'a> {
    source: &'a str,
    chars: Vec<char>,
    /// Byte offset of each char, plus the source length
    offsets: Vec<usize>,
    current: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// Current column number (1-indexed)
    column: usize,
    /// One entry per open brace; `true` when it opened a template expression
    braces: Vec<bool>,
    newline: bool,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        let mut offsets: Vec<usize> = source.char_indices().map(|(i, _)| i).collect();
        offsets.push(source.len());
        Self {
            source,
            chars: source.chars().collect(),
            offsets,
            current: 0,
            line: 1,
            column: 1,
            braces: Vec::new(),
            newline: false,
            tokens: Vec::new(),
        }
    }

    fn run(&mut self) -> LexResult<()> {
        while let Some(c) = self.peek() {
            match c {
                '\n' => {
                    self.newline = true;
                    self.advance();
                }
                c if c.is_whitespace() => {
                    self.advance();
                }
                '/' if self.peek_next() == Some('/') => self.line_comment(),
                '/' if self.peek_next() == Some('*') => self.block_comment(),
                c => self.token(c)?,
            }
        }
        Ok(())
    }

    fn token(&mut self, c: char) -> LexResult<()> {
        let (start, line, column) = (self.current, self.line, self.column);
        let kind = match c {
            '"' | '\'' => {
                self.string(c);
                TokenKind::Str
            }
            '`' => {
                self.advance();
                return self.template(start, line, column);
            }
            '/' if self.regex_allowed() => {
                self.regex();
                TokenKind::Regex
            }
            '{' => {
                self.advance();
                self.braces.push(false);
                TokenKind::Punct
            }
            '}' => {
                self.advance();
                let resumes_template = self.braces.pop() == Some(true);
                self.push(TokenKind::Punct, start, line, column);
                if resumes_template {
                    let (start, line, column) = (self.current, self.line, self.column);
                    return self.template(start, line, column);
                }
                return Ok(());
            }
            c if is_ident_start(c) => {
                self.advance();
                while self.peek().is_some_and(is_ident_part) {
                    self.advance();
                }
                TokenKind::Ident
            }
            c if c.is_ascii_digit()
                || (c == '.' && self.peek_next().is_some_and(|n| n.is_ascii_digit())) =>
            {
                self.number();
                TokenKind::Number
            }
            _ => {
                self.operator();
                TokenKind::Punct
            }
        };
        self.push(kind, start, line, column);
        Ok(())
    }

    /// Scan template text after a backtick or a `}` that closed `${`
    fn template(&mut self, start: usize, line: usize, column: usize) -> LexResult<()> {
        loop {
            match self.peek() {
                None => {
                    return Err(CompileError::at(
                        "unterminated template literal",
                        self.line,
                        self.column,
                    ))
                }
                Some('\\') => {
                    self.advance();
                    self.advance();
                }
                Some('`') => {
                    self.advance();
                    self.push(TokenKind::Template, start, line, column);
                    return Ok(());
                }
                Some('$') if self.peek_next() == Some('{') => {
                    if self.current > start {
                        self.push(TokenKind::Template, start, line, column);
                    }
                    let (start, line, column) = (self.current, self.line, self.column);
                    self.advance();
                    self.advance();
                    self.braces.push(true);
                    self.push(TokenKind::Punct, start, line, column);
                    return Ok(());
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
    }

    /// Strings end at their quote or, unterminated, at the line end
    fn string(&mut self, quote: char) {
        self.advance();
        loop {
            match self.peek() {
                None | Some('\n') => break,
                Some('\\') => {
                    self.advance();
                    self.advance();
                }
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
    }

    fn regex(&mut self) {
        self.advance();
        let mut in_class = false;
        loop {
            match self.peek() {
                None | Some('\n') => return,
                Some('\\') => {
                    self.advance();
                    if self.peek() != Some('\n') {
                        self.advance();
                    }
                }
                Some('[') => {
                    in_class = true;
                    self.advance();
                }
                Some(']') => {
                    in_class = false;
                    self.advance();
                }
                Some('/') if !in_class => {
                    self.advance();
                    break;
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
        while self.peek().is_some_and(is_ident_part) {
            self.advance();
        }
    }

    fn number(&mut self) {
        let radix_prefix = self.peek() == Some('0')
            && matches!(self.peek_next(), Some('x' | 'X' | 'b' | 'B' | 'o' | 'O'));
        while let Some(c) = self.peek() {
            if !(c.is_ascii_alphanumeric() || c == '_' || c == '.') {
                break;
            }
            self.advance();
            if !radix_prefix && matches!(c, 'e' | 'E') && matches!(self.peek(), Some('+' | '-')) {
                self.advance();
            }
        }
    }

    fn operator(&mut self) {
        for op in OPERATORS {
            if !self.looking_at(op) {
                continue;
            }
            // `a?.5:1` is a conditional, not optional chaining
            if *op == "?." && self.chars.get(self.current + 2).is_some_and(|c| c.is_ascii_digit()) {
                continue;
            }
            for _ in op.chars() {
                self.advance();
            }
            return;
        }
        self.advance();
    }

    fn regex_allowed(&self) -> bool {
        let Some(last) = self.tokens.last() else {
            return true;
        };
        match last.kind {
            TokenKind::Ident => REGEX_AFTER.contains(&last.text(self.source)),
            TokenKind::Punct => !matches!(last.text(self.source), ")" | "]" | "}" | "++" | "--"),
            _ => false,
        }
    }

    fn line_comment(&mut self) {
        while self.peek().is_some_and(|c| c != '\n') {
            self.advance();
        }
    }

    fn block_comment(&mut self) {
        self.advance();
        self.advance();
        loop {
            match self.peek() {
                None => return,
                Some('*') if self.peek_next() == Some('/') => {
                    self.advance();
                    self.advance();
                    return;
                }
                Some(c) => {
                    if c == '\n' {
                        self.newline = true;
                    }
                    self.advance();
                }
            }
        }
    }

    fn push(&mut self, kind: TokenKind, start: usize, line: usize, column: usize) {
        self.tokens.push(Token {
            kind,
            start: self.offsets[start],
            end: self.offsets[self.current],
            line,
            column,
            newline_before: self.newline,
        });
        self.newline = false;
    }

    fn looking_at(&self, text: &str) -> bool {
        text.chars()
            .enumerate()
            .all(|(i, c)| self.chars.get(self.current + i) == Some(&c))
    }

    fn advance(&mut self) -> Option<char> {
        let c = *self.chars.get(self.current)?;
        self.current += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.current).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.current + 1).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_token_positions() {
        let source = "let a = 1;\n  foo(\"x\")";
        let tokens = tokenize(source).unwrap();
        let foo = tokens[5];
        assert_eq!(foo.text(source), "foo");
        assert_eq!((foo.line, foo.column), (2, 3));
        assert!(foo.newline_before);
        assert!(!tokens[6].newline_before);
        assert_eq!(tokens[7].kind, TokenKind::Str);
    }

    #[test]
    fn test_regex_or_division() {
        use TokenKind::*;
        assert_eq!(kinds("a = /b/g / 2"), vec![Ident, Punct, Regex, Punct, Number]);
        assert_eq!(kinds("(a) / b"), vec![Punct, Ident, Punct, Punct, Ident]);
        assert_eq!(kinds("return /x/.test(s)")[1], Regex);
        assert_eq!(kinds("i++ / 2"), vec![Ident, Punct, Punct, Number]);
    }

    #[test]
    fn test_template_pieces() {
        let source = "`a ${b} c`";
        let texts: Vec<&str> = tokenize(source).unwrap().iter().map(|t| t.text(source)).collect();
        assert_eq!(texts, vec!["`a ", "${", "b", "}", " c`"]);
    }

    #[test]
    fn test_operators_are_grouped() {
        let source = "a?.b ?? c => d >>= e <<f>>";
        let texts: Vec<&str> = tokenize(source).unwrap().iter().map(|t| t.text(source)).collect();
        assert_eq!(
            texts,
            vec!["a", "?.", "b", "??", "c", "=>", "d", ">>=", "e", "<", "<", "f", ">", ">"]
        );
    }

    #[rstest]
    #[case("function f() { return [1, (2)]; }")]
    #[case("const s = \"(\"; // )\n/* { */")]
    #[case("const t = `a ${ {x: 1}.x } b`;")]
    #[case("const t = `outer ${ `inner ${1}` }`;")]
    #[case("const s = 'it\\'s ('; ")]
    #[case("const re = /\\(/;\nconsole.log(re.test(\"(\"));\n")]
    #[case("const re = /[)]/;")]
    #[case("const q = /'/;")]
    #[case("if (/[/]/.test(s)) { go(); }")]
    #[case("function f(s) { return s.split(/}/); }")]
    #[case("const half = (a + b) / 2 / (c);")]
    fn test_balanced_sources(#[case] source: &str) {
        assert!(check_brackets(source).is_ok(), "{}", source);
    }

    #[test]
    fn test_mismatch_reports_position() {
        let err = check_brackets("function f() {\n  return (1];\n}").unwrap_err();
        assert_eq!((err.line, err.column), (Some(2), Some(12)));
        assert!(err.message.contains("expected ')'"));
    }

    #[test]
    fn test_unclosed_reports_opener() {
        let err = check_brackets("if (x) {\n  go();\n").unwrap_err();
        assert_eq!((err.line, err.column), (Some(1), Some(8)));
        assert_eq!(err.to_string(), "1:8: unclosed '{'");
    }

    #[test]
    fn test_unclosed_template_expression() {
        let err = check_brackets("const t = `a ${ b").unwrap_err();
        assert_eq!(err.message, "unclosed template expression");
        assert_eq!((err.line, err.column), (Some(1), Some(14)));
    }

    #[test]
    fn test_unterminated_template() {
        let err = check_brackets("const t = `abc\n").unwrap_err();
        assert_eq!(err.message, "unterminated template literal");
        assert_eq!(err.line, Some(2));
    }

    #[test]
    fn test_bracket_pairs() {
        let source = "f(a, [b])";
        let tokens = tokenize(source).unwrap();
        let pairs = pair_brackets(source, &tokens).unwrap();
        assert_eq!(pairs[1], 7);
        assert_eq!(pairs[4], 6);
        assert_eq!(pairs[7], 1);
        assert_eq!(pairs[2], 2);
    }
}
