//! TypeScript type erasure
//!
//! Type syntax is overwritten with spaces, so the code that remains keeps
//! its line and column. `enum` declarations are the one construct rewritten
//! into runtime code; namespaces and constructor parameter properties are
//! rejected.

use crate::compiler::{js_string, CompileError};
use crate::lexer::{pair_brackets, tokenize, Token, TokenKind};

type StripResult<T> = std::result::Result<T, CompileError>;

/// Identifiers that never end an expression
const NON_OPERAND_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await", "export", "import", "const", "let", "var", "function", "class",
    "extends", "implements", "default", "if", "while", "for", "switch", "catch", "with",
];

/// Class member modifiers that only exist in the type system
const TYPE_MODIFIERS: &[&str] = &[
    "public", "private", "protected", "readonly", "override", "declare", "abstract",
];

const RUNTIME_MODIFIERS: &[&str] = &["static", "async", "get", "set", "accessor"];

const PARAMETER_PROPERTIES: &[&str] = &["public", "private", "protected", "readonly", "override"];

/// What may follow `declare`
const DECLARABLE: &[&str] = &[
    "const", "let", "var", "function", "class", "module", "namespace", "global", "enum", "type",
    "interface", "abstract", "async",
];

/// Erase the type syntax of a TypeScript module
pub fn strip_types(source: &str) -> StripResult<String> {
    let tokens = tokenize(source)?;
    let pairs = pair_brackets(source, &tokens)?;
    let count = tokens.len();
    let mut stripper = Stripper {
        source,
        blanked: vec![false; count],
        tokens,
        pairs,
        edits: Vec::new(),
    };
    stripper.walk_code(0, count)?;
    Ok(stripper.finish())
}

struct Edit {
    start: usize,
    end: usize,
    /// `None` blanks the range
    replacement: Option<String>,
}

struct Stripper<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    /// Partner index of every bracket token
    pairs: Vec<usize>,
    blanked: Vec<bool>,
    edits: Vec<Edit>,
}

impl<'a> Stripper<'a> {
    /// Statements and expressions between `from` and `to`
    fn walk_code(&mut self, from: usize, to: usize) -> StripResult<()> {
        let mut i = from;
        let mut prev: Option<usize> = None;
        let mut lead = from;
        let mut declaring = false;
        let mut module_statement = false;

        while i < to {
            if self.at_statement_start(prev, i) {
                lead = i;
                declaring = false;
                module_statement = matches!(self.text(i), "import" | "export");
                if let Some(next) = self.declaration(i, to)? {
                    i = next;
                    prev = None;
                    continue;
                }
            }

            let token = self.tokens[i];
            let text = self.text(i);

            if token.kind == TokenKind::Ident {
                match text {
                    "function" => {
                        i = self.function(i, lead)?;
                        prev = self.last_kept(from, i);
                        continue;
                    }
                    "class" => {
                        i = self.class(i, to)?;
                        prev = self.last_kept(from, i);
                        continue;
                    }
                    "const" | "let" | "var" if self.starts_binding(i + 1) => {
                        declaring = true;
                        i = self.binding(i + 1)?;
                        prev = self.last_kept(from, i);
                        continue;
                    }
                    "as" | "satisfies" if prev.is_some_and(|p| self.ends_expression(p)) => {
                        let end = if self.text(i + 1) == "const" {
                            i + 2
                        } else {
                            self.skip_type(i + 1, false)
                        };
                        if end > i + 1 {
                            self.blank(i, end);
                            i = end;
                            continue;
                        }
                    }
                    _ if self.text(i + 1) == "<"
                        && self.adjacent(i, i + 1)
                        && self.ends_expression(i) =>
                    {
                        if let Some(close) = self.call_type_arguments(i + 1) {
                            self.blank(i + 1, close + 1);
                            prev = Some(i);
                            i = close + 1;
                            continue;
                        }
                    }
                    _ => {}
                }
            }

            if token.kind == TokenKind::Punct {
                match text {
                    ";" => {
                        declaring = false;
                        module_statement = false;
                    }
                    "," if declaring && self.starts_binding(i + 1) => {
                        i = self.binding(i + 1)?;
                        prev = self.last_kept(from, i);
                        continue;
                    }
                    "!" if prev.is_some_and(|p| self.ends_expression(p) && self.adjacent(p, i)) => {
                        // non-null assertion
                        self.blank(i, i + 1);
                        i += 1;
                        continue;
                    }
                    "<" if !prev.is_some_and(|p| self.ends_expression(p)) => {
                        // generic arrow function
                        if let Some(close) = self.call_type_arguments(i) {
                            self.blank(i, close + 1);
                            i = close + 1;
                            continue;
                        }
                    }
                    "(" => {
                        let close = self.pairs[i];
                        i = self.parenthesized(i, close, prev)?;
                        prev = Some(close);
                        continue;
                    }
                    "[" | "{" | "${" => {
                        let close = self.pairs[i];
                        let specifiers = text == "{"
                            && module_statement
                            && prev.is_some_and(|p| {
                                matches!(self.text(p), "import" | "export" | "," | "type")
                            });
                        if !specifiers {
                            self.walk_code(i + 1, close)?;
                        }
                        prev = Some(close);
                        i = close + 1;
                        continue;
                    }
                    _ => {}
                }
            }

            if !self.blanked[i] {
                prev = Some(i);
            }
            i += 1;
        }
        Ok(())
    }

    /// Type-only statements at a statement start; returns where to resume
    fn declaration(&mut self, lead: usize, to: usize) -> StripResult<Option<usize>> {
        let mut j = lead;
        if self.text(j) == "export" {
            j += 1;
            if self.text(j) == "default" {
                j += 1;
            }
        }

        if self.text(j) == "declare" && DECLARABLE.contains(&self.text(j + 1)) {
            let end = self.statement_end(j + 1, to);
            self.blank(lead, end);
            return Ok(Some(end));
        }

        match self.text(j) {
            "interface" if self.is_ident(j + 1) => {
                let end = self.interface_end(j + 2, to);
                self.blank(lead, end);
                Ok(Some(end))
            }
            "type" if self.is_ident(j + 1) && matches!(self.text(j + 2), "=" | "<") => {
                let mut k = j + 2;
                if self.text(k) == "<" {
                    match self.type_arguments(k) {
                        Some(close) => k = close + 1,
                        None => return Ok(None),
                    }
                }
                if self.text(k) != "=" {
                    return Ok(None);
                }
                let mut end = self.skip_type(k + 1, false);
                if self.text(end) == ";" {
                    end += 1;
                }
                self.blank(lead, end);
                Ok(Some(end))
            }
            "enum" if self.is_ident(j + 1) && self.text(j + 2) == "{" => {
                self.enum_declaration(j, j + 1, j + 2).map(Some)
            }
            "const" if self.text(j + 1) == "enum" && self.is_ident(j + 2) && self.text(j + 3) == "{" => {
                self.enum_declaration(j, j + 2, j + 3).map(Some)
            }
            "abstract" if self.text(j + 1) == "class" => {
                self.blank(j, j + 1);
                Ok(None)
            }
            "namespace" | "module" if self.is_ident(j + 1) && self.text(j + 2) == "{" => {
                Err(self.error(j, "namespaces are not supported"))
            }
            _ => Ok(None),
        }
    }

    /// `function` keyword; returns the index of its body or past a blanked
    /// overload signature
    fn function(&mut self, keyword: usize, lead: usize) -> StripResult<usize> {
        let mut j = keyword + 1;
        if self.text(j) == "*" {
            j += 1;
        }
        if self.is_ident(j) {
            j += 1;
        }
        let generics = if self.text(j) == "<" {
            self.type_arguments(j)
        } else {
            None
        };
        let open = generics.map_or(j, |close| close + 1);
        if self.text(open) != "(" {
            return Ok(keyword + 1);
        }

        let close = self.pairs[open];
        let after = close + 1;
        let body = self.return_type_end(after, false);
        if self.text(body) != "{" {
            let end = if self.text(body) == ";" { body + 1 } else { body };
            self.blank(lead, end);
            return Ok(end);
        }

        if let Some(generic_close) = generics {
            self.blank(j, generic_close + 1);
        }
        self.walk_params(open + 1, close)?;
        self.blank(after, body);
        Ok(body)
    }

    /// A parenthesized group in code: parameters when an arrow, method
    /// body or `catch` block follows, otherwise an expression
    fn parenthesized(&mut self, open: usize, close: usize, prev: Option<usize>) -> StripResult<usize> {
        let after = close + 1;
        let named = prev.is_some_and(|p| self.is_ident(p) && self.ends_expression(p));
        let signature_end = match self.text(after) {
            "=>" => Some(after),
            ":" => {
                let end = self.skip_type(after + 1, true);
                match self.text(end) {
                    "=>" => Some(end),
                    "{" if named => Some(end),
                    _ => None,
                }
            }
            "{" if named => Some(after),
            _ => None,
        };

        if let Some(end) = signature_end {
            self.walk_params(open + 1, close)?;
            self.blank(after, end);
            return Ok(end);
        }
        if prev.is_some_and(|p| self.text(p) == "catch") {
            self.walk_params(open + 1, close)?;
        } else {
            self.walk_code(open + 1, close)?;
        }
        Ok(after)
    }

    fn class(&mut self, keyword: usize, to: usize) -> StripResult<usize> {
        let mut j = keyword + 1;
        if self.is_ident(j) && !matches!(self.text(j), "extends" | "implements") {
            j += 1;
        }
        if self.text(j) == "<" {
            if let Some(close) = self.type_arguments(j) {
                self.blank(j, close + 1);
                j = close + 1;
            }
        }

        if self.text(j) == "extends" {
            j += 1;
            while j < to && !matches!(self.text(j), "{" | "implements") {
                if self.text(j) == "<" {
                    if let Some(close) = self.type_arguments(j) {
                        self.blank(j, close + 1);
                        j = close + 1;
                        continue;
                    }
                }
                if self.is_opener(j) {
                    let close = self.pairs[j];
                    self.walk_code(j + 1, close)?;
                    j = close + 1;
                    continue;
                }
                j += 1;
            }
        }

        if self.text(j) == "implements" {
            let start = j;
            while j < to && self.text(j) != "{" {
                j = match self.text(j) {
                    "<" => self.type_arguments(j).map_or(j + 1, |close| close + 1),
                    _ => j + 1,
                };
            }
            self.blank(start, j);
        }

        if self.text(j) != "{" {
            return Ok(j);
        }
        let close = self.pairs[j];
        self.walk_class_body(j + 1, close)?;
        Ok(close + 1)
    }

    fn walk_class_body(&mut self, from: usize, to: usize) -> StripResult<()> {
        let mut i = from;
        while i < to {
            if self.text(i) == ";" {
                i += 1;
                continue;
            }

            let start = i;
            let mut modifiers = Vec::new();
            let mut type_only = false;
            while self.is_ident(i) && self.is_modifier(i + 1, to) {
                let text = self.text(i);
                if TYPE_MODIFIERS.contains(&text) {
                    type_only |= matches!(text, "declare" | "abstract");
                    modifiers.push(i);
                } else if !RUNTIME_MODIFIERS.contains(&text) {
                    break;
                }
                i += 1;
            }
            if self.text(i) == "*" {
                i += 1;
            }

            // index signature
            if self.text(i) == "[" && self.is_ident(i + 1) && self.text(i + 2) == ":" {
                let end = self.member_end(i, to);
                self.blank(start, end);
                i = end;
                continue;
            }
            // static block
            if self.text(i) == "{" {
                let close = self.pairs[i];
                self.walk_code(i + 1, close)?;
                i = close + 1;
                continue;
            }

            let mut k = match self.kind(i) {
                Some(TokenKind::Ident | TokenKind::Str | TokenKind::Number) => i + 1,
                _ if self.text(i) == "[" => self.pairs[i] + 1,
                _ => {
                    i += 1;
                    continue;
                }
            };

            let marker = matches!(self.text(k), "?" | "!")
                && (k + 1 >= to
                    || self.tokens[k + 1].newline_before
                    || matches!(self.text(k + 1), ":" | "(" | "=" | ";" | "<"));
            let marker = marker.then_some(k);
            if marker.is_some() {
                k += 1;
            }
            let generics = match self.text(k) {
                "<" => self.type_arguments(k).map(|close| (k, close)),
                _ => None,
            };
            if let Some((_, close)) = generics {
                k = close + 1;
            }

            if self.text(k) == "(" {
                let close = self.pairs[k];
                let after = close + 1;
                let body = self.return_type_end(after, false);
                if type_only || self.text(body) != "{" {
                    // abstract method or overload signature
                    let end = if self.text(body) == ";" { body + 1 } else { body };
                    self.blank(start, end);
                    i = end;
                    continue;
                }

                self.erase_markers(&modifiers, marker);
                if let Some((open, generic_close)) = generics {
                    self.blank(open, generic_close + 1);
                }
                self.walk_params(k + 1, close)?;
                self.blank(after, body);
                let body_close = self.pairs[body];
                self.walk_code(body + 1, body_close)?;
                i = body_close + 1;
                continue;
            }

            let end = self.member_end(k, to);
            if type_only {
                self.blank(start, end);
                i = end;
                continue;
            }

            self.erase_markers(&modifiers, marker);
            if self.text(k) == ":" {
                let type_end = self.skip_type(k + 1, false);
                self.blank(k, type_end);
                k = type_end;
            }
            if self.text(k) == "=" {
                self.walk_code(k + 1, end)?;
            }
            i = end.max(k);
        }
        Ok(())
    }

    fn walk_params(&mut self, from: usize, to: usize) -> StripResult<()> {
        let mut i = from;
        let mut at_start = true;
        while i < to {
            let text = self.text(i);
            if at_start
                && PARAMETER_PROPERTIES.contains(&text)
                && (self.is_ident(i + 1) || matches!(self.text(i + 1), "{" | "["))
            {
                return Err(self.error(i, "parameter properties are not supported"));
            }
            if at_start && text == "this" && self.text(i + 1) == ":" {
                let mut end = self.skip_type(i + 2, false);
                if self.text(end) == "," {
                    end += 1;
                }
                self.blank(i, end);
                i = end;
                continue;
            }
            at_start = false;

            match text {
                "," => {
                    at_start = true;
                    i += 1;
                }
                "=" => {
                    let mut end = i + 1;
                    while end < to && self.text(end) != "," {
                        end = if self.is_opener(end) { self.pairs[end] + 1 } else { end + 1 };
                    }
                    self.walk_code(i + 1, end)?;
                    i = end;
                }
                "?" if i + 1 == to || matches!(self.text(i + 1), ":" | "," | "=") => {
                    self.blank(i, i + 1);
                    i += 1;
                }
                ":" => {
                    let end = self.skip_type(i + 1, false);
                    self.blank(i, end);
                    i = end;
                }
                _ if self.is_opener(i) => {
                    let close = self.pairs[i];
                    self.walk_code(i + 1, close)?;
                    i = close + 1;
                }
                _ => i += 1,
            }
        }
        Ok(())
    }

    /// Binding after `const`/`let`/`var` or a declarator comma
    fn binding(&mut self, start: usize) -> StripResult<usize> {
        let mut k = start;
        if self.is_ident(k) {
            k += 1;
        } else {
            let close = self.pairs[k];
            self.walk_code(k + 1, close)?;
            k = close + 1;
        }
        if self.text(k) == "!" && self.text(k + 1) == ":" {
            self.blank(k, k + 1);
            k += 1;
        }
        if self.text(k) == ":" {
            let end = self.skip_type(k + 1, false);
            self.blank(k, end);
            k = end;
        }
        Ok(k)
    }

    /// Rewrite `enum E { A, B = 5 }` into an object with reverse mappings
    fn enum_declaration(&mut self, keyword: usize, name: usize, open: usize) -> StripResult<usize> {
        let close = self.pairs[open];
        let enum_name = self.text(name);
        let mut code = format!("var {0} = (function ({0}) {{ ", enum_name);
        let mut next: Option<i64> = Some(0);

        let mut k = open + 1;
        while k < close {
            if self.text(k) == "," {
                k += 1;
                continue;
            }
            let member = k;
            let key = match self.kind(k) {
                Some(TokenKind::Ident) => self.text(k),
                Some(TokenKind::Str) => {
                    let raw = self.text(k);
                    if raw.len() >= 2 {
                        &raw[1..raw.len() - 1]
                    } else {
                        ""
                    }
                }
                _ => return Err(self.error(k, "invalid enum member")),
            };
            let key = js_string(key);
            k += 1;

            if self.text(k) == "=" {
                let start = k + 1;
                let mut end = start;
                while end < close && self.text(end) != "," {
                    end = if self.is_opener(end) { self.pairs[end] + 1 } else { end + 1 };
                }
                if end == start {
                    return Err(self.error(member, "missing enum member value"));
                }
                let value = self.source[self.tokens[start].start..self.tokens[end - 1].end].trim();
                if let Ok(number) = value.parse::<i64>() {
                    code.push_str(&format!("{0}[{0}[{1}] = {2}] = {1}; ", enum_name, key, number));
                    next = number.checked_add(1);
                } else if end == start + 1 && self.kind(start) == Some(TokenKind::Str) {
                    code.push_str(&format!("{}[{}] = {}; ", enum_name, key, value));
                    next = None;
                } else {
                    code.push_str(&format!("{0}[{0}[{1}] = ({2})] = {1}; ", enum_name, key, value));
                    next = None;
                }
                k = end;
            } else {
                let number =
                    next.ok_or_else(|| self.error(member, "enum member needs an initializer"))?;
                code.push_str(&format!("{0}[{0}[{1}] = {2}] = {1}; ", enum_name, key, number));
                next = number.checked_add(1);
            }
        }

        code.push_str(&format!("return {0}; }})({0} || {{}});", enum_name));
        self.replace(keyword, close + 1, code);
        Ok(close + 1)
    }

    /// Past the end of a type starting at `start`
    ///
    /// Stops at the first token that cannot continue the type: a closer,
    /// `,`, `;`, `=`, a body `{`, or a new line after a complete type.
    fn skip_type(&self, start: usize, stop_at_arrow: bool) -> usize {
        let mut i = start;
        let mut depth = 0usize;
        let mut operand = true;
        let mut conditional = 0usize;

        while i < self.tokens.len() {
            let token = self.tokens[i];
            let text = self.text(i);

            if depth > 0 {
                match text {
                    "(" | "[" | "{" | "<" | "${" => depth += 1,
                    ")" | "]" | "}" | ">" => {
                        depth -= 1;
                        if depth == 0 {
                            operand = false;
                        }
                    }
                    _ => {}
                }
                i += 1;
                continue;
            }

            if operand {
                match text {
                    "|" | "&" | "..." | "-" => {}
                    "(" | "[" | "{" | "<" => depth += 1,
                    "typeof" | "keyof" | "readonly" | "unique" | "infer" | "new" | "asserts"
                    | "abstract"
                        if token.kind == TokenKind::Ident => {}
                    _ if matches!(
                        token.kind,
                        TokenKind::Ident | TokenKind::Str | TokenKind::Number | TokenKind::Template
                    ) =>
                    {
                        operand = false
                    }
                    _ => return i,
                }
            } else {
                let newline = token.newline_before;
                match text {
                    "|" | "&" | "." => operand = true,
                    "=>" if stop_at_arrow => return i,
                    "=>" => operand = true,
                    "[" | "<" if !newline => depth += 1,
                    "extends" if !newline => {
                        conditional += 1;
                        operand = true;
                    }
                    "?" if conditional > 0 => operand = true,
                    ":" if conditional > 0 => {
                        conditional -= 1;
                        operand = true;
                    }
                    "is" if !newline => operand = true,
                    _ => return i,
                }
            }
            i += 1;
        }
        i
    }

    /// Index of the `>` closing type arguments opened at `open`
    fn type_arguments(&self, open: usize) -> Option<usize> {
        let mut depth = 0usize;
        let mut i = open;
        while i < self.tokens.len() {
            match self.tokens[i].kind {
                TokenKind::Ident | TokenKind::Str | TokenKind::Number => {}
                TokenKind::Punct => match self.text(i) {
                    "<" => depth += 1,
                    ">" => {
                        depth -= 1;
                        if depth == 0 {
                            return Some(i);
                        }
                    }
                    "," | "." | "|" | "&" | "=>" | ":" | "?" | ";" | "..." | "=" | "-" => {}
                    "(" | "[" | "{" => i = self.pairs[i],
                    _ => return None,
                },
                _ => return None,
            }
            i += 1;
        }
        None
    }

    /// Type arguments directly followed by a call
    fn call_type_arguments(&self, open: usize) -> Option<usize> {
        self.type_arguments(open)
            .filter(|&close| self.text(close + 1) == "(")
    }

    /// Past an optional `: ReturnType` after a parameter list
    fn return_type_end(&self, after: usize, stop_at_arrow: bool) -> usize {
        if self.text(after) == ":" {
            self.skip_type(after + 1, stop_at_arrow)
        } else {
            after
        }
    }

    /// Past the `;`, closing `}` or line end of a `declare` statement
    fn statement_end(&self, start: usize, to: usize) -> usize {
        let mut k = start;
        while k < to {
            if self.text(k) == ";" {
                return k + 1;
            }
            if k > start && self.tokens[k].newline_before && self.ends_expression(k - 1) {
                return k;
            }
            if self.is_opener(k) {
                let body = self.text(k) == "{"
                    && !matches!(self.text(k - 1), ":" | "=" | "|" | "&" | "<" | "," | "(" | "=>");
                k = self.pairs[k] + 1;
                if body {
                    return if self.text(k) == ";" { k + 1 } else { k };
                }
                continue;
            }
            k += 1;
        }
        to
    }

    fn interface_end(&self, start: usize, to: usize) -> usize {
        let mut k = start;
        while k < to {
            match self.text(k) {
                "<" => k = self.type_arguments(k).map_or(k + 1, |close| close + 1),
                "{" => {
                    let end = self.pairs[k] + 1;
                    return if self.text(end) == ";" { end + 1 } else { end };
                }
                _ => k += 1,
            }
        }
        to
    }

    /// Past the end of a class field
    fn member_end(&self, start: usize, to: usize) -> usize {
        let mut j = start;
        while j < to {
            if self.text(j) == ";" {
                return j + 1;
            }
            if j > start && self.tokens[j].newline_before && self.ends_expression(j - 1) {
                return j;
            }
            j = if self.is_opener(j) { self.pairs[j] + 1 } else { j + 1 };
        }
        to
    }

    fn at_statement_start(&self, prev: Option<usize>, i: usize) -> bool {
        match prev {
            None => true,
            Some(p) => {
                matches!(self.text(p), ";" | "}")
                    || (self.tokens[i].newline_before && self.ends_expression(p))
            }
        }
    }

    fn starts_binding(&self, i: usize) -> bool {
        self.is_ident(i) || matches!(self.text(i), "{" | "[")
    }

    fn is_modifier(&self, next: usize, to: usize) -> bool {
        next < to
            && !matches!(
                self.text(next),
                "(" | ":" | "=" | ";" | "?" | "!" | "<" | "}"
            )
    }

    fn ends_expression(&self, i: usize) -> bool {
        match self.kind(i) {
            Some(TokenKind::Ident) => !NON_OPERAND_KEYWORDS.contains(&self.text(i)),
            Some(TokenKind::Punct) => matches!(self.text(i), ")" | "]" | "}"),
            Some(_) => true,
            None => false,
        }
    }

    fn erase_markers(&mut self, modifiers: &[usize], marker: Option<usize>) {
        for &modifier in modifiers {
            self.blank(modifier, modifier + 1);
        }
        if let Some(marker) = marker {
            self.blank(marker, marker + 1);
        }
    }

    fn last_kept(&self, from: usize, before: usize) -> Option<usize> {
        (from..before).rev().find(|&k| !self.blanked[k])
    }

    fn text(&self, i: usize) -> &'a str {
        let source = self.source;
        self.tokens.get(i).map_or("", |token| token.text(source))
    }

    fn kind(&self, i: usize) -> Option<TokenKind> {
        self.tokens.get(i).map(|token| token.kind)
    }

    fn is_ident(&self, i: usize) -> bool {
        self.kind(i) == Some(TokenKind::Ident)
    }

    fn is_opener(&self, i: usize) -> bool {
        self.kind(i) == Some(TokenKind::Punct) && matches!(self.text(i), "(" | "[" | "{" | "${")
    }

    fn adjacent(&self, a: usize, b: usize) -> bool {
        self.tokens[a].end == self.tokens[b].start
    }

    fn error(&self, i: usize, message: &str) -> CompileError {
        let token = self.tokens[i.min(self.tokens.len().saturating_sub(1))];
        CompileError::at(message, token.line, token.column)
    }

    /// Blank tokens `from..to`
    fn blank(&mut self, from: usize, to: usize) {
        if from >= to || to > self.tokens.len() {
            return;
        }
        for flag in &mut self.blanked[from..to] {
            *flag = true;
        }
        self.edits.push(Edit {
            start: self.tokens[from].start,
            end: self.tokens[to - 1].end,
            replacement: None,
        });
    }

    fn replace(&mut self, from: usize, to: usize, code: String) {
        self.edits.push(Edit {
            start: self.tokens[from].start,
            end: self.tokens[to - 1].end,
            replacement: Some(code),
        });
    }

    fn finish(mut self) -> String {
        self.edits.sort_by_key(|edit| edit.start);
        let mut out = String::with_capacity(self.source.len());
        let mut cursor = 0;
        for edit in &self.edits {
            if edit.end <= cursor {
                continue;
            }
            let start = edit.start.max(cursor);
            out.push_str(&self.source[cursor..start]);
            let removed = &self.source[start..edit.end];
            match &edit.replacement {
                Some(code) => {
                    out.push_str(code);
                    out.push_str(&"\n".repeat(removed.matches('\n').count()));
                }
                None => out.extend(
                    removed
                        .chars()
                        .map(|c| if matches!(c, '\n' | '\r') { c } else { ' ' }),
                ),
            }
            cursor = edit.end;
        }
        out.push_str(&self.source[cursor..]);
        out
    }
}
