// Tokenizer and reference extractor for generated DAX.
//
// Only as much of DAX as is needed to find column references and reject
// text that is not even lexically DAX: no expression grammar.

use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaxToken {
    /// Function, keyword, variable or unquoted table name
    Ident(String),
    /// `'Table Name'`
    QuotedTable(String),
    /// `[Column]` or `[Measure]`
    Bracket(String),
    /// `"text"`
    Str(String),
    Number,
    Op(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
}

/// One `table[column]` or bare `[column]` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaxReference {
    pub table: Option<String>,
    pub column: String,
}

/// References found in an expression, plus the names the expression defines itself
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaxReferences {
    pub references: Vec<DaxReference>,
    local_names: HashSet<String>,
    variables: HashSet<String>,
}

impl DaxReferences {
    /// Measure names, columns named by ADDCOLUMNS-style calls and DEFINE'd names
    pub fn is_local(&self, name: &str) -> bool {
        self.local_names.contains(&name.to_lowercase())
    }

    /// VAR names; `Var[col]` refers to a column of a table variable
    pub fn is_variable(&self, name: &str) -> bool {
        self.variables.contains(&name.to_lowercase())
    }
}

pub fn tokenize(text: &str) -> Result<Vec<DaxToken>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c.is_whitespace() {
            i += 1;
        } else if (c == '/' && next == Some('/')) || (c == '-' && next == Some('-')) {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '/' && next == Some('*') {
            i += 2;
            loop {
                if i + 1 >= chars.len() {
                    return Err("unterminated block comment".to_string());
                }
                if chars[i] == '*' && chars[i + 1] == '/' {
                    i += 2;
                    break;
                }
                i += 1;
            }
        } else if c == '"' || c == '\'' || c == '[' {
            let close = if c == '[' { ']' } else { c };
            let (value, end) = read_delimited(&chars, i + 1, close).ok_or_else(|| match c {
                '"' => "unterminated string literal".to_string(),
                '\'' => "unterminated quoted table name".to_string(),
                _ => "unterminated column reference".to_string(),
            })?;
            tokens.push(match c {
                '"' => DaxToken::Str(value),
                '\'' => DaxToken::QuotedTable(value),
                _ => DaxToken::Bracket(value),
            });
            i = end;
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            tokens.push(DaxToken::Ident(chars[start..i].iter().collect()));
        } else if c.is_ascii_digit() || (c == '.' && next.map_or(false, |n| n.is_ascii_digit())) {
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
            tokens.push(DaxToken::Number);
        } else {
            let token = match c {
                '(' => DaxToken::LParen,
                ')' => DaxToken::RParen,
                '{' => DaxToken::LBrace,
                '}' => DaxToken::RBrace,
                ',' => DaxToken::Comma,
                ':' if next == Some('=') => {
                    i += 1;
                    DaxToken::Op(":=".to_string())
                }
                '<' | '>' | '=' | '&' | '|' => {
                    let pair: String = [c, next.unwrap_or(' ')].iter().collect();
                    if matches!(pair.as_str(), "<=" | ">=" | "<>" | "==" | "&&" | "||") {
                        i += 1;
                        DaxToken::Op(pair)
                    } else {
                        DaxToken::Op(c.to_string())
                    }
                }
                '+' | '-' | '*' | '/' | '^' | ';' => DaxToken::Op(c.to_string()),
                other => return Err(format!("unexpected character '{}'", other)),
            };
            tokens.push(token);
            i += 1;
        }
    }

    check_balance(&tokens)?;
    Ok(tokens)
}

/// Read up to the closing delimiter; a doubled delimiter is an escaped one.
/// Returns the content and the index just past the closing delimiter.
fn read_delimited(chars: &[char], mut i: usize, close: char) -> Option<(String, usize)> {
    let mut value = String::new();
    while i < chars.len() {
        if chars[i] == close {
            if chars.get(i + 1) == Some(&close) {
                value.push(close);
                i += 2;
                continue;
            }
            return Some((value, i + 1));
        }
        value.push(chars[i]);
        i += 1;
    }
    None
}

fn check_balance(tokens: &[DaxToken]) -> Result<(), String> {
    let mut stack = Vec::new();
    for token in tokens {
        match token {
            DaxToken::LParen | DaxToken::LBrace => stack.push(token),
            DaxToken::RParen => {
                if stack.pop() != Some(&DaxToken::LParen) {
                    return Err("unbalanced parentheses".to_string());
                }
            }
            DaxToken::RBrace => {
                if stack.pop() != Some(&DaxToken::LBrace) {
                    return Err("unbalanced braces".to_string());
                }
            }
            _ => {}
        }
    }
    if stack.is_empty() {
        Ok(())
    } else {
        Err("unbalanced parentheses".to_string())
    }
}

/// Functions whose string arguments followed by a comma name new columns:
/// `ADDCOLUMNS(t, "Fraud Count", expr)`
const COLUMN_NAMING_FUNCTIONS: &[&str] =
    &["ADDCOLUMNS", "SUMMARIZECOLUMNS", "SUMMARIZE", "SELECTCOLUMNS", "GROUPBY", "ROW"];

/// Tokenize and collect column references.
pub fn extract_references(text: &str) -> Result<DaxReferences, String> {
    let mut refs = DaxReferences::default();

    let (tokens, start) = match plain_measure_body(text) {
        Some(body) => (tokenize(body)?, 0),
        None => {
            let tokens = tokenize(text)?;
            let start = measure_name_end(&tokens, &mut refs);
            (tokens, start)
        }
    };
    let calls = enclosing_calls(&tokens);

    let mut i = start;
    while i < tokens.len() {
        match &tokens[i] {
            DaxToken::Str(value) => {
                let names_column = calls[i].map_or(false, |f| {
                    COLUMN_NAMING_FUNCTIONS.iter().any(|n| f.eq_ignore_ascii_case(n))
                });
                if names_column && tokens.get(i + 1) == Some(&DaxToken::Comma) {
                    refs.local_names.insert(value.to_lowercase());
                }
            }
            DaxToken::Ident(word) if word.eq_ignore_ascii_case("VAR") => {
                if let Some(DaxToken::Ident(name)) = tokens.get(i + 1) {
                    refs.variables.insert(name.to_lowercase());
                }
            }
            DaxToken::Ident(word)
                if word.eq_ignore_ascii_case("MEASURE") || word.eq_ignore_ascii_case("COLUMN") =>
            {
                // DEFINE MEASURE table[Name] = ...
                let mut j = i + 1;
                if matches!(tokens.get(j), Some(DaxToken::Ident(_) | DaxToken::QuotedTable(_))) {
                    j += 1;
                }
                if let Some(DaxToken::Bracket(name)) = tokens.get(j) {
                    refs.local_names.insert(name.to_lowercase());
                    i = j + 1;
                    continue;
                }
            }
            DaxToken::Ident(word) if is_keyword(word) => {}
            DaxToken::Ident(table) | DaxToken::QuotedTable(table) => {
                if let Some(DaxToken::Bracket(column)) = tokens.get(i + 1) {
                    refs.references.push(DaxReference {
                        table: Some(table.clone()),
                        column: column.clone(),
                    });
                    i += 2;
                    continue;
                }
            }
            DaxToken::Bracket(column) => refs.references.push(DaxReference {
                table: None,
                column: column.clone(),
            }),
            _ => {}
        }
        i += 1;
    }

    Ok(refs)
}

/// For each token, the function whose argument list directly contains it
fn enclosing_calls(tokens: &[DaxToken]) -> Vec<Option<&str>> {
    let mut stack: Vec<Option<&str>> = Vec::new();
    let mut enclosing = Vec::with_capacity(tokens.len());

    for (i, token) in tokens.iter().enumerate() {
        if token == &DaxToken::RParen || token == &DaxToken::RBrace {
            stack.pop();
        }
        enclosing.push(stack.last().copied().flatten());
        match token {
            DaxToken::LParen => stack.push(match i.checked_sub(1).map(|p| &tokens[p]) {
                Some(DaxToken::Ident(name)) => Some(name.as_str()),
                _ => None,
            }),
            DaxToken::LBrace => stack.push(None),
            _ => {}
        }
    }
    enclosing
}

/// `Fraud % = ...`: a measure name is free text up to the first `=` or `:=`.
///
/// Only heads without brackets, quotes or parentheses qualify, so nothing
/// skipped here can hold a column reference. Returns the expression body.
fn plain_measure_body(text: &str) -> Option<&str> {
    let eq = text.find('=')?;
    let head = text[..eq].trim_end();
    let head = head.strip_suffix(':').unwrap_or(head).trim();

    let free_text = !head.is_empty()
        && !head.contains(|c: char| "()[]{}\"'<>!&|,\n".contains(c))
        && !head.contains("//")
        && !head.contains("--")
        && !head.contains("/*");
    let starts_with_keyword = head.split_whitespace().next().map_or(false, is_keyword);

    if free_text && !starts_with_keyword && text[eq + 1..].chars().next() != Some('=') {
        Some(&text[eq + 1..])
    } else {
        None
    }
}

fn is_keyword(word: &str) -> bool {
    const KEYWORDS: &[&str] = &[
        "DEFINE", "EVALUATE", "VAR", "RETURN", "MEASURE", "COLUMN", "TABLE", "ORDER", "BY", "ASC",
        "DESC", "START", "AT", "IN", "NOT", "AND", "OR",
    ];
    KEYWORDS.iter().any(|k| word.eq_ignore_ascii_case(k))
}

/// `[Total Fraud] := ...` or `'Fraud Data'[Total] := ...`: skip the measure name.
///
/// Returns the index of the first token of the expression body.
fn measure_name_end(tokens: &[DaxToken], refs: &mut DaxReferences) -> usize {
    let Some(eq) = tokens
        .iter()
        .position(|t| matches!(t, DaxToken::Op(op) if op == "=" || op == ":="))
    else {
        return 0;
    };

    let head = &tokens[..eq];
    let assignment = matches!(&tokens[eq], DaxToken::Op(op) if op == ":=");
    let starts_with_keyword = matches!(head.first(), Some(DaxToken::Ident(word)) if is_keyword(word));

    // `Total Fraud =` and `[Total Fraud] =` name a measure; a qualified
    // `table[Measure]` head only does with `:=`, otherwise it is a comparison.
    let is_name = !head.is_empty()
        && !starts_with_keyword
        && (head.iter().all(|t| matches!(t, DaxToken::Ident(_)))
            || matches!(head, [DaxToken::Bracket(_)])
            || (assignment
                && head.iter().all(|t| {
                    matches!(t, DaxToken::Ident(_) | DaxToken::Bracket(_) | DaxToken::QuotedTable(_))
                })));

    if !is_name {
        return 0;
    }

    for token in head {
        if let DaxToken::Bracket(name) = token {
            refs.local_names.insert(name.to_lowercase());
        }
    }
    eq + 1
}
