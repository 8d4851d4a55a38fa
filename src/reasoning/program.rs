//! Program text handling: clause splitting, predicate indicators, atom quoting
//! and the per-clause diagnostics reported by `loadProgram`.

use serde::Serialize;
use std::fmt;

/// Characters that glue into symbolic atoms such as `=..` or `:-`.
fn is_symbol_char(c: char) -> bool {
    matches!(
        c,
        '#' | '$' | '&' | '*' | '+' | '-' | '.' | '/' | ':' | '<' | '=' | '>' | '?' | '@' | '^'
            | '~' | '\\'
    )
}

fn is_alnum(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// One clause (or directive) cut out of a program, without its end token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClauseText {
    /// 1-based line on which the clause starts.
    pub line: usize,
    pub text: String,
}

/// What a program element asks the engine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramItem<'a> {
    Clause(&'a str),
    Directive(&'a str),
}

impl ClauseText {
    pub fn item(&self) -> ProgramItem<'_> {
        match self.text.strip_prefix(":-") {
            Some(goal) => ProgramItem::Directive(goal.trim()),
            None => ProgramItem::Clause(&self.text),
        }
    }
}

/// Split program text into clauses at end tokens.
///
/// An end token is a `.` followed by layout, `%` or end of input that does
/// not continue a symbolic atom. Quoted text, `0'c` character codes and
/// comments never terminate a clause. Comments are dropped from the output.
pub fn split_clauses(program: &str) -> Vec<ClauseText> {
    let chars: Vec<char> = program.chars().collect();
    let mut clauses = Vec::new();
    let mut current = String::new();
    let mut start_line: Option<usize> = None;
    let mut line = 1;
    let mut i = 0;

    let mut finish = |current: &mut String, start_line: &mut Option<usize>| {
        let text = current.trim();
        if !text.is_empty() {
            clauses.push(ClauseText {
                line: start_line.unwrap_or(1),
                text: text.to_string(),
            });
        }
        current.clear();
        *start_line = None;
    };

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match c {
            '%' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if next == Some('*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    if chars[i] == '\n' {
                        line += 1;
                    }
                    i += 1;
                }
                i = (i + 2).min(chars.len());
                current.push(' ');
            }
            '\'' | '"' | '`' => {
                start_line.get_or_insert(line);
                current.push(c);
                i += 1;
                while i < chars.len() {
                    let ch = chars[i];
                    current.push(ch);
                    if ch == '\n' {
                        line += 1;
                    }
                    if ch == '\\' && i + 1 < chars.len() {
                        current.push(chars[i + 1]);
                        i += 2;
                        continue;
                    }
                    if ch == c {
                        if chars.get(i + 1) == Some(&c) {
                            current.push(c);
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    i += 1;
                }
            }
            '0' if next == Some('\'') && !current.chars().last().is_some_and(is_alnum) => {
                start_line.get_or_insert(line);
                current.push_str("0'");
                i += 2;
                let take = match (chars.get(i), chars.get(i + 1)) {
                    (Some('\\'), Some(_)) | (Some('\''), Some('\'')) => 2,
                    (Some(_), _) => 1,
                    (None, _) => 0,
                };
                current.extend(&chars[i..i + take]);
                i += take;
            }
            '.' if next.map_or(true, |n| n.is_whitespace() || n == '%')
                && !current.chars().last().is_some_and(is_symbol_char) =>
            {
                finish(&mut current, &mut start_line);
                i += 1;
            }
            _ => {
                if c == '\n' {
                    line += 1;
                } else if !c.is_whitespace() {
                    start_line.get_or_insert(line);
                }
                current.push(c);
                i += 1;
            }
        }
    }
    finish(&mut current, &mut start_line);

    clauses
}

/// Drop a single trailing end token, if present.
pub fn strip_terminator(clause: &str) -> &str {
    let trimmed = clause.trim();
    match trimmed.strip_suffix('.') {
        Some(rest) if !rest.chars().last().is_some_and(is_symbol_char) => rest.trim_end(),
        _ => trimmed,
    }
}

/// True when quotes are closed and brackets never close below the top level.
///
/// Clauses are spliced into `assertz((...))`; an unbalanced clause could close
/// that wrapper early and smuggle extra goals after it.
pub fn is_balanced(text: &str) -> bool {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut prev: Option<char> = None;

    for c in text.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        if escaped {
            // character of a 0'c code
            escaped = false;
            prev = Some(c);
            continue;
        }
        let code_quote = c == '\'' && prev == Some('0');
        prev = Some(c);
        match c {
            '\'' if code_quote => escaped = true,
            '\'' | '"' | '`' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            _ => {}
        }
    }
    depth == 0 && quote.is_none()
}

/// Characters of `text` outside quoted sections and brackets, with byte offsets.
fn top_level_chars(text: &str) -> Vec<(usize, char)> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (idx, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '(' | '[' | '{' => {
                if depth == 0 {
                    out.push((idx, c));
                }
                depth += 1;
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    out.push((idx, c));
                }
            }
            _ if depth == 0 => out.push((idx, c)),
            _ => {}
        }
    }
    out
}

/// `name/arity` of a predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PredicateIndicator {
    pub name: String,
    pub arity: usize,
}

impl PredicateIndicator {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
        }
    }
}

impl fmt::Display for PredicateIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", quote_atom(&self.name), self.arity)
    }
}

/// Split the functor name off a head term. Returns the unquoted name and the rest.
fn split_functor(head: &str) -> Option<(String, &str)> {
    let first = head.chars().next()?;

    if first == '\'' {
        let mut name = String::new();
        let mut chars = head.char_indices().skip(1).peekable();
        while let Some((idx, c)) = chars.next() {
            match c {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        name.push(escaped);
                    }
                }
                '\'' if chars.peek().map(|(_, n)| *n) == Some('\'') => {
                    chars.next();
                    name.push('\'');
                }
                '\'' => return Some((name, &head[idx + 1..])),
                _ => name.push(c),
            }
        }
        return None;
    }

    let end = if first.is_lowercase() {
        head.find(|c: char| !is_alnum(c)).unwrap_or(head.len())
    } else if is_symbol_char(first) {
        head.find(|c: char| !is_symbol_char(c)).unwrap_or(head.len())
    } else {
        return None;
    };
    Some((head[..end].to_string(), &head[end..]))
}

/// Predicate indicator of a clause head, `None` for directives and
/// anything that does not look like a callable head.
pub fn head_indicator(clause: &str) -> Option<PredicateIndicator> {
    let clause = strip_terminator(clause);
    let neck = top_level_chars(clause)
        .into_iter()
        .find(|&(idx, c)| c == ':' && clause[idx..].starts_with(":-"))
        .map(|(idx, _)| idx);
    let head = match neck {
        Some(0) => return None,
        Some(idx) => &clause[..idx],
        None => clause,
    }
    .trim();

    let (name, rest) = split_functor(head)?;
    if rest.is_empty() {
        return Some(PredicateIndicator::new(name, 0));
    }

    let args = rest.strip_prefix('(')?.strip_suffix(')')?;
    if args.trim().is_empty() {
        return None;
    }
    let commas = top_level_chars(args)
        .into_iter()
        .filter(|&(_, c)| c == ',')
        .count();
    Some(PredicateIndicator::new(name, commas + 1))
}

/// Render `name` as an atom that reads back as exactly `name`.
pub fn quote_atom(name: &str) -> String {
    let plain = name.chars().next().is_some_and(|c| c.is_ascii_lowercase())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\\', "\\\\").replace('\'', "\\'"))
    }
}

/// Outcome of one program element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    /// Clause added to the database.
    Loaded,
    /// Directive ran successfully.
    Executed,
    /// The engine refused the element; see the message.
    Rejected,
}

/// Per-element report produced by `loadProgram`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadDiagnostic {
    pub index: usize,
    pub line: usize,
    pub clause: String,
    pub status: LoadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LoadDiagnostic {
    pub fn ok(index: usize, clause: &ClauseText, status: LoadStatus) -> Self {
        Self {
            index,
            line: clause.line,
            clause: clause.text.clone(),
            status,
            message: None,
        }
    }

    pub fn rejected(index: usize, clause: &ClauseText, message: impl Into<String>) -> Self {
        Self {
            index,
            line: clause.line,
            clause: clause.text.clone(),
            status: LoadStatus::Rejected,
            message: Some(message.into()),
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.status == LoadStatus::Rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(program: &str) -> Vec<String> {
        split_clauses(program).into_iter().map(|c| c.text).collect()
    }

    #[test]
    fn test_split_simple_program() {
        let program = "parent(a, b).\nparent(b, c).\nanc(X, Y) :- parent(X, Y).\n";
        assert_eq!(
            texts(program),
            vec!["parent(a, b)", "parent(b, c)", "anc(X, Y) :- parent(X, Y)"]
        );
    }

    #[test]
    fn test_split_tracks_start_lines() {
        let program = "% family\n\nparent(a, b).\n/* multi\nline */ parent(b,\n  c).";
        let clauses = split_clauses(program);
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].line, 3);
        assert_eq!(clauses[1].line, 5);
    }

    #[test]
    fn test_split_ignores_dots_in_quotes_and_numbers() {
        let program = "name('Dr. Who').\npi(3.14).\nsay(\"end. here\").\nchar(0'.).";
        assert_eq!(
            texts(program),
            vec![
                "name('Dr. Who')",
                "pi(3.14)",
                "say(\"end. here\")",
                "char(0'.)"
            ]
        );
    }

    #[test]
    fn test_split_symbolic_atoms_and_comments() {
        let program = "univ(T, L) :- T =.. L. % trailing comment\nlast(x)";
        assert_eq!(texts(program), vec!["univ(T, L) :- T =.. L", "last(x)"]);
    }

    #[test]
    fn test_directive_detection() {
        let clauses = split_clauses(":- dynamic(likes/2).\nlikes(a, b).");
        assert_eq!(clauses[0].item(), ProgramItem::Directive("dynamic(likes/2)"));
        assert_eq!(clauses[1].item(), ProgramItem::Clause("likes(a, b)"));
    }

    #[test]
    fn test_strip_terminator() {
        assert_eq!(strip_terminator("parent(david, eve). "), "parent(david, eve)");
        assert_eq!(strip_terminator("parent(david, eve)"), "parent(david, eve)");
        assert_eq!(strip_terminator("p(X) :- X =.."), "p(X) :- X =..");
    }

    #[test]
    fn test_is_balanced() {
        assert!(is_balanced("parent(david, eve)"));
        assert!(is_balanced("say('a ) b')"));
        assert!(!is_balanced("p(x)), halt, ((q"));
        assert!(!is_balanced("p(x"));
        assert!(!is_balanced("p('x)"));
        assert!(is_balanced("code(0'a, 0'()"));
    }

    #[test]
    fn test_head_indicator() {
        assert_eq!(
            head_indicator("parent(john, bob)"),
            Some(PredicateIndicator::new("parent", 2))
        );
        assert_eq!(
            head_indicator("grandparent(X, Z) :- parent(X, Y), parent(Y, Z)"),
            Some(PredicateIndicator::new("grandparent", 2))
        );
        assert_eq!(
            head_indicator("edge(f(a, b), [1, 2], 'x,y')."),
            Some(PredicateIndicator::new("edge", 3))
        );
        assert_eq!(head_indicator("ready"), Some(PredicateIndicator::new("ready", 0)));
        assert_eq!(
            head_indicator("'Big name'(x)"),
            Some(PredicateIndicator::new("Big name", 1))
        );
        assert_eq!(head_indicator(":- initialization(main)"), None);
        assert_eq!(head_indicator("X :- true"), None);
        assert_eq!(head_indicator("p()"), None);
    }

    #[test]
    fn test_indicator_display_quotes_when_needed() {
        assert_eq!(PredicateIndicator::new("parent", 2).to_string(), "parent/2");
        assert_eq!(PredicateIndicator::new("Big", 1).to_string(), "'Big'/1");
    }

    #[test]
    fn test_quote_atom() {
        assert_eq!(quote_atom("john"), "john");
        assert_eq!(quote_atom("john_2"), "john_2");
        assert_eq!(quote_atom("John"), "'John'");
        assert_eq!(quote_atom("o'neil"), "'o\\'neil'");
        assert_eq!(quote_atom("x), halt, p(y"), "'x), halt, p(y'");
        assert_eq!(quote_atom(""), "''");
    }

    #[test]
    fn test_diagnostic_serialization() {
        let clause = ClauseText {
            line: 4,
            text: "p(".into(),
        };
        let diag = LoadDiagnostic::rejected(2, &clause, "syntax error");
        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["status"], "rejected");
        assert_eq!(json["line"], 4);
        assert!(diag.is_rejected());

        let ok = LoadDiagnostic::ok(0, &clause, LoadStatus::Loaded);
        let json = serde_json::to_value(&ok).unwrap();
        assert!(json.get("message").is_none());
    }
}
