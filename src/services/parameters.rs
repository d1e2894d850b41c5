// Named-parameter resolution for `:name` placeholders
//
// SQL text is tokenized with the engine's sqlparser dialect, so string
// literals (including backslash escapes where the dialect allows them),
// quoted identifiers, comments, dollar-quoted bodies and `::` casts never
// yield placeholders. Text the tokenizer rejects is passed through as-is
// and left to the engine to report.
use crate::error::{BridgeError, Result};
use crate::models::{Parameters, PortableValue};
use crate::services::database::Engine;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Location, Token, Tokenizer};
use std::collections::BTreeSet;
use std::ops::Range;

/// Placeholder syntax a driver binds with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?`, one value per occurrence (MySQL, Druid)
    Question,
    /// `$1`, `$2`, ... with repeated names sharing an index (PostgreSQL)
    Dollar,
}

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Text { span: Range<usize>, blank: bool },
    Named { name: String, span: Range<usize> },
    Positional,
    Separator,
}

/// Byte offsets of line starts, to turn tokenizer locations into slices
struct LineStarts(Vec<usize>);

impl LineStarts {
    fn new(sql: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(sql.match_indices('\n').map(|(i, _)| i + 1));
        Self(starts)
    }

    /// Locations are 1-based lines and 1-based character columns
    fn offset(&self, sql: &str, location: Location) -> Option<usize> {
        let line_start = *self.0.get((location.line as usize).checked_sub(1)?)?;
        let column = (location.column as usize).checked_sub(1)?;
        let line = &sql[line_start..];
        match line.char_indices().nth(column) {
            Some((i, _)) => Some(line_start + i),
            None if line.chars().count() == column => Some(sql.len()),
            None => None,
        }
    }
}

struct Lexeme {
    token: Token,
    span: Range<usize>,
}

fn lex(sql: &str, engine: Engine) -> Option<Vec<Lexeme>> {
    let dialect = engine.dialect();
    let tokens = match Tokenizer::new(dialect.as_ref(), sql).tokenize_with_location() {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::debug!("SQL text not tokenized ({}), scanning skipped", e);
            return None;
        }
    };

    let lines = LineStarts::new(sql);
    let mut starts = Vec::with_capacity(tokens.len());
    for token in &tokens {
        starts.push(lines.offset(sql, token.span.start)?);
    }
    let mut lexemes = Vec::with_capacity(tokens.len());
    for (i, token) in tokens.into_iter().enumerate() {
        let start = starts[i];
        let end = starts.get(i + 1).copied().unwrap_or(sql.len());
        if end < start {
            return None;
        }
        lexemes.push(Lexeme {
            token: token.token,
            span: start..end,
        });
    }
    Some(lexemes)
}

/// Whether `token` closes an operand, making a following `:word` a slice
/// bound or path step rather than a placeholder
fn ends_operand(token: &Token, in_brackets: bool) -> bool {
    match token {
        Token::Word(word) => in_brackets || word.quote_style.is_some() || word.keyword == Keyword::NoKeyword,
        Token::Number(..) | Token::RParen | Token::RBracket => true,
        Token::SingleQuotedString(_) | Token::DoubleQuotedString(_) => true,
        _ => false,
    }
}

fn placeholder_name(token: Option<&Lexeme>) -> Option<&str> {
    match token.map(|lexeme| &lexeme.token) {
        Some(Token::Word(word))
            if word.quote_style.is_none()
                && word.value.starts_with(|c: char| c.is_alphabetic() || c == '_') =>
        {
            Some(word.value.as_str())
        }
        _ => None,
    }
}

fn scan(sql: &str, engine: Engine) -> Vec<Piece> {
    let Some(lexemes) = lex(sql, engine) else {
        return vec![Piece::Text {
            span: 0..sql.len(),
            blank: sql.trim().is_empty(),
        }];
    };

    let mut pieces = Vec::with_capacity(lexemes.len());
    let mut previous: Option<&Token> = None;
    let mut brackets = 0usize;
    let mut i = 0;
    while i < lexemes.len() {
        let lexeme = &lexemes[i];
        match &lexeme.token {
            Token::Colon if !previous.is_some_and(|token| ends_operand(token, brackets > 0)) => {
                if let Some(name) = placeholder_name(lexemes.get(i + 1)) {
                    let end = lexemes[i + 1].span.end;
                    pieces.push(Piece::Named {
                        name: name.to_string(),
                        span: lexeme.span.start..end,
                    });
                    previous = Some(&lexemes[i + 1].token);
                    i += 2;
                    continue;
                }
                pieces.push(Piece::Text {
                    span: lexeme.span.clone(),
                    blank: false,
                });
            }
            Token::SemiColon => pieces.push(Piece::Separator),
            _ if &sql[lexeme.span.clone()] == "?" => pieces.push(Piece::Positional),
            Token::Whitespace(_) => pieces.push(Piece::Text {
                span: lexeme.span.clone(),
                blank: true,
            }),
            other => {
                match other {
                    Token::LBracket => brackets += 1,
                    Token::RBracket => brackets = brackets.saturating_sub(1),
                    _ => {}
                }
                pieces.push(Piece::Text {
                    span: lexeme.span.clone(),
                    blank: false,
                });
            }
        }
        if !matches!(lexeme.token, Token::Whitespace(_)) {
            previous = Some(&lexeme.token);
        }
        i += 1;
    }
    pieces
}

/// Distinct placeholder names in order of first appearance
pub fn placeholders(sql: &str, engine: Engine) -> Vec<String> {
    let mut seen = BTreeSet::new();
    scan(sql, engine)
        .into_iter()
        .filter_map(|piece| match piece {
            Piece::Named { name, .. } if seen.insert(name.clone()) => Some(name),
            _ => None,
        })
        .collect()
}

/// Fails with a parameter error naming every placeholder without a value.
/// Parameters not referenced by the SQL are ignored.
pub fn check_resolved(sql: &str, parameters: &Parameters, engine: Engine) -> Result<()> {
    let missing: Vec<String> = placeholders(sql, engine)
        .into_iter()
        .filter(|name| !parameters.contains_key(name))
        .map(|name| format!(":{}", name))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(BridgeError::Parameter(format!(
            "No value supplied for {}",
            missing.join(", ")
        )))
    }
}

/// Replaces `:name` placeholders with the driver's positional syntax and
/// returns the values in binding order.
pub fn rewrite(
    sql: &str,
    parameters: &Parameters,
    style: PlaceholderStyle,
    engine: Engine,
) -> Result<(String, Vec<PortableValue>)> {
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut indexes: Vec<String> = Vec::new();

    for piece in scan(sql, engine) {
        match piece {
            Piece::Text { span, .. } => out.push_str(&sql[span]),
            Piece::Positional => out.push('?'),
            Piece::Separator => out.push(';'),
            Piece::Named { name, .. } => {
                let value = parameters
                    .get(&name)
                    .ok_or_else(|| BridgeError::Parameter(format!("No value supplied for :{}", name)))?;
                match style {
                    PlaceholderStyle::Question => {
                        out.push('?');
                        values.push(value.clone());
                    }
                    PlaceholderStyle::Dollar => {
                        let index = match indexes.iter().position(|seen| *seen == name) {
                            Some(position) => position + 1,
                            None => {
                                indexes.push(name);
                                values.push(value.clone());
                                indexes.len()
                            }
                        };
                        out.push('$');
                        out.push_str(&index.to_string());
                    }
                }
            }
        }
    }
    Ok((out, values))
}

/// Splits on top-level `;`, dropping statements that are empty or only comments
pub fn split_statements(sql: &str, engine: Engine) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_code = false;
    for piece in scan(sql, engine) {
        match piece {
            Piece::Text { span, blank } => {
                has_code |= !blank;
                current.push_str(&sql[span]);
            }
            Piece::Named { span, .. } => {
                has_code = true;
                current.push_str(&sql[span]);
            }
            Piece::Positional => {
                has_code = true;
                current.push('?');
            }
            Piece::Separator => {
                if has_code {
                    statements.push(current.trim().to_string());
                }
                current.clear();
                has_code = false;
            }
        }
    }
    if has_code {
        statements.push(current.trim().to_string());
    }
    statements
}

/// Number of `?` placeholders outside literals and comments
pub fn count_positional(sql: &str, engine: Engine) -> usize {
    scan(sql, engine)
        .iter()
        .filter(|piece| matches!(piece, Piece::Positional))
        .count()
}

/// Rewrites `?` placeholders as `$1`, `$2`, ...
pub fn positional_to_dollar(sql: &str, engine: Engine) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut index = 0;
    for piece in scan(sql, engine) {
        match piece {
            Piece::Text { span, .. } | Piece::Named { span, .. } => out.push_str(&sql[span]),
            Piece::Positional => {
                index += 1;
                out.push('$');
                out.push_str(&index.to_string());
            }
            Piece::Separator => out.push(';'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(entries: &[(&str, PortableValue)]) -> Parameters {
        entries
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_placeholders_skip_literals_and_casts() {
        let sql = "SELECT ':nope', \"col:x\", a::text, $$ :body $$ -- :comment\n\
                   FROM t /* :block */ WHERE age > :age AND name = :name OR age < :age";
        assert_eq!(placeholders(sql, Engine::PostgreSql), vec!["age", "name"]);
    }

    #[test]
    fn test_backslash_escaped_quote_in_mysql_literal() {
        let sql = r"SELECT 'it\'s 10:30 :x' AS note WHERE id = :id";
        assert_eq!(placeholders(sql, Engine::MySql), vec!["id"]);
        let parameters = params(&[("id", 1.into())]);
        assert!(check_resolved(sql, &parameters, Engine::MySql).is_ok());
    }

    #[test]
    fn test_slices_and_paths_are_not_placeholders() {
        assert!(placeholders("SELECT arr[1:2], $1 FROM t", Engine::PostgreSql).is_empty());
        assert!(placeholders("SELECT arr[lo:hi] FROM t", Engine::PostgreSql).is_empty());
        assert!(placeholders("SELECT v:name FROM t", Engine::Snowflake).is_empty());
        assert_eq!(placeholders("SELECT arr[:i] FROM t", Engine::PostgreSql), vec!["i"]);
        assert_eq!(
            placeholders("SELECT * FROM t WHERE id IN (:a, :b)", Engine::Sqlite),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_missing_parameter_is_rejected() {
        let err = check_resolved("SELECT * FROM t WHERE age > :age", &Parameters::new(), Engine::Sqlite).unwrap_err();
        assert_eq!(err.code(), "PARAMETER_ERROR");
        assert!(err.to_string().contains(":age"));
    }

    #[test]
    fn test_unused_parameters_are_ignored() {
        let parameters = params(&[("age", 40.into()), ("unused", "x".into())]);
        assert!(check_resolved("SELECT * FROM t WHERE age > :age", &parameters, Engine::Sqlite).is_ok());
    }

    #[test]
    fn test_rewrite_question_style() {
        let parameters = params(&[("a", 1.into()), ("b", "x".into())]);
        let (sql, values) =
            rewrite("SELECT :a, :b, :a", &parameters, PlaceholderStyle::Question, Engine::MySql).unwrap();
        assert_eq!(sql, "SELECT ?, ?, ?");
        assert_eq!(values, vec![1.into(), "x".into(), 1.into()]);
    }

    #[test]
    fn test_rewrite_dollar_style_reuses_indexes() {
        let parameters = params(&[("a", 1.into()), ("b", 2.into())]);
        let (sql, values) =
            rewrite("SELECT :a::int, :b,\n  :a", &parameters, PlaceholderStyle::Dollar, Engine::PostgreSql).unwrap();
        assert_eq!(sql, "SELECT $1::int, $2,\n  $1");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_split_statements() {
        let sql = "SELECT 1 AS a; SELECT ';' AS b, $x$;$x$ AS c;\n-- trailing comment\n";
        assert_eq!(
            split_statements(sql, Engine::PostgreSql),
            vec!["SELECT 1 AS a".to_string(), "SELECT ';' AS b, $x$;$x$ AS c".to_string()]
        );
    }

    #[test]
    fn test_unterminated_literal_is_passed_through() {
        let sql = "SELECT 'open :x";
        assert!(placeholders(sql, Engine::Sqlite).is_empty());
        assert_eq!(split_statements(sql, Engine::Sqlite), vec![sql.to_string()]);
    }

    #[test]
    fn test_positional_placeholders() {
        let sql = "INSERT INTO t (a, b)\nVALUES (?, ?) -- why?";
        assert_eq!(count_positional(sql, Engine::Sqlite), 2);
        assert_eq!(
            positional_to_dollar(sql, Engine::PostgreSql),
            "INSERT INTO t (a, b)\nVALUES ($1, $2) -- why?"
        );
    }
}
