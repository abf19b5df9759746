//! Statement building.
//!
//! Turns query text, positional parameters and [`ExecutionOptions`] into the
//! concrete [`Statement`] a session executes. Building is pure: every
//! mistake it can detect is reported before any I/O.

use std::iter::Peekable;
use std::str::Chars;
use std::sync::Arc;

use crate::error::{ClientError, ClientResult};
use crate::options::{
    Consistency, DEFAULT_FETCH_SIZE, DRIVER_DEFAULT_PAGE_SIZE, ExecutionOptions, SerialConsistency,
};
use crate::retry::{RetryStrategy, strategy_for};
use crate::value::Value;

/// A request ready for execution.
#[derive(Debug, Clone)]
pub struct Statement {
    pub query: String,
    /// Positional bind values, one per `?` marker.
    pub values: Vec<Value>,
    pub tracing: bool,
    /// `None` leaves the session default in place.
    pub consistency: Option<Consistency>,
    pub serial_consistency: Option<SerialConsistency>,
    /// Write timestamp in microseconds.
    pub timestamp: Option<i64>,
    pub page_size: i32,
    pub idempotent: bool,
    pub paging_state: Option<Vec<u8>>,
    pub retry: Arc<dyn RetryStrategy>,
}

impl Statement {
    /// A statement with driver defaults and no bind values.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            values: Vec::new(),
            tracing: false,
            consistency: None,
            serial_consistency: None,
            timestamp: None,
            page_size: DRIVER_DEFAULT_PAGE_SIZE,
            idempotent: false,
            paging_state: None,
            retry: strategy_for(Default::default()),
        }
    }

    /// Number of `?` bind markers outside quoted text and comments.
    pub fn bind_markers(&self) -> usize {
        count_bind_markers(&self.query)
    }
}

/// Build a statement from query text, positional parameters and options.
///
/// Fails with [`ClientError::Programming`] when the parameter count does not
/// match the bind markers, the fetch size is neither positive nor the
/// default sentinel, or the paging token is malformed.
pub fn build_statement(
    query: &str,
    parameters: Vec<Value>,
    options: &ExecutionOptions,
) -> ClientResult<Statement> {
    let mut statement = Statement::new(query);

    let markers = statement.bind_markers();
    if markers != parameters.len() {
        return Err(ClientError::programming(format!(
            "Query has {} bind marker(s) but {} parameter(s) were given",
            markers,
            parameters.len()
        )));
    }
    statement.values = parameters;

    statement.tracing = options.tracing;
    if let Some(level) = options.consistency_level {
        statement.consistency = Some(level);
    }
    statement.page_size = resolve_fetch_size(options.fetch_size)?;
    statement.idempotent = options.idempotent;
    statement.timestamp = options.timestamp;
    if let Some(state) = &options.paging_state {
        statement.paging_state = Some(state.to_bytes()?);
    }
    statement.retry = strategy_for(options.retry_policy);
    if let Some(level) = options.serial_consistency_level {
        statement.serial_consistency = Some(level);
    }

    Ok(statement)
}

fn resolve_fetch_size(fetch_size: i32) -> ClientResult<i32> {
    match fetch_size {
        DEFAULT_FETCH_SIZE => Ok(DRIVER_DEFAULT_PAGE_SIZE),
        n if n > 0 => Ok(n),
        n => Err(ClientError::programming(format!(
            "Invalid fetch size {}: expected a positive number or {}",
            n, DEFAULT_FETCH_SIZE
        ))),
    }
}

/// Count `?` markers, skipping quoted text and comments.
///
/// `'...'` literals, `"..."` identifiers and `$$...$$` strings are skipped,
/// as are `--` and `//` line comments and `/* */` block comments.
fn count_bind_markers(query: &str) -> usize {
    let mut chars = query.chars().peekable();
    let mut count = 0;
    while let Some(c) = chars.next() {
        match c {
            '?' => count += 1,
            // A doubled quote reads as two adjacent quoted runs.
            '\'' | '"' => {
                chars.find(|&next| next == c);
            }
            '-' | '/' if chars.next_if_eq(&c).is_some() => {
                chars.find(|&next| next == '\n');
            }
            '/' if chars.next_if_eq(&'*').is_some() => skip_until_pair(&mut chars, '*', '/'),
            '$' if chars.next_if_eq(&'$').is_some() => skip_until_pair(&mut chars, '$', '$'),
            _ => {}
        }
    }
    count
}

fn skip_until_pair(chars: &mut Peekable<Chars<'_>>, first: char, second: char) {
    while let Some(c) = chars.next() {
        if c == first && chars.next_if_eq(&second).is_some() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{PagingState, RetryPolicy};

    #[test]
    fn test_default_options() {
        let stmt = build_statement("SELECT * FROM dummy", vec![], &ExecutionOptions::default())
            .unwrap();
        assert!(!stmt.tracing);
        assert_eq!(stmt.consistency, None);
        assert_eq!(stmt.serial_consistency, None);
        assert_eq!(stmt.page_size, 5000);
        assert!(!stmt.idempotent);
        assert_eq!(stmt.paging_state, None);
        assert_eq!(stmt.retry.policy(), RetryPolicy::Default);
    }

    #[test]
    fn test_explicit_options_applied() {
        let options = ExecutionOptions::new()
            .tracing(true)
            .consistency_level(Consistency::LocalOne)
            .serial_consistency_level(SerialConsistency::Serial)
            .timestamp(42)
            .fetch_size(10)
            .idempotent(true)
            .retry_policy(RetryPolicy::Fallthrough)
            .paging_state(PagingState::from_bytes(b"token"));

        let stmt = build_statement(
            "INSERT INTO dummy (pk, val) VALUES (?, ?)",
            vec![Value::from(1), Value::from(2)],
            &options,
        )
        .unwrap();
        assert!(stmt.tracing);
        assert_eq!(stmt.consistency, Some(Consistency::LocalOne));
        assert_eq!(stmt.serial_consistency, Some(SerialConsistency::Serial));
        assert_eq!(stmt.timestamp, Some(42));
        assert_eq!(stmt.page_size, 10);
        assert!(stmt.idempotent);
        assert_eq!(stmt.paging_state.as_deref(), Some(&b"token"[..]));
        assert_eq!(stmt.retry.policy(), RetryPolicy::Fallthrough);
        assert_eq!(stmt.values, vec![Value::Int64(1), Value::Int64(2)]);
    }

    #[test]
    fn test_parameter_count_mismatch() {
        let err = build_statement(
            "SELECT * FROM t WHERE pk = ?",
            vec![],
            &ExecutionOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::Programming(_)));
    }

    #[test]
    fn test_question_mark_in_literal_is_not_a_marker() {
        let stmt = build_statement(
            "SELECT * FROM t WHERE pk = 'why?' AND ck = ?",
            vec![Value::from(3)],
            &ExecutionOptions::default(),
        )
        .unwrap();
        assert_eq!(stmt.bind_markers(), 1);
    }

    #[test]
    fn test_question_mark_in_quoted_identifier_is_not_a_marker() {
        let stmt = build_statement(
            "SELECT \"why?\" FROM t WHERE k = ?",
            vec![Value::from(1)],
            &ExecutionOptions::default(),
        )
        .unwrap();
        assert_eq!(stmt.bind_markers(), 1);
        assert_eq!(count_bind_markers("SELECT \"a\"\"?\" FROM t"), 0);
    }

    #[test]
    fn test_question_mark_in_line_comment_is_not_a_marker() {
        let stmt = build_statement(
            "SELECT * FROM t -- any?\nWHERE k = ?",
            vec![Value::from(1)],
            &ExecutionOptions::default(),
        )
        .unwrap();
        assert_eq!(stmt.bind_markers(), 1);
        assert_eq!(count_bind_markers("SELECT * FROM t // really?\nWHERE k = ?"), 1);
        assert_eq!(count_bind_markers("SELECT * FROM t WHERE k = ? -- trailing?"), 1);
        assert_eq!(count_bind_markers("SELECT 5 - ? FROM t"), 1);
    }

    #[test]
    fn test_question_mark_in_block_comment_is_not_a_marker() {
        assert_eq!(count_bind_markers("SELECT /* what? */ * FROM t WHERE k = ?"), 1);
        assert_eq!(count_bind_markers("SELECT /** ? **/ ? FROM t"), 1);
        assert_eq!(count_bind_markers("SELECT ? FROM t /* unterminated ?"), 1);
        assert_eq!(count_bind_markers("SELECT ? / ? FROM t"), 2);
    }

    #[test]
    fn test_question_mark_in_dollar_string_is_not_a_marker() {
        assert_eq!(
            count_bind_markers("INSERT INTO t (k, v) VALUES (?, $$who's there?$$)"),
            1
        );
        assert_eq!(count_bind_markers("SELECT $$a$$, ?, $$b?$$ FROM t"), 1);
    }

    #[test]
    fn test_doubled_quote_in_literal() {
        assert_eq!(count_bind_markers("SELECT * FROM t WHERE s = 'it''s ?' AND k = ?"), 1);
    }

    #[test]
    fn test_invalid_fetch_size() {
        for size in [0, -2] {
            let err = build_statement("SELECT 1", vec![], &ExecutionOptions::new().fetch_size(size))
                .unwrap_err();
            assert!(matches!(err, ClientError::Programming(_)));
        }
    }

    #[test]
    fn test_malformed_paging_state() {
        let options = ExecutionOptions::new().paging_state(PagingState::from("%%%"));
        let err = build_statement("SELECT 1", vec![], &options).unwrap_err();
        assert!(matches!(err, ClientError::Programming(_)));
    }
}
