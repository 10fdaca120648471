//! Ordered fallback across equivalent upstream calls.
//!
//! Some vendors expose several endpoints serving the same bars, any of which
//! may be down or may have changed shape. Candidates are tried in priority
//! order; the first one that answers wins.

use super::provider::DataError;
use std::fmt::Display;

/// Try `candidates` in order with `call`.
///
/// The first candidate returning a non-empty result wins. If every candidate
/// answered but none had rows, the first empty answer is returned. Only when
/// every candidate failed does this return `UpstreamUnavailable` listing
/// what was tried.
pub fn first_success<C, R, F>(
    symbol: &str,
    candidates: &[C],
    mut call: F,
) -> Result<(C, Vec<R>), DataError>
where
    C: Copy + Display,
    F: FnMut(C) -> Result<Vec<R>, DataError>,
{
    let mut first_empty = None;
    let mut tried = Vec::with_capacity(candidates.len());

    for &candidate in candidates {
        tried.push(candidate.to_string());
        match call(candidate) {
            Ok(rows) if !rows.is_empty() => {
                tracing::debug!(symbol, call = %candidate, rows = rows.len(), "upstream call answered");
                return Ok((candidate, rows));
            }
            Ok(_) => {
                tracing::debug!(symbol, call = %candidate, "upstream call returned no rows");
                first_empty.get_or_insert(candidate);
            }
            Err(e) => {
                let failure = DataError::UpstreamCallFailed {
                    call: candidate.to_string(),
                    reason: e.to_string(),
                };
                tracing::debug!(symbol, error = %failure, "trying next upstream call");
            }
        }
    }

    match first_empty {
        Some(candidate) => Ok((candidate, Vec::new())),
        None => Err(DataError::UpstreamUnavailable {
            symbol: symbol.to_string(),
            tried,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail(what: &str) -> DataError {
        DataError::ResponseFormatChanged(what.into())
    }

    #[test]
    fn first_answer_wins() {
        let mut calls = Vec::new();
        let (winner, rows) = first_success("600519", &["a", "b", "c"], |c| {
            calls.push(c);
            match c {
                "a" => Err(fail("gone")),
                _ => Ok(vec![1, 2]),
            }
        })
        .unwrap();

        assert_eq!(winner, "b");
        assert_eq!(rows, vec![1, 2]);
        assert_eq!(calls, vec!["a", "b"]);
    }

    #[test]
    fn empty_answers_keep_searching() {
        let (winner, rows) = first_success("600519", &["a", "b"], |c| match c {
            "a" => Ok(Vec::new()),
            _ => Ok(vec![7]),
        })
        .unwrap();
        assert_eq!(winner, "b");
        assert_eq!(rows, vec![7]);
    }

    #[test]
    fn all_empty_is_not_an_error() {
        let (winner, rows) =
            first_success::<_, i32, _>("600519", &["a", "b"], |c| match c {
                "a" => Err(fail("gone")),
                _ => Ok(Vec::new()),
            })
            .unwrap();
        assert_eq!(winner, "b");
        assert!(rows.is_empty());
    }

    #[test]
    fn all_failing_reports_every_candidate() {
        let err = first_success::<_, i32, _>("600519", &["a", "b"], |_| Err(fail("gone")))
            .unwrap_err();
        match err {
            DataError::UpstreamUnavailable { symbol, tried } => {
                assert_eq!(symbol, "600519");
                assert_eq!(tried, vec!["a", "b"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
