//! Open-time consistency checks and crash-recovery bookkeeping (spec §3
//! invariant 1, §4.7, §8 scenario P8).
//!
//! Every table that stores one record per value (`hashes`, `static_meta`,
//! `runtime_meta`, `debug_counters`, `sexp_table`) must agree on the number
//! of values. A crash between two of those tables' appends is the only way
//! they can disagree; [`verify_table_counts`] is the fast, no-I/O check run
//! on every `open`, and [`recovery_target`] computes what a repair should
//! truncate every table down to.

use vdb_core::error::{Error, Result};

/// Checks that every table in `counts` reports exactly `expected` values.
/// Per spec §9 this must use strict inequality uniformly — there is no
/// direction in which a mismatched count is acceptable.
pub fn verify_table_counts(expected: u64, counts: &[(&'static str, u64)]) -> Result<()> {
    for &(table, actual) in counts {
        if actual != expected {
            return Err(Error::ConfigInconsistency {
                table,
                expected,
                actual,
            });
        }
    }
    Ok(())
}

/// The length every table should be truncated to during repair: the
/// shortest of them, since a partially-written append can only ever leave
/// a table short, never long.
pub fn recovery_target(counts: &[(&'static str, u64)]) -> u64 {
    counts.iter().map(|&(_, n)| n).min().unwrap_or(0)
}

/// Accumulates the ids of values that failed a fast- or slow-pass check
/// (spec §4.7). Empty means the database passed.
#[derive(Debug, Default, Clone)]
pub struct CheckReport {
    pub offending_ids: Vec<u64>,
}

impl CheckReport {
    pub fn new() -> Self {
        CheckReport::default()
    }

    pub fn is_clean(&self) -> bool {
        self.offending_ids.is_empty()
    }

    pub fn record(&mut self, id: u64) {
        self.offending_ids.push(id);
    }

    /// Converts a non-clean report into [`Error::Corruption`].
    pub fn into_result(self) -> Result<()> {
        if self.is_clean() {
            Ok(())
        } else {
            Err(Error::Corruption {
                offending_ids: self.offending_ids,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_counts_pass() {
        verify_table_counts(10, &[("hashes", 10), ("static_meta", 10), ("sexp_table", 10)]).unwrap();
    }

    #[test]
    fn a_short_table_is_rejected_even_though_the_original_checked_the_opposite_direction() {
        let err = verify_table_counts(10, &[("hashes", 10), ("sexp_table", 9)]).unwrap_err();
        assert!(matches!(
            err,
            Error::ConfigInconsistency {
                table: "sexp_table",
                expected: 10,
                actual: 9
            }
        ));
    }

    #[test]
    fn recovery_target_is_the_shortest_table() {
        assert_eq!(recovery_target(&[("a", 10), ("b", 7), ("c", 9)]), 7);
    }

    #[test]
    fn empty_report_converts_to_ok() {
        assert!(CheckReport::new().into_result().is_ok());
    }

    #[test]
    fn nonempty_report_converts_to_corruption() {
        let mut report = CheckReport::new();
        report.record(3);
        report.record(7);
        let err = report.into_result().unwrap_err();
        assert!(matches!(err, Error::Corruption { offending_ids } if offending_ids == vec![3, 7]));
    }
}
