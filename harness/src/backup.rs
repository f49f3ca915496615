//! Backups as reported by a node's listing.

use chrono::NaiveDateTime;

use crate::error::{HarnessError, Result};

/// Format the client binary expects for `create <expiration> <path>`.
pub const EXPIRATION_ARG_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Expiration the scenarios back up with.
pub const DEFAULT_EXPIRATION: &str = "2099-04-12T17:49";

/// Format nodes report expirations in.
pub const EXPIRATION_LIST_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// A backup stored on a node (a root handle).
///
/// Read-only snapshot of remote state at listing time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    /// Opaque backup identifier.
    pub backup_id: String,
    /// Expiration date exactly as the node printed it.
    pub expiration_date: String,
}

impl Backup {
    /// Create a backup record.
    pub fn new(backup_id: impl Into<String>, expiration_date: impl Into<String>) -> Self {
        Self {
            backup_id: backup_id.into(),
            expiration_date: expiration_date.into(),
        }
    }

    /// Parsed expiration, if the node used the normalized UTC format.
    pub fn expires_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.expiration_date, EXPIRATION_LIST_FORMAT).ok()
    }
}

/// Parse `list` output: one header line, then `<id> <expiration>` per line.
///
/// Lines are split once on the first space, so the expiration keeps its
/// internal spaces. Blank lines are skipped; order is preserved. A record
/// line without a space is a [`HarnessError::Verification`] failure.
pub fn parse_listing(output: &str) -> Result<Vec<Backup>> {
    output
        .split('\n')
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once(' ') {
            Some((id, expiration)) => Ok(Backup::new(id, expiration)),
            None => Err(HarnessError::Verification(format!(
                "malformed listing line {line:?}"
            ))),
        })
        .collect()
}

/// Parse an expiration in `create` argument form (`YYYY-MM-DDTHH:MM`).
pub fn parse_expiration(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, EXPIRATION_ARG_FORMAT)
        .map_err(|source| HarnessError::Expiration {
            value: s.to_string(),
            source,
        })
}

/// Render an expiration as the `create` argument (minute precision).
pub fn expiration_arg(expiration: &NaiveDateTime) -> String {
    expiration.format(EXPIRATION_ARG_FORMAT).to_string()
}

/// Render an expiration the way nodes report it in listings.
pub fn normalized_expiration(expiration: &NaiveDateTime) -> String {
    expiration.format(EXPIRATION_LIST_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn expiration() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2099, 4, 12)
            .unwrap()
            .and_hms_opt(17, 49, 0)
            .unwrap()
    }

    #[test]
    fn listing_keeps_spaces_in_expiration() {
        let output = "Backups on NodeA:\n\
                      id1 2099-04-12 17:49:00 UTC\n\
                      id2 2100-01-01 00:00:00 UTC\n\n";

        let backups = parse_listing(output).unwrap();
        assert_eq!(
            backups,
            vec![
                Backup::new("id1", "2099-04-12 17:49:00 UTC"),
                Backup::new("id2", "2100-01-01 00:00:00 UTC"),
            ]
        );
    }

    #[test]
    fn listing_with_only_header_is_empty() {
        assert!(parse_listing("Backups on NodeA:\n").unwrap().is_empty());
        assert!(parse_listing("").unwrap().is_empty());
    }

    #[test]
    fn listing_preserves_node_order() {
        let output = "header\nzzz 2100-01-01 00:00:00 UTC\naaa 2099-01-01 00:00:00 UTC\n";
        let ids: Vec<_> = parse_listing(output)
            .unwrap()
            .into_iter()
            .map(|b| b.backup_id)
            .collect();
        assert_eq!(ids, vec!["zzz", "aaa"]);
    }

    #[test]
    fn header_is_skipped_even_if_it_looks_like_a_record() {
        let output = "id0 2099-04-12 17:49:00 UTC\nid1 2099-04-12 17:49:00 UTC\n";
        let backups = parse_listing(output).unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].backup_id, "id1");
    }

    #[test]
    fn record_without_expiration_is_malformed() {
        let output = "Backups on NodeA:\nid1 2099-04-12 17:49:00 UTC\nid2\n";
        match parse_listing(output).unwrap_err() {
            HarnessError::Verification(msg) => assert!(msg.contains("\"id2\"")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn expiration_formats() {
        assert_eq!(expiration_arg(&expiration()), "2099-04-12T17:49");
        assert_eq!(normalized_expiration(&expiration()), "2099-04-12 17:49:00 UTC");
    }

    #[test]
    fn parse_expiration_accepts_argument_form_only() {
        assert_eq!(parse_expiration(DEFAULT_EXPIRATION).unwrap(), expiration());
        assert!(parse_expiration("2099-04-12 17:49:00 UTC").is_err());
        assert!(parse_expiration("tomorrow").is_err());
    }

    #[test]
    fn expires_at_parses_normalized_form() {
        let backup = Backup::new("id1", "2099-04-12 17:49:00 UTC");
        assert_eq!(backup.expires_at(), Some(expiration()));
        assert_eq!(Backup::new("id1", "someday").expires_at(), None);
    }
}
