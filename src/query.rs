//! Read back stored records for a time window and export them as JSON.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

use crate::error::QueryError;
use crate::models::Record;
use crate::store::RecordStore;

/// Parse a relative window such as `3d` or `2w`.
pub fn parse_duration(raw: &str) -> Result<Duration, QueryError> {
    let invalid = || QueryError::InvalidDuration(raw.to_string());
    let raw = raw.trim();
    let Some((unit_at, _)) = raw.char_indices().last() else {
        return Err(invalid());
    };
    let (count, unit) = raw.split_at(unit_at);
    let n: i64 = count.parse().map_err(|_| invalid())?;
    if n < 0 {
        return Err(invalid());
    }
    match unit {
        "d" => Ok(Duration::days(n)),
        "w" => Ok(Duration::weeks(n)),
        _ => Err(invalid()),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDateTime, QueryError> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|source| QueryError::InvalidDate {
        value: raw.to_string(),
        source,
    })?;
    Ok(date.and_time(chrono::NaiveTime::MIN))
}

/// Resolve the `(start, end]` window.
///
/// A duration counts back from `now`; otherwise both dates are required and
/// each is taken at midnight.
pub fn resolve_window(
    duration: Option<&str>,
    start: Option<&str>,
    end: Option<&str>,
    now: NaiveDateTime,
) -> Result<(NaiveDateTime, NaiveDateTime), QueryError> {
    if let Some(duration) = duration {
        return Ok((now - parse_duration(duration)?, now));
    }
    match (start, end) {
        (Some(start), Some(end)) => Ok((parse_date(start)?, parse_date(end)?)),
        _ => Err(QueryError::MissingWindow),
    }
}

/// Split a comma-separated type filter; an empty filter means "all types".
pub fn parse_kinds(raw: Option<&str>) -> Option<Vec<String>> {
    let kinds: Vec<String> = raw?
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect();
    (!kinds.is_empty()).then_some(kinds)
}

#[instrument(level = "info", skip(store, kinds))]
pub async fn load_records(
    store: &dyn RecordStore,
    start: NaiveDateTime,
    end: NaiveDateTime,
    kinds: Option<&[String]>,
) -> Result<Vec<Record>, QueryError> {
    info!(?kinds, "Querying records");
    let records = store.query(start, end, kinds).await?;
    info!(count = records.len(), "Query finished");
    Ok(records)
}

/// Write `records` as pretty JSON to `output`, or to stdout when absent.
#[instrument(level = "info", skip(records), fields(count = records.len()))]
pub async fn write_records(records: &[Record], output: Option<&Path>) -> Result<(), QueryError> {
    let json = serde_json::to_string_pretty(records)?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).await?;
            }
            fs::write(path, json).await?;
            info!(path = %path.display(), "Wrote records");
        }
        None => println!("{json}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::tests::stored;
    use crate::store::MemoryStore;

    fn at(date: &str) -> NaiveDateTime {
        parse_date(date).unwrap()
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("3d").unwrap(), Duration::days(3));
        assert_eq!(parse_duration("2w").unwrap(), Duration::days(14));
        assert!(matches!(parse_duration("3m"), Err(QueryError::InvalidDuration(_))));
        assert!(parse_duration("d").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("-1d").is_err());
        assert!(parse_duration("3天").is_err());
    }

    #[test]
    fn test_resolve_window() {
        let now = at("2025-08-14");
        assert_eq!(
            resolve_window(Some("1w"), None, None, now).unwrap(),
            (at("2025-08-07"), now)
        );
        assert_eq!(
            resolve_window(None, Some("2025-08-01"), Some("2025-08-10"), now).unwrap(),
            (at("2025-08-01"), at("2025-08-10"))
        );
        assert!(matches!(
            resolve_window(None, Some("2025-08-01"), None, now),
            Err(QueryError::MissingWindow)
        ));
        assert!(matches!(
            resolve_window(None, Some("08/01/2025"), Some("2025-08-10"), now),
            Err(QueryError::InvalidDate { .. })
        ));
    }

    #[test]
    fn test_parse_kinds() {
        assert_eq!(parse_kinds(Some("财经, 科技,")), Some(vec!["财经".to_string(), "科技".to_string()]));
        assert_eq!(parse_kinds(Some(" , ")), None);
        assert_eq!(parse_kinds(None), None);
    }

    #[tokio::test]
    async fn test_load_and_write_records() {
        let store = MemoryStore::new();
        let mut finance = stored("https://a.com/x/2", "Markets");
        finance.kind = "财经".to_string();
        store
            .insert_batch(&[stored("https://a.com/x/1", "Summit"), finance])
            .await
            .unwrap();

        let kinds = vec!["财经".to_string()];
        let records = load_records(&store, at("2025-08-13"), at("2025-08-14"), Some(kinds.as_slice()))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/records.json");
        write_records(&records, Some(&path)).await.unwrap();
        let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written[0]["type"], "财经");
        assert_eq!(written[0]["title"], "Markets");
    }
}
