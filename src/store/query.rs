use crate::labels::LabelSet;
use crate::protocol::{to_unix_nanos, StreamValues};
use crate::store::index::{Entry, StreamIndex, TimeRange};
use crate::store::selector::Selector;
use serde::Deserialize;

/// One matching stream with a snapshot of its entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamResult {
    pub labels: LabelSet,
    pub entries: Vec<Entry>,
}

impl StreamResult {
    pub fn to_values(&self) -> StreamValues {
        StreamValues {
            stream: self.labels.clone(),
            values: self
                .entries
                .iter()
                .map(|e| (to_unix_nanos(e.timestamp), e.line.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

/// Every stream matching `selector` with its entries in `range`, oldest
/// first. Streams with no entries in range are still listed.
pub fn query(index: &StreamIndex, selector: &Selector, range: &TimeRange) -> Vec<StreamResult> {
    index
        .select(selector)
        .iter()
        .map(|stream| StreamResult {
            labels: stream.labels().clone(),
            entries: stream.snapshot(range),
        })
        .collect()
}

/// `query` plus a limit on the total number of entries across streams.
///
/// Forward keeps the oldest entries, backward the newest; backward results
/// list each stream's entries newest first. Streams left without entries
/// are dropped.
pub fn query_limited(
    index: &StreamIndex,
    selector: &Selector,
    range: &TimeRange,
    limit: usize,
    direction: Direction,
) -> Vec<StreamResult> {
    let mut results = query(index, selector, range);

    // (timestamp, stream, position) of every entry, ordered by direction
    let mut order: Vec<(chrono::DateTime<chrono::Utc>, usize, usize)> = results
        .iter()
        .enumerate()
        .flat_map(|(s, r)| r.entries.iter().enumerate().map(move |(i, e)| (e.timestamp, s, i)))
        .collect();
    order.sort();
    if direction == Direction::Backward {
        order.reverse();
    }
    order.truncate(limit);

    let mut keep: Vec<usize> = vec![0; results.len()];
    for (_, s, i) in &order {
        keep[*s] = keep[*s].max(i + 1);
    }

    for (s, result) in results.iter_mut().enumerate() {
        match direction {
            Direction::Forward => result.entries.truncate(keep[s]),
            Direction::Backward => {
                let kept = order.iter().filter(|(_, stream, _)| *stream == s).count();
                let skip = result.entries.len() - kept;
                result.entries.drain(..skip);
                result.entries.reverse();
            }
        }
    }

    results.retain(|r| !r.entries.is_empty());
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn seeded() -> StreamIndex {
        let index = StreamIndex::new();
        let file: LabelSet = [("app", "tester"), ("job", "file")].into_iter().collect();
        let syslog: LabelSet = [("app", "tester"), ("job", "app_syslog")].into_iter().collect();
        index
            .get_or_create(&file)
            .append([Entry::new(ts(1), "a"), Entry::new(ts(3), "b")]);
        index
            .get_or_create(&syslog)
            .append([Entry::new(ts(2), "x"), Entry::new(ts(4), "y")]);
        index
    }

    fn lines(result: &StreamResult) -> Vec<&str> {
        result.entries.iter().map(|e| e.line.as_str()).collect()
    }

    #[test]
    fn test_file_scenario_returns_lines_in_order() {
        let index = seeded();
        let selector = Selector::parse(r#"{job=~".+"}"#).unwrap();
        let results = query(&index, &selector, &TimeRange::all());

        let file = results.iter().find(|r| r.labels.get("job") == Some("file")).unwrap();
        assert_eq!(lines(file), vec!["a", "b"]);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_zero_matches_is_empty_not_error() {
        let index = seeded();
        let selector = Selector::parse(r#"{job="nothing"}"#).unwrap();
        assert!(query(&index, &selector, &TimeRange::all()).is_empty());
    }

    #[test]
    fn test_range_filters_entries() {
        let index = seeded();
        let selector = Selector::parse(r#"{job="file"}"#).unwrap();
        let results = query(&index, &selector, &TimeRange::new(Some(ts(2)), None));
        assert_eq!(lines(&results[0]), vec!["b"]);
    }

    #[test]
    fn test_limit_forward_keeps_oldest() {
        let index = seeded();
        let selector = Selector::parse(r#"{app="tester"}"#).unwrap();
        let results = query_limited(&index, &selector, &TimeRange::all(), 3, Direction::Forward);

        let all: Vec<&str> = results.iter().flat_map(lines).collect();
        assert_eq!(all.len(), 3);
        let syslog = results.iter().find(|r| r.labels.get("job") == Some("app_syslog")).unwrap();
        assert_eq!(lines(syslog), vec!["x"]);
        let file = results.iter().find(|r| r.labels.get("job") == Some("file")).unwrap();
        assert_eq!(lines(file), vec!["a", "b"]);
    }

    #[test]
    fn test_limit_backward_keeps_newest_first() {
        let index = seeded();
        let selector = Selector::parse(r#"{app="tester"}"#).unwrap();
        let results = query_limited(&index, &selector, &TimeRange::all(), 2, Direction::Backward);

        let file = results.iter().find(|r| r.labels.get("job") == Some("file")).unwrap();
        assert_eq!(lines(file), vec!["b"]);
        let syslog = results.iter().find(|r| r.labels.get("job") == Some("app_syslog")).unwrap();
        assert_eq!(lines(syslog), vec!["y"]);

        let one = query_limited(&index, &selector, &TimeRange::all(), 1, Direction::Backward);
        assert_eq!(one.len(), 1);
        assert_eq!(lines(&one[0]), vec!["y"]);
    }

    #[test]
    fn test_to_values_uses_nanos() {
        let index = seeded();
        let selector = Selector::parse(r#"{job="file"}"#).unwrap();
        let values = query(&index, &selector, &TimeRange::all())[0].to_values();
        assert_eq!(values.values[0], ("1700000001000000000".to_string(), "a".to_string()));
    }
}
