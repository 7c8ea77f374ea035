//! Sample persistence: the append-only uniform time-series.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, Row};
use serde::Serialize;

use super::{from_ts, to_ts, Store};
use crate::models::{NewSample, Sample};

/// Orderable columns for the paged sample query. A closed set so user input
/// never reaches the SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOrder {
    Timestamp,
    ReceivedAt,
    Value,
    Id,
}

impl SampleOrder {
    pub fn parse(s: &str) -> Option<SampleOrder> {
        match s {
            "timestamp" => Some(SampleOrder::Timestamp),
            "received_at" => Some(SampleOrder::ReceivedAt),
            "value" => Some(SampleOrder::Value),
            "id" => Some(SampleOrder::Id),
            _ => None,
        }
    }

    fn column(self) -> &'static str {
        match self {
            SampleOrder::Timestamp => "timestamp",
            SampleOrder::ReceivedAt => "received_at",
            SampleOrder::Value => "value",
            SampleOrder::Id => "id",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SampleQuery {
    pub source_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
    pub order_by: SampleOrder,
    pub descending: bool,
}

impl Default for SampleQuery {
    fn default() -> Self {
        SampleQuery {
            source_id: None,
            start: None,
            end: None,
            limit: 100,
            offset: 0,
            order_by: SampleOrder::Timestamp,
            descending: true,
        }
    }
}

/// Aggregate stats for one source_id, for the summary endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub source_id: String,
    pub count: i64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub change_count: i64,
    pub latest: Option<Sample>,
}

impl Store {
    /// Append one sample. `received_at` is stamped here; the row is immutable
    /// afterwards.
    pub fn insert_sample(&self, new: &NewSample) -> Result<Sample> {
        let received_at = Utc::now();
        let conn = self.conn();

        conn.execute(
            "INSERT INTO samples (source_id, display_name, value, text, unit, decimal_places, \
                                  status, timestamp, received_at, is_change, change_type, previous_value) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                new.source_id,
                new.display_name,
                new.value,
                new.text,
                new.unit,
                new.decimal_places,
                new.status,
                to_ts(new.timestamp),
                to_ts(received_at),
                new.is_change,
                new.change_type,
                new.previous_value,
            ],
        )
        .context("Failed to insert sample")?;

        let id = conn.last_insert_rowid();

        Ok(Sample {
            id,
            source_id: new.source_id.clone(),
            display_name: new.display_name.clone(),
            value: new.value,
            text: new.text.clone(),
            unit: new.unit.clone(),
            decimal_places: new.decimal_places,
            status: new.status.clone(),
            timestamp: new.timestamp,
            received_at,
            is_change: new.is_change,
            change_type: new.change_type.clone(),
            previous_value: new.previous_value,
        })
    }

    /// Most recent sample for a source, by event time.
    pub fn latest_sample(&self, source_id: &str) -> Result<Option<Sample>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, source_id, display_name, value, text, unit, decimal_places, status, \
                    timestamp, received_at, is_change, change_type, previous_value \
             FROM samples WHERE source_id = ?1 \
             ORDER BY timestamp DESC, id DESC LIMIT 1",
        )?;

        let mut rows = stmt.query_map([source_id], row_to_sample)?;
        Ok(rows.next().transpose()?)
    }

    /// Paged range query, filters composed dynamically.
    pub fn samples_by_range(&self, q: &SampleQuery) -> Result<Vec<Sample>> {
        let mut sql = String::from(
            "SELECT id, source_id, display_name, value, text, unit, decimal_places, status, \
                    timestamp, received_at, is_change, change_type, previous_value \
             FROM samples WHERE 1=1",
        );
        let mut args: Vec<Value> = Vec::new();

        if let Some(source_id) = &q.source_id {
            sql.push_str(&format!(" AND source_id = ?{}", args.len() + 1));
            args.push(Value::Text(source_id.clone()));
        }
        if let Some(start) = q.start {
            sql.push_str(&format!(" AND timestamp >= ?{}", args.len() + 1));
            args.push(Value::Integer(to_ts(start)));
        }
        if let Some(end) = q.end {
            sql.push_str(&format!(" AND timestamp < ?{}", args.len() + 1));
            args.push(Value::Integer(to_ts(end)));
        }

        let dir = if q.descending { "DESC" } else { "ASC" };
        sql.push_str(&format!(
            " ORDER BY {} {} LIMIT ?{} OFFSET ?{}",
            q.order_by.column(),
            dir,
            args.len() + 1,
            args.len() + 2
        ));
        args.push(Value::Integer(q.limit));
        args.push(Value::Integer(q.offset));

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let samples = stmt
            .query_map(params_from_iter(args), row_to_sample)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(samples)
    }

    /// Aggregate stats for every distinct source.
    pub fn sample_summaries(&self) -> Result<Vec<SourceSummary>> {
        let aggregates: Vec<(String, i64, Option<f64>, Option<f64>, Option<f64>, i64)> = {
            let conn = self.conn();
            let mut stmt = conn.prepare_cached(
                "SELECT source_id, COUNT(*), MIN(value), MAX(value), AVG(value), \
                        COALESCE(SUM(is_change), 0) \
                 FROM samples GROUP BY source_id ORDER BY source_id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut summaries = Vec::with_capacity(aggregates.len());
        for (source_id, count, min, max, mean, change_count) in aggregates {
            let latest = self.latest_sample(&source_id)?;
            summaries.push(SourceSummary {
                source_id,
                count,
                min,
                max,
                mean,
                change_count,
                latest,
            });
        }
        Ok(summaries)
    }
}

fn row_to_sample(row: &Row<'_>) -> rusqlite::Result<Sample> {
    Ok(Sample {
        id: row.get(0)?,
        source_id: row.get(1)?,
        display_name: row.get(2)?,
        value: row.get(3)?,
        text: row.get(4)?,
        unit: row.get(5)?,
        decimal_places: row.get(6)?,
        status: row.get(7)?,
        timestamp: from_ts(row.get(8)?),
        received_at: from_ts(row.get(9)?),
        is_change: row.get(10)?,
        change_type: row.get(11)?,
        previous_value: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_util::temp_store;
    use chrono::Duration;

    fn sample(source_id: &str, value: f64, ts: DateTime<Utc>) -> NewSample {
        NewSample {
            source_id: source_id.to_string(),
            value: Some(value),
            status: "active".to_string(),
            timestamp: ts,
            ..Default::default()
        }
    }

    #[test]
    fn latest_wins_by_event_time() {
        let (_dir, store) = temp_store();
        let now = Utc::now();

        store.insert_sample(&sample("s1", 1.0, now - Duration::minutes(2))).unwrap();
        store.insert_sample(&sample("s1", 2.0, now)).unwrap();
        store.insert_sample(&sample("s1", 3.0, now - Duration::minutes(1))).unwrap();

        let latest = store.latest_sample("s1").unwrap().unwrap();
        assert_eq!(latest.value, Some(2.0));
    }

    #[test]
    fn range_query_filters_and_pages() {
        let (_dir, store) = temp_store();
        let now = Utc::now();

        for i in 0..10 {
            store
                .insert_sample(&sample("s1", i as f64, now - Duration::minutes(i)))
                .unwrap();
        }
        store.insert_sample(&sample("other", 99.0, now)).unwrap();

        let q = SampleQuery {
            source_id: Some("s1".to_string()),
            limit: 3,
            offset: 2,
            ..Default::default()
        };
        let page = store.samples_by_range(&q).unwrap();
        assert_eq!(page.len(), 3);
        // Descending by timestamp, so offset 2 starts at value 2.0.
        assert_eq!(page[0].value, Some(2.0));

        let q = SampleQuery {
            source_id: Some("s1".to_string()),
            start: Some(now - Duration::minutes(4)),
            end: Some(now + Duration::minutes(1)),
            limit: 100,
            ..Default::default()
        };
        assert_eq!(store.samples_by_range(&q).unwrap().len(), 5);
    }

    #[test]
    fn summaries_cover_every_source() {
        let (_dir, store) = temp_store();
        let now = Utc::now();

        store.insert_sample(&sample("a", 1.0, now - Duration::minutes(1))).unwrap();
        store.insert_sample(&sample("a", 3.0, now)).unwrap();
        store.insert_sample(&sample("b", -2.0, now)).unwrap();

        let summaries = store.sample_summaries().unwrap();
        assert_eq!(summaries.len(), 2);

        let a = summaries.iter().find(|s| s.source_id == "a").unwrap();
        assert_eq!(a.count, 2);
        assert_eq!(a.min, Some(1.0));
        assert_eq!(a.max, Some(3.0));
        assert_eq!(a.mean, Some(2.0));
        assert_eq!(a.latest.as_ref().unwrap().value, Some(3.0));
    }
}
