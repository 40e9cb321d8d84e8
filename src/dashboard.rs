//! Terminal dashboard: polls the rows and prints summary statistics.
//!
//! All aggregation happens here, on the client side. The server only ever hands
//! out raw rows.

use std::fmt::Write as _;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::client::IngestClient;
use crate::model::Row;

const RECENT_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub total_records: usize,
    /// Records whose score is a number or a numeric string.
    pub scored_records: usize,
    pub average_score: Option<f64>,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
    /// Newest first.
    pub recent: Vec<Row>,
}

fn numeric_score(cell: &Value) -> Option<f64> {
    match cell {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Summarises rows as returned by `GET /rows`. The first row is the header.
pub fn summarize(rows: &[Row]) -> Summary {
    let data = rows.get(1..).unwrap_or_default();
    let scores: Vec<f64> = data.iter().filter_map(|row| row.get(3).and_then(numeric_score)).collect();

    let average_score = if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    };

    Summary {
        total_records: data.len(),
        scored_records: scores.len(),
        average_score,
        min_score: scores.iter().copied().reduce(f64::min),
        max_score: scores.iter().copied().reduce(f64::max),
        recent: data.iter().rev().take(RECENT_LIMIT).cloned().collect(),
    }
}

fn cell_text(cell: Option<&Value>) -> String {
    match cell {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "-".to_string(),
        Some(other) => other.to_string(),
    }
}

fn score_text(score: Option<f64>) -> String {
    score.map_or_else(|| "-".to_string(), |s| format!("{s:.2}"))
}

pub fn render(summary: &Summary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "==================================================");
    let _ = writeln!(out, "   Tally Dashboard");
    let _ = writeln!(out, "==================================================");

    if summary.total_records == 0 {
        let _ = writeln!(out, "No data yet.");
        return out;
    }

    let _ = writeln!(out, "Records:       {}", summary.total_records);
    let _ = writeln!(out, "Average Score: {}", score_text(summary.average_score));
    let _ = writeln!(out, "Min / Max:     {} / {}", score_text(summary.min_score), score_text(summary.max_score));
    let _ = writeln!(out, "\nLatest {}:", summary.recent.len());
    for row in &summary.recent {
        let _ = writeln!(
            out,
            "  • {} | id={} | {} | score={}",
            cell_text(row.first()),
            cell_text(row.get(1)),
            cell_text(row.get(2)),
            cell_text(row.get(3)),
        );
    }
    out
}

/// Polls forever (or once) and prints a fresh frame each tick.
/// A failed fetch renders as "no data" and polling carries on.
pub async fn run(client: &IngestClient, interval: Duration, once: bool) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let rows = client.fetch_rows().await.unwrap_or_else(|e| {
            warn!(error = %e, "dashboard fetch failed");
            Vec::new()
        });
        println!("{}", render(&summarize(&rows)));
        if once {
            break;
        }
    }
}
