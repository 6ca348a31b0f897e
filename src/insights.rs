//! Business insights and dashboard suggestions over captured API data.
//!
//! Same inference contract as the analyzer with different prompts and
//! schemas. Input is the project's recent successful execution payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use api_harness_core::models::{ExecutionRecord, ExecutionStatus};

use crate::inference::{Dispatcher, InferenceError, InferenceSettings};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// `high`, `medium` or `low` as reported by the model.
    #[serde(default)]
    pub impact: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub trend: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightReport {
    #[serde(default)]
    pub summary: String,
    pub insights: Vec<Insight>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    /// Chart or display type (`line`, `bar`, `table`, `kpi`, ...).
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub metric: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSuggestion {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub widgets: Vec<Widget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSuggestions {
    pub dashboards: Vec<DashboardSuggestion>,
}

const INSIGHTS_PROMPT: &str = r#"You are a business analyst. The data below was captured from a company's API calls.
Identify the most useful business insights.

Respond with exactly one JSON object:
{
  "summary": "two or three sentences",
  "insights": [ { "title": "string", "description": "string", "impact": "high | medium | low" } ],
  "metrics": [ { "name": "string", "value": 0, "trend": "up | down | flat" } ]
}"#;

const DASHBOARDS_PROMPT: &str = r#"You are a BI designer. The data below was captured from a company's API calls.
Suggest dashboards that would help the business monitor it.

Respond with exactly one JSON object:
{
  "dashboards": [
    {
      "name": "string",
      "description": "string",
      "widgets": [ { "kind": "line | bar | pie | table | kpi", "title": "string", "metric": "field or expression" } ]
    }
  ]
}"#;

/// Serialise successful execution payloads for a prompt, newest first,
/// stopping before `max_chars`.
pub fn collect_data(records: &[ExecutionRecord], max_chars: usize) -> String {
    let mut out = String::new();
    for record in records
        .iter()
        .filter(|r| r.status == ExecutionStatus::Success)
    {
        let entry = format!(
            "# endpoint {} ({} records)\n{}\n\n",
            record.endpoint_id, record.record_count, record.response_payload
        );
        if out.len() + entry.len() > max_chars {
            break;
        }
        out.push_str(&entry);
    }
    out
}

pub async fn generate_insights(
    dispatcher: &Dispatcher,
    data: &str,
    settings: &InferenceSettings,
) -> Result<InsightReport, InferenceError> {
    dispatcher
        .infer_typed(INSIGHTS_PROMPT, data, settings, None)
        .await
}

pub async fn suggest_dashboards(
    dispatcher: &Dispatcher,
    data: &str,
    settings: &InferenceSettings,
) -> Result<DashboardSuggestions, InferenceError> {
    dispatcher
        .infer_typed(DASHBOARDS_PROMPT, data, settings, None)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn record(status: ExecutionStatus, payload: Value) -> ExecutionRecord {
        ExecutionRecord {
            id: "r".into(),
            api_id: "a".into(),
            endpoint_id: "e1".into(),
            project_id: "p".into(),
            status,
            status_code: Some(200),
            duration_ms: 5,
            response_payload: payload,
            error: None,
            record_count: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn collect_skips_failures_and_truncates() {
        let records = vec![
            record(ExecutionStatus::Error, json!({"message": "denied"})),
            record(ExecutionStatus::Success, json!({"revenue": 10})),
            record(ExecutionStatus::Success, json!({"x": "y".repeat(500)})),
        ];
        let data = collect_data(&records, 200);
        assert!(data.contains("revenue"));
        assert!(!data.contains("denied"));
        assert!(!data.contains("yyyy"));
    }

    #[test]
    fn report_tolerates_missing_optional_fields() {
        let report: InsightReport =
            serde_json::from_value(json!({"insights": [{"title": "Churn rising"}]})).unwrap();
        assert_eq!(report.insights[0].title, "Churn rising");
        assert!(report.metrics.is_empty());
    }
}
