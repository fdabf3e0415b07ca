//! HTML report rendering for a run's results.

use crate::longevity::run::RunResults;
use std::fmt::Write;

/// How many leading predictions the summary lists.
const PREVIEW_LEN: usize = 10;

const STYLE: &str = r#"
        body { font-family: Arial, sans-serif; margin: 20px; }
        h1 { color: #333; }
        .metric { background: #f5f5f5; padding: 10px; margin: 10px 0; border-radius: 5px; }
        .warning { background: #fff3cd; padding: 10px; margin: 10px 0; border-radius: 5px; }
        table { border-collapse: collapse; width: 100%; margin: 20px 0; }
        th, td { border: 1px solid #ddd; padding: 8px; text-align: left; }
        th { background-color: #4CAF50; color: white; }"#;

/// Render the human-readable report. Pure; the caller persists the output.
pub fn render_html(results: &RunResults) -> String {
    let m = &results.ldrop_metrics;
    let metric_rows = [
        ("mean_prediction", m.mean_prediction.to_string()),
        ("std_prediction", m.std_prediction.to_string()),
        ("min_prediction", m.min_prediction.to_string()),
        ("max_prediction", m.max_prediction.to_string()),
        ("ldrop_threshold", m.ldrop_threshold.to_string()),
        ("samples_below_threshold", m.samples_below_threshold.to_string()),
    ];

    let mut metrics_html = String::new();
    for (name, value) in metric_rows {
        let _ = write!(metrics_html, "<tr><td>{}</td><td>{}</td></tr>", name, value);
    }

    let mut deltas_html = String::new();
    for (name, value) in results.ra_score_deltas.entries() {
        let _ = write!(deltas_html, "<tr><td>{}</td><td>{:.4}</td></tr>", name, value);
    }

    let preview: Vec<String> = results
        .predictions
        .iter()
        .take(PREVIEW_LEN)
        .map(|p| p.to_string())
        .collect();

    let target_note = if results.target_source.is_synthetic() {
        r#"<div class="warning"><strong>Note:</strong> no <code>target</code> column was supplied; predictions were fitted to a synthetic placeholder target and carry no real predictive value.</div>"#
    } else {
        ""
    };

    let features: Vec<&str> = results.features.iter().map(|f| f.column()).collect();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>RA Longevity Analysis Report - {run_id}</title>
    <style>{style}
    </style>
</head>
<body>
    <h1>RA Longevity Analysis Report</h1>
    <div class="metric"><strong>Run ID:</strong> {run_id}</div>
    <div class="metric"><strong>Timestamp:</strong> {timestamp}</div>
    <div class="metric"><strong>Model:</strong> {model} on features {features}</div>
    {target_note}

    <h2>L-Drop Metrics</h2>
    <table>
        <tr><th>Metric</th><th>Value</th></tr>
        {metrics_html}
    </table>

    <h2>RA Score Deltas</h2>
    <table>
        <tr><th>Metric</th><th>Value</th></tr>
        {deltas_html}
    </table>

    <h2>Predictions Summary</h2>
    <div class="metric">
        <p>Total Predictions: {total}</p>
        <p>First {preview_len} predictions: [{preview}]</p>
    </div>
</body>
</html>
"#,
        run_id = results.run_id,
        style = STYLE,
        timestamp = results.timestamp.to_rfc3339(),
        model = results.model,
        features = features.join(", "),
        target_note = target_note,
        metrics_html = metrics_html,
        deltas_html = deltas_html,
        total = results.predictions.len(),
        preview_len = PREVIEW_LEN,
        preview = preview.join(", "),
    )
}
