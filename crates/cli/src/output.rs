use anyhow::Result;
use chrono::SecondsFormat;
use segcompare_core::pipeline::{PipelineMode, PipelineSummary};
use storage::ArtifactStore;

pub fn mode_label(mode: PipelineMode) -> &'static str {
    match mode {
        PipelineMode::Extract => "extract",
        PipelineMode::Segment => "segment",
        PipelineMode::Match => "match",
        PipelineMode::Measure => "measure",
        PipelineMode::Report => "report",
        PipelineMode::All => "all",
    }
}

pub fn summary_json(mode: PipelineMode, summary: &PipelineSummary) -> Result<serde_json::Value> {
    let mut value = serde_json::json!({
        "status": "ok",
        "mode": mode_label(mode),
    });
    if let (Some(obj), serde_json::Value::Object(fields)) =
        (value.as_object_mut(), serde_json::to_value(summary)?)
    {
        obj.extend(fields);
    }
    Ok(value)
}

/// One-line stage summary, followed by the report lines for modes that
/// produce them.
pub fn summary_text(mode: PipelineMode, summary: &PipelineSummary) -> String {
    let mut out = match mode {
        PipelineMode::Extract => format!(
            "extract: baseline {} frames, followup {} frames",
            summary.frames_baseline, summary.frames_followup
        ),
        PipelineMode::Segment => format!(
            "segment: {} baseline frames with detections",
            summary.labeled_baseline
        ),
        PipelineMode::Match => format!("match: {} pairs", summary.pairs),
        PipelineMode::Measure => format!(
            "measure: baseline {} frames, followup {} frames",
            summary.measured_baseline, summary.measured_followup
        ),
        PipelineMode::Report => format!("report: {} lines", summary.report_lines.len()),
        PipelineMode::All => format!(
            "all: frames {}/{}, labeled {}, pairs {}, report lines {}",
            summary.frames_baseline,
            summary.frames_followup,
            summary.labeled_baseline,
            summary.pairs,
            summary.report_lines.len()
        ),
    };
    for line in &summary.report_lines {
        out.push('\n');
        out.push_str(line);
    }
    out
}

/// Pretty-prints a stored artifact. `.json` may be omitted from `name`.
pub fn inspect(store: &ArtifactStore, name: &str, json: bool) -> Result<String> {
    let file = if name.ends_with(".json") {
        name.to_string()
    } else {
        format!("{name}.json")
    };
    let envelope = store.read_raw(&file)?;
    if json {
        return Ok(serde_json::to_string_pretty(&envelope)?);
    }
    Ok(format!(
        "{} ({}, written {})\n{}",
        file,
        envelope.kind,
        envelope.written_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        serde_json::to_string_pretty(&envelope.payload)?
    ))
}
