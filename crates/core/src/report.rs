//! Percentage area change between matched frame pairs.

use crate::areas::{FrameAreaEntry, RunAreaReport};
use crate::frames::FrameId;
use crate::labels::ClassId;
use crate::matcher::FramePair;
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AreaChange {
    /// `(baseline - followup) / baseline * 100`, two decimals.
    Percent(f64),
    /// The baseline area was zero.
    NoChange,
}

impl AreaChange {
    /// A zero baseline reports `NoChange` whatever the followup area is.
    pub fn between(baseline: f64, followup: f64) -> Self {
        if baseline == 0.0 {
            return AreaChange::NoChange;
        }
        let pct = round2((baseline - followup) / baseline * 100.0);
        AreaChange::Percent(if pct == 0.0 { 0.0 } else { pct })
    }
}

impl fmt::Display for AreaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AreaChange::Percent(p) => write!(f, "{}% change", format_percent(*p)),
            AreaChange::NoChange => f.write_str("no change"),
        }
    }
}

/// Plain decimal, one decimal place kept on whole numbers: `10.0`, `12.35`.
fn format_percent(p: f64) -> String {
    if p.fract() == 0.0 {
        format!("{p:.1}")
    } else {
        format!("{p}")
    }
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonLine {
    pub query: FrameId,
    pub matched: FrameId,
    /// One change per class, in class order.
    pub changes: Vec<AreaChange>,
}

impl ComparisonLine {
    /// `video_02 12.340s : reinforcement 10.0% change | white_bleeding no change | ...`
    pub fn render(&self, video_label: &str, class_names: &[String]) -> String {
        let classes = self
            .changes
            .iter()
            .enumerate()
            .map(|(i, change)| match class_names.get(i) {
                Some(name) => format!("{name} {change}"),
                None => format!("class_{i} {change}"),
            })
            .collect::<Vec<_>>()
            .join(" | ");
        format!("{video_label} {:.3}s : {classes}", self.matched.seconds())
    }
}

/// Compares the baseline entry of each pair's query frame with the followup
/// entry of its matched frame. A frame missing from a report counts as zero
/// area.
pub fn compare(
    baseline: &RunAreaReport,
    followup: &RunAreaReport,
    pairing: &[FramePair],
    class_count: usize,
) -> Vec<ComparisonLine> {
    let base = baseline.by_frame();
    let follow = followup.by_frame();

    pairing
        .iter()
        .map(|pair| {
            let b = areas_for(&base, &baseline.run, &pair.query, class_count);
            let f = areas_for(&follow, &followup.run, &pair.matched, class_count);
            ComparisonLine {
                query: pair.query.clone(),
                matched: pair.matched.clone(),
                changes: b
                    .iter()
                    .zip(&f)
                    .map(|(b, f)| AreaChange::between(*b, *f))
                    .collect(),
            }
        })
        .collect()
}

fn areas_for(
    index: &HashMap<u64, &FrameAreaEntry>,
    run: &str,
    frame: &FrameId,
    class_count: usize,
) -> Vec<f64> {
    match index.get(&frame.key()) {
        Some(entry) => (0..class_count).map(|c| entry.area(c as ClassId)).collect(),
        None => {
            warn!(run, frame = %frame, "frame missing from area report, treating as zero");
            vec![0.0; class_count]
        }
    }
}

pub fn render_lines(lines: &[ComparisonLine], video_label: &str, class_names: &[String]) -> Vec<String> {
    lines
        .iter()
        .map(|l| l.render(video_label, class_names))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrease_is_positive_percentage() {
        assert_eq!(AreaChange::between(100.0, 80.0), AreaChange::Percent(20.0));
        assert_eq!(AreaChange::between(100.0, 80.0).to_string(), "20.0% change");
    }

    #[test]
    fn increase_is_negative_percentage() {
        assert_eq!(AreaChange::between(40.0, 50.0).to_string(), "-25.0% change");
    }

    #[test]
    fn rounds_to_two_decimals() {
        assert_eq!(AreaChange::between(3.0, 2.0), AreaChange::Percent(33.33));
        assert_eq!(AreaChange::between(3.0, 2.0).to_string(), "33.33% change");
    }

    #[test]
    fn equal_areas_are_zero_percent() {
        assert_eq!(AreaChange::between(50.0, 50.0).to_string(), "0.0% change");
    }

    // A zero baseline reads "no change" even when the followup frame has new
    // detections (0 -> 50).
    #[test]
    fn zero_baseline_is_no_change_even_with_new_area() {
        assert_eq!(AreaChange::between(0.0, 0.0), AreaChange::NoChange);
        assert_eq!(AreaChange::between(0.0, 50.0), AreaChange::NoChange);
        assert_eq!(AreaChange::between(0.0, 50.0).to_string(), "no change");
    }

    #[test]
    fn huge_changes_stay_in_plain_notation() {
        let text = AreaChange::between(1e-12, 1e6).to_string();
        assert!(text.starts_with("-1000000000"), "{text}");
        assert!(text.ends_with(".0% change"), "{text}");
        assert!(!text.contains('e'), "{text}");
        assert_eq!(AreaChange::between(8.0, 7.0).to_string(), "12.5% change");
    }
}
