use super::{AnalysisResult, DimensionKind};

const FEEDBACK_SEPARATOR: &str = ". ";

/// Grounding block sent with every chat turn.
///
/// Always rebuilt from the full result: no summarising, no truncation.
pub fn build_context(result: &AnalysisResult) -> String {
    DimensionKind::ALL
        .iter()
        .map(|kind| {
            let dimension = result.dimension(*kind);
            format!(
                "{} Score: {}/100\n{} Feedback: {}",
                kind.title(),
                dimension.score,
                kind.feedback_label(),
                dimension.feedback.join(FEEDBACK_SEPARATOR)
            )
        })
        .collect::<Vec<String>>()
        .join("\n\n")
}

/// Spoken overview used when narration is switched on.
pub fn narration_summary(result: &AnalysisResult) -> String {
    let mut parts = vec![
        "I've analyzed your floorplan and found several opportunities for improvement.".to_string(),
    ];
    for (kind, lead) in [
        (DimensionKind::Layout, "The layout scores"),
        (DimensionKind::Lighting, "Natural lighting scores"),
        (DimensionKind::Flow, "Traffic flow scores"),
    ] {
        let dimension = result.dimension(kind);
        match dimension.headline().filter(|text| !text.trim().is_empty()) {
            Some(headline) => parts.push(format!(
                "{lead} {} out of 100, {}.",
                dimension.score,
                headline.trim().trim_end_matches('.')
            )),
            None => parts.push(format!("{lead} {} out of 100.", dimension.score)),
        }
    }
    parts.join(" ")
}
