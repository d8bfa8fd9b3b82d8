mod context;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use thiserror::Error;

pub use context::{build_context, narration_summary};

/// The three scored aspects of a floorplan, in rendering order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimensionKind {
    Layout,
    Lighting,
    Flow,
}

impl DimensionKind {
    pub const ALL: [DimensionKind; 3] = [
        DimensionKind::Layout,
        DimensionKind::Lighting,
        DimensionKind::Flow,
    ];

    pub fn key(self) -> &'static str {
        match self {
            DimensionKind::Layout => "layout",
            DimensionKind::Lighting => "lighting",
            DimensionKind::Flow => "flow",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            DimensionKind::Layout => "Layout Efficiency",
            DimensionKind::Lighting => "Natural Lighting",
            DimensionKind::Flow => "Traffic Flow",
        }
    }

    pub fn feedback_label(self) -> &'static str {
        match self {
            DimensionKind::Layout => "Layout",
            DimensionKind::Lighting => "Lighting",
            DimensionKind::Flow => "Traffic Flow",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBand {
    Strong,
    Fair,
    Weak,
}

impl ScoreBand {
    pub fn for_score(score: f64) -> Self {
        if score >= 80.0 {
            ScoreBand::Strong
        } else if score >= 60.0 {
            ScoreBand::Fair
        } else {
            ScoreBand::Weak
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ScoreBand::Strong => "strong",
            ScoreBand::Fair => "fair",
            ScoreBand::Weak => "weak",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub score: Number,
    pub feedback: Vec<String>,
}

impl Dimension {
    pub fn score_f64(&self) -> f64 {
        self.score.as_f64().unwrap_or_default()
    }

    pub fn band(&self) -> ScoreBand {
        ScoreBand::for_score(self.score_f64())
    }

    pub fn headline(&self) -> Option<&str> {
        self.feedback.first().map(String::as_str)
    }
}

/// A floorplan evaluation that passed [`validate`].
///
/// The only ways to obtain one are [`validate`], [`AnalysisResult::from_json_str`]
/// and deserialization (which validates), so holding a value of this type means
/// the payload had all three dimensions in the expected shape. The accepted
/// payload is kept verbatim, extra fields included.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    raw: Value,
    layout: Dimension,
    lighting: Dimension,
    flow: Dimension,
}

impl AnalysisResult {
    pub fn from_json_str(raw: &str) -> Result<Self, ValidationError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| ValidationError::MalformedJson(err.to_string()))?;
        validate(&value)
    }

    pub fn layout(&self) -> &Dimension {
        &self.layout
    }

    pub fn lighting(&self) -> &Dimension {
        &self.lighting
    }

    pub fn flow(&self) -> &Dimension {
        &self.flow
    }

    pub fn dimension(&self, kind: DimensionKind) -> &Dimension {
        match kind {
            DimensionKind::Layout => &self.layout,
            DimensionKind::Lighting => &self.lighting,
            DimensionKind::Flow => &self.flow,
        }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

impl Serialize for AnalysisResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AnalysisResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        validate(&raw).map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("analysis payload is not valid JSON: {0}")]
    MalformedJson(String),
    #[error("`{path}` must be an object")]
    NotAnObject { path: String },
    #[error("missing `{0}` section")]
    MissingDimension(&'static str),
    #[error("`{0}.score` must be a number")]
    ScoreNotNumeric(&'static str),
    #[error("`{0}.feedback` must be a list")]
    FeedbackNotSequence(&'static str),
}

/// Structural gate for analysis payloads crossing a process or network boundary.
///
/// Shape only: scores are not range-checked, feedback may be empty and unknown
/// keys are ignored.
pub fn validate(raw: &Value) -> Result<AnalysisResult, ValidationError> {
    let Some(root) = raw.as_object() else {
        return Err(ValidationError::NotAnObject {
            path: "$".to_string(),
        });
    };

    Ok(AnalysisResult {
        layout: read_dimension(root, DimensionKind::Layout)?,
        lighting: read_dimension(root, DimensionKind::Lighting)?,
        flow: read_dimension(root, DimensionKind::Flow)?,
        raw: raw.clone(),
    })
}

fn read_dimension(
    root: &Map<String, Value>,
    kind: DimensionKind,
) -> Result<Dimension, ValidationError> {
    let key = kind.key();
    let section = root
        .get(key)
        .filter(|value| !value.is_null())
        .ok_or(ValidationError::MissingDimension(key))?;
    let Some(section) = section.as_object() else {
        return Err(ValidationError::NotAnObject {
            path: key.to_string(),
        });
    };
    let score = match section.get("score") {
        Some(Value::Number(score)) => score.clone(),
        _ => return Err(ValidationError::ScoreNotNumeric(key)),
    };
    let Some(feedback) = section.get("feedback").and_then(Value::as_array) else {
        return Err(ValidationError::FeedbackNotSequence(key));
    };
    Ok(Dimension {
        score,
        feedback: feedback.iter().map(feedback_text).collect(),
    })
}

fn feedback_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{validate, AnalysisResult, DimensionKind, ScoreBand, ValidationError};

    fn sample() -> Value {
        json!({
            "layout": {"score": 72, "feedback": ["Open kitchen merges into living space"]},
            "lighting": {"score": 55, "feedback": ["South-facing windows limited to bedroom"]},
            "flow": {"score": 80, "feedback": ["Clear path from entry to common areas"]},
        })
    }

    #[test]
    fn accepts_well_formed_payload_unchanged() {
        let raw = sample();
        let result = validate(&raw).unwrap();
        assert_eq!(result.layout().score.as_u64(), Some(72));
        assert_eq!(
            result.layout().feedback,
            vec!["Open kitchen merges into living space".to_string()]
        );
        assert_eq!(result.lighting().score.as_u64(), Some(55));
        assert_eq!(result.flow().score.as_u64(), Some(80));
        assert_eq!(result.raw(), &raw);
    }

    #[test]
    fn rejects_missing_dimension_regardless_of_others() {
        let raw = json!({
            "layout": {"score": 72, "feedback": []},
            "lighting": {"score": 55, "feedback": ["ok"]},
        });
        assert_eq!(
            validate(&raw).unwrap_err(),
            ValidationError::MissingDimension("flow")
        );
    }

    #[test]
    fn rejects_every_missing_key_and_null_section() {
        for kind in DimensionKind::ALL {
            let mut raw = sample();
            raw.as_object_mut().unwrap().remove(kind.key());
            assert_eq!(
                validate(&raw).unwrap_err(),
                ValidationError::MissingDimension(kind.key())
            );

            let mut raw = sample();
            raw[kind.key()] = Value::Null;
            assert_eq!(
                validate(&raw).unwrap_err(),
                ValidationError::MissingDimension(kind.key())
            );
        }
    }

    #[test]
    fn rejects_non_numeric_scores() {
        for bad in [json!("72"), Value::Null, json!(true), json!([72])] {
            let mut raw = sample();
            raw["lighting"]["score"] = bad;
            assert_eq!(
                validate(&raw).unwrap_err(),
                ValidationError::ScoreNotNumeric("lighting")
            );
        }
        let mut raw = sample();
        raw["flow"].as_object_mut().unwrap().remove("score");
        assert_eq!(
            validate(&raw).unwrap_err(),
            ValidationError::ScoreNotNumeric("flow")
        );
    }

    #[test]
    fn rejects_feedback_that_is_not_a_list() {
        for bad in [json!("Open kitchen"), json!({"0": "a"}), Value::Null] {
            let mut raw = sample();
            raw["layout"]["feedback"] = bad;
            assert_eq!(
                validate(&raw).unwrap_err(),
                ValidationError::FeedbackNotSequence("layout")
            );
        }
    }

    #[test]
    fn rejects_non_object_payloads() {
        for raw in [json!([]), json!("analysis"), json!(3), Value::Null] {
            assert!(matches!(
                validate(&raw),
                Err(ValidationError::NotAnObject { .. })
            ));
        }
        let mut raw = sample();
        raw["flow"] = json!([80, ["fine"]]);
        assert_eq!(
            validate(&raw).unwrap_err(),
            ValidationError::NotAnObject {
                path: "flow".to_string()
            }
        );
    }

    #[test]
    fn shape_only_no_range_or_emptiness_checks() {
        let raw = json!({
            "layout": {"score": 140, "feedback": []},
            "lighting": {"score": -3.5, "feedback": [null, 7, "ok"]},
            "flow": {"score": 0, "feedback": [], "notes": "extra"},
            "summary": "extra fields are ignored",
        });
        let result = validate(&raw).unwrap();
        assert!(result.layout().feedback.is_empty());
        assert_eq!(result.lighting().feedback, vec!["", "7", "ok"]);
        assert_eq!(result.raw()["summary"], json!("extra fields are ignored"));
    }

    #[test]
    fn from_json_str_reports_malformed_json() {
        assert!(matches!(
            AnalysisResult::from_json_str("{not json"),
            Err(ValidationError::MalformedJson(_))
        ));
        assert!(AnalysisResult::from_json_str(&sample().to_string()).is_ok());
    }

    #[test]
    fn serde_round_trip_goes_through_the_validator() {
        let result = validate(&sample()).unwrap();
        let encoded = serde_json::to_value(&result).unwrap();
        assert_eq!(encoded, sample());

        let rejected = serde_json::from_value::<AnalysisResult>(json!({"layout": {}}));
        assert!(rejected.is_err());
    }

    #[test]
    fn score_bands_follow_badge_thresholds() {
        assert_eq!(ScoreBand::for_score(80.0), ScoreBand::Strong);
        assert_eq!(ScoreBand::for_score(79.9), ScoreBand::Fair);
        assert_eq!(ScoreBand::for_score(60.0), ScoreBand::Fair);
        assert_eq!(ScoreBand::for_score(59.0), ScoreBand::Weak);
        let result = validate(&sample()).unwrap();
        assert_eq!(result.dimension(DimensionKind::Flow).band(), ScoreBand::Strong);
        assert_eq!(result.lighting().band().label(), "weak");
    }
}
