use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::analysis::{AnalysisResult, ValidationError};

pub const PLACEHOLDER_IMAGE: &str = "/placeholder.svg";
const RESULTS_PATH: &str = "analysis";
const RELATIVE_BASE: &str = "http://localhost/";

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("invalid results address: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("analysis payload could not be serialized: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Navigation state handed from a finished submission to the results view.
///
/// The analysis travels as the raw JSON text it arrived as; the receiving side
/// must run it through the validator again (see [`ResultsView::load`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsAddress {
    pub image_url: String,
    pub analysis_json: Option<String>,
}

impl ResultsAddress {
    pub fn new(image_url: impl Into<String>, raw_analysis: &Value) -> Result<Self, AddressError> {
        Ok(Self {
            image_url: image_url.into(),
            analysis_json: Some(serde_json::to_string(raw_analysis)?),
        })
    }

    /// Renders `{base}/analysis?image=..&analysis=..`.
    pub fn to_url(&self, base: &str) -> Result<String, AddressError> {
        let mut base = Url::parse(base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let mut url = base.join(RESULTS_PATH)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("image", &self.image_url);
            if let Some(analysis) = self.analysis_json.as_deref() {
                query.append_pair("analysis", analysis);
            }
        }
        Ok(url.to_string())
    }

    /// Accepts absolute addresses and path-only ones such as `/analysis?...`.
    pub fn parse(address: &str) -> Result<Self, AddressError> {
        let url = match Url::parse(address) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Url::parse(RELATIVE_BASE)?.join(address)?
            }
            Err(err) => return Err(err.into()),
        };
        let mut image_url = None;
        let mut analysis_json = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "image" => image_url = Some(value.into_owned()),
                "analysis" => analysis_json = Some(value.into_owned()),
                _ => {}
            }
        }
        Ok(Self {
            image_url: image_url
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| PLACEHOLDER_IMAGE.to_string()),
            analysis_json: analysis_json.filter(|value| !value.trim().is_empty()),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultsState {
    Ready(AnalysisResult),
    /// Terminal: the payload arrived but failed validation.
    Invalid(ValidationError),
    /// No analysis was carried at all.
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultsView {
    pub image_url: String,
    pub state: ResultsState,
}

impl ResultsView {
    pub fn load(address: &ResultsAddress) -> Self {
        let state = match address.analysis_json.as_deref() {
            None => ResultsState::Missing,
            Some(raw) => match AnalysisResult::from_json_str(raw) {
                Ok(result) => ResultsState::Ready(result),
                Err(err) => ResultsState::Invalid(err),
            },
        };
        Self {
            image_url: address.image_url.clone(),
            state,
        }
    }

    pub fn analysis(&self) -> Option<&AnalysisResult> {
        match &self.state {
            ResultsState::Ready(result) => Some(result),
            _ => None,
        }
    }
}
