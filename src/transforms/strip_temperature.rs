use crate::transforms::{BodyTransform, ChatCompletionBody, CompletionParams};
use regex::Regex;

/// One named model family, identified by a regex over the model id.
#[derive(Debug, Clone)]
pub struct ModelFamilyRule {
    pub name: &'static str,
    pattern: Regex,
}

impl ModelFamilyRule {
    pub fn new(name: &'static str, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn matches(&self, model: &str) -> bool {
        self.pattern.is_match(model)
    }
}

/// Families that reject `temperature`, checked in order.
pub fn reasoning_model_rules() -> Result<Vec<ModelFamilyRule>, regex::Error> {
    Ok(vec![
        ModelFamilyRule::new("o-series", r"^o\d+")?,
        ModelFamilyRule::new("gpt-5", r"^gpt-5(?:-(?:mini|nano|codex))?(?:-[\d-]+)?$")?,
    ])
}

pub struct StripTemperatureTransform {
    rules: Vec<ModelFamilyRule>,
}

impl StripTemperatureTransform {
    pub fn new(rules: Vec<ModelFamilyRule>) -> Self {
        Self { rules }
    }

    pub fn with_reasoning_models() -> Result<Self, regex::Error> {
        Ok(Self::new(reasoning_model_rules()?))
    }

    pub fn matching_family(&self, model: &str) -> Option<&'static str> {
        self.rules
            .iter()
            .find(|rule| rule.matches(model))
            .map(|rule| rule.name)
    }
}

impl BodyTransform for StripTemperatureTransform {
    fn type_id(&self) -> &'static str {
        "strip_temperature"
    }

    fn apply(&self, body: &mut ChatCompletionBody, _params: &CompletionParams) {
        if body.temperature().is_none() {
            return;
        }
        let Some(model) = body.model() else {
            return;
        };
        if let Some(family) = self.matching_family(model) {
            tracing::debug!(model, family, "removing temperature for reasoning model");
            body.remove("temperature");
        }
    }
}
