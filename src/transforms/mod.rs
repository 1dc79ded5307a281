use crate::error::{AppError, AppResult};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub mod inject_params;
pub mod strip_temperature;

pub use inject_params::InjectParamsTransform;
pub use strip_temperature::{ModelFamilyRule, StripTemperatureTransform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceTier {
    Auto,
    Default,
    Flex,
    Priority,
}

impl ServiceTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Default => "default",
            Self::Flex => "flex",
            Self::Priority => "priority",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    Low,
    Medium,
    High,
}

impl Verbosity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Caller-level overrides passed outside the body (query string).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct CompletionParams {
    #[serde(default, deserialize_with = "empty_as_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub service_tier: Option<ServiceTier>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub verbosity: Option<Verbosity>,
}

fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    use serde::de::IntoDeserializer;

    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => {
            let de: serde::de::value::StrDeserializer<'_, D::Error> = value.into_deserializer();
            T::deserialize(de).map(Some)
        }
    }
}

/// Request body kept as an insertion-ordered JSON object. Only the keys the
/// transforms know about are touched; everything else is forwarded as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ChatCompletionBody(Map<String, Value>);

impl ChatCompletionBody {
    pub fn parse(raw: &[u8]) -> AppResult<Self> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|err| AppError::invalid_body(format!("{:?}", err.classify()), err))?;
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(AppError::invalid_body(
                "Data",
                "request body must be a JSON object",
            )),
        }
    }

    pub fn model(&self) -> Option<&str> {
        self.0.get("model").and_then(|v| v.as_str())
    }

    /// Only a literal `true` counts.
    pub fn is_stream(&self) -> bool {
        matches!(self.0.get("stream"), Some(Value::Bool(true)))
    }

    pub fn temperature(&self) -> Option<&Value> {
        self.0.get("temperature")
    }

    /// Overwrites in place when the key exists, appends otherwise.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }
}

pub trait BodyTransform: Send + Sync + 'static {
    fn type_id(&self) -> &'static str;
    fn apply(&self, body: &mut ChatCompletionBody, params: &CompletionParams);
}

/// Validates the inbound body and runs the transform pipeline over it in order.
pub struct RequestTransformer {
    transforms: Vec<Box<dyn BodyTransform>>,
}

impl RequestTransformer {
    pub fn new(transforms: Vec<Box<dyn BodyTransform>>) -> Self {
        Self { transforms }
    }

    pub fn with_defaults() -> Result<Self, regex::Error> {
        Ok(Self::new(vec![
            Box::new(StripTemperatureTransform::with_reasoning_models()?),
            Box::new(InjectParamsTransform),
        ]))
    }

    pub fn transform(&self, raw: &[u8], params: &CompletionParams) -> AppResult<ChatCompletionBody> {
        let mut body = ChatCompletionBody::parse(raw)?;
        if !body.is_stream() {
            return Err(AppError::non_streaming());
        }
        for transform in &self.transforms {
            transform.apply(&mut body, params);
            tracing::trace!(transform = transform.type_id(), "applied request transform");
        }
        Ok(body)
    }
}
