use crate::transforms::{BodyTransform, ChatCompletionBody, CompletionParams};

/// Copies caller-level parameters into the body, overwriting any value the
/// client sent.
pub struct InjectParamsTransform;

impl BodyTransform for InjectParamsTransform {
    fn type_id(&self) -> &'static str {
        "inject_params"
    }

    fn apply(&self, body: &mut ChatCompletionBody, params: &CompletionParams) {
        if let Some(effort) = params.reasoning_effort {
            body.set("reasoning_effort", effort.as_str());
        }
        if let Some(tier) = params.service_tier {
            body.set("service_tier", tier.as_str());
        }
        if let Some(verbosity) = params.verbosity {
            body.set("verbosity", verbosity.as_str());
        }
    }
}
