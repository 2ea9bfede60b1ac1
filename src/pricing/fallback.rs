//! Hardcoded fallback rates and model-id normalisation.
//!
//! Used when neither a cache nor the network can supply a rate table.
//! Rates are USD per million tokens.

use super::ModelRates;

/// Model whose rates apply to unknown ids.
pub const BASELINE_MODEL: &str = "claude-sonnet-4-5-20250929";

const SONNET: ModelRates = ModelRates {
    input_rate: 3.00,
    output_rate: 15.00,
    cache_write_rate: 3.75,
    cache_read_rate: 0.30,
};

const OPUS_4: ModelRates = ModelRates {
    input_rate: 15.00,
    output_rate: 75.00,
    cache_write_rate: 18.75,
    cache_read_rate: 1.50,
};

const FALLBACK_PRICING: &[(&str, ModelRates)] = &[
    (BASELINE_MODEL, SONNET),
    ("claude-sonnet-4-20250514", SONNET),
    ("claude-3-5-sonnet-20241022", SONNET),
    (
        "claude-opus-4-5-20251101",
        ModelRates {
            input_rate: 5.00,
            output_rate: 25.00,
            cache_write_rate: 6.25,
            cache_read_rate: 0.50,
        },
    ),
    ("claude-opus-4-1-20250805", OPUS_4),
    ("claude-opus-4-20250514", OPUS_4),
    (
        "claude-haiku-4-5-20251001",
        ModelRates {
            input_rate: 1.00,
            output_rate: 5.00,
            cache_write_rate: 1.25,
            cache_read_rate: 0.10,
        },
    ),
    (
        "claude-3-5-haiku-20241022",
        ModelRates {
            input_rate: 0.80,
            output_rate: 4.00,
            cache_write_rate: 1.00,
            cache_read_rate: 0.08,
        },
    ),
];

const PROVIDER_PREFIXES: &[&str] = &[
    "us.anthropic.",
    "eu.anthropic.",
    "apac.anthropic.",
    "global.anthropic.",
    "anthropic.",
];

fn lookup(model: &str) -> Option<ModelRates> {
    FALLBACK_PRICING
        .iter()
        .find(|(id, _)| *id == model)
        .map(|(_, rates)| *rates)
}

/// Fallback rates: exact id, then normalised base id, then the baseline.
pub fn fallback_rates(model: &str) -> ModelRates {
    if let Some(rates) = lookup(model) {
        return rates;
    }
    let base = base_model_name(model);
    if let Some(rates) = lookup(&base) {
        return rates;
    }
    tracing::warn!(
        model,
        baseline = BASELINE_MODEL,
        "unknown model for fallback pricing, using baseline rates"
    );
    SONNET
}

/// Strip a trailing context-window marker such as `[1m]`.
pub fn strip_context_suffix(model: &str) -> &str {
    let trimmed = model.trim();
    match trimmed.rfind('[') {
        Some(idx) if trimmed.ends_with(']') => &trimmed[..idx],
        _ => trimmed,
    }
}

/// Reduce a provider-specific model id to its base name.
///
/// `us.anthropic.claude-sonnet-4-5-20250929-v1:0[1m]` -> `claude-sonnet-4-5-20250929`
pub fn base_model_name(model: &str) -> String {
    let mut base = strip_context_suffix(model);
    if let Some(rest) = base.strip_prefix("bedrock/") {
        base = rest;
    }
    for prefix in PROVIDER_PREFIXES {
        if let Some(rest) = base.strip_prefix(prefix) {
            base = rest;
            break;
        }
    }
    strip_version_suffix(base).to_string()
}

// `-v1`, `-v1:0`, `-v2:1` ...
fn strip_version_suffix(model: &str) -> &str {
    if let Some(idx) = model.rfind("-v") {
        let tail = &model[idx + 2..];
        let starts_with_digit = tail.chars().next().is_some_and(|c| c.is_ascii_digit());
        if starts_with_digit && tail.chars().all(|c| c.is_ascii_digit() || c == ':') {
            return &model[..idx];
        }
    }
    model
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_model_name() {
        assert_eq!(
            base_model_name("us.anthropic.claude-sonnet-4-5-20250929-v1:0"),
            "claude-sonnet-4-5-20250929"
        );
        assert_eq!(
            base_model_name("anthropic.claude-3-5-haiku-20241022-v1:0"),
            "claude-3-5-haiku-20241022"
        );
        assert_eq!(
            base_model_name("claude-sonnet-4-5-20250929[1m]"),
            "claude-sonnet-4-5-20250929"
        );
        assert_eq!(
            base_model_name("bedrock/global.anthropic.claude-opus-4-5-20251101-v1:0"),
            "claude-opus-4-5-20251101"
        );
        assert_eq!(base_model_name("claude-haiku-4-5"), "claude-haiku-4-5");
    }

    #[test]
    fn test_variants_resolve_to_identical_rates() {
        let plain = fallback_rates("claude-sonnet-4-5-20250929");
        let bedrock = fallback_rates("us.anthropic.claude-sonnet-4-5-20250929-v1:0");
        let plain_1m = fallback_rates("claude-sonnet-4-5-20250929[1m]");
        let bedrock_1m = fallback_rates("us.anthropic.claude-sonnet-4-5-20250929-v1:0[1m]");
        assert_eq!(plain, bedrock);
        assert_eq!(plain, plain_1m);
        assert_eq!(plain, bedrock_1m);
        assert_eq!(plain.input_rate, 3.0);
        assert_eq!(plain.output_rate, 15.0);
    }

    #[test]
    fn test_known_model_rates() {
        let haiku = fallback_rates("eu.anthropic.claude-haiku-4-5-20251001-v1:0");
        assert_eq!(haiku.input_rate, 1.0);
        assert_eq!(haiku.cache_read_rate, 0.10);

        let opus = fallback_rates("claude-opus-4-20250514");
        assert_eq!(opus.output_rate, 75.0);
    }

    #[test]
    fn test_unknown_model_uses_baseline() {
        let rates = fallback_rates("gpt-something");
        assert_eq!(rates, fallback_rates(BASELINE_MODEL));
    }
}
