// src/pricing/mod.rs
// Pure cost arithmetic over the configured rate table. No I/O.

use std::collections::HashMap;

use crate::config::{ModelRates, Overlay};

/// Flat model-id -> rate-set mapping built once from the overlay. Model ids
/// live in a single namespace across providers; an unknown id prices at zero
/// so the surrounding flow still records the event instead of rejecting it.
#[derive(Debug, Clone, Default)]
pub struct PricingBook {
    rates: HashMap<String, ModelRates>,
}

fn round8(value: f64) -> f64 {
    (value * 1e8).round() / 1e8
}

impl PricingBook {
    pub fn from_overlay(overlay: &Overlay) -> Self {
        let mut rates = HashMap::new();
        for models in overlay.pricing.values() {
            for (model_id, model_rates) in models {
                rates.insert(model_id.clone(), *model_rates);
            }
        }
        Self { rates }
    }

    #[cfg(test)]
    pub fn from_rates(rates: HashMap<String, ModelRates>) -> Self {
        Self { rates }
    }

    fn rates_for(&self, model_id: &str) -> ModelRates {
        self.rates.get(model_id).copied().unwrap_or_default()
    }

    /// Chat completion cost in USD, rounded to 8 decimal places.
    pub fn calculate_chat_cost(&self, model_id: &str, input_tokens: i64, output_tokens: i64) -> f64 {
        let rates = self.rates_for(model_id);
        round8(
            (input_tokens as f64 / 1_000_000.0) * rates.input
                + (output_tokens as f64 / 1_000_000.0) * rates.output,
        )
    }

    pub fn calculate_embedding_cost(&self, model_id: &str, token_count: i64) -> f64 {
        let rates = self.rates_for(model_id);
        round8((token_count as f64 / 1_000_000.0) * rates.input)
    }

    pub fn calculate_stt_cost(&self, model_id: &str, audio_minutes: f64) -> f64 {
        let rates = self.rates_for(model_id);
        round8(audio_minutes * rates.per_minute)
    }

    pub fn calculate_tts_cost(&self, model_id: &str, character_count: i64) -> f64 {
        let rates = self.rates_for(model_id);
        round8((character_count as f64 / 1_000_000.0) * rates.per_million_chars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> PricingBook {
        let mut rates = HashMap::new();
        rates.insert(
            "gpt-4o".to_string(),
            ModelRates {
                input: 2.50,
                output: 10.00,
                ..Default::default()
            },
        );
        rates.insert(
            "text-embedding-3-small".to_string(),
            ModelRates {
                input: 0.02,
                ..Default::default()
            },
        );
        rates.insert(
            "whisper-1".to_string(),
            ModelRates {
                per_minute: 0.006,
                ..Default::default()
            },
        );
        rates.insert(
            "tts-1".to_string(),
            ModelRates {
                per_million_chars: 15.0,
                ..Default::default()
            },
        );
        PricingBook::from_rates(rates)
    }

    #[test]
    fn chat_cost_gpt4o() {
        // 1000/1M * 2.50 + 500/1M * 10.00 = 0.0025 + 0.005
        let cost = book().calculate_chat_cost("gpt-4o", 1000, 500);
        assert!((cost - 0.0075).abs() < 1e-9);
    }

    #[test]
    fn chat_cost_unknown_model_is_zero() {
        assert_eq!(book().calculate_chat_cost("unknown-model", 1000, 500), 0.0);
    }

    #[test]
    fn chat_cost_rounds_to_eight_decimals() {
        // 1/1M * 2.50 = 0.0000025 exactly; 3 input tokens exercise rounding
        let cost = book().calculate_chat_cost("gpt-4o", 3, 0);
        assert_eq!(cost, 0.0000075);
    }

    #[test]
    fn embedding_cost() {
        let cost = book().calculate_embedding_cost("text-embedding-3-small", 10_000);
        assert!((cost - 0.0002).abs() < 1e-9);
    }

    #[test]
    fn stt_cost_per_minute() {
        let cost = book().calculate_stt_cost("whisper-1", 1.0);
        assert!((cost - 0.006).abs() < 1e-9);
    }

    #[test]
    fn tts_cost_per_million_chars() {
        let cost = book().calculate_tts_cost("tts-1", 1000);
        assert!((cost - 0.015).abs() < 1e-9);
    }
}
