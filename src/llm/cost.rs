//! Cost calculation
//!
//! A static price table keyed by provider and model. Lookups return an
//! `Option`; the "unknown models are free" rule is applied in [`PriceTable::cost`]
//! so it lives in one place.

use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Per-1K-token prices for one model
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelPricing {
    pub input_price_per_1k: f64,
    pub output_price_per_1k: f64,
}

impl ModelPricing {
    pub fn new(input_price_per_1k: f64, output_price_per_1k: f64) -> Self {
        Self {
            input_price_per_1k,
            output_price_per_1k,
        }
    }

    pub fn cost_for(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = input_tokens as f64 / 1000.0 * self.input_price_per_1k;
        let output_cost = output_tokens as f64 / 1000.0 * self.output_price_per_1k;
        (input_cost + output_cost).max(0.0)
    }
}

/// One row of the table, as exposed over the pricing endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceTableEntry {
    pub provider: String,
    pub model: String,
    #[serde(flatten)]
    pub pricing: ModelPricing,
}

/// Immutable price table
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    provider_pricing: HashMap<String, HashMap<String, ModelPricing>>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The prices the service ships with.
    ///
    /// Hugging Face inference models have no entry and are therefore free.
    pub fn with_default_pricing() -> Self {
        Self::new()
            .with_entry("openai", "gpt-4o-mini", ModelPricing::new(0.00015, 0.0006))
            .with_entry("openai", "gpt-4o", ModelPricing::new(0.0025, 0.01))
            .with_entry("openai", "gpt-4-turbo", ModelPricing::new(0.01, 0.03))
            .with_entry("openai", "gpt-3.5-turbo", ModelPricing::new(0.0005, 0.0015))
    }

    pub fn with_entry(
        mut self,
        provider: impl Into<String>,
        model: impl Into<String>,
        pricing: ModelPricing,
    ) -> Self {
        self.provider_pricing
            .entry(provider.into())
            .or_default()
            .insert(model.into(), pricing);
        self
    }

    pub fn lookup(&self, provider: &str, model: &str) -> Option<ModelPricing> {
        self.provider_pricing
            .get(provider)
            .and_then(|models| models.get(model))
            .copied()
    }

    /// Cost of one call. Unknown (provider, model) pairs cost nothing.
    pub fn cost(&self, provider: &str, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        match self.lookup(provider, model) {
            Some(pricing) => pricing.cost_for(input_tokens, output_tokens),
            None => {
                debug!("No pricing for {}/{}, treating as free", provider, model);
                0.0
            }
        }
    }

    /// All entries, sorted by provider then model
    pub fn entries(&self) -> Vec<PriceTableEntry> {
        let mut entries: Vec<PriceTableEntry> = self
            .provider_pricing
            .iter()
            .flat_map(|(provider, models)| {
                models.iter().map(move |(model, pricing)| PriceTableEntry {
                    provider: provider.clone(),
                    model: model.clone(),
                    pricing: *pricing,
                })
            })
            .collect();

        entries.sort_by(|a, b| a.provider.cmp(&b.provider).then_with(|| a.model.cmp(&b.model)));
        entries
    }

    pub fn len(&self) -> usize {
        self.provider_pricing.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_tokens_cost_nothing() {
        let table = PriceTable::with_default_pricing();
        for entry in table.entries() {
            assert_eq!(table.cost(&entry.provider, &entry.model, 0, 0), 0.0);
        }
        assert_eq!(table.cost("huggingface", "anything", 0, 0), 0.0);
    }

    #[test]
    fn test_thousand_input_tokens_is_the_input_price() {
        let table = PriceTable::with_default_pricing();
        assert_eq!(table.cost("openai", "gpt-4o-mini", 1000, 0), 0.00015);
        assert_eq!(table.cost("openai", "gpt-4o-mini", 0, 1000), 0.0006);
    }

    #[test]
    fn test_unknown_model_is_free() {
        let table = PriceTable::with_default_pricing();
        assert!(table.lookup("openai", "gpt-unknown").is_none());
        assert_eq!(table.cost("openai", "gpt-unknown", 5000, 5000), 0.0);
        assert_eq!(
            table.cost("huggingface", "mistralai/Mistral-7B-Instruct-v0.2", 5000, 5000),
            0.0
        );
    }

    #[test]
    fn test_negative_prices_clamp_to_zero() {
        let table = PriceTable::new().with_entry("test", "refund", ModelPricing::new(-1.0, -1.0));
        assert_eq!(table.cost("test", "refund", 1000, 1000), 0.0);
    }

    #[test]
    fn test_entries_are_sorted() {
        let table = PriceTable::new()
            .with_entry("b", "z", ModelPricing::new(1.0, 1.0))
            .with_entry("a", "y", ModelPricing::new(1.0, 1.0))
            .with_entry("a", "x", ModelPricing::new(1.0, 1.0));

        let names: Vec<(String, String)> = table
            .entries()
            .into_iter()
            .map(|e| (e.provider, e.model))
            .collect();

        assert_eq!(
            names,
            vec![
                ("a".to_string(), "x".to_string()),
                ("a".to_string(), "y".to_string()),
                ("b".to_string(), "z".to_string()),
            ]
        );
        assert_eq!(table.len(), 3);
    }
}
