//! Usage and cost accounting for LLM conversations.
//!
//! A conversation records every LLM call into a [`UsageTracker`]. At the end of
//! the session the tracker is frozen into a [`ChatCost`], which the task runner
//! hands to the [`UsageAccountant`] to obtain a single [`UsageRecord`] for the
//! run log. Extraction is best-effort: absent or partial data yields
//! [`UsageOutcome::NoData`], never an error.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::litellm::Usage;

/// Key under which a conversation's usage summary is published.
pub const USAGE_KEY: &str = "usage_including_cached_inference";

/// Key holding the aggregate cost inside a usage summary.
pub const TOTAL_COST_KEY: &str = "total_cost";

/// Label used for the record produced by [`ModelSelection::Aggregate`].
pub const AGGREGATE_MODEL_LABEL: &str = "aggregate";

/// Tokens per pricing unit (prices are quoted per one million tokens).
const TOKENS_PER_PRICE_UNIT: f64 = 1_000_000.0;

/// Price of a model in USD per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// USD per 1M prompt tokens.
    pub prompt_per_1m: f64,
    /// USD per 1M completion tokens.
    pub completion_per_1m: f64,
}

impl ModelPricing {
    pub fn new(prompt_per_1m: f64, completion_per_1m: f64) -> Self {
        Self {
            prompt_per_1m,
            completion_per_1m,
        }
    }
}

/// Price table used when the backend does not report a per-call cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTable {
    #[serde(flatten)]
    prices: HashMap<String, ModelPricing>,
}

impl Default for PriceTable {
    fn default() -> Self {
        let mut prices = HashMap::new();
        prices.insert("gpt-4o".to_string(), ModelPricing::new(2.5, 10.0));
        prices.insert("gpt-4o-mini".to_string(), ModelPricing::new(0.15, 0.6));
        Self { prices }
    }
}

impl PriceTable {
    /// An empty table: every call without a reported cost is free.
    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
        }
    }

    /// Add or replace the price of a model.
    pub fn with_price(mut self, model: impl Into<String>, pricing: ModelPricing) -> Self {
        self.prices.insert(model.into(), pricing);
        self
    }

    /// Look up a model, falling back to the part after a provider prefix
    /// (`openai/gpt-4o` is priced as `gpt-4o`).
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.prices.get(model).copied().or_else(|| {
            model
                .rsplit_once('/')
                .and_then(|(_, bare)| self.prices.get(bare).copied())
        })
    }

    /// Cost in USD of the given usage, or 0.0 for unknown models.
    pub fn cost_of(&self, model: &str, usage: &Usage) -> f64 {
        self.get(model)
            .map(|p| calculate_cost(usage.prompt_tokens, usage.completion_tokens, p))
            .unwrap_or(0.0)
    }
}

/// Calculate the cost in USD for a given token usage.
pub fn calculate_cost(prompt_tokens: u32, completion_tokens: u32, pricing: ModelPricing) -> f64 {
    (prompt_tokens as f64 / TOKENS_PER_PRICE_UNIT) * pricing.prompt_per_1m
        + (completion_tokens as f64 / TOKENS_PER_PRICE_UNIT) * pricing.completion_per_1m
}

/// Accumulated usage of one model within a conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub cached_tokens: u64,
}

impl ModelUsage {
    fn add(&mut self, usage: &Usage, cost: f64) {
        self.cost += cost;
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
        self.total_tokens += u64::from(usage.total_tokens);
        self.cached_tokens += u64::from(usage.cached_tokens);
    }

    fn merge(&mut self, other: &ModelUsage) {
        self.cost += other.cost;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.cached_tokens += other.cached_tokens;
    }
}

/// Per-model usage of a whole conversation, in first-use order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageSummary {
    pub total_cost: f64,
    pub models: Vec<(String, ModelUsage)>,
}

impl UsageSummary {
    /// Whether no model reported any usage.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn model(&self, name: &str) -> Option<&ModelUsage> {
        self.models.iter().find(|(m, _)| m == name).map(|(_, u)| u)
    }

    /// Render as `{"total_cost": f, "<model>": {...}, ...}`.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(TOTAL_COST_KEY.to_string(), Value::from(self.total_cost));
        for (model, usage) in &self.models {
            map.insert(
                model.clone(),
                serde_json::to_value(usage).unwrap_or(Value::Null),
            );
        }
        Value::Object(map)
    }
}

/// The usage/cost object returned by a conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatCost {
    /// `None` when the session made no LLM calls at all.
    pub usage_including_cached_inference: Option<UsageSummary>,
}

impl ChatCost {
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(summary) = &self.usage_including_cached_inference {
            map.insert(USAGE_KEY.to_string(), summary.to_value());
        }
        Value::Object(map)
    }
}

impl Serialize for ChatCost {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// Collects per-call usage during a conversation.
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    prices: PriceTable,
    models: Vec<(String, ModelUsage)>,
    calls: usize,
}

impl UsageTracker {
    pub fn new(prices: PriceTable) -> Self {
        Self {
            prices,
            models: Vec::new(),
            calls: 0,
        }
    }

    /// Record one LLM call. A backend-reported cost wins over the price table.
    pub fn record(&mut self, model: &str, usage: &Usage, reported_cost: Option<f64>) {
        let cost = reported_cost.unwrap_or_else(|| self.prices.cost_of(model, usage));
        match self.models.iter_mut().find(|(m, _)| m == model) {
            Some((_, entry)) => entry.add(usage, cost),
            None => {
                let mut entry = ModelUsage::default();
                entry.add(usage, cost);
                self.models.push((model.to_string(), entry));
            }
        }
        self.calls += 1;

        tracing::debug!(
            model = model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            cost = cost,
            "Recorded LLM usage"
        );
    }

    /// Number of calls recorded so far.
    pub fn call_count(&self) -> usize {
        self.calls
    }

    pub fn total_cost(&self) -> f64 {
        self.models.iter().map(|(_, u)| u.cost).sum()
    }

    /// Freeze the tracker into the conversation's cost object.
    pub fn finish(self) -> ChatCost {
        if self.models.is_empty() {
            return ChatCost::default();
        }
        let total_cost = self.total_cost();
        ChatCost {
            usage_including_cached_inference: Some(UsageSummary {
                total_cost,
                models: self.models,
            }),
        }
    }
}

/// Token/cost summary of one conversation, as written to the run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
}

/// Result of usage extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum UsageOutcome {
    Recorded(UsageRecord),
    /// No usable data; the string says why.
    NoData(String),
}

impl UsageOutcome {
    pub fn record(&self) -> Option<&UsageRecord> {
        match self {
            Self::Recorded(record) => Some(record),
            Self::NoData(_) => None,
        }
    }
}

/// Which model's figures represent a conversation that used several models.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSelection {
    /// The first model in iteration order.
    #[default]
    First,
    /// A specific model; no data if it was not used.
    Named(String),
    /// Sum over all models.
    Aggregate,
}

impl FromStr for ModelSelection {
    type Err = String;

    /// Accepts `first`, `aggregate` or `model:<name>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "first" => Ok(Self::First),
            "aggregate" => Ok(Self::Aggregate),
            other => match other.strip_prefix("model:") {
                Some(name) if !name.trim().is_empty() => Ok(Self::Named(name.trim().to_string())),
                _ => Err(format!(
                    "invalid model selection '{}': expected first, aggregate or model:<name>",
                    s
                )),
            },
        }
    }
}

impl fmt::Display for ModelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => write!(f, "first"),
            Self::Aggregate => write!(f, "aggregate"),
            Self::Named(name) => write!(f, "model:{}", name),
        }
    }
}

/// Extracts a [`UsageRecord`] from a conversation's cost object.
#[derive(Debug, Clone, Default)]
pub struct UsageAccountant {
    selection: ModelSelection,
}

impl UsageAccountant {
    pub fn new(selection: ModelSelection) -> Self {
        Self { selection }
    }

    pub fn selection(&self) -> &ModelSelection {
        &self.selection
    }

    /// Extract from a typed cost object.
    pub fn extract(&self, cost: &ChatCost) -> UsageOutcome {
        match &cost.usage_including_cached_inference {
            None => UsageOutcome::NoData(format!("missing '{}'", USAGE_KEY)),
            Some(summary) => self.select(summary),
        }
    }

    /// Extract from a raw JSON cost object, tolerating any shape.
    pub fn extract_value(&self, raw: &Value) -> UsageOutcome {
        let Some(usage) = raw.get(USAGE_KEY).and_then(Value::as_object) else {
            return UsageOutcome::NoData(format!("missing '{}'", USAGE_KEY));
        };

        let models: Vec<(String, ModelUsage)> = usage
            .iter()
            .filter(|(key, _)| key.as_str() != TOTAL_COST_KEY)
            .filter_map(|(model, data)| {
                serde_json::from_value::<ModelUsage>(data.clone())
                    .ok()
                    .map(|u| (model.clone(), u))
            })
            .collect();

        let total_cost = usage
            .get(TOTAL_COST_KEY)
            .and_then(Value::as_f64)
            .unwrap_or_else(|| models.iter().map(|(_, u)| u.cost).sum());

        self.select(&UsageSummary { total_cost, models })
    }

    fn select(&self, summary: &UsageSummary) -> UsageOutcome {
        if summary.is_empty() {
            return UsageOutcome::NoData("no model reported usage".to_string());
        }

        let (model, usage) = match &self.selection {
            ModelSelection::First => match summary.models.first() {
                Some((model, usage)) => (model.clone(), usage.clone()),
                None => return UsageOutcome::NoData("no model reported usage".to_string()),
            },
            ModelSelection::Named(name) => match summary.model(name) {
                Some(usage) => (name.clone(), usage.clone()),
                None => {
                    return UsageOutcome::NoData(format!("model '{}' reported no usage", name))
                }
            },
            ModelSelection::Aggregate => {
                let mut total = ModelUsage::default();
                for (_, usage) in &summary.models {
                    total.merge(usage);
                }
                (AGGREGATE_MODEL_LABEL.to_string(), total)
            }
        };

        UsageOutcome::Recorded(UsageRecord {
            model,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            total_cost: summary.total_cost,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: u32, completion: u32) -> Usage {
        Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
            cached_tokens: 0,
        }
    }

    #[test]
    fn test_calculate_cost() {
        // 1M prompt at $3/1M + 500K completion at $15/1M = $10.5
        let cost = calculate_cost(1_000_000, 500_000, ModelPricing::new(3.0, 15.0));
        assert!((cost - 10.5).abs() < 1e-9);
    }

    #[test]
    fn test_price_table_strips_provider_prefix() {
        let table = PriceTable::default();
        assert!(table.get("openai/gpt-4o").is_some());
        assert!(table.get("unknown-model").is_none());
        assert_eq!(table.cost_of("unknown-model", &usage(1000, 1000)), 0.0);
    }

    #[test]
    fn test_tracker_prefers_reported_cost() {
        let mut tracker = UsageTracker::new(PriceTable::default());
        tracker.record("gpt-4o", &usage(1_000_000, 0), Some(0.5));
        assert!((tracker.total_cost() - 0.5).abs() < 1e-9);

        tracker.record("gpt-4o", &usage(1_000_000, 0), None);
        assert!((tracker.total_cost() - 3.0).abs() < 1e-9);
        assert_eq!(tracker.call_count(), 2);
    }

    #[test]
    fn test_tracker_keeps_first_use_order() {
        let mut tracker = UsageTracker::new(PriceTable::empty());
        tracker.record("model-b", &usage(10, 5), None);
        tracker.record("model-a", &usage(20, 5), None);
        tracker.record("model-b", &usage(10, 5), None);

        let summary = tracker.finish().usage_including_cached_inference.unwrap();
        assert_eq!(summary.models[0].0, "model-b");
        assert_eq!(summary.models[0].1.total_tokens, 30);
        assert_eq!(summary.models[1].0, "model-a");
    }

    #[test]
    fn test_empty_tracker_has_no_usage_key() {
        let cost = UsageTracker::default().finish();
        assert!(cost.usage_including_cached_inference.is_none());
        assert_eq!(cost.to_value(), serde_json::json!({}));
    }

    #[test]
    fn test_extract_first_model_with_aggregate_cost() {
        let mut tracker = UsageTracker::new(PriceTable::empty());
        tracker.record("gpt-4o", &usage(100, 50), Some(0.01));
        tracker.record("gpt-4o-mini", &usage(10, 5), Some(0.002));

        let outcome = UsageAccountant::default().extract(&tracker.finish());
        let record = outcome.record().expect("usage recorded");
        assert_eq!(record.model, "gpt-4o");
        assert_eq!(record.total_tokens, 150);
        assert!((record.total_cost - 0.012).abs() < 1e-9);
    }

    #[test]
    fn test_extract_named_and_aggregate() {
        let mut tracker = UsageTracker::new(PriceTable::empty());
        tracker.record("gpt-4o", &usage(100, 50), None);
        tracker.record("gpt-4o-mini", &usage(10, 5), None);
        let cost = tracker.finish();

        let named = UsageAccountant::new(ModelSelection::Named("gpt-4o-mini".into()));
        assert_eq!(named.extract(&cost).record().unwrap().total_tokens, 15);

        let aggregate = UsageAccountant::new(ModelSelection::Aggregate);
        let record = aggregate.extract(&cost);
        assert_eq!(record.record().unwrap().model, AGGREGATE_MODEL_LABEL);
        assert_eq!(record.record().unwrap().total_tokens, 165);

        let missing = UsageAccountant::new(ModelSelection::Named("claude".into()));
        assert!(matches!(missing.extract(&cost), UsageOutcome::NoData(_)));
    }

    #[test]
    fn test_extract_missing_usage_is_no_data() {
        let accountant = UsageAccountant::default();
        assert!(matches!(
            accountant.extract(&ChatCost::default()),
            UsageOutcome::NoData(_)
        ));
        assert!(matches!(
            accountant.extract_value(&serde_json::json!({})),
            UsageOutcome::NoData(_)
        ));
        assert!(matches!(
            accountant.extract_value(&Value::Null),
            UsageOutcome::NoData(_)
        ));
    }

    #[test]
    fn test_extract_value_empty_model_map_is_no_data() {
        let raw = serde_json::json!({ USAGE_KEY: { "total_cost": 0.0 } });
        let outcome = UsageAccountant::default().extract_value(&raw);
        assert_eq!(
            outcome,
            UsageOutcome::NoData("no model reported usage".to_string())
        );
    }

    #[test]
    fn test_extract_value_partial_fields() {
        let raw = serde_json::json!({
            USAGE_KEY: {
                "gpt-4o": { "total_tokens": 1234, "cost": 0.05 },
                "broken": "not an object"
            }
        });
        let outcome = UsageAccountant::default().extract_value(&raw);
        let record = outcome.record().expect("usage recorded");
        assert_eq!(record.model, "gpt-4o");
        assert_eq!(record.total_tokens, 1234);
        assert_eq!(record.prompt_tokens, 0);
        assert!((record.total_cost - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_chat_cost_round_trips_through_raw_extraction() {
        let mut tracker = UsageTracker::new(PriceTable::empty());
        tracker.record("gpt-4o", &usage(40, 2), Some(0.25));
        let cost = tracker.finish();

        let accountant = UsageAccountant::default();
        assert_eq!(accountant.extract(&cost), accountant.extract_value(&cost.to_value()));
    }

    #[test]
    fn test_model_selection_parse() {
        assert_eq!("first".parse::<ModelSelection>(), Ok(ModelSelection::First));
        assert_eq!(
            "aggregate".parse::<ModelSelection>(),
            Ok(ModelSelection::Aggregate)
        );
        assert_eq!(
            "model:gpt-4o".parse::<ModelSelection>(),
            Ok(ModelSelection::Named("gpt-4o".into()))
        );
        assert!("model:".parse::<ModelSelection>().is_err());
        assert!("last".parse::<ModelSelection>().is_err());
        assert_eq!(ModelSelection::Named("x".into()).to_string(), "model:x");
    }
}
