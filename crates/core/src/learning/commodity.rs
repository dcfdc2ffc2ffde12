//! Commodity-by-temperature learning into customer cargo hints.

use super::types::{LearnableField, LearningEvent};
use crate::rules::{CargoHints, TemperatureCategory};

/// Category for a Fahrenheit reading, falling back to mode keywords.
pub fn temperature_category(fahrenheit: Option<f64>, mode: Option<&str>) -> Option<TemperatureCategory> {
    TemperatureCategory::classify(fahrenheit, mode)
}

/// Record the commodity of each `cargo_commodity` event under its
/// temperature category. A category that already has a commodity is never
/// overwritten. Returns the categories that were newly filled.
pub fn apply_commodity_learning(
    hints: &mut CargoHints,
    events: &[LearningEvent],
) -> Vec<TemperatureCategory> {
    let mut learned = Vec::new();
    for event in events {
        if event.field_type != LearnableField::CargoCommodity {
            continue;
        }
        let Some(commodity) = event.after_value.as_deref().map(str::trim).filter(|v| !v.is_empty())
        else {
            continue;
        };
        let Some(category) = temperature_category(
            event.context.temperature_value,
            event.context.temperature_mode.as_deref(),
        ) else {
            continue;
        };
        if hints.commodity_by_temp.contains_key(&category) {
            continue;
        }
        tracing::debug!(category = category.as_str(), commodity, "learned commodity");
        hints
            .commodity_by_temp
            .insert(category, commodity.to_string());
        learned.push(category);
    }
    learned
}
