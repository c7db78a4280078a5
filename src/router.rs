//! Provider ordering: which providers a generation call tries, and in what order.

use std::collections::HashSet;

use indexmap::IndexSet;

use crate::config::ClawmateConfig;
use crate::error::ClawmateError;

/// Compute the ordered, deduplicated list of providers to attempt.
///
/// An explicit provider goes first and is followed by the configured
/// fallback order. Without one, the default provider goes first; if fallback
/// is enabled with an empty order, every other available provider follows in
/// registry order. Fallback entries that are not available are skipped.
pub fn build_provider_order(
    explicit_provider: Option<&str>,
    config: &ClawmateConfig,
    available_providers: &[String],
) -> Result<Vec<String>, ClawmateError> {
    if available_providers.is_empty() {
        return Err(ClawmateError::NoProviderAvailable);
    }
    let available: HashSet<&str> = available_providers.iter().map(String::as_str).collect();

    let explicit_provider = explicit_provider.filter(|p| !p.is_empty());
    let (first, fallback_order): (&str, Vec<&str>) = match explicit_provider {
        Some(explicit) => {
            if !available.contains(explicit) {
                return Err(ClawmateError::ExplicitProviderUnavailable(explicit.to_string()));
            }
            (explicit, config.fallback.order.iter().map(String::as_str).collect())
        }
        None => {
            let default = config
                .default_provider
                .as_deref()
                .filter(|p| !p.is_empty())
                .ok_or(ClawmateError::DefaultProviderMissing)?;
            if !available.contains(default) {
                return Err(ClawmateError::DefaultProviderUnavailable(default.to_string()));
            }
            let order = if config.fallback.order.is_empty() {
                available_providers.iter().map(String::as_str).collect()
            } else {
                config.fallback.order.iter().map(String::as_str).collect()
            };
            (default, order)
        }
    };

    let mut order: IndexSet<&str> = IndexSet::new();
    order.insert(first);
    if config.fallback.enabled {
        order.extend(
            fallback_order
                .into_iter()
                .filter(|name| !name.is_empty() && available.contains(name)),
        );
    }

    Ok(order.into_iter().map(str::to_string).collect())
}
