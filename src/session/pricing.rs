//! Pricing presets and budget derivation for metered WebSocket sessions.
//! See spec §4.3.

use crate::types::{PricingModel, SessionLimits};

const MB: u64 = 1_024 * 1_024;

struct Preset {
    price_per_minute: f64,
    price_per_mb: f64,
    min_minutes: f64,
    min_mb: f64,
}

fn preset(model: PricingModel) -> Preset {
    match model {
        PricingModel::Time => Preset { price_per_minute: 0.001, price_per_mb: 0.0, min_minutes: 1.0, min_mb: 0.0 },
        PricingModel::Data => Preset { price_per_minute: 0.0, price_per_mb: 0.00012, min_minutes: 0.0, min_mb: 10.0 },
        PricingModel::Hybrid => Preset { price_per_minute: 0.0005, price_per_mb: 0.0001, min_minutes: 1.0, min_mb: 10.0 },
    }
}

/// `calculateSessionCost(model, minutes, megabytes)`.
pub fn calculate_session_cost(model: PricingModel, minutes: f64, megabytes: f64) -> f64 {
    let p = preset(model);
    let billed_minutes = minutes.max(p.min_minutes);
    let billed_mb = megabytes.max(p.min_mb);
    billed_minutes * p.price_per_minute + billed_mb * p.price_per_mb
}

/// Derives the (time, data) budget for a paid session.
///
/// For the `time` model, the data allowance is whatever the session's time
/// cost would have bought at the `data` model's per-MB rate, capped at
/// 500 MB.
pub fn derive_limits(model: PricingModel, minutes: f64, megabytes: f64) -> SessionLimits {
    match model {
        PricingModel::Time => {
            let capped_minutes = minutes.min(1440.0);
            let time_limit_ms = (capped_minutes * 60.0 * 1000.0) as u64;
            let cost = calculate_session_cost(PricingModel::Time, capped_minutes, 0.0);
            let data_price_per_mb = preset(PricingModel::Data).price_per_mb;
            let derived_cap_mb = if data_price_per_mb > 0.0 { cost / data_price_per_mb } else { 0.0 };
            let data_limit_bytes = (derived_cap_mb.min(500.0) * MB as f64) as u64;
            SessionLimits { time_limit_ms, data_limit_bytes }
        }
        PricingModel::Data => {
            let capped_mb = megabytes.min(10_240.0);
            SessionLimits {
                time_limit_ms: 24 * 3600 * 1000,
                data_limit_bytes: (capped_mb * MB as f64) as u64,
            }
        }
        PricingModel::Hybrid => {
            let capped_minutes = minutes.min(1440.0);
            let capped_mb = megabytes.min(10_240.0);
            SessionLimits {
                time_limit_ms: (capped_minutes * 60.0 * 1000.0) as u64,
                data_limit_bytes: (capped_mb * MB as f64) as u64,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_model_enforces_minimum_one_minute() {
        let cost = calculate_session_cost(PricingModel::Time, 0.1, 0.0);
        assert_eq!(cost, 0.001);
    }

    #[test]
    fn data_model_enforces_minimum_ten_mb() {
        let cost = calculate_session_cost(PricingModel::Data, 0.0, 1.0);
        assert!((cost - 10.0 * 0.00012).abs() < 1e-9);
    }

    #[test]
    fn hybrid_limits_cap_at_max_window() {
        let limits = derive_limits(PricingModel::Hybrid, 5000.0, 50_000.0);
        assert_eq!(limits.time_limit_ms, 1440 * 60 * 1000);
        assert_eq!(limits.data_limit_bytes, 10_240 * MB);
    }

    #[test]
    fn data_model_time_limit_is_24h() {
        let limits = derive_limits(PricingModel::Data, 0.0, 1.0);
        assert_eq!(limits.time_limit_ms, 24 * 3600 * 1000);
    }
}
