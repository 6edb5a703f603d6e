//! Reward value and description per category.

use loyalty_core::campaign::{RewardCategory, RewardType};

#[derive(Debug, Clone, PartialEq)]
pub struct Valuation {
    pub value: f64,
    pub description: String,
}

pub fn value_reward(reward_type: &RewardType, receipt_total: f64) -> Valuation {
    match reward_type.category {
        RewardCategory::Points => {
            let multiplier = reward_type.points_multiplier.unwrap_or(1.0);
            let points = (receipt_total * multiplier).floor().max(0.0);
            Valuation {
                value: points,
                description: format!("{points:.0} points"),
            }
        }
        RewardCategory::DiscountAmount => {
            let amount = reward_type.fixed_amount.unwrap_or(0.0);
            Valuation {
                value: amount,
                description: format!("{amount:.2} off your next visit"),
            }
        }
        RewardCategory::DiscountPercent => {
            let pct = reward_type.percentage.unwrap_or(0.0);
            let raw = receipt_total * pct / 100.0;
            let value = match reward_type.cap {
                Some(cap) => raw.min(cap),
                None => raw,
            };
            let value = round_cents(value);
            let description = match reward_type.cap {
                Some(cap) => format!("{pct}% off (up to {cap:.2})"),
                None => format!("{pct}% off"),
            };
            Valuation { value, description }
        }
        RewardCategory::FreeItem => Valuation {
            value: 0.0,
            description: format!(
                "Free {}",
                reward_type.description.as_deref().unwrap_or(&reward_type.name)
            ),
        },
        RewardCategory::Standard => Valuation {
            value: 0.0,
            description: reward_type
                .description
                .clone()
                .unwrap_or_else(|| reward_type.name.clone()),
        },
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
