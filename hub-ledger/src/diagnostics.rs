//! Diagnostic dumps emitted alongside failures

use crate::hub::Hub;
use crate::index::InterestIndex;
use crate::premium;
use crate::spoke::Spoke;
use crate::types::{Entity, HasTotalDebt, LedgerAccount};
use crate::user::User;
use alloy_primitives::U256;
use serde_json::{json, Value};

/// Render `value` as a decimal with `decimals` fractional digits, trailing
/// zeros trimmed
pub fn format_units(value: U256, decimals: usize) -> String {
    let digits = value.to_string();
    if decimals == 0 {
        return digits;
    }

    let padded = format!("{:0>width$}", digits, width = decimals + 1);
    let (whole, fraction) = padded.split_at(padded.len() - decimals);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, fraction)
    }
}

fn render(result: crate::Result<U256>) -> Value {
    match result {
        Ok(value) => Value::String(value.to_string()),
        Err(err) => Value::String(format!("<{}>", err)),
    }
}

/// JSON view of one account valued at `index`
pub fn account_snapshot(entity: Entity, account: &LedgerAccount, index: &InterestIndex) -> Value {
    let debt = account.debt(index);
    json!({
        "entity": entity.to_string(),
        "drawn_shares": account.drawn_shares.to_string(),
        "ghost_drawn_shares": account.ghost_drawn_shares.to_string(),
        "offset": account.offset.to_string(),
        "accrued_premium": render(premium::accrued_premium(index, account)),
        "realised_premium": account.realised_premium.to_string(),
        "supplied_shares": account.supplied_shares.to_string(),
        "drawn_debt": render(debt.clone().map(|d| d.drawn_debt)),
        "premium_debt": render(debt.map(|d| d.premium_debt)),
    })
}

/// JSON view of the hub, including its own totals
pub fn hub_snapshot(hub: &Hub) -> Value {
    let mut snapshot = account_snapshot(Entity::Hub, &hub.account, &hub.index);
    if let Value::Object(fields) = &mut snapshot {
        fields.insert("liquidity".into(), Value::String(hub.liquidity.to_string()));
        fields.insert(
            "base_drawn_index".into(),
            Value::String(format_units(hub.base_drawn_index(), 27)),
        );
        fields.insert(
            "last_update_timestamp".into(),
            Value::from(hub.last_update_timestamp()),
        );
        fields.insert("total_supply_assets".into(), render(hub.total_supply_assets()));
        fields.insert("total_debt".into(), render(hub.total_debt(&hub.index)));
    }
    snapshot
}

/// Log the hub at error level
pub fn dump_hub(hub: &Hub) {
    tracing::error!(hub = %hub_snapshot(hub), "hub state");
}

/// Log a spoke and the hub at error level
pub fn dump_spoke(hub: &Hub, spoke: &Spoke) {
    let mut snapshot = account_snapshot(spoke.entity(), &spoke.account, &hub.index);
    if let Value::Object(fields) = &mut snapshot {
        fields.insert("users".into(), Value::from(spoke.users().len()));
    }
    tracing::error!(spoke = %snapshot, "spoke state");
    dump_hub(hub);
}

/// Log a user and its ancestors at error level
pub fn dump_user(hub: &Hub, spoke: &Spoke, user: &User) {
    let mut snapshot = account_snapshot(user.entity(), &user.account, &hub.index);
    if let Value::Object(fields) = &mut snapshot {
        fields.insert(
            "risk_premium".into(),
            Value::String(format!("{}%", format_units(user.risk_premium, 2))),
        );
    }
    tracing::error!(user = %snapshot, "user state");
    dump_spoke(hub, spoke);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(U256::from(1_500u64), 3), "1.5");
        assert_eq!(format_units(U256::from(7u64), 3), "0.007");
        assert_eq!(format_units(U256::from(2_000u64), 3), "2");
        assert_eq!(format_units(U256::from(42u64), 0), "42");
        assert_eq!(format_units(crate::math::RAY, 27), "1");
    }

    #[test]
    fn test_account_snapshot_fields() {
        let account = LedgerAccount {
            drawn_shares: U256::from(10u64),
            ghost_drawn_shares: U256::from(1u64),
            offset: U256::from(1u64),
            ..Default::default()
        };
        let snapshot = account_snapshot(
            Entity::User(UserId(3)),
            &account,
            &InterestIndex::new(),
        );
        assert_eq!(snapshot["entity"], "User 3");
        assert_eq!(snapshot["drawn_debt"], "10");
        assert_eq!(snapshot["premium_debt"], "0");
    }

    #[test]
    fn test_snapshot_reports_negative_premium() {
        let account = LedgerAccount {
            offset: U256::from(5u64),
            ..Default::default()
        };
        let snapshot = account_snapshot(Entity::Hub, &account, &InterestIndex::new());
        assert!(snapshot["accrued_premium"]
            .as_str()
            .unwrap()
            .starts_with("<Negative value"));
    }

    #[test]
    fn test_hub_snapshot_includes_liquidity() {
        let mut hub = Hub::new();
        hub.liquidity = U256::from(99u64);
        let snapshot = hub_snapshot(&hub);
        assert_eq!(snapshot["liquidity"], "99");
        assert_eq!(snapshot["base_drawn_index"], "1");
    }
}
