//! Identifier and record-key helpers

use crate::error::{Result, WorkflowError};
use bech32::Bech32m;
use uuid7::uuid7;

pub const ORDER_PREFIX: &str = "order_";
pub const REQUEST_PREFIX: &str = "apr_";

// construct a time-ordered uuid then encode it with bech32m under the given prefix
pub fn new_id(prefix: &str) -> Result<String> {
    let hrp = bech32::Hrp::parse(prefix).map_err(|e| WorkflowError::Identifier(e.to_string()))?;
    bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .map_err(|e| WorkflowError::Identifier(e.to_string()))
}

/// Rows are keyed `tenant/id`, which keeps each tenant's rows under one prefix.
pub fn tenant_key(tenant_id: &str, id: &str) -> Vec<u8> {
    format!("{tenant_id}/{id}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_their_prefix_and_are_unique() {
        let a = new_id(ORDER_PREFIX).unwrap();
        let b = new_id(ORDER_PREFIX).unwrap();

        assert!(a.starts_with("order_1"));
        assert_ne!(a, b);
    }

    #[test]
    fn empty_prefix_is_rejected() {
        assert!(new_id("").is_err());
    }

    #[test]
    fn keys_are_scoped_by_tenant() {
        assert_eq!(tenant_key("acme", "order_1x"), b"acme/order_1x".to_vec());
    }
}
