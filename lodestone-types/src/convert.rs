//! Conversions between domain types and wire messages.
//!
//! Presence of `value` and `hash` on the wire is load-bearing, so the
//! mapping to [`ValueBody`] is exact in both directions.

use crate::filter::{FilterError, FilterOperator, KeyFilters};
use crate::value::{Value, ValueBody};
use crate::wire::{WireFilterParams, WireValue};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("value for key carries neither payload nor hash nor ttl semantics")]
    MalformedValue,
    #[error(transparent)]
    Filter(#[from] FilterError),
}

impl From<Value> for WireValue {
    fn from(v: Value) -> Self {
        let (value, hash) = match v.body {
            ValueBody::Full { value, hash } => (Some(value), hash),
            ValueBody::HashOnly(h) => (None, Some(h)),
            ValueBody::TtlOnly => (None, None),
        };
        WireValue {
            version: v.version,
            originator_id: v.originator_id,
            value,
            ttl_ms: v.ttl_ms,
            ttl_version: v.ttl_version,
            hash,
        }
    }
}

impl From<WireValue> for Value {
    fn from(w: WireValue) -> Self {
        let body = match (w.value, w.hash) {
            (Some(value), hash) => ValueBody::Full { value, hash },
            (None, Some(h)) => ValueBody::HashOnly(h),
            (None, None) => ValueBody::TtlOnly,
        };
        Value {
            version: w.version,
            originator_id: w.originator_id,
            body,
            ttl_ms: w.ttl_ms,
            ttl_version: w.ttl_version,
        }
    }
}

impl From<FilterOperator> for i32 {
    fn from(op: FilterOperator) -> i32 {
        match op {
            FilterOperator::Or => 0,
            FilterOperator::And => 1,
        }
    }
}

impl TryFrom<&WireFilterParams> for KeyFilters {
    type Error = FilterError;

    fn try_from(params: &WireFilterParams) -> Result<Self, FilterError> {
        let operator = if params.operator == 1 {
            FilterOperator::And
        } else {
            FilterOperator::Or
        };
        KeyFilters::new(
            params.key_prefixes.clone(),
            params.originator_ids.iter().cloned(),
            operator,
        )
    }
}

impl KeyFilters {
    pub fn to_wire(&self) -> WireFilterParams {
        WireFilterParams {
            key_prefixes: self.key_prefixes().to_vec(),
            originator_ids: self.originator_ids().iter().cloned().collect(),
            operator: if self.key_prefixes().is_empty() && self.originator_ids().is_empty() {
                0
            } else {
                // operator only matters when criteria exist; preserved as-is
                i32::from(self.operator())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn full_value_round_trips_with_presence() {
        let v = Value::full(7, "node-a", b"payload".to_vec(), 30_000, 3);
        let wire = WireValue::from(v.clone());
        assert!(wire.value.is_some());
        assert!(wire.hash.is_some());

        let bytes = wire.encode_to_vec();
        let decoded = WireValue::decode(bytes.as_slice()).unwrap();
        assert_eq!(Value::from(decoded), v);
    }

    #[test]
    fn hash_only_round_trips_without_payload() {
        let v = Value::full(7, "node-a", b"payload".to_vec(), 30_000, 3)
            .to_hash_only()
            .unwrap();
        let wire = WireValue::from(v.clone());
        assert!(wire.value.is_none());
        assert!(wire.hash.is_some());
        let decoded = WireValue::decode(wire.encode_to_vec().as_slice()).unwrap();
        assert_eq!(Value::from(decoded), v);
    }

    #[test]
    fn ttl_only_round_trips_with_nothing() {
        let v = Value::ttl_only(7, "node-a", 30_000, 4);
        let wire = WireValue::from(v.clone());
        assert!(wire.value.is_none());
        assert!(wire.hash.is_none());
        let decoded = WireValue::decode(wire.encode_to_vec().as_slice()).unwrap();
        assert_eq!(Value::from(decoded), v);
    }

    #[test]
    fn full_without_stored_hash_keeps_hash_absent() {
        let v = Value {
            version: 1,
            originator_id: "a".into(),
            body: ValueBody::Full {
                value: b"x".to_vec(),
                hash: None,
            },
            ttl_ms: 1000,
            ttl_version: 0,
        };
        let wire = WireValue::from(v.clone());
        assert!(wire.hash.is_none());
        assert_eq!(Value::from(wire), v);
    }
}
