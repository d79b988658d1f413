// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Bidirectional string <-> audience tuple encoding (spec §4.C).
//!
//! The encoded form is also used as the registry's map key, so encoding
//! must be stable and collision-free across the fields that make up an
//! audience.

use crate::proto::{Audience, OperationType};

/// Encode an audience as `service.component.<op_type_int>.operation`.
pub fn encode(aud: &Audience) -> String {
    format!(
        "{}.{}.{}.{}",
        aud.service_name,
        aud.component_name,
        aud.operation_type,
        aud.operation_name,
    )
}

/// Decode a string produced by [`encode`] back into an [`Audience`].
///
/// Returns `None` if the string does not split into exactly four
/// `.`-separated fields.
pub fn decode(s: &str) -> Option<Audience> {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 4 {
        return None;
    }

    let operation_type = match parts[2] {
        "2" => OperationType::Producer,
        "1" => OperationType::Consumer,
        _ => OperationType::Unset,
    };

    Some(Audience {
        service_name: parts[0].to_string(),
        component_name: parts[1].to_string(),
        operation_name: parts[3].to_string(),
        operation_type: operation_type as i32,
    })
}

/// `PRODUCER -> "producer"`, anything else (including `UNSET`) ->
/// `"consumer"`. The `UNSET` mapping is intentional defaulting, carried
/// over from the source implementation verbatim (spec §4.C).
pub fn op_to_string(op: OperationType) -> &'static str {
    match op {
        OperationType::Producer => "producer",
        _ => "consumer",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aud() -> Audience {
        Audience {
            service_name: "testing".to_string(),
            component_name: "kafka".to_string(),
            operation_name: "test-topic".to_string(),
            operation_type: OperationType::Producer as i32,
        }
    }

    #[test]
    fn encode_matches_spec_example() {
        assert_eq!(encode(&aud()), "testing.kafka.2.test-topic");
    }

    #[test]
    fn round_trip() {
        let original = aud();
        let decoded = decode(&encode(&original)).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn decode_rejects_malformed_strings() {
        assert!(decode("too.few.fields").is_none());
        assert!(decode("way.too.many.fields.here").is_none());
    }

    #[test]
    fn op_to_string_matches_spec() {
        assert_eq!(op_to_string(OperationType::Producer), "producer");
        assert_eq!(op_to_string(OperationType::Consumer), "consumer");
        assert_eq!(op_to_string(OperationType::Unset), "consumer");
    }
}
