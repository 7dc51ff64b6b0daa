// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{self, Display};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Kind of cache mutation carried by an [`InvalidationMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// A key was written.
    Set,
    /// A key was deleted.
    Delete,
    /// The whole cache was cleared.
    Clear,
    /// Keys with a prefix were invalidated.
    InvalidatePattern,
    /// Entries with a tag were invalidated.
    InvalidateTag,
}

impl Action {
    /// Wire name of the action.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Delete => "delete",
            Self::Clear => "clear",
            Self::InvalidatePattern => "invalidate_pattern",
            Self::InvalidateTag => "invalidate_tag",
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cache mutation as it travels between nodes.
///
/// Serialized as JSON with camel-case field names. Absent optional fields are omitted, and the
/// payload is base64 encoded with the standard alphabet:
///
/// ```json
/// {"action":"set","key":"user:1","originId":"9f0c...","timestamp":1700000000000000,"payload":"MQ=="}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationMessage {
    /// What happened.
    pub action: Action,
    /// Affected key, for `set` and `delete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Key prefix, for `invalidate_pattern`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Tag, for `invalidate_tag`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Identity of the node that made the change.
    pub origin_id: String,
    /// Microseconds since the UNIX epoch, strictly increasing per origin.
    pub timestamp: u64,
    /// JSON encoding of the written value, for replicated `set` messages.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_payload")]
    pub payload: Option<Vec<u8>>,
}

/// Identity of one message for duplicate suppression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Fingerprint {
    origin_id: String,
    timestamp: u64,
    action: Action,
    target: Option<String>,
}

impl InvalidationMessage {
    /// Encodes the message as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if encoding fails.
    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self).map(Bytes::from).map_err(Error::serialization)
    }

    /// Decodes and validates a message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] for malformed JSON, an undecodable payload, or a missing
    /// field the action requires.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let message: Self = serde_json::from_slice(bytes).map_err(Error::serialization)?;
        message.validate()?;
        Ok(message)
    }

    /// The key, pattern or tag the message is about, if any.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self.action {
            Action::Set | Action::Delete => self.key.as_deref(),
            Action::InvalidatePattern => self.pattern.as_deref(),
            Action::InvalidateTag => self.tag.as_deref(),
            Action::Clear => None,
        }
    }

    pub(crate) fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            origin_id: self.origin_id.clone(),
            timestamp: self.timestamp,
            action: self.action,
            target: self.target().map(str::to_owned),
        }
    }

    fn validate(&self) -> Result<()> {
        let missing = match self.action {
            Action::Set | Action::Delete if self.key.is_none() => Some("key"),
            Action::InvalidatePattern if self.pattern.is_none() => Some("pattern"),
            Action::InvalidateTag if self.tag.is_none() => Some("tag"),
            _ => None,
        };

        match missing {
            Some(field) => Err(Error::serialization(format!("`{}` message without `{field}`", self.action))),
            None => Ok(()),
        }
    }
}

mod base64_payload {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    #[expect(clippy::ref_option, reason = "signature required by serde's `with` attribute")]
    pub fn serialize<S: Serializer>(payload: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match payload {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| STANDARD.decode(encoded).map_err(D::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn delete(key: &str) -> InvalidationMessage {
        InvalidationMessage {
            action: Action::Delete,
            key: Some(key.to_string()),
            pattern: None,
            tag: None,
            origin_id: "node-a".to_string(),
            timestamp: 42,
            payload: None,
        }
    }

    #[test]
    fn wire_format_uses_camel_case_and_omits_absent_fields() {
        let bytes = delete("user:1").encode().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(
            value,
            json!({ "action": "delete", "key": "user:1", "originId": "node-a", "timestamp": 42 })
        );
    }

    #[test]
    fn payload_is_standard_base64() {
        let message = InvalidationMessage {
            action: Action::Set,
            payload: Some(b"{\"n\":1}".to_vec()),
            ..delete("k")
        };

        let value: Value = serde_json::from_slice(&message.encode().unwrap()).unwrap();

        assert_eq!(value["action"], "set");
        assert_eq!(value["payload"], "eyJuIjoxfQ==");
        assert_eq!(InvalidationMessage::decode(&message.encode().unwrap()).unwrap(), message);
    }

    #[test]
    fn decode_accepts_all_actions() {
        let pattern = br#"{"action":"invalidate_pattern","pattern":"user:","originId":"b","timestamp":1}"#;
        let tag = br#"{"action":"invalidate_tag","tag":"users","originId":"b","timestamp":2}"#;
        let clear = br#"{"action":"clear","originId":"b","timestamp":3}"#;

        assert_eq!(InvalidationMessage::decode(pattern).unwrap().target(), Some("user:"));
        assert_eq!(InvalidationMessage::decode(tag).unwrap().target(), Some("users"));
        assert_eq!(InvalidationMessage::decode(clear).unwrap().target(), None);
    }

    #[test]
    fn decode_rejects_malformed_input() {
        let cases: [&[u8]; 5] = [
            b"not json",
            br#"{"action":"explode","originId":"b","timestamp":1}"#,
            br#"{"action":"delete","originId":"b","timestamp":1}"#,
            br#"{"action":"delete","key":"k","timestamp":1}"#,
            br#"{"action":"set","key":"k","originId":"b","timestamp":1,"payload":"%%%"}"#,
        ];

        for case in cases {
            let error = InvalidationMessage::decode(case).unwrap_err();
            assert!(matches!(error, Error::Serialization(_)), "{}", String::from_utf8_lossy(case));
        }
    }

    #[test]
    fn fingerprint_ignores_payload() {
        let plain = InvalidationMessage {
            action: Action::Set,
            ..delete("k")
        };
        let with_payload = InvalidationMessage {
            payload: Some(vec![1, 2, 3]),
            ..plain.clone()
        };

        assert_eq!(plain.fingerprint(), with_payload.fingerprint());
        assert_ne!(plain.fingerprint(), delete("k").fingerprint());
    }
}
