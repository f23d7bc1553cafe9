use serde::{Serialize, Deserialize, Serializer, Deserializer};
use std::time::Duration;

/// Serializes Duration as seconds
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    duration.as_secs_f64().serialize(serializer)
}

/// Deserializes Duration from seconds
///
/// Negative or non-finite values are rejected instead of panicking inside
/// `Duration::from_secs_f64`.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json;

    #[derive(Serialize, Deserialize)]
    struct Test {
        #[serde(serialize_with = "serialize_duration")]
        #[serde(deserialize_with = "deserialize_duration")]
        cycle: Duration,
    }

    #[test]
    fn test_duration_serialization() {
        let original = Test {
            cycle: Duration::from_millis(1500),
        };

        let serialized = serde_json::to_string(&original).unwrap();
        assert_eq!(serialized, r#"{"cycle":1.5}"#);
        let deserialized: Test = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.cycle, original.cycle);
    }

    #[test]
    fn test_negative_duration_rejected() {
        let parsed: Result<Test, _> = serde_json::from_str(r#"{"cycle":-1.0}"#);
        assert!(parsed.is_err());
    }
}
