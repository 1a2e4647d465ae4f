//! Serde helpers that keep non-finite floats readable in JSON
//!
//! `serde_json` writes NaN and infinities as `null`, which then fails to
//! read back into `f64`. Fields routed through these helpers write them as
//! the strings `"NaN"`, `"inf"` and `"-inf"` instead. On input a bare `null`
//! is accepted as NaN so logs written without the helpers still load.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum JsonFloat {
    Number(f64),
    Text(String),
    Null,
}

impl JsonFloat {
    fn encode(value: f64) -> Self {
        if value.is_finite() {
            JsonFloat::Number(value)
        } else if value.is_nan() {
            JsonFloat::Text("NaN".to_string())
        } else if value > 0.0 {
            JsonFloat::Text("inf".to_string())
        } else {
            JsonFloat::Text("-inf".to_string())
        }
    }

    fn decode(self) -> Result<f64, String> {
        match self {
            JsonFloat::Number(value) => Ok(value),
            JsonFloat::Null => Ok(f64::NAN),
            JsonFloat::Text(text) => match text.as_str() {
                "NaN" | "nan" => Ok(f64::NAN),
                "inf" | "+inf" | "Infinity" => Ok(f64::INFINITY),
                "-inf" | "-Infinity" => Ok(f64::NEG_INFINITY),
                other => Err(format!("expected a number, \"NaN\" or \"inf\", got \"{}\"", other)),
            },
        }
    }
}

pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    JsonFloat::encode(*value).serialize(serializer)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    JsonFloat::deserialize(deserializer)?.decode().map_err(D::Error::custom)
}

/// `Option<f64>` fields; `null` stays `None`
pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_some(&JsonFloat::encode(*value)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        Option::<JsonFloat>::deserialize(deserializer)?
            .map(|value| value.decode().map_err(D::Error::custom))
            .transpose()
    }
}

/// `Vec<f32>` fields such as traced model outputs
pub mod vec_f32 {
    use super::*;

    pub fn serialize<S: Serializer>(values: &[f32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|value| JsonFloat::encode(f64::from(*value))))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f32>, D::Error> {
        Vec::<JsonFloat>::deserialize(deserializer)?
            .into_iter()
            .map(|value| value.decode().map(|v| v as f32).map_err(D::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Sample {
        #[serde(with = "crate::util::json_float")]
        value: f64,
        #[serde(default, with = "crate::util::json_float::option")]
        maybe: Option<f64>,
        #[serde(with = "crate::util::json_float::vec_f32")]
        values: Vec<f32>,
    }

    #[test]
    fn test_non_finite_values_read_back() {
        let sample = Sample {
            value: f64::NEG_INFINITY,
            maybe: Some(f64::NAN),
            values: vec![0.25, f32::INFINITY, f32::NAN],
        };
        let json = serde_json::to_string(&sample).unwrap();
        assert!(!json.contains("null"));

        let back: Sample = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, f64::NEG_INFINITY);
        assert!(back.maybe.unwrap().is_nan());
        assert_eq!(back.values[0], 0.25);
        assert_eq!(back.values[1], f32::INFINITY);
        assert!(back.values[2].is_nan());
    }

    #[test]
    fn test_plain_numbers_and_nulls() {
        let back: Sample = serde_json::from_str(r#"{"value": 3, "maybe": null, "values": [1.5]}"#).unwrap();
        assert_eq!(back.value, 3.0);
        assert_eq!(back.maybe, None);
        assert_eq!(back.values, vec![1.5]);

        let missing: Sample = serde_json::from_str(r#"{"value": null, "values": []}"#).unwrap();
        assert!(missing.value.is_nan());
        assert_eq!(missing.maybe, None);
    }

    #[test]
    fn test_unknown_text_is_rejected() {
        assert!(serde_json::from_str::<Sample>(r#"{"value": "lots", "values": []}"#).is_err());
    }
}
