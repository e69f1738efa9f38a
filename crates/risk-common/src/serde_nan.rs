//! JSON-safe serialization for `Vec<f32>` containing NaN.
//!
//! serde_json cannot round-trip non-finite floats, and NaN is the missing /
//! indeterminate sentinel throughout the pipeline. Fields using this module
//! encode NaN as `null` and decode `null` back to NaN.

use serde::de::{Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};

pub fn serialize<S>(values: &[f32], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut seq = serializer.serialize_seq(Some(values.len()))?;
    for v in values {
        if v.is_finite() {
            seq.serialize_element(&Some(*v))?;
        } else {
            seq.serialize_element(&None::<f32>)?;
        }
    }
    seq.end()
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    struct NanVisitor;

    impl<'de> Visitor<'de> for NanVisitor {
        type Value = Vec<f32>;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a sequence of numbers or nulls")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(v) = seq.next_element::<Option<f32>>()? {
                out.push(v.unwrap_or(f32::NAN));
            }
            Ok(out)
        }
    }

    deserializer.deserialize_seq(NanVisitor)
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "super")]
        values: Vec<f32>,
    }

    #[test]
    fn test_nan_roundtrip() {
        let w = Wrapper {
            values: vec![1.0, f32::NAN, 3.5],
        };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"values":[1.0,null,3.5]}"#);

        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.values[0], 1.0);
        assert!(back.values[1].is_nan());
        assert_eq!(back.values[2], 3.5);
    }
}
