use std::collections::BTreeMap;

use rhai::{Array, Dynamic, ImmutableString, Map, FLOAT, INT};
use sf_core::{StoryForgeError, StoryValue};

const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

pub(crate) fn value_to_dynamic(value: &StoryValue) -> Dynamic {
    match value {
        StoryValue::Null => Dynamic::UNIT,
        StoryValue::Bool(value) => Dynamic::from_bool(*value),
        StoryValue::Number(value) => {
            if value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER {
                Dynamic::from_int(*value as INT)
            } else {
                Dynamic::from_float(*value as FLOAT)
            }
        }
        StoryValue::String(value) => Dynamic::from(value.clone()),
        StoryValue::Array(values) => {
            Dynamic::from_array(values.iter().map(value_to_dynamic).collect::<Array>())
        }
        StoryValue::Map(values) => {
            let mut map = Map::new();
            for (key, value) in values {
                map.insert(key.as_str().into(), value_to_dynamic(value));
            }
            Dynamic::from_map(map)
        }
    }
}

pub(crate) fn dynamic_to_value(value: Dynamic) -> Result<StoryValue, StoryForgeError> {
    if value.is_unit() {
        return Ok(StoryValue::Null);
    }
    if value.is::<bool>() {
        return Ok(StoryValue::Bool(value.cast::<bool>()));
    }
    if value.is::<INT>() {
        return Ok(StoryValue::Number(value.cast::<INT>() as f64));
    }
    if value.is::<FLOAT>() {
        return Ok(StoryValue::Number(value.cast::<FLOAT>()));
    }
    if value.is::<ImmutableString>() {
        return Ok(StoryValue::String(value.cast::<ImmutableString>().to_string()));
    }
    if value.is::<char>() {
        return Ok(StoryValue::String(value.cast::<char>().to_string()));
    }
    if value.is::<Array>() {
        let array = value.cast::<Array>();
        let mut out = Vec::with_capacity(array.len());
        for item in array {
            out.push(dynamic_to_value(item)?);
        }
        return Ok(StoryValue::Array(out));
    }
    if value.is::<Map>() {
        let map = value.cast::<Map>();
        let mut out = BTreeMap::new();
        for (key, value) in map {
            out.insert(key.to_string(), dynamic_to_value(value)?);
        }
        return Ok(StoryValue::Map(out));
    }

    Err(StoryForgeError::new(
        "SCRIPT_VALUE_UNSUPPORTED",
        format!("Script value of type {} cannot be stored.", value.type_name()),
    ))
}

#[cfg(test)]
mod rhai_bridge_tests {
    use super::*;

    #[test]
    fn integral_numbers_cross_as_ints() {
        let dynamic = value_to_dynamic(&StoryValue::Number(3.0));
        assert!(dynamic.is::<INT>());
        let dynamic = value_to_dynamic(&StoryValue::Number(2.5));
        assert!(dynamic.is::<FLOAT>());
    }

    #[test]
    fn nested_values_survive_the_bridge() {
        let value = StoryValue::Map(BTreeMap::from([
            ("name".to_string(), StoryValue::from("Ada")),
            (
                "items".to_string(),
                StoryValue::Array(vec![StoryValue::from(true), StoryValue::Null]),
            ),
            ("gold".to_string(), StoryValue::Number(12.0)),
        ]));
        let back = dynamic_to_value(value_to_dynamic(&value)).expect("bridge should succeed");
        assert_eq!(back, value);
    }

    #[test]
    fn chars_become_strings_and_foreign_types_are_rejected() {
        assert_eq!(
            dynamic_to_value(Dynamic::from('x')).expect("char"),
            StoryValue::from("x")
        );
        let error = dynamic_to_value(Dynamic::from(std::time::Duration::from_secs(1)))
            .expect_err("foreign type");
        assert_eq!(error.code, "SCRIPT_VALUE_UNSUPPORTED");
    }
}
