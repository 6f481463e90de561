use serde_json::Value;

use super::ArgsDecoder;
use crate::error::DecodeError;
use crate::payload::Payload;

/// Decodes one JSON value from the front of the payload.
///
/// An array spreads over the open parameters, padded with nulls. An object
/// is offered whole to every open parameter, so each struct parameter can
/// pick the fields it knows. Any other value fills a single parameter.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonArgs;

impl ArgsDecoder for JsonArgs {
    fn decode(&self, payload: &mut Payload, pending: usize) -> Result<Vec<Value>, DecodeError> {
        let rest = payload.rest();
        let skipped = rest.len() - rest.trim_start().len();
        let mut values = serde_json::Deserializer::from_str(&rest[skipped..]).into_iter::<Value>();
        let value = match values.next() {
            Some(value) => value?,
            None => return Err(DecodeError::Empty),
        };
        let consumed = skipped + values.byte_offset();
        let spread = spread(value, pending)?;
        payload.advance(consumed);
        Ok(spread)
    }
}

fn spread(value: Value, pending: usize) -> Result<Vec<Value>, DecodeError> {
    match value {
        Value::Array(items) if items.len() <= pending => {
            let mut items = items;
            items.resize(pending, Value::Null);
            Ok(items)
        }
        // A lone parameter may itself be a sequence.
        Value::Array(items) if pending == 1 => Ok(vec![Value::Array(items)]),
        Value::Array(items) => Err(DecodeError::TooMany {
            expected: pending,
            got: items.len(),
        }),
        Value::Object(map) => Ok(vec![Value::Object(map); pending]),
        value if pending == 1 => Ok(vec![value]),
        value => Err(DecodeError::Shape {
            kind: kind(&value),
            pending,
        }),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
