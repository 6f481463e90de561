use serde_json::{Map, Value};

use super::ArgsDecoder;
use crate::error::DecodeError;
use crate::payload::Payload;

/// Decodes command-line style arguments from the rest of the line.
///
/// Bare tokens fill open parameters in order. `-name value` and
/// `--name value` pairs gather into one object that fills every parameter
/// left after the positionals; a flag with no value is `true`. Unquoted
/// tokens that read as JSON literals keep their JSON type.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlagArgs;

impl ArgsDecoder for FlagArgs {
    fn decode(&self, payload: &mut Payload, pending: usize) -> Result<Vec<Value>, DecodeError> {
        let tokens = tokenize(payload.take_line())?;

        let mut positionals = Vec::new();
        let mut flags = Map::new();
        let mut tokens = tokens.into_iter().peekable();
        while let Some(token) = tokens.next() {
            match token.flag_name() {
                Some(name) => {
                    let value = tokens
                        .next_if(|next| next.flag_name().is_none())
                        .map(Token::into_value)
                        .unwrap_or(Value::Bool(true));
                    flags.insert(name, value);
                }
                None => positionals.push(token.into_value()),
            }
        }

        if positionals.len() > pending {
            return Err(DecodeError::TooMany {
                expected: pending,
                got: positionals.len(),
            });
        }
        let fill = if flags.is_empty() {
            Value::Null
        } else {
            Value::Object(flags)
        };
        positionals.resize(pending, fill);
        Ok(positionals)
    }
}

#[derive(Debug, PartialEq)]
struct Token {
    text: String,
    quoted: bool,
}

impl Token {
    fn flag_name(&self) -> Option<String> {
        if self.quoted {
            return None;
        }
        let name = self
            .text
            .strip_prefix("--")
            .or_else(|| self.text.strip_prefix('-'))?;
        match name.chars().next() {
            Some(c) if c.is_ascii_digit() || c == '.' => None,
            Some(_) => Some(name.to_string()),
            None => None,
        }
    }

    fn into_value(self) -> Value {
        if self.quoted {
            return Value::String(self.text);
        }
        match serde_json::from_str::<Value>(&self.text) {
            Ok(value) => value,
            Err(_) => Value::String(self.text),
        }
    }
}

/// Split on whitespace, honouring single and double quotes.
fn tokenize(line: &str) -> Result<Vec<Token>, DecodeError> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            return Ok(tokens);
        };
        let mut text = String::new();
        let mut quoted = false;
        if first == '"' || first == '\'' {
            chars.next();
            quoted = true;
            loop {
                match chars.next() {
                    Some(c) if c == first => break,
                    Some('\\') if first == '"' => match chars.next() {
                        Some(escaped) => text.push(escaped),
                        None => return Err(DecodeError::UnterminatedQuote),
                    },
                    Some(c) => text.push(c),
                    None => return Err(DecodeError::UnterminatedQuote),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                text.push(c);
            }
        }
        tokens.push(Token { text, quoted });
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn decode(text: &str, pending: usize) -> Result<Vec<Value>, DecodeError> {
        FlagArgs.decode(&mut Payload::new(text), pending)
    }

    #[test]
    fn positionals_keep_literal_types() {
        assert_eq!(
            decode("true 1 a", 3).unwrap(),
            vec![json!(true), json!(1), json!("a")]
        );
        assert_eq!(decode("'1'", 1).unwrap(), vec![json!("1")]);
        assert_eq!(decode("-5", 1).unwrap(), vec![json!(-5)]);
    }

    #[test]
    fn flags_fill_remaining_parameters() {
        assert_eq!(
            decode("-i 1 --b true", 2).unwrap(),
            vec![json!({"i": 1, "b": true}), json!({"i": 1, "b": true})]
        );
        assert_eq!(
            decode("x -verbose", 2).unwrap(),
            vec![json!("x"), json!({"verbose": true})]
        );
    }

    #[test]
    fn missing_values_are_null() {
        assert_eq!(decode("", 2).unwrap(), vec![Value::Null, Value::Null]);
        assert_eq!(decode("   ", 1).unwrap(), vec![Value::Null]);
    }

    #[test]
    fn consumes_one_line() {
        let mut payload = Payload::new("a\nb");
        assert_eq!(FlagArgs.decode(&mut payload, 1).unwrap(), vec![json!("a")]);
        assert_eq!(payload.rest(), "b");
    }

    #[test]
    fn quoting() {
        assert_eq!(
            tokenize(r#"say "hello world" 'it''s'"#).unwrap(),
            vec![
                Token { text: "say".into(), quoted: false },
                Token { text: "hello world".into(), quoted: true },
                Token { text: "it".into(), quoted: true },
                Token { text: "s".into(), quoted: true },
            ]
        );
        assert_eq!(tokenize(r#""a\"b""#).unwrap()[0].text, "a\"b");
        assert!(matches!(tokenize("\"open"), Err(DecodeError::UnterminatedQuote)));
    }

    #[test]
    fn too_many_positionals() {
        assert!(matches!(
            decode("a b", 1),
            Err(DecodeError::TooMany { expected: 1, got: 2 })
        ));
    }
}
