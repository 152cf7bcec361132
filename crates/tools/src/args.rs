//! Input parsing shared by the handlers.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::outcome::ToolOutcome;

/// Deserialize tool input, turning a schema mismatch into an
/// `invalid_input` outcome the model can correct.
pub(crate) fn parse<T: DeserializeOwned>(input: Value) -> Result<T, ToolOutcome> {
    let input = if input.is_null() { json!({}) } else { input };
    serde_json::from_value(input).map_err(|e| ToolOutcome::invalid(format!("Invalid arguments: {e}")))
}

/// Early-return the `invalid_input` outcome from a handler.
macro_rules! parse_args {
    ($input:expr) => {
        match $crate::args::parse($input) {
            Ok(args) => args,
            Err(outcome) => return Ok(outcome),
        }
    };
}
pub(crate) use parse_args;

/// Schema fragment for the confirmation flag.
pub(crate) fn confirmed_property() -> Value {
    json!({
        "type": "boolean",
        "description": "Set to true only after the user has explicitly confirmed the described action."
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Args {
        #[serde(default)]
        confirmed: bool,
    }

    #[test]
    fn null_input_is_empty_object() {
        let a: Args = parse(Value::Null).unwrap();
        assert!(!a.confirmed);
    }

    #[test]
    fn non_boolean_confirmation_is_rejected() {
        let err = parse::<Args>(json!({"confirmed": "yes"})).unwrap_err();
        assert!(err.is_failure());
    }
}
