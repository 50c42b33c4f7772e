//! Mapping phase: input record -> working record of declared outputs.
//!
//! Entries apply in dependency order. An entry that depends on another
//! output reads the working record; everything else reads the input.
//! Required failures become record-level errors; optional failures fall
//! back to the declared default.

use serde_json::{Number, Value};

use crate::compile::CompiledIR;
use crate::engine::access::{access, Record};
use crate::engine::result::{Outcome, OutcomeKind};
use crate::spec::{MapTransform, Severity};

/// Apply every mapping transformation to one input record.
pub fn apply_mapping(ir: &CompiledIR, input: &Record) -> (Record, Vec<Outcome>) {
    let mut working = Record::new();
    let mut outcomes = Vec::new();

    for &idx in &ir.mapping_order {
        let entry = &ir.mapping[idx];
        let source_record = if entry.depends_on.is_some() {
            &working
        } else {
            input
        };

        let raw = access(source_record, &entry.field.source)
            .first()
            .map(|v| (*v).clone());

        let value = match raw {
            Some(v) => match entry.field.transform {
                Some(t) => apply_transform(t, v),
                None => Ok(v),
            },
            None => Err(format!("source '{}' not found", entry.field.source)),
        };

        match value {
            Ok(v) => {
                working.insert(entry.field.output.clone(), v);
            }
            Err(reason) if entry.field.required => {
                outcomes.push(Outcome {
                    rule_id: format!("mapping:{}", entry.field.output),
                    field: entry.field.output.clone(),
                    severity: Severity::Error,
                    kind: OutcomeKind::MappingFailure,
                    message: format!("required mapping failed: {}", reason),
                });
            }
            Err(_) => {
                if let Some(default) = &entry.field.default {
                    working.insert(entry.field.output.clone(), default.clone());
                }
            }
        }
    }

    (working, outcomes)
}

fn apply_transform(transform: MapTransform, value: Value) -> Result<Value, String> {
    match transform {
        MapTransform::Trim => Ok(match value {
            Value::String(s) => Value::String(s.trim().to_string()),
            other => other,
        }),
        MapTransform::Lowercase => Ok(match value {
            Value::String(s) => Value::String(s.to_lowercase()),
            other => other,
        }),
        MapTransform::Uppercase => Ok(match value {
            Value::String(s) => Value::String(s.to_uppercase()),
            other => other,
        }),
        MapTransform::ParseNumber => match &value {
            Value::Number(_) => Ok(value),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("'{}' is not a number", s)),
            other => Err(format!("cannot parse {} as number", type_name(other))),
        },
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::Compiler;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(v: Value) -> Record {
        v.as_object().unwrap().clone()
    }

    const SPEC: &str = r#"
schema_version: 1
metadata: { marketplace: test, version: "1.0.0" }
mapping:
  - output: price
    source: raw_price
    transform: parse_number
    required: true
  - output: title
    source: name
    transform: trim
    default: "untitled"
  - output: display_price
    source: price
rules: []
"#;

    #[test]
    fn maps_in_dependency_order() {
        let ir = Compiler::new().compile("t", SPEC).unwrap();
        let input = record(json!({"raw_price": "12.5", "name": "  Widget  "}));
        let (working, outcomes) = apply_mapping(&ir, &input);
        assert!(outcomes.is_empty());
        assert_eq!(working["price"], json!(12.5));
        assert_eq!(working["title"], json!("Widget"));
        // display_price reads the mapped price output.
        assert_eq!(working["display_price"], json!(12.5));
    }

    #[test]
    fn required_failure_is_an_error_outcome() {
        let ir = Compiler::new().compile("t", SPEC).unwrap();
        let input = record(json!({"name": "Widget"}));
        let (working, outcomes) = apply_mapping(&ir, &input);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].kind, OutcomeKind::MappingFailure);
        assert_eq!(outcomes[0].field, "price");
        assert!(!working.contains_key("price"));
    }

    #[test]
    fn optional_failure_uses_default() {
        let ir = Compiler::new().compile("t", SPEC).unwrap();
        let input = record(json!({"raw_price": 3}));
        let (working, outcomes) = apply_mapping(&ir, &input);
        assert!(outcomes.is_empty());
        assert_eq!(working["title"], json!("untitled"));
    }

    #[test]
    fn unparsable_number_fails_required_mapping() {
        let ir = Compiler::new().compile("t", SPEC).unwrap();
        let input = record(json!({"raw_price": "abc"}));
        let (_, outcomes) = apply_mapping(&ir, &input);
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].message.contains("not a number"));
    }
}
