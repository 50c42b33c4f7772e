//! Condition evaluation over records.
//!
//! Leaves resolve their field, apply the predicate to every matched value
//! (wildcards must hold for all matches), and report how many leaves ran so
//! short-circuit behavior is observable. Regex evaluation is wrapped in an
//! elapsed-time ceiling; the regex crate is backtracking-free, so the
//! ceiling is a guard rail that surfaces as a per-record evaluation error
//! rather than a crash.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::engine::access::{access, Record};
use crate::spec::{CmpOp, ConditionExpr, FieldPath, Predicate, PredicateTest, ValueType};

/// Recoverable per-record evaluation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// A regex match exceeded the configured time ceiling.
    RegexCeiling { field: String, elapsed_micros: u64 },
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::RegexCeiling {
                field,
                elapsed_micros,
            } => write!(
                f,
                "regex on '{}' exceeded time ceiling ({} us)",
                field, elapsed_micros
            ),
        }
    }
}

/// Counters threaded through evaluation; `leaf_evals` makes short-circuit
/// behavior testable.
#[derive(Debug, Default, Clone, Copy)]
pub struct EvalStats {
    pub leaf_evals: u64,
}

/// Evaluate a condition tree against one record. `All` stops at the first
/// false branch, `Any` at the first true one.
pub fn eval_condition(
    cond: &ConditionExpr,
    record: &Record,
    regex_ceiling: Duration,
    stats: &mut EvalStats,
) -> Result<bool, EvalError> {
    match cond {
        ConditionExpr::All(items) => {
            for item in items {
                if !eval_condition(item, record, regex_ceiling, stats)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        ConditionExpr::Any(items) => {
            for item in items {
                if eval_condition(item, record, regex_ceiling, stats)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        ConditionExpr::Not(inner) => Ok(!eval_condition(inner, record, regex_ceiling, stats)?),
        ConditionExpr::Leaf(p) => eval_leaf(p, record, regex_ceiling, stats),
    }
}

fn eval_leaf(
    predicate: &Predicate,
    record: &Record,
    regex_ceiling: Duration,
    stats: &mut EvalStats,
) -> Result<bool, EvalError> {
    stats.leaf_evals += 1;
    let values = access(record, &predicate.field);

    if let PredicateTest::Exists = predicate.test {
        return Ok(!values.is_empty());
    }
    if values.is_empty() {
        return Ok(false);
    }

    // Wildcard fan-out: the predicate must hold for every matched value.
    for value in values {
        if !eval_test(&predicate.test, value, &predicate.field, regex_ceiling)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Apply one predicate test to one resolved value.
pub fn eval_test(
    test: &PredicateTest,
    value: &Value,
    field: &FieldPath,
    regex_ceiling: Duration,
) -> Result<bool, EvalError> {
    match test {
        PredicateTest::Cmp { op, value: rhs } => Ok(cmp_values(*op, value, rhs)),
        PredicateTest::InRange { min, max } => Ok(value
            .as_f64()
            .map(|n| n >= *min && n <= *max)
            .unwrap_or(false)),
        PredicateTest::LenRange { min, max } => {
            let len = match value {
                Value::String(s) => Some(s.chars().count()),
                Value::Array(a) => Some(a.len()),
                _ => None,
            };
            Ok(len
                .map(|l| l >= *min && max.map(|m| l <= m).unwrap_or(true))
                .unwrap_or(false))
        }
        PredicateTest::Matches(regex) => match value.as_str() {
            Some(s) => {
                let start = Instant::now();
                let matched = regex.is_match(s);
                let elapsed = start.elapsed();
                if elapsed > regex_ceiling {
                    return Err(EvalError::RegexCeiling {
                        field: field.to_string(),
                        elapsed_micros: elapsed.as_micros() as u64,
                    });
                }
                Ok(matched)
            }
            None => Ok(false),
        },
        PredicateTest::InSet(set) => Ok(set.iter().any(|v| v == value)),
        PredicateTest::Exists => Ok(true),
        PredicateTest::IsType(t) => Ok(matches!(
            (t, value),
            (ValueType::String, Value::String(_))
                | (ValueType::Number, Value::Number(_))
                | (ValueType::Boolean, Value::Bool(_))
                | (ValueType::Array, Value::Array(_))
                | (ValueType::Object, Value::Object(_))
                | (ValueType::Null, Value::Null)
        )),
    }
}

/// Scalar comparison semantics: numbers compare numerically, strings
/// lexicographically, everything else supports equality only. Ordering
/// across mismatched types is false, not an error.
pub fn cmp_values(op: CmpOp, left: &Value, right: &Value) -> bool {
    use std::cmp::Ordering;

    let ord = match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
        (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    };

    match op {
        CmpOp::Eq => ord.map(|o| o == Ordering::Equal).unwrap_or(left == right),
        CmpOp::Ne => ord.map(|o| o != Ordering::Equal).unwrap_or(left != right),
        CmpOp::Gt => ord == Some(Ordering::Greater),
        CmpOp::Ge => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
        CmpOp::Lt => ord == Some(Ordering::Less),
        CmpOp::Le => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
    }
}

/// Execution-scoped condition cache keyed by (rule index, fingerprint of
/// the referenced field values). Owned by one worker within one execution;
/// never shared across executions.
#[derive(Debug, Default)]
pub struct EvalCache {
    map: HashMap<(u32, u128), bool>,
    pub hits: u64,
    pub misses: u64,
}

impl EvalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&mut self, key: (u32, u128)) -> Option<bool> {
        match self.map.get(&key) {
            Some(&v) => {
                self.hits += 1;
                Some(v)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: (u32, u128), value: bool) {
        self.map.insert(key, value);
    }
}

/// Fingerprint the values a condition reads on this record. Hashing the
/// canonical JSON of each matched value keeps the key stable across
/// structurally equal records.
pub fn condition_key(rule_idx: u32, fields: &[FieldPath], record: &Record) -> (u32, u128) {
    let mut hasher = blake3::Hasher::new();
    for field in fields {
        for value in access(record, field) {
            // serde_json serialization of Value is deterministic here
            // (BTreeMap-backed maps).
            hasher.update(serde_json::to_string(value).unwrap_or_default().as_bytes());
            hasher.update(b"\x1f");
        }
        hasher.update(b"\x1e");
    }
    let bytes = hasher.finalize();
    let mut first = [0u8; 16];
    first.copy_from_slice(&bytes.as_bytes()[..16]);
    (rule_idx, u128::from_le_bytes(first))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::condition::DEFAULT_REGEX_SIZE_LIMIT;
    use crate::spec::CompiledRegex;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const CEILING: Duration = Duration::from_millis(50);

    fn record(v: Value) -> Record {
        v.as_object().unwrap().clone()
    }

    fn leaf(field: &str, test: PredicateTest) -> ConditionExpr {
        ConditionExpr::Leaf(Predicate {
            field: FieldPath::parse(field).unwrap(),
            test,
        })
    }

    #[test]
    fn comparisons() {
        assert!(cmp_values(CmpOp::Gt, &json!(10), &json!(5)));
        assert!(!cmp_values(CmpOp::Gt, &json!(5), &json!(10)));
        assert!(cmp_values(CmpOp::Le, &json!(5), &json!(5)));
        assert!(cmp_values(CmpOp::Eq, &json!("a"), &json!("a")));
        assert!(cmp_values(CmpOp::Lt, &json!("a"), &json!("b")));
        // Mixed types: equality only.
        assert!(!cmp_values(CmpOp::Eq, &json!("1"), &json!(1)));
        assert!(cmp_values(CmpOp::Ne, &json!("1"), &json!(1)));
        assert!(!cmp_values(CmpOp::Gt, &json!("1"), &json!(1)));
        // Booleans.
        assert!(cmp_values(CmpOp::Eq, &json!(true), &json!(true)));
        assert!(!cmp_values(CmpOp::Gt, &json!(true), &json!(false)));
    }

    #[test]
    fn and_short_circuits_on_first_false() {
        let rec = record(json!({"price": -5, "title": "x"}));
        let cond = ConditionExpr::All(vec![
            leaf(
                "price",
                PredicateTest::Cmp {
                    op: CmpOp::Gt,
                    value: json!(0),
                },
            ),
            leaf("title", PredicateTest::Exists),
        ]);
        let mut stats = EvalStats::default();
        let out = eval_condition(&cond, &rec, CEILING, &mut stats).unwrap();
        assert!(!out);
        assert_eq!(stats.leaf_evals, 1, "second leaf must not run");
    }

    #[test]
    fn or_short_circuits_on_first_true() {
        let rec = record(json!({"price": 5, "title": "x"}));
        let cond = ConditionExpr::Any(vec![
            leaf(
                "price",
                PredicateTest::Cmp {
                    op: CmpOp::Gt,
                    value: json!(0),
                },
            ),
            leaf("title", PredicateTest::Exists),
        ]);
        let mut stats = EvalStats::default();
        let out = eval_condition(&cond, &rec, CEILING, &mut stats).unwrap();
        assert!(out);
        assert_eq!(stats.leaf_evals, 1);
    }

    #[test]
    fn missing_field_is_false_except_exists() {
        let rec = record(json!({"price": 1}));
        let mut stats = EvalStats::default();
        let missing_cmp = leaf(
            "weight",
            PredicateTest::Cmp {
                op: CmpOp::Gt,
                value: json!(0),
            },
        );
        assert!(!eval_condition(&missing_cmp, &rec, CEILING, &mut stats).unwrap());

        let exists = leaf("weight", PredicateTest::Exists);
        assert!(!eval_condition(&exists, &rec, CEILING, &mut stats).unwrap());
        let not_exists = ConditionExpr::Not(Box::new(leaf("weight", PredicateTest::Exists)));
        assert!(eval_condition(&not_exists, &rec, CEILING, &mut stats).unwrap());
    }

    #[test]
    fn wildcard_requires_all_matches() {
        let rec = record(json!({"items": [{"qty": 2}, {"qty": 0}]}));
        let cond = leaf(
            "items[*].qty",
            PredicateTest::Cmp {
                op: CmpOp::Gt,
                value: json!(0),
            },
        );
        let mut stats = EvalStats::default();
        assert!(!eval_condition(&cond, &rec, CEILING, &mut stats).unwrap());

        let rec_ok = record(json!({"items": [{"qty": 2}, {"qty": 3}]}));
        assert!(eval_condition(&cond, &rec_ok, CEILING, &mut stats).unwrap());
    }

    #[test]
    fn regex_and_ranges() {
        let rec = record(json!({"sku": "ABC-123", "price": 10, "title": "hello"}));
        let mut stats = EvalStats::default();

        let re = CompiledRegex::compile(r"^[A-Z]+-\d+$", DEFAULT_REGEX_SIZE_LIMIT).unwrap();
        assert!(eval_condition(
            &leaf("sku", PredicateTest::Matches(re)),
            &rec,
            CEILING,
            &mut stats
        )
        .unwrap());

        assert!(eval_condition(
            &leaf(
                "price",
                PredicateTest::InRange {
                    min: 0.0,
                    max: 100.0
                }
            ),
            &rec,
            CEILING,
            &mut stats
        )
        .unwrap());

        assert!(eval_condition(
            &leaf(
                "title",
                PredicateTest::LenRange {
                    min: 1,
                    max: Some(5)
                }
            ),
            &rec,
            CEILING,
            &mut stats
        )
        .unwrap());
    }

    #[test]
    fn cache_hits_on_repeated_values() {
        let rec = record(json!({"price": 10}));
        let fields = vec![FieldPath::parse("price").unwrap()];
        let mut cache = EvalCache::new();

        let key = condition_key(0, &fields, &rec);
        assert_eq!(cache.lookup(key), None);
        cache.insert(key, true);
        assert_eq!(cache.lookup(key), Some(true));
        assert_eq!(cache.hits, 1);
        assert_eq!(cache.misses, 1);

        // Structurally equal record, same fingerprint.
        let rec2 = record(json!({"price": 10, "other": "ignored"}));
        let key2 = condition_key(0, &fields, &rec2);
        assert_eq!(key, key2);
    }
}
