use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::MatrixError;
use crate::keypath::KeyPath;
use crate::naming::REPETITION_KEY;

/// One varying dimension of the configuration.
///
/// `paired` axes are not varied on their own: index `i` of every companion is
/// always applied together with index `i` of this axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterAxis {
    pub key: KeyPath,
    pub values: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paired: Vec<ParameterAxis>,
}

fn default_repetitions() -> i64 {
    1
}

/// Axes recorded per variant but never written into the configuration tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraParameters {
    #[serde(default = "default_repetitions")]
    pub repetitions: i64,
    #[serde(flatten)]
    pub axes: BTreeMap<String, Vec<Value>>,
}

impl Default for ExtraParameters {
    fn default() -> Self {
        Self {
            repetitions: default_repetitions(),
            axes: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(default)]
    pub config_parameters: Vec<ParameterAxis>,
    #[serde(default)]
    pub extra_parameters: ExtraParameters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisKind {
    Config,
    Extra,
}

/// A single value of an axis, with the companion values bound to the same index.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub key: KeyPath,
    pub value: Value,
    pub companions: Vec<(KeyPath, Value)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AxisChoices {
    /// Naming form of the axis key.
    pub name: String,
    pub kind: AxisKind,
    pub choices: Vec<Choice>,
}

/// Per-axis choice lists, ready for the cartesian product.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub axes: Vec<AxisChoices>,
    pub repetitions: u32,
}

impl Schedule {
    /// Number of distinct combinations, repetitions not included.
    pub fn combination_count(&self) -> usize {
        self.axes.iter().map(|a| a.choices.len()).product()
    }

    pub fn variant_count(&self) -> usize {
        self.combination_count() * self.repetitions as usize
    }
}

fn collect_companions<'a>(axis: &'a ParameterAxis, out: &mut Vec<&'a ParameterAxis>) {
    for companion in &axis.paired {
        out.push(companion);
        collect_companions(companion, out);
    }
}

fn register_axis(seen: &mut BTreeSet<String>, name: &str) -> Result<(), MatrixError> {
    if name == REPETITION_KEY {
        return Err(MatrixError::ReservedAxis(name.to_string()));
    }
    if !seen.insert(name.to_string()) {
        return Err(MatrixError::DuplicateAxis(name.to_string()));
    }
    Ok(())
}

fn claim_key(written: &mut BTreeSet<String>, key: &str) -> Result<(), MatrixError> {
    if !written.insert(key.to_string()) {
        return Err(MatrixError::DuplicateAxis(key.to_string()));
    }
    Ok(())
}

/// Turns a parameter specification into per-axis choice lists.
///
/// Config axes come first, in declaration order, followed by extra axes in
/// name order. Fails before anything is expanded if a companion axis does not
/// have exactly as many values as its parent, or if two axes (companions
/// included) write the same key.
pub fn build_schedule(spec: &ParameterSpec) -> Result<Schedule, MatrixError> {
    let raw_reps = spec.extra_parameters.repetitions;
    let repetitions = u32::try_from(raw_reps)
        .ok()
        .filter(|r| *r >= 1)
        .ok_or(MatrixError::InvalidRepetitions(raw_reps))?;

    let mut seen = BTreeSet::new();
    // Every key written into the tree, companions included.
    let mut written = BTreeSet::new();
    let mut axes = Vec::new();

    for axis in &spec.config_parameters {
        let name = axis.key.flatten();
        register_axis(&mut seen, &name)?;
        claim_key(&mut written, &name)?;

        let mut companions = Vec::new();
        collect_companions(axis, &mut companions);
        for companion in &companions {
            if companion.values.len() != axis.values.len() {
                return Err(MatrixError::PairingLength {
                    axis: axis.key.to_string(),
                    companion: companion.key.to_string(),
                    expected: axis.values.len(),
                    found: companion.values.len(),
                });
            }
            claim_key(&mut written, &companion.key.flatten())?;
        }

        let choices = axis
            .values
            .iter()
            .enumerate()
            .map(|(i, value)| Choice {
                key: axis.key.clone(),
                value: value.clone(),
                companions: companions
                    .iter()
                    .map(|c| (c.key.clone(), c.values[i].clone()))
                    .collect(),
            })
            .collect::<Vec<_>>();
        debug!(axis = %name, choices = choices.len(), paired = companions.len(), "scheduled config axis");
        axes.push(AxisChoices {
            name,
            kind: AxisKind::Config,
            choices,
        });
    }

    for (name, values) in &spec.extra_parameters.axes {
        register_axis(&mut seen, name)?;
        let key = KeyPath::Single(name.clone());
        let choices = values
            .iter()
            .map(|value| Choice {
                key: key.clone(),
                value: value.clone(),
                companions: Vec::new(),
            })
            .collect::<Vec<_>>();
        debug!(axis = %name, choices = choices.len(), "scheduled extra axis");
        axes.push(AxisChoices {
            name: name.clone(),
            kind: AxisKind::Extra,
            choices,
        });
    }

    Ok(Schedule { axes, repetitions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(value: Value) -> ParameterSpec {
        serde_json::from_value(value).expect("parameter spec")
    }

    #[test]
    fn builds_one_choice_per_value() {
        let schedule = build_schedule(&spec(json!({
            "config_parameters": [
                {"key": "a", "values": [10, 20]},
                {"key": ["b", "c"], "values": ["x"]}
            ]
        })))
        .expect("schedule");
        assert_eq!(schedule.repetitions, 1);
        assert_eq!(schedule.axes.len(), 2);
        assert_eq!(schedule.axes[0].name, "a");
        assert_eq!(schedule.axes[1].name, "b+c");
        assert_eq!(schedule.axes[0].choices[1].value, json!(20));
        assert!(schedule.axes[0].choices[1].companions.is_empty());
        assert_eq!(schedule.combination_count(), 2);
    }

    #[test]
    fn companions_follow_parent_index() {
        let schedule = build_schedule(&spec(json!({
            "config_parameters": [{
                "key": "x",
                "values": [1, 2, 3],
                "paired": [{"key": "y", "values": ["a", "b", "c"]}]
            }]
        })))
        .expect("schedule");
        let choices = &schedule.axes[0].choices;
        assert_eq!(choices.len(), 3);
        for (i, choice) in choices.iter().enumerate() {
            assert_eq!(choice.value, json!(i + 1));
            assert_eq!(choice.companions.len(), 1);
            assert_eq!(choice.companions[0].0, KeyPath::Single("y".to_string()));
        }
        assert_eq!(choices[1].companions[0].1, json!("b"));
    }

    #[test]
    fn pairing_length_mismatch_is_rejected() {
        let err = build_schedule(&spec(json!({
            "config_parameters": [{
                "key": "x",
                "values": [1, 2, 3],
                "paired": [{"key": "y", "values": ["a", "b"]}]
            }]
        })))
        .expect_err("lengths differ");
        assert_eq!(
            err,
            MatrixError::PairingLength {
                axis: "x".to_string(),
                companion: "y".to_string(),
                expected: 3,
                found: 2
            }
        );
    }

    #[test]
    fn extra_axes_follow_config_axes_and_skip_repetitions() {
        let schedule = build_schedule(&spec(json!({
            "config_parameters": [{"key": "a", "values": [1]}],
            "extra_parameters": {"repetitions": 3, "git_branch": ["main", "dev"]}
        })))
        .expect("schedule");
        assert_eq!(schedule.repetitions, 3);
        assert_eq!(schedule.axes.len(), 2);
        assert_eq!(schedule.axes[1].name, "git_branch");
        assert_eq!(schedule.axes[1].kind, AxisKind::Extra);
        assert_eq!(schedule.variant_count(), 6);
    }

    #[test]
    fn invalid_repetitions_are_rejected() {
        let err = build_schedule(&spec(json!({"extra_parameters": {"repetitions": 0}})))
            .expect_err("zero repetitions");
        assert_eq!(err, MatrixError::InvalidRepetitions(0));
    }

    #[test]
    fn duplicate_and_reserved_axes_are_rejected() {
        let dup = build_schedule(&spec(json!({
            "config_parameters": [{"key": "a", "values": [1]}],
            "extra_parameters": {"a": [2]}
        })));
        assert_eq!(dup, Err(MatrixError::DuplicateAxis("a".to_string())));

        let reserved = build_schedule(&spec(json!({
            "config_parameters": [{"key": "repetition", "values": [1]}]
        })));
        assert_eq!(
            reserved,
            Err(MatrixError::ReservedAxis("repetition".to_string()))
        );
    }

    #[test]
    fn companion_keys_cannot_be_written_twice() {
        let shadowed = build_schedule(&spec(json!({
            "config_parameters": [
                {"key": "x", "values": [1, 2], "paired": [{"key": "y", "values": [10, 20]}]},
                {"key": "y", "values": [99]}
            ]
        })));
        assert_eq!(shadowed, Err(MatrixError::DuplicateAxis("y".to_string())));

        let shadowing = build_schedule(&spec(json!({
            "config_parameters": [
                {"key": ["m", "d"], "values": [1]},
                {"key": "x", "values": [1], "paired": [{"key": ["m", "d"], "values": [2]}]}
            ]
        })));
        assert_eq!(shadowing, Err(MatrixError::DuplicateAxis("m+d".to_string())));

        let own_parent = build_schedule(&spec(json!({
            "config_parameters": [{
                "key": "x",
                "values": [1],
                "paired": [{"key": "z", "values": [2], "paired": [{"key": "x", "values": [3]}]}]
            }]
        })));
        assert_eq!(own_parent, Err(MatrixError::DuplicateAxis("x".to_string())));
    }

    #[test]
    fn empty_spec_has_single_combination() {
        let schedule = build_schedule(&ParameterSpec::default()).expect("schedule");
        assert!(schedule.axes.is_empty());
        assert_eq!(schedule.combination_count(), 1);
    }
}
