use std::collections::{BTreeMap, BTreeSet, HashSet};

use proptest::prelude::*;
use serde_json::{json, Map, Value};
use sweep_runner::{
    build_schedule, expand, ExtraParameters, KeyPath, NamingScheme, ParameterAxis, ParameterSpec,
    Variant,
};

/// A generated sweep: parameter spec plus a base config that accepts every key.
#[derive(Debug, Clone)]
struct Case {
    spec: ParameterSpec,
    base: Value,
    paired_axes: Vec<usize>,
}

fn axis_key(i: usize) -> KeyPath {
    if i % 2 == 0 {
        KeyPath::Single(format!("k{}", i))
    } else {
        KeyPath::Segments(vec!["grp".to_string(), format!("k{}", i)])
    }
}

fn build_case(axes: Vec<(BTreeSet<i64>, bool)>, branches: BTreeSet<String>, reps: i64) -> Case {
    let mut root = Map::new();
    let mut grp = Map::new();
    let mut config_parameters = Vec::new();
    let mut paired_axes = Vec::new();

    for (i, (values, paired)) in axes.into_iter().enumerate() {
        let values: Vec<i64> = values.into_iter().collect();
        if i % 2 == 0 {
            root.insert(format!("k{}", i), json!(0));
        } else {
            grp.insert(format!("k{}", i), json!(0));
        }
        let mut companions = Vec::new();
        if paired {
            root.insert(format!("p{}", i), json!(""));
            companions.push(ParameterAxis {
                key: KeyPath::Single(format!("p{}", i)),
                values: values.iter().map(|v| json!(format!("c{}", v))).collect(),
                paired: Vec::new(),
            });
            paired_axes.push(i);
        }
        config_parameters.push(ParameterAxis {
            key: axis_key(i),
            values: values.iter().map(|v| json!(v)).collect(),
            paired: companions,
        });
    }
    root.insert("grp".to_string(), Value::Object(grp));

    let mut extra = BTreeMap::new();
    if !branches.is_empty() {
        extra.insert(
            "git_branch".to_string(),
            branches.into_iter().map(Value::String).collect(),
        );
    }

    Case {
        spec: ParameterSpec {
            config_parameters,
            extra_parameters: ExtraParameters {
                repetitions: reps,
                axes: extra,
            },
        },
        base: Value::Object(root),
        paired_axes,
    }
}

fn arb_case() -> impl Strategy<Value = Case> {
    (
        prop::collection::vec((prop::collection::btree_set(-20i64..50, 1..4), any::<bool>()), 1..4),
        prop::collection::btree_set("[a-z]{1,3}(/[a-z]{1,2})?", 0..3),
        1i64..4,
    )
        .prop_map(|(axes, branches, reps)| build_case(axes, branches, reps))
}

fn expand_all(case: &Case) -> Vec<Variant> {
    let schedule = build_schedule(&case.spec).expect("schedule");
    let naming = NamingScheme::default();
    expand(&schedule, &case.base, &naming)
        .expect("expansion")
        .collect::<Result<Vec<_>, _>>()
        .expect("variants")
}

proptest! {
    #[test]
    fn expansion_is_deterministic(case in arb_case()) {
        let first = expand_all(&case);
        let second = expand_all(&case);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn variant_count_matches_product(case in arb_case()) {
        let expected: usize = case
            .spec
            .config_parameters
            .iter()
            .map(|a| a.values.len())
            .product::<usize>()
            * case
                .spec
                .extra_parameters
                .axes
                .values()
                .map(|v| v.len())
                .product::<usize>()
            * case.spec.extra_parameters.repetitions as usize;
        prop_assert_eq!(expand_all(&case).len(), expected);
    }

    #[test]
    fn identifiers_are_unique(case in arb_case()) {
        let variants = expand_all(&case);
        let ids: HashSet<&str> = variants.iter().map(|v| v.identifier.as_str()).collect();
        prop_assert_eq!(ids.len(), variants.len());
    }

    #[test]
    fn identifiers_parse_back_to_params(case in arb_case()) {
        let naming = NamingScheme::default();
        for variant in expand_all(&case) {
            let parsed = naming.parse(&variant.identifier).expect("parse");
            prop_assert_eq!(&parsed.pairs, &variant.params);
            prop_assert_eq!(parsed.repetition, variant.repetition);
        }
    }

    #[test]
    fn companions_match_parent_index(case in arb_case()) {
        for variant in expand_all(&case) {
            for &i in &case.paired_axes {
                let parent = if i % 2 == 0 {
                    &variant.tree[format!("k{}", i)]
                } else {
                    &variant.tree["grp"][format!("k{}", i)]
                };
                let expected = json!(format!("c{}", parent));
                prop_assert_eq!(&variant.tree[format!("p{}", i)], &expected);
            }
        }
    }

    #[test]
    fn trees_keep_base_shape(case in arb_case()) {
        for variant in expand_all(&case) {
            prop_assert!(sweep_runner::validate(&variant.tree, &case.base).is_ok());
            prop_assert_eq!(sweep_runner::keyset(&variant.tree), sweep_runner::keyset(&case.base));
        }
    }
}
