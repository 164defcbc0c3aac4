use std::collections::{BTreeMap, HashSet};
use std::iter::FusedIterator;

use serde::Serialize;
use serde_json::Value;

use crate::error::MatrixError;
use crate::keypath::assign;
use crate::naming::NamingScheme;
use crate::schedule::{AxisKind, Schedule};
use crate::validate::validate;

/// One materialized configuration of the matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variant {
    pub tree: Value,
    /// Run directory name, e.g. `run__a:10;b:x`.
    pub identifier: String,
    /// Sanitized `(axis, value)` pairs in identifier order.
    pub params: Vec<(String, String)>,
    /// Values of the extra axes, keyed by axis name.
    pub extra_info: BTreeMap<String, Value>,
    /// 1-based repetition index, only set when the schedule repeats.
    pub repetition: Option<u32>,
}

struct Pending {
    tree: Value,
    pairs: Vec<(String, Value)>,
    params: Vec<(String, String)>,
    extra_info: BTreeMap<String, Value>,
    next_rep: u32,
}

/// Lazy cartesian product over a [`Schedule`].
///
/// Combinations are visited in odometer order (last axis varies fastest) and
/// each one yields `schedule.repetitions` variants. The first error ends the
/// sequence; a fresh call to [`expand`] is needed to iterate again.
pub struct Expansion<'a> {
    schedule: &'a Schedule,
    base: &'a Value,
    naming: &'a NamingScheme,
    cursor: Option<Vec<usize>>,
    pending: Option<Pending>,
    seen: HashSet<String>,
    failed: bool,
}

/// Starts expanding `schedule` against `base`.
pub fn expand<'a>(
    schedule: &'a Schedule,
    base: &'a Value,
    naming: &'a NamingScheme,
) -> Result<Expansion<'a>, MatrixError> {
    naming.validate()?;
    if schedule.repetitions < 1 {
        return Err(MatrixError::InvalidRepetitions(schedule.repetitions as i64));
    }
    let cursor = if schedule.axes.iter().any(|a| a.choices.is_empty()) {
        None
    } else {
        Some(vec![0; schedule.axes.len()])
    };
    Ok(Expansion {
        schedule,
        base,
        naming,
        cursor,
        pending: None,
        seen: HashSet::new(),
        failed: false,
    })
}

impl<'a> Expansion<'a> {
    fn advance(&self, mut indices: Vec<usize>) -> Option<Vec<usize>> {
        for pos in (0..indices.len()).rev() {
            indices[pos] += 1;
            if indices[pos] < self.schedule.axes[pos].choices.len() {
                return Some(indices);
            }
            indices[pos] = 0;
        }
        None
    }

    fn materialize(&mut self, indices: &[usize]) -> Result<Pending, MatrixError> {
        let mut tree = self.base.clone();
        let mut pairs = Vec::with_capacity(indices.len());
        let mut extra_info = BTreeMap::new();

        for (axis, &idx) in self.schedule.axes.iter().zip(indices) {
            let choice = &axis.choices[idx];
            pairs.push((axis.name.clone(), choice.value.clone()));
            match axis.kind {
                AxisKind::Config => {
                    let applied = std::iter::once((&choice.key, &choice.value))
                        .chain(choice.companions.iter().map(|(k, v)| (k, v)));
                    for (key, value) in applied {
                        assign(&mut tree, key, value.clone()).map_err(|e| MatrixError::Apply {
                            context: format!("axis \"{}\" = {}", axis.name, choice.value),
                            source: Box::new(e),
                        })?;
                    }
                }
                AxisKind::Extra => {
                    extra_info.insert(axis.name.clone(), choice.value.clone());
                }
            }
        }

        validate(&tree, self.base)?;

        let identifier = self.naming.identify(&pairs, 1, 1);
        if !self.seen.insert(identifier.clone()) {
            return Err(MatrixError::IdentifierCollision { identifier });
        }

        Ok(Pending {
            tree,
            params: self.naming.rendered_pairs(&pairs),
            pairs,
            extra_info,
            next_rep: 1,
        })
    }

    fn emit(&self, pending: &Pending, tree: Value) -> Variant {
        let reps = self.schedule.repetitions;
        let rep = pending.next_rep;
        Variant {
            tree,
            identifier: self.naming.identify(&pending.pairs, rep, reps),
            params: pending.params.clone(),
            extra_info: pending.extra_info.clone(),
            repetition: (reps > 1).then_some(rep),
        }
    }
}

impl<'a> Iterator for Expansion<'a> {
    type Item = Result<Variant, MatrixError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(mut pending) = self.pending.take() {
            if pending.next_rep < self.schedule.repetitions {
                let variant = self.emit(&pending, pending.tree.clone());
                pending.next_rep += 1;
                self.pending = Some(pending);
                return Some(Ok(variant));
            }
            let tree = std::mem::take(&mut pending.tree);
            return Some(Ok(self.emit(&pending, tree)));
        }

        let indices = self.cursor.take()?;
        self.cursor = self.advance(indices.clone());
        match self.materialize(&indices) {
            Ok(pending) => {
                self.pending = Some(pending);
                self.next()
            }
            Err(err) => {
                self.failed = true;
                self.cursor = None;
                Some(Err(err))
            }
        }
    }
}

impl<'a> FusedIterator for Expansion<'a> {}
