//! Per-reference-cell mapping scores: how often (weighted) each reference
//! cell is hit as a nearest neighbour of target cells, optionally split by
//! a target grouping.

use crate::errors::MappingError;
use crate::knn_query::NeighborEdges;

use fnv::FnvHashMap as HashMap;
use nalgebra::DVector;

/// Group id used when no grouping is supplied
pub const ALL_TARGETS_GROUP: &str = "all";

/// A finite, restartable sequence of `(group id, score vector)` pairs.
///
/// Groups are ordered by first appearance in the assignment vector. Each
/// call to `iter()` starts a fresh pass; accumulation for a group happens
/// lazily when the iterator reaches it.
#[derive(Debug)]
pub struct MappingScores<'a> {
    edges: &'a NeighborEdges,
    groups: Vec<(Box<str>, Vec<usize>)>,
    log_transform: bool,
}

/// Compute mapping scores per target group.
///
/// * `edges` - neighbour-query output
/// * `groups` - per-target group assignment (same length as targets), or
///   `None` for a single implicit group over all targets
/// * `log_transform` - apply `log(1+x)` to each final score vector
///
/// Invariant: pre-transform scores of one group sum to the number of target
/// cells in that group, since each target's edge weights sum to 1.
pub fn compute_mapping_scores<'a>(
    edges: &'a NeighborEdges,
    groups: Option<&[Box<str>]>,
    log_transform: bool,
) -> anyhow::Result<MappingScores<'a>> {
    let partition = match groups {
        Some(assignment) => {
            if assignment.len() != edges.num_targets {
                return Err(MappingError::invalid_parameter(format!(
                    "group assignment covers {} cells, expected {}",
                    assignment.len(),
                    edges.num_targets
                )));
            }
            partition_in_order(assignment)
        }
        None => vec![(
            ALL_TARGETS_GROUP.into(),
            (0..edges.num_targets).collect::<Vec<_>>(),
        )],
    };

    Ok(MappingScores {
        edges,
        groups: partition,
        log_transform,
    })
}

/// Group indexes by membership, keeping first-appearance order
fn partition_in_order(assignment: &[Box<str>]) -> Vec<(Box<str>, Vec<usize>)> {
    let mut order: HashMap<&str, usize> = HashMap::default();
    let mut groups: Vec<(Box<str>, Vec<usize>)> = vec![];

    for (cell, name) in assignment.iter().enumerate() {
        let slot = *order.entry(name.as_ref()).or_insert_with(|| {
            groups.push((name.clone(), vec![]));
            groups.len() - 1
        });
        groups[slot].1.push(cell);
    }
    groups
}

impl<'a> MappingScores<'a> {
    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(name, _)| name.as_ref())
    }

    /// Start a fresh pass over the groups
    pub fn iter(&self) -> ScoreIter<'a, '_> {
        ScoreIter {
            scores: self,
            position: 0,
        }
    }

    fn accumulate(&self, members: &[usize]) -> DVector<f32> {
        let mut score = DVector::<f32>::zeros(self.edges.num_references);
        for &target in members {
            for edge in self.edges.edges_of(target) {
                score[edge.reference] += edge.weight;
            }
        }
        if self.log_transform {
            score.apply(|x| *x = x.ln_1p());
        }
        score
    }
}

pub struct ScoreIter<'a, 'b> {
    scores: &'b MappingScores<'a>,
    position: usize,
}

impl Iterator for ScoreIter<'_, '_> {
    type Item = (Box<str>, DVector<f32>);

    fn next(&mut self) -> Option<Self::Item> {
        let (name, members) = self.scores.groups.get(self.position)?;
        self.position += 1;
        Some((name.clone(), self.scores.accumulate(members)))
    }
}

impl ExactSizeIterator for ScoreIter<'_, '_> {
    fn len(&self) -> usize {
        self.scores.groups.len() - self.position
    }
}

impl<'a, 'b> IntoIterator for &'b MappingScores<'a> {
    type Item = (Box<str>, DVector<f32>);
    type IntoIter = ScoreIter<'a, 'b>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knn_query::NeighborEdge;
    use approx::assert_abs_diff_eq;

    /// 3 targets, 2 reference cells, k=2; each target splits weight 0.6/0.4
    fn toy_edges() -> NeighborEdges {
        let mut edges = vec![];
        for t in 0..3 {
            edges.push(NeighborEdge {
                target: t,
                reference: t % 2,
                distance: 0.1,
                weight: 0.6,
            });
            edges.push(NeighborEdge {
                target: t,
                reference: (t + 1) % 2,
                distance: 0.2,
                weight: 0.4,
            });
        }
        NeighborEdges {
            k: 2,
            num_targets: 3,
            num_references: 2,
            edges,
        }
    }

    #[test]
    fn single_implicit_group_sums_to_target_count() {
        let edges = toy_edges();
        let scores = compute_mapping_scores(&edges, None, false).unwrap();
        assert_eq!(scores.num_groups(), 1);

        let collected: Vec<_> = scores.iter().collect();
        assert_eq!(collected.len(), 1);
        let (name, vec) = &collected[0];
        assert_eq!(name.as_ref(), ALL_TARGETS_GROUP);
        assert_abs_diff_eq!(vec.sum(), 3.0, epsilon = 1e-6);
    }

    #[test]
    fn groups_ordered_by_first_appearance_and_sum_to_group_size() {
        let edges = toy_edges();
        let assignment: Vec<Box<str>> = ["late", "early", "late"]
            .iter()
            .map(|&x| x.into())
            .collect();

        let scores = compute_mapping_scores(&edges, Some(&assignment), false).unwrap();
        let names: Vec<_> = scores.group_names().collect();
        assert_eq!(names, vec!["late", "early"]);

        for (name, vec) in scores.iter() {
            let expected = if name.as_ref() == "late" { 2.0 } else { 1.0 };
            assert_abs_diff_eq!(vec.sum(), expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn log_transform_applies_to_final_scores_only() {
        let edges = toy_edges();
        let plain = compute_mapping_scores(&edges, None, false).unwrap();
        let logged = compute_mapping_scores(&edges, None, true).unwrap();

        let (_, plain_vec) = plain.iter().next().unwrap();
        let (_, logged_vec) = logged.iter().next().unwrap();

        for i in 0..2 {
            assert_abs_diff_eq!(logged_vec[i], plain_vec[i].ln_1p(), epsilon = 1e-6);
        }
    }

    #[test]
    fn iterator_is_restartable() {
        let edges = toy_edges();
        let assignment: Vec<Box<str>> = ["a", "b", "a"].iter().map(|&x| x.into()).collect();
        let scores = compute_mapping_scores(&edges, Some(&assignment), false).unwrap();

        let first: Vec<_> = scores.iter().map(|(name, _)| name).collect();
        let second: Vec<_> = scores.iter().map(|(name, _)| name).collect();
        assert_eq!(first, second);
        assert_eq!(scores.iter().len(), 2);
    }

    #[test]
    fn wrong_assignment_length_rejected() {
        let edges = toy_edges();
        let short: Vec<Box<str>> = ["a"].iter().map(|&x| x.into()).collect();
        let err = compute_mapping_scores(&edges, Some(&short), false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MappingError>(),
            Some(MappingError::InvalidParameter(_))
        ));
    }
}
