//! Majority-vote label transfer from reference to target cells.

use crate::attributes::CategoricalColumn;
use crate::errors::MappingError;
use crate::knn_query::NeighborEdges;

use rayon::prelude::*;

/// Sentinel emitted for cells with no winning label
pub const UNASSIGNED_LABEL: &str = "unassigned";

/// How to resolve two labels with exactly equal maximal weight
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TieBreak {
    /// Pick the lexicographically first category (categories are stored
    /// sorted, so this is the smallest code)
    #[default]
    Lexicographic,
    /// Leave the cell unassigned
    Unassigned,
}

#[derive(Clone, Debug)]
pub struct TransferOptions {
    /// Majority threshold; the winner's weight share must strictly exceed
    /// this to be assigned
    pub threshold: f32,
    pub tie_break: TieBreak,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            tie_break: TieBreak::default(),
        }
    }
}

/// The vote outcome for one target cell
#[derive(Clone, Copy, Debug)]
pub struct LabelVote {
    /// Winning category code, or `None` when unassigned
    pub label: Option<u32>,
    /// Winner's share of the cell's total edge weight
    pub share: f32,
    pub total_weight: f32,
}

impl LabelVote {
    pub fn label_name<'a>(&self, labels: &'a CategoricalColumn) -> &'a str {
        match self.label {
            Some(code) => labels.categories()[code as usize].as_ref(),
            None => UNASSIGNED_LABEL,
        }
    }
}

/// Assign a reference label to each target cell by weighted majority vote
/// over its neighbour edges.
///
/// * `edges` - neighbour-query output
/// * `labels` - categorical reference labels, one per reference cell
/// * `options` - threshold in `[0, 1]` and tie-break rule
///
/// Each target cell is scored independently into its own output slot.
pub fn transfer_labels(
    edges: &NeighborEdges,
    labels: &CategoricalColumn,
    options: &TransferOptions,
) -> anyhow::Result<Vec<LabelVote>> {
    if !(0.0..=1.0).contains(&options.threshold) {
        return Err(MappingError::invalid_parameter(format!(
            "threshold {} outside [0, 1]",
            options.threshold
        )));
    }
    if labels.len() != edges.num_references {
        return Err(MappingError::invalid_parameter(format!(
            "{} reference labels for {} reference cells",
            labels.len(),
            edges.num_references
        )));
    }

    let num_categories = labels.num_categories();

    let votes = (0..edges.num_targets)
        .into_par_iter()
        .map(|t| {
            let mut per_label = vec![0.0_f32; num_categories];
            let mut total = 0.0_f32;

            for edge in edges.edges_of(t) {
                let code = labels.codes()[edge.reference] as usize;
                per_label[code] += edge.weight;
                total += edge.weight;
            }

            if total <= 0.0 {
                return LabelVote {
                    label: None,
                    share: 0.0,
                    total_weight: total,
                };
            }

            let best = per_label.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let winners: Vec<u32> = per_label
                .iter()
                .enumerate()
                .filter(|(_, &w)| w == best)
                .map(|(code, _)| code as u32)
                .collect();

            let winner = match (winners.as_slice(), options.tie_break) {
                ([only], _) => Some(*only),
                // codes follow sorted category order, so the smallest code
                // is the lexicographically first label
                (many, TieBreak::Lexicographic) => many.first().copied(),
                (_, TieBreak::Unassigned) => None,
            };

            let share = best / total;
            let label = match winner {
                Some(code) if share > options.threshold => Some(code),
                _ => None,
            };

            LabelVote {
                label,
                share,
                total_weight: total,
            }
        })
        .collect::<Vec<_>>();

    Ok(votes)
}
