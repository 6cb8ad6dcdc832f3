use approx::assert_abs_diff_eq;

use mapping_util::dataset::{Dataset, MapOptions, MappingSession, Mat};
use mapping_util::feature_align::AlignOptions;
use mapping_util::knn_query::{NeighborEdge, NeighborEdges};
use mapping_util::label_transfer::{transfer_labels, TransferOptions};
use mapping_util::mapping_score::compute_mapping_scores;
use mapping_util::unified_graph::{ReferenceGraph, UnifiedGraphBuilder};

fn names(prefix: &str, n: usize) -> Vec<Box<str>> {
    (0..n).map(|i| format!("{}{}", prefix, i).into()).collect()
}

/// Two tight reference clusters in 2D, five cells each
fn clustered_reference() -> Dataset {
    #[rustfmt::skip]
    let data = Mat::from_row_slice(
        2,
        10,
        &[
            0.0, 0.1, 0.0, 0.1, 0.05, 10.0, 10.1, 10.0, 10.1, 10.05,
            0.0, 0.0, 0.1, 0.1, 0.05, 10.0, 10.0, 10.1, 10.1, 10.05,
        ],
    );
    let mut dataset =
        Dataset::from_matrix("ref", names("g", 2), names("r", 10), data).unwrap();

    let labels: Vec<Box<str>> = (0..10)
        .map(|i| if i < 5 { "left".into() } else { "right".into() })
        .collect();
    dataset.attributes.insert_raw("cluster", &labels).unwrap();
    dataset
}

/// Targets near each reference cluster, features listed in swapped order
fn swapped_target() -> Dataset {
    #[rustfmt::skip]
    let data = Mat::from_row_slice(
        2,
        4,
        &[
            // g1 first, then g0
            0.02, 0.03, 10.02, 10.03,
            0.01, 0.02, 10.01, 10.02,
        ],
    );
    let features: Vec<Box<str>> = vec!["g1".into(), "g0".into()];
    Dataset::from_matrix("tgt", features, names("t", 4), data).unwrap()
}

#[test]
fn map_transfer_pipeline_on_clusters() -> anyhow::Result<()> {
    let reference = clustered_reference();
    let mut target = swapped_target();

    let session = MappingSession::new(&reference, None)?;
    let options = MapOptions {
        knn: 3,
        persist: true,
        ..Default::default()
    };
    let edges = session.map_target(&mut target, &options)?;

    assert_eq!(edges.num_targets, 4);
    assert_eq!(edges.k, 3);

    // targets 0,1 sit in the left cluster, 2,3 in the right one
    for t in 0..4 {
        let expect_left = t < 2;
        for e in edges.edges_of(t) {
            assert_eq!(expect_left, e.reference < 5, "target {} crossed clusters", t);
        }
    }

    // labels follow the clusters
    let labels = reference.attributes.categorical("cluster")?;
    let votes = transfer_labels(&edges, labels, &TransferOptions::default())?;
    for (t, vote) in votes.iter().enumerate() {
        let expected = if t < 2 { "left" } else { "right" };
        assert_eq!(vote.label_name(labels), expected);
    }

    // derived state was persisted
    assert_eq!(target.saved_neighbors().unwrap().k, 3);
    Ok(())
}

#[test]
fn mapping_scores_concentrate_per_group() -> anyhow::Result<()> {
    let reference = clustered_reference();
    let mut target = swapped_target();

    let session = MappingSession::new(&reference, None)?;
    let edges = session.map_target(&mut target, &MapOptions { knn: 2, ..Default::default() })?;

    let groups: Vec<Box<str>> = vec!["a".into(), "a".into(), "b".into(), "b".into()];
    let scores = compute_mapping_scores(&edges, Some(&groups), false)?;

    for (name, vec) in scores.iter() {
        assert_abs_diff_eq!(vec.sum(), 2.0, epsilon = 1e-4);
        // all mass of group "a" lands on the left cluster, "b" on the right
        let left: f32 = vec.rows(0, 5).sum();
        let right: f32 = vec.rows(5, 5).sum();
        if name.as_ref() == "a" {
            assert_abs_diff_eq!(left, 2.0, epsilon = 1e-4);
            assert_abs_diff_eq!(right, 0.0, epsilon = 1e-4);
        } else {
            assert_abs_diff_eq!(right, 2.0, epsilon = 1e-4);
        }
    }
    Ok(())
}

#[test]
fn coral_fallback_path_stays_usable() -> anyhow::Result<()> {
    let reference = clustered_reference();
    let mut target = swapped_target();

    // CORAL on two overlapping features with plenty of cells: applies cleanly
    let session = MappingSession::new(&reference, None)?;
    let options = MapOptions {
        knn: 2,
        align: AlignOptions {
            coral: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let edges = session.map_target(&mut target, &options)?;
    assert_eq!(edges.num_edges(), 8);
    Ok(())
}

/// Worked example: reference cells A, B, C labelled T, T, N; one target
/// cell with neighbours A (0.7) and B (0.3); threshold 0.5 assigns "T".
#[test]
fn worked_transfer_example() {
    let labels_raw: Vec<Box<str>> = vec!["T".into(), "T".into(), "N".into()];
    let labels = mapping_util::attributes::CategoricalColumn::from_values(&labels_raw);

    let edges = NeighborEdges {
        k: 2,
        num_targets: 1,
        num_references: 3,
        edges: vec![
            NeighborEdge {
                target: 0,
                reference: 0,
                distance: 0.1,
                weight: 0.7,
            },
            NeighborEdge {
                target: 0,
                reference: 1,
                distance: 0.2,
                weight: 0.3,
            },
        ],
    };

    let votes = transfer_labels(&edges, &labels, &TransferOptions::default()).unwrap();
    assert_eq!(votes[0].label_name(&labels), "T");
    assert_abs_diff_eq!(votes[0].share, 1.0, epsilon = 1e-6);
}

#[test]
fn spiked_graph_from_mapped_edges() -> anyhow::Result<()> {
    let reference = clustered_reference();
    let mut target = swapped_target();

    let session = MappingSession::new(&reference, None)?;
    let edges = session.map_target(&mut target, &MapOptions { knn: 3, ..Default::default() })?;

    // chain reference graph: 0-1-2-...-9
    let chain: Vec<(usize, usize)> = (0..9).map(|i| (i, i + 1)).collect();
    let weights = vec![1.0; 9];
    let reference_graph = ReferenceGraph::new(10, chain, weights)?;

    let mut builder = UnifiedGraphBuilder::new();
    builder.set_reference(reference_graph)?;
    builder.add_target("tgt", &edges, 0.5, 2)?;

    let graph = builder.build()?;
    assert_eq!(graph.num_vertices(), 14);
    assert_eq!(graph.num_target_cells(), 4);

    // spike vertices carry at most use_k edges, all into the reference
    for v in 10..14 {
        let neighbors = graph.neighbors(v);
        assert!(neighbors.len() <= 2);
        assert!(neighbors.iter().all(|&u| u < 10));
        assert!(graph.degree(v) > 0.0);
    }
    Ok(())
}
