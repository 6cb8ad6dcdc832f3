use crate::common::*;

use mapping_util::attributes::AttributeTable;
use mapping_util::unified_graph::ReferenceGraph;

use std::collections::HashMap;
use std::path::Path;

/// Dataset name derived from a file path (basename without extensions)
pub fn dataset_name(file: &str) -> Box<str> {
    let base = Path::new(file)
        .file_name()
        .and_then(|x| x.to_str())
        .unwrap_or(file);
    match base.split('.').next() {
        Some(head) if !head.is_empty() => head.into(),
        _ => base.into(),
    }
}

/// Read a dataset: feature matrix (features x cells) plus an optional
/// attribute table keyed by cell name.
pub fn read_dataset(data_file: &str, attr_file: Option<&str>) -> anyhow::Result<Dataset> {
    info!("reading dataset from {}", data_file);
    let matrix = read_named_matrix(data_file)?;

    let num_cells = matrix.columns.len();
    let mut attributes = AttributeTable::new(num_cells);

    if let Some(attr_file) = attr_file {
        read_attributes_into(&mut attributes, attr_file, &matrix.columns)?;
    }

    Dataset::new(
        dataset_name(data_file).as_ref(),
        matrix.rows,
        matrix.columns,
        matrix.values,
        attributes,
    )
}

/// Read an attribute file (`cell attr1 attr2 ...` header, one row per
/// cell) and register every column, reordered to the dataset's cell order.
fn read_attributes_into(
    attributes: &mut AttributeTable,
    attr_file: &str,
    cell_names: &[Box<str>],
) -> anyhow::Result<()> {
    info!("reading attributes from {}", attr_file);
    let lines = read_lines_of_words(attr_file)?;
    if lines.len() < 2 {
        return Err(anyhow::anyhow!(
            "attribute file '{}' needs a header and at least one row",
            attr_file
        ));
    }

    let header = &lines[0];
    let num_columns = header.len() - 1;
    if num_columns == 0 {
        return Err(anyhow::anyhow!(
            "attribute file '{}' has no attribute columns",
            attr_file
        ));
    }

    let mut per_cell: HashMap<&str, &[Box<str>]> = HashMap::new();
    for words in lines.iter().skip(1) {
        if words.len() != num_columns + 1 {
            return Err(anyhow::anyhow!(
                "attribute row '{}' has {} fields, expected {}",
                words.first().map(|x| x.as_ref()).unwrap_or(""),
                words.len(),
                num_columns + 1
            ));
        }
        per_cell.insert(words[0].as_ref(), &words[1..]);
    }

    for (j, column_name) in header[1..].iter().enumerate() {
        let values = cell_names
            .iter()
            .map(|cell| {
                per_cell
                    .get(cell.as_ref())
                    .map(|row| row[j].clone())
                    .ok_or_else(|| {
                        anyhow::anyhow!("cell '{}' missing from '{}'", cell, attr_file)
                    })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        attributes.insert_raw(column_name, &values)?;
    }
    Ok(())
}

/// Read a per-cell group assignment (`cell group` rows, header optional)
/// in the dataset's cell order.
pub fn read_groups(group_file: &str, cell_names: &[Box<str>]) -> anyhow::Result<Vec<Box<str>>> {
    info!("reading group assignment from {}", group_file);
    let lines = read_lines_of_words(group_file)?;

    let mut per_cell: HashMap<&str, Box<str>> = HashMap::new();
    for words in lines.iter() {
        if words.len() < 2 {
            continue;
        }
        per_cell.insert(words[0].as_ref(), words[1].clone());
    }

    cell_names
        .iter()
        .map(|cell| {
            per_cell
                .get(cell.as_ref())
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("cell '{}' missing from '{}'", cell, group_file))
        })
        .collect()
}

/// Read a projection basis and reorder its rows to the reference schema
pub fn read_basis(basis_file: &str, feature_names: &[Box<str>]) -> anyhow::Result<Mat> {
    info!("reading projection basis from {}", basis_file);
    let basis = read_named_matrix(basis_file)?;

    let rows: HashMap<&str, usize> = basis
        .rows
        .iter()
        .enumerate()
        .map(|(i, x)| (x.as_ref(), i))
        .collect();

    let mut reordered = Mat::zeros(feature_names.len(), basis.values.ncols());
    for (i, name) in feature_names.iter().enumerate() {
        let &j = rows.get(name.as_ref()).ok_or_else(|| {
            anyhow::anyhow!("feature '{}' missing from basis '{}'", name, basis_file)
        })?;
        for c in 0..basis.values.ncols() {
            reordered[(i, c)] = basis.values[(j, c)];
        }
    }
    Ok(reordered)
}

/// Read a reference affinity graph as a 3-column edge list `i j weight`
/// (0-based indexes; a header line is tolerated and skipped).
pub fn read_reference_graph(edge_file: &str, num_nodes: usize) -> anyhow::Result<ReferenceGraph> {
    info!("reading reference graph from {}", edge_file);
    let lines = read_lines_of_words(edge_file)?;

    let mut edges = vec![];
    let mut weights = vec![];
    for words in lines.iter() {
        if words.len() < 3 {
            continue;
        }
        let parsed = (
            words[0].parse::<usize>(),
            words[1].parse::<usize>(),
            words[2].parse::<f32>(),
        );
        match parsed {
            (Ok(i), Ok(j), Ok(w)) => {
                edges.push((i, j));
                weights.push(w);
            }
            _ if edges.is_empty() => continue, // header line
            _ => {
                return Err(anyhow::anyhow!(
                    "malformed edge line '{} {} {}' in '{}'",
                    words[0],
                    words[1],
                    words[2],
                    edge_file
                ))
            }
        }
    }

    if edges.is_empty() {
        return Err(anyhow::anyhow!("no edges found in '{}'", edge_file));
    }

    info!("{} reference edges over {} nodes", edges.len(), num_nodes);
    ReferenceGraph::new(num_nodes, edges, weights)
}
