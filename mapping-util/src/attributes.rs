//! Typed cell-attribute table.
//!
//! Arbitrary named columns over the cells of a dataset, each either
//! categorical or numeric. Column kind is checked at access time so that a
//! missing or wrong-type column surfaces as `UnknownAttribute` instead of a
//! silent misread.

use crate::errors::MappingError;
use fnv::FnvHashMap as HashMap;
use log::info;

/// A categorical column: per-cell codes into a sorted category set.
///
/// Categories are deduplicated and sorted lexicographically, so the code
/// order is also the lexicographic order of the category names.
#[derive(Clone, Debug)]
pub struct CategoricalColumn {
    codes: Vec<u32>,
    categories: Vec<Box<str>>,
}

impl CategoricalColumn {
    /// Build from raw per-cell values.
    pub fn from_values(values: &[Box<str>]) -> Self {
        let mut categories: Vec<Box<str>> = values.to_vec();
        categories.sort();
        categories.dedup();

        let category_index: HashMap<&str, u32> = categories
            .iter()
            .enumerate()
            .map(|(i, x)| (x.as_ref(), i as u32))
            .collect();

        let codes = values
            .iter()
            .map(|x| category_index[x.as_ref()])
            .collect::<Vec<_>>();

        Self { codes, categories }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn num_categories(&self) -> usize {
        self.categories.len()
    }

    /// Per-cell category codes (indexes into `categories()`)
    pub fn codes(&self) -> &[u32] {
        &self.codes
    }

    /// Sorted category names
    pub fn categories(&self) -> &[Box<str>] {
        &self.categories
    }

    pub fn category_of(&self, cell: usize) -> &str {
        self.categories[self.codes[cell] as usize].as_ref()
    }
}

/// A single attribute column, categorical or numeric
#[derive(Clone, Debug)]
pub enum AttributeColumn {
    Categorical(CategoricalColumn),
    Numeric(Vec<f32>),
}

impl AttributeColumn {
    pub fn len(&self) -> usize {
        match self {
            AttributeColumn::Categorical(c) => c.len(),
            AttributeColumn::Numeric(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parse raw values: numeric iff every value parses as `f32`
    pub fn from_raw_values(values: &[Box<str>]) -> Self {
        let numeric = values
            .iter()
            .map(|x| x.parse::<f32>())
            .collect::<Result<Vec<_>, _>>();

        match numeric {
            Ok(v) => AttributeColumn::Numeric(v),
            Err(_) => AttributeColumn::Categorical(CategoricalColumn::from_values(values)),
        }
    }
}

/// Attribute name -> column mapping for one dataset (one row per cell)
#[derive(Clone, Debug, Default)]
pub struct AttributeTable {
    columns: HashMap<Box<str>, AttributeColumn>,
    num_cells: usize,
}

impl AttributeTable {
    pub fn new(num_cells: usize) -> Self {
        Self {
            columns: HashMap::default(),
            num_cells,
        }
    }

    pub fn num_cells(&self) -> usize {
        self.num_cells
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn insert(&mut self, name: &str, column: AttributeColumn) -> anyhow::Result<()> {
        if column.len() != self.num_cells {
            return Err(MappingError::invalid_parameter(format!(
                "attribute '{}' has {} rows, expected {}",
                name,
                column.len(),
                self.num_cells
            )));
        }
        self.columns.insert(name.into(), column);
        Ok(())
    }

    /// Parse and register raw string values under `name`
    pub fn insert_raw(&mut self, name: &str, values: &[Box<str>]) -> anyhow::Result<()> {
        let column = AttributeColumn::from_raw_values(values);
        if let AttributeColumn::Categorical(cat) = &column {
            info!(
                "attribute '{}': {} categories over {} cells",
                name,
                cat.num_categories(),
                cat.len()
            );
        }
        self.insert(name, column)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Access a categorical column or fail with `UnknownAttribute`
    pub fn categorical(&self, name: &str) -> anyhow::Result<&CategoricalColumn> {
        match self.columns.get(name) {
            Some(AttributeColumn::Categorical(c)) => Ok(c),
            _ => Err(MappingError::UnknownAttribute(name.into()).into()),
        }
    }

    /// Access a numeric column or fail with `UnknownAttribute`
    pub fn numeric(&self, name: &str) -> anyhow::Result<&[f32]> {
        match self.columns.get(name) {
            Some(AttributeColumn::Numeric(v)) => Ok(v.as_slice()),
            _ => Err(MappingError::UnknownAttribute(name.into()).into()),
        }
    }
}
