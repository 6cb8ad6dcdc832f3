pub mod attributes; // cell attribute table with typed columns
pub mod common_io; // delimited text I/O helpers
pub mod dataset; // dataset and mapping session
pub mod errors; // error taxonomy
pub mod feature_align; // feature schema alignment and CORAL
pub mod knn_query; // k-nearest neighbour queries against a reference
pub mod label_transfer; // majority-vote label transfer
pub mod mapping_score; // per-reference mapping score accumulation
pub mod reference_index; // HNSW dictionary over reference cells
pub mod unified_graph; // spiked graph construction for joint embedding
