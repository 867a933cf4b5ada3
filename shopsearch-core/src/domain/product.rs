use serde::{Deserialize, Serialize};

/// A product as returned by the search and recommendation backends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedProduct {
    pub product_id: String,
    pub name: String,
    pub category: Option<String>,
    pub score: f64,
}
