//! In-memory product catalog used as the search and recommendation backend
//! when the service runs standalone.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shopsearch_core::{normalize_query, CoreError, RankedProduct, Result, SearchBackend};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogProduct {
    pub product_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: Option<String>,
    /// Popularity in `[0, 1]`.
    #[serde(default)]
    pub popularity: f64,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogBackend {
    products: Vec<CatalogProduct>,
}

impl CatalogBackend {
    pub fn new(products: Vec<CatalogProduct>) -> Self {
        Self { products }
    }

    /// Loads a JSON array of products.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| CoreError::Internal(format!("failed to read catalog: {}", e)))?;
        let products: Vec<CatalogProduct> = serde_json::from_str(&raw)?;
        tracing::info!(products = products.len(), "Catalog loaded");
        Ok(Self::new(products))
    }

    /// A handful of products so the binary serves something out of the box.
    pub fn sample() -> Self {
        let product = |id: &str, name: &str, category: &str, popularity: f64| CatalogProduct {
            product_id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            category: Some(category.to_string()),
            popularity,
        };

        Self::new(vec![
            product("1001", "Trail Running Shoes", "footwear", 0.92),
            product("1002", "Leather Chelsea Boots", "footwear", 0.71),
            product("1003", "Canvas Sneakers", "footwear", 0.64),
            product("2001", "Merino Wool Sweater", "apparel", 0.83),
            product("2002", "Waterproof Rain Jacket", "apparel", 0.77),
            product("3001", "Insulated Water Bottle", "outdoor", 0.88),
            product("3002", "Ultralight Tent", "outdoor", 0.58),
        ])
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    fn ranked<'a>(
        products: impl Iterator<Item = (&'a CatalogProduct, f64)>,
        k: usize,
    ) -> Vec<RankedProduct> {
        let mut scored: Vec<RankedProduct> = products
            .map(|(product, score)| RankedProduct {
                product_id: product.product_id.clone(),
                name: product.name.clone(),
                category: product.category.clone(),
                score,
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.product_id.cmp(&b.product_id))
        });
        scored.truncate(k);
        scored
    }

    fn in_category<'a>(
        &'a self,
        category: Option<&'a str>,
    ) -> impl Iterator<Item = &'a CatalogProduct> + 'a {
        self.products.iter().filter(move |product| match category {
            Some(wanted) => product.category.as_deref() == Some(wanted),
            None => true,
        })
    }
}

fn check_k(k: usize) -> Result<()> {
    if k == 0 || k > 100 {
        return Err(CoreError::Validation("k must be between 1 and 100".to_string()));
    }
    Ok(())
}

#[async_trait]
impl SearchBackend for CatalogBackend {
    async fn search(
        &self,
        query: &str,
        _user_id: Option<&str>,
        k: usize,
    ) -> Result<Vec<RankedProduct>> {
        check_k(k)?;
        let normalized = normalize_query(query);
        let terms: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();
        if terms.is_empty() {
            return Err(CoreError::Validation("query must not be empty".to_string()));
        }

        let matches = self.products.iter().filter_map(|product| {
            let haystack = format!("{} {}", product.name, product.description).to_lowercase();
            let hits = terms.iter().filter(|term| haystack.contains(*term)).count();
            if hits == 0 {
                return None;
            }
            let relevance = hits as f64 / terms.len() as f64;
            Some((product, 0.8 * relevance + 0.2 * product.popularity))
        });

        Ok(Self::ranked(matches, k))
    }

    async fn recommend(
        &self,
        _user_id: &str,
        category: Option<&str>,
        k: usize,
    ) -> Result<Vec<RankedProduct>> {
        check_k(k)?;
        let candidates = self
            .in_category(category)
            .map(|product| (product, product.popularity));
        Ok(Self::ranked(candidates, k))
    }
}
