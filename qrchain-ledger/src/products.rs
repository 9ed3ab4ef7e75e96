//! Product table, code index and per-product history.

use std::collections::HashMap;

use crate::ledger::LedgerError;
use crate::types::{HistoryEntry, ProductId};

/// A tracked product: its immutable code and append-only history.
#[derive(Debug, Clone)]
pub(crate) struct Product {
    pub(crate) code: String,
    pub(crate) history: Vec<HistoryEntry>,
}

impl Product {
    /// Tail of the history; always present for a committed product.
    pub(crate) fn latest(&self) -> Option<&HistoryEntry> {
        self.history.last()
    }
}

/// Products indexed by sequential ID (position + 1) and by code.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProductTable {
    products: Vec<Product>,
    by_code: HashMap<String, ProductId>,
}

impl ProductTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn total(&self) -> u64 {
        self.products.len() as u64
    }

    pub(crate) fn next_id(&self) -> ProductId {
        ProductId::new(self.total()).next()
    }

    pub(crate) fn contains_code(&self, code: &str) -> bool {
        self.by_code.contains_key(code)
    }

    pub(crate) fn id_for_code(&self, code: &str) -> Result<ProductId, LedgerError> {
        self.by_code
            .get(code)
            .copied()
            .ok_or_else(|| LedgerError::NotFound(format!("no product with code '{code}'")))
    }

    pub(crate) fn get(&self, id: ProductId) -> Result<&Product, LedgerError> {
        id.index()
            .and_then(|idx| self.products.get(idx))
            .ok_or_else(|| product_not_found(id))
    }

    /// Register a product with its first history entry. Callers check uniqueness first.
    pub(crate) fn insert(&mut self, code: String, first: HistoryEntry) -> ProductId {
        let id = self.next_id();
        self.by_code.insert(code.clone(), id);
        self.products.push(Product {
            code,
            history: vec![first],
        });
        id
    }

    pub(crate) fn append(&mut self, id: ProductId, entry: HistoryEntry) -> Result<(), LedgerError> {
        let product = id
            .index()
            .and_then(|idx| self.products.get_mut(idx))
            .ok_or_else(|| product_not_found(id))?;
        product.history.push(entry);
        Ok(())
    }

    /// Products in ID order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (ProductId, &Product)> {
        self.products
            .iter()
            .enumerate()
            .map(|(idx, product)| (ProductId::new(idx as u64 + 1), product))
    }
}

pub(crate) fn product_not_found(id: ProductId) -> LedgerError {
    LedgerError::NotFound(format!("product {id} does not exist"))
}
