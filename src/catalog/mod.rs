//! Card Catalog
//!
//! Query and record types for looking a card up by name and number, and the
//! [`CardCatalog`] seam the scanner talks through.

pub mod pokemon_tcg;

pub use pokemon_tcg::PokemonTcgCatalog;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ScanError;

/// Price fields of one print variant, e.g. `market -> 12.5`
pub type VariantPrices = BTreeMap<String, Option<f64>>;

/// What to look up: an exact name, narrowed by an exact number when known
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardQuery {
    pub name: String,
    pub number: Option<String>,
}

impl CardQuery {
    pub fn new(name: impl Into<String>, number: Option<String>) -> Self {
        Self {
            name: name.into(),
            number,
        }
    }

    /// Search expression in the catalog's `field:"value"` syntax.
    /// Double quotes inside values are dropped.
    pub fn to_search_string(&self) -> String {
        let name = strip_quotes(&self.name);
        match &self.number {
            Some(number) => format!(r#"name:"{}" number:"{}""#, name, strip_quotes(number)),
            None => format!(r#"name:"{}""#, name),
        }
    }
}

fn strip_quotes(value: &str) -> String {
    value.chars().filter(|&c| c != '"').collect()
}

/// Card metadata returned by a catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardRecord {
    pub name: String,
    pub set: CardSet,
    #[serde(default)]
    pub rarity: Option<String>,
    #[serde(default)]
    pub tcgplayer: Option<TcgPlayer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardSet {
    pub name: String,
}

/// Market pricing block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcgPlayer {
    #[serde(default)]
    pub prices: Option<BTreeMap<String, VariantPrices>>,
}

impl CardRecord {
    /// Prices by variant, empty when the record carries none
    pub fn prices(&self) -> BTreeMap<String, VariantPrices> {
        self.tcgplayer
            .as_ref()
            .and_then(|t| t.prices.clone())
            .unwrap_or_default()
    }

    pub fn rarity_or_unknown(&self) -> &str {
        self.rarity.as_deref().unwrap_or("Unknown")
    }
}

/// A read-only card lookup service
pub trait CardCatalog: Send + Sync {
    /// First record matching the query, `Ok(None)` when nothing matches
    fn find_card(&self, query: &CardQuery) -> Result<Option<CardRecord>, ScanError>;
}
