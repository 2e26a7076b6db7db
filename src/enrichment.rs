// BWT enrichment side-channel
//
// BWT cases in the WABO export carry neither access flags nor registry ids.
// Both come from a separate JSON file keyed by `{district}_{case number}`.

use crate::entities::{Access, DirectPointer};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{error, info};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichedAddress {
    /// Lowercased `{street}_{house number}`
    pub straat_huisnummer: String,
    #[serde(default)]
    pub panden: Vec<String>,
    #[serde(default)]
    pub verblijfsobjecten: Vec<String>,
    #[serde(default)]
    pub openbareruimte_id: Option<String>,
    #[serde(default)]
    pub nummeraanduidingen: Vec<String>,
}

impl EnrichedAddress {
    pub fn to_pointer(&self) -> DirectPointer {
        DirectPointer {
            buildings: self.panden.clone(),
            units: self.verblijfsobjecten.clone(),
            address_points: self.nummeraanduidingen.clone(),
            place_name: self.openbareruimte_id.clone().filter(|id| !id.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichedCase {
    #[serde(default)]
    pub dossier_access: Option<String>,
    #[serde(default)]
    pub adressen: Vec<EnrichedAddress>,
}

#[derive(Debug, Clone, Default)]
pub struct Enrichment {
    cases: HashMap<String, EnrichedCase>,
}

impl Enrichment {
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(Enrichment {
            cases: serde_json::from_str(content)?,
        })
    }

    /// A missing file is logged and yields an empty enrichment: BWT cases
    /// then import as restricted and without registry ids.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            error!(path = %path.display(), "BWT enrichment file not found");
            return Ok(Enrichment::default());
        }
        let content = std::fs::read_to_string(path)?;
        let enrichment = Enrichment::from_json(&content)?;
        info!(path = %path.display(), cases = enrichment.len(), "BWT enrichment loaded");
        Ok(enrichment)
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Case access; restricted unless the file says otherwise
    pub fn access(&self, key: &str) -> Access {
        self.cases
            .get(key)
            .and_then(|c| c.dossier_access.as_deref())
            .and_then(Access::parse)
            .unwrap_or(Access::Restricted)
    }

    pub fn address(&self, key: &str, street: &str, number: &str) -> Option<&EnrichedAddress> {
        let wanted = format!("{}_{}", street, number).to_lowercase();
        self.cases
            .get(key)?
            .adressen
            .iter()
            .find(|a| a.straat_huisnummer == wanted)
    }
}
