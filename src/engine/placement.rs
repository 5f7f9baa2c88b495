//! Placement lookup capability.
//!
//! Ad placements are identified by the id of the element that holds them. Ad servers may
//! refer to them by an ad unit code instead, which the resolver maps back to the element id.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub trait PlacementResolver: Send + Sync {
    /// Returns the id of an existing placement element for a div id or an ad unit code.
    fn resolve(&self, div_id_or_ad_unit_code: &str) -> Option<String>;
}

/// Called once an audit log is available for a placement.
pub trait AuditHandler: Send + Sync {
    fn bind(&self, placement_id: &str);
}

pub type PlacementResolverHandle = Arc<dyn PlacementResolver + Send + Sync>;
pub type AuditHandlerHandle = Arc<dyn AuditHandler + Send + Sync>;

/// Resolver over a fixed set of placements.
#[derive(Debug, Clone, Default)]
pub struct StaticPlacementResolver {
    placements: HashSet<String>,
    ad_units: HashMap<String, String>,
}

impl StaticPlacementResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_placement<S: Into<String>>(mut self, div_id: S) -> Self {
        self.placements.insert(div_id.into());
        self
    }

    /// Maps an ad unit code to an existing placement.
    pub fn with_ad_unit<C: Into<String>, D: Into<String>>(mut self, ad_unit_code: C, div_id: D) -> Self {
        self.ad_units.insert(ad_unit_code.into(), div_id.into());
        self
    }
}

impl PlacementResolver for StaticPlacementResolver {
    fn resolve(&self, div_id_or_ad_unit_code: &str) -> Option<String> {
        let div_id = self
            .ad_units
            .get(div_id_or_ad_unit_code)
            .map(String::as_str)
            .unwrap_or(div_id_or_ad_unit_code);

        self.placements.contains(div_id).then(|| div_id.to_string())
    }
}
