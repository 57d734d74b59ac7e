use std::collections::HashMap;

/// Capability required to see every loan and to change loan state,
/// renewals included.
pub const CAP_MARK_RETURNED: &str = "loans:mark-returned";

/// Capability required for author/book record maintenance.
pub const CAP_EDIT_CATALOG: &str = "catalog:edit";

/// Per-actor capability grants. Loaded once at startup; the map key is the
/// actor (staff login), the value the capabilities they hold.
#[derive(Debug, Clone, Default)]
pub struct CirculationConfig {
    pub caps: HashMap<String, Vec<String>>,
}

/// Read grants from `LIBRARY_CAPS`, a JSON object of
/// `{"actor": ["capability", ...]}`. Malformed or missing input yields an
/// empty grant table, which denies everything.
pub fn load_from_env() -> CirculationConfig {
    let caps = std::env::var("LIBRARY_CAPS")
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();
    CirculationConfig { caps }
}

impl CirculationConfig {
    pub fn grant(mut self, actor: &str, capability: &str) -> Self {
        self.caps
            .entry(actor.to_string())
            .or_default()
            .push(capability.to_string());
        self
    }

    pub fn has_capability(&self, actor: &str, capability: &str) -> bool {
        self.caps
            .get(actor)
            .map(|granted| granted.iter().any(|c| c == capability))
            .unwrap_or(false)
    }
}
