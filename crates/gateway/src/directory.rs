use std::collections::HashMap;

use {
    chrono::{DateTime, Utc},
    medlink_protocol::{DirectoryEntry, HospitalProfile},
};

use crate::error::HubError;

/// The live association between a transport connection and a hospital.
/// A binding only exists while the hospital is online.
#[derive(Debug, Clone)]
pub struct Binding {
    pub conn_id: String,
    pub profile: HospitalProfile,
    pub connected_at: DateTime<Utc>,
}

/// Registry of known hospitals and of the connections currently bound to
/// them.
///
/// Registered profiles live for the lifetime of the process. Bindings are
/// keyed by connection, so one hospital may hold several at once; the
/// directory view collapses them back to one row per hospital id.
#[derive(Default)]
pub struct DirectoryStore {
    /// hospital_id → profile
    registered: HashMap<String, HospitalProfile>,
    /// conn_id → binding
    bindings: HashMap<String, Binding>,
}

impl DirectoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a profile by id.
    pub fn register(&mut self, profile: HospitalProfile) -> Result<&HospitalProfile, HubError> {
        let profile = profile.validated()?;
        let id = profile.id.clone();
        self.registered.insert(id.clone(), profile);
        self.registered
            .get(&id)
            .ok_or_else(|| HubError::Internal(format!("registration of {id} was lost")))
    }

    /// All registered profiles, ordered by id.
    pub fn list_registered(&self) -> Vec<HospitalProfile> {
        let mut list: Vec<_> = self.registered.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub fn registered_count(&self) -> usize {
        self.registered.len()
    }

    /// Bind a connection to a profile, replacing any earlier binding of the
    /// same connection.
    pub fn bind(&mut self, conn_id: &str, profile: HospitalProfile) -> Option<Binding> {
        self.bindings.insert(conn_id.to_string(), Binding {
            conn_id: conn_id.to_string(),
            profile,
            connected_at: Utc::now(),
        })
    }

    pub fn unbind(&mut self, conn_id: &str) -> Option<Binding> {
        self.bindings.remove(conn_id)
    }

    pub fn binding_for(&self, conn_id: &str) -> Option<&Binding> {
        self.bindings.get(conn_id)
    }

    pub fn is_online(&self, hospital_id: &str) -> bool {
        self.bindings.values().any(|b| b.profile.id == hospital_id)
    }

    /// Number of distinct hospitals with at least one live binding.
    pub fn online_count(&self) -> usize {
        let mut ids: Vec<&str> = self.bindings.values().map(|b| b.profile.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// Every registered profile with its online flag, recomputed from the
    /// current bindings.
    pub fn compute_directory(&self) -> Vec<DirectoryEntry> {
        self.list_registered()
            .into_iter()
            .map(|profile| {
                let is_online = self.is_online(&profile.id);
                DirectoryEntry { profile, is_online }
            })
            .collect()
    }
}
