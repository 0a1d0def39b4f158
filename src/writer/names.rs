//! Stream-unique dataset names
//!
//! Names are bound to the channel that first used them. A later call
//! formatting the same channel gets the same names back, so its packets match
//! the live descriptors and append to them; another channel asking for a
//! taken name gets a numbered variant instead.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::properties;
use crate::types::DataSet;

#[derive(Debug, Default)]
pub struct NameRegistry {
    /// name -> channel that owns it
    owners: HashMap<String, String>,
    /// dependency identity -> name, for the current call only
    identities: HashMap<usize, (Arc<DataSet>, String)>,
    anonymous: usize,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start naming a new top-level dataset.
    pub fn begin(&mut self) {
        self.identities.clear();
    }

    /// Name of a top-level dataset: its `NAME`, or `ds_<n>`.
    pub fn channel_name(&mut self, data_set: &DataSet) -> String {
        match data_set.name() {
            Some(name) => self.claim(name, name),
            None => loop {
                let candidate = format!("ds_{}", self.anonymous);
                self.anonymous += 1;
                if !self.owners.contains_key(&candidate) {
                    return self.claim(&candidate, &candidate);
                }
            },
        }
    }

    /// Name of `dependency`, attached to `owner` as property `role`.
    ///
    /// The same `Arc` gets the same name for the rest of the call.
    pub fn dependency_name(
        &mut self,
        dependency: &Arc<DataSet>,
        role: &str,
        owner: &str,
    ) -> String {
        let key = Arc::as_ptr(dependency) as usize;
        if let Some((_, name)) = self.identities.get(&key) {
            return name.clone();
        }
        let candidate = match dependency.name() {
            Some(name) => name.to_string(),
            None => role_name(dependency, role, owner),
        };
        let name = self.claim_part(&candidate, owner);
        // holding the Arc keeps the address from being reused within the call
        self.identities.insert(key, (Arc::clone(dependency), name.clone()));
        name
    }

    /// Bind `candidate` to `owner`, numbering it if another channel owns it.
    pub fn claim(&mut self, candidate: &str, owner: &str) -> String {
        self.bind(candidate, owner, false)
    }

    /// Like [`claim`](Self::claim), but never hands back `owner` itself.
    pub fn claim_part(&mut self, candidate: &str, owner: &str) -> String {
        self.bind(candidate, owner, true)
    }

    fn bind(&mut self, candidate: &str, owner: &str, dependency: bool) -> String {
        let mut name = candidate.to_string();
        let mut suffix = 1;
        while let Some(existing) = self.owners.get(&name) {
            // a dependency never shares its owner's channel name
            if existing == owner && !(dependency && name == owner) {
                return name;
            }
            name = format!("{}_{}", candidate, suffix);
            suffix += 1;
        }
        self.owners.insert(name.clone(), owner.to_string());
        name
    }

    pub fn owner_of(&self, name: &str) -> Option<&str> {
        self.owners.get(name).map(String::as_str)
    }
}

fn role_name(dependency: &DataSet, role: &str, owner: &str) -> String {
    match role {
        properties::DEPEND_0 if dependency.units().is_time_location() => "time".to_string(),
        properties::DEPEND_0 => format!("{}_x", owner),
        properties::DEPEND_1 => format!("{}_y", owner),
        properties::DEPEND_2 => format!("{}_z", owner),
        other => format!("{}_{}", owner, other.to_lowercase()),
    }
}
