//! An in-memory directory engine. Deterministic (entries iterate in
//! normalized-DN order), with the same operation semantics as the
//! persistent engine; the acceptance tests run against this.

use std::collections::BTreeMap;

use crate::be::{apply_rename, ensure_rdn_value, in_scope, DirectoryBackend, Scope};
use crate::prelude::*;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: BTreeMap<String, Entry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn has_children(&self, dn: &Dn) -> bool {
        self.entries
            .values()
            .any(|e| e.dn() != dn && e.dn().is_under(dn))
    }
}

impl DirectoryBackend for MemoryBackend {
    fn search(
        &self,
        base: &Dn,
        scope: Scope,
        filter: Option<&Filter>,
        attrs: &[String],
    ) -> Result<Vec<Entry>, LdbError> {
        Ok(self
            .entries
            .values()
            .filter(|e| in_scope(base, scope, e.dn()))
            .filter(|e| filter.map(|f| e.matches(f)).unwrap_or(true))
            .map(|e| e.project(attrs))
            .collect())
    }

    fn add(&mut self, entry: Entry) -> Result<(), LdbError> {
        let key = entry.dn().norm().to_string();
        if self.entries.contains_key(&key) {
            return Err(LdbError::EntryAlreadyExists);
        }
        let mut entry = entry;
        ensure_rdn_value(&mut entry);
        self.entries.insert(key, entry);
        Ok(())
    }

    fn modify(&mut self, dn: &Dn, mods: &ModifyList) -> Result<(), LdbError> {
        let entry = self
            .entries
            .get(dn.norm())
            .ok_or(LdbError::NoSuchObject)?;
        // Apply against a scratch copy so a failing change list leaves
        // the store untouched.
        let mut scratch = entry.clone();
        mods.apply_to(&mut scratch)?;
        self.entries.insert(dn.norm().to_string(), scratch);
        Ok(())
    }

    fn rename(&mut self, old_dn: &Dn, new_dn: &Dn) -> Result<(), LdbError> {
        if new_dn.is_under(old_dn) && new_dn != old_dn {
            return Err(LdbError::UnwillingToPerform);
        }
        if self.entries.contains_key(new_dn.norm()) {
            return Err(LdbError::EntryAlreadyExists);
        }
        let mut entry = self
            .entries
            .remove(old_dn.norm())
            .ok_or(LdbError::NoSuchObject)?;
        apply_rename(&mut entry, old_dn, new_dn);
        self.entries.insert(new_dn.norm().to_string(), entry);
        Ok(())
    }

    fn delete(&mut self, dn: &Dn) -> Result<(), LdbError> {
        if !self.entries.contains_key(dn.norm()) {
            return Err(LdbError::NoSuchObject);
        }
        if self.has_children(dn) {
            return Err(LdbError::NotAllowedOnNonLeaf);
        }
        self.entries.remove(dn.norm());
        Ok(())
    }
}
