//! The directory engine abstraction. The mapping layer never owns
//! storage; it drives two engines through [`DirectoryBackend`] and is
//! handed the connections by its caller. Engines provide their own
//! transaction discipline - this layer issues synchronous calls and
//! compensates across the pair when it has to.

pub mod mem;
pub mod sql;

use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Base,
    OneLevel,
    Subtree,
}

/// Whether `dn` falls inside a search scope anchored at `base`.
pub fn in_scope(base: &Dn, scope: Scope, dn: &Dn) -> bool {
    match scope {
        Scope::Base => dn == base,
        Scope::OneLevel => dn.parent().as_ref() == Some(base),
        Scope::Subtree => dn.is_under(base),
    }
}

/// The collaborator contract of an LDB-style embedded directory engine.
/// A `None` filter matches everything (enumeration). A search whose base
/// does not exist returns an empty result, not an error, which is the
/// behaviour of the engines this layer fronts.
pub trait DirectoryBackend {
    fn search(
        &self,
        base: &Dn,
        scope: Scope,
        filter: Option<&Filter>,
        attrs: &[String],
    ) -> Result<Vec<Entry>, LdbError>;

    fn add(&mut self, entry: Entry) -> Result<(), LdbError>;

    fn modify(&mut self, dn: &Dn, mods: &ModifyList) -> Result<(), LdbError>;

    fn rename(&mut self, old_dn: &Dn, new_dn: &Dn) -> Result<(), LdbError>;

    fn delete(&mut self, dn: &Dn) -> Result<(), LdbError>;
}

/// Entries keep their RDN attribute in sync with their DN, the way the
/// rdn_name module does in the engine stack this models: add fills in a
/// missing RDN value, rename swaps the old one for the new.
pub(crate) fn ensure_rdn_value(entry: &mut Entry) {
    if let Some(rdn) = entry.dn().rdn() {
        let attr = rdn.attr.clone();
        let value = rdn.value.clone();
        if !entry.attribute_equality(&attr, &value) {
            entry.add_ava(&attr, &value);
        }
    }
}

pub(crate) fn apply_rename(entry: &mut Entry, old_dn: &Dn, new_dn: &Dn) {
    if let Some(old_rdn) = old_dn.rdn() {
        entry.remove_ava(&old_rdn.attr, &old_rdn.value);
    }
    entry.set_dn(new_dn.clone());
    ensure_rdn_value(entry);
}
