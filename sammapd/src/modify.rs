//! Modification lists. These express the attribute-level changes of an
//! LDIF `changetype: modify` record: the order of changes matters and
//! each change is applied against the entry state left by the previous
//! one.

use std::slice;

use hashbrown::HashSet;

use crate::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modify {
    /// These values should be added to the attribute.
    Add(AttrString, Vec<String>),
    /// The attribute should hold exactly these values. An empty list
    /// removes the attribute.
    Replace(AttrString, Vec<String>),
    /// These values should be removed, or the whole attribute if the
    /// list is empty.
    Delete(AttrString, Vec<String>),
}

pub fn m_add(attr: &str, values: &[&str]) -> Modify {
    Modify::Add(
        attr.to_lowercase().into(),
        values.iter().map(|v| v.to_string()).collect(),
    )
}

pub fn m_replace(attr: &str, values: &[&str]) -> Modify {
    Modify::Replace(
        attr.to_lowercase().into(),
        values.iter().map(|v| v.to_string()).collect(),
    )
}

pub fn m_delete(attr: &str, values: &[&str]) -> Modify {
    Modify::Delete(
        attr.to_lowercase().into(),
        values.iter().map(|v| v.to_string()).collect(),
    )
}

pub fn m_purge(attr: &str) -> Modify {
    Modify::Delete(attr.to_lowercase().into(), Vec::new())
}

impl Modify {
    pub fn attr(&self) -> &AttrString {
        match self {
            Modify::Add(attr, _) | Modify::Replace(attr, _) | Modify::Delete(attr, _) => attr,
        }
    }

    pub fn values(&self) -> &[String] {
        match self {
            Modify::Add(_, v) | Modify::Replace(_, v) | Modify::Delete(_, v) => v,
        }
    }

    /// The same change expressed against a different attribute name with
    /// transformed values - how a change crosses the schema map.
    pub fn with_attr_values(&self, attr: AttrString, values: Vec<String>) -> Modify {
        match self {
            Modify::Add(..) => Modify::Add(attr, values),
            Modify::Replace(..) => Modify::Replace(attr, values),
            Modify::Delete(..) => Modify::Delete(attr, values),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifyList {
    mods: Vec<Modify>,
}

impl<'a> IntoIterator for &'a ModifyList {
    type IntoIter = slice::Iter<'a, Modify>;
    type Item = &'a Modify;

    fn into_iter(self) -> Self::IntoIter {
        self.mods.iter()
    }
}

impl ModifyList {
    pub fn new() -> Self {
        ModifyList { mods: Vec::new() }
    }

    pub fn new_list(mods: Vec<Modify>) -> Self {
        ModifyList { mods }
    }

    pub fn push_mod(&mut self, m: Modify) {
        self.mods.push(m)
    }

    pub fn iter(&self) -> slice::Iter<'_, Modify> {
        self.mods.iter()
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }

    /// Apply the changes in order. The first failing change aborts the
    /// application; callers hand in a scratch copy of the entry.
    pub fn apply_to(&self, entry: &mut Entry) -> Result<(), LdbError> {
        for m in &self.mods {
            match m {
                Modify::Add(attr, values) => {
                    if values.is_empty() {
                        return Err(LdbError::ConstraintViolation);
                    }
                    for v in values {
                        if !entry.add_ava(attr, v) {
                            return Err(LdbError::AttributeOrValueExists);
                        }
                    }
                }
                Modify::Replace(attr, values) => {
                    entry.set_ava(attr, values.clone());
                }
                Modify::Delete(attr, values) => {
                    if values.is_empty() {
                        if !entry.purge_ava(attr) {
                            return Err(LdbError::ConstraintViolation);
                        }
                    } else {
                        for v in values {
                            if !entry.remove_ava(attr, v) {
                                return Err(LdbError::ConstraintViolation);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// A modify list that restores `pre` for every attribute this list
    /// touches. Used to compensate the first backend when the second
    /// backend of a cross-store operation fails; restoring the previous
    /// value set is exact regardless of how far the application got.
    pub fn inverse_against(&self, pre: &Entry) -> ModifyList {
        let mut seen: HashSet<AttrString> = HashSet::new();
        let mut mods = Vec::new();
        for m in &self.mods {
            let attr = m.attr();
            if !seen.insert(attr.clone()) {
                continue;
            }
            match pre.get_ava(attr) {
                Some(values) => mods.push(Modify::Replace(attr.clone(), values.to_vec())),
                None => mods.push(Modify::Replace(attr.clone(), Vec::new())),
            }
        }
        ModifyList { mods }
    }
}
