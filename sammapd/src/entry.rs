//! Entries are the unit of storage and the unit of search results. An
//! [`Entry`] is a DN plus a collection of attribute-value sets (AVAs).
//! Attribute names are normalised to lowercase on the way in; values keep
//! their original form and compare case-insensitively, which is the
//! behaviour the flat-schema stores this layer fronts actually exhibit.

use std::collections::BTreeMap;

use ldap3_proto::simple::{LdapPartialAttribute, LdapSearchResultEntry};

use crate::prelude::*;

pub(crate) fn value_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    dn: Dn,
    avas: BTreeMap<AttrString, Vec<String>>,
}

impl Entry {
    pub fn new(dn: Dn) -> Self {
        Entry {
            dn,
            avas: BTreeMap::new(),
        }
    }

    pub fn from_avas(dn: Dn, avas: BTreeMap<AttrString, Vec<String>>) -> Self {
        let mut e = Entry::new(dn);
        for (attr, values) in avas {
            for v in values {
                e.add_ava(attr.as_str(), &v);
            }
        }
        e
    }

    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    pub fn set_dn(&mut self, dn: Dn) {
        self.dn = dn;
    }

    pub fn avas(&self) -> &BTreeMap<AttrString, Vec<String>> {
        &self.avas
    }

    /// Append a value to an attribute. Returns false if the value was
    /// already present (compared case-insensitively).
    pub fn add_ava(&mut self, attr: &str, value: &str) -> bool {
        let values = self.avas.entry(attr.to_lowercase().into()).or_default();
        if values.iter().any(|v| value_eq(v, value)) {
            return false;
        }
        values.push(value.to_string());
        true
    }

    /// Replace all values of an attribute.
    pub fn set_ava(&mut self, attr: &str, values: Vec<String>) {
        if values.is_empty() {
            self.avas.remove(&AttrString::from(attr.to_lowercase()));
        } else {
            self.avas.insert(attr.to_lowercase().into(), values);
        }
    }

    /// Remove an attribute entirely. Returns false if it was absent.
    pub fn purge_ava(&mut self, attr: &str) -> bool {
        self.avas
            .remove(&AttrString::from(attr.to_lowercase()))
            .is_some()
    }

    /// Remove a single value. Returns false if it was absent. An
    /// attribute left with no values is removed, never kept empty.
    pub fn remove_ava(&mut self, attr: &str, value: &str) -> bool {
        let key = AttrString::from(attr.to_lowercase());
        let Some(values) = self.avas.get_mut(&key) else {
            return false;
        };
        let before = values.len();
        values.retain(|v| !value_eq(v, value));
        let removed = values.len() != before;
        if values.is_empty() {
            self.avas.remove(&key);
        }
        removed
    }

    pub fn get_ava(&self, attr: &str) -> Option<&[String]> {
        self.avas
            .get(&AttrString::from(attr.to_lowercase()))
            .map(|v| v.as_slice())
    }

    pub fn get_ava_single(&self, attr: &str) -> Option<&str> {
        match self.get_ava(attr) {
            Some([v]) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn attribute_pres(&self, attr: &str) -> bool {
        self.avas.contains_key(&AttrString::from(attr.to_lowercase()))
    }

    pub fn attribute_equality(&self, attr: &str, value: &str) -> bool {
        self.get_ava(attr)
            .map(|vals| vals.iter().any(|v| value_eq(v, value)))
            .unwrap_or(false)
    }

    /// Evaluate a filter against this entry. This is the authoritative
    /// matching used after logical entries are assembled; an absent
    /// attribute fails equality and so satisfies its negation.
    pub fn matches(&self, filter: &Filter) -> bool {
        match filter {
            Filter::Eq(attr, value) => self.attribute_equality(attr, value),
            Filter::Sub(attr, sub) => self
                .get_ava(attr)
                .map(|vals| vals.iter().any(|v| sub.matches(v)))
                .unwrap_or(false),
            Filter::Pres(attr) => self.attribute_pres(attr),
            Filter::And(children) => children.iter().all(|c| self.matches(c)),
            Filter::Or(children) => children.iter().any(|c| self.matches(c)),
            Filter::Not(child) => !self.matches(child),
        }
    }

    /// Reduce to the requested attributes. An empty request means all.
    pub fn project(&self, attrs: &[String]) -> Entry {
        if attrs.is_empty() {
            return self.clone();
        }
        let mut out = Entry::new(self.dn.clone());
        for attr in attrs {
            let key = AttrString::from(attr.to_lowercase());
            if let Some(values) = self.avas.get(&key) {
                out.avas.insert(key, values.clone());
            }
        }
        out
    }

    pub fn to_ldap(&self) -> LdapSearchResultEntry {
        LdapSearchResultEntry {
            dn: self.dn.to_string(),
            attributes: self
                .avas
                .iter()
                .map(|(attr, values)| LdapPartialAttribute {
                    atype: attr.to_string(),
                    vals: values.iter().map(|v| v.as_bytes().to_vec()).collect(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::filter::{f_and, f_eq, f_not, f_pres};

    fn entry() -> Entry {
        let mut e = Entry::new(Dn::parse("cn=Niemand,cn=Users,dc=vernstok,dc=nl").unwrap());
        e.add_ava("cn", "Niemand");
        e.add_ava("unixName", "bin");
        e.add_ava("sambaUnicodePwd", "geheim");
        e
    }

    #[test]
    fn test_ava_normalisation_and_dedup() {
        let mut e = entry();
        assert!(e.attribute_pres("UNIXNAME"));
        assert!(e.attribute_equality("unixname", "BIN"));
        // A duplicate value is rejected.
        assert!(!e.add_ava("UnixName", "bin"));
        assert_eq!(e.get_ava("unixName").unwrap().len(), 1);
    }

    #[test]
    fn test_remove_leaves_no_empty_attribute() {
        let mut e = entry();
        assert!(e.remove_ava("unixName", "bin"));
        assert!(!e.attribute_pres("unixName"));
        assert_eq!(e.get_ava("unixName"), None);
        assert!(!e.remove_ava("unixName", "bin"));
    }

    #[test]
    fn test_matches() {
        let e = entry();
        assert!(e.matches(&f_eq("unixname", "bin")));
        assert!(e.matches(&f_and(vec![
            f_eq("unixname", "bin"),
            f_eq("sambaunicodepwd", "geheim"),
        ])));
        // Negation over an absent attribute holds.
        assert!(e.matches(&f_not(f_eq("description", "x"))));
        assert!(e.matches(&f_not(f_pres("description"))));
        assert!(!e.matches(&f_pres("description")));
    }

    #[test]
    fn test_projection() {
        let e = entry();
        let p = e.project(&["unixName".to_string(), "description".to_string()]);
        assert!(p.attribute_pres("unixname"));
        assert!(!p.attribute_pres("cn"));
        // Absent stays absent, not empty.
        assert_eq!(p.get_ava("description"), None);
    }

    #[test]
    fn test_to_ldap() {
        let e = entry();
        let le = e.to_ldap();
        assert_eq!(le.dn, "cn=Niemand,cn=Users,dc=vernstok,dc=nl");
        let pwd = le
            .attributes
            .iter()
            .find(|a| a.atype == "sambaunicodepwd")
            .unwrap();
        assert_eq!(pwd.vals, vec![b"geheim".to_vec()]);
    }
}
