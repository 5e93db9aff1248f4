//! The schema map: the static, bidirectional table of attribute-name
//! translations and per-attribute value transforms between the local
//! (AD-style) schema and the remote (legacy flat NT-style) schema, plus
//! the objectClass translations and the storage-locality rules.
//!
//! The table is built once at startup - maps are registered under a name
//! (`samba3sam`) and configured from `@MAP`/`@FROM`/`@TO` LDIF
//! directives - and never mutated afterwards.

use hashbrown::HashMap;

use crate::prelude::*;
use crate::sid::Sid;

/// A value transform between the two schemas. `None` means the value has
/// no representation on the other side.
pub type ValueConvert = fn(&str) -> Option<String>;

/// Compute the local value of a generated attribute from the raw remote
/// half of an entry.
pub type GenerateLocal = fn(&Entry) -> Option<String>;

/// Compute the remote attribute/value pair backing a generated attribute,
/// from the local value and the logical entry it belongs to.
pub type GenerateRemote = fn(&str, &Entry) -> Option<(AttrString, String)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageSide {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageLocality {
    LocalOnly,
    RemoteOnly,
    Split,
}

/// How one attribute crosses the map.
#[derive(Debug, Clone)]
pub enum MapBehavior {
    /// Pinned to the local store regardless of the unmapped-side policy.
    Ignore,
    /// Stored remotely under the same name, values untouched.
    Keep,
    /// Stored remotely under a different name, values untouched.
    Rename { remote_name: AttrString },
    /// Stored remotely under a different name with value transforms.
    /// The transforms are mutual inverses for every value provisioning
    /// actually produces.
    Convert {
        remote_name: AttrString,
        to_remote: ValueConvert,
        to_local: ValueConvert,
    },
    /// Not stored at all: computed from other remote data on read, and
    /// folded into other remote data on write. Not equality-searchable
    /// without enumerating the remote store.
    Generate {
        remote_name: AttrString,
        generate_local: GenerateLocal,
        generate_remote: GenerateRemote,
    },
}

#[derive(Debug, Clone)]
pub struct AttributeMapping {
    pub local_name: AttrString,
    pub behavior: MapBehavior,
    /// Also retain an unmapped verbatim copy in the local store even
    /// though the attribute is sent remotely. Used for the RDN attribute
    /// so both halves of a split record carry it.
    pub keep_in_local: bool,
}

impl AttributeMapping {
    fn new(local_name: &str, behavior: MapBehavior) -> Self {
        AttributeMapping {
            local_name: local_name.to_lowercase().into(),
            behavior,
            keep_in_local: false,
        }
    }

    fn with_keep_in_local(mut self) -> Self {
        self.keep_in_local = true;
        self
    }

    pub fn is_generated(&self) -> bool {
        matches!(self.behavior, MapBehavior::Generate { .. })
    }

    /// The name this attribute has in the remote store, if it is stored
    /// there at all.
    pub fn remote_name(&self) -> Option<&AttrString> {
        match &self.behavior {
            MapBehavior::Ignore => None,
            MapBehavior::Keep => Some(&self.local_name),
            MapBehavior::Rename { remote_name }
            | MapBehavior::Convert { remote_name, .. }
            | MapBehavior::Generate { remote_name, .. } => Some(remote_name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassMapping {
    pub local_name: AttrString,
    pub remote_name: AttrString,
    pub locality: StorageLocality,
}

/// The per-map configuration: which registered table, and the base DNs of
/// the two naming contexts. Built once from parsed LDIF directives.
#[derive(Debug, Clone)]
pub struct MapConfig {
    pub name: String,
    pub local_base: Dn,
    pub remote_base: Dn,
    /// Which store holds attributes the map knows nothing about. The
    /// policy is deployment configuration, not rewriter logic.
    pub unmapped_side: StorageSide,
}

impl MapConfig {
    pub fn new(name: &str, local_base: Dn, remote_base: Dn) -> Self {
        MapConfig {
            name: name.to_string(),
            local_base,
            remote_base,
            unmapped_side: StorageSide::Local,
        }
    }
}

/// Which store is consulted for an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrOwner {
    Local,
    Remote,
    Generated,
}

pub struct SchemaMap {
    config: MapConfig,
    attrs: HashMap<AttrString, AttributeMapping>,
    remote_index: HashMap<AttrString, AttrString>,
    classes: Vec<ClassMapping>,
    /// Remote objectClass values with no local meaning, dropped when
    /// translating remote entries (eg `top`).
    drop_remote_classes: Vec<AttrString>,
    correlation_local: AttrString,
    correlation_remote: AttrString,
}

impl SchemaMap {
    /// Look up a registered map table by name. The table itself is
    /// compiled in; the directives only select and parameterise it.
    pub fn by_name(config: MapConfig) -> Result<SchemaMap, LdbError> {
        match config.name.as_str() {
            "samba3sam" => Ok(Self::samba3sam(config)),
            other => Err(LdbError::OperationsError(format!(
                "unknown schema map: {}",
                other
            ))),
        }
    }

    /// The samba3sam table: AD-style SAM attributes over a legacy
    /// samba3 flat schema.
    pub fn samba3sam(config: MapConfig) -> SchemaMap {
        let attrs = vec![
            AttributeMapping::new("cn", MapBehavior::Keep).with_keep_in_local(),
            AttributeMapping::new("description", MapBehavior::Keep),
            AttributeMapping::new(
                "unixName",
                MapBehavior::Rename {
                    remote_name: "uid".into(),
                },
            ),
            AttributeMapping::new(
                "name",
                MapBehavior::Rename {
                    remote_name: "displayname".into(),
                },
            ),
            AttributeMapping::new(
                "sambaUnicodePwd",
                MapBehavior::Rename {
                    remote_name: "sambantpassword".into(),
                },
            ),
            AttributeMapping::new(
                "badPwdCount",
                MapBehavior::Rename {
                    remote_name: "sambabadpasswordcount".into(),
                },
            ),
            AttributeMapping::new(
                "nextRid",
                MapBehavior::Rename {
                    remote_name: "sambanextrid".into(),
                },
            ),
            AttributeMapping::new(
                "lastLogon",
                MapBehavior::Rename {
                    remote_name: "sambalogontime".into(),
                },
            ),
            AttributeMapping::new(
                "objectSid",
                MapBehavior::Convert {
                    remote_name: "sambasid".into(),
                    to_remote: convert_sid_to_remote,
                    to_local: convert_val_copy,
                },
            ),
            AttributeMapping::new(
                "primaryGroupID",
                MapBehavior::Generate {
                    remote_name: "sambaprimarygroupsid".into(),
                    generate_local: generate_primary_group_id,
                    generate_remote: generate_primary_group_sid,
                },
            ),
        ];
        let classes = vec![
            ClassMapping {
                local_name: "user".into(),
                remote_name: "posixaccount".into(),
                locality: StorageLocality::Split,
            },
            ClassMapping {
                local_name: "group".into(),
                remote_name: "posixgroup".into(),
                locality: StorageLocality::Split,
            },
            ClassMapping {
                local_name: "domain".into(),
                remote_name: "sambadomain".into(),
                locality: StorageLocality::RemoteOnly,
            },
        ];
        Self::build(
            config,
            attrs,
            classes,
            vec!["top".into()],
            "objectguid",
            "sambaobjectguid",
        )
    }

    pub fn build(
        config: MapConfig,
        attr_list: Vec<AttributeMapping>,
        classes: Vec<ClassMapping>,
        drop_remote_classes: Vec<AttrString>,
        correlation_local: &str,
        correlation_remote: &str,
    ) -> SchemaMap {
        let mut attrs = HashMap::new();
        let mut remote_index = HashMap::new();
        for am in attr_list {
            if let Some(rn) = am.remote_name() {
                remote_index.insert(rn.clone(), am.local_name.clone());
            }
            attrs.insert(am.local_name.clone(), am);
        }
        SchemaMap {
            config,
            attrs,
            remote_index,
            classes,
            drop_remote_classes,
            correlation_local: correlation_local.to_lowercase().into(),
            correlation_remote: correlation_remote.to_lowercase().into(),
        }
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn correlation_local(&self) -> &AttrString {
        &self.correlation_local
    }

    pub fn correlation_remote(&self) -> &AttrString {
        &self.correlation_remote
    }

    /// Resolve by local attribute name. `None` means the map does not
    /// know the attribute: it passes through unchanged and is stored on
    /// the configured unmapped side.
    pub fn resolve_attribute(&self, local_name: &str) -> Option<&AttributeMapping> {
        self.attrs.get(&AttrString::from(local_name.to_lowercase()))
    }

    /// Resolve by the name an attribute has in the remote store.
    pub fn resolve_remote_attribute(&self, remote_name: &str) -> Option<&AttributeMapping> {
        self.remote_index
            .get(&AttrString::from(remote_name.to_lowercase()))
            .and_then(|local| self.attrs.get(local))
    }

    pub fn resolve_class(&self, local_class: &str) -> Option<&ClassMapping> {
        self.classes
            .iter()
            .find(|c| c.local_name.eq_ignore_ascii_case(local_class))
    }

    pub fn resolve_remote_class(&self, remote_class: &str) -> Option<&ClassMapping> {
        self.classes
            .iter()
            .find(|c| c.remote_name.eq_ignore_ascii_case(remote_class))
    }

    /// Which store answers for an attribute.
    pub fn owner(&self, attr: &str) -> AttrOwner {
        if attr.eq_ignore_ascii_case("objectclass") {
            return AttrOwner::Remote;
        }
        match self.resolve_attribute(attr) {
            Some(am) => match am.behavior {
                MapBehavior::Ignore => AttrOwner::Local,
                MapBehavior::Generate { .. } => AttrOwner::Generated,
                _ => AttrOwner::Remote,
            },
            None => match self.config.unmapped_side {
                StorageSide::Local => AttrOwner::Local,
                StorageSide::Remote => AttrOwner::Remote,
            },
        }
    }

    fn local_class_to_remote(&self, class: &str) -> String {
        self.resolve_class(class)
            .map(|c| c.remote_name.to_string())
            .unwrap_or_else(|| class.to_string())
    }

    fn remote_class_to_local(&self, class: &str) -> Option<String> {
        if self
            .drop_remote_classes
            .iter()
            .any(|c| c.eq_ignore_ascii_case(class))
        {
            return None;
        }
        Some(
            self.resolve_remote_class(class)
                .map(|c| c.local_name.to_string())
                .unwrap_or_else(|| class.to_string()),
        )
    }

    /// The storage locality the entry's objectClasses demand, if any
    /// class in the map matches.
    pub fn entry_locality(&self, entry: &Entry) -> Option<StorageLocality> {
        let classes = entry.get_ava("objectclass")?;
        classes
            .iter()
            .filter_map(|c| self.resolve_class(c))
            .map(|c| c.locality)
            .next()
    }

    /* ===== filter rewriting ===== */

    /// Rewrite a filter for one side of the map.
    ///
    /// The remote rewrite widens what it cannot express: a clause over a
    /// locally stored attribute contributes nothing, and a clause over a
    /// generated attribute degrades the whole side to enumeration - the
    /// full-scan fallback turns an indexed lookup into O(N) over the
    /// remote store, so it is logged.
    ///
    /// The local rewrite answers for entries that have no remote half: a
    /// positive clause over a remotely stored attribute can never hold
    /// for such an entry, while its negation always does. Entries that
    /// do have a remote half are found through the remote rewrite, so
    /// the two sides together cover every logical entry. The merger
    /// re-evaluates the original filter on each assembled entry; the
    /// rewrites only select candidates.
    pub fn rewrite_filter(&self, filter: &Filter, side: StorageSide) -> MappedFilter {
        match filter {
            Filter::And(children) => MappedFilter::and(
                children
                    .iter()
                    .map(|c| self.rewrite_filter(c, side))
                    .collect(),
            ),
            Filter::Or(children) => MappedFilter::or(
                children
                    .iter()
                    .map(|c| self.rewrite_filter(c, side))
                    .collect(),
            ),
            Filter::Not(child) => MappedFilter::not(self.rewrite_filter(child, side)),
            Filter::Eq(attr, value) => self.rewrite_leaf(attr, Some(value.as_str()), None, side),
            Filter::Sub(attr, sub) => self.rewrite_leaf(attr, None, Some(sub), side),
            Filter::Pres(attr) => self.rewrite_leaf(attr, None, None, side),
        }
    }

    fn rewrite_leaf(
        &self,
        attr: &AttrString,
        eq_value: Option<&str>,
        sub: Option<&Substring>,
        side: StorageSide,
    ) -> MappedFilter {
        if attr.eq_ignore_ascii_case("objectclass") {
            return match side {
                StorageSide::Remote => match (eq_value, sub) {
                    (Some(v), _) => {
                        MappedFilter::Clause(f_eq("objectclass", &self.local_class_to_remote(v)))
                    }
                    (None, Some(s)) => MappedFilter::Clause(f_sub("objectclass", s.clone())),
                    (None, None) => MappedFilter::Clause(f_pres("objectclass")),
                },
                StorageSide::Local => MappedFilter::MatchNone,
            };
        }

        let owner = self.owner(attr);
        match (owner, side) {
            (AttrOwner::Generated, StorageSide::Remote) => {
                warn!(
                    attr = %attr,
                    "generated attribute in filter; falling back to remote enumeration"
                );
                MappedFilter::MatchAll
            }
            (AttrOwner::Generated, StorageSide::Local) => MappedFilter::MatchNone,
            (AttrOwner::Local, StorageSide::Local) => {
                MappedFilter::Clause(self.leaf(attr.clone(), eq_value, sub))
            }
            // The local attribute may still decide membership of entries
            // whose halves live remotely, so the remote side widens.
            (AttrOwner::Local, StorageSide::Remote) => MappedFilter::MatchAll,
            (AttrOwner::Remote, StorageSide::Remote) => {
                // Unmapped attributes configured onto the remote side
                // pass through under their own name.
                let Some(am) = self.resolve_attribute(attr) else {
                    return MappedFilter::Clause(self.leaf(attr.clone(), eq_value, sub));
                };
                // remote_name is always present for remote-owned attrs.
                let Some(remote_name) = am.remote_name() else {
                    return MappedFilter::MatchNone;
                };
                match (&am.behavior, eq_value, sub) {
                    (MapBehavior::Convert { to_remote, .. }, Some(v), _) => match to_remote(v) {
                        Some(rv) => MappedFilter::Clause(f_eq(remote_name, &rv)),
                        None => MappedFilter::MatchNone,
                    },
                    // A substring pattern cannot cross a value
                    // transform; enumerate instead.
                    (MapBehavior::Convert { .. }, None, Some(_)) => MappedFilter::MatchAll,
                    (_, Some(v), _) => MappedFilter::Clause(f_eq(remote_name, v)),
                    (_, None, Some(s)) => MappedFilter::Clause(f_sub(remote_name, s.clone())),
                    (_, None, None) => MappedFilter::Clause(f_pres(remote_name)),
                }
            }
            (AttrOwner::Remote, StorageSide::Local) => {
                match self.resolve_attribute(attr) {
                    // A verbatim local copy exists for keep_in_local
                    // attributes, so the clause can be answered here too.
                    Some(am) if am.keep_in_local => {
                        MappedFilter::Clause(self.leaf(attr.clone(), eq_value, sub))
                    }
                    _ => MappedFilter::MatchNone,
                }
            }
        }
    }

    fn leaf(&self, attr: AttrString, eq_value: Option<&str>, sub: Option<&Substring>) -> Filter {
        match (eq_value, sub) {
            (Some(v), _) => Filter::Eq(attr, v.to_string()),
            (None, Some(s)) => Filter::Sub(attr, s.clone()),
            (None, None) => Filter::Pres(attr),
        }
    }

    /* ===== entry and modify translation ===== */

    /// Translate a raw remote entry into its logical (local-form)
    /// contribution: remote names become local names, converted values
    /// come back through `to_local`, generated attributes are computed,
    /// and the correlation attribute stays internal.
    pub fn remote_entry_to_local(&self, remote: &Entry, local_dn: Dn) -> Entry {
        let mut out = Entry::new(local_dn);
        for (attr, values) in remote.avas() {
            if attr == &self.correlation_remote {
                continue;
            }
            if attr.eq_ignore_ascii_case("objectclass") {
                for v in values {
                    if let Some(local) = self.remote_class_to_local(v) {
                        out.add_ava("objectclass", &local);
                    }
                }
                continue;
            }
            match self.resolve_remote_attribute(attr) {
                Some(am) => match &am.behavior {
                    MapBehavior::Generate { .. } => {
                        // The backing attribute itself stays invisible;
                        // the generated value is added below.
                    }
                    MapBehavior::Convert { to_local, .. } => {
                        for v in values {
                            match to_local(v) {
                                Some(lv) => {
                                    out.add_ava(&am.local_name, &lv);
                                }
                                None => {
                                    warn!(attr = %attr, "dropping unconvertible remote value");
                                }
                            }
                        }
                    }
                    _ => {
                        for v in values {
                            out.add_ava(&am.local_name, v);
                        }
                    }
                },
                None => {
                    for v in values {
                        out.add_ava(attr, v);
                    }
                }
            }
        }
        for am in self.attrs.values() {
            if let MapBehavior::Generate { generate_local, .. } = &am.behavior {
                if let Some(v) = generate_local(remote) {
                    out.add_ava(&am.local_name, &v);
                }
            }
        }
        out
    }

    /// Translate one local-form attribute to its remote storage form.
    /// `None` means nothing is stored remotely for it (eg a generated
    /// value whose inputs are unusable - dropped with a warning).
    pub fn local_attr_to_remote(
        &self,
        attr: &str,
        values: &[String],
        logical: &Entry,
    ) -> Option<(AttrString, Vec<String>)> {
        if attr.eq_ignore_ascii_case("objectclass") {
            return Some((
                "objectclass".into(),
                values
                    .iter()
                    .map(|v| self.local_class_to_remote(v))
                    .collect(),
            ));
        }
        let Some(am) = self.resolve_attribute(attr) else {
            // Unknown to the map: no transformation, stored verbatim.
            return Some((attr.to_lowercase().into(), values.to_vec()));
        };
        match &am.behavior {
            MapBehavior::Ignore => None,
            MapBehavior::Keep => Some((am.local_name.clone(), values.to_vec())),
            MapBehavior::Rename { remote_name } => Some((remote_name.clone(), values.to_vec())),
            MapBehavior::Convert {
                remote_name,
                to_remote,
                ..
            } => {
                let converted: Vec<String> = values
                    .iter()
                    .filter_map(|v| {
                        let out = to_remote(v);
                        if out.is_none() {
                            warn!(attr = %attr, "dropping unconvertible local value");
                        }
                        out
                    })
                    .collect();
                if converted.is_empty() {
                    None
                } else {
                    Some((remote_name.clone(), converted))
                }
            }
            MapBehavior::Generate {
                generate_remote, ..
            } => {
                let mut out: Option<(AttrString, Vec<String>)> = None;
                for v in values {
                    match generate_remote(v, logical) {
                        Some((rattr, rv)) => {
                            let slot = out.get_or_insert_with(|| (rattr.clone(), Vec::new()));
                            slot.1.push(rv);
                        }
                        None => {
                            warn!(attr = %attr, value = %v, "cannot generate remote form; dropping");
                        }
                    }
                }
                out
            }
        }
    }
}

/* ===== samba3sam table functions ===== */

fn convert_val_copy(v: &str) -> Option<String> {
    Some(v.to_string())
}

/// The remote store only accepts well-formed SIDs.
fn convert_sid_to_remote(v: &str) -> Option<String> {
    v.parse::<Sid>().ok().map(|sid| sid.to_string())
}

fn generate_primary_group_id(remote: &Entry) -> Option<String> {
    let sid: Sid = remote.get_ava_single("sambaprimarygroupsid")?.parse().ok()?;
    sid.rid().map(|rid| rid.to_string())
}

fn generate_primary_group_sid(value: &str, logical: &Entry) -> Option<(AttrString, String)> {
    let rid: u32 = value.parse().ok()?;
    let sid: Sid = logical.get_ava_single("objectsid")?.parse().ok()?;
    let dom = sid.domain()?;
    Some((
        "sambaprimarygroupsid".into(),
        dom.with_rid(rid).to_string(),
    ))
}
