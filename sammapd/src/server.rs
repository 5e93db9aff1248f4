//! The record merger. [`MapServer`] owns the two injected backend
//! connections and presents one logical directory: search results are
//! assembled from both stores, and write operations are routed, split
//! and - where they touch both stores - compensated so that no partial
//! application survives a failure.

use hashbrown::HashSet;

use crate::be::{DirectoryBackend, Scope};
use crate::ldif::{self, ChangeRecord};
use crate::prelude::*;
use crate::schema::AttrOwner;

pub struct MapServer<L, R>
where
    L: DirectoryBackend,
    R: DirectoryBackend,
{
    map: SchemaMap,
    mapper: DnMapper,
    local: L,
    remote: R,
}

/// What was done to the remote store during the first phase of a
/// cross-backend operation, so the second phase knows how to undo it.
enum RemoteAction {
    Untouched,
    Modified { dn: Dn, inverse: ModifyList },
    Created { dn: Dn },
    Renamed { from: Dn, to: Dn },
    Deleted { entry: Entry },
}

impl<L, R> MapServer<L, R>
where
    L: DirectoryBackend,
    R: DirectoryBackend,
{
    pub fn new(map: SchemaMap, local: L, remote: R) -> Self {
        let mapper = DnMapper::new(
            map.config().local_base.clone(),
            map.config().remote_base.clone(),
        );
        MapServer {
            map,
            mapper,
            local,
            remote,
        }
    }

    pub fn schema_map(&self) -> &SchemaMap {
        &self.map
    }

    pub fn dn_mapper(&self) -> &DnMapper {
        &self.mapper
    }

    pub fn local(&self) -> &L {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut L {
        &mut self.local
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn remote_mut(&mut self) -> &mut R {
        &mut self.remote
    }

    /// Apply a stream of LDIF change records against the logical view.
    pub fn apply_ldif(&mut self, text: &str) -> Result<(), LdbError> {
        for change in ldif::parse_changes(text)? {
            match change {
                ChangeRecord::Add(entry) => self.add(entry)?,
                ChangeRecord::Modify(dn, mods) => self.modify(&dn, &mods)?,
                ChangeRecord::Delete(dn) => self.delete(&dn)?,
            }
        }
        Ok(())
    }

    /* ===== search ===== */

    #[instrument(level = "debug", skip_all, fields(base = %base, scope = ?scope))]
    pub fn search(
        &self,
        base: &Dn,
        scope: Scope,
        filter: Option<&Filter>,
        attrs: &[String],
    ) -> Result<Vec<Entry>, LdbError> {
        let local_base = self.mapper.local_base().clone();

        // The portion of the namespace the map governs.
        let zone = if base.is_under(&local_base) {
            Some((base.clone(), scope))
        } else if local_base.is_under(base) && scope == Scope::Subtree {
            Some((local_base.clone(), Scope::Subtree))
        } else {
            None
        };

        let mut out = Vec::new();
        if let Some((zbase, zscope)) = zone {
            out.extend(self.search_zone(&zbase, zscope, filter)?);
        }

        // Records outside the mapped subtree live wholly in the local
        // store and pass through untouched.
        for entry in self.local.search(base, scope, filter, &[])? {
            if !entry.dn().is_under(&local_base) {
                out.push(entry);
            }
        }

        Ok(out.into_iter().map(|e| e.project(attrs)).collect())
    }

    fn search_zone(
        &self,
        zbase: &Dn,
        scope: Scope,
        filter: Option<&Filter>,
    ) -> Result<Vec<Entry>, LdbError> {
        let remote_mf = match filter {
            Some(f) => self.map.rewrite_filter(f, StorageSide::Remote),
            None => MappedFilter::MatchAll,
        };
        let local_mf = match filter {
            Some(f) => self.map.rewrite_filter(f, StorageSide::Local),
            None => MappedFilter::MatchAll,
        };
        trace!(remote = ?remote_mf, local = ?local_mf, "rewritten filter");

        let mut produced: Vec<Entry> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        if remote_mf != MappedFilter::MatchNone {
            let rbase = self.mapper.to_remote(zbase)?;
            for rentry in self
                .remote
                .search(&rbase, scope, remote_mf.as_clause(), &[])?
            {
                let logical = self.logical_from_remote(&rentry)?;
                if seen.insert(logical.dn().norm().to_string()) {
                    produced.push(logical);
                }
            }
        }

        if local_mf != MappedFilter::MatchNone {
            for lentry in self.local.search(zbase, scope, local_mf.as_clause(), &[])? {
                if seen.contains(lentry.dn().norm()) {
                    continue;
                }
                let logical = self.logical_from_local(&lentry)?;
                if seen.insert(logical.dn().norm().to_string()) {
                    produced.push(logical);
                }
            }
        }

        // The rewrites only selected candidates; the original filter is
        // what decides membership, evaluated on the assembled entry.
        Ok(produced
            .into_iter()
            .filter(|e| filter.map(|f| e.matches(f)).unwrap_or(true))
            .collect())
    }

    /* ===== half location and assembly ===== */

    fn find_local_half(
        &self,
        local_dn: &Dn,
        key: Option<&str>,
    ) -> Result<Option<Entry>, LdbError> {
        if let Some(key) = key {
            let f = f_eq(self.map.correlation_local(), key);
            let mut hits =
                self.local
                    .search(self.mapper.local_base(), Scope::Subtree, Some(&f), &[])?;
            if !hits.is_empty() {
                return Ok(Some(hits.swap_remove(0)));
            }
        }
        Ok(self
            .local
            .search(local_dn, Scope::Base, None, &[])?
            .into_iter()
            .next())
    }

    fn find_remote_half(
        &self,
        local_dn: &Dn,
        key: Option<&str>,
    ) -> Result<Option<Entry>, LdbError> {
        if let Some(key) = key {
            let f = f_eq(self.map.correlation_remote(), key);
            let mut hits =
                self.remote
                    .search(self.mapper.remote_base(), Scope::Subtree, Some(&f), &[])?;
            if !hits.is_empty() {
                return Ok(Some(hits.swap_remove(0)));
            }
        }
        let rdn = self.mapper.to_remote(local_dn)?;
        Ok(self
            .remote
            .search(&rdn, Scope::Base, None, &[])?
            .into_iter()
            .next())
    }

    fn logical_from_remote(&self, rentry: &Entry) -> Result<Entry, LdbError> {
        let key = rentry.get_ava_single(self.map.correlation_remote());
        let local_dn = self.mapper.to_local(rentry.dn())?;
        let lhalf = self.find_local_half(&local_dn, key)?;
        Ok(self.assemble(Some(rentry), lhalf.as_ref(), local_dn))
    }

    fn logical_from_local(&self, lentry: &Entry) -> Result<Entry, LdbError> {
        let key = lentry.get_ava_single(self.map.correlation_local());
        let rhalf = self.find_remote_half(lentry.dn(), key)?;
        Ok(self.assemble(rhalf.as_ref(), Some(lentry), lentry.dn().clone()))
    }

    /// Build the logical entry. The remote side is authoritative for the
    /// attributes the map stores there; the local store is the override
    /// layer for everything else it happens to hold.
    fn assemble(
        &self,
        rhalf: Option<&Entry>,
        lhalf: Option<&Entry>,
        local_dn: Dn,
    ) -> Entry {
        let local_dn = lhalf.map(|l| l.dn().clone()).unwrap_or(local_dn);
        let mut logical = match rhalf {
            Some(r) => self.map.remote_entry_to_local(r, local_dn),
            None => Entry::new(local_dn),
        };
        if let Some(l) = lhalf {
            for (attr, values) in l.avas() {
                if attr == self.map.correlation_local() {
                    continue;
                }
                if self.map.owner(attr) == AttrOwner::Remote && logical.attribute_pres(attr) {
                    continue;
                }
                logical.set_ava(attr, values.clone());
            }
        }
        logical
    }

    /* ===== add ===== */

    #[instrument(level = "debug", skip_all, fields(dn = %entry.dn()))]
    pub fn add(&mut self, entry: Entry) -> Result<(), LdbError> {
        if !entry.dn().is_under(self.mapper.local_base()) {
            trace!("dn outside mapped subtree; storing locally verbatim");
            return self.local.add(entry);
        }

        match self.map.entry_locality(&entry) {
            Some(StorageLocality::LocalOnly) => return self.local.add(entry),
            Some(StorageLocality::RemoteOnly) => {
                let remote_half = self.remote_half_verbatim(&entry)?;
                return self.remote.add(remote_half);
            }
            _ => {}
        }

        let (local_half, remote_half) = self.partition_add(&entry)?;
        match (local_half, remote_half) {
            (Some(l), None) => self.local.add(l),
            (None, Some(r)) => self.remote.add(r),
            (None, None) => self.local.add(Entry::new(entry.dn().clone())),
            (Some(mut l), Some(mut r)) => {
                // A split record: correlate the halves by a stable key,
                // never by their DNs.
                let key = Uuid::new_v4().to_string();
                l.add_ava(self.map.correlation_local(), &key);
                r.add_ava(self.map.correlation_remote(), &key);
                let rdn = r.dn().clone();
                self.remote.add(r)?;
                if let Err(e) = self.local.add(l) {
                    warn!(err = ?e, "local half add failed; compensating remote");
                    return match self.remote.delete(&rdn) {
                        Ok(()) => Err(e),
                        Err(comp) => Err(self.divergent("add", &e, &comp)),
                    };
                }
                Ok(())
            }
        }
    }

    /// Split an incoming logical entry into its two physical halves.
    fn partition_add(&self, entry: &Entry) -> Result<(Option<Entry>, Option<Entry>), LdbError> {
        let remote_dn = self.mapper.to_remote(entry.dn())?;
        let mut local_half = Entry::new(entry.dn().clone());
        let mut remote_half = Entry::new(remote_dn);
        let mut local_used = false;
        let mut remote_used = false;

        for (attr, values) in entry.avas() {
            let owner = self.map.owner(attr);
            let keep_in_local = self
                .map
                .resolve_attribute(attr)
                .map(|am| am.keep_in_local)
                .unwrap_or(false);
            match owner {
                AttrOwner::Local => {
                    local_half.set_ava(attr, values.clone());
                    local_used = true;
                }
                AttrOwner::Remote | AttrOwner::Generated => {
                    if let Some((rattr, rvalues)) =
                        self.map.local_attr_to_remote(attr, values, entry)
                    {
                        remote_half.set_ava(&rattr, rvalues);
                        remote_used = true;
                    }
                    if keep_in_local {
                        local_half.set_ava(attr, values.clone());
                        local_used = true;
                    }
                }
            }
        }

        Ok(match (local_used, remote_used) {
            (false, false) => (None, None),
            (true, false) => (Some(local_half), None),
            (false, true) => (None, Some(remote_half)),
            (true, true) => (Some(local_half), Some(remote_half)),
        })
    }

    /// For remote-only classes everything goes remote, mapped where the
    /// map knows the attribute and verbatim where it does not.
    fn remote_half_verbatim(&self, entry: &Entry) -> Result<Entry, LdbError> {
        let mut remote_half = Entry::new(self.mapper.to_remote(entry.dn())?);
        for (attr, values) in entry.avas() {
            match self.map.local_attr_to_remote(attr, values, entry) {
                Some((rattr, rvalues)) => {
                    remote_half.set_ava(&rattr, rvalues);
                }
                None => {
                    remote_half.set_ava(attr, values.clone());
                }
            }
        }
        Ok(remote_half)
    }

    /* ===== modify ===== */

    #[instrument(level = "debug", skip_all, fields(dn = %dn))]
    pub fn modify(&mut self, dn: &Dn, mods: &ModifyList) -> Result<(), LdbError> {
        if !dn.is_under(self.mapper.local_base()) {
            return self.local.modify(dn, mods);
        }

        let (lhalf, rhalf) = self.halves_for(dn)?;
        if lhalf.is_none() && rhalf.is_none() {
            return Err(LdbError::NoSuchObject);
        }
        let logical = self.assemble(rhalf.as_ref(), lhalf.as_ref(), dn.clone());

        let mut remote_mods = ModifyList::new();
        let mut local_mods = ModifyList::new();
        for m in mods {
            match self.route_modify(m, &logical) {
                (Some(rm), lm) => {
                    remote_mods.push_mod(rm);
                    if let Some(lm) = lm {
                        local_mods.push_mod(lm);
                    }
                }
                (None, Some(lm)) => local_mods.push_mod(lm),
                (None, None) => {}
            }
        }

        // Creating a missing half splits the record; both halves must
        // end up correlated.
        let key = lhalf
            .as_ref()
            .and_then(|l| l.get_ava_single(self.map.correlation_local()))
            .or_else(|| {
                rhalf
                    .as_ref()
                    .and_then(|r| r.get_ava_single(self.map.correlation_remote()))
            })
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let splitting = lhalf.is_none()
            && !local_mods.is_empty()
            && rhalf
                .as_ref()
                .map(|r| !r.attribute_pres(self.map.correlation_remote()))
                .unwrap_or(false);
        if splitting {
            // The record splits now; the existing remote half needs the
            // key too so a later rename can pair the halves.
            remote_mods.push_mod(Modify::Add(
                self.map.correlation_remote().clone(),
                vec![key.clone()],
            ));
        }
        // The mirror case: a local-only record gaining its first remote
        // attributes.
        let local_needs_key = rhalf.is_none()
            && !remote_mods.is_empty()
            && lhalf
                .as_ref()
                .map(|l| !l.attribute_pres(self.map.correlation_local()))
                .unwrap_or(false);
        if local_needs_key {
            local_mods.push_mod(Modify::Add(
                self.map.correlation_local().clone(),
                vec![key.clone()],
            ));
        }

        // Phase one: the remote store.
        let remote_action = if remote_mods.is_empty() {
            RemoteAction::Untouched
        } else {
            match &rhalf {
                Some(r) => {
                    let inverse = remote_mods.inverse_against(r);
                    let rdn = r.dn().clone();
                    self.remote.modify(&rdn, &remote_mods)?;
                    RemoteAction::Modified { dn: rdn, inverse }
                }
                None => {
                    let mut fresh = Entry::new(self.mapper.to_remote(dn)?);
                    fresh.add_ava(self.map.correlation_remote(), &key);
                    remote_mods.apply_to(&mut fresh)?;
                    let rdn = fresh.dn().clone();
                    self.remote.add(fresh)?;
                    RemoteAction::Created { dn: rdn }
                }
            }
        };
        let created_remote = matches!(&remote_action, RemoteAction::Created { .. });

        // Phase two: the local store; undo phase one if it fails.
        let local_result = if local_mods.is_empty() {
            Ok(())
        } else {
            match &lhalf {
                Some(l) => {
                    let ldn = l.dn().clone();
                    self.local.modify(&ldn, &local_mods)
                }
                None => {
                    let mut fresh = Entry::new(dn.clone());
                    if created_remote || rhalf.is_some() {
                        fresh.add_ava(self.map.correlation_local(), &key);
                    }
                    local_mods
                        .apply_to(&mut fresh)
                        .and_then(|()| self.local.add(fresh))
                }
            }
        };

        match local_result {
            Ok(()) => Ok(()),
            Err(e) => {
                let comp = self.compensate_remote(remote_action);
                match comp {
                    Ok(()) => Err(e),
                    Err(comp) => Err(self.divergent("modify", &e, &comp)),
                }
            }
        }
    }

    /// Route one change to its owning store, translating names and
    /// values on the way. Returns (remote change, local change); a
    /// keep-in-local attribute produces both.
    fn route_modify(&self, m: &Modify, logical: &Entry) -> (Option<Modify>, Option<Modify>) {
        let attr = m.attr().clone();
        match self.map.owner(&attr) {
            AttrOwner::Local => (None, Some(m.clone())),
            AttrOwner::Remote | AttrOwner::Generated => {
                let keep_in_local = self
                    .map
                    .resolve_attribute(&attr)
                    .map(|am| am.keep_in_local)
                    .unwrap_or(false);
                let local_copy = keep_in_local.then(|| m.clone());

                // A value-less delete only needs its name mapped.
                if matches!(m, Modify::Delete(_, v) if v.is_empty()) {
                    let rattr = match self.map.resolve_attribute(&attr) {
                        Some(am) => match am.remote_name() {
                            Some(rn) => rn.clone(),
                            None => return (None, Some(m.clone())),
                        },
                        None => attr.clone(),
                    };
                    return (Some(Modify::Delete(rattr, Vec::new())), local_copy);
                }

                match self.map.local_attr_to_remote(&attr, m.values(), logical) {
                    Some((rattr, rvalues)) => {
                        let rm = if self
                            .map
                            .resolve_attribute(&attr)
                            .map(|am| am.is_generated())
                            .unwrap_or(false)
                        {
                            // Generated attributes fold into their
                            // backing attribute as a whole value set.
                            Modify::Replace(rattr, rvalues)
                        } else {
                            m.with_attr_values(rattr, rvalues)
                        };
                        (Some(rm), local_copy)
                    }
                    None => {
                        warn!(attr = %attr, "change dropped by the schema map");
                        (None, local_copy)
                    }
                }
            }
        }
    }

    /* ===== rename ===== */

    #[instrument(level = "debug", skip_all, fields(old = %old_dn, new = %new_dn))]
    pub fn rename(&mut self, old_dn: &Dn, new_dn: &Dn) -> Result<(), LdbError> {
        let local_base = self.mapper.local_base().clone();
        match (old_dn.is_under(&local_base), new_dn.is_under(&local_base)) {
            (false, false) => return self.local.rename(old_dn, new_dn),
            (true, true) => {}
            // Renaming across the mapping boundary would change which
            // store holds the record.
            _ => return Err(LdbError::UnwillingToPerform),
        }

        let (lhalf, rhalf) = self.halves_for(old_dn)?;
        match (lhalf, rhalf) {
            (None, None) => Err(LdbError::NoSuchObject),
            (Some(_), None) => self.local.rename(old_dn, new_dn),
            (None, Some(r)) => {
                let new_rdn = self.mapper.to_remote(new_dn)?;
                let from = r.dn().clone();
                self.remote.rename(&from, &new_rdn)
            }
            (Some(l), Some(r)) => {
                let new_rdn = self.mapper.to_remote(new_dn)?;
                let from = r.dn().clone();
                self.remote.rename(&from, &new_rdn)?;
                let ldn = l.dn().clone();
                if let Err(e) = self.local.rename(&ldn, new_dn) {
                    warn!(err = ?e, "local half rename failed; compensating remote");
                    return match self.compensate_remote(RemoteAction::Renamed {
                        from,
                        to: new_rdn,
                    }) {
                        Ok(()) => Err(e),
                        Err(comp) => Err(self.divergent("rename", &e, &comp)),
                    };
                }
                Ok(())
            }
        }
    }

    /* ===== delete ===== */

    #[instrument(level = "debug", skip_all, fields(dn = %dn))]
    pub fn delete(&mut self, dn: &Dn) -> Result<(), LdbError> {
        if !dn.is_under(self.mapper.local_base()) {
            return self.local.delete(dn);
        }

        let (lhalf, rhalf) = self.halves_for(dn)?;
        match (lhalf, rhalf) {
            // Tolerating absence on one side is fine; absence on both is
            // the caller's error.
            (None, None) => Err(LdbError::NoSuchObject),
            (Some(l), None) => self.local.delete(l.dn()),
            (None, Some(r)) => self.remote.delete(r.dn()),
            (Some(l), Some(r)) => {
                let snapshot = r.clone();
                self.remote.delete(r.dn())?;
                if let Err(e) = self.local.delete(l.dn()) {
                    warn!(err = ?e, "local half delete failed; compensating remote");
                    return match self.compensate_remote(RemoteAction::Deleted {
                        entry: snapshot,
                    }) {
                        Ok(()) => Err(e),
                        Err(comp) => Err(self.divergent("delete", &e, &comp)),
                    };
                }
                Ok(())
            }
        }
    }

    /* ===== cross-backend bookkeeping ===== */

    fn halves_for(&self, dn: &Dn) -> Result<(Option<Entry>, Option<Entry>), LdbError> {
        let lhalf = self
            .local
            .search(dn, Scope::Base, None, &[])?
            .into_iter()
            .next();
        let key = lhalf
            .as_ref()
            .and_then(|l| l.get_ava_single(self.map.correlation_local()))
            .map(str::to_string);
        let rhalf = self.find_remote_half(dn, key.as_deref())?;
        Ok((lhalf, rhalf))
    }

    fn compensate_remote(&mut self, action: RemoteAction) -> Result<(), LdbError> {
        match action {
            RemoteAction::Untouched => Ok(()),
            RemoteAction::Modified { dn, inverse } => self.remote.modify(&dn, &inverse),
            RemoteAction::Created { dn } => self.remote.delete(&dn),
            RemoteAction::Renamed { from, to } => self.remote.rename(&to, &from),
            RemoteAction::Deleted { entry } => self.remote.add(entry),
        }
    }

    fn divergent(&self, op: &str, cause: &LdbError, comp: &LdbError) -> LdbError {
        error!(op, ?cause, ?comp, "compensation failed; stores are divergent");
        LdbError::CrossBackendInconsistency(format!(
            "{} failed with {} and compensation failed with {}",
            op, cause, comp
        ))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::be::mem::MemoryBackend;
    use crate::testkit::{
        init_logging, seed_backend, test_server, FailingBackend, LOCAL_BASEDN, REMOTE_BASEDN,
    };

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    fn s4dn(rdn: &str) -> Dn {
        dn(&format!("{},{}", rdn, LOCAL_BASEDN))
    }

    fn s3dn(rdn: &str) -> Dn {
        dn(&format!("{},{}", rdn, REMOTE_BASEDN))
    }

    fn search_expr<L, R>(server: &MapServer<L, R>, expr: &str) -> Vec<Entry>
    where
        L: DirectoryBackend,
        R: DirectoryBackend,
    {
        let f = Filter::parse(expr).unwrap();
        server
            .search(&dn(""), Scope::Subtree, Some(&f), &[])
            .unwrap()
    }

    fn dns_of(res: &[Entry]) -> Vec<String> {
        res.iter().map(|e| e.dn().to_string()).collect()
    }

    /// The acceptance fixture population: the domain record and A/B/C
    /// live only in the remote store, X/Y/Z are added through the
    /// mapping layer and split.
    fn populated_server() -> MapServer<MemoryBackend, MemoryBackend> {
        init_logging();
        let mut server = test_server().unwrap();

        seed_backend(
            server.remote_mut(),
            &format!(
                "\
dn: {remote_base}
objectclass: sambaDomain
objectclass: top
sambaSID: S-1-5-21-4231626423-2410014848-2360679739
sambaNextRid: 2000
sambaDomainName: TESTS

dn: cn=A,{remote_base}
objectClass: posixAccount
cn: A
sambaNextRid: x
sambaBadPasswordCount: x
sambaLogonTime: x
description: x
sambaSID: S-1-5-21-4231626423-2410014848-2360679739-552
sambaPrimaryGroupSID: S-1-5-21-4231626423-2410014848-2360679739-512

dn: cn=B,{remote_base}
objectClass: top
cn: B
sambaNextRid: x
sambaBadPasswordCount: x
sambaLogonTime: y
description: x

dn: cn=C,{remote_base}
objectClass: top
cn: C
sambaNextRid: x
sambaBadPasswordCount: y
sambaLogonTime: z
description: y
",
                remote_base = REMOTE_BASEDN
            ),
        )
        .unwrap();

        server
            .apply_ldif(&format!(
                "\
dn: cn=X,{base}
objectClass: user
cn: X
codePage: x
revision: x
dnsHostName: x
nextRid: y
lastLogon: x
description: x
objectSid: S-1-5-21-4231626423-2410014848-2360679739-552
primaryGroupID: 1-5-21-4231626423-2410014848-2360679739-512

dn: cn=Y,{base}
objectClass: top
cn: Y
codePage: x
revision: x
dnsHostName: y
nextRid: y
lastLogon: y
description: x

dn: cn=Z,{base}
objectClass: top
cn: Z
codePage: x
revision: y
dnsHostName: z
nextRid: y
lastLogon: z
description: y
",
                base = LOCAL_BASEDN
            ))
            .unwrap();

        server
    }

    #[test]
    fn test_search_remote_record_by_local_dn() {
        let server = populated_server();
        let attrs = vec!["dnsHostName".to_string(), "lastLogon".to_string()];
        let res = server
            .search(&s4dn("cn=A"), Scope::Base, None, &attrs)
            .unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].dn(), &s4dn("cn=A"));
        assert_eq!(res[0].get_ava("dnsHostName"), None);
        assert_eq!(res[0].get_ava_single("lastLogon"), Some("x"));
    }

    #[test]
    fn test_search_split_record_by_local_dn() {
        let server = populated_server();
        let res = server.search(&s4dn("cn=X"), Scope::Base, None, &[]).unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].dn(), &s4dn("cn=X"));
        assert_eq!(res[0].get_ava_single("dnsHostName"), Some("x"));
        assert_eq!(res[0].get_ava_single("lastLogon"), Some("x"));
        // The halves correlate by key, which never leaks into the
        // logical view.
        assert!(!res[0].attribute_pres("objectGUID"));
        assert!(!res[0].attribute_pres("sambaObjectGuid"));
    }

    #[test]
    fn test_search_by_local_attribute() {
        let server = populated_server();
        let res = search_expr(&server, "(revision=x)");
        assert_eq!(dns_of(&res), vec![s4dn("cn=X").to_string(), s4dn("cn=Y").to_string()]);
        assert_eq!(res[0].get_ava_single("dnsHostName"), Some("x"));
        assert_eq!(res[1].get_ava_single("dnsHostName"), Some("y"));
    }

    #[test]
    fn test_search_by_kept_attribute() {
        let server = populated_server();
        let res = search_expr(&server, "(description=y)");
        assert_eq!(dns_of(&res), vec![s4dn("cn=C").to_string(), s4dn("cn=Z").to_string()]);
        assert_eq!(res[0].get_ava("dnsHostName"), None);
        assert_eq!(res[0].get_ava_single("lastLogon"), Some("z"));
        assert_eq!(res[1].get_ava_single("dnsHostName"), Some("z"));
    }

    #[test]
    fn test_search_by_renamed_attribute() {
        let server = populated_server();
        let res = search_expr(&server, "(badPwdCount=x)");
        assert_eq!(dns_of(&res), vec![s4dn("cn=A").to_string(), s4dn("cn=B").to_string()]);
        // The remote name of a renamed attribute is not a local name.
        assert_eq!(search_expr(&server, "(sambaBadPasswordCount=*)").len(), 0);
    }

    #[test]
    fn test_search_by_converted_attribute() {
        let server = populated_server();
        let sid = "S-1-5-21-4231626423-2410014848-2360679739-552";
        let res = search_expr(&server, &format!("(objectSid={})", sid));
        assert_eq!(dns_of(&res), vec![s4dn("cn=A").to_string(), s4dn("cn=X").to_string()]);
        assert_eq!(res[0].get_ava_single("objectSid"), Some(sid));

        // Presence search also reaches the domain record.
        let res = search_expr(&server, "(objectSid=*)");
        assert_eq!(res.len(), 3);
        assert_eq!(res[2].dn(), &dn(LOCAL_BASEDN));
    }

    #[test]
    fn test_search_by_generated_attribute() {
        let server = populated_server();
        // X's primaryGroupID was not a plain RID, so nothing was stored
        // for it; only A's is derivable from its primary group SID.
        let res = search_expr(&server, "(primaryGroupID=512)");
        assert_eq!(dns_of(&res), vec![s4dn("cn=A").to_string()]);
        assert_eq!(res[0].get_ava_single("primaryGroupID"), Some("512"));
        assert_eq!(res[0].get_ava_single("lastLogon"), Some("x"));
    }

    #[test]
    fn test_search_by_objectclass() {
        let server = populated_server();
        let res = search_expr(&server, "(objectClass=user)");
        assert_eq!(dns_of(&res), vec![s4dn("cn=A").to_string(), s4dn("cn=X").to_string()]);
        for e in &res {
            assert_eq!(e.get_ava("objectClass").unwrap(), &["user".to_string()]);
        }

        // Prove the objectClass term is actually used for the search.
        let res = search_expr(&server, "(|(objectClass=user)(badPwdCount=x))");
        assert_eq!(
            dns_of(&res),
            vec![
                s4dn("cn=A").to_string(),
                s4dn("cn=B").to_string(),
                s4dn("cn=X").to_string()
            ]
        );
    }

    #[test]
    fn test_search_conjunctions() {
        let server = populated_server();
        // Both terms local.
        let res = search_expr(&server, "(&(codePage=x)(revision=x))");
        assert_eq!(dns_of(&res), vec![s4dn("cn=X").to_string(), s4dn("cn=Y").to_string()]);
        // Both terms remote.
        let res = search_expr(&server, "(&(lastLogon=x)(description=x))");
        assert_eq!(dns_of(&res), vec![s4dn("cn=A").to_string(), s4dn("cn=X").to_string()]);
        // One term on each side.
        let res = search_expr(&server, "(&(codePage=x)(description=x))");
        assert_eq!(dns_of(&res), vec![s4dn("cn=X").to_string(), s4dn("cn=Y").to_string()]);
        // Cross-side without a match.
        assert_eq!(search_expr(&server, "(&(codePage=x)(nextRid=x))").len(), 0);
        assert_eq!(search_expr(&server, "(&(revision=x)(lastLogon=z))").len(), 0);
    }

    #[test]
    fn test_search_disjunctions() {
        let server = populated_server();
        let res = search_expr(&server, "(|(revision=x)(dnsHostName=x))");
        assert_eq!(dns_of(&res), vec![s4dn("cn=X").to_string(), s4dn("cn=Y").to_string()]);

        let res = search_expr(&server, "(|(badPwdCount=x)(lastLogon=x))");
        assert_eq!(
            dns_of(&res),
            vec![
                s4dn("cn=A").to_string(),
                s4dn("cn=B").to_string(),
                s4dn("cn=X").to_string()
            ]
        );

        let res = search_expr(&server, "(|(revision=x)(lastLogon=y))");
        assert_eq!(
            dns_of(&res),
            vec![
                s4dn("cn=B").to_string(),
                s4dn("cn=X").to_string(),
                s4dn("cn=Y").to_string()
            ]
        );

        assert_eq!(search_expr(&server, "(|(codePage=y)(nextRid=z))").len(), 0);
    }

    #[test]
    fn test_search_negations() {
        let server = populated_server();

        // Negated local attribute: records without the attribute count.
        let res = search_expr(&server, "(!(revision=x))");
        assert_eq!(res.len(), 5);

        // Negated remote attribute: Z and C have a non-matching value,
        // the domain record lacks the attribute entirely.
        let res = search_expr(&server, "(!(description=x))");
        assert_eq!(
            dns_of(&res),
            vec![
                s4dn("cn=C").to_string(),
                s4dn("cn=Z").to_string(),
                dn(LOCAL_BASEDN).to_string()
            ]
        );

        let res = search_expr(&server, "(!(&(lastLogon=x)(description=x)))");
        assert_eq!(res.len(), 5);
        assert!(!dns_of(&res).contains(&s4dn("cn=A").to_string()));
        assert!(!dns_of(&res).contains(&s4dn("cn=X").to_string()));

        let res = search_expr(&server, "(!(|(badPwdCount=x)(lastLogon=x)))");
        assert_eq!(res.len(), 4);

        let res = search_expr(&server, "(!(|(revision=x)(lastLogon=y)))");
        assert_eq!(res.len(), 4);
        assert!(dns_of(&res).contains(&s4dn("cn=A").to_string()));
    }

    #[test]
    fn test_search_complex_tree() {
        let server = populated_server();
        let res = search_expr(
            &server,
            "(|(&(revision=x)(dnsHostName=x))(!(&(description=x)(nextRid=y)))(badPwdCount=y))",
        );
        assert_eq!(res.len(), 6);
        // Y fails all three branches.
        assert!(!dns_of(&res).contains(&s4dn("cn=Y").to_string()));
    }

    #[test]
    fn test_s3sam_add_search_modify_lifecycle() {
        init_logging();
        let mut server = test_server().unwrap();
        server
            .apply_ldif(&format!(
                "\
dn: cn=Niemand,cn=Users,{base}
objectClass: user
unixName: bin
sambaUnicodePwd: geheim
cn: Niemand
",
                base = LOCAL_BASEDN
            ))
            .unwrap();

        // The mapped attributes landed in the remote store.
        let rhalf = server
            .remote()
            .search(&s3dn("cn=Niemand,cn=Users"), Scope::Base, None, &[])
            .unwrap();
        assert_eq!(rhalf.len(), 1);
        assert_eq!(rhalf[0].get_ava_single("uid"), Some("bin"));
        assert_eq!(rhalf[0].get_ava_single("sambaNTPassword"), Some("geheim"));
        assert_eq!(
            rhalf[0].get_ava("objectclass").unwrap(),
            &["posixaccount".to_string()]
        );

        let res = search_expr(&server, "(unixName=bin)");
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].get_ava_single("cn"), Some("Niemand"));
        assert_eq!(res[0].get_ava_single("sambaUnicodePwd"), Some("geheim"));

        let res = search_expr(&server, "(&(unixName=bin)(sambaUnicodePwd=geheim))");
        assert_eq!(res.len(), 1);
        let res = search_expr(&server, "(|(unixName=bin)(sambaUnicodePwd=geheim))");
        assert_eq!(res.len(), 1);

        // Add, replace, then delete an attribute.
        server
            .apply_ldif(&format!(
                "\
dn: cn=Niemand,cn=Users,{base}
changetype: modify
add: description
description: Blah
",
                base = LOCAL_BASEDN
            ))
            .unwrap();
        let res = search_expr(&server, "(cn=Niemand)");
        assert_eq!(res[0].get_ava_single("description"), Some("Blah"));

        server
            .apply_ldif(&format!(
                "\
dn: cn=Niemand,cn=Users,{base}
changetype: modify
replace: description
description: Blie
",
                base = LOCAL_BASEDN
            ))
            .unwrap();
        let res = search_expr(&server, "(cn=Niemand)");
        assert_eq!(res[0].get_ava_single("description"), Some("Blie"));

        server
            .apply_ldif(&format!(
                "\
dn: cn=Niemand,cn=Users,{base}
changetype: modify
delete: description
",
                base = LOCAL_BASEDN
            ))
            .unwrap();
        let res = search_expr(&server, "(cn=Niemand)");
        // Absent, not empty.
        assert_eq!(res[0].get_ava("description"), None);

        // Rename, then delete.
        server
            .rename(&s4dn("cn=Niemand,cn=Users"), &s4dn("cn=Niemand2,cn=Users"))
            .unwrap();
        let res = search_expr(&server, "(cn=Niemand2)");
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].dn(), &s4dn("cn=Niemand2,cn=Users"));

        server.delete(&s4dn("cn=Niemand2,cn=Users")).unwrap();
        assert_eq!(search_expr(&server, "(cn=Niemand2)").len(), 0);
        assert!(server.remote().is_empty());
        assert!(server.local().is_empty());
    }

    #[test]
    fn test_fallback_record_outside_mapped_base() {
        init_logging();
        let mut server = test_server().unwrap();
        server
            .apply_ldif(
                "\
dn: cn=Foo
foo: bar
blah: Blie
cn: Foo
showInAdvancedViewOnly: TRUE
",
            )
            .unwrap();

        // Stored wholly in the local store, untouched by the map.
        assert_eq!(server.local().len(), 1);
        assert!(server.remote().is_empty());

        let res = server.search(&dn("cn=Foo"), Scope::Base, None, &[]).unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].get_ava_single("showInAdvancedViewOnly"), Some("TRUE"));
        assert_eq!(res[0].get_ava_single("foo"), Some("bar"));
        assert_eq!(res[0].get_ava_single("blah"), Some("Blie"));
    }

    #[test]
    fn test_modify_local_record_outside_base() {
        init_logging();
        let mut server = test_server().unwrap();
        let target = dn("cn=test,dc=idealx,dc=org");
        server
            .apply_ldif(
                "\
dn: cn=test,dc=idealx,dc=org
cn: test
foo: bar
revision: 1
description: test
",
            )
            .unwrap();
        let res = server.search(&target, Scope::Base, None, &[]).unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].get_ava_single("description"), Some("test"));
        assert!(server.remote().is_empty());

        server
            .modify(
                &target,
                &ModifyList::new_list(vec![
                    crate::modify::m_replace("foo", &["baz"]),
                    crate::modify::m_replace("description", &["foo"]),
                ]),
            )
            .unwrap();
        let res = server.search(&target, Scope::Base, None, &[]).unwrap();
        assert_eq!(res[0].get_ava_single("foo"), Some("baz"));
        assert_eq!(res[0].get_ava_single("description"), Some("foo"));

        let target2 = dn("cn=toast,dc=idealx,dc=org");
        server.rename(&target, &target2).unwrap();
        let res = server.search(&target2, Scope::Base, None, &[]).unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].get_ava_single("revision"), Some("1"));

        server.delete(&target2).unwrap();
        assert!(server.search(&target2, Scope::Base, None, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_modify_remote_record_through_map() {
        init_logging();
        let mut server = test_server().unwrap();
        seed_backend(
            server.remote_mut(),
            &format!(
                "\
dn: cn=test,{remote_base}
cn: test
description: foo
sambaBadPasswordCount: 3
sambaNextRid: 1001
",
                remote_base = REMOTE_BASEDN
            ),
        )
        .unwrap();

        let attrs = vec![
            "description".to_string(),
            "badPwdCount".to_string(),
            "nextRid".to_string(),
        ];
        let res = server
            .search(&s4dn("cn=test"), Scope::Base, None, &attrs)
            .unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].get_ava_single("description"), Some("foo"));
        assert_eq!(res[0].get_ava_single("badPwdCount"), Some("3"));
        assert_eq!(res[0].get_ava_single("nextRid"), Some("1001"));
        // No local half exists.
        assert!(server.local().is_empty());

        server
            .modify(
                &s4dn("cn=test"),
                &ModifyList::new_list(vec![
                    crate::modify::m_replace("description", &["test"]),
                    crate::modify::m_replace("badPwdCount", &["4"]),
                ]),
            )
            .unwrap();
        assert!(server.local().is_empty());
        let rhalf = server
            .remote()
            .search(&s3dn("cn=test"), Scope::Base, None, &[])
            .unwrap();
        assert_eq!(rhalf[0].get_ava_single("description"), Some("test"));
        assert_eq!(rhalf[0].get_ava_single("sambaBadPasswordCount"), Some("4"));
        assert_eq!(rhalf[0].get_ava_single("sambaNextRid"), Some("1001"));

        // Rename travels through the DN translator.
        server.rename(&s4dn("cn=test"), &s4dn("cn=toast")).unwrap();
        let rhalf = server
            .remote()
            .search(&s3dn("cn=toast"), Scope::Base, None, &[])
            .unwrap();
        assert_eq!(rhalf.len(), 1);

        server.delete(&s4dn("cn=toast")).unwrap();
        assert!(server.remote().is_empty());
    }

    #[test]
    fn test_modify_splits_remote_record_with_local_data() {
        init_logging();
        let mut server = test_server().unwrap();
        seed_backend(
            server.remote_mut(),
            &format!(
                "\
dn: cn=test,{remote_base}
cn: test
description: foo
sambaBadPasswordCount: 3
sambaNextRid: 1001
",
                remote_base = REMOTE_BASEDN
            ),
        )
        .unwrap();

        server
            .modify(
                &s4dn("cn=test"),
                &ModifyList::new_list(vec![
                    crate::modify::m_add("revision", &["1"]),
                    crate::modify::m_replace("description", &["test"]),
                ]),
            )
            .unwrap();

        // The record is split now: revision lives locally, description
        // stayed remote, and both halves carry the correlation key.
        let res = server.search(&s4dn("cn=test"), Scope::Base, None, &[]).unwrap();
        assert_eq!(res[0].get_ava_single("description"), Some("test"));
        assert_eq!(res[0].get_ava_single("revision"), Some("1"));

        let lhalf = server
            .local()
            .search(&s4dn("cn=test"), Scope::Base, None, &[])
            .unwrap();
        assert_eq!(lhalf.len(), 1);
        assert_eq!(lhalf[0].get_ava_single("revision"), Some("1"));
        assert_eq!(lhalf[0].get_ava("description"), None);
        assert!(lhalf[0].attribute_pres("objectGUID"));

        let rhalf = server
            .remote()
            .search(&s3dn("cn=test"), Scope::Base, None, &[])
            .unwrap();
        assert_eq!(rhalf[0].get_ava_single("description"), Some("test"));
        assert_eq!(rhalf[0].get_ava("revision"), None);
        assert!(rhalf[0].attribute_pres("sambaObjectGuid"));

        // Dropping a remote-side attribute leaves the local-only data
        // intact and discoverable.
        server
            .modify(
                &s4dn("cn=test"),
                &ModifyList::new_list(vec![crate::modify::m_purge("description")]),
            )
            .unwrap();
        let res = search_expr(&server, "(revision=1)");
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].dn(), &s4dn("cn=test"));
        assert_eq!(res[0].get_ava("description"), None);
        assert_eq!(res[0].get_ava_single("badPwdCount"), Some("3"));

        // Deleting the logical record removes both halves.
        server.delete(&s4dn("cn=test")).unwrap();
        assert!(server.local().is_empty());
        assert!(server.remote().is_empty());
    }

    #[test]
    fn test_split_record_full_lifecycle() {
        init_logging();
        let mut server = test_server().unwrap();
        server
            .apply_ldif(&format!(
                "\
dn: cn=test,{base}
cn: test
description: foo
badPwdCount: 3
nextRid: 1001
revision: 1
",
                base = LOCAL_BASEDN
            ))
            .unwrap();

        let res = server.search(&s4dn("cn=test"), Scope::Base, None, &[]).unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].get_ava_single("description"), Some("foo"));
        assert_eq!(res[0].get_ava_single("badPwdCount"), Some("3"));
        assert_eq!(res[0].get_ava_single("nextRid"), Some("1001"));
        assert_eq!(res[0].get_ava_single("revision"), Some("1"));

        let lhalf = server
            .local()
            .search(&s4dn("cn=test"), Scope::Base, None, &[])
            .unwrap();
        assert_eq!(lhalf[0].get_ava_single("revision"), Some("1"));
        assert_eq!(lhalf[0].get_ava("description"), None);
        assert_eq!(lhalf[0].get_ava("badpwdcount"), None);
        let rhalf = server
            .remote()
            .search(&s3dn("cn=test"), Scope::Base, None, &[])
            .unwrap();
        assert_eq!(rhalf[0].get_ava_single("description"), Some("foo"));
        assert_eq!(rhalf[0].get_ava_single("sambaBadPasswordCount"), Some("3"));
        assert_eq!(rhalf[0].get_ava_single("sambaNextRid"), Some("1001"));
        assert_eq!(rhalf[0].get_ava("revision"), None);

        // Modify both sides in one operation.
        server
            .modify(
                &s4dn("cn=test"),
                &ModifyList::new_list(vec![
                    crate::modify::m_replace("description", &["test"]),
                    crate::modify::m_replace("badPwdCount", &["4"]),
                    crate::modify::m_replace("revision", &["2"]),
                ]),
            )
            .unwrap();
        let res = server.search(&s4dn("cn=test"), Scope::Base, None, &[]).unwrap();
        assert_eq!(res[0].get_ava_single("description"), Some("test"));
        assert_eq!(res[0].get_ava_single("badPwdCount"), Some("4"));
        assert_eq!(res[0].get_ava_single("nextRid"), Some("1001"));
        assert_eq!(res[0].get_ava_single("revision"), Some("2"));

        // Rename moves both halves under their translated DNs.
        server.rename(&s4dn("cn=test"), &s4dn("cn=toast")).unwrap();
        let res = server.search(&s4dn("cn=toast"), Scope::Base, None, &[]).unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].get_ava_single("revision"), Some("2"));
        assert_eq!(res[0].get_ava_single("description"), Some("test"));
        assert_eq!(
            server
                .remote()
                .search(&s3dn("cn=toast"), Scope::Base, None, &[])
                .unwrap()
                .len(),
            1
        );
        assert!(server
            .local()
            .search(&s4dn("cn=test"), Scope::Base, None, &[])
            .unwrap()
            .is_empty());

        server.delete(&s4dn("cn=toast")).unwrap();
        assert!(server.search(&s4dn("cn=toast"), Scope::Base, None, &[]).unwrap().is_empty());
        assert!(server.local().is_empty());
        assert!(server.remote().is_empty());
    }

    #[test]
    fn test_merge_tie_break() {
        init_logging();
        let mut server = test_server().unwrap();
        // Halves seeded directly with deliberately conflicting values.
        seed_backend(
            server.remote_mut(),
            &format!(
                "\
dn: cn=tb,{remote_base}
cn: tb
description: remote-value
codePage: remote-value
",
                remote_base = REMOTE_BASEDN
            ),
        )
        .unwrap();
        seed_backend(
            server.local_mut(),
            &format!(
                "\
dn: cn=tb,{base}
cn: tb
description: local-value
codePage: local-value
",
                base = LOCAL_BASEDN
            ),
        )
        .unwrap();

        let res = server.search(&s4dn("cn=tb"), Scope::Base, None, &[]).unwrap();
        assert_eq!(res.len(), 1);
        // description is declared remote-authoritative by the map.
        assert_eq!(res[0].get_ava_single("description"), Some("remote-value"));
        // Unmapped attributes fall to the local override layer.
        assert_eq!(res[0].get_ava_single("codePage"), Some("local-value"));
    }

    #[test]
    fn test_split_add_rolls_back_on_local_failure() {
        init_logging();
        let config = crate::ldif::parse_map_config(
            "dn: @MAP=samba3sam\n@FROM: dc=vernstok,dc=nl\n@TO: sambaDomainName=TESTS,cn=Samba3Sam\n",
        )
        .unwrap();
        let map = SchemaMap::by_name(config).unwrap();
        let mut server = MapServer::new(map, FailingBackend::fail_after(0), MemoryBackend::new());

        let mut entry = Entry::new(s4dn("cn=test"));
        entry.add_ava("cn", "test");
        entry.add_ava("description", "foo");
        entry.add_ava("revision", "1");
        let err = server.add(entry).unwrap_err();
        assert_eq!(err, LdbError::UnwillingToPerform);
        // The remote half was compensated away again.
        assert!(server.remote().is_empty());
    }

    #[test]
    fn test_split_modify_rolls_back_remote_on_local_failure() {
        init_logging();
        let config = crate::ldif::parse_map_config(
            "dn: @MAP=samba3sam\n@FROM: dc=vernstok,dc=nl\n@TO: sambaDomainName=TESTS,cn=Samba3Sam\n",
        )
        .unwrap();
        let map = SchemaMap::by_name(config).unwrap();
        // One local write succeeds (the add), the next fails.
        let mut server = MapServer::new(map, FailingBackend::fail_after(1), MemoryBackend::new());

        let mut entry = Entry::new(s4dn("cn=test"));
        entry.add_ava("cn", "test");
        entry.add_ava("description", "foo");
        entry.add_ava("revision", "1");
        server.add(entry).unwrap();

        let err = server
            .modify(
                &s4dn("cn=test"),
                &ModifyList::new_list(vec![
                    crate::modify::m_replace("description", &["changed"]),
                    crate::modify::m_replace("revision", &["2"]),
                ]),
            )
            .unwrap_err();
        assert_eq!(err, LdbError::UnwillingToPerform);

        // The remote change was rolled back; no partial application.
        let rhalf = server
            .remote()
            .search(&s3dn("cn=test"), Scope::Base, None, &[])
            .unwrap();
        assert_eq!(rhalf[0].get_ava_single("description"), Some("foo"));
        let lhalf = server
            .local()
            .inner()
            .search(&s4dn("cn=test"), Scope::Base, None, &[])
            .unwrap();
        assert_eq!(lhalf[0].get_ava_single("revision"), Some("1"));
    }

    #[test]
    fn test_double_failure_escalates_to_inconsistency() {
        init_logging();
        let config = crate::ldif::parse_map_config(
            "dn: @MAP=samba3sam\n@FROM: dc=vernstok,dc=nl\n@TO: sambaDomainName=TESTS,cn=Samba3Sam\n",
        )
        .unwrap();
        let map = SchemaMap::by_name(config).unwrap();
        // Local: the add succeeds, the modify fails. Remote: the add and
        // the modify succeed, the compensating modify fails.
        let mut server = MapServer::new(
            map,
            FailingBackend::fail_after(1),
            FailingBackend::fail_after(2),
        );

        let mut entry = Entry::new(s4dn("cn=test"));
        entry.add_ava("cn", "test");
        entry.add_ava("description", "foo");
        entry.add_ava("revision", "1");
        server.add(entry).unwrap();

        let err = server
            .modify(
                &s4dn("cn=test"),
                &ModifyList::new_list(vec![
                    crate::modify::m_replace("description", &["changed"]),
                    crate::modify::m_replace("revision", &["2"]),
                ]),
            )
            .unwrap_err();
        // The stores are divergent; this is fatal and must not look
        // like an ordinary backend error.
        assert_eq!(err, LdbError::CrossBackendInconsistency(String::new()));
    }

    #[test]
    fn test_split_delete_restores_remote_on_local_failure() {
        init_logging();
        let config = crate::ldif::parse_map_config(
            "dn: @MAP=samba3sam\n@FROM: dc=vernstok,dc=nl\n@TO: sambaDomainName=TESTS,cn=Samba3Sam\n",
        )
        .unwrap();
        let map = SchemaMap::by_name(config).unwrap();
        let mut server = MapServer::new(map, FailingBackend::fail_after(1), MemoryBackend::new());

        let mut entry = Entry::new(s4dn("cn=test"));
        entry.add_ava("cn", "test");
        entry.add_ava("description", "foo");
        entry.add_ava("revision", "1");
        server.add(entry).unwrap();

        let err = server.delete(&s4dn("cn=test")).unwrap_err();
        assert_eq!(err, LdbError::UnwillingToPerform);
        // The remote half was re-added during compensation.
        let rhalf = server
            .remote()
            .search(&s3dn("cn=test"), Scope::Base, None, &[])
            .unwrap();
        assert_eq!(rhalf.len(), 1);
        assert_eq!(rhalf[0].get_ava_single("description"), Some("foo"));
    }

    #[test]
    fn test_split_rename_rolls_back_remote_on_local_failure() {
        init_logging();
        let config = crate::ldif::parse_map_config(
            "dn: @MAP=samba3sam\n@FROM: dc=vernstok,dc=nl\n@TO: sambaDomainName=TESTS,cn=Samba3Sam\n",
        )
        .unwrap();
        let map = SchemaMap::by_name(config).unwrap();
        let mut server = MapServer::new(map, FailingBackend::fail_after(1), MemoryBackend::new());

        let mut entry = Entry::new(s4dn("cn=test"));
        entry.add_ava("cn", "test");
        entry.add_ava("description", "foo");
        entry.add_ava("revision", "1");
        server.add(entry).unwrap();

        let err = server.rename(&s4dn("cn=test"), &s4dn("cn=toast")).unwrap_err();
        assert_eq!(err, LdbError::UnwillingToPerform);
        // The remote half is back under its old DN.
        assert_eq!(
            server
                .remote()
                .search(&s3dn("cn=test"), Scope::Base, None, &[])
                .unwrap()
                .len(),
            1
        );
        assert!(server
            .remote()
            .search(&s3dn("cn=toast"), Scope::Base, None, &[])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_delete_missing_record() {
        init_logging();
        let mut server = test_server().unwrap();
        assert_eq!(
            server.delete(&s4dn("cn=missing")).unwrap_err(),
            LdbError::NoSuchObject
        );
    }
}
