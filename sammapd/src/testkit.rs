//! Test wiring: a `MapServer` over two in-memory engines with the
//! samba3sam map, LDIF seeding helpers, and a backend wrapper that
//! starts failing on demand so the compensation paths can be exercised.

use crate::be::mem::MemoryBackend;
use crate::be::{DirectoryBackend, Scope};
use crate::ldif;
use crate::prelude::*;

/// The base DN pair the acceptance fixtures use.
pub const LOCAL_BASEDN: &str = "dc=vernstok,dc=nl";
pub const REMOTE_BASEDN: &str = "sambaDomainName=TESTS,cn=Samba3Sam";

const MAP_DIRECTIVES: &str = "\
dn: @MAP=samba3sam
@FROM: dc=vernstok,dc=nl
@TO: sambaDomainName=TESTS,cn=Samba3Sam
";

/// A samba3sam map server over two empty in-memory stores, configured
/// through the same LDIF directives provisioning would write.
pub fn test_server() -> Result<MapServer<MemoryBackend, MemoryBackend>, LdbError> {
    let config = ldif::parse_map_config(MAP_DIRECTIVES)?;
    let map = SchemaMap::by_name(config)?;
    Ok(MapServer::new(
        map,
        MemoryBackend::new(),
        MemoryBackend::new(),
    ))
}

/// Load plain entry records straight into one backend, bypassing the
/// mapping layer - how fixtures seed the remote store directly.
pub fn seed_backend(be: &mut impl DirectoryBackend, text: &str) -> Result<(), LdbError> {
    for entry in ldif::parse_entries(text)? {
        be.add(entry)?;
    }
    Ok(())
}

/// A backend that forwards to an in-memory store until a set number of
/// write operations have happened, then fails everything with the
/// configured error. `fail_after(0)` fails immediately.
pub struct FailingBackend {
    inner: MemoryBackend,
    remaining_writes: usize,
    error: LdbError,
}

impl FailingBackend {
    pub fn fail_after(remaining_writes: usize) -> Self {
        FailingBackend {
            inner: MemoryBackend::new(),
            remaining_writes,
            error: LdbError::UnwillingToPerform,
        }
    }

    pub fn with_error(mut self, error: LdbError) -> Self {
        self.error = error;
        self
    }

    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut MemoryBackend {
        &mut self.inner
    }

    fn consume(&mut self) -> Result<(), LdbError> {
        if self.remaining_writes == 0 {
            return Err(self.error.clone());
        }
        self.remaining_writes -= 1;
        Ok(())
    }
}

impl DirectoryBackend for FailingBackend {
    fn search(
        &self,
        base: &Dn,
        scope: Scope,
        filter: Option<&Filter>,
        attrs: &[String],
    ) -> Result<Vec<Entry>, LdbError> {
        self.inner.search(base, scope, filter, attrs)
    }

    fn add(&mut self, entry: Entry) -> Result<(), LdbError> {
        self.consume()?;
        self.inner.add(entry)
    }

    fn modify(&mut self, dn: &Dn, mods: &ModifyList) -> Result<(), LdbError> {
        self.consume()?;
        self.inner.modify(dn, mods)
    }

    fn rename(&mut self, old_dn: &Dn, new_dn: &Dn) -> Result<(), LdbError> {
        self.consume()?;
        self.inner.rename(old_dn, new_dn)
    }

    fn delete(&mut self, dn: &Dn) -> Result<(), LdbError> {
        self.consume()?;
        self.inner.delete(dn)
    }
}

#[cfg(test)]
pub(crate) fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
