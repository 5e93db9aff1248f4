//! The sammap engine library. This implements a bidirectional attribute,
//! value and DN mapping layer between two directory stores: a "local"
//! AD-style store and a "remote" legacy flat-schema store. One logical
//! entry may be split across both stores; the [`server::MapServer`]
//! assembles, routes and compensates operations so callers only ever see
//! the logical view.

#![deny(warnings)]
#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

#[macro_use]
extern crate tracing;
#[macro_use]
extern crate lazy_static;

pub mod be;
pub mod dn;
pub mod entry;
pub mod filter;
pub mod ldif;
pub mod modify;
pub mod schema;
pub mod server;
pub mod sid;
pub mod testkit;

/// A prelude of imports that should be imported by all other sammap
/// modules to help make imports cleaner.
pub mod prelude {
    pub use sammap_proto::v1::LdbError;
    pub use smartstring::alias::String as AttrString;
    pub use uuid::Uuid;

    pub use crate::be::{DirectoryBackend, Scope};
    pub use crate::dn::{Dn, DnMapper};
    pub use crate::entry::Entry;
    pub use crate::filter::{
        f_and, f_eq, f_not, f_or, f_pres, f_sub, Filter, MappedFilter, Substring,
    };
    pub use crate::modify::{m_add, m_delete, m_purge, m_replace, Modify, ModifyList};
    pub use crate::schema::{
        AttributeMapping, ClassMapping, MapBehavior, MapConfig, SchemaMap, StorageLocality,
        StorageSide,
    };
    pub use crate::server::MapServer;
}
