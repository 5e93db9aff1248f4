//! Shared protocol types for the sammap engine. These are the definitions
//! that cross the boundary between the mapping layer and its callers, so
//! they carry serde derives and stable LDAP result codes.

#![deny(warnings)]
#![warn(unused_extern_crates)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod v1;
