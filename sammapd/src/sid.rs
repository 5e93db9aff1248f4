//! Security identifier handling. The mapping layer only ever sees SIDs in
//! their string form (`S-1-5-21-...-rid`), so this is a parse/split/print
//! type, not a binary codec.

use std::fmt;
use std::str::FromStr;

use crate::prelude::*;

/// A structured SID: revision, identifier authority and sub-authorities.
/// The last sub-authority is the RID when the SID names an object inside
/// a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sid {
    revision: u8,
    authority: u64,
    sub_authorities: Vec<u32>,
}

impl Sid {
    /// The trailing sub-authority, if any.
    pub fn rid(&self) -> Option<u32> {
        self.sub_authorities.last().copied()
    }

    /// The SID with the trailing RID removed - the domain this object
    /// belongs to.
    pub fn domain(&self) -> Option<Sid> {
        if self.sub_authorities.is_empty() {
            return None;
        }
        Some(Sid {
            revision: self.revision,
            authority: self.authority,
            sub_authorities: self.sub_authorities[..self.sub_authorities.len() - 1].to_vec(),
        })
    }

    /// Append a RID, forming an object SID within this domain.
    pub fn with_rid(&self, rid: u32) -> Sid {
        let mut sub_authorities = self.sub_authorities.clone();
        sub_authorities.push(rid);
        Sid {
            revision: self.revision,
            authority: self.authority,
            sub_authorities,
        }
    }
}

impl FromStr for Sid {
    type Err = LdbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut it = s.split('-');
        let bad = || LdbError::InvalidAttributeSyntax(s.to_string());
        if it.next() != Some("S") {
            return Err(bad());
        }
        let revision = it.next().and_then(|v| v.parse().ok()).ok_or_else(bad)?;
        let authority = it.next().and_then(|v| v.parse().ok()).ok_or_else(bad)?;
        let sub_authorities = it
            .map(|v| v.parse().map_err(|_| bad()))
            .collect::<Result<Vec<u32>, _>>()?;
        Ok(Sid {
            revision,
            authority,
            sub_authorities,
        })
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-{}", self.revision, self.authority)?;
        for sub in &self.sub_authorities {
            write!(f, "-{}", sub)?;
        }
        Ok(())
    }
}
