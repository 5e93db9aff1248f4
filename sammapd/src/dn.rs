//! Distinguished name handling. A [`Dn`] is a parsed RDN sequence with a
//! case-insensitive normal form used for comparison, and a [`DnMapper`]
//! translates DNs between the local and remote naming contexts by base
//! suffix substitution.

use std::fmt;
use std::hash::{Hash, Hasher};

use regex::Regex;

use crate::prelude::*;

lazy_static! {
    static ref RDN_RE: Regex = {
        #[allow(clippy::expect_used)]
        Regex::new("^(?P<attr>[A-Za-z][A-Za-z0-9-]*)=(?P<val>[^,=]+)$").expect("Invalid rdn regex")
    };
}

/// A single relative distinguished name component, `attr=value`.
#[derive(Debug, Clone)]
pub struct Rdn {
    pub attr: AttrString,
    pub value: String,
}

impl Rdn {
    fn norm(&self) -> String {
        format!(
            "{}={}",
            self.attr.to_lowercase(),
            self.value.to_lowercase()
        )
    }
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attr, self.value)
    }
}

/// A distinguished name. The most specific RDN is first, matching the
/// textual form `cn=X,ou=Users,dc=example,dc=org`. Display preserves the
/// case the DN was parsed with; equality and hashing use the lowercased
/// normal form.
#[derive(Debug, Clone)]
pub struct Dn {
    rdns: Vec<Rdn>,
    norm: String,
}

impl Dn {
    /// Parse a textual DN. The empty string is the root DN.
    pub fn parse(s: &str) -> Result<Self, LdbError> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Dn {
                rdns: Vec::new(),
                norm: String::new(),
            });
        }
        let rdns = s
            .split(',')
            .map(|part| {
                let part = part.trim();
                let caps = RDN_RE
                    .captures(part)
                    .ok_or_else(|| LdbError::InvalidDnSyntax(s.to_string()))?;
                Ok(Rdn {
                    // The captures are guaranteed by the regex match.
                    attr: caps["attr"].into(),
                    value: caps["val"].to_string(),
                })
            })
            .collect::<Result<Vec<_>, LdbError>>()?;
        Ok(Self::from_rdns(rdns))
    }

    pub fn from_rdns(rdns: Vec<Rdn>) -> Self {
        let norm = rdns.iter().map(|r| r.norm()).collect::<Vec<_>>().join(",");
        Dn { rdns, norm }
    }

    /// The lowercased comparison form.
    pub fn norm(&self) -> &str {
        &self.norm
    }

    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.rdns.len()
    }

    /// The leading (most specific) RDN, if any.
    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.is_empty() {
            None
        } else {
            Some(Dn::from_rdns(self.rdns[1..].to_vec()))
        }
    }

    /// True if `self` is `base` or is below it. The root DN contains
    /// everything.
    pub fn is_under(&self, base: &Dn) -> bool {
        self.strip_base(base).is_some()
    }

    /// The RDNs of `self` above `base`, or `None` if `self` is not under
    /// `base`. An equal DN yields an empty slice.
    pub fn strip_base(&self, base: &Dn) -> Option<&[Rdn]> {
        if base.rdns.len() > self.rdns.len() {
            return None;
        }
        let split = self.rdns.len() - base.rdns.len();
        let (head, tail) = self.rdns.split_at(split);
        let matches = tail
            .iter()
            .zip(base.rdns.iter())
            .all(|(a, b)| a.norm() == b.norm());
        if matches {
            Some(head)
        } else {
            None
        }
    }

    /// Build a DN from RDNs stacked on top of `base`.
    pub fn under_base(head: &[Rdn], base: &Dn) -> Dn {
        let mut rdns = head.to_vec();
        rdns.extend(base.rdns.iter().cloned());
        Dn::from_rdns(rdns)
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.rdns.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.norm == other.norm
    }
}

impl Eq for Dn {}

impl Hash for Dn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.norm.hash(state)
    }
}

/// Translates DNs between the two naming contexts. A DN whose suffix does
/// not match the expected base is an error, never a silent no-op.
#[derive(Debug, Clone)]
pub struct DnMapper {
    local_base: Dn,
    remote_base: Dn,
}

impl DnMapper {
    pub fn new(local_base: Dn, remote_base: Dn) -> Self {
        DnMapper {
            local_base,
            remote_base,
        }
    }

    pub fn local_base(&self) -> &Dn {
        &self.local_base
    }

    pub fn remote_base(&self) -> &Dn {
        &self.remote_base
    }

    /// Rewrite a DN under the local base to the corresponding remote DN.
    pub fn to_remote(&self, dn: &Dn) -> Result<Dn, LdbError> {
        let head = dn
            .strip_base(&self.local_base)
            .ok_or(LdbError::DnNotInScope)?;
        Ok(Dn::under_base(head, &self.remote_base))
    }

    /// Rewrite a DN under the remote base back to the local context.
    pub fn to_local(&self, dn: &Dn) -> Result<Dn, LdbError> {
        let head = dn
            .strip_base(&self.remote_base)
            .ok_or(LdbError::DnNotInScope)?;
        Ok(Dn::under_base(head, &self.local_base))
    }
}
