//! Search filter expression trees. A [`Filter`] is the logical statement
//! an entry must uphold to be returned from a search. Filters arrive
//! either as RFC 4515 text (the LDIF-driven callers) or as wire filters
//! from `ldap3_proto`; both forms reduce to the same tree.
//!
//! Rewriting a filter for one side of the mapping produces a
//! [`MappedFilter`], which can also be the constant "match all" (the
//! side must be enumerated) or "match nothing" (the side can be skipped
//! entirely). Rewriting never produces a parse error: a clause the map
//! cannot express becomes one of the constants instead.

use std::fmt;

use ldap3_proto::proto::{LdapFilter, LdapSubstringFilter};

use crate::prelude::*;

/// A substring pattern, `initial*any*...*final`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substring {
    pub initial: Option<String>,
    pub any: Vec<String>,
    pub final_: Option<String>,
}

impl Substring {
    /// Case-insensitive match of the pattern against a value.
    pub fn matches(&self, value: &str) -> bool {
        let value = value.to_lowercase();
        let mut pos = 0;
        if let Some(initial) = &self.initial {
            let initial = initial.to_lowercase();
            if !value.starts_with(&initial) {
                return false;
            }
            pos = initial.len();
        }
        for mid in &self.any {
            let mid = mid.to_lowercase();
            match value[pos..].find(&mid) {
                Some(idx) => pos += idx + mid.len(),
                None => return false,
            }
        }
        if let Some(final_) = &self.final_ {
            let final_ = final_.to_lowercase();
            return value.len() >= pos + final_.len() && value.ends_with(&final_);
        }
        true
    }
}

impl From<&LdapSubstringFilter> for Substring {
    fn from(f: &LdapSubstringFilter) -> Self {
        Substring {
            initial: f.initial.clone(),
            any: f.any.clone(),
            final_: f.final_.clone(),
        }
    }
}

/// A filter expression tree. Attribute names are normalised to lowercase
/// on construction; value comparison is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq(AttrString, String),
    Sub(AttrString, Substring),
    Pres(AttrString),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

pub fn f_eq(attr: &str, value: &str) -> Filter {
    Filter::Eq(attr.to_lowercase().into(), value.to_string())
}

pub fn f_sub(attr: &str, sub: Substring) -> Filter {
    Filter::Sub(attr.to_lowercase().into(), sub)
}

pub fn f_pres(attr: &str) -> Filter {
    Filter::Pres(attr.to_lowercase().into())
}

pub fn f_and(children: Vec<Filter>) -> Filter {
    Filter::And(children)
}

pub fn f_or(children: Vec<Filter>) -> Filter {
    Filter::Or(children)
}

pub fn f_not(child: Filter) -> Filter {
    Filter::Not(Box::new(child))
}

impl Filter {
    /// Parse an RFC 4515 style filter string, eg
    /// `(&(objectClass=user)(!(badPwdCount=0)))`.
    pub fn parse(s: &str) -> Result<Filter, LdbError> {
        let mut p = Parser {
            input: s.as_bytes(),
            pos: 0,
        };
        let f = p.parse_filter()?;
        p.skip_ws();
        if p.pos != p.input.len() {
            return Err(p.syntax_error());
        }
        Ok(f)
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn syntax_error(&self) -> LdbError {
        LdbError::OperationsError(format!(
            "malformed filter at offset {}: {}",
            self.pos,
            String::from_utf8_lossy(self.input)
        ))
    }

    fn skip_ws(&mut self) {
        while self.input.get(self.pos) == Some(&b' ') {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: u8) -> Result<(), LdbError> {
        if self.input.get(self.pos) == Some(&c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.syntax_error())
        }
    }

    fn parse_filter(&mut self) -> Result<Filter, LdbError> {
        self.skip_ws();
        self.expect(b'(')?;
        let f = match self.input.get(self.pos) {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.parse_list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.parse_list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_item()?,
            None => return Err(self.syntax_error()),
        };
        self.expect(b')')?;
        Ok(f)
    }

    fn parse_list(&mut self) -> Result<Vec<Filter>, LdbError> {
        let mut out = Vec::new();
        loop {
            self.skip_ws();
            if self.input.get(self.pos) == Some(&b'(') {
                out.push(self.parse_filter()?);
            } else if out.is_empty() {
                return Err(self.syntax_error());
            } else {
                return Ok(out);
            }
        }
    }

    fn parse_item(&mut self) -> Result<Filter, LdbError> {
        let start = self.pos;
        while let Some(&c) = self.input.get(self.pos) {
            if c == b'=' {
                break;
            }
            if c == b'(' || c == b')' {
                return Err(self.syntax_error());
            }
            self.pos += 1;
        }
        let attr = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.syntax_error())?
            .trim()
            .to_string();
        if attr.is_empty() {
            return Err(self.syntax_error());
        }
        self.expect(b'=')?;
        let vstart = self.pos;
        while let Some(&c) = self.input.get(self.pos) {
            if c == b')' {
                break;
            }
            if c == b'(' {
                return Err(self.syntax_error());
            }
            self.pos += 1;
        }
        let value = std::str::from_utf8(&self.input[vstart..self.pos])
            .map_err(|_| self.syntax_error())?
            .to_string();

        if value == "*" {
            return Ok(f_pres(&attr));
        }
        if !value.contains('*') {
            return Ok(f_eq(&attr, &value));
        }
        // A value with wildcards is a substring pattern.
        let parts: Vec<&str> = value.split('*').collect();
        let initial = match parts.first() {
            Some(&"") => None,
            Some(p) => Some(p.to_string()),
            None => None,
        };
        let final_ = match parts.last() {
            Some(&"") => None,
            Some(p) => Some(p.to_string()),
            None => None,
        };
        let any = parts[1..parts.len() - 1]
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| p.to_string())
            .collect();
        Ok(f_sub(
            &attr,
            Substring {
                initial,
                any,
                final_,
            },
        ))
    }
}

impl TryFrom<&LdapFilter> for Filter {
    type Error = LdbError;

    fn try_from(f: &LdapFilter) -> Result<Self, Self::Error> {
        match f {
            LdapFilter::And(children) => Ok(Filter::And(
                children
                    .iter()
                    .map(Filter::try_from)
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            LdapFilter::Or(children) => Ok(Filter::Or(
                children
                    .iter()
                    .map(Filter::try_from)
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            LdapFilter::Not(child) => Ok(Filter::Not(Box::new(Filter::try_from(
                child.as_ref(),
            )?))),
            LdapFilter::Equality(attr, value) => Ok(f_eq(attr, value)),
            LdapFilter::Substring(attr, sub) => Ok(f_sub(attr, sub.into())),
            LdapFilter::Present(attr) => Ok(f_pres(attr)),
            _ => Err(LdbError::OperationsError(
                "unsupported filter operator".to_string(),
            )),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Eq(a, v) => write!(f, "({}={})", a, v),
            Filter::Sub(a, s) => {
                write!(f, "({}=", a)?;
                if let Some(initial) = &s.initial {
                    write!(f, "{}", initial)?;
                }
                for mid in &s.any {
                    write!(f, "*{}", mid)?;
                }
                write!(f, "*")?;
                if let Some(final_) = &s.final_ {
                    write!(f, "{}", final_)?;
                }
                write!(f, ")")
            }
            Filter::Pres(a) => write!(f, "({}=*)", a),
            Filter::And(cs) => {
                write!(f, "(&")?;
                for c in cs {
                    write!(f, "{}", c)?;
                }
                write!(f, ")")
            }
            Filter::Or(cs) => {
                write!(f, "(|")?;
                for c in cs {
                    write!(f, "{}", c)?;
                }
                write!(f, ")")
            }
            Filter::Not(c) => write!(f, "(!{})", c),
        }
    }
}

/// The result of rewriting a filter for one backend. `MatchAll` means
/// the side has to be enumerated to answer the query; `MatchNone` means
/// the side cannot contribute and may be skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappedFilter {
    Clause(Filter),
    MatchAll,
    MatchNone,
}

impl MappedFilter {
    /// Conjunction: a `MatchNone` child collapses the whole And, while
    /// `MatchAll` children are dropped as the identity element.
    pub fn and(children: Vec<MappedFilter>) -> MappedFilter {
        let mut out = Vec::new();
        for c in children {
            match c {
                MappedFilter::MatchNone => return MappedFilter::MatchNone,
                MappedFilter::MatchAll => {}
                MappedFilter::Clause(f) => out.push(f),
            }
        }
        match out.len() {
            0 => MappedFilter::MatchAll,
            1 => MappedFilter::Clause(out.swap_remove(0)),
            _ => MappedFilter::Clause(Filter::And(out)),
        }
    }

    /// Disjunction: `MatchNone` children are dropped as the identity
    /// element, while a `MatchAll` child widens the whole Or.
    pub fn or(children: Vec<MappedFilter>) -> MappedFilter {
        let mut out = Vec::new();
        for c in children {
            match c {
                MappedFilter::MatchAll => return MappedFilter::MatchAll,
                MappedFilter::MatchNone => {}
                MappedFilter::Clause(f) => out.push(f),
            }
        }
        match out.len() {
            0 => MappedFilter::MatchNone,
            1 => MappedFilter::Clause(out.swap_remove(0)),
            _ => MappedFilter::Clause(Filter::Or(out)),
        }
    }

    /// Negation. A constant child widens to `MatchAll`: negating a
    /// clause this side could not express must still let the side's
    /// records through, because an entry may satisfy the negation simply
    /// by lacking the attribute here. The merger re-checks the original
    /// filter on the assembled entry, so widening only costs candidates,
    /// never correctness.
    pub fn not(child: MappedFilter) -> MappedFilter {
        match child {
            MappedFilter::Clause(f) => MappedFilter::Clause(f_not(f)),
            MappedFilter::MatchAll | MappedFilter::MatchNone => MappedFilter::MatchAll,
        }
    }

    pub fn as_clause(&self) -> Option<&Filter> {
        match self {
            MappedFilter::Clause(f) => Some(f),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn test_parse_simple_eq() {
        let f = Filter::parse("(cn=Administrator)").unwrap();
        assert_eq!(f, f_eq("cn", "Administrator"));
    }

    #[test]
    fn test_parse_nested_boolean() {
        let f = Filter::parse("(&(codePage=x)(!(revision=x)))").unwrap();
        assert_eq!(
            f,
            f_and(vec![f_eq("codepage", "x"), f_not(f_eq("revision", "x"))])
        );
    }

    #[test]
    fn test_parse_complex_tree() {
        let f = Filter::parse(
            "(|(&(revision=x)(dnsHostName=x))(!(&(description=x)(nextRid=y)))(badPwdCount=y))",
        )
        .unwrap();
        match f {
            Filter::Or(cs) => assert_eq!(cs.len(), 3),
            other => panic!("expected Or, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_presence_and_substring() {
        assert_eq!(Filter::parse("(objectSid=*)").unwrap(), f_pres("objectsid"));
        let f = Filter::parse("(cn=Nie*and)").unwrap();
        match &f {
            Filter::Sub(a, s) => {
                assert_eq!(a.as_str(), "cn");
                assert_eq!(s.initial.as_deref(), Some("Nie"));
                assert_eq!(s.final_.as_deref(), Some("and"));
                assert!(s.any.is_empty());
            }
            other => panic!("expected Sub, got {:?}", other),
        }
        assert!(f.to_string() == "(cn=Nie*and)");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "(", "(cn=x", "cn=x", "(&)", "((cn=x))", "(=x)"] {
            assert!(Filter::parse(bad).is_err(), "{} parsed", bad);
        }
    }

    #[test]
    fn test_substring_matching() {
        let s = Substring {
            initial: Some("ge".to_string()),
            any: vec!["h".to_string()],
            final_: Some("im".to_string()),
        };
        assert!(s.matches("geheim"));
        assert!(s.matches("GEHEIM"));
        assert!(!s.matches("geh"));
        assert!(!s.matches("heim"));
    }

    #[test]
    fn test_ldap_filter_conversion() {
        let wire = LdapFilter::And(vec![
            LdapFilter::Equality("unixName".to_string(), "bin".to_string()),
            LdapFilter::Not(Box::new(LdapFilter::Present("description".to_string()))),
        ]);
        let f = Filter::try_from(&wire).unwrap();
        assert_eq!(
            f,
            f_and(vec![
                f_eq("unixname", "bin"),
                f_not(f_pres("description"))
            ])
        );
    }

    #[test]
    fn test_mapped_filter_and_or_identities() {
        let c = MappedFilter::Clause(f_eq("uid", "bin"));
        assert_eq!(
            MappedFilter::and(vec![c.clone(), MappedFilter::MatchAll]),
            c
        );
        assert_eq!(
            MappedFilter::and(vec![c.clone(), MappedFilter::MatchNone]),
            MappedFilter::MatchNone
        );
        assert_eq!(
            MappedFilter::or(vec![c.clone(), MappedFilter::MatchNone]),
            c
        );
        assert_eq!(
            MappedFilter::or(vec![c.clone(), MappedFilter::MatchAll]),
            MappedFilter::MatchAll
        );
        assert_eq!(MappedFilter::not(MappedFilter::MatchNone), MappedFilter::MatchAll);
        assert_eq!(
            MappedFilter::not(c.clone()),
            MappedFilter::Clause(f_not(f_eq("uid", "bin")))
        );
    }
}
