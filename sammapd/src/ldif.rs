//! RFC 2849 LDIF parsing, covering the subset the provisioning and test
//! fixtures actually use: entry records, change records (`add`,
//! `modify`, `delete`), comments, folded lines, base64 values, and the
//! `@MAP`-style directive records that configure the mapping layer.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeRecord {
    Add(Entry),
    Modify(Dn, ModifyList),
    Delete(Dn),
}

fn ldif_error(msg: &str, detail: &str) -> LdbError {
    LdbError::OperationsError(format!("ldif: {}: {}", msg, detail))
}

/// One record as a list of (name, value) lines, folding and comments
/// resolved.
fn split_records(text: &str) -> Result<Vec<Vec<(String, String)>>, LdbError> {
    let mut records = Vec::new();
    let mut current: Vec<(String, String)> = Vec::new();
    // Logical lines: a leading space continues the previous line.
    let mut logical: Vec<String> = Vec::new();
    for raw in text.lines().chain(std::iter::once("")) {
        if let Some(rest) = raw.strip_prefix(' ') {
            match logical.last_mut() {
                Some(prev) => {
                    prev.push_str(rest);
                    continue;
                }
                None => return Err(ldif_error("continuation without a line", raw)),
            }
        }
        logical.push(raw.to_string());
    }

    for line in logical {
        let line_trimmed = line.trim_end();
        if line_trimmed.is_empty() {
            if !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            continue;
        }
        if line_trimmed.starts_with('#') || line_trimmed.starts_with("version:") {
            continue;
        }
        // The bare dash separating modify sections carries no value.
        if line_trimmed == "-" {
            current.push(("-".to_string(), String::new()));
            continue;
        }
        let (name, value) = parse_line(line_trimmed)?;
        current.push((name, value));
    }
    if !current.is_empty() {
        records.push(current);
    }
    Ok(records)
}

fn parse_line(line: &str) -> Result<(String, String), LdbError> {
    let colon = line
        .find(':')
        .ok_or_else(|| ldif_error("missing separator", line))?;
    let name = line[..colon].trim().to_string();
    if name.is_empty() {
        return Err(ldif_error("empty attribute name", line));
    }
    let rest = &line[colon + 1..];
    if let Some(b64) = rest.strip_prefix(':') {
        let bytes = BASE64
            .decode(b64.trim())
            .map_err(|_| ldif_error("bad base64 value", line))?;
        let value =
            String::from_utf8(bytes).map_err(|_| ldif_error("base64 value is not utf-8", line))?;
        return Ok((name, value));
    }
    Ok((name, rest.trim().to_string()))
}

fn record_dn(record: &[(String, String)]) -> Result<(&str, &[(String, String)]), LdbError> {
    match record.first() {
        Some((name, value)) if name.eq_ignore_ascii_case("dn") => {
            Ok((value.as_str(), &record[1..]))
        }
        _ => Err(ldif_error("record does not start with dn", "")),
    }
}

fn entry_from(dn: &str, lines: &[(String, String)]) -> Result<Entry, LdbError> {
    let mut entry = Entry::new(Dn::parse(dn)?);
    for (name, value) in lines {
        entry.add_ava(name, value);
    }
    Ok(entry)
}

/// Parse a stream of plain entry records.
pub fn parse_entries(text: &str) -> Result<Vec<Entry>, LdbError> {
    split_records(text)?
        .iter()
        .map(|record| {
            let (dn, lines) = record_dn(record)?;
            entry_from(dn, lines)
        })
        .collect()
}

/// Parse a stream of change records. A record without a `changetype`
/// line is an add, as in ldbadd.
pub fn parse_changes(text: &str) -> Result<Vec<ChangeRecord>, LdbError> {
    split_records(text)?
        .iter()
        .map(|record| {
            let (dn, lines) = record_dn(record)?;
            match lines.first() {
                Some((name, value)) if name.eq_ignore_ascii_case("changetype") => {
                    let rest = &lines[1..];
                    match value.to_lowercase().as_str() {
                        "add" => Ok(ChangeRecord::Add(entry_from(dn, rest)?)),
                        "delete" => Ok(ChangeRecord::Delete(Dn::parse(dn)?)),
                        "modify" => Ok(ChangeRecord::Modify(
                            Dn::parse(dn)?,
                            parse_modify(rest)?,
                        )),
                        other => Err(ldif_error("unknown changetype", other)),
                    }
                }
                _ => Ok(ChangeRecord::Add(entry_from(dn, lines)?)),
            }
        })
        .collect()
}

fn parse_modify(lines: &[(String, String)]) -> Result<ModifyList, LdbError> {
    let mut ml = ModifyList::new();
    let mut it = lines.iter().peekable();
    while let Some((op, attr)) = it.next() {
        if op == "-" {
            continue;
        }
        let mut values = Vec::new();
        while let Some((name, value)) = it.peek() {
            if name.eq_ignore_ascii_case(attr.as_str()) {
                values.push(value.clone());
                it.next();
            } else {
                break;
            }
        }
        // Consume the section terminator if present.
        if let Some((name, _)) = it.peek() {
            if name == "-" {
                it.next();
            }
        }
        let attr: AttrString = attr.to_lowercase().into();
        let m = match op.to_lowercase().as_str() {
            "add" => Modify::Add(attr, values),
            "replace" => Modify::Replace(attr, values),
            "delete" => Modify::Delete(attr, values),
            other => return Err(ldif_error("unknown modify operation", other)),
        };
        ml.push_mod(m);
    }
    Ok(ml)
}

/// Parse the `@MAP` directive record that selects and parameterises a
/// schema map:
///
/// ```text
/// dn: @MAP=samba3sam
/// @FROM: dc=vernstok,dc=nl
/// @TO: sambaDomainName=TESTS,cn=Samba3Sam
/// ```
pub fn parse_map_config(text: &str) -> Result<MapConfig, LdbError> {
    for record in split_records(text)? {
        let Some((name, dn_value)) = record.first() else {
            continue;
        };
        if !name.eq_ignore_ascii_case("dn") {
            continue;
        }
        let Some(map_name) = dn_value.strip_prefix("@MAP=") else {
            continue;
        };
        let mut from = None;
        let mut to = None;
        for (attr, value) in &record[1..] {
            match attr.to_uppercase().as_str() {
                "@FROM" => from = Some(value.clone()),
                "@TO" => to = Some(value.clone()),
                _ => {}
            }
        }
        let from = from.ok_or_else(|| ldif_error("@MAP record missing @FROM", dn_value))?;
        let to = to.ok_or_else(|| ldif_error("@MAP record missing @TO", dn_value))?;
        return Ok(MapConfig::new(
            map_name,
            Dn::parse(&from)?,
            Dn::parse(&to)?,
        ));
    }
    Err(ldif_error("no @MAP record found", ""))
}
