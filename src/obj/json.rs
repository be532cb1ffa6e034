use std::fmt::Write;

use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine;
use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::keys::ColKey;
use crate::obj::Obj;
use crate::value::{ColumnType, Mixed};

/// Link depth that means "follow links until a column repeats".
pub const UNLIMITED_LINK_DEPTH: usize = usize::MAX;

const ESCAPED: [(char, &str); 7] = [
    ('"', "\\\""),
    ('\n', "\\n"),
    ('\r', "\\r"),
    ('\t', "\\t"),
    ('\u{000C}', "\\f"),
    ('\\', "\\\\"),
    ('\u{0008}', "\\b"),
];

fn write_escaped(out: &mut dyn Write, value: &str) -> Result<()> {
    for c in value.chars() {
        match ESCAPED.iter().find(|(escaped, _)| *escaped == c) {
            Some((_, replacement)) => out.write_str(replacement)?,
            None => out.write_char(c)?,
        }
    }
    Ok(())
}

fn write_mixed(out: &mut dyn Write, value: &Mixed) -> Result<()> {
    match value {
        Mixed::Null => write!(out, "null")?,
        Mixed::Int(v) => write!(out, "{v}")?,
        Mixed::Bool(v) => write!(out, "{v}")?,
        Mixed::Float(v) => write!(out, "{v:e}")?,
        Mixed::Double(v) => write!(out, "{v:e}")?,
        Mixed::String(v) => {
            write!(out, "\"")?;
            write_escaped(out, v)?;
            write!(out, "\"")?;
        }
        Mixed::Binary(v) => {
            write!(out, "\"{}\"", BASE64_ENGINE.encode(v))?;
        }
        Mixed::Timestamp(v) => write!(out, "\"{v}\"")?,
        Mixed::Decimal(v) => write!(out, "\"{v}\"")?,
        Mixed::ObjectId(v) => write!(out, "\"{v}\"")?,
        Mixed::TypedLink(v) => write!(out, "\"{v}\"")?,
        Mixed::Link(v) => write!(out, "{}", v.raw())?,
    }
    Ok(())
}

fn write_dictionary_key(out: &mut dyn Write, key: &Mixed) -> Result<()> {
    match key {
        Mixed::String(v) => {
            write!(out, "\"")?;
            write_escaped(out, v)?;
            write!(out, "\"")?;
        }
        other => {
            write!(out, "\"")?;
            write_mixed(out, other)?;
            write!(out, "\"")?;
        }
    }
    Ok(())
}

impl Obj {
    /// Serializes the row as one JSON object. The reserved `_key`
    /// member carries the row key; `renames` substitutes member
    /// names. Link columns nest their target while `link_depth`
    /// permits and the column has not been followed yet, and fall
    /// back to a `{"table": ..., "key": ...}` stub otherwise;
    /// embedded targets always nest.
    pub fn to_json(
        &self,
        out: &mut dyn Write,
        link_depth: usize,
        renames: &FxHashMap<String, String>,
    ) -> Result<()> {
        let mut followed = Vec::new();
        self.to_json_inner(out, link_depth, renames, &mut followed)
    }

    /// JSON form with no link traversal.
    pub fn to_json_string(&self) -> Result<String> {
        let mut out = String::new();
        self.to_json(&mut out, 0, &FxHashMap::default())?;
        Ok(out)
    }

    fn to_json_inner(
        &self,
        out: &mut dyn Write,
        link_depth: usize,
        renames: &FxHashMap<String, String>,
        followed: &mut Vec<ColKey>,
    ) -> Result<()> {
        self.check_valid()?;
        let rename = |name: &str| -> String {
            renames
                .get(name)
                .cloned()
                .unwrap_or_else(|| name.to_owned())
        };
        write!(out, "{{\"{}\":{}", rename("_key"), self.key().raw())?;
        let cols: Vec<(ColKey, String)> = self
            .table()
            .spec
            .read()
            .public_columns()
            .map(|spec| (spec.key, spec.name.clone()))
            .collect();
        for (col, name) in cols {
            write!(out, ",\"{}\":", rename(&name))?;
            if col.is_list() {
                self.linklist_to_json(out, col, link_depth, renames, followed)?;
            } else if col.is_dictionary() {
                let dict = self.get_dictionary(col)?;
                write!(out, "{{")?;
                let mut first = true;
                for entry in dict.iter()? {
                    let (key, value) = entry?;
                    if !first {
                        write!(out, ",")?;
                    }
                    first = false;
                    write_dictionary_key(out, &key)?;
                    write!(out, ":")?;
                    write_mixed(out, &value)?;
                }
                write!(out, "}}")?;
            } else if col.column_type() == ColumnType::Link {
                self.link_to_json(out, col, link_depth, renames, followed)?;
            } else {
                write_mixed(out, &self.get_any(col)?)?;
            }
        }
        write!(out, "}}")?;
        Ok(())
    }

    fn link_to_json(
        &self,
        out: &mut dyn Write,
        col: ColKey,
        link_depth: usize,
        renames: &FxHashMap<String, String>,
        followed: &mut Vec<ColKey>,
    ) -> Result<()> {
        let key: crate::keys::ObjKey = self.get(col)?;
        if key.is_null() {
            write!(out, "null")?;
            return Ok(());
        }
        let target_table = self.target_table(col)?;
        let stub = !target_table.is_embedded()
            && (link_depth == 0
                || (link_depth == UNLIMITED_LINK_DEPTH && followed.contains(&col)));
        if stub {
            write!(
                out,
                "{{\"table\": \"{}\", \"key\": {}}}",
                target_table.name(),
                key.raw()
            )?;
        } else {
            followed.push(col);
            let new_depth = if link_depth == UNLIMITED_LINK_DEPTH {
                UNLIMITED_LINK_DEPTH
            } else {
                link_depth.wrapping_sub(1)
            };
            let target = target_table.get_object(key)?;
            target.to_json_inner(out, new_depth, renames, followed)?;
        }
        Ok(())
    }

    fn linklist_to_json(
        &self,
        out: &mut dyn Write,
        col: ColKey,
        link_depth: usize,
        renames: &FxHashMap<String, String>,
        followed: &mut Vec<ColKey>,
    ) -> Result<()> {
        let target_table = self.target_table(col)?;
        let list = self.get_linklist(col)?;
        let len = list.len()?;
        let stub = !target_table.is_embedded()
            && (link_depth == 0
                || (link_depth == UNLIMITED_LINK_DEPTH && followed.contains(&col)));
        if stub {
            write!(out, "{{\"table\": \"{}\", \"keys\": [", target_table.name())?;
            for ndx in 0..len {
                if ndx > 0 {
                    write!(out, ",")?;
                }
                write!(out, "{}", list.get(ndx)?.raw())?;
            }
            write!(out, "]}}")?;
        } else {
            write!(out, "[")?;
            for ndx in 0..len {
                if ndx > 0 {
                    write!(out, ",")?;
                }
                followed.push(col);
                let new_depth = if link_depth == UNLIMITED_LINK_DEPTH {
                    UNLIMITED_LINK_DEPTH
                } else {
                    link_depth.wrapping_sub(1)
                };
                match list.get_object(ndx)? {
                    Some(target) => target.to_json_inner(out, new_depth, renames, followed)?,
                    None => write!(out, "null")?,
                }
            }
            write!(out, "]")?;
        }
        Ok(())
    }
}
