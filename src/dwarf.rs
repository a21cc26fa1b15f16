//! Inter-crate symbol resolution by walking compiler-emitted debug info
//! (§4.4/§6): given a C symbol named `rost_crate` in some library, find the
//! `rost_crate` record there, then walk a dotted path of names through its
//! `.debug_info`/`.debug_abbrev` DIE tree to the address of the item the
//! path names.
//!
//! The original runtime carried its own hand-rolled DWARF abbrev/DIE reader
//! (`rost_crate_reader`); we get the same walk for much less code by
//! building on `gimli`, which understands the DWARF abbreviation and DIE
//! encoding generically.

use crate::crate_image::MemArea;
use gimli::{AttributeValue, DebuggingInformationEntry, EndianSlice, LittleEndian, Reader};

pub type R<'a> = EndianSlice<'a, LittleEndian>;

fn die_name(entry: &DebuggingInformationEntry<R>) -> Option<String> {
    let attr = entry.attr(gimli::DW_AT_name).ok()??;
    match attr.value() {
        AttributeValue::String(s) => s.to_string().ok().map(|c| c.into_owned()),
        _ => None,
    }
}

/// Address-like attribute of a DIE: `DW_AT_low_pc` for subprograms,
/// `DW_AT_location` (as a plain constant offset, not a full expression) for
/// statics — the compiler never emits anything more exotic for the items
/// `rost` needs to name.
fn die_address(entry: &DebuggingInformationEntry<R>) -> Option<usize> {
    for at in [gimli::DW_AT_low_pc, gimli::DW_AT_location] {
        if let Some(attr) = entry.attr(at).ok()? {
            match attr.value() {
                AttributeValue::Addr(a) => return Some(a as usize),
                AttributeValue::Udata(a) => return Some(a as usize),
                _ => {}
            }
        }
    }
    None
}

/// Walks `path` one name at a time starting from the children of the
/// compilation unit's root DIE, returning the address of the DIE the full
/// path resolves to.
fn resolve_in_unit(
    unit: &gimli::UnitHeader<R>,
    abbrevs: &gimli::Abbreviations,
    path: &[&str],
) -> Option<usize> {
    let mut tree = unit.entries_tree(abbrevs, None).ok()?;
    let root = tree.root().ok()?;
    walk(root, path)
}

fn walk(mut node: gimli::EntriesTreeNode<R>, path: &[&str]) -> Option<usize> {
    if path.is_empty() {
        return die_address(node.entry());
    }
    let mut children = node.children();
    while let Ok(Some(child)) = children.next() {
        if die_name(child.entry()).as_deref() == Some(path[0]) {
            return walk(child, &path[1..]);
        }
    }
    None
}

/// Resolves a dotted path of names (as the compiler emits it: a sequence of
/// null-terminated strings) through a crate's debug info, returning the
/// address offset the final path component names, or `None` if any
/// component along the way is missing — in which case the caller treats
/// this exactly like an unresolved C symbol (`FailCode::RostSymUnresolved`).
pub fn resolve_path(
    debug_info: MemArea,
    debug_abbrev: MemArea,
    path: &[&str],
) -> Option<usize> {
    if path.is_empty() {
        return None;
    }
    let info_bytes = unsafe { debug_info.as_slice() };
    let abbrev_bytes = unsafe { debug_abbrev.as_slice() };
    let debug_info = gimli::DebugInfo::new(info_bytes, LittleEndian);
    let debug_abbrev = gimli::DebugAbbrev::new(abbrev_bytes, LittleEndian);

    let mut units = debug_info.units();
    while let Ok(Some(unit)) = units.next() {
        let abbrevs = match unit.abbreviations(&debug_abbrev) {
            Ok(a) => a,
            Err(_) => continue,
        };
        if let Some(addr) = resolve_in_unit(&unit, &abbrevs, path) {
            return Some(addr);
        }
    }
    None
}

/// Splits a compiler-provided path blob (consecutive NUL-terminated
/// strings, final entry followed by an empty string) into components,
/// mirroring how the compiler packs a `char const **path` walk argument.
pub fn split_path_blob(blob: &[u8]) -> Vec<&str> {
    let mut out = Vec::new();
    for piece in blob.split(|&b| b == 0) {
        if piece.is_empty() {
            break;
        }
        if let Ok(s) = std::str::from_utf8(piece) {
            out.push(s);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_path_blob_stops_at_empty_component() {
        let blob = b"foo\0bar\0baz\0\0garbage";
        assert_eq!(split_path_blob(blob), vec!["foo", "bar", "baz"]);
    }

    #[test]
    fn split_path_blob_handles_single_component() {
        assert_eq!(split_path_blob(b"only\0"), vec!["only"]);
    }

    #[test]
    fn resolve_path_rejects_empty_path() {
        let area = MemArea { base: 0, lim: 0 };
        assert_eq!(resolve_path(area, area, &[]), None);
    }
}
