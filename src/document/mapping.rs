//! Position mapping between a McCode source and its virtual C document
//!
//! Each region covers `content_lines` lines starting at `mccode_line` in the
//! source and at `virtual_line` in the virtual document. Columns are carried
//! over unchanged.

use crate::document::types::Region;

/// Map a source (line, col) into the virtual document
pub fn source_to_virtual(regions: &[Region], line: u32, col: u32) -> Option<(u32, u32)> {
    regions
        .iter()
        .find(|region| contains(region.mccode_line, region.content_lines, line))
        .map(|region| (region.virtual_line + (line - region.mccode_line), col))
}

/// Map a virtual (line, col) back into the source document
pub fn virtual_to_source(regions: &[Region], line: u32, col: u32) -> Option<(u32, u32)> {
    regions
        .iter()
        .find(|region| contains(region.virtual_line, region.content_lines, line))
        .map(|region| (region.mccode_line + (line - region.virtual_line), col))
}

fn contains(start: u32, len: u32, line: u32) -> bool {
    len > 0 && line >= start && line - start < len
}
