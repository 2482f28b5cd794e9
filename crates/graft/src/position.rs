//! Position grammar parsing and byte-precise extraction/placement.
//!
//! The grammar over a mapping side is
//! `path [ ':' 'L' N [ 'C' N ] [ '-' ( 'L' N [ 'C' N ] | 'EOF' ) ] ]`.
//! The parser reads the *last* `:L` occurrence so paths may contain colons
//! elsewhere. Lines and columns are 1-based and inclusive on both ends;
//! an empty file has exactly one logical line (the empty string).
//!
//! Extraction and placement operate on `\n`-split logical lines, so a
//! place followed by an extract of the same shape returns identical bytes
//! and an identical hash.

use std::fs;
use std::path::Path;

use graft_types::{Error, FilePosition, PositionSpec, Result};

use crate::hash::sha256_prefixed;

/// Normalize one mapping side: leading whitespace and stray leading
/// backslashes go away, separators become forward slashes, trailing
/// slashes are dropped.
pub fn normalize_path(raw: &str) -> String {
    let s = raw.trim_start();
    let s = s.trim_start_matches('\\');
    let s = s.replace('\\', "/");
    s.trim_end_matches('/').to_string()
}

/// Reject destinations that escape the project tree.
///
/// Absolute paths, platform drive prefixes, and any `..` segment are
/// refused. Source paths are not run through this: they are repo-relative
/// by construction.
pub fn validate_dest_path(path: &str) -> Result<()> {
    let invalid = || Error::DestPathInvalid {
        path: path.to_string(),
    };

    if path.is_empty() || path.starts_with('/') {
        return Err(invalid());
    }
    // Windows drive prefix, e.g. `C:` or `C:/...`.
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Err(invalid());
    }
    if path.split('/').any(|seg| seg == "..") {
        return Err(invalid());
    }
    Ok(())
}

/// Parse a mapping side into a normalized path plus optional position.
pub fn parse_file_position(expr: &str) -> Result<FilePosition> {
    let raw = expr.trim_start();

    // The last `:L<digit>` starts the position suffix; anything else that
    // merely resembles one stays part of the path.
    let split_at = raw
        .char_indices()
        .filter(|&(i, c)| {
            c == ':'
                && raw[i + 1..].starts_with('L')
                && raw[i + 2..].starts_with(|c: char| c.is_ascii_digit())
        })
        .map(|(i, _)| i)
        .next_back();

    match split_at {
        Some(idx) => {
            let spec = parse_suffix(expr, &raw[idx + 1..])?;
            Ok(FilePosition {
                path: normalize_path(&raw[..idx]),
                spec: Some(spec),
            })
        }
        None => Ok(FilePosition {
            path: normalize_path(raw),
            spec: None,
        }),
    }
}

fn parse_error(expr: &str, message: impl Into<String>) -> Error {
    Error::PositionParse {
        expr: expr.to_string(),
        message: message.into(),
    }
}

/// Take a leading 1-based number off the cursor.
fn take_number<'a>(expr: &str, s: &'a str, what: &str) -> Result<(usize, &'a str)> {
    let digits: usize = s.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return Err(parse_error(expr, format!("expected {what} number")));
    }
    let n: usize = s[..digits]
        .parse()
        .map_err(|_| parse_error(expr, format!("{what} number out of range")))?;
    if n == 0 {
        return Err(parse_error(expr, format!("{what} numbers are 1-based")));
    }
    Ok((n, &s[digits..]))
}

fn parse_suffix(expr: &str, suffix: &str) -> Result<PositionSpec> {
    let rest = suffix
        .strip_prefix('L')
        .ok_or_else(|| parse_error(expr, "position must start with 'L'"))?;
    let (start_line, rest) = take_number(expr, rest, "line")?;

    let (start_col, rest) = match rest.strip_prefix('C') {
        Some(rest) => {
            let (col, rest) = take_number(expr, rest, "column")?;
            (Some(col), rest)
        }
        None => (None, rest),
    };

    if rest.is_empty() {
        if start_col.is_some() {
            return Err(parse_error(expr, "column ranges need both endpoints"));
        }
        return Ok(PositionSpec::line(start_line));
    }

    let rest = rest
        .strip_prefix('-')
        .ok_or_else(|| parse_error(expr, "expected '-' before range end"))?;

    if let Some(rest) = rest.strip_prefix("EOF") {
        if !rest.is_empty() {
            return Err(parse_error(expr, "trailing characters after EOF"));
        }
        if start_col.is_some() {
            return Err(parse_error(expr, "EOF ranges cannot carry columns"));
        }
        return Ok(PositionSpec::from_line_to_eof(start_line));
    }

    let rest = rest
        .strip_prefix('L')
        .ok_or_else(|| parse_error(expr, "range end must be 'L<n>' or 'EOF'"))?;
    let (end_line, rest) = take_number(expr, rest, "line")?;

    let (end_col, rest) = match rest.strip_prefix('C') {
        Some(rest) => {
            let (col, rest) = take_number(expr, rest, "column")?;
            (Some(col), rest)
        }
        None => (None, rest),
    };

    if !rest.is_empty() {
        return Err(parse_error(expr, "trailing characters after range"));
    }
    if start_col.is_some() != end_col.is_some() {
        return Err(parse_error(expr, "column ranges need both endpoints"));
    }
    if end_line < start_line {
        return Err(parse_error(expr, "range end precedes range start"));
    }
    if start_line == end_line {
        if let (Some(s), Some(e)) = (start_col, end_col) {
            if e < s {
                return Err(parse_error(expr, "column end precedes column start"));
            }
        }
    }

    Ok(PositionSpec {
        start_line,
        start_col,
        end_line: Some(end_line),
        end_col,
        to_eof: false,
    })
}

fn out_of_range(path: &str, message: impl Into<String>) -> Error {
    Error::PositionOutOfRange {
        path: path.to_string(),
        message: message.into(),
    }
}

/// Extract a position from in-memory content.
///
/// Content splits on `\n`; an empty string is one logical (empty) line.
pub fn extract(content: &str, spec: &PositionSpec, path: &str) -> Result<String> {
    let lines: Vec<&str> = content.split('\n').collect();
    let len = lines.len();

    if spec.start_line > len {
        return Err(out_of_range(
            path,
            format!("start line {} exceeds file length {len}", spec.start_line),
        ));
    }

    let end_line = if spec.to_eof {
        len
    } else {
        spec.end_line.unwrap_or(spec.start_line)
    };
    if end_line > len {
        return Err(out_of_range(
            path,
            format!("end line {end_line} exceeds file length {len}"),
        ));
    }

    if !spec.has_columns() {
        return Ok(lines[spec.start_line - 1..end_line].join("\n"));
    }

    // Column range: both endpoints are present by parser invariant.
    let start_col = spec.start_col.unwrap_or(1);
    let end_col = spec.end_col.unwrap_or(1);

    let first = lines[spec.start_line - 1];
    if start_col > first.len() {
        return Err(out_of_range(
            path,
            format!(
                "start column {start_col} exceeds line {} length {}",
                spec.start_line,
                first.len()
            ),
        ));
    }
    let last = lines[end_line - 1];
    if end_col > last.len() {
        return Err(out_of_range(
            path,
            format!(
                "end column {end_col} exceeds line {end_line} length {}",
                last.len()
            ),
        ));
    }

    if spec.start_line == end_line {
        return first
            .get(start_col - 1..end_col)
            .map(str::to_string)
            .ok_or_else(|| out_of_range(path, "column range splits a multi-byte character"));
    }

    let head = first
        .get(start_col - 1..)
        .ok_or_else(|| out_of_range(path, "column range splits a multi-byte character"))?;
    let tail = last
        .get(..end_col)
        .ok_or_else(|| out_of_range(path, "column range splits a multi-byte character"))?;

    let mut parts = vec![head];
    parts.extend(&lines[spec.start_line..end_line - 1]);
    parts.push(tail);
    Ok(parts.join("\n"))
}

/// Extract a position from a file, returning the text and its
/// `"sha256:" + hex` hash.
pub fn extract_from_file(path: &Path, spec: &PositionSpec) -> Result<(String, String)> {
    let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let text = extract(&content, spec, &path.display().to_string())?;
    let hash = sha256_prefixed(text.as_bytes());
    Ok((text, hash))
}

/// Splice `content` into `existing` at the given position.
///
/// Line ranges beyond the current end of the document are padded with
/// empty lines, so placements may land past EOF and the intervening
/// placeholder lines survive later placements. Column splices require the
/// target line(s) to accommodate the range.
pub fn place(existing: &str, content: &str, spec: &PositionSpec, path: &str) -> Result<String> {
    let mut lines: Vec<String> = existing.split('\n').map(str::to_string).collect();

    let end_line = if spec.to_eof {
        lines.len().max(spec.start_line)
    } else {
        spec.end_line.unwrap_or(spec.start_line)
    };

    if !spec.has_columns() {
        // Pad so the range exists, then splice whole lines.
        while lines.len() < end_line {
            lines.push(String::new());
        }
        let below: Vec<String> = if spec.to_eof {
            Vec::new()
        } else {
            lines[end_line..].to_vec()
        };
        let mut out: Vec<String> = lines[..spec.start_line - 1].to_vec();
        out.extend(content.split('\n').map(str::to_string));
        out.extend(below);
        return Ok(out.join("\n"));
    }

    let start_col = spec.start_col.unwrap_or(1);
    let end_col = spec.end_col.unwrap_or(1);

    if end_line > lines.len() || spec.start_line > lines.len() {
        return Err(out_of_range(
            path,
            format!(
                "column placement needs line {end_line}, file has {}",
                lines.len()
            ),
        ));
    }

    let first = &lines[spec.start_line - 1];
    let last = &lines[end_line - 1];
    if start_col > first.len() + 1 {
        return Err(out_of_range(
            path,
            format!(
                "start column {start_col} exceeds line {} length {}",
                spec.start_line,
                first.len()
            ),
        ));
    }
    if end_col > last.len() {
        return Err(out_of_range(
            path,
            format!(
                "end column {end_col} exceeds line {end_line} length {}",
                last.len()
            ),
        ));
    }

    let prefix = first
        .get(..start_col - 1)
        .ok_or_else(|| out_of_range(path, "column range splits a multi-byte character"))?
        .to_string();
    let suffix = last
        .get(end_col..)
        .ok_or_else(|| out_of_range(path, "column range splits a multi-byte character"))?
        .to_string();

    let mut out: Vec<String> = lines[..spec.start_line - 1].to_vec();
    out.push(format!("{prefix}{content}{suffix}"));
    out.extend_from_slice(&lines[end_line..]);
    Ok(out.join("\n"))
}

/// Place `content` into the destination file.
///
/// Without a position the content is written verbatim. With one, the
/// current file (or an empty document when absent) is spliced and written
/// back. Parent directories are created either way.
pub fn place_into_file(dest: &Path, content: &str, spec: Option<&PositionSpec>) -> Result<()> {
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
    }

    let updated = match spec {
        None => content.to_string(),
        Some(spec) => {
            let existing = match fs::read_to_string(dest) {
                Ok(existing) => existing,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(e) => return Err(Error::io(dest, e)),
            };
            place(&existing, content, spec, &dest.display().to_string())?
        }
    };

    fs::write(dest, updated).map_err(|e| Error::io(dest, e))
}
