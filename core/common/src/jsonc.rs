//! Tolerant parsing for editor-style JSON files.
//!
//! Editor settings and manifest files allow `//` and `/* */` comments and
//! trailing commas. They are also edited by hand, so parsing returns a
//! `Result` and callers decide whether a malformed file is fatal.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{Error, Result};

/// Parse JSON-with-comments into a value.
///
/// Blank input yields an empty object.
pub fn parse_jsonc(text: &str) -> Result<Value> {
    let cleaned = strip_trailing_commas(&strip_comments(text.trim_start_matches('\u{feff}')));
    if cleaned.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(&cleaned).map_err(|e| Error::Serialization(e.to_string()))
}

/// Parse JSON-with-comments into a typed structure.
pub fn from_jsonc<T: DeserializeOwned>(text: &str) -> Result<T> {
    let value = parse_jsonc(text)?;
    serde_json::from_value(value).map_err(|e| Error::Serialization(e.to_string()))
}

/// Set or remove one top-level key, editing `text` in place.
///
/// Comments, key order and formatting outside the edited member are kept.
/// A `Value::Null` removes the key. Blank input becomes a new object.
///
/// # Errors
/// - `text` is not a JSON-with-comments object
pub fn set_top_level_key(text: &str, key: &str, value: &Value) -> Result<String> {
    let rendered_key = serde_json::to_string(key)?;
    let rendered_value = serde_json::to_string(value)?;

    if !parse_jsonc(text)?.is_object() {
        return Err(Error::Serialization(
            "Expected a JSON object at the top level".to_string(),
        ));
    }
    if strip_comments(text).trim().is_empty() {
        if value.is_null() {
            return Ok(text.to_string());
        }
        return Ok(format!("{{\n    {}: {}\n}}\n", rendered_key, rendered_value));
    }

    let object = TopLevel::scan(text)?;
    let existing = object.members.iter().rposition(|m| m.key == key);
    let mut out = text.to_string();

    match (existing, value.is_null()) {
        (Some(i), false) => {
            let member = &object.members[i];
            out.replace_range(member.value_start..member.value_end, &rendered_value);
        }
        (Some(i), true) => {
            let (start, end) = object.removal_range(text, i);
            out.replace_range(start..end, "");
        }
        (None, true) => {}
        (None, false) => {
            let entry = format!("{}: {}", rendered_key, rendered_value);
            match object.members.last() {
                Some(last) => {
                    let indent = line_indent(text, last.key_start);
                    let after = &text[last.value_end..];
                    let gap = after.len() - after.trim_start().len();
                    let trailing_comma = after[gap..].starts_with(',');
                    let anchor = if trailing_comma {
                        last.value_end + gap + 1
                    } else {
                        last.value_end
                    };
                    let comma = if trailing_comma { "" } else { "," };

                    // Keep a line comment attached to the member it follows.
                    let rest = &text[anchor..];
                    let line_end = rest.find('\n').unwrap_or(rest.len());
                    let tail = rest[..line_end].trim();
                    match indent {
                        Some(indent) if tail.is_empty() || tail.starts_with("//") => {
                            out.insert_str(anchor + line_end, &format!("\n{}{}", indent, entry));
                            out.insert_str(anchor, comma);
                        }
                        _ => out.insert_str(anchor, &format!("{} {}", comma, entry)),
                    }
                }
                None => {
                    let inner = &text[object.open + 1..object.close];
                    if inner.trim().is_empty() {
                        out.replace_range(
                            object.open + 1..object.close,
                            &format!("\n    {}\n", entry),
                        );
                    } else {
                        out.insert_str(object.close, &format!("    {}\n", entry));
                    }
                }
            }
        }
    }

    Ok(out)
}

/// Leading whitespace of the line holding `pos`, when nothing else precedes it.
fn line_indent(text: &str, pos: usize) -> Option<String> {
    let line_start = text[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let prefix = &text[line_start..pos];
    if prefix.chars().all(|c| c == ' ' || c == '\t') && line_start > 0 {
        Some(prefix.to_string())
    } else {
        None
    }
}

/// Byte spans of one top-level member.
struct Member {
    key: String,
    key_start: usize,
    value_start: usize,
    value_end: usize,
}

/// Byte layout of the top-level object.
struct TopLevel {
    open: usize,
    close: usize,
    members: Vec<Member>,
}

impl TopLevel {
    fn scan(text: &str) -> Result<Self> {
        let mut cursor = Cursor::new(text);
        cursor.skip_trivia();
        let open = cursor.pos;
        cursor.expect(b'{')?;

        let mut members = Vec::new();
        loop {
            cursor.skip_trivia();
            match cursor.peek() {
                Some(b'}') => break,
                Some(b',') => cursor.pos += 1,
                Some(b'"') => {
                    let key_start = cursor.pos;
                    cursor.skip_string()?;
                    let key: String = serde_json::from_str(&text[key_start..cursor.pos])?;
                    cursor.skip_trivia();
                    cursor.expect(b':')?;
                    cursor.skip_trivia();
                    let value_start = cursor.pos;
                    cursor.skip_value()?;
                    members.push(Member {
                        key,
                        key_start,
                        value_start,
                        value_end: cursor.pos,
                    });
                }
                _ => return Err(cursor.unexpected()),
            }
        }

        Ok(Self {
            open,
            close: cursor.pos,
            members,
        })
    }

    /// Span to delete for member `i`, including one separating comma.
    fn removal_range(&self, text: &str, i: usize) -> (usize, usize) {
        let member = &self.members[i];
        let after = &text[member.value_end..];
        let gap = after.len() - after.trim_start().len();

        if after[gap..].starts_with(',') {
            let mut start = member.key_start;
            let mut end = member.value_end + gap + 1;
            let line_start = text[..start].rfind('\n').map(|p| p + 1).unwrap_or(0);
            if text[line_start..start].chars().all(|c| c == ' ' || c == '\t') {
                start = line_start;
                let rest = &text[end..];
                let blank = rest.len() - rest.trim_start_matches([' ', '\t']).len();
                end += blank;
                if text[end..].starts_with('\n') {
                    end += 1;
                }
            }
            (start, end)
        } else if i > 0 {
            // Last member: drop the comma that precedes it instead.
            let previous = &self.members[i - 1];
            let between = &text[previous.value_end..member.key_start];
            let comma = between
                .find(',')
                .map(|c| previous.value_end + c)
                .unwrap_or(previous.value_end);
            (comma, member.value_end)
        } else {
            (member.key_start, member.value_end)
        }
    }
}

/// Byte cursor over JSON-with-comments. Every delimiter is ASCII, so byte
/// positions it stops at are always char boundaries.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn unexpected(&self) -> Error {
        Error::Serialization(format!("Unexpected input at byte {}", self.pos))
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match (self.peek(), self.bytes.get(self.pos + 1).copied()) {
                (Some(b), _) if b.is_ascii_whitespace() => self.pos += 1,
                (Some(b'/'), Some(b'/')) => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                (Some(b'/'), Some(b'*')) => {
                    self.pos += 2;
                    while self.pos < self.bytes.len()
                        && !(self.bytes[self.pos] == b'*'
                            && self.bytes.get(self.pos + 1) == Some(&b'/'))
                    {
                        self.pos += 1;
                    }
                    self.pos = (self.pos + 2).min(self.bytes.len());
                }
                _ => return,
            }
        }
    }

    fn skip_string(&mut self) -> Result<()> {
        self.expect(b'"')?;
        let mut escaped = false;
        while let Some(b) = self.peek() {
            self.pos += 1;
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                return Ok(());
            }
        }
        Err(self.unexpected())
    }

    fn skip_value(&mut self) -> Result<()> {
        match self.peek() {
            Some(b'"') => self.skip_string(),
            Some(b'{') | Some(b'[') => {
                let mut depth = 0usize;
                loop {
                    self.skip_trivia();
                    match self.peek() {
                        Some(b'"') => self.skip_string()?,
                        Some(b'{') | Some(b'[') => {
                            depth += 1;
                            self.pos += 1;
                        }
                        Some(b'}') | Some(b']') => {
                            depth -= 1;
                            self.pos += 1;
                            if depth == 0 {
                                return Ok(());
                            }
                        }
                        Some(_) => self.pos += 1,
                        None => return Err(self.unexpected()),
                    }
                }
            }
            Some(_) => {
                while let Some(b) = self.peek() {
                    if b == b',' || b == b'}' || b == b']' || b == b'/' || b.is_ascii_whitespace() {
                        break;
                    }
                    self.pos += 1;
                }
                Ok(())
            }
            None => Err(self.unexpected()),
        }
    }
}

fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    if next == '\n' {
                        out.push('\n');
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }

    out
}

fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }

    out
}
