//! Message body templates.
//!
//! A template is plain text with `{column}` placeholders. `{{` and `}}` stand for literal braces.
//! Templates are parsed once, up front, so that a malformed body is caught before anything is
//! sent.

use std::fmt;
use std::path::Path;

use crate::table::{LoadError, PlaceholderRecord};

/// Why a template doesn't parse. Offsets are byte positions in the source.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// A `{` with no matching `}`
    #[error("unclosed '{{' at byte {0}")]
    UnmatchedOpen(usize),

    /// A lone `}`
    #[error("unexpected '}}' at byte {0} (use '}}}}' for a literal brace)")]
    UnmatchedClose(usize),

    /// `{}` with nothing between
    #[error("empty placeholder at byte {0}")]
    EmptyPlaceholder(usize),
}

/// Substitution didn't go cleanly for one record.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// The template names placeholders the record has no column for. `partial` is the body with
    /// every known placeholder filled in and the unknown ones left as `{name}`.
    #[error("columns mismatch between the placeholder table and the template: no column for {missing:?}")]
    ColumnMismatch {
        /// Placeholder names without a column
        missing: Vec<String>,
        /// The body as far as it could be filled
        partial: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed body template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parses `source`, rejecting unbalanced braces and empty placeholders.
    pub fn parse(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((offset, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(TemplateError::UnmatchedClose(offset)),
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some((_, '}')) => break,
                            Some((_, '{')) | None => {
                                return Err(TemplateError::UnmatchedOpen(offset))
                            }
                            Some((_, c)) => name.push(c),
                        }
                    }
                    if name.is_empty() {
                        return Err(TemplateError::EmptyPlaceholder(offset));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name));
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Template { source, segments })
    }

    /// Reads and parses a template file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let template = Template::parse(source)?;
        info!(
            "template {:?} read, placeholders {:?}",
            path,
            template.placeholders()
        );
        Ok(template)
    }

    /// Placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in self.segments.iter() {
            if let Segment::Placeholder(name) = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Columns of `record` (outside `excluding`) that no placeholder refers to.
    pub fn unused_columns<'r>(
        &self,
        record: &'r PlaceholderRecord,
        excluding: &[&str],
    ) -> Vec<&'r str> {
        let used = self.placeholders();
        record
            .iter()
            .map(|(k, _)| k)
            .filter(|k| !excluding.contains(k) && !used.contains(k))
            .collect()
    }

    /// See [`render`].
    pub fn render(
        &self,
        record: &PlaceholderRecord,
        excluding: &[&str],
    ) -> Result<String, RenderError> {
        render(self, record, excluding)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Fills every placeholder of `template` from `record`, ignoring the columns in `excluding`.
pub fn render(
    template: &Template,
    record: &PlaceholderRecord,
    excluding: &[&str],
) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.source.len());
    let mut missing: Vec<String> = Vec::new();

    for segment in template.segments.iter() {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Placeholder(name) => {
                let value = if excluding.contains(&name.as_str()) {
                    None
                } else {
                    record.get(name)
                };
                match value {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                        if !missing.contains(name) {
                            missing.push(name.clone());
                        }
                    }
                }
            }
        }
    }

    if missing.is_empty() {
        Ok(out)
    } else {
        Err(RenderError::ColumnMismatch {
            missing,
            partial: out,
        })
    }
}
