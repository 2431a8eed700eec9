use std::collections::HashMap;

use serde::Serialize;

/// Prefix shared by every placeholder the scanner mints.
pub const PLACEHOLDER_PREFIX: &str = "__FRAGMENT_";

/// The language of an extracted fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    /// Raw HTML from an `[Origin] @Html` body.
    Markup,
    /// A `style { }` interior or an `[Origin] @Style` body.
    Style,
    /// A `script { }` interior or an `[Origin] @JavaScript` body.
    Script,
    /// A CHTL-JS construct cut out of a script (`{{box}}`, `Listen { }`).
    ChtlJs,
}

/// A piece of foreign source cut out of a CHTL file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fragment {
    pub kind: FragmentKind,
    pub placeholder: String,
    /// Verbatim interior text; may contain nested placeholders.
    pub content: String,
    /// Position of the first interior character in the original file.
    pub line: usize,
    pub column: usize,
}

/// Placeholder → fragment side table.
///
/// Placeholders are numbered by a counter that can be seeded with
/// [`FragmentTable::starting_at`], so tables from several files of one
/// compilation can be merged without collisions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FragmentTable {
    fragments: Vec<Fragment>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    #[serde(skip)]
    next: usize,
}

impl FragmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty table whose first placeholder is `__FRAGMENT_<start>__`.
    pub fn starting_at(start: usize) -> Self {
        Self {
            next: start,
            ..Self::default()
        }
    }

    /// The number the next minted placeholder will carry.
    pub fn next_id(&self) -> usize {
        self.next
    }

    /// Record a fragment under a fresh placeholder and return the placeholder.
    pub fn mint(&mut self, kind: FragmentKind, content: &str, line: usize, column: usize) -> String {
        let placeholder = format!("{PLACEHOLDER_PREFIX}{}__", self.next);
        self.next += 1;
        self.insert(Fragment {
            kind,
            placeholder: placeholder.clone(),
            content: content.to_string(),
            line,
            column,
        });
        placeholder
    }

    /// Add an already minted fragment. A fragment with the same placeholder is replaced.
    pub fn insert(&mut self, fragment: Fragment) {
        match self.index.get(&fragment.placeholder) {
            Some(&at) => self.fragments[at] = fragment,
            None => {
                self.index
                    .insert(fragment.placeholder.clone(), self.fragments.len());
                self.fragments.push(fragment);
            }
        }
    }

    pub fn get(&self, placeholder: &str) -> Option<&Fragment> {
        self.index.get(placeholder).map(|&at| &self.fragments[at])
    }

    /// Fragments in the order they were minted.
    pub fn iter(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments.iter()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Merge another table into this one. The counter moves past both tables.
    pub fn extend(&mut self, other: &FragmentTable) {
        for fragment in other.iter() {
            self.insert(fragment.clone());
        }
        self.next = self.next.max(other.next);
    }

    /// Replace each known placeholder in `text` (one level deep) with `replace(fragment)`.
    /// Unknown placeholder-like text is left alone.
    pub fn substitute(&self, text: &str, mut replace: impl FnMut(&Fragment) -> String) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(at) = rest.find(PLACEHOLDER_PREFIX) {
            out.push_str(&rest[..at]);
            let tail = &rest[at..];
            match self.placeholder_at(tail) {
                Some((len, fragment)) => {
                    out.push_str(&replace(fragment));
                    rest = &tail[len..];
                }
                None => {
                    out.push_str(PLACEHOLDER_PREFIX);
                    rest = &tail[PLACEHOLDER_PREFIX.len()..];
                }
            }
        }

        out.push_str(rest);
        out
    }

    /// Substitute every placeholder with its content, recursively.
    pub fn restore(&self, text: &str) -> String {
        self.substitute(text, |fragment| self.restore(&fragment.content))
    }

    /// Match a placeholder at the start of `text`: returns its byte length and fragment.
    fn placeholder_at(&self, text: &str) -> Option<(usize, &Fragment)> {
        let digits = text[PLACEHOLDER_PREFIX.len()..]
            .bytes()
            .take_while(u8::is_ascii_digit)
            .count();
        if digits == 0 {
            return None;
        }
        let len = PLACEHOLDER_PREFIX.len() + digits + 2;
        let candidate = text.get(..len)?;
        if !candidate.ends_with("__") {
            return None;
        }
        self.get(candidate).map(|fragment| (len, fragment))
    }
}
