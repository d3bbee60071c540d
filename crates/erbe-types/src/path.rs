//! Paths into a [`Value`] tree.
//!
//! The canonical in-memory form of a path is its token sequence. Three text
//! encodings are supported for display and audit output:
//!
//! | Style | Example |
//! |-------|---------|
//! | [`PathStyle::Pointer`] | `/zones/dream_gate/energy` |
//! | [`PathStyle::Dotted`] | `zones.dream_gate.energy`, `density_log[2]` |
//! | [`PathStyle::Brackets`] | `["zones"]["dream_gate"]["energy"]` |
//!
//! Only the pointer encoding is parsed back. Pointer keys escape `~` as `~0`
//! and `/` as `~1`. The root pointer is the empty string; `/` addresses the
//! empty key directly under the root.
//!
//! [`Value`]: crate::Value

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One step of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathToken {
    /// A map key.
    Key(String),
    /// A list index.
    Index(usize),
}

impl PathToken {
    /// This token read as a list index.
    ///
    /// Key tokens parse as decimal; non-numeric keys yield `None`.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(index) => Some(*index),
            Self::Key(key) => key.parse().ok(),
        }
    }

    /// This token read as a map key. Index tokens render in decimal.
    pub fn as_key(&self) -> Cow<'_, str> {
        match self {
            Self::Key(key) => Cow::Borrowed(key),
            Self::Index(index) => Cow::Owned(index.to_string()),
        }
    }
}

impl From<&str> for PathToken {
    fn from(key: &str) -> Self {
        Self::Key(key.to_owned())
    }
}

impl From<usize> for PathToken {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// Text encoding used when rendering a [`Path`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathStyle {
    /// `/a/b/0`, with `~0`/`~1` escaping.
    #[default]
    Pointer,
    /// `a.b[0]`.
    Dotted,
    /// `["a"]["b"][0]`.
    Brackets,
}

/// Error returned when pointer text cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathParseError {
    /// Non-root pointer text must begin with `/`.
    #[error("invalid path {path:?}: must be empty or start with '/'")]
    MissingLeadingSlash {
        /// The rejected text.
        path: String,
    },
}

/// An ordered sequence of tokens addressing a node in a value tree.
///
/// The empty path addresses the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path(Vec<PathToken>);

impl Path {
    /// The root path.
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from tokens.
    pub const fn from_tokens(tokens: Vec<PathToken>) -> Self {
        Self(tokens)
    }

    /// The tokens of this path, root first.
    pub fn tokens(&self) -> &[PathToken] {
        &self.0
    }

    /// Whether this path addresses the root.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of tokens.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the path has no tokens (same as [`Path::is_root`]).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a token in place.
    pub fn push(&mut self, token: PathToken) {
        self.0.push(token);
    }

    /// Remove the last token in place.
    pub fn pop(&mut self) -> Option<PathToken> {
        self.0.pop()
    }

    /// A new path extended by a map key.
    #[must_use]
    pub fn key(&self, key: &str) -> Self {
        let mut tokens = self.0.clone();
        tokens.push(PathToken::Key(key.to_owned()));
        Self(tokens)
    }

    /// A new path extended by a list index.
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        let mut tokens = self.0.clone();
        tokens.push(PathToken::Index(index));
        Self(tokens)
    }

    /// Split into parent tokens and the final token. `None` for the root.
    pub fn split_last(&self) -> Option<(&PathToken, &[PathToken])> {
        self.0.split_last()
    }

    /// Parse pointer text. Only `""` denotes the root; `"/"` is the single
    /// empty key.
    ///
    /// # Errors
    ///
    /// Returns [`PathParseError::MissingLeadingSlash`] when non-root text
    /// does not begin with `/`.
    pub fn parse_pointer(text: &str) -> Result<Self, PathParseError> {
        if text.is_empty() {
            return Ok(Self::root());
        }
        let Some(rest) = text.strip_prefix('/') else {
            return Err(PathParseError::MissingLeadingSlash {
                path: text.to_owned(),
            });
        };
        let tokens = rest
            .split('/')
            .map(|part| PathToken::Key(part.replace("~1", "/").replace("~0", "~")))
            .collect();
        Ok(Self(tokens))
    }

    /// Render this path in the given style. The root renders as the empty
    /// string in every style.
    pub fn render(&self, style: PathStyle) -> String {
        let mut out = String::new();
        for token in &self.0 {
            push_token(&mut out, token, style);
        }
        out
    }
}

/// Append one rendered token to `out` in the given style.
fn push_token(out: &mut String, token: &PathToken, style: PathStyle) {
    match (style, token) {
        (PathStyle::Pointer, token) => {
            out.push('/');
            out.push_str(&token.as_key().replace('~', "~0").replace('/', "~1"));
        }
        (PathStyle::Dotted | PathStyle::Brackets, PathToken::Index(index)) => {
            out.push('[');
            out.push_str(&index.to_string());
            out.push(']');
        }
        (PathStyle::Dotted, PathToken::Key(key)) => {
            if !out.is_empty() {
                out.push('.');
            }
            out.push_str(key);
        }
        (PathStyle::Brackets, PathToken::Key(key)) => {
            out.push_str("[\"");
            out.push_str(&key.replace('"', "\\\""));
            out.push_str("\"]");
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(PathStyle::Pointer))
    }
}

impl FromStr for Path {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_pointer(s)
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.render(PathStyle::Pointer))
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse_pointer(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> Path {
        Path::root().key("zones").key("dream/gate~1").index(2)
    }

    #[test]
    fn pointer_escapes_tilde_and_slash() {
        assert_eq!(sample().render(PathStyle::Pointer), "/zones/dream~1gate~01/2");
    }

    #[test]
    fn dotted_uses_brackets_for_indices() {
        assert_eq!(sample().render(PathStyle::Dotted), "zones.dream/gate~1[2]");
        assert_eq!(Path::root().index(0).render(PathStyle::Dotted), "[0]");
    }

    #[test]
    fn brackets_quote_keys() {
        let path = Path::root().key("say \"hi\"").index(1);
        assert_eq!(path.render(PathStyle::Brackets), r#"["say \"hi\""][1]"#);
    }

    #[test]
    fn root_renders_per_style() {
        assert_eq!(Path::root().render(PathStyle::Pointer), "");
        assert_eq!(Path::root().render(PathStyle::Dotted), "");
        assert_eq!(Path::root().render(PathStyle::Brackets), "");
    }

    #[test]
    fn pointer_text_parses_back_to_keys() {
        let parsed = Path::parse_pointer("/zones/dream~1gate~01/2").unwrap();
        assert_eq!(
            parsed.tokens(),
            &[
                PathToken::from("zones"),
                PathToken::from("dream/gate~1"),
                PathToken::from("2"),
            ]
        );
        assert_eq!(parsed.tokens().get(2).and_then(PathToken::as_index), Some(2));
    }

    #[test]
    fn only_empty_text_is_root() {
        assert!(Path::parse_pointer("").unwrap().is_root());
        let slash = Path::parse_pointer("/").unwrap();
        assert_eq!(slash.tokens(), &[PathToken::from("")]);
        assert_eq!(Path::parse_pointer("//").unwrap().tokens(), &[PathToken::from(""), PathToken::from("")]);
    }

    #[test]
    fn empty_key_survives_serde() {
        let empty_key = Path::root().key("");
        let json = serde_json::to_string(&empty_key).unwrap();
        assert_eq!(json, "\"/\"");
        assert_eq!(serde_json::from_str::<Path>(&json).unwrap(), empty_key);

        let root = serde_json::to_string(&Path::root()).unwrap();
        assert_eq!(root, "\"\"");
        assert!(serde_json::from_str::<Path>(&root).unwrap().is_root());
    }

    #[test]
    fn missing_slash_is_rejected() {
        let err = Path::parse_pointer("zones/a").unwrap_err();
        assert!(matches!(err, PathParseError::MissingLeadingSlash { .. }));
    }

    #[test]
    fn serializes_as_pointer_string() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert_eq!(json, "\"/zones/dream~1gate~01/2\"");
    }
}
