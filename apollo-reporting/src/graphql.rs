//! Types related to GraphQL responses, errors and response paths.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// A GraphQL response as observed by extensions: the executor produces
/// it, `will_send_response` may replace it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// The response data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// The errors raised while producing `data`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Error>,

    /// The optional GraphQL extensions for this response.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

/// A [GraphQL error](https://spec.graphql.org/October2021/#sec-Errors)
/// as may be found in the `errors` field of a [`Response`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Error {
    /// The error message.
    pub message: String,

    /// If this is a field error, the response path to that field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<ResponsePath>,

    /// The optional GraphQL extensions for this error.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl Error {
    /// An error carrying only a message.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// One step into the logical result tree: a field response name
/// (alias-or-name) or a list index.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// A list index.
    Index(usize),
    /// A field response name.
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(index) => write!(f, "{index}"),
            PathSegment::Key(name) => f.write_str(name),
        }
    }
}

/// A position in the logical result tree. The root is the empty path;
/// every other path has exactly one parent, obtained by removing the
/// last segment.
///
/// Serializes as the JSON array of segments GraphQL error paths use.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ResponsePath(pub Vec<PathSegment>);

impl ResponsePath {
    /// The root path.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Extend with a field response name.
    pub fn key(mut self, name: impl Into<String>) -> Self {
        self.0.push(PathSegment::Key(name.into()));
        self
    }

    /// Extend with a list index.
    pub fn index(mut self, index: usize) -> Self {
        self.0.push(PathSegment::Index(index));
        self
    }

    /// The path with the last segment removed. `None` for the root.
    pub fn parent(&self) -> Option<ResponsePath> {
        match self.0.split_last() {
            Some((_, parents)) => Some(ResponsePath(parents.to_vec())),
            None => None,
        }
    }

    /// The last segment. `None` for the root.
    pub fn last(&self) -> Option<&PathSegment> {
        self.0.last()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ResponsePath {
    /// Segments joined by `.`; the root prints as the empty string.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, segment) in self.0.iter().enumerate() {
            if position > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}
