use jsonptr::{Pointer, PointerBuf, Token};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::str::FromStr;
use thiserror::Error;

use crate::error::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("field path '{0}' must start with '/'")]
    MissingRoot(String),

    #[error("field path '{path}' has a malformed element match '{segment}'")]
    MalformedMatch { path: String, segment: String },

    #[error("cannot traverse '{segment}' of '{path}': value is not a {expected}")]
    UnexpectedValue {
        path: String,
        segment: String,
        expected: &'static str,
    },

    #[error("element at '{path}' has no '{key}' and cannot be addressed by a patch")]
    Unaddressable { path: String, key: &'static str },

    #[error("field path '{0}' contains a wildcard and cannot be used for patching")]
    NotConcrete(String),

    #[error("cannot set a field of '{path}' inside a list element match")]
    NotAnObject { path: String },
}

impl From<PathError> for Error {
    fn from(err: PathError) -> Self {
        Error::configuration(err)
    }
}

/// Key used to address list elements when expanding wildcards
pub const MERGE_KEY: &str = "name";

/// A single step on a field path
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// An object field
    Field(String),
    /// The list element whose `key` equals `value`, written `[key=value]`
    Match { key: String, value: String },
    /// Every named element of a list, written `*`
    Wildcard,
}

impl Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Field(name) => write!(f, "{}", name.replace('~', "~0").replace('/', "~1")),
            Segment::Match { key, value } => write!(f, "[{key}={value}]"),
            Segment::Wildcard => write!(f, "*"),
        }
    }
}

/// Location of a value inside a resource tree
///
/// Field paths use the JSON pointer syntax with two extensions: `[key=value]`
/// selects the list element with a matching key, and `*` (only allowed on
/// selector templates) expands into every named element of a list.
#[derive(Clone, Default, PartialEq, Eq, Hash, Debug)]
pub struct FieldPath(Vec<Segment>);

impl PartialOrd for FieldPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FieldPath {
    fn cmp(&self, other: &Self) -> Ordering {
        // shorter paths come before longer paths no matter the
        // lexicographic order
        self.0.len().cmp(&other.0.len()).then(self.0.cmp(&other.0))
    }
}

impl FieldPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(s: &str) -> Result<Self, PathError> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        let rest = s
            .strip_prefix('/')
            .ok_or_else(|| PathError::MissingRoot(s.to_string()))?;

        let mut segments = Vec::new();
        for raw in rest.split('/') {
            let segment = if raw == "*" {
                Segment::Wildcard
            } else if let Some(inner) = raw.strip_prefix('[') {
                let (key, value) = inner
                    .strip_suffix(']')
                    .and_then(|kv| kv.split_once('='))
                    .filter(|(k, _)| !k.is_empty())
                    .ok_or_else(|| PathError::MalformedMatch {
                        path: s.to_string(),
                        segment: raw.to_string(),
                    })?;
                Segment::Match {
                    key: key.to_string(),
                    value: value.to_string(),
                }
            } else {
                Segment::Field(raw.replace("~1", "/").replace("~0", "~"))
            };
            segments.push(segment);
        }

        Ok(Self(segments))
    }

    /// Create a static path from a string
    ///
    /// # Panics
    ///
    /// This will panic if the string is not a valid path
    pub fn from_static(s: &'static str) -> Self {
        Self::parse(s).expect("invalid static field path")
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_concrete(&self) -> bool {
        !self.0.contains(&Segment::Wildcard)
    }

    /// Return a new path with the given segment appended
    pub fn with(&self, segment: Segment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }

    /// Return the concatenation of both paths
    pub fn concat(&self, other: &FieldPath) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }

    /// A short token distinguishing this path from sibling paths on the same resource
    ///
    /// This is the value of the last element match if there is one, otherwise the last
    /// field name.
    pub fn discriminator(&self) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find_map(|s| match s {
                Segment::Match { value, .. } => Some(value.as_str()),
                _ => None,
            })
            .or_else(|| {
                self.0.iter().rev().find_map(|s| match s {
                    Segment::Field(name) => Some(name.as_str()),
                    _ => None,
                })
            })
    }

    /// Expand the path against a resource tree
    ///
    /// Returns one concrete path per location the path refers to, together with the
    /// value found there, if any. Wildcards expand into one element match per named
    /// list element. Missing fields do not stop the expansion, they yield `None`
    /// unless a wildcard still needs to be expanded past them.
    pub fn expand<'v>(&self, root: &'v Value) -> Result<Vec<(FieldPath, Option<&'v Value>)>, PathError> {
        let mut results = Vec::new();
        self.expand_from(0, FieldPath::root(), Some(root), &mut results)?;
        Ok(results)
    }

    fn expand_from<'v>(
        &self,
        pos: usize,
        prefix: FieldPath,
        node: Option<&'v Value>,
        results: &mut Vec<(FieldPath, Option<&'v Value>)>,
    ) -> Result<(), PathError> {
        let Some(segment) = self.0.get(pos) else {
            results.push((prefix, node));
            return Ok(());
        };

        let node = node.filter(|v| !v.is_null());
        match segment {
            Segment::Field(name) => {
                let child = match node {
                    None => None,
                    Some(Value::Object(obj)) => obj.get(name),
                    Some(_) => return Err(self.unexpected(&prefix, segment, "map")),
                };
                self.expand_from(pos + 1, prefix.with(segment.clone()), child, results)
            }
            Segment::Match { key, value } => {
                let child = match node {
                    None => None,
                    Some(Value::Array(items)) => items
                        .iter()
                        .find(|item| item.get(key).and_then(Value::as_str) == Some(value)),
                    Some(_) => return Err(self.unexpected(&prefix, segment, "list")),
                };
                self.expand_from(pos + 1, prefix.with(segment.clone()), child, results)
            }
            Segment::Wildcard => match node {
                // nothing to expand
                None => Ok(()),
                Some(Value::Array(items)) => {
                    for item in items {
                        let name = item.get(MERGE_KEY).and_then(Value::as_str).ok_or_else(|| {
                            PathError::Unaddressable {
                                path: prefix.to_string(),
                                key: MERGE_KEY,
                            }
                        })?;
                        let matched = Segment::Match {
                            key: MERGE_KEY.to_string(),
                            value: name.to_string(),
                        };
                        self.expand_from(pos + 1, prefix.with(matched), Some(item), results)?;
                    }
                    Ok(())
                }
                Some(_) => Err(self.unexpected(&prefix, segment, "list")),
            },
        }
    }

    fn unexpected(&self, prefix: &FieldPath, segment: &Segment, expected: &'static str) -> PathError {
        PathError::UnexpectedValue {
            path: prefix.to_string(),
            segment: segment.to_string(),
            expected,
        }
    }

    /// Convert the path into a JSON pointer for the given tree
    ///
    /// Element matches are resolved into list indexes, so the pointer is only valid for
    /// the tree it was computed from. Returns `None` if the path does not exist.
    pub fn pointer(&self, root: &Value) -> Option<PointerBuf> {
        let mut node = root;
        let mut tokens: Vec<Token<'static>> = Vec::with_capacity(self.0.len());
        for segment in self.0.iter() {
            match segment {
                Segment::Field(name) => {
                    node = node.as_object()?.get(name)?;
                    tokens.push(Token::new(name.clone()));
                }
                Segment::Match { key, value } => {
                    let (idx, item) = node
                        .as_array()?
                        .iter()
                        .enumerate()
                        .find(|(_, item)| item.get(key).and_then(Value::as_str) == Some(value))?;
                    node = item;
                    tokens.push(Token::from(idx));
                }
                Segment::Wildcard => return None,
            }
        }
        Some(PointerBuf::from_tokens(tokens))
    }

    /// Find the value the path refers to
    pub fn resolve<'v>(&self, root: &'v Value) -> Option<&'v Value> {
        let pointer = self.pointer(root)?;
        let pointer: &Pointer = &pointer;
        pointer.resolve(root).ok()
    }

    /// Build a structural merge fragment that sets the path to the given value
    ///
    /// Element matches become single element lists carrying the match key, which the
    /// structural merge uses to find the element to update.
    pub fn fragment(&self, leaf: Value) -> Result<Value, PathError> {
        let mut acc = leaf;
        for (pos, segment) in self.0.iter().enumerate().rev() {
            acc = match segment {
                Segment::Field(name) => {
                    let mut obj = Map::new();
                    obj.insert(name.clone(), acc);
                    Value::Object(obj)
                }
                Segment::Match { key, value } => {
                    let Value::Object(fields) = acc else {
                        return Err(PathError::NotAnObject {
                            path: FieldPath(self.0[..=pos].to_vec()).to_string(),
                        });
                    };
                    let mut obj = Map::new();
                    obj.insert(key.clone(), Value::String(value.clone()));
                    obj.extend(fields);
                    Value::Array(vec![Value::Object(obj)])
                }
                Segment::Wildcard => return Err(PathError::NotConcrete(self.to_string())),
            };
        }
        Ok(acc)
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in self.0.iter() {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldPath::parse(s)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> String {
        path.to_string()
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        FieldPath::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn deployment() -> Value {
        json!({
            "spec": {
                "replicas": 3,
                "template": {
                    "spec": {
                        "containers": [
                            {"name": "app", "resources": {"limits": {"cpu": "500m"}}},
                            {"name": "sidecar"}
                        ]
                    }
                }
            }
        })
    }

    #[test]
    fn it_parses_and_displays_paths() {
        let path = FieldPath::parse("/spec/template/spec/containers/[name=app]/resources").unwrap();
        assert_eq!(
            path.segments()[4],
            Segment::Match {
                key: "name".to_string(),
                value: "app".to_string()
            }
        );
        assert_eq!(
            path.to_string(),
            "/spec/template/spec/containers/[name=app]/resources"
        );
        assert_eq!(FieldPath::parse("").unwrap(), FieldPath::root());
    }

    #[test]
    fn it_decodes_escaped_fields() {
        let path = FieldPath::parse("/metadata/annotations/example.com~1owner").unwrap();
        assert_eq!(
            path.segments()[2],
            Segment::Field("example.com/owner".to_string())
        );
        assert_eq!(path.to_string(), "/metadata/annotations/example.com~1owner");
    }

    #[test]
    fn it_rejects_malformed_paths() {
        assert_eq!(
            FieldPath::parse("spec/replicas"),
            Err(PathError::MissingRoot("spec/replicas".to_string()))
        );
        assert!(matches!(
            FieldPath::parse("/spec/[name]"),
            Err(PathError::MalformedMatch { .. })
        ));
        assert!(matches!(
            FieldPath::parse("/spec/[=x]"),
            Err(PathError::MalformedMatch { .. })
        ));
    }

    #[test]
    fn it_expands_wildcards_into_element_matches() {
        let doc = deployment();
        let path = FieldPath::from_static("/spec/template/spec/containers/*/resources");
        let expanded = path.expand(&doc).unwrap();
        assert_eq!(expanded.len(), 2);
        assert_eq!(
            expanded[0].0,
            FieldPath::from_static("/spec/template/spec/containers/[name=app]/resources")
        );
        assert_eq!(expanded[0].1, Some(&json!({"limits": {"cpu": "500m"}})));
        assert_eq!(
            expanded[1].0,
            FieldPath::from_static("/spec/template/spec/containers/[name=sidecar]/resources")
        );
        assert_eq!(expanded[1].1, None);
    }

    #[test]
    fn it_reports_missing_fields_without_failing() {
        let doc = json!({"spec": {}});
        let expanded = FieldPath::from_static("/spec/replicas").expand(&doc).unwrap();
        assert_eq!(
            expanded,
            vec![(FieldPath::from_static("/spec/replicas"), None)]
        );

        let expanded = FieldPath::from_static("/spec/template/spec/containers/*")
            .expand(&doc)
            .unwrap();
        assert!(expanded.is_empty());
    }

    #[test]
    fn it_fails_to_traverse_scalars() {
        let doc = json!({"spec": "oops"});
        assert!(matches!(
            FieldPath::from_static("/spec/replicas").expand(&doc),
            Err(PathError::UnexpectedValue { expected: "map", .. })
        ));
    }

    #[test]
    fn it_fails_to_expand_unnamed_elements() {
        let doc = json!({"items": [{"value": 1}]});
        assert!(matches!(
            FieldPath::from_static("/items/*").expand(&doc),
            Err(PathError::Unaddressable { .. })
        ));
    }

    #[test]
    fn it_resolves_element_matches_to_pointers() {
        let doc = deployment();
        let path = FieldPath::from_static("/spec/template/spec/containers/[name=sidecar]");
        assert_eq!(
            path.pointer(&doc).unwrap().as_str(),
            "/spec/template/spec/containers/1"
        );
        assert_eq!(path.resolve(&doc), Some(&json!({"name": "sidecar"})));
        assert_eq!(
            FieldPath::from_static("/spec/template/spec/containers/[name=db]").resolve(&doc),
            None
        );
    }

    #[test]
    fn it_builds_merge_fragments() {
        let path = FieldPath::from_static("/spec/template/spec/containers/[name=app]/resources/limits/cpu");
        assert_eq!(
            path.fragment(json!("1000m")).unwrap(),
            json!({
                "spec": {"template": {"spec": {"containers": [
                    {"name": "app", "resources": {"limits": {"cpu": "1000m"}}}
                ]}}}
            })
        );
    }

    #[test]
    fn it_refuses_fragments_for_wildcards_or_scalar_elements() {
        assert!(matches!(
            FieldPath::from_static("/items/*/value").fragment(json!(1)),
            Err(PathError::NotConcrete(_))
        ));
        assert!(matches!(
            FieldPath::from_static("/items/[name=a]").fragment(json!(1)),
            Err(PathError::NotAnObject { .. })
        ));
    }

    #[test]
    fn it_uses_the_element_match_as_discriminator() {
        assert_eq!(
            FieldPath::from_static("/spec/template/spec/containers/[name=test1]/resources")
                .discriminator(),
            Some("test1")
        );
        assert_eq!(
            FieldPath::from_static("/spec/replicas").discriminator(),
            Some("replicas")
        );
        assert_eq!(FieldPath::root().discriminator(), None);
    }

    #[test]
    fn it_sorts_paths_by_length_and_then_lexicographically() {
        let mut paths = vec![
            FieldPath::from_static("/a/b/c"),
            FieldPath::from_static("/a/b"),
            FieldPath::from_static(""),
            FieldPath::from_static("/x"),
        ];
        paths.sort();
        assert_eq!(
            paths,
            vec![
                FieldPath::from_static(""),
                FieldPath::from_static("/x"),
                FieldPath::from_static("/a/b"),
                FieldPath::from_static("/a/b/c"),
            ]
        );
    }
}
