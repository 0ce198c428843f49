use std::collections::{BTreeMap, BTreeSet};

use crate::json::FieldPath;
use crate::resource::ObjectReference;

type Key = (ObjectReference, FieldPath, String);

/// Prefixes needed to make every parameter name of one generation unique
///
/// The table is computed once from every (target, path, suffix) triple that will be
/// named, so names do not depend on the order the fields were found in.
#[derive(Clone, Debug, Default)]
pub struct PrefixTable {
    names: BTreeMap<Key, String>,
}

impl PrefixTable {
    pub fn new<'a, I>(triples: I) -> Self
    where
        I: IntoIterator<Item = (&'a ObjectReference, &'a FieldPath, &'a str)>,
    {
        let keys: BTreeSet<Key> = triples
            .into_iter()
            .map(|(target, path, suffix)| (target.clone(), path.clone(), suffix.to_string()))
            .collect();

        // field level: the same suffix from several paths of one target
        let mut paths: BTreeMap<(&ObjectReference, &str), usize> = BTreeMap::new();
        // resource level: the same suffix from several targets
        let mut targets: BTreeMap<&str, BTreeSet<&ObjectReference>> = BTreeMap::new();
        for (target, _, suffix) in keys.iter() {
            *paths.entry((target, suffix.as_str())).or_default() += 1;
            targets.entry(suffix.as_str()).or_default().insert(target);
        }

        let prefixed: BTreeSet<&ObjectReference> = targets
            .values()
            .filter(|t| t.len() > 1)
            .flatten()
            .copied()
            .collect();

        let local: BTreeMap<&Key, String> = keys
            .iter()
            .map(|key| {
                let (target, path, suffix) = key;
                let name = match path.discriminator() {
                    Some(field) if paths[&(target, suffix.as_str())] > 1 => {
                        format!("{field}_{suffix}")
                    }
                    _ => suffix.clone(),
                };
                (key, name)
            })
            .collect();

        let render = |escalated: &BTreeSet<&ObjectReference>| {
            local
                .iter()
                .map(|(key, name)| {
                    let target = &key.0;
                    let name = if escalated.contains(target) {
                        format!("{}_{name}", qualified_token(target))
                    } else if prefixed.contains(target) {
                        format!("{}_{name}", target.name)
                    } else {
                        name.clone()
                    };
                    (*key, sanitize(&name))
                })
                .collect::<BTreeMap<_, _>>()
        };

        let mut names = render(&BTreeSet::new());
        let colliding = colliding_targets(&names);
        if !colliding.is_empty() {
            names = render(&colliding);
        }

        // anything left is made unique with a counter
        let mut taken: BTreeSet<String> = BTreeSet::new();
        let mut duplicated: BTreeSet<String> = BTreeSet::new();
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for name in names.values() {
            *counts.entry(name.as_str()).or_default() += 1;
        }
        for (name, count) in counts {
            if count > 1 {
                duplicated.insert(name.to_string());
            } else {
                taken.insert(name.to_string());
            }
        }

        let mut unique = BTreeMap::new();
        for (key, name) in names {
            let name = if duplicated.contains(&name) {
                let mut n = 1;
                while taken.contains(&format!("{name}_{n}")) {
                    n += 1;
                }
                format!("{name}_{n}")
            } else {
                name
            };
            taken.insert(name.clone());
            unique.insert(key.clone(), name);
        }

        Self { names: unique }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Lower case the name, replacing characters a template placeholder cannot hold
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() => c.to_ascii_lowercase(),
            '-' | '.' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// A `kind_namespace_name` token identifying the target
fn qualified_token(target: &ObjectReference) -> String {
    let kind = target.kind.to_lowercase();
    [kind.as_str(), target.namespace.as_str(), target.name.as_str()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn colliding_targets<'a>(names: &BTreeMap<&'a Key, String>) -> BTreeSet<&'a ObjectReference> {
    let mut owners: BTreeMap<&str, Vec<&'a Key>> = BTreeMap::new();
    for (key, name) in names.iter() {
        owners.entry(name.as_str()).or_default().push(key);
    }
    owners
        .into_values()
        .filter(|keys| keys.len() > 1)
        .flatten()
        .map(|key| &key.0)
        .collect()
}

/// Names parameters using a [`PrefixTable`]
#[derive(Clone, Debug, Default)]
pub struct Namer {
    table: PrefixTable,
}

impl Namer {
    pub fn new(table: PrefixTable) -> Self {
        Self { table }
    }

    /// The parameter name for the field
    ///
    /// Triples that were not part of the table are named after their suffix.
    pub fn name(&self, target: &ObjectReference, path: &FieldPath, suffix: &str) -> String {
        self.table
            .names
            .get(&(target.clone(), path.clone(), suffix.to_string()))
            .cloned()
            .unwrap_or_else(|| suffix.to_string())
    }
}
