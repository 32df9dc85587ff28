//! Locations of entity-id references inside entity properties.
//!
//! A parametrization (the field schema the platform reports for an entity)
//! names every field whose value refers to other entities. Those locations are
//! turned into [`FieldReferencePath`]s once per entity type, and later used to
//! rewrite old ids into new ones after a restore.

use crate::prelude::*;

use serde_json::Value;

use super::entity::{EntityId, EntityTypeId, IdMapping};

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Key(String),
    /// Apply the sub-path to every item of the repeated group found here.
    Each(FieldReferencePath),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldReferencePath {
    segments: Vec<PathSegment>,
}

impl FieldReferencePath {
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: keys
                .into_iter()
                .map(|k| PathSegment::Key(k.into()))
                .collect(),
        }
    }

    /// `"page.tab.field"` becomes `[page, tab, field]`.
    pub fn from_dotted(name: &str) -> Self {
        Self::from_keys(name.split('.').filter(|k| !k.is_empty()))
    }

    pub fn then_each(mut self, sub_path: FieldReferencePath) -> Self {
        self.segments.push(PathSegment::Each(sub_path));
        self
    }

    /// Rewrites every id found at this path inside `properties` through
    /// `mapping`. Returns the number of ids rewritten.
    ///
    /// Missing keys and null values are left alone; an id absent from the
    /// mapping is an [`Error::UnresolvedReference`] for `entity_id`.
    pub fn rewrite(
        &self,
        properties: &mut Value,
        entity_id: EntityId,
        mapping: &IdMapping,
    ) -> Result<usize> {
        rewrite_at(&self.segments, properties, entity_id, mapping)
    }
}

fn rewrite_at(
    segments: &[PathSegment],
    value: &mut Value,
    entity_id: EntityId,
    mapping: &IdMapping,
) -> Result<usize> {
    let Some((first, rest)) = segments.split_first() else {
        return rewrite_ids(value, entity_id, mapping);
    };
    match first {
        PathSegment::Key(key) => match value.as_object_mut().and_then(|o| o.get_mut(key)) {
            Some(inner) => rewrite_at(rest, inner, entity_id, mapping),
            None => Ok(0),
        },
        PathSegment::Each(sub_path) => {
            let Some(items) = value.as_array_mut() else {
                return Ok(0);
            };
            let item_segments: Vec<PathSegment> = sub_path
                .segments
                .iter()
                .chain(rest.iter())
                .cloned()
                .collect();
            let mut count = 0;
            for item in items {
                count += rewrite_at(&item_segments, item, entity_id, mapping)?;
            }
            Ok(count)
        }
    }
}

fn rewrite_ids(value: &mut Value, entity_id: EntityId, mapping: &IdMapping) -> Result<usize> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(old) => {
                *value = mapping.resolve(entity_id, EntityId(old))?.0.into();
                Ok(1)
            }
            None => Ok(0),
        },
        // Multi-select fields hold a list of ids.
        Value::Array(items) => {
            let mut count = 0;
            for item in items.iter_mut() {
                if let Some(old) = item.as_i64() {
                    *item = mapping.resolve(entity_id, EntityId(old))?.0.into();
                    count += 1;
                }
            }
            Ok(count)
        }
        _ => Ok(0),
    }
}

/// Derives the reference paths from a parametrization response, i.e. the
/// field list under `content.parametrization`. Anything else yields no paths.
pub fn paths_from_parametrization(parametrization: &Value) -> Vec<FieldReferencePath> {
    match parametrization
        .pointer("/content/parametrization")
        .and_then(Value::as_array)
    {
        Some(fields) => derive_reference_paths(fields),
        None => vec![],
    }
}

pub fn derive_reference_paths(fields: &[Value]) -> Vec<FieldReferencePath> {
    let mut paths = Vec::new();
    collect_paths(fields, &mut paths);
    paths
}

fn collect_paths(fields: &[Value], paths: &mut Vec<FieldReferencePath>) {
    for field in fields {
        let field_type = field.get("type").and_then(Value::as_str).unwrap_or_default();
        let name = field
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty());

        if field_type.to_ascii_lowercase().contains("entity") {
            if let Some(name) = name {
                paths.push(FieldReferencePath::from_dotted(name));
            }
        }
        if let Some(content) = field.get("content").and_then(Value::as_array) {
            collect_paths(content, paths);
        }
        if let Some(items) = field.get("arrayItems").and_then(Value::as_array) {
            let mut item_paths = Vec::new();
            collect_paths(items, &mut item_paths);
            if let Some(name) = name {
                paths.extend(
                    item_paths
                        .into_iter()
                        .map(|sub| FieldReferencePath::from_dotted(name).then_each(sub)),
                );
            }
        }
    }
}

/// Reference paths per entity type, filled at most once per type.
#[derive(Debug, Default)]
pub struct ReferenceCache {
    paths: HashMap<EntityTypeId, Vec<FieldReferencePath>>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity_type: EntityTypeId) -> Option<&[FieldReferencePath]> {
        self.paths.get(&entity_type).map(Vec::as_slice)
    }

    pub fn insert(&mut self, entity_type: EntityTypeId, paths: Vec<FieldReferencePath>) {
        self.paths.insert(entity_type, paths);
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn mapping(pairs: &[(i64, i64)]) -> IdMapping {
        let mut mapping = IdMapping::new();
        for (old, new) in pairs {
            mapping.insert(EntityId(*old), EntityId(*new)).unwrap();
        }
        mapping
    }

    #[test]
    fn derives_nested_and_repeated_paths() {
        let parametrization = json!({
            "content": {
                "parametrization": [
                    {"type": "Page", "name": "input", "content": [
                        {"type": "NumberField", "name": "input.depth"},
                        {"type": "EntityOptionField", "name": "input.soil"},
                        {"type": "DynamicArray", "name": "input.layers", "arrayItems": [
                            {"type": "TextField", "name": "label"},
                            {"type": "EntityMultiSelectField", "name": "cpts"},
                        ]},
                    ]},
                    {"type": "DynamicArray", "name": "notes", "arrayItems": [
                        {"type": "TextField", "name": "text"},
                    ]},
                ]
            }
        });
        let paths = paths_from_parametrization(&parametrization);
        assert_eq!(
            paths,
            vec![
                FieldReferencePath::from_keys(["input", "soil"]),
                FieldReferencePath::from_keys(["input", "layers"])
                    .then_each(FieldReferencePath::from_keys(["cpts"])),
            ]
        );
    }

    #[test]
    fn missing_parametrization_yields_no_paths() {
        assert!(paths_from_parametrization(&json!(null)).is_empty());
        assert!(paths_from_parametrization(&json!({"content": {}})).is_empty());
    }

    #[test]
    fn rewrites_single_and_multi_references() {
        let mut properties = json!({
            "input": {
                "soil": 11,
                "layers": [
                    {"label": "top", "cpts": [12, 13]},
                    {"label": "bottom", "cpts": []},
                ],
                "depth": 4,
            }
        });
        let mapping = mapping(&[(11, 111), (12, 112), (13, 113)]);
        let paths = vec![
            FieldReferencePath::from_keys(["input", "soil"]),
            FieldReferencePath::from_keys(["input", "layers"])
                .then_each(FieldReferencePath::from_keys(["cpts"])),
        ];
        let mut rewritten = 0;
        for path in &paths {
            rewritten += path
                .rewrite(&mut properties, EntityId(500), &mapping)
                .unwrap();
        }
        assert_eq!(rewritten, 3);
        assert_eq!(
            properties,
            json!({
                "input": {
                    "soil": 111,
                    "layers": [
                        {"label": "top", "cpts": [112, 113]},
                        {"label": "bottom", "cpts": []},
                    ],
                    "depth": 4,
                }
            })
        );
    }

    #[test]
    fn empty_and_absent_fields_are_left_alone() {
        let mut properties = json!({"input": {"soil": null}});
        let path = FieldReferencePath::from_keys(["input", "soil"]);
        assert_eq!(path.rewrite(&mut properties, EntityId(1), &IdMapping::new()).unwrap(), 0);
        let path = FieldReferencePath::from_keys(["other", "field"]);
        assert_eq!(path.rewrite(&mut properties, EntityId(1), &IdMapping::new()).unwrap(), 0);
    }

    #[test]
    fn out_of_scope_reference_fails() {
        let mut properties = json!({"soil": 99});
        let err = FieldReferencePath::from_keys(["soil"])
            .rewrite(&mut properties, EntityId(7), &mapping(&[(11, 111)]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnresolvedReference {
                entity_id: EntityId(7),
                referenced_id: EntityId(99)
            }
        ));
    }
}
