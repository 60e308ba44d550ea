//! Remote catalog records and their local counterparts

use oasync_common::EntityKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One record of a remote listing (`/Employees` or `/Projects`)
///
/// The record is kept as a sparse JSON object; the typed accessors below
/// read the handful of keys the engine interprets. The full object is stored
/// as the local entity's field map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteItem(Map<String, Value>);

impl RemoteItem {
    /// Wrap a JSON value; `None` unless it is an object carrying an id
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) if map.get("id").and_then(value_as_i64).is_some() => {
                Some(Self(map))
            }
            _ => None,
        }
    }

    pub fn external_id(&self) -> i64 {
        self.0.get("id").and_then(value_as_i64).unwrap_or_default()
    }

    /// Hero file id; zero and absent both mean "no hero"
    pub fn hero_image_id(&self) -> Option<i64> {
        self.0
            .get("hero_image_id")
            .and_then(value_as_i64)
            .filter(|id| *id > 0)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Text of a top-level key, empty when absent
    pub fn text(&self, key: &str) -> String {
        self.0.get(key).map(value_as_text).unwrap_or_default()
    }

    /// Display title: "first last" for employees, name for projects
    pub fn title(&self, kind: EntityKind) -> String {
        match kind {
            EntityKind::Employee => {
                format!("{} {}", self.text("first_name"), self.text("last_name"))
            }
            EntityKind::Project => self.text("name"),
        }
    }

    /// Body text: job title for employees, code for projects
    pub fn content(&self, kind: EntityKind) -> String {
        match kind {
            EntityKind::Employee => self.text("job_title"),
            EntityKind::Project => self.text("code"),
        }
    }

    /// Remote keyword ids attached to a project record
    pub fn keyword_ids(&self) -> Vec<i64> {
        self.0
            .get("projectKeywords")
            .and_then(Value::as_array)
            .map(|keywords| {
                keywords
                    .iter()
                    .filter_map(|k| k.get("id").and_then(value_as_i64))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Cross-kind relations with their role attributes
    ///
    /// Projects list `employees[]`, employees list `projects[]`.
    pub fn relations(&self, kind: EntityKind) -> Vec<Relation> {
        let (key, related_kind) = match kind {
            EntityKind::Project => ("employees", EntityKind::Employee),
            EntityKind::Employee => ("projects", EntityKind::Project),
        };

        self.0
            .get(key)
            .and_then(Value::as_array)
            .map(|related| {
                related
                    .iter()
                    .filter_map(|r| {
                        let related_external_id = r.get("id").and_then(value_as_i64)?;
                        Some(Relation {
                            related_kind,
                            related_external_id,
                            roles: r.get("roles").cloned().unwrap_or_else(|| Value::Array(vec![])),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Custom field value: first entry of `fields[].values` for the field id
    pub fn custom_field_value(&self, field_id: i64) -> Option<&Value> {
        self.0
            .get("fields")?
            .as_array()?
            .iter()
            .find(|f| f.get("id").and_then(value_as_i64) == Some(field_id))?
            .get("values")?
            .as_array()?
            .first()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// Parse a listing body into records
///
/// Anything but a JSON array of id-bearing objects is malformed.
pub fn parse_listing(body: Value) -> Result<Vec<RemoteItem>, String> {
    let Value::Array(values) = body else {
        return Err("listing is not an array".to_string());
    };

    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            RemoteItem::from_value(value).ok_or_else(|| format!("item {} has no id", index))
        })
        .collect()
}

/// Locally persisted entity
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// Local row id
    pub id: i64,
    pub kind: EntityKind,
    pub external_id: i64,
    pub title: String,
    pub content: String,
    /// Full remote record as last synced
    pub fields: Value,
    pub hero_media_external_id: Option<i64>,
    pub sort_value: String,
}

/// Project/employee association with its role attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub related_kind: EntityKind,
    pub related_external_id: i64,
    pub roles: Value,
}

/// Read an integer id that may arrive as a number or a numeric string
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Render a scalar for titles and sort values; null becomes empty
pub fn value_as_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_title_and_content_per_kind() {
        let employee = RemoteItem::from_value(json!({
            "id": 7, "first_name": "Ada", "last_name": "Byron", "job_title": "Principal"
        }))
        .unwrap();
        assert_eq!(employee.title(EntityKind::Employee), "Ada Byron");
        assert_eq!(employee.content(EntityKind::Employee), "Principal");

        let project = RemoteItem::from_value(json!({"id": 3, "name": "Library", "code": "P-003"})).unwrap();
        assert_eq!(project.title(EntityKind::Project), "Library");
        assert_eq!(project.content(EntityKind::Project), "P-003");
    }

    #[test]
    fn test_hero_zero_means_none() {
        let item = RemoteItem::from_value(json!({"id": 1, "hero_image_id": 0})).unwrap();
        assert_eq!(item.hero_image_id(), None);

        let item = RemoteItem::from_value(json!({"id": 1, "hero_image_id": "55"})).unwrap();
        assert_eq!(item.hero_image_id(), Some(55));
    }

    #[test]
    fn test_relations_and_keywords() {
        let project = RemoteItem::from_value(json!({
            "id": 3,
            "employees": [{"id": 10, "roles": [{"id": 1, "role": "Lead"}]}, {"id": 11}],
            "projectKeywords": [{"id": 100}, {"id": 101}]
        }))
        .unwrap();

        let relations = project.relations(EntityKind::Project);
        assert_eq!(relations.len(), 2);
        assert_eq!(relations[0].related_kind, EntityKind::Employee);
        assert_eq!(relations[0].related_external_id, 10);
        assert_eq!(relations[1].roles, json!([]));
        assert_eq!(project.keyword_ids(), vec![100, 101]);
    }

    #[test]
    fn test_custom_field_value() {
        let project = RemoteItem::from_value(json!({
            "id": 3,
            "fields": [{"id": 40, "values": ["2019"]}, {"id": 41, "values": []}]
        }))
        .unwrap();
        assert_eq!(project.custom_field_value(40), Some(&json!("2019")));
        assert_eq!(project.custom_field_value(41), None);
        assert_eq!(project.custom_field_value(99), None);
    }

    #[test]
    fn test_parse_listing_rejects_non_array() {
        assert!(parse_listing(json!({"error": "nope"})).is_err());
        assert!(parse_listing(json!([{"name": "no id"}])).is_err());
        assert_eq!(parse_listing(json!([{"id": 1}, {"id": 2}])).unwrap().len(), 2);
    }
}
