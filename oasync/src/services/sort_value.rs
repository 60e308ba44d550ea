//! Sort value derivation
//!
//! The configured sort field id is resolved to a rest code once per pass;
//! each record then yields a scalar stored on the entity for local ordering.

use crate::models::{find_field, value_as_text, FieldDescriptor, RemoteItem};
use oasync_common::EntityKind;

/// Rest code used when no sort field is configured or it is unknown
pub const DEFAULT_SORT_CODE: &str = "code";

/// Resolved sort field for one kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field_id: Option<i64>,
    pub rest_code: String,
}

impl SortKey {
    pub fn resolve(fields: &[FieldDescriptor], sort_field: Option<i64>) -> Self {
        let rest_code = sort_field
            .and_then(|id| find_field(fields, id))
            .map(|f| f.rest_code.clone())
            .filter(|code| !code.is_empty())
            .unwrap_or_else(|| DEFAULT_SORT_CODE.to_string());

        Self {
            field_id: sort_field,
            rest_code,
        }
    }

    /// Sort value of a record
    ///
    /// Employees read the top-level key. Projects read `name`/`code`
    /// directly and anything else from the custom field values, falling back
    /// to a top-level key of the same rest code.
    pub fn value_for(&self, kind: EntityKind, item: &RemoteItem) -> String {
        match kind {
            EntityKind::Employee => item.text(&self.rest_code),
            EntityKind::Project => match self.rest_code.as_str() {
                "name" | "code" => item.text(&self.rest_code),
                code => self
                    .field_id
                    .and_then(|id| item.custom_field_value(id))
                    .map(value_as_text)
                    .unwrap_or_else(|| item.text(code)),
            },
        }
    }
}
