//! Remote request construction
//!
//! Every query the engine issues is built here from the sync options and the
//! cached reference data, so the shape of remote traffic lives in one place.

use crate::error::{SyncError, SyncResult};
use crate::models::{FieldDescriptor, GridColumn, KindOptions, MediaBounds, SyncOptions};
use oasync_common::EntityKind;
use reqwest::Url;

/// Listing page size; a pass reads at most this many records per kind
pub const LISTING_LIMIT: u32 = 250;

/// Resource path plus ordered query pairs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    /// Resource path, e.g. `/Projects`
    pub resource: String,
    pub query: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            query: Vec::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Absolute URL under the API base (`https://host/REST/1`)
    pub fn url(&self, api_base: &str) -> SyncResult<Url> {
        let mut url = Url::parse(&format!("{}{}", api_base, self.resource))
            .map_err(|e| SyncError::Config(format!("Invalid API URL: {}", e)))?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        Ok(url)
    }
}

/// `/Employees?limit=1`, used to validate credentials
pub fn credential_check_request() -> ApiRequest {
    ApiRequest::new("/Employees").param("limit", 1)
}

/// Full listing for a kind
pub fn listing_request(
    kind: EntityKind,
    options: &SyncOptions,
    fields: &[FieldDescriptor],
    grid_columns: &[GridColumn],
) -> ApiRequest {
    let kind_options = options.kind(kind);

    let base = ApiRequest::new(match kind {
        EntityKind::Employee => "/Employees",
        EntityKind::Project => "/Projects",
    })
    .param("alive", 1)
    .param("deleted", 0)
    .param("limit", LISTING_LIMIT)
    .param("show_on_website", 1)
    .param("withHeroImage", 1);

    match kind {
        EntityKind::Employee => {
            let mut display_fields = vec!["id".to_string(), "hero_image_id".to_string()];
            display_fields.extend(
                fields
                    .iter()
                    .filter(|f| kind_options.criteria_fields.contains(&f.id))
                    .map(|f| f.rest_code.clone()),
            );

            base.param("projects[roles][limit]", 15)
                .param("displayFields", display_fields.join(","))
                .param("orderBy", order_by(kind_options, fields, "last_name"))
        }
        EntityKind::Project => {
            let selected: Vec<&FieldDescriptor> = fields
                .iter()
                .filter(|f| kind_options.criteria_fields.contains(&f.id))
                .collect();

            let mut display_fields = vec!["id".to_string(), "hero_image_id".to_string()];
            display_fields.extend(
                selected
                    .iter()
                    .filter(|f| f.built_in)
                    .map(|f| f.rest_code.clone()),
            );
            let custom_fields: Vec<String> = selected
                .iter()
                .filter(|f| !f.built_in)
                .map(|f| f.id.to_string())
                .collect();
            let role_fields: Vec<&str> = grid_columns
                .iter()
                .filter(|c| options.role_grid_columns.contains(&c.id))
                .map(|c| c.code.as_str())
                .collect();

            base.param("displayFields", display_fields.join(","))
                .param("fields", custom_fields.join(","))
                .param("employees[limit]", 100)
                .param("employees[roles][limit]", 100)
                .param("employees[roles][displayFields]", role_fields.join(","))
                .param("projectKeywords[limit]", 0)
                .param("orderBy", order_by(kind_options, fields, "name"))
        }
    }
}

/// `orderBy` value: sort field rest code (or the default) plus direction
fn order_by(options: &KindOptions, fields: &[FieldDescriptor], default_code: &str) -> String {
    let code = options
        .sort_field
        .and_then(|id| fields.iter().find(|f| f.id == id))
        .map(|f| f.rest_code.as_str())
        .unwrap_or(default_code);
    format!("{}{}", code, options.order.as_suffix())
}

/// Common `/Files` filters plus the size-variant bounds
fn files_request(options: &SyncOptions, display_fields: String) -> ApiRequest {
    let file_options = options.file_options.join(",");
    let mut request = ApiRequest::new("/Files")
        .param("access_level", 1)
        .param("is_vr", 0)
        .param("contains_audio", 0)
        .param("contains_video", 0)
        .param("displayFields", display_fields)
        .param("remoteFields", file_options);

    request = size_params(request, &options.media_bounds);
    request
}

fn size_params(mut request: ApiRequest, bounds: &MediaBounds) -> ApiRequest {
    request = request
        .param("sizes[displayFields]", "id,width,height,http_root,http_relative_path")
        .param("sizes[limit]", 0);
    for (index, format) in bounds.formats.iter().enumerate() {
        request = request.param(format!("sizes[file_format][{}]", index), format);
    }
    request
        .param("sizes[width]", format!("<={}", bounds.max_width))
        .param("sizes[height]", format!("<={}", bounds.max_height))
        .param("sizes[filesize]", format!("<={}", bounds.max_filesize))
}

/// Hero file lookup by file id
pub fn hero_file_request(file_id: i64, options: &SyncOptions) -> ApiRequest {
    let mut display_fields = vec!["id".to_string(), "md5_at_upload".to_string()];
    display_fields.extend(options.file_options.iter().cloned());

    files_request(options, display_fields.join(",")).param("id", file_id)
}

/// Gallery files for an entity
///
/// Fetches one more than the limit so the list still fills the limit after
/// the hero is removed.
pub fn gallery_request(kind: EntityKind, external_id: i64, options: &SyncOptions) -> ApiRequest {
    let gallery = &options.kind(kind).gallery;

    let mut display_fields = vec!["id".to_string()];
    display_fields.extend(options.file_options.iter().cloned());
    display_fields.extend(
        ["md5_at_upload", "created", "uploaded", "updated", "rank"]
            .iter()
            .map(|s| s.to_string()),
    );
    if kind == EntityKind::Project {
        display_fields.push("project_display_order".to_string());
    }

    let owner_key = match kind {
        EntityKind::Project => "project_id",
        EntityKind::Employee => "object_id",
    };

    let mut request = files_request(options, display_fields.join(","))
        .param(owner_key, external_id)
        .param("limit", gallery.image_limit.saturating_add(1))
        .param(
            "orderBy",
            format!("{}{}", gallery.sort_key.as_str(), gallery.direction.as_suffix()),
        );
    if gallery.show_on_website_only {
        request = request.param("show_on_website", 1);
    }
    request
}

/// Keyword details for the ids referenced by a project listing
pub fn keywords_request(ids: &[i64]) -> ApiRequest {
    let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    ApiRequest::new("/ProjectKeywords")
        .param("limit", 0)
        .param("id", ids.join(","))
        .param("orderBy", "project_countDesc")
}

pub fn field_catalog_request(kind: EntityKind) -> ApiRequest {
    ApiRequest::new("/Fields")
        .param("alive", 1)
        .param("deleted", 0)
        .param("limit", 0)
        .param("field_type", kind.as_str())
        .param("orderBy", "display_order")
}

/// Lookup of the employee-to-project `roles` field
pub fn roles_field_request() -> ApiRequest {
    ApiRequest::new("/Fields")
        .param("alive", 1)
        .param("deleted", 0)
        .param("limit", 0)
        .param("field_type", "employee2project")
        .param("rest_code", "roles")
}

/// Grid columns, scoped to the roles field when it is known
pub fn grid_columns_request(roles_field_id: Option<i64>) -> ApiRequest {
    match roles_field_id {
        Some(id) => ApiRequest::new(format!("/Fields/{}/GridColumns", id)).param("order_by", "display_order"),
        None => ApiRequest::new("/GridColumns")
            .param("deleted", 0)
            .param("alive", 1)
            .param("limit", 0)
            .param("orderBy", "display_order"),
    }
}

pub fn keyword_categories_request() -> ApiRequest {
    ApiRequest::new("/ProjectKeywordCategories")
        .param("limit", 0)
        .param("orderBy", "display_order")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SortOrder;

    fn field(id: i64, rest_code: &str, built_in: bool) -> FieldDescriptor {
        FieldDescriptor {
            id,
            name: rest_code.to_string(),
            rest_code: rest_code.to_string(),
            display_type: "singleLine".to_string(),
            built_in,
        }
    }

    fn query_value<'a>(request: &'a ApiRequest, key: &str) -> Option<&'a str> {
        request
            .query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_project_listing_splits_builtin_and_custom_fields() {
        let fields = vec![field(1, "name", true), field(2, "code", true), field(40, "year", false)];
        let columns = vec![GridColumn {
            id: 9,
            code: "role".into(),
            name: "Role".into(),
        }];

        let mut options = SyncOptions::default();
        options.project.criteria_fields = vec![1, 40];
        options.project.sort_field = Some(2);
        options.project.order = SortOrder::Desc;
        options.role_grid_columns = vec![9];

        let request = listing_request(EntityKind::Project, &options, &fields, &columns);
        assert_eq!(request.resource, "/Projects");
        assert_eq!(query_value(&request, "displayFields"), Some("id,hero_image_id,name"));
        assert_eq!(query_value(&request, "fields"), Some("40"));
        assert_eq!(query_value(&request, "employees[roles][displayFields]"), Some("role"));
        assert_eq!(query_value(&request, "orderBy"), Some("codeDesc"));
        assert_eq!(query_value(&request, "limit"), Some("250"));
    }

    #[test]
    fn test_employee_listing_defaults_to_last_name() {
        let fields = vec![field(5, "first_name", true), field(6, "last_name", true)];
        let mut options = SyncOptions::default();
        options.employee.criteria_fields = vec![5, 6];

        let request = listing_request(EntityKind::Employee, &options, &fields, &[]);
        assert_eq!(
            query_value(&request, "displayFields"),
            Some("id,hero_image_id,first_name,last_name")
        );
        assert_eq!(query_value(&request, "orderBy"), Some("last_nameAsc"));
        assert_eq!(query_value(&request, "projects[roles][limit]"), Some("15"));
    }

    #[test]
    fn test_gallery_requests_one_extra() {
        let options = SyncOptions::default();
        let request = gallery_request(EntityKind::Project, 3, &options);

        assert_eq!(query_value(&request, "project_id"), Some("3"));
        assert_eq!(query_value(&request, "limit"), Some("5"));
        assert_eq!(query_value(&request, "orderBy"), Some("createdDesc"));
        assert_eq!(query_value(&request, "sizes[width]"), Some("<=2000"));
        assert_eq!(query_value(&request, "sizes[file_format][0]"), Some("png"));
        assert!(query_value(&request, "show_on_website").is_none());
        assert!(query_value(&request, "displayFields")
            .unwrap()
            .ends_with("project_display_order"));

        let employee = gallery_request(EntityKind::Employee, 8, &options);
        assert_eq!(query_value(&employee, "object_id"), Some("8"));
    }

    #[test]
    fn test_gallery_limit_saturates_at_max() {
        let mut options = SyncOptions::default();
        options.project.gallery.image_limit = u32::MAX;
        let request = gallery_request(EntityKind::Project, 3, &options);

        let expected = u32::MAX.to_string();
        assert_eq!(query_value(&request, "limit"), Some(expected.as_str()));
    }

    #[test]
    fn test_url_encodes_query_under_api_base() {
        let url = keywords_request(&[3, 4])
            .url("https://acme.openasset.com/REST/1")
            .unwrap();

        assert_eq!(url.path(), "/REST/1/ProjectKeywords");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("id".to_string(), "3,4".to_string())));
    }

    #[test]
    fn test_grid_columns_fall_back_without_roles_field() {
        assert_eq!(grid_columns_request(Some(17)).resource, "/Fields/17/GridColumns");
        assert_eq!(grid_columns_request(None).resource, "/GridColumns");
    }
}
