//! Reference data cached from the remote catalog

use serde::{Deserialize, Deserializer, Serialize};

/// Field catalog entry (`/Fields`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rest_code: String,
    #[serde(default, alias = "field_display_type")]
    pub display_type: String,
    /// Built-in fields are addressed by rest code, custom ones by id
    #[serde(default, deserialize_with = "flag")]
    pub built_in: bool,
}

/// Employee-to-project role grid column (`/GridColumns`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridColumn {
    pub id: i64,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
}

/// Keyword category, the parent level of the taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordCategory {
    pub id: i64,
    pub name: String,
}

/// Project keyword, the child level of the taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteKeyword {
    pub id: i64,
    pub name: String,
    #[serde(rename = "project_keyword_category_id")]
    pub category_id: i64,
}

/// Taxonomy level of a local keyword term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermLevel {
    /// Parent term, from a keyword category
    Category,
    /// Child term, from a project keyword
    Keyword,
}

impl TermLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TermLevel::Category => "category",
            TermLevel::Keyword => "keyword",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "category" => Some(TermLevel::Category),
            "keyword" => Some(TermLevel::Keyword),
            _ => None,
        }
    }
}

/// Locally persisted keyword term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordTerm {
    /// Local term id
    pub id: i64,
    pub level: TermLevel,
    pub external_id: i64,
    pub name: String,
    pub slug: String,
    pub parent_term_id: Option<i64>,
    pub parent_external_id: Option<i64>,
}

/// Look up a field by id
pub fn find_field(fields: &[FieldDescriptor], id: i64) -> Option<&FieldDescriptor> {
    fields.iter().find(|f| f.id == id)
}

/// The remote sends `built_in` as 0/1 or as a boolean
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
        Flag::Text(s) => s == "1" || s.eq_ignore_ascii_case("true"),
    })
}
