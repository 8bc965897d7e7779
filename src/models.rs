use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(try_from = "String")]
pub enum StylePreference {
    Casual,
    #[default]
    Modern,
    Stylish,
    Traditional,
}

impl StylePreference {
    pub const ALL: [StylePreference; 4] = [
        StylePreference::Casual,
        StylePreference::Modern,
        StylePreference::Stylish,
        StylePreference::Traditional,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StylePreference::Casual => "Casual",
            StylePreference::Modern => "Modern",
            StylePreference::Stylish => "Stylish",
            StylePreference::Traditional => "Traditional",
        }
    }
}

impl fmt::Display for StylePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StylePreference {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let wanted = input.trim();
        Self::ALL
            .into_iter()
            .find(|style| style.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                format!("unknown style preference `{wanted}`, expected Casual, Modern, Stylish or Traditional")
            })
    }
}

impl TryFrom<String> for StylePreference {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Free-text description of the person in the uploaded photo. Lives only
/// for one pipeline run and is never written to logs.
pub struct PhysicalProfile(String);

impl PhysicalProfile {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PhysicalProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalProfile(<{} chars>)", self.0.chars().count())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DescriptionField {
    pub label: String,
    pub value: String,
}

/// How a description should be rendered, decided once when the record is
/// built.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Description {
    StructuredFields(Vec<DescriptionField>),
    FreeText(String),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutfitRecord {
    pub image: String,
    pub description: String,
    pub details: Description,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShoppingCandidate {
    pub title: String,
    pub link: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShoppingResult {
    pub item: String,
    pub results: Vec<ShoppingCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeStyleRequest {
    pub image: String,
    #[serde(default)]
    pub style_preference: Option<StylePreference>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeStyleResponse {
    pub outfits: Vec<OutfitRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchFashionRequest {
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct SearchFashionResponse {
    pub results: Vec<ShoppingResult>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}
