use crate::llm::{ChatMessage, Gateway, GatewayRequest};
use crate::models::{ShoppingCandidate, ShoppingResult};
use crate::parse::parse_item_list;
use crate::pipeline::{PipelineConfig, PipelineError, request_text, timed_stage};
use async_trait::async_trait;
use futures::future::try_join_all;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

const DEFAULT_SHOP_BASE_URL: &str = "https://example.com";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid candidate link `{link}`: {reason}")]
    InvalidLink { link: String, reason: String },
}

/// Maps one item to purchase candidates, most relevant first. An empty
/// vector is a valid answer and is reported as such, never dropped.
#[async_trait]
pub trait ItemResolver: Send + Sync {
    async fn resolve(&self, item: &str) -> Result<Vec<ShoppingCandidate>, ResolveError>;
}

#[derive(Clone, Copy)]
enum LabelPosition {
    Prefix,
    Suffix,
}

#[derive(Clone, Copy)]
struct CandidateTemplate {
    label: &'static str,
    position: LabelPosition,
    path: &'static str,
    source: &'static str,
}

const CANDIDATE_TEMPLATES: [CandidateTemplate; 5] = [
    CandidateTemplate {
        label: "Premium Quality",
        position: LabelPosition::Suffix,
        path: "shop",
        source: "Fashion Store",
    },
    CandidateTemplate {
        label: "Designer",
        position: LabelPosition::Prefix,
        path: "designer",
        source: "Luxury Boutique",
    },
    CandidateTemplate {
        label: "Best Seller",
        position: LabelPosition::Suffix,
        path: "bestseller",
        source: "Top Shop",
    },
    CandidateTemplate {
        label: "Affordable",
        position: LabelPosition::Prefix,
        path: "affordable",
        source: "Budget Fashion",
    },
    CandidateTemplate {
        label: "Trending",
        position: LabelPosition::Prefix,
        path: "trending",
        source: "Style Hub",
    },
];

/// Deterministic stand-in for a catalog search: five fixed candidates per
/// item, linked under `SHOP_BASE_URL`.
#[derive(Debug, Clone)]
pub struct PlaceholderResolver {
    base_url: String,
}

impl PlaceholderResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var("SHOP_BASE_URL").unwrap_or_else(|_| DEFAULT_SHOP_BASE_URL.into()),
        )
    }

    fn candidate(&self, item: &str, template: CandidateTemplate) -> Result<ShoppingCandidate, ResolveError> {
        let title = match template.position {
            LabelPosition::Prefix => format!("{} {item}", template.label),
            LabelPosition::Suffix => format!("{item} - {}", template.label),
        };
        let link = format!("{}/{}/{}", self.base_url, template.path, slugify(item));
        reqwest::Url::parse(&link).map_err(|err| ResolveError::InvalidLink {
            link: link.clone(),
            reason: err.to_string(),
        })?;
        Ok(ShoppingCandidate {
            title,
            link,
            source: template.source.to_string(),
        })
    }
}

#[async_trait]
impl ItemResolver for PlaceholderResolver {
    async fn resolve(&self, item: &str) -> Result<Vec<ShoppingCandidate>, ResolveError> {
        CANDIDATE_TEMPLATES
            .iter()
            .map(|template| self.candidate(item, *template))
            .collect()
    }
}

/// Lowercase, whitespace runs collapsed to `-`, then percent-encoded.
pub fn slugify(item: &str) -> String {
    let dashed = item
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");
    urlencoding::encode(&dashed).into_owned()
}

#[derive(Clone)]
pub struct ShoppingPipeline {
    gateway: Arc<dyn Gateway>,
    resolver: Arc<dyn ItemResolver>,
    config: Arc<PipelineConfig>,
}

impl ShoppingPipeline {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        resolver: Arc<dyn ItemResolver>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            gateway,
            resolver,
            config,
        }
    }

    /// One result per extracted item, in extraction order.
    pub async fn run(&self, description: &str) -> Result<Vec<ShoppingResult>, PipelineError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(PipelineError::invalid_input("description is required"));
        }

        let items = timed_stage(
            "extract_items",
            stages::extract_items(self.gateway.as_ref(), &self.config, description),
        )
        .await?;

        timed_stage(
            "resolve_items",
            stages::resolve_items(self.resolver.as_ref(), items),
        )
        .await
    }
}

pub mod stages {
    use super::*;

    const EXTRACTOR_SYSTEM_PROMPT: &str = "You are a fashion item extractor. Extract individual clothing items and accessories from outfit descriptions. Return ONLY a JSON array of items, like: [\"item1\", \"item2\", \"item3\"]. Each item should be a concise search term.";

    pub async fn extract_items(
        gateway: &dyn Gateway,
        config: &PipelineConfig,
        description: &str,
    ) -> Result<Vec<String>, PipelineError> {
        let request = GatewayRequest::text(
            &config.text_model,
            vec![
                ChatMessage::system(EXTRACTOR_SYSTEM_PROMPT),
                ChatMessage::user(format!(
                    "Extract individual searchable clothing items from this outfit description: \"{description}\"\n\nReturn only a JSON array of 3-5 specific items."
                )),
            ],
        );
        let text = request_text(gateway, config.retry, "extract_items", &request)
            .await
            .map_err(|failure| PipelineError::at_stage(failure, PipelineError::ExtractionFailed))?;
        let items = parse_item_list(&text).map_err(PipelineError::MalformedItemList)?;
        info!(target = "stylist.pipeline", ?items, "extracted items");
        Ok(items)
    }

    pub async fn resolve_items(
        resolver: &dyn ItemResolver,
        items: Vec<String>,
    ) -> Result<Vec<ShoppingResult>, PipelineError> {
        let jobs = items.into_iter().map(|item| async move {
            match resolver.resolve(&item).await {
                Ok(results) => {
                    if results.is_empty() {
                        warn!(target = "stylist.pipeline", item = %item, "no shopping candidates");
                    }
                    Ok(ShoppingResult { item, results })
                }
                Err(source) => Err(PipelineError::ResolutionFailed { item, source }),
            }
        });
        try_join_all(jobs).await
    }
}
