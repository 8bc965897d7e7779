use crate::llm::{
    ChatMessage, ContentPart, Gateway, GatewayError, GatewayRequest, RetryPolicy, retry_upstream,
};
use crate::models::{OutfitRecord, PhysicalProfile, StylePreference};
use crate::parse::{ItemListError, MAX_OUTFITS, classify_description, split_outfits};
use crate::shopping::ResolveError;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use futures::future::try_join_all;
use std::{env, future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

const DEFAULT_TEXT_MODEL: &str = "google/gemini-2.5-flash";
const DEFAULT_IMAGE_MODEL: &str = "google/gemini-2.5-flash-image";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub text_model: String,
    pub image_model: String,
    pub retry: RetryPolicy,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            text_model: env::var("AI_TEXT_MODEL").unwrap_or_else(|_| DEFAULT_TEXT_MODEL.into()),
            image_model: env::var("AI_IMAGE_MODEL").unwrap_or_else(|_| DEFAULT_IMAGE_MODEL.into()),
            retry: RetryPolicy::from_env(),
        }
    }
}

/// Why a single gateway-backed stage produced nothing usable.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("empty reply")]
    EmptyReply,
    #[error("no image returned")]
    NoImage,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("AI_GATEWAY_API_KEY is not configured")]
    MissingCredential,
    #[error("Analysis failed: {0}")]
    AnalysisFailed(#[source] StageFailure),
    #[error("Outfit generation failed: {0}")]
    GenerationFailed(#[source] StageFailure),
    #[error("Outfit generation returned no `OUTFIT <n>:` sections")]
    MalformedOutfitText,
    #[error("Image generation {index} failed: {source}")]
    ImageSynthesisFailed {
        index: usize,
        #[source]
        source: StageFailure,
    },
    #[error("Failed to extract items: {0}")]
    ExtractionFailed(#[source] StageFailure),
    #[error("Item extraction returned a malformed list: {0}")]
    MalformedItemList(#[source] ItemListError),
    #[error("Shopping lookup for `{item}` failed: {source}")]
    ResolutionFailed {
        item: String,
        #[source]
        source: ResolveError,
    },
}

impl PipelineError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Wraps a stage failure, except a missing credential which is reported
    /// as configuration rather than as the stage that tripped over it.
    pub fn at_stage(failure: StageFailure, wrap: impl FnOnce(StageFailure) -> Self) -> Self {
        match failure {
            StageFailure::Gateway(GatewayError::MissingCredential) => Self::MissingCredential,
            other => wrap(other),
        }
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::MissingCredential => "missing_credential",
            Self::AnalysisFailed(_) => "analysis_failed",
            Self::GenerationFailed(_) => "generation_failed",
            Self::MalformedOutfitText => "malformed_outfit_text",
            Self::ImageSynthesisFailed { .. } => "image_synthesis_failed",
            Self::ExtractionFailed(_) => "extraction_failed",
            Self::MalformedItemList(_) => "malformed_item_list",
            Self::ResolutionFailed { .. } => "resolution_failed",
        }
    }
}

/// A validated upload: base64 payload plus a sniffed MIME type.
#[derive(Clone)]
pub struct UploadedImage {
    mime: &'static str,
    base64: String,
}

impl UploadedImage {
    /// Accepts bare base64 or a `data:<mime>;base64,` URI.
    pub fn from_base64(raw: &str) -> Result<Self, PipelineError> {
        let trimmed = raw.trim();
        let payload = match trimmed.strip_prefix("data:") {
            Some(rest) => rest
                .split_once(";base64,")
                .map(|(_, data)| data)
                .ok_or_else(|| PipelineError::invalid_input("image data URI must be base64"))?,
            None => trimmed,
        };
        let cleaned: String = payload
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        if cleaned.is_empty() {
            return Err(PipelineError::invalid_input("image is required"));
        }
        let bytes = BASE64
            .decode(cleaned.as_bytes())
            .map_err(|err| PipelineError::invalid_input(format!("image is not valid base64: {err}")))?;
        if bytes.is_empty() {
            return Err(PipelineError::invalid_input("image is empty"));
        }
        Ok(Self {
            mime: sniff_mime(&bytes),
            base64: cleaned,
        })
    }

    pub fn mime(&self) -> &'static str {
        self.mime
    }

    pub fn encoded_len(&self) -> usize {
        self.base64.len()
    }

    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.base64)
    }
}

impl std::fmt::Debug for UploadedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadedImage")
            .field("mime", &self.mime)
            .field("encoded_len", &self.encoded_len())
            .finish()
    }
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/jpeg",
    }
}

#[derive(Clone)]
pub struct StylePipeline {
    gateway: Arc<dyn Gateway>,
    config: Arc<PipelineConfig>,
}

impl StylePipeline {
    pub fn new(gateway: Arc<dyn Gateway>, config: Arc<PipelineConfig>) -> Self {
        Self { gateway, config }
    }

    /// Photo + preference → up to three outfits, in `OUTFIT <n>` order.
    ///
    /// Fewer than three generated sections is a degraded success; zero is
    /// [`PipelineError::MalformedOutfitText`]. Image synthesis fans out and
    /// the first failing slot fails the whole run.
    pub async fn run(
        &self,
        image: &UploadedImage,
        style: StylePreference,
    ) -> Result<Vec<OutfitRecord>, PipelineError> {
        let gateway = self.gateway.as_ref();
        let config = self.config.as_ref();

        let profile = timed_stage(
            "analyze_characteristics",
            stages::analyze_characteristics(gateway, config, image),
        )
        .await?;

        let raw = timed_stage(
            "generate_outfits",
            stages::generate_outfit_text(gateway, config, &profile, style),
        )
        .await?;
        drop(profile);

        let descriptions = split_outfits(&raw);
        if descriptions.is_empty() {
            return Err(PipelineError::MalformedOutfitText);
        }
        if descriptions.len() < MAX_OUTFITS {
            warn!(
                target = "stylist.pipeline",
                found = descriptions.len(),
                "fewer outfit sections than requested, continuing"
            );
        }

        timed_stage(
            "synthesize_images",
            stages::synthesize_images(gateway, config, descriptions),
        )
        .await
    }
}

pub(crate) async fn timed_stage<T, Fut>(name: &'static str, fut: Fut) -> Result<T, PipelineError>
where
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let started = Instant::now();
    let outcome = fut.await;
    let elapsed_ms = started.elapsed().as_millis();
    crate::metrics::stage_elapsed(name, elapsed_ms);
    debug!(
        target = "stylist.pipeline",
        stage = name,
        elapsed_ms = elapsed_ms as u64,
        ok = outcome.is_ok(),
        "stage finished"
    );
    outcome
}

/// One gateway call with retry, returning the trimmed text reply.
pub(crate) async fn request_text(
    gateway: &dyn Gateway,
    policy: RetryPolicy,
    operation: &'static str,
    request: &GatewayRequest,
) -> Result<String, StageFailure> {
    let reply = retry_upstream(operation, policy, || gateway.invoke(request)).await?;
    reply
        .text_content()
        .map(str::to_string)
        .ok_or(StageFailure::EmptyReply)
}

pub mod stages {
    use super::*;

    const ANALYSIS_SYSTEM_PROMPT: &str = "You are a professional fashion consultant. Analyze the person in the image and describe their physical characteristics that are relevant for fashion recommendations: skin tone (warm/cool/neutral), face shape, body type, and any other relevant features. Be specific but professional.";
    const ANALYSIS_USER_PROMPT: &str =
        "Analyze this person's physical characteristics for fashion recommendations.";
    const STYLIST_SYSTEM_PROMPT: &str =
        "You are a professional fashion stylist creating complete outfit recommendations.";

    pub async fn analyze_characteristics(
        gateway: &dyn Gateway,
        config: &PipelineConfig,
        image: &UploadedImage,
    ) -> Result<PhysicalProfile, PipelineError> {
        let request = GatewayRequest::text(
            &config.text_model,
            vec![
                ChatMessage::system(ANALYSIS_SYSTEM_PROMPT),
                ChatMessage::user_parts(vec![
                    ContentPart::text(ANALYSIS_USER_PROMPT),
                    ContentPart::image(image.data_uri()),
                ]),
            ],
        );
        let text = request_text(gateway, config.retry, "analyze_characteristics", &request)
            .await
            .map_err(|failure| PipelineError::at_stage(failure, PipelineError::AnalysisFailed))?;
        info!(
            target = "stylist.pipeline",
            chars = text.len(),
            "physical analysis complete"
        );
        Ok(PhysicalProfile::new(text))
    }

    pub async fn generate_outfit_text(
        gateway: &dyn Gateway,
        config: &PipelineConfig,
        profile: &PhysicalProfile,
        style: StylePreference,
    ) -> Result<String, PipelineError> {
        let request = GatewayRequest::text(
            &config.text_model,
            vec![
                ChatMessage::system(STYLIST_SYSTEM_PROMPT),
                ChatMessage::user(outfit_prompt(profile, style)),
            ],
        );
        let text = request_text(gateway, config.retry, "generate_outfits", &request)
            .await
            .map_err(|failure| PipelineError::at_stage(failure, PipelineError::GenerationFailed))?;
        info!(target = "stylist.pipeline", style = %style, "outfit descriptions generated");
        Ok(text)
    }

    pub async fn synthesize_images(
        gateway: &dyn Gateway,
        config: &PipelineConfig,
        descriptions: Vec<String>,
    ) -> Result<Vec<OutfitRecord>, PipelineError> {
        let jobs = descriptions
            .into_iter()
            .take(MAX_OUTFITS)
            .enumerate()
            .map(|(idx, description)| synthesize_one(gateway, config, idx + 1, description));
        let outfits = try_join_all(jobs).await?;
        info!(
            target = "stylist.pipeline",
            count = outfits.len(),
            "outfit images generated"
        );
        Ok(outfits)
    }

    async fn synthesize_one(
        gateway: &dyn Gateway,
        config: &PipelineConfig,
        index: usize,
        description: String,
    ) -> Result<OutfitRecord, PipelineError> {
        let request = GatewayRequest::image(
            &config.image_model,
            vec![ChatMessage::user(image_prompt(&description))],
        );
        let fail = |source| PipelineError::ImageSynthesisFailed { index, source };
        let reply = retry_upstream("synthesize_image", config.retry, || gateway.invoke(&request))
            .await
            .map_err(|err| PipelineError::at_stage(err.into(), fail))?;
        let image = reply
            .image_content()
            .ok_or(StageFailure::NoImage)
            .map_err(|failure| PipelineError::at_stage(failure, fail))?
            .to_string();
        Ok(OutfitRecord {
            image,
            details: classify_description(&description),
            description,
        })
    }

    pub fn outfit_prompt(profile: &PhysicalProfile, style: StylePreference) -> String {
        let lower = style.as_str().to_lowercase();
        format!(
            "Based on this physical description: \"{profile}\"\n\n\
Generate 3 distinct, fashionable outfit options in a {style} style. For each outfit, provide a detailed description in this exact format:\n\n\
OUTFIT 1: [Describe a complete {lower} outfit with specific colors, patterns, and pieces. Include top, bottom, shoes, and any accessories. Be specific about colors and styles.]\n\n\
OUTFIT 2: [Describe a different complete {lower} outfit with specific details]\n\n\
OUTFIT 3: [Describe a third unique complete {lower} outfit with specific details]\n\n\
Make each outfit distinct in subcategory (e.g., day wear, office appropriate, evening) while maintaining the {style} aesthetic. Ensure the colors and styles complement the person's features.",
            profile = profile.as_str(),
        )
    }

    pub fn image_prompt(description: &str) -> String {
        format!(
            "Fashion photography of {}. Professional studio lighting, clean background, high-quality fashion editorial style, detailed clothing textures.",
            description.trim()
        )
    }
}
