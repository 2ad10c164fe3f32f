//! Perfume profile lookup: resolve the official name, search the web for it,
//! then have the model extract a structured profile from the hits.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agents::{ChatMessage, GenerationRequest, SearchHit, TextGenerator};
use crate::config::Locale;
use crate::error::CollaboratorError;
use crate::services::KnowledgeGateway;

const SEARCH_RESULTS: u32 = 8;
const REFERENCE_LIMIT: usize = 5;
const SEARCH_TIMEOUT: Duration = Duration::from_secs(20);

const NAME_SYSTEM_PROMPT: &str =
    "You are a Perfume Translator. Convert perfume names to official English/French names.";
const ANALYST_SYSTEM_PROMPT: &str = "You are a knowledgeable Perfume Data Analyst. \
Identify the perfume the snippets describe and extract its profile. \
The user's input may be a nickname, a typo or a partial name: accept snippets that clearly \
describe the intended perfume even if the name differs slightly, and use the official brand \
and name from the snippets. \
Return {\"found\": false} only when the snippets are unrelated to any perfume.\n\n\
Output JSON when found:\n\
{\n  \"found\": true,\n  \"brand\": \"...\",\n  \"name\": \"...\",\n  \
\"radar_data\": {\"Floral\": 0-10, \"Woody\": 0-10, \"Fresh\": 0-10, \"Spicy\": 0-10, \"Sweet\": 0-10, \"Oriental\": 0-10},\n  \
\"notes\": {\"top\": \"...\", \"middle\": \"...\", \"base\": \"...\"},\n  \
\"allergens\": [\"Limonene\", \"Linalool\"],\n  \"longevity\": \"...\",\n  \"safety_brief\": \"...\"\n}\n\n\
Return only valid JSON, no explanations, no markdown code blocks.";

#[derive(Debug, Error)]
pub enum ScentError {
    #[error("search service is not configured")]
    SearchUnavailable,
    #[error("analysis failed: {0}")]
    Analysis(CollaboratorError),
    #[error("analysis was not valid JSON: {0}")]
    Malformed(String),
}

/// Scores from 0 to 10 per accord family
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RadarScores {
    #[serde(default)]
    pub floral: f32,
    #[serde(default)]
    pub woody: f32,
    #[serde(default)]
    pub fresh: f32,
    #[serde(default)]
    pub spicy: f32,
    #[serde(default)]
    pub sweet: f32,
    #[serde(default)]
    pub oriental: f32,
}

impl RadarScores {
    fn clamped(self) -> Self {
        let clamp = |score: f32| if score.is_finite() { score.clamp(0.0, 10.0) } else { 0.0 };
        Self {
            floral: clamp(self.floral),
            woody: clamp(self.woody),
            fresh: clamp(self.fresh),
            spicy: clamp(self.spicy),
            sweet: clamp(self.sweet),
            oriental: clamp(self.oriental),
        }
    }

    #[must_use]
    pub fn entries(&self) -> [(&'static str, f32); 6] {
        [
            ("Floral", self.floral),
            ("Woody", self.woody),
            ("Fresh", self.fresh),
            ("Spicy", self.spicy),
            ("Sweet", self.sweet),
            ("Oriental", self.oriental),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePyramid {
    #[serde(default)]
    pub top: String,
    #[serde(default)]
    pub middle: String,
    #[serde(default)]
    pub base: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScentProfile {
    pub brand: String,
    pub name: String,
    #[serde(rename = "radar_data")]
    pub radar: RadarScores,
    pub notes: NotePyramid,
    pub allergens: Vec<String>,
    pub longevity: Option<String>,
    pub safety_brief: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScentReport {
    Found {
        profile: ScentProfile,
        reference_urls: Vec<String>,
    },
    NotFound {
        official_name: String,
        reference_urls: Vec<String>,
    },
}

/// What the analyst model sends back; every field but `found` is optional
#[derive(Debug, Deserialize)]
struct AnalystReply {
    #[serde(default)]
    found: bool,
    #[serde(default)]
    brand: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    radar_data: RadarScores,
    #[serde(default)]
    notes: NotePyramid,
    #[serde(default)]
    allergens: Vec<String>,
    longevity: Option<String>,
    safety_brief: Option<String>,
}

pub struct ScentAnalyzer {
    generator: Arc<dyn TextGenerator>,
    gateway: KnowledgeGateway,
    locale: Locale,
}

impl ScentAnalyzer {
    pub fn new(generator: Arc<dyn TextGenerator>, gateway: KnowledgeGateway, locale: Locale) -> Self {
        Self {
            generator,
            gateway,
            locale,
        }
    }

    /// Looks up `name` and extracts its profile from what the web says about it.
    ///
    /// A failed search is reported as `NotFound`; only a missing search
    /// service or a failed analysis is an error.
    pub async fn analyze(&self, name: &str) -> Result<ScentReport, ScentError> {
        if !self.gateway.is_available() {
            return Err(ScentError::SearchUnavailable);
        }

        let official_name = self.official_name(name).await;
        let query = format!("{} perfume notes accords ingredients", official_name);
        let hits = match self
            .gateway
            .deep_search(&query, SEARCH_RESULTS, SEARCH_TIMEOUT)
            .await
        {
            Ok(hits) => hits,
            Err(error) => {
                tracing::warn!(%error, query = query.as_str(), "scent search failed");
                Vec::new()
            }
        };
        let reference_urls: Vec<String> = hits
            .iter()
            .map(|hit| hit.url.trim())
            .filter(|url| !url.is_empty())
            .take(REFERENCE_LIMIT)
            .map(str::to_string)
            .collect();

        if hits.is_empty() {
            tracing::info!(official_name = official_name.as_str(), "no search hits for scent");
            return Ok(ScentReport::NotFound {
                official_name,
                reference_urls,
            });
        }

        let request = GenerationRequest::new(vec![
            ChatMessage::system(ANALYST_SYSTEM_PROMPT),
            ChatMessage::user(analyst_prompt(name, &official_name, &hits, self.locale)),
        ])
        .with_temperature(0.3)
        .with_max_tokens(1500);
        let raw = self
            .generator
            .complete(&request)
            .await
            .map_err(ScentError::Analysis)?;

        match parse_analysis(&raw)? {
            Some(profile) => {
                tracing::info!(brand = profile.brand.as_str(), name = profile.name.as_str(), "scent analyzed");
                Ok(ScentReport::Found {
                    profile,
                    reference_urls,
                })
            }
            None => Ok(ScentReport::NotFound {
                official_name,
                reference_urls,
            }),
        }
    }

    /// Official English or French name for a nickname; the input itself when
    /// the model cannot help.
    async fn official_name(&self, name: &str) -> String {
        let prompt = format!(
            "Convert the user's input (which might be a nickname or Chinese name) into the \
             official English/French perfume name.\n\nUser Input: \"{}\"\n\n\
             Return ONLY the official name (e.g. \"Louis Vuitton Orage\", \"Parfums de Marly Delina\"). \
             If you cannot determine it, return the input unchanged.",
            name
        );
        let request = GenerationRequest::new(vec![
            ChatMessage::system(NAME_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ])
        .with_temperature(0.2)
        .with_max_tokens(100);

        match self.generator.complete(&request).await {
            Ok(answer) => {
                let resolved = answer.trim().trim_matches(['"', '\'']).trim();
                if resolved.is_empty() {
                    name.trim().to_string()
                } else {
                    tracing::debug!(input = name, resolved, "resolved official perfume name");
                    resolved.to_string()
                }
            }
            Err(error) => {
                tracing::warn!(%error, input = name, "name resolution failed, searching the input");
                name.trim().to_string()
            }
        }
    }
}

fn analyst_prompt(name: &str, official_name: &str, hits: &[SearchHit], locale: Locale) -> String {
    let language = match locale {
        Locale::Zh => "Chinese",
        Locale::En => "English",
    };
    let snippets = hits
        .iter()
        .map(|hit| format!("Title: {}\nContent: {}\nURL: {}", hit.title, hit.content, hit.url))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Analyze the search snippets to identify the perfume described by the user's query: \
         \"{}\" (official name: \"{}\").\n\
         Write every description in {}. Score radar_data from 0 to 10 based on the described profile.\n\n\
         Search snippets:\n{}",
        name, official_name, language, snippets
    )
}

/// Outermost `{...}` of the reply; models wrap JSON in fences or prose
fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    text.get(start..=end)
}

/// `None` when the model says the snippets describe no perfume
fn parse_analysis(raw: &str) -> Result<Option<ScentProfile>, ScentError> {
    let json = extract_json_block(raw)
        .ok_or_else(|| ScentError::Malformed("no JSON object in reply".to_string()))?;
    let reply: AnalystReply =
        serde_json::from_str(json).map_err(|error| ScentError::Malformed(error.to_string()))?;
    if !reply.found {
        return Ok(None);
    }
    Ok(Some(ScentProfile {
        brand: reply.brand.trim().to_string(),
        name: reply.name.trim().to_string(),
        radar: reply.radar_data.clamped(),
        notes: reply.notes,
        allergens: reply
            .allergens
            .into_iter()
            .map(|allergen| allergen.trim().to_string())
            .filter(|allergen| !allergen.is_empty())
            .collect(),
        longevity: reply.longevity.filter(|text| !text.trim().is_empty()),
        safety_brief: reply.safety_brief.filter(|text| !text.trim().is_empty()),
    }))
}

/// Plain-text rendering for the terminal
#[must_use]
pub fn render_report(report: &ScentReport, locale: Locale) -> String {
    let (top, middle, base, allergens, longevity, safety, sources) = match locale {
        Locale::Zh => ("前调", "中调", "后调", "致敏成分", "留香", "安全简评", "参考"),
        Locale::En => ("Top", "Heart", "Base", "Allergens", "Longevity", "Safety", "Sources"),
    };
    match report {
        ScentReport::NotFound {
            official_name,
            reference_urls,
        } => {
            let mut lines = vec![match locale {
                Locale::Zh => format!("没有找到关于 {} 的可靠资料。", official_name),
                Locale::En => format!("Nothing reliable found about {}.", official_name),
            }];
            lines.extend(reference_urls.iter().map(|url| format!("  {}", url)));
            lines.join("\n")
        }
        ScentReport::Found {
            profile,
            reference_urls,
        } => {
            let mut lines = vec![format!("{} · {}", profile.brand, profile.name), String::new()];
            lines.push(format!("{}: {}", top, profile.notes.top));
            lines.push(format!("{}: {}", middle, profile.notes.middle));
            lines.push(format!("{}: {}", base, profile.notes.base));
            lines.push(String::new());
            for (family, score) in profile.radar.entries() {
                let filled = score.round() as usize;
                lines.push(format!(
                    "{:<9}{}{} {:.0}",
                    family,
                    "█".repeat(filled),
                    "·".repeat(10 - filled.min(10)),
                    score
                ));
            }
            if !profile.allergens.is_empty() {
                lines.push(String::new());
                lines.push(format!("{}: {}", allergens, profile.allergens.join(", ")));
            }
            if let Some(text) = &profile.longevity {
                lines.push(format!("{}: {}", longevity, text));
            }
            if let Some(text) = &profile.safety_brief {
                lines.push(format!("{}: {}", safety, text));
            }
            if !reference_urls.is_empty() {
                lines.push(String::new());
                lines.push(format!("{}:", sources));
                lines.extend(reference_urls.iter().map(|url| format!("  {}", url)));
            }
            lines.join("\n")
        }
    }
}
