//! Post-hoc biography enrichment through a chat-completions service.
//!
//! The scraper only hands over raw bio text; the service answers with a JSON
//! object whose values are normalised here into lists of strings (or null).

use crate::config::EnrichConfig;
use crate::error::{Result, ScrapeError};
use crate::loader::{discover_csv_files, load_profiles};
use crate::models::{ProfileRecord, PROFILE_COLUMNS};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const ENRICH_FIELDS: [&str; 5] = [
    "institution",
    "identity",
    "discipline",
    "research_interests",
    "publications",
];

/// Field name → normalised values, `None` when the service had nothing.
pub type EnrichedFields = BTreeMap<String, Option<Vec<String>>>;

#[async_trait]
pub trait BioEnricher: Send + Sync {
    /// Never fails: an unusable answer yields every field as `None`.
    async fn enrich(&self, bio: &str) -> EnrichedFields;
}

// ── Pure helpers ──────────────────────────────────────────────────────────────

pub fn build_prompt(bio: &str) -> String {
    format!(
        r#"Extract the following structured fields from the self-introduction text:

1. Institution: the university or research institution the person is affiliated with.
2. Identity: academic role such as PhD student, faculty member, postdoc, etc.
3. Discipline: the formal academic discipline(s), such as Sociology, Political Science, Computer Science.
4. Research interests: specific research topics or methods mentioned.
5. Publications: only peer-reviewed academic journal names.

Do NOT fabricate or infer any information. Extract only what is clearly stated in the text.
If a field is not mentioned, return null.

Text:
"""{bio}"""

Return the result strictly as a JSON object using lowercase keys:
"institution", "identity", "discipline", "research_interests", "publications"
"#
    )
}

/// Strip code fences and parse the outermost `{...}` object.
/// Anything unparseable gives an empty map.
pub fn parse_fields_json(reply: &str) -> Map<String, Value> {
    let text = reply.replace("```json", "").replace("```", "");
    let object = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => {
            warn!("No JSON object in enrichment reply");
            return Map::new();
        }
    };

    match serde_json::from_str::<Value>(object) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(e) => {
            warn!("Unparseable enrichment JSON: {}", e);
            Map::new()
        }
    }
}

/// "A, B; C" → [A, B, C] | ["A", 2] → [A, 2] | null → None
pub fn standardize_list_field(value: Option<&Value>) -> Option<Vec<String>> {
    let items: Vec<String> = match value? {
        Value::String(s) => s.split([',', ';']).map(|p| p.trim().to_string()).collect(),
        Value::Array(values) => values
            .iter()
            .map(|v| match v {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .collect(),
        _ => return None,
    };

    let items: Vec<String> = items.into_iter().filter(|s| !s.is_empty()).collect();
    if items.is_empty() { None } else { Some(items) }
}

pub fn fields_from_reply(reply: &str) -> EnrichedFields {
    let map = parse_fields_json(reply);
    ENRICH_FIELDS
        .iter()
        .map(|key| (key.to_string(), standardize_list_field(map.get(*key))))
        .collect()
}

fn empty_fields() -> EnrichedFields {
    ENRICH_FIELDS.iter().map(|key| (key.to_string(), None)).collect()
}

// ── Chat-completions client ───────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub struct ChatCompletionEnricher {
    client: reqwest::Client,
    config: EnrichConfig,
}

impl ChatCompletionEnricher {
    pub fn new(config: &EnrichConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    async fn complete(&self, bio: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: "You are a structured information extraction assistant.".into(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: build_prompt(bio),
                },
            ],
            temperature: self.config.temperature,
        };

        let response: ChatResponse = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ScrapeError::Config("chat response had no choices".into()))
    }
}

#[async_trait]
impl BioEnricher for ChatCompletionEnricher {
    async fn enrich(&self, bio: &str) -> EnrichedFields {
        if bio.trim().is_empty() {
            return empty_fields();
        }
        match self.complete(bio).await {
            Ok(reply) => fields_from_reply(&reply),
            Err(e) => {
                warn!("Enrichment API error: {}", e);
                empty_fields()
            }
        }
    }
}

// ── Files ─────────────────────────────────────────────────────────────────────

fn profile_cells(record: &ProfileRecord) -> Vec<String> {
    vec![
        record.name.clone().unwrap_or_default(),
        record.bio.clone(),
        record
            .photo_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        record.role.clone(),
        record.date.clone().unwrap_or_default(),
        record.location.clone().unwrap_or_default(),
    ]
}

/// Enrich every row of `input` and write it with the extra columns to `output`.
pub async fn enrich_file(enricher: &dyn BioEnricher, input: &Path, output: &Path) -> Result<usize> {
    let records = load_profiles(input)?;
    info!("Enriching {} profiles from {:?}", records.len(), input);

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ScrapeError::persistence(parent, e))?;
    }
    let mut writer = csv::Writer::from_path(output).map_err(|e| ScrapeError::csv(output, e))?;
    writer
        .write_record(PROFILE_COLUMNS.iter().chain(ENRICH_FIELDS.iter()))
        .map_err(|e| ScrapeError::csv(output, e))?;

    for record in &records {
        let fields = enricher.enrich(&record.bio).await;
        debug!("{:?}: {:?}", record.name, fields);

        let mut row = profile_cells(record);
        row.extend(ENRICH_FIELDS.iter().map(|key| {
            fields
                .get(*key)
                .cloned()
                .flatten()
                .map(|values| values.join("; "))
                .unwrap_or_default()
        }));
        writer.write_record(&row).map_err(|e| ScrapeError::csv(output, e))?;
    }

    writer.flush().map_err(|e| ScrapeError::persistence(output, e))?;
    Ok(records.len())
}

/// Enrich every profile CSV in `dir` into `<stem>_structured.csv` under `out_dir`.
pub async fn enrich_dir(enricher: &dyn BioEnricher, dir: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for input in discover_csv_files(dir)? {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let output = out_dir.join(format!("{}_structured.csv", stem));
        let rows = enrich_file(enricher, &input, &output).await?;
        info!("{:?}: {} rows → {:?}", input, rows, output);
        written.push(output);
    }
    Ok(written)
}
