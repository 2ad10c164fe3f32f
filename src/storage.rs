use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem, RocksDb};

use crate::app::types::{Conversation, Memo, MemoSection, Role, Turn};
use crate::config::Locale;

const SCHEMA_VERSION: u32 = 2;
const TITLE_CHAR_LIMIT: usize = 40;

/// Conversation persistence, keyed by conversation id. Last writer wins.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Conversation>>;

    async fn save(&self, conversation: &Conversation) -> Result<()>;

    /// Summaries ordered by `updated_at`, newest first
    async fn list(&self) -> Result<Vec<ConversationSummary>>;
}

/// Summary of a saved conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: Option<String>,
    pub memo: Option<String>,
}

impl ConversationSummary {
    #[must_use]
    pub fn display_title(&self, locale: Locale) -> &str {
        match (&self.title, locale) {
            (Some(title), _) => title,
            (None, Locale::Zh) => "未命名会话",
            (None, Locale::En) => "Untitled",
        }
    }
}

pub fn summarize(conversation: &Conversation) -> ConversationSummary {
    ConversationSummary {
        id: conversation.id.clone(),
        created_at: conversation.created_at,
        updated_at: conversation.updated_at,
        title: conversation
            .first_user_text()
            .filter(|text| !text.is_empty())
            .map(|text| text.chars().take(TITLE_CHAR_LIMIT).collect()),
        memo: (!conversation.memo.is_empty()).then(|| conversation.memo.render()),
    }
}

// -- Versioned record schemas --

/// Current on-disk shape
#[derive(Debug, Serialize, Deserialize)]
struct ConversationRecord {
    schema_version: u32,
    conversation_id: String,
    created_at: String,
    updated_at: String,
    last_activity_at: String,
    display_name: Option<String>,
    #[serde(default)]
    turns: Vec<TurnRecord>,
    #[serde(default)]
    memo_sections: Vec<MemoSectionRecord>,
    #[serde(default)]
    memo_cursor: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct TurnRecord {
    role: String,
    text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct MemoSectionRecord {
    text: String,
    from_turn: usize,
    to_turn: usize,
    written_at: String,
}

/// Version 1: the JSON files written by the first backend
#[derive(Debug, Deserialize)]
struct LegacyRecord {
    id: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
    #[serde(default)]
    messages: Vec<LegacyMessage>,
    user_name: Option<String>,
    last_message_time: Option<String>,
    memo: Option<String>,
    #[serde(default)]
    memo_last_message_count: usize,
    last_memo_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyMessage {
    role: String,
    #[serde(default)]
    content: String,
}

fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Accepts RFC 3339 and the naive ISO form (`2025-01-01T10:00:00.123`), read as UTC
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn timestamp_or(value: Option<&str>, fallback: DateTime<Utc>, field: &str, id: &str) -> DateTime<Utc> {
    match value.map(|raw| (raw, parse_timestamp(raw))) {
        Some((_, Some(parsed))) => parsed,
        Some((raw, None)) => {
            tracing::warn!(conversation_id = id, field, value = raw, "unparsable timestamp");
            fallback
        }
        None => fallback,
    }
}

fn parse_role(value: &str) -> Result<Role> {
    match value.trim().to_lowercase().as_str() {
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        other => Err(eyre!("unknown turn role '{}'", other)),
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn clamp_cursor(cursor: usize, turn_count: usize, id: &str) -> usize {
    if cursor > turn_count {
        tracing::warn!(
            conversation_id = id,
            cursor,
            turn_count,
            "memo cursor beyond transcript, clamping"
        );
        return turn_count;
    }
    cursor
}

fn encode_record(conversation: &Conversation) -> Result<String> {
    let record = ConversationRecord {
        schema_version: SCHEMA_VERSION,
        conversation_id: conversation.id.clone(),
        created_at: format_timestamp(conversation.created_at),
        updated_at: format_timestamp(conversation.updated_at),
        last_activity_at: format_timestamp(conversation.last_activity_at),
        display_name: conversation.display_name.clone(),
        turns: conversation
            .turns
            .iter()
            .map(|turn| TurnRecord {
                role: role_name(turn.role).to_string(),
                text: turn.text.clone(),
            })
            .collect(),
        memo_sections: conversation
            .memo
            .sections()
            .iter()
            .map(|section| MemoSectionRecord {
                text: section.text.clone(),
                from_turn: section.from_turn,
                to_turn: section.to_turn,
                written_at: format_timestamp(section.written_at),
            })
            .collect(),
        memo_cursor: conversation.memo_cursor,
    };
    Ok(serde_json::to_string(&record)?)
}

/// Decodes any known record version into the current model.
///
/// `fallback_id` names records that do not carry their own id (legacy files).
fn decode_record(body: &str, fallback_id: &str) -> Result<Conversation> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    let version = value
        .get("schema_version")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(1);
    match version {
        1 => migrate_legacy(serde_json::from_value(value)?, fallback_id),
        2 => validate_record(serde_json::from_value(value)?),
        other => Err(eyre!("unsupported schema version {}", other)),
    }
}

fn validate_record(record: ConversationRecord) -> Result<Conversation> {
    let id = record.conversation_id;
    let created_at = parse_timestamp(&record.created_at)
        .ok_or_else(|| eyre!("conversation {} has no valid created_at", id))?;
    let updated_at = timestamp_or(Some(record.updated_at.as_str()), created_at, "updated_at", &id);
    let last_activity_at =
        timestamp_or(Some(record.last_activity_at.as_str()), created_at, "last_activity_at", &id);

    let turns = record
        .turns
        .into_iter()
        .map(|turn| {
            Ok(Turn {
                role: parse_role(&turn.role)?,
                text: turn.text,
            })
        })
        .collect::<Result<Vec<_>>>()
        .wrap_err_with(|| format!("conversation {}", id))?;

    let sections = record
        .memo_sections
        .into_iter()
        .filter(|section| {
            let valid = section.from_turn <= section.to_turn && section.to_turn <= turns.len();
            if !valid {
                tracing::warn!(
                    conversation_id = %id,
                    from_turn = section.from_turn,
                    to_turn = section.to_turn,
                    "dropping memo section outside transcript"
                );
            }
            valid
        })
        .map(|section| MemoSection {
            written_at: timestamp_or(Some(section.written_at.as_str()), created_at, "written_at", &id),
            text: section.text,
            from_turn: section.from_turn,
            to_turn: section.to_turn,
        })
        .collect();

    let memo_cursor = clamp_cursor(record.memo_cursor, turns.len(), &id);
    Ok(Conversation {
        id,
        created_at,
        updated_at,
        last_activity_at,
        display_name: record.display_name.filter(|name| !name.trim().is_empty()),
        turns,
        memo: Memo::from_sections(sections),
        memo_cursor,
    })
}

fn migrate_legacy(record: LegacyRecord, fallback_id: &str) -> Result<Conversation> {
    let id = record
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| fallback_id.to_string());

    let created_at = record
        .created_at
        .as_deref()
        .and_then(parse_timestamp)
        .or_else(|| record.updated_at.as_deref().and_then(parse_timestamp))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let updated_at = timestamp_or(record.updated_at.as_deref(), created_at, "updated_at", &id);
    let last_activity_at = timestamp_or(
        record.last_message_time.as_deref(),
        updated_at,
        "last_message_time",
        &id,
    );

    let turns = record
        .messages
        .into_iter()
        .map(|message| {
            Ok(Turn {
                role: parse_role(&message.role)?,
                text: message.content,
            })
        })
        .collect::<Result<Vec<_>>>()
        .wrap_err_with(|| format!("legacy conversation {}", id))?;

    // A memo written before any count was recorded covered the whole transcript.
    let (memo, memo_cursor) = match record.memo.filter(|memo| !memo.trim().is_empty()) {
        Some(text) => {
            let cursor = match record.memo_last_message_count {
                0 => turns.len(),
                count => clamp_cursor(count, turns.len(), &id),
            };
            let written_at = timestamp_or(
                record.last_memo_time.as_deref(),
                updated_at,
                "last_memo_time",
                &id,
            );
            let section = MemoSection {
                text,
                from_turn: 0,
                to_turn: cursor,
                written_at,
            };
            (Memo::from_sections(vec![section]), cursor)
        }
        None => (Memo::default(), 0),
    };

    tracing::debug!(conversation_id = %id, turns = turns.len(), "migrated legacy record");
    Ok(Conversation {
        id,
        created_at,
        updated_at,
        last_activity_at,
        display_name: record.user_name.filter(|name| !name.trim().is_empty()),
        turns,
        memo,
        memo_cursor,
    })
}

// -- SurrealDB store --

#[derive(Debug, Serialize, Deserialize)]
struct ConversationRow {
    conversation_id: String,
    schema_version: u32,
    updated_at: String,
    body: String,
}

/// Conversation store on SurrealDB (RocksDB on disk, memory engine for tests)
#[derive(Clone)]
pub struct SurrealConversationStore {
    db: Surreal<Db>,
}

impl SurrealConversationStore {
    /// Opens (or creates) the database directory at `path`
    pub async fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Surreal::new::<RocksDb>(path).await?;
        Self::init(db).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let db = Surreal::new::<Mem>(()).await?;
        Self::init(db).await
    }

    async fn init(db: Surreal<Db>) -> Result<Self> {
        db.use_ns("nez").use_db("main").await?;
        db.query(
            "
            DEFINE TABLE IF NOT EXISTS conversation SCHEMAFULL;
            DEFINE FIELD conversation_id ON conversation TYPE string;
            DEFINE FIELD schema_version ON conversation TYPE int;
            DEFINE FIELD updated_at ON conversation TYPE string;
            DEFINE FIELD body ON conversation TYPE string;
        ",
        )
        .await?;
        Ok(Self { db })
    }

    fn decode_row(row: ConversationRow) -> Result<Conversation> {
        decode_record(&row.body, &row.conversation_id)
            .wrap_err_with(|| format!("decoding conversation {}", row.conversation_id))
    }
}

#[async_trait]
impl ConversationStore for SurrealConversationStore {
    async fn load(&self, id: &str) -> Result<Option<Conversation>> {
        let row: Option<ConversationRow> = self.db.select(("conversation", id)).await?;
        row.map(Self::decode_row).transpose()
    }

    async fn save(&self, conversation: &Conversation) -> Result<()> {
        let row = ConversationRow {
            conversation_id: conversation.id.clone(),
            schema_version: SCHEMA_VERSION,
            updated_at: format_timestamp(conversation.updated_at),
            body: encode_record(conversation)?,
        };
        let _: Option<ConversationRow> = self
            .db
            .upsert(("conversation", conversation.id.as_str()))
            .content(row)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>> {
        let mut response = self
            .db
            .query("SELECT conversation_id, schema_version, updated_at, body FROM conversation")
            .await?;
        let rows: Vec<ConversationRow> = response.take(0)?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.conversation_id.clone();
            match Self::decode_row(row) {
                Ok(conversation) => summaries.push(summarize(&conversation)),
                Err(error) => {
                    tracing::warn!(conversation_id = %id, error = %error, "skipping unreadable conversation");
                }
            }
        }
        summaries.sort_by(|left, right| right.updated_at.cmp(&left.updated_at));
        Ok(summaries)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
}

/// Imports every legacy `*.json` conversation file in `dir`
pub async fn import_legacy_dir(store: &dyn ConversationStore, dir: &Path) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .wrap_err_with(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("json"))
        .collect();
    paths.sort();

    for path in paths {
        let fallback_id = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();
        let decoded = std::fs::read_to_string(&path)
            .map_err(color_eyre::Report::from)
            .and_then(|body| decode_record(&body, &fallback_id));
        match decoded {
            Ok(conversation) => {
                store.save(&conversation).await?;
                report.imported += 1;
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "skipping legacy file");
                report.skipped += 1;
            }
        }
    }
    tracing::info!(imported = report.imported, skipped = report.skipped, "legacy import finished");
    Ok(report)
}
