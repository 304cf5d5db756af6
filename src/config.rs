use crate::db;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Section {
    Rag,
    LearningPath,
    Schedules,
    Quiz,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::Rag,
        Section::LearningPath,
        Section::Schedules,
        Section::Quiz,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rag" => Some(Self::Rag),
            "learningPath" => Some(Self::LearningPath),
            "schedules" => Some(Self::Schedules),
            "quiz" => Some(Self::Quiz),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Rag => "rag",
            Self::LearningPath => "learningPath",
            Self::Schedules => "schedules",
            Self::Quiz => "quiz",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Rag => "setup.rag",
            Self::LearningPath => "setup.learningPath",
            Self::Schedules => "setup.schedules",
            Self::Quiz => "setup.quiz",
        }
    }
}

pub fn default_section(section: Section) -> Value {
    match section {
        Section::Rag => json!({
            "chunkSize": 500,
            "chunkOverlap": 80,
            "embedDim": 256,
            "maxTopK": 20
        }),
        Section::LearningPath => json!({
            "maxItems": 24,
            "minSessionMinutes": 60,
            "maxSessionMinutes": 120
        }),
        Section::Schedules => json!({
            "maxOccurrences": 500
        }),
        Section::Quiz => json!({
            "defaultNumQuestions": 5
        }),
    }
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

pub fn merge_section_patch(
    section: Section,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        let n = match (section, k.as_str()) {
            (Section::Rag, "chunkSize") => parse_i64_range(v, k, 200, 4000)?,
            (Section::Rag, "chunkOverlap") => parse_i64_range(v, k, 0, 2000)?,
            (Section::Rag, "embedDim") => parse_i64_range(v, k, 64, 2048)?,
            (Section::Rag, "maxTopK") => parse_i64_range(v, k, 1, 50)?,
            (Section::LearningPath, "maxItems") => parse_i64_range(v, k, 1, 200)?,
            (Section::LearningPath, "minSessionMinutes") => parse_i64_range(v, k, 15, 240)?,
            (Section::LearningPath, "maxSessionMinutes") => parse_i64_range(v, k, 15, 480)?,
            (Section::Schedules, "maxOccurrences") => parse_i64_range(v, k, 1, 5000)?,
            (Section::Quiz, "defaultNumQuestions") => parse_i64_range(v, k, 1, 50)?,
            _ => return Err(format!("unknown {} field: {}", section.name(), k)),
        };
        obj.insert(k.clone(), Value::from(n));
    }
    if section == Section::LearningPath {
        let min = obj.get("minSessionMinutes").and_then(Value::as_i64).unwrap_or(60);
        let max = obj.get("maxSessionMinutes").and_then(Value::as_i64).unwrap_or(120);
        if min > max {
            return Err("minSessionMinutes must be <= maxSessionMinutes".into());
        }
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: Section) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            let mut whole = current.clone();
            if merge_section_patch(section, &mut whole, saved_obj).is_ok() {
                return Ok(whole);
            }
            // Stale saved values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut one = Map::new();
                one.insert(k.clone(), v.clone());
                let mut candidate = current.clone();
                if merge_section_patch(section, &mut candidate, &one).is_ok() {
                    current = candidate;
                }
            }
        }
    }
    Ok(current)
}

fn field_usize(v: &Value, key: &str, fallback: usize) -> usize {
    v.get(key)
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or(fallback)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RagSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embed_dim: usize,
    pub max_top_k: usize,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 80,
            embed_dim: 256,
            max_top_k: 20,
        }
    }
}

pub fn rag_settings(conn: &Connection) -> anyhow::Result<RagSettings> {
    let v = load_section(conn, Section::Rag)?;
    let d = RagSettings::default();
    Ok(RagSettings {
        chunk_size: field_usize(&v, "chunkSize", d.chunk_size),
        chunk_overlap: field_usize(&v, "chunkOverlap", d.chunk_overlap),
        embed_dim: field_usize(&v, "embedDim", d.embed_dim),
        max_top_k: field_usize(&v, "maxTopK", d.max_top_k),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LearningPathSettings {
    pub max_items: usize,
    pub min_session_minutes: i64,
    pub max_session_minutes: i64,
}

impl Default for LearningPathSettings {
    fn default() -> Self {
        Self {
            max_items: 24,
            min_session_minutes: 60,
            max_session_minutes: 120,
        }
    }
}

pub fn learning_path_settings(conn: &Connection) -> anyhow::Result<LearningPathSettings> {
    let v = load_section(conn, Section::LearningPath)?;
    let d = LearningPathSettings::default();
    Ok(LearningPathSettings {
        max_items: field_usize(&v, "maxItems", d.max_items),
        min_session_minutes: v
            .get("minSessionMinutes")
            .and_then(Value::as_i64)
            .unwrap_or(d.min_session_minutes),
        max_session_minutes: v
            .get("maxSessionMinutes")
            .and_then(Value::as_i64)
            .unwrap_or(d.max_session_minutes),
    })
}

pub fn max_occurrences(conn: &Connection) -> anyhow::Result<usize> {
    let v = load_section(conn, Section::Schedules)?;
    Ok(field_usize(&v, "maxOccurrences", 500))
}

pub fn default_num_questions(conn: &Connection) -> anyhow::Result<usize> {
    let v = load_section(conn, Section::Quiz)?;
    Ok(field_usize(&v, "defaultNumQuestions", 5))
}
