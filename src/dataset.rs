//! Tab-separated evaluation tables.
//!
//! - News table: header row; `id`, `category` and the configured attribute
//!   columns. Categories must already be dense integer codes.
//! - User-id map: header row; raw user id → dense integer id, unmapped users
//!   fall back to id 0.
//! - Behaviors: no header; five positional columns
//!   `impression_id, user, time, clicked_news, impressions`.
//!
//! Every schema problem is reported as `SchemaMismatch` at load time, before
//! any embedding is computed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use log::{debug, info, warn};

use crate::error::{EvalError, Result};
use crate::statistics::CategoryCode;

/// Attribute columns stored as serialized list literals.
const LIST_COLUMNS: [&str; 4] = ["title", "abstract", "title_entities", "abstract_entities"];

/// Reserved dense id for users absent from the user-id map.
pub const UNKNOWN_USER_ID: u32 = 0;

/// Placeholder for an empty clicked-news column.
pub const EMPTY_HISTORY: &str = " ";

#[derive(Clone, Debug, PartialEq)]
pub enum NewsAttribute {
    Tokens(Vec<i64>),
    Text(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewsRecord {
    pub id: String,
    pub category: CategoryCode,
    pub attributes: BTreeMap<String, NewsAttribute>,
}

/// Parse a list literal such as `[12, 5, 0]` into integer tokens.
pub fn parse_list_literal(raw: &str) -> Option<Vec<i64>> {
    let inner = raw.trim().strip_prefix('[')?.strip_suffix(']')?;
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }
    inner
        .split(',')
        .map(|t| t.trim().parse::<i64>().ok())
        .collect()
}

fn read_table(path: &Path) -> Result<String> {
    debug!("Reading table {}", path.display());
    Ok(fs::read_to_string(path)?)
}

fn rows(text: &str) -> impl Iterator<Item = (usize, Vec<&str>)> + '_ {
    text.lines()
        .enumerate()
        .map(|(n, l)| (n + 1, l.trim_end_matches('\r')))
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(n, l)| (n, l.split('\t').collect()))
}

// -------------------- News --------------------

#[derive(Clone, Debug, Default)]
pub struct NewsTable {
    pub records: Vec<NewsRecord>,
}

impl NewsTable {
    pub fn from_tsv(path: impl AsRef<Path>, attributes: &[String]) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading news table {}", path.display());
        Self::parse(&read_table(path)?, attributes)
    }

    pub fn parse(text: &str, attributes: &[String]) -> Result<Self> {
        let mut lines = rows(text);
        let (_, header) = lines
            .next()
            .ok_or_else(|| EvalError::schema_mismatch("news", "empty table"))?;

        let column = |name: &str| {
            header
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| {
                    EvalError::schema_mismatch("news", format!("missing column '{}'", name))
                })
        };
        let id_col = column("id")?;
        let category_col = column("category")?;
        let attr_cols: Vec<(String, usize)> = attributes
            .iter()
            .map(|a| column(a.as_str()).map(|c| (a.clone(), c)))
            .collect::<Result<_>>()?;

        let mut records = Vec::new();
        for (line, fields) in lines {
            let field = |c: usize| {
                fields.get(c).copied().ok_or_else(|| {
                    EvalError::schema_mismatch(
                        "news",
                        format!(
                            "line {}: expected {} columns, found {}",
                            line,
                            header.len(),
                            fields.len()
                        ),
                    )
                })
            };

            let id = field(id_col)?.trim().to_string();
            let raw_category = field(category_col)?.trim();
            let category = raw_category.parse::<CategoryCode>().map_err(|_| {
                EvalError::schema_mismatch(
                    "news",
                    format!(
                        "line {}: category '{}' is not a dense integer code",
                        line, raw_category
                    ),
                )
            })?;

            let mut attrs = BTreeMap::new();
            for (name, c) in &attr_cols {
                let raw = field(*c)?;
                let value = if LIST_COLUMNS.contains(&name.as_str()) {
                    let tokens = parse_list_literal(raw).ok_or_else(|| {
                        EvalError::schema_mismatch(
                            "news",
                            format!("line {}: column '{}' is not a list literal", line, name),
                        )
                    })?;
                    NewsAttribute::Tokens(tokens)
                } else {
                    NewsAttribute::Text(raw.to_string())
                };
                attrs.insert(name.clone(), value);
            }

            records.push(NewsRecord {
                id,
                category,
                attributes: attrs,
            });
        }

        info!("Loaded {} news records", records.len());
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.id.clone()).collect()
    }

    pub fn categories(&self) -> Vec<CategoryCode> {
        self.records.iter().map(|r| r.category).collect()
    }
}

// -------------------- Users --------------------

#[derive(Clone, Debug, Default)]
pub struct UserIdMap {
    ids: HashMap<String, u32>,
}

impl UserIdMap {
    pub fn from_tsv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading user-id map {}", path.display());
        Self::parse(&read_table(path)?)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut ids = HashMap::new();
        // first row is the header
        for (line, fields) in rows(text).skip(1) {
            if fields.len() < 2 {
                return Err(EvalError::schema_mismatch(
                    "user2int",
                    format!("line {}: expected 2 columns, found {}", line, fields.len()),
                ));
            }
            let id = fields[1].trim().parse::<u32>().map_err(|_| {
                EvalError::schema_mismatch(
                    "user2int",
                    format!("line {}: '{}' is not an integer id", line, fields[1]),
                )
            })?;
            ids.insert(fields[0].trim().to_string(), id);
        }
        debug!("User-id map has {} entries", ids.len());
        Ok(Self { ids })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get(&self, user: &str) -> Option<u32> {
        self.ids.get(user).copied()
    }

    /// Dense id, or [`UNKNOWN_USER_ID`] for unmapped users.
    pub fn resolve(&self, user: &str) -> u32 {
        self.get(user).unwrap_or(UNKNOWN_USER_ID)
    }
}

// -------------------- Behaviors --------------------

/// One `newsid-label` token of the impressions column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateToken {
    pub news_id: String,
    /// Click label when present; never used for prediction.
    pub label: Option<u8>,
}

impl CandidateToken {
    pub fn parse(token: &str) -> Self {
        match token.split_once('-') {
            Some((id, label)) => Self {
                news_id: id.to_string(),
                label: label.parse().ok(),
            },
            None => Self {
                news_id: token.to_string(),
                label: None,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Impression {
    pub impression_id: i64,
    pub user: String,
    pub time: String,
    /// Literal clicked-news column, also the user-vector cache key.
    pub clicked_news: String,
    pub candidates: Vec<CandidateToken>,
}

impl Impression {
    pub fn candidate_ids(&self) -> impl Iterator<Item = &str> {
        self.candidates.iter().map(|c| c.news_id.as_str())
    }
}

/// Clicked-news history of one distinct (user, clicked_news) row.
#[derive(Clone, Debug, PartialEq)]
pub struct UserHistory {
    pub user_id: u32,
    /// Cache key: the literal clicked-news column.
    pub clicked_news_string: String,
    /// Truncated and left-padded to the configured length.
    pub clicked_news: Vec<String>,
}

impl UserHistory {
    /// Keep the first `history_len` ids, then left-pad with `padding`.
    pub fn new(user_id: u32, clicked_news: &str, history_len: usize, padding: &str) -> Self {
        let mut clicked: Vec<String> = clicked_news
            .split_whitespace()
            .take(history_len)
            .map(str::to_string)
            .collect();
        let mut padded = vec![padding.to_string(); history_len - clicked.len()];
        padded.append(&mut clicked);
        Self {
            user_id,
            clicked_news_string: clicked_news.to_string(),
            clicked_news: padded,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Behaviors {
    pub impressions: Vec<Impression>,
}

impl Behaviors {
    pub fn from_tsv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading behaviors {}", path.display());
        Self::parse(&read_table(path)?)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut impressions = Vec::new();
        for (line, fields) in rows(text) {
            if fields.len() < 5 {
                return Err(EvalError::schema_mismatch(
                    "behaviors",
                    format!("line {}: expected 5 columns, found {}", line, fields.len()),
                ));
            }
            let impression_id = fields[0].trim().parse::<i64>().map_err(|_| {
                EvalError::schema_mismatch(
                    "behaviors",
                    format!("line {}: impression_id '{}' is not an integer", line, fields[0]),
                )
            })?;
            let clicked_news = if fields[3].trim().is_empty() {
                EMPTY_HISTORY.to_string()
            } else {
                fields[3].to_string()
            };
            impressions.push(Impression {
                impression_id,
                user: fields[1].trim().to_string(),
                time: fields[2].trim().to_string(),
                clicked_news,
                candidates: fields[4].split_whitespace().map(CandidateToken::parse).collect(),
            });
        }
        info!("Loaded {} impressions", impressions.len());
        Ok(Self { impressions })
    }

    pub fn len(&self) -> usize {
        self.impressions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.impressions.is_empty()
    }

    /// Distinct (user, clicked_news) rows in first-occurrence order.
    pub fn user_histories(
        &self,
        users: &UserIdMap,
        history_len: usize,
        padding: &str,
    ) -> Vec<UserHistory> {
        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        let mut missed = 0usize;
        let mut histories = Vec::new();
        for imp in &self.impressions {
            if !seen.insert((imp.user.as_str(), imp.clicked_news.as_str())) {
                continue;
            }
            let user_id = users.get(&imp.user).unwrap_or_else(|| {
                missed += 1;
                UNKNOWN_USER_ID
            });
            histories.push(UserHistory::new(user_id, &imp.clicked_news, history_len, padding));
        }
        if missed > 0 {
            warn!(
                "{} of {} users missing from the user-id map, mapped to {}",
                missed,
                histories.len(),
                UNKNOWN_USER_ID
            );
        }
        debug!("{} distinct user histories", histories.len());
        histories
    }
}
