//! # Evaluation driver
//!
//! Runs the full staged pipeline over one evaluation directory:
//!
//! 1. **News**: encode every news record in batches into the news store,
//!    computing only ids that are not cached yet.
//! 2. **Debias**: neutralize the complete news set, then add the zero padding
//!    sentinel (after debiasing, so it never reaches the statistics).
//! 3. **Users**: encode distinct clicked-news histories in batches, keyed by
//!    the literal history string.
//! 4. **Impressions**: rank each impression and write its line immediately,
//!    in input order, stopping at `max_impressions`.
//!
//! Stages are strictly sequential: a later impression may reference a news id
//! from any batch, and that id must already be neutralized. Within stage 4,
//! `scoring_chunk > 1` scores a chunk of impressions concurrently and then
//! writes the chunk's lines in input order.
//!
//! A missing embedding aborts the run unless `MissingEmbeddingPolicy::Skip`
//! is configured, in which case the impression is skipped and listed in the
//! returned [`EvaluationSummary`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use rayon::prelude::*;

use crate::checkpoint::latest_checkpoint;
use crate::config::{EvalConfig, MissingEmbeddingPolicy};
use crate::dataset::{
    Behaviors, Impression, NewsRecord, NewsTable, UserHistory, UserIdMap, UNKNOWN_USER_ID,
};
use crate::debias::{DebiasPipeline, DebiasReport};
use crate::error::{EvalError, Result};
use crate::model::{ClickedNewsStack, NewsRecommender};
use crate::ranking::{RankedImpression, SessionRanker};
use crate::store::{Embedding, EmbeddingStore};

pub const NEWS_FILE: &str = "news_parsed.tsv";
pub const BEHAVIORS_FILE: &str = "behaviors.tsv";
pub const USER2INT_FILE: &str = "user2int.tsv";

#[derive(Clone, Debug, PartialEq)]
pub struct SkippedImpression {
    pub impression_id: i64,
    pub reason: String,
}

#[derive(Clone, Debug, Default)]
pub struct EvaluationSummary {
    pub news_encoded: usize,
    pub news_encoder_calls: usize,
    pub users_encoded: usize,
    pub user_encoder_calls: usize,
    /// Distinct histories whose user fell back to the reserved id.
    pub unmapped_histories: usize,
    pub impressions_written: usize,
    pub skipped: Vec<SkippedImpression>,
    pub bias_singular_values: Vec<f64>,
    pub rank_deficient: bool,
    pub elapsed: Duration,
}

pub struct EvaluationDriver<M> {
    config: EvalConfig,
    model: M,
}

impl<M: NewsRecommender> EvaluationDriver<M> {
    pub fn new(config: EvalConfig, model: M) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, model })
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Evaluate the tables in `data_dir` with the newest checkpoint in
    /// `checkpoint_dir`, writing `<data_dir>/<prediction_file>`.
    ///
    /// The checkpoint is located and all tables are loaded before the model
    /// is built or anything is computed.
    pub fn run_directory<F>(
        config: EvalConfig,
        data_dir: impl AsRef<Path>,
        checkpoint_dir: impl AsRef<Path>,
        load_model: F,
    ) -> Result<EvaluationSummary>
    where
        F: FnOnce(&Path) -> Result<M>,
    {
        let data_dir = data_dir.as_ref();
        config.validate()?;

        let checkpoint = latest_checkpoint(checkpoint_dir)?;

        let news = NewsTable::from_tsv(data_dir.join(NEWS_FILE), &config.news_attributes)?;
        let behaviors = Behaviors::from_tsv(data_dir.join(BEHAVIORS_FILE))?;
        let user2int = config
            .user2int_path
            .clone()
            .unwrap_or_else(|| data_dir.join(USER2INT_FILE));
        let users = if user2int.exists() {
            UserIdMap::from_tsv(&user2int)?
        } else {
            warn!(
                "User-id map {} not found, every user maps to the reserved id",
                user2int.display()
            );
            UserIdMap::default()
        };

        info!("Loading saved parameters from {}", checkpoint.display());
        let model = load_model(&checkpoint)?;
        let driver = Self::new(config, model)?;

        let out_path = data_dir.join(&driver.config.prediction_file);
        info!("Writing predictions to {}", out_path.display());
        let writer = BufWriter::new(File::create(&out_path)?);
        driver.evaluate(&news, &behaviors, &users, writer)
    }

    /// Run all stages and write one ranking line per impression to `writer`.
    pub fn evaluate<W: Write>(
        &self,
        news: &NewsTable,
        behaviors: &Behaviors,
        users: &UserIdMap,
        mut writer: W,
    ) -> Result<EvaluationSummary> {
        let start = Instant::now();
        info!(
            "Evaluating {} news, {} impressions",
            news.len(),
            behaviors.len()
        );

        let mut news_store: EmbeddingStore<String> = EmbeddingStore::new();
        self.encode_news(news, &mut news_store)?;

        let report = self.debias(news, &mut news_store)?;

        let histories = behaviors.user_histories(
            users,
            self.config.num_clicked_news_a_user,
            &self.config.padding_token,
        );
        let unmapped_histories = histories
            .iter()
            .filter(|h| h.user_id == UNKNOWN_USER_ID)
            .count();
        let mut user_store: EmbeddingStore<String> = EmbeddingStore::new();
        let unresolved = self.encode_users(&histories, &news_store, &mut user_store)?;

        let (written, skipped) = self.rank_impressions(
            behaviors,
            &news_store,
            &user_store,
            &unresolved,
            &mut writer,
        )?;
        writer.flush()?;

        let summary = EvaluationSummary {
            news_encoded: news.len(),
            news_encoder_calls: news_store.compute_calls(),
            users_encoded: user_store.len(),
            user_encoder_calls: user_store.compute_calls(),
            unmapped_histories,
            impressions_written: written,
            skipped,
            bias_singular_values: report.subspace.singular_values.clone(),
            rank_deficient: report.subspace.rank_deficient(),
            elapsed: start.elapsed(),
        };

        if !summary.skipped.is_empty() {
            warn!(
                "Skipped {} impressions: {:?}",
                summary.skipped.len(),
                summary
                    .skipped
                    .iter()
                    .map(|s| s.impression_id)
                    .collect::<Vec<_>>()
            );
        }
        info!(
            "Evaluation complete in {:?}: {} impressions written, {} skipped",
            summary.elapsed,
            summary.impressions_written,
            summary.skipped.len()
        );
        Ok(summary)
    }

    // -------------------- Stage 1: news --------------------

    pub fn encode_news(&self, news: &NewsTable, store: &mut EmbeddingStore<String>) -> Result<()> {
        let batch_size = self.config.news_batch_size;
        let n_batches = news.len().div_ceil(batch_size);
        info!(
            "Calculating vectors for {} news in {} batches",
            news.len(),
            n_batches
        );

        for (b, batch) in news.records.chunks(batch_size).enumerate() {
            let keys: Vec<String> = batch.iter().map(|r| r.id.clone()).collect();
            let added = store.get_or_compute_batch(&keys, |missing| {
                let records: Vec<NewsRecord> =
                    missing.iter().map(|&i| batch[i].clone()).collect();
                self.model.encode_news(&records)
            })?;
            debug!("News batch {}/{}: {} new vectors", b + 1, n_batches, added);
        }
        Ok(())
    }

    // -------------------- Stage 2: debias --------------------

    pub fn debias(
        &self,
        news: &NewsTable,
        store: &mut EmbeddingStore<String>,
    ) -> Result<DebiasReport> {
        let pipeline = DebiasPipeline::new(&self.config);
        let report = pipeline.run_on_store(store, &news.ids(), &news.categories())?;
        store.insert_zero_sentinel(self.config.padding_token.clone())?;
        Ok(report)
    }

    // -------------------- Stage 3: users --------------------

    /// Encode every distinct history. Returns, under the skip policy, the
    /// history keys that could not be encoded with the first missing id.
    pub fn encode_users(
        &self,
        histories: &[UserHistory],
        news_store: &EmbeddingStore<String>,
        user_store: &mut EmbeddingStore<String>,
    ) -> Result<HashMap<String, String>> {
        let batch_size = self.config.user_batch_size;
        let n_batches = histories.len().div_ceil(batch_size);
        info!(
            "Calculating vectors for {} users in {} batches",
            histories.len(),
            n_batches
        );

        let mut unresolved: HashMap<String, String> = HashMap::new();
        for (b, batch) in histories.chunks(batch_size).enumerate() {
            let mut resolvable: Vec<&UserHistory> = Vec::with_capacity(batch.len());
            for h in batch {
                match h.clicked_news.iter().find(|id| !news_store.contains(id.as_str())) {
                    None => resolvable.push(h),
                    Some(id) => match self.config.missing_embedding_policy {
                        MissingEmbeddingPolicy::Abort => {
                            return Err(EvalError::missing_embedding(id.as_str()))
                        }
                        MissingEmbeddingPolicy::Skip => {
                            trace!(
                                "History '{}' references unknown news {}",
                                h.clicked_news_string,
                                id
                            );
                            unresolved.insert(h.clicked_news_string.clone(), id.clone());
                        }
                    },
                }
            }

            let keys: Vec<String> = resolvable
                .iter()
                .map(|h| h.clicked_news_string.clone())
                .collect();
            let added = user_store.get_or_compute_batch(&keys, |missing| {
                let stacked: Vec<Vec<&Embedding>> = missing
                    .iter()
                    .map(|&i| {
                        resolvable[i]
                            .clicked_news
                            .iter()
                            .map(|id| news_store.require(id.as_str()))
                            .collect::<Result<_>>()
                    })
                    .collect::<Result<_>>()?;
                let clicked = ClickedNewsStack::from_histories(&stacked)?;
                self.model.encode_user(&clicked)
            })?;
            debug!("User batch {}/{}: {} new vectors", b + 1, n_batches, added);
        }
        Ok(unresolved)
    }

    // -------------------- Stage 4: impressions --------------------

    fn rank_impression(
        &self,
        impression: &Impression,
        news_store: &EmbeddingStore<String>,
        user_store: &EmbeddingStore<String>,
        unresolved: &HashMap<String, String>,
    ) -> Result<RankedImpression> {
        let user = match user_store.get(impression.clicked_news.as_str()) {
            Some(u) => u,
            None => {
                let id = unresolved
                    .get(&impression.clicked_news)
                    .cloned()
                    .unwrap_or_else(|| impression.clicked_news.clone());
                return Err(EvalError::missing_embedding(id));
            }
        };
        SessionRanker::new(&self.model).rank(impression, news_store, user)
    }

    /// Rank impressions in input order; returns (lines written, skipped).
    pub fn rank_impressions<W: Write>(
        &self,
        behaviors: &Behaviors,
        news_store: &EmbeddingStore<String>,
        user_store: &EmbeddingStore<String>,
        unresolved: &HashMap<String, String>,
        writer: &mut W,
    ) -> Result<(usize, Vec<SkippedImpression>)> {
        let limit = self.config.max_impressions.unwrap_or(usize::MAX);
        let selected = &behaviors.impressions[..behaviors.len().min(limit)];
        if selected.len() < behaviors.len() {
            info!(
                "Stopping after {} of {} impressions",
                selected.len(),
                behaviors.len()
            );
        }
        info!("Calculating probabilities for {} impressions", selected.len());

        let mut written = 0usize;
        let mut skipped = Vec::new();
        for chunk in selected.chunks(self.config.scoring_chunk) {
            let results: Vec<Result<RankedImpression>> = if chunk.len() == 1 {
                vec![self.rank_impression(&chunk[0], news_store, user_store, unresolved)]
            } else {
                chunk
                    .par_iter()
                    .map(|imp| self.rank_impression(imp, news_store, user_store, unresolved))
                    .collect()
            };

            for (imp, result) in chunk.iter().zip(results) {
                match result {
                    Ok(ranked) => {
                        writeln!(writer, "{}", ranked)?;
                        written += 1;
                    }
                    Err(err)
                        if err.is_per_impression()
                            && self.config.missing_embedding_policy
                                == MissingEmbeddingPolicy::Skip =>
                    {
                        debug!("Skipping impression {}: {}", imp.impression_id, err);
                        skipped.push(SkippedImpression {
                            impression_id: imp.impression_id,
                            reason: err.to_string(),
                        });
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok((written, skipped))
    }
}
