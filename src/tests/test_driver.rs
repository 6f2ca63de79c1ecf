use std::cell::Cell;
use std::fs;
use std::path::Path;

use approx::assert_relative_eq;

use crate::config::{EvalConfig, MissingEmbeddingPolicy};
use crate::dataset::{Behaviors, NewsTable, UserIdMap};
use crate::driver::{EvaluationDriver, BEHAVIORS_FILE, NEWS_FILE, USER2INT_FILE};
use crate::error::{EvalError, Result};
use crate::tests::init;
use crate::tests::test_data::StubModel;

const NEWS: &str = "id\tcategory\ttitle\n\
N1\t0\t[1, 2]\n\
N2\t0\t[3]\n\
N3\t1\t[4, 5]\n\
N4\t1\t[6]\n\
N5\t2\t[7, 8, 9]\n";

const BEHAVIORS: &str = "1\tU1\tt1\tN1 N3\tN2-1 N4-0 N5-0\n\
2\tU2\tt2\tN1 N3\tN3-0 N1-1\n\
3\tU3\tt3\t\tN5-1 N2-0\n\
4\tU1\tt4\tN4\tN1-0 N3-1 N4-0\n";

const USERS: &str = "user\tint\nU1\t1\nU2\t2\n";

fn stub_model() -> StubModel {
    StubModel::with_news(&[
        ("N1", vec![2.0, 0.2, 0.1]),
        ("N2", vec![-2.0, 0.3, 0.2]),
        ("N3", vec![0.1, 1.0, 0.3]),
        ("N4", vec![0.2, -1.0, 0.4]),
        ("N5", vec![0.3, 0.3, 1.0]),
    ])
}

fn small_config() -> EvalConfig {
    EvalConfig::new()
        .with_bias_rank(1)
        .with_history_length(3)
        .with_batch_sizes(2, 2)
}

fn tables(behaviors: &str) -> (NewsTable, Behaviors, UserIdMap) {
    (
        NewsTable::parse(NEWS, &["title".to_string()]).unwrap(),
        Behaviors::parse(behaviors).unwrap(),
        UserIdMap::parse(USERS).unwrap(),
    )
}

fn run(config: EvalConfig, behaviors: &str) -> Result<(String, crate::driver::EvaluationSummary)> {
    let (news, behaviors, users) = tables(behaviors);
    let driver = EvaluationDriver::new(config, stub_model())?;
    let mut out = Vec::new();
    let summary = driver.evaluate(&news, &behaviors, &users, &mut out)?;
    Ok((String::from_utf8(out).unwrap(), summary))
}

fn assert_rank_line(line: &str, impression_id: i64, n: usize) {
    let (id, ranks) = line.split_once(' ').unwrap();
    assert_eq!(id.parse::<i64>().unwrap(), impression_id);
    let inner = ranks.strip_prefix('[').unwrap().strip_suffix(']').unwrap();
    let mut ranks: Vec<usize> = inner.split(',').map(|r| r.parse().unwrap()).collect();
    ranks.sort_unstable();
    assert_eq!(ranks, (1..=n).collect::<Vec<_>>());
}

#[test]
fn test_full_evaluation() {
    init();
    let (news, behaviors, users) = tables(BEHAVIORS);
    let driver = EvaluationDriver::new(small_config(), stub_model()).unwrap();
    let mut out = Vec::new();
    let summary = driver.evaluate(&news, &behaviors, &users, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_rank_line(lines[0], 1, 3);
    assert_rank_line(lines[1], 2, 2);
    assert_rank_line(lines[2], 3, 2);
    assert_rank_line(lines[3], 4, 3);

    assert_eq!(summary.impressions_written, 4);
    assert!(summary.skipped.is_empty());
    assert_eq!(summary.news_encoded, 5);
    // 5 news in batches of 2
    assert_eq!(summary.news_encoder_calls, 3);
    // "N1 N3" is shared by U1 and U2 and encoded once
    assert_eq!(summary.users_encoded, 3);
    assert_eq!(summary.user_encoder_calls, 2);
    // U3 is absent from the user-id map
    assert_eq!(summary.unmapped_histories, 1);
    assert!(!summary.rank_deficient);

    let model = driver.model();
    assert_eq!(model.news_encoded.load(std::sync::atomic::Ordering::SeqCst), 5);
    assert_eq!(model.users_encoded.load(std::sync::atomic::Ordering::SeqCst), 3);
    for &(history_len, batch) in model.stack_shapes.lock().unwrap().iter() {
        assert_eq!(history_len, 3);
        assert!(batch <= 2);
    }
    // candidates are scored with neutralized, unit-norm embeddings
    for &n in model.candidate_norms.lock().unwrap().iter() {
        assert_relative_eq!(n, 1.0, epsilon = 1e-6);
    }
}

#[test]
fn test_summary_reports_bias_spectrum() {
    init();
    let (_, summary) = run(small_config(), BEHAVIORS).unwrap();
    // N1 and N2 differ mostly along the first axis
    assert_eq!(summary.bias_singular_values.len(), 3);
    assert!(summary.bias_singular_values[0] > summary.bias_singular_values[1]);
}

#[test]
fn test_max_impressions_is_exact() {
    init();
    let (text, summary) = run(small_config().with_max_impressions(Some(2)), BEHAVIORS).unwrap();
    assert_eq!(text.lines().count(), 2);
    assert_eq!(summary.impressions_written, 2);
    assert!(text.starts_with("1 ["));

    let (text, _) = run(small_config().with_max_impressions(Some(0)), BEHAVIORS).unwrap();
    assert!(text.is_empty());

    let (text, _) = run(small_config().with_max_impressions(Some(99)), BEHAVIORS).unwrap();
    assert_eq!(text.lines().count(), 4);
}

#[test]
fn test_concurrent_scoring_preserves_order() {
    init();
    let (sequential, _) = run(small_config(), BEHAVIORS).unwrap();
    let (chunked, _) = run(small_config().with_scoring_chunk(3), BEHAVIORS).unwrap();
    assert_eq!(sequential, chunked);
}

const WITH_UNKNOWN_CANDIDATE: &str = "1\tU1\tt1\tN1 N3\tN2-1 N4-0\n\
5\tU2\tt5\tN1 N3\tN2-0 N9-1\n\
6\tU2\tt6\tN1\tN5-1 N4-0\n";

const WITH_UNKNOWN_HISTORY: &str = "1\tU1\tt1\tN1 N3\tN2-1 N4-0\n\
7\tU4\tt7\tN8 N1\tN2-0 N3-1\n\
8\tU2\tt8\tN5\tN5-1 N4-0\n";

#[test]
fn test_missing_candidate_aborts_by_default() {
    init();
    let err = run(small_config(), WITH_UNKNOWN_CANDIDATE).unwrap_err();
    assert!(matches!(err, EvalError::MissingEmbedding { ref id } if id == "N9"));
}

#[test]
fn test_missing_candidate_skipped_on_request() {
    init();
    let config = small_config().with_missing_policy(MissingEmbeddingPolicy::Skip);
    let (text, summary) = run(config, WITH_UNKNOWN_CANDIDATE).unwrap();

    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_rank_line(lines[0], 1, 2);
    assert_rank_line(lines[1], 6, 2);

    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].impression_id, 5);
    assert!(summary.skipped[0].reason.contains("N9"));
}

#[test]
fn test_missing_history_news() {
    init();
    let err = run(small_config(), WITH_UNKNOWN_HISTORY).unwrap_err();
    assert!(matches!(err, EvalError::MissingEmbedding { ref id } if id == "N8"));

    let config = small_config().with_missing_policy(MissingEmbeddingPolicy::Skip);
    let (text, summary) = run(config, WITH_UNKNOWN_HISTORY).unwrap();
    assert_eq!(text.lines().count(), 2);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].impression_id, 7);
    assert!(summary.skipped[0].reason.contains("N8"));
}

#[test]
fn test_invalid_config_rejected() {
    init();
    let err = EvaluationDriver::new(EvalConfig::new().with_scoring_chunk(0), stub_model()).err();
    assert!(matches!(err, Some(EvalError::InvalidParameter { .. })));
}

fn write_data_dir(dir: &Path) {
    fs::write(dir.join(NEWS_FILE), NEWS).unwrap();
    fs::write(dir.join(BEHAVIORS_FILE), BEHAVIORS).unwrap();
    fs::write(dir.join(USER2INT_FILE), USERS).unwrap();
}

#[test]
fn test_run_directory() {
    init();
    let data = tempfile::tempdir().unwrap();
    let checkpoints = tempfile::tempdir().unwrap();
    write_data_dir(data.path());
    fs::write(checkpoints.path().join("ckpt-2.pth"), b"").unwrap();
    fs::write(checkpoints.path().join("ckpt-10.pth"), b"").unwrap();

    let loaded = Cell::new(false);
    let summary = EvaluationDriver::run_directory(
        small_config(),
        data.path(),
        checkpoints.path(),
        |checkpoint: &Path| -> Result<StubModel> {
            assert!(checkpoint.ends_with("ckpt-10.pth"));
            loaded.set(true);
            Ok(stub_model())
        },
    )
    .unwrap();

    assert!(loaded.get());
    assert_eq!(summary.impressions_written, 4);
    let written = fs::read_to_string(data.path().join("prediction.txt")).unwrap();
    assert_eq!(written.lines().count(), 4);
    assert_rank_line(written.lines().next().unwrap(), 1, 3);
}

#[test]
fn test_run_directory_without_user_map() {
    init();
    let data = tempfile::tempdir().unwrap();
    let checkpoints = tempfile::tempdir().unwrap();
    write_data_dir(data.path());
    fs::remove_file(data.path().join(USER2INT_FILE)).unwrap();
    fs::write(checkpoints.path().join("ckpt-1.pth"), b"").unwrap();

    let summary = EvaluationDriver::run_directory(
        small_config(),
        data.path(),
        checkpoints.path(),
        |_: &Path| -> Result<StubModel> { Ok(stub_model()) },
    )
    .unwrap();
    assert_eq!(summary.impressions_written, 4);
    // every distinct (user, history) row falls back to the reserved id
    assert_eq!(summary.unmapped_histories, 4);
}

#[test]
fn test_run_directory_requires_a_checkpoint() {
    init();
    let data = tempfile::tempdir().unwrap();
    let checkpoints = tempfile::tempdir().unwrap();
    write_data_dir(data.path());

    let err = EvaluationDriver::run_directory(
        small_config(),
        data.path(),
        checkpoints.path(),
        |_: &Path| -> Result<StubModel> { panic!("model must not be loaded without a checkpoint") },
    )
    .unwrap_err();
    assert!(matches!(err, EvalError::NoCheckpoint { .. }));
    assert!(!data.path().join("prediction.txt").exists());
}

#[test]
fn test_run_directory_schema_error_before_model_load() {
    init();
    let data = tempfile::tempdir().unwrap();
    let checkpoints = tempfile::tempdir().unwrap();
    write_data_dir(data.path());
    fs::write(data.path().join(NEWS_FILE), "id\ttitle\nN1\t[1]\n").unwrap();
    fs::write(checkpoints.path().join("ckpt-1.pth"), b"").unwrap();

    let err = EvaluationDriver::run_directory(
        small_config(),
        data.path(),
        checkpoints.path(),
        |_: &Path| -> Result<StubModel> { panic!("tables are validated first") },
    )
    .unwrap_err();
    assert!(matches!(err, EvalError::SchemaMismatch { .. }));
}
