use std::fs;
use std::path::PathBuf;

use matchcast::local_ledger::{ListFilter, LocalLedger, MAX_RECORDS, SaveResult, StreakKind};
use matchcast::record::{NewPrediction, OutcomeUpdate, Winner};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("matchcast_{name}_{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn prediction(match_id: &str, winner: Winner, confidence: f64) -> NewPrediction {
    NewPrediction {
        match_id: match_id.to_string(),
        match_label: format!("{match_id} home vs away"),
        home_team: "Home FC".to_string(),
        away_team: "Away FC".to_string(),
        kickoff_utc: None,
        winner,
        confidence,
        accuracy_estimate: 55.0,
        summary: String::new(),
        key_factors: vec![],
        market: None,
        probs: None,
        home_position: None,
        away_position: None,
        method: "form".to_string(),
    }
}

#[test]
fn duplicate_save_within_one_point_is_a_noop() {
    let mut ledger = LocalLedger::in_memory();
    assert!(matches!(
        ledger.save(prediction("m1", Winner::Home, 70.0), false),
        SaveResult::Saved(_)
    ));
    // Same match, same winner, confidence within the ±1 window.
    assert_eq!(
        ledger.save(prediction("m1", Winner::Home, 70.9), false),
        SaveResult::Duplicate
    );
    assert_eq!(ledger.len(), 1);

    // A different winner or a confidence outside the window is a new record.
    assert!(matches!(
        ledger.save(prediction("m1", Winner::Away, 70.0), false),
        SaveResult::Saved(_)
    ));
    assert!(matches!(
        ledger.save(prediction("m1", Winner::Home, 72.5), false),
        SaveResult::Saved(_)
    ));
    assert_eq!(ledger.len(), 3);
}

#[test]
fn skip_flag_bypasses_the_dedup_check() {
    let mut ledger = LocalLedger::in_memory();
    ledger.save(prediction("m1", Winner::Home, 70.0), false);
    assert!(matches!(
        ledger.save(prediction("m1", Winner::Home, 70.0), true),
        SaveResult::Saved(_)
    ));
    assert_eq!(ledger.len(), 2);
}

#[test]
fn ledger_never_exceeds_the_cap_and_evicts_oldest_first() {
    let mut ledger = LocalLedger::in_memory();
    for i in 0..(MAX_RECORDS + 25) {
        ledger.save(prediction(&format!("m{i}"), Winner::Home, 60.0), true);
    }
    assert_eq!(ledger.len(), MAX_RECORDS);
    // Newest at the head, the first 25 saves evicted.
    assert_eq!(ledger.records()[0].match_id, format!("m{}", MAX_RECORDS + 24));
    assert!(ledger.records().iter().all(|r| r.match_id != "m0"));
    assert!(ledger.records().iter().all(|r| r.match_id != "m24"));
}

#[test]
fn was_correct_is_fixed_at_reconciliation_and_immutable() {
    let mut ledger = LocalLedger::in_memory();
    let SaveResult::Saved(id) = ledger.save(prediction("m1", Winner::Home, 70.0), false) else {
        panic!("save failed");
    };

    let record = ledger.record_outcome(id, 2, 1).expect("record exists");
    let outcome = record.outcome.as_ref().expect("outcome set");
    assert_eq!(outcome.actual_winner, Winner::Home);
    assert!(outcome.was_correct);

    // A second reconciliation attempt must not rewrite history.
    let record = ledger.record_outcome(id, 0, 3).expect("record exists");
    let outcome = record.outcome.as_ref().expect("outcome still set");
    assert_eq!(outcome.actual_winner, Winner::Home);
    assert!(outcome.was_correct);

    assert!(ledger.record_outcome(999, 1, 0).is_none());
}

#[test]
fn bulk_outcomes_reconcile_first_pending_per_match() {
    let mut ledger = LocalLedger::in_memory();
    ledger.save(prediction("m1", Winner::Home, 70.0), true);
    ledger.save(prediction("m1", Winner::Away, 40.0), true);
    ledger.save(prediction("m2", Winner::Draw, 35.0), true);

    let reconciled = ledger.bulk_record_outcomes(&[
        OutcomeUpdate { match_id: "m1".to_string(), home_goals: 1, away_goals: 1 },
        OutcomeUpdate { match_id: "m2".to_string(), home_goals: 0, away_goals: 0 },
        OutcomeUpdate { match_id: "m9".to_string(), home_goals: 2, away_goals: 0 },
    ]);
    // m9 has no pending record and is silently skipped.
    assert_eq!(reconciled, 2);

    // Records are head-first, so the most recent m1 save was the pending one hit.
    let m1_newest = &ledger.records()[1];
    assert_eq!(m1_newest.match_id, "m1");
    assert!(m1_newest.is_completed());
    let m1_oldest = &ledger.records()[2];
    assert_eq!(m1_oldest.match_id, "m1");
    assert!(m1_oldest.is_pending());
}

#[test]
fn empty_ledger_stats_are_zero_not_nan() {
    let ledger = LocalLedger::in_memory();
    let stats = ledger.stats();
    assert_eq!(stats.total, 0);
    assert_eq!(stats.pending, stats.total);
    assert_eq!(stats.accuracy, 0.0);
    assert_eq!(stats.home_accuracy, 0.0);
    assert_eq!(stats.avg_confidence, 0.0);
    assert_eq!(stats.last_10_accuracy, 0.0);
    assert_eq!(stats.streak.kind, StreakKind::None);
    assert_eq!(stats.streak.count, 0);
}

#[test]
fn per_outcome_accuracy_matches_the_completed_share() {
    let mut ledger = LocalLedger::in_memory();
    // 10 completed home predictions, 6 correct.
    for i in 0..10 {
        let SaveResult::Saved(id) =
            ledger.save(prediction(&format!("m{i}"), Winner::Home, 65.0), true)
        else {
            panic!("save failed");
        };
        if i < 6 {
            ledger.record_outcome(id, 1, 0);
        } else {
            ledger.record_outcome(id, 0, 1);
        }
    }
    let stats = ledger.stats();
    assert_eq!(stats.correct, 6);
    assert_eq!(stats.incorrect, 4);
    assert!((stats.home_accuracy - 60.0).abs() < 1e-9);
    assert!((stats.accuracy - 60.0).abs() < 1e-9);
    assert_eq!(stats.draw_accuracy, 0.0);
}

#[test]
fn confidence_averages_split_by_correctness() {
    let mut ledger = LocalLedger::in_memory();
    let SaveResult::Saved(a) = ledger.save(prediction("m1", Winner::Home, 80.0), true) else {
        panic!()
    };
    let SaveResult::Saved(b) = ledger.save(prediction("m2", Winner::Home, 40.0), true) else {
        panic!()
    };
    ledger.save(prediction("m3", Winner::Home, 60.0), true);
    ledger.record_outcome(a, 2, 0);
    ledger.record_outcome(b, 0, 2);

    let stats = ledger.stats();
    assert!((stats.avg_confidence - 60.0).abs() < 1e-9);
    assert!((stats.avg_confidence_correct - 80.0).abs() < 1e-9);
    assert!((stats.avg_confidence_incorrect - 40.0).abs() < 1e-9);
    assert_eq!(stats.pending, 1);
}

#[test]
fn streak_counts_the_latest_run_of_identical_results() {
    let mut ledger = LocalLedger::in_memory();
    // Saved oldest-first; records() is most-recent-first, so reconcile to get
    // correctness [true, true, false, true] from the head.
    let outcomes = [true, false, true, true];
    for (i, correct) in outcomes.iter().enumerate() {
        let SaveResult::Saved(id) =
            ledger.save(prediction(&format!("m{i}"), Winner::Home, 60.0), true)
        else {
            panic!()
        };
        if *correct {
            ledger.record_outcome(id, 1, 0);
        } else {
            ledger.record_outcome(id, 0, 1);
        }
    }
    let streak = ledger.stats().streak;
    assert_eq!(streak.kind, StreakKind::Win);
    assert_eq!(streak.count, 2);
}

#[test]
fn method_breakdown_tracks_each_tag_independently() {
    let mut ledger = LocalLedger::in_memory();
    for (i, (method, correct)) in [("form", true), ("form", false), ("odds", true)]
        .iter()
        .enumerate()
    {
        let mut p = prediction(&format!("m{i}"), Winner::Home, 60.0);
        p.method = method.to_string();
        let SaveResult::Saved(id) = ledger.save(p, true) else {
            panic!()
        };
        ledger.record_outcome(id, if *correct { 1 } else { 0 }, 0);
    }
    let stats = ledger.stats();
    let form = stats.method_accuracy.get("form").expect("form tracked");
    assert_eq!(form.total, 2);
    assert!((form.accuracy - 50.0).abs() < 1e-9);
    let odds = stats.method_accuracy.get("odds").expect("odds tracked");
    assert!((odds.accuracy - 100.0).abs() < 1e-9);
}

#[test]
fn filters_compose_and_limit_applies_last() {
    let mut ledger = LocalLedger::in_memory();
    for i in 0..6 {
        let SaveResult::Saved(id) =
            ledger.save(prediction(&format!("m{i}"), Winner::Home, 60.0), true)
        else {
            panic!()
        };
        if i % 2 == 0 {
            ledger.toggle_favorite(id);
        }
        if i < 3 {
            ledger.record_outcome(id, 1, 0);
        }
    }

    let favorites = ledger.list(&ListFilter {
        favorites_only: true,
        ..Default::default()
    });
    assert_eq!(favorites.len(), 3);

    let pending_favorites = ledger.list(&ListFilter {
        favorites_only: true,
        pending_only: true,
        ..Default::default()
    });
    assert_eq!(pending_favorites.len(), 1);

    let limited = ledger.list(&ListFilter {
        completed_only: true,
        limit: Some(2),
        ..Default::default()
    });
    assert_eq!(limited.len(), 2);
}

#[test]
fn delete_and_toggle_signal_absence_without_erroring() {
    let mut ledger = LocalLedger::in_memory();
    let SaveResult::Saved(id) = ledger.save(prediction("m1", Winner::Home, 60.0), false) else {
        panic!()
    };
    assert!(ledger.toggle_favorite(id));
    assert!(ledger.delete(id));
    assert!(!ledger.delete(id));
    assert!(!ledger.toggle_favorite(id));
}

#[test]
fn export_import_round_trips_and_never_duplicates_ids() {
    let mut source = LocalLedger::in_memory();
    for i in 0..5 {
        source.save(prediction(&format!("m{i}"), Winner::Home, 60.0 + i as f64), true);
    }
    let payload = source.export();
    assert_eq!(payload.records.len(), 5);

    // Round trip into an empty ledger reproduces the record set exactly.
    let mut target = LocalLedger::in_memory();
    assert_eq!(target.import(payload.clone()), 5);
    let source_ids: Vec<u64> = source.records().iter().map(|r| r.id).collect();
    let target_ids: Vec<u64> = target.records().iter().map(|r| r.id).collect();
    assert_eq!(source_ids, target_ids);

    // Importing again drops every already-present id.
    assert_eq!(target.import(payload), 0);
    assert_eq!(target.len(), 5);
}

#[test]
fn import_does_not_apply_the_record_cap() {
    let mut source = LocalLedger::in_memory();
    for i in 0..MAX_RECORDS {
        source.save(prediction(&format!("s{i}"), Winner::Home, 60.0), true);
    }
    let payload = source.export();

    let mut target = LocalLedger::in_memory();
    for i in 0..10 {
        target.save(prediction(&format!("t{i}"), Winner::Away, 50.0), true);
    }
    // Incoming ids collide with target ids 1..=10; those are dropped in favor
    // of the local copies, the rest are prepended uncapped.
    let merged = target.import(payload);
    assert_eq!(merged, MAX_RECORDS - 10);
    assert_eq!(target.len(), MAX_RECORDS);

    // The next save enforces the cap again.
    target.save(prediction("fresh", Winner::Home, 60.0), true);
    assert_eq!(target.len(), MAX_RECORDS);
}

#[test]
fn snapshot_round_trips_through_disk() {
    let dir = scratch_dir("ledger_rt");
    let path = dir.join("predictions.json");

    let mut ledger = LocalLedger::with_path(path.clone());
    let SaveResult::Saved(id) = ledger.save(prediction("m1", Winner::Home, 70.0), false) else {
        panic!()
    };
    ledger.save(prediction("m2", Winner::Away, 55.0), false);
    ledger.record_outcome(id, 2, 0);
    drop(ledger);

    // Writes go through a temp file and a rename; no half-written leftovers.
    assert!(path.exists());
    assert!(!path.with_extension("json.tmp").exists());

    let mut reopened = LocalLedger::with_path(path);
    assert_eq!(reopened.len(), 2);
    let settled = reopened.get(id).expect("record survives reopen");
    let outcome = settled.outcome.as_ref().expect("outcome survives reopen");
    assert!(outcome.was_correct);

    // The id counter is restored; new saves never reuse a persisted id.
    let SaveResult::Saved(next) = reopened.save(prediction("m3", Winner::Draw, 40.0), false)
    else {
        panic!()
    };
    assert!(next > id);
    assert!(reopened.records().iter().all(|r| r.id != next || r.match_id == "m3"));

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn version_mismatch_discards_the_snapshot() {
    let dir = scratch_dir("ledger_ver");
    let path = dir.join("predictions.json");

    let mut ledger = LocalLedger::with_path(path.clone());
    ledger.save(prediction("m1", Winner::Home, 70.0), false);
    drop(ledger);

    let raw = fs::read_to_string(&path).expect("snapshot written");
    fs::write(&path, raw.replace("\"version\":1", "\"version\":99")).expect("rewrite snapshot");

    // An unknown store version starts the ledger empty instead of guessing.
    let reopened = LocalLedger::with_path(path);
    assert!(reopened.is_empty());

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn unwritable_store_degrades_without_failing_the_save() {
    let dir = scratch_dir("ledger_ro");
    fs::create_dir_all(&dir).expect("scratch dir");
    let blocker = dir.join("blocker");
    fs::write(&blocker, b"not a directory").expect("blocker file");

    // The parent of the store path is a regular file, so every persist fails.
    let mut ledger = LocalLedger::with_path(blocker.join("predictions.json"));
    assert!(matches!(
        ledger.save(prediction("m1", Winner::Home, 70.0), false),
        SaveResult::Saved(_)
    ));
    assert_eq!(ledger.len(), 1);

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn clear_empties_unconditionally() {
    let mut ledger = LocalLedger::in_memory();
    ledger.save(prediction("m1", Winner::Home, 60.0), false);
    ledger.clear();
    assert!(ledger.is_empty());
}
