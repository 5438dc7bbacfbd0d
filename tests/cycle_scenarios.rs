mod common;

use anyhow::anyhow;
use chrono::Duration as ChronoDuration;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use common::*;
use vc_news_analyzer::{CyclePhase, FeedProvider, HistoryStore};

fn history_in(dir: &tempfile::TempDir) -> HistoryStore {
    HistoryStore::open(dir.path().join("history.json")).0
}

fn five_new() -> Vec<vc_news_analyzer::ArticleCandidate> {
    ["A", "B", "C", "D", "E"].iter().map(|k| article("Feed", k)).collect()
}

#[tokio::test]
async fn five_new_articles_quota_two_posts_first_two() {
    let dir = tempfile::tempdir().unwrap();
    let items = five_new();
    let analyzer = Arc::new(ScriptedAnalyzer::always_yes());
    let publisher = Arc::new(RecordingPublisher::default());
    let orch = orchestrator(
        vec![Box::new(StubFeed::items("Feed", items.clone()))],
        analyzer.clone(),
        publisher.clone(),
        history_in(&dir),
        settings(2, 2),
    );

    let report = orch.run_cycle_at(noon()).await.unwrap();
    assert_eq!(report.eligible, 5);
    assert_eq!(report.max_posts, 2);
    assert_eq!(report.posted, 2);
    assert_eq!(analyzer.titles(), vec!["Story A", "Story B"]);
    assert_eq!(publisher.sent_count(), 2);

    orch.with_history(|h| {
        for a in &items[..2] {
            let e = h.lookup(&a.identity).expect("analyzed");
            assert_eq!(e.times_analyzed, 1);
            assert!(e.is_posted());
        }
        for a in &items[2..] {
            assert!(h.lookup(&a.identity).is_none(), "{} must stay untouched", a.title);
        }
    })
    .await;
    assert_eq!(orch.phase(), CyclePhase::Idle);
}

#[tokio::test]
async fn quiet_hours_make_zero_calls() {
    let dir = tempfile::tempdir().unwrap();
    let analyzer = Arc::new(ScriptedAnalyzer::always_yes());
    let publisher = Arc::new(RecordingPublisher::default());
    let orch = orchestrator(
        vec![Box::new(StubFeed::items("Feed", five_new()))],
        analyzer.clone(),
        publisher.clone(),
        history_in(&dir),
        settings(1, 3),
    );

    for hour in [22, 23, 0, 3, 6] {
        let report = orch.run_cycle_at(at_hour(hour)).await.unwrap();
        assert!(report.quiet, "hour {hour} should be quiet");
        assert_eq!(report.posted, 0);
    }
    assert_eq!(analyzer.call_count(), 0);
    assert_eq!(publisher.attempts.load(Ordering::SeqCst), 0);
    orch.with_history(|h| assert!(h.is_empty())).await;

    let report = orch.run_cycle_at(at_hour(7)).await.unwrap();
    assert!(!report.quiet);
    assert!(report.posted >= 1);
}

#[tokio::test]
async fn quiet_tick_still_prunes_old_history() {
    let dir = tempfile::tempdir().unwrap();
    let mut history = history_in(&dir);
    history
        .record_analysis("ancient", "original", at_hour(23) - ChronoDuration::days(8))
        .unwrap();
    let analyzer = Arc::new(ScriptedAnalyzer::always_yes());
    let orch = orchestrator(
        vec![Box::new(StubFeed::items("Feed", five_new()))],
        analyzer.clone(),
        Arc::new(RecordingPublisher::default()),
        history,
        settings(1, 3),
    );

    let r = orch.run_cycle_at(at_hour(23)).await.unwrap();
    assert!(r.quiet);
    assert_eq!(r.pruned, 1);
    assert_eq!(analyzer.call_count(), 0);
    orch.with_history(|h| assert!(h.is_empty())).await;
}

#[tokio::test]
async fn posts_never_exceed_drawn_quota() {
    let many: Vec<_> = (0..30).map(|i| article("Feed", &format!("n{i}"))).collect();
    let mut seen_quotas = HashSet::new();

    for seed in 0..12u64 {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Arc::new(RecordingPublisher::default());
        let orch = orchestrator(
            vec![Box::new(StubFeed::items("Feed", many.clone()))],
            Arc::new(ScriptedAnalyzer::always_yes()),
            publisher.clone(),
            history_in(&dir),
            settings(1, 3),
        )
        .with_rng_seed(seed);

        let report = orch.run_cycle_at(noon()).await.unwrap();
        assert!((1..=3).contains(&report.max_posts));
        assert_eq!(report.posted, report.max_posts);
        assert_eq!(publisher.sent_count() as u32, report.max_posts);
        seen_quotas.insert(report.max_posts);
    }
    assert!(seen_quotas.len() > 1, "quota should vary between ticks");
}

#[tokio::test]
async fn one_failing_feed_out_of_ten_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut feeds: Vec<Box<dyn FeedProvider>> = Vec::new();
    for f in 0..10 {
        let name = format!("Feed {f}");
        if f == 4 {
            feeds.push(Box::new(StubFeed::failing(&name)));
        } else {
            let items = (0..3).map(|i| article(&name, &format!("f{f}-{i}"))).collect();
            feeds.push(Box::new(StubFeed::items(&name, items)));
        }
    }
    let analyzer = Arc::new(ScriptedAnalyzer::always_no());
    let mut s = settings(1, 1);
    s.max_analyses_per_tick = 100;
    let orch = orchestrator(
        feeds,
        analyzer.clone(),
        Arc::new(RecordingPublisher::default()),
        history_in(&dir),
        s,
    );

    let report = orch.run_cycle_at(noon()).await.unwrap();
    assert_eq!(report.feed_errors, 1);
    assert_eq!(report.fetched, 27);
    assert_eq!(report.analyzed, 27);
    assert!(analyzer.titles().iter().all(|t| !t.contains("f4-")));
}

#[tokio::test(start_paused = true)]
async fn hanging_feed_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = settings(1, 1);
    s.timeouts.feed_secs = 2;
    let orch = orchestrator(
        vec![
            Box::new(StubFeed::hanging("Slow")),
            Box::new(StubFeed::items("Fast", vec![article("Fast", "x")])),
        ],
        Arc::new(ScriptedAnalyzer::always_yes()),
        Arc::new(RecordingPublisher::default()),
        history_in(&dir),
        s,
    );

    let report = orch.run_cycle_at(noon()).await.unwrap();
    assert_eq!(report.feed_errors, 1);
    assert_eq!(report.posted, 1);
}

#[tokio::test]
async fn failed_delivery_stays_eligible_and_posts_later() {
    let dir = tempfile::tempdir().unwrap();
    let item = article("Feed", "retry");
    let analyzer = Arc::new(ScriptedAnalyzer::always_yes());
    let publisher = Arc::new(RecordingPublisher::failing_first(1));
    let orch = orchestrator(
        vec![Box::new(StubFeed::items("Feed", vec![item.clone()]))],
        analyzer.clone(),
        publisher.clone(),
        history_in(&dir),
        settings(1, 1),
    );

    let first = orch.run_cycle_at(noon()).await.unwrap();
    assert_eq!(first.posted, 0);
    assert_eq!(first.publish_failures, 1);
    orch.with_history(|h| {
        let e = h.lookup(&item.identity).unwrap();
        assert_eq!(e.times_analyzed, 1);
        assert!(!e.is_posted());
    })
    .await;

    let second = orch.run_cycle_at(noon() + ChronoDuration::hours(1)).await.unwrap();
    assert_eq!(second.posted, 1);
    assert_eq!(second.already_posted, 0);
    orch.with_history(|h| {
        let e = h.lookup(&item.identity).unwrap();
        assert_eq!(e.times_analyzed, 2);
        assert!(e.is_posted());
        assert_eq!(e.prompt_variants_used.len(), 2);
    })
    .await;
    assert_eq!(publisher.sent_count(), 1);
}

#[tokio::test]
async fn posted_article_is_never_posted_again() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");
    let items = vec![article("Feed", "once"), article("Mirror", "once")];

    let publisher = Arc::new(RecordingPublisher::default());
    let orch = orchestrator(
        vec![Box::new(StubFeed::items("Feed", items.clone()))],
        Arc::new(ScriptedAnalyzer::always_yes()),
        publisher.clone(),
        HistoryStore::open(&path).0,
        settings(3, 3),
    );
    let first = orch.run_cycle_at(noon()).await.unwrap();
    assert_eq!(first.posted, 1);
    assert_eq!(first.duplicates, 1);

    for h in 1..4 {
        let r = orch.run_cycle_at(noon() + ChronoDuration::hours(h)).await.unwrap();
        assert_eq!(r.posted, 0);
        assert_eq!(r.already_posted, 1);
    }
    drop(orch);

    // A restart reads the same decision back from disk.
    let analyzer = Arc::new(ScriptedAnalyzer::always_yes());
    let reopened = orchestrator(
        vec![Box::new(StubFeed::items("Feed", items))],
        analyzer.clone(),
        publisher.clone(),
        HistoryStore::open(&path).0,
        settings(3, 3),
    );
    let r = reopened.run_cycle_at(noon() + ChronoDuration::hours(5)).await.unwrap();
    assert_eq!(r.posted, 0);
    assert_eq!(analyzer.call_count(), 0);
    assert_eq!(publisher.sent_count(), 1);
}

#[tokio::test]
async fn styles_rotate_across_candidates_and_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let analyzer = Arc::new(ScriptedAnalyzer::always_no());
    let items: Vec<_> = (0..2).map(|i| article("Feed", &format!("r{i}"))).collect();
    let orch = orchestrator(
        vec![Box::new(StubFeed::items("Feed", items))],
        analyzer.clone(),
        Arc::new(RecordingPublisher::default()),
        history_in(&dir),
        settings(1, 1),
    );

    orch.run_cycle_at(noon()).await.unwrap();
    orch.run_cycle_at(noon() + ChronoDuration::hours(1)).await.unwrap();
    assert_eq!(
        analyzer.styles(),
        vec!["original", "skeptic", "trend_spotter", "original"]
    );
}

#[tokio::test]
async fn new_articles_go_before_reanalysis() {
    let dir = tempfile::tempdir().unwrap();
    let old = article("Feed", "old");
    let fresh = article("Feed", "fresh");
    let mut history = history_in(&dir);
    history.record_analysis(&old.identity, "original", noon()).unwrap();

    let analyzer = Arc::new(ScriptedAnalyzer::always_no());
    let orch = orchestrator(
        vec![Box::new(StubFeed::items("Feed", vec![old, fresh]))],
        analyzer.clone(),
        Arc::new(RecordingPublisher::default()),
        history,
        settings(1, 1),
    );
    orch.run_cycle_at(noon()).await.unwrap();
    assert_eq!(analyzer.titles(), vec!["Story fresh", "Story old"]);
}

#[tokio::test]
async fn analysis_failure_leaves_history_alone() {
    let dir = tempfile::tempdir().unwrap();
    let bad = article("Feed", "bad");
    let good = article("Feed", "good");
    let bad_title = bad.title.clone();
    let analyzer = Arc::new(ScriptedAnalyzer::new(move |a| {
        if a.title == bad_title {
            Err(anyhow!("malformed model output"))
        } else {
            Ok(opportunity())
        }
    }));
    let orch = orchestrator(
        vec![Box::new(StubFeed::items("Feed", vec![bad.clone(), good.clone()]))],
        analyzer,
        Arc::new(RecordingPublisher::default()),
        history_in(&dir),
        settings(1, 1),
    );

    let r = orch.run_cycle_at(noon()).await.unwrap();
    assert_eq!(r.analysis_failures, 1);
    assert_eq!(r.posted, 1);
    orch.with_history(|h| {
        assert!(h.lookup(&bad.identity).is_none());
        assert!(h.lookup(&good.identity).unwrap().is_posted());
    })
    .await;
}

#[tokio::test]
async fn low_confidence_is_analyzed_but_not_posted() {
    let dir = tempfile::tempdir().unwrap();
    let item = article("Feed", "meh");
    let analyzer = Arc::new(ScriptedAnalyzer::new(|_| {
        Ok(vc_news_analyzer::Verdict {
            confidence: Some(0.2),
            ..opportunity()
        })
    }));
    let publisher = Arc::new(RecordingPublisher::default());
    let orch = orchestrator(
        vec![Box::new(StubFeed::items("Feed", vec![item.clone()]))],
        analyzer,
        publisher.clone(),
        history_in(&dir),
        settings(1, 1),
    );

    let r = orch.run_cycle_at(noon()).await.unwrap();
    assert_eq!((r.analyzed, r.qualified, r.posted), (1, 0, 0));
    assert_eq!(publisher.attempts.load(Ordering::SeqCst), 0);
    orch.with_history(|h| {
        let e = h.lookup(&item.identity).unwrap();
        assert_eq!(e.times_analyzed, 1);
        assert!(!e.is_posted());
    })
    .await;
}

#[tokio::test]
async fn analysis_cap_bounds_ai_calls() {
    let dir = tempfile::tempdir().unwrap();
    let many: Vec<_> = (0..10).map(|i| article("Feed", &format!("c{i}"))).collect();
    let analyzer = Arc::new(ScriptedAnalyzer::always_no());
    let mut s = settings(1, 1);
    s.max_analyses_per_tick = 4;
    let orch = orchestrator(
        vec![Box::new(StubFeed::items("Feed", many))],
        analyzer.clone(),
        Arc::new(RecordingPublisher::default()),
        history_in(&dir),
        s,
    );

    orch.run_cycle_at(noon()).await.unwrap();
    assert_eq!(analyzer.call_count(), 4);
}

#[tokio::test]
async fn image_comes_from_feed_or_resolver() {
    let dir = tempfile::tempdir().unwrap();
    let with_img = article("Feed", "img").with_image(Some("https://cdn.example.com/own.jpg".into()));
    let without = article("Feed", "noimg");
    let publisher = Arc::new(RecordingPublisher::default());
    let orch = orchestrator(
        vec![Box::new(StubFeed::items("Feed", vec![with_img, without]))],
        Arc::new(ScriptedAnalyzer::always_yes()),
        publisher.clone(),
        history_in(&dir),
        settings(2, 2),
    )
    .with_image_resolver(Arc::new(FixedImage("https://cdn.example.com/scraped.jpg")));

    orch.run_cycle_at(noon()).await.unwrap();
    let msgs = publisher.messages();
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0].image_url.as_deref(), Some("https://cdn.example.com/own.jpg"));
    assert_eq!(msgs[1].image_url.as_deref(), Some("https://cdn.example.com/scraped.jpg"));
    assert!(msgs[0].text.contains("*Title:* Story img"));
}

#[tokio::test]
async fn stale_entries_are_not_analyzed_and_old_history_is_pruned() {
    let dir = tempfile::tempdir().unwrap();
    let stale = article("Feed", "stale").with_publish_time(Some(noon() - ChronoDuration::days(10)));
    let mut history = history_in(&dir);
    history
        .record_analysis("ancient", "original", noon() - ChronoDuration::days(8))
        .unwrap();

    let analyzer = Arc::new(ScriptedAnalyzer::always_yes());
    let orch = orchestrator(
        vec![Box::new(StubFeed::items("Feed", vec![stale]))],
        analyzer.clone(),
        Arc::new(RecordingPublisher::default()),
        history,
        settings(1, 1),
    );

    let r = orch.run_cycle_at(noon()).await.unwrap();
    assert_eq!(r.stale, 1);
    assert_eq!(r.pruned, 1);
    assert_eq!(analyzer.call_count(), 0);
    orch.with_history(|h| assert!(h.lookup("ancient").is_none())).await;
}

#[tokio::test]
async fn overlapping_trigger_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(Notify::new());
    let analyzer = Arc::new(ScriptedAnalyzer::always_yes().gated(gate.clone()));
    let publisher = Arc::new(RecordingPublisher::default());
    let orch = Arc::new(orchestrator(
        vec![Box::new(StubFeed::items("Feed", vec![article("Feed", "slow")]))],
        analyzer.clone(),
        publisher.clone(),
        history_in(&dir),
        settings(1, 1),
    ));

    let mut phase = orch.subscribe_phase();
    let running = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.run_cycle_at(noon()).await })
    };
    tokio::time::timeout(
        Duration::from_secs(5),
        phase.wait_for(|p| *p == CyclePhase::Analyzing),
    )
    .await
    .expect("cycle reached analysis")
    .unwrap();

    let second = orch.run_cycle_at(noon()).await.unwrap();
    assert!(second.overlapped);
    assert_eq!(second.fetched, 0);

    gate.notify_one();
    let first = running.await.unwrap().unwrap();
    assert!(!first.overlapped);
    assert_eq!(first.posted, 1);
    assert_eq!(analyzer.call_count(), 1);
    assert_eq!(publisher.sent_count(), 1);
}

#[tokio::test]
async fn unwritable_history_aborts_the_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();
    let (history, _) = HistoryStore::open(blocker.join("history.json"));

    let publisher = Arc::new(RecordingPublisher::default());
    let orch = orchestrator(
        vec![Box::new(StubFeed::items("Feed", vec![article("Feed", "x")]))],
        Arc::new(ScriptedAnalyzer::always_yes()),
        publisher.clone(),
        history,
        settings(1, 1),
    );

    assert!(orch.run_cycle_at(noon()).await.is_err());
    assert_eq!(publisher.attempts.load(Ordering::SeqCst), 0);
    assert_eq!(orch.phase(), CyclePhase::Idle);
    orch.with_history(|h| assert!(h.is_empty())).await;
}
