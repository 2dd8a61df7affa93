use crate::gemini::ResponseGenerator;
use crate::ledger::Ledger;
use crate::models::PostType;
use crate::responder::{MentionResponder, ResponderError, LOOKBACK_POSTS};
use crate::tests::fakes::{bot_address, post, user_address, FakeGenerator, FakeLedger};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn setup(
    ledger: &Arc<FakeLedger>,
    generator: &Arc<FakeGenerator>,
    with_identity: bool,
) -> MentionResponder {
    let identity = with_identity.then(bot_address);
    MentionResponder::new(
        ledger.clone() as Arc<dyn Ledger>,
        generator.clone() as Arc<dyn ResponseGenerator>,
        identity,
    )
}

/// Posts 1 (deleted mention) and 2 (live mention), post count 3.
fn ledger_with_one_live_mention() -> Arc<FakeLedger> {
    let ledger = Arc::new(FakeLedger::new());
    let mut deleted = post(1, "hey @polyx are you there?", PostType::Original);
    deleted.deleted = true;
    ledger.insert(deleted);
    ledger.insert(post(2, "@PolyX what is gas?", PostType::Original));
    ledger
}

#[tokio::test]
async fn test_poll_replies_to_live_mention_only() {
    let ledger = ledger_with_one_live_mention();
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, true);

    let summary = responder.poll_once().await.unwrap();

    assert_eq!(summary.examined, 2);
    assert_eq!(summary.responded, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.last_checked_post_id, 2);
    assert_eq!(responder.last_checked_post_id().await, 2);

    let comments = ledger.comments();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].target_post_id, 2);
    assert_eq!(comments[0].bot, bot_address());
    assert_eq!(comments[0].text, "gm! happy to help.");

    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("@PolyX what is gas?"));
}

#[tokio::test]
async fn test_second_poll_with_no_new_posts_does_nothing() {
    let ledger = ledger_with_one_live_mention();
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, true);

    responder.poll_once().await.unwrap();
    let fetched_before = ledger.fetched().len();

    let summary = responder.poll_once().await.unwrap();
    assert_eq!(summary.examined, 0);
    assert_eq!(summary.last_checked_post_id, 2);
    assert_eq!(ledger.fetched().len(), fetched_before);
    assert_eq!(ledger.comments().len(), 1);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_first_poll_looks_back_fifty_posts() {
    let ledger = Arc::new(FakeLedger::new());
    ledger.set_post_count(500);
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, true);

    let summary = responder.poll_once().await.unwrap();

    let expected: Vec<u64> = (500 - LOOKBACK_POSTS..500).collect();
    assert_eq!(ledger.fetched(), expected);
    assert_eq!(summary.examined, LOOKBACK_POSTS as usize);
    assert_eq!(summary.last_checked_post_id, 499);
}

#[tokio::test]
async fn test_first_poll_on_small_ledger_starts_at_one() {
    let ledger = Arc::new(FakeLedger::new());
    ledger.set_post_count(4);
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, true);

    responder.poll_once().await.unwrap();
    assert_eq!(ledger.fetched(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_empty_ledger_is_a_no_op() {
    let ledger = Arc::new(FakeLedger::new());
    ledger.set_post_count(1);
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, true);

    let summary = responder.poll_once().await.unwrap();
    assert_eq!(summary.examined, 0);
    assert!(ledger.fetched().is_empty());
    assert_eq!(responder.last_checked_post_id().await, 0);
}

#[tokio::test]
async fn test_poll_only_scans_new_posts() {
    let ledger = ledger_with_one_live_mention();
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, true);

    responder.poll_once().await.unwrap();
    ledger.insert(post(3, "nothing to see", PostType::Original));
    ledger.insert(post(4, "polyx, summarize this", PostType::Quote));

    let summary = responder.poll_once().await.unwrap();
    assert_eq!(summary.examined, 2);
    assert_eq!(summary.responded, 1);
    assert_eq!(summary.last_checked_post_id, 4);
    assert_eq!(&ledger.fetched()[2..], &[3, 4]);
    assert_eq!(ledger.comments()[1].target_post_id, 4);
}

#[tokio::test]
async fn test_missing_posts_are_skipped() {
    let ledger = Arc::new(FakeLedger::new());
    ledger.insert(post(3, "@polyx hi", PostType::Original));
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, true);

    let summary = responder.poll_once().await.unwrap();
    assert_eq!(ledger.fetched(), vec![1, 2, 3]);
    assert_eq!(summary.examined, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.responded, 1);
}

#[tokio::test]
async fn test_generation_failure_releases_claim_and_is_not_rescanned() {
    let ledger = ledger_with_one_live_mention();
    let generator = Arc::new(FakeGenerator::new());
    generator.fail.store(true, Ordering::SeqCst);
    let responder = setup(&ledger, &generator, true);

    let summary = responder.poll_once().await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.responded, 0);
    assert_eq!(summary.last_checked_post_id, 2);
    assert!(ledger.comments().is_empty());

    // Released: a fresh claim succeeds.
    assert!(!responder.try_claim(2).await);
    responder.release(2).await;

    // The mark moved past post 2, so the poller does not revisit it.
    generator.fail.store(false, Ordering::SeqCst);
    let fetched_before = ledger.fetched().len();
    responder.poll_once().await.unwrap();
    assert_eq!(ledger.fetched().len(), fetched_before);
    assert!(ledger.comments().is_empty());

    // An inline trigger can still answer it.
    let handle = responder
        .on_post_submitted(2, user_address(), "@PolyX what is gas?")
        .await
        .expect("claim should be free again");
    handle.await.unwrap();
    assert_eq!(ledger.comments().len(), 1);
    assert_eq!(ledger.comments()[0].target_post_id, 2);
}

#[tokio::test]
async fn test_write_failure_releases_claim() {
    let ledger = ledger_with_one_live_mention();
    ledger.fail_writes.store(true, Ordering::SeqCst);
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, true);

    let summary = responder.poll_once().await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(generator.calls(), 1);
    assert!(!responder.try_claim(2).await);
}

#[tokio::test]
async fn test_poll_without_identity_is_not_configured() {
    let ledger = ledger_with_one_live_mention();
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, false);

    let result = responder.poll_once().await;
    assert!(matches!(result, Err(ResponderError::NotConfigured)));
    assert_eq!(ledger.count_reads(), 0);
    assert!(ledger.fetched().is_empty());
}

#[tokio::test]
async fn test_post_count_failure_keeps_mark() {
    let ledger = ledger_with_one_live_mention();
    ledger.fail_count.store(true, Ordering::SeqCst);
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, true);

    let result = responder.poll_once().await;
    assert!(matches!(result, Err(ResponderError::Ledger(_))));
    assert_eq!(responder.last_checked_post_id().await, 0);

    // The lookback still applies on the next successful cycle.
    ledger.fail_count.store(false, Ordering::SeqCst);
    let summary = responder.poll_once().await.unwrap();
    assert_eq!(ledger.fetched(), vec![1, 2]);
    assert_eq!(summary.responded, 1);
}

#[tokio::test]
async fn test_poller_skips_comments() {
    let ledger = ledger_with_one_live_mention();
    let mut comment = post(3, "@polyx thoughts?", PostType::Comment);
    comment.reference_id = 2;
    ledger.insert(comment);
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, true);

    let summary = responder.poll_once().await.unwrap();
    assert_eq!(summary.responded, 1);
    assert!(ledger.comments().iter().all(|c| c.target_post_id == 2));
    // Not claimed, so the inline path can still take it.
    assert!(!responder.try_claim(3).await);
}

#[tokio::test]
async fn test_inline_then_poll_replies_once() {
    let ledger = ledger_with_one_live_mention();
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, true);

    let handle = responder
        .on_post_submitted(2, user_address(), "@PolyX what is gas?")
        .await
        .expect("mention should trigger");
    handle.await.unwrap();
    assert_eq!(ledger.comments().len(), 1);

    let summary = responder.poll_once().await.unwrap();
    assert_eq!(summary.responded, 0);
    assert!(!ledger.fetched().contains(&2));
    assert_eq!(ledger.comments().len(), 1);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_inline_without_mention_does_nothing() {
    let ledger = ledger_with_one_live_mention();
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, true);

    let handle = responder
        .on_post_submitted(5, user_address(), "just a regular post")
        .await;
    assert!(handle.is_none());
    // Never claimed.
    assert!(!responder.try_claim(5).await);
}

#[tokio::test]
async fn test_inline_duplicate_trigger_is_ignored() {
    let ledger = ledger_with_one_live_mention();
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, true);

    let first = responder
        .on_post_submitted(2, user_address(), "@polyx hi")
        .await;
    let second = responder
        .on_post_submitted(2, user_address(), "@polyx hi")
        .await;
    assert!(first.is_some());
    assert!(second.is_none());
    first.unwrap().await.unwrap();
    assert_eq!(ledger.comments().len(), 1);
}

#[tokio::test]
async fn test_inline_without_identity_releases_claim() {
    let ledger = ledger_with_one_live_mention();
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, false);

    let handle = responder
        .on_post_submitted(2, user_address(), "@polyx hi")
        .await
        .expect("mention should still be claimed");
    handle.await.unwrap();

    assert!(ledger.comments().is_empty());
    assert!(!responder.try_claim(2).await);
}

#[tokio::test]
async fn test_inline_comment_replies_on_parent() {
    let ledger = ledger_with_one_live_mention();
    ledger.insert(post(3, "Polygon fees are going up", PostType::Original));
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, true);

    let handle = responder
        .on_comment_submitted(4, 3, user_address(), "@polyx is that true?")
        .await
        .expect("comment mention should trigger");
    handle.await.unwrap();

    let comments = ledger.comments();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].target_post_id, 3);

    let prompt = &generator.prompts()[0];
    assert!(prompt.contains("Polygon fees are going up"));
    assert!(prompt.contains("@polyx is that true?"));

    // The comment's ID holds the claim.
    assert!(responder.try_claim(4).await);
}

#[tokio::test]
async fn test_inline_comment_with_missing_parent_releases_claim() {
    let ledger = ledger_with_one_live_mention();
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, true);

    let handle = responder
        .on_comment_submitted(4, 99, user_address(), "@polyx is that true?")
        .await
        .unwrap();
    handle.await.unwrap();

    assert!(ledger.comments().is_empty());
    assert_eq!(generator.calls(), 0);
    assert!(!responder.try_claim(4).await);
}

#[tokio::test]
async fn test_inline_and_poll_race_reply_once() {
    let ledger = ledger_with_one_live_mention();
    let generator = Arc::new(FakeGenerator::with_delay(Duration::from_millis(20)));
    let responder = setup(&ledger, &generator, true);

    let (poll, inline) = tokio::join!(
        responder.poll_once(),
        responder.on_post_submitted(2, user_address(), "@PolyX what is gas?")
    );
    poll.unwrap();
    if let Some(handle) = inline {
        handle.await.unwrap();
    }

    let comments = ledger.comments();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].target_post_id, 2);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_respond_to_mention_commits_reply() {
    let ledger = ledger_with_one_live_mention();
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, true);

    let direct = responder
        .respond_to_mention(2, user_address(), "@PolyX what is gas?")
        .await
        .unwrap();
    assert_eq!(direct.response, "gm! happy to help.");
    let receipt = direct.receipt.expect("reply should be committed");
    assert_eq!(receipt.committed_id, Some(10_001));

    let again = responder
        .respond_to_mention(2, user_address(), "@PolyX what is gas?")
        .await;
    assert!(matches!(again, Err(ResponderError::AlreadyClaimed(2))));
    assert_eq!(ledger.comments().len(), 1);
}

#[tokio::test]
async fn test_respond_to_mention_rejects_non_mention() {
    let ledger = ledger_with_one_live_mention();
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, true);

    let result = responder
        .respond_to_mention(2, user_address(), "no bot here")
        .await;
    assert!(matches!(result, Err(ResponderError::NotMentioned)));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn test_respond_to_mention_without_identity_only_generates() {
    let ledger = ledger_with_one_live_mention();
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, false);

    let direct = responder
        .respond_to_mention(2, user_address(), "@polyx hi")
        .await
        .unwrap();
    assert_eq!(direct.response, "gm! happy to help.");
    assert!(direct.receipt.is_none());
    assert!(ledger.comments().is_empty());
    assert!(!responder.try_claim(2).await);
}

#[tokio::test]
async fn test_respond_to_mention_failure_is_returned() {
    let ledger = ledger_with_one_live_mention();
    let generator = Arc::new(FakeGenerator::new());
    generator.fail.store(true, Ordering::SeqCst);
    let responder = setup(&ledger, &generator, true);

    let result = responder
        .respond_to_mention(2, user_address(), "@polyx hi")
        .await;
    assert!(matches!(result, Err(ResponderError::Generation(_))));
    assert!(!responder.try_claim(2).await);
}

#[tokio::test]
async fn test_start_polling_runs_cycles_until_shutdown() {
    let ledger = ledger_with_one_live_mention();
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, true);

    responder.start_polling(Duration::from_millis(10)).await;
    // A second start is a no-op.
    responder.start_polling(Duration::from_millis(10)).await;
    assert!(responder.is_polling().await);

    tokio::time::sleep(Duration::from_millis(60)).await;
    responder.shutdown().await;
    assert!(!responder.is_polling().await);

    let reads = ledger.count_reads();
    assert!(reads >= 2, "expected several cycles, got {}", reads);
    assert_eq!(ledger.comments().len(), 1);

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(ledger.count_reads(), reads);
}

#[tokio::test]
async fn test_stop_polling_prevents_further_cycles() {
    let ledger = ledger_with_one_live_mention();
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, true);

    responder.start_polling(Duration::from_millis(10)).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    let handle = responder.stop_polling().await.expect("poller was running");
    // Let an in-flight cycle finish.
    handle.await.unwrap();

    let reads = ledger.count_reads();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(ledger.count_reads(), reads);
    assert!(!responder.is_polling().await);
    assert!(responder.stop_polling().await.is_none());
}

#[tokio::test]
async fn test_stop_during_slow_cycle_starts_no_new_cycle() {
    // The cycle outlasts the interval, so the next tick is already due when
    // it finishes.
    for _ in 0..20 {
        let ledger = Arc::new(FakeLedger::with_count_delay(Duration::from_millis(40)));
        ledger.insert(post(1, "gm", PostType::Original));
        let generator = Arc::new(FakeGenerator::new());
        let responder = setup(&ledger, &generator, true);

        responder.start_polling(Duration::from_millis(5)).await;
        tokio::time::sleep(Duration::from_millis(15)).await;

        let handle = responder.stop_polling().await.expect("poller was running");
        let reads_at_stop = ledger.count_reads();
        handle.await.unwrap();

        assert!(reads_at_stop >= 1);
        assert_eq!(ledger.count_reads(), reads_at_stop);
    }
}

#[tokio::test]
async fn test_start_polling_without_identity_is_disabled() {
    let ledger = ledger_with_one_live_mention();
    let generator = Arc::new(FakeGenerator::new());
    let responder = setup(&ledger, &generator, false);

    responder.start_polling(Duration::from_millis(10)).await;
    assert!(!responder.is_polling().await);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(ledger.count_reads(), 0);
}
