// tests/claiming.rs
mod common;

use common::{insert_job, owner_and_started, setup_db};

use chrono::{Duration as ChronoDuration, Utc};
use fleiss::jobs::{claim_next, ClaimOutcome, ClaimRequest, JobStore, PgJobStore};
use serial_test::serial;
use std::collections::HashSet;

fn default_queue() -> Vec<String> {
    vec!["default".to_string()]
}

fn request<'a>(queues: &'a [String], owner: &'a str) -> ClaimRequest<'a> {
    ClaimRequest {
        queues,
        owner,
        lease: None,
        max_attempts: 5,
    }
}

#[tokio::test]
#[serial] // no parallel DB interference
async fn racing_claimers_exactly_one_wins() {
    let Some(pool) = setup_db().await else { return };
    let store = PgJobStore::new(pool.clone());
    let now = Utc::now();
    let id = insert_job(&pool, "default", 10, now, None).await;

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .claim(id, &format!("worker-{i}"), now, None)
                .await
                .unwrap()
                .is_some()
        }));
    }

    let mut wins = 0;
    for h in handles {
        if h.await.unwrap() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1, "expected exactly one claimer to win");

    let (owner, started_at) = owner_and_started(&pool, id).await;
    assert!(owner.unwrap().starts_with("worker-"));
    assert!(started_at.is_some());
}

#[tokio::test]
#[serial]
async fn selection_respects_priority_then_schedule_then_id() {
    let Some(pool) = setup_db().await else { return };
    let store = PgJobStore::new(pool.clone());
    let now = Utc::now();

    let p20 = insert_job(&pool, "default", 20, now, None).await;
    let p5 = insert_job(&pool, "default", 5, now, None).await;
    let p10 = insert_job(&pool, "default", 10, now, None).await;

    let queues = default_queue();
    let mut order = Vec::new();
    while let ClaimOutcome::Claimed(job) =
        claim_next(&store, request(&queues, "solo"), now).await.unwrap()
    {
        order.push(job.id);
    }
    assert_eq!(order, vec![p5, p10, p20]);
}

#[tokio::test]
#[serial]
async fn equal_rank_is_served_by_id() {
    let Some(pool) = setup_db().await else { return };
    let store = PgJobStore::new(pool.clone());
    let now = Utc::now();

    let first = insert_job(&pool, "default", 10, now, None).await;
    let second = insert_job(&pool, "default", 10, now, None).await;
    assert!(first < second);

    let queues = default_queue();
    let a = store.find_next_eligible(&queues, now).await.unwrap().unwrap();
    assert_eq!(a.id, first);
    store.claim(a.id, "solo", now, None).await.unwrap().unwrap();

    let b = store.find_next_eligible(&queues, now).await.unwrap().unwrap();
    assert_eq!(b.id, second);
}

#[tokio::test]
#[serial]
async fn future_rows_and_other_queues_are_not_eligible() {
    let Some(pool) = setup_db().await else { return };
    let store = PgJobStore::new(pool.clone());
    let now = Utc::now();

    let future = insert_job(&pool, "default", 0, now + ChronoDuration::seconds(30), None).await;
    let _other = insert_job(&pool, "other", 0, now, None).await;

    let queues = default_queue();
    assert!(store.find_next_eligible(&queues, now).await.unwrap().is_none());

    let due = store
        .find_next_eligible(&queues, now + ChronoDuration::seconds(31))
        .await
        .unwrap()
        .expect("due once scheduled_at passes");
    assert_eq!(due.id, future);

    let both = vec!["default".to_string(), "other".to_string()];
    assert!(store.find_next_eligible(&both, now).await.unwrap().is_some());
}

#[tokio::test]
#[serial]
async fn concurrent_pollers_never_share_a_job() {
    let Some(pool) = setup_db().await else { return };
    let store = PgJobStore::new(pool.clone());
    let now = Utc::now();

    for _ in 0..30 {
        insert_job(&pool, "default", 10, now, None).await;
    }

    let mut handles = Vec::new();
    for w in 0..6 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let queues = default_queue();
            let owner = format!("poller-{w}");
            let mut req = request(&queues, &owner);
            req.max_attempts = 50;
            let mut mine = Vec::new();
            while let ClaimOutcome::Claimed(job) = claim_next(&store, req, now).await.unwrap() {
                mine.push(job.id);
            }
            mine
        }));
    }

    let mut seen = HashSet::new();
    for h in handles {
        for id in h.await.unwrap() {
            assert!(seen.insert(id), "job {id} was claimed twice");
        }
    }
    assert_eq!(seen.len(), 30);
}

#[tokio::test]
#[serial]
async fn lease_stamps_expires_at_on_claim() {
    let Some(pool) = setup_db().await else { return };
    let store = PgJobStore::new(pool.clone());
    let now = Utc::now();
    insert_job(&pool, "default", 10, now, None).await;

    let queues = default_queue();
    let mut req = request(&queues, "solo");
    req.lease = Some(std::time::Duration::from_secs(30));

    let ClaimOutcome::Claimed(job) = claim_next(&store, req, now).await.unwrap() else {
        panic!("expected a claim");
    };
    let deadline = job.expires_at.expect("lease sets a deadline");
    let drift = (deadline - (now + ChronoDuration::seconds(30))).num_milliseconds().abs();
    assert!(drift < 5, "deadline drifted by {drift}ms");
}
