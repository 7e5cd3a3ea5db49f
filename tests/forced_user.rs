//! Operator-forced refreshes of a single user.

mod helpers;

use chrono::{TimeDelta, Utc};
use flywheel::flywheel::ports::{NeededAction, RefreshOrigin, UserStatus};
use flywheel::flywheel::{PassOutcome, PoolError, PoolSizes};
use helpers::{
    Harness, fetched_at, id_inside, minute, range_at, settings, small_pools, user, user_site,
};
use uuid::Uuid;

#[tokio::test]
async fn forced_refresh_waives_throttle_gate_and_migration() {
    let harness = Harness::new(settings());
    let id = Uuid::new_v4();

    let throttled = fetched_at(user_site(id, "BI"), Utc::now() - TimeDelta::seconds(30));
    let mut blocked = user_site(id, "BI");
    blocked.needed_action = NeededAction::Blocked;
    let mut migrating = user_site(id, "BI");
    migrating.migrating = true;
    let blacklisted = user_site(id, "YODLEE");
    harness.store.add_user(
        user(id, Uuid::new_v4()),
        vec![
            throttled.clone(),
            blocked.clone(),
            migrating.clone(),
            blacklisted,
        ],
    );

    harness.trigger.run_forced_user(id).await;

    let calls = harness.executor.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].origin, RefreshOrigin::FlywheelForced);
    assert_eq!(
        calls[0].user_site_ids,
        vec![throttled.id, blocked.id, migrating.id]
    );
}

#[tokio::test]
async fn forced_refresh_respects_one_off_compliance() {
    let harness = Harness::new(settings());
    let id = Uuid::new_v4();
    let mut one_off = user(id, Uuid::new_v4());
    one_off.one_off = true;

    let never_fetched = user_site(id, "BI");
    let fetched = fetched_at(user_site(id, "BI"), Utc::now() - TimeDelta::days(10));
    harness
        .store
        .add_user(one_off, vec![never_fetched.clone(), fetched]);

    harness.trigger.run_forced_user(id).await;

    let calls = harness.executor.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].user_site_ids, vec![never_fetched.id]);
    assert!(calls[0].one_off);
}

#[tokio::test]
async fn forced_refresh_with_nothing_eligible_sends_nothing() {
    let harness = Harness::new(settings());
    let id = Uuid::new_v4();
    let mut one_off = user(id, Uuid::new_v4());
    one_off.one_off = true;
    harness.store.add_user(
        one_off,
        vec![
            fetched_at(user_site(id, "BI"), Utc::now() - TimeDelta::days(1)),
            user_site(id, "YODLEE"),
        ],
    );

    harness.trigger.run_forced_user(id).await;
    assert!(harness.executor.calls().is_empty());
}

#[tokio::test]
async fn unknown_and_blocked_users_are_ignored() {
    let harness = Harness::new(settings());

    harness.trigger.run_forced_user(Uuid::new_v4()).await;

    let id = Uuid::new_v4();
    let mut blocked = user(id, Uuid::new_v4());
    blocked.status = UserStatus::Blocked;
    harness.store.add_user(blocked, vec![user_site(id, "BI")]);
    harness.trigger.run_forced_user(id).await;

    assert!(harness.executor.calls().is_empty());
}

#[tokio::test]
async fn forced_refresh_ignores_disabled_flag() {
    let harness = Harness::new(flywheel::config::FlywheelSettings {
        enabled: false,
        ..settings()
    });
    let id = Uuid::new_v4();
    harness
        .store
        .add_user(user(id, Uuid::new_v4()), vec![user_site(id, "BI")]);

    harness.trigger.run_forced_user(id).await;
    assert_eq!(harness.executor.calls().len(), 1);
}

#[tokio::test]
async fn triggered_refresh_runs_on_the_forced_pool() {
    let harness = Harness::new(settings());
    let id = Uuid::new_v4();
    harness
        .store
        .add_user(user(id, Uuid::new_v4()), vec![user_site(id, "BI")]);

    harness.trigger.trigger_forced_user(id).unwrap();
    harness.drain().await;

    assert_eq!(harness.executor.calls().len(), 1);
    assert_eq!(
        harness.trigger.trigger_forced_user(id),
        Err(PoolError::Closed { pool: "forced" })
    );
}

#[tokio::test]
async fn refresh_failure_is_contained() {
    let harness = Harness::new(settings());
    let id = Uuid::new_v4();
    harness
        .store
        .add_user(user(id, Uuid::new_v4()), vec![user_site(id, "BI")]);
    harness.executor.fail_for(id);

    harness.trigger.run_forced_user(id).await;
    assert_eq!(harness.executor.calls().len(), 1);
}

#[tokio::test]
async fn full_dispatch_queue_does_not_block_forced_refresh() {
    let harness = Harness::with_pool_sizes(
        settings(),
        PoolSizes {
            dispatch_workers: 1,
            dispatch_queue_capacity: 2,
            ..small_pools()
        },
    );
    let tenant = Uuid::new_v4();
    let m = minute(200);
    let range = range_at(4, m);
    for offset in 0..3 {
        let id = id_inside(range, offset);
        harness
            .store
            .add_user(user(id, tenant), vec![user_site(id, "BI")]);
    }

    let PassOutcome::Completed(summary) = harness.trigger.run_minute_pass(m).await else {
        panic!("expected a completed pass");
    };
    assert_eq!(summary.queued, 3);
    assert_eq!(harness.trigger.pool_stats()[1].in_flight, 3);

    let forced = Uuid::new_v4();
    harness
        .store
        .add_user(user(forced, tenant), vec![user_site(forced, "BI")]);

    // The dispatch pool is full; the forced refresh still gets a slot.
    harness.trigger.trigger_forced_user(forced).unwrap();
    harness.drain().await;

    let calls = harness.executor.calls();
    assert_eq!(calls.len(), 4);
    assert!(
        calls
            .iter()
            .any(|call| call.user_id == forced && call.origin == RefreshOrigin::FlywheelForced)
    );
}
