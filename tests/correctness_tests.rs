//! End-to-end correctness tests for the shaping pipeline: router → shaper
//! → admission cache, driven by a manual clock.

use paramflow::{
    BlockReason, CacheConfig, ControlStrategy, ManualClock, MetricType, ParamValue, ParamsCache,
    Router, Rule, Verdict,
};
use std::sync::Arc;

fn router_at_zero() -> (Router, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(0));
    (Router::with_clock(clock.clone()), clock)
}

fn qps_reject(id: &str, resource: &str, threshold: i64) -> Rule {
    Rule {
        id: id.into(),
        resource: resource.into(),
        metric_type: MetricType::Qps,
        control_strategy: ControlStrategy::Reject,
        param_index: 0,
        threshold,
        duration_in_sec: 1,
        ..Rule::default()
    }
}

#[test]
fn first_touch_passes() {
    let (router, _clock) = router_at_zero();
    router.install(qps_reject("r", "api", 10)).unwrap();

    let args = [ParamValue::from("a")];
    assert_eq!(router.check("api", &args, 1), Verdict::Pass);
}

#[test]
fn exhaustion_blocks_the_eleventh_call() {
    let (router, _clock) = router_at_zero();
    router.install(qps_reject("r", "api", 10)).unwrap();

    let args = [ParamValue::from("a")];
    let mut passed = 0;
    let mut blocked = 0;
    for _ in 0..11 {
        match router.check("api", &args, 1) {
            Verdict::Pass => passed += 1,
            Verdict::Blocked { .. } => blocked += 1,
            Verdict::Wait { .. } => panic!("reject strategy never waits"),
        }
    }
    assert_eq!(passed, 10);
    assert_eq!(blocked, 1);
}

#[test]
fn window_rollover_refills_the_bucket() {
    let (router, clock) = router_at_zero();
    router.install(qps_reject("r", "api", 10)).unwrap();

    let args = [ParamValue::from("a")];
    for _ in 0..10 {
        assert_eq!(router.check("api", &args, 1), Verdict::Pass);
    }
    assert!(router.check("api", &args, 1).is_blocked());

    clock.set(1001);
    assert_eq!(router.check("api", &args, 1), Verdict::Pass);
    // The refilled window has threshold - 1 tokens left.
    for _ in 0..9 {
        assert_eq!(router.check("api", &args, 1), Verdict::Pass);
    }
    assert!(router.check("api", &args, 1).is_blocked());
}

#[test]
fn throttling_spaces_arrivals() {
    let (router, clock) = router_at_zero();
    router
        .install(Rule {
            control_strategy: ControlStrategy::Throttling,
            threshold: 2,
            max_queueing_time_ms: 2000,
            ..qps_reject("t", "api", 2)
        })
        .unwrap();

    let args = [ParamValue::from("b")];
    assert_eq!(router.check("api", &args, 1), Verdict::Pass);

    clock.set(100);
    assert_eq!(router.check("api", &args, 1), Verdict::Wait { ms: 400 });

    clock.set(200);
    assert_eq!(router.check("api", &args, 1), Verdict::Wait { ms: 800 });
}

#[test]
fn throttling_blocks_past_the_queueing_budget() {
    let (router, clock) = router_at_zero();
    router
        .install(Rule {
            control_strategy: ControlStrategy::Throttling,
            threshold: 1,
            max_queueing_time_ms: 2000,
            ..qps_reject("t", "api", 1)
        })
        .unwrap();

    let args = [ParamValue::from("b")];
    assert_eq!(router.check("api", &args, 1), Verdict::Pass);
    clock.set(1);
    assert!(matches!(
        router.check("api", &args, 1),
        Verdict::Wait { ms: 999 }
    ));
    clock.set(2);
    assert!(matches!(
        router.check("api", &args, 1),
        Verdict::Wait { ms: 1998 }
    ));
    clock.set(3);
    assert!(matches!(
        router.check("api", &args, 1),
        Verdict::Blocked {
            reason: BlockReason::QueueTimeExceeded,
            ..
        }
    ));
}

#[test]
fn concurrency_limits_in_flight_calls() {
    let (router, _clock) = router_at_zero();
    router
        .install(Rule {
            metric_type: MetricType::Concurrency,
            threshold: 3,
            ..qps_reject("c", "api", 3)
        })
        .unwrap();

    let args = [ParamValue::from("c")];
    for _ in 0..3 {
        assert_eq!(router.check("api", &args, 1), Verdict::Pass);
    }
    assert!(router.check("api", &args, 1).is_blocked());

    router.release("api", &args);
    assert_eq!(router.check("api", &args, 1), Verdict::Pass);
    assert!(router.check("api", &args, 1).is_blocked());
}

#[test]
fn hot_parameter_state_survives_a_flood_of_cold_keys() {
    let (router, _clock) = router_at_zero();
    router
        .install(Rule {
            params_max_capacity: 100,
            ..qps_reject("r", "api", 1)
        })
        .unwrap();

    // A hot key exhausts its single token.
    let hot = [ParamValue::from("hot")];
    assert_eq!(router.check("api", &hot, 1), Verdict::Pass);
    assert!(router.check("api", &hot, 1).is_blocked());

    // Keep the hot key's frequency up while cold keys pour through.
    for i in 0..5_000i64 {
        let cold = [ParamValue::from(i)];
        let _ = router.check("api", &cold, 1);
        if i % 10 == 0 {
            assert!(
                router.check("api", &hot, 1).is_blocked(),
                "hot key lost its counter after {i} cold keys"
            );
        }
    }
}

#[test]
fn recently_seen_parameters_stay_resident_under_pressure() {
    let (router, _clock) = router_at_zero();
    router
        .install(Rule {
            params_max_capacity: 100,
            ..qps_reject("r", "api", 1)
        })
        .unwrap();

    // 10 000 one-shot parameters at QPS; each first touch consumes the
    // only token of its bucket.
    for i in 0..10_000i64 {
        assert_eq!(router.check("api", &[ParamValue::from(i)], 1), Verdict::Pass);
    }

    // Re-probing a recent parameter hits its drained bucket (Blocked);
    // an evicted one would start a fresh bucket and pass.
    let still_counted = (10_000 - 80..10_000i64)
        .filter(|i| router.check("api", &[ParamValue::from(*i)], 1).is_blocked())
        .count();
    assert!(
        still_counted * 100 >= 80 * 95,
        "only {still_counted}/80 recent parameters kept their counters"
    );
}

#[test]
fn cache_capacity_is_respected_at_the_cache_api() {
    let cache: ParamsCache<ParamValue> = ParamsCache::new(CacheConfig::new(100));
    for i in 0..10_000i64 {
        cache.add_if_absent(ParamValue::from(i), 0);
        assert!(cache.len() <= 100);
    }
    let stats = cache.stats();
    assert_eq!(stats.insertions, 10_000);
    assert!(stats.evictions > 0);
}

#[test]
fn specific_items_route_to_their_own_thresholds() {
    let (router, _clock) = router_at_zero();
    let mut rule = qps_reject("r", "api", 1);
    rule.specific_items.insert(ParamValue::from("vip"), 3);
    router.install(rule).unwrap();

    let vip = [ParamValue::from("vip")];
    for _ in 0..3 {
        assert_eq!(router.check("api", &vip, 1), Verdict::Pass);
    }
    assert!(router.check("api", &vip, 1).is_blocked());

    let plain = [ParamValue::from("plain")];
    assert_eq!(router.check("api", &plain, 1), Verdict::Pass);
    assert!(router.check("api", &plain, 1).is_blocked());
}

#[test]
fn heterogeneous_parameter_kinds_coexist() {
    let (router, _clock) = router_at_zero();
    router.install(qps_reject("r", "api", 1)).unwrap();

    let kinds = [
        ParamValue::from(7i64),
        ParamValue::from(7u64),
        ParamValue::from(7.0f64),
        ParamValue::from("7"),
        ParamValue::from(true),
    ];
    // Same digit, five distinct parameter identities.
    for value in &kinds {
        let args = [value.clone()];
        assert_eq!(router.check("api", &args, 1), Verdict::Pass);
    }
    for value in &kinds {
        let args = [value.clone()];
        assert!(router.check("api", &args, 1).is_blocked());
    }
}

#[test]
fn batch_counts_consume_batch_tokens() {
    let (router, _clock) = router_at_zero();
    router.install(qps_reject("r", "api", 10)).unwrap();

    let args = [ParamValue::from("a")];
    assert_eq!(router.check("api", &args, 4), Verdict::Pass);
    assert_eq!(router.check("api", &args, 4), Verdict::Pass);
    // 2 tokens left, batch of 4 cannot be served.
    assert!(matches!(
        router.check("api", &args, 4),
        Verdict::Blocked {
            reason: BlockReason::TokenExhausted,
            ..
        }
    ));
    assert_eq!(router.check("api", &args, 2), Verdict::Pass);
}
