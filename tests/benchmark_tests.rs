//! Performance benchmarks for critical replication paths

use peer::config::PlayerConfig;
use peer::input::BotInput;
use peer::{DistributedWorld, LocalGroup, Simulation};
use shared::geometry::{intersects, reach, Polygon, Vector2};
use shared::{decode, encode, AgentState, DeltaMessage, EntityId, Message, Pose, WorldDimensions};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;

/// Benchmarks the two-phase intersection test
#[test]
fn benchmark_intersection() {
    let a = Polygon::oriented_rect(Vector2::new(100.0, 100.0), 32.0, 32.0, 30.0);
    let near = Polygon::oriented_rect(Vector2::new(120.0, 110.0), 32.0, 32.0, 75.0);
    let far = Polygon::oriented_rect(Vector2::new(900.0, 500.0), 32.0, 32.0, 0.0);
    let r = reach(32.0, 32.0);

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let _ = intersects(&a, r, &near, r);
        let _ = intersects(&a, r, &far, r);
    }

    let duration = start.elapsed();
    println!(
        "Intersection: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(intersects(&a, r, &near, r).is_some());
    assert!(intersects(&a, r, &far, r).is_none());
    // Should complete in under 500ms for 100k iterations
    assert!(duration.as_millis() < 500);
}

/// Benchmarks encoding and decoding of a busy delta
#[test]
fn benchmark_delta_serialization() {
    let mut delta = DeltaMessage::default();
    for i in 0..16 {
        delta.push_agent_state(AgentState::spawning(
            EntityId::random(),
            Pose::new(i as f32 * 10.0, 20.0, 45.0),
            0,
        ));
        delta.damaged_agents.push(EntityId::random());
        delta.removed_projectiles.push(EntityId::random());
    }
    let message = Message::Delta(delta);

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = encode(&message).unwrap();
        let _: Message = decode(&bytes).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Delta round trip: {} iterations in {:?} ({:.2} µs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 1s for 10k iterations
    assert!(duration.as_millis() < 1_000);
}

/// Benchmarks reconciliation ticks with many local bots
#[tokio::test]
async fn benchmark_reconciliation_ticks() {
    let group = LocalGroup::new();
    let peer = Arc::new(DistributedWorld::with_seed(
        Arc::new(group.endpoint()),
        Handle::current(),
        1,
    ));
    peer.connect("bench", WorldDimensions::new(40, 24)).await.unwrap();
    for _ in 0..10 {
        peer.create_obstacle().unwrap();
    }
    for i in 0..16 {
        peer.spawn_agent_at(&PlayerConfig::new(format!("bot-{}", i)), BotInput::new(i), 0)
            .unwrap();
    }

    let mut simulation = Simulation::with_seed(Arc::clone(&peer), 2);
    let ticks = 300u64;
    let start = Instant::now();

    for tick in 0..ticks {
        simulation.tick(3_000 + tick * 33, 0.033).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Reconciliation: {} ticks in {:?} ({:.2} µs/tick)",
        ticks,
        duration,
        duration.as_micros() as f64 / ticks as f64
    );

    let world = peer.world().unwrap();
    assert_eq!(world.agents().len(), 16);
    for agent in world.agents() {
        let pose = agent.state().pose;
        assert!(world.arena().contains(pose.x, pose.y));
    }
    // Should complete in under 5s for 300 ticks
    assert!(duration.as_secs() < 5);
}
