//! Performance benchmarks for critical server systems

use server::config::{PlannerConfig, ServerConfig, Sight};
use server::hub::Hub;
use server::planner::{Frontier, PathPlanner, PlanError};
use server::world::{GuardSpawn, MapData, WorldModel};
use shared::{decode_client_message, Obstacle, PlayerUpdate, Position, GUARD_RADIUS};
use std::time::{Duration, Instant};

/// A corridor map with a few walls to route around
fn maze() -> Vec<Obstacle> {
    vec![
        Obstacle::new(100.0, -400.0, 20.0, 600.0),
        Obstacle::new(300.0, -200.0, 20.0, 600.0),
        Obstacle::new(500.0, -400.0, 20.0, 600.0),
        Obstacle::new(-100.0, -420.0, 800.0, 20.0),
        Obstacle::new(-100.0, 400.0, 800.0, 20.0),
    ]
}

/// Benchmarks planning across a walled map
#[test]
fn benchmark_planner_through_maze() {
    let world = WorldModel::new(&maze(), &[], GUARD_RADIUS);
    let planner = PathPlanner::default();

    let iterations = 5;
    let start = Instant::now();
    let mut planned = 0;

    for _ in 0..iterations {
        match planner.plan(&world, Position::new(0.0, 0.0), Position::new(650.0, 0.0)) {
            Ok(actions) => {
                assert_eq!(actions.len() % 12, 0);
                planned += 1;
            }
            Err(e) => assert!(matches!(
                e,
                PlanError::DepthLimitExceeded | PlanError::TimeLimitExceeded
            )),
        }
    }

    let duration = start.elapsed();
    println!(
        "Maze planning: {} iterations ({} planned) in {:?} ({:.2} ms/iter)",
        iterations,
        planned,
        duration,
        duration.as_secs_f64() * 1000.0 / iterations as f64
    );

    // Every search is bounded by the 2 second budget
    assert!(duration < Duration::from_secs(2 * iterations as u64 + 1));
}

/// Benchmarks the worst case: nothing reachable
#[test]
fn benchmark_planner_exhausts_small_pocket() {
    let ring = vec![
        Obstacle::new(-100.0, -100.0, 200.0, 10.0),
        Obstacle::new(-100.0, 90.0, 200.0, 10.0),
        Obstacle::new(-100.0, -100.0, 10.0, 200.0),
        Obstacle::new(90.0, -100.0, 10.0, 200.0),
    ];
    let world = WorldModel::new(&ring, &[], GUARD_RADIUS);
    let planner = PathPlanner::default();

    let iterations = 50;
    let start = Instant::now();

    for _ in 0..iterations {
        let result = planner.plan(&world, Position::ORIGIN, Position::new(800.0, 0.0));
        assert_eq!(result, Err(PlanError::NoPathFound));
    }

    let duration = start.elapsed();
    println!(
        "Pocket exhaustion: {} iterations in {:?} ({:.2} ms/iter)",
        iterations,
        duration,
        duration.as_secs_f64() * 1000.0 / iterations as f64
    );

    assert!(duration.as_secs() < 10);
}

/// Benchmarks the line of sight ray march
#[test]
fn benchmark_line_of_sight() {
    let world = WorldModel::new(&maze(), &[], GUARD_RADIUS);
    let sight = Sight::default();
    let from = Position::new(0.0, 0.0);
    let to = Position::new(700.0, 250.0);

    let iterations = 10_000;
    let start = Instant::now();
    let mut visible = 0;

    for _ in 0..iterations {
        if world.can_see(&from, &to, &sight) {
            visible += 1;
        }
    }

    let duration = start.elapsed();
    println!(
        "Line of sight: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(visible, 0);
    assert!(duration.as_secs() < 5);
}

/// Benchmarks the frontier under a push-heavy load
#[test]
fn benchmark_frontier() {
    let iterations = 100_000;
    let start = Instant::now();

    let mut frontier = Frontier::new();
    for i in 0..iterations {
        frontier.push(((i * 7919) % 1000) as f32, i);
    }
    let mut last = f32::MIN;
    let mut popped = 0;
    while let Some(node) = frontier.pop() {
        let priority = ((node * 7919) % 1000) as f32;
        assert!(priority >= last);
        last = priority;
        popped += 1;
    }

    let duration = start.elapsed();
    println!("Frontier: {} push/pop pairs in {:?}", iterations, duration);

    assert_eq!(popped, iterations);
    assert!(duration.as_secs() < 5);
}

/// Benchmarks decoding of browser update frames
#[test]
fn benchmark_update_decoding() {
    let frame = PlayerUpdate {
        x: 120.5,
        y: -33.0,
        rotation: 1.2,
        interaction: Some("coin4".to_string()),
        detected_by: None,
    }
    .to_frame()
    .unwrap();

    let iterations = 50_000;
    let start = Instant::now();

    for _ in 0..iterations {
        assert!(decode_client_message(&frame).unwrap().is_some());
    }

    let duration = start.elapsed();
    println!(
        "Update decoding: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 5);
}

/// Benchmarks a full think pass with several patrolling guards
#[test]
fn benchmark_hub_think_pass() {
    let map = MapData {
        obstacles: maze(),
        guards: (0..8)
            .map(|i| GuardSpawn {
                id: format!("guard{}", i),
                x: 0.0,
                y: -300.0 + 80.0 * i as f32,
                rotation: 0.0,
                patrol_points: vec![Position::new(50.0, 350.0), Position::new(50.0, -350.0)],
            })
            .collect(),
        ..MapData::default()
    };
    let config = ServerConfig {
        planner: PlannerConfig {
            time_limit: Duration::from_millis(500),
            ..PlannerConfig::default()
        },
        ..ServerConfig::default()
    };

    let start = Instant::now();
    tokio_test::block_on(async {
        let hub = Hub::new(&map, &config);
        for _ in 0..5 {
            hub.think().await;
            for _ in 0..12 {
                hub.move_guards().await;
            }
        }
    });
    let duration = start.elapsed();
    println!("Hub think passes: 5 rounds for 8 guards in {:?}", duration);

    assert!(duration.as_secs() < 30);
}
