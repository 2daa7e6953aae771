//! Graph behavior against in-memory artifacts.

use exrun::sink::{NullSink, RecordingSink, Verbosity};
use exrun::task::{TaskContext, TaskResult};
use exrun::{
    Action, Artifact, Graph, GraphError, MTime, NodeId, ProductionId, ProductionState, RuleId,
    RuleState,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

/// An artifact whose modification time is set by the test.
struct FakeFile {
    mtime: Mutex<MTime>,
}

impl FakeFile {
    fn new(mtime: MTime) -> Arc<Self> {
        Arc::new(FakeFile {
            mtime: Mutex::new(mtime),
        })
    }
}

impl Artifact for FakeFile {
    fn local_time(&self) -> MTime {
        *self.mtime.lock().unwrap()
    }
}

struct Noop;
impl Action for Noop {
    fn execute(&self, _ctx: &TaskContext) -> anyhow::Result<TaskResult> {
        Ok(TaskResult::success())
    }
}

fn stamp(secs: u64) -> MTime {
    MTime::Stamp(UNIX_EPOCH + Duration::from_secs(secs))
}

fn file(g: &Graph, name: &str, mtime: MTime) -> ProductionId {
    g.add_production(name, FakeFile::new(mtime)).unwrap()
}

fn rule(g: &Graph, name: &str, requires: &[ProductionId], produces: &[ProductionId]) -> RuleId {
    let r = g.add_rule(name, Arc::new(Noop)).unwrap();
    g.link_requires(r, requires.iter().copied()).unwrap();
    g.link_produces(r, produces.iter().copied()).unwrap();
    r
}

fn quiet() -> Graph {
    Graph::with_sink(Arc::new(NullSink))
}

#[test]
fn end_to_end() -> anyhow::Result<()> {
    let g = quiet();
    let f1 = file(&g, "F1", stamp(10));
    let f2 = file(&g, "F2", MTime::Missing);
    let r1 = rule(&g, "R1", &[f1], &[f2]);
    let t = g.add_target("T")?;
    g.link_target(t, [f2])?;
    g.complete(None)?;

    assert_eq!(g.production_state(f1), ProductionState::Current);
    assert_eq!(g.rule_state(r1), RuleState::Outdated);
    assert_eq!(g.production_state(f2), ProductionState::Outdated);

    let roots = [NodeId::Target(t)];
    assert_eq!(g.ready(&roots), vec![r1]);

    g.set_rule_state(r1, RuleState::Running);
    assert!(g.ready(&roots).is_empty());
    assert_eq!(g.production_state(f2), ProductionState::Outdated);

    g.set_rule_state(r1, RuleState::Ok);
    assert_eq!(g.production_state(f2), ProductionState::Current);
    assert!(g.ready(&roots).is_empty());
    Ok(())
}

#[test]
fn failure_blocks_downstream() -> anyhow::Result<()> {
    let g = quiet();
    let f1 = file(&g, "F1", stamp(10));
    let f2 = file(&g, "F2", MTime::Missing);
    let f3 = file(&g, "F3", MTime::Missing);
    let r1 = rule(&g, "R1", &[f1], &[f2]);
    let r2 = rule(&g, "R2", &[f2], &[f3]);
    let t = g.add_target("T")?;
    g.link_target(t, [f3])?;
    g.complete(None)?;

    assert_eq!(g.rule_state(r2), RuleState::Outdated);
    assert_eq!(g.ready(&[t.into()]), vec![r1]);

    g.set_rule_state(r1, RuleState::Running);
    g.set_rule_state(r1, RuleState::Failed);
    assert_eq!(g.production_state(f2), ProductionState::Failed);
    assert_eq!(g.rule_state(r2), RuleState::Blocked);
    assert_eq!(g.production_state(f3), ProductionState::Blocked);
    assert!(g.ready(&[t.into()]).is_empty());
    Ok(())
}

#[test]
fn cascading_failure() -> anyhow::Result<()> {
    let g = quiet();
    let src = file(&g, "src", stamp(1));
    let p = file(&g, "P", MTime::Missing);
    let q1 = file(&g, "Q1", MTime::Missing);
    let q2 = file(&g, "Q2", MTime::Missing);
    let q3 = file(&g, "Q3", MTime::Missing);
    rule(&g, "R0", &[src], &[p]);
    let r1 = rule(&g, "R1", &[p], &[q1]);
    let r2 = rule(&g, "R2", &[p], &[q2]);
    // Two hops away, and needing both blocked outputs.
    let r3 = rule(&g, "R3", &[q1, q2], &[q3]);
    g.complete(Some("all"))?;

    g.set_production_state(p, ProductionState::Failed);
    for r in [r1, r2, r3] {
        assert_eq!(g.rule_state(r), RuleState::Blocked);
    }
    for q in [q1, q2, q3] {
        assert_eq!(g.production_state(q), ProductionState::Blocked);
    }
    Ok(())
}

#[test]
fn cycle_path() -> anyhow::Result<()> {
    let g = quiet();
    let a = file(&g, "A", stamp(1));
    let b = file(&g, "B", stamp(1));
    let ra = rule(&g, "RA", &[b], &[a]);
    let _rb = rule(&g, "RB", &[a], &[b]);
    let t = g.add_target("T")?;
    g.link_target(t, [a])?;

    let cycle = match g.complete(None) {
        Err(GraphError::Cycle(cycle)) => cycle,
        other => panic!("expected cycle, got {:?}", other),
    };
    assert_eq!(cycle.len(), 4);
    // Walking the reported cycle with wraparound follows the links.
    let start = cycle.iter().position(|n| n == "A").unwrap();
    let walk: Vec<&str> = (0..=4)
        .map(|i| cycle[(start + i) % 4].as_str())
        .collect();
    assert_eq!(walk, vec!["A", "RA", "B", "RB", "A"]);
    assert_eq!(g.produced_by(a), Some(ra));
    Ok(())
}

#[test]
fn staleness() -> anyhow::Result<()> {
    for (out_time, expected) in [
        (stamp(50), RuleState::Outdated),
        (stamp(150), RuleState::Ok),
        (MTime::Missing, RuleState::Outdated),
    ] {
        let g = quiet();
        let input = file(&g, "in", stamp(100));
        let out = file(&g, "out", out_time);
        let r = rule(&g, "r", &[input], &[out]);
        g.complete(Some("all"))?;
        assert_eq!(g.rule_state(r), expected, "output at {:?}", out_time);
    }
    Ok(())
}

#[test]
fn no_requirements() -> anyhow::Result<()> {
    let g = quiet();
    let a = file(&g, "a", stamp(5));
    let b = file(&g, "b", MTime::Missing);
    let made = rule(&g, "made", &[], &[a]);
    let to_make = rule(&g, "to_make", &[], &[b]);
    g.complete(Some("all"))?;
    assert_eq!(g.rule_state(made), RuleState::Ok);
    assert_eq!(g.production_state(a), ProductionState::Current);
    assert_eq!(g.rule_state(to_make), RuleState::Outdated);
    assert!(g.is_ready(to_make));
    Ok(())
}

#[test]
fn readiness() -> anyhow::Result<()> {
    let g = quiet();
    let src = file(&g, "src", stamp(1));
    let a = file(&g, "a", MTime::Missing);
    let b = file(&g, "b", MTime::Missing);
    let out = file(&g, "out", MTime::Missing);
    let ra = rule(&g, "ra", &[src], &[a]);
    let rb = rule(&g, "rb", &[src], &[b]);
    let r = rule(&g, "r", &[a, b], &[out]);
    let t = g.add_target("t")?;
    g.link_target(t, [out])?;
    g.complete(None)?;

    assert!(!g.is_ready(r));
    assert_eq!(g.ready(&[t.into()]), vec![ra, rb]);

    g.set_rule_state(ra, RuleState::Running);
    g.set_rule_state(ra, RuleState::Ok);
    assert!(!g.is_ready(r));
    assert_eq!(g.ready(&[t.into()]), vec![rb]);

    g.set_rule_state(rb, RuleState::Running);
    g.set_rule_state(rb, RuleState::Ok);
    assert!(g.is_ready(r));
    assert_eq!(g.ready(&[t.into()]), vec![r]);

    g.set_rule_state(r, RuleState::Running);
    assert!(!g.is_ready(r));
    Ok(())
}

#[test]
fn ready_from_any_root() -> anyhow::Result<()> {
    let g = quiet();
    let src = file(&g, "src", stamp(1));
    let mid = file(&g, "mid", MTime::Missing);
    let out = file(&g, "out", MTime::Missing);
    let r1 = rule(&g, "r1", &[src], &[mid]);
    let r2 = rule(&g, "r2", &[mid], &[out]);
    let inner = g.add_target("inner")?;
    g.link_target(inner, [out])?;
    let outer = g.add_target("outer")?;
    g.link_target(outer, [inner])?;
    g.complete(None)?;

    assert_eq!(g.ready(&[outer.into()]), vec![r1]);
    assert_eq!(g.ready(&[out.into()]), vec![r1]);
    assert_eq!(g.ready(&[r2.into()]), vec![r1]);
    assert_eq!(g.ready(&[r1.into(), r2.into()]), vec![r1]);
    assert!(g.ready(&[src.into()]).is_empty());
    Ok(())
}

#[test]
fn terminal_states_are_final() -> anyhow::Result<()> {
    let g = quiet();
    let f1 = file(&g, "F1", stamp(10));
    let f2 = file(&g, "F2", MTime::Missing);
    let r1 = rule(&g, "R1", &[f1], &[f2]);
    g.complete(Some("all"))?;

    let err = g
        .try_set_production_state(f1, ProductionState::Blocked)
        .unwrap_err();
    assert_eq!(err.name, "F1");
    assert_eq!(g.production_state(f1), ProductionState::Current);

    // Not started yet, so it can't succeed; nothing changes.
    assert!(g.try_set_rule_state(r1, RuleState::Ok).is_err());
    assert_eq!(g.rule_state(r1), RuleState::Outdated);
    assert_eq!(g.production_state(f2), ProductionState::Outdated);

    g.set_rule_state(r1, RuleState::Running);
    g.set_rule_state(r1, RuleState::Ok);
    for to in RuleState::ALL {
        assert!(g.try_set_rule_state(r1, to).is_err());
    }
    for to in ProductionState::ALL {
        assert!(g.try_set_production_state(f2, to).is_err());
    }
    assert_eq!(g.rule_state(r1), RuleState::Ok);
    assert_eq!(g.production_state(f2), ProductionState::Current);
    Ok(())
}

#[test]
#[should_panic(expected = "invalid rule state transition")]
fn invalid_transition_panics() {
    let g = quiet();
    let f1 = file(&g, "F1", stamp(10));
    let f2 = file(&g, "F2", MTime::Missing);
    let r1 = rule(&g, "R1", &[f1], &[f2]);
    g.complete(Some("all")).unwrap();
    g.set_rule_state(r1, RuleState::Failed);
}

#[test]
fn bfs_order() -> anyhow::Result<()> {
    let g = quiet();
    let a = file(&g, "a", stamp(1));
    let b = file(&g, "b", MTime::Missing);
    let c = file(&g, "c", MTime::Missing);
    let r1 = rule(&g, "r1", &[a], &[b]);
    let r2 = rule(&g, "r2", &[b], &[c]);
    g.complete(Some("all"))?;

    let order: Vec<NodeId> = g.bfs().collect();
    let expected: Vec<NodeId> = vec![c.into(), r2.into(), b.into(), r1.into(), a.into()];
    assert_eq!(order, expected);
    // Each call starts over.
    assert_eq!(g.bfs().count(), 5);
    Ok(())
}

#[test]
fn short_names() -> anyhow::Result<()> {
    let g = quiet();
    let a = file(&g, "/long/path/to/a.txt", stamp(1));
    g.set_short_name(a, "a.txt");
    assert_eq!(g.name(a), "/long/path/to/a.txt");
    assert_eq!(g.short_name(a), "a.txt");
    assert_eq!(g.find_production("/long/path/to/a.txt"), Some(a));
    assert_eq!(g.find_production("a.txt"), None);
    Ok(())
}

#[test]
fn transitions_are_traced() -> anyhow::Result<()> {
    let sink = Arc::new(RecordingSink::new(Verbosity::Trace));
    let g = Graph::with_sink(sink.clone());
    let f1 = file(&g, "F1", stamp(10));
    let f2 = file(&g, "F2", MTime::Missing);
    let r1 = rule(&g, "R1", &[f1], &[f2]);
    g.complete(Some("all"))?;
    g.set_rule_state(r1, RuleState::Running);

    assert!(sink.contains("production F1: unknown -> current"));
    assert!(sink.contains("rule R1: unknown -> outdated"));
    assert!(sink.contains("rule R1: outdated -> running"));
    Ok(())
}

#[test]
fn concurrent_updates() -> anyhow::Result<()> {
    let g = quiet();
    let src = file(&g, "src", stamp(1));
    let mut rules = Vec::new();
    let mut outs = Vec::new();
    for i in 0..64 {
        let out = file(&g, &format!("out{}", i), MTime::Missing);
        rules.push(rule(&g, &format!("r{}", i), &[src], &[out]));
        outs.push(out);
    }
    let all = file(&g, "all", MTime::Missing);
    let last = rule(&g, "last", &outs, &[all]);
    let t = g.add_target("t")?;
    g.link_target(t, [all])?;
    g.complete(None)?;

    let roots = [NodeId::Target(t)];
    let ready = g.ready(&roots);
    assert_eq!(ready.len(), 64);
    std::thread::scope(|s| {
        for chunk in ready.chunks(8) {
            let g = &g;
            s.spawn(move || {
                for &r in chunk {
                    g.set_rule_state(r, RuleState::Running);
                    g.ready(&roots);
                    g.set_rule_state(r, RuleState::Ok);
                }
            });
        }
    });

    assert!(outs
        .iter()
        .all(|&o| g.production_state(o) == ProductionState::Current));
    assert_eq!(g.ready(&roots), vec![last]);
    let counts = g.state_counts();
    assert_eq!(counts.get(RuleState::Ok), 64);
    assert_eq!(counts.get(RuleState::Outdated), 1);
    Ok(())
}
