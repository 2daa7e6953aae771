use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use exrun::sink::NullSink;
use exrun::task::{TaskContext, TaskResult};
use exrun::{Action, Artifact, Graph, MTime, NodeId, RuleState};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

struct Fixed(MTime);

impl Artifact for Fixed {
    fn local_time(&self) -> MTime {
        self.0
    }
}

struct Noop;
impl Action for Noop {
    fn execute(&self, _ctx: &TaskContext) -> anyhow::Result<TaskResult> {
        Ok(TaskResult::success())
    }
}

/// `width` independent chains of `depth` rules each, all feeding one final
/// rule.
fn build(width: usize, depth: usize) -> Graph {
    let g = Graph::with_sink(Arc::new(NullSink));
    let src = g
        .add_production(
            "src",
            Arc::new(Fixed(MTime::Stamp(UNIX_EPOCH + Duration::from_secs(1)))),
        )
        .unwrap();
    let mut tails = Vec::new();
    for w in 0..width {
        let mut prev = src;
        for d in 0..depth {
            let out = g
                .add_production(&format!("out{}_{}", w, d), Arc::new(Fixed(MTime::Missing)))
                .unwrap();
            let r = g.add_rule(&format!("r{}_{}", w, d), Arc::new(Noop)).unwrap();
            g.link_requires(r, [prev]).unwrap();
            g.link_produces(r, [out]).unwrap();
            prev = out;
        }
        tails.push(prev);
    }
    let last = g.add_production("last", Arc::new(Fixed(MTime::Missing))).unwrap();
    let r = g.add_rule("link", Arc::new(Noop)).unwrap();
    g.link_requires(r, tails).unwrap();
    g.link_produces(r, [last]).unwrap();
    g
}

pub fn bench_complete(c: &mut Criterion) {
    let mut group = c.benchmark_group("complete");
    for &(width, depth) in &[(10, 10), (100, 10), (10, 100)] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", width, depth)),
            &(width, depth),
            |b, &(width, depth)| {
                b.iter_with_large_drop(|| {
                    let g = build(width, depth);
                    g.complete(Some("all")).unwrap();
                    g
                })
            },
        );
    }
    group.finish();
}

pub fn bench_ready(c: &mut Criterion) {
    let g = build(100, 10);
    g.complete(Some("all")).unwrap();
    let roots: Vec<NodeId> = g
        .get_targets(["all"])
        .unwrap()
        .into_iter()
        .map(NodeId::Target)
        .collect();
    assert_eq!(g.ready(&roots).len(), 100);
    assert_eq!(g.state_counts().get(RuleState::Outdated), 1001);

    c.bench_function("ready 100x10", |b| b.iter(|| g.ready(&roots)));
}

criterion_group!(benches, bench_complete, bench_ready);
criterion_main!(benches);
