//! The exrun graph, a bipartite graph between productions and the rules that
//! build them, with targets as entry points.
//!
//! All node state lives behind one lock owned by the Graph.  Rules are run by
//! a scheduler outside the graph, which reports back through the
//! `set_*_state` calls; failures cascade to everything downstream.

use crate::densemap::DenseMap;
use crate::error::GraphError;
use crate::node::{format_names, NodeId, NodeInfo, NodeKind, ProductionId, RuleId, TargetId};
use crate::production::{Artifact, MTime, Production};
use crate::rule::{staleness, Action, ProducesTime, RequiresTime, Rule};
use crate::sink::{TraceSink, TracingSink, Verbosity};
use crate::state::{ProductionState, RuleState, StateCounts, TransitionError};
use crate::target::Target;
use crate::trace;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Nodes {
    productions: DenseMap<ProductionId, Production>,
    rules: DenseMap<RuleId, Rule>,
    targets: DenseMap<TargetId, Target>,
    production_ids: FxHashMap<String, ProductionId>,
    rule_ids: FxHashMap<String, RuleId>,
    target_ids: FxHashMap<String, TargetId>,
    /// Productions not required by any rule, computed by complete().
    entries: Vec<ProductionId>,
    complete: bool,
}

pub struct Graph {
    nodes: Mutex<Nodes>,
    sink: Arc<dyn TraceSink>,
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

impl Graph {
    pub fn new() -> Graph {
        Graph::with_sink(Arc::new(TracingSink))
    }

    pub fn with_sink(sink: Arc<dyn TraceSink>) -> Graph {
        Graph {
            nodes: Mutex::new(Nodes::default()),
            sink,
        }
    }

    pub fn sink(&self) -> &Arc<dyn TraceSink> {
        &self.sink
    }

    fn lock(&self) -> MutexGuard<'_, Nodes> {
        self.nodes.lock().unwrap()
    }

    /// Look up a production by name, creating an entry with no artifact if it
    /// is not known yet.  Lets links be declared before the production itself
    /// is added.
    pub fn production_ref(&self, name: &str) -> ProductionId {
        self.lock().production_id(name)
    }

    pub fn add_production(
        &self,
        name: &str,
        artifact: Arc<dyn Artifact>,
    ) -> Result<ProductionId, GraphError> {
        let mut nodes = self.lock();
        nodes.check_open()?;
        let id = nodes.production_id(name);
        let production = &mut nodes.productions[id];
        if production.artifact.is_some() {
            return Err(GraphError::DuplicateName {
                kind: NodeKind::Production,
                name: name.to_owned(),
            });
        }
        production.artifact = Some(artifact);
        Ok(id)
    }

    pub fn add_rule(&self, name: &str, action: Arc<dyn Action>) -> Result<RuleId, GraphError> {
        let mut nodes = self.lock();
        nodes.check_open()?;
        if nodes.rule_ids.contains_key(name) {
            return Err(GraphError::DuplicateName {
                kind: NodeKind::Rule,
                name: name.to_owned(),
            });
        }
        let id = nodes.rules.push(Rule::new(name, action));
        nodes.rule_ids.insert(name.to_owned(), id);
        Ok(id)
    }

    pub fn add_target(&self, name: &str) -> Result<TargetId, GraphError> {
        let mut nodes = self.lock();
        nodes.check_open()?;
        nodes.add_target(name)
    }

    pub fn set_short_name(&self, node: impl Into<NodeId>, short_name: &str) {
        self.lock().info_mut(node.into()).short_name = short_name.to_owned();
    }

    /// Declare productions the rule needs.  Each production lists the rule
    /// as a dependent in the same step.
    pub fn link_requires<N: Into<NodeId>>(
        &self,
        rule: RuleId,
        nodes: impl IntoIterator<Item = N>,
    ) -> Result<(), GraphError> {
        let mut graph = self.lock();
        graph.check_open()?;
        let ids = graph.expect_productions(NodeId::Rule(rule), nodes)?;
        for id in ids {
            if graph.rules[rule].requires.contains(&id) {
                continue;
            }
            graph.rules[rule].requires.push(id);
            graph.productions[id].required_by.push(rule);
        }
        Ok(())
    }

    /// Declare productions the rule builds.  A production has at most one
    /// producer.
    pub fn link_produces<N: Into<NodeId>>(
        &self,
        rule: RuleId,
        nodes: impl IntoIterator<Item = N>,
    ) -> Result<(), GraphError> {
        let mut graph = self.lock();
        graph.check_open()?;
        let mut ids = graph.expect_productions(NodeId::Rule(rule), nodes)?;
        ids.dedup();
        for &id in &ids {
            match graph.productions[id].produced_by {
                Some(existing) if existing == rule => {}
                Some(existing) => {
                    return Err(GraphError::MultipleProducers {
                        production: graph.productions[id].info.name.clone(),
                        existing: graph.rules[existing].info.name.clone(),
                        rule: graph.rules[rule].info.name.clone(),
                    })
                }
                None => {}
            }
        }
        for id in ids {
            if graph.productions[id].produced_by.is_none() {
                graph.productions[id].produced_by = Some(rule);
                graph.rules[rule].produces.push(id);
            }
        }
        Ok(())
    }

    /// Add productions or other targets to a target.
    pub fn link_target<N: Into<NodeId>>(
        &self,
        target: TargetId,
        nodes: impl IntoIterator<Item = N>,
    ) -> Result<(), GraphError> {
        let mut graph = self.lock();
        graph.check_open()?;
        let nodes: Vec<NodeId> = nodes.into_iter().map(Into::into).collect();
        for &node in &nodes {
            if let NodeId::Rule(_) = node {
                return Err(graph.wrong_link(
                    NodeId::Target(target),
                    "productions or targets",
                    node,
                ));
            }
        }
        for node in nodes {
            if !graph.targets[target].requires.contains(&node) {
                graph.targets[target].requires.push(node);
            }
        }
        Ok(())
    }

    /// Validate the graph and compute the initial state of every node.
    /// Called once, after every node is added and linked.  On error the graph
    /// is left as it was before the call and stays open for changes.
    pub fn complete(&self, default_target: Option<&str>) -> Result<(), GraphError> {
        trace::scope("graph.complete", || {
            let mut nodes = self.lock();
            nodes.check_open()?;
            let targets_before = nodes.targets.len();
            if let Err(err) = nodes.validate(default_target, &*self.sink) {
                nodes.roll_back(targets_before);
                self.sink
                    .emit(Verbosity::Error, &format!("graph incomplete: {}", err));
                return Err(err);
            }
            nodes.complete = true;
            self.sink.emit(
                Verbosity::Info,
                &format!(
                    "graph complete: {} productions, {} rules, {} targets",
                    nodes.productions.len(),
                    nodes.rules.len(),
                    nodes.targets.len()
                ),
            );
            Ok(())
        })
    }

    pub fn is_complete(&self) -> bool {
        self.lock().complete
    }

    pub fn get_targets<S: AsRef<str>>(
        &self,
        names: impl IntoIterator<Item = S>,
    ) -> Result<Vec<TargetId>, GraphError> {
        let nodes = self.lock();
        names
            .into_iter()
            .map(|name| {
                let name = name.as_ref();
                nodes
                    .target_ids
                    .get(name)
                    .copied()
                    .ok_or_else(|| GraphError::UnknownTarget(name.to_owned()))
            })
            .collect()
    }

    pub fn find_production(&self, name: &str) -> Option<ProductionId> {
        let nodes = self.lock();
        let id = *nodes.production_ids.get(name)?;
        nodes.productions[id].artifact.as_ref().map(|_| id)
    }

    pub fn find_rule(&self, name: &str) -> Option<RuleId> {
        self.lock().rule_ids.get(name).copied()
    }

    /// Productions not required by any rule.  Only known after complete().
    pub fn entries(&self) -> Vec<ProductionId> {
        self.lock().entries.clone()
    }

    pub fn name(&self, node: impl Into<NodeId>) -> String {
        self.lock().info(node.into()).name.clone()
    }

    pub fn short_name(&self, node: impl Into<NodeId>) -> String {
        self.lock().info(node.into()).short_name.clone()
    }

    pub fn production_state(&self, id: ProductionId) -> ProductionState {
        self.lock().productions[id].state
    }

    pub fn rule_state(&self, id: RuleId) -> RuleState {
        self.lock().rules[id].state
    }

    pub fn artifact(&self, id: ProductionId) -> Option<Arc<dyn Artifact>> {
        self.lock().productions[id].artifact.clone()
    }

    pub fn action(&self, id: RuleId) -> Arc<dyn Action> {
        self.lock().rules[id].action.clone()
    }

    pub fn produced_by(&self, id: ProductionId) -> Option<RuleId> {
        self.lock().productions[id].produced_by
    }

    pub fn required_by(&self, id: ProductionId) -> Vec<RuleId> {
        self.lock().productions[id].required_by.clone()
    }

    pub fn requires(&self, id: RuleId) -> Vec<ProductionId> {
        self.lock().rules[id].requires.clone()
    }

    pub fn produces(&self, id: RuleId) -> Vec<ProductionId> {
        self.lock().rules[id].produces.clone()
    }

    pub fn target_requires(&self, id: TargetId) -> Vec<NodeId> {
        self.lock().targets[id].requires.clone()
    }

    pub fn local_time(&self, id: ProductionId) -> MTime {
        self.lock().productions[id].local_time()
    }

    /// Oldest time along the whole upstream chain of a production, or
    /// Missing if anything along it does not exist.
    pub fn update_time(&self, id: ProductionId) -> MTime {
        self.lock().production_update_time(id)
    }

    /// Oldest update time of a rule's inputs; None if it has no inputs.
    pub fn rule_update_time(&self, id: RuleId) -> Option<MTime> {
        self.lock().rule_update_time(id)
    }

    /// True if the rule's state is outdated and all of its inputs are
    /// current, meaning a scheduler may start it now.
    pub fn is_ready(&self, id: RuleId) -> bool {
        self.lock().is_ready(id)
    }

    /// Whether any output is older than the newest input.  Not recursive.
    pub fn is_outdated(&self, id: RuleId) -> bool {
        !self.outdated(id).is_empty()
    }

    /// Outputs older than the newest input, or missing.  Not recursive.
    pub fn outdated(&self, id: RuleId) -> Vec<ProductionId> {
        let nodes = self.lock();
        let rule = &nodes.rules[id];
        let requires = nodes.requires_time(rule);
        rule.produces
            .iter()
            .copied()
            .filter(|&p| requires.is_newer_than(nodes.productions[p].local_time()))
            .collect()
    }

    /// Change the state of a rule, carrying the change over to its outputs
    /// and from there to everything downstream.  Leaves the graph untouched
    /// when the change is not allowed.
    pub fn try_set_rule_state(&self, id: RuleId, state: RuleState) -> Result<(), TransitionError> {
        let mut nodes = self.lock();
        let to_productions = state.production_state();
        if let Some(pstate) = to_productions {
            for &p in &nodes.rules[id].produces {
                nodes.check_production_transition(p, pstate)?;
            }
        }
        nodes.transition_rule(id, state, &*self.sink)?;
        if let Some(pstate) = to_productions {
            for p in nodes.rules[id].produces.clone() {
                nodes.transition_production(p, pstate, &*self.sink)?;
                if matches!(pstate, ProductionState::Failed | ProductionState::Blocked) {
                    nodes.block_dependents(p, &*self.sink);
                }
            }
        }
        Ok(())
    }

    /// Like try_set_rule_state, but a disallowed change is a bug in the
    /// caller.
    pub fn set_rule_state(&self, id: RuleId, state: RuleState) {
        if let Err(err) = self.try_set_rule_state(id, state) {
            panic!("{}", err);
        }
    }

    /// Change the state of a production.  A failed or blocked production
    /// blocks every rule that needs it, transitively.
    pub fn try_set_production_state(
        &self,
        id: ProductionId,
        state: ProductionState,
    ) -> Result<(), TransitionError> {
        let mut nodes = self.lock();
        nodes.transition_production(id, state, &*self.sink)?;
        if matches!(state, ProductionState::Failed | ProductionState::Blocked) {
            nodes.block_dependents(id, &*self.sink);
        }
        Ok(())
    }

    pub fn set_production_state(&self, id: ProductionId, state: ProductionState) {
        if let Err(err) = self.try_set_production_state(id, state) {
            panic!("{}", err);
        }
    }

    /// Rules that can run right now, found by walking down from the roots.
    /// An outdated rule that is not ready yet is looked through, to find
    /// ready producers of its inputs.
    pub fn ready(&self, roots: &[NodeId]) -> Vec<RuleId> {
        let nodes = self.lock();
        let mut found = Vec::new();
        let mut seen = FxHashSet::default();
        let mut stack: Vec<NodeId> = roots.iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            match node {
                NodeId::Target(t) => {
                    stack.extend(nodes.targets[t].requires.iter().rev().copied());
                }
                NodeId::Production(p) => {
                    if let Some(r) = nodes.productions[p].produced_by {
                        stack.push(NodeId::Rule(r));
                    }
                }
                NodeId::Rule(r) => {
                    if nodes.is_ready(r) {
                        found.push(r);
                    } else if nodes.rules[r].state == RuleState::Outdated {
                        let requires = &nodes.rules[r].requires;
                        stack.extend(requires.iter().rev().map(|&p| NodeId::Production(p)));
                    }
                }
            }
        }
        found
    }

    /// Every outdated rule below the roots, inputs before the rules that
    /// need them.  Used for dry runs.
    pub fn outdated_rules(&self, roots: &[NodeId]) -> Vec<RuleId> {
        fn visit(nodes: &Nodes, node: NodeId, seen: &mut FxHashSet<NodeId>, out: &mut Vec<RuleId>) {
            if !seen.insert(node) {
                return;
            }
            for next in nodes.next_nodes(node) {
                visit(nodes, next, seen, out);
            }
            if let NodeId::Rule(r) = node {
                if nodes.rules[r].state == RuleState::Outdated {
                    out.push(r);
                }
            }
        }
        let nodes = self.lock();
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        for &root in roots {
            visit(&nodes, root, &mut seen, &mut out);
        }
        out
    }

    /// Breadth-first walk from the entry productions towards the leaves.
    pub fn bfs(&self) -> Bfs<'_> {
        let entries = self.lock().entry_productions();
        let queue: VecDeque<NodeId> = entries.into_iter().map(NodeId::Production).collect();
        let seen = queue.iter().copied().collect();
        Bfs {
            graph: self,
            queue,
            seen,
        }
    }

    pub fn state_counts(&self) -> StateCounts {
        let nodes = self.lock();
        let mut counts = StateCounts::default();
        for (_, rule) in nodes.rules.iter() {
            counts.add(rule.state);
        }
        counts
    }

    /// Every node with its state and links, for debugging.
    pub fn dump(&self) -> String {
        let nodes = self.lock();
        let mut out = String::new();
        for (_, p) in nodes.productions.iter() {
            out.push_str(&format!("production {} [{}]", p.info.name, p.state));
            if let Some(r) = p.produced_by {
                out.push_str(&format!(" <- {}", nodes.rules[r].info.name));
            }
            out.push('\n');
        }
        for (_, r) in nodes.rules.iter() {
            let names = |ids: &[ProductionId]| {
                format_names(ids.iter().map(|&p| nodes.productions[p].info.name.as_str()))
            };
            out.push_str(&format!(
                "rule {} [{}]: {} -> {}\n",
                r.info.name,
                r.state,
                names(&r.requires),
                names(&r.produces)
            ));
        }
        for (_, t) in nodes.targets.iter() {
            out.push_str(&format!(
                "target {}: {}\n",
                t.info.name,
                format_names(t.requires.iter().map(|&n| nodes.info(n).name.as_str()))
            ));
        }
        out
    }
}

/// Iterator returned by Graph::bfs().  Takes the graph lock for each step.
pub struct Bfs<'a> {
    graph: &'a Graph,
    queue: VecDeque<NodeId>,
    seen: FxHashSet<NodeId>,
}

impl<'a> Iterator for Bfs<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let node = self.queue.pop_front()?;
        let nodes = self.graph.lock();
        for next in nodes.next_nodes(node) {
            if self.seen.insert(next) {
                self.queue.push_back(next);
            }
        }
        Some(node)
    }
}

/// Depth-first walk used by complete() to find cycles and unreachable nodes.
struct Walk<'a> {
    nodes: &'a Nodes,
    visited: FxHashSet<NodeId>,
    path: Vec<NodeId>,
    on_path: FxHashSet<NodeId>,
}

impl<'a> Walk<'a> {
    fn visit(&mut self, node: NodeId) -> Result<(), GraphError> {
        if self.on_path.contains(&node) {
            let start = self.path.iter().position(|&n| n == node).unwrap_or(0);
            let cycle = self.path[start..]
                .iter()
                .map(|&n| self.nodes.info(n).name.clone())
                .collect();
            return Err(GraphError::Cycle(cycle));
        }
        if !self.visited.insert(node) {
            return Ok(());
        }
        self.path.push(node);
        self.on_path.insert(node);
        for next in self.nodes.next_nodes(node) {
            self.visit(next)?;
        }
        self.on_path.remove(&node);
        self.path.pop();
        Ok(())
    }
}

impl Nodes {
    fn check_open(&self) -> Result<(), GraphError> {
        if self.complete {
            return Err(GraphError::AlreadyComplete);
        }
        Ok(())
    }

    fn production_id(&mut self, name: &str) -> ProductionId {
        match self.production_ids.get(name) {
            Some(&id) => id,
            None => {
                let id = self.productions.push(Production::new(name));
                self.production_ids.insert(name.to_owned(), id);
                id
            }
        }
    }

    fn add_target(&mut self, name: &str) -> Result<TargetId, GraphError> {
        if self.target_ids.contains_key(name) {
            return Err(GraphError::DuplicateName {
                kind: NodeKind::Target,
                name: name.to_owned(),
            });
        }
        let id = self.targets.push(Target::new(name));
        self.target_ids.insert(name.to_owned(), id);
        Ok(id)
    }

    fn info(&self, node: NodeId) -> &NodeInfo {
        match node {
            NodeId::Production(id) => &self.productions[id].info,
            NodeId::Rule(id) => &self.rules[id].info,
            NodeId::Target(id) => &self.targets[id].info,
        }
    }

    fn info_mut(&mut self, node: NodeId) -> &mut NodeInfo {
        match node {
            NodeId::Production(id) => &mut self.productions[id].info,
            NodeId::Rule(id) => &mut self.rules[id].info,
            NodeId::Target(id) => &mut self.targets[id].info,
        }
    }

    fn wrong_link(&self, owner: NodeId, expected: &'static str, node: NodeId) -> GraphError {
        GraphError::WrongLinkType {
            owner: self.info(owner).name.clone(),
            expected,
            kind: node.kind(),
            name: self.info(node).name.clone(),
        }
    }

    fn expect_productions<N: Into<NodeId>>(
        &self,
        owner: NodeId,
        nodes: impl IntoIterator<Item = N>,
    ) -> Result<Vec<ProductionId>, GraphError> {
        nodes
            .into_iter()
            .map(|node| match node.into() {
                NodeId::Production(id) => Ok(id),
                other => Err(self.wrong_link(owner, "productions", other)),
            })
            .collect()
    }

    /// Linked productions that are present in the graph: added, or at least
    /// referenced by a link.
    fn is_linked(&self, id: ProductionId) -> bool {
        let p = &self.productions[id];
        p.artifact.is_some() || p.produced_by.is_some() || !p.required_by.is_empty()
    }

    fn entry_productions(&self) -> Vec<ProductionId> {
        self.productions
            .iter()
            .filter(|(id, p)| p.required_by.is_empty() && self.is_linked(*id))
            .map(|(id, _)| id)
            .collect()
    }

    fn next_nodes(&self, node: NodeId) -> Vec<NodeId> {
        match node {
            NodeId::Target(id) => self.targets[id].next_nodes().collect(),
            NodeId::Production(id) => self.productions[id]
                .produced_by
                .map(NodeId::Rule)
                .into_iter()
                .collect(),
            NodeId::Rule(id) => self.rules[id]
                .requires
                .iter()
                .map(|&p| NodeId::Production(p))
                .collect(),
        }
    }

    fn validate(
        &mut self,
        default_target: Option<&str>,
        sink: &dyn TraceSink,
    ) -> Result<(), GraphError> {
        self.setup_entries(default_target)?;
        self.check_connected()?;
        self.init_states(sink);
        self.check_buildable()
    }

    /// Undo a failed validate() so the graph can be fixed up and completed
    /// again.  Every node goes back to unknown.
    fn roll_back(&mut self, targets_before: usize) {
        while self.targets.len() > targets_before {
            if let Some(t) = self.targets.pop() {
                self.target_ids.remove(&t.info.name);
            }
        }
        self.entries.clear();
        for p in self.productions.values_mut() {
            p.state = ProductionState::Unknown;
        }
        for r in self.rules.values_mut() {
            r.state = RuleState::Unknown;
        }
    }

    fn setup_entries(&mut self, default_target: Option<&str>) -> Result<(), GraphError> {
        self.entries = self.entry_productions();
        if self.targets.is_empty() && !self.entries.is_empty() {
            let name = default_target.ok_or(GraphError::NoTargets)?;
            let id = self.add_target(name)?;
            self.targets[id].requires = self.entries.iter().map(|&p| p.into()).collect();
        }
        Ok(())
    }

    /// Every added node must be reachable from a target, every node reached
    /// must have been added, and there must be no cycles.
    fn check_connected(&self) -> Result<(), GraphError> {
        let mut walk = Walk {
            nodes: self,
            visited: FxHashSet::default(),
            path: Vec::new(),
            on_path: FxHashSet::default(),
        };
        // Without targets, walk from whatever there is so that a malformed
        // graph still gets a useful diagnostic.
        let roots: Vec<NodeId> = if !self.targets.is_empty() {
            self.targets.ids().map(NodeId::Target).collect()
        } else if !self.entries.is_empty() {
            self.entries.iter().map(|&p| p.into()).collect()
        } else {
            self.all_nodes().collect()
        };
        for root in roots {
            walk.visit(root)?;
        }

        let added: FxHashSet<NodeId> = self.all_nodes().collect();
        let unreachable: Vec<&str> = added
            .difference(&walk.visited)
            .map(|&n| self.info(n).name.as_str())
            .collect();
        if !unreachable.is_empty() {
            return Err(GraphError::Unreachable(format_names(unreachable)));
        }
        let unregistered: Vec<&str> = walk
            .visited
            .difference(&added)
            .map(|&n| self.info(n).name.as_str())
            .collect();
        if !unregistered.is_empty() {
            return Err(GraphError::Unregistered(format_names(unregistered)));
        }
        Ok(())
    }

    /// Nodes explicitly added to the graph.
    fn all_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        let productions = self
            .productions
            .iter()
            .filter(|(_, p)| p.artifact.is_some())
            .map(|(id, _)| NodeId::Production(id));
        productions
            .chain(self.rules.ids().map(NodeId::Rule))
            .chain(self.targets.ids().map(NodeId::Target))
    }

    fn init_states(&mut self, sink: &dyn TraceSink) {
        for id in self.entries.clone() {
            self.compute_production_state(id, sink);
        }
    }

    fn check_buildable(&self) -> Result<(), GraphError> {
        let bad: Vec<&str> = self
            .productions
            .iter()
            .filter(|(_, p)| p.state == ProductionState::Bad)
            .map(|(_, p)| p.info.name.as_str())
            .collect();
        if !bad.is_empty() {
            return Err(GraphError::NoRule(format_names(bad)));
        }
        Ok(())
    }

    fn compute_production_state(&mut self, id: ProductionId, sink: &dyn TraceSink) {
        if self.productions[id].state != ProductionState::Unknown {
            return;
        }
        let state = match self.productions[id].produced_by {
            None => {
                if self.productions[id].local_time().exists() {
                    ProductionState::Current
                } else {
                    ProductionState::Bad
                }
            }
            Some(rule) => {
                self.compute_rule_state(rule, sink);
                match self.rules[rule].state {
                    RuleState::Outdated | RuleState::Running => ProductionState::Outdated,
                    RuleState::Ok => ProductionState::Current,
                    RuleState::Failed => ProductionState::Failed,
                    RuleState::Blocked => ProductionState::Blocked,
                    RuleState::Unknown => panic!(
                        "rule {:?} still unknown after computing its state",
                        self.rules[rule].info.name
                    ),
                }
            }
        };
        if let Err(err) = self.transition_production(id, state, sink) {
            panic!("{}", err);
        }
    }

    fn compute_rule_state(&mut self, id: RuleId, sink: &dyn TraceSink) {
        if self.rules[id].state != RuleState::Unknown {
            return;
        }
        let requires = self.rules[id].requires.clone();
        for &p in &requires {
            self.compute_production_state(p, sink);
        }

        let mut failed = false;
        let mut blocked = false;
        for &p in &requires {
            match self.productions[p].state {
                ProductionState::Unknown => panic!(
                    "production {:?} still unknown while computing rule {:?}",
                    self.productions[p].info.name, self.rules[id].info.name
                ),
                ProductionState::Failed => failed = true,
                ProductionState::Bad | ProductionState::Blocked => blocked = true,
                ProductionState::Outdated | ProductionState::Current => {}
            }
        }
        let state = if failed {
            RuleState::Failed
        } else if blocked {
            RuleState::Blocked
        } else {
            let rule = &self.rules[id];
            let produces = ProducesTime::of(
                rule.produces
                    .iter()
                    .map(|&p| self.productions[p].local_time()),
            );
            staleness(self.requires_time(rule), produces)
        };
        if let Err(err) = self.transition_rule(id, state, sink) {
            panic!("{}", err);
        }
    }

    fn requires_time(&self, rule: &Rule) -> RequiresTime {
        RequiresTime::of(
            rule.requires
                .iter()
                .map(|&p| self.productions[p].local_time()),
        )
    }

    fn production_update_time(&self, id: ProductionId) -> MTime {
        let p = &self.productions[id];
        let local = match p.local_time() {
            MTime::Missing => return MTime::Missing,
            MTime::Stamp(t) => t,
        };
        match p.produced_by.and_then(|r| self.rule_update_time(r)) {
            None => MTime::Stamp(local),
            Some(MTime::Missing) => MTime::Missing,
            Some(MTime::Stamp(upstream)) => MTime::Stamp(local.min(upstream)),
        }
    }

    fn rule_update_time(&self, id: RuleId) -> Option<MTime> {
        let mut oldest = None;
        for &p in &self.rules[id].requires {
            match self.production_update_time(p) {
                MTime::Missing => return Some(MTime::Missing),
                MTime::Stamp(t) => {
                    oldest = Some(match oldest {
                        Some(o) if o < t => o,
                        _ => t,
                    })
                }
            }
        }
        oldest.map(MTime::Stamp)
    }

    fn is_ready(&self, id: RuleId) -> bool {
        let rule = &self.rules[id];
        rule.state == RuleState::Outdated
            && rule
                .requires
                .iter()
                .all(|&p| self.productions[p].state == ProductionState::Current)
    }

    fn check_production_transition(
        &self,
        id: ProductionId,
        to: ProductionState,
    ) -> Result<(), TransitionError> {
        let p = &self.productions[id];
        if !p.state.can_become(to) {
            return Err(TransitionError {
                kind: NodeKind::Production,
                name: p.info.name.clone(),
                from: p.state.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    fn transition_production(
        &mut self,
        id: ProductionId,
        to: ProductionState,
        sink: &dyn TraceSink,
    ) -> Result<(), TransitionError> {
        self.check_production_transition(id, to)?;
        let p = &mut self.productions[id];
        sink.emit(
            Verbosity::Trace,
            &format!("production {}: {} -> {}", p.info, p.state, to),
        );
        p.state = to;
        Ok(())
    }

    fn transition_rule(
        &mut self,
        id: RuleId,
        to: RuleState,
        sink: &dyn TraceSink,
    ) -> Result<(), TransitionError> {
        let rule = &mut self.rules[id];
        if !rule.state.can_become(to) {
            return Err(TransitionError {
                kind: NodeKind::Rule,
                name: rule.info.name.clone(),
                from: rule.state.to_string(),
                to: to.to_string(),
            });
        }
        sink.emit(
            Verbosity::Trace,
            &format!("rule {}: {} -> {}", rule.info, rule.state, to),
        );
        rule.state = to;
        Ok(())
    }

    /// Block every rule that needs the production, and their outputs, and so
    /// on downstream.  Nodes that already reached a final state are left
    /// alone.
    fn block_dependents(&mut self, from: ProductionId, sink: &dyn TraceSink) {
        let mut work: Vec<RuleId> = self.productions[from].required_by.clone();
        while let Some(r) = work.pop() {
            if !self.rules[r].state.can_become(RuleState::Blocked) {
                continue;
            }
            sink.emit(
                Verbosity::Debug,
                &format!(
                    "rule {} blocked by {}",
                    self.rules[r].info, self.productions[from].info
                ),
            );
            // Both transitions were checked just above.
            let _ = self.transition_rule(r, RuleState::Blocked, sink);
            for p in self.rules[r].produces.clone() {
                if self.productions[p].state.can_become(ProductionState::Blocked) {
                    let _ = self.transition_production(p, ProductionState::Blocked, sink);
                    work.extend(self.productions[p].required_by.iter().copied());
                }
            }
        }
    }
}
