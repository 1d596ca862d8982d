//! Structural checks and analysis over the `blockedBy` graph.
//!
//! Edges point from a dependent task to the task it waits on. `blocks` is a
//! denormalised inverse: it is repaired here, never trusted for structure.

use crate::error::{Result, TaskError};
use crate::task::{cmp_task_ids, parse_task_id};
use crate::taskset::TaskSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairKind {
    /// `task.blocks` gained `other` to mirror `other.blockedBy`.
    AddedInverse,
    /// `task.blocks` lost `other`, which no longer waits on `task`.
    RemovedStale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repair {
    pub kind: RepairKind,
    pub task: String,
    pub other: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphReport {
    pub repairs: Vec<Repair>,
    pub order: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub level: usize,
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalPath {
    pub tasks: Vec<String>,
    pub complexity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphAnalysis {
    pub order: Vec<String>,
    pub levels: Vec<Level>,
    pub critical_path: CriticalPath,
    pub parallel_tracks: Vec<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Accept or reject a task set.
///
/// Cycles and dangling references are fatal. Inverse-edge mismatches are
/// repaired in place and reported.
pub fn validate(set: &mut TaskSet) -> Result<GraphReport> {
    detect_cycle(set)?;
    check_references(set)?;
    let repairs = repair_inverse(set);
    let order = topological_order(set)?;
    Ok(GraphReport { repairs, order })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Three-colour DFS. A back-edge `from -> to` is reported as the cycle.
pub fn detect_cycle(set: &TaskSet) -> Result<()> {
    let mut ids: Vec<&str> = set.tasks().iter().map(|t| t.id.as_str()).collect();
    ids.sort_by(|a, b| cmp_task_ids(a, b));
    let deps: HashMap<&str, Vec<&str>> = set
        .tasks()
        .iter()
        .map(|t| (t.id.as_str(), t.blocked_by.iter().map(String::as_str).collect()))
        .collect();
    let mut color: HashMap<&str, Color> = ids.iter().map(|id| (*id, Color::White)).collect();

    fn visit<'a>(
        node: &'a str,
        deps: &HashMap<&'a str, Vec<&'a str>>,
        color: &mut HashMap<&'a str, Color>,
    ) -> Result<()> {
        color.insert(node, Color::Gray);
        for &next in deps.get(node).map(Vec::as_slice).unwrap_or(&[]) {
            match color.get(next).copied() {
                Some(Color::Gray) => {
                    return Err(TaskError::Cycle {
                        from: node.to_string(),
                        to: next.to_string(),
                    })
                }
                Some(Color::White) => visit(next, deps, color)?,
                // Finished, or unknown (left to the reference check).
                Some(Color::Black) | None => {}
            }
        }
        color.insert(node, Color::Black);
        Ok(())
    }

    for id in ids {
        if color.get(id) == Some(&Color::White) {
            visit(id, &deps, &mut color)?;
        }
    }
    Ok(())
}

/// Every id in `blockedBy` and `blocks` must name a task in the set.
pub fn check_references(set: &TaskSet) -> Result<()> {
    let known: HashSet<&str> = set.tasks().iter().map(|t| t.id.as_str()).collect();
    for task in set.tasks() {
        if let Some(missing) = task
            .blocked_by
            .iter()
            .chain(task.blocks.iter())
            .find(|r| !known.contains(r.as_str()))
        {
            return Err(TaskError::DanglingReference {
                task: task.id.clone(),
                reference: missing.clone(),
            });
        }
    }
    Ok(())
}

/// Make `blocks` the exact inverse of `blockedBy`, logging each fix.
pub fn repair_inverse(set: &mut TaskSet) -> Vec<Repair> {
    let mut expected: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for task in set.tasks() {
        for dep in &task.blocked_by {
            expected
                .entry(dep.clone())
                .or_default()
                .insert(task.id.clone());
        }
    }

    let mut repairs = Vec::new();
    for task in &mut set.tasks {
        let want = expected.remove(&task.id).unwrap_or_default();
        for missing in want.difference(&task.blocks) {
            repairs.push(Repair {
                kind: RepairKind::AddedInverse,
                task: task.id.clone(),
                other: missing.clone(),
            });
        }
        for stale in task.blocks.difference(&want) {
            repairs.push(Repair {
                kind: RepairKind::RemovedStale,
                task: task.id.clone(),
                other: stale.clone(),
            });
        }
        task.blocks = want;
    }

    for repair in &repairs {
        tracing::warn!(
            set = %set.slug,
            task = %repair.task,
            other = %repair.other,
            kind = ?repair.kind,
            "repaired blocks inverse"
        );
    }
    if !repairs.is_empty() {
        set.touch();
    }
    repairs
}

/// Break cycles by repeatedly dropping the reported back-edge.
pub fn fix_cycles(set: &mut TaskSet) -> Result<Vec<(String, String)>> {
    let mut removed = Vec::new();
    loop {
        match detect_cycle(set) {
            Ok(()) => return Ok(removed),
            Err(TaskError::Cycle { from, to }) => {
                set.remove_edge(&from, &to)?;
                tracing::warn!(set = %set.slug, %from, %to, "removed cycle edge");
                removed.push((from, to));
            }
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

fn sort_key(id: &str) -> (u32, String) {
    (parse_task_id(id).unwrap_or(u32::MAX), id.to_string())
}

/// `dependency -> dependents`, built from `blockedBy` only.
fn dependents(set: &TaskSet) -> HashMap<&str, Vec<&str>> {
    let mut map: HashMap<&str, Vec<&str>> = HashMap::new();
    for task in set.tasks() {
        for dep in &task.blocked_by {
            map.entry(dep.as_str()).or_default().push(task.id.as_str());
        }
    }
    map
}

/// Kahn's algorithm; dependencies come before dependents, ties by id.
pub fn topological_order(set: &TaskSet) -> Result<Vec<String>> {
    let known: HashSet<&str> = set.tasks().iter().map(|t| t.id.as_str()).collect();
    let mut remaining: HashMap<&str, usize> = set
        .tasks()
        .iter()
        .map(|t| {
            let n = t
                .blocked_by
                .iter()
                .filter(|d| known.contains(d.as_str()))
                .count();
            (t.id.as_str(), n)
        })
        .collect();
    let dependents = dependents(set);

    let mut ready: BTreeSet<(u32, String)> = remaining
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(id, _)| sort_key(id))
        .collect();
    let mut order = Vec::with_capacity(set.tasks().len());

    while let Some(next) = ready.pop_first() {
        let id = next.1;
        if let Some(children) = dependents.get(id.as_str()) {
            for child in children {
                if let Some(n) = remaining.get_mut(child) {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(sort_key(child));
                    }
                }
            }
        }
        order.push(id);
    }

    if order.len() != set.tasks().len() {
        let placed: HashSet<&str> = order.iter().map(String::as_str).collect();
        let stuck = set
            .tasks()
            .iter()
            .find(|t| !placed.contains(t.id.as_str()))
            .map(|t| t.id.clone())
            .unwrap_or_default();
        let to = set
            .get(&stuck)
            .ok()
            .and_then(|t| t.blocked_by.iter().find(|d| !placed.contains(d.as_str())))
            .cloned()
            .unwrap_or_default();
        return Err(TaskError::Cycle { from: stuck, to });
    }
    Ok(order)
}

/// `level = 0` without dependencies, else `1 + max(level(dep))`.
pub fn levels(set: &TaskSet, order: &[String]) -> Vec<Level> {
    let mut level_of: HashMap<&str, usize> = HashMap::new();
    for id in order {
        let Ok(task) = set.get(id) else { continue };
        let level = task
            .blocked_by
            .iter()
            .filter_map(|d| level_of.get(d.as_str()))
            .map(|l| l + 1)
            .max()
            .unwrap_or(0);
        level_of.insert(id.as_str(), level);
    }

    let mut grouped: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for id in order {
        if let Some(level) = level_of.get(id.as_str()) {
            grouped.entry(*level).or_default().push(id.clone());
        }
    }
    grouped
        .into_iter()
        .map(|(level, mut tasks)| {
            tasks.sort_by(|a, b| cmp_task_ids(a, b));
            Level { level, tasks }
        })
        .collect()
}

/// Longest chain by task count, ties broken by summed complexity.
pub fn critical_path(set: &TaskSet, order: &[String]) -> CriticalPath {
    // (chain length, summed complexity, predecessor)
    let mut best: HashMap<&str, (usize, u32, Option<&str>)> = HashMap::new();
    for id in order {
        let Ok(task) = set.get(id) else { continue };
        let own = u32::from(task.complexity.unwrap_or(0));
        let mut entry = (1, own, None);
        for dep in &task.blocked_by {
            if let Some(&(len, sum, _)) = best.get(dep.as_str()) {
                let candidate = (len + 1, sum + own);
                if candidate > (entry.0, entry.1) {
                    entry = (candidate.0, candidate.1, Some(dep.as_str()));
                }
            }
        }
        best.insert(id.as_str(), entry);
    }

    let mut end: Option<(&str, usize, u32)> = None;
    for id in order {
        if let Some(&(len, sum, _)) = best.get(id.as_str()) {
            if end.map_or(true, |(_, l, s)| (len, sum) > (l, s)) {
                end = Some((id.as_str(), len, sum));
            }
        }
    }

    let Some((tail, _, complexity)) = end else {
        return CriticalPath {
            tasks: Vec::new(),
            complexity: 0,
        };
    };
    let mut tasks = vec![tail.to_string()];
    let mut cursor = best.get(tail).and_then(|e| e.2);
    while let Some(prev) = cursor {
        tasks.push(prev.to_string());
        cursor = best.get(prev).and_then(|e| e.2);
    }
    tasks.reverse();
    CriticalPath { tasks, complexity }
}

/// Weakly connected components: groups with no dependency relationship
/// between them.
pub fn parallel_tracks(set: &TaskSet) -> Vec<Vec<String>> {
    let mut neighbours: HashMap<&str, Vec<&str>> = HashMap::new();
    for task in set.tasks() {
        neighbours.entry(task.id.as_str()).or_default();
        for dep in &task.blocked_by {
            neighbours
                .entry(task.id.as_str())
                .or_default()
                .push(dep.as_str());
            neighbours
                .entry(dep.as_str())
                .or_default()
                .push(task.id.as_str());
        }
    }

    let mut ids: Vec<&str> = set.tasks().iter().map(|t| t.id.as_str()).collect();
    ids.sort_by(|a, b| cmp_task_ids(a, b));

    let mut seen: HashSet<&str> = HashSet::new();
    let mut tracks = Vec::new();
    for start in ids {
        if !seen.insert(start) {
            continue;
        }
        let mut component = vec![start.to_string()];
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for &next in neighbours.get(node).map(Vec::as_slice).unwrap_or(&[]) {
                if set.contains(next) && seen.insert(next) {
                    component.push(next.to_string());
                    queue.push_back(next);
                }
            }
        }
        component.sort_by(|a, b| cmp_task_ids(a, b));
        tracks.push(component);
    }
    tracks
}

/// Every task reachable from `id` by following `blocks`.
pub fn transitive_unblocks(set: &TaskSet, id: &str) -> BTreeSet<String> {
    let mut reached = BTreeSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([id]);
    while let Some(node) = queue.pop_front() {
        let Ok(task) = set.get(node) else { continue };
        for next in &task.blocks {
            if next != id && reached.insert(next.clone()) {
                queue.push_back(next.as_str());
            }
        }
    }
    reached
}

/// Order, levels, critical path and parallel tracks for reporting.
pub fn analyze(set: &TaskSet) -> Result<GraphAnalysis> {
    detect_cycle(set)?;
    check_references(set)?;
    let order = topological_order(set)?;
    Ok(GraphAnalysis {
        levels: levels(set, &order),
        critical_path: critical_path(set, &order),
        parallel_tracks: parallel_tracks(set),
        order,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
