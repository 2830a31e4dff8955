// Weft
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Task-graph and pipeline scenarios over the default execution context.

use parking_lot::Mutex;
use std::sync::Arc;
use weft_core::{
    ChainedTask, PipelineBuilder, StageOrdering, Task, TaskGroup, add_dependencies,
    add_dependents, spawn_task, wait,
};

#[test]
fn test_diamond_graph_runs_in_dependency_order() {
    let grp = TaskGroup::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let node = |name: &'static str| {
        let log = Arc::clone(&log);
        ChainedTask::new(Task::with_group(move || log.lock().push(name), grp.clone()))
    };

    let a = node("a");
    let b = node("b");
    let c = node("c");
    let d = node("d");
    let e = node("e");

    add_dependencies(&a, &[b.clone(), c.clone(), d.clone()]);
    add_dependents(&[b, c, d], &e);

    spawn_task(a.to_task(), true);
    wait(&grp);

    let log = log.lock();
    assert_eq!(log.len(), 5);
    assert_eq!(log[0], "a");
    assert_eq!(log[4], "e");
    for name in ["b", "c", "d"] {
        assert!(log[1..4].contains(&name));
    }
}

#[test]
fn test_pipeline_stages_transform_lines() {
    #[derive(Debug)]
    struct Item {
        value: usize,
        steps: usize,
    }

    let grp = TaskGroup::new();
    let results = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&results);
    let pipeline = PipelineBuilder::new(6)
        .group(grp.clone())
        .add_stage(StageOrdering::Concurrent, |item: &mut Item| {
            item.value *= 2;
            item.steps += 1;
        })
        .add_stage(StageOrdering::OutOfOrder, |item| {
            item.value += 1;
            item.steps += 1;
        })
        .add_stage(StageOrdering::InOrder, move |item| {
            item.steps += 1;
            sink.lock().push((item.value, item.steps));
        })
        .build();

    for i in 0..40 {
        pipeline.push(Item { value: i, steps: 0 });
    }
    wait(&grp);

    let results = results.lock();
    // The in_order final stage preserves push order, and every line went
    // through all three stages
    let expected: Vec<(usize, usize)> = (0..40).map(|i| (2 * i + 1, 3)).collect();
    assert_eq!(*results, expected);
}
