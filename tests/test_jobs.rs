// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Pull-based dispatcher/worker queue.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use rmalock::{Dispatcher, Error, Group, GroupConfig, JobTag, Mutex, Worker, DISPATCHER_RANK};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_jobs_{}_{n}", std::process::id())
}

fn run_group<T, F>(prefix: &str, size: usize, body: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(&mut Group) -> T + Send + Sync + 'static,
{
    let name = unique_name(prefix);
    let body = Arc::new(body);
    let ranks: Vec<_> = (0..size)
        .map(|rank| {
            let name = name.clone();
            let body = Arc::clone(&body);
            thread::spawn(move || {
                let mut group = Group::join(&GroupConfig::new(name, rank, size)).expect("join");
                let out = body(&mut group);
                group.free().expect("free");
                out
            })
        })
        .collect();
    ranks.into_iter().map(|t| t.join().unwrap()).collect()
}

/// Drain tasks until AllDone; returns the first value of each task.
fn work(worker: &mut Worker) -> Vec<u64> {
    let mut got = Vec::new();
    loop {
        worker.notify_ready().expect("ready");
        match worker.recv_task().expect("recv task") {
            Some(task) => got.push(task[0] as u64),
            None => return got,
        }
    }
}

#[test]
fn every_task_is_handed_out_once() {
    const TASKS: u64 = 40;
    let results = run_group("dispatch", 4, |g| {
        if g.rank() == DISPATCHER_RANK {
            let mut dispatcher = Dispatcher::new(g).expect("dispatcher");
            let sent = dispatcher
                .dispatch_all((0..TASKS).map(|n| vec![n as f64, 0.5]))
                .expect("dispatch");
            assert_eq!(sent, TASKS as usize);
            Vec::new()
        } else {
            work(&mut Worker::new(g).expect("worker"))
        }
    });

    let all: Vec<u64> = results.iter().flatten().copied().collect();
    assert_eq!(all.len(), TASKS as usize);
    assert_eq!(all.iter().copied().collect::<BTreeSet<_>>(), (0..TASKS).collect());
}

#[test]
fn task_goes_to_the_ready_worker() {
    let results = run_group("ready", 3, |g| match g.rank() {
        DISPATCHER_RANK => {
            let mut dispatcher = Dispatcher::new(g).expect("dispatcher");
            let ready = dispatcher.wait_for_ready().expect("ready");
            dispatcher.send_task(&[1.5, -2.0], ready).expect("send");
            dispatcher.done().expect("done");
            (Some(ready), Vec::new())
        }
        1 => {
            let mut worker = Worker::new(g).expect("worker");
            (None, vec![worker.recv_task().expect("recv")])
        }
        _ => {
            let mut worker = Worker::new(g).expect("worker");
            worker.notify_ready().expect("ready");
            let first = worker.recv_task().expect("recv");
            let second = worker.recv_task().expect("recv");
            (None, vec![first, second])
        }
    });

    assert_eq!(results[0].0, Some(2));
    assert_eq!(results[1].1, vec![None]);
    assert_eq!(results[2].1, vec![Some(vec![1.5, -2.0]), None]);
}

#[test]
fn no_tasks_means_immediate_all_done() {
    let results = run_group("empty", 3, |g| {
        if g.rank() == DISPATCHER_RANK {
            let mut dispatcher = Dispatcher::new(g).expect("dispatcher");
            assert_eq!(dispatcher.dispatch_all(std::iter::empty()).expect("dispatch"), 0);
            Vec::new()
        } else {
            work(&mut Worker::new(g).expect("worker"))
        }
    });
    assert!(results.iter().all(Vec::is_empty));
}

#[test]
fn unknown_message_kind_is_an_error() {
    let results = run_group("unknown", 2, |g| {
        if g.rank() == DISPATCHER_RANK {
            let mut dispatcher = Dispatcher::new(g).expect("dispatcher");
            dispatcher.group().send(1, 42, &[]).expect("send");
            None
        } else {
            let mut worker = Worker::new(g).expect("worker");
            worker.recv_task().err()
        }
    });
    assert!(matches!(results[1], Some(Error::UnexpectedTag { tag: 42, from: 0 })));
}

#[test]
fn ragged_task_payload_is_an_error() {
    let results = run_group("ragged", 2, |g| {
        if g.rank() == DISPATCHER_RANK {
            let mut dispatcher = Dispatcher::new(g).expect("dispatcher");
            dispatcher
                .group()
                .send(1, JobTag::Task.tag(), &[1, 2, 3])
                .expect("send");
            None
        } else {
            let mut worker = Worker::new(g).expect("worker");
            worker.recv_task().err()
        }
    });
    assert!(matches!(results[1], Some(Error::MalformedTask(3))));
}

#[test]
fn workers_share_the_mutex_while_working() {
    const TASKS: usize = 30;
    let occupancy = Arc::new(AtomicI32::new(0));
    let peaks = run_group("with_mutex", 4, {
        let occupancy = Arc::clone(&occupancy);
        move |g| {
            let mut mutex = Mutex::new(g).expect("mutex");
            let mut peak = 0;
            if g.rank() == DISPATCHER_RANK {
                let mut dispatcher = Dispatcher::new(g).expect("dispatcher");
                dispatcher
                    .dispatch_all((0..TASKS).map(|n| vec![n as f64]))
                    .expect("dispatch");
            } else {
                let mut worker = Worker::new(g).expect("worker");
                loop {
                    worker.notify_ready().expect("ready");
                    if worker.recv_task().expect("recv").is_none() {
                        break;
                    }
                    let held = mutex.guard().expect("guard");
                    peak = peak.max(occupancy.fetch_add(1, Ordering::SeqCst) + 1);
                    thread::yield_now();
                    occupancy.fetch_sub(1, Ordering::SeqCst);
                    held.unlock().expect("unlock");
                }
            }
            mutex.free().expect("free");
            peak
        }
    });
    assert!(peaks.iter().all(|&p| p <= 1));
}
