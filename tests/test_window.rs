// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// One-sided windows: remote get/put, bounds, and exclusivity of epochs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use rmalock::{Error, Group, GroupConfig, Window};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_win_{}_{n}", std::process::id())
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

#[test]
fn lengths_are_published_to_every_rank() {
    let lens = run_group("lens", 3, |g| {
        let len = g.rank() * 10;
        let win = Window::create(g, len).expect("window");
        (0..3).map(|r| win.target_len(r).expect("len")).collect::<Vec<_>>()
    });
    for seen in lens {
        assert_eq!(seen, vec![0, 10, 20]);
    }
}

#[test]
fn fresh_window_reads_zero() {
    let got = run_group("zero", 2, |g| {
        let win = Window::create(g, 8).expect("window");
        let mut buf = [0xffu8; 8];
        win.lock_exclusive(1 - g.rank())
            .expect("epoch")
            .get(0, &mut buf)
            .expect("get");
        g.barrier().expect("barrier");
        buf
    });
    assert!(got.iter().all(|b| b == &[0u8; 8]));
}

#[test]
fn put_is_visible_to_later_epochs() {
    let got = run_group("putget", 3, |g| {
        let (rank, size) = (g.rank(), g.size());
        let win = Window::create(g, if rank == 0 { size } else { 0 }).expect("window");
        win.lock_exclusive(0)
            .expect("epoch")
            .put(rank, &[rank as u8 + 1])
            .expect("put");
        g.barrier().expect("barrier");

        let mut all = vec![0u8; size];
        win.lock_exclusive(0).expect("epoch").get(0, &mut all).expect("get");
        g.barrier().expect("barrier");
        all
    });
    for seen in got {
        assert_eq!(seen, vec![1, 2, 3]);
    }
}

#[test]
fn access_outside_target_is_rejected() {
    let errs = run_group("bounds", 2, |g| {
        let len = if g.rank() == 0 { 4 } else { 0 };
        let win = Window::create(g, len).expect("window");
        let out = {
            let epoch = win.lock_exclusive(0).expect("epoch");
            let mut buf = [0u8; 2];
            let past_end = epoch.get(3, &mut buf).unwrap_err();
            let overflow = epoch.put(usize::MAX, &[1]).unwrap_err();
            assert!(epoch.put(4, &[]).is_ok());
            (past_end, overflow)
        };
        let empty = win.lock_exclusive(1).expect("epoch").put(0, &[1]).unwrap_err();
        let no_rank = win.lock_exclusive(2).err();
        g.barrier().expect("barrier");
        (out.0, out.1, empty, no_rank)
    });
    for (past_end, overflow, empty, no_rank) in errs {
        assert!(matches!(
            past_end,
            Error::OutOfBounds {
                target: 0,
                offset: 3,
                len: 2,
                size: 4
            }
        ));
        assert!(matches!(overflow, Error::OutOfBounds { .. }));
        assert!(matches!(empty, Error::OutOfBounds { target: 1, size: 0, .. }));
        assert!(matches!(no_rank, Some(Error::RankOutOfRange { rank: 2, size: 2 })));
    }
}

#[test]
fn epochs_make_read_modify_write_exclusive() {
    const ROUNDS: u64 = 300;
    let totals = run_group("rmw", 4, |g| {
        let len = if g.rank() == 0 { 8 } else { 0 };
        let win = Window::create(g, len).expect("window");
        for _ in 0..ROUNDS {
            let epoch = win.lock_exclusive(0).expect("epoch");
            let mut raw = [0u8; 8];
            epoch.get(0, &mut raw).expect("get");
            let next = u64::from_le_bytes(raw) + 1;
            thread::yield_now();
            epoch.put(0, &next.to_le_bytes()).expect("put");
        }
        g.barrier().expect("barrier");
        let mut raw = [0u8; 8];
        win.lock_exclusive(0).expect("epoch").get(0, &mut raw).expect("get");
        g.barrier().expect("barrier");
        u64::from_le_bytes(raw)
    });
    assert!(totals.iter().all(|&t| t == 4 * ROUNDS));
}

#[test]
fn windows_on_one_context_are_independent() {
    let got = run_group("two_windows", 2, |g| {
        let a = Window::create(g, 1).expect("a");
        let b = Window::create(g, 1).expect("b");
        assert_ne!(a.id(), b.id());
        if g.rank() == 0 {
            a.lock_exclusive(1).expect("epoch").put(0, &[7]).expect("put");
        }
        g.barrier().expect("barrier");
        let mut in_a = [0u8; 1];
        let mut in_b = [0u8; 1];
        a.lock_exclusive(1).expect("epoch").get(0, &mut in_a).expect("get");
        b.lock_exclusive(1).expect("epoch").get(0, &mut in_b).expect("get");
        g.barrier().expect("barrier");
        (in_a[0], in_b[0])
    });
    assert!(got.iter().all(|&v| v == (7, 0)));
}
