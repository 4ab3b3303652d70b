// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Symmetric generator scenario: three coroutines interleave their output
//! one yield per emission. The merged order is fully determined by creation
//! order and yield count, so it must reproduce byte-for-byte.

use std::cell::RefCell;
use std::rc::Rc;

use weft_rt::{yield_now, Scheduler};

type Out = Rc<RefCell<Vec<i32>>>;

const LIMIT: i32 = 12;

fn gen_even(out: Out) -> impl FnOnce() {
    move || {
        for i in 0..LIMIT {
            if i % 2 == 0 {
                out.borrow_mut().push(i);
                yield_now();
            }
        }
    }
}

fn gen_odd(out: Out) -> impl FnOnce() {
    move || {
        for i in 0..LIMIT {
            if i % 2 == 1 {
                out.borrow_mut().push(i);
                yield_now();
            }
        }
    }
}

fn gen_third(out: Out) -> impl FnOnce() {
    move || {
        for i in 0..LIMIT {
            if i % 3 == 0 {
                out.borrow_mut().push(i + LIMIT);
                yield_now();
            }
        }
    }
}

#[test]
fn three_generators_interleave_deterministically() {
    let sched = Scheduler::start().unwrap();
    let out: Out = Rc::new(RefCell::new(Vec::new()));

    sched.create(gen_even(out.clone())).unwrap();
    sched.create(gen_odd(out.clone())).unwrap();
    sched.create(gen_third(out.clone())).unwrap();

    sched.dispatch();

    // Round-robin in creation order while all three are live; once the
    // multiples-of-three generator dies, selection restarts from the head.
    assert_eq!(
        *out.borrow(),
        vec![0, 1, 12, 2, 3, 15, 4, 5, 18, 6, 7, 21, 8, 9, 10, 11]
    );

    let rendered = out
        .borrow()
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    assert_eq!(rendered, "0 1 12 2 3 15 4 5 18 6 7 21 8 9 10 11");

    // 6, 6, and 4 emissions with one yield each, plus one final resume per
    // coroutine to run off the end of its loop: 7 + 7 + 5 swaps in.
    assert_eq!(sched.switches(), 19);

    sched.finish();
}

#[test]
fn rerun_in_a_fresh_epoch_reproduces_the_sequence() {
    let mut runs = Vec::new();
    for _ in 0..2 {
        let sched = Scheduler::start().unwrap();
        let out: Out = Rc::new(RefCell::new(Vec::new()));
        sched.create(gen_even(out.clone())).unwrap();
        sched.create(gen_odd(out.clone())).unwrap();
        sched.create(gen_third(out.clone())).unwrap();
        sched.dispatch();
        sched.finish();
        runs.push(out.borrow().clone());
    }
    assert_eq!(runs[0], runs[1]);
}
