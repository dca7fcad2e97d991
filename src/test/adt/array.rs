//! Testing utilities for array types.

use core::fmt::Debug;
use std::collections::{HashMap, HashSet};
use std::thread::scope;

use crossbeam_epoch::pin;
use rand::prelude::*;

use crate::test::RandGen;
use crate::{ConcurrentArray, IndexOutOfRange};

/// Runs many operations in a single thread and tests if it works like an array using `Vec` as
/// reference.
pub fn stress_sequential<V: Clone + Debug + Eq + RandGen, A: Default + ConcurrentArray<V>>(
    steps: usize,
) {
    enum Ops {
        GetSome,
        GetNone,
        PutSome,
        PutNone,
        PushBack,
    }
    const OPS: [Ops; 5] = [
        Ops::GetSome,
        Ops::GetNone,
        Ops::PutSome,
        Ops::PutNone,
        Ops::PushBack,
    ];

    let mut rng = thread_rng();
    let array = A::default();
    let mut vec = Vec::new();

    for i in 0..steps {
        let op = OPS.choose(&mut rng).unwrap();

        match op {
            Ops::GetSome => {
                if vec.is_empty() {
                    continue;
                }
                let index = rng.gen_range(0..vec.len());

                println!("iteration {i}: get({index}) (existing)");

                assert_eq!(array.get(index, &pin()), Ok(&vec[index]));
            }
            Ops::GetNone => {
                let index = vec.len() + rng.gen_range(0..4);
                let size = vec.len();

                println!("iteration {i}: get({index}) (non-existing)");

                assert_eq!(
                    array.get(index, &pin()),
                    Err(IndexOutOfRange { index, size })
                );
            }
            Ops::PutSome => {
                if vec.is_empty() {
                    continue;
                }
                let index = rng.gen_range(0..vec.len());
                let value = V::rand_gen(&mut rng);

                println!("iteration {i}: put({index}, {value:?}) (existing)");

                assert_eq!(array.put(index, value.clone(), &pin()), Ok(()));
                vec[index] = value;
            }
            Ops::PutNone => {
                let index = vec.len() + rng.gen_range(0..4);
                let size = vec.len();
                let value = V::rand_gen(&mut rng);

                println!("iteration {i}: put({index}, {value:?}) (non-existing)");

                assert_eq!(
                    array.put(index, value, &pin()),
                    Err(IndexOutOfRange { index, size })
                );
            }
            Ops::PushBack => {
                let value = V::rand_gen(&mut rng);

                println!("iteration {i}: push_back({value:?})");

                array.push_back(value.clone(), &pin());
                vec.push(value);
            }
        }
        assert_eq!(array.size(), vec.len());
    }

    let guard = pin();
    for (index, value) in vec.iter().enumerate() {
        assert_eq!(array.get(index, &guard), Ok(value));
    }
}

/// Pushes `steps` distinct values from each thread concurrently, then checks that every value
/// landed exactly once and that each thread's values kept their program order.
pub fn push_concurrent<A: Default + Sync + ConcurrentArray<usize>>(threads: usize, steps: usize) {
    let array = A::default();

    scope(|s| {
        for t in 0..threads {
            let array = &array;
            let _ = s.spawn(move || {
                let mut last_size = 0;
                for i in 0..steps {
                    let value = t * steps + i;
                    array.push_back(value, &pin());

                    let size = array.size();
                    assert!(size > last_size, "size went from {last_size} to {size}");
                    last_size = size;
                    assert!(array.get(size - 1, &pin()).is_ok());
                }
            });
        }
    });

    let total = threads * steps;
    assert_eq!(array.size(), total);

    let guard = pin();
    let mut position = vec![usize::MAX; total];
    for index in 0..total {
        let value = *array.get(index, &guard).unwrap();
        assert_eq!(
            position[value],
            usize::MAX,
            "value {value} stored at both {} and {index}",
            position[value]
        );
        position[value] = index;
    }

    for t in 0..threads {
        let indices = &position[t * steps..(t + 1) * steps];
        assert!(
            indices.windows(2).all(|w| w[0] < w[1]),
            "pushes of thread {t} out of order"
        );
    }
}

/// Randomly runs many operations concurrently and checks the bounds contract: an index below a
/// previously observed size never fails, and the size never decreases.
pub fn stress_concurrent<
    V: Debug + Eq + RandGen + Send + Sync,
    A: Default + Sync + ConcurrentArray<V>,
>(
    threads: usize,
    steps: usize,
) {
    enum Ops {
        Get,
        Put,
        PushBack,
    }
    const OPS: [Ops; 3] = [Ops::Get, Ops::Put, Ops::PushBack];

    let array = A::default();

    scope(|s| {
        for _ in 0..threads {
            let _ = s.spawn(|| {
                let mut rng = thread_rng();
                let mut last_size = 0;
                for _ in 0..steps {
                    let op = OPS.choose(&mut rng).unwrap();
                    let size = array.size();
                    assert!(size >= last_size, "size went from {last_size} to {size}");
                    last_size = size;

                    // Occasionally aim past the end to exercise the bound check.
                    let index = rng.gen_range(0..size + 2);

                    match op {
                        Ops::Get => {
                            let result = array.get(index, &pin()).map(|_| ());
                            if index < size {
                                assert_eq!(result, Ok(()));
                            }
                        }
                        Ops::Put => {
                            let result = array.put(index, V::rand_gen(&mut rng), &pin());
                            if index < size {
                                assert_eq!(result, Ok(()));
                            }
                        }
                        Ops::PushBack => array.push_back(V::rand_gen(&mut rng), &pin()),
                    }
                }
            });
        }
    });
}

/// Where a value written by [`log_concurrent`] came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Pushed at this index before any thread started.
    Seed(usize),
    /// Pushed by `thread` at its `step`.
    Pushed {
        /// Writing thread.
        thread: usize,
        /// Step of the writing thread.
        step: usize,
    },
    /// Put at `index` by `thread` at its `step`.
    Put {
        /// Writing thread.
        thread: usize,
        /// Step of the writing thread.
        step: usize,
        /// Target index.
        index: usize,
    },
}

enum Log {
    Get { index: usize, result: Origin },
    Write(Origin),
}

fn assert_logs_consistent(logs: &[Log], array: &impl ConcurrentArray<Origin>, seeds: usize) {
    let written = logs
        .iter()
        .filter_map(|l| match l {
            Log::Write(origin) => Some(*origin),
            Log::Get { .. } => None,
        })
        .collect::<HashSet<_>>();
    let pushes = written
        .iter()
        .filter(|o| matches!(o, Origin::Pushed { .. }))
        .count();

    let at_index = |index: usize, origin: &Origin| match *origin {
        Origin::Seed(i) | Origin::Put { index: i, .. } => {
            assert_eq!(i, index, "{origin:?} observed at index {index}");
        }
        Origin::Pushed { .. } => {}
    };

    for l in logs {
        if let Log::Get { index, result } = l {
            at_index(*index, result);
            if !matches!(result, Origin::Seed(_)) {
                assert!(
                    written.contains(result),
                    "{result:?} read at {index} but never written"
                );
            }
        }
    }

    let size = array.size();
    assert_eq!(size, seeds + pushes);

    let guard = pin();
    let mut seen = HashSet::new();
    let mut last_step = HashMap::new();
    for index in 0..size {
        let origin = *array.get(index, &guard).unwrap();
        at_index(index, &origin);
        if let Origin::Pushed { thread, step } = origin {
            assert!(seen.insert(origin), "{origin:?} stored twice");
            if let Some(last) = last_step.insert(thread, step) {
                assert!(last < step, "pushes of thread {thread} out of order");
            }
        }
    }
}

/// Randomly runs many operations concurrently and logs the operations & results per thread. Then
/// checks the consistency of the log. For example, a value read at an index must have been pushed,
/// or put at that very index, and every push must be stored exactly once unless overwritten.
pub fn log_concurrent<A: Default + Sync + ConcurrentArray<Origin>>(threads: usize, steps: usize) {
    enum Ops {
        Get,
        Put,
        PushBack,
    }
    const OPS: [Ops; 3] = [Ops::Get, Ops::Put, Ops::PushBack];
    const SEEDS: usize = 16;

    let array = A::default();
    for i in 0..SEEDS {
        array.push_back(Origin::Seed(i), &pin());
    }

    let logs = scope(|s| {
        let mut handles = Vec::new();

        for thread in 0..threads {
            let array = &array;
            let handle = s.spawn(move || {
                let mut rng = thread_rng();
                let mut logs = Vec::new();

                for step in 0..steps {
                    let op = OPS.choose(&mut rng).unwrap();
                    let index = rng.gen_range(0..array.size());

                    match op {
                        Ops::Get => {
                            let guard = pin();
                            let result = *array.get(index, &guard).unwrap();
                            logs.push(Log::Get { index, result });
                        }
                        Ops::Put => {
                            let origin = Origin::Put {
                                thread,
                                step,
                                index,
                            };
                            array.put(index, origin, &pin()).unwrap();
                            logs.push(Log::Write(origin));
                        }
                        Ops::PushBack => {
                            let origin = Origin::Pushed { thread, step };
                            array.push_back(origin, &pin());
                            logs.push(Log::Write(origin));
                        }
                    }
                }
                logs
            });
            handles.push(handle);
        }
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect::<Box<[_]>>()
    });

    assert_logs_consistent(&logs, &array, SEEDS);
}
