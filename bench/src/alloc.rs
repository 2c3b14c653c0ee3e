// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A counting global allocator, and `criterion` measurements over it.
//!
//! Decode is expected to be allocation free apart from the returned
//! match, and action compile to allocate only as the action buffer
//! doubles. These measurements make regressions in either visible.

use super::MeasurementInfo;
use criterion::Criterion;
use criterion::Throughput;
use criterion::measurement::Measurement;
use criterion::measurement::ValueFormatter;
use std::alloc::GlobalAlloc;
use std::alloc::Layout;
use std::alloc::System;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[global_allocator]
static COUNTING: CountingAlloc = CountingAlloc {
    allocs: AtomicU64::new(0),
    bytes: AtomicU64::new(0),
};

// criterion runs one benchmark at a time, so global counters suffice.
struct CountingAlloc {
    allocs: AtomicU64,
    bytes: AtomicU64,
}

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.allocs.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(layout.size() as u64, Ordering::Relaxed);
        // Safety: forwarded unchanged from our caller.
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // Safety: `ptr` was handed out by `alloc` above.
        unsafe { System.dealloc(ptr, layout) }
    }

    unsafe fn realloc(
        &self,
        ptr: *mut u8,
        layout: Layout,
        new_size: usize,
    ) -> *mut u8 {
        self.allocs.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(new_size as u64, Ordering::Relaxed);
        // Safety: forwarded unchanged from our caller.
        unsafe { System.realloc(ptr, layout, new_size) }
    }
}

/// A counter kept by the allocator.
#[derive(Clone, Copy, Debug)]
pub enum Counter {
    /// Number of allocations, reallocations included.
    Allocs,
    /// Bytes requested across those allocations.
    Bytes,
}

impl Counter {
    fn read(self) -> u64 {
        match self {
            Self::Allocs => COUNTING.allocs.load(Ordering::Relaxed),
            Self::Bytes => COUNTING.bytes.load(Ordering::Relaxed),
        }
    }
}

/// A [`Measurement`] of one allocator counter.
#[derive(Default)]
pub struct Allocated<const BYTES: bool>;

pub type Allocs = Allocated<false>;
pub type BytesAlloced = Allocated<true>;

impl<const BYTES: bool> Allocated<BYTES> {
    const COUNTER: Counter =
        if BYTES { Counter::Bytes } else { Counter::Allocs };
}

impl<const BYTES: bool> Measurement for Allocated<BYTES> {
    type Intermediate = u64;
    type Value = u64;

    fn start(&self) -> u64 {
        Self::COUNTER.read()
    }

    fn end(&self, start: u64) -> u64 {
        Self::COUNTER.read() - start
    }

    fn add(&self, v1: &u64, v2: &u64) -> u64 {
        v1 + v2
    }

    fn zero(&self) -> u64 {
        0
    }

    fn to_f64(&self, value: &u64) -> f64 {
        *value as f64
    }

    fn formatter(&self) -> &dyn ValueFormatter {
        if BYTES { &BYTES_FMT } else { &COUNT_FMT }
    }
}

impl<const BYTES: bool> MeasurementInfo for Allocated<BYTES> {
    fn label() -> &'static str {
        if BYTES { "alloc_sz" } else { "alloc_ct" }
    }
}

// Per-flow counts are small enough to print as is.
struct Unscaled(&'static str);

static COUNT_FMT: Unscaled = Unscaled("");
static BYTES_FMT: Unscaled = Unscaled("B");

impl ValueFormatter for Unscaled {
    fn scale_values(&self, _typical: f64, _vals: &mut [f64]) -> &'static str {
        self.0
    }

    fn scale_throughputs(
        &self,
        _typical: f64,
        _throughput: &Throughput,
        _values: &mut [f64],
    ) -> &'static str {
        self.0
    }

    fn scale_for_machines(&self, _values: &mut [f64]) -> &'static str {
        self.0
    }
}

/// A [`Criterion`] tuned for allocation counts, which don't vary
/// between iterations.
pub fn new_crit<const BYTES: bool>(
    m: Allocated<BYTES>,
) -> Criterion<Allocated<BYTES>> {
    Criterion::default()
        .with_measurement(m)
        .sample_size(10)
        .warm_up_time(Duration::from_nanos(1))
        .measurement_time(Duration::from_micros(10))
        .nresamples(1)
        .without_plots()
}
