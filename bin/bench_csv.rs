//! Benchmark driver: runs the predefined producer/consumer configurations
//! over every engine and emits one CSV row per measurement.
//!
//! Usage: `bench_csv [results.csv]` - without an argument the CSV goes to
//! stdout. The queues only ever see handle calls; all measurement lives
//! here.

use ringspsc_rs::{spsc, spsc_locked, spsc_mapped, Queue, Sink, Source};
use std::env;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::thread;
use std::time::{Duration, Instant};

/// (iterations, batch size); batch 1 runs the single-item operations.
const CONFIGS: &[(u64, usize)] = &[(1_000_000, 1), (1_000_000, 64), (1_000_000, 1024)];

const HEADER: &str = "queue_type,operation_type,capacity,iterations,batch_size,elapsed_us,ops_per_sec";

fn main() -> io::Result<()> {
    let mut out: Box<dyn Write> = match env::args().nth(1) {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    };

    writeln!(out, "{HEADER}")?;
    run_capacity::<64>(&mut out)?;
    run_capacity::<4096>(&mut out)?;
    out.flush()
}

fn run_capacity<const N: usize>(out: &mut dyn Write) -> io::Result<()> {
    for &(iterations, batch) in CONFIGS {
        let elapsed = drive(spsc::<u64, N>(), iterations, batch);
        report(out, "spsc", N, iterations, batch, elapsed)?;

        match spsc_mapped::<u64, N>() {
            Ok(pair) => {
                let elapsed = drive(pair, iterations, batch);
                report(out, "mapped", N, iterations, batch, elapsed)?;
            }
            Err(err) => eprintln!("skipping mapped ring at capacity {N}: {err}"),
        }

        let elapsed = drive(spsc_locked::<u64, N>(), iterations, batch);
        report(out, "locked", N, iterations, batch, elapsed)?;
    }
    Ok(())
}

/// Move `iterations` sequential values through the pair and time it.
fn drive<Q>((mut sink, mut source): (Sink<Q>, Source<Q>), iterations: u64, batch: usize) -> Duration
where
    Q: Queue<Item = u64> + 'static,
{
    let start = Instant::now();

    let producer = thread::spawn(move || {
        if batch == 1 {
            for i in 0..iterations {
                let mut value = i;
                loop {
                    match sink.try_push(value) {
                        Ok(()) => break,
                        Err(rejected) => {
                            value = rejected;
                            thread::yield_now();
                        }
                    }
                }
            }
        } else {
            let mut buffer = vec![0u64; batch];
            let mut sent = 0u64;
            while sent < iterations {
                let want = batch.min((iterations - sent) as usize);
                for (offset, slot) in buffer[..want].iter_mut().enumerate() {
                    *slot = sent + offset as u64;
                }
                let mut done = 0;
                while done < want {
                    let moved = sink.try_push_slice(&buffer[done..want]);
                    if moved == 0 {
                        thread::yield_now();
                    }
                    done += moved;
                }
                sent += want as u64;
            }
        }
    });

    let mut received = 0u64;
    if batch == 1 {
        while received < iterations {
            match source.try_pop() {
                Some(_) => received += 1,
                None => thread::yield_now(),
            }
        }
    } else {
        let mut buffer = vec![0u64; batch];
        while received < iterations {
            let moved = source.try_pop_slice(&mut buffer);
            if moved == 0 {
                thread::yield_now();
            }
            received += moved as u64;
        }
    }

    producer.join().unwrap();
    start.elapsed()
}

fn report(
    out: &mut dyn Write,
    queue_type: &str,
    capacity: usize,
    iterations: u64,
    batch: usize,
    elapsed: Duration,
) -> io::Result<()> {
    let operation = if batch == 1 { "single" } else { "bulk" };
    let elapsed_us = elapsed.as_micros();
    let ops_per_sec = iterations as f64 / elapsed.as_secs_f64();
    writeln!(
        out,
        "{queue_type},{operation},{capacity},{iterations},{batch},{elapsed_us},{ops_per_sec:.0}"
    )
}
