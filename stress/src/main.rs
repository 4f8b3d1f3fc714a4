use std::{
    collections::BTreeMap,
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use clap::{Parser, ValueEnum};
use hdrhistogram::Histogram;
use tracing_subscriber::EnvFilter;

use windowgate::{
    AdmissionDecision, AdmissionLimit, WindowDuration, WindowGateError, WindowLimiter,
    WindowLimiterOptions,
};

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum Mode {
    /// Every caller awaits `acquire` (optionally with a deadline).
    Blocking,
    /// Every caller spins on `try_acquire`, sleeping for the advertised retry-after.
    TryAcquire,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "windowgate-stress",
    about = "Load test / admission audit harness for windowgate"
)]
struct Args {
    #[arg(long, value_enum, default_value_t = Mode::Blocking)]
    mode: Mode,

    /// Admissions per window.
    #[arg(long, default_value_t = 5)]
    limit: u32,

    #[arg(long, default_value_t = 1_000)]
    window_ms: u64,

    /// Concurrent callers.
    #[arg(long, default_value_t = 20)]
    callers: usize,

    #[arg(long, default_value_t = 5)]
    duration_s: u64,

    /// Simulated duration of the guarded operation.
    #[arg(long, default_value_t = 0)]
    op_ms: u64,

    /// Give up a single wait after this long (blocking mode only).
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[arg(long, default_value_t = 4)]
    worker_threads: usize,
}

#[derive(Default)]
struct Counts {
    admitted: AtomicU64,
    rejected: AtomicU64,
    cancelled: AtomicU64,
}

struct CallerReport {
    hist: Histogram<u64>,
    per_window: BTreeMap<u32, u64>,
}

fn new_histogram() -> Histogram<u64> {
    Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3).unwrap()
}

fn record(hist: &mut Histogram<u64>, t0: Instant) {
    let us = t0.elapsed().as_micros() as u64;
    let _ = hist.record(us.max(1));
}

async fn run_caller(limiter: Arc<WindowLimiter>, args: Args, counts: Arc<Counts>) -> CallerReport {
    let mut report = CallerReport {
        hist: new_histogram(),
        per_window: BTreeMap::new(),
    };

    loop {
        let t0 = Instant::now();

        let admission = match args.mode {
            Mode::Blocking => {
                let result = match args.timeout_ms {
                    Some(ms) => limiter.acquire_timeout(Duration::from_millis(ms)).await,
                    None => limiter.acquire().await,
                };

                match result {
                    Ok(admission) => admission,
                    Err(WindowGateError::Cancelled) => {
                        counts.cancelled.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    Err(_) => break,
                }
            }
            Mode::TryAcquire => match limiter.try_acquire() {
                Ok(AdmissionDecision::Allowed(admission)) => admission,
                Ok(AdmissionDecision::Rejected { retry_after_ms, .. }) => {
                    counts.rejected.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(Duration::from_millis(retry_after_ms.max(1))).await;
                    continue;
                }
                Err(_) => break,
            },
        };

        record(&mut report.hist, t0);
        counts.admitted.fetch_add(1, Ordering::Relaxed);
        *report.per_window.entry(admission.window_index()).or_default() += 1;

        if args.op_ms > 0 {
            tokio::time::sleep(Duration::from_millis(args.op_ms)).await;
        }
    }

    report
}

fn print_results(
    args: &Args,
    elapsed: Duration,
    hist: &Histogram<u64>,
    per_window: &BTreeMap<u32, u64>,
    counts: &Counts,
) -> bool {
    println!(
        "mode={:?} limit={} window_ms={} callers={} op_ms={} timeout_ms={:?}",
        args.mode, args.limit, args.window_ms, args.callers, args.op_ms, args.timeout_ms
    );
    println!(
        "elapsed_s={:.3} admitted={} rejected={} cancelled={}",
        elapsed.as_secs_f64(),
        counts.admitted.load(Ordering::Relaxed),
        counts.rejected.load(Ordering::Relaxed),
        counts.cancelled.load(Ordering::Relaxed)
    );

    if !hist.is_empty() {
        println!(
            "wait_us p50={} p95={} p99={} p999={} max={}",
            hist.value_at_quantile(0.50),
            hist.value_at_quantile(0.95),
            hist.value_at_quantile(0.99),
            hist.value_at_quantile(0.999),
            hist.max()
        );
    } else {
        println!("no admissions recorded");
    }

    let mut within_limit = true;
    for (window_index, admitted) in per_window {
        let flag = if *admitted > args.limit as u64 {
            within_limit = false;
            "  OVER LIMIT"
        } else {
            ""
        };
        println!("window={window_index} admitted={admitted}{flag}");
    }

    within_limit
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let options = match (
        WindowDuration::try_from(args.window_ms),
        AdmissionLimit::try_from(args.limit),
    ) {
        (Ok(window_duration), Ok(limit)) => WindowLimiterOptions {
            window_duration,
            limit,
        },
        (Err(err), _) | (_, Err(err)) => {
            eprintln!("error: {err}");
            return ExitCode::from(2);
        }
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(args.worker_threads.max(1))
        .build()
        .unwrap();

    let within_limit = rt.block_on(async {
        let limiter = Arc::new(WindowLimiter::new(options).unwrap());
        let counts = Arc::new(Counts::default());
        let started = Instant::now();

        let handles: Vec<_> = (0..args.callers)
            .map(|_| {
                tokio::spawn(run_caller(
                    Arc::clone(&limiter),
                    args.clone(),
                    Arc::clone(&counts),
                ))
            })
            .collect();

        tokio::time::sleep(Duration::from_secs(args.duration_s)).await;
        limiter.shutdown();

        let mut merged = new_histogram();
        let mut per_window: BTreeMap<u32, u64> = BTreeMap::new();
        for handle in handles {
            let report = handle.await.unwrap();
            merged.add(&report.hist).unwrap();
            for (window_index, admitted) in report.per_window {
                *per_window.entry(window_index).or_default() += admitted;
            }
        }

        print_results(&args, started.elapsed(), &merged, &per_window, &counts)
    });

    if within_limit {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
