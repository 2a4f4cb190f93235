use hft_broadcast::{
    MmapStorage, MsgTypeId, Receiver, Region, Samples, Storage, TRAILER_LENGTH, Transmitter,
    mono_time_ns,
};
use std::env;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const CAPACITY: usize = 1024;
const N_RECEIVERS: usize = 3;
const DEFAULT_PATH: &str = "/dev/shm/hft-broadcast.dat";
const DEFAULT_SECONDS: u64 = 5;

/// Only every `SAMPLE_EVERY`-th message is timed, up to `MAX_SAMPLES`.
const SAMPLE_EVERY: u64 = 64;
const MAX_SAMPLES: usize = 1_000_000;

/// `{seq, seq + 1, transmit timestamp}` as little-endian words.
const PAYLOAD_LENGTH: usize = 24;
const TICK_TYPE_ID: i32 = 1;

fn usage(program: &str) -> ! {
    eprintln!("Usage: {program} writer|reader|both [path] [seconds]");
    std::process::exit(1);
}

fn main() -> hft_broadcast::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_ids(true)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage(&args[0]);
    }
    let path = args.get(2).map(String::as_str).unwrap_or(DEFAULT_PATH);
    let seconds = match args.get(3).map(|s| s.parse::<u64>()) {
        None => DEFAULT_SECONDS,
        Some(Ok(seconds)) => seconds,
        Some(Err(_)) => usage(&args[0]),
    };
    let duration = Duration::from_secs(seconds);

    match args[1].as_str() {
        "writer" => {
            let storage = MmapStorage::create(path, CAPACITY + TRAILER_LENGTH)?;
            let (tx, _) = Region::create(storage)?;
            info!(path, capacity = CAPACITY, seconds, "writer started");
            writer(tx, duration)
        }
        "reader" => {
            let region = Region::attach(MmapStorage::open(path)?)?;
            info!(path, capacity = region.capacity(), seconds, "reader started");
            reader(region.receiver(), duration);
            Ok(())
        }
        "both" => {
            let storage = MmapStorage::create(path, CAPACITY + TRAILER_LENGTH)?;
            let (tx, region) = Region::create(storage)?;
            info!(path, capacity = CAPACITY, seconds, receivers = N_RECEIVERS, "started");

            let receivers: Vec<_> = (0..N_RECEIVERS)
                .map(|_| {
                    let rx = region.receiver();
                    // Readers outlive the writer slightly to drain the tail.
                    thread::spawn(move || reader(rx, duration + Duration::from_millis(100)))
                })
                .collect();
            let sender = thread::spawn(move || writer(tx, duration));

            for receiver in receivers {
                receiver.join().expect("reader thread panicked");
            }
            sender.join().expect("writer thread panicked")
        }
        _ => usage(&args[0]),
    }
}

fn writer<S: Storage>(mut tx: Transmitter<S>, duration: Duration) -> hft_broadcast::Result<()> {
    let tick = MsgTypeId::new(TICK_TYPE_ID)?;
    let mut samples = Samples::with_capacity(MAX_SAMPLES);
    let deadline = Instant::now() + duration;
    let mut seq: u64 = 0;

    while Instant::now() < deadline {
        let ts0 = mono_time_ns();
        tx.transmit_with(tick, PAYLOAD_LENGTH, |record| {
            record.put_u64_le(0, seq);
            record.put_u64_le(8, seq + 1);
            record.put_u64_le(16, ts0);
        })?;
        let ts1 = mono_time_ns();
        if seq % SAMPLE_EVERY == 0 && samples.len() < MAX_SAMPLES {
            samples.push(ts1 - ts0);
        }
        seq += 1;
    }

    info!(messages = seq, position = tx.position(), "writer done");
    if let Some(summary) = samples.summary() {
        info!(%summary, "transmit latency (ns)");
    }
    Ok(())
}

fn reader<S: Storage>(mut rx: Receiver<S>, duration: Duration) {
    let mut samples = Samples::with_capacity(MAX_SAMPLES);
    let deadline = Instant::now() + duration;
    let mut messages: u64 = 0;
    let mut gaps: u64 = 0;
    let mut torn: u64 = 0;
    let mut inconsistent: u64 = 0;
    let mut prev_seq: Option<u64> = None;

    while Instant::now() < deadline {
        if !rx.receive_next_timeout(Duration::from_millis(100)) {
            continue;
        }
        let Ok(payload) = rx.payload() else {
            continue;
        };
        if payload.len() != PAYLOAD_LENGTH {
            warn!(length = payload.len(), "unexpected payload length");
            rx.validate();
            continue;
        }
        let v0 = payload.read_u64_le(0);
        let v1 = payload.read_u64_le(8);
        let ts = payload.read_u64_le(16);
        if !rx.validate() {
            torn += 1;
            continue;
        }

        let now = mono_time_ns();
        messages += 1;
        if v1 != v0 + 1 {
            inconsistent += 1;
        }
        if let Some(prev) = prev_seq {
            gaps += v0.saturating_sub(prev + 1);
        }
        prev_seq = Some(v0);
        if messages % SAMPLE_EVERY == 0 && samples.len() < MAX_SAMPLES {
            samples.push(now.saturating_sub(ts));
        }
    }

    info!(
        messages,
        missed = gaps,
        torn,
        lapped = rx.lapped_count(),
        "reader done"
    );
    if inconsistent > 0 {
        error!(inconsistent, "validated records with inconsistent payloads");
    }
    if let Some(summary) = samples.summary() {
        info!(%summary, "end-to-end latency (ns)");
    }
}
