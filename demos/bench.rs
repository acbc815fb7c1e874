use clap::{Parser, Subcommand};
use md_fanout::{
    DataType, Kline, LatencyStats, MarketData, MarketDataHub, SpmcRing, Symbol, Trade,
    mono_time_ns,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(not(unix))]
compile_error!("This crate only supports Unix-like operating systems.");

const RING_LEN: usize = 4096;

#[derive(Parser, Debug)]
#[command(version, about = "Benchmarks for the market-data fan-out", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// One writer, multiple busy-polling readers on a raw ring.
    Broadcast {
        /// Number of records to publish.
        #[arg(short = 'n', long = "records", default_value_t = 1_000_000)]
        records: u64,

        /// Number of concurrent readers.
        #[arg(short = 'r', long = "readers", default_value_t = 2)]
        readers: usize,
    },

    /// End-to-end hub fan-out with tag-filtered subscribers.
    Hub {
        /// Number of records to publish per tag.
        #[arg(short = 'n', long = "records", default_value_t = 500_000)]
        records: u64,
    },
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    match args.command {
        Commands::Broadcast { records, readers } => broadcast(records, readers),
        Commands::Hub { records } => hub(records),
    }
}

/// Pins the current thread to the `slot`-th core when the machine has
/// enough of them; benchmarking still works unpinned, just noisier.
fn pin_to_core(slot: usize) {
    if let Some(cores) = core_affinity::get_core_ids() {
        if let Some(core) = cores.get(slot) {
            core_affinity::set_for_current(*core);
        }
    }
}

fn broadcast(records: u64, readers: usize) {
    println!(
        "broadcast: records={records}, readers={readers}, ring={RING_LEN}, record size={}",
        std::mem::size_of::<Trade>(),
    );

    let ring = SpmcRing::<Trade, RING_LEN>::new();
    let tx = ring.writer();

    let handles: Vec<_> = (0..readers)
        .map(|tid| {
            let mut rx = ring.reader();
            std::thread::spawn(move || {
                pin_to_core(tid + 2);
                let mut stats = LatencyStats::with_capacity(records as usize);
                let mut count = 0u64;
                loop {
                    // Busy poll: this is the no-sleep, core-burning mode.
                    let Some(trade) = rx.read() else {
                        std::hint::spin_loop();
                        continue;
                    };
                    stats.record(mono_time_ns().saturating_sub(trade.timestamp));
                    count += 1;
                    if trade.quantity as u64 >= records {
                        break;
                    }
                }
                println!(
                    "reader {tid}: observed={count} lagged={} | {}",
                    rx.lagged(),
                    stats.report(&format!("latency[{tid}]")),
                );
            })
        })
        .collect();

    pin_to_core(1);
    for i in 1..=records {
        tx.write(|slot| {
            slot.timestamp = mono_time_ns();
            slot.quantity = i as f64;
            slot.price = 50_000.0 + (i % 100) as f64;
            slot.symbol = Symbol::new("BTCUSDT");
            slot.is_buyer_maker = i % 2 == 0;
        });
    }

    for handle in handles {
        handle.join().unwrap();
    }
}

fn hub(records: u64) {
    println!("hub: records per tag={records}, ring={}", md_fanout::DEFAULT_RING_CAPACITY);

    let hub: MarketDataHub = MarketDataHub::new();

    let trade_count = Arc::new(AtomicU64::new(0));
    let trade_stats = Arc::new(Mutex::new(LatencyStats::with_capacity(records as usize)));
    let kline_count = Arc::new(AtomicU64::new(0));

    let count = Arc::clone(&trade_count);
    let stats = Arc::clone(&trade_stats);
    hub.subscribe(DataType::Trade, move |_, data| {
        let MarketData::Trade(t) = data else { return };
        stats.lock().record(mono_time_ns().saturating_sub(t.timestamp));
        count.fetch_add(1, Ordering::Relaxed);
    });
    let count = Arc::clone(&kline_count);
    hub.subscribe(DataType::Kline, move |_, _| {
        count.fetch_add(1, Ordering::Relaxed);
    });

    let started = mono_time_ns();
    for i in 1..=records {
        hub.publish_trade(Trade {
            timestamp: mono_time_ns(),
            price: 50_000.0 + (i % 100) as f64,
            quantity: 1.0,
            symbol: Symbol::new("BTCUSDT"),
            is_buyer_maker: i % 2 == 0,
        });
        hub.publish_kline(Kline {
            timestamp: mono_time_ns(),
            open: 50_000.0,
            high: 50_100.0,
            low: 49_900.0,
            close: 50_000.0 + (i % 100) as f64,
            volume: 100.0,
            symbol: Symbol::new("BTCUSDT"),
        });
    }
    let elapsed_ns = mono_time_ns() - started;

    // Give the consumers a moment to drain the tail, then tear down.
    std::thread::sleep(std::time::Duration::from_millis(100));
    hub.stop_all();

    let published = records * 2;
    let trades = trade_count.load(Ordering::Relaxed);
    let klines = kline_count.load(Ordering::Relaxed);
    println!(
        "published {published} records in {:.1} ms ({:.2} M records/s)",
        elapsed_ns as f64 / 1e6,
        published as f64 * 1e3 / elapsed_ns as f64,
    );
    println!(
        "trade subscriber: delivered={trades} dropped={}",
        records - trades,
    );
    println!(
        "kline subscriber: delivered={klines} dropped={}",
        records - klines,
    );
    println!("{}", trade_stats.lock().report("trade latency"));
}
