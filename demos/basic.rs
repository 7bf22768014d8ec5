//! Basic usage examples for ChannelPool

use connpool::{ChannelPool, PoolConfig};
use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::thread;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    println!("=== connpool - Basic Examples ===\n");

    let addr = spawn_echo_listener();

    // Example 1: Prefilled pool
    prefilled_pool(&addr);

    // Example 2: Overflow and surplus
    overflow_and_surplus(&addr);

    // Example 3: Discarding broken connections
    unusable_connections(&addr);

    // Example 4: Shutdown
    shutdown(&addr);
}

/// Throwaway local listener that accepts connections and reads until EOF
fn spawn_echo_listener() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind local listener");
    let addr = listener.local_addr().expect("listener address").to_string();

    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            thread::spawn(move || {
                let mut stream = stream;
                let mut buffer = [0u8; 256];
                while matches!(stream.read(&mut buffer), Ok(n) if n > 0) {}
            });
        }
    });

    addr
}

fn tcp_pool(addr: &str, config: PoolConfig) -> ChannelPool<TcpStream> {
    let addr = addr.to_string();
    ChannelPool::with_config(config, move || Ok(TcpStream::connect(&addr)?)).unwrap()
}

fn prefilled_pool(addr: &str) {
    println!("1. Prefilled Pool:");
    let pool = tcp_pool(addr, PoolConfig::new().with_initial_size(3).with_max_size(5));
    println!("   Idle after construction: {}", pool.size());

    {
        let conn = pool.acquire().unwrap();
        println!("   Got connection to {}", conn.peer_addr().unwrap());
        println!("   Idle while checked out: {}", pool.size());
        // Connection returns to the pool when dropped
    }

    println!("   Idle after return: {}\n", pool.size());
}

fn overflow_and_surplus(addr: &str) {
    println!("2. Overflow and Surplus:");
    let pool = tcp_pool(addr, PoolConfig::new().with_initial_size(1).with_max_size(1));

    let first = pool.acquire().unwrap();
    let second = pool.acquire().unwrap();
    println!("   Two connections out, idle: {}", pool.size());

    first.close().unwrap();
    second.close().unwrap();
    println!("   Both closed, idle capped at: {}", pool.size());
    println!("   Surplus discarded: {}\n", pool.metrics().surplus_discarded);
}

fn unusable_connections(addr: &str) {
    println!("3. Unusable Connections:");
    let pool = tcp_pool(addr, PoolConfig::new().with_initial_size(2).with_max_size(2));

    let conn = pool.acquire().unwrap();
    conn.mark_unusable();
    conn.close().unwrap();

    println!("   Idle after discarding: {}\n", pool.size());
}

fn shutdown(addr: &str) {
    println!("4. Shutdown:");
    let pool = tcp_pool(addr, PoolConfig::new().with_initial_size(2).with_max_size(4));
    let held = pool.acquire().unwrap();

    pool.shutdown();
    println!("   Idle after shutdown: {}", pool.size());
    println!("   Acquire after shutdown: {}", pool.acquire().unwrap_err());

    held.close().unwrap();

    println!("\n   Metrics:");
    let mut metrics: Vec<_> = pool.metrics().export().into_iter().collect();
    metrics.sort();
    for (key, value) in metrics {
        println!("     {}: {}", key, value);
    }
}
