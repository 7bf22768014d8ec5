//! Async usage examples for ChannelPool

use connpool::{ChannelPool, MetricsExporter, PoolConfig};
use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::sleep;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter("info").init();

    println!("=== connpool - Async Examples ===\n");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        // Keep accepted sockets alive until the demo exits.
        let mut accepted = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            accepted.push(stream);
        }
    });

    let pool = ChannelPool::with_config(
        PoolConfig::new().with_initial_size(2).with_max_size(4),
        move || Ok(TcpStream::connect(addr)?),
    )
    .unwrap();

    // Example 1: Async acquisition
    async_acquire(&pool).await;

    // Example 2: Concurrent access
    concurrent_access(pool.clone()).await;

    // Example 3: Prometheus export
    prometheus_export(&pool);

    pool.shutdown();
}

async fn async_acquire(pool: &ChannelPool<TcpStream>) {
    println!("1. Async Acquire:");

    let idle = pool.acquire_async().await.unwrap();
    let other = pool.acquire_async().await.unwrap();
    let fresh = pool.acquire_async().await.unwrap();
    println!("   Three connections out, idle: {}", pool.size());

    drop(idle);
    drop(other);
    drop(fresh);
    println!("   All returned, idle: {}\n", pool.size());
}

async fn concurrent_access(pool: ChannelPool<TcpStream>) {
    println!("2. Concurrent Access:");

    let pool = Arc::new(pool);
    let mut handles = vec![];

    for i in 0..10 {
        let pool_clone = Arc::clone(&pool);
        let handle = tokio::spawn(async move {
            match pool_clone.acquire_async().await {
                Ok(conn) => {
                    println!("   Task {} got {}", i, conn.local_addr().unwrap());
                    sleep(Duration::from_millis(50)).await;
                }
                Err(e) => println!("   Task {} failed: {}", i, e),
            }
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.await.unwrap();
    }

    println!("   Final idle: {}\n", pool.size());
}

fn prometheus_export(pool: &ChannelPool<TcpStream>) {
    println!("3. Prometheus Export:");

    let mut tags = HashMap::new();
    tags.insert("service".to_string(), "demo".to_string());

    print!("{}", MetricsExporter::export_prometheus(&pool.metrics(), "tcp", Some(&tags)));
}
