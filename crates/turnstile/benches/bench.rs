use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::{
    io::{BufRead, BufReader, Read, Write},
    net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpStream},
    thread::scope,
    time::{Duration, Instant},
};
use turnstile::{PoolConfig, Server, ServerConfig};

const PAYLOAD: &[u8] = b"the quick brown fox jumps over the lazy dog\n";

// Connections opened per iteration by each client thread.
const CONNECTIONS: usize = 64;

fn echo_line(input: &mut dyn Read, output: &mut dyn Write) -> anyhow::Result<()> {
    let mut line = String::new();
    BufReader::new(input).read_line(&mut line)?;
    output.write_all(line.as_bytes())?;
    Ok(())
}

fn start_server(min: usize, max: usize) -> Server {
    let config = ServerConfig::new(0)
        .with_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .with_backlog(1024)
        .with_pool(PoolConfig::new(min, max, Duration::from_secs(5)).unwrap());
    let server = Server::new(config);
    server.start(echo_line).unwrap();
    server
}

fn roundtrip(addr: SocketAddr) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_nodelay(true).unwrap();
    stream.write_all(PAYLOAD).unwrap();
    stream.shutdown(Shutdown::Write).unwrap();
    let mut reply = Vec::with_capacity(PAYLOAD.len());
    stream.read_to_end(&mut reply).unwrap();
    reply
}

/// One client, one connection at a time: accept + dispatch + handler latency.
fn bench_sequential(c: &mut Criterion) {
    let server = start_server(1, 1);
    let addr = server.local_addr().unwrap();

    let mut group = c.benchmark_group("roundtrip/sequential");
    group.throughput(Throughput::Elements(1));
    group.bench_function("echo", |b| b.iter(|| black_box(roundtrip(addr))));
    group.finish();

    server.stop().unwrap();
}

/// Several clients hammering the pool at once.
fn bench_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("roundtrip/concurrent");

    for clients in [2, 4, 8] {
        let server = start_server(clients, clients * 2);
        let addr = server.local_addr().unwrap();

        group.throughput(Throughput::Elements((clients * CONNECTIONS) as u64));
        group.bench_function(format!("clients/{clients}"), |b| {
            b.iter_custom(|iters| {
                let start = Instant::now();
                for _ in 0..iters {
                    scope(|s| {
                        for _ in 0..clients {
                            s.spawn(|| {
                                for _ in 0..CONNECTIONS {
                                    black_box(roundtrip(addr));
                                }
                            });
                        }
                    });
                }
                start.elapsed()
            });
        });

        server.stop().unwrap();
    }

    group.finish();
}

criterion_group!(benches, bench_sequential, bench_concurrent);
criterion_main!(benches);
