//! Liveness check benchmarks
//!
//! Measures the cost of one liveness check, which bounds how much work every
//! watcher tick adds on top of the poll interval.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::time::Duration;
use tcp_session::io::{is_alive, Pollable};

fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();
    (client, server)
}

fn bench_is_alive_idle(c: &mut Criterion) {
    let (client, _server) = socket_pair();

    c.bench_function("is_alive_idle", |b| {
        b.iter(|| black_box(is_alive(&client, Duration::ZERO)))
    });
}

fn bench_is_alive_buffered(c: &mut Criterion) {
    let (client, mut server) = socket_pair();
    server.write_all(&[0u8; 1024]).unwrap();
    std::thread::sleep(Duration::from_millis(20));

    c.bench_function("is_alive_buffered", |b| {
        b.iter(|| black_box(is_alive(&client, Duration::ZERO)))
    });
}

fn bench_buffered_bytes(c: &mut Criterion) {
    let (client, _server) = socket_pair();

    c.bench_function("buffered_bytes", |b| {
        b.iter(|| black_box(client.buffered_bytes().unwrap()))
    });
}

criterion_group!(
    benches,
    bench_is_alive_idle,
    bench_is_alive_buffered,
    bench_buffered_bytes
);

criterion_main!(benches);
