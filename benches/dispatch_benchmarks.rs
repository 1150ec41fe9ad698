use std::hint::black_box;
use std::net::SocketAddr;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion};
use rmhb::node::{Event, Message, Node};
use rmhb::settings::{NodeRole, ProtocolSettings};

fn addr(last: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, last], 30001))
}

fn relay_with_neighbors() -> Node {
    let settings = ProtocolSettings::default()
        .with_role(NodeRole::Relay)
        .with_seed(1);
    let mut node = Node::new(addr(1), settings);
    let now = Instant::now();
    for last in 2..12 {
        node.handle(
            Event::Inbound {
                from: addr(last),
                message: Message::Announce,
            },
            now,
        );
    }
    node
}

fn benchmark_codec(c: &mut Criterion) {
    let message = Message::Data {
        value: 42,
        version: 7,
        hops: 3,
    };
    let encoded = message.encode().unwrap();

    c.bench_function("message_encode", |b| {
        b.iter(|| black_box(black_box(&message).encode()))
    });
    c.bench_function("message_decode", |b| {
        b.iter(|| black_box(Message::decode(black_box(&encoded))))
    });
}

fn benchmark_dispatch(c: &mut Criterion) {
    let now = Instant::now();
    let data = Message::Data {
        value: 42,
        version: 1,
        hops: 0,
    }
    .encode()
    .unwrap();
    let beacon = Message::VersionBeacon { version: 1 }.encode().unwrap();

    c.bench_function("dispatch_data_forward", |b| {
        let mut node = relay_with_neighbors();
        b.iter(|| black_box(node.handle_datagram(addr(2), black_box(&data), now)))
    });

    c.bench_function("dispatch_beacon_in_sync", |b| {
        let mut node = relay_with_neighbors();
        node.handle_datagram(addr(2), &data, now);
        b.iter(|| black_box(node.handle_datagram(addr(3), black_box(&beacon), now)))
    });
}

criterion_group!(benches, benchmark_codec, benchmark_dispatch);
criterion_main!(benches);
