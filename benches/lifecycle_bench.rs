use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sentra_lab_runtime::registry::RemoteRuntimeEvent;
use sentra_lab_runtime::runtime::{Agent, Capabilities, Step};
use sentra_lab_runtime::runtime::{AgentBehaviour, AgentContext};
use sentra_lab_runtime::transport::{Envelope, LocalTransport, Transport};
use sentra_lab_runtime::{AgentId, MessageBoxId};
use std::sync::Arc;

struct Finish;

impl AgentBehaviour for Finish {
    fn step(&mut self, _ctx: &mut AgentContext<'_>) -> anyhow::Result<Step> {
        Ok(Step::Finished)
    }
}

fn bench_agent_lifecycle(c: &mut Criterion) {
    c.bench_function("agent_run_to_completion", |b| {
        let id = AgentId::new("bench");
        let agent = Agent::new(id.clone(), Box::new(Finish), Capabilities::detached(&id));

        b.iter(|| {
            agent.run().unwrap();
            agent.await_termination().unwrap();
        });
    });
}

fn bench_event_codec(c: &mut Criterion) {
    let event = RemoteRuntimeEvent::NewAgent(AgentId::new("agent-01hzy4x7d2"));

    c.bench_function("event_encode", |b| {
        b.iter(|| black_box(&event).encode().unwrap());
    });

    let encoded = event.encode().unwrap();
    c.bench_function("event_decode", |b| {
        b.iter(|| RemoteRuntimeEvent::decode(black_box(&encoded)).unwrap());
    });
}

fn bench_local_delivery(c: &mut Criterion) {
    let transport = LocalTransport::new();
    let sender = transport.open(MessageBoxId::new("sender")).unwrap();
    let receiver = transport.open(MessageBoxId::new("receiver")).unwrap();

    let (tx, rx) = crossbeam_channel::unbounded();
    receiver.register_receiver(Arc::new(move |_envelope: Envelope| {
        let _ = tx.send(());
    }));

    c.bench_function("local_send_and_deliver", |b| {
        b.iter(|| {
            sender
                .send(receiver.id(), bytes::Bytes::from_static(b"ping"))
                .unwrap();
            rx.recv().unwrap();
        });
    });
}

criterion_group!(benches, bench_agent_lifecycle, bench_event_codec, bench_local_delivery);
criterion_main!(benches);
