use std::hint::black_box;

use bytes::Bytes;
use chanrt::{
    protocols::{builtin_type_support, MocapData, Transform},
    ChannelRegistry, Context, ContractPolicy, LuaRepr, LuaRuntime, RawTypeSupport,
    TypeSupportHandle,
};
use chanrt_error::CallbackError;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{rngs::SmallRng, Rng, SeedableRng};

fn raw() -> TypeSupportHandle {
    TypeSupportHandle::from_support(RawTypeSupport::new("Mocap", "pb"))
}

fn frame() -> MocapData {
    MocapData {
        transforms: vec![Transform::identity(); 16],
    }
}

fn releasing(
    _ctx: &Context,
    buffer: &Bytes,
    release: chanrt::ReleaseToken,
) -> Result<(), CallbackError> {
    black_box(buffer.len());
    release.release();
    Ok(())
}

fn bench_publish_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_fan_out");
    let mut rng = SmallRng::seed_from_u64(7);
    let payload: Bytes = (0..256).map(|_| rng.gen::<u8>()).collect::<Vec<u8>>().into();

    for subs in [0usize, 1, 10, 100] {
        let registry = ChannelRegistry::with_policy(ContractPolicy::Lenient);
        let publisher = registry.get_publisher("mocap");
        publisher.register_publish_type(raw());
        for i in 0..subs {
            registry
                .module_handle(&format!("sub{i}"))
                .get_subscriber("mocap")
                .subscribe(raw(), releasing);
        }
        registry.seal();

        group.throughput(Throughput::Elements(subs.max(1) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(subs), &subs, |b, _| {
            b.iter(|| {
                publisher
                    .publish("Mocap", &Context::publish(), black_box(payload.clone()))
                    .unwrap();
            })
        });
    }
    group.finish();
}

fn bench_publish_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_message");
    for encoding in ["json", "msgpack", "bincode"] {
        let registry = ChannelRegistry::with_policy(ContractPolicy::Lenient);
        let publisher = registry.get_publisher("mocap");
        let subscriber = registry.get_subscriber("mocap");
        let handle = builtin_type_support(MocapData::TYPE_NAME, encoding);
        publisher.register_publish_type(handle.clone());
        subscriber.subscribe(handle, releasing);

        let msg = frame();
        group.bench_function(encoding, |b| {
            b.iter(|| {
                publisher
                    .publish_message(MocapData::TYPE_NAME, &Context::publish(), black_box(&msg))
                    .unwrap();
            })
        });
    }
    group.finish();
}

fn bench_encoding_bridge(c: &mut Criterion) {
    let registry = ChannelRegistry::with_policy(ContractPolicy::Lenient);
    let publisher = registry.get_publisher("mocap");
    publisher.register_publish_type(builtin_type_support(MocapData::TYPE_NAME, "json"));
    // Три подписчика одной чужой кодировки: мост считается один раз.
    for i in 0..3 {
        registry
            .module_handle(&format!("sub{i}"))
            .get_subscriber("mocap")
            .subscribe(builtin_type_support(MocapData::TYPE_NAME, "msgpack"), releasing);
    }

    let msg = frame();
    c.bench_function("bridge_json_to_msgpack_3_subs", |b| {
        b.iter(|| {
            publisher
                .publish_message(MocapData::TYPE_NAME, &Context::publish(), black_box(&msg))
                .unwrap();
        })
    });
}

fn bench_lua_boundary(c: &mut Criterion) {
    let registry = ChannelRegistry::with_policy(ContractPolicy::Lenient);
    let publisher = registry.get_publisher("mocap");
    let subscriber = registry.get_subscriber("mocap");
    publisher.register_publish_type(raw());

    let runtime = LuaRuntime::new("bench").unwrap();
    runtime
        .exec("count = 0; function on_mocap(ctx, msg) count = count + #msg end", "bench")
        .unwrap();
    runtime
        .subscribe(&subscriber, raw(), "on_mocap", LuaRepr::Bytes, None)
        .unwrap();

    c.bench_function("lua_bytes_delivery", |b| {
        b.iter(|| {
            publisher
                .publish("Mocap", &Context::publish(), Bytes::from_static(b"0123456789"))
                .unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_publish_fan_out,
    bench_publish_message,
    bench_encoding_bridge,
    bench_lua_boundary
);
criterion_main!(benches);
