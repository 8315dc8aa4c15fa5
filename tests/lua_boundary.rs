use std::{sync::Arc, thread};

use bytes::Bytes;
use chanrt::{
    protocols::{MocapData, Transform},
    ChannelRegistry, Context, ContractPolicy, JsonTypeSupport, LuaRepr, LuaRuntime,
    RawTypeSupport, TypeSupportHandle,
};

fn raw() -> TypeSupportHandle {
    TypeSupportHandle::from_support(RawTypeSupport::new("Mocap", "pb"))
}

fn mocap_json() -> TypeSupportHandle {
    TypeSupportHandle::from_support(JsonTypeSupport::<MocapData>::new(MocapData::TYPE_NAME))
}

fn global<T: mlua::FromLua>(
    runtime: &LuaRuntime,
    name: &str,
) -> T {
    runtime.with_lua(|lua| lua.globals().get(name)).unwrap()
}

/// Тест проверяет доставку копии буфера как Lua-строки вместе с контекстом.
#[test]
fn test_bytes_representation() {
    let registry = ChannelRegistry::with_policy(ContractPolicy::Lenient);
    let publisher = registry.get_publisher("mocap");
    let subscriber = registry.get_subscriber("mocap");
    publisher.register_publish_type(raw());

    let runtime = LuaRuntime::new("script").unwrap();
    runtime
        .exec(
            r#"
            sizes = {}
            function on_mocap(ctx, msg)
                table.insert(sizes, #msg)
                last_seq = ctx:get_meta_value("seq")
                last_kind = ctx:kind()
                last_used = ctx:check_used()
            end
            "#,
            "bytes",
        )
        .unwrap();
    assert!(runtime
        .subscribe(&subscriber, raw(), "on_mocap", LuaRepr::Bytes, None)
        .unwrap());

    for seq in 1..=2 {
        let mut ctx = Context::publish();
        ctx.set_meta_value("seq", seq.to_string());
        publisher
            .publish("Mocap", &ctx, Bytes::from_static(b"0123456789"))
            .unwrap();
    }

    let sizes: Vec<i64> = global(&runtime, "sizes");
    assert_eq!(sizes, vec![10, 10]);
    assert_eq!(global::<String>(&runtime, "last_seq"), "2");
    assert_eq!(global::<String>(&runtime, "last_kind"), "subscribe");
    assert!(global::<bool>(&runtime, "last_used"));

    let stats = subscriber.stats();
    assert_eq!(stats.deliveries, 2);
    assert_eq!(stats.releases, 2);
    assert_eq!(stats.callback_failures, 0);
}

/// Тест проверяет табличное представление через структурный вид кодека.
#[test]
fn test_table_representation() {
    let registry = ChannelRegistry::with_policy(ContractPolicy::Lenient);
    let publisher = registry.get_publisher("mocap");
    let subscriber = registry.get_subscriber("mocap");
    publisher.register_publish_type(mocap_json());

    let runtime = LuaRuntime::new("script").unwrap();
    runtime
        .exec(
            r#"
            function on_frame(ctx, msg)
                count = #msg.transforms
                qw = msg.transforms[1].qw
                encoding = ctx:get_serialization_type()
            end
            "#,
            "table",
        )
        .unwrap();
    runtime
        .subscribe(&subscriber, mocap_json(), "on_frame", LuaRepr::Table, None)
        .unwrap();

    let frame = MocapData {
        transforms: vec![Transform::identity(); 2],
    };
    publisher
        .publish_message(MocapData::TYPE_NAME, &Context::publish(), &frame)
        .unwrap();

    assert_eq!(global::<i64>(&runtime, "count"), 2);
    assert_eq!(global::<f64>(&runtime, "qw"), 1.0);
    assert_eq!(global::<String>(&runtime, "encoding"), "json");
    assert_eq!(subscriber.stats().releases, 1);
}

/// Тест проверяет, что ошибка Lua-функции освобождает буфер и уходит в
/// обработчик ошибок скрипта, а не издателю.
#[test]
fn test_lua_error_releases_and_reports() {
    let registry = ChannelRegistry::with_policy(ContractPolicy::Lenient);
    let publisher = registry.get_publisher("mocap");
    let subscriber = registry.get_subscriber("mocap");
    publisher.register_publish_type(raw());

    let runtime = LuaRuntime::new("script").unwrap();
    runtime
        .exec(
            r#"
            errors = 0
            function on_mocap(ctx, msg) error("cannot parse frame") end
            function on_error(err)
                errors = errors + 1
                last_error = err
            end
            "#,
            "failing",
        )
        .unwrap();
    runtime
        .subscribe(&subscriber, raw(), "on_mocap", LuaRepr::Bytes, Some("on_error"))
        .unwrap();

    let result = publisher.publish("Mocap", &Context::publish(), Bytes::from_static(b"frame"));
    assert!(result.is_ok());

    assert_eq!(global::<i64>(&runtime, "errors"), 1);
    assert!(global::<String>(&runtime, "last_error").contains("cannot parse frame"));
    let stats = subscriber.stats();
    assert_eq!(stats.releases, 1);
    assert_eq!(stats.callback_failures, 1);
    assert_eq!(stats.contract_violations, 0);
}

/// Тест проверяет, что паника нативной функции, вызванной из скрипта,
/// доходит до Lua-обработчика ошибок и не уходит издателю.
#[test]
fn test_native_panic_reaches_lua_error_handler() {
    let registry = ChannelRegistry::with_policy(ContractPolicy::Lenient);
    let publisher = registry.get_publisher("mocap");
    let subscriber = registry.get_subscriber("mocap");
    publisher.register_publish_type(raw());

    let runtime = LuaRuntime::new("script").unwrap();
    runtime
        .with_lua(|lua| {
            let decode = lua.create_function(|_, ()| -> mlua::Result<()> {
                panic!("native decoder crashed")
            })?;
            lua.globals().set("native_decode", decode)
        })
        .unwrap();
    runtime
        .exec(
            r#"
            errors = 0
            function on_mocap(ctx, msg) native_decode() end
            function on_error(err)
                errors = errors + 1
                last_error = err
            end
            "#,
            "native",
        )
        .unwrap();
    runtime
        .subscribe(&subscriber, raw(), "on_mocap", LuaRepr::Bytes, Some("on_error"))
        .unwrap();

    let result = publisher.publish("Mocap", &Context::publish(), Bytes::from_static(b"frame"));
    assert!(result.is_ok());

    assert_eq!(global::<i64>(&runtime, "errors"), 1);
    assert!(global::<String>(&runtime, "last_error").contains("native decoder crashed"));
    let stats = subscriber.stats();
    assert_eq!(stats.releases, 1);
    assert_eq!(stats.callback_failures, 1);
}

/// Тест проверяет, что сбой построения представления тоже даёт ровно одно
/// освобождение, а функция не вызывается.
#[test]
fn test_representation_failure_releases() {
    let registry = ChannelRegistry::with_policy(ContractPolicy::Lenient);
    let publisher = registry.get_publisher("mocap");
    let subscriber = registry.get_subscriber("mocap");
    publisher.register_publish_type(raw());

    let runtime = LuaRuntime::new("script").unwrap();
    runtime
        .exec("called = false; function on_mocap(ctx, msg) called = true end", "repr")
        .unwrap();
    // Тождественный кодек не даёт структурного вида.
    runtime
        .subscribe(&subscriber, raw(), "on_mocap", LuaRepr::Table, None)
        .unwrap();

    publisher
        .publish("Mocap", &Context::publish(), Bytes::from_static(b"frame"))
        .unwrap();

    assert!(!global::<bool>(&runtime, "called"));
    let stats = subscriber.stats();
    assert_eq!(stats.releases, 1);
    assert_eq!(stats.callback_failures, 1);
}

/// Тест проверяет, что публикация из Lua-callback'а в топик, на который
/// подписан тот же рантайм, отклоняется без взаимной блокировки.
#[test]
fn test_reentrant_publish_rejected_without_deadlock() {
    let registry = ChannelRegistry::with_policy(ContractPolicy::Lenient);
    let publisher = registry.get_publisher("loop");
    let subscriber = registry.get_subscriber("loop");
    publisher.register_publish_type(raw());

    let runtime = LuaRuntime::new("script").unwrap();
    runtime.expose_publisher(&publisher).unwrap();
    runtime
        .exec(
            r#"
            calls = 0
            function on_loop(ctx, msg)
                calls = calls + 1
                if calls == 1 then
                    echoed = publishers["loop"]:publish("Mocap", "again")
                end
            end
            "#,
            "loop",
        )
        .unwrap();
    runtime
        .subscribe(&subscriber, raw(), "on_loop", LuaRepr::Bytes, None)
        .unwrap();

    publisher
        .publish("Mocap", &Context::publish(), Bytes::from_static(b"first"))
        .unwrap();

    assert_eq!(global::<i64>(&runtime, "calls"), 1);
    assert!(global::<bool>(&runtime, "echoed"));
    let stats = subscriber.stats();
    assert_eq!(stats.deliveries, 2);
    assert_eq!(stats.releases, 2);
    assert_eq!(stats.callback_failures, 1);
    assert_eq!(publisher.published_count(), 2);
}

/// Тест проверяет публикацию из скрипта в нативного подписчика с
/// метаданными из Lua-таблицы.
#[test]
fn test_script_publishes_to_native_subscriber() {
    let registry = ChannelRegistry::with_policy(ContractPolicy::Lenient);
    let publisher = registry.module_handle("lua").get_publisher("out");
    let subscriber = registry.get_subscriber("out");
    publisher.register_publish_type(raw());

    let received = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = received.clone();
    subscriber.subscribe(raw(), move |ctx, buffer, release| {
        sink.lock().unwrap().push((
            ctx.meta_value("seq").map(str::to_string),
            buffer.clone(),
        ));
        release.release();
        Ok(())
    });

    let runtime = LuaRuntime::new("script").unwrap();
    runtime.expose_publisher(&publisher).unwrap();
    runtime
        .exec(
            r#"
            local out = publishers["out"]
            assert(out:topic() == "out")
            out:publish("Mocap", "hello", { seq = "5" })
            local ctx = chanrt.new_context()
            ctx:set_meta_value("seq", "6")
            out:publish("Mocap", "world", ctx)
            ok, err = pcall(function() return out:publish("Unknown", "x") end)
            err = tostring(err)
            "#,
            "publisher",
        )
        .unwrap();

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0], (Some("5".to_string()), Bytes::from_static(b"hello")));
    assert_eq!(received[1], (Some("6".to_string()), Bytes::from_static(b"world")));
    // Незарегистрированный тип из скрипта — Lua-ошибка, а не паника.
    assert!(!global::<bool>(&runtime, "ok"));
    assert!(global::<String>(&runtime, "err").contains("not registered"));
}

/// Тест проверяет, что доставки из разных потоков сериализуются гейтом.
#[test]
fn test_concurrent_deliveries_are_serialized() {
    let registry = ChannelRegistry::with_policy(ContractPolicy::Lenient);
    let publisher = registry.get_publisher("mocap");
    let subscriber = registry.get_subscriber("mocap");
    publisher.register_publish_type(raw());

    let runtime = LuaRuntime::new("script").unwrap();
    runtime
        .exec(
            r#"
            count = 0
            function on_mocap(ctx, msg)
                local seen = count
                for _ = 1, 100 do end
                count = seen + 1
            end
            "#,
            "counter",
        )
        .unwrap();
    runtime
        .subscribe(&subscriber, raw(), "on_mocap", LuaRepr::Bytes, None)
        .unwrap();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let publisher = publisher.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    publisher
                        .publish("Mocap", &Context::publish(), Bytes::from_static(b"x"))
                        .unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(global::<i64>(&runtime, "count"), 200);
    assert_eq!(subscriber.stats().releases, 200);
}
