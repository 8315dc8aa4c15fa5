/// Typed channels: context, type supports, endpoints, registry, release protocol.
pub mod channel;
/// Wire formats and `TypeSupport` implementations over serde.
pub mod codec;
/// Process configuration loading.
pub mod config;
/// Executors that run module loops.
pub mod executor;
/// Flexible logging (formatting, filters, sinks).
pub mod logging;
/// Module lifecycle host and demo modules.
pub mod module;
/// Demo message types and the built-in type support catalog.
pub mod protocols;
/// Runtime boundary: execution gate, foreign callback adapter, embedded Lua.
pub mod runtime;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Channel API.
pub use channel::{
    ChannelHandle, ChannelRegistry, Context, ContextKind, ContextWire, ContractPolicy,
    DeliveryStats, PublisherEndpoint, PublisherProxy, ReleaseToken, SubscriberCallback,
    SubscriberEndpoint, SubscriberProxy, TypeKey, TypeRegistry, TypeSupport, TypeSupportHandle,
    DEFAULT_OWNER,
};
/// Error types and result aliases.
pub use chanrt_error::{
    BoundaryError, CallbackError, ChanResult, ChannelError, CodecError, ErrorExt, ModuleError,
    ResultExt, StackError, StatusCode,
};
/// Codecs.
pub use codec::{
    BincodeFormat, BincodeTypeSupport, JsonFormat, JsonTypeSupport, MsgPackFormat,
    MsgPackTypeSupport, RawPayload, RawTypeSupport, SerdeTypeSupport, WireFormat,
};
/// config
pub use self::config::Settings;
/// Executors.
pub use executor::{Executor, ExecutorManager, ThreadExecutor, TokioExecutor};
/// Module host.
pub use module::{
    LuaScriptModule, Module, ModuleCore, ModuleHost, NormalPublisherModule,
    NormalSubscriberModule,
};
/// Runtime boundary.
pub use runtime::{BoundaryCallback, ExecutionGate, ForeignHandler, GateScope, LuaRepr, LuaRuntime};
