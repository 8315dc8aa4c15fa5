//! Типизированный канальный слой: контексты, описания типов, эндпоинты
//! издателя и подписчика, протокол освобождения буфера.

mod context;
mod dispatch;
mod proxy;
mod publisher;
mod registry;
mod release;
mod subscriber;
mod type_support;

pub use context::{Context, ContextKind, ContextWire};
pub use proxy::{PublisherProxy, SubscriberProxy};
pub use publisher::PublisherEndpoint;
pub use registry::{ChannelHandle, ChannelRegistry, DEFAULT_OWNER};
pub use release::{ContractPolicy, DeliveryStats, ReleaseToken};
pub use subscriber::{SubscriberCallback, SubscriberEndpoint};
pub use type_support::{TypeKey, TypeRegistry, TypeSupport, TypeSupportHandle};

pub(crate) use dispatch::panic_message;
pub(crate) use release::{DeliveryLedger, ReleaseSlot, SettleSignal};
