#![doc = include_str!("../README.md")]

mod bus;
pub mod dispatch;
pub mod envelope;
mod mediator;
pub mod serializer;
pub mod transport;

#[doc(inline)]
pub use envelope::{Envelope, Partitioned, ScheduledEnvelope};

#[doc(inline)]
pub use dispatch::{Dispatch, PartitionKeyMismatch};

#[doc(inline)]
pub use bus::{MessageBus, SendError, SendErrorKind};

#[doc(inline)]
pub use transport::{Transport, TransportError, TransportErrorKind};

#[doc(inline)]
pub use mediator::{
    DefaultMediatorHook, Handler, Mediator, MediatorBuilder, MediatorHandle, MediatorHook,
    MediatorState,
};
