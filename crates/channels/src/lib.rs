//! Messaging gateway seam: the contract the dispatch worker sends
//! through, the per-instance provider, and a scriptable mock for tests.

pub mod gateway;
pub mod mock;
pub mod typing;

pub use gateway::{
    FixedGateway, GatewayFactory, InstanceProvider, MessagingGateway, ProviderFactory, SendMessage,
};
pub use mock::MockGateway;
pub use typing::typing_delay_ms;
