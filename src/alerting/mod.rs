//! Alert routing and delivery
//!
//! [`AlertDispatcher`] fans an event out to the channels its severity calls
//! for and keeps a bounded history of what happened. Channels never fail a
//! dispatch; their result is just recorded.

pub mod channel;
pub mod dispatcher;
pub mod email;
pub mod local;
pub mod sms;
pub mod transport;

pub use channel::{routing, ChannelKind, NotificationChannel};
pub use dispatcher::{AlertDispatcher, AlertHistory, DispatchOutcome, DispatchRecord, HISTORY_CAPACITY};
pub use email::EmailChannel;
pub use local::{BeepPattern, Indicator, IndicatorColor, LocalChannel, SimulatedIndicator};
pub use sms::SmsChannel;
pub use transport::{MessageTransport, OutboxTransport, OutgoingMessage};
