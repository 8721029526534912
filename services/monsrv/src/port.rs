//! Device ports
//!
//! - `serial`: request/response over a serial line
//! - `notify`: chunked notification streams with record reassembly
//! - `mqtt`: exchanges relayed through a broker
//! - `mock`: canned responses for dry runs and tests

pub mod assembler;
pub mod mock;
pub mod mqtt;
pub mod notify;
pub mod serial;
pub mod traits;

pub use assembler::{LatestRecord, RecordAssembler};
pub use mock::{MockControl, MockPort};
pub use mqtt::{MqttPort, RelayTopics};
pub use notify::{NotifyLink, NotifyPort, NotifySink, SerialNotifyLink};
pub use serial::{SerialPortConfig, SerialPortLink};
pub use traits::{shared, Port, PortState, PortStats, SharedPort, DEFAULT_EXCHANGE_TIMEOUT};
