pub mod connection;
pub mod ledger;
pub mod mongo_ledger;
pub mod properties;

pub use ledger::{InMemoryPaymentLedger, PaymentLedger};
pub use mongo_ledger::MongoPaymentLedger;
pub use properties::{InMemoryPropertyDirectory, MongoPropertyDirectory, PropertyDirectory};
