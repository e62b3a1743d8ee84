pub mod mpesa;
pub mod payment;
