pub mod payment_handlers;
